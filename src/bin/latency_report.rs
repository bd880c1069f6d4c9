use hdrhistogram::Histogram;
use midmatch::{Command, Engine, EngineSettings, NewOrder, OrderTicket};
use rust_decimal::Decimal;
use std::time::{Duration, Instant};

const ITERATIONS: u64 = 1_000_000;
const SYMBOLS: [&str; 4] = ["ABC", "DEF", "GHI", "JKL"];

fn order(n: u64) -> Command {
    // Buys sit a little below sells so roughly half the flow trades
    let (side, offset) = if n % 2 == 0 { ("B", 0) } else { ("S", 40) };
    Command::New(NewOrder {
        ticket: OrderTicket {
            order_id: format!("O{n}"),
            symbol: SYMBOLS[(n % SYMBOLS.len() as u64) as usize].into(),
            customer: "BENCH".into(),
            source: "OS".into(),
            arrive_date: "20240102".into(),
            tif: if n % 7 == 0 { "IOC" } else { "DAY" }.into(),
            price: Decimal::new(10_000 + (n % 100) as i64 - offset, 2),
            quantity: Decimal::from(10 + n % 5),
            side: side.into(),
            currency: "USD".into(),
            ..Default::default()
        },
        session: None,
    })
}

fn main() {
    println!("Preparing Latency Benchmark...");

    let mut engine = Engine::new(EngineSettings::default());
    let mut histogram = match Histogram::<u64>::new_with_bounds(1, 1_000_000, 3) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("histogram setup failed: {e}");
            return;
        }
    };

    // Tickets are built outside the timed section
    let commands: Vec<Command> = (1..=ITERATIONS).map(order).collect();

    println!("Running {} iterations...", ITERATIONS);

    let mut total_duration = Duration::ZERO;
    for cmd in commands {
        let start = Instant::now();
        std::hint::black_box(engine.process_command(cmd));
        let elapsed = start.elapsed();

        // Outliers past the top bound are clamped rather than dropped
        histogram.saturating_record(elapsed.as_nanos() as u64);
        total_duration += elapsed;
    }

    println!("\n=== Latency Report (ns) ===");
    println!("Total Ops:  {}", ITERATIONS);
    println!("Resting:    {}", engine.order_count());
    println!("Throughput: {:.2} ops/sec", ITERATIONS as f64 / total_duration.as_secs_f64());
    println!("---------------------------");
    println!("Min:    {:7} ns", histogram.min());
    println!("P50:    {:7} ns", histogram.value_at_quantile(0.50));
    println!("P90:    {:7} ns", histogram.value_at_quantile(0.90));
    println!("P99:    {:7} ns", histogram.value_at_quantile(0.99));
    println!("P99.9:  {:7} ns", histogram.value_at_quantile(0.999));
    println!("Max:    {:7} ns", histogram.max());
    println!("---------------------------");

    println!("\nDistribution:");
    for v in histogram.iter_log(1_000, 2.0) {
        let count = v.count_since_last_iteration();
        if count > 0 {
            println!("<= {:8} ns: {:10}", v.value_iterated_to(), count);
        }
    }
}
