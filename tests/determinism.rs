//! Determinism Test - Golden Master verification.
//!
//! Verifies that the engine produces identical results across runs
//! when given the same input sequence.

use midmatch::command::OutputEvent;
use midmatch::{AmendOrder, CancelOrder, Command, Engine, EngineSettings, NewOrder, OrderTicket};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const SYMBOLS: [&str; 3] = ["ABC", "DEF", "GHI"];

fn random_ticket(rng: &mut ChaCha8Rng, id: u64, symbol: &str) -> OrderTicket {
    OrderTicket {
        order_id: format!("O{id}"),
        symbol: symbol.into(),
        customer: format!("C{}", rng.gen_range(1..10)),
        source: "OS".into(),
        arrive_date: "20240102".into(),
        tif: if rng.gen_bool(0.8) { "DAY" } else { "IOC" }.into(),
        price: Decimal::new(rng.gen_range(9_500..10_500), 2),
        quantity: Decimal::from(rng.gen_range(1..500)),
        side: if rng.gen_bool(0.5) { "B" } else { "S" }.into(),
        currency: if rng.gen_bool(0.9) { "USD" } else { "EUR" }.into(),
        min_fill_quantity: if rng.gen_bool(0.1) {
            Decimal::from(rng.gen_range(1..50))
        } else {
            Decimal::ZERO
        },
        ..Default::default()
    }
}

/// Generate a deterministic sequence of commands
fn generate_commands(seed: u64, count: usize) -> Vec<Command> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut commands = Vec::with_capacity(count);
    let mut placed: Vec<(u64, OrderTicket)> = Vec::new();
    let mut next_id = 1u64;

    for _ in 0..count {
        let roll: f64 = rng.gen();
        if placed.is_empty() || roll < 0.65 {
            let symbol = SYMBOLS[rng.gen_range(0..SYMBOLS.len())];
            let ticket = random_ticket(&mut rng, next_id, symbol);
            placed.push((next_id, ticket.clone()));
            next_id += 1;
            commands.push(Command::New(NewOrder { ticket, session: None }));
        } else if roll < 0.85 {
            // Cancel something we placed; it may already be gone
            let idx = rng.gen_range(0..placed.len());
            let (_, ticket) = placed.swap_remove(idx);
            commands.push(Command::Cancel(CancelOrder { ticket, session: None }));
        } else {
            // Reprice something we placed, keeping side and customer
            let idx = rng.gen_range(0..placed.len());
            let mut ticket = placed[idx].1.clone();
            ticket.price = Decimal::new(rng.gen_range(9_500..10_500), 2);
            placed[idx].1 = ticket.clone();
            commands.push(Command::Amend(AmendOrder {
                ticket,
                original_id: None,
                session: None,
            }));
        }
    }

    commands
}

/// Compute a hash of all output events
fn hash_events(events: &[OutputEvent]) -> u64 {
    let mut hasher = DefaultHasher::new();

    for event in events {
        match event {
            OutputEvent::Trade(t) => {
                "Trade".hash(&mut hasher);
                t.aggressive.order_id().hash(&mut hasher);
                t.passive.order_id().hash(&mut hasher);
                t.price.hash(&mut hasher);
                t.quantity.hash(&mut hasher);
            }
            OutputEvent::Snapshot(s) => s.to_string().hash(&mut hasher),
            OutputEvent::SubscriptionRejected(s) => s.to_string().hash(&mut hasher),
            other => {
                // Internal ids differ between runs, so hash the variant and order id
                std::mem::discriminant(other).hash(&mut hasher);
                if let Some(line) = other.audit_line() {
                    line.split(',').nth(1).hash(&mut hasher);
                }
            }
        }
    }

    hasher.finish()
}

/// Run the engine with a command sequence and return hashes
fn run_engine(commands: &[Command]) -> (u64, u64) {
    let mut engine = Engine::new(EngineSettings::default());
    let mut all_events = Vec::new();

    for cmd in commands {
        all_events.extend(engine.process_command(cmd.clone()));
    }

    (hash_events(&all_events), engine.state_hash())
}

#[test]
fn test_determinism_small() {
    const SEED: u64 = 0xDEADBEEF;
    const COUNT: usize = 1_000;
    const RUNS: usize = 10;

    let commands = generate_commands(SEED, COUNT);
    let (first_event_hash, first_state_hash) = run_engine(&commands);

    for run in 1..RUNS {
        let (event_hash, state_hash) = run_engine(&commands);
        assert_eq!(event_hash, first_event_hash, "Event hash mismatch on run {}", run);
        assert_eq!(state_hash, first_state_hash, "State hash mismatch on run {}", run);
    }

    println!("Determinism test passed!");
    println!("  Commands: {}", COUNT);
    println!("  Event hash: {:#018x}", first_event_hash);
    println!("  State hash: {:#018x}", first_state_hash);
}

#[test]
fn test_determinism_large() {
    const SEED: u64 = 0xCAFEBABE;
    const COUNT: usize = 50_000;
    const RUNS: usize = 3;

    let commands = generate_commands(SEED, COUNT);
    let (first_event_hash, first_state_hash) = run_engine(&commands);

    for run in 1..RUNS {
        let (event_hash, state_hash) = run_engine(&commands);
        assert_eq!(event_hash, first_event_hash, "Event hash mismatch on run {}", run);
        assert_eq!(state_hash, first_state_hash, "State hash mismatch on run {}", run);
    }
}

#[test]
fn test_different_seeds_produce_different_results() {
    let (hash1, _) = run_engine(&generate_commands(1, 1_000));
    let (hash2, _) = run_engine(&generate_commands(2, 1_000));

    assert_ne!(hash1, hash2, "Different seeds should produce different results");
}
