//! midmatch server: order socket, price socket, optional FIX listener and
//! optional order store feed around one matching engine thread.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use midmatch::audit::{self, AuditLog};
use midmatch::engine::{self, Dispatcher, Engine};
use midmatch::fix::{self, FixParser};
use midmatch::order_gateway::OrderParser;
use midmatch::price_gateway::PriceParser;
use midmatch::store::{self, CsvStore};
use midmatch::transport::{self, LineHub, SessionOptions};
use midmatch::{Command, Config, EngineSettings};

/// Engine command queue depth
const COMMAND_QUEUE: usize = 4096;

/// Snapshots held for the next price client; older ones are stale anyway
const PRICE_BACKLOG: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "midmatch-server", about = "Midpoint matching engine server")]
struct Args {
    /// TOML config file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `midmatch=debug` (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match &args.log_level {
        Some(level) => EnvFilter::try_new(level).context("invalid --log-level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| "midmatch=info".into()),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => {
            let config = Config::default();
            config.validate()?;
            config
        }
    };
    info!(?config, "configuration loaded");

    // ========================================
    // Audit log
    // ========================================
    let mut audit_log = AuditLog::open(&config).context("opening audit log")?;
    audit_log.write("midmatch started")?;
    let (audit_tx, audit_rx) = mpsc::unbounded_channel();
    let audit_thread = audit::spawn_writer(audit_log, audit_rx)?;

    // ========================================
    // Engine
    // ========================================
    let (commands, command_rx) = mpsc::channel::<Command>(COMMAND_QUEUE);
    let order_hub = LineHub::new();
    let price_hub = LineHub::with_backlog_limit(PRICE_BACKLOG);
    // FIX reports are addressed to live sessions only
    let fix_hub = LineHub::with_backlog_limit(0);

    let mut dispatcher = Dispatcher::new()
        .with_audit(audit_tx)
        .with_order_hub(order_hub.clone())
        .with_price_hub(price_hub.clone());

    let mut tasks = Vec::new();

    if config.use_fix {
        let (fix_tx, fix_rx) = mpsc::unbounded_channel();
        dispatcher = dispatcher.with_fix(fix_tx);
        tasks.push(tokio::spawn(fix::run_reporter(fix_rx, fix_hub.clone())));
    }

    let store_feed = if config.use_db {
        let store = CsvStore::open(&config.db_inbound_file, &config.db_trades_file)
            .context("opening order store")?;
        let (trade_tx, trade_rx) = mpsc::unbounded_channel();
        dispatcher = dispatcher.with_trades(trade_tx);
        Some((store, trade_rx))
    } else {
        None
    };

    let engine_thread = engine::spawn(
        Engine::new(EngineSettings::from(&config)),
        command_rx,
        dispatcher,
        config.pin_engine_core,
    )?;

    if let Some((store, trade_rx)) = store_feed {
        tasks.push(store::spawn_worker(
            store,
            commands.clone(),
            trade_rx,
            config.db_scan_interval(),
        ));
    }

    // ========================================
    // Listeners
    // ========================================
    let options = SessionOptions::plain(config.ping_interval());

    let listener = TcpListener::bind(config.socket_addr(config.order_port)?)
        .await
        .context("binding order socket")?;
    tasks.push(tokio::spawn(listen(transport::serve(
        listener,
        "order",
        |_| OrderParser,
        order_hub,
        commands.clone(),
        options.clone(),
    ))));

    let listener = TcpListener::bind(config.socket_addr(config.price_port)?)
        .await
        .context("binding price socket")?;
    tasks.push(tokio::spawn(listen(transport::serve(
        listener,
        "price",
        |_| PriceParser,
        price_hub,
        commands.clone(),
        options.clone(),
    ))));

    if config.use_fix {
        let listener = TcpListener::bind(config.socket_addr(config.fix_port)?)
            .await
            .context("binding FIX socket")?;
        let customer = config.default_fix_customer.clone();
        let fix_options = SessionOptions {
            greeting: None,
            heartbeat: fix::heartbeat(),
            ping_interval: config.ping_interval(),
        };
        tasks.push(tokio::spawn(listen(transport::serve(
            listener,
            "fix",
            move |client| FixParser::new(client, customer.clone()),
            fix_hub,
            commands.clone(),
            fix_options,
        ))));
    }

    info!("midmatch ready");

    // ========================================
    // Shutdown
    // ========================================
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("interrupt received, shutting down");

    for task in &tasks {
        task.abort();
    }
    commands.send(Command::Shutdown).await.ok();
    drop(commands);

    let engine = tokio::task::spawn_blocking(move || engine_thread.join())
        .await?
        .map_err(|_| anyhow::anyhow!("engine thread panicked"))?;
    info!(resting = engine.order_count(), "engine joined");

    // The audit channel closed with the engine thread's dispatcher
    tokio::task::spawn_blocking(move || audit_thread.join())
        .await?
        .map_err(|_| anyhow::anyhow!("audit writer panicked"))?;

    info!("midmatch stopped");
    Ok(())
}

async fn listen(server: impl std::future::Future<Output = Result<(), transport::TransportError>>) {
    if let Err(e) = server.await {
        error!(error = %e, "listener stopped");
    }
}
