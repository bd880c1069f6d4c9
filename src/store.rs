//! Order store - a polled inbound order feed plus a trade record.
//!
//! [`CsvStore`] keeps both in CSV files: inbound orders are read from one
//! file and removed once handed to the engine, trades are appended to
//! another as one row per leg.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::{Sender, UnboundedReceiver};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::{AmendOrder, CancelOrder, Command, NewOrder, TradeEvent};
use crate::order::{Order, OrderTicket, ORIGIN_STORE};

const SEQUENCE_COLUMN: &str = "sequence_number";

const TRADE_HEADER: [&str; 9] = [
    "order_id",
    "internal_id",
    "symbol",
    "customer",
    "currency",
    "side",
    "price",
    "quantity",
    "role",
];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("inbound file has no {0} column")]
    MissingColumn(&'static str),

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("engine command queue closed")]
    EngineClosed,
}

/// One pending row of the inbound order feed.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InboundRow {
    /// `N` new, `A` amend, `C` cancel; anything else is skipped
    pub action: String,
    pub order_id: String,
    pub symbol: String,
    pub customer: String,
    #[serde(default)]
    pub arrive_date: String,
    pub tif: String,
    pub currency: Option<String>,
    pub side: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub available_quantity: Option<Decimal>,
    pub min_fill_quantity: Option<Decimal>,
    pub sequence_number: u64,
}

impl InboundRow {
    /// The engine command for this row, `None` for unknown actions.
    pub fn into_command(self) -> Option<Command> {
        let action = self.action.chars().next();
        let mut ticket = OrderTicket {
            order_id: self.order_id,
            symbol: self.symbol,
            customer: self.customer,
            source: ORIGIN_STORE.to_owned(),
            arrive_date: self.arrive_date,
            tif: self.tif,
            price: self.price,
            quantity: self.quantity,
            available_quantity: None,
            side: self.side,
            currency: self.currency.unwrap_or_default(),
            min_fill_quantity: self.min_fill_quantity.unwrap_or_default(),
        };
        ticket.set_available(self.available_quantity);

        match action {
            Some('N') => Some(Command::New(NewOrder {
                ticket,
                session: None,
            })),
            Some('A') => Some(Command::Amend(AmendOrder {
                ticket,
                original_id: None,
                session: None,
            })),
            Some('C') => Some(Command::Cancel(CancelOrder {
                ticket,
                session: None,
            })),
            _ => None,
        }
    }
}

/// One leg of a trade as written to the trade record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRow {
    pub order_id: String,
    pub internal_id: String,
    pub symbol: String,
    pub customer: String,
    pub currency: String,
    pub side: char,
    pub price: Decimal,
    pub quantity: Decimal,
    /// `A` aggressive, `P` passive
    pub role: char,
}

impl TradeRow {
    fn leg(order: &Order, price: Decimal, quantity: Decimal, role: char) -> Self {
        Self {
            order_id: order.order_id().to_owned(),
            internal_id: order.internal_ref(),
            symbol: order.symbol().to_owned(),
            customer: order.customer().to_owned(),
            currency: order.currency().to_owned(),
            side: order.side().code(),
            price,
            quantity,
            role,
        }
    }

    /// Aggressive then passive leg of a trade
    pub fn from_trade(trade: &TradeEvent) -> [Self; 2] {
        [
            Self::leg(&trade.aggressive, trade.price, trade.quantity, 'A'),
            Self::leg(&trade.passive, trade.price, trade.quantity, 'P'),
        ]
    }
}

/// Backing store for the inbound order feed and the trade record.
pub trait OrderStore: Send {
    /// Every pending inbound row, in file order
    fn fetch_pending(&mut self) -> Result<Vec<InboundRow>, StoreError>;

    /// Drop processed rows by sequence number
    fn acknowledge(&mut self, sequence_numbers: &[u64]) -> Result<(), StoreError>;

    /// Record both legs of a trade
    fn record_match(&mut self, trade: &TradeEvent) -> Result<(), StoreError>;
}

/// CSV-file implementation of [`OrderStore`].
#[derive(Debug, Clone)]
pub struct CsvStore {
    inbound: PathBuf,
    trades: PathBuf,
}

impl CsvStore {
    /// Use `inbound` as the order feed and `trades` as the trade record.
    /// Parent directories are created; neither file needs to exist yet.
    pub fn open(inbound: impl Into<PathBuf>, trades: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            inbound: inbound.into(),
            trades: trades.into(),
        };
        for path in [&store.inbound, &store.trades] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(store)
    }

    pub fn inbound_path(&self) -> &Path {
        &self.inbound
    }

    pub fn trades_path(&self) -> &Path {
        &self.trades
    }
}

impl OrderStore for CsvStore {
    fn fetch_pending(&mut self) -> Result<Vec<InboundRow>, StoreError> {
        if !self.inbound.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.inbound)?;

        let mut rows = Vec::new();
        for (line, record) in reader.deserialize::<InboundRow>().enumerate() {
            match record {
                Ok(row) => rows.push(row),
                // Row stays in the file; without a sequence number it cannot be acknowledged
                Err(e) => warn!(line = line + 2, error = %e, "skipping unreadable inbound row"),
            }
        }
        Ok(rows)
    }

    fn acknowledge(&mut self, sequence_numbers: &[u64]) -> Result<(), StoreError> {
        if sequence_numbers.is_empty() || !self.inbound.exists() {
            return Ok(());
        }
        let done: HashSet<u64> = sequence_numbers.iter().copied().collect();

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.inbound)?;
        let headers = reader.headers()?.clone();
        let column = headers
            .iter()
            .position(|h| h == SEQUENCE_COLUMN)
            .ok_or(StoreError::MissingColumn(SEQUENCE_COLUMN))?;

        let mut kept = Vec::new();
        for record in reader.records() {
            let record = record?;
            let processed = record
                .get(column)
                .and_then(|seq| seq.parse::<u64>().ok())
                .is_some_and(|seq| done.contains(&seq));
            if !processed {
                kept.push(record);
            }
        }

        let staging = self.inbound.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&staging)?;
            writer.write_record(&headers)?;
            for record in &kept {
                writer.write_record(record)?;
            }
            writer.flush()?;
        }
        fs::rename(&staging, &self.inbound)?;
        Ok(())
    }

    fn record_match(&mut self, trade: &TradeEvent) -> Result<(), StoreError> {
        let needs_header = fs::metadata(&self.trades).map_or(true, |m| m.len() == 0);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.trades)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(TRADE_HEADER)?;
        }
        for row in TradeRow::from_trade(trade) {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Poll `store` every `interval`, forwarding rows to the engine, and record
/// every trade received on `trades`. Ends when `trades` closes or the
/// engine stops accepting commands.
pub fn spawn_worker<S>(
    store: S,
    commands: Sender<Command>,
    mut trades: UnboundedReceiver<TradeEvent>,
    interval: Duration,
) -> JoinHandle<()>
where
    S: OrderStore + 'static,
{
    let store = Arc::new(Mutex::new(store));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        info!(interval_secs = interval.as_secs(), "order store polling started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match poll_once(&store, &commands).await {
                        Ok(0) => {}
                        Ok(count) => debug!(count, "inbound orders forwarded"),
                        Err(StoreError::EngineClosed) => break,
                        Err(e) => warn!(error = %e, "inbound order poll failed"),
                    }
                }
                trade = trades.recv() => {
                    let Some(trade) = trade else { break };
                    let store = Arc::clone(&store);
                    let written = tokio::task::spawn_blocking(move || {
                        store.blocking_lock().record_match(&trade)
                    })
                    .await
                    .map_err(StoreError::from)
                    .and_then(|r| r);
                    if let Err(e) = written {
                        warn!(error = %e, "trade record write failed");
                    }
                }
            }
        }
        info!("order store worker stopped");
    })
}

/// One polling pass. Returns how many commands were forwarded.
pub async fn poll_once<S>(store: &Arc<Mutex<S>>, commands: &Sender<Command>) -> Result<usize, StoreError>
where
    S: OrderStore + 'static,
{
    let pending = {
        let store = Arc::clone(store);
        tokio::task::spawn_blocking(move || store.blocking_lock().fetch_pending()).await??
    };
    if pending.is_empty() {
        return Ok(0);
    }

    let mut acknowledged = Vec::with_capacity(pending.len());
    let mut forwarded = 0;
    for row in pending {
        let sequence = row.sequence_number;
        match row.into_command() {
            Some(command) => {
                if commands.send(command).await.is_err() {
                    break;
                }
                forwarded += 1;
            }
            None => debug!(sequence, "skipping inbound row with unknown action"),
        }
        acknowledged.push(sequence);
    }

    {
        let store = Arc::clone(store);
        tokio::task::spawn_blocking(move || store.blocking_lock().acknowledge(&acknowledged)).await??;
    }

    if commands.is_closed() {
        return Err(StoreError::EngineClosed);
    }
    Ok(forwarded)
}
