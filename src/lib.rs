//! # midmatch
//!
//! A continuous, price-time-priority matching engine that trades at the
//! midpoint of the two limits.
//!
//! ## Design Principles
//!
//! - **Single-Writer**: One thread owns every book exclusively (no locks)
//! - **Explicit Context**: Settings, hooks and sinks are passed in, never global
//! - **Arena-Linked Queues**: FIFO queues per price level live in one arena
//! - **Rejections Are Events**: No order action fails by panicking
//!
//! ## Architecture
//!
//! ```text
//! [Order Socket] --\
//! [Price Socket] ---+--> [Command Queue] --> [Engine Thread (Pinned)]
//! [FIX Sessions] --/                                 |
//! [Order Store] --/                          [Dispatcher] --> audit log,
//!                                                             sockets, FIX,
//!                                                             store
//! ```

pub mod arena;
pub mod audit;
pub mod book_index;
pub mod command;
pub mod config;
pub mod engine;
pub mod fix;
pub mod hooks;
pub mod matching;
pub mod order;
pub mod order_gateway;
pub mod price_gateway;
pub mod price_level;
pub mod store;
pub mod transport;

// Re-exports for convenience
pub use arena::{Arena, ArenaIndex, NULL_INDEX};
pub use book_index::{BookIndex, Cursor};
pub use command::{
    AmendOrder, CancelOrder, Command, NewOrder, OutputEvent, RejectReason, SessionId, TradeEvent,
};
pub use config::Config;
pub use engine::{Dispatcher, Engine};
pub use hooks::{EngineHooks, NoopHooks};
pub use matching::{Disposition, EngineSettings, MatchingEngine, Outcome};
pub use order::{Order, OrderTicket, Side, TimeInForce, ValidationError};
pub use price_level::PriceLevel;
