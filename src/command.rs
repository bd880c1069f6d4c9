//! Command and Event types for the matching engine.
//!
//! Commands are inputs from the gateways (order socket, price socket,
//! order store, FIX sessions). Events are outputs fanned out to the
//! audit log and back to those same gateways.

use std::fmt;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::order::{Order, OrderTicket, ValidationError};

/// Identifies one FIX connection so reports can be routed back to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

// ============================================================================
// Input Commands
// ============================================================================

/// Enter a new order
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub ticket: OrderTicket,
    pub session: Option<SessionId>,
}

/// Replace a resting order with new terms
#[derive(Clone, Debug)]
pub struct AmendOrder {
    /// The replacement; its `order_id` may differ from the original's
    pub ticket: OrderTicket,
    /// Id of the order being replaced. `None` means the ticket's own id.
    pub original_id: Option<String>,
    pub session: Option<SessionId>,
}

/// Cancel a resting order. Only the id and symbol are consulted.
#[derive(Clone, Debug)]
pub struct CancelOrder {
    pub ticket: OrderTicket,
    pub session: Option<SessionId>,
}

/// Input commands from the gateways
#[derive(Clone, Debug)]
pub enum Command {
    New(NewOrder),
    Amend(AmendOrder),
    Cancel(CancelOrder),
    /// Start publishing snapshots for a symbol
    Subscribe(String),
    /// Stop publishing snapshots for a symbol
    Unsubscribe(String),
    /// Stop the engine loop
    Shutdown,
}

/// Order action a rejection refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    New,
    Amend,
    Cancel,
}

impl Action {
    /// Prefix of the reject line for this action
    pub const fn reject_tag(self) -> &'static str {
        match self {
            Action::New => "REJECTNEW",
            Action::Amend => "REJECTAMEND",
            Action::Cancel => "REJECTCANCEL",
        }
    }
}

// ============================================================================
// Rejections
// ============================================================================

/// Business reasons an order action is refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("Order already exists in book")]
    DuplicateOrderId,

    #[error("Symbol {0} is not a valid instrument")]
    InvalidInstrument(String),

    #[error("Order quantity {quantity} is greater than maximum order quantity {maximum}")]
    QuantityAboveMaximum { quantity: Decimal, maximum: Decimal },

    #[error("Cannot cancel unknown order")]
    UnknownCancel,

    #[error("Cannot amend unknown order")]
    UnknownAmend,

    #[error("Cannot amend customer")]
    AmendCustomer,

    #[error("Cannot amend source")]
    AmendSource,

    #[error("Cannot amend side")]
    AmendSide,

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Reasons a market data request is refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("No subscriptions allowed, Dark Pool")]
    DarkPool,

    #[error("Invalid instrument")]
    InvalidInstrument,

    #[error("Already subscribed")]
    AlreadySubscribed,

    #[error("Not subscribed")]
    NotSubscribed,
}

// ============================================================================
// Output Events
// ============================================================================

/// An order state change, with the FIX session it belongs to (if any)
#[derive(Clone, Debug)]
pub struct OrderReport {
    pub order: Order,
    pub session: Option<SessionId>,
}

/// A refused order action
#[derive(Clone, Debug)]
pub struct Rejection {
    pub action: Action,
    /// The request as received
    pub ticket: OrderTicket,
    pub reason: RejectReason,
    pub session: Option<SessionId>,
}

/// A fill between an incoming and a resting order.
///
/// Both orders are captured after the fill was applied.
#[derive(Clone, Debug)]
pub struct TradeEvent {
    pub aggressive: Order,
    pub passive: Order,
    pub price: Decimal,
    pub quantity: Decimal,
    pub aggressive_session: Option<SessionId>,
    pub passive_session: Option<SessionId>,
}

impl TradeEvent {
    /// Body of the audit and match-report lines
    pub fn details(&self) -> String {
        format!(
            "aggressiveOrderID={},passiveOrderID={},TradePrice={},TradeQuantity={}",
            self.aggressive.order_id(),
            self.passive.order_id(),
            self.price,
            self.quantity
        )
    }
}

/// Full book for one symbol, one `(price, available)` pair per resting order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BookSnapshot {
    pub symbol: String,
    /// Best bid first
    pub bids: Vec<(Decimal, Decimal)>,
    /// Best offer first
    pub offers: Vec<(Decimal, Decimal)>,
}

impl fmt::Display for BookSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SNAPSHOT,{}", self.symbol)?;
        for (label, entries) in [("BID", &self.bids), ("OFFER", &self.offers)] {
            if entries.is_empty() {
                continue;
            }
            write!(f, ",{label}")?;
            for (price, qty) in entries {
                write!(f, ",{price},{qty}")?;
            }
        }
        Ok(())
    }
}

/// A refused subscribe/unsubscribe
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionReject {
    pub symbol: String,
    pub reason: SubscriptionError,
}

impl fmt::Display for SubscriptionReject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "REJECT,Symbol={},RejectText={}", self.symbol, self.reason)
    }
}

/// Output events from the matching engine
#[derive(Clone, Debug)]
pub enum OutputEvent {
    /// Order accepted, about to match
    Accepted(OrderReport),
    /// Replacement accepted, about to match
    Amended(OrderReport),
    Canceled(OrderReport),
    /// Filled, or left below its own min-fill
    Completed(OrderReport),
    /// IOC remainder discarded
    Expired(OrderReport),
    Rejected(Rejection),
    Trade(TradeEvent),
    Snapshot(BookSnapshot),
    SubscriptionRejected(SubscriptionReject),
}

impl OutputEvent {
    /// The event as an audit log line, `None` for market data events.
    pub fn audit_line(&self) -> Option<String> {
        match self {
            OutputEvent::Accepted(r) => Some(format!("NEW,{}", r.order)),
            OutputEvent::Amended(r) => Some(format!("AMEND,{}", r.order)),
            OutputEvent::Canceled(r) => Some(format!("CANCEL,{}", r.order)),
            OutputEvent::Completed(r) => Some(format!("COMPLETED,{}", r.order)),
            OutputEvent::Expired(r) => Some(format!("EXPIRED,{}", r.order)),
            OutputEvent::Rejected(r) => Some(format!(
                "{},{},RejectText={}",
                r.action.reject_tag(),
                r.ticket,
                r.reason
            )),
            OutputEvent::Trade(t) => Some(format!("MATCH,{}", t.details())),
            OutputEvent::Snapshot(_) | OutputEvent::SubscriptionRejected(_) => None,
        }
    }

    /// Symbol the event concerns
    pub fn symbol(&self) -> &str {
        match self {
            OutputEvent::Accepted(r)
            | OutputEvent::Amended(r)
            | OutputEvent::Canceled(r)
            | OutputEvent::Completed(r)
            | OutputEvent::Expired(r) => r.order.symbol(),
            OutputEvent::Rejected(r) => &r.ticket.symbol,
            OutputEvent::Trade(t) => t.aggressive.symbol(),
            OutputEvent::Snapshot(s) => &s.symbol,
            OutputEvent::SubscriptionRejected(s) => &s.symbol,
        }
    }
}
