//! Extension callbacks invoked by the matching engine at each order
//! lifecycle transition.
//!
//! Hooks run on the engine thread, inline with matching. Implementations
//! must be quick and must not block.

use rust_decimal::Decimal;

use crate::command::{Action, RejectReason};
use crate::order::{Order, OrderTicket};

/// Lifecycle callbacks. Every method defaults to doing nothing.
pub trait EngineHooks: Send + Sync {
    /// A new order passed validation and is about to match
    fn on_new(&self, _order: &Order) {}

    /// `old` is being replaced by `new`
    fn on_amend(&self, _old: &Order, _new: &Order) {}

    fn on_cancel(&self, _order: &Order) {}

    /// An IOC remainder was discarded
    fn on_expire(&self, _order: &Order) {}

    fn on_complete(&self, _order: &Order) {}

    fn on_reject(&self, _action: Action, _ticket: &OrderTicket, _reason: &RejectReason) {}

    /// Called once per fill, after both orders were updated
    fn on_execution(&self, _aggressive: &Order, _passive: &Order, _price: Decimal, _quantity: Decimal) {}
}

/// The default hook set.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

impl EngineHooks for NoopHooks {}
