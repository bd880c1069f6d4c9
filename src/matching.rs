//! Matching Engine - order lifecycle and the matching algorithm.
//!
//! Owns the registry of resting orders and a pair of [`BookIndex`]es per
//! symbol. Every operation runs to completion synchronously and returns
//! the events it produced:
//!
//! 1. VALIDATE: ticket -> [`Order`], then book-level checks
//! 2. MATCH: walk the opposite book, filling at the midpoint of the two limits
//! 3. DISPOSE: complete, expire (IOC) or rest (DAY) whatever is left

use std::sync::Arc;

use rust_decimal::Decimal;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::book_index::BookIndex;
use crate::command::{
    Action, AmendOrder, BookSnapshot, CancelOrder, Command, NewOrder, OrderReport, OutputEvent,
    RejectReason, Rejection, SessionId, SubscriptionError, SubscriptionReject, TradeEvent,
};
use crate::config::Config;
use crate::hooks::{EngineHooks, NoopHooks};
use crate::order::{Order, OrderTicket, Side, TimeInForce, ValidationError, ORIGIN_FIX};

/// Registry key: (symbol, order id)
type OrderKey = (String, String);

/// Book-level rules applied on top of ticket validation
#[derive(Clone, Debug, Default)]
pub struct EngineSettings {
    /// When set, only these symbols may trade or be subscribed to
    pub valid_symbols: Option<FxHashSet<String>>,
    /// Largest accepted quantity; zero disables the check
    pub max_order_size: Decimal,
    /// Applied to tickets without a currency
    pub default_currency: Option<String>,
    /// Refuse all market data subscriptions
    pub dark_pool: bool,
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            valid_symbols: config
                .valid_symbols
                .as_ref()
                .map(|symbols| symbols.iter().cloned().collect()),
            max_order_size: config.max_order_size,
            default_currency: config.default_currency.clone(),
            dark_pool: config.dark_pool,
        }
    }
}

/// How an accepted order left the matching pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// DAY order with quantity left, now in the book
    Resting,
    /// Nothing left, or a DAY order left below its own min-fill
    Completed,
    /// IOC order with any quantity left, discarded
    Expired,
}

/// Result of one engine operation plus the events it emitted.
#[derive(Debug)]
pub struct Outcome<T, E> {
    pub result: Result<T, E>,
    pub events: Vec<OutputEvent>,
}

/// Trade price for a fill between limits `a` and `b`: their midpoint,
/// truncated down to the cent.
pub fn midpoint_price(a: Decimal, b: Decimal) -> Decimal {
    let cents = ((a + b) / Decimal::TWO * Decimal::ONE_HUNDRED).floor();
    let mut price = cents / Decimal::ONE_HUNDRED;
    price.rescale(2);
    price
}

/// The matching engine core
pub struct MatchingEngine {
    settings: EngineSettings,
    /// Every resting order
    registry: FxHashMap<OrderKey, Order>,
    /// Resting buys per symbol
    bids: FxHashMap<String, BookIndex>,
    /// Resting sells per symbol
    offers: FxHashMap<String, BookIndex>,
    /// Symbols with market data subscribers
    subscriptions: FxHashSet<String>,
    /// FIX session owning each live FIX order
    sessions: FxHashMap<OrderKey, SessionId>,
    hooks: Arc<dyn EngineHooks>,
}

impl MatchingEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_hooks(settings, Arc::new(NoopHooks))
    }

    pub fn with_hooks(settings: EngineSettings, hooks: Arc<dyn EngineHooks>) -> Self {
        Self {
            settings,
            registry: FxHashMap::default(),
            bids: FxHashMap::default(),
            offers: FxHashMap::default(),
            subscriptions: FxHashSet::default(),
            sessions: FxHashMap::default(),
            hooks,
        }
    }

    /// Run one command. `Shutdown` is a no-op here; the engine loop handles it.
    pub fn process(&mut self, command: Command) -> Vec<OutputEvent> {
        match command {
            Command::New(new) => self.new_order(new).events,
            Command::Amend(amend) => self.amend_order(amend).events,
            Command::Cancel(cancel) => self.cancel_order(cancel).events,
            Command::Subscribe(symbol) => self.subscribe(&symbol).events,
            Command::Unsubscribe(symbol) => self.unsubscribe(&symbol).events,
            Command::Shutdown => Vec::new(),
        }
    }

    // ========================================================================
    // Order Actions
    // ========================================================================

    /// Validate, match and then rest / complete / expire a new order.
    pub fn new_order(&mut self, request: NewOrder) -> Outcome<Disposition, RejectReason> {
        let mut events = Vec::new();
        let NewOrder { ticket, session } = request;

        let result = match self.admit_new(&ticket) {
            Ok(order) => {
                self.track_session(&order, session);
                self.hooks.on_new(&order);
                events.push(OutputEvent::Accepted(self.report(&order)));
                Ok(self.match_and_dispose(order, &mut events))
            }
            Err(reason) => Err(self.reject(Action::New, ticket, reason, session, &mut events)),
        };

        Outcome { result, events }
    }

    fn admit_new(&self, ticket: &OrderTicket) -> Result<Order, RejectReason> {
        let order = Order::from_ticket(ticket, self.settings.default_currency.as_deref())?;

        if self.registry.contains_key(&key_of(&order)) {
            return Err(RejectReason::DuplicateOrderId);
        }
        if let Some(valid) = &self.settings.valid_symbols {
            if !valid.contains(order.symbol()) {
                return Err(RejectReason::InvalidInstrument(order.symbol().to_owned()));
            }
        }
        self.check_ceiling(order.quantity())?;
        Ok(order)
    }

    /// Replace a resting order, then run the replacement through matching.
    ///
    /// The original is looked up by `original_id` (or the ticket's own id)
    /// and must keep its customer, source and side.
    pub fn amend_order(&mut self, request: AmendOrder) -> Outcome<Disposition, RejectReason> {
        let mut events = Vec::new();
        let AmendOrder {
            mut ticket,
            original_id,
            session,
        } = request;

        let original_id = original_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| ticket.order_id.clone());
        let original_key = (ticket.symbol.clone(), original_id);

        let admitted = match self.registry.get(&original_key) {
            Some(original) => {
                if ticket.available_quantity.is_none() {
                    ticket.available_quantity =
                        Some(original.available_quantity().min(ticket.quantity));
                }
                self.admit_amend(original, &ticket)
            }
            None => Err(RejectReason::UnknownAmend),
        };

        let result = match admitted {
            Ok(order) => {
                let original = self.remove_resting(&original_key);
                let previous_session = self.release_session(&original_key);
                if let Some(original) = &original {
                    self.hooks.on_amend(original, &order);
                }
                self.track_session(&order, session.or(previous_session));
                events.push(OutputEvent::Amended(self.report(&order)));
                Ok(self.match_and_dispose(order, &mut events))
            }
            Err(reason) => Err(self.reject(Action::Amend, ticket, reason, session, &mut events)),
        };

        Outcome { result, events }
    }

    fn admit_amend(&self, original: &Order, ticket: &OrderTicket) -> Result<Order, RejectReason> {
        if ticket.customer != original.customer() {
            return Err(RejectReason::AmendCustomer);
        }
        if ticket.source != original.source() {
            return Err(RejectReason::AmendSource);
        }
        if Side::parse(&ticket.side) != Some(original.side()) {
            return Err(RejectReason::AmendSide);
        }

        let order = Order::from_ticket(ticket, self.settings.default_currency.as_deref())?;

        if order.order_id() != original.order_id() && self.registry.contains_key(&key_of(&order)) {
            return Err(RejectReason::DuplicateOrderId);
        }
        self.check_ceiling(order.quantity())?;
        Ok(order)
    }

    /// Remove a resting order. Only the ticket's id and symbol are used.
    pub fn cancel_order(&mut self, request: CancelOrder) -> Outcome<(), RejectReason> {
        let mut events = Vec::new();
        let CancelOrder { ticket, session } = request;

        let key = (ticket.symbol.clone(), ticket.order_id.clone());
        let found = if ticket.order_id.is_empty() {
            Err(RejectReason::from(ValidationError::BlankField("OrderID")))
        } else if ticket.symbol.is_empty() {
            Err(RejectReason::from(ValidationError::BlankField("Symbol")))
        } else {
            self.remove_resting(&key).ok_or(RejectReason::UnknownCancel)
        };

        let result = match found {
            Ok(order) => {
                self.hooks.on_cancel(&order);
                let owner = self.release_session(&key);
                events.push(OutputEvent::Canceled(OrderReport {
                    order,
                    session: owner.or(session),
                }));
                self.push_snapshot(&ticket.symbol, &mut events);
                Ok(())
            }
            Err(reason) => Err(self.reject(Action::Cancel, ticket, reason, session, &mut events)),
        };

        Outcome { result, events }
    }

    fn check_ceiling(&self, quantity: Decimal) -> Result<(), RejectReason> {
        let maximum = self.settings.max_order_size;
        if maximum > Decimal::ZERO && quantity > maximum {
            return Err(RejectReason::QuantityAboveMaximum { quantity, maximum });
        }
        Ok(())
    }

    fn reject(
        &self,
        action: Action,
        ticket: OrderTicket,
        reason: RejectReason,
        session: Option<SessionId>,
        events: &mut Vec<OutputEvent>,
    ) -> RejectReason {
        debug!(
            action = action.reject_tag(),
            order_id = %ticket.order_id,
            symbol = %ticket.symbol,
            %reason,
            "order action rejected"
        );
        self.hooks.on_reject(action, &ticket, &reason);
        events.push(OutputEvent::Rejected(Rejection {
            action,
            ticket,
            reason: reason.clone(),
            session,
        }));
        reason
    }

    // ========================================================================
    // Matching
    // ========================================================================

    fn match_and_dispose(&mut self, order: Order, events: &mut Vec<OutputEvent>) -> Disposition {
        let order = self.execute(order, events);

        // A nonzero IOC remainder expires even when it is below its min-fill
        let ioc_leftover = order.tif() == TimeInForce::ImmediateOrCancel
            && !order.available_quantity().is_zero();
        if order.is_exhausted() && !ioc_leftover {
            self.hooks.on_complete(&order);
            events.push(OutputEvent::Completed(self.report(&order)));
            self.release_session(&key_of(&order));
            return Disposition::Completed;
        }

        let symbol = order.symbol().to_owned();
        let disposition = match order.tif() {
            TimeInForce::Day => {
                self.rest(order);
                Disposition::Resting
            }
            TimeInForce::ImmediateOrCancel => {
                self.hooks.on_expire(&order);
                events.push(OutputEvent::Expired(self.report(&order)));
                self.release_session(&key_of(&order));
                Disposition::Expired
            }
        };
        self.push_snapshot(&symbol, events);
        disposition
    }

    /// Fill `order` against the opposite book until it is filled or no
    /// eligible resting order remains.
    ///
    /// Candidates come best price first, FIFO within a price. A candidate
    /// with a different currency, or whose min-fill either side cannot
    /// satisfy, is skipped without changing anything.
    fn execute(&mut self, mut order: Order, events: &mut Vec<OutputEvent>) -> Order {
        let symbol = order.symbol().to_owned();
        let limit = order.price();
        let opposite = order.side().opposite();

        if order.available_quantity().is_zero() {
            return order;
        }

        let mut hit = self
            .book(opposite, &symbol)
            .and_then(|book| book.match_head(limit, false));

        while let Some((passive_id, cursor)) = hit {
            let passive_key = (symbol.clone(), passive_id);
            let filled = match self.registry.get_mut(&passive_key) {
                Some(passive) if order.can_fill_against(passive) => {
                    let price = midpoint_price(limit, passive.price());
                    let quantity = order.available_quantity().min(passive.available_quantity());
                    passive.execute(quantity, price);
                    order.execute(quantity, price);
                    Some((passive.clone(), price, quantity))
                }
                Some(_) => None,
                None => {
                    debug_assert!(false, "book entry without registry entry");
                    None
                }
            };

            if let Some((passive, price, quantity)) = filled {
                self.hooks.on_execution(&order, &passive, price, quantity);
                debug!(
                    symbol = %symbol,
                    aggressive = order.order_id(),
                    passive = passive.order_id(),
                    %price,
                    %quantity,
                    "trade"
                );
                events.push(OutputEvent::Trade(TradeEvent {
                    aggressive_session: self.sessions.get(&key_of(&order)).copied(),
                    passive_session: self.sessions.get(&passive_key).copied(),
                    aggressive: order.clone(),
                    passive: passive.clone(),
                    price,
                    quantity,
                }));

                if passive.is_exhausted() {
                    self.remove_resting(&passive_key);
                    self.hooks.on_complete(&passive);
                    events.push(OutputEvent::Completed(self.report(&passive)));
                    self.release_session(&passive_key);
                }
                self.push_snapshot(&symbol, events);

                if order.available_quantity().is_zero() {
                    break;
                }
            }

            hit = self
                .book(opposite, &symbol)
                .and_then(|book| book.match_next(cursor, limit, false));
        }

        order
    }

    // ========================================================================
    // Registry / Book Maintenance
    // ========================================================================

    fn rest(&mut self, order: Order) {
        let side = order.side();
        let books = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.offers,
        };
        books
            .entry(order.symbol().to_owned())
            .or_insert_with(|| BookIndex::new(side))
            .insert(order.price(), order.order_id());
        self.registry.insert(key_of(&order), order);
    }

    /// Take an order out of the registry and its book.
    fn remove_resting(&mut self, key: &OrderKey) -> Option<Order> {
        let order = self.registry.remove(key)?;
        let books = match order.side() {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.offers,
        };
        let removed = books
            .get_mut(order.symbol())
            .is_some_and(|book| book.remove(order.price(), order.order_id()));
        debug_assert!(removed, "registry entry without book entry");
        Some(order)
    }

    fn track_session(&mut self, order: &Order, session: Option<SessionId>) {
        if let Some(session) = session {
            if order.source() == ORIGIN_FIX {
                self.sessions.insert(key_of(order), session);
            }
        }
    }

    fn release_session(&mut self, key: &OrderKey) -> Option<SessionId> {
        self.sessions.remove(key)
    }

    fn report(&self, order: &Order) -> OrderReport {
        OrderReport {
            order: order.clone(),
            session: self.sessions.get(&key_of(order)).copied(),
        }
    }

    // ========================================================================
    // Market Data
    // ========================================================================

    /// Start publishing snapshots for `symbol`. Emits one right away.
    pub fn subscribe(&mut self, symbol: &str) -> Outcome<(), SubscriptionError> {
        let mut events = Vec::new();

        let result = if self.settings.dark_pool {
            Err(SubscriptionError::DarkPool)
        } else if !self.is_valid_symbol(symbol) {
            Err(SubscriptionError::InvalidInstrument)
        } else if !self.subscriptions.insert(symbol.to_owned()) {
            Err(SubscriptionError::AlreadySubscribed)
        } else {
            self.push_snapshot(symbol, &mut events);
            Ok(())
        };

        if let Err(reason) = result {
            events.push(OutputEvent::SubscriptionRejected(SubscriptionReject {
                symbol: symbol.to_owned(),
                reason,
            }));
        }
        Outcome { result, events }
    }

    pub fn unsubscribe(&mut self, symbol: &str) -> Outcome<(), SubscriptionError> {
        let mut events = Vec::new();

        let result = if self.subscriptions.remove(symbol) {
            Ok(())
        } else {
            events.push(OutputEvent::SubscriptionRejected(SubscriptionReject {
                symbol: symbol.to_owned(),
                reason: SubscriptionError::NotSubscribed,
            }));
            Err(SubscriptionError::NotSubscribed)
        };
        Outcome { result, events }
    }

    fn is_valid_symbol(&self, symbol: &str) -> bool {
        self.settings
            .valid_symbols
            .as_ref()
            .map_or(true, |valid| valid.contains(symbol))
    }

    fn push_snapshot(&self, symbol: &str, events: &mut Vec<OutputEvent>) {
        if self.subscriptions.contains(symbol) {
            events.push(OutputEvent::Snapshot(self.snapshot(symbol)));
        }
    }

    /// The full book for `symbol`, one entry per resting order.
    pub fn snapshot(&self, symbol: &str) -> BookSnapshot {
        let entries = |side: Side| -> Vec<(Decimal, Decimal)> {
            self.book(side, symbol)
                .map(|book| {
                    book.ordered_ids()
                        .filter_map(|id| self.registry.get(&(symbol.to_owned(), id.to_owned())))
                        .map(|order| (order.price(), order.available_quantity()))
                        .collect()
                })
                .unwrap_or_default()
        };

        BookSnapshot {
            symbol: symbol.to_owned(),
            bids: entries(Side::Buy),
            offers: entries(Side::Sell),
        }
    }

    // ========================================================================
    // Utility Methods
    // ========================================================================

    /// Book of resting orders on `side` for `symbol`
    pub fn book(&self, side: Side, symbol: &str) -> Option<&BookIndex> {
        match side {
            Side::Buy => self.bids.get(symbol),
            Side::Sell => self.offers.get(symbol),
        }
    }

    /// A resting order
    pub fn order(&self, symbol: &str, order_id: &str) -> Option<&Order> {
        self.registry.get(&(symbol.to_owned(), order_id.to_owned()))
    }

    /// All resting orders, in no particular order
    pub fn orders(&self) -> impl Iterator<Item = &Order> + '_ {
        self.registry.values()
    }

    /// Total resting order count
    pub fn order_count(&self) -> usize {
        self.registry.len()
    }

    /// Symbols that have (or had) a book on either side
    pub fn symbols(&self) -> Vec<&str> {
        let mut symbols: Vec<&str> = self
            .bids
            .keys()
            .chain(self.offers.keys())
            .map(String::as_str)
            .collect();
        symbols.sort_unstable();
        symbols.dedup();
        symbols
    }

    pub fn is_subscribed(&self, symbol: &str) -> bool {
        self.subscriptions.contains(symbol)
    }

    /// FIX session currently owning an order
    pub fn session_of(&self, symbol: &str, order_id: &str) -> Option<SessionId> {
        self.sessions
            .get(&(symbol.to_owned(), order_id.to_owned()))
            .copied()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Hash of the full book state, for determinism testing.
    ///
    /// Covers every book in symbol order, queue order within each level,
    /// and each resting order's fill bookkeeping.
    pub fn state_hash(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        for symbol in self.symbols() {
            symbol.hash(&mut hasher);
            for side in [Side::Buy, Side::Sell] {
                let Some(book) = self.book(side, symbol) else {
                    continue;
                };
                for id in book.ordered_ids() {
                    id.hash(&mut hasher);
                    if let Some(order) = self.order(symbol, id) {
                        order.price().hash(&mut hasher);
                        order.available_quantity().hash(&mut hasher);
                        order.cumulative_quantity().hash(&mut hasher);
                        order.average_price().hash(&mut hasher);
                    }
                }
            }
        }
        self.registry.len().hash(&mut hasher);
        hasher.finish()
    }
}

fn key_of(order: &Order) -> OrderKey {
    (order.symbol().to_owned(), order.order_id().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{ORIGIN_ORDER_SOCKET, ORIGIN_STORE};
    use std::sync::Mutex;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn ticket(id: &str, side: &str, price: &str, qty: &str) -> OrderTicket {
        OrderTicket {
            order_id: id.into(),
            symbol: "ABC".into(),
            customer: "C1".into(),
            source: ORIGIN_ORDER_SOCKET.into(),
            arrive_date: "20240102".into(),
            tif: "DAY".into(),
            price: dec(price),
            quantity: dec(qty),
            available_quantity: None,
            side: side.into(),
            currency: "USD".into(),
            min_fill_quantity: Decimal::ZERO,
        }
    }

    fn new(engine: &mut MatchingEngine, ticket: OrderTicket) -> Outcome<Disposition, RejectReason> {
        engine.new_order(NewOrder {
            ticket,
            session: None,
        })
    }

    fn trades(events: &[OutputEvent]) -> Vec<&TradeEvent> {
        events
            .iter()
            .filter_map(|e| match e {
                OutputEvent::Trade(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_midpoint_price_truncates() {
        assert_eq!(midpoint_price(dec("10.00"), dec("9.50")), dec("9.75"));
        assert_eq!(midpoint_price(dec("10.01"), dec("10.00")), dec("10.00"));
        assert_eq!(midpoint_price(dec("10.00"), dec("10.00")).to_string(), "10.00");
        assert_eq!(midpoint_price(dec("1.005"), dec("1.00")), dec("1.00"));
    }

    #[test]
    fn test_new_order_rests() {
        let mut engine = MatchingEngine::new(EngineSettings::default());
        let out = new(&mut engine, ticket("A", "B", "10.00", "100"));

        assert_eq!(out.result, Ok(Disposition::Resting));
        assert!(matches!(out.events[0], OutputEvent::Accepted(_)));
        let book = engine.book(Side::Buy, "ABC").unwrap();
        assert_eq!(book.match_head(dec("0.01"), false).unwrap().0, "A");
        assert_eq!(engine.order_count(), 1);
    }

    #[test]
    fn test_cross_at_midpoint() {
        let mut engine = MatchingEngine::new(EngineSettings::default());
        new(&mut engine, ticket("A", "B", "10.00", "100"));
        let out = new(&mut engine, ticket("B", "S", "9.50", "40"));

        assert_eq!(out.result, Ok(Disposition::Completed));
        let fills = trades(&out.events);
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, dec("9.75"));
        assert_eq!(fills[0].quantity, dec("40"));
        assert_eq!(fills[0].passive.order_id(), "A");

        let a = engine.order("ABC", "A").unwrap();
        assert_eq!(a.available_quantity(), dec("60"));
        assert!(engine.order("ABC", "B").is_none());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut engine = MatchingEngine::new(EngineSettings::default());
        new(&mut engine, ticket("A", "B", "10.00", "100"));
        let out = new(&mut engine, ticket("A", "B", "10.00", "5"));

        assert_eq!(out.result, Err(RejectReason::DuplicateOrderId));
        assert_eq!(engine.order("ABC", "A").unwrap().quantity(), dec("100"));
    }

    #[test]
    fn test_invalid_symbol_and_ceiling() {
        let settings = EngineSettings {
            valid_symbols: Some(["XYZ".to_string()].into_iter().collect()),
            max_order_size: dec("50"),
            ..Default::default()
        };
        let mut engine = MatchingEngine::new(settings);

        let out = new(&mut engine, ticket("A", "B", "10.00", "10"));
        assert_eq!(
            out.result.unwrap_err().to_string(),
            "Symbol ABC is not a valid instrument"
        );

        let mut t = ticket("A", "B", "10.00", "100");
        t.symbol = "XYZ".into();
        let out = new(&mut engine, t);
        assert_eq!(
            out.result.unwrap_err().to_string(),
            "Order quantity 100 is greater than maximum order quantity 50"
        );
        assert_eq!(engine.order_count(), 0);
    }

    #[test]
    fn test_validation_failure_is_rejection() {
        let mut engine = MatchingEngine::new(EngineSettings::default());
        let out = new(&mut engine, ticket("A", "Q", "10.00", "10"));

        assert!(matches!(
            out.result,
            Err(RejectReason::Invalid(ValidationError::InvalidSide(_)))
        ));
        let line = out.events[0].audit_line().unwrap();
        assert!(line.starts_with("REJECTNEW,OrderID=A,"));
        assert!(line.ends_with("RejectText=Q is not a valid side"));
    }

    #[test]
    fn test_price_time_priority_across_levels() {
        let mut engine = MatchingEngine::new(EngineSettings::default());
        new(&mut engine, ticket("S1", "S", "10.10", "10"));
        new(&mut engine, ticket("S2", "S", "10.00", "10"));
        new(&mut engine, ticket("S3", "S", "10.00", "10"));
        new(&mut engine, ticket("S4", "S", "10.50", "10"));

        let out = new(&mut engine, ticket("B1", "B", "10.20", "25"));
        let passive: Vec<&str> = trades(&out.events)
            .iter()
            .map(|t| t.passive.order_id())
            .collect();
        assert_eq!(passive, vec!["S2", "S3", "S1"]);
        assert_eq!(out.result, Ok(Disposition::Completed));
        assert_eq!(engine.order("ABC", "S1").unwrap().available_quantity(), dec("5"));
        assert!(engine.order("ABC", "S4").is_some());
    }

    #[test]
    fn test_currency_mismatch_skipped() {
        let mut engine = MatchingEngine::new(EngineSettings::default());
        let mut eur = ticket("S1", "S", "10.00", "10");
        eur.currency = "EUR".into();
        new(&mut engine, eur);
        new(&mut engine, ticket("S2", "S", "10.00", "10"));

        let out = new(&mut engine, ticket("B1", "B", "10.00", "10"));
        let fills = trades(&out.events);
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].passive.order_id(), "S2");
        assert_eq!(engine.order("ABC", "S1").unwrap().available_quantity(), dec("10"));
    }

    #[test]
    fn test_ioc_remainder_expires() {
        let mut engine = MatchingEngine::new(EngineSettings::default());
        new(&mut engine, ticket("A", "B", "10.00", "60"));
        let mut ioc = ticket("C", "S", "9.00", "200");
        ioc.tif = "IOC".into();

        let out = new(&mut engine, ioc);
        assert_eq!(out.result, Ok(Disposition::Expired));
        let expired = out
            .events
            .iter()
            .find_map(|e| match e {
                OutputEvent::Expired(r) => Some(&r.order),
                _ => None,
            })
            .unwrap();
        assert_eq!(expired.available_quantity(), dec("140"));
        assert!(engine.order("ABC", "C").is_none());
        assert_eq!(engine.order_count(), 0);
    }

    #[test]
    fn test_passive_left_below_min_fill_completes() {
        let mut engine = MatchingEngine::new(EngineSettings::default());
        let mut resting = ticket("A", "B", "10.00", "100");
        resting.min_fill_quantity = dec("30");
        new(&mut engine, resting);

        let out = new(&mut engine, ticket("B", "S", "10.00", "80"));
        let completed: Vec<&str> = out
            .events
            .iter()
            .filter_map(|e| match e {
                OutputEvent::Completed(r) => Some(r.order.order_id()),
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec!["A", "B"]);
        assert_eq!(engine.order_count(), 0);
        assert!(engine.book(Side::Buy, "ABC").unwrap().is_empty());
    }

    #[test]
    fn test_cancel() {
        let mut engine = MatchingEngine::new(EngineSettings::default());
        new(&mut engine, ticket("A", "B", "10.00", "100"));

        let out = engine.cancel_order(CancelOrder {
            ticket: OrderTicket {
                order_id: "A".into(),
                symbol: "ABC".into(),
                ..Default::default()
            },
            session: None,
        });
        assert_eq!(out.result, Ok(()));
        assert!(matches!(out.events[0], OutputEvent::Canceled(_)));
        assert_eq!(engine.order_count(), 0);

        let out = engine.cancel_order(CancelOrder {
            ticket: OrderTicket {
                order_id: "A".into(),
                symbol: "ABC".into(),
                ..Default::default()
            },
            session: None,
        });
        assert_eq!(out.result, Err(RejectReason::UnknownCancel));
    }

    #[test]
    fn test_amend_price_and_reprioritise() {
        let mut engine = MatchingEngine::new(EngineSettings::default());
        new(&mut engine, ticket("A", "B", "10.00", "100"));
        new(&mut engine, ticket("B", "B", "10.00", "100"));

        let out = engine.amend_order(AmendOrder {
            ticket: ticket("A", "B", "10.00", "80"),
            original_id: None,
            session: None,
        });
        assert_eq!(out.result, Ok(Disposition::Resting));
        assert!(matches!(out.events[0], OutputEvent::Amended(_)));

        let ids: Vec<&str> = engine
            .book(Side::Buy, "ABC")
            .unwrap()
            .ordered_ids()
            .collect();
        assert_eq!(ids, vec!["B", "A"]);
        assert_eq!(engine.order("ABC", "A").unwrap().quantity(), dec("80"));
    }

    #[test]
    fn test_amend_keeps_original_available_when_absent() {
        let mut engine = MatchingEngine::new(EngineSettings::default());
        new(&mut engine, ticket("A", "B", "10.00", "100"));
        new(&mut engine, ticket("S", "S", "10.00", "30"));

        let out = engine.amend_order(AmendOrder {
            ticket: ticket("A2", "B", "9.90", "100"),
            original_id: Some("A".into()),
            session: None,
        });
        assert_eq!(out.result, Ok(Disposition::Resting));
        assert!(engine.order("ABC", "A").is_none());
        assert_eq!(engine.order("ABC", "A2").unwrap().available_quantity(), dec("70"));
    }

    #[test]
    fn test_amend_rejections() {
        let mut engine = MatchingEngine::new(EngineSettings::default());
        new(&mut engine, ticket("A", "B", "10.00", "100"));
        new(&mut engine, ticket("B", "B", "10.00", "100"));

        let amend = |t: OrderTicket, original: Option<&str>| AmendOrder {
            ticket: t,
            original_id: original.map(String::from),
            session: None,
        };

        let out = engine.amend_order(amend(ticket("Z", "B", "10.00", "10"), None));
        assert_eq!(out.result, Err(RejectReason::UnknownAmend));

        let mut t = ticket("A", "B", "10.00", "10");
        t.customer = "C2".into();
        assert_eq!(engine.amend_order(amend(t, None)).result, Err(RejectReason::AmendCustomer));

        let mut t = ticket("A", "B", "10.00", "10");
        t.source = ORIGIN_STORE.into();
        assert_eq!(engine.amend_order(amend(t, None)).result, Err(RejectReason::AmendSource));

        let out = engine.amend_order(amend(ticket("A", "S", "10.00", "10"), None));
        assert_eq!(out.result.unwrap_err().to_string(), "Cannot amend side");

        let out = engine.amend_order(amend(ticket("B", "B", "10.00", "10"), Some("A")));
        assert_eq!(out.result, Err(RejectReason::DuplicateOrderId));

        // Nothing moved
        assert_eq!(engine.order("ABC", "A").unwrap().quantity(), dec("100"));
        assert_eq!(engine.order_count(), 2);
    }

    #[test]
    fn test_subscriptions() {
        let mut engine = MatchingEngine::new(EngineSettings::default());
        let out = engine.subscribe("ABC");
        assert_eq!(out.result, Ok(()));
        assert!(matches!(&out.events[0], OutputEvent::Snapshot(s) if s.to_string() == "SNAPSHOT,ABC"));

        assert_eq!(engine.subscribe("ABC").result, Err(SubscriptionError::AlreadySubscribed));

        let out = new(&mut engine, ticket("A", "B", "10.00", "100"));
        let last = out.events.last().unwrap();
        assert!(matches!(last, OutputEvent::Snapshot(s) if s.to_string() == "SNAPSHOT,ABC,BID,10.00,100"));

        assert_eq!(engine.unsubscribe("ABC").result, Ok(()));
        assert_eq!(engine.unsubscribe("ABC").result, Err(SubscriptionError::NotSubscribed));
    }

    #[test]
    fn test_dark_pool_and_invalid_subscriptions() {
        let mut engine = MatchingEngine::new(EngineSettings {
            dark_pool: true,
            ..Default::default()
        });
        let out = engine.subscribe("ABC");
        assert_eq!(out.result, Err(SubscriptionError::DarkPool));
        assert!(matches!(&out.events[0], OutputEvent::SubscriptionRejected(r)
            if r.to_string() == "REJECT,Symbol=ABC,RejectText=No subscriptions allowed, Dark Pool"));

        let mut engine = MatchingEngine::new(EngineSettings {
            valid_symbols: Some(FxHashSet::default()),
            ..Default::default()
        });
        assert_eq!(engine.subscribe("ABC").result, Err(SubscriptionError::InvalidInstrument));
    }

    #[test]
    fn test_fix_session_affinity() {
        let mut engine = MatchingEngine::new(EngineSettings::default());
        let mut t = ticket("F1", "B", "10.00", "100");
        t.source = ORIGIN_FIX.into();
        let out = engine.new_order(NewOrder {
            ticket: t,
            session: Some(SessionId(7)),
        });
        assert!(matches!(&out.events[0], OutputEvent::Accepted(r) if r.session == Some(SessionId(7))));
        assert_eq!(engine.session_of("ABC", "F1"), Some(SessionId(7)));

        let out = new(&mut engine, ticket("S1", "S", "10.00", "100"));
        let fill = trades(&out.events)[0];
        assert_eq!(fill.passive_session, Some(SessionId(7)));
        assert_eq!(fill.aggressive_session, None);
        assert_eq!(engine.session_of("ABC", "F1"), None);
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl EngineHooks for Recorder {
        fn on_new(&self, order: &Order) {
            self.0.lock().unwrap().push(format!("new {}", order.order_id()));
        }
        fn on_complete(&self, order: &Order) {
            self.0.lock().unwrap().push(format!("complete {}", order.order_id()));
        }
        fn on_execution(&self, a: &Order, p: &Order, _price: Decimal, qty: Decimal) {
            self.0
                .lock()
                .unwrap()
                .push(format!("fill {} {} {}", a.order_id(), p.order_id(), qty));
        }
        fn on_reject(&self, action: Action, ticket: &OrderTicket, _reason: &RejectReason) {
            self.0
                .lock()
                .unwrap()
                .push(format!("{} {}", action.reject_tag(), ticket.order_id));
        }
    }

    #[test]
    fn test_hooks_fire_in_order() {
        let hooks = Arc::new(Recorder::default());
        let mut engine = MatchingEngine::with_hooks(EngineSettings::default(), hooks.clone());

        new(&mut engine, ticket("A", "B", "10.00", "10"));
        new(&mut engine, ticket("B", "S", "10.00", "10"));
        new(&mut engine, ticket("B", "S", "0", "10"));

        let seen = hooks.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec!["new A", "new B", "fill B A 10", "complete A", "complete B", "REJECTNEW B"]
        );
    }
}
