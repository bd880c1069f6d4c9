//! Order - A validated trade intent with execution bookkeeping.
//!
//! Every gateway produces an [`OrderTicket`] (raw, unvalidated fields).
//! The matching engine turns tickets into [`Order`]s on its own thread so
//! that validation failures are reported like any other rejection.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Local;
use rust_decimal::Decimal;
use thiserror::Error;

/// Origin tag for orders entered through the order socket
pub const ORIGIN_ORDER_SOCKET: &str = "OS";
/// Origin tag for orders read from the inbound order store
pub const ORIGIN_STORE: &str = "DB";
/// Origin tag for orders entered through a FIX session
pub const ORIGIN_FIX: &str = "FIX";

/// Next internal sequence number handed to a constructed order.
static NEXT_INTERNAL_ID: AtomicU64 = AtomicU64::new(1);

/// Largest accepted price or quantity (10^12). Keeps every fill product
/// and average-price blend well inside `Decimal` range.
pub const MAX_MAGNITUDE: Decimal = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0);

/// Order side (buy or sell)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    /// Buy side (bids)
    Buy,
    /// Sell side (offers)
    Sell,
}

impl Side {
    /// Returns the opposite side
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Single-letter wire code (`B` or `S`)
    #[inline]
    pub const fn code(self) -> char {
        match self {
            Side::Buy => 'B',
            Side::Sell => 'S',
        }
    }

    /// Parse the wire code. Only the first character is significant.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.chars().next() {
            Some('B') => Some(Side::Buy),
            Some('S') => Some(Side::Sell),
            _ => None,
        }
    }
}

/// Time in force
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimeInForce {
    /// Rests until filled or canceled
    Day,
    /// Matched once on arrival, the remainder is discarded
    ImmediateOrCancel,
}

impl TimeInForce {
    pub const fn as_str(self) -> &'static str {
        match self {
            TimeInForce::Day => "DAY",
            TimeInForce::ImmediateOrCancel => "IOC",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "DAY" => Some(TimeInForce::Day),
            "IOC" => Some(TimeInForce::ImmediateOrCancel),
            _ => None,
        }
    }
}

/// Reasons an order ticket cannot become an [`Order`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} cannot be blank")]
    BlankField(&'static str),

    #[error("Price {0} is zero or negative")]
    NonPositivePrice(Decimal),

    #[error("Quantity {0} is zero or negative")]
    NonPositiveQuantity(Decimal),

    #[error("Price {0} is greater than maximum price 1000000000000")]
    PriceTooLarge(Decimal),

    #[error("Quantity {0} is greater than maximum quantity 1000000000000")]
    QuantityTooLarge(Decimal),

    #[error("New available Quantity {0} is negative")]
    NegativeAvailable(Decimal),

    #[error("New AvailableQuantity {available} is greater than total Quantity {quantity}")]
    AvailableAboveQuantity { available: Decimal, quantity: Decimal },

    #[error("{0} is not a valid side")]
    InvalidSide(String),

    #[error("{0} is not a valid time in force")]
    InvalidTimeInForce(String),

    #[error("Currency cannot be blank")]
    BlankCurrency,

    #[error("MinFillQuantity {0} is negative")]
    NegativeMinFill(Decimal),

    #[error("MinFillQuantity {min_fill} is greater than AvailableQuantity {available}")]
    MinFillAboveAvailable { min_fill: Decimal, available: Decimal },

    #[error("Invalid {field} value '{value}'")]
    Malformed { field: &'static str, value: String },
}

/// Raw inbound order fields, as parsed by a gateway.
///
/// Nothing here is trusted. Side and time in force stay as text so that a
/// bad value can be echoed back in the rejection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OrderTicket {
    pub order_id: String,
    pub symbol: String,
    pub customer: String,
    pub source: String,
    pub arrive_date: String,
    pub tif: String,
    pub price: Decimal,
    pub quantity: Decimal,
    /// `None` means "same as quantity" (or, for an amendment, "same as
    /// the original order's available quantity").
    pub available_quantity: Option<Decimal>,
    pub side: String,
    pub currency: String,
    pub min_fill_quantity: Decimal,
}

impl OrderTicket {
    /// Set the available quantity as sent on the wire. An explicit zero
    /// alongside a positive quantity means "not given".
    pub fn set_available(&mut self, available: Option<Decimal>) {
        self.available_quantity = match available {
            Some(value) if value.is_zero() && self.quantity > Decimal::ZERO => None,
            other => other,
        };
    }
}

impl fmt::Display for OrderTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OrderID={},Customer={},Source={},Symbol={},Side={},Price={},Quantity={},\
             AvailableQuantity={},TIF={},ArriveDate={},Currency={},MinFillQuantity={}",
            self.order_id,
            self.customer,
            self.source,
            self.symbol,
            self.side,
            self.price,
            self.quantity,
            self.available_quantity.unwrap_or(self.quantity),
            self.tif,
            self.arrive_date,
            self.currency,
            self.min_fill_quantity,
        )
    }
}

/// A live order.
///
/// Identity is `(symbol, order_id)`. Economic terms are fixed at
/// construction; only [`Order::execute`] mutates the fill bookkeeping.
#[derive(Clone, Debug)]
pub struct Order {
    order_id: String,
    internal_id: u64,
    symbol: String,
    customer: String,
    source: String,
    arrive_date: String,
    side: Side,
    tif: TimeInForce,
    price: Decimal,
    quantity: Decimal,
    available_quantity: Decimal,
    min_fill_quantity: Decimal,
    currency: String,
    cumulative_quantity: Decimal,
    average_price: Decimal,
}

impl Order {
    /// Validate a ticket and build an order from it.
    ///
    /// Checks run in field order and the first failure wins. A blank
    /// currency falls back to `default_currency`.
    pub fn from_ticket(
        ticket: &OrderTicket,
        default_currency: Option<&str>,
    ) -> Result<Self, ValidationError> {
        non_blank(&ticket.order_id, "OrderID")?;
        non_blank(&ticket.symbol, "Symbol")?;
        non_blank(&ticket.customer, "Customer")?;
        non_blank(&ticket.source, "Source")?;

        if ticket.price <= Decimal::ZERO {
            return Err(ValidationError::NonPositivePrice(ticket.price));
        }
        if ticket.price > MAX_MAGNITUDE {
            return Err(ValidationError::PriceTooLarge(ticket.price));
        }
        if ticket.quantity <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveQuantity(ticket.quantity));
        }
        if ticket.quantity > MAX_MAGNITUDE {
            return Err(ValidationError::QuantityTooLarge(ticket.quantity));
        }

        let available = ticket.available_quantity.unwrap_or(ticket.quantity);
        if available < Decimal::ZERO {
            return Err(ValidationError::NegativeAvailable(available));
        }
        if available > ticket.quantity {
            return Err(ValidationError::AvailableAboveQuantity {
                available,
                quantity: ticket.quantity,
            });
        }

        let side = Side::parse(&ticket.side)
            .ok_or_else(|| ValidationError::InvalidSide(ticket.side.clone()))?;
        let tif = TimeInForce::parse(&ticket.tif)
            .ok_or_else(|| ValidationError::InvalidTimeInForce(ticket.tif.clone()))?;

        let currency = if ticket.currency.is_empty() {
            default_currency.unwrap_or_default()
        } else {
            ticket.currency.as_str()
        };
        if currency.is_empty() {
            return Err(ValidationError::BlankCurrency);
        }

        if ticket.min_fill_quantity < Decimal::ZERO {
            return Err(ValidationError::NegativeMinFill(ticket.min_fill_quantity));
        }
        if ticket.min_fill_quantity > available {
            return Err(ValidationError::MinFillAboveAvailable {
                min_fill: ticket.min_fill_quantity,
                available,
            });
        }

        let arrive_date = if ticket.arrive_date.is_empty() {
            Local::now().format("%Y%m%d").to_string()
        } else {
            ticket.arrive_date.clone()
        };

        Ok(Self {
            order_id: ticket.order_id.clone(),
            internal_id: NEXT_INTERNAL_ID.fetch_add(1, Ordering::Relaxed),
            symbol: ticket.symbol.clone(),
            customer: ticket.customer.clone(),
            source: ticket.source.clone(),
            arrive_date,
            side,
            tif,
            price: ticket.price,
            quantity: ticket.quantity,
            available_quantity: available,
            min_fill_quantity: ticket.min_fill_quantity,
            currency: currency.to_string(),
            cumulative_quantity: Decimal::ZERO,
            average_price: Decimal::ZERO,
        })
    }

    /// Apply a fill of `qty` at `price`.
    ///
    /// The first fill sets the average price outright; later fills blend
    /// into it weighted by quantity.
    pub fn execute(&mut self, qty: Decimal, price: Decimal) {
        debug_assert!(qty <= self.available_quantity, "overfill");

        if self.cumulative_quantity.is_zero() {
            self.average_price = price;
        } else {
            let total = self.cumulative_quantity + qty;
            self.average_price =
                (self.average_price * self.cumulative_quantity + price * qty) / total;
        }
        self.available_quantity -= qty;
        self.cumulative_quantity += qty;
    }

    /// True when the order can take no further fills: nothing is left, or
    /// what is left is smaller than its own minimum fill.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.available_quantity.is_zero() || self.available_quantity < self.min_fill_quantity
    }

    /// Whether a fill between `self` and `other` is allowed: same currency,
    /// and each side's min-fill is satisfiable by the other's available quantity.
    #[inline]
    pub fn can_fill_against(&self, other: &Order) -> bool {
        self.currency == other.currency
            && self.min_fill_quantity <= other.available_quantity
            && other.min_fill_quantity <= self.available_quantity
    }

    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    pub fn internal_id(&self) -> u64 {
        self.internal_id
    }

    /// Internal id in wire form, e.g. `0000000042MC`
    pub fn internal_ref(&self) -> String {
        format!("{:010}MC", self.internal_id)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn customer(&self) -> &str {
        &self.customer
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn arrive_date(&self) -> &str {
        &self.arrive_date
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn tif(&self) -> TimeInForce {
        self.tif
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn available_quantity(&self) -> Decimal {
        self.available_quantity
    }

    pub fn min_fill_quantity(&self) -> Decimal {
        self.min_fill_quantity
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn cumulative_quantity(&self) -> Decimal {
        self.cumulative_quantity
    }

    pub fn average_price(&self) -> Decimal {
        self.average_price
    }
}

impl PartialEq for Order {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol && self.order_id == other.order_id
    }
}

impl Eq for Order {}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OrderID={},InternalID={},Customer={},Source={},Symbol={},Side={},Price={},\
             Quantity={},AvailableQuantity={},TIF={},ArriveDate={},Currency={},MinFillQuantity={}",
            self.order_id,
            self.internal_ref(),
            self.customer,
            self.source,
            self.symbol,
            self.side.code(),
            self.price,
            self.quantity,
            self.available_quantity,
            self.tif.as_str(),
            self.arrive_date,
            self.currency,
            self.min_fill_quantity,
        )
    }
}

fn non_blank(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.is_empty() {
        Err(ValidationError::BlankField(field))
    } else {
        Ok(())
    }
}
