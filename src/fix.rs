//! FIX-style order entry.
//!
//! One `tag=value` message per line, fields separated by `|` or SOH. There
//! is no logon or sequence-number layer: each TCP connection is one
//! [`SessionId`], and execution reports for its orders are routed back to
//! it through the listener's [`LineHub`].
//!
//! Supported inbound types: `D` (new), `G` (amend), `F` (cancel), `0`
//! (heartbeat) and `5` (logout). Outbound: `8` execution reports and `3`
//! rejects.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

use crate::command::{AmendOrder, CancelOrder, Command, NewOrder, OutputEvent, SessionId};
use crate::order::{Order, OrderTicket, Side, ValidationError, ORIGIN_FIX};
use crate::transport::{ClientId, Inbound, LineHub, LineParser};

pub const BEGIN_STRING: &str = "FIX.4.4";
const SOH: char = '\x01';

pub mod tag {
    pub const ACCOUNT: u32 = 1;
    pub const AVG_PX: u32 = 6;
    pub const BEGIN_STRING: u32 = 8;
    pub const CL_ORD_ID: u32 = 11;
    pub const CUM_QTY: u32 = 14;
    pub const CURRENCY: u32 = 15;
    pub const EXEC_ID: u32 = 17;
    pub const MSG_TYPE: u32 = 35;
    pub const ORDER_ID: u32 = 37;
    pub const ORDER_QTY: u32 = 38;
    pub const ORD_STATUS: u32 = 39;
    pub const ORIG_CL_ORD_ID: u32 = 41;
    pub const PRICE: u32 = 44;
    pub const SIDE: u32 = 54;
    pub const SYMBOL: u32 = 55;
    pub const TEXT: u32 = 58;
    pub const TIME_IN_FORCE: u32 = 59;
    pub const TRADE_DATE: u32 = 75;
    pub const MIN_QTY: u32 = 110;
    pub const EXEC_TYPE: u32 = 150;
    pub const LEAVES_QTY: u32 = 151;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FixError {
    #[error("malformed field '{0}'")]
    MalformedField(String),

    #[error("missing MsgType (35)")]
    MissingMsgType,
}

// ============================================================================
// Message
// ============================================================================

/// An ordered list of `tag=value` fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FixMessage {
    fields: Vec<(u32, String)>,
}

impl FixMessage {
    /// Start an outbound message of type `msg_type`.
    pub fn new(msg_type: &str) -> Self {
        let mut message = Self::default();
        message.push(tag::BEGIN_STRING, BEGIN_STRING);
        message.push(tag::MSG_TYPE, msg_type);
        message
    }

    /// Parse one line. Empty fields (trailing separators) are skipped.
    pub fn parse(line: &str) -> Result<Self, FixError> {
        let mut fields = Vec::new();
        for raw in line.split(|c| c == SOH || c == '|').filter(|f| !f.is_empty()) {
            let (tag, value) = raw
                .split_once('=')
                .ok_or_else(|| FixError::MalformedField(raw.to_string()))?;
            let tag = tag
                .trim()
                .parse()
                .map_err(|_| FixError::MalformedField(raw.to_string()))?;
            fields.push((tag, value.to_string()));
        }

        let message = Self { fields };
        if message.get(tag::MSG_TYPE).is_none() {
            return Err(FixError::MissingMsgType);
        }
        Ok(message)
    }

    pub fn push(&mut self, tag: u32, value: impl ToString) -> &mut Self {
        self.fields.push((tag, value.to_string()));
        self
    }

    /// First value for `tag`
    pub fn get(&self, tag: u32) -> Option<&str> {
        self.fields
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, v)| v.as_str())
    }

    pub fn msg_type(&self) -> Option<&str> {
        self.get(tag::MSG_TYPE)
    }
}

/// `|`-separated wire form, with a trailing separator
impl fmt::Display for FixMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (tag, value) in &self.fields {
            write!(f, "{tag}={value}|")?;
        }
        Ok(())
    }
}

/// Session-level reject: `35=3` with `58=OrderID=<id> :: <reason>`
pub fn reject_message(order_id: &str, reason: impl fmt::Display) -> FixMessage {
    let mut message = FixMessage::new("3");
    message.push(tag::TEXT, format!("OrderID={order_id} :: {reason}"));
    message
}

// ============================================================================
// Inbound
// ============================================================================

/// Parser for one FIX connection
#[derive(Debug)]
pub struct FixParser {
    session: SessionId,
    default_customer: String,
}

impl FixParser {
    pub fn new(client: ClientId, default_customer: impl Into<String>) -> Self {
        Self {
            session: SessionId(client),
            default_customer: default_customer.into(),
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    fn ticket(&self, message: &FixMessage, order_id: &str) -> Result<OrderTicket, ValidationError> {
        let text = |tag| message.get(tag).unwrap_or_default().to_string();

        let tif = match message.get(tag::TIME_IN_FORCE) {
            None | Some("0") => "DAY",
            Some("3") => "IOC",
            Some(_) => "UNSUPPORTED",
        };
        let side = match message.get(tag::SIDE) {
            Some("1") => "B".to_string(),
            Some("2") => "S".to_string(),
            other => other.unwrap_or_default().to_string(),
        };

        Ok(OrderTicket {
            order_id: order_id.to_string(),
            symbol: text(tag::SYMBOL),
            customer: message
                .get(tag::ACCOUNT)
                .unwrap_or(self.default_customer.as_str())
                .to_string(),
            source: ORIGIN_FIX.into(),
            arrive_date: text(tag::TRADE_DATE),
            tif: tif.into(),
            price: number(message, tag::PRICE, "Price")?,
            quantity: number(message, tag::ORDER_QTY, "Quantity")?,
            available_quantity: None,
            side,
            currency: text(tag::CURRENCY),
            min_fill_quantity: number(message, tag::MIN_QTY, "MinFillQuantity")?,
        })
    }

    fn command(&self, message: &FixMessage) -> Result<Option<Command>, (String, ValidationError)> {
        let cl_ord_id = message.get(tag::CL_ORD_ID).unwrap_or_default();
        let orig_cl_ord_id = message.get(tag::ORIG_CL_ORD_ID).unwrap_or_default();
        let session = Some(self.session);

        let command = match message.msg_type() {
            Some("D") => Command::New(NewOrder {
                ticket: self.ticket(message, cl_ord_id).map_err(|e| (cl_ord_id.to_string(), e))?,
                session,
            }),
            // Available stays unset so the engine carries over the original's
            Some("G") => Command::Amend(AmendOrder {
                ticket: self.ticket(message, cl_ord_id).map_err(|e| (cl_ord_id.to_string(), e))?,
                original_id: Some(orig_cl_ord_id.to_string()).filter(|id| !id.is_empty()),
                session,
            }),
            Some("F") => Command::Cancel(CancelOrder {
                ticket: OrderTicket {
                    order_id: orig_cl_ord_id.to_string(),
                    symbol: message.get(tag::SYMBOL).unwrap_or_default().to_string(),
                    customer: message
                        .get(tag::ACCOUNT)
                        .unwrap_or(self.default_customer.as_str())
                        .to_string(),
                    source: ORIGIN_FIX.into(),
                    ..Default::default()
                },
                session,
            }),
            _ => return Ok(None),
        };
        Ok(Some(command))
    }
}

impl LineParser for FixParser {
    fn parse(&mut self, line: &str) -> Inbound {
        let message = match FixMessage::parse(line) {
            Ok(message) => message,
            Err(e) => {
                debug!(session = %self.session, error = %e, "unparsable FIX line");
                return Inbound::Unknown;
            }
        };

        match message.msg_type() {
            Some("0") => return Inbound::Ping,
            Some("5") => return Inbound::End,
            _ => {}
        }

        match self.command(&message) {
            Ok(Some(command)) => Inbound::Commands(vec![command]),
            Ok(None) => {
                let msg_type = message.msg_type().unwrap_or_default();
                Inbound::Reply(
                    reject_message(
                        message.get(tag::CL_ORD_ID).unwrap_or_default(),
                        format_args!("Unsupported message type {msg_type}"),
                    )
                    .to_string(),
                )
            }
            Err((order_id, e)) => Inbound::Reply(reject_message(&order_id, e).to_string()),
        }
    }
}

fn number(message: &FixMessage, tag: u32, field: &'static str) -> Result<Decimal, ValidationError> {
    match message.get(tag) {
        None => Ok(Decimal::ZERO),
        Some(value) => Decimal::from_str(value.trim()).map_err(|_| ValidationError::Malformed {
            field,
            value: value.to_string(),
        }),
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Execution report kind, as the `39`/`150` pair
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecKind {
    New,
    Canceled,
    Replaced,
    Expired,
    PartialFill,
    Fill,
}

impl ExecKind {
    /// `(OrdStatus, ExecType)`
    pub const fn codes(self) -> (char, char) {
        match self {
            ExecKind::New => ('0', '0'),
            ExecKind::Canceled => ('4', '4'),
            ExecKind::Replaced => ('5', '5'),
            ExecKind::Expired => ('C', 'C'),
            ExecKind::PartialFill => ('1', 'F'),
            ExecKind::Fill => ('2', 'F'),
        }
    }
}

/// Turns engine events into reports for the FIX sessions that own them.
#[derive(Debug)]
pub struct FixReporter {
    next_exec_id: u64,
}

impl Default for FixReporter {
    fn default() -> Self {
        Self { next_exec_id: 1 }
    }
}

impl FixReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports owed for `event`, addressed by session.
    ///
    /// Completion carries no report of its own; the final fill already
    /// says `2` (filled).
    pub fn reports(&mut self, event: &OutputEvent) -> Vec<(SessionId, FixMessage)> {
        let mut out = Vec::new();
        match event {
            OutputEvent::Accepted(r) => self.report(&mut out, r.session, &r.order, ExecKind::New),
            OutputEvent::Amended(r) => self.report(&mut out, r.session, &r.order, ExecKind::Replaced),
            OutputEvent::Canceled(r) => self.report(&mut out, r.session, &r.order, ExecKind::Canceled),
            OutputEvent::Expired(r) => self.report(&mut out, r.session, &r.order, ExecKind::Expired),
            OutputEvent::Trade(t) => {
                for (order, session) in [
                    (&t.aggressive, t.aggressive_session),
                    (&t.passive, t.passive_session),
                ] {
                    let kind = if order.available_quantity().is_zero() {
                        ExecKind::Fill
                    } else {
                        ExecKind::PartialFill
                    };
                    self.report(&mut out, session, order, kind);
                }
            }
            OutputEvent::Rejected(r) => {
                if let Some(session) = r.session {
                    out.push((session, reject_message(&r.ticket.order_id, &r.reason)));
                }
            }
            OutputEvent::Completed(_)
            | OutputEvent::Snapshot(_)
            | OutputEvent::SubscriptionRejected(_) => {}
        }
        out
    }

    fn report(
        &mut self,
        out: &mut Vec<(SessionId, FixMessage)>,
        session: Option<SessionId>,
        order: &Order,
        kind: ExecKind,
    ) {
        if let Some(session) = session {
            out.push((session, self.execution_report(order, kind)));
        }
    }

    /// Build a `35=8` for `order`. Consumes one ExecID.
    pub fn execution_report(&mut self, order: &Order, kind: ExecKind) -> FixMessage {
        let exec_id = self.next_exec_id;
        self.next_exec_id += 1;

        let (status, exec_type) = kind.codes();
        let side = match order.side() {
            Side::Buy => '1',
            Side::Sell => '2',
        };

        let mut message = FixMessage::new("8");
        message
            .push(tag::CL_ORD_ID, order.order_id())
            .push(tag::ORDER_ID, order.internal_ref())
            .push(tag::EXEC_ID, exec_id)
            .push(tag::SIDE, side)
            .push(tag::LEAVES_QTY, order.available_quantity())
            .push(tag::CUM_QTY, order.cumulative_quantity())
            .push(tag::AVG_PX, order.average_price())
            .push(tag::SYMBOL, order.symbol())
            .push(tag::ORD_STATUS, status)
            .push(tag::EXEC_TYPE, exec_type);
        message
    }
}

/// Heartbeat sent to idle FIX sessions
pub fn heartbeat() -> String {
    FixMessage::new("0").to_string()
}

/// Deliver reports for `events` to their sessions until the channel closes.
pub async fn run_reporter(mut events: UnboundedReceiver<OutputEvent>, hub: LineHub) {
    let mut reporter = FixReporter::new();
    while let Some(event) = events.recv().await {
        for (session, message) in reporter.reports(&event) {
            if !hub.send_to(session.0, message.to_string()) {
                debug!(%session, "FIX session gone, report dropped");
            }
        }
    }
    info!("FIX reporter stopped");
}
