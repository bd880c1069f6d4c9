//! Order socket protocol.
//!
//! Inbound: `NEW|AMEND|CANCEL,Key=Value,...` with case-insensitive keys,
//! plus the session keywords `PING` and `END`. Outbound: one line per
//! engine event that concerns an order entered through this socket.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::command::{AmendOrder, CancelOrder, Command, NewOrder, OutputEvent};
use crate::order::{Order, OrderTicket, ValidationError, ORIGIN_ORDER_SOCKET};
use crate::transport::{Inbound, LineParser};

/// Parser for one order socket connection
#[derive(Debug, Default)]
pub struct OrderParser;

impl LineParser for OrderParser {
    fn parse(&mut self, line: &str) -> Inbound {
        match line {
            "END" => return Inbound::End,
            "PING" => return Inbound::Ping,
            _ => {}
        }

        let mut fields = line.split(',');
        let verb = fields.next().unwrap_or_default();
        if !matches!(verb, "NEW" | "AMEND" | "CANCEL") {
            return Inbound::Unknown;
        }

        let (ticket, original_id) = match parse_fields(fields) {
            Ok(parsed) => parsed,
            Err(e) => return Inbound::Reply(format!("REJECT,{line},RejectText={e}")),
        };

        let command = match verb {
            "NEW" => Command::New(NewOrder {
                ticket,
                session: None,
            }),
            "AMEND" => Command::Amend(AmendOrder {
                ticket,
                original_id,
                session: None,
            }),
            _ => Command::Cancel(CancelOrder {
                ticket,
                session: None,
            }),
        };
        Inbound::Commands(vec![command])
    }
}

/// Build a ticket from `Key=Value` fields. Unknown keys are ignored.
fn parse_fields<'a>(
    fields: impl Iterator<Item = &'a str>,
) -> Result<(OrderTicket, Option<String>), ValidationError> {
    let mut ticket = OrderTicket {
        source: ORIGIN_ORDER_SOCKET.into(),
        ..Default::default()
    };
    let mut available = None;
    let mut original_id = None;

    for field in fields {
        let Some((key, value)) = field.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "orderid" => ticket.order_id = value.into(),
            "origorderid" => original_id = Some(value.to_string()).filter(|v| !v.is_empty()),
            "symbol" => ticket.symbol = value.into(),
            "customer" => ticket.customer = value.into(),
            "arrivedate" => ticket.arrive_date = value.into(),
            "tif" => ticket.tif = value.into(),
            "side" => ticket.side = value.into(),
            "currency" => ticket.currency = value.into(),
            "price" => ticket.price = number("Price", value)?,
            "quantity" => ticket.quantity = number("Quantity", value)?,
            "availablequantity" => available = Some(number("AvailableQuantity", value)?),
            "minfillquantity" => ticket.min_fill_quantity = number("MinFillQuantity", value)?,
            _ => {}
        }
    }

    ticket.set_available(available);
    Ok((ticket, original_id))
}

fn number(field: &'static str, value: &str) -> Result<Decimal, ValidationError> {
    Decimal::from_str(value).map_err(|_| ValidationError::Malformed {
        field,
        value: value.to_string(),
    })
}

// ============================================================================
// Outbound
// ============================================================================

fn from_socket(order: &Order) -> bool {
    order.source() == ORIGIN_ORDER_SOCKET
}

/// Lines an order socket client should see for `event`.
///
/// Only orders that came in through the order socket are reported. A
/// trade yields one `MATCH` line per order socket leg.
pub fn format_event(event: &OutputEvent) -> Vec<String> {
    match event {
        OutputEvent::Accepted(r)
        | OutputEvent::Amended(r)
        | OutputEvent::Canceled(r)
        | OutputEvent::Completed(r)
        | OutputEvent::Expired(r) => {
            if from_socket(&r.order) {
                event.audit_line().into_iter().collect()
            } else {
                Vec::new()
            }
        }
        OutputEvent::Rejected(r) => {
            if r.ticket.source == ORIGIN_ORDER_SOCKET {
                event.audit_line().into_iter().collect()
            } else {
                Vec::new()
            }
        }
        OutputEvent::Trade(trade) => [&trade.aggressive, &trade.passive]
            .into_iter()
            .filter(|order| from_socket(order))
            .map(|order| {
                format!(
                    "MATCH,OrderID={},TradePrice={},TradeQuantity={}",
                    order.order_id(),
                    trade.price,
                    trade.quantity
                )
            })
            .collect(),
        OutputEvent::Snapshot(_) | OutputEvent::SubscriptionRejected(_) => Vec::new(),
    }
}
