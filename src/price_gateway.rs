//! Price socket protocol: `SUB,<sym>[,<sym>...]` and `UNSUB,...` in,
//! `SNAPSHOT,...` and subscription `REJECT,...` lines out.

use crate::command::{Command, OutputEvent};
use crate::transport::{Inbound, LineParser};

/// Parser for one price socket connection
#[derive(Debug, Default)]
pub struct PriceParser;

impl LineParser for PriceParser {
    fn parse(&mut self, line: &str) -> Inbound {
        match line {
            "END" => return Inbound::End,
            "PING" => return Inbound::Ping,
            _ => {}
        }

        let mut tokens = line.split(',');
        let subscribe = match tokens.next() {
            Some("SUB") => true,
            Some("UNSUB") => false,
            _ => return Inbound::Unknown,
        };

        let commands = tokens
            .map(str::trim)
            .filter(|symbol| !symbol.is_empty())
            .map(|symbol| {
                if subscribe {
                    Command::Subscribe(symbol.to_string())
                } else {
                    Command::Unsubscribe(symbol.to_string())
                }
            })
            .collect();
        Inbound::Commands(commands)
    }
}

/// Line a price socket client should see for `event`, if any
pub fn format_event(event: &OutputEvent) -> Option<String> {
    match event {
        OutputEvent::Snapshot(snapshot) => Some(snapshot.to_string()),
        OutputEvent::SubscriptionRejected(reject) => Some(reject.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{BookSnapshot, SubscriptionError, SubscriptionReject};

    #[test]
    fn test_sub_many_symbols() {
        let mut parser = PriceParser;
        let Inbound::Commands(commands) = parser.parse("SUB,ABC,XYZ") else {
            panic!("expected commands");
        };
        assert_eq!(commands.len(), 2);
        assert!(matches!(&commands[0], Command::Subscribe(s) if s == "ABC"));
        assert!(matches!(&commands[1], Command::Subscribe(s) if s == "XYZ"));
    }

    #[test]
    fn test_unsub() {
        let mut parser = PriceParser;
        let Inbound::Commands(commands) = parser.parse("UNSUB,ABC") else {
            panic!("expected commands");
        };
        assert!(matches!(&commands[..], [Command::Unsubscribe(s)] if s == "ABC"));
    }

    #[test]
    fn test_bare_sub_is_still_recognised() {
        let mut parser = PriceParser;
        assert!(matches!(parser.parse("SUB"), Inbound::Commands(c) if c.is_empty()));
        assert!(matches!(parser.parse("SUBSCRIBE,ABC"), Inbound::Unknown));
        assert!(matches!(parser.parse("PING"), Inbound::Ping));
        assert!(matches!(parser.parse("END"), Inbound::End));
    }

    #[test]
    fn test_format() {
        let snapshot = OutputEvent::Snapshot(BookSnapshot {
            symbol: "ABC".into(),
            ..Default::default()
        });
        assert_eq!(format_event(&snapshot).as_deref(), Some("SNAPSHOT,ABC"));

        let reject = OutputEvent::SubscriptionRejected(SubscriptionReject {
            symbol: "ABC".into(),
            reason: SubscriptionError::AlreadySubscribed,
        });
        assert_eq!(
            format_event(&reject).as_deref(),
            Some("REJECT,Symbol=ABC,RejectText=Already subscribed")
        );
    }
}
