//! Engine - the single-writer event loop around [`MatchingEngine`].
//!
//! One dedicated thread (optionally pinned to a core) owns every book. It
//! drains the command queue in arrival order and hands each output event
//! to the [`Dispatcher`], which fans it out to the audit writer, the socket
//! hubs, the FIX reporter and the store worker.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::{Receiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::command::{Command, OutputEvent, TradeEvent};
use crate::hooks::EngineHooks;
use crate::matching::{EngineSettings, MatchingEngine};
use crate::transport::LineHub;
use crate::{order_gateway, price_gateway};

/// Routes engine output to whoever is listening. Every sink is optional.
#[derive(Clone, Default)]
pub struct Dispatcher {
    audit: Option<UnboundedSender<OutputEvent>>,
    order_hub: Option<LineHub>,
    price_hub: Option<LineHub>,
    fix: Option<UnboundedSender<OutputEvent>>,
    trades: Option<UnboundedSender<TradeEvent>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_audit(mut self, tx: UnboundedSender<OutputEvent>) -> Self {
        self.audit = Some(tx);
        self
    }

    pub fn with_order_hub(mut self, hub: LineHub) -> Self {
        self.order_hub = Some(hub);
        self
    }

    pub fn with_price_hub(mut self, hub: LineHub) -> Self {
        self.price_hub = Some(hub);
        self
    }

    pub fn with_fix(mut self, tx: UnboundedSender<OutputEvent>) -> Self {
        self.fix = Some(tx);
        self
    }

    pub fn with_trades(mut self, tx: UnboundedSender<TradeEvent>) -> Self {
        self.trades = Some(tx);
        self
    }

    pub fn dispatch(&self, event: OutputEvent) {
        if let Some(hub) = &self.order_hub {
            for line in order_gateway::format_event(&event) {
                hub.broadcast(line);
            }
        }
        if let Some(hub) = &self.price_hub {
            if let Some(line) = price_gateway::format_event(&event) {
                hub.broadcast(line);
            }
        }
        if let (Some(tx), OutputEvent::Trade(trade)) = (&self.trades, &event) {
            if tx.send(trade.clone()).is_err() {
                warn!("store worker gone, trade not recorded");
            }
        }
        if let Some(tx) = &self.fix {
            // A closed FIX channel only means no FIX listener
            let _ = tx.send(event.clone());
        }
        if let Some(tx) = &self.audit {
            if tx.send(event).is_err() {
                warn!("audit writer gone, event not logged");
            }
        }
    }
}

/// The engine loop state.
pub struct Engine {
    /// The underlying matching engine
    pub matcher: MatchingEngine,
}

impl Engine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            matcher: MatchingEngine::new(settings),
        }
    }

    pub fn with_hooks(settings: EngineSettings, hooks: Arc<dyn EngineHooks>) -> Self {
        Self {
            matcher: MatchingEngine::with_hooks(settings, hooks),
        }
    }

    /// Run the event loop on the current thread.
    ///
    /// Returns on [`Command::Shutdown`] or once every command sender is gone.
    pub fn run(&mut self, commands: &mut Receiver<Command>, output: &Dispatcher, pin_to_core: bool) {
        if pin_to_core {
            self.pin_to_core();
        }
        info!("engine started");

        let mut processed: u64 = 0;
        while let Some(command) = commands.blocking_recv() {
            if matches!(command, Command::Shutdown) {
                info!("shutdown requested");
                break;
            }
            for event in self.process_command(command) {
                output.dispatch(event);
            }
            processed += 1;
        }

        info!(processed, resting = self.order_count(), "engine stopped");
    }

    /// Process a single command and return output events.
    ///
    /// This is the main entry point for synchronous usage (testing, benchmarks).
    #[inline]
    pub fn process_command(&mut self, command: Command) -> Vec<OutputEvent> {
        self.matcher.process(command)
    }

    /// Pin the current thread to the last available CPU core.
    ///
    /// The last core is typically isolated from OS interrupts.
    pub fn pin_to_core(&self) {
        match core_affinity::get_core_ids().and_then(|ids| ids.last().copied()) {
            Some(core) if core_affinity::set_for_current(core) => {
                debug!(core = core.id, "engine thread pinned");
            }
            _ => warn!("could not pin engine thread"),
        }
    }

    /// Get total order count.
    #[inline]
    pub fn order_count(&self) -> usize {
        self.matcher.order_count()
    }

    /// Compute state hash for determinism testing.
    #[inline]
    pub fn state_hash(&self) -> u64 {
        self.matcher.state_hash()
    }
}

/// Start `engine` on its own thread. The handle yields the engine back
/// when the loop ends.
pub fn spawn(
    mut engine: Engine,
    mut commands: Receiver<Command>,
    output: Dispatcher,
    pin_to_core: bool,
) -> std::io::Result<JoinHandle<Engine>> {
    thread::Builder::new()
        .name("matching-engine".into())
        .spawn(move || {
            engine.run(&mut commands, &output, pin_to_core);
            engine
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::NewOrder;
    use crate::order::{OrderTicket, ORIGIN_FIX, ORIGIN_ORDER_SOCKET};
    use rust_decimal::Decimal;
    use tokio::sync::mpsc;

    fn place(id: &str, side: &str, price: i64, source: &str) -> Command {
        Command::New(NewOrder {
            ticket: OrderTicket {
                order_id: id.into(),
                symbol: "ABC".into(),
                customer: "C1".into(),
                source: source.into(),
                tif: "DAY".into(),
                price: Decimal::new(price, 2),
                quantity: Decimal::ONE_HUNDRED,
                side: side.into(),
                currency: "USD".into(),
                ..Default::default()
            },
            session: None,
        })
    }

    #[test]
    fn test_engine_creation() {
        let engine = Engine::new(EngineSettings::default());
        assert_eq!(engine.order_count(), 0);
    }

    #[test]
    fn test_engine_process_place() {
        let mut engine = Engine::new(EngineSettings::default());
        let events = engine.process_command(place("A", "B", 1000, ORIGIN_ORDER_SOCKET));
        assert!(!events.is_empty());
        assert_eq!(engine.order_count(), 1);
    }

    #[test]
    fn test_engine_state_hash_determinism() {
        let mut engine1 = Engine::new(EngineSettings::default());
        let mut engine2 = Engine::new(EngineSettings::default());

        for i in 0..100 {
            let side = if i % 2 == 0 { "B" } else { "S" };
            let cmd = place(&format!("O{i}"), side, 1000 + (i % 10) * 10, ORIGIN_ORDER_SOCKET);
            engine1.process_command(cmd.clone());
            engine2.process_command(cmd);
        }

        assert_eq!(engine1.state_hash(), engine2.state_hash());
    }

    #[test]
    fn test_spawned_loop_dispatches_until_shutdown() {
        let (commands, rx) = mpsc::channel(16);
        let (audit_tx, mut audit_rx) = mpsc::unbounded_channel();
        let (trade_tx, mut trade_rx) = mpsc::unbounded_channel();
        let order_hub = LineHub::new();
        let dispatcher = Dispatcher::new()
            .with_audit(audit_tx)
            .with_trades(trade_tx)
            .with_order_hub(order_hub.clone());

        let handle = spawn(Engine::new(EngineSettings::default()), rx, dispatcher, false).unwrap();
        commands.blocking_send(place("A", "B", 1000, ORIGIN_ORDER_SOCKET)).unwrap();
        commands.blocking_send(place("B", "S", 950, ORIGIN_FIX)).unwrap();
        commands.blocking_send(Command::Shutdown).unwrap();

        let engine = handle.join().unwrap();
        assert_eq!(engine.order_count(), 0);

        let mut audit = Vec::new();
        while let Ok(event) = audit_rx.try_recv() {
            audit.push(event.audit_line());
        }
        // NEW A, NEW B, MATCH, COMPLETED A, COMPLETED B
        assert_eq!(audit.len(), 5);

        let trade = trade_rx.try_recv().unwrap();
        assert_eq!(trade.price, Decimal::new(975, 2));

        // Order socket lines were queued for the next client
        let (_, _, backlog) = order_hub.attach();
        assert_eq!(backlog.len(), 3);
        assert!(backlog[0].starts_with("NEW,OrderID=A,"));
        assert_eq!(backlog[1], "MATCH,OrderID=A,TradePrice=9.75,TradeQuantity=100");
        assert!(backlog[2].starts_with("COMPLETED,OrderID=A,"));
    }

    #[test]
    fn test_loop_ends_when_senders_drop() {
        let (commands, rx) = mpsc::channel(4);
        let handle = spawn(Engine::new(EngineSettings::default()), rx, Dispatcher::new(), false).unwrap();
        commands.blocking_send(place("A", "B", 1000, ORIGIN_ORDER_SOCKET)).unwrap();
        drop(commands);
        assert_eq!(handle.join().unwrap().order_count(), 1);
    }
}
