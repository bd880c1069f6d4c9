//! Line-oriented socket sessions shared by the order, price and FIX gateways.
//!
//! Each accepted connection runs [`run_session`]: inbound lines go through
//! a [`LineParser`] and on to the engine, while outbound lines arrive from
//! a [`LineHub`]. The hub fans lines out to every attached client (or to one
//! client by id) and holds broadcast lines while nobody is connected.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, Sender, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::command::Command;

/// Consecutive unrecognised lines that end a session
pub const MAX_UNKNOWN_COMMANDS: u32 = 3;

/// Broadcast lines a hub holds for the next client before dropping the oldest
pub const DEFAULT_BACKLOG_LIMIT: usize = 10_000;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("socket: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine command queue closed")]
    EngineClosed,
}

/// Hub-assigned identifier of one connected client
pub type ClientId = u64;

/// What an inbound line asks for.
#[derive(Debug)]
pub enum Inbound {
    /// Work for the engine
    Commands(Vec<Command>),
    /// Refused locally, answer with this line
    Reply(String),
    /// Keep-alive, no answer
    Ping,
    /// Peer is done; answer `BYE` and close
    End,
    /// Not a command this gateway understands
    Unknown,
}

/// Turns inbound lines into engine work. One parser per connection.
pub trait LineParser: Send {
    fn parse(&mut self, line: &str) -> Inbound;
}

// ============================================================================
// Outbound fan-out
// ============================================================================

struct HubState {
    clients: FxHashMap<ClientId, UnboundedSender<String>>,
    /// Broadcast lines produced while no client was attached, oldest first
    backlog: VecDeque<String>,
    backlog_limit: usize,
    /// Lines dropped from the backlog since the last attach
    dropped: u64,
    next_id: ClientId,
}

/// Outbound line distribution for one listener.
#[derive(Clone)]
pub struct LineHub {
    state: Arc<Mutex<HubState>>,
}

impl Default for LineHub {
    fn default() -> Self {
        Self::with_backlog_limit(DEFAULT_BACKLOG_LIMIT)
    }
}

impl LineHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hub that keeps at most `limit` lines for the next client.
    pub fn with_backlog_limit(limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                clients: FxHashMap::default(),
                backlog: VecDeque::new(),
                backlog_limit: limit,
                dropped: 0,
                next_id: 0,
            })),
        }
    }

    /// Send `line` to every attached client, or queue it for the next one.
    ///
    /// A full backlog drops its oldest line.
    pub fn broadcast(&self, line: String) {
        let mut state = self.lock();
        if state.clients.is_empty() {
            if state.backlog_limit == 0 {
                state.dropped += 1;
                return;
            }
            if state.backlog.len() >= state.backlog_limit {
                state.backlog.pop_front();
                state.dropped += 1;
            }
            state.backlog.push_back(line);
            return;
        }
        state.clients.retain(|_, tx| tx.send(line.clone()).is_ok());
    }

    /// Send `line` to one client. Returns false if it is not attached.
    pub fn send_to(&self, client: ClientId, line: String) -> bool {
        let state = self.lock();
        state
            .clients
            .get(&client)
            .is_some_and(|tx| tx.send(line).is_ok())
    }

    pub fn client_count(&self) -> usize {
        self.lock().clients.len()
    }

    /// Register a client. Returns its id, its outbound queue and any backlog.
    pub(crate) fn attach(&self) -> (ClientId, UnboundedReceiver<String>, Vec<String>) {
        let mut state = self.lock();
        let (tx, rx) = mpsc::unbounded_channel();
        state.next_id += 1;
        let id = state.next_id;
        state.clients.insert(id, tx);
        if state.dropped > 0 {
            warn!(client = id, dropped = state.dropped, "backlog overflowed while no client was attached");
            state.dropped = 0;
        }
        let backlog = Vec::from(std::mem::take(&mut state.backlog));
        (id, rx, backlog)
    }

    pub(crate) fn detach(&self, client: ClientId) {
        self.lock().clients.remove(&client);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// Session loop
// ============================================================================

/// Per-listener session behaviour
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// First line sent on connect
    pub greeting: Option<String>,
    /// Line sent after `ping_interval` without inbound traffic
    pub heartbeat: String,
    pub ping_interval: Duration,
}

impl SessionOptions {
    /// `CONNECTED` greeting and `PING` heartbeat
    pub fn plain(ping_interval: Duration) -> Self {
        Self {
            greeting: Some("CONNECTED".into()),
            heartbeat: "PING".into(),
            ping_interval,
        }
    }
}

/// Serve one connection until the peer leaves, says `END`, or strikes out.
///
/// `make_parser` receives the client id the hub assigned to this
/// connection, so replies can later be routed back with [`LineHub::send_to`].
pub async fn run_session<S, P, F>(
    stream: S,
    make_parser: F,
    hub: LineHub,
    commands: Sender<Command>,
    options: SessionOptions,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    P: LineParser,
    F: FnOnce(ClientId) -> P,
{
    let (client, outbound, backlog) = hub.attach();
    let parser = make_parser(client);
    debug!(client, backlog = backlog.len(), "session attached");

    let result = drive(stream, parser, outbound, backlog, &commands, &options).await;

    hub.detach(client);
    debug!(client, "session detached");
    result
}

async fn drive<S, P>(
    stream: S,
    mut parser: P,
    mut outbound: UnboundedReceiver<String>,
    backlog: Vec<String>,
    commands: &Sender<Command>,
    options: &SessionOptions,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    P: LineParser,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();
    let mut writer = BufWriter::new(writer);

    if let Some(greeting) = &options.greeting {
        write_line(&mut writer, greeting).await?;
    }
    for line in &backlog {
        write_line(&mut writer, line).await?;
    }
    writer.flush().await?;

    let period = options.ping_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut strikes = 0u32;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { return Ok(()) };
                heartbeat.reset();

                match parser.parse(line.trim_end_matches('\r')) {
                    Inbound::Commands(batch) => {
                        strikes = 0;
                        for command in batch {
                            commands.send(command).await.map_err(|_| TransportError::EngineClosed)?;
                        }
                    }
                    Inbound::Reply(reply) => {
                        strikes = 0;
                        write_line(&mut writer, &reply).await?;
                    }
                    Inbound::Ping => {}
                    Inbound::End => {
                        write_line(&mut writer, "BYE").await?;
                        writer.flush().await?;
                        return Ok(());
                    }
                    Inbound::Unknown => {
                        strikes += 1;
                        if strikes >= MAX_UNKNOWN_COMMANDS {
                            write_line(&mut writer, "BYE").await?;
                            writer.flush().await?;
                            return Ok(());
                        }
                        write_line(&mut writer, "UNKNOWN COMMAND").await?;
                    }
                }
                writer.flush().await?;
            }
            Some(line) = outbound.recv() => {
                write_line(&mut writer, &line).await?;
                // Drain whatever else is queued before flushing
                while let Ok(line) = outbound.try_recv() {
                    write_line(&mut writer, &line).await?;
                }
                writer.flush().await?;
            }
            _ = heartbeat.tick() => {
                write_line(&mut writer, &options.heartbeat).await?;
                writer.flush().await?;
            }
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

/// Accept connections forever, one [`run_session`] task each.
pub async fn serve<P, F>(
    listener: TcpListener,
    name: &'static str,
    make_parser: F,
    hub: LineHub,
    commands: Sender<Command>,
    options: SessionOptions,
) -> Result<(), TransportError>
where
    P: LineParser + 'static,
    F: Fn(ClientId) -> P + Clone + Send + 'static,
{
    info!(listener = name, addr = ?listener.local_addr().ok(), "listening");

    loop {
        let (socket, peer) = listener.accept().await?;
        info!(listener = name, %peer, "client connected");

        let make_parser = make_parser.clone();
        let hub = hub.clone();
        let commands = commands.clone();
        let options = options.clone();
        tokio::spawn(async move {
            match run_session(socket, make_parser, hub, commands, options).await {
                Ok(()) => info!(listener = name, %peer, "client disconnected"),
                Err(e) => warn!(listener = name, %peer, error = %e, "session ended with error"),
            }
        });
    }
}
