//! WebSocket session lifecycle: one client from upgrade through teardown.
//!
//! ```text
//! Connecting ──verify──▶ Authenticated ──attach tail──▶ Streaming ──▶ Closing ──▶ Closed
//!      └──────────── close 4001 "Authentication failed" ─────────────────────────────▲
//! ```
//!
//! Every exit from `Streaming` (client close, transport error, heartbeat
//! timeout, server shutdown) funnels through [`Session::close`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use admincraft_core::{AdmissionGate, AuthError, Identity, RateWindow};
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::connection::{ClientConnection, SessionState};
use super::registry::SessionRegistry;
use crate::dispatcher::CommandDispatcher;
use crate::metrics::{
    AUTH_REJECTIONS_TOTAL, COMMANDS_ADMITTED_TOTAL, COMMANDS_REJECTED_TOTAL,
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::process::ManagedProcess;
use crate::streamer::{self, OutputChunk, OutputSubscription, StreamerHandle, Utf8Decoder};

/// Close code sent when the connection token is rejected.
pub const AUTH_FAILED_CLOSE_CODE: u16 = 4001;

/// Close reason sent with [`AUTH_FAILED_CLOSE_CODE`].
pub const AUTH_FAILED_REASON: &str = "Authentication failed";

/// Sent in place of raw stderr from the log tail.
pub const TAIL_ERROR_NOTICE: &str = "Error: the server log stream reported an error";

/// Everything a session needs from the server, built once and shared.
pub struct SessionDeps {
    /// Live sessions, for broadcast and cleanup.
    pub registry: Arc<SessionRegistry>,
    /// Executes admitted commands.
    pub dispatcher: Arc<CommandDispatcher>,
    /// Source of each session's log tail.
    pub process: Arc<dyn ManagedProcess>,
    /// Syntax and rate checks for inbound commands.
    pub gate: AdmissionGate,
    /// Outbound queue depth per connection.
    pub send_queue: usize,
    /// Output chunks buffered between a tail and its session.
    pub tail_buffer: usize,
    /// Period between server pings.
    pub ping_interval: Duration,
    /// Silence allowed before the connection is dropped.
    pub pong_timeout: Duration,
    /// Cancelled on server shutdown.
    pub shutdown: CancellationToken,
}

/// A live session: one connection bound to one log tail.
pub struct Session {
    connection: Arc<ClientConnection>,
    streamer: StreamerHandle,
    registry: Arc<SessionRegistry>,
    closed: AtomicBool,
}

impl Session {
    /// Bind a registered connection to its streamer.
    pub fn new(
        connection: Arc<ClientConnection>,
        streamer: StreamerHandle,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            connection,
            streamer,
            registry,
            closed: AtomicBool::new(false),
        }
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Arc<ClientConnection> {
        &self.connection
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tear the session down: signal the tail to terminate and leave the registry.
    ///
    /// Only the first call does anything; it returns `true`. Later or
    /// concurrent calls return `false`.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.connection.set_state(SessionState::Closing);
        self.streamer.terminate();
        let _ = self.registry.remove(&self.connection.id).await;
        self.connection.set_state(SessionState::Closed);

        info!(
            user_id = self.connection.identity().user_id(),
            dropped = self.connection.drop_count(),
            "client disconnected"
        );
        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(self.connection.age().as_secs_f64());
        true
    }
}

/// Run a session for an upgraded socket.
///
/// `auth` is the verification result for the upgrade request's token. On
/// rejection the socket is closed with [`AUTH_FAILED_CLOSE_CODE`] and no
/// subprocess is ever started.
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_session(
    mut socket: WebSocket,
    conn_id: String,
    auth: Result<Identity, AuthError>,
    deps: Arc<SessionDeps>,
) {
    let identity = match auth {
        Ok(identity) => identity,
        Err(e) => {
            counter!(AUTH_REJECTIONS_TOTAL, "reason" => e.error_kind()).increment(1);
            close_with(&mut socket, AUTH_FAILED_CLOSE_CODE, AUTH_FAILED_REASON).await;
            return;
        }
    };

    let (streamer, mut output) = match streamer::attach(deps.process.as_ref(), deps.tail_buffer) {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "failed to start log tail");
            close_with(&mut socket, close_code::ERROR, "Log stream unavailable").await;
            return;
        }
    };

    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(deps.send_queue.max(1));
    let connection = Arc::new(ClientConnection::new(conn_id, identity, send_tx));

    // Queue the welcome before the connection becomes visible to broadcasts
    // so it is always the first frame the client sees.
    let _ = connection.send(Arc::new(format!("{} connected", connection.identity())));
    if !deps.registry.add(connection.clone()).await {
        warn!("connection id already registered");
        close_with(&mut socket, close_code::ERROR, "Session unavailable").await;
        return;
    }
    let session = Session::new(connection.clone(), streamer, deps.registry.clone());
    connection.set_state(SessionState::Streaming);

    info!(user_id = connection.identity().user_id(), "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let (ws_tx, ws_rx) = socket.split();
    let writer = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        connection.clone(),
        deps.ping_interval,
        deps.pong_timeout,
        deps.shutdown.clone(),
    ));

    drive(ws_rx, &mut output, writer, &connection, &deps).await;
    let _ = session.close().await;
}

async fn drive(
    mut ws_rx: futures::stream::SplitStream<WebSocket>,
    output: &mut OutputSubscription,
    mut writer: tokio::task::JoinHandle<()>,
    connection: &ClientConnection,
    deps: &SessionDeps,
) {
    let mut window = RateWindow::new(Instant::now());
    let mut tail_open = true;
    let mut decoder = Utf8Decoder::default();
    // Tail text waiting for queue space. The tail is not read while set.
    let mut pending: Option<String> = None;

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket read failed");
                        break;
                    }
                    None => break,
                };
                connection.mark_alive();
                match frame {
                    Message::Text(text) => handle_command(text.as_str(), &mut window, connection, deps),
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => handle_command(text, &mut window, connection, deps),
                        Err(_) => debug!(len = data.len(), "ignoring non-UTF-8 binary frame"),
                    },
                    Message::Close(_) => {
                        info!("client sent close frame");
                        break;
                    }
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            chunk = output.next(), if tail_open && pending.is_none() => match chunk {
                Some(chunk) => pending = relay_output(chunk, &mut decoder),
                None => tail_open = false,
            },
            permit = connection.reserve(), if pending.is_some() => {
                let Some(permit) = permit else { break };
                if let Some(text) = pending.take() {
                    permit.send(Arc::new(text));
                }
            }
            _ = &mut writer => {
                debug!("writer stopped");
                break;
            }
        }
    }
    writer.abort();
}

/// Drains the outbound queue into the socket and runs the heartbeat.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Arc<String>>,
    connection: Arc<ClientConnection>,
    ping_interval: Duration,
    pong_timeout: Duration,
    shutdown: CancellationToken,
) {
    let mut ping = tokio::time::interval(ping_interval);
    // Skip the immediate first tick
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            msg = outbound.recv() => {
                let Some(text) = msg else { break };
                if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if !connection.check_alive() && connection.last_seen_elapsed() > pong_timeout {
                    warn!(timeout = ?pong_timeout, "client unresponsive, disconnecting");
                    break;
                }
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
            () = shutdown.cancelled() => {
                let frame = CloseFrame {
                    code: close_code::AWAY,
                    reason: Utf8Bytes::from_static("Server shutting down"),
                };
                let _ = ws_tx.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }
}

fn handle_command(
    raw: &str,
    window: &mut RateWindow,
    connection: &ClientConnection,
    deps: &SessionDeps,
) {
    debug!(command = ?raw, "received command");
    match deps.gate.admit(raw, window, Instant::now()) {
        Ok(command) => {
            counter!(COMMANDS_ADMITTED_TOTAL).increment(1);
            drop(deps.dispatcher.dispatch(command));
        }
        Err(e) => {
            counter!(COMMANDS_REJECTED_TOTAL, "reason" => e.error_kind()).increment(1);
            info!(reason = e.error_kind(), "command rejected");
            let _ = connection.send(Arc::new(format!("Error: {e}")));
        }
    }
}

/// The text a tail chunk turns into for the client, if any.
fn relay_output(chunk: OutputChunk, decoder: &mut Utf8Decoder) -> Option<String> {
    match chunk {
        OutputChunk::Stdout(bytes) => {
            let text = decoder.decode(&bytes);
            (!text.is_empty()).then_some(text)
        }
        OutputChunk::Stderr(bytes) => {
            warn!(
                stderr = %String::from_utf8_lossy(&bytes).trim_end(),
                "log tail wrote to stderr"
            );
            Some(TAIL_ERROR_NOTICE.to_owned())
        }
        OutputChunk::Exited(code) => {
            info!(exit_code = ?code, "log tail ended, no further output for this session");
            decoder.finish()
        }
    }
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}
