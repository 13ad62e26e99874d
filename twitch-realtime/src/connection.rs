//! Connection management: event loop, reconnection, and heartbeat.
//!
//! A single background task owns the transport, the pending requests, the
//! subscription set, and the heartbeat. Consumer calls reach it as
//! [`Command`]s; everything else is driven by transport frames and timer
//! deadlines.

use std::future::Future;
use std::pin::Pin;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite;

use crate::Error;
use crate::correlation::{CorrelationTable, Reply, new_nonce};
use crate::heartbeat::{Heartbeat, HeartbeatAction};
use crate::protocol::{OutboundFrame, RequestKind, encode_frame};
use crate::router::{Routed, Router};
use crate::subscriptions::SubscriptionSet;
use crate::types::{Event, TimingConfig};

// ---------------------------------------------------------------------------
// Type aliases for WebSocket split halves
// ---------------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

type WsRead = futures_util::stream::SplitStream<WsStream>;
type WsWrite = futures_util::stream::SplitSink<WsStream, tungstenite::Message>;

type ConnectFuture = Pin<Box<dyn Future<Output = Result<WsStream, Error>> + Send>>;

/// An open transport. Replaced whole on reconnect, never reused.
struct Transport {
    write: WsWrite,
    read: WsRead,
}

// ---------------------------------------------------------------------------
// Public state + commands
// ---------------------------------------------------------------------------

/// Lifecycle of the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started yet.
    Idle,
    Connecting,
    Open,
    /// Shutting down on request.
    Closing,
    /// Transport is gone. `reconnecting` tells whether an attempt is scheduled.
    Closed { reconnecting: bool },
}

pub(crate) enum Command {
    Request {
        kind: RequestKind,
        topics: Vec<String>,
        auth_token: Option<String>,
        reply: Reply,
    },
    Close,
}

// ---------------------------------------------------------------------------
// Background event loop
// ---------------------------------------------------------------------------

pub(crate) struct EventLoopState {
    url: String,
    reconnect: bool,
    auth_token: Option<String>,
    timing: TimingConfig,
    state: ConnectionState,
    transport: Option<Transport>,
    connecting: Option<ConnectFuture>,
    reconnect_at: Option<Instant>,
    attempts: u32,
    bootstrap: Option<String>,
    pending: CorrelationTable,
    subscriptions: SubscriptionSet,
    heartbeat: Heartbeat,
    event_tx: mpsc::Sender<Event>,
    state_tx: watch::Sender<ConnectionState>,
    dropped_events: u64,
}

pub(crate) struct Channels {
    pub event_tx: mpsc::Sender<Event>,
    pub state_tx: watch::Sender<ConnectionState>,
}

impl EventLoopState {
    pub(crate) fn new(
        url: String,
        reconnect: bool,
        auth_token: Option<String>,
        subscriptions: SubscriptionSet,
        timing: TimingConfig,
        channels: Channels,
    ) -> Self {
        Self {
            url,
            reconnect,
            auth_token,
            state: ConnectionState::Idle,
            transport: None,
            connecting: None,
            reconnect_at: None,
            attempts: 0,
            bootstrap: None,
            pending: CorrelationTable::new(timing.request_timeout),
            subscriptions,
            heartbeat: Heartbeat::new(timing.ping_interval, timing.pong_timeout),
            timing,
            event_tx: channels.event_tx,
            state_tx: channels.state_tx,
            dropped_events: 0,
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    /// Non-blocking, for per-frame events (`Raw`, `Notification`, `Warn`,
    /// `Debug`). A full channel drops the event.
    fn emit(&mut self, event: Event) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.dropped_events += 1;
                tracing::warn!(
                    total_dropped = self.dropped_events,
                    ?event,
                    "event channel full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Lifecycle events (`Connect`, `Close`, `Error`) wait for room in the
    /// channel and are never dropped.
    async fn emit_status(&mut self, event: Event) {
        if self.event_tx.send(event).await.is_err() {
            tracing::debug!("event receiver gone, status event discarded");
        }
    }

    /// Route an event to [`emit_status`](Self::emit_status) or [`emit`](Self::emit).
    async fn dispatch(&mut self, event: Event) {
        if is_status(&event) {
            self.emit_status(event).await;
        } else {
            self.emit(event);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.reconnect_at,
            self.heartbeat.next_deadline(),
            self.pending.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    // -- Reconnect controller ----------------------------------------------

    /// Start a new transport unless one is already connecting or open.
    fn connect(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            return;
        }
        self.reconnect_at = None;
        tracing::info!(url = %self.url, attempts = self.attempts, "Connecting");
        let url = self.url.clone();
        self.connecting = Some(Box::pin(async move {
            let (ws, _resp) = tokio_tungstenite::connect_async(url).await?;
            Ok::<_, Error>(ws)
        }));
        self.set_state(ConnectionState::Connecting);
    }

    /// The transport opened: arm the heartbeat and replay the subscription set.
    async fn on_open(&mut self, ws: WsStream) {
        let (write, read) = ws.split();
        self.transport = Some(Transport { write, read });
        self.set_state(ConnectionState::Open);
        self.heartbeat.start(Instant::now());
        tracing::info!(topics = self.subscriptions.len(), "Connection open");

        if self.subscriptions.is_empty() {
            // The edge rejects a LISTEN without topics.
            self.bootstrap = None;
        } else {
            let nonce = new_nonce();
            self.bootstrap = Some(nonce.clone());
            let frame = OutboundFrame::request(
                RequestKind::Listen,
                nonce,
                self.subscriptions.snapshot(),
                self.auth_token.clone(),
            );
            if !self.send_frame(&frame).await {
                return;
            }
        }
        self.emit_status(Event::Connect).await;
    }

    /// The transport closed (or never opened). Schedules the next attempt
    /// with linear backoff when auto-reconnect is enabled.
    async fn on_transport_closed(&mut self) {
        self.transport = None;
        self.connecting = None;
        self.bootstrap = None;
        self.heartbeat.reset();

        let delay = self.timing.backoff_step.saturating_mul(self.attempts);
        self.attempts = self.attempts.saturating_add(1);

        if self.reconnect {
            tracing::info!(?delay, attempts = self.attempts, "Connection closed, reconnecting");
            self.reconnect_at = Some(Instant::now() + delay);
        } else {
            tracing::info!("Connection closed");
            self.reconnect_at = None;
        }
        self.set_state(ConnectionState::Closed {
            reconnecting: self.reconnect,
        });
        self.emit_status(Event::Close {
            will_reconnect: self.reconnect,
        })
        .await;
    }

    /// Tear the transport down without a close handshake and reconnect after
    /// the grace period, regardless of the auto-reconnect setting.
    async fn force_reconnect(&mut self) {
        let grace = self.timing.reconnect_grace;
        tracing::warn!(?grace, "Forcing reconnect");
        // Dropping both halves closes the socket without a close frame.
        self.transport = None;
        self.connecting = None;
        self.bootstrap = None;
        self.heartbeat.reset();
        self.attempts = self.attempts.saturating_add(1);
        self.reconnect_at = Some(Instant::now() + grace);
        self.set_state(ConnectionState::Closed { reconnecting: true });
        self.emit_status(Event::Close {
            will_reconnect: true,
        })
        .await;
    }

    // -- Transport I/O -------------------------------------------------------

    /// Best-effort send. Frames for a transport that isn't open are dropped,
    /// not buffered. Returns whether the frame was written.
    async fn send_frame(&mut self, frame: &OutboundFrame) -> bool {
        let text = match encode_frame(frame) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("Failed to encode frame: {e}");
                self.emit(Event::Debug(e.to_string()));
                return false;
            }
        };
        let Some(transport) = self.transport.as_mut() else {
            tracing::warn!(state = ?self.state, "Transport not open, dropping frame");
            self.emit(Event::Warn(
                "Transport not open, request frame was not sent".into(),
            ));
            return false;
        };
        match transport.write.send(tungstenite::Message::Text(text.into())).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("WebSocket send failed: {e}");
                self.emit(Event::Debug(e.to_string()));
                self.on_transport_closed().await;
                false
            }
        }
    }

    async fn on_frame(&mut self, frame: Option<Result<tungstenite::Message, tungstenite::Error>>) {
        match frame {
            Some(Ok(tungstenite::Message::Text(text))) => {
                let mut outbox = Vec::new();
                let routed = Router {
                    pending: &mut self.pending,
                    subscriptions: &mut self.subscriptions,
                    heartbeat: &mut self.heartbeat,
                    bootstrap: &mut self.bootstrap,
                }
                .route(text.as_str(), &mut outbox);
                for event in outbox {
                    self.dispatch(event).await;
                }
                if routed == Routed::ForceReconnect {
                    self.force_reconnect().await;
                }
            }
            Some(Ok(tungstenite::Message::Binary(data))) => {
                tracing::warn!(len = data.len(), "Unexpected binary frame");
                self.emit(Event::Warn("Failed to parse websocket message".into()));
            }
            Some(Ok(tungstenite::Message::Close(reason))) => {
                tracing::info!(?reason, "Server sent close frame");
            }
            Some(Ok(_)) => {
                // Ignore ping, pong, and raw frames
            }
            Some(Err(e)) => {
                tracing::warn!("WebSocket error: {e}");
                self.emit(Event::Debug(e.to_string()));
                self.on_transport_closed().await;
            }
            None => {
                tracing::info!("WebSocket stream ended");
                self.on_transport_closed().await;
            }
        }
    }

    // -- Commands and timers -------------------------------------------------

    async fn on_request(
        &mut self,
        kind: RequestKind,
        topics: Vec<String>,
        auth_token: Option<String>,
        reply: Reply,
    ) {
        if self.state != ConnectionState::Open {
            self.connect();
        }
        let nonce = self
            .pending
            .register(kind, topics.clone(), reply, Instant::now());
        tracing::debug!(%nonce, %kind, ?topics, outstanding = self.pending.len(), "Sending request");
        let frame = OutboundFrame::request(kind, nonce, topics, auth_token);
        self.send_frame(&frame).await;
    }

    async fn on_timer(&mut self, now: Instant) {
        self.pending.expire(now);

        if self.reconnect_at.is_some_and(|t| t <= now) {
            self.reconnect_at = None;
            self.connect();
        }

        match self.heartbeat.poll(now) {
            Some(HeartbeatAction::SendPing) => {
                tracing::trace!(awaiting_pong = self.heartbeat.awaiting_pong(), "Sending PING");
                self.send_frame(&OutboundFrame::Ping).await;
            }
            Some(HeartbeatAction::Expired) => self.force_reconnect().await,
            None => {}
        }
    }

    async fn shutdown(&mut self) {
        tracing::info!("Close requested");
        self.set_state(ConnectionState::Closing);
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.write.close().await;
        }
        self.connecting = None;
        self.reconnect_at = None;
        self.heartbeat.reset();
        self.pending.reject_all();
        self.set_state(ConnectionState::Closed {
            reconnecting: false,
        });
        self.emit_status(Event::Close {
            will_reconnect: false,
        })
        .await;
    }
}

fn is_status(event: &Event) -> bool {
    matches!(
        event,
        Event::Connect | Event::Close { .. } | Event::Error { .. }
    )
}

async fn next_frame(
    transport: &mut Option<Transport>,
) -> Option<Result<tungstenite::Message, tungstenite::Error>> {
    match transport {
        Some(t) => t.read.next().await,
        None => std::future::pending().await,
    }
}

async fn until_connected(connecting: &mut Option<ConnectFuture>) -> Result<WsStream, Error> {
    match connecting {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

pub(crate) async fn run_event_loop(
    mut p: EventLoopState,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    p.connect();

    loop {
        let deadline = p.next_deadline();

        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(Command::Request { kind, topics, auth_token, reply }) => {
                        p.on_request(kind, topics, auth_token, reply).await;
                    }
                    Some(Command::Close) | None => {
                        p.shutdown().await;
                        return;
                    }
                }
            }

            result = until_connected(&mut p.connecting) => {
                p.connecting = None;
                match result {
                    Ok(ws) => p.on_open(ws).await,
                    Err(e) => {
                        tracing::warn!("Connect attempt failed: {e}");
                        p.emit(Event::Debug(e.to_string()));
                        p.on_transport_closed().await;
                    }
                }
            }

            frame = next_frame(&mut p.transport) => {
                p.on_frame(frame).await;
            }

            _ = sleep_until(deadline) => {
                p.on_timer(Instant::now()).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
