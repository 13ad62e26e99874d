//! Public types for the twitch-realtime crate.

use std::time::Duration;

use tokio_tungstenite::tungstenite;

use crate::notification::Notification;

/// Default PubSub edge endpoint.
pub const DEFAULT_URL: &str = "wss://pubsub-edge.twitch.tv";

/// Events emitted by a [`Realtime`](crate::Realtime) client.
#[derive(Debug, Clone)]
pub enum Event {
    /// The transport opened and the bootstrap LISTEN for the current topics was sent.
    Connect,
    /// The transport closed. `will_reconnect` tells whether a new attempt is scheduled.
    Close { will_reconnect: bool },
    /// Every inbound frame that parsed as JSON, before routing.
    Raw(serde_json::Value),
    /// Something unexpected but harmless happened (unknown nonce, unknown frame type, ...).
    Warn(String),
    /// An asynchronous failure no caller is waiting on, e.g. a rejected bootstrap LISTEN.
    Error { context: String, detail: String },
    /// A non-critical error, usually accompanied by a [`Event::Warn`].
    Debug(String),
    /// A decoded topic notification.
    Notification(Notification),
}

/// Timing knobs for the protocol. The defaults match the PubSub edge's
/// expectations; tests shrink them to keep runs fast.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// How long a LISTEN/UNLISTEN waits for its RESPONSE.
    pub request_timeout: Duration,
    /// Period between PING frames while the connection is open.
    pub ping_interval: Duration,
    /// Deadline for the PONG after a PING.
    pub pong_timeout: Duration,
    /// Delay before reconnecting after a forced termination.
    pub reconnect_grace: Duration,
    /// Backoff unit. The first reconnect is immediate; the k-th waits
    /// `(k - 1) * backoff_step`.
    pub backoff_step: Duration,
    /// Buffered events before per-frame events start being dropped.
    pub event_channel_capacity: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(300),
            pong_timeout: Duration::from_secs(15),
            reconnect_grace: Duration::from_secs(1),
            backoff_step: Duration::from_secs(1),
            event_channel_capacity: 64,
        }
    }
}

/// Configuration for [`Realtime::new`](crate::Realtime::new).
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Topics subscribed on every (re)connect. Must not be empty: the edge
    /// rejects connections that never LISTEN.
    pub default_topics: Vec<String>,
    /// Reconnect automatically when the connection drops. Defaults to `true`.
    pub reconnect: bool,
    /// Token sent with requests that don't carry their own.
    pub auth_token: Option<String>,
    /// Endpoint override. Defaults to [`DEFAULT_URL`].
    pub url: Option<String>,
    /// Protocol timings. Defaults to [`TimingConfig::default`].
    pub timing: Option<TimingConfig>,
}

impl RealtimeConfig {
    /// Config with the given default topics, auto-reconnect on, and no token.
    pub fn new<I, S>(default_topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            default_topics: default_topics.into_iter().map(Into::into).collect(),
            reconnect: true,
            auth_token: None,
            url: None,
            timing: None,
        }
    }
}

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("topic can not be empty")]
    EmptyTopics,

    #[error("topic {topic} requires an authentication token")]
    Unauthorized { topic: String },

    #[error("request timed out")]
    Timeout,

    #[error("server rejected request: {0}")]
    Remote(String),

    #[error("client is closed")]
    Closed,

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(e))
    }
}
