//! Public entry point: [`Realtime`].

use tokio::sync::{mpsc, oneshot, watch};

use crate::connection::{Channels, Command, ConnectionState, EventLoopState, run_event_loop};
use crate::protocol::{RequestKind, requires_auth};
use crate::subscriptions::SubscriptionSet;
use crate::types::{DEFAULT_URL, Error, Event, RealtimeConfig};

/// Topics the edge accepts on a single connection.
pub const MAX_TOPICS_PER_CONNECTION: usize = 50;

/// One topic or an ordered list of topics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topics(Vec<String>);

impl Topics {
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl From<&str> for Topics {
    fn from(topic: &str) -> Self {
        Topics(vec![topic.to_string()])
    }
}

impl From<String> for Topics {
    fn from(topic: String) -> Self {
        Topics(vec![topic])
    }
}

impl From<Vec<String>> for Topics {
    fn from(topics: Vec<String>) -> Self {
        Topics(topics)
    }
}

impl From<Vec<&str>> for Topics {
    fn from(topics: Vec<&str>) -> Self {
        Topics(topics.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Topics {
    fn from(topics: &[&str]) -> Self {
        Topics(topics.iter().map(|t| t.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Topics {
    fn from(topics: [&str; N]) -> Self {
        Topics(topics.iter().map(|t| t.to_string()).collect())
    }
}

/// Handle to a PubSub connection.
///
/// Call [`next`](Realtime::next) to receive events, [`listen`](Realtime::listen)
/// and [`unlisten`](Realtime::unlisten) to change subscriptions, or
/// [`close`](Realtime::close) to shut the connection down.
///
/// Per-frame events may be dropped under backpressure if the consumer falls
/// behind; `Connect`, `Close`, and `Error` are always delivered.
pub struct Realtime {
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::Receiver<Event>,
    topics: watch::Receiver<Vec<String>>,
    state: watch::Receiver<ConnectionState>,
    auth_token: Option<String>,
}

impl Realtime {
    /// Validate `config` and start connecting in the background.
    ///
    /// Must be called from within a Tokio runtime. The returned client emits
    /// [`Event::Connect`] once the connection is open and the default topics
    /// were requested.
    pub fn new(config: RealtimeConfig) -> Result<Self, Error> {
        if config.default_topics.is_empty() {
            return Err(Error::Config("missing default topic".into()));
        }
        if config.default_topics.iter().any(String::is_empty) {
            return Err(Error::EmptyTopics);
        }

        let url = config.url.unwrap_or_else(|| DEFAULT_URL.to_string());
        let parsed = url::Url::parse(&url)?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Config(format!("no Tokio runtime: {e}")))?;

        let timing = config.timing.unwrap_or_default();
        let (event_tx, event_rx) = mpsc::channel::<Event>(timing.event_channel_capacity.max(1));
        let (command_tx, command_rx) = mpsc::unbounded_channel::<Command>();
        let subscriptions = SubscriptionSet::new(config.default_topics);
        let topics_rx = subscriptions.watch();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let state = EventLoopState::new(
            url,
            config.reconnect,
            config.auth_token.clone(),
            subscriptions,
            timing,
            Channels { event_tx, state_tx },
        );
        runtime.spawn(run_event_loop(state, command_rx));

        Ok(Realtime {
            commands: command_tx,
            events: event_rx,
            topics: topics_rx,
            state: state_rx,
            auth_token: config.auth_token,
        })
    }

    /// Listen to one or more topics.
    ///
    /// Resolves once the server acknowledged the request, after the topics were
    /// added to [`topics`](Realtime::topics). Fails with the server's error,
    /// with [`Error::Timeout`] if no response arrives in time, or immediately
    /// with [`Error::Unauthorized`] if a privileged topic has no token.
    pub async fn listen(
        &self,
        topics: impl Into<Topics>,
        auth_token: Option<&str>,
    ) -> Result<(), Error> {
        self.request(RequestKind::Listen, topics.into(), auth_token)
            .await
    }

    /// Stop listening to one or more topics. Same semantics as [`listen`](Realtime::listen).
    pub async fn unlisten(
        &self,
        topics: impl Into<Topics>,
        auth_token: Option<&str>,
    ) -> Result<(), Error> {
        self.request(RequestKind::Unlisten, topics.into(), auth_token)
            .await
    }

    async fn request(
        &self,
        kind: RequestKind,
        topics: Topics,
        auth_token: Option<&str>,
    ) -> Result<(), Error> {
        let topics = topics.into_vec();
        if topics.is_empty() || topics.iter().any(String::is_empty) {
            return Err(Error::EmptyTopics);
        }

        let auth_token = auth_token
            .map(str::to_string)
            .or_else(|| self.auth_token.clone());
        if auth_token.is_none()
            && let Some(topic) = topics.iter().find(|t| requires_auth(t))
        {
            return Err(Error::Unauthorized {
                topic: topic.clone(),
            });
        }

        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Request {
                kind,
                topics,
                auth_token,
                reply,
            })
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Receive the next event. Returns `None` once the background task has exited.
    pub async fn next(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Topics currently subscribed to.
    pub fn topics(&self) -> Vec<String> {
        self.topics.borrow().clone()
    }

    /// Number of topics currently subscribed to.
    pub fn topic_count(&self) -> usize {
        self.topics.borrow().len()
    }

    /// Whether another topic fits on this connection.
    pub fn accepts_new_topics(&self) -> bool {
        self.topic_count() < MAX_TOPICS_PER_CONNECTION
    }

    /// Current lifecycle state of the underlying connection.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Gracefully close the connection. Outstanding requests fail with [`Error::Closed`].
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Realtime {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Close);
    }
}
