//! Twitch PubSub realtime client.
//!
//! Keeps one WebSocket connection to the PubSub edge alive, correlates
//! LISTEN/UNLISTEN requests with their responses, and decodes topic messages
//! into typed notifications.
//!
//! # Features
//! - Request/response correlation by nonce, with per-request timeouts
//! - Automatic reconnection with linear backoff
//! - Subscription replay after every reconnect
//! - PING/PONG liveness detection
//! - Decoding of `video-playback`, `whispers`, and `channel-bitsevents` topics
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), twitch_realtime::Error> {
//! use twitch_realtime::{Event, Notification, Realtime, RealtimeConfig, TopicType};
//!
//! let config = RealtimeConfig::new([TopicType::VideoPlayback.topic("monstercat")]);
//! let mut realtime = Realtime::new(config)?;
//!
//! while let Some(event) = realtime.next().await {
//!     match event {
//!         Event::Notification(Notification::ViewCount(v)) => {
//!             println!("{}: {} viewers", v.channel, v.viewers)
//!         }
//!         Event::Connect => println!("connected"),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod connection;
mod correlation;
mod heartbeat;
pub mod notification;
pub mod protocol;
mod router;
mod subscriptions;
mod types;

pub use client::{MAX_TOPICS_PER_CONNECTION, Realtime, Topics};
pub use connection::ConnectionState;
pub use notification::Notification;
pub use protocol::{TopicType, topic};
pub use types::{DEFAULT_URL, Error, Event, RealtimeConfig, TimingConfig};
