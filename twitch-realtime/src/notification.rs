//! Decoding of MESSAGE payloads into typed notifications.
//!
//! This is a pure mapping: it never touches connection state. Payloads of
//! known topic types with an unrecognised shape produce `Ok(None)`; payloads
//! that are not valid JSON produce an error.

use serde::Deserialize;
use serde_json::Value;

use crate::Error;
use crate::protocol::{TopicType, split_topic};

/// Server timestamp as sent by the edge: usually fractional epoch seconds,
/// occasionally a string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ServerTime {
    Seconds(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamUp {
    pub channel: String,
    pub time: ServerTime,
    /// Delay artificially inserted into the stream, in seconds.
    pub play_delay: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamDown {
    pub channel: String,
    pub time: ServerTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewCount {
    pub channel: String,
    pub time: ServerTime,
    pub viewers: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WhisperSender {
    pub id: Option<String>,
    pub username: Option<String>,
    pub display_name: Option<String>,
    /// Hex colour code, e.g. `#FF0000`.
    pub color: Option<String>,
    pub badges: Vec<Value>,
    pub emotes: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Whisper {
    pub channel: String,
    pub id: Option<String>,
    pub content: Option<String>,
    pub thread: Option<String>,
    pub sender: WhisperSender,
    pub recipient: Option<Value>,
    pub send_ts: Option<i64>,
    pub nonce: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bits {
    pub channel: String,
    pub user_name: Option<String>,
    pub channel_name: Option<String>,
    pub time: Option<String>,
    pub chat_message: Option<String>,
    pub bits_used: u64,
    /// Total bits the user has ever sent to this channel.
    pub total_bits_used: u64,
    pub context: Option<String>,
}

/// A decoded topic notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    StreamUp(StreamUp),
    StreamDown(StreamDown),
    ViewCount(ViewCount),
    Whisper(Box<Whisper>),
    Bits(Bits),
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Notification::StreamUp(_) => "stream-up",
            Notification::StreamDown(_) => "stream-down",
            Notification::ViewCount(_) => "viewcount",
            Notification::Whisper(_) => "whisper",
            Notification::Bits(_) => "bits",
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            Notification::StreamUp(n) => &n.channel,
            Notification::StreamDown(n) => &n.channel,
            Notification::ViewCount(n) => &n.channel,
            Notification::Whisper(n) => &n.channel,
            Notification::Bits(n) => &n.channel,
        }
    }
}

// ---------------------------------------------------------------------------
// Payload shapes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum PlaybackPayload {
    StreamUp {
        server_time: ServerTime,
        #[serde(default)]
        play_delay: Option<i64>,
    },
    StreamDown {
        server_time: ServerTime,
    },
    Viewcount {
        server_time: ServerTime,
        viewers: u64,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct WhisperPayload {
    data: Value,
    body: Option<String>,
    thread_id: Option<String>,
    from_id: Option<Value>,
    tags: WhisperTags,
    recipient: Option<Value>,
    send_ts: Option<i64>,
    nonce: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct WhisperTags {
    login: Option<String>,
    display_name: Option<String>,
    color: Option<String>,
    badges: Option<Vec<Value>>,
    emotes: Option<Vec<Value>>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct BitsPayload {
    user_name: Option<String>,
    channel_name: Option<String>,
    time: Option<String>,
    chat_message: Option<String>,
    bits_used: u64,
    total_bits_used: u64,
    context: Option<String>,
}

/// Ids arrive as either strings or integers depending on the payload version.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Decode the `message` of a MESSAGE frame published on `topic`.
pub fn decode(topic: &str, message: Value) -> Result<Option<Notification>, Error> {
    let (topic_type, channel) = split_topic(topic);
    let Ok(topic_type) = topic_type.parse::<TopicType>() else {
        tracing::trace!(topic, "No decoder for topic type");
        return Ok(None);
    };

    let message = match message {
        Value::String(s) => serde_json::from_str(&s)?,
        other => other,
    };
    let channel = channel.to_string();

    let notification = match topic_type {
        TopicType::VideoPlayback => match serde_json::from_value(message)? {
            PlaybackPayload::StreamUp {
                server_time,
                play_delay,
            } => Some(Notification::StreamUp(StreamUp {
                channel,
                time: server_time,
                play_delay,
            })),
            PlaybackPayload::StreamDown { server_time } => {
                Some(Notification::StreamDown(StreamDown {
                    channel,
                    time: server_time,
                }))
            }
            PlaybackPayload::Viewcount {
                server_time,
                viewers,
            } => Some(Notification::ViewCount(ViewCount {
                channel,
                time: server_time,
                viewers,
            })),
            PlaybackPayload::Other => None,
        },
        TopicType::Whispers => {
            let p: WhisperPayload = serde_json::from_value(message)?;
            Some(Notification::Whisper(Box::new(Whisper {
                channel,
                id: p.data.get("id").and_then(id_string),
                content: p.body,
                thread: p.thread_id,
                sender: WhisperSender {
                    id: p.from_id.as_ref().and_then(id_string),
                    username: p.tags.login,
                    display_name: p.tags.display_name,
                    color: p.tags.color,
                    badges: p.tags.badges.unwrap_or_default(),
                    emotes: p.tags.emotes.unwrap_or_default(),
                },
                recipient: p.recipient,
                send_ts: p.send_ts,
                nonce: p.nonce,
            })))
        }
        TopicType::Bits => {
            // v1 bits events nest the payload under `data`; older ones are flat.
            let body = match message {
                Value::Object(mut map) if map.get("data").is_some_and(Value::is_object) => {
                    map.remove("data").unwrap_or_default()
                }
                other => other,
            };
            let p: BitsPayload = serde_json::from_value(body)?;
            Some(Notification::Bits(Bits {
                channel,
                user_name: p.user_name,
                channel_name: p.channel_name,
                time: p.time,
                chat_message: p.chat_message,
                bits_used: p.bits_used,
                total_bits_used: p.total_bits_used,
                context: p.context,
            }))
        }
    };
    Ok(notification)
}
