//! PubSub wire protocol: frame types, JSON encode/decode, and topic constants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

// ---------------------------------------------------------------------------
// Topic constants
// ---------------------------------------------------------------------------

/// Topic types this crate knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicType {
    Whispers,
    VideoPlayback,
    Bits,
}

impl TopicType {
    pub const ALL: [TopicType; 3] = [
        TopicType::Whispers,
        TopicType::VideoPlayback,
        TopicType::Bits,
    ];

    /// Name used on the wire, i.e. the part of a topic before the first `.`.
    pub fn as_str(self) -> &'static str {
        match self {
            TopicType::Whispers => "whispers",
            TopicType::VideoPlayback => "video-playback",
            TopicType::Bits => "channel-bitsevents",
        }
    }

    /// Constant key, e.g. `VIDEOPLAYBACK`.
    pub fn key(self) -> &'static str {
        match self {
            TopicType::Whispers => "WHISPERS",
            TopicType::VideoPlayback => "VIDEOPLAYBACK",
            TopicType::Bits => "BITS",
        }
    }

    /// Whether listening to this topic type needs an auth token.
    pub fn requires_auth(self) -> bool {
        matches!(self, TopicType::Whispers | TopicType::Bits)
    }

    /// Fully-qualified topic for `channel`, e.g. `video-playback.monstercat`.
    pub fn topic(self, channel: &str) -> String {
        format!("{}.{channel}", self.as_str())
    }
}

impl fmt::Display for TopicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown topic type: {0}")]
pub struct UnknownTopicType(pub String);

impl FromStr for TopicType {
    type Err = UnknownTopicType;

    /// Accepts either the wire name (`video-playback`) or the constant key (`VIDEOPLAYBACK`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TopicType::ALL
            .into_iter()
            .find(|t| t.as_str() == s || t.key() == s)
            .ok_or_else(|| UnknownTopicType(s.to_string()))
    }
}

/// Build a topic string from a type (wire name or constant key) and a channel.
///
/// Unknown types are used verbatim, so topics this crate can't decode can still
/// be listened to and observed through [`Event::Raw`](crate::Event::Raw).
pub fn topic(topic_type: &str, channel: &str) -> String {
    match topic_type.parse::<TopicType>() {
        Ok(t) => t.topic(channel),
        Err(_) => format!("{topic_type}.{channel}"),
    }
}

/// Split a topic on its first `.` into `(topic_type, channel)`.
pub fn split_topic(topic: &str) -> (&str, &str) {
    topic.split_once('.').unwrap_or((topic, ""))
}

/// Whether `topic` belongs to a privileged topic type.
pub fn requires_auth(topic: &str) -> bool {
    let (topic_type, _) = split_topic(topic);
    topic_type
        .parse::<TopicType>()
        .is_ok_and(TopicType::requires_auth)
}

// ---------------------------------------------------------------------------
// Wire frames
// ---------------------------------------------------------------------------

/// Which request a nonce belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Listen,
    Unlisten,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Listen => f.write_str("LISTEN"),
            RequestKind::Unlisten => f.write_str("UNLISTEN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestData {
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum OutboundFrame {
    Listen { nonce: String, data: RequestData },
    Unlisten { nonce: String, data: RequestData },
    Ping,
}

impl OutboundFrame {
    pub fn request(
        kind: RequestKind,
        nonce: String,
        topics: Vec<String>,
        auth_token: Option<String>,
    ) -> Self {
        let data = RequestData { topics, auth_token };
        match kind {
            RequestKind::Listen => OutboundFrame::Listen { nonce, data },
            RequestKind::Unlisten => OutboundFrame::Unlisten { nonce, data },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageData {
    pub topic: String,
    /// Usually a JSON document encoded as a string; sometimes an inline object.
    pub message: serde_json::Value,
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum InboundFrame {
    Response {
        #[serde(default)]
        nonce: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    Message {
        data: MessageData,
    },
    Pong,
    Reconnect,
    #[serde(other)]
    Unknown,
}

// ---------------------------------------------------------------------------
// Encode / decode helpers
// ---------------------------------------------------------------------------

pub fn encode_frame(frame: &OutboundFrame) -> Result<String, Error> {
    Ok(serde_json::to_string(frame)?)
}

/// Parse a text frame into a JSON value. Kept separate from [`classify`] so the
/// raw value can be surfaced before routing.
pub fn parse_frame(text: &str) -> Result<serde_json::Value, Error> {
    Ok(serde_json::from_str(text)?)
}

pub fn classify(value: serde_json::Value) -> Result<InboundFrame, Error> {
    Ok(serde_json::from_value(value)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
