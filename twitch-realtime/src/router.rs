//! Inbound frame routing.

use crate::correlation::CorrelationTable;
use crate::heartbeat::Heartbeat;
use crate::notification;
use crate::protocol::{InboundFrame, MessageData, classify, parse_frame};
use crate::subscriptions::SubscriptionSet;
use crate::types::{Error, Event};

pub(crate) const BOOTSTRAP_ERROR_CONTEXT: &str = "Error while subscribing to initial topics";

/// What the event loop has to do after a frame was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Routed {
    Handled,
    /// The server asked us to reconnect.
    ForceReconnect,
}

/// The state a frame can touch.
pub(crate) struct Router<'a> {
    pub pending: &'a mut CorrelationTable,
    pub subscriptions: &'a mut SubscriptionSet,
    pub heartbeat: &'a mut Heartbeat,
    /// Nonce of the in-flight bootstrap LISTEN, if any.
    pub bootstrap: &'a mut Option<String>,
}

impl Router<'_> {
    /// Route one text frame, appending the resulting events to `outbox`.
    pub(crate) fn route(&mut self, text: &str, outbox: &mut Vec<Event>) -> Routed {
        let value = match parse_frame(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Failed to parse frame: {e}");
                outbox.push(Event::Debug(e.to_string()));
                outbox.push(Event::Warn("Failed to parse websocket message".into()));
                return Routed::Handled;
            }
        };
        outbox.push(Event::Raw(value.clone()));

        let frame = match classify(value) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Malformed frame: {e}");
                outbox.push(Event::Debug(e.to_string()));
                outbox.push(Event::Warn("Failed to parse websocket message".into()));
                return Routed::Handled;
            }
        };

        match frame {
            InboundFrame::Response { nonce, error } => {
                self.on_response(nonce, error.filter(|e| !e.is_empty()), outbox);
            }
            InboundFrame::Message { data } => on_message(data, outbox),
            InboundFrame::Pong => {
                if !self.heartbeat.on_pong() {
                    tracing::debug!("Unsolicited PONG");
                }
            }
            InboundFrame::Reconnect => {
                tracing::info!("Server requested reconnect");
                return Routed::ForceReconnect;
            }
            InboundFrame::Unknown => {
                tracing::debug!("Ignoring unknown frame type");
                outbox.push(Event::Warn(
                    "Received unknown message type. Maybe this package is outdated?".into(),
                ));
            }
        }
        Routed::Handled
    }

    fn on_response(&mut self, nonce: Option<String>, error: Option<String>, outbox: &mut Vec<Event>) {
        let Some(nonce) = nonce else {
            tracing::warn!("RESPONSE without nonce");
            outbox.push(Event::Warn("Received response without nonce.".into()));
            return;
        };

        if self.bootstrap.as_deref() == Some(nonce.as_str()) {
            *self.bootstrap = None;
            match error {
                Some(detail) => {
                    tracing::warn!(%detail, "Bootstrap LISTEN rejected");
                    outbox.push(Event::Error {
                        context: BOOTSTRAP_ERROR_CONTEXT.into(),
                        detail,
                    });
                }
                None => tracing::debug!("Bootstrap LISTEN acknowledged"),
            }
            return;
        }

        let settled = match error {
            Some(detail) => self.pending.reject(&nonce, Error::Remote(detail)),
            None => self.pending.resolve(&nonce, self.subscriptions),
        };
        match settled {
            Some(kind) => tracing::debug!(%nonce, %kind, "Request settled"),
            None => {
                tracing::warn!(%nonce, "RESPONSE for unknown nonce");
                outbox.push(Event::Warn("Received message for unknown nonce.".into()));
            }
        }
    }
}

fn on_message(data: MessageData, outbox: &mut Vec<Event>) {
    match notification::decode(&data.topic, data.message) {
        Ok(Some(n)) => outbox.push(Event::Notification(n)),
        Ok(None) => tracing::trace!(topic = %data.topic, "No notification for message"),
        Err(e) => {
            tracing::warn!(topic = %data.topic, "Failed to decode message: {e}");
            outbox.push(Event::Debug(e.to_string()));
            outbox.push(Event::Warn(format!(
                "Failed to decode message on topic {}",
                data.topic
            )));
        }
    }
}
