//! PING/PONG liveness tracking for the open connection.
//!
//! The monitor owns no timers itself; the event loop asks it for the next
//! deadline and calls [`Heartbeat::poll`] when that deadline passes.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatAction {
    /// Time to send a PING.
    SendPing,
    /// The PONG did not arrive in time.
    Expired,
}

#[derive(Debug)]
pub(crate) struct Heartbeat {
    interval: Duration,
    pong_timeout: Duration,
    next_ping: Option<Instant>,
    last_ping: Option<Instant>,
    pong_deadline: Option<Instant>,
}

impl Heartbeat {
    pub(crate) fn new(interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            interval,
            pong_timeout,
            next_ping: None,
            last_ping: None,
            pong_deadline: None,
        }
    }

    /// Arm the ping schedule for a freshly opened connection.
    pub(crate) fn start(&mut self, now: Instant) {
        self.reset();
        self.next_ping = Some(now + self.interval);
    }

    pub(crate) fn reset(&mut self) {
        self.next_ping = None;
        self.last_ping = None;
        self.pong_deadline = None;
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        match (self.next_ping, self.pong_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub(crate) fn poll(&mut self, now: Instant) -> Option<HeartbeatAction> {
        if self.pong_deadline.is_some_and(|d| d <= now) {
            tracing::warn!(
                since_ping_ms = self
                    .last_ping
                    .map(|t| now.duration_since(t).as_millis() as u64),
                "PONG not received in time"
            );
            self.reset();
            return Some(HeartbeatAction::Expired);
        }
        if self.next_ping.is_some_and(|d| d <= now) {
            self.last_ping = Some(now);
            self.next_ping = Some(now + self.interval);
            // An older unanswered PING keeps its earlier deadline.
            let deadline = now + self.pong_timeout;
            self.pong_deadline = Some(self.pong_deadline.map_or(deadline, |d| d.min(deadline)));
            return Some(HeartbeatAction::SendPing);
        }
        None
    }

    /// Record a PONG. Returns `false` if no PING was outstanding.
    pub(crate) fn on_pong(&mut self) -> bool {
        self.pong_deadline.take().is_some()
    }

    pub(crate) fn awaiting_pong(&self) -> bool {
        self.pong_deadline.is_some()
    }
}
