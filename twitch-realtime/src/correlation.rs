//! Correlation of LISTEN/UNLISTEN requests with their RESPONSE frames.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::Error;
use crate::protocol::RequestKind;
use crate::subscriptions::SubscriptionSet;

pub(crate) type Reply = oneshot::Sender<Result<(), Error>>;

/// An outstanding request waiting for its RESPONSE.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub kind: RequestKind,
    pub topics: Vec<String>,
    pub created_at: Instant,
    pub deadline: Instant,
    reply: Reply,
}

impl PendingRequest {
    /// Run the continuation: commit the topics on success, then wake the caller.
    ///
    /// The subscription set is updated even if the caller stopped waiting,
    /// since the server has already applied the change.
    fn complete(self, outcome: Result<(), Error>, subscriptions: Option<&mut SubscriptionSet>) {
        if outcome.is_ok()
            && let Some(subs) = subscriptions
        {
            match self.kind {
                RequestKind::Listen => subs.insert_all(&self.topics),
                RequestKind::Unlisten => subs.remove_all(&self.topics),
            }
        }
        if self.reply.send(outcome).is_err() {
            tracing::trace!(kind = %self.kind, "Request caller went away before completion");
        }
    }
}

pub(crate) struct CorrelationTable {
    pending: HashMap<String, PendingRequest>,
    timeout: Duration,
}

impl CorrelationTable {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            timeout,
        }
    }

    /// Store a new pending request and return the nonce to put on the wire.
    pub(crate) fn register(
        &mut self,
        kind: RequestKind,
        topics: Vec<String>,
        reply: Reply,
        now: Instant,
    ) -> String {
        let mut nonce = new_nonce();
        while self.pending.contains_key(&nonce) {
            nonce = new_nonce();
        }
        self.pending.insert(
            nonce.clone(),
            PendingRequest {
                kind,
                topics,
                created_at: now,
                deadline: now + self.timeout,
                reply,
            },
        );
        nonce
    }

    /// Acknowledge `nonce`. Returns `None` if no such request is pending.
    pub(crate) fn resolve(
        &mut self,
        nonce: &str,
        subscriptions: &mut SubscriptionSet,
    ) -> Option<RequestKind> {
        let entry = self.pending.remove(nonce)?;
        let kind = entry.kind;
        entry.complete(Ok(()), Some(subscriptions));
        Some(kind)
    }

    /// Fail `nonce` with `error`. Returns `None` if no such request is pending.
    pub(crate) fn reject(&mut self, nonce: &str, error: Error) -> Option<RequestKind> {
        let entry = self.pending.remove(nonce)?;
        let kind = entry.kind;
        entry.complete(Err(error), None);
        Some(kind)
    }

    /// Reject every request whose deadline is at or before `now` with
    /// [`Error::Timeout`]. Returns how many expired.
    pub(crate) fn expire(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(nonce, _)| nonce.clone())
            .collect();
        for nonce in &expired {
            if let Some(entry) = self.pending.remove(nonce) {
                tracing::warn!(
                    nonce = %nonce,
                    kind = %entry.kind,
                    waited_ms = now.duration_since(entry.created_at).as_millis() as u64,
                    "Request timed out"
                );
                entry.complete(Err(Error::Timeout), None);
            }
        }
        expired.len()
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Reject everything; used when the client shuts down.
    pub(crate) fn reject_all(&mut self) {
        for (_, entry) in self.pending.drain() {
            entry.complete(Err(Error::Closed), None);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Random correlation id; collisions among outstanding requests are
/// negligible and re-rolled anyway by [`CorrelationTable::register`].
pub(crate) fn new_nonce() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
