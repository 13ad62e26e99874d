//! The set of topics the client is subscribed to.
//!
//! Topics enter the set only once the server acknowledged the LISTEN and
//! leave it only once it acknowledged the UNLISTEN. The set is what the
//! bootstrap request replays after every reconnect.
//!
//! Every mutation is published on a watch channel before control returns,
//! so a caller woken by an acknowledgement always observes the new set.

use std::collections::BTreeSet;

use tokio::sync::watch;

#[derive(Debug)]
pub(crate) struct SubscriptionSet {
    topics: BTreeSet<String>,
    published: watch::Sender<Vec<String>>,
}

impl Default for SubscriptionSet {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl SubscriptionSet {
    pub(crate) fn new<I: IntoIterator<Item = String>>(topics: I) -> Self {
        let topics: BTreeSet<String> = topics.into_iter().collect();
        let (published, _) = watch::channel(topics.iter().cloned().collect());
        Self { topics, published }
    }

    /// Receiver that always holds the current snapshot.
    pub(crate) fn watch(&self) -> watch::Receiver<Vec<String>> {
        self.published.subscribe()
    }

    pub(crate) fn insert_all(&mut self, topics: &[String]) {
        self.topics.extend(topics.iter().cloned());
        self.publish();
    }

    pub(crate) fn remove_all(&mut self, topics: &[String]) {
        for topic in topics {
            self.topics.remove(topic);
        }
        self.publish();
    }

    fn publish(&self) {
        let current = self.snapshot();
        self.published.send_if_modified(|topics| {
            if *topics == current {
                false
            } else {
                *topics = current;
                true
            }
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.topics.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub(crate) fn snapshot(&self) -> Vec<String> {
        self.topics.iter().cloned().collect()
    }
}
