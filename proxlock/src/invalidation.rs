//! Cross-component invalidation channel.
//!
//! When a mutation in one view changes data shown by another (creating a key changes the key
//! count in the sidebar, deleting a project removes it from the list), the mutating side publishes
//! a [`Topic`] on the [`InvalidationBus`] and every [`Subscription`] to that topic wakes up and
//! refetches.
//!
//! Each topic is a `watch` channel carrying a generation counter. Publishing bumps the counter;
//! a subscriber only sees "something changed since I last looked", so several publications that
//! land before the subscriber gets around to refetching collapse into a single refresh. A topic
//! only exists while someone is subscribed to it; publishing on a topic nobody follows does
//! nothing.
//!
//! A component that both mutates and follows the same topics takes a [`Publisher`]. Its own
//! subscriptions skip the publications it made itself, since it already refetched before
//! publishing, but still wake for anyone else's.
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use proxlock::invalidation::{InvalidationBus, Topic};
//!
//! let bus = InvalidationBus::new();
//! let mut subscription = bus.subscribe(Topic::Projects);
//!
//! bus.publish(Topic::Projects);
//! bus.publish(Topic::Projects);
//!
//! assert!(subscription.changed().await);
//! assert!(!subscription.has_pending());
//! # }
//! ```

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::trace;

use crate::types::{ProjectId, abbrev_uuid};

/// What was invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// The project list (sidebar, home page)
    Projects,
    /// A single project's name or description
    Project(ProjectId),
    /// The keys of one project
    Keys(ProjectId),
    /// The DeviceCheck credential of one project
    DeviceCheck(ProjectId),
    /// The user's reusable DeviceCheck credentials
    DeviceCheckPool,
    /// The signed-in user and usage counters
    User,
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::Projects => write!(f, "projects"),
            Topic::Project(id) => write!(f, "project:{}", abbrev_uuid(id)),
            Topic::Keys(id) => write!(f, "keys:{}", abbrev_uuid(id)),
            Topic::DeviceCheck(id) => write!(f, "device-check:{}", abbrev_uuid(id)),
            Topic::DeviceCheckPool => write!(f, "device-check-pool"),
            Topic::User => write!(f, "user"),
        }
    }
}

type Topics = DashMap<Topic, watch::Sender<u64>>;

/// Generations published by one [`Publisher`], per topic it follows
type OwnGenerations = Arc<Mutex<HashMap<Topic, BTreeSet<u64>>>>;

/// Publish/subscribe channel for invalidations. Cheap to clone; clones share topics.
#[derive(Debug, Clone, Default)]
pub struct InvalidationBus {
    topics: Arc<Topics>,
}

impl InvalidationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a topic as stale. Never blocks and never fails, with or without subscribers.
    ///
    /// Returns the topic's new generation, or `None` when nobody follows the topic.
    pub fn publish(&self, topic: Topic) -> Option<u64> {
        let Some(sender) = self.topics.get(&topic) else {
            trace!(%topic, "No subscribers, nothing to invalidate");
            return None;
        };
        if sender.receiver_count() == 0 {
            drop(sender);
            self.topics.remove_if(&topic, |_, sender| sender.receiver_count() == 0);
            return None;
        }

        let mut generation = 0;
        sender.send_modify(|current| {
            *current += 1;
            generation = *current;
        });
        trace!(%topic, generation, "Published invalidation");
        Some(generation)
    }

    /// Start listening on a topic. Only publications after this call are observed.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let receiver = self
            .topics
            .entry(topic)
            .or_insert_with(|| watch::channel(0).0)
            .subscribe();
        let seen = *receiver.borrow();
        Subscription {
            topic,
            seen,
            receiver,
            own: None,
            topics: Arc::downgrade(&self.topics),
        }
    }

    /// A publisher whose own subscriptions skip its own publications
    pub fn publisher(&self) -> Publisher {
        Publisher {
            bus: self.clone(),
            own: OwnGenerations::default(),
        }
    }

    /// Number of live subscriptions on a topic
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics.get(&topic).map(|sender| sender.receiver_count()).unwrap_or(0)
    }
}

/// Publishes on behalf of one component.
///
/// Subscriptions taken through [`Publisher::subscribe`] wake for everyone's publications except
/// the ones made through this publisher. Publications that coalesce with someone else's still
/// wake them.
#[derive(Debug, Clone)]
pub struct Publisher {
    bus: InvalidationBus,
    own: OwnGenerations,
}

impl Publisher {
    pub fn publish(&self, topic: Topic) {
        // Held across the publish so a subscriber never checks a generation before it is recorded
        let mut own = self.own.lock();
        if let Some(generation) = self.bus.publish(topic)
            && let Some(generations) = own.get_mut(&topic)
        {
            generations.insert(generation);
        }
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        self.own.lock().entry(topic).or_default();
        let mut subscription = self.bus.subscribe(topic);
        subscription.own = Some(self.own.clone());
        subscription
    }
}

/// A live subscription to one topic. Dropping it ends the subscription.
#[derive(Debug)]
pub struct Subscription {
    topic: Topic,
    receiver: watch::Receiver<u64>,
    /// Last generation returned by [`Subscription::changed`]
    seen: u64,
    own: Option<OwnGenerations>,
    topics: Weak<Topics>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Wait for the next invalidation.
    ///
    /// Resolves immediately if anything was published since the last call, however many times.
    /// Returns `false` once the bus is gone and nothing can be published anymore.
    pub async fn changed(&mut self) -> bool {
        loop {
            if self.receiver.changed().await.is_err() {
                return false;
            }
            let generation = *self.receiver.borrow_and_update();
            let previous = std::mem::replace(&mut self.seen, generation);
            if !self.only_own(previous, generation) {
                return true;
            }
            trace!(topic = %self.topic, generation, "Skipping own invalidation");
        }
    }

    /// Whether every generation in `(previous, current]` came from this subscription's publisher.
    /// Forgets the generations it looked at either way.
    fn only_own(&self, previous: u64, current: u64) -> bool {
        let Some(own) = &self.own else {
            return false;
        };
        let mut own = own.lock();
        let Some(generations) = own.get_mut(&self.topic) else {
            return false;
        };
        let mine = generations.range(previous + 1..=current).count() as u64;
        generations.retain(|generation| *generation > current);
        mine == current - previous
    }

    /// Whether a publication is waiting to be consumed by [`Subscription::changed`]. Own
    /// publications count until `changed` skips them.
    pub fn has_pending(&self) -> bool {
        self.receiver.has_changed().unwrap_or(false)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(own) = &self.own {
            own.lock().remove(&self.topic);
        }
        // This receiver is still alive here, so it is the last one when the count is one
        if let Some(topics) = self.topics.upgrade() {
            topics.remove_if(&self.topic, |_, sender| sender.receiver_count() <= 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_publish_wakes_subscriber() {
        let bus = InvalidationBus::new();
        let mut sub = bus.subscribe(Topic::Projects);
        assert!(!sub.has_pending());

        bus.publish(Topic::Projects);
        assert!(sub.has_pending());
        assert!(sub.changed().await);
        assert!(!sub.has_pending());
    }

    #[tokio::test]
    async fn test_publications_coalesce() {
        let bus = InvalidationBus::new();
        let mut sub = bus.subscribe(Topic::Projects);

        for _ in 0..5 {
            bus.publish(Topic::Projects);
        }

        assert!(sub.changed().await);
        // Nothing left: the five publications were consumed as one
        assert!(tokio::time::timeout(Duration::from_millis(20), sub.changed()).await.is_err());
    }

    #[tokio::test]
    async fn test_topics_are_independent() {
        let bus = InvalidationBus::new();
        let project = Uuid::new_v4();
        let other = Uuid::new_v4();
        let keys = bus.subscribe(Topic::Keys(project));
        let projects = bus.subscribe(Topic::Projects);

        bus.publish(Topic::Keys(other));
        bus.publish(Topic::DeviceCheck(project));

        assert!(!keys.has_pending());
        assert!(!projects.has_pending());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = InvalidationBus::new();
        bus.publish(Topic::User);
        bus.publish(Topic::User);
        assert_eq!(bus.subscriber_count(Topic::User), 0);
    }

    #[test]
    fn test_drop_ends_subscription() {
        let bus = InvalidationBus::new();
        let first = bus.subscribe(Topic::DeviceCheckPool);
        let second = bus.subscribe(Topic::DeviceCheckPool);
        assert_eq!(bus.subscriber_count(Topic::DeviceCheckPool), 2);

        drop(first);
        assert_eq!(bus.subscriber_count(Topic::DeviceCheckPool), 1);
        drop(second);
        assert_eq!(bus.subscriber_count(Topic::DeviceCheckPool), 0);
    }

    #[tokio::test]
    async fn test_clones_share_topics() {
        let bus = InvalidationBus::new();
        let mut sub = bus.subscribe(Topic::User);
        bus.clone().publish(Topic::User);
        assert!(sub.changed().await);
    }

    #[test]
    fn test_topic_removed_with_last_subscription() {
        let bus = InvalidationBus::new();
        let project = Uuid::new_v4();
        let sub = bus.subscribe(Topic::Keys(project));
        assert_eq!(bus.publish(Topic::Keys(project)), Some(1));

        drop(sub);
        assert!(bus.topics.is_empty());
        assert_eq!(bus.publish(Topic::Keys(project)), None);
        assert!(bus.topics.is_empty(), "publishing never creates a topic");
    }

    #[tokio::test]
    async fn test_publisher_skips_own_publications() {
        let bus = InvalidationBus::new();
        let publisher = bus.publisher();
        let mut own = publisher.subscribe(Topic::Projects);
        let mut other = bus.subscribe(Topic::Projects);

        publisher.publish(Topic::Projects);
        assert!(other.changed().await);
        assert!(
            tokio::time::timeout(Duration::from_millis(20), own.changed()).await.is_err(),
            "own publication is skipped"
        );

        bus.publish(Topic::Projects);
        assert!(own.changed().await);
    }

    #[tokio::test]
    async fn test_own_publication_coalesced_with_foreign_still_wakes() {
        let bus = InvalidationBus::new();
        let publisher = bus.publisher();
        let mut own = publisher.subscribe(Topic::User);

        bus.publish(Topic::User);
        publisher.publish(Topic::User);
        assert!(own.changed().await);

        // Both generations were consumed; nothing is left behind
        publisher.publish(Topic::User);
        assert!(tokio::time::timeout(Duration::from_millis(20), own.changed()).await.is_err());
    }

    #[tokio::test]
    async fn test_changed_false_after_bus_dropped() {
        let bus = InvalidationBus::new();
        let mut sub = bus.subscribe(Topic::Projects);
        drop(bus);
        assert!(!sub.changed().await);
    }
}
