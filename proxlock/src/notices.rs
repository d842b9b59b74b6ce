//! User-visible error surface.
//!
//! Failed user actions are caught where they happen, logged, and turned into a [`Notice`]. A
//! notice disappears after a fixed duration or when dismissed; nothing ever propagates up and
//! takes the presentation layer down with it.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::NoticesConfig;
use crate::errors::Error;

pub type NoticeId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: NoticeId,
    pub level: NoticeLevel,
    pub message: String,
    pub expires_at: Instant,
}

#[derive(Debug, Default)]
struct Queue {
    next_id: NoticeId,
    entries: Vec<Notice>,
}

#[derive(Debug)]
pub struct Notices {
    duration: Duration,
    queue: Mutex<Queue>,
}

impl Notices {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            queue: Mutex::new(Queue::default()),
        }
    }

    pub fn from_config(config: &NoticesConfig) -> Self {
        Self::new(config.duration)
    }

    /// Log the error and show its user-facing message
    pub fn push_error(&self, error: &Error) -> NoticeId {
        error.log();
        self.push(NoticeLevel::Error, error.user_message())
    }

    pub fn push(&self, level: NoticeLevel, message: impl Into<String>) -> NoticeId {
        let mut queue = self.queue.lock();
        let id = queue.next_id;
        queue.next_id += 1;
        queue.entries.push(Notice {
            id,
            level,
            message: message.into(),
            expires_at: Instant::now() + self.duration,
        });
        id
    }

    /// Notices still visible, oldest first. Expired ones are dropped.
    pub fn active(&self) -> Vec<Notice> {
        let now = Instant::now();
        let mut queue = self.queue.lock();
        queue.entries.retain(|n| n.expires_at > now);
        queue.entries.clone()
    }

    /// Close a notice early. Returns whether it was still visible.
    pub fn dismiss(&self, id: NoticeId) -> bool {
        let mut queue = self.queue.lock();
        let before = queue.entries.len();
        queue.entries.retain(|n| n.id != id);
        queue.entries.len() != before
    }

    /// Take every visible notice, leaving the queue empty
    pub fn drain(&self) -> Vec<Notice> {
        let notices = self.active();
        self.queue.lock().entries.clear();
        notices
    }

    pub fn is_empty(&self) -> bool {
        self.active().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[tokio::test(start_paused = true)]
    async fn test_notices_expire() {
        let notices = Notices::new(Duration::from_secs(5));
        notices.push(NoticeLevel::Error, "first");

        tokio::time::sleep(Duration::from_secs(3)).await;
        notices.push(NoticeLevel::Error, "second");
        assert_eq!(notices.active().len(), 2);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let active = notices.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].message, "second");

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(notices.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss() {
        let notices = Notices::new(Duration::from_secs(5));
        let id = notices.push(NoticeLevel::Info, "saved");
        assert!(notices.dismiss(id));
        assert!(!notices.dismiss(id));
        assert!(notices.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_error_uses_user_message() {
        let notices = Notices::from_config(&NoticesConfig::default());
        notices.push_error(&Error::api("delete project", StatusCode::CONFLICT));
        notices.push_error(&Error::Other(anyhow::anyhow!("pool exhausted at 0xdeadbeef")));

        let drained = notices.drain();
        assert_eq!(drained[0].message, "Failed to delete project: Conflict");
        assert_eq!(drained[0].level, NoticeLevel::Error);
        assert!(!drained[1].message.contains("0xdeadbeef"));
        assert!(notices.is_empty());
    }
}
