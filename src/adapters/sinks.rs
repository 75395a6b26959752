use crate::domain::model::Notification;
use crate::domain::ports::NotificationSink;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Writes every notification to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notification: Notification) {
        match notification {
            Notification::TransactionCommitted {
                attempt,
                loan_id,
                member_id,
                book_id,
            } => tracing::info!(
                %loan_id, %member_id, %book_id, attempt,
                "✅ Transaction successful"
            ),
            Notification::RetryScheduled { attempt, error } => {
                tracing::warn!(attempt, "⚠️ Retrying due to error: {}", error)
            }
            Notification::DuplicateKeyRejected { attempt, error } => {
                tracing::error!(attempt, "❌ Duplicate key error: {}", error)
            }
            Notification::BorrowFailed { attempt, reason } => {
                tracing::error!(attempt, "❌ Transaction failed: {}", reason)
            }
            Notification::RetriesExhausted { attempts, book_id } => tracing::error!(
                attempts, %book_id,
                "❌ Giving up after {} attempt(s)", attempts
            ),
            Notification::NewLoan(n) => tracing::info!(
                event = %n.event_id,
                "📘 New loan created for member {}", n.member_id
            ),
            Notification::LowStock(a) => tracing::warn!(
                event = %a.event_id,
                "📉 Stock low ({}) for book ID {}", a.new_stock, a.book_id
            ),
        }
    }
}

/// Forwards notifications to an async consumer.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, notification: Notification) {
        if self.sender.send(notification).is_err() {
            tracing::debug!("Notification receiver dropped; discarding");
        }
    }
}

/// Redeliveries are only recognised within this many recent changes.
pub const DEFAULT_DEDUP_WINDOW: usize = 10_000;

/// Drops redelivered change-feed notifications before they reach `inner`.
///
/// Feed delivery is at-least-once, so the same change may be reported twice
/// after a watcher resumes. Only the most recent `window` keys are kept;
/// a redelivery older than that passes through again. Borrow outcomes carry
/// no dedup key and always pass through.
pub struct DedupSink<S> {
    inner: S,
    window: usize,
    seen: Mutex<Seen>,
}

#[derive(Default)]
struct Seen {
    keys: HashSet<String>,
    order: VecDeque<String>,
}

impl Seen {
    /// Records `key`; `false` if it is already in the window.
    fn insert(&mut self, key: String, window: usize) -> bool {
        if self.keys.contains(&key) {
            return false;
        }
        self.keys.insert(key.clone());
        self.order.push_back(key);
        while self.order.len() > window {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
        true
    }
}

impl<S: NotificationSink> DedupSink<S> {
    pub fn new(inner: S) -> Self {
        Self::with_window(inner, DEFAULT_DEDUP_WINDOW)
    }

    pub fn with_window(inner: S, window: usize) -> Self {
        Self {
            inner,
            window: window.max(1),
            seen: Mutex::new(Seen::default()),
        }
    }
}

impl<S: NotificationSink> NotificationSink for DedupSink<S> {
    fn notify(&self, notification: Notification) {
        if let Some(key) = notification.dedup_key() {
            let first_time = self
                .seen
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(key, self.window);
            if !first_time {
                tracing::debug!("Suppressed redelivered notification");
                return;
            }
        }
        self.inner.notify(notification);
    }
}
