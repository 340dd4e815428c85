//! Notification delivery
//!
//! Notifications are fire-and-forget from the workflow's point of view:
//! delivery is retried a bounded number of times, and an undeliverable
//! notification lands in a bounded dead-letter queue instead of failing the
//! context update that produced it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use sessionflow_core::{
    domain::repository::ContextNotification, AccessSource, CoreError, NotificationSink,
};

/// Retry policy for notification delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay between attempts
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// A notification that could not be delivered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    /// Unique identifier for the item
    pub id: String,
    /// The undelivered notification
    pub notification: ContextNotification,
    /// Error of the last attempt
    pub error: String,
    /// Delivery attempts made
    pub attempts: u32,
    /// When the item was dead-lettered
    pub timestamp: DateTime<Utc>,
}

/// Dead-letter queue statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqStats {
    /// Items currently held
    pub item_count: usize,
    /// Maximum items held
    pub capacity: usize,
    /// Items ever dead-lettered
    pub dead_lettered_count: u64,
    /// Oldest items dropped to make room
    pub dropped_count: u64,
}

struct DlqState {
    items: VecDeque<DeadLetter>,
    dead_lettered_count: u64,
    dropped_count: u64,
}

/// Bounded in-memory dead-letter queue. When full, the oldest item is dropped.
pub struct DeadLetterQueue {
    capacity: usize,
    state: Mutex<DlqState>,
}

impl DeadLetterQueue {
    /// Create a queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(DlqState {
                items: VecDeque::new(),
                dead_lettered_count: 0,
                dropped_count: 0,
            }),
        }
    }

    /// Add an item, dropping the oldest one if the queue is full
    pub async fn push(&self, item: DeadLetter) {
        let mut state = self.state.lock().await;
        if state.items.len() >= self.capacity {
            if let Some(dropped) = state.items.pop_front() {
                warn!(id = %dropped.id, user_id = %dropped.notification.user_id, "Dead-letter queue full, dropping oldest item");
                state.dropped_count += 1;
            }
        }
        state.items.push_back(item);
        state.dead_lettered_count += 1;
    }

    /// Items currently held, oldest first
    pub async fn items(&self) -> Vec<DeadLetter> {
        self.state.lock().await.items.iter().cloned().collect()
    }

    /// Current statistics
    pub async fn stats(&self) -> DlqStats {
        let state = self.state.lock().await;
        DlqStats {
            item_count: state.items.len(),
            capacity: self.capacity,
            dead_lettered_count: state.dead_lettered_count,
            dropped_count: state.dropped_count,
        }
    }
}

/// Sink wrapper adding bounded retry and dead-lettering
pub struct RetryingNotifier {
    inner: Arc<dyn NotificationSink>,
    policy: RetryPolicy,
    dead_letters: Arc<DeadLetterQueue>,
}

impl RetryingNotifier {
    /// Wrap `inner`
    pub fn new(
        inner: Arc<dyn NotificationSink>,
        policy: RetryPolicy,
        dead_letters: Arc<DeadLetterQueue>,
    ) -> Self {
        Self {
            inner,
            policy,
            dead_letters,
        }
    }
}

#[async_trait]
impl NotificationSink for RetryingNotifier {
    async fn emit(&self, notification: &ContextNotification) -> Result<(), CoreError> {
        let max_attempts = self.policy.max_retries.saturating_add(1);
        let mut attempts = 0;

        let last_error = loop {
            attempts += 1;
            match self.inner.emit(notification).await {
                Ok(()) => {
                    debug!(user_id = %notification.user_id, attempts, "Notification delivered");
                    return Ok(());
                }
                Err(err) if attempts < max_attempts => {
                    warn!(user_id = %notification.user_id, attempt = attempts, error = %err, "Notification failed, retrying");
                    tokio::time::sleep(self.policy.retry_delay).await;
                }
                Err(err) => break err,
            }
        };

        error!(user_id = %notification.user_id, attempts, error = %last_error, "Notification dead-lettered");
        self.dead_letters
            .push(DeadLetter {
                id: uuid::Uuid::new_v4().to_string(),
                notification: notification.clone(),
                error: last_error.to_string(),
                attempts,
                timestamp: Utc::now(),
            })
            .await;
        Ok(())
    }
}

/// Sink delivering notifications through the access source's update mutation
pub struct AccessSourceNotifier {
    source: Arc<dyn AccessSource>,
}

impl AccessSourceNotifier {
    /// Deliver through `source`
    pub fn new(source: Arc<dyn AccessSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl NotificationSink for AccessSourceNotifier {
    async fn emit(&self, notification: &ContextNotification) -> Result<(), CoreError> {
        let ack = self
            .source
            .notify_context_update(&notification.user_id, &notification.update)
            .await
            .map_err(|e| CoreError::Notification(e.to_string()))?;

        if !ack.success {
            return Err(CoreError::Notification(format!(
                "Context update for {} was not acknowledged",
                notification.user_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use sessionflow_core::domain::repository::{ContextUpdate, NotifyAck};
    use sessionflow_core::{AccessEntry, UserId};

    mock! {
        pub Sink {}

        #[async_trait]
        impl NotificationSink for Sink {
            async fn emit(&self, notification: &ContextNotification) -> Result<(), CoreError>;
        }
    }

    mock! {
        pub Source {}

        #[async_trait]
        impl AccessSource for Source {
            async fn query_product_access(&self, user_id: &UserId, groups: &[String]) -> Result<Vec<AccessEntry>, CoreError>;
            async fn notify_context_update(&self, user_id: &UserId, update: &ContextUpdate) -> Result<NotifyAck, CoreError>;
        }
    }

    fn notification(user: &str) -> ContextNotification {
        ContextNotification {
            user_id: UserId::new(user),
            update: ContextUpdate::context_updated(&[]),
            emitted_at: 1,
        }
    }

    fn no_delay(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            retry_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_retry_then_deliver() {
        let mut sink = MockSink::new();
        let mut calls = 0;
        sink.expect_emit().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(CoreError::Notification("flaky".to_string()))
            } else {
                Ok(())
            }
        });
        let dlq = Arc::new(DeadLetterQueue::new(10));
        let notifier = RetryingNotifier::new(Arc::new(sink), no_delay(2), dlq.clone());

        notifier.emit(&notification("user-1")).await.unwrap();
        assert_eq!(dlq.stats().await.item_count, 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter() {
        let mut sink = MockSink::new();
        sink.expect_emit()
            .times(3)
            .returning(|_| Err(CoreError::Notification("down".to_string())));
        let dlq = Arc::new(DeadLetterQueue::new(10));
        let notifier = RetryingNotifier::new(Arc::new(sink), no_delay(2), dlq.clone());

        notifier.emit(&notification("user-1")).await.unwrap();

        let items = dlq.items().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].attempts, 3);
        assert_eq!(items[0].notification.user_id, UserId::new("user-1"));
        assert!(items[0].error.contains("down"));
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest() {
        let dlq = DeadLetterQueue::new(2);
        for user in ["a", "b", "c"] {
            dlq.push(DeadLetter {
                id: user.to_string(),
                notification: notification(user),
                error: "down".to_string(),
                attempts: 1,
                timestamp: Utc::now(),
            })
            .await;
        }

        let stats = dlq.stats().await;
        assert_eq!(stats.item_count, 2);
        assert_eq!(stats.dead_lettered_count, 3);
        assert_eq!(stats.dropped_count, 1);

        let ids: Vec<String> = dlq.items().await.into_iter().map(|item| item.id).collect();
        assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_access_source_notifier_requires_ack() {
        let mut source = MockSource::new();
        source.expect_notify_context_update().returning(|_, _| {
            Ok(NotifyAck {
                success: false,
                timestamp: None,
            })
        });
        let notifier = AccessSourceNotifier::new(Arc::new(source));

        let err = notifier.emit(&notification("user-1")).await.unwrap_err();
        assert!(matches!(err, CoreError::Notification(_)));
    }

    #[tokio::test]
    async fn test_access_source_notifier_forwards_update() {
        let mut source = MockSource::new();
        source
            .expect_notify_context_update()
            .withf(|user, update| {
                user.as_str() == "user-1" && update.update_type == ContextUpdate::CONTEXT_UPDATED
            })
            .times(1)
            .returning(|_, _| {
                Ok(NotifyAck {
                    success: true,
                    timestamp: Some("2024-01-01T00:00:00Z".to_string()),
                })
            });
        let notifier = AccessSourceNotifier::new(Arc::new(source));

        notifier.emit(&notification("user-1")).await.unwrap();
    }
}
