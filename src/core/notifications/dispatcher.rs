// Notification dispatcher - resolves channels, renders, fans out, records.
//
// This service handles:
// - Routing an event to every configured destination
// - Concurrent per-channel delivery with a join barrier
// - Idempotent record upserts keyed by the event's natural key
// - The retry sweep with exponential backoff
//
// It is owned by exactly one worker task (see `notification_queue`), so no
// locking happens in here.

use super::channel_router::{self, Destination};
use super::message_builder::{MessageBuilder, RenderedMessage};
use super::notification_models::{
    CommunityChannelConfig, DeliveryResult, DeliveryStatus, NotificationEvent,
    NotificationRecord, RetrySummary,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::time::Duration as StdDuration;
use thiserror::Error;

/// A record is abandoned once it has failed this many delivery attempts,
/// the first attempt included.
pub const MAX_RETRIES: u32 = 3;
pub const DEFAULT_DELIVERY_TIMEOUT: StdDuration = StdDuration::from_secs(10);
pub const NO_DESTINATION_ERROR: &str = "no destination configured";

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Payload error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Notification worker is not running")]
    WorkerStopped,
}

/// Failure to deliver to one channel. Never surfaced to action callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("delivery timed out after {0:?}")]
    Timeout(StdDuration),

    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// PORTS
// ============================================================================

/// Persistence needed by the dispatcher.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Every community config, active or not. Routing filters them.
    async fn get_channel_configs(&self) -> Result<Vec<CommunityChannelConfig>, NotificationError>;

    async fn save_channel_config(
        &self,
        config: CommunityChannelConfig,
    ) -> Result<(), NotificationError>;

    /// Insert or replace the record stored under `record.key`.
    async fn upsert_record(&self, record: &NotificationRecord) -> Result<(), NotificationError>;

    async fn get_record(&self, key: &str) -> Result<Option<NotificationRecord>, NotificationError>;

    /// Records with `retry_count < max_retry` and `next_retry_at <= due_before`
    /// that are `failed`, or still `pending` because their dispatch never finished.
    async fn get_failed_records(
        &self,
        max_retry: u32,
        due_before: DateTime<Utc>,
    ) -> Result<Vec<NotificationRecord>, NotificationError>;

    async fn count_by_status(&self) -> Result<HashMap<DeliveryStatus, u64>, NotificationError>;
}

/// Transport to an external chat channel. Rate limiting is its own business.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Returns the platform message id on success.
    async fn send(
        &self,
        channel_id: u64,
        message: &RenderedMessage,
    ) -> Result<String, DeliveryError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// Delay before the next retry after `retry_count` failed retries.
pub fn backoff_delay(retry_count: u32) -> Duration {
    Duration::minutes(1_i64 << (retry_count.min(20) + 1))
}

pub fn generated_key() -> String {
    format!("evt-{:016x}", rand::random::<u64>())
}

pub struct NotificationDispatcher<S: NotificationStore, M: MessageSender> {
    store: S,
    sender: M,
    builder: MessageBuilder,
    delivery_timeout: StdDuration,
}

impl<S: NotificationStore, M: MessageSender> NotificationDispatcher<S, M> {
    pub fn new(store: S, sender: M, builder: MessageBuilder) -> Self {
        Self {
            store,
            sender,
            builder,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    pub fn with_delivery_timeout(mut self, timeout: StdDuration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Deliver a fresh event and record the outcome.
    ///
    /// A fresh event on an existing key replaces the stored snapshot and
    /// restarts the retry cycle. The pending row is due immediately, so a
    /// dispatch that never records its outcome is picked up by the next sweep.
    pub async fn dispatch(
        &self,
        event: &NotificationEvent,
    ) -> Result<NotificationRecord, NotificationError> {
        let now = Utc::now();
        let key = event.natural_key().unwrap_or_else(generated_key);
        let created_at = self
            .store
            .get_record(&key)
            .await?
            .map(|existing| existing.created_at)
            .unwrap_or(now);

        let mut record = NotificationRecord {
            key,
            event_kind: event.kind(),
            payload: serde_json::to_value(event)?,
            status: DeliveryStatus::Pending,
            retry_count: 0,
            next_retry_at: Some(now),
            last_error: None,
            created_at,
            updated_at: now,
        };
        self.store.upsert_record(&record).await?;

        let outcome = self.deliver(event).await;
        record_attempt(&mut record, outcome, Utc::now());
        self.store.upsert_record(&record).await?;

        tracing::info!(
            key = %record.key,
            kind = %record.event_kind,
            status = %record.status,
            "Notification dispatched"
        );
        Ok(record)
    }

    /// Resend every due failed record. Called by the worker on request.
    pub async fn retry_sweep(&self, now: DateTime<Utc>) -> Result<RetrySummary, NotificationError> {
        let due = self.store.get_failed_records(MAX_RETRIES, now).await?;
        let mut summary = RetrySummary::default();

        for mut record in due {
            summary.attempted += 1;

            let event: NotificationEvent = match serde_json::from_value(record.payload.clone()) {
                Ok(event) => event,
                Err(e) => {
                    // An unreadable payload will never succeed; park it.
                    tracing::error!(
                        key = %record.key,
                        error = %e,
                        "Dropping unreadable notification payload"
                    );
                    record.retry_count = MAX_RETRIES;
                    record.next_retry_at = None;
                    record.last_error = Some(format!("unreadable payload: {e}"));
                    record.updated_at = now;
                    self.store.upsert_record(&record).await?;
                    summary.still_failed += 1;
                    continue;
                }
            };

            let outcome = self.deliver(&event).await;
            record_attempt(&mut record, outcome, now);
            if record.status == DeliveryStatus::Failed {
                summary.still_failed += 1;
            } else {
                summary.succeeded += 1;
                tracing::info!(
                    key = %record.key,
                    status = %record.status,
                    "Notification retry delivered"
                );
            }
            self.store.upsert_record(&record).await?;
        }

        Ok(summary)
    }

    /// Route, render and fan out. Waits for every channel before returning.
    async fn deliver(
        &self,
        event: &NotificationEvent,
    ) -> Result<Vec<DeliveryResult>, NotificationError> {
        let category = channel_router::classify(event.kind());
        let destinations = channel_router::resolve(&self.store, category).await?;
        if destinations.is_empty() {
            tracing::warn!(kind = %event.kind(), category = %category, "No destination configured");
            return Ok(Vec::new());
        }

        let message = self.builder.build(event);
        let attempts = destinations
            .into_iter()
            .map(|destination| self.send_one(destination, &message));
        Ok(futures::future::join_all(attempts).await)
    }

    async fn send_one(
        &self,
        destination: Destination,
        message: &RenderedMessage,
    ) -> DeliveryResult {
        let outcome = match tokio::time::timeout(
            self.delivery_timeout,
            self.sender.send(destination.channel_id, message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.delivery_timeout)),
        };

        match outcome {
            Ok(message_id) => DeliveryResult {
                community_id: destination.community_id,
                channel_id: destination.channel_id,
                success: true,
                message_id: Some(message_id),
                error: None,
            },
            Err(e) => {
                tracing::warn!(
                    community_id = destination.community_id,
                    channel_id = destination.channel_id,
                    error = %e,
                    "Failed to deliver notification"
                );
                DeliveryResult {
                    community_id: destination.community_id,
                    channel_id: destination.channel_id,
                    success: false,
                    message_id: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// Fold one delivery attempt into the record.
///
/// Every failed attempt counts, the first one included, so after `k`
/// failures the record is due again in `2^(k+1)` minutes and it is never
/// attempted more than [`MAX_RETRIES`] times.
fn record_attempt(
    record: &mut NotificationRecord,
    outcome: Result<Vec<DeliveryResult>, NotificationError>,
    now: DateTime<Utc>,
) {
    record.updated_at = now;
    let results = match outcome {
        Ok(results) => results,
        Err(e) => {
            tracing::error!(key = %record.key, error = %e, "Could not attempt delivery");
            return record_failure(record, e.to_string(), now);
        }
    };

    let status = DeliveryStatus::aggregate(&results);
    if status == DeliveryStatus::Failed {
        record_failure(record, failure_reason(&results), now);
    } else {
        record.status = status;
        record.next_retry_at = None;
        record.last_error = first_error(&results);
    }
}

fn record_failure(record: &mut NotificationRecord, reason: String, now: DateTime<Utc>) {
    record.status = DeliveryStatus::Failed;
    record.retry_count += 1;
    record.next_retry_at = Some(now + backoff_delay(record.retry_count));
    record.last_error = Some(reason);

    if record.retry_count >= MAX_RETRIES {
        tracing::warn!(key = %record.key, "Notification abandoned after final attempt");
    } else {
        tracing::warn!(
            key = %record.key,
            retry_count = record.retry_count,
            "Notification delivery failed, will retry"
        );
    }
}

fn failure_reason(results: &[DeliveryResult]) -> String {
    first_error(results).unwrap_or_else(|| NO_DESTINATION_ERROR.to_string())
}

fn first_error(results: &[DeliveryResult]) -> Option<String> {
    results.iter().find_map(|r| r.error.clone())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::moderation::{CommentFlags, Role};
    use crate::core::notifications::message_builder::BuilderOptions;
    use crate::core::notifications::notification_models::{
        CommentSnapshot, EventCategory, UserSnapshot,
    };
    use dashmap::DashMap;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory store for testing
    #[derive(Default)]
    pub(crate) struct MockNotificationStore {
        pub configs: Mutex<Vec<CommunityChannelConfig>>,
        pub records: DashMap<String, NotificationRecord>,
        /// How many upcoming channel config reads fail.
        pub failing_config_reads: AtomicUsize,
    }

    impl MockNotificationStore {
        pub fn with_channels(channels: &[(u64, EventCategory, u64)]) -> Self {
            let store = Self::default();
            {
                let mut configs = store.configs.lock().unwrap();
                for &(community_id, category, channel_id) in channels {
                    configs.push(CommunityChannelConfig {
                        community_id,
                        channels: BTreeMap::from([(category, channel_id)]),
                        active: true,
                    });
                }
            }
            store
        }
    }

    #[async_trait]
    impl NotificationStore for Arc<MockNotificationStore> {
        async fn get_channel_configs(
            &self,
        ) -> Result<Vec<CommunityChannelConfig>, NotificationError> {
            let failing = self
                .failing_config_reads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(NotificationError::Storage("database is locked".to_string()));
            }
            Ok(self.configs.lock().unwrap().clone())
        }

        async fn save_channel_config(
            &self,
            config: CommunityChannelConfig,
        ) -> Result<(), NotificationError> {
            let mut configs = self.configs.lock().unwrap();
            configs.retain(|c| c.community_id != config.community_id);
            configs.push(config);
            Ok(())
        }

        async fn upsert_record(
            &self,
            record: &NotificationRecord,
        ) -> Result<(), NotificationError> {
            self.records.insert(record.key.clone(), record.clone());
            Ok(())
        }

        async fn get_record(
            &self,
            key: &str,
        ) -> Result<Option<NotificationRecord>, NotificationError> {
            Ok(self.records.get(key).map(|r| r.clone()))
        }

        async fn get_failed_records(
            &self,
            max_retry: u32,
            due_before: DateTime<Utc>,
        ) -> Result<Vec<NotificationRecord>, NotificationError> {
            Ok(self
                .records
                .iter()
                .filter(|r| {
                    matches!(r.status, DeliveryStatus::Failed | DeliveryStatus::Pending)
                        && r.retry_count < max_retry
                        && r.next_retry_at.is_some_and(|at| at <= due_before)
                })
                .map(|r| r.clone())
                .collect())
        }

        async fn count_by_status(&self) -> Result<HashMap<DeliveryStatus, u64>, NotificationError> {
            let mut counts = HashMap::new();
            for record in self.records.iter() {
                *counts.entry(record.status).or_insert(0) += 1;
            }
            Ok(counts)
        }
    }

    /// Sender that fails for a configurable set of channels.
    #[derive(Default)]
    pub(crate) struct MockSender {
        pub failing: Mutex<HashSet<u64>>,
        pub sent: Mutex<Vec<(u64, RenderedMessage)>>,
        pub attempts: AtomicUsize,
    }

    impl MockSender {
        pub fn failing(channels: &[u64]) -> Self {
            let sender = Self::default();
            sender.failing.lock().unwrap().extend(channels.iter().copied());
            sender
        }

        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageSender for Arc<MockSender> {
        async fn send(
            &self,
            channel_id: u64,
            message: &RenderedMessage,
        ) -> Result<String, DeliveryError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.failing.lock().unwrap().contains(&channel_id) {
                return Err(DeliveryError::Transport("channel unavailable".to_string()));
            }
            self.sent.lock().unwrap().push((channel_id, message.clone()));
            Ok(format!("msg-{channel_id}"))
        }
    }

    /// Sender that never answers.
    struct StalledSender;

    #[async_trait]
    impl MessageSender for StalledSender {
        async fn send(&self, _: u64, _: &RenderedMessage) -> Result<String, DeliveryError> {
            std::future::pending().await
        }
    }

    pub(crate) fn builder() -> MessageBuilder {
        MessageBuilder::new(BuilderOptions {
            site_url: "https://example.test".to_string(),
        })
    }

    pub(crate) fn comment_event(comment_id: &str, content: &str) -> NotificationEvent {
        NotificationEvent::CommentPosted(CommentSnapshot {
            comment_id: comment_id.to_string(),
            author: UserSnapshot {
                user_id: "author".to_string(),
                display_name: "Author".to_string(),
                role: Role::User,
                banned: false,
                shadow_banned: false,
                muted_until: None,
                warning_count: 0,
            },
            content: content.to_string(),
            media: None,
            flags: CommentFlags::default(),
            created_at: Utc::now(),
            edited_at: None,
        })
    }

    fn dispatcher(
        store: &Arc<MockNotificationStore>,
        sender: &Arc<MockSender>,
    ) -> NotificationDispatcher<Arc<MockNotificationStore>, Arc<MockSender>> {
        NotificationDispatcher::new(Arc::clone(store), Arc::clone(sender), builder())
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff_delay(0), Duration::minutes(2));
        assert_eq!(backoff_delay(1), Duration::minutes(4));
        assert_eq!(backoff_delay(2), Duration::minutes(8));
        assert_eq!(backoff_delay(3), Duration::minutes(16));
    }

    #[test]
    fn generated_keys_are_distinct() {
        assert_ne!(generated_key(), generated_key());
        assert!(generated_key().starts_with("evt-"));
    }

    #[tokio::test]
    async fn two_of_three_channels_is_partial() {
        let store = Arc::new(MockNotificationStore::with_channels(&[
            (1, EventCategory::PrimaryActivity, 10),
            (2, EventCategory::PrimaryActivity, 20),
            (3, EventCategory::PrimaryActivity, 30),
        ]));
        let sender = Arc::new(MockSender::failing(&[20]));
        let dispatcher = dispatcher(&store, &sender);

        let event = comment_event("c1", "hello");
        let results = dispatcher.deliver(&event).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|r| r.success).count(), 2);

        let record = dispatcher.dispatch(&event).await.unwrap();
        assert_eq!(record.status, DeliveryStatus::Partial);
        assert_eq!(record.next_retry_at, None);
        assert!(record.last_error.is_some());
    }

    #[tokio::test]
    async fn no_destination_is_a_failed_record() {
        let store = Arc::new(MockNotificationStore::default());
        let sender = Arc::new(MockSender::default());
        let dispatcher = dispatcher(&store, &sender);

        let record = dispatcher.dispatch(&comment_event("c1", "hello")).await.unwrap();

        assert_eq!(record.status, DeliveryStatus::Failed);
        assert_eq!(record.last_error.as_deref(), Some(NO_DESTINATION_ERROR));
        assert_eq!(sender.attempts(), 0);
        assert_eq!(store.records.len(), 1);
    }

    #[tokio::test]
    async fn same_natural_key_upserts_one_record() {
        let store = Arc::new(MockNotificationStore::with_channels(&[(
            1,
            EventCategory::PrimaryActivity,
            10,
        )]));
        let sender = Arc::new(MockSender::default());
        let dispatcher = dispatcher(&store, &sender);

        dispatcher.dispatch(&comment_event("c1", "first")).await.unwrap();
        let first_created = store.records.get("comment:c1").unwrap().created_at;

        sender.failing.lock().unwrap().insert(10);
        dispatcher.dispatch(&comment_event("c1", "second")).await.unwrap();

        assert_eq!(store.records.len(), 1);
        let record = store.records.get("comment:c1").unwrap().clone();
        assert_eq!(record.status, DeliveryStatus::Failed);
        assert_eq!(record.created_at, first_created);
        match serde_json::from_value(record.payload).unwrap() {
            NotificationEvent::CommentPosted(comment) => assert_eq!(comment.content, "second"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_record_is_attempted_three_times_with_backoff() {
        let store = Arc::new(MockNotificationStore::with_channels(&[(
            1,
            EventCategory::PrimaryActivity,
            10,
        )]));
        let sender = Arc::new(MockSender::failing(&[10]));
        let dispatcher = dispatcher(&store, &sender);

        let start = Utc::now();
        let record = dispatcher.dispatch(&comment_event("c1", "x")).await.unwrap();
        assert_eq!(sender.attempts(), 1);
        assert_eq!(record.retry_count, 1);
        let first_due = record.next_retry_at.unwrap();
        assert!((first_due - start - Duration::minutes(4)).num_seconds().abs() <= 1);

        // Nothing is due yet.
        let summary = dispatcher.retry_sweep(Utc::now()).await.unwrap();
        assert_eq!(summary, RetrySummary::default());
        assert_eq!(sender.attempts(), 1);

        let mut now = first_due;
        for k in 2..=MAX_RETRIES {
            let summary = dispatcher.retry_sweep(now).await.unwrap();
            assert_eq!(summary.attempted, 1);
            assert_eq!(summary.still_failed, 1);

            let record = store.records.get("comment:c1").unwrap().clone();
            assert_eq!(record.retry_count, k);
            assert_eq!(record.status, DeliveryStatus::Failed);
            let next = record.next_retry_at.unwrap();
            assert_eq!(next - now, Duration::minutes(1 << (k + 1)));

            // One minute early is still too early.
            let early = dispatcher.retry_sweep(next - Duration::minutes(1)).await.unwrap();
            assert_eq!(early.attempted, 0);
            now = next;
        }

        // After the third failure there is no fourth attempt.
        assert_eq!(sender.attempts(), MAX_RETRIES as usize);
        let summary = dispatcher.retry_sweep(now + Duration::days(365)).await.unwrap();
        assert_eq!(summary.attempted, 0);
        assert_eq!(sender.attempts(), MAX_RETRIES as usize);
        assert_eq!(
            store.records.get("comment:c1").unwrap().status,
            DeliveryStatus::Failed
        );
    }

    #[tokio::test]
    async fn storage_error_during_dispatch_is_retried_later() {
        let store = Arc::new(MockNotificationStore::with_channels(&[(
            1,
            EventCategory::PrimaryActivity,
            10,
        )]));
        store.failing_config_reads.store(1, Ordering::SeqCst);
        let sender = Arc::new(MockSender::default());
        let dispatcher = dispatcher(&store, &sender);

        let record = dispatcher.dispatch(&comment_event("c1", "x")).await.unwrap();
        assert_eq!(record.status, DeliveryStatus::Failed);
        assert_eq!(record.retry_count, 1);
        assert!(record.last_error.unwrap().contains("database is locked"));
        assert_eq!(sender.attempts(), 0);

        let summary = dispatcher
            .retry_sweep(Utc::now() + Duration::days(365))
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(
            store.records.get("comment:c1").unwrap().status,
            DeliveryStatus::Sent
        );
        assert_eq!(sender.attempts(), 1);
    }

    #[tokio::test]
    async fn storage_error_for_one_record_does_not_abort_the_sweep() {
        let store = Arc::new(MockNotificationStore::with_channels(&[(
            1,
            EventCategory::PrimaryActivity,
            10,
        )]));
        let sender = Arc::new(MockSender::failing(&[10]));
        let dispatcher = dispatcher(&store, &sender);

        dispatcher.dispatch(&comment_event("c1", "x")).await.unwrap();
        dispatcher.dispatch(&comment_event("c2", "x")).await.unwrap();
        sender.failing.lock().unwrap().clear();
        store.failing_config_reads.store(1, Ordering::SeqCst);

        let summary = dispatcher
            .retry_sweep(Utc::now() + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(
            summary,
            RetrySummary {
                attempted: 2,
                succeeded: 1,
                still_failed: 1
            }
        );

        let mut retry_counts: Vec<u32> = store.records.iter().map(|r| r.retry_count).collect();
        retry_counts.sort_unstable();
        assert_eq!(retry_counts, vec![1, 2]);
    }

    #[tokio::test]
    async fn interrupted_dispatch_is_resent_by_the_next_sweep() {
        let store = Arc::new(MockNotificationStore::with_channels(&[(
            1,
            EventCategory::PrimaryActivity,
            10,
        )]));
        let sender = Arc::new(MockSender::default());
        let dispatcher = dispatcher(&store, &sender);

        // What a crash between the pending write and the outcome leaves behind.
        let event = comment_event("c1", "x");
        let written_at = Utc::now();
        store.records.insert(
            "comment:c1".to_string(),
            NotificationRecord {
                key: "comment:c1".to_string(),
                event_kind: event.kind(),
                payload: serde_json::to_value(&event).unwrap(),
                status: DeliveryStatus::Pending,
                retry_count: 0,
                next_retry_at: Some(written_at),
                last_error: None,
                created_at: written_at,
                updated_at: written_at,
            },
        );

        let summary = dispatcher.retry_sweep(written_at).await.unwrap();
        assert_eq!(summary.succeeded, 1);
        let record = store.records.get("comment:c1").unwrap().clone();
        assert_eq!(record.status, DeliveryStatus::Sent);
        assert_eq!(record.next_retry_at, None);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retry_succeeds_once_channel_recovers() {
        let store = Arc::new(MockNotificationStore::with_channels(&[(
            1,
            EventCategory::PrimaryActivity,
            10,
        )]));
        let sender = Arc::new(MockSender::failing(&[10]));
        let dispatcher = dispatcher(&store, &sender);

        let record = dispatcher.dispatch(&comment_event("c1", "x")).await.unwrap();
        sender.failing.lock().unwrap().clear();

        let summary = dispatcher
            .retry_sweep(record.next_retry_at.unwrap())
            .await
            .unwrap();
        assert_eq!(
            summary,
            RetrySummary {
                attempted: 1,
                succeeded: 1,
                still_failed: 0
            }
        );

        let record = store.records.get("comment:c1").unwrap().clone();
        assert_eq!(record.status, DeliveryStatus::Sent);
        assert_eq!(record.next_retry_at, None);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retry_picks_up_channel_configured_later() {
        let store = Arc::new(MockNotificationStore::default());
        let sender = Arc::new(MockSender::default());
        let dispatcher = dispatcher(&store, &sender);

        let record = dispatcher.dispatch(&comment_event("c1", "x")).await.unwrap();
        assert_eq!(record.status, DeliveryStatus::Failed);

        store.configs.lock().unwrap().push(CommunityChannelConfig {
            community_id: 7,
            channels: BTreeMap::from([(EventCategory::PrimaryActivity, 70)]),
            active: true,
        });

        let summary = dispatcher
            .retry_sweep(record.next_retry_at.unwrap())
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(sender.sent.lock().unwrap()[0].0, 70);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_transport_times_out() {
        let store = Arc::new(MockNotificationStore::with_channels(&[(
            1,
            EventCategory::PrimaryActivity,
            10,
        )]));
        let dispatcher = NotificationDispatcher::new(Arc::clone(&store), StalledSender, builder())
            .with_delivery_timeout(StdDuration::from_secs(10));

        let record = dispatcher.dispatch(&comment_event("c1", "x")).await.unwrap();
        assert_eq!(record.status, DeliveryStatus::Failed);
        assert!(record.last_error.unwrap().contains("timed out"));
    }
}
