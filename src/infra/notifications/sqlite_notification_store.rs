// SQLite-backed notification store.
//
// Tables:
// - community_channels: per-community category -> channel mapping
// - notification_records: one delivery record per event key

use crate::core::notifications::{
    CommunityChannelConfig, DeliveryStatus, EventKind, NotificationError, NotificationRecord,
    NotificationStore,
};
use crate::infra::database::{decode_timestamp, encode_timestamp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;

#[derive(Clone)]
pub struct SqliteNotificationStore {
    pool: Pool<Sqlite>,
}

impl SqliteNotificationStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), NotificationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS community_channels (
                community_id INTEGER PRIMARY KEY,
                channels TEXT NOT NULL DEFAULT '{}',
                active BOOLEAN NOT NULL DEFAULT 1
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| NotificationError::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notification_records (
                key TEXT PRIMARY KEY,
                event_kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                next_retry_at TEXT,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notification_records_retry
                ON notification_records(status, next_retry_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| NotificationError::Storage(e.to_string()))?;

        Ok(())
    }
}

fn storage(e: impl ToString) -> NotificationError {
    NotificationError::Storage(e.to_string())
}

fn record_from_row(row: &SqliteRow) -> Result<NotificationRecord, NotificationError> {
    let kind_str: String = row.get("event_kind");
    let status_str: String = row.get("status");
    let payload: String = row.get("payload");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(NotificationRecord {
        key: row.get("key"),
        event_kind: EventKind::parse(&kind_str)
            .ok_or_else(|| storage(format!("unknown event kind '{kind_str}'")))?,
        payload: serde_json::from_str(&payload)?,
        status: DeliveryStatus::parse(&status_str)
            .ok_or_else(|| storage(format!("unknown status '{status_str}'")))?,
        retry_count: row.get::<i64, _>("retry_count") as u32,
        next_retry_at: row
            .get::<Option<String>, _>("next_retry_at")
            .map(|raw| decode_timestamp(&raw))
            .transpose()
            .map_err(storage)?,
        last_error: row.get("last_error"),
        created_at: decode_timestamp(&created_at).map_err(storage)?,
        updated_at: decode_timestamp(&updated_at).map_err(storage)?,
    })
}

#[async_trait]
impl NotificationStore for SqliteNotificationStore {
    async fn get_channel_configs(&self) -> Result<Vec<CommunityChannelConfig>, NotificationError> {
        let rows = sqlx::query("SELECT community_id, channels, active FROM community_channels")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        let mut configs = Vec::with_capacity(rows.len());
        for row in rows {
            let channels: String = row.get("channels");
            configs.push(CommunityChannelConfig {
                community_id: row.get::<i64, _>("community_id") as u64,
                channels: serde_json::from_str(&channels)?,
                active: row.get("active"),
            });
        }
        Ok(configs)
    }

    async fn save_channel_config(
        &self,
        config: CommunityChannelConfig,
    ) -> Result<(), NotificationError> {
        let channels = serde_json::to_string(&config.channels)?;
        sqlx::query(
            r#"
            INSERT INTO community_channels (community_id, channels, active)
            VALUES (?, ?, ?)
            ON CONFLICT(community_id) DO UPDATE SET
                channels = excluded.channels,
                active = excluded.active
            "#,
        )
        .bind(config.community_id as i64)
        .bind(channels)
        .bind(config.active)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn upsert_record(&self, record: &NotificationRecord) -> Result<(), NotificationError> {
        let payload = serde_json::to_string(&record.payload)?;
        sqlx::query(
            r#"
            INSERT INTO notification_records (
                key, event_kind, payload, status, retry_count,
                next_retry_at, last_error, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                event_kind = excluded.event_kind,
                payload = excluded.payload,
                status = excluded.status,
                retry_count = excluded.retry_count,
                next_retry_at = excluded.next_retry_at,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.key)
        .bind(record.event_kind.as_str())
        .bind(payload)
        .bind(record.status.as_str())
        .bind(record.retry_count as i64)
        .bind(record.next_retry_at.map(encode_timestamp))
        .bind(&record.last_error)
        .bind(encode_timestamp(record.created_at))
        .bind(encode_timestamp(record.updated_at))
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn get_record(&self, key: &str) -> Result<Option<NotificationRecord>, NotificationError> {
        let row = sqlx::query("SELECT * FROM notification_records WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.map(|row| record_from_row(&row)).transpose()
    }

    async fn get_failed_records(
        &self,
        max_retry: u32,
        due_before: DateTime<Utc>,
    ) -> Result<Vec<NotificationRecord>, NotificationError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM notification_records
            WHERE status IN (?, ?) AND retry_count < ?
              AND next_retry_at IS NOT NULL AND next_retry_at <= ?
            ORDER BY next_retry_at ASC
            "#,
        )
        .bind(DeliveryStatus::Failed.as_str())
        .bind(DeliveryStatus::Pending.as_str())
        .bind(max_retry as i64)
        .bind(encode_timestamp(due_before))
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn count_by_status(&self) -> Result<HashMap<DeliveryStatus, u64>, NotificationError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS total FROM notification_records GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let mut counts = HashMap::new();
        for row in rows {
            let status: String = row.get("status");
            if let Some(status) = DeliveryStatus::parse(&status) {
                counts.insert(status, row.get::<i64, _>("total") as u64);
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::notifications::EventCategory;
    use crate::infra::database;
    use chrono::{Duration, SubsecRound};
    use std::collections::BTreeMap;

    async fn store() -> SqliteNotificationStore {
        let pool = database::connect("sqlite::memory:").await.unwrap();
        let store = SqliteNotificationStore::new(pool);
        store.migrate().await.unwrap();
        store
    }

    fn record(
        key: &str,
        status: DeliveryStatus,
        retry_count: u32,
        next: Option<DateTime<Utc>>,
    ) -> NotificationRecord {
        let now = Utc::now().trunc_subsecs(6);
        NotificationRecord {
            key: key.to_string(),
            event_kind: EventKind::CommentPosted,
            payload: serde_json::json!({ "key": key }),
            status,
            retry_count,
            next_retry_at: next,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn upsert_keeps_one_row_per_key() {
        let store = store().await;
        let first = record("comment:c1", DeliveryStatus::Failed, 0, None);
        store.upsert_record(&first).await.unwrap();

        let mut second = first.clone();
        second.status = DeliveryStatus::Sent;
        second.last_error = Some("boom".to_string());
        store.upsert_record(&second).await.unwrap();

        let stored = store.get_record("comment:c1").await.unwrap().unwrap();
        assert_eq!(stored, second);

        let counts = store.count_by_status().await.unwrap();
        assert_eq!(counts.get(&DeliveryStatus::Sent), Some(&1));
        assert_eq!(counts.get(&DeliveryStatus::Failed), None);
    }

    #[tokio::test]
    async fn retry_candidates_filter_by_status_retry_count_and_due_time() {
        let store = store().await;
        let now = Utc::now();

        let candidates = [
            ("due", DeliveryStatus::Failed, 1, Some(now - Duration::minutes(1))),
            ("later", DeliveryStatus::Failed, 1, Some(now + Duration::minutes(4))),
            ("exhausted", DeliveryStatus::Failed, 3, Some(now - Duration::minutes(1))),
            ("partial", DeliveryStatus::Partial, 0, None),
            ("stranded", DeliveryStatus::Pending, 0, Some(now - Duration::minutes(2))),
            ("sent", DeliveryStatus::Sent, 0, Some(now - Duration::minutes(2))),
        ];
        for (key, status, retry_count, next) in candidates {
            store
                .upsert_record(&record(key, status, retry_count, next))
                .await
                .unwrap();
        }

        let due = store.get_failed_records(3, now).await.unwrap();
        let keys: Vec<_> = due.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["stranded", "due"]);
    }

    #[tokio::test]
    async fn channel_configs_replace_per_community() {
        let store = store().await;
        let mut config = CommunityChannelConfig {
            community_id: 9_000_000_000_000_000_001,
            channels: BTreeMap::from([(EventCategory::Moderation, 77)]),
            active: true,
        };
        store.save_channel_config(config.clone()).await.unwrap();

        config.channels.insert(EventCategory::PrimaryActivity, 78);
        config.active = false;
        store.save_channel_config(config.clone()).await.unwrap();

        assert_eq!(store.get_channel_configs().await.unwrap(), vec![config]);
    }
}
