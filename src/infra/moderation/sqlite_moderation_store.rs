// SQLite-backed moderation store.
//
// Tables:
// - users: platform users, their role, linked Discord account and moderation state
// - comments: comment content and toggleable flags
// - relay_settings: single-row escalation and notification settings

use crate::core::moderation::{
    CommentFlags, CommentRecord, MediaInfo, ModerationError, ModerationStore, RelaySettings, Role,
    UserModerationState, UserRecord,
};
use crate::infra::database::{decode_timestamp, encode_timestamp};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

#[derive(Clone)]
pub struct SqliteModerationStore {
    pool: Pool<Sqlite>,
}

impl SqliteModerationStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'user',
                discord_id INTEGER UNIQUE,
                banned BOOLEAN NOT NULL DEFAULT 0,
                shadow_banned BOOLEAN NOT NULL DEFAULT 0,
                muted_until TEXT,
                warning_count INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ModerationError::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS comments (
                comment_id TEXT PRIMARY KEY,
                author_id TEXT NOT NULL,
                content TEXT NOT NULL,
                media TEXT,
                pinned BOOLEAN NOT NULL DEFAULT 0,
                locked BOOLEAN NOT NULL DEFAULT 0,
                deleted BOOLEAN NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ModerationError::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS relay_settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                auto_mute_threshold INTEGER NOT NULL,
                auto_ban_threshold INTEGER NOT NULL,
                default_mute_duration_hours INTEGER NOT NULL,
                notifications_enabled BOOLEAN NOT NULL,
                enabled_event_kinds TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ModerationError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn fetch_user(
        &self,
        column: &str,
        value: UserKey<'_>,
    ) -> Result<Option<UserRecord>, ModerationError> {
        let sql = format!(
            "SELECT user_id, display_name, role, banned, shadow_banned, muted_until, warning_count
             FROM users WHERE {column} = ?"
        );
        let query = sqlx::query(&sql);
        let query = match value {
            UserKey::Id(id) => query.bind(id.to_string()),
            UserKey::Discord(id) => query.bind(id as i64),
        };
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ModerationError::Storage(e.to_string()))?;

        row.map(|row| user_from_row(&row)).transpose()
    }
}

enum UserKey<'a> {
    Id(&'a str),
    Discord(u64),
}

fn user_from_row(row: &SqliteRow) -> Result<UserRecord, ModerationError> {
    let role_str: String = row.get("role");
    let role = Role::parse(&role_str)
        .ok_or_else(|| ModerationError::Storage(format!("unknown role '{role_str}'")))?;
    let muted_until = row
        .get::<Option<String>, _>("muted_until")
        .map(|raw| decode_timestamp(&raw))
        .transpose()
        .map_err(|e| ModerationError::Storage(e.to_string()))?;

    Ok(UserRecord {
        user_id: row.get("user_id"),
        display_name: row.get("display_name"),
        role,
        state: UserModerationState {
            banned: row.get("banned"),
            shadow_banned: row.get("shadow_banned"),
            muted_until,
            warning_count: row.get::<i64, _>("warning_count") as u32,
        },
    })
}

#[async_trait]
impl ModerationStore for SqliteModerationStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, ModerationError> {
        self.fetch_user("user_id", UserKey::Id(user_id)).await
    }

    async fn find_user_by_discord_id(
        &self,
        discord_id: u64,
    ) -> Result<Option<UserRecord>, ModerationError> {
        self.fetch_user("discord_id", UserKey::Discord(discord_id)).await
    }

    async fn save_user_state(
        &self,
        user_id: &str,
        state: &UserModerationState,
    ) -> Result<(), ModerationError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET banned = ?, shadow_banned = ?, muted_until = ?
            WHERE user_id = ?
            "#,
        )
        .bind(state.banned)
        .bind(state.shadow_banned)
        .bind(state.muted_until.map(encode_timestamp))
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ModerationError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(ModerationError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    async fn add_warning(&self, user_id: &str) -> Result<u32, ModerationError> {
        let row = sqlx::query(
            r#"
            UPDATE users
            SET warning_count = warning_count + 1
            WHERE user_id = ?
            RETURNING warning_count
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ModerationError::Storage(e.to_string()))?;

        row.map(|row| row.get::<i64, _>("warning_count") as u32)
            .ok_or_else(|| ModerationError::NotFound(format!("user {user_id}")))
    }

    async fn set_user_role(&self, user_id: &str, role: Role) -> Result<(), ModerationError> {
        let result = sqlx::query("UPDATE users SET role = ? WHERE user_id = ?")
            .bind(role.as_str())
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| ModerationError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(ModerationError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }

    async fn get_comment(
        &self,
        comment_id: &str,
    ) -> Result<Option<CommentRecord>, ModerationError> {
        let row = sqlx::query(
            r#"
            SELECT comment_id, author_id, content, media, pinned, locked, deleted, created_at
            FROM comments WHERE comment_id = ?
            "#,
        )
        .bind(comment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ModerationError::Storage(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let media = row
            .get::<Option<String>, _>("media")
            .map(|raw| serde_json::from_str::<MediaInfo>(&raw))
            .transpose()
            .map_err(|e| ModerationError::Storage(e.to_string()))?;
        let created_at_str: String = row.get("created_at");
        let created_at =
            decode_timestamp(&created_at_str).map_err(|e| ModerationError::Storage(e.to_string()))?;

        Ok(Some(CommentRecord {
            comment_id: row.get("comment_id"),
            author_id: row.get("author_id"),
            content: row.get("content"),
            media,
            flags: CommentFlags {
                pinned: row.get("pinned"),
                locked: row.get("locked"),
                deleted: row.get("deleted"),
            },
            created_at,
        }))
    }

    async fn save_comment_flags(
        &self,
        comment_id: &str,
        flags: CommentFlags,
    ) -> Result<(), ModerationError> {
        let result = sqlx::query(
            "UPDATE comments SET pinned = ?, locked = ?, deleted = ? WHERE comment_id = ?",
        )
        .bind(flags.pinned)
        .bind(flags.locked)
        .bind(flags.deleted)
        .bind(comment_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ModerationError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(ModerationError::NotFound(format!("comment {comment_id}")));
        }
        Ok(())
    }

    async fn get_settings(&self) -> Result<RelaySettings, ModerationError> {
        let row = sqlx::query("SELECT * FROM relay_settings WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ModerationError::Storage(e.to_string()))?;

        if let Some(row) = row {
            let kinds: String = row.get("enabled_event_kinds");
            Ok(RelaySettings {
                auto_mute_threshold: row.get::<i64, _>("auto_mute_threshold") as u32,
                auto_ban_threshold: row.get::<i64, _>("auto_ban_threshold") as u32,
                default_mute_duration_hours: row.get::<i64, _>("default_mute_duration_hours")
                    as u32,
                notifications_enabled: row.get("notifications_enabled"),
                enabled_event_kinds: serde_json::from_str(&kinds)
                    .map_err(|e| ModerationError::Storage(e.to_string()))?,
            })
        } else {
            // Return default settings if none were saved
            Ok(RelaySettings::default())
        }
    }

    async fn save_settings(&self, settings: &RelaySettings) -> Result<(), ModerationError> {
        let kinds = serde_json::to_string(&settings.enabled_event_kinds)
            .map_err(|e| ModerationError::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO relay_settings (
                id, auto_mute_threshold, auto_ban_threshold,
                default_mute_duration_hours, notifications_enabled, enabled_event_kinds
            )
            VALUES (1, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                auto_mute_threshold = excluded.auto_mute_threshold,
                auto_ban_threshold = excluded.auto_ban_threshold,
                default_mute_duration_hours = excluded.default_mute_duration_hours,
                notifications_enabled = excluded.notifications_enabled,
                enabled_event_kinds = excluded.enabled_event_kinds
            "#,
        )
        .bind(settings.auto_mute_threshold as i64)
        .bind(settings.auto_ban_threshold as i64)
        .bind(settings.default_mute_duration_hours as i64)
        .bind(settings.notifications_enabled)
        .bind(kinds)
        .execute(&self.pool)
        .await
        .map_err(|e| ModerationError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::notifications::EventKind;
    use crate::infra::database;
    use chrono::{Duration, SubsecRound, Utc};

    async fn store() -> SqliteModerationStore {
        let pool = database::connect("sqlite::memory:").await.unwrap();
        let store = SqliteModerationStore::new(pool);
        store.migrate().await.unwrap();
        store
    }

    async fn insert_user(
        store: &SqliteModerationStore,
        id: &str,
        role: Role,
        discord_id: Option<u64>,
    ) {
        sqlx::query(
            "INSERT INTO users (user_id, display_name, role, discord_id) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(id.to_uppercase())
        .bind(role.as_str())
        .bind(discord_id.map(|d| d as i64))
        .execute(&store.pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn user_state_and_role_persist() {
        let store = store().await;
        insert_user(&store, "alice", Role::User, Some(42)).await;

        let state = UserModerationState {
            banned: false,
            shadow_banned: true,
            muted_until: Some(Utc::now().trunc_subsecs(6) + Duration::hours(24)),
            warning_count: 0,
        };
        store.save_user_state("alice", &state).await.unwrap();
        store.set_user_role("alice", Role::Moderator).await.unwrap();

        let user = store.get_user("alice").await.unwrap().unwrap();
        assert_eq!(user.role, Role::Moderator);
        assert_eq!(user.state, state);

        let linked = store.find_user_by_discord_id(42).await.unwrap().unwrap();
        assert_eq!(linked.user_id, "alice");
        assert!(store.find_user_by_discord_id(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn warnings_are_incremented_in_place() {
        let store = store().await;
        insert_user(&store, "alice", Role::User, None).await;

        let totals = futures::future::join_all((0..20).map(|_| store.add_warning("alice"))).await;
        let mut totals: Vec<u32> = totals.into_iter().map(|t| t.unwrap()).collect();
        totals.sort_unstable();
        assert_eq!(totals, (1..=20).collect::<Vec<u32>>());

        // Saving the rest of the state leaves the counter alone.
        store
            .save_user_state("alice", &UserModerationState::default())
            .await
            .unwrap();
        assert_eq!(
            store.get_user("alice").await.unwrap().unwrap().state.warning_count,
            20
        );
    }

    #[tokio::test]
    async fn writes_to_missing_rows_are_not_found() {
        let store = store().await;

        assert!(store.get_user("ghost").await.unwrap().is_none());
        assert!(matches!(
            store.save_user_state("ghost", &UserModerationState::default()).await,
            Err(ModerationError::NotFound(_))
        ));
        assert!(matches!(
            store.add_warning("ghost").await,
            Err(ModerationError::NotFound(_))
        ));
        assert!(matches!(
            store.save_comment_flags("ghost", CommentFlags::default()).await,
            Err(ModerationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn comment_flags_persist_with_media() {
        let store = store().await;
        let media = MediaInfo {
            media_id: "m1".to_string(),
            title: "Frieren".to_string(),
            media_type: Some("anime".to_string()),
            episode: Some(3),
        };
        sqlx::query(
            "INSERT INTO comments (comment_id, author_id, content, media, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind("c1")
        .bind("alice")
        .bind("hello")
        .bind(serde_json::to_string(&media).unwrap())
        .bind(encode_timestamp(Utc::now()))
        .execute(&store.pool)
        .await
        .unwrap();

        let flags = CommentFlags {
            pinned: true,
            locked: false,
            deleted: true,
        };
        store.save_comment_flags("c1", flags).await.unwrap();

        let comment = store.get_comment("c1").await.unwrap().unwrap();
        assert_eq!(comment.flags, flags);
        assert_eq!(comment.media, Some(media));
    }

    #[tokio::test]
    async fn settings_default_until_saved() {
        let store = store().await;
        assert_eq!(
            store.get_settings().await.unwrap(),
            RelaySettings::default()
        );

        let mut settings = RelaySettings {
            auto_mute_threshold: 3,
            notifications_enabled: false,
            ..Default::default()
        };
        settings.enabled_event_kinds.remove(&EventKind::VoteCast);
        store.save_settings(&settings).await.unwrap();
        store.save_settings(&settings).await.unwrap();

        assert_eq!(store.get_settings().await.unwrap(), settings);
    }
}
