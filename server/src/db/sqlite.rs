use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::models::{Message, NewUser, User};
use super::store::{MessageStore, StorageError};
use super::DbPool;

const USER_COLUMNS: &str =
    "id, external_id, username, name, email, avatar, created_at, updated_at";

/// [`MessageStore`] backed by the shared SQLite connection.
/// Every call runs on the blocking pool so the router task never waits on disk I/O.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|e| StorageError::Backend(format!("DB lock error: {}", e)))?;
            f(&conn)
        })
        .await
        .map_err(|e| StorageError::Backend(format!("DB task failed: {}", e)))?
    }
}

fn now_rfc3339() -> (DateTime<Utc>, String) {
    let now = Utc::now();
    // Truncate to the stored precision so the returned record equals a later read.
    let text = now.to_rfc3339_opts(SecondsFormat::Millis, true);
    let now = DateTime::parse_from_rfc3339(&text)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(now);
    (now, text)
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        external_id: row.get(1)?,
        username: row.get(2)?,
        name: row.get(3)?,
        email: row.get(4)?,
        avatar: row.get(5)?,
        created_at: parse_timestamp(row, 6)?,
        updated_at: parse_timestamp(row, 7)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        content: row.get(3)?,
        created_at: parse_timestamp(row, 4)?,
    })
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn create_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message, StorageError> {
        let sender_id = sender_id.to_string();
        let receiver_id = receiver_id.to_string();
        let content = content.trim().to_string();

        self.with_conn(move |conn| {
            let id = Uuid::now_v7().to_string();
            let (created_at, created_text) = now_rfc3339();

            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, sender_id, receiver_id, content, created_text],
            )?;

            Ok(Message {
                id,
                sender_id,
                receiver_id,
                content,
                created_at,
            })
        })
        .await
    }

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, StorageError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let user = conn
                .query_row(
                    &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                    rusqlite::params![id],
                    user_from_row,
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, StorageError> {
        let external_id = external_id.to_string();
        self.with_conn(move |conn| {
            let user = conn
                .query_row(
                    &format!("SELECT {} FROM users WHERE external_id = ?1", USER_COLUMNS),
                    rusqlite::params![external_id],
                    user_from_row,
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    async fn upsert_user(&self, profile: NewUser) -> Result<User, StorageError> {
        self.with_conn(move |conn| {
            let (_, now) = now_rfc3339();
            conn.execute(
                "INSERT INTO users (id, external_id, username, name, email, avatar, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT(external_id) DO UPDATE SET
                    username = excluded.username,
                    name = excluded.name,
                    email = excluded.email,
                    avatar = excluded.avatar,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    Uuid::now_v7().to_string(),
                    profile.external_id,
                    profile.username,
                    profile.name,
                    profile.email,
                    profile.avatar,
                    now,
                ],
            )?;

            let user = conn.query_row(
                &format!("SELECT {} FROM users WHERE external_id = ?1", USER_COLUMNS),
                rusqlite::params![profile.external_id],
                user_from_row,
            )?;
            Ok(user)
        })
        .await
    }

    async fn list_users_except(&self, user_id: &str) -> Result<Vec<User>, StorageError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users WHERE id != ?1 ORDER BY username ASC",
                USER_COLUMNS
            ))?;
            let users = stmt
                .query_map(rusqlite::params![user_id], user_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(users)
        })
        .await
    }

    async fn conversation(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<Message>, StorageError> {
        let user_a = user_a.to_string();
        let user_b = user_b.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, content, created_at
                 FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC, id ASC",
            )?;
            let messages = stmt
                .query_map(rusqlite::params![user_a, user_b], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_db;

    fn profile(external_id: &str, username: &str) -> NewUser {
        NewUser {
            external_id: external_id.to_string(),
            username: username.to_string(),
            name: None,
            email: None,
            avatar: None,
        }
    }

    fn store() -> SqliteStore {
        SqliteStore::new(init_memory_db().expect("in-memory db"))
    }

    #[tokio::test]
    async fn test_upsert_user_keeps_id_and_refreshes_profile() {
        let store = store();
        let first = store.upsert_user(profile("ext-alice", "alice")).await.unwrap();

        let mut updated = profile("ext-alice", "alice2");
        updated.name = Some("Alice".to_string());
        let second = store.upsert_user(updated).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.username, "alice2");
        assert_eq!(second.name.as_deref(), Some("Alice"));

        let found = store.find_user_by_external_id("ext-alice").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(first.id));
    }

    #[tokio::test]
    async fn test_create_message_trims_and_orders_conversation() {
        let store = store();
        let alice = store.upsert_user(profile("ext-a", "alice")).await.unwrap();
        let bob = store.upsert_user(profile("ext-b", "bob")).await.unwrap();

        let first = store.create_message(&alice.id, &bob.id, "  hi  ").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.create_message(&bob.id, &alice.id, "hey").await.unwrap();
        assert_eq!(first.content, "hi");

        let from_alice = store.conversation(&alice.id, &bob.id).await.unwrap();
        let from_bob = store.conversation(&bob.id, &alice.id).await.unwrap();
        assert_eq!(from_alice, vec![first.clone(), second.clone()]);
        assert_eq!(from_alice, from_bob);
    }

    #[tokio::test]
    async fn test_create_message_for_unknown_receiver_is_constraint_error() {
        let store = store();
        let alice = store.upsert_user(profile("ext-a", "alice")).await.unwrap();

        let err = store
            .create_message(&alice.id, "missing-user", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Constraint(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_list_users_excludes_caller() {
        let store = store();
        let alice = store.upsert_user(profile("ext-a", "alice")).await.unwrap();
        store.upsert_user(profile("ext-b", "bob")).await.unwrap();
        store.upsert_user(profile("ext-c", "carol")).await.unwrap();

        let others = store.list_users_except(&alice.id).await.unwrap();
        let names: Vec<_> = others.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["bob", "carol"]);
    }
}
