pub mod cursor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;

/// Seconds between the Unix epoch and 2001-01-01T00:00:00Z, where Messages
/// timestamps start.
pub const MESSAGES_EPOCH_OFFSET_SECS: i64 = 978_307_200;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Convert a wall-clock time into Messages `date` units (nanoseconds since 2001).
pub fn to_messages_epoch(time: DateTime<Utc>) -> i64 {
    (time.timestamp() - MESSAGES_EPOCH_OFFSET_SECS)
        .saturating_mul(NANOS_PER_SEC)
        .saturating_add(i64::from(time.timestamp_subsec_nanos()))
}

pub fn messages_epoch_now() -> i64 {
    to_messages_epoch(Utc::now())
}

pub fn from_messages_epoch(timestamp: i64) -> Option<DateTime<Utc>> {
    let secs = timestamp.div_euclid(NANOS_PER_SEC) + MESSAGES_EPOCH_OFFSET_SECS;
    let nanos = timestamp.rem_euclid(NANOS_PER_SEC) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// A row of the Messages `message` table, joined with its sender handle.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub rowid: i64,
    pub guid: String,
    pub text: String,
    pub handle_id: i64,
    /// Nanoseconds since 2001-01-01. Non-decreasing, not unique.
    pub date: i64,
    pub is_from_me: bool,
    pub service: Option<String>,
    /// Phone number or email resolved from the `handle` table
    pub handle: Option<String>,
}

/// Read-only source of trigger messages.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Self-sent trigger messages with `date > since`, oldest first.
    async fn fetch_candidates(&self, since: i64) -> Result<Vec<Message>, StoreError>;
}

const CANDIDATES_SQL: &str = "
    SELECT m.ROWID, m.guid, m.text, m.handle_id, m.date, m.is_from_me, m.service, h.id
    FROM message m
    LEFT JOIN handle h ON m.handle_id = h.ROWID
    WHERE m.date > ?1
      AND m.text IS NOT NULL
      AND m.text != ''
      AND m.is_from_me = 1
      AND substr(m.text, 1, length(?2)) = ?2
      AND substr(m.text, 1, length(?3)) != ?3
    ORDER BY m.date ASC, m.ROWID ASC";

/// Read a text column, replacing invalid UTF-8 with U+FFFD.
///
/// Messages does not guarantee well-formed UTF-8, and one bad row must not
/// fail the whole query.
fn lossy_text(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Null => None,
        ValueRef::Integer(n) => Some(n.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
    })
}

/// Read-only handle on the Messages `chat.db`.
#[derive(Clone)]
pub struct ChatDb {
    conn: Arc<Mutex<Connection>>,
    trigger: String,
    reply_emblem: String,
}

impl ChatDb {
    /// Open the database read-only and check that `message` is queryable.
    ///
    /// Fails when the file is missing or unreadable, which on macOS usually
    /// means the terminal lacks Full Disk Access.
    pub fn open(path: &Path, trigger: &str, reply_emblem: &str) -> Result<Self, StoreError> {
        let unavailable = |reason: String| StoreError::Unavailable {
            path: path.to_path_buf(),
            reason,
        };

        if !path.exists() {
            return Err(unavailable("database file not found".to_string()));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| unavailable(e.to_string()))?;

        let count = Self::count_all(&conn).map_err(|e| unavailable(e.to_string()))?;

        info!(
            "Connected to message store at {} ({} messages)",
            path.display(),
            count
        );
        Ok(Self::from_connection(conn, trigger, reply_emblem))
    }

    /// Wrap an already open connection.
    pub fn from_connection(conn: Connection, trigger: &str, reply_emblem: &str) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            trigger: trigger.to_string(),
            reply_emblem: reply_emblem.to_string(),
        }
    }

    fn count_all(conn: &Connection) -> rusqlite::Result<i64> {
        conn.query_row("SELECT COUNT(*) FROM message", [], |row| row.get(0))
    }

    /// Total number of rows in `message`.
    pub async fn count_messages(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock().await;
        Ok(Self::count_all(&conn)?)
    }
}

#[async_trait]
impl MessageSource for ChatDb {
    async fn fetch_candidates(&self, since: i64) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(CANDIDATES_SQL)?;
        let messages = stmt
            .query_map(
                rusqlite::params![since, &self.trigger, &self.reply_emblem],
                |row| {
                    Ok(Message {
                        rowid: row.get(0)?,
                        guid: lossy_text(row, 1)?.unwrap_or_default(),
                        text: lossy_text(row, 2)?.unwrap_or_default(),
                        handle_id: row.get(3)?,
                        date: row.get(4)?,
                        is_from_me: row.get(5)?,
                        service: lossy_text(row, 6)?,
                        handle: lossy_text(row, 7)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        debug!("Fetched {} candidate(s) since {}", messages.len(), since);
        Ok(messages)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    /// The subset of the Messages schema the relay reads.
    pub(crate) const SCHEMA: &str = "
        CREATE TABLE handle (
            ROWID INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL,
            service TEXT NOT NULL
        );
        CREATE TABLE message (
            ROWID INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT UNIQUE NOT NULL,
            text TEXT,
            handle_id INTEGER DEFAULT 0,
            service TEXT,
            date INTEGER,
            is_from_me INTEGER DEFAULT 0
        );
    ";

    pub(crate) fn insert(
        conn: &Connection,
        guid: &str,
        text: Option<&str>,
        date: i64,
        from_me: bool,
    ) {
        conn.execute(
            "INSERT INTO message (guid, text, handle_id, service, date, is_from_me)
             VALUES (?1, ?2, 1, 'iMessage', ?3, ?4)",
            rusqlite::params![guid, text, date, from_me],
        )
        .unwrap();
    }

    /// On-disk fixture: returns the temp dir (keep it alive) and a writer connection.
    pub(crate) fn fixture() -> (tempfile::TempDir, std::path::PathBuf, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn.execute(
            "INSERT INTO handle (id, service) VALUES ('me@example.com', 'iMessage')",
            [],
        )
        .unwrap();
        (dir, path, conn)
    }

    #[test]
    fn test_epoch_conversion() {
        let t = Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 1).unwrap();
        assert_eq!(to_messages_epoch(t), 1_000_000_000);
        assert_eq!(from_messages_epoch(1_000_000_000), Some(t));
    }

    #[test]
    fn test_open_missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChatDb::open(&dir.path().join("absent.db"), "@agent", "🤖")
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Unavailable { .. }));
    }

    #[test]
    fn test_open_without_message_table_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE other (x INTEGER);")
            .unwrap();

        let err = ChatDb::open(&path, "@agent", "🤖").err().unwrap();
        assert!(matches!(err, StoreError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_fetch_filters_and_orders() {
        let (_dir, path, conn) = fixture();
        insert(&conn, "late", Some("@agent second"), 200, true);
        insert(&conn, "early", Some("@agent first"), 100, true);
        insert(&conn, "received", Some("@agent from someone else"), 150, false);
        insert(&conn, "plain", Some("just chatting"), 160, true);
        insert(&conn, "mid", Some("hello @agent"), 170, true);
        insert(&conn, "case", Some("@Agent shouting"), 180, true);
        insert(&conn, "null", None, 190, true);
        insert(&conn, "old", Some("@agent already seen"), 50, true);

        let db = ChatDb::open(&path, "@agent", "🤖").unwrap();
        let found = db.fetch_candidates(50).await.unwrap();

        let guids: Vec<_> = found.iter().map(|m| m.guid.as_str()).collect();
        assert_eq!(guids, vec!["early", "late"]);
        assert_eq!(found[0].handle.as_deref(), Some("me@example.com"));
        assert!(found[0].is_from_me);
    }

    #[tokio::test]
    async fn test_since_is_strict() {
        let (_dir, path, conn) = fixture();
        insert(&conn, "a", Some("@agent a"), 100, true);
        insert(&conn, "b", Some("@agent b"), 100, true);
        insert(&conn, "c", Some("@agent c"), 101, true);

        let db = ChatDb::open(&path, "@agent", "🤖").unwrap();
        let found = db.fetch_candidates(100).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].guid, "c");
    }

    #[tokio::test]
    async fn test_replies_are_never_candidates() {
        let (_dir, path, conn) = fixture();
        insert(&conn, "reply", Some("🤖 pong"), 100, true);
        insert(&conn, "failure", Some("🤖 ❌ Error: boom"), 101, true);

        let db = ChatDb::open(&path, "@agent", "🤖").unwrap();
        assert!(db.fetch_candidates(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_emblem_excluded_even_when_trigger_matches() {
        let (_dir, path, conn) = fixture();
        insert(&conn, "loop", Some("!bot reply text"), 100, true);
        insert(&conn, "cmd", Some("!do something"), 101, true);

        let db = ChatDb::open(&path, "!", "!bot").unwrap();
        let found = db.fetch_candidates(0).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].guid, "cmd");
    }

    #[tokio::test]
    async fn test_invalid_utf8_text_does_not_fail_the_query() {
        let (_dir, path, conn) = fixture();
        // "@agent " followed by a lone 0xFF byte
        conn.execute(
            "INSERT INTO message (guid, text, handle_id, service, date, is_from_me)
             VALUES ('bad', CAST(X'406167656E7420FF' AS TEXT), 1, 'iMessage', 100, 1)",
            [],
        )
        .unwrap();
        insert(&conn, "good", Some("@agent ping"), 200, true);

        let db = ChatDb::open(&path, "@agent", "🤖").unwrap();
        let found = db.fetch_candidates(0).await.unwrap();

        let guids: Vec<_> = found.iter().map(|m| m.guid.as_str()).collect();
        assert_eq!(guids, vec!["bad", "good"]);
        assert_eq!(found[0].text, "@agent \u{FFFD}");
        assert_eq!(found[1].text, "@agent ping");
    }

    #[tokio::test]
    async fn test_count_messages() {
        let (_dir, path, conn) = fixture();
        insert(&conn, "a", Some("hi"), 1, false);
        insert(&conn, "b", Some("@agent x"), 2, true);

        let db = ChatDb::open(&path, "@agent", "🤖").unwrap();
        assert_eq!(db.count_messages().await.unwrap(), 2);
    }
}
