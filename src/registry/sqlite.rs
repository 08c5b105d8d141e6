//! SQLite-backed store
//!
//! Lets several analyzer processes (one per interface) and the CLI share the
//! same registry through a single database file.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::debug;

use super::store::{LoggedMessage, Store, MESSAGE_RETENTION};
use crate::error::{AnalyzerError, Result};

const KIND_VALUE: &str = "value";
const KIND_SET: &str = "set";
const KIND_HASH: &str = "hash";

/// Thread-safe store over one SQLite connection
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at the given path
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("Opened store {} (journal_mode={})", path.as_ref().display(), mode);

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- One row per key, recording which structure it holds
            CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                value TEXT
            );

            CREATE TABLE IF NOT EXISTS set_members (
                key TEXT NOT NULL,
                member TEXT NOT NULL,
                PRIMARY KEY (key, member)
            );

            CREATE TABLE IF NOT EXISTS hash_fields (
                key TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (key, field)
            );

            -- Published notifications, read by `watch`
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                topic TEXT NOT NULL,
                payload TEXT NOT NULL,
                published_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        Ok(())
    }
}

/// Start a write transaction holding the database write lock from the
/// outset, so a concurrent writer makes it wait out the busy timeout rather
/// than fail on lock upgrade
fn write_tx(conn: &mut Connection) -> Result<Transaction<'_>> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

fn kind_of(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT kind FROM entries WHERE key = ?1", params![key], |row| row.get(0))
        .optional()?)
}

/// Fail unless `key` is absent or already holds `kind`
fn expect_kind(conn: &Connection, key: &str, kind: &str) -> Result<bool> {
    match kind_of(conn, key)? {
        None => Ok(false),
        Some(k) if k == kind => Ok(true),
        Some(_) => Err(AnalyzerError::WrongType(key.to_string())),
    }
}

/// Claim `key` for `kind`, creating the entry row when needed
fn claim(tx: &Transaction<'_>, key: &str, kind: &str) -> Result<()> {
    if !expect_kind(tx, key, kind)? {
        tx.execute(
            "INSERT INTO entries (key, kind, value) VALUES (?1, ?2, NULL)",
            params![key, kind],
        )?;
    }
    Ok(())
}

fn sadd_tx(tx: &Transaction<'_>, key: &str, member: &str) -> Result<bool> {
    claim(tx, key, KIND_SET)?;
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO set_members (key, member) VALUES (?1, ?2)",
        params![key, member],
    )?;
    Ok(inserted > 0)
}

fn hincrby_tx(tx: &Transaction<'_>, key: &str, field: &str, delta: i64) -> Result<i64> {
    claim(tx, key, KIND_HASH)?;

    let current: Option<String> = tx
        .query_row(
            "SELECT value FROM hash_fields WHERE key = ?1 AND field = ?2",
            params![key, field],
            |row| row.get(0),
        )
        .optional()?;
    let current: i64 = match current {
        Some(v) => v
            .parse()
            .map_err(|_| AnalyzerError::WrongType(key.to_string()))?,
        None => 0,
    };

    let next = current + delta;
    tx.execute(
        r#"
        INSERT INTO hash_fields (key, field, value) VALUES (?1, ?2, ?3)
        ON CONFLICT(key, field) DO UPDATE SET value = excluded.value
        "#,
        params![key, field, next.to_string()],
    )?;
    Ok(next)
}

impl Store for SqliteStore {
    fn ping(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        if !expect_kind(&conn, key, KIND_VALUE)? {
            return Ok(None);
        }
        Ok(conn.query_row("SELECT value FROM entries WHERE key = ?1", params![key], |row| {
            row.get(0)
        })?)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = write_tx(&mut conn)?;

        // Plain values overwrite whatever the key held before
        tx.execute("DELETE FROM set_members WHERE key = ?1", params![key])?;
        tx.execute("DELETE FROM hash_fields WHERE key = ?1", params![key])?;
        tx.execute(
            r#"
            INSERT INTO entries (key, kind, value) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET kind = excluded.kind, value = excluded.value
            "#,
            params![key, KIND_VALUE, value],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = write_tx(&mut conn)?;

        let current: i64 = if expect_kind(&tx, key, KIND_VALUE)? {
            let raw: Option<String> = tx.query_row(
                "SELECT value FROM entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )?;
            match raw {
                Some(v) => v
                    .parse()
                    .map_err(|_| AnalyzerError::WrongType(key.to_string()))?,
                None => 0,
            }
        } else {
            0
        };

        let next = current + 1;
        tx.execute(
            r#"
            INSERT INTO entries (key, kind, value) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![key, KIND_VALUE, next.to_string()],
        )?;

        tx.commit()?;
        Ok(next)
    }

    fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = write_tx(&mut conn)?;
        claim(&tx, key, KIND_HASH)?;

        {
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT INTO hash_fields (key, field, value) VALUES (?1, ?2, ?3)
                ON CONFLICT(key, field) DO UPDATE SET value = excluded.value
                "#,
            )?;
            for (field, value) in fields {
                stmt.execute(params![key, field, value])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>> {
        let conn = self.conn.lock();
        if !expect_kind(&conn, key, KIND_HASH)? {
            return Ok(BTreeMap::new());
        }

        let mut stmt = conn.prepare_cached("SELECT field, value FROM hash_fields WHERE key = ?1")?;
        let rows = stmt.query_map(params![key], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut fields = BTreeMap::new();
        for row in rows {
            let (field, value) = row?;
            fields.insert(field, value);
        }
        Ok(fields)
    }

    fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = write_tx(&mut conn)?;
        let next = hincrby_tx(&tx, key, field, delta)?;
        tx.commit()?;
        Ok(next)
    }

    fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = write_tx(&mut conn)?;
        let inserted = sadd_tx(&tx, key, member)?;
        tx.commit()?;
        Ok(inserted)
    }

    fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let conn = self.conn.lock();
        if !expect_kind(&conn, key, KIND_SET)? {
            return Ok(false);
        }

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM set_members WHERE key = ?1 AND member = ?2",
            params![key, member],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn smembers(&self, key: &str) -> Result<BTreeSet<String>> {
        let conn = self.conn.lock();
        if !expect_kind(&conn, key, KIND_SET)? {
            return Ok(BTreeSet::new());
        }

        let mut stmt = conn.prepare_cached("SELECT member FROM set_members WHERE key = ?1")?;
        let rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;

        let mut members = BTreeSet::new();
        for row in rows {
            members.insert(row?);
        }
        Ok(members)
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();

        // LIKE would treat the '_' in key names as a wildcard
        let mut stmt = conn.prepare_cached(
            "SELECT key FROM entries WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![prefix], |row| row.get::<_, String>(0))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    fn sadd_and_hincrby(
        &self,
        set_key: &str,
        member: &str,
        hash_key: &str,
        field: &str,
        delta: i64,
    ) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = write_tx(&mut conn)?;
        let added = sadd_tx(&tx, set_key, member)?;
        if added {
            hincrby_tx(&tx, hash_key, field, delta)?;
        }
        tx.commit()?;
        Ok(added)
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = write_tx(&mut conn)?;
        tx.execute(
            "INSERT INTO messages (topic, payload) VALUES (?1, ?2)",
            params![topic, payload],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "DELETE FROM messages WHERE id <= ?1",
            params![id - MESSAGE_RETENTION],
        )?;
        tx.commit()?;
        Ok(id)
    }

    fn messages_after(&self, after: i64, limit: usize) -> Result<Vec<LoggedMessage>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, topic, payload FROM messages WHERE id > ?1 ORDER BY id LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![after, limit as i64], |row| {
            Ok(LoggedMessage {
                id: row.get(0)?,
                topic: row.get(1)?,
                payload: row.get(2)?,
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    fn last_message_id(&self) -> Result<i64> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COALESCE(MAX(id), 0) FROM messages", [], |row| row.get(0))?)
    }
}
