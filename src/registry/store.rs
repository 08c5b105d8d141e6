//! Key-Value Store
//!
//! The registry is written against [`Store`], a small set of string, set,
//! hash and counter operations plus an append-only message log. Each call is
//! atomic on its own; callers do no locking of their own.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{AnalyzerError, Result};

/// Messages kept in the log; older ones are discarded on publish
pub const MESSAGE_RETENTION: i64 = 10_000;

/// One entry of the store's message log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggedMessage {
    pub id: i64,
    pub topic: String,
    pub payload: String,
}

/// Shared key-value store backing the entity registry
pub trait Store: Send + Sync {
    /// Check the store is reachable
    fn ping(&self) -> Result<()>;

    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Increment an integer value, creating it at zero
    fn incr(&self, key: &str) -> Result<i64>;

    /// Merge fields into a hash; fields not named are left untouched
    fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()>;

    /// All fields of a hash; empty when the key does not exist
    fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>>;

    fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    /// Add a member, returning `true` if it was not already present
    fn sadd(&self, key: &str, member: &str) -> Result<bool>;

    fn sismember(&self, key: &str, member: &str) -> Result<bool>;

    fn smembers(&self, key: &str) -> Result<BTreeSet<String>>;

    /// Add `member` to `set_key` and, only when it was new, add `delta` to
    /// `field` of `hash_key`. Both happen or neither does.
    fn sadd_and_hincrby(
        &self,
        set_key: &str,
        member: &str,
        hash_key: &str,
        field: &str,
        delta: i64,
    ) -> Result<bool>;

    /// Keys starting with `prefix`, sorted
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Append to the message log, returning the new message id
    fn publish(&self, topic: &str, payload: &str) -> Result<i64>;

    /// Logged messages with an id above `after`, oldest first
    fn messages_after(&self, after: i64, limit: usize) -> Result<Vec<LoggedMessage>>;

    /// Id of the newest logged message, 0 when the log is empty
    fn last_message_id(&self) -> Result<i64>;
}

#[derive(Debug, Clone)]
enum Entry {
    Value(String),
    Set(BTreeSet<String>),
    Hash(BTreeMap<String, String>),
}

#[derive(Debug, Default)]
struct MessageLog {
    last_id: i64,
    messages: VecDeque<LoggedMessage>,
}

/// In-process store for single-process runs and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    log: RwLock<MessageLog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn wrong_type(key: &str) -> AnalyzerError {
    AnalyzerError::WrongType(key.to_string())
}

/// Current integer value of a hash field, 0 when absent
fn hash_counter(entries: &HashMap<String, Entry>, key: &str, field: &str) -> Result<i64> {
    match entries.get(key) {
        None => Ok(0),
        Some(Entry::Hash(hash)) => match hash.get(field) {
            Some(v) => v.parse().map_err(|_| wrong_type(key)),
            None => Ok(0),
        },
        Some(_) => Err(wrong_type(key)),
    }
}

impl Store for MemoryStore {
    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entries.read().get(key) {
            None => Ok(None),
            Some(Entry::Value(v)) => Ok(Some(v.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .insert(key.to_string(), Entry::Value(value.to_string()));
        Ok(())
    }

    fn incr(&self, key: &str) -> Result<i64> {
        let mut entries = self.entries.write();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Value("0".to_string()));

        match entry {
            Entry::Value(v) => {
                let next = v.parse::<i64>().map_err(|_| wrong_type(key))? + 1;
                *v = next.to_string();
                Ok(next)
            }
            _ => Err(wrong_type(key)),
        }
    }

    fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(BTreeMap::new()));

        match entry {
            Entry::Hash(hash) => {
                for (field, value) in fields {
                    hash.insert(field.to_string(), value.clone());
                }
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>> {
        match self.entries.read().get(key) {
            None => Ok(BTreeMap::new()),
            Some(Entry::Hash(hash)) => Ok(hash.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut entries = self.entries.write();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(BTreeMap::new()));

        match entry {
            Entry::Hash(hash) => {
                let current = match hash.get(field) {
                    Some(v) => v.parse::<i64>().map_err(|_| wrong_type(key))?,
                    None => 0,
                };
                let next = current + delta;
                hash.insert(field.to_string(), next.to_string());
                Ok(next)
            }
            _ => Err(wrong_type(key)),
        }
    }

    fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        let mut entries = self.entries.write();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Set(BTreeSet::new()));

        match entry {
            Entry::Set(set) => Ok(set.insert(member.to_string())),
            _ => Err(wrong_type(key)),
        }
    }

    fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        match self.entries.read().get(key) {
            None => Ok(false),
            Some(Entry::Set(set)) => Ok(set.contains(member)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn smembers(&self, key: &str) -> Result<BTreeSet<String>> {
        match self.entries.read().get(key) {
            None => Ok(BTreeSet::new()),
            Some(Entry::Set(set)) => Ok(set.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn sadd_and_hincrby(
        &self,
        set_key: &str,
        member: &str,
        hash_key: &str,
        field: &str,
        delta: i64,
    ) -> Result<bool> {
        let mut entries = self.entries.write();

        // Validate the counter before touching the set
        let current = hash_counter(&entries, hash_key, field)?;
        let added = match entries
            .entry(set_key.to_string())
            .or_insert_with(|| Entry::Set(BTreeSet::new()))
        {
            Entry::Set(set) => set.insert(member.to_string()),
            _ => return Err(wrong_type(set_key)),
        };

        if added {
            if let Entry::Hash(hash) = entries
                .entry(hash_key.to_string())
                .or_insert_with(|| Entry::Hash(BTreeMap::new()))
            {
                hash.insert(field.to_string(), (current + delta).to_string());
            }
        }
        Ok(added)
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<i64> {
        let mut log = self.log.write();
        log.last_id += 1;
        let id = log.last_id;
        log.messages.push_back(LoggedMessage {
            id,
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        while log.messages.len() as i64 > MESSAGE_RETENTION {
            log.messages.pop_front();
        }
        Ok(id)
    }

    fn messages_after(&self, after: i64, limit: usize) -> Result<Vec<LoggedMessage>> {
        Ok(self
            .log
            .read()
            .messages
            .iter()
            .filter(|m| m.id > after)
            .take(limit)
            .cloned()
            .collect())
    }

    fn last_message_id(&self) -> Result<i64> {
        Ok(self.log.read().last_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_merge_keeps_other_fields() {
        let store = MemoryStore::new();
        store.hset("ap", &[("ssid", "a".into()), ("target", "True".into())]).unwrap();
        store.hset("ap", &[("ssid", "b".into())]).unwrap();

        let fields = store.hgetall("ap").unwrap();
        assert_eq!(fields.get("ssid").map(String::as_str), Some("b"));
        assert_eq!(fields.get("target").map(String::as_str), Some("True"));
    }

    #[test]
    fn test_sadd_reports_new_members() {
        let store = MemoryStore::new();
        assert!(store.sadd("s", "x").unwrap());
        assert!(!store.sadd("s", "x").unwrap());
        assert!(store.sismember("s", "x").unwrap());
        assert!(!store.sismember("missing", "x").unwrap());
        assert_eq!(store.smembers("s").unwrap().len(), 1);
    }

    #[test]
    fn test_counters() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("c").unwrap(), 1);
        assert_eq!(store.incr("c").unwrap(), 2);
        assert_eq!(store.hincrby("stats", "handshakes", 1).unwrap(), 1);
        assert_eq!(store.hincrby("stats", "handshakes", 2).unwrap(), 3);
    }

    #[test]
    fn test_wrong_type() {
        let store = MemoryStore::new();
        store.set("flag", "True").unwrap();
        assert!(matches!(store.sadd("flag", "x"), Err(AnalyzerError::WrongType(_))));
        assert!(store.hgetall("missing").unwrap().is_empty());
    }

    #[test]
    fn test_sadd_and_hincrby_counts_new_members_once() {
        let store = MemoryStore::new();
        assert!(store.sadd_and_hincrby("seen", "a", "stats", "n", 1).unwrap());
        assert!(!store.sadd_and_hincrby("seen", "a", "stats", "n", 1).unwrap());
        assert!(store.sadd_and_hincrby("seen", "b", "stats", "n", 1).unwrap());
        assert_eq!(store.hgetall("stats").unwrap()["n"], "2");
    }

    #[test]
    fn test_sadd_and_hincrby_leaves_set_alone_on_bad_counter() {
        let store = MemoryStore::new();
        store.hset("stats", &[("n", "many".into())]).unwrap();
        assert!(matches!(
            store.sadd_and_hincrby("seen", "a", "stats", "n", 1),
            Err(AnalyzerError::WrongType(_))
        ));
        assert!(!store.sismember("seen", "a").unwrap());
    }

    #[test]
    fn test_message_log() {
        let store = MemoryStore::new();
        assert_eq!(store.last_message_id().unwrap(), 0);
        assert_eq!(store.publish("target", "a").unwrap(), 1);
        assert_eq!(store.publish("scan_open", "b").unwrap(), 2);

        let after_first = store.messages_after(1, 10).unwrap();
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].topic, "scan_open");
        assert_eq!(store.messages_after(0, 1).unwrap()[0].payload, "a");
        assert_eq!(store.last_message_id().unwrap(), 2);
    }

    #[test]
    fn test_keys_by_prefix() {
        let store = MemoryStore::new();
        store.hset("access_point_b", &[("ssid", "b".into())]).unwrap();
        store.hset("access_point_a", &[("ssid", "a".into())]).unwrap();
        store.sadd("clients_a", "x").unwrap();
        assert_eq!(store.keys("access_point_").unwrap(), vec!["access_point_a", "access_point_b"]);
    }
}
