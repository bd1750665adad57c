//! In-Memory Snapshot Backend
//!
//! Process-local stand-in for Redis, selected with `CACHE_URI=memory://`
//! and used by the test suite. Mirrors the Redis semantics the repository
//! relies on: bounded lists with the newest entry first, per-key expiry
//! reset on every write, and cursor based scans with Redis glob patterns.
//!
//! Expiry uses the Tokio clock so paused-time tests can advance past a TTL.
//!
//! Scan cursors are insertion sequence numbers rather than positions, so a
//! key that expires between pages never shifts the keys after it.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use glob::Pattern;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::application::ports::{BackendError, ScanPage, SnapshotBackend};

#[derive(Debug)]
struct Entry {
    seq: u64,
    values: VecDeque<String>,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
    /// Insertion sequence to key; scans walk this in order.
    order: BTreeMap<u64, String>,
    last_seq: u64,
}

impl Keyspace {
    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.order.remove(&entry.seq);
        }
    }

    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.remove(&key);
        }
    }
}

/// Snapshot backend held in process memory.
#[derive(Debug, Default)]
pub struct InMemorySnapshotBackend {
    keyspace: Mutex<Keyspace>,
}

impl InMemorySnapshotBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.keyspace
            .lock()
            .entries
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }
}

#[async_trait]
impl SnapshotBackend for InMemorySnapshotBackend {
    async fn push_bounded(
        &self,
        key: &str,
        value: String,
        max_len: usize,
        ttl: Duration,
    ) -> Result<(), BackendError> {
        let now = Instant::now();
        let mut keyspace = self.keyspace.lock();

        if keyspace.entries.get(key).is_some_and(|e| !e.is_live(now)) {
            keyspace.remove(key);
        }
        if !keyspace.entries.contains_key(key) {
            keyspace.last_seq += 1;
            let seq = keyspace.last_seq;
            keyspace.order.insert(seq, key.to_string());
            keyspace.entries.insert(
                key.to_string(),
                Entry {
                    seq,
                    values: VecDeque::new(),
                    expires_at: now,
                },
            );
        }

        if let Some(entry) = keyspace.entries.get_mut(key) {
            entry.values.push_front(value);
            entry.values.truncate(max_len);
            entry.expires_at = now + ttl;
        }
        Ok(())
    }

    async fn range(&self, key: &str, max_len: usize) -> Result<Vec<String>, BackendError> {
        let now = Instant::now();
        let mut keyspace = self.keyspace.lock();

        match keyspace.entries.get(key) {
            Some(entry) if entry.is_live(now) => {
                Ok(entry.values.iter().take(max_len).cloned().collect())
            }
            Some(_) => {
                keyspace.remove(key);
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage, BackendError> {
        let matcher = Pattern::new(pattern).map_err(|e| BackendError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        let now = Instant::now();
        let mut keyspace = self.keyspace.lock();
        keyspace.purge_expired(now);

        let page: Vec<(u64, &String)> = keyspace
            .order
            .range(cursor..)
            .take(count.max(1))
            .map(|(seq, key)| (*seq, key))
            .collect();

        let cursor = match page.last() {
            Some((seq, _)) if keyspace.order.range(seq + 1..).next().is_some() => seq + 1,
            _ => 0,
        };
        let keys = page
            .into_iter()
            .filter(|(_, key)| matcher.matches(key))
            .map(|(_, key)| key.clone())
            .collect();
        Ok(ScanPage { cursor, keys })
    }

    async fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    async fn scan_all(backend: &InMemorySnapshotBackend, pattern: &str, count: usize) -> Vec<String> {
        let mut cursor = 0;
        let mut keys = Vec::new();
        loop {
            let page = backend.scan(cursor, pattern, count).await.unwrap();
            keys.extend(page.keys);
            if page.cursor == 0 {
                return keys;
            }
            cursor = page.cursor;
        }
    }

    #[tokio::test]
    async fn push_keeps_newest_first_and_bounded() {
        let backend = InMemorySnapshotBackend::new();
        for i in 0..5 {
            backend
                .push_bounded("market:13:INDEX_LTP", i.to_string(), 3, TTL)
                .await
                .unwrap();
        }

        let values = backend.range("market:13:INDEX_LTP", 25).await.unwrap();
        assert_eq!(values, vec!["4", "3", "2"]);
        assert_eq!(backend.range("market:13:INDEX_LTP", 1).await.unwrap(), vec!["4"]);
    }

    #[tokio::test]
    async fn missing_key_is_empty() {
        let backend = InMemorySnapshotBackend::new();
        assert!(backend.range("market:1:LTP", 25).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn keys_expire_after_ttl() {
        let backend = InMemorySnapshotBackend::new();
        backend
            .push_bounded("market:13:INDEX_LTP", "a".into(), 25, Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(backend.key_count(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(backend.key_count(), 0);
        assert!(backend.range("market:13:INDEX_LTP", 25).await.unwrap().is_empty());
        assert!(scan_all(&backend, "market:*", 10).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn write_refreshes_ttl_and_expired_list_restarts() {
        let backend = InMemorySnapshotBackend::new();
        let key = "market:13:INDEX_LTP";
        let ttl = Duration::from_secs(10);

        backend.push_bounded(key, "a".into(), 25, ttl).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        backend.push_bounded(key, "b".into(), 25, ttl).await.unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(backend.range(key, 25).await.unwrap(), vec!["b", "a"]);

        tokio::time::advance(Duration::from_secs(3)).await;
        backend.push_bounded(key, "c".into(), 25, ttl).await.unwrap();
        assert_eq!(backend.range(key, 25).await.unwrap(), vec!["c"]);
    }

    #[tokio::test]
    async fn scan_pages_through_matching_keys() {
        let backend = InMemorySnapshotBackend::new();
        for id in 0..7 {
            backend
                .push_bounded(&format!("market:{id}:LTP"), "x".into(), 25, TTL)
                .await
                .unwrap();
        }
        backend.push_bounded("other:1:LTP", "x".into(), 25, TTL).await.unwrap();

        let mut keys = scan_all(&backend, "market:*:LTP", 3).await;
        keys.sort();
        assert_eq!(keys.len(), 7);
        assert!(keys.iter().all(|k| k.starts_with("market:")));
    }

    #[tokio::test(start_paused = true)]
    async fn scan_keeps_live_keys_when_earlier_key_expires_mid_scan() {
        let backend = InMemorySnapshotBackend::new();
        backend
            .push_bounded("market:a:LTP", "x".into(), 25, Duration::from_secs(5))
            .await
            .unwrap();
        for id in ["b", "c", "d"] {
            backend
                .push_bounded(&format!("market:{id}:LTP"), "x".into(), 25, TTL)
                .await
                .unwrap();
        }

        let first = backend.scan(0, "market:*", 2).await.unwrap();
        assert_eq!(first.keys, vec!["market:a:LTP", "market:b:LTP"]);
        assert_ne!(first.cursor, 0);

        tokio::time::advance(Duration::from_secs(6)).await;

        let second = backend.scan(first.cursor, "market:*", 2).await.unwrap();
        assert_eq!(second.keys, vec!["market:c:LTP", "market:d:LTP"]);
        assert_eq!(second.cursor, 0);
    }

    #[tokio::test]
    async fn scan_rejects_invalid_pattern() {
        let backend = InMemorySnapshotBackend::new();
        let err = backend.scan(0, "market:[", 10).await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidPattern { .. }));
    }
}
