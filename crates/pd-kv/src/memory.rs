//! In-process [`KvClient`] fake.
//!
//! Behaviorally equivalent to the Redis backing for everything the
//! workspace relies on: per-key expiry (driven by an injected [`Clock`]),
//! cursor-paged scans, and an atomic dual-bucket consume executed under a
//! single lock. Used by unit and scenario tests across the workspace.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pd_domain::Clock;

use crate::{BucketSpec, KeyTtl, KvClient};

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

pub struct MemoryKv {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        MemoryKv {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live (unexpired) keys. Test helper.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let entries = self.entries.lock().expect("kv poisoned");
        entries.values().filter(|e| !expired(e, now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self, key: &str) -> Option<Entry> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().expect("kv poisoned");
        match entries.get(key) {
            Some(e) if expired(e, now) => {
                entries.remove(key);
                None
            }
            Some(e) => Some(e.clone()),
            None => None,
        }
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.map(|t| {
            self.clock.now() + chrono::Duration::from_std(t).unwrap_or(chrono::Duration::MAX)
        })
    }
}

fn expired(entry: &Entry, now: DateTime<Utc>) -> bool {
    matches!(entry.expires_at, Some(at) if at <= now)
}

/// Glob match supporting only `*` (any run of characters), which is the
/// only wildcard the cache's key patterns use.
fn glob_match(pattern: &str, input: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == input,
        Some((prefix, rest)) => {
            let Some(after) = input.strip_prefix(prefix) else {
                return false;
            };
            if rest.is_empty() {
                return true;
            }
            let mut starts: Vec<usize> = after.char_indices().map(|(i, _)| i).collect();
            starts.push(after.len());
            starts.into_iter().any(|i| glob_match(rest, &after[i..]))
        }
    }
}

#[async_trait]
impl KvClient for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read(key).map(|e| e.value))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = self.expiry(ttl);
        let mut entries = self.entries.lock().expect("kv poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.lock().expect("kv poisoned").remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read(key).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let now = self.clock.now();
        Ok(match self.read(key) {
            None => KeyTtl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => {
                let secs = at.signed_duration_since(now).num_seconds().max(0);
                KeyTtl::Expires(secs as u64)
            }
        })
    }

    async fn scan_page(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> Result<(u64, Vec<String>)> {
        let now = self.clock.now();
        let entries = self.entries.lock().expect("kv poisoned");
        // Positional cursor over the sorted live keyspace. Redis cursors are
        // opaque; sorted order keeps the fake's pages stable across calls.
        let mut keys: Vec<&String> = entries
            .iter()
            .filter(|(_, e)| !expired(e, now))
            .map(|(k, _)| k)
            .collect();
        keys.sort();

        let start = cursor as usize;
        let page: Vec<String> = keys
            .iter()
            .skip(start)
            .take(count.max(1))
            .filter(|k| glob_match(pattern, k))
            .map(|k| k.to_string())
            .collect();

        let consumed = start + count.max(1);
        let next = if consumed >= keys.len() {
            0
        } else {
            consumed as u64
        };
        Ok((next, page))
    }

    async fn consume_token_pair(
        &self,
        minute: BucketSpec<'_>,
        day: BucketSpec<'_>,
    ) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().expect("kv poisoned");

        let read_count = |entries: &HashMap<String, Entry>, spec: &BucketSpec<'_>| -> u32 {
            match entries.get(spec.key) {
                Some(e) if !expired(e, now) => e.value.parse().unwrap_or(spec.limit),
                _ => spec.limit,
            }
        };

        let minute_tokens = read_count(&entries, &minute);
        let day_tokens = read_count(&entries, &day);
        if minute_tokens == 0 || day_tokens == 0 {
            return Ok(false);
        }

        for (spec, tokens) in [(&minute, minute_tokens), (&day, day_tokens)] {
            entries.insert(
                spec.key.to_string(),
                Entry {
                    value: (tokens - 1).to_string(),
                    expires_at: Some(
                        now + chrono::Duration::from_std(spec.window)
                            .unwrap_or(chrono::Duration::MAX),
                    ),
                },
            );
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pd_domain::FixedClock;

    fn kv() -> (Arc<FixedClock>, MemoryKv) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 1, 12, 15, 0, 0).unwrap(),
        ));
        let kv = MemoryKv::new(clock.clone());
        (clock, kv)
    }

    #[tokio::test]
    async fn set_get_roundtrip_and_delete() {
        let (_, kv) = kv();
        kv.set_ex("a", "1", None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));
        assert!(kv.exists("a").await.unwrap());
        kv.del("a").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entries_expire_with_the_clock() {
        let (clock, kv) = kv();
        kv.set_ex("a", "1", Some(Duration::from_secs(60))).await.unwrap();
        assert_eq!(kv.ttl("a").await.unwrap(), KeyTtl::Expires(60));

        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(kv.get("a").await.unwrap(), None);
        assert_eq!(kv.ttl("a").await.unwrap(), KeyTtl::Missing);
    }

    #[tokio::test]
    async fn ttl_distinguishes_persistent_keys() {
        let (_, kv) = kv();
        kv.set_ex("p", "1", None).await.unwrap();
        assert_eq!(kv.ttl("p").await.unwrap(), KeyTtl::Persistent);
        assert_eq!(kv.ttl("missing").await.unwrap(), KeyTtl::Missing);
    }

    #[tokio::test]
    async fn scan_pages_cover_the_keyspace_once() {
        let (_, kv) = kv();
        for i in 0..7 {
            kv.set_ex(&format!("p:T:history:k{i}"), "[]", None)
                .await
                .unwrap();
        }
        kv.set_ex("other", "x", None).await.unwrap();

        let mut cursor = 0;
        let mut found = Vec::new();
        loop {
            let (next, keys) = kv.scan_page("p:T:history:*", cursor, 3).await.unwrap();
            found.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        found.sort();
        assert_eq!(found.len(), 7);
        assert!(found.iter().all(|k| k.starts_with("p:T:history:")));
    }

    #[test]
    fn glob_star_semantics() {
        assert!(glob_match("p:AAPL:history:*:*:1day", "p:AAPL:history:2026-01-01:2026-01-31:1day"));
        assert!(!glob_match("p:AAPL:history:*:*:1day", "p:AAPL:history:2026-01-01:2026-01-31:5min"));
        assert!(glob_match("abc", "abc"));
        assert!(!glob_match("abc", "abcd"));
        assert!(glob_match("a*", "abcd"));
        assert!(!glob_match("a*c", "abcx"));
        assert!(glob_match("a*c", "acbc"));
    }

    #[tokio::test]
    async fn consume_pair_defaults_to_full_and_refreshes_ttl() {
        let (_, kv) = kv();
        let minute = BucketSpec { key: "rl:minute", limit: 2, window: Duration::from_secs(60) };
        let day = BucketSpec { key: "rl:day", limit: 500, window: Duration::from_secs(86_400) };

        assert!(kv.consume_token_pair(minute, day).await.unwrap());
        assert_eq!(kv.get("rl:minute").await.unwrap().as_deref(), Some("1"));
        assert_eq!(kv.get("rl:day").await.unwrap().as_deref(), Some("499"));
        assert_eq!(kv.ttl("rl:minute").await.unwrap(), KeyTtl::Expires(60));

        assert!(kv.consume_token_pair(minute, day).await.unwrap());
        // Minute bucket now empty; nothing is decremented on refusal.
        assert!(!kv.consume_token_pair(minute, day).await.unwrap());
        assert_eq!(kv.get("rl:minute").await.unwrap().as_deref(), Some("0"));
        assert_eq!(kv.get("rl:day").await.unwrap().as_deref(), Some("498"));
    }

    #[tokio::test]
    async fn consume_pair_refills_after_window_expiry() {
        let (clock, kv) = kv();
        let minute = BucketSpec { key: "rl:minute", limit: 1, window: Duration::from_secs(60) };
        let day = BucketSpec { key: "rl:day", limit: 500, window: Duration::from_secs(86_400) };

        assert!(kv.consume_token_pair(minute, day).await.unwrap());
        assert!(!kv.consume_token_pair(minute, day).await.unwrap());

        clock.advance(chrono::Duration::seconds(61));
        assert!(kv.consume_token_pair(minute, day).await.unwrap());
    }
}
