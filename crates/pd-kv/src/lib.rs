//! pd-kv
//!
//! The process-external key/value seam shared by the hot price cache and
//! the rate limiter. The trait is the minimal operation set both need;
//! production runs against Redis ([`RedisKv`]), tests against the
//! in-process [`MemoryKv`] fake.
//!
//! The one non-generic operation is [`KvClient::consume_token_pair`]: the
//! dual-bucket token consume must be a single atomic action on the store
//! (a server-side script in Redis). Composing it from `get`/`set` on the
//! client is a race and therefore a defect.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub mod memory;
pub mod redis;

pub use crate::memory::MemoryKv;
pub use crate::redis::RedisKv;

/// Remaining lifetime of a key.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist.
    Missing,
    /// Key exists and has no expiry.
    Persistent,
    /// Key expires after this many whole seconds.
    Expires(u64),
}

/// One token bucket's identity for an atomic consume.
#[derive(Copy, Clone, Debug)]
pub struct BucketSpec<'a> {
    /// Store key holding the remaining-token counter.
    pub key: &'a str,
    /// Capacity; a missing counter reads as this value.
    pub limit: u32,
    /// Window length; the counter's TTL is refreshed to this on consume.
    pub window: Duration,
}

/// Minimal async key/value client.
///
/// All values are UTF-8 strings (the cache codec is JSON text). Methods
/// return `anyhow::Result`; callers that must degrade on store trouble do
/// so explicitly.
#[async_trait]
pub trait KvClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value with an optional expiry.
    async fn set_ex(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl>;

    /// One page of a cursor-based, non-blocking key scan (`SCAN`-style;
    /// full-keyspace blocking enumeration is not acceptable). `cursor = 0`
    /// starts a scan; a returned cursor of `0` ends it. `count` is a hint.
    async fn scan_page(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> Result<(u64, Vec<String>)>;

    /// Atomically consume one token from each of two buckets.
    ///
    /// Returns `true` and decrements both counters (refreshing both TTLs
    /// to their window length) iff both have at least one token; otherwise
    /// returns `false` and changes nothing. Missing counters read as full.
    async fn consume_token_pair(
        &self,
        minute: BucketSpec<'_>,
        day: BucketSpec<'_>,
    ) -> Result<bool>;
}
