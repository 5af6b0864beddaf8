//! pd-ratelimit
//!
//! Distributed dual-window token bucket in front of the upstream quote
//! provider. Two counters live in the shared key/value store —
//! `{prefix}:minute` (60 s window) and `{prefix}:day` (86 400 s window) —
//! and a request may proceed only while both hold at least one token.
//!
//! The check-and-decrement is a single atomic store operation
//! ([`KvClient::consume_token_pair`]); this crate never composes it from
//! reads and writes. `can_proceed` is an advisory read-only probe — the
//! authoritative answer is `consume`'s return value.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pd_domain::MarketDataError;
use pd_kv::{BucketSpec, KeyTtl, KvClient};

const MINUTE_WINDOW: Duration = Duration::from_secs(60);
const DAY_WINDOW: Duration = Duration::from_secs(86_400);

/// Dual-window token-bucket rate limiter over a shared store.
///
/// Keyed by a caller-supplied prefix so independent upstreams get
/// independent quotas.
pub struct RateLimiter {
    kv: Arc<dyn KvClient>,
    minute_key: String,
    day_key: String,
    calls_per_minute: u32,
    calls_per_day: u32,
}

impl RateLimiter {
    /// Capacities must be strictly positive.
    pub fn new(
        kv: Arc<dyn KvClient>,
        prefix: &str,
        calls_per_minute: u32,
        calls_per_day: u32,
    ) -> Result<Self, MarketDataError> {
        if calls_per_minute == 0 {
            return Err(MarketDataError::invalid_input(
                "calls_per_minute must be positive",
            ));
        }
        if calls_per_day == 0 {
            return Err(MarketDataError::invalid_input(
                "calls_per_day must be positive",
            ));
        }
        Ok(RateLimiter {
            kv,
            minute_key: format!("{prefix}:minute"),
            day_key: format!("{prefix}:day"),
            calls_per_minute,
            calls_per_day,
        })
    }

    fn minute_spec(&self) -> BucketSpec<'_> {
        BucketSpec {
            key: &self.minute_key,
            limit: self.calls_per_minute,
            window: MINUTE_WINDOW,
        }
    }

    fn day_spec(&self) -> BucketSpec<'_> {
        BucketSpec {
            key: &self.day_key,
            limit: self.calls_per_day,
            window: DAY_WINDOW,
        }
    }

    /// Counter value for one bucket; a missing key means the bucket is full.
    async fn read_count(&self, key: &str, limit: u32) -> Result<u32> {
        let raw = self.kv.get(key).await.context("rate bucket read failed")?;
        Ok(raw
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(limit))
    }

    /// Read-only probe: do both buckets currently hold a token?
    ///
    /// Racy by nature; use [`RateLimiter::consume`] for the decision that
    /// precedes an upstream call.
    pub async fn can_proceed(&self) -> Result<bool> {
        let minute = self.read_count(&self.minute_key, self.calls_per_minute).await?;
        let day = self.read_count(&self.day_key, self.calls_per_day).await?;
        Ok(minute > 0 && day > 0)
    }

    /// Atomically consume one token from both windows.
    ///
    /// `true` iff both tokens were decremented; on `false` nothing changed.
    pub async fn consume(&self) -> Result<bool> {
        let consumed = self
            .kv
            .consume_token_pair(self.minute_spec(), self.day_spec())
            .await
            .context("rate bucket consume failed")?;
        if !consumed {
            tracing::debug!(minute_key = %self.minute_key, "rate limiter refused a token");
        }
        Ok(consumed)
    }

    /// Seconds until the next token becomes available.
    ///
    /// Zero when both buckets have tokens. Otherwise the minimum remaining
    /// TTL across exhausted buckets; an exhausted bucket whose key has
    /// meanwhile vanished refills immediately and contributes zero.
    pub async fn wait_time(&self) -> Result<Duration> {
        let minute = self.read_count(&self.minute_key, self.calls_per_minute).await?;
        let day = self.read_count(&self.day_key, self.calls_per_day).await?;
        if minute > 0 && day > 0 {
            return Ok(Duration::ZERO);
        }

        let mut waits: Vec<Duration> = Vec::with_capacity(2);
        if minute == 0 {
            waits.push(self.key_wait(&self.minute_key).await?);
        }
        if day == 0 {
            waits.push(self.key_wait(&self.day_key).await?);
        }
        Ok(waits.into_iter().min().unwrap_or(Duration::ZERO))
    }

    async fn key_wait(&self, key: &str) -> Result<Duration> {
        Ok(match self.kv.ttl(key).await.context("rate bucket ttl failed")? {
            KeyTtl::Expires(secs) => Duration::from_secs(secs),
            // Expired or never set: tokens are available on the next write.
            KeyTtl::Missing | KeyTtl::Persistent => Duration::ZERO,
        })
    }

    /// Remaining `(minute, day)` tokens, for observability.
    pub async fn remaining(&self) -> Result<(u32, u32)> {
        let minute = self.read_count(&self.minute_key, self.calls_per_minute).await?;
        let day = self.read_count(&self.day_key, self.calls_per_day).await?;
        Ok((minute, day))
    }
}
