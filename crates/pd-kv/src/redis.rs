//! Redis backing for [`KvClient`].

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Script};

use crate::{BucketSpec, KeyTtl, KvClient};

/// Atomic dual-bucket check-and-consume.
///
/// Counters default to their limit when missing; both TTLs are refreshed
/// to the window length on a successful consume. Returns 1 on consume,
/// 0 when either bucket is empty.
const CONSUME_SCRIPT: &str = r#"
local minute_key = KEYS[1]
local day_key = KEYS[2]
local minute_limit = tonumber(ARGV[1])
local day_limit = tonumber(ARGV[2])
local minute_window = tonumber(ARGV[3])
local day_window = tonumber(ARGV[4])

local minute_tokens = tonumber(redis.call('GET', minute_key))
if not minute_tokens then
    minute_tokens = minute_limit
end

local day_tokens = tonumber(redis.call('GET', day_key))
if not day_tokens then
    day_tokens = day_limit
end

if minute_tokens > 0 and day_tokens > 0 then
    redis.call('SET', minute_key, minute_tokens - 1, 'EX', minute_window)
    redis.call('SET', day_key, day_tokens - 1, 'EX', day_window)
    return 1
else
    return 0
end
"#;

/// Redis-backed key/value client.
///
/// Wraps a [`ConnectionManager`], which multiplexes one long-lived
/// connection and reconnects on failure; cloning it per call is the
/// intended usage.
pub struct RedisKv {
    conn: ConnectionManager,
    consume: Script,
}

impl RedisKv {
    pub fn new(conn: ConnectionManager) -> Self {
        RedisKv {
            conn,
            consume: Script::new(CONSUME_SCRIPT),
        }
    }

    /// Connect to a Redis URL (`redis://host:port/db`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = ::redis::Client::open(url).context("invalid redis url")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("redis connect failed")?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl KvClient for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.context("redis GET failed")?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1);
                conn.set_ex::<_, _, ()>(key, value, secs)
                    .await
                    .context("redis SET EX failed")?;
            }
            None => {
                conn.set::<_, _, ()>(key, value)
                    .await
                    .context("redis SET failed")?;
            }
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.context("redis DEL failed")?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let n: bool = conn.exists(key).await.context("redis EXISTS failed")?;
        Ok(n)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let mut conn = self.conn.clone();
        let secs: i64 = conn.ttl(key).await.context("redis TTL failed")?;
        Ok(match secs {
            -2 => KeyTtl::Missing,
            -1 => KeyTtl::Persistent,
            n => KeyTtl::Expires(n.max(0) as u64),
        })
    }

    async fn scan_page(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> Result<(u64, Vec<String>)> {
        let mut conn = self.conn.clone();
        let (next, keys): (u64, Vec<String>) = ::redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .context("redis SCAN failed")?;
        Ok((next, keys))
    }

    async fn consume_token_pair(
        &self,
        minute: BucketSpec<'_>,
        day: BucketSpec<'_>,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let consumed: i64 = self
            .consume
            .key(minute.key)
            .key(day.key)
            .arg(minute.limit)
            .arg(day.limit)
            .arg(minute.window.as_secs())
            .arg(day.window.as_secs())
            .invoke_async(&mut conn)
            .await
            .context("redis consume script failed")?;
        Ok(consumed == 1)
    }
}
