//! Process-wide client singletons.
//!
//! The HTTP client, Redis connection manager, and Postgres pool are
//! created lazily and exactly once; a second initialization request
//! returns the existing instance instead of erroring.

use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use pd_kv::RedisKv;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::OnceCell;

static HTTP: OnceLock<reqwest::Client> = OnceLock::new();
static KV: OnceCell<Arc<RedisKv>> = OnceCell::const_new();
static PG: OnceCell<PgPool> = OnceCell::const_new();

/// The shared HTTP client (one connection pool per process).
pub fn http_client() -> reqwest::Client {
    HTTP.get_or_init(reqwest::Client::new).clone()
}

/// The shared Redis client. The URL of the first successful call wins.
pub async fn kv_client(url: &str) -> Result<Arc<RedisKv>> {
    KV.get_or_try_init(|| async {
        let kv = RedisKv::connect(url)
            .await
            .with_context(|| format!("redis connect: {url}"))?;
        Ok::<_, anyhow::Error>(Arc::new(kv))
    })
    .await
    .cloned()
}

/// The shared Postgres pool. The URL of the first successful call wins.
pub async fn pg_pool(url: &str) -> Result<PgPool> {
    PG.get_or_try_init(|| async {
        PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .context("failed to connect to Postgres")
    })
    .await
    .cloned()
}
