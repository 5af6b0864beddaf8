//! pd-store
//!
//! The warm tier: durable per-ticker price history and the refresh
//! watchlist. Postgres is the production backing ([`pg`]); the in-memory
//! implementations ([`memory`]) serve the orchestrator and scheduler test
//! suites.
//!
//! The warm store is the authoritative historical record — there is no
//! delete or eviction path for price rows, and `history` returning an
//! empty list is a normal answer, not an error.

pub mod memory;
pub mod pg;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pd_domain::{PriceInterval, PricePoint, Ticker};

pub use crate::memory::{MemoryWarmStore, MemoryWatchlist};
pub use crate::pg::{PgWarmStore, PgWatchlist};

// ---------------------------------------------------------------------------
// WarmStore
// ---------------------------------------------------------------------------

/// Durable price history keyed by `(ticker, timestamp, interval)`.
#[async_trait]
pub trait WarmStore: Send + Sync {
    /// Insert or overwrite the row for this point's key. Idempotent.
    async fn upsert(&self, point: &PricePoint) -> Result<()>;

    /// Most recent row whose timestamp is within `max_age` of `now`.
    async fn latest(
        &self,
        ticker: &Ticker,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<PricePoint>>;

    /// Most recent row at or before `instant`.
    async fn price_at(&self, ticker: &Ticker, instant: DateTime<Utc>)
        -> Result<Option<PricePoint>>;

    /// Rows in `[start, end]` for the interval, ascending by timestamp.
    async fn history(
        &self,
        ticker: &Ticker,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: PriceInterval,
    ) -> Result<Vec<PricePoint>>;

    /// Every ticker with at least one row, alphabetical, unique.
    async fn all_tickers(&self) -> Result<Vec<Ticker>>;
}

// ---------------------------------------------------------------------------
// WatchlistStore
// ---------------------------------------------------------------------------

/// One tracked ticker with its refresh metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchlistEntry {
    pub ticker: Ticker,
    /// Lower numbers are refreshed first.
    pub priority: i32,
    pub active: bool,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub next_refresh_at: Option<DateTime<Utc>>,
    pub refresh_interval: Duration,
}

/// Mutable set of actively tracked tickers.
///
/// Removal deactivates rather than deletes so a later `add` restores the
/// entry's priority (taking the smaller of old and new — attention only
/// ever sharpens).
#[async_trait]
pub trait WatchlistStore: Send + Sync {
    async fn add(&self, ticker: &Ticker, priority: i32, refresh_interval: Duration) -> Result<()>;

    async fn remove(&self, ticker: &Ticker) -> Result<()>;

    /// Active entries due for refresh (`next_refresh_at` null or past),
    /// ordered by ascending priority then oldest `next_refresh_at` (nulls
    /// first), capped at `limit`.
    async fn stale(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<WatchlistEntry>>;

    /// Record a completed refresh and schedule the next one.
    async fn touch_refresh(
        &self,
        ticker: &Ticker,
        now: DateTime<Utc>,
        next_at: DateTime<Utc>,
    ) -> Result<()>;

    /// All active entries ordered by priority.
    async fn active_all(&self) -> Result<Vec<WatchlistEntry>>;
}
