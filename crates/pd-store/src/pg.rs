//! Postgres implementations of [`WarmStore`] and [`WatchlistStore`].

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pd_domain::{Currency, Money, PriceInterval, PricePoint, PriceSource, Ticker};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::{WarmStore, WatchlistEntry, WatchlistStore};

pub const ENV_DB_URL: &str = "PD_DATABASE_URL";

/// Connect to Postgres using `PD_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// PgWarmStore
// ---------------------------------------------------------------------------

type PriceRow = (
    String,             // ticker
    DateTime<Utc>,      // ts
    String,             // interval
    i64,                // price_micros
    String,             // currency
    Option<i64>,        // open_micros
    Option<i64>,        // high_micros
    Option<i64>,        // low_micros
    Option<i64>,        // close_micros
    Option<i64>,        // volume
);

const PRICE_COLUMNS: &str =
    "ticker, ts, interval, price_micros, currency, open_micros, high_micros, low_micros, close_micros, volume";

fn row_to_point(row: PriceRow) -> Result<PricePoint> {
    let (ticker, ts, interval, price_micros, currency, open, high, low, close, volume) = row;
    let ticker = Ticker::new(&ticker).context("stored ticker")?;
    let currency = Currency::new(&currency).context("stored currency")?;
    let interval = PriceInterval::parse(&interval)
        .map_err(|e| anyhow::anyhow!("stored interval: {e}"))?;
    let money = |micros: i64| Money::from_micros(micros, currency);

    let point = PricePoint::new(
        ticker,
        money(price_micros),
        ts,
        PriceSource::WarmStore,
        interval,
    )
    .context("stored price invariants")?
    .with_ohlcv(
        open.map(money),
        high.map(money),
        low.map(money),
        close.map(money),
        volume.and_then(|v| u64::try_from(v).ok()),
    )
    .context("stored ohlcv invariants")?;
    Ok(point)
}

pub struct PgWarmStore {
    pool: PgPool,
}

impl PgWarmStore {
    pub fn new(pool: PgPool) -> Self {
        PgWarmStore { pool }
    }
}

#[async_trait]
impl WarmStore for PgWarmStore {
    async fn upsert(&self, point: &PricePoint) -> Result<()> {
        sqlx::query(
            r#"
            insert into price_points (
              ticker, ts, interval, price_micros, currency,
              open_micros, high_micros, low_micros, close_micros, volume
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            on conflict (ticker, ts, interval) do update set
              price_micros = excluded.price_micros,
              currency     = excluded.currency,
              open_micros  = excluded.open_micros,
              high_micros  = excluded.high_micros,
              low_micros   = excluded.low_micros,
              close_micros = excluded.close_micros,
              volume       = excluded.volume
            "#,
        )
        .bind(point.ticker().as_str())
        .bind(point.timestamp())
        .bind(point.interval().as_str())
        .bind(point.price().micros())
        .bind(point.price().currency().as_str())
        .bind(point.open().map(|m| m.micros()))
        .bind(point.high().map(|m| m.micros()))
        .bind(point.low().map(|m| m.micros()))
        .bind(point.close().map(|m| m.micros()))
        .bind(point.volume().map(|v| v as i64))
        .execute(&self.pool)
        .await
        .context("price upsert failed")?;
        Ok(())
    }

    async fn latest(
        &self,
        ticker: &Ticker,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<PricePoint>> {
        let cutoff = now - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let row: Option<PriceRow> = sqlx::query_as(&format!(
            "select {PRICE_COLUMNS} from price_points \
             where ticker = $1 and ts >= $2 \
             order by ts desc limit 1"
        ))
        .bind(ticker.as_str())
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await
        .context("latest price query failed")?;
        row.map(row_to_point).transpose()
    }

    async fn price_at(
        &self,
        ticker: &Ticker,
        instant: DateTime<Utc>,
    ) -> Result<Option<PricePoint>> {
        let row: Option<PriceRow> = sqlx::query_as(&format!(
            "select {PRICE_COLUMNS} from price_points \
             where ticker = $1 and ts <= $2 \
             order by ts desc limit 1"
        ))
        .bind(ticker.as_str())
        .bind(instant)
        .fetch_optional(&self.pool)
        .await
        .context("price_at query failed")?;
        row.map(row_to_point).transpose()
    }

    async fn history(
        &self,
        ticker: &Ticker,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: PriceInterval,
    ) -> Result<Vec<PricePoint>> {
        let rows: Vec<PriceRow> = sqlx::query_as(&format!(
            "select {PRICE_COLUMNS} from price_points \
             where ticker = $1 and interval = $2 and ts >= $3 and ts <= $4 \
             order by ts asc"
        ))
        .bind(ticker.as_str())
        .bind(interval.as_str())
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("history query failed")?;
        rows.into_iter().map(row_to_point).collect()
    }

    async fn all_tickers(&self) -> Result<Vec<Ticker>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("select distinct ticker from price_points order by ticker asc")
                .fetch_all(&self.pool)
                .await
                .context("all_tickers query failed")?;
        rows.into_iter()
            .map(|(t,)| Ticker::new(&t).context("stored ticker"))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// PgWatchlist
// ---------------------------------------------------------------------------

type WatchlistRow = (
    String,             // ticker
    i32,                // priority
    bool,               // active
    Option<DateTime<Utc>>, // last_refresh_at
    Option<DateTime<Utc>>, // next_refresh_at
    i64,                // refresh_interval_secs
);

const WATCHLIST_COLUMNS: &str =
    "ticker, priority, active, last_refresh_at, next_refresh_at, refresh_interval_secs";

fn row_to_entry(row: WatchlistRow) -> Result<WatchlistEntry> {
    let (ticker, priority, active, last_refresh_at, next_refresh_at, interval_secs) = row;
    Ok(WatchlistEntry {
        ticker: Ticker::new(&ticker).context("stored ticker")?,
        priority,
        active,
        last_refresh_at,
        next_refresh_at,
        refresh_interval: Duration::from_secs(interval_secs.max(0) as u64),
    })
}

pub struct PgWatchlist {
    pool: PgPool,
}

impl PgWatchlist {
    pub fn new(pool: PgPool) -> Self {
        PgWatchlist { pool }
    }
}

#[async_trait]
impl WatchlistStore for PgWatchlist {
    async fn add(&self, ticker: &Ticker, priority: i32, refresh_interval: Duration) -> Result<()> {
        // Re-adding reactivates and only ever lowers the priority value.
        sqlx::query(
            r#"
            insert into watchlist_entries (ticker, priority, active, refresh_interval_secs)
            values ($1, $2, true, $3)
            on conflict (ticker) do update set
              active = true,
              priority = least(watchlist_entries.priority, excluded.priority),
              refresh_interval_secs = excluded.refresh_interval_secs
            "#,
        )
        .bind(ticker.as_str())
        .bind(priority)
        .bind(refresh_interval.as_secs() as i64)
        .execute(&self.pool)
        .await
        .context("watchlist add failed")?;
        Ok(())
    }

    async fn remove(&self, ticker: &Ticker) -> Result<()> {
        sqlx::query("update watchlist_entries set active = false where ticker = $1")
            .bind(ticker.as_str())
            .execute(&self.pool)
            .await
            .context("watchlist remove failed")?;
        Ok(())
    }

    async fn stale(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<WatchlistEntry>> {
        let rows: Vec<WatchlistRow> = sqlx::query_as(&format!(
            "select {WATCHLIST_COLUMNS} from watchlist_entries \
             where active and (next_refresh_at is null or next_refresh_at <= $1) \
             order by priority asc, next_refresh_at asc nulls first \
             limit $2"
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("watchlist stale query failed")?;
        rows.into_iter().map(row_to_entry).collect()
    }

    async fn touch_refresh(
        &self,
        ticker: &Ticker,
        now: DateTime<Utc>,
        next_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "update watchlist_entries set last_refresh_at = $2, next_refresh_at = $3 \
             where ticker = $1",
        )
        .bind(ticker.as_str())
        .bind(now)
        .bind(next_at)
        .execute(&self.pool)
        .await
        .context("watchlist touch failed")?;
        Ok(())
    }

    async fn active_all(&self) -> Result<Vec<WatchlistEntry>> {
        let rows: Vec<WatchlistRow> = sqlx::query_as(&format!(
            "select {WATCHLIST_COLUMNS} from watchlist_entries \
             where active order by priority asc, ticker asc"
        ))
        .fetch_all(&self.pool)
        .await
        .context("watchlist active query failed")?;
        rows.into_iter().map(row_to_entry).collect()
    }
}
