//! pd-cache
//!
//! Hot tier of the price cache: a TTL'd key/value layer in front of the
//! durable warm store. Stores single latest-price entries and whole
//! history ranges, and answers narrower history requests from any broader
//! cached range (subset matching) via a cursor-based key scan.
//!
//! Corrupted or unreadable entries are cache misses, never errors: the
//! warm store below is the source of truth and a miss just falls through.
//!
//! Key formats (shared across instances, observable in the store):
//! - latest price: `{prefix}:{TICKER}`
//! - history:      `{prefix}:{TICKER}:history:{YYYY-MM-DD}:{YYYY-MM-DD}:{interval}`

pub mod codec;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use pd_domain::{PriceInterval, PricePoint, Ticker};
use pd_kv::{KeyTtl, KvClient};
use tracing::debug;

/// SCAN page-size hint for subset searches.
const SCAN_COUNT: usize = 100;

pub struct PriceCache {
    kv: Arc<dyn KvClient>,
    prefix: String,
    default_ttl: Option<Duration>,
}

impl PriceCache {
    /// `prefix` is the shared namespace, e.g. `"paperdesk:price"`.
    pub fn new(kv: Arc<dyn KvClient>, prefix: impl Into<String>, default_ttl: Option<Duration>) -> Self {
        PriceCache {
            kv,
            prefix: prefix.into(),
            default_ttl,
        }
    }

    fn latest_key(&self, ticker: &Ticker) -> String {
        format!("{}:{}", self.prefix, ticker)
    }

    fn history_key(
        &self,
        ticker: &Ticker,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: PriceInterval,
    ) -> String {
        format!(
            "{}:{}:history:{}:{}:{}",
            self.prefix,
            ticker,
            start.date_naive(),
            end.date_naive(),
            interval
        )
    }

    // -- latest-price entry -------------------------------------------------

    /// Cached latest price, or `None` on miss or unreadable entry.
    pub async fn get_latest(&self, ticker: &Ticker) -> Result<Option<PricePoint>> {
        let key = self.latest_key(ticker);
        let Some(raw) = self.kv.get(&key).await.context("hot cache read")? else {
            return Ok(None);
        };
        match codec::decode_point(&raw) {
            Ok(point) => Ok(Some(point)),
            Err(err) => {
                debug!(%key, error = %err, "discarding corrupt hot-cache entry");
                Ok(None)
            }
        }
    }

    /// Store the latest price; `ttl` overrides the cache default.
    pub async fn put_latest(&self, point: &PricePoint, ttl: Option<Duration>) -> Result<()> {
        let key = self.latest_key(point.ticker());
        let value = codec::encode_point(point);
        self.kv
            .set_ex(&key, &value, ttl.or(self.default_ttl))
            .await
            .context("hot cache write")
    }

    pub async fn delete(&self, ticker: &Ticker) -> Result<()> {
        self.kv.del(&self.latest_key(ticker)).await
    }

    pub async fn exists(&self, ticker: &Ticker) -> Result<bool> {
        self.kv.exists(&self.latest_key(ticker)).await
    }

    /// Remaining TTL of the latest-price key.
    pub async fn ttl(&self, ticker: &Ticker) -> Result<KeyTtl> {
        self.kv.ttl(&self.latest_key(ticker)).await
    }

    // -- history ranges -----------------------------------------------------

    /// Cached history for `[start, end]`.
    ///
    /// Fast path is the exact range key. On miss, scans this ticker's
    /// history keys for a broader cached range covering the request and
    /// returns its contents filtered to `[start, end]`. Candidates whose
    /// filtered contents are empty do not end the search; malformed keys
    /// and corrupt entries are skipped.
    pub async fn get_history(
        &self,
        ticker: &Ticker,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: PriceInterval,
    ) -> Result<Option<Vec<PricePoint>>> {
        let exact_key = self.history_key(ticker, start, end, interval);
        if let Some(raw) = self.kv.get(&exact_key).await.context("hot cache read")? {
            match codec::decode_history(&raw) {
                Ok(points) => return Ok(Some(points)),
                Err(err) => {
                    debug!(key = %exact_key, error = %err, "discarding corrupt history entry");
                }
            }
        }
        self.find_broader_range(ticker, start, end, interval).await
    }

    /// Store a history list under its exact range key.
    pub async fn put_history(
        &self,
        ticker: &Ticker,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: PriceInterval,
        points: &[PricePoint],
        ttl: Option<Duration>,
    ) -> Result<()> {
        let key = self.history_key(ticker, start, end, interval);
        let value = codec::encode_history(points);
        self.kv
            .set_ex(&key, &value, ttl.or(self.default_ttl))
            .await
            .context("hot cache write")
    }

    async fn find_broader_range(
        &self,
        ticker: &Ticker,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: PriceInterval,
    ) -> Result<Option<Vec<PricePoint>>> {
        let pattern = format!("{}:{}:history:*:*:{}", self.prefix, ticker, interval);

        let mut cursor = 0;
        loop {
            let (next, keys) = self
                .kv
                .scan_page(&pattern, cursor, SCAN_COUNT)
                .await
                .context("hot cache scan")?;

            for key in keys {
                let Some((cached_start, cached_end)) = parse_range_from_key(&key) else {
                    continue; // malformed key
                };
                if !(cached_start <= start && cached_end >= end) {
                    continue;
                }
                let Some(raw) = self.kv.get(&key).await.context("hot cache read")? else {
                    continue; // expired between scan and read
                };
                let points = match codec::decode_history(&raw) {
                    Ok(points) => points,
                    Err(err) => {
                        debug!(%key, error = %err, "skipping corrupt history entry");
                        continue;
                    }
                };
                let filtered: Vec<PricePoint> = points
                    .into_iter()
                    .filter(|p| p.timestamp() >= start && p.timestamp() <= end)
                    .collect();
                if !filtered.is_empty() {
                    return Ok(Some(filtered));
                }
            }

            if next == 0 {
                return Ok(None);
            }
            cursor = next;
        }
    }
}

/// Parse the `[start, end]` range embedded in a history key.
///
/// The embedded values are bare dates; they widen to 00:00:00 and
/// 23:59:59 UTC so coverage comparison works against instant-typed
/// requests. Returns `None` for anything that does not look like a
/// well-formed history key.
fn parse_range_from_key(key: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let parts: Vec<&str> = key.split(':').collect();
    let idx = parts.iter().position(|p| *p == "history")?;
    let start_raw = parts.get(idx + 1)?;
    let end_raw = parts.get(idx + 2)?;
    parts.get(idx + 3)?; // interval segment must exist

    let start_date: NaiveDate = start_raw.parse().ok()?;
    let end_date: NaiveDate = end_raw.parse().ok()?;

    let start = Utc.from_utc_datetime(&start_date.and_hms_opt(0, 0, 0)?);
    let end = Utc.from_utc_datetime(&end_date.and_hms_opt(23, 59, 59)?);
    Some((start, end))
}
