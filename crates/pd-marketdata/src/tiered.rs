//! Tiered market-data adapter: hot cache → warm store → upstream.
//!
//! One request walks the tiers in order and never fans out. The rate
//! limiter guards every upstream call (`consume` happens-before the HTTP
//! request), the trading calendar routes weekend/holiday requests to the
//! last close instead of the upstream, and every upstream failure is
//! first recovered from stale hot data before it surfaces.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pd_cache::PriceCache;
use pd_domain::{
    Clock, MarketDataError, PriceInterval, PricePoint, PriceSource, Ticker,
};
use pd_provider::QuoteProvider;
use pd_ratelimit::RateLimiter;
use pd_store::WarmStore;
use tracing::{debug, info, warn};

use crate::oracle;

/// Hot entries older than this are stale.
const HOT_FRESH: Duration = Duration::from_secs(3600);
/// Warm rows older than this are stale for current-price serving.
const WARM_FRESH: Duration = Duration::from_secs(4 * 3600);
/// Hot TTL for upstream quotes and warm promotions.
const HOT_TTL: Duration = Duration::from_secs(3600);
/// Hot TTL for market-closed fallbacks: prices cannot move until the
/// next open, so the entry may live longer.
const CLOSED_TTL: Duration = Duration::from_secs(2 * 3600);

/// The market-data operations exposed to the surrounding application.
#[async_trait::async_trait]
pub trait MarketDataPort: Send + Sync {
    /// Most recent available price, served from the freshest tier.
    async fn get_current_price(&self, ticker: &Ticker) -> Result<PricePoint, MarketDataError>;

    /// Current prices for several tickers. Absent entries are the failure
    /// signal; this never errors for an individual ticker.
    async fn get_batch_prices(&self, tickers: &[Ticker]) -> BTreeMap<Ticker, PricePoint>;

    /// Price at or before a past instant. Never touches the upstream.
    async fn get_price_at(
        &self,
        ticker: &Ticker,
        instant: DateTime<Utc>,
    ) -> Result<PricePoint, MarketDataError>;

    /// History over `[start, end]`; "no data" is an empty list, not an
    /// error.
    async fn get_price_history(
        &self,
        ticker: &Ticker,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: PriceInterval,
    ) -> Result<Vec<PricePoint>, MarketDataError>;

    /// Every ticker the warm store has data for.
    async fn get_supported_tickers(&self) -> Result<Vec<Ticker>, MarketDataError>;
}

/// Production [`MarketDataPort`]: read-through tiered cache with a
/// calendar-aware market-closed path.
pub struct TieredMarketData {
    hot: PriceCache,
    limiter: RateLimiter,
    warm: Arc<dyn WarmStore>,
    provider: Arc<dyn QuoteProvider>,
    clock: Arc<dyn Clock>,
}

impl TieredMarketData {
    pub fn new(
        hot: PriceCache,
        limiter: RateLimiter,
        warm: Arc<dyn WarmStore>,
        provider: Arc<dyn QuoteProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        TieredMarketData {
            hot,
            limiter,
            warm,
            provider,
            clock,
        }
    }

    /// Markets are closed for `now` when the last close belongs to an
    /// earlier calendar date (weekend, holiday).
    fn market_closed(now: DateTime<Utc>, last_close: DateTime<Utc>) -> bool {
        last_close.date_naive() < now.date_naive()
    }

    /// Write an upstream quote through to both tiers. Failures degrade to
    /// a warning; the fresh value is still served.
    async fn write_through(&self, point: &PricePoint) {
        if let Err(err) = self.hot.put_latest(point, Some(HOT_TTL)).await {
            warn!(ticker = %point.ticker(), error = %err, "hot write-through failed");
        }
        if let Err(err) = self.warm.upsert(point).await {
            warn!(ticker = %point.ticker(), error = %err, "warm write-through failed");
        }
    }

    /// Serve the market-closed path: the warm row at the last close, a
    /// stale hot entry, or ticker-not-found.
    async fn closed_market_price(
        &self,
        ticker: &Ticker,
        last_close: DateTime<Utc>,
        stale_hot: Option<PricePoint>,
    ) -> Result<PricePoint, MarketDataError> {
        match self.warm.price_at(ticker, last_close).await {
            Ok(Some(point)) => {
                let point = point.with_source(PriceSource::WarmStore);
                if let Err(err) = self.hot.put_latest(&point, Some(CLOSED_TTL)).await {
                    warn!(ticker = %ticker, error = %err, "closed-market hot cache failed");
                }
                debug!(ticker = %ticker, "served last close, markets closed");
                return Ok(point);
            }
            Ok(None) => {}
            Err(err) => warn!(ticker = %ticker, error = %err, "warm price_at failed"),
        }

        if let Some(stale) = stale_hot {
            return Ok(stale.with_source(PriceSource::HotCache));
        }
        Err(MarketDataError::ticker_not_found(
            ticker.as_str(),
            "no stored close available and markets are closed",
        ))
    }

    /// Upstream fetch for one ticker with rate limiting and stale-hot
    /// recovery. `stale_hot` is whatever the hot tier held before.
    async fn fetch_current(
        &self,
        ticker: &Ticker,
        stale_hot: Option<PricePoint>,
    ) -> Result<PricePoint, MarketDataError> {
        let can_proceed = self.limiter.can_proceed().await.unwrap_or_else(|err| {
            warn!(error = %err, "rate limiter probe failed");
            false
        });
        if !can_proceed {
            if let Some(stale) = stale_hot {
                debug!(ticker = %ticker, "rate limited, serving stale hot entry");
                return Ok(stale.with_source(PriceSource::HotCache));
            }
            let wait = self
                .limiter
                .wait_time()
                .await
                .unwrap_or(Duration::ZERO);
            return Err(MarketDataError::unavailable_retry_in(
                "rate limit exceeded and no cached data available",
                wait,
            ));
        }

        // The atomic consume is the authoritative gate; losing the race
        // here falls back exactly like the probe above.
        let consumed = self.limiter.consume().await.unwrap_or_else(|err| {
            warn!(error = %err, "rate limiter consume failed");
            false
        });
        if !consumed {
            if let Some(stale) = stale_hot {
                return Ok(stale.with_source(PriceSource::HotCache));
            }
            return Err(MarketDataError::unavailable(
                "rate limit exceeded, no cached data",
            ));
        }

        match self.provider.quote(ticker).await {
            Ok(point) => {
                self.write_through(&point).await;
                Ok(point)
            }
            Err(err) => {
                if let Some(stale) = stale_hot {
                    warn!(ticker = %ticker, error = %err, "upstream failed, serving stale hot entry");
                    return Ok(stale.with_source(PriceSource::HotCache));
                }
                Err(err)
            }
        }
    }

    /// Hot, then fresh-warm (with promotion).
    async fn cached_current(&self, ticker: &Ticker, now: DateTime<Utc>) -> CacheLookup {
        let cached = match self.hot.get_latest(ticker).await {
            Ok(cached) => cached,
            Err(err) => {
                warn!(ticker = %ticker, error = %err, "hot cache read failed");
                None
            }
        };
        if let Some(point) = &cached {
            if !point.is_stale(now, HOT_FRESH) {
                return CacheLookup::Served(point.with_source(PriceSource::HotCache));
            }
        }

        match self.warm.latest(ticker, WARM_FRESH, now).await {
            Ok(Some(point)) => {
                let point = point.with_source(PriceSource::WarmStore);
                if let Err(err) = self.hot.put_latest(&point, Some(HOT_TTL)).await {
                    warn!(ticker = %ticker, error = %err, "warm promotion failed");
                }
                CacheLookup::Served(point)
            }
            Ok(None) => CacheLookup::Miss(cached),
            Err(err) => {
                warn!(ticker = %ticker, error = %err, "warm latest read failed");
                CacheLookup::Miss(cached)
            }
        }
    }
}

/// Outcome of the hot/warm phases: a serveable point, or a miss carrying
/// whatever stale hot entry exists for later fallback.
enum CacheLookup {
    Served(PricePoint),
    Miss(Option<PricePoint>),
}

#[async_trait::async_trait]
impl MarketDataPort for TieredMarketData {
    async fn get_current_price(&self, ticker: &Ticker) -> Result<PricePoint, MarketDataError> {
        let now = self.clock.now();

        let stale_hot = match self.cached_current(ticker, now).await {
            CacheLookup::Served(point) => return Ok(point),
            CacheLookup::Miss(stale) => stale,
        };

        let last_close = pd_calendar::last_trading_day_at(now);
        if Self::market_closed(now, last_close) {
            return self.closed_market_price(ticker, last_close, stale_hot).await;
        }

        self.fetch_current(ticker, stale_hot).await
    }

    async fn get_batch_prices(&self, tickers: &[Ticker]) -> BTreeMap<Ticker, PricePoint> {
        let now = self.clock.now();
        let last_close = pd_calendar::last_trading_day_at(now);
        let closed = Self::market_closed(now, last_close);

        let mut result = BTreeMap::new();

        // Hot and warm phases first, then per-ticker upstream (or the
        // closed-market route) for the remainder, preserving input order.
        let mut remaining: Vec<(Ticker, Option<PricePoint>)> = Vec::new();
        for ticker in tickers {
            match self.cached_current(ticker, now).await {
                CacheLookup::Served(point) => {
                    result.insert(ticker.clone(), point);
                }
                CacheLookup::Miss(stale) => remaining.push((ticker.clone(), stale)),
            }
        }

        for (ticker, stale_hot) in remaining {
            let outcome = if closed {
                self.closed_market_price(&ticker, last_close, stale_hot).await
            } else {
                self.fetch_current(&ticker, stale_hot).await
            };
            match outcome {
                Ok(point) => {
                    result.insert(ticker, point);
                }
                Err(err) => {
                    // Absence from the map is the per-ticker failure signal.
                    warn!(ticker = %ticker, error = %err, "batch price unavailable");
                }
            }
        }

        result
    }

    async fn get_price_at(
        &self,
        ticker: &Ticker,
        instant: DateTime<Utc>,
    ) -> Result<PricePoint, MarketDataError> {
        let now = self.clock.now();
        if instant > now {
            return Err(MarketDataError::unavailable(format!(
                "cannot get price for future instant {instant}"
            )));
        }

        let point = self
            .warm
            .price_at(ticker, instant)
            .await
            .map_err(|e| MarketDataError::unavailable(format!("warm store error: {e}")))?;

        point
            .map(|p| p.with_source(PriceSource::WarmStore))
            .ok_or_else(|| {
                MarketDataError::unavailable(format!(
                    "no price data for {ticker} at {instant}"
                ))
            })
    }

    async fn get_price_history(
        &self,
        ticker: &Ticker,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: PriceInterval,
    ) -> Result<Vec<PricePoint>, MarketDataError> {
        if end < start {
            return Err(MarketDataError::invalid_input(format!(
                "end ({end}) must not precede start ({start})"
            )));
        }

        let now = self.clock.now();

        // Hot range cache first (exact key, then subset scan).
        match self.hot.get_history(ticker, start, end, interval).await {
            Ok(Some(points)) if !points.is_empty() => {
                debug!(ticker = %ticker, count = points.len(), "history served from hot cache");
                return Ok(points
                    .iter()
                    .map(|p| p.with_source(PriceSource::HotCache))
                    .collect());
            }
            Ok(_) => {}
            Err(err) => warn!(ticker = %ticker, error = %err, "hot history read failed"),
        }

        let cached = self
            .warm
            .history(ticker, start, end, interval)
            .await
            .map_err(|e| MarketDataError::unavailable(format!("warm store error: {e}")))?;

        // Only daily data is ever fetched upstream.
        if interval != PriceInterval::Day1 {
            return Ok(cached);
        }

        let effective_end = end.min(pd_calendar::last_trading_day_at(now));
        if oracle::is_complete(&cached, start, end, effective_end) {
            debug!(ticker = %ticker, count = cached.len(), "history cache complete");
            return Ok(cached);
        }

        info!(
            ticker = %ticker,
            cached = cached.len(),
            "history cache incomplete, refreshing from upstream"
        );

        let can_proceed = self
            .limiter
            .can_proceed()
            .await
            .map_err(|e| MarketDataError::unavailable(format!("rate limiter error: {e}")))?;
        if !can_proceed {
            let wait = self.limiter.wait_time().await.unwrap_or(Duration::ZERO);
            return Err(MarketDataError::unavailable_retry_in(
                "rate limit exceeded, cannot refresh history",
                wait,
            ));
        }
        let consumed = self
            .limiter
            .consume()
            .await
            .map_err(|e| MarketDataError::unavailable(format!("rate limiter error: {e}")))?;
        if !consumed {
            return Err(MarketDataError::unavailable(
                "rate limit exceeded, cannot refresh history",
            ));
        }

        match self.provider.daily_history(ticker).await {
            Ok(points) => {
                for point in &points {
                    if let Err(err) = self.warm.upsert(point).await {
                        warn!(ticker = %ticker, error = %err, "history upsert failed");
                    }
                }
                let filtered: Vec<PricePoint> = points
                    .into_iter()
                    .filter(|p| p.timestamp() >= start && p.timestamp() <= end)
                    .collect();
                info!(ticker = %ticker, returned = filtered.len(), "history refreshed from upstream");
                Ok(filtered)
            }
            Err(err) => {
                // "No data available in range" is not an error; a failed
                // refresh degrades to the same empty answer.
                warn!(ticker = %ticker, error = %err, "history refresh failed");
                Ok(Vec::new())
            }
        }
    }

    async fn get_supported_tickers(&self) -> Result<Vec<Ticker>, MarketDataError> {
        self.warm
            .all_tickers()
            .await
            .map_err(|e| MarketDataError::unavailable(format!("failed to list tickers: {e}")))
    }
}
