//! Shared fixture for the tiered-adapter scenario tests: in-memory KV,
//! in-memory warm store, scripted provider, pinned clock.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use pd_cache::PriceCache;
use pd_domain::{Currency, FixedClock, Money, PriceInterval, PricePoint, PriceSource, Ticker};
use pd_kv::MemoryKv;
use pd_marketdata::TieredMarketData;
use pd_provider::ScriptedProvider;
use pd_ratelimit::RateLimiter;
use pd_store::MemoryWarmStore;

pub const HOT_PREFIX: &str = "paperdesk:price";
pub const RATE_PREFIX: &str = "paperdesk:ratelimit";
pub const CALLS_PER_MINUTE: u32 = 5;
pub const CALLS_PER_DAY: u32 = 500;

pub struct Harness {
    pub clock: Arc<FixedClock>,
    pub kv: Arc<MemoryKv>,
    /// Separate cache handle over the same store, for test setup/inspection.
    pub hot: PriceCache,
    pub warm: Arc<MemoryWarmStore>,
    pub provider: Arc<ScriptedProvider>,
    /// Separate limiter over the same buckets, for token assertions.
    pub limiter: RateLimiter,
    pub adapter: TieredMarketData,
}

pub fn harness(now: DateTime<Utc>) -> Harness {
    let clock = Arc::new(FixedClock::new(now));
    let kv = Arc::new(MemoryKv::new(clock.clone()));
    let warm = Arc::new(MemoryWarmStore::new());
    let provider = Arc::new(ScriptedProvider::new());

    let adapter = TieredMarketData::new(
        PriceCache::new(kv.clone(), HOT_PREFIX, Some(Duration::from_secs(3600))),
        RateLimiter::new(kv.clone(), RATE_PREFIX, CALLS_PER_MINUTE, CALLS_PER_DAY).unwrap(),
        warm.clone(),
        provider.clone(),
        clock.clone(),
    );

    Harness {
        hot: PriceCache::new(kv.clone(), HOT_PREFIX, Some(Duration::from_secs(3600))),
        limiter: RateLimiter::new(kv.clone(), RATE_PREFIX, CALLS_PER_MINUTE, CALLS_PER_DAY)
            .unwrap(),
        clock,
        kv,
        warm,
        provider,
        adapter,
    }
}

pub fn t(symbol: &str) -> Ticker {
    Ticker::new(symbol).unwrap()
}

pub fn usd(raw: &str) -> Money {
    Money::parse(raw, Currency::USD).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

pub fn point(
    symbol: &str,
    price: &str,
    ts: DateTime<Utc>,
    source: PriceSource,
) -> PricePoint {
    PricePoint::new(t(symbol), usd(price), ts, source, PriceInterval::Day1).unwrap()
}

/// Daily close points for the given January 2026 days.
pub fn daily_closes(symbol: &str, price: &str, days: &[u32]) -> Vec<PricePoint> {
    days.iter()
        .map(|d| {
            point(
                symbol,
                price,
                at(2026, 1, *d, 21, 0),
                PriceSource::Upstream,
            )
        })
        .collect()
}
