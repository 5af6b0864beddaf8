//! PricePoint — the value object the whole cache hierarchy moves around.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{DomainError, MarketDataError};
use crate::money::Money;
use crate::ticker::Ticker;

// ---------------------------------------------------------------------------
// PriceSource
// ---------------------------------------------------------------------------

/// Which tier a price point was served from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PriceSource {
    /// Fetched from the upstream quote provider on this request.
    Upstream,
    /// Served from the hot key/value cache.
    HotCache,
    /// Served from the durable warm store.
    WarmStore,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceSource::Upstream => "upstream",
            PriceSource::HotCache => "hot-cache",
            PriceSource::WarmStore => "warm-store",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upstream" => Some(PriceSource::Upstream),
            "hot-cache" => Some(PriceSource::HotCache),
            "warm-store" => Some(PriceSource::WarmStore),
            _ => None,
        }
    }
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PriceInterval
// ---------------------------------------------------------------------------

/// Bar interval. Only `1day` is ever fetched from the upstream; the rest
/// exist so stored intraday data can be served back out.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PriceInterval {
    Min1,
    Min5,
    Min15,
    Min30,
    Hour1,
    Day1,
}

impl PriceInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceInterval::Min1 => "1min",
            PriceInterval::Min5 => "5min",
            PriceInterval::Min15 => "15min",
            PriceInterval::Min30 => "30min",
            PriceInterval::Hour1 => "1hour",
            PriceInterval::Day1 => "1day",
        }
    }

    /// Parse a user-supplied interval string. Unknown intervals are a
    /// client error.
    pub fn parse(s: &str) -> Result<Self, MarketDataError> {
        match s {
            "1min" => Ok(PriceInterval::Min1),
            "5min" => Ok(PriceInterval::Min5),
            "15min" => Ok(PriceInterval::Min15),
            "30min" => Ok(PriceInterval::Min30),
            "1hour" => Ok(PriceInterval::Hour1),
            "1day" => Ok(PriceInterval::Day1),
            other => Err(MarketDataError::invalid_input(format!(
                "invalid interval '{other}', expected one of: 1min 5min 15min 30min 1hour 1day"
            ))),
        }
    }
}

impl fmt::Display for PriceInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PricePoint
// ---------------------------------------------------------------------------

/// An immutable observation of a ticker's price at an instant.
///
/// Invariants enforced at construction:
/// - `price` is strictly positive;
/// - every OHLC component carries the same currency as `price`;
/// - `low <= open <= high` and `low <= close <= high` wherever the
///   participating components are present.
///
/// Timestamps are `DateTime<Utc>` — naive instants cannot be represented,
/// which is the point. Codecs that read external encodings must reject
/// anything that does not parse as UTC.
///
/// Equality compares `(ticker, price, timestamp, source, interval)` only;
/// OHLCV is deliberately outside equality so a cache round-trip that
/// drops or keeps bars still compares equal on the identity fields.
#[derive(Clone, Debug)]
pub struct PricePoint {
    ticker: Ticker,
    price: Money,
    timestamp: DateTime<Utc>,
    source: PriceSource,
    interval: PriceInterval,
    open: Option<Money>,
    high: Option<Money>,
    low: Option<Money>,
    close: Option<Money>,
    volume: Option<u64>,
}

impl PricePoint {
    pub fn new(
        ticker: Ticker,
        price: Money,
        timestamp: DateTime<Utc>,
        source: PriceSource,
        interval: PriceInterval,
    ) -> Result<Self, DomainError> {
        if !price.is_positive() {
            return Err(DomainError::NonPositivePrice {
                raw: price.to_string(),
            });
        }
        Ok(PricePoint {
            ticker,
            price,
            timestamp,
            source,
            interval,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
        })
    }

    /// Attach OHLCV data, validating currency agreement and bar ordering.
    pub fn with_ohlcv(
        mut self,
        open: Option<Money>,
        high: Option<Money>,
        low: Option<Money>,
        close: Option<Money>,
        volume: Option<u64>,
    ) -> Result<Self, DomainError> {
        for component in [&open, &high, &low, &close].into_iter().flatten() {
            if component.currency() != self.price.currency() {
                return Err(DomainError::CurrencyMismatch {
                    left: self.price.currency().as_str().to_string(),
                    right: component.currency().as_str().to_string(),
                });
            }
        }

        let check = |lo: &Option<Money>, mid: &Option<Money>, hi: &Option<Money>, name: &str| {
            if let (Some(lo), Some(mid)) = (lo, mid) {
                if mid.micros() < lo.micros() {
                    return Err(DomainError::OhlcViolation(format!("{name} below low")));
                }
            }
            if let (Some(mid), Some(hi)) = (mid, hi) {
                if mid.micros() > hi.micros() {
                    return Err(DomainError::OhlcViolation(format!("{name} above high")));
                }
            }
            Ok(())
        };
        check(&low, &open, &high, "open")?;
        check(&low, &close, &high, "close")?;
        if let (Some(lo), Some(hi)) = (&low, &high) {
            if lo.micros() > hi.micros() {
                return Err(DomainError::OhlcViolation("low above high".into()));
            }
        }

        self.open = open;
        self.high = high;
        self.low = low;
        self.close = close;
        self.volume = volume;
        Ok(self)
    }

    /// Derive a copy tagged with a different source. Used when serving a
    /// stored point back out of a cache tier.
    pub fn with_source(&self, source: PriceSource) -> Self {
        let mut copy = self.clone();
        copy.source = source;
        copy
    }

    /// `true` when the point is older than `max_age` relative to `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        let age = now.signed_duration_since(self.timestamp);
        age > chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX)
    }

    pub fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    pub fn price(&self) -> Money {
        self.price
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source(&self) -> PriceSource {
        self.source
    }

    pub fn interval(&self) -> PriceInterval {
        self.interval
    }

    pub fn open(&self) -> Option<Money> {
        self.open
    }

    pub fn high(&self) -> Option<Money> {
        self.high
    }

    pub fn low(&self) -> Option<Money> {
        self.low
    }

    pub fn close(&self) -> Option<Money> {
        self.close
    }

    pub fn volume(&self) -> Option<u64> {
        self.volume
    }
}

impl PartialEq for PricePoint {
    fn eq(&self, other: &Self) -> bool {
        self.ticker == other.ticker
            && self.price == other.price
            && self.timestamp == other.timestamp
            && self.source == other.source
            && self.interval == other.interval
    }
}

impl Eq for PricePoint {}
