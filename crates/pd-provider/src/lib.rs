//! pd-provider
//!
//! Thin client for the upstream quote provider (Alpha-Vantage-compatible
//! wire contract): a single latest quote and a compact daily-history
//! series. Transient failures retry with exponential backoff; the error
//! taxonomy separates "ticker unknown" from "upstream broke its contract"
//! from "try again later".
//!
//! This client never consults the rate limiter — consuming a token before
//! calling is the caller's job.

pub mod scripted;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use pd_domain::{Currency, MarketDataError, Money, PriceInterval, PricePoint, PriceSource, Ticker};
use serde::Deserialize;
use tracing::{debug, warn};

pub use crate::scripted::ScriptedProvider;

/// Upstream quote source.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Today's last close, timestamped at fetch time (the timestamp feeds
    /// cache-freshness accounting, not market-close math).
    async fn quote(&self, ticker: &Ticker) -> Result<PricePoint, MarketDataError>;

    /// Up to ~100 trading days of daily OHLCV, ascending, each bar
    /// timestamped 21:00 UTC of its trading date.
    async fn daily_history(&self, ticker: &Ticker) -> Result<Vec<PricePoint>, MarketDataError>;
}

pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co/query";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Bar timestamps land on 21:00 UTC (16:00 ET) of their trading date.
const CLOSE_HOUR_UTC: u32 = 21;

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GlobalQuoteEnvelope {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct GlobalQuote {
    #[serde(rename = "01. symbol", default)]
    symbol: Option<String>,
    #[serde(rename = "05. price", default)]
    price: Option<String>,
    #[serde(rename = "07. latest trading day", default)]
    latest_trading_day: Option<String>,
}

impl GlobalQuote {
    /// An all-absent quote object is the provider's "no such ticker".
    fn is_empty(&self) -> bool {
        self.symbol.is_none() && self.price.is_none() && self.latest_trading_day.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct DailySeriesEnvelope {
    #[serde(rename = "Time Series (Daily)")]
    series: Option<BTreeMap<String, DailyBar>>,
}

#[derive(Debug, Deserialize)]
struct DailyBar {
    #[serde(rename = "1. open", default)]
    open: Option<String>,
    #[serde(rename = "2. high", default)]
    high: Option<String>,
    #[serde(rename = "3. low", default)]
    low: Option<String>,
    #[serde(rename = "4. close", default)]
    close: Option<String>,
    #[serde(rename = "5. volume", default)]
    volume: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Alpha Vantage HTTP client.
pub struct AlphaVantageClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
    max_retries: u32,
}

impl AlphaVantageClient {
    /// The `reqwest::Client` should be the process-wide instance; this
    /// type only borrows its connection pool.
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        AlphaVantageClient {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// GET with retries. 404 is terminal (`TickerNotFound`); timeouts,
    /// connection failures, and non-404 error statuses retry with
    /// `2^attempt`-second backoff, no sleep after the last attempt.
    async fn get_json(
        &self,
        ticker: &Ticker,
        params: &[(&str, &str)],
    ) -> Result<serde_json::Value, MarketDataError> {
        let mut last_error =
            MarketDataError::unavailable("upstream request failed after retries");

        for attempt in 0..self.max_retries {
            match self
                .http
                .get(&self.base_url)
                .query(params)
                .timeout(self.timeout)
                .send()
                .await
            {
                Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
                    return resp.json::<serde_json::Value>().await.map_err(|e| {
                        MarketDataError::invalid_price(
                            ticker.as_str(),
                            format!("unparseable upstream body: {e}"),
                        )
                    });
                }
                Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                    return Err(MarketDataError::ticker_not_found(
                        ticker.as_str(),
                        "upstream returned 404",
                    ));
                }
                Ok(resp) => {
                    last_error = MarketDataError::unavailable(format!(
                        "upstream returned status {}",
                        resp.status().as_u16()
                    ));
                }
                Err(e) if e.is_timeout() => {
                    last_error =
                        MarketDataError::unavailable(format!("upstream request timeout: {e}"));
                }
                Err(e) => {
                    last_error =
                        MarketDataError::unavailable(format!("upstream network error: {e}"));
                }
            }

            if attempt + 1 < self.max_retries {
                let backoff = Duration::from_secs(1 << attempt);
                debug!(ticker = %ticker, attempt, ?backoff, "retrying upstream call");
                tokio::time::sleep(backoff).await;
            }
        }

        warn!(ticker = %ticker, error = %last_error, "upstream call exhausted retries");
        Err(last_error)
    }
}

fn parse_quote(
    ticker: &Ticker,
    body: serde_json::Value,
    fetched_at: chrono::DateTime<Utc>,
) -> Result<PricePoint, MarketDataError> {
    let envelope: GlobalQuoteEnvelope = serde_json::from_value(body).map_err(|e| {
        MarketDataError::invalid_price(ticker.as_str(), format!("malformed quote body: {e}"))
    })?;

    let quote = match envelope.global_quote {
        Some(q) if !q.is_empty() => q,
        _ => {
            return Err(MarketDataError::ticker_not_found(
                ticker.as_str(),
                "ticker not found in upstream database",
            ))
        }
    };

    let price_raw = quote.price.ok_or_else(|| {
        MarketDataError::invalid_price(ticker.as_str(), "missing price field in quote")
    })?;
    let price = Money::parse(&price_raw, Currency::USD).map_err(|e| {
        MarketDataError::invalid_price(ticker.as_str(), format!("bad price '{price_raw}': {e}"))
    })?;
    if !price.is_positive() {
        return Err(MarketDataError::invalid_price(
            ticker.as_str(),
            format!("non-positive price: {price_raw}"),
        ));
    }

    PricePoint::new(
        ticker.clone(),
        price,
        fetched_at,
        PriceSource::Upstream,
        PriceInterval::Day1,
    )
    .map_err(|e| MarketDataError::invalid_price(ticker.as_str(), e.to_string()))
}

fn parse_daily_history(
    ticker: &Ticker,
    body: serde_json::Value,
) -> Result<Vec<PricePoint>, MarketDataError> {
    let envelope: DailySeriesEnvelope = serde_json::from_value(body).map_err(|e| {
        MarketDataError::invalid_price(ticker.as_str(), format!("malformed series body: {e}"))
    })?;

    let series = match envelope.series {
        Some(s) if !s.is_empty() => s,
        _ => {
            return Err(MarketDataError::ticker_not_found(
                ticker.as_str(),
                "ticker not found in upstream database",
            ))
        }
    };

    let bad = |field: &str, detail: String| {
        MarketDataError::invalid_price(ticker.as_str(), format!("{field}: {detail}"))
    };

    let mut points = Vec::with_capacity(series.len());
    // BTreeMap iteration is ascending by date key, which is the required
    // output order.
    for (date_raw, bar) in &series {
        let Some(close_raw) = bar.close.as_deref() else {
            continue; // incomplete bar
        };
        let close = Money::parse(close_raw, Currency::USD)
            .map_err(|e| bad("close", e.to_string()))?;
        if !close.is_positive() {
            continue; // skip junk bars instead of poisoning the series
        }

        let date: NaiveDate = date_raw
            .parse()
            .map_err(|_| bad("date", format!("'{date_raw}' is not YYYY-MM-DD")))?;
        let timestamp = Utc.from_utc_datetime(
            &date
                .and_hms_opt(CLOSE_HOUR_UTC, 0, 0)
                .expect("21:00:00 is a valid time"),
        );

        let parse_opt = |raw: &Option<String>, field: &str| -> Result<Option<Money>, MarketDataError> {
            raw.as_deref()
                .map(|s| Money::parse(s, Currency::USD).map_err(|e| bad(field, e.to_string())))
                .transpose()
        };
        let open = parse_opt(&bar.open, "open")?;
        let high = parse_opt(&bar.high, "high")?;
        let low = parse_opt(&bar.low, "low")?;
        let volume = bar
            .volume
            .as_deref()
            .and_then(|s| s.parse::<u64>().ok());

        let point = PricePoint::new(
            ticker.clone(),
            close,
            timestamp,
            PriceSource::Upstream,
            PriceInterval::Day1,
        )
        .and_then(|p| p.with_ohlcv(open, high, low, Some(close), volume))
        .map_err(|e| bad("bar", e.to_string()))?;
        points.push(point);
    }

    Ok(points)
}

#[async_trait]
impl QuoteProvider for AlphaVantageClient {
    async fn quote(&self, ticker: &Ticker) -> Result<PricePoint, MarketDataError> {
        let params = [
            ("function", "GLOBAL_QUOTE"),
            ("symbol", ticker.as_str()),
            ("apikey", self.api_key.as_str()),
        ];
        let body = self.get_json(ticker, &params).await?;
        parse_quote(ticker, body, Utc::now())
    }

    async fn daily_history(&self, ticker: &Ticker) -> Result<Vec<PricePoint>, MarketDataError> {
        let params = [
            ("function", "TIME_SERIES_DAILY"),
            ("symbol", ticker.as_str()),
            ("outputsize", "compact"),
            ("apikey", self.api_key.as_str()),
        ];
        let body = self.get_json(ticker, &params).await?;
        parse_daily_history(ticker, body)
    }
}
