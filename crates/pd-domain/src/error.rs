//! Error taxonomy for the market-data core.
//!
//! Two layers:
//!
//! - [`DomainError`] — a value object could not be constructed (bad ticker,
//!   mismatched currencies, OHLC order violation, …). These indicate a bug
//!   or corrupt input at a specific call site.
//! - [`MarketDataError`] — the behavioral taxonomy surfaced to callers of
//!   the market-data port: not-found vs. transient-unavailable vs.
//!   invalid-upstream-data vs. invalid-client-input. HTTP layers map these
//!   to 404 / 503 / 500 / 4xx respectively.

use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// DomainError
// ---------------------------------------------------------------------------

/// A value-object invariant was violated during construction or arithmetic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Arithmetic across two different currencies.
    CurrencyMismatch { left: String, right: String },
    /// A price that must be strictly positive was not.
    NonPositivePrice { raw: String },
    /// OHLC ordering (`low <= open/close <= high`) does not hold.
    OhlcViolation(String),
    /// A decimal string carried more than six fractional digits.
    TooManyDecimalPlaces { raw: String },
    /// A decimal string could not be parsed at all.
    InvalidDecimal { raw: String },
    /// Integer overflow in a monetary operation.
    Overflow { op: String },
    /// Ticker symbol failed validation.
    InvalidTicker { raw: String },
    /// Currency code failed validation.
    InvalidCurrency { raw: String },
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::CurrencyMismatch { left, right } => {
                write!(f, "currency mismatch: {left} vs {right}")
            }
            DomainError::NonPositivePrice { raw } => {
                write!(f, "price must be positive, got {raw}")
            }
            DomainError::OhlcViolation(msg) => write!(f, "OHLC ordering violated: {msg}"),
            DomainError::TooManyDecimalPlaces { raw } => {
                write!(f, "more than 6 decimal places: '{raw}'")
            }
            DomainError::InvalidDecimal { raw } => write!(f, "not a decimal number: '{raw}'"),
            DomainError::Overflow { op } => write!(f, "integer overflow in {op}"),
            DomainError::InvalidTicker { raw } => {
                write!(f, "invalid ticker '{raw}' (want 1-5 uppercase letters)")
            }
            DomainError::InvalidCurrency { raw } => {
                write!(f, "invalid currency code '{raw}' (want 3 uppercase letters)")
            }
        }
    }
}

impl std::error::Error for DomainError {}

// ---------------------------------------------------------------------------
// MarketDataError
// ---------------------------------------------------------------------------

/// Behavioral error kinds of the market-data port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketDataError {
    /// No upstream or stored record of the ticker; also raised when markets
    /// are closed and no last-close row exists.
    TickerNotFound { ticker: String, detail: String },
    /// Transient: rate-limited with no fallback, upstream failure after
    /// retries, or no data at the requested instant. `retry_after` is set
    /// when a wait time is known.
    Unavailable {
        detail: String,
        retry_after: Option<Duration>,
    },
    /// Upstream returned a body that violates its own contract (missing or
    /// non-positive price, unparseable structure).
    InvalidPrice { ticker: String, detail: String },
    /// The caller's input was invalid (reversed range, bad interval, bad
    /// limiter capacity).
    InvalidInput { detail: String },
}

impl MarketDataError {
    pub fn ticker_not_found(ticker: impl Into<String>, detail: impl Into<String>) -> Self {
        MarketDataError::TickerNotFound {
            ticker: ticker.into(),
            detail: detail.into(),
        }
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        MarketDataError::Unavailable {
            detail: detail.into(),
            retry_after: None,
        }
    }

    pub fn unavailable_retry_in(detail: impl Into<String>, retry_after: Duration) -> Self {
        MarketDataError::Unavailable {
            detail: detail.into(),
            retry_after: Some(retry_after),
        }
    }

    pub fn invalid_price(ticker: impl Into<String>, detail: impl Into<String>) -> Self {
        MarketDataError::InvalidPrice {
            ticker: ticker.into(),
            detail: detail.into(),
        }
    }

    pub fn invalid_input(detail: impl Into<String>) -> Self {
        MarketDataError::InvalidInput {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for MarketDataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketDataError::TickerNotFound { ticker, detail } => {
                write!(f, "ticker not found: {ticker} ({detail})")
            }
            MarketDataError::Unavailable {
                detail,
                retry_after: Some(wait),
            } => write!(
                f,
                "market data unavailable, retry in {} seconds: {detail}",
                wait.as_secs()
            ),
            MarketDataError::Unavailable {
                detail,
                retry_after: None,
            } => write!(f, "market data unavailable: {detail}"),
            MarketDataError::InvalidPrice { ticker, detail } => {
                write!(f, "invalid price data for {ticker}: {detail}")
            }
            MarketDataError::InvalidInput { detail } => write!(f, "invalid input: {detail}"),
        }
    }
}

impl std::error::Error for MarketDataError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_message_includes_wait_seconds() {
        let err = MarketDataError::unavailable_retry_in("minute quota", Duration::from_secs(42));
        let msg = err.to_string();
        assert!(msg.contains("retry in 42 seconds"), "got: {msg}");
    }

    #[test]
    fn not_found_message_names_the_ticker() {
        let err = MarketDataError::ticker_not_found("AAPL", "markets closed");
        assert!(err.to_string().contains("AAPL"));
    }
}
