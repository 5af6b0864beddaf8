//! Scripted in-process [`QuoteProvider`] fake.
//!
//! Downstream tests stub per-ticker outcomes and assert on how many
//! upstream calls a flow actually made — several cache properties are
//! phrased as "zero upstream calls".

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use pd_domain::{MarketDataError, PricePoint, Ticker};

use crate::QuoteProvider;

#[derive(Default)]
pub struct ScriptedProvider {
    quotes: Mutex<HashMap<String, Result<PricePoint, MarketDataError>>>,
    histories: Mutex<HashMap<String, Result<Vec<PricePoint>, MarketDataError>>>,
    quote_calls: Mutex<Vec<String>>,
    history_calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stub the (repeating) outcome of `quote` for one ticker.
    pub fn stub_quote(&self, ticker: &Ticker, result: Result<PricePoint, MarketDataError>) {
        self.quotes
            .lock()
            .expect("stub poisoned")
            .insert(ticker.as_str().to_string(), result);
    }

    /// Stub the (repeating) outcome of `daily_history` for one ticker.
    pub fn stub_history(
        &self,
        ticker: &Ticker,
        result: Result<Vec<PricePoint>, MarketDataError>,
    ) {
        self.histories
            .lock()
            .expect("stub poisoned")
            .insert(ticker.as_str().to_string(), result);
    }

    /// Total `quote` calls observed.
    pub fn quote_calls(&self) -> usize {
        self.quote_calls.lock().expect("stub poisoned").len()
    }

    /// Total `daily_history` calls observed.
    pub fn history_calls(&self) -> usize {
        self.history_calls.lock().expect("stub poisoned").len()
    }

    /// Tickers passed to `quote`, in call order.
    pub fn quote_call_log(&self) -> Vec<String> {
        self.quote_calls.lock().expect("stub poisoned").clone()
    }
}

#[async_trait]
impl QuoteProvider for ScriptedProvider {
    async fn quote(&self, ticker: &Ticker) -> Result<PricePoint, MarketDataError> {
        self.quote_calls
            .lock()
            .expect("stub poisoned")
            .push(ticker.as_str().to_string());
        self.quotes
            .lock()
            .expect("stub poisoned")
            .get(ticker.as_str())
            .cloned()
            .unwrap_or_else(|| {
                Err(MarketDataError::ticker_not_found(
                    ticker.as_str(),
                    "no stubbed quote",
                ))
            })
    }

    async fn daily_history(&self, ticker: &Ticker) -> Result<Vec<PricePoint>, MarketDataError> {
        self.history_calls
            .lock()
            .expect("stub poisoned")
            .push(ticker.as_str().to_string());
        self.histories
            .lock()
            .expect("stub poisoned")
            .get(ticker.as_str())
            .cloned()
            .unwrap_or_else(|| {
                Err(MarketDataError::ticker_not_found(
                    ticker.as_str(),
                    "no stubbed history",
                ))
            })
    }
}
