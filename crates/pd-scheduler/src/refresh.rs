//! Active-ticker price refresh job.
//!
//! Unions the watchlist's active tickers with tickers traded recently,
//! then walks the deduplicated list in small batches through the normal
//! `get_current_price` flow (which handles caching and rate limiting),
//! pausing between batches to amortize quota. Per-ticker failures are
//! logged and counted, never fatal.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use pd_domain::{Clock, Ticker};
use pd_marketdata::MarketDataPort;
use pd_store::WatchlistStore;
use tracing::{debug, error, info, warn};

use crate::ports::TransactionRepository;

#[derive(Clone, Debug)]
pub struct RefreshConfig {
    /// Tickers refreshed per batch.
    pub batch_size: usize,
    /// Pause between batches (not after the last).
    pub batch_delay: Duration,
    /// Refresh horizon recorded into the watchlist after a success.
    pub max_age: Duration,
    /// Transactions within this many days mark a ticker active.
    pub active_window_days: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        RefreshConfig {
            batch_size: 5,
            batch_delay: Duration::from_secs(60),
            max_age: Duration::from_secs(24 * 3600),
            active_window_days: 30,
        }
    }
}

/// Counts reported by one refresh run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub refreshed: usize,
    pub failed: usize,
    /// True when the run was skipped because another was in flight.
    pub skipped_overlap: bool,
}

pub struct RefreshJob {
    market_data: Arc<dyn MarketDataPort>,
    watchlist: Arc<dyn WatchlistStore>,
    transactions: Option<Arc<dyn TransactionRepository>>,
    clock: Arc<dyn Clock>,
    config: RefreshConfig,
    /// Non-overlap guard: at most one run at a time.
    running: tokio::sync::Mutex<()>,
}

impl RefreshJob {
    pub fn new(
        market_data: Arc<dyn MarketDataPort>,
        watchlist: Arc<dyn WatchlistStore>,
        transactions: Option<Arc<dyn TransactionRepository>>,
        clock: Arc<dyn Clock>,
        config: RefreshConfig,
    ) -> Self {
        RefreshJob {
            market_data,
            watchlist,
            transactions,
            clock,
            config,
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// Watchlist actives first (already priority-ordered), then recently
    /// traded tickers not already present.
    async fn active_tickers(&self) -> (Vec<Ticker>, BTreeSet<Ticker>) {
        let watchlist_tickers: Vec<Ticker> = match self.watchlist.active_all().await {
            Ok(entries) => entries.into_iter().map(|e| e.ticker).collect(),
            Err(err) => {
                error!(error = %err, "watchlist read failed, refreshing transactions only");
                Vec::new()
            }
        };
        let tracked: BTreeSet<Ticker> = watchlist_tickers.iter().cloned().collect();

        let mut all = watchlist_tickers;
        let mut seen = tracked.clone();
        if let Some(transactions) = &self.transactions {
            match transactions
                .distinct_tickers_since(self.config.active_window_days, self.clock.now())
                .await
            {
                Ok(traded) => {
                    for ticker in traded {
                        if seen.insert(ticker.clone()) {
                            all.push(ticker);
                        }
                    }
                }
                Err(err) => error!(error = %err, "active-ticker query failed"),
            }
        }

        (all, tracked)
    }

    /// One full refresh pass. Returns immediately (marked skipped) if a
    /// previous pass is still running.
    pub async fn run(&self) -> RefreshOutcome {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("refresh job already running, skipping this fire");
            return RefreshOutcome {
                skipped_overlap: true,
                ..RefreshOutcome::default()
            };
        };

        let (tickers, tracked) = self.active_tickers().await;
        info!(
            total = tickers.len(),
            watchlist = tracked.len(),
            "starting price refresh"
        );
        let mut outcome = RefreshOutcome::default();
        if tickers.is_empty() {
            return outcome;
        }

        let batches: Vec<&[Ticker]> = tickers.chunks(self.config.batch_size.max(1)).collect();
        let batch_count = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            debug!(batch = index + 1, of = batch_count, size = batch.len(), "refreshing batch");

            for ticker in batch {
                match self.market_data.get_current_price(ticker).await {
                    Ok(point) => {
                        outcome.refreshed += 1;
                        debug!(ticker = %ticker, price = %point.price(), source = %point.source(), "refreshed");

                        if tracked.contains(ticker) {
                            let now = self.clock.now();
                            let next = now
                                + chrono::Duration::from_std(self.config.max_age)
                                    .unwrap_or_else(|_| chrono::Duration::hours(24));
                            if let Err(err) = self.watchlist.touch_refresh(ticker, now, next).await
                            {
                                warn!(ticker = %ticker, error = %err, "watchlist touch failed");
                            }
                        }
                    }
                    Err(err) => {
                        outcome.failed += 1;
                        error!(ticker = %ticker, error = %err, "refresh failed");
                    }
                }
            }

            if index + 1 < batch_count {
                tokio::time::sleep(self.config.batch_delay).await;
            }
        }

        info!(
            refreshed = outcome.refreshed,
            failed = outcome.failed,
            "price refresh complete"
        );
        outcome
    }
}
