//! In-memory implementations of [`WarmStore`] and [`WatchlistStore`].
//!
//! Same observable semantics as the Postgres backing, held in
//! `BTreeMap`s for deterministic iteration. Used across the workspace's
//! orchestrator and scheduler tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pd_domain::{PriceInterval, PricePoint, PriceSource, Ticker};

use crate::{WarmStore, WatchlistEntry, WatchlistStore};

// ---------------------------------------------------------------------------
// MemoryWarmStore
// ---------------------------------------------------------------------------

type PriceKey = (String, DateTime<Utc>, &'static str);

#[derive(Default)]
pub struct MemoryWarmStore {
    rows: Mutex<BTreeMap<PriceKey, PricePoint>>,
}

impl MemoryWarmStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().expect("store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl WarmStore for MemoryWarmStore {
    async fn upsert(&self, point: &PricePoint) -> Result<()> {
        let key = (
            point.ticker().as_str().to_string(),
            point.timestamp(),
            point.interval().as_str(),
        );
        self.rows
            .lock()
            .expect("store poisoned")
            .insert(key, point.clone());
        Ok(())
    }

    async fn latest(
        &self,
        ticker: &Ticker,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<PricePoint>> {
        let cutoff = now - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let rows = self.rows.lock().expect("store poisoned");
        Ok(rows
            .values()
            .filter(|p| p.ticker() == ticker && p.timestamp() >= cutoff)
            .max_by_key(|p| p.timestamp())
            .map(|p| p.with_source(PriceSource::WarmStore)))
    }

    async fn price_at(
        &self,
        ticker: &Ticker,
        instant: DateTime<Utc>,
    ) -> Result<Option<PricePoint>> {
        let rows = self.rows.lock().expect("store poisoned");
        Ok(rows
            .values()
            .filter(|p| p.ticker() == ticker && p.timestamp() <= instant)
            .max_by_key(|p| p.timestamp())
            .map(|p| p.with_source(PriceSource::WarmStore)))
    }

    async fn history(
        &self,
        ticker: &Ticker,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: PriceInterval,
    ) -> Result<Vec<PricePoint>> {
        let rows = self.rows.lock().expect("store poisoned");
        let mut out: Vec<PricePoint> = rows
            .values()
            .filter(|p| {
                p.ticker() == ticker
                    && p.interval() == interval
                    && p.timestamp() >= start
                    && p.timestamp() <= end
            })
            .map(|p| p.with_source(PriceSource::WarmStore))
            .collect();
        out.sort_by_key(|p| p.timestamp());
        Ok(out)
    }

    async fn all_tickers(&self) -> Result<Vec<Ticker>> {
        let rows = self.rows.lock().expect("store poisoned");
        let mut tickers: Vec<Ticker> = rows.values().map(|p| p.ticker().clone()).collect();
        tickers.sort();
        tickers.dedup();
        Ok(tickers)
    }
}

// ---------------------------------------------------------------------------
// MemoryWatchlist
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryWatchlist {
    entries: Mutex<BTreeMap<String, WatchlistEntry>>,
}

impl MemoryWatchlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct read of one entry (active or not). Test helper.
    pub fn entry(&self, ticker: &Ticker) -> Option<WatchlistEntry> {
        self.entries
            .lock()
            .expect("watchlist poisoned")
            .get(ticker.as_str())
            .cloned()
    }
}

#[async_trait]
impl WatchlistStore for MemoryWatchlist {
    async fn add(&self, ticker: &Ticker, priority: i32, refresh_interval: Duration) -> Result<()> {
        let mut entries = self.entries.lock().expect("watchlist poisoned");
        entries
            .entry(ticker.as_str().to_string())
            .and_modify(|e| {
                e.active = true;
                e.priority = e.priority.min(priority);
                e.refresh_interval = refresh_interval;
            })
            .or_insert_with(|| WatchlistEntry {
                ticker: ticker.clone(),
                priority,
                active: true,
                last_refresh_at: None,
                next_refresh_at: None,
                refresh_interval,
            });
        Ok(())
    }

    async fn remove(&self, ticker: &Ticker) -> Result<()> {
        if let Some(e) = self
            .entries
            .lock()
            .expect("watchlist poisoned")
            .get_mut(ticker.as_str())
        {
            e.active = false;
        }
        Ok(())
    }

    async fn stale(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<WatchlistEntry>> {
        let entries = self.entries.lock().expect("watchlist poisoned");
        let mut due: Vec<WatchlistEntry> = entries
            .values()
            .filter(|e| e.active && e.next_refresh_at.map_or(true, |at| at <= now))
            .cloned()
            .collect();
        // Priority ascending, then oldest next_refresh_at with nulls first.
        due.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| match (a.next_refresh_at, b.next_refresh_at) {
                    (None, None) => std::cmp::Ordering::Equal,
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (Some(x), Some(y)) => x.cmp(&y),
                })
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn touch_refresh(
        &self,
        ticker: &Ticker,
        now: DateTime<Utc>,
        next_at: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(e) = self
            .entries
            .lock()
            .expect("watchlist poisoned")
            .get_mut(ticker.as_str())
        {
            e.last_refresh_at = Some(now);
            e.next_refresh_at = Some(next_at);
        }
        Ok(())
    }

    async fn active_all(&self) -> Result<Vec<WatchlistEntry>> {
        let entries = self.entries.lock().expect("watchlist poisoned");
        let mut active: Vec<WatchlistEntry> =
            entries.values().filter(|e| e.active).cloned().collect();
        active.sort_by_key(|e| (e.priority, e.ticker.clone()));
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pd_domain::{Currency, Money};

    fn ts(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, d, h, 0, 0).unwrap()
    }

    fn point(ticker: &str, price: &str, at: DateTime<Utc>) -> PricePoint {
        PricePoint::new(
            Ticker::new(ticker).unwrap(),
            Money::parse(price, Currency::USD).unwrap(),
            at,
            PriceSource::Upstream,
            PriceInterval::Day1,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_the_row_key() {
        let store = MemoryWarmStore::new();
        let p1 = point("AAPL", "150", ts(12, 21));
        let p2 = point("AAPL", "151", ts(12, 21)); // same key, new price
        store.upsert(&p1).await.unwrap();
        store.upsert(&p2).await.unwrap();
        assert_eq!(store.len(), 1);

        let ticker = Ticker::new("AAPL").unwrap();
        let got = store.price_at(&ticker, ts(13, 0)).await.unwrap().unwrap();
        assert_eq!(got.price(), Money::parse("151", Currency::USD).unwrap());
    }

    #[tokio::test]
    async fn latest_respects_max_age() {
        let store = MemoryWarmStore::new();
        store.upsert(&point("AAPL", "150", ts(12, 9))).await.unwrap();
        let ticker = Ticker::new("AAPL").unwrap();

        let now = ts(12, 15);
        let fresh = store
            .latest(&ticker, Duration::from_secs(4 * 3600), now)
            .await
            .unwrap();
        assert!(fresh.is_none(), "6h-old row is outside a 4h window");

        let wide = store
            .latest(&ticker, Duration::from_secs(8 * 3600), now)
            .await
            .unwrap()
            .expect("within 8h window");
        assert_eq!(wide.source(), PriceSource::WarmStore);
    }

    #[tokio::test]
    async fn price_at_picks_most_recent_at_or_before() {
        let store = MemoryWarmStore::new();
        store.upsert(&point("AAPL", "150", ts(14, 21))).await.unwrap();
        store.upsert(&point("AAPL", "152", ts(15, 21))).await.unwrap();
        store.upsert(&point("AAPL", "154", ts(16, 21))).await.unwrap();
        let ticker = Ticker::new("AAPL").unwrap();

        let got = store.price_at(&ticker, ts(16, 20)).await.unwrap().unwrap();
        assert_eq!(got.timestamp(), ts(15, 21));

        assert!(store.price_at(&ticker, ts(14, 0)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_is_ascending_and_interval_scoped() {
        let store = MemoryWarmStore::new();
        store.upsert(&point("AAPL", "152", ts(15, 21))).await.unwrap();
        store.upsert(&point("AAPL", "150", ts(14, 21))).await.unwrap();
        let ticker = Ticker::new("AAPL").unwrap();

        let got = store
            .history(&ticker, ts(14, 0), ts(16, 0), PriceInterval::Day1)
            .await
            .unwrap();
        assert_eq!(got.len(), 2);
        assert!(got[0].timestamp() < got[1].timestamp());

        let none = store
            .history(&ticker, ts(14, 0), ts(16, 0), PriceInterval::Hour1)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn all_tickers_is_sorted_and_unique() {
        let store = MemoryWarmStore::new();
        store.upsert(&point("MSFT", "425", ts(14, 21))).await.unwrap();
        store.upsert(&point("AAPL", "150", ts(14, 21))).await.unwrap();
        store.upsert(&point("AAPL", "151", ts(15, 21))).await.unwrap();

        let tickers = store.all_tickers().await.unwrap();
        let symbols: Vec<&str> = tickers.iter().map(|t| t.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT"]);
    }

    #[tokio::test]
    async fn readd_reactivates_and_only_lowers_priority() {
        let wl = MemoryWatchlist::new();
        let ticker = Ticker::new("AAPL").unwrap();
        let day = Duration::from_secs(86_400);

        wl.add(&ticker, 5, day).await.unwrap();
        wl.remove(&ticker).await.unwrap();
        assert!(!wl.entry(&ticker).unwrap().active);

        // Re-add with a worse (higher) priority: reactivates, keeps 5.
        wl.add(&ticker, 9, day).await.unwrap();
        let e = wl.entry(&ticker).unwrap();
        assert!(e.active);
        assert_eq!(e.priority, 5);

        // Re-add with a better (lower) priority: takes it.
        wl.add(&ticker, 2, day).await.unwrap();
        assert_eq!(wl.entry(&ticker).unwrap().priority, 2);
    }

    #[tokio::test]
    async fn stale_orders_by_priority_then_oldest_due() {
        let wl = MemoryWatchlist::new();
        let day = Duration::from_secs(86_400);
        let now = ts(12, 12);

        for (sym, prio) in [("CCC", 3), ("AAA", 1), ("BBB", 1)] {
            wl.add(&Ticker::new(sym).unwrap(), prio, day).await.unwrap();
        }
        // BBB was refreshed and is due again earlier than AAA's never-refreshed.
        wl.touch_refresh(&Ticker::new("BBB").unwrap(), ts(11, 12), ts(12, 0))
            .await
            .unwrap();
        // CCC refreshed, not yet due.
        wl.touch_refresh(&Ticker::new("CCC").unwrap(), ts(12, 11), ts(13, 12))
            .await
            .unwrap();

        let due = wl.stale(now, 10).await.unwrap();
        let symbols: Vec<&str> = due.iter().map(|e| e.ticker.as_str()).collect();
        // AAA (priority 1, never refreshed = nulls first), then BBB; CCC not due.
        assert_eq!(symbols, vec!["AAA", "BBB"]);

        let capped = wl.stale(now, 1).await.unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn inactive_entries_never_surface() {
        let wl = MemoryWatchlist::new();
        let day = Duration::from_secs(86_400);
        wl.add(&Ticker::new("AAPL").unwrap(), 1, day).await.unwrap();
        wl.add(&Ticker::new("MSFT").unwrap(), 2, day).await.unwrap();
        wl.remove(&Ticker::new("AAPL").unwrap()).await.unwrap();

        let active = wl.active_all().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].ticker.as_str(), "MSFT");

        let due = wl.stale(ts(12, 12), 10).await.unwrap();
        assert!(due.iter().all(|e| e.ticker.as_str() != "AAPL"));
    }
}
