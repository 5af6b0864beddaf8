//! Scenarios: daily snapshot orchestration — per-portfolio error
//! isolation, idempotent re-runs, and inclusive backfill.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use pd_domain::{Currency, FixedClock, Money};
use pd_scheduler::ports::{
    MemoryPortfolios, MemorySnapshots, PortfolioRef, PortfolioSnapshot, SnapshotCalculator,
    SnapshotRepository,
};
use pd_scheduler::SnapshotJobService;
use uuid::Uuid;

fn usd(raw: &str) -> Money {
    Money::parse(raw, Currency::USD).unwrap()
}

fn snapshot(total: &str) -> PortfolioSnapshot {
    PortfolioSnapshot {
        total_value: usd(total),
        cash_balance: usd("1000"),
        positions_value: usd("0"),
    }
}

/// Calculator stub: configurable per-portfolio failures, call log.
#[derive(Default)]
struct StubCalculator {
    failing: BTreeSet<Uuid>,
    calls: Mutex<Vec<(Uuid, NaiveDate)>>,
}

#[async_trait]
impl SnapshotCalculator for StubCalculator {
    async fn build(&self, portfolio_id: Uuid, date: NaiveDate) -> anyhow::Result<PortfolioSnapshot> {
        self.calls.lock().unwrap().push((portfolio_id, date));
        if self.failing.contains(&portfolio_id) {
            anyhow::bail!("valuation failed for {portfolio_id}");
        }
        Ok(snapshot("10000"))
    }
}

struct Fixture {
    portfolios: Arc<MemoryPortfolios>,
    snapshots: Arc<MemorySnapshots>,
    calculator: Arc<StubCalculator>,
}

impl Fixture {
    fn new(calculator: StubCalculator) -> Self {
        Fixture {
            portfolios: Arc::new(MemoryPortfolios::new()),
            snapshots: Arc::new(MemorySnapshots::new()),
            calculator: Arc::new(calculator),
        }
    }

    fn add_portfolio(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.portfolios.insert(PortfolioRef {
            id,
            user_id: Uuid::new_v4(),
            name: format!("portfolio-{id}"),
        });
        id
    }

    fn service(&self) -> SnapshotJobService {
        SnapshotJobService::new(
            self.portfolios.clone(),
            self.snapshots.clone(),
            self.calculator.clone(),
            Arc::new(FixedClock::new(
                Utc.with_ymd_and_hms(2026, 1, 12, 0, 5, 0).unwrap(),
            )),
        )
    }
}

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
}

#[tokio::test]
async fn snapshots_every_portfolio_and_reports_counts() {
    let f = Fixture::new(StubCalculator::default());
    f.add_portfolio();
    f.add_portfolio();
    f.add_portfolio();

    let counts = f.service().run_daily(Some(date(12))).await;

    assert_eq!((counts.processed, counts.succeeded, counts.failed), (3, 3, 0));
    assert_eq!(f.snapshots.len(), 3);
}

#[tokio::test]
async fn default_date_is_today_per_the_clock() {
    let f = Fixture::new(StubCalculator::default());
    let id = f.add_portfolio();

    f.service().run_daily(None).await;

    let latest = f.snapshots.latest(id).await.unwrap().unwrap();
    assert_eq!(latest.0, date(12));
}

#[tokio::test]
async fn one_broken_portfolio_does_not_starve_the_rest() {
    let mut calc = StubCalculator::default();
    let f0 = Fixture::new(StubCalculator::default());
    let broken = f0.add_portfolio();
    calc.failing.insert(broken);

    let f = Fixture {
        portfolios: f0.portfolios,
        snapshots: f0.snapshots,
        calculator: Arc::new(calc),
    };
    f.add_portfolio();
    f.add_portfolio();

    let counts = f.service().run_daily(Some(date(12))).await;

    assert_eq!((counts.processed, counts.succeeded, counts.failed), (3, 2, 1));
    assert_eq!(f.snapshots.len(), 2);
    assert!(f.snapshots.latest(broken).await.unwrap().is_none());
}

#[tokio::test]
async fn rerun_upserts_instead_of_duplicating() {
    let f = Fixture::new(StubCalculator::default());
    f.add_portfolio();

    f.service().run_daily(Some(date(12))).await;
    f.service().run_daily(Some(date(12))).await;

    assert_eq!(f.snapshots.len(), 1);
}

#[tokio::test]
async fn backfill_walks_the_inclusive_range() {
    let f = Fixture::new(StubCalculator::default());
    let id = f.add_portfolio();

    let counts = f.service().backfill(id, date(5), date(9)).await;

    assert_eq!((counts.processed, counts.succeeded, counts.failed), (5, 5, 0));
    let range = f.snapshots.range(id, date(1), date(31)).await.unwrap();
    let days: Vec<u32> = range
        .iter()
        .map(|(d, _)| chrono::Datelike::day(d))
        .collect();
    assert_eq!(days, vec![5, 6, 7, 8, 9]);

    // Calculator saw each date exactly once.
    assert_eq!(f.calculator.calls.lock().unwrap().len(), 5);
}

#[tokio::test]
async fn backfill_isolates_per_day_failures() {
    // Failing portfolio: every day fails, counts reflect it, nothing saved.
    let mut calc = StubCalculator::default();
    let id = Uuid::new_v4();
    calc.failing.insert(id);
    let f = Fixture::new(calc);

    let counts = f.service().backfill(id, date(5), date(7)).await;

    assert_eq!((counts.processed, counts.succeeded, counts.failed), (3, 0, 3));
    assert!(f.snapshots.is_empty());
}
