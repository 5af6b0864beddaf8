//! Daily portfolio snapshot job.
//!
//! Pure orchestration: list portfolios, ask the valuation seam for each
//! one's snapshot, upsert it. Failures are isolated per portfolio and
//! reported as counts so one broken portfolio never starves the rest.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use pd_domain::Clock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ports::{PortfolioRepository, SnapshotCalculator, SnapshotRepository};

/// Counts reported by a snapshot run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct SnapshotJobService {
    portfolios: Arc<dyn PortfolioRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
    calculator: Arc<dyn SnapshotCalculator>,
    clock: Arc<dyn Clock>,
}

impl SnapshotJobService {
    pub fn new(
        portfolios: Arc<dyn PortfolioRepository>,
        snapshots: Arc<dyn SnapshotRepository>,
        calculator: Arc<dyn SnapshotCalculator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        SnapshotJobService {
            portfolios,
            snapshots,
            calculator,
            clock,
        }
    }

    async fn snapshot_one(&self, portfolio_id: Uuid, date: NaiveDate) -> anyhow::Result<()> {
        let snapshot = self.calculator.build(portfolio_id, date).await?;
        self.snapshots.upsert(portfolio_id, date, &snapshot).await?;
        debug!(portfolio = %portfolio_id, %date, total = %snapshot.total_value, "snapshot saved");
        Ok(())
    }

    /// Snapshot every portfolio for `date` (today by default). Safe to
    /// re-run: snapshots upsert by `(portfolio, date)`.
    pub async fn run_daily(&self, date: Option<NaiveDate>) -> JobCounts {
        let target = date.unwrap_or_else(|| self.clock.now().date_naive());
        info!(%target, "starting daily snapshot run");

        let portfolios = match self.portfolios.list_all().await {
            Ok(portfolios) => portfolios,
            Err(err) => {
                error!(error = %err, "portfolio listing failed, snapshot run aborted");
                return JobCounts::default();
            }
        };

        let mut counts = JobCounts::default();
        for portfolio in portfolios {
            counts.processed += 1;
            match self.snapshot_one(portfolio.id, target).await {
                Ok(()) => counts.succeeded += 1,
                Err(err) => {
                    counts.failed += 1;
                    error!(portfolio = %portfolio.id, error = %err, "snapshot failed");
                }
            }
        }

        info!(
            processed = counts.processed,
            succeeded = counts.succeeded,
            failed = counts.failed,
            "daily snapshot run complete"
        );
        counts
    }

    /// Generate snapshots for every day of `[start, end]` inclusive, one
    /// day at a time. For new portfolios and gap repair.
    pub async fn backfill(&self, portfolio_id: Uuid, start: NaiveDate, end: NaiveDate) -> JobCounts {
        info!(portfolio = %portfolio_id, %start, %end, "backfilling snapshots");

        let mut counts = JobCounts::default();
        let mut date = start;
        while date <= end {
            counts.processed += 1;
            match self.snapshot_one(portfolio_id, date).await {
                Ok(()) => counts.succeeded += 1,
                Err(err) => {
                    counts.failed += 1;
                    warn!(portfolio = %portfolio_id, %date, error = %err, "backfill day failed");
                }
            }
            date += Duration::days(1);
        }

        info!(?counts, "backfill complete");
        counts
    }
}
