//! Contracts the scheduler consumes from the surrounding application.
//!
//! Portfolio, transaction, and snapshot persistence live outside this
//! core; the jobs here only need these minimal operation sets. The
//! in-memory implementations at the bottom back the job test suites and
//! any embedding that has not wired real repositories yet.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use pd_domain::{Money, Ticker};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// The slice of a portfolio the scheduler needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortfolioRef {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Buy,
    Sell,
}

/// One append-only ledger row. `ticker` is present for equity legs only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub kind: TransactionKind,
    pub ticker: Option<Ticker>,
    /// Shares for equity legs, zero for cash movements.
    pub quantity: i64,
    pub amount: Money,
    pub executed_at: DateTime<Utc>,
}

/// Offset/limit pagination.
#[derive(Copy, Clone, Debug)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

/// A portfolio's end-of-day valuation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortfolioSnapshot {
    pub total_value: Money,
    pub cash_balance: Money,
    pub positions_value: Money,
}

// ---------------------------------------------------------------------------
// Repository contracts
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PortfolioRepository: Send + Sync {
    async fn list_all(&self) -> Result<Vec<PortfolioRef>>;
    async fn get(&self, id: Uuid) -> Result<Option<PortfolioRef>>;
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<PortfolioRef>>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Append-only; a duplicate id is an error.
    async fn save(&self, txn: &TransactionRecord) -> Result<()>;

    async fn list_by_portfolio(
        &self,
        portfolio_id: Uuid,
        kind: Option<TransactionKind>,
        page: Page,
    ) -> Result<Vec<TransactionRecord>>;

    async fn count_by_portfolio(&self, portfolio_id: Uuid) -> Result<u64>;

    /// Tickers traded anywhere in the last `days` days; feeds the refresh
    /// scheduler's active set.
    async fn distinct_tickers_since(&self, days: u32, now: DateTime<Utc>) -> Result<Vec<Ticker>>;
}

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Insert or replace the snapshot for `(portfolio_id, date)`.
    async fn upsert(
        &self,
        portfolio_id: Uuid,
        date: NaiveDate,
        snapshot: &PortfolioSnapshot,
    ) -> Result<()>;

    async fn range(
        &self,
        portfolio_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, PortfolioSnapshot)>>;

    async fn latest(&self, portfolio_id: Uuid) -> Result<Option<(NaiveDate, PortfolioSnapshot)>>;
}

/// Seam to the valuation logic that lives with the accounting domain.
#[async_trait]
pub trait SnapshotCalculator: Send + Sync {
    async fn build(&self, portfolio_id: Uuid, date: NaiveDate) -> Result<PortfolioSnapshot>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryPortfolios {
    rows: Mutex<Vec<PortfolioRef>>,
}

impl MemoryPortfolios {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, portfolio: PortfolioRef) {
        self.rows.lock().expect("poisoned").push(portfolio);
    }
}

#[async_trait]
impl PortfolioRepository for MemoryPortfolios {
    async fn list_all(&self) -> Result<Vec<PortfolioRef>> {
        Ok(self.rows.lock().expect("poisoned").clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PortfolioRef>> {
        Ok(self
            .rows
            .lock()
            .expect("poisoned")
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<PortfolioRef>> {
        Ok(self
            .rows
            .lock()
            .expect("poisoned")
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryTransactions {
    rows: Mutex<Vec<TransactionRecord>>,
}

impl MemoryTransactions {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionRepository for MemoryTransactions {
    async fn save(&self, txn: &TransactionRecord) -> Result<()> {
        let mut rows = self.rows.lock().expect("poisoned");
        if rows.iter().any(|r| r.id == txn.id) {
            return Err(anyhow!("duplicate transaction id {}", txn.id));
        }
        rows.push(txn.clone());
        Ok(())
    }

    async fn list_by_portfolio(
        &self,
        portfolio_id: Uuid,
        kind: Option<TransactionKind>,
        page: Page,
    ) -> Result<Vec<TransactionRecord>> {
        let rows = self.rows.lock().expect("poisoned");
        Ok(rows
            .iter()
            .filter(|r| r.portfolio_id == portfolio_id)
            .filter(|r| kind.map_or(true, |k| r.kind == k))
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }

    async fn count_by_portfolio(&self, portfolio_id: Uuid) -> Result<u64> {
        let rows = self.rows.lock().expect("poisoned");
        Ok(rows.iter().filter(|r| r.portfolio_id == portfolio_id).count() as u64)
    }

    async fn distinct_tickers_since(&self, days: u32, now: DateTime<Utc>) -> Result<Vec<Ticker>> {
        let cutoff = now - Duration::days(days as i64);
        let rows = self.rows.lock().expect("poisoned");
        let tickers: BTreeSet<Ticker> = rows
            .iter()
            .filter(|r| r.executed_at >= cutoff)
            .filter_map(|r| r.ticker.clone())
            .collect();
        Ok(tickers.into_iter().collect())
    }
}

#[derive(Default)]
pub struct MemorySnapshots {
    rows: Mutex<BTreeMap<(Uuid, NaiveDate), PortfolioSnapshot>>,
}

impl MemorySnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().expect("poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SnapshotRepository for MemorySnapshots {
    async fn upsert(
        &self,
        portfolio_id: Uuid,
        date: NaiveDate,
        snapshot: &PortfolioSnapshot,
    ) -> Result<()> {
        self.rows
            .lock()
            .expect("poisoned")
            .insert((portfolio_id, date), snapshot.clone());
        Ok(())
    }

    async fn range(
        &self,
        portfolio_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, PortfolioSnapshot)>> {
        let rows = self.rows.lock().expect("poisoned");
        Ok(rows
            .iter()
            .filter(|((id, date), _)| *id == portfolio_id && *date >= start && *date <= end)
            .map(|((_, date), snap)| (*date, snap.clone()))
            .collect())
    }

    async fn latest(&self, portfolio_id: Uuid) -> Result<Option<(NaiveDate, PortfolioSnapshot)>> {
        let rows = self.rows.lock().expect("poisoned");
        Ok(rows
            .iter()
            .filter(|((id, _), _)| *id == portfolio_id)
            .map(|((_, date), snap)| (*date, snap.clone()))
            .next_back())
    }
}
