//! Cache-completeness oracle for daily history ranges.
//!
//! Decides whether a stored range can answer a request without touching
//! the upstream. Daily data only; intraday completeness is out of scope.

use chrono::{DateTime, Duration, Utc};
use pd_domain::PricePoint;

/// Windows at most this long get the density check.
const DENSITY_WINDOW_DAYS: i64 = 30;

/// Calendar-day to trading-day ratio used for the density estimate.
const TRADING_DAY_RATIO: f64 = 5.0 / 7.0;

/// Minimum share of estimated trading days a dense window must carry.
const DENSITY_THRESHOLD: f64 = 0.7;

/// `true` iff `points` (ascending by timestamp) can satisfy
/// `[start, end]` without an upstream fetch.
///
/// `effective_end` is `min(end, last trading close at now)` — a trading
/// day that has not closed yet is not required to be present.
///
/// Checks, in order:
/// 1. non-empty;
/// 2. earliest point at most one day after `start` (timezone slack);
/// 3. latest point at least `effective_end` minus one day;
/// 4. for windows of at most 30 days, at least 70% of the estimated
///    trading-day count (`(end - start) × 5/7`).
pub fn is_complete(
    points: &[PricePoint],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    effective_end: DateTime<Utc>,
) -> bool {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return false;
    };

    if first.timestamp() > start + Duration::days(1) {
        return false;
    }
    if last.timestamp() < effective_end - Duration::days(1) {
        return false;
    }

    let days_requested = end.signed_duration_since(start).num_days();
    if days_requested <= DENSITY_WINDOW_DAYS {
        let expected = days_requested as f64 * TRADING_DAY_RATIO;
        let min_required = (expected * DENSITY_THRESHOLD) as usize;
        if points.len() < min_required {
            return false;
        }
    }

    true
}
