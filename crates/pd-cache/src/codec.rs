//! Wire codec for cached price points.
//!
//! The encoding is deliberately language-neutral and self-describing:
//! JSON objects with string-typed decimals, explicit currency fields, and
//! RFC 3339 UTC timestamps, so any instance sharing the store (whatever it
//! is written in) can read what another wrote. Field names are part of the
//! cross-instance contract; do not rename them.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use pd_domain::{Currency, Money, PriceInterval, PricePoint, PriceSource, Ticker};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct PriceRecord {
    ticker: String,
    price_amount: String,
    price_currency: String,
    timestamp: String,
    source: String,
    interval: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    open_amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    open_currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    high_amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    high_currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    low_amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    low_currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    close_amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    close_currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    volume: Option<u64>,
}

fn money_fields(m: Option<Money>) -> (Option<String>, Option<String>) {
    match m {
        Some(m) => (
            Some(pd_domain::money::format_micros(m.micros())),
            Some(m.currency().as_str().to_string()),
        ),
        None => (None, None),
    }
}

fn to_record(p: &PricePoint) -> PriceRecord {
    let (open_amount, open_currency) = money_fields(p.open());
    let (high_amount, high_currency) = money_fields(p.high());
    let (low_amount, low_currency) = money_fields(p.low());
    let (close_amount, close_currency) = money_fields(p.close());
    PriceRecord {
        ticker: p.ticker().as_str().to_string(),
        price_amount: pd_domain::money::format_micros(p.price().micros()),
        price_currency: p.price().currency().as_str().to_string(),
        timestamp: p.timestamp().to_rfc3339(),
        source: p.source().as_str().to_string(),
        interval: p.interval().as_str().to_string(),
        open_amount,
        open_currency,
        high_amount,
        high_currency,
        low_amount,
        low_currency,
        close_amount,
        close_currency,
        volume: p.volume(),
    }
}

fn opt_money(amount: &Option<String>, currency: &Option<String>, field: &str) -> Result<Option<Money>> {
    match (amount, currency) {
        (Some(a), Some(c)) => {
            let currency = Currency::new(c).with_context(|| format!("{field} currency"))?;
            let m = Money::parse(a, currency).with_context(|| format!("{field} amount"))?;
            Ok(Some(m))
        }
        (None, None) => Ok(None),
        _ => Err(anyhow!("{field}: amount/currency must be present together")),
    }
}

fn from_record(r: &PriceRecord) -> Result<PricePoint> {
    let ticker = Ticker::new(&r.ticker).context("ticker")?;
    let currency = Currency::new(&r.price_currency).context("price currency")?;
    let price = Money::parse(&r.price_amount, currency).context("price amount")?;

    // RFC 3339 carries an explicit offset; a naive timestamp fails here,
    // which is exactly the rejection the domain demands.
    let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&r.timestamp)
        .with_context(|| format!("timestamp '{}'", r.timestamp))?
        .with_timezone(&Utc);

    let source = PriceSource::parse(&r.source)
        .ok_or_else(|| anyhow!("unknown source '{}'", r.source))?;
    let interval = PriceInterval::parse(&r.interval)
        .map_err(|e| anyhow!("interval: {e}"))?;

    let open = opt_money(&r.open_amount, &r.open_currency, "open")?;
    let high = opt_money(&r.high_amount, &r.high_currency, "high")?;
    let low = opt_money(&r.low_amount, &r.low_currency, "low")?;
    let close = opt_money(&r.close_amount, &r.close_currency, "close")?;

    let point = PricePoint::new(ticker, price, timestamp, source, interval)
        .context("price point invariants")?
        .with_ohlcv(open, high, low, close, r.volume)
        .context("ohlcv invariants")?;
    Ok(point)
}

/// Serialize a single price point.
pub fn encode_point(p: &PricePoint) -> String {
    serde_json::to_string(&to_record(p)).expect("price record serialization cannot fail")
}

/// Deserialize a single price point; any malformed input is an error the
/// cache layer treats as a miss.
pub fn decode_point(raw: &str) -> Result<PricePoint> {
    let record: PriceRecord = serde_json::from_str(raw).context("price record json")?;
    from_record(&record)
}

/// Serialize a history list.
pub fn encode_history(points: &[PricePoint]) -> String {
    let records: Vec<PriceRecord> = points.iter().map(to_record).collect();
    serde_json::to_string(&records).expect("price record serialization cannot fail")
}

/// Deserialize a history list; one bad record poisons the whole entry.
pub fn decode_history(raw: &str) -> Result<Vec<PricePoint>> {
    let records: Vec<PriceRecord> = serde_json::from_str(raw).context("history json")?;
    records.iter().map(from_record).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn usd(raw: &str) -> Money {
        Money::parse(raw, Currency::USD).unwrap()
    }

    fn rich_point() -> PricePoint {
        PricePoint::new(
            Ticker::new("AAPL").unwrap(),
            usd("150.25"),
            Utc.with_ymd_and_hms(2026, 1, 12, 21, 0, 0).unwrap(),
            PriceSource::Upstream,
            PriceInterval::Day1,
        )
        .unwrap()
        .with_ohlcv(
            Some(usd("149.5")),
            Some(usd("151.75")),
            Some(usd("148.0001")),
            Some(usd("150.25")),
            Some(52_000_000),
        )
        .unwrap()
    }

    #[test]
    fn point_roundtrip_preserves_every_field() {
        let original = rich_point();
        let decoded = decode_point(&encode_point(&original)).unwrap();

        assert_eq!(decoded, original);
        assert_eq!(decoded.open(), original.open());
        assert_eq!(decoded.high(), original.high());
        assert_eq!(decoded.low(), original.low());
        assert_eq!(decoded.close(), original.close());
        assert_eq!(decoded.volume(), original.volume());
    }

    #[test]
    fn bare_point_roundtrip_keeps_ohlcv_absent() {
        let bare = PricePoint::new(
            Ticker::new("MSFT").unwrap(),
            usd("425.5"),
            Utc.with_ymd_and_hms(2026, 1, 12, 15, 0, 0).unwrap(),
            PriceSource::WarmStore,
            PriceInterval::Day1,
        )
        .unwrap();
        let decoded = decode_point(&encode_point(&bare)).unwrap();
        assert_eq!(decoded, bare);
        assert!(decoded.open().is_none());
        assert!(decoded.volume().is_none());
    }

    #[test]
    fn history_roundtrip_preserves_order() {
        let a = rich_point();
        let b = a.with_source(PriceSource::HotCache);
        let decoded = decode_history(&encode_history(&[a.clone(), b.clone()])).unwrap();
        assert_eq!(decoded, vec![a, b]);
    }

    #[test]
    fn naive_timestamps_are_rejected() {
        let mut record = serde_json::from_str::<serde_json::Value>(&encode_point(&rich_point())).unwrap();
        record["timestamp"] = serde_json::Value::String("2026-01-12T21:00:00".into());
        assert!(decode_point(&record.to_string()).is_err());
    }

    #[test]
    fn unknown_source_or_interval_is_rejected() {
        let encoded = encode_point(&rich_point());

        let mut v: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        v["source"] = "database".into();
        assert!(decode_point(&v.to_string()).is_err());

        let mut v: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        v["interval"] = "2day".into();
        assert!(decode_point(&v.to_string()).is_err());
    }

    #[test]
    fn garbage_and_invariant_violations_are_rejected() {
        assert!(decode_point("not json").is_err());
        assert!(decode_point("{}").is_err());

        // Non-positive price violates the point invariant on decode.
        let mut v: serde_json::Value =
            serde_json::from_str(&encode_point(&rich_point())).unwrap();
        v["price_amount"] = "0".into();
        assert!(decode_point(&v.to_string()).is_err());

        // Currency missing for a present amount.
        let mut v: serde_json::Value =
            serde_json::from_str(&encode_point(&rich_point())).unwrap();
        v["open_currency"] = serde_json::Value::Null;
        assert!(decode_point(&v.to_string()).is_err());
    }
}
