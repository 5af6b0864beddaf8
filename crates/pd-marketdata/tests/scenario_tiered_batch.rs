//! Scenarios: `get_batch_prices` phase behavior and failure isolation.

mod common;

use common::*;
use pd_domain::{MarketDataError, PriceSource};
use pd_kv::KvClient;
use pd_marketdata::MarketDataPort;
use pd_store::WarmStore;

fn trading_monday() -> chrono::DateTime<chrono::Utc> {
    at(2026, 1, 12, 15, 0)
}

#[tokio::test]
async fn batch_mixes_hot_warm_and_upstream_sources() {
    let h = harness(trading_monday());
    // AAPL fresh in hot.
    h.hot
        .put_latest(
            &point("AAPL", "259.96", trading_monday() - chrono::Duration::minutes(30), PriceSource::Upstream),
            None,
        )
        .await
        .unwrap();
    // MSFT fresh in warm only.
    h.warm
        .upsert(&point("MSFT", "425.50", trading_monday() - chrono::Duration::hours(2), PriceSource::Upstream))
        .await
        .unwrap();
    // TSLA only upstream.
    h.provider.stub_quote(
        &t("TSLA"),
        Ok(point("TSLA", "350.00", trading_monday(), PriceSource::Upstream)),
    );

    let got = h
        .adapter
        .get_batch_prices(&[t("AAPL"), t("MSFT"), t("TSLA")])
        .await;

    assert_eq!(got.len(), 3);
    assert_eq!(got[&t("AAPL")].source(), PriceSource::HotCache);
    assert_eq!(got[&t("MSFT")].source(), PriceSource::WarmStore);
    assert_eq!(got[&t("TSLA")].source(), PriceSource::Upstream);

    // Exactly one upstream call, one token.
    assert_eq!(h.provider.quote_calls(), 1);
    assert_eq!(h.provider.quote_call_log(), vec!["TSLA"]);
    assert_eq!(h.limiter.remaining().await.unwrap(), (4, 499));
}

#[tokio::test]
async fn failing_tickers_are_omitted_never_raised() {
    let h = harness(trading_monday());
    h.provider.stub_quote(
        &t("AAPL"),
        Ok(point("AAPL", "150.25", trading_monday(), PriceSource::Upstream)),
    );
    h.provider.stub_quote(
        &t("BOGUS"),
        Err(MarketDataError::ticker_not_found("BOGUS", "unknown symbol")),
    );

    let got = h.adapter.get_batch_prices(&[t("AAPL"), t("BOGUS")]).await;

    assert_eq!(got.len(), 1);
    assert!(got.contains_key(&t("AAPL")));
    assert!(!got.contains_key(&t("BOGUS")));
}

#[tokio::test]
async fn empty_input_is_an_empty_map() {
    let h = harness(trading_monday());
    let got = h.adapter.get_batch_prices(&[]).await;
    assert!(got.is_empty());
    assert_eq!(h.provider.quote_calls(), 0);
}

#[tokio::test]
async fn uncached_tickers_are_fetched_in_input_order() {
    let h = harness(trading_monday());
    for sym in ["TSLA", "AAPL", "MSFT"] {
        h.provider.stub_quote(
            &t(sym),
            Ok(point(sym, "100.00", trading_monday(), PriceSource::Upstream)),
        );
    }

    let got = h
        .adapter
        .get_batch_prices(&[t("TSLA"), t("AAPL"), t("MSFT")])
        .await;

    assert_eq!(got.len(), 3);
    assert_eq!(h.provider.quote_call_log(), vec!["TSLA", "AAPL", "MSFT"]);
}

#[tokio::test]
async fn weekend_batch_routes_uniformly_through_last_close() {
    let h = harness(at(2026, 1, 18, 15, 0)); // Sunday
    let friday_close = at(2026, 1, 16, 21, 0);
    h.warm
        .upsert(&point("AAPL", "259.96", friday_close, PriceSource::Upstream))
        .await
        .unwrap();
    h.warm
        .upsert(&point("MSFT", "425.50", friday_close, PriceSource::Upstream))
        .await
        .unwrap();

    let got = h
        .adapter
        .get_batch_prices(&[t("AAPL"), t("MSFT"), t("TSLA")])
        .await;

    // Both stored tickers come back as the Friday close; TSLA (no data
    // anywhere) is simply absent.
    assert_eq!(got.len(), 2);
    for sym in ["AAPL", "MSFT"] {
        assert_eq!(got[&t(sym)].timestamp(), friday_close);
        assert_eq!(got[&t(sym)].source(), PriceSource::WarmStore);
    }
    assert_eq!(h.provider.quote_calls(), 0);
    assert_eq!(h.limiter.remaining().await.unwrap(), (5, 500));
}

#[tokio::test]
async fn batch_rate_limit_exhaustion_degrades_to_stale_hot() {
    let h = harness(trading_monday());
    h.hot
        .put_latest(
            &point("AAPL", "150.00", trading_monday() - chrono::Duration::hours(3), PriceSource::Upstream),
            None,
        )
        .await
        .unwrap();
    h.kv.set_ex(
        &format!("{RATE_PREFIX}:minute"),
        "0",
        Some(std::time::Duration::from_secs(60)),
    )
    .await
    .unwrap();

    let got = h.adapter.get_batch_prices(&[t("AAPL"), t("TSLA")]).await;

    // AAPL degrades to its stale hot entry; TSLA has nothing and drops out.
    assert_eq!(got.len(), 1);
    assert_eq!(got[&t("AAPL")].source(), PriceSource::HotCache);
    assert_eq!(h.provider.quote_calls(), 0);
}
