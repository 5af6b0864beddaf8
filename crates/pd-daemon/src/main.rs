//! pd-daemon entry point.
//!
//! Thin host process: load layered configuration, initialize the shared
//! clients, wire the tiered market-data adapter, run the background
//! scheduler until ctrl-c. All behavior lives in the library crates.

mod bootstrap;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use pd_cache::PriceCache;
use pd_domain::{Clock, SystemClock};
use pd_marketdata::{MarketDataPort, TieredMarketData};
use pd_provider::{AlphaVantageClient, QuoteProvider};
use pd_ratelimit::RateLimiter;
use pd_scheduler::{CronSchedule, JobSpec, RefreshConfig, RefreshJob, Scheduler};
use pd_store::{PgWarmStore, PgWatchlist, WarmStore, WatchlistStore};
use tracing::info;

#[derive(Parser)]
#[command(name = "pd-daemon")]
#[command(about = "PaperDesk market-data daemon", long_about = None)]
struct Cli {
    /// Config layer paths in merge order (base -> env -> overrides).
    #[arg(long = "config")]
    config: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();
    let loaded = pd_config::load_layered_yaml(&cli.config)?;
    info!(
        config_hash = %loaded.config_hash,
        layers = cli.config.len(),
        "configuration loaded"
    );
    let cfg = loaded.config;

    // Secrets come from the environment, indirected by config.
    let api_key = std::env::var(&cfg.quote.api_key_env)
        .with_context(|| format!("missing env var {}", cfg.quote.api_key_env))?;
    let redis_url = std::env::var(&cfg.redis.url_env)
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let db_url = std::env::var(&cfg.database.url_env)
        .with_context(|| format!("missing env var {}", cfg.database.url_env))?;

    let kv = bootstrap::kv_client(&redis_url).await?;
    let pool = bootstrap::pg_pool(&db_url).await?;
    pd_store::pg::migrate(&pool).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let warm: Arc<dyn WarmStore> = Arc::new(PgWarmStore::new(pool.clone()));
    let watchlist: Arc<dyn WatchlistStore> = Arc::new(PgWatchlist::new(pool.clone()));
    let provider: Arc<dyn QuoteProvider> = Arc::new(
        AlphaVantageClient::new(bootstrap::http_client(), api_key)
            .with_base_url(cfg.quote.base_url.clone())
            .with_timeout(Duration::from_secs(cfg.quote.timeout_secs))
            .with_max_retries(cfg.quote.max_retries),
    );

    let hot = PriceCache::new(
        kv.clone(),
        cfg.hot.key_prefix.clone(),
        Some(Duration::from_secs(cfg.hot.default_ttl_secs)),
    );
    let limiter = RateLimiter::new(
        kv.clone(),
        &cfg.rate.key_prefix,
        cfg.rate.calls_per_minute,
        cfg.rate.calls_per_day,
    )?;

    let market: Arc<dyn MarketDataPort> = Arc::new(TieredMarketData::new(
        hot,
        limiter,
        warm,
        provider,
        clock.clone(),
    ));

    let scheduler = Scheduler::new();
    if cfg.scheduler.enabled {
        let timezone: chrono_tz::Tz = cfg
            .scheduler
            .timezone
            .parse()
            .map_err(|e| anyhow!("invalid scheduler timezone: {e}"))?;
        let schedule = CronSchedule::parse(&cfg.refresh.cron)?;

        let refresh = Arc::new(RefreshJob::new(
            market,
            watchlist,
            // The transaction repository lives with the surrounding
            // application; embedders pass theirs here. Standalone, the
            // refresh set is the watchlist alone.
            None,
            clock,
            RefreshConfig {
                batch_size: cfg.refresh.batch_size,
                batch_delay: Duration::from_secs(cfg.refresh.batch_delay_secs),
                max_age: Duration::from_secs(cfg.refresh.max_age_hours * 3600),
                active_window_days: cfg.refresh.active_stock_window_days,
            },
        ));

        scheduler
            .start(vec![JobSpec {
                schedule,
                timezone,
                job: refresh,
            }])
            .await;
    } else {
        info!("scheduler disabled by configuration");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    scheduler.stop().await;
    pool.close().await;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
