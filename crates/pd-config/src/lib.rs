//! pd-config
//!
//! Layered YAML configuration: later files deep-merge over earlier ones,
//! the merged document canonicalizes to sorted-key JSON and hashes so a
//! boot log can state exactly which configuration is running, and the
//! result deserializes into the typed [`AppConfig`].
//!
//! Secrets never live in these files — config carries the names of the
//! environment variables to read, not the values.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

// ---------------------------------------------------------------------------
// Layered loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub canonical_json: String,
    pub config_hash: String,
}

/// Load + merge YAML files in order, canonicalize, hash, deserialize.
/// With no paths, the defaults apply and the hash covers `{}`.
pub fn load_layered_yaml(paths: &[String]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    let config: AppConfig =
        serde_json::from_value(merged).context("config does not match the expected schema")?;

    Ok(LoadedConfig {
        config,
        canonical_json: canonical,
        config_hash: hash,
    })
}

/// Deep-merge: objects merge recursively; arrays and scalars are replaced.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

/// Sort all object keys recursively and emit compact JSON.
fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

// ---------------------------------------------------------------------------
// Typed configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub quote: QuoteConfig,
    pub rate: RateConfig,
    pub hot: HotConfig,
    pub refresh: RefreshConfig,
    pub scheduler: SchedulerConfig,
    pub redis: RedisConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuoteConfig {
    pub base_url: String,
    /// Name of the env var holding the upstream API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        QuoteConfig {
            base_url: "https://www.alphavantage.co/query".to_string(),
            api_key_env: "PD_ALPHA_VANTAGE_KEY".to_string(),
            timeout_secs: 5,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateConfig {
    pub calls_per_minute: u32,
    pub calls_per_day: u32,
    pub key_prefix: String,
}

impl Default for RateConfig {
    fn default() -> Self {
        RateConfig {
            calls_per_minute: 5,
            calls_per_day: 500,
            key_prefix: "paperdesk:ratelimit".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct HotConfig {
    pub default_ttl_secs: u64,
    pub key_prefix: String,
}

impl Default for HotConfig {
    fn default() -> Self {
        HotConfig {
            default_ttl_secs: 3600,
            key_prefix: "paperdesk:price".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RefreshConfig {
    pub cron: String,
    pub batch_size: usize,
    pub batch_delay_secs: u64,
    pub max_age_hours: u64,
    pub active_stock_window_days: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        RefreshConfig {
            cron: "0 0 * * *".to_string(),
            batch_size: 5,
            batch_delay_secs: 60,
            max_age_hours: 24,
            active_stock_window_days: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub timezone: String,
    pub snapshot_cron: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            enabled: true,
            timezone: "UTC".to_string(),
            snapshot_cron: "0 0 * * *".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RedisConfig {
    /// Name of the env var holding the Redis URL.
    pub url_env: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            url_env: "PD_REDIS_URL".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Name of the env var holding the Postgres URL.
    pub url_env: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            url_env: "PD_DATABASE_URL".to_string(),
        }
    }
}
