use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;

/// Application configuration, loaded once at startup from environment
/// variables (with `.env` support via dotenvy in `main`).
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub sot_database_path: String,
    pub ts_database_path: String,
    pub host: String,
    pub port: u16,

    // Risk & pip sizing
    pub pip_multiplier: Decimal,
    pub max_position_size_pct: Decimal,
    pub max_daily_loss_pct: Decimal,
    pub account_equity: Decimal,

    // Execution
    pub default_fill_pct: Decimal,
    pub default_slippage_pct: Decimal,
    pub default_maker_fee: Decimal,
    pub default_taker_fee: Decimal,
    pub default_latency_ms: i64,
    pub random_latency_ms: i64,
    pub stop_scan_interval_ms: u64,

    // Pyramid
    pub pyramid_timer_interval_ms: u64,

    // Price source
    pub price_cache_ttl_s: u64,
    pub price_fetch_timeout_ms: u64,

    // Store pools
    pub pool_max_connections: u32,

    // Deterministic replay: seed for the execution RNG.
    pub rng_seed: u64,
}

fn env_decimal(key: &str, default: Decimal) -> anyhow::Result<Decimal> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<Decimal>()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw}: {e}")),
        Err(_) => Ok(default),
    }
}

impl CoreConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            sot_database_path: env::var("SOT_DATABASE_PATH")
                .unwrap_or_else(|_| "sqlite://data/sot.db".into()),
            ts_database_path: env::var("TS_DATABASE_PATH")
                .unwrap_or_else(|_| "sqlite://data/ts.db".into()),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_parse("PORT", 8080u16)?,

            pip_multiplier: env_decimal("PIP_MULTIPLIER", dec!(2.0))?,
            max_position_size_pct: env_decimal("MAX_POSITION_SIZE_PCT", dec!(10.0))?,
            max_daily_loss_pct: env_decimal("MAX_DAILY_LOSS_PCT", dec!(5.0))?,
            account_equity: env_decimal("ACCOUNT_EQUITY", dec!(10000))?,

            default_fill_pct: env_decimal("DEFAULT_FILL_PCT", dec!(1.0))?,
            default_slippage_pct: env_decimal("DEFAULT_SLIPPAGE_PCT", dec!(0.0))?,
            default_maker_fee: env_decimal("DEFAULT_MAKER_FEE", dec!(0.0))?,
            default_taker_fee: env_decimal("DEFAULT_TAKER_FEE", dec!(0.0))?,
            default_latency_ms: env_parse("DEFAULT_LATENCY_MS", 0i64)?,
            random_latency_ms: env_parse("RANDOM_LATENCY_MS", 0i64)?,
            stop_scan_interval_ms: env_parse("STOP_SCAN_INTERVAL_MS", 1000u64)?,

            pyramid_timer_interval_ms: env_parse("PYRAMID_TIMER_INTERVAL_MS", 10_000u64)?,

            price_cache_ttl_s: env_parse("PRICE_CACHE_TTL_S", 60u64)?,
            price_fetch_timeout_ms: env_parse("PRICE_FETCH_TIMEOUT_MS", 2000u64)?,

            pool_max_connections: env_parse("POOL_MAX_CONNECTIONS", 20u32)?,

            rng_seed: env_parse("RNG_SEED", 0u64)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        // Only checks keys that are never set in CI.
        let config = CoreConfig::from_env().expect("defaults should parse");
        assert_eq!(config.pip_multiplier, dec!(2.0));
        assert_eq!(config.max_position_size_pct, dec!(10.0));
        assert_eq!(config.max_daily_loss_pct, dec!(5.0));
        assert_eq!(config.default_fill_pct, dec!(1.0));
        assert_eq!(config.stop_scan_interval_ms, 1000);
        assert_eq!(config.pyramid_timer_interval_ms, 10_000);
        assert_eq!(config.price_cache_ttl_s, 60);
    }
}
