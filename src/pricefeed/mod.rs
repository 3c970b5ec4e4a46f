use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// A quote from the price feed, carrying when it was fetched so consumers
/// can judge staleness themselves.
#[derive(Debug, Clone, Copy)]
pub struct PriceQuote {
    pub price: Decimal,
    pub fetched_at: DateTime<Utc>,
}

/// Exchange lot-size metadata for a symbol. Effectively immutable per run.
#[derive(Debug, Clone)]
pub struct ExchangeInfo {
    pub symbol: String,
    pub min_qty: Decimal,
    pub step_size: Decimal,
    pub max_qty: Decimal,
    pub price_step: Decimal,
}

impl ExchangeInfo {
    /// Lot metadata matching a BTC-like listing; the fallback when a symbol
    /// has no explicit configuration.
    pub fn default_for(symbol: &str) -> Self {
        ExchangeInfo {
            symbol: symbol.to_string(),
            min_qty: dec!(0.00001),
            step_size: dec!(0.00001),
            max_qty: dec!(10000),
            price_step: dec!(0.01),
        }
    }
}

#[derive(Debug, Error)]
pub enum PriceSourceError {
    /// No usable quote this tick. Recoverable: stop scanning and
    /// mark-to-market skip the tick, everything else proceeds.
    #[error("price unavailable for {0}")]
    Unavailable(String),

    #[error("price fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// Capability the core consumes for market prices and lot metadata.
///
/// `current_price` may serve a stale cached value up to the configured
/// freshness bound and never blocks past the fetch timeout. Failure is
/// non-fatal by contract.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn current_price(&self, symbol: &str) -> Result<PriceQuote, PriceSourceError>;
    async fn exchange_info(&self, symbol: &str) -> Result<ExchangeInfo, PriceSourceError>;
}

// ---------------------------------------------------------------------------
// FixedPriceSource — in-process source for paper runs and tests
// ---------------------------------------------------------------------------

/// Price source backed by in-memory state.
///
/// Serves a steady per-symbol price that can be moved at runtime, plus an
/// optional scripted sequence consumed one entry per lookup (`None` entries
/// simulate feed outages). Scripts take precedence until exhausted.
pub struct FixedPriceSource {
    prices: Mutex<HashMap<String, Decimal>>,
    scripts: Mutex<HashMap<String, VecDeque<Option<Decimal>>>>,
    info: Mutex<HashMap<String, ExchangeInfo>>,
    clock_now: fn() -> DateTime<Utc>,
}

impl FixedPriceSource {
    pub fn new() -> Self {
        FixedPriceSource {
            prices: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
            info: Mutex::new(HashMap::new()),
            clock_now: Utc::now,
        }
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.lock().await.insert(symbol.to_string(), price);
    }

    /// Queue a scripted sequence of lookups for a symbol. `None` entries
    /// yield `Unavailable` once each.
    pub async fn script_prices(&self, symbol: &str, sequence: Vec<Option<Decimal>>) {
        self.scripts
            .lock()
            .await
            .insert(symbol.to_string(), sequence.into());
    }

    pub async fn set_exchange_info(&self, info: ExchangeInfo) {
        self.info.lock().await.insert(info.symbol.clone(), info);
    }
}

impl Default for FixedPriceSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceSource for FixedPriceSource {
    async fn current_price(&self, symbol: &str) -> Result<PriceQuote, PriceSourceError> {
        let mut scripts = self.scripts.lock().await;
        if let Some(queue) = scripts.get_mut(symbol) {
            match queue.pop_front() {
                Some(Some(price)) => {
                    // Keep the steady price in sync with the script.
                    self.prices.lock().await.insert(symbol.to_string(), price);
                    return Ok(PriceQuote {
                        price,
                        fetched_at: (self.clock_now)(),
                    });
                }
                Some(None) => return Err(PriceSourceError::Unavailable(symbol.to_string())),
                None => {
                    scripts.remove(symbol);
                }
            }
        }
        drop(scripts);

        match self.prices.lock().await.get(symbol) {
            Some(price) => Ok(PriceQuote {
                price: *price,
                fetched_at: (self.clock_now)(),
            }),
            None => Err(PriceSourceError::Unavailable(symbol.to_string())),
        }
    }

    async fn exchange_info(&self, symbol: &str) -> Result<ExchangeInfo, PriceSourceError> {
        let info = self.info.lock().await;
        Ok(info
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| ExchangeInfo::default_for(symbol)))
    }
}

// ---------------------------------------------------------------------------
// CachedPriceSource — TTL cache + bounded fetch timeout
// ---------------------------------------------------------------------------

/// Wraps any `PriceSource` with a freshness-bounded cache and a hard fetch
/// timeout, implementing the §4.2 contract for arbitrary inner sources.
pub struct CachedPriceSource<S> {
    inner: S,
    ttl: chrono::Duration,
    fetch_timeout: Duration,
    quotes: Mutex<HashMap<String, PriceQuote>>,
    info: Mutex<HashMap<String, ExchangeInfo>>,
}

impl<S: PriceSource> CachedPriceSource<S> {
    pub fn new(inner: S, ttl_s: u64, fetch_timeout_ms: u64) -> Self {
        CachedPriceSource {
            inner,
            ttl: chrono::Duration::seconds(ttl_s as i64),
            fetch_timeout: Duration::from_millis(fetch_timeout_ms),
            quotes: Mutex::new(HashMap::new()),
            info: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: PriceSource> PriceSource for CachedPriceSource<S> {
    async fn current_price(&self, symbol: &str) -> Result<PriceQuote, PriceSourceError> {
        let fetched = tokio::time::timeout(self.fetch_timeout, self.inner.current_price(symbol))
            .await
            .map_err(|_| PriceSourceError::Timeout(self.fetch_timeout));

        match fetched {
            Ok(Ok(quote)) => {
                self.quotes.lock().await.insert(symbol.to_string(), quote);
                Ok(quote)
            }
            Ok(Err(e)) | Err(e) => {
                // Degrade to the cached quote while it is still fresh enough.
                let quotes = self.quotes.lock().await;
                match quotes.get(symbol) {
                    Some(cached) if Utc::now() - cached.fetched_at <= self.ttl => Ok(*cached),
                    _ => Err(e),
                }
            }
        }
    }

    async fn exchange_info(&self, symbol: &str) -> Result<ExchangeInfo, PriceSourceError> {
        if let Some(cached) = self.info.lock().await.get(symbol) {
            return Ok(cached.clone());
        }
        let info = tokio::time::timeout(self.fetch_timeout, self.inner.exchange_info(symbol))
            .await
            .map_err(|_| PriceSourceError::Timeout(self.fetch_timeout))??;
        self.info
            .lock()
            .await
            .insert(symbol.to_string(), info.clone());
        Ok(info)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
