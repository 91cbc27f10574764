//! # Reference Price
//!
//! The USD price of the reference (native) asset, needed whenever the fee is
//! settled in native value. There are several ways to read it and none of
//! them is always up, so [`PriceSource`] holds an ordered list of providers
//! and walks it with a per-attempt timeout.
//!
//! ## Resolution order
//!
//! 1. A manual override, if configured and non-zero. It wins outright and no
//!    provider is contacted.
//! 2. Providers in declared order. The first usable answer is returned; a
//!    provider that errors, answers zero, or misses its deadline is skipped.
//!
//! An answer from anything other than the first provider is flagged as
//! degraded so the plan can say so.

pub mod providers;

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::chain::VaultReader;
use crate::config::{PriceProviderConfig, RedeemConfig, DEFAULT_PRICE_TIMEOUT, OVERRIDE_SOURCE_ID};
use crate::fallback::{resolve_in_order, Attempt};

pub use providers::{FeedProvider, PriceProvider, ProviderError, StaticProvider, VaultOracleProvider};

/// A usable price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceReading {
    /// USD per whole unit, 1e18-scaled. Always > 0.
    #[serde(with = "crate::math::serde_u256")]
    pub price18: U256,
    /// Decimals of the raw answer before normalisation.
    pub decimals: u8,
    /// Which provider answered.
    pub source_id: String,
}

/// Errors resolving a price.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PriceError {
    /// Every provider failed and there is no override.
    #[error("no price available ({} provider(s) tried)", attempts.len())]
    NoPriceAvailable {
        /// Per-provider failures, in order.
        attempts: Vec<Attempt>,
    },
}

/// A reading together with how it was obtained.
#[derive(Debug, Clone)]
pub struct PriceResolution {
    /// The price.
    pub reading: PriceReading,
    /// Position of the answering provider. `None` for the override.
    pub provider_index: Option<usize>,
    /// Providers that failed before the answer.
    pub failures: Vec<Attempt>,
}

impl PriceResolution {
    /// A fallback provider answered.
    pub fn is_degraded(&self) -> bool {
        self.provider_index.map_or(false, |i| i > 0)
    }

    /// The manual override answered.
    pub fn is_override(&self) -> bool {
        self.provider_index.is_none()
    }
}

/// Ordered, timeout-bounded price resolution.
pub struct PriceSource {
    providers: Vec<Arc<dyn PriceProvider>>,
    override_price18: Option<U256>,
    timeout: Duration,
}

impl Default for PriceSource {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            override_price18: None,
            timeout: DEFAULT_PRICE_TIMEOUT,
        }
    }
}

impl PriceSource {
    /// An empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the provider list a deployment config describes.
    pub fn from_config(config: &RedeemConfig, reader: Arc<dyn VaultReader>) -> Self {
        let mut source = Self::new()
            .with_timeout(config.price_timeout())
            .with_override(config.price_override);
        for provider in &config.price_providers {
            let p: Arc<dyn PriceProvider> = match provider {
                PriceProviderConfig::Feed { address } => {
                    Arc::new(FeedProvider::new(reader.clone(), *address))
                }
                PriceProviderConfig::VaultOracle => Arc::new(VaultOracleProvider::new(reader.clone())),
                PriceProviderConfig::Fixed { price18 } => Arc::new(StaticProvider::new("fixed", *price18)),
            };
            source = source.with_provider(p);
        }
        source
    }

    /// Appends a provider.
    pub fn with_provider(mut self, provider: Arc<dyn PriceProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Sets the manual override. Zero or `None` disables it.
    pub fn with_override(mut self, price18: Option<U256>) -> Self {
        self.override_price18 = price18.filter(|p| !p.is_zero());
        self
    }

    /// Per-provider timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolves the current price.
    pub async fn resolve(&self) -> Result<PriceResolution, PriceError> {
        if let Some(price18) = self.override_price18 {
            debug!(%price18, "Using manual price override");
            return Ok(PriceResolution {
                reading: PriceReading {
                    price18,
                    decimals: 18,
                    source_id: OVERRIDE_SOURCE_ID.to_string(),
                },
                provider_index: None,
                failures: Vec::new(),
            });
        }

        let resolved = resolve_in_order(
            "price",
            self.providers.as_slice(),
            self.timeout,
            |p| p.id(),
            |p| p.fetch(),
        )
        .await
        .map_err(|attempts| PriceError::NoPriceAvailable { attempts })?;

        if resolved.index > 0 {
            info!(
                source = %resolved.source_id,
                failed = resolved.failures.len(),
                "Price resolved from a fallback provider"
            );
        }
        Ok(PriceResolution {
            reading: resolved.value,
            provider_index: Some(resolved.index),
            failures: resolved.failures,
        })
    }
}
