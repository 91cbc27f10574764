//! Transaction fee model selection.
//!
//! Fee-market chains get [`FeeModel::Market`] and the wallet fills in the
//! EIP-1559 fields itself. Chains on the legacy list get an explicit gas
//! price, chosen in priority order:
//!
//! 1. the operator override, if configured and non-zero;
//! 2. the node's live quote, if it answers with a non-zero value;
//! 3. the configured fallback.

use std::fmt;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chain::VaultReader;
use crate::config::GasConfig;

/// Where a legacy gas price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GasPriceSource {
    /// Operator-pinned value.
    Override,
    /// Live quote from the node.
    Network,
    /// Last-resort constant.
    Fallback,
}

impl fmt::Display for GasPriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GasPriceSource::Override => "override",
            GasPriceSource::Network => "network",
            GasPriceSource::Fallback => "fallback",
        };
        f.write_str(s)
    }
}

/// How a transaction's network fee is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum FeeModel {
    /// EIP-1559 fee market; no explicit gas price is attached.
    Market,
    /// Single legacy gas price.
    Legacy {
        /// Gas price in wei.
        #[serde(with = "crate::math::serde_u256")]
        gas_price: U256,
        /// Where the price came from.
        source: GasPriceSource,
    },
}

impl FeeModel {
    /// The explicit gas price, if any.
    pub fn gas_price(&self) -> Option<U256> {
        match self {
            FeeModel::Market => None,
            FeeModel::Legacy { gas_price, .. } => Some(*gas_price),
        }
    }
}

/// Chooses the fee model for a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasStrategy {
    legacy_chain_ids: Vec<u64>,
    override_price: Option<U256>,
    fallback_price: U256,
}

impl Default for GasStrategy {
    fn default() -> Self {
        Self::from_config(&GasConfig::default())
    }
}

impl GasStrategy {
    /// Builds the strategy from deployment config.
    pub fn from_config(config: &GasConfig) -> Self {
        Self {
            legacy_chain_ids: config.legacy_chain_ids.clone(),
            override_price: config
                .gas_price_override_wei
                .filter(|&p| p > 0)
                .map(U256::from),
            fallback_price: U256::from(config.fallback_gas_price_wei),
        }
    }

    /// Returns `true` if `chain_id` must use the legacy model.
    pub fn is_legacy(&self, chain_id: u64) -> bool {
        self.legacy_chain_ids.contains(&chain_id)
    }

    /// Resolves the fee model for one submission.
    ///
    /// Never fails: a broken quote degrades to the fallback price.
    pub async fn resolve(&self, chain_id: u64, reader: &dyn VaultReader) -> FeeModel {
        if !self.is_legacy(chain_id) {
            return FeeModel::Market;
        }

        if let Some(price) = self.override_price {
            debug!(chain_id, %price, "Using gas price override");
            return FeeModel::Legacy {
                gas_price: price,
                source: GasPriceSource::Override,
            };
        }

        match reader.gas_price().await {
            Ok(price) if !price.is_zero() => {
                debug!(chain_id, %price, "Using network gas price");
                FeeModel::Legacy {
                    gas_price: price,
                    source: GasPriceSource::Network,
                }
            }
            Ok(_) => {
                warn!(chain_id, "Node quoted a zero gas price, using fallback");
                self.fallback()
            }
            Err(e) => {
                warn!(chain_id, error = %e, "Gas price quote failed, using fallback");
                self.fallback()
            }
        }
    }

    fn fallback(&self) -> FeeModel {
        FeeModel::Legacy {
            gas_price: self.fallback_price,
            source: GasPriceSource::Fallback,
        }
    }
}
