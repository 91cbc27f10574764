//! Concrete price providers.
//!
//! Each provider reads one raw answer and normalises it to 18 decimals. A
//! zero answer is treated as a failure, not a price: an oracle that has never
//! been written to reports zero, and a zero reference price would turn every
//! fee into a division by zero further down.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use thiserror::Error;

use super::PriceReading;
use crate::chain::{ChainError, OracleAnswer, VaultReader};
use crate::math::{normalize_price, MathError};

/// Why a single provider produced no usable price.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The underlying read failed.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// The answer was zero.
    #[error("provider returned a zero price")]
    ZeroPrice,

    /// The answer could not be normalised.
    #[error(transparent)]
    Math(#[from] MathError),
}

/// One source of the reference asset's USD price.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Identifier reported as `source_id`.
    fn id(&self) -> String;

    /// Reads the current price.
    async fn fetch(&self) -> Result<PriceReading, ProviderError>;
}

fn reading(id: String, answer: OracleAnswer) -> Result<PriceReading, ProviderError> {
    let decimals = answer.decimals.unwrap_or(18);
    let price18 = normalize_price(answer.answer, decimals)?;
    if price18.is_zero() {
        return Err(ProviderError::ZeroPrice);
    }
    Ok(PriceReading {
        price18,
        decimals,
        source_id: id,
    })
}

/// A standalone oracle feed contract.
pub struct FeedProvider {
    reader: Arc<dyn VaultReader>,
    feed: Address,
}

impl FeedProvider {
    /// Reads `feed` through `reader`.
    pub fn new(reader: Arc<dyn VaultReader>, feed: Address) -> Self {
        Self { reader, feed }
    }
}

#[async_trait]
impl PriceProvider for FeedProvider {
    fn id(&self) -> String {
        format!("feed:{}", self.feed)
    }

    async fn fetch(&self) -> Result<PriceReading, ProviderError> {
        let answer = self.reader.feed_price(self.feed).await?;
        reading(self.id(), answer)
    }
}

/// The vault's own aggregated oracle.
pub struct VaultOracleProvider {
    reader: Arc<dyn VaultReader>,
}

impl VaultOracleProvider {
    /// Reads the oracle through `reader`.
    pub fn new(reader: Arc<dyn VaultReader>) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl PriceProvider for VaultOracleProvider {
    fn id(&self) -> String {
        "vault-oracle".to_string()
    }

    async fn fetch(&self) -> Result<PriceReading, ProviderError> {
        let answer = self.reader.vault_oracle_price().await?;
        reading(self.id(), answer)
    }
}

/// A constant price, already 1e18-scaled.
pub struct StaticProvider {
    id: String,
    price18: U256,
}

impl StaticProvider {
    /// Always answers `price18`, reported under `id`.
    pub fn new(id: impl Into<String>, price18: U256) -> Self {
        Self {
            id: id.into(),
            price18,
        }
    }
}

#[async_trait]
impl PriceProvider for StaticProvider {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn fetch(&self) -> Result<PriceReading, ProviderError> {
        reading(
            self.id.clone(),
            OracleAnswer {
                answer: self.price18,
                decimals: Some(18),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::memory::FeedSnapshot;
    use crate::chain::{MemoryVault, VaultSnapshot};

    const E18: u128 = 1_000_000_000_000_000_000;

    #[tokio::test]
    async fn test_feed_normalises_decimals() {
        let feed = Address::repeat_byte(7);
        let vault = Arc::new(MemoryVault::new(VaultSnapshot {
            feeds: vec![FeedSnapshot {
                address: feed,
                answer: U256::from(312_345_000_000u64),
                decimals: Some(8),
            }],
            ..VaultSnapshot::default()
        }));
        let r = FeedProvider::new(vault, feed).fetch().await.unwrap();
        assert_eq!(r.price18, U256::from(3_123_450_000_000_000_000_000u128));
        assert_eq!(r.decimals, 8);
        assert!(r.source_id.starts_with("feed:"));
    }

    #[tokio::test]
    async fn test_oracle_without_decimals_reads_as_18() {
        let vault = Arc::new(MemoryVault::new(VaultSnapshot {
            oracle_answer: U256::from(600 * E18),
            oracle_decimals: None,
            ..VaultSnapshot::default()
        }));
        let r = VaultOracleProvider::new(vault).fetch().await.unwrap();
        assert_eq!(r.price18, U256::from(600 * E18));
        assert_eq!(r.decimals, 18);
    }

    #[tokio::test]
    async fn test_zero_is_not_a_price() {
        let vault = Arc::new(MemoryVault::new(VaultSnapshot::default()));
        assert_eq!(
            VaultOracleProvider::new(vault).fetch().await,
            Err(ProviderError::ZeroPrice)
        );
        assert_eq!(
            StaticProvider::new("fixed", U256::ZERO).fetch().await,
            Err(ProviderError::ZeroPrice)
        );
    }
}
