//! # Configuration & Constants
//!
//! Every magic number the redemption core relies on lives here, next to the
//! serde-loadable [`RedeemConfig`] that a client fills in per deployment.
//!
//! The numeric constants mirror the vault contract. If the contract changes
//! its fee denominator or USD scale, this file changes with it and nothing
//! else should need to.

use std::time::Duration;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::fees::{FeeSettlement, TierMode};
use crate::math::serde_u256;

// ---------------------------------------------------------------------------
// Fixed-Point Scales
// ---------------------------------------------------------------------------

/// Decimal places of the client-precision USD unit (`Usd18`).
pub const USD_DECIMALS: u8 = 18;

/// Basis-point denominator. 10_000 bps = 100%.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Largest token decimal count accepted by the conversions.
///
/// `10^(decimals + 18)` must fit in 256 bits, and `10^77` is the largest
/// power of ten that does. 58 + 18 = 76 leaves one digit of headroom.
pub const MAX_TOKEN_DECIMALS: u8 = 58;

/// Native asset decimals. Every EVM chain we target uses 18.
pub const NATIVE_DECIMALS: u8 = 18;

// ---------------------------------------------------------------------------
// Read-Side Timeouts
// ---------------------------------------------------------------------------

/// Per-provider timeout for a reference price read.
pub const DEFAULT_PRICE_TIMEOUT: Duration = Duration::from_secs(4);

/// Per-source timeout for loading the allow-list proof book.
pub const DEFAULT_PROOF_TIMEOUT: Duration = Duration::from_secs(8);

// ---------------------------------------------------------------------------
// Gas
// ---------------------------------------------------------------------------

/// Chains without fee-market (EIP-1559) support. Transactions there carry a
/// single legacy `gasPrice`.
pub const LEGACY_FEE_CHAIN_IDS: &[u64] = &[
    56,   // BNB Smart Chain
    97,   // BNB Smart Chain testnet
    1030, // Conflux eSpace
    71,   // Conflux eSpace testnet
];

/// Legacy gas price used when neither an override nor a live quote exists.
/// 3 gwei.
pub const FALLBACK_GAS_PRICE_WEI: u64 = 3_000_000_000;

/// Source identifier reported when the manual price override wins.
pub const OVERRIDE_SOURCE_ID: &str = "override";

/// Transitions a session keeps in its history before dropping the oldest.
pub const SESSION_HISTORY_LIMIT: usize = 64;

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// Legacy gas-price settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasConfig {
    /// Chain ids that must use the legacy fee model.
    pub legacy_chain_ids: Vec<u64>,
    /// Operator-pinned gas price in wei. Beats the live quote.
    pub gas_price_override_wei: Option<u64>,
    /// Last-resort gas price in wei.
    pub fallback_gas_price_wei: u64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            legacy_chain_ids: LEGACY_FEE_CHAIN_IDS.to_vec(),
            gas_price_override_wei: None,
            fallback_gas_price_wei: FALLBACK_GAS_PRICE_WEI,
        }
    }
}

/// One entry in the ordered price provider list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriceProviderConfig {
    /// A direct oracle feed contract (`latestRoundData`-style answer).
    Feed { address: Address },
    /// The vault's own aggregated oracle read.
    VaultOracle,
    /// A configured constant, 1e18-scaled.
    Fixed {
        #[serde(with = "serde_u256")]
        price18: U256,
    },
}

/// Per-token behaviour flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSettings {
    /// Token contract address.
    pub address: Address,
    /// The token refuses to change a non-zero allowance to another non-zero
    /// value; it must be reset to zero first.
    #[serde(default)]
    pub approval_reset: bool,
}

/// Everything a client needs to know about one vault deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedeemConfig {
    /// EVM chain id of the deployment.
    pub chain_id: u64,
    /// The vault contract (redemption target and approval spender).
    pub vault: Address,
    /// How fee tiers are selected from the threshold table.
    pub tier_mode: TierMode,
    /// How the fee is paid.
    pub fee_settlement: FeeSettlement,
    /// Manual reference price, 1e18-scaled. Wins over every provider when > 0.
    #[serde(with = "serde_u256::option")]
    pub price_override: Option<U256>,
    /// Ordered reference price providers.
    pub price_providers: Vec<PriceProviderConfig>,
    /// Per-attempt price timeout in milliseconds.
    pub price_timeout_ms: u64,
    /// Per-attempt proof book timeout in milliseconds.
    pub proof_timeout_ms: u64,
    /// Legacy gas settings.
    pub gas: GasConfig,
    /// Token-specific flags.
    pub tokens: Vec<TokenSettings>,
}

impl Default for RedeemConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            vault: Address::ZERO,
            tier_mode: TierMode::Cap,
            fee_settlement: FeeSettlement::Deducted,
            price_override: None,
            price_providers: vec![PriceProviderConfig::VaultOracle],
            price_timeout_ms: DEFAULT_PRICE_TIMEOUT.as_millis() as u64,
            proof_timeout_ms: DEFAULT_PROOF_TIMEOUT.as_millis() as u64,
            gas: GasConfig::default(),
            tokens: Vec::new(),
        }
    }
}

impl RedeemConfig {
    /// Per-attempt price timeout.
    pub fn price_timeout(&self) -> Duration {
        Duration::from_millis(self.price_timeout_ms)
    }

    /// Per-attempt proof timeout.
    pub fn proof_timeout(&self) -> Duration {
        Duration::from_millis(self.proof_timeout_ms)
    }

    /// Returns `true` if `token` needs a zero-allowance reset before a new
    /// approval.
    pub fn requires_approval_reset(&self, token: Address) -> bool {
        self.tokens
            .iter()
            .any(|t| t.address == token && t.approval_reset)
    }
}

/// Returns `true` if the chain lacks fee-market support by default.
pub fn uses_legacy_fees(chain_id: u64) -> bool {
    LEGACY_FEE_CHAIN_IDS.contains(&chain_id)
}
