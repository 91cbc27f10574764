//! Fee-tier resolution.
//!
//! The vault publishes two parallel arrays, thresholds (whole USD) and fee
//! rates (bps). There used to be more than one way of reading them, which is
//! how previews and the contract drifted apart. There is now exactly one,
//! parameterised by [`TierMode`]:
//!
//! - **Cap**: the first tier whose threshold is `>=` the value; values above
//!   every threshold fall into the last (highest) tier.
//! - **Floor**: the last tier whose threshold is `<=` the value; values
//!   below every threshold get no tier at all.
//!
//! Tiers are always sorted by threshold before evaluation, so the answer does
//! not depend on the order the contract happened to store them in. The sort is
//! stable: equal thresholds keep their original relative order.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::{apply_bps, MathError, Usd};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors building a fee schedule or computing a fee.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeeError {
    /// The threshold and bps arrays disagree in length.
    #[error("fee schedule mismatch: {thresholds} thresholds but {bps} rates")]
    LengthMismatch {
        /// Number of thresholds.
        thresholds: usize,
        /// Number of fee rates.
        bps: usize,
    },

    /// A fee rate above 100%.
    #[error("fee rate {0} bps exceeds 10000")]
    RateTooHigh(u32),

    /// Arithmetic failure while applying the rate.
    #[error(transparent)]
    Math(#[from] MathError),
}

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

/// Tier selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierMode {
    /// First threshold `>=` value, else the last tier.
    #[default]
    Cap,
    /// Last threshold `<=` value, else no tier.
    Floor,
}

impl std::str::FromStr for TierMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cap" => Ok(TierMode::Cap),
            "floor" => Ok(TierMode::Floor),
            other => Err(format!("unknown tier mode {:?} (expected cap or floor)", other)),
        }
    }
}

/// How the vault collects its fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeSettlement {
    /// The fee is withheld from the stable payout.
    #[default]
    Deducted,
    /// The full value is paid out; the fee is attached to the redeem call as
    /// native currency.
    NativeValue,
}

// ---------------------------------------------------------------------------
// FeeTier / FeeSchedule
// ---------------------------------------------------------------------------

/// One row of the sorted fee table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTier {
    /// 1-based position in the sorted table.
    pub index: usize,
    /// Threshold in whole USD.
    pub threshold_usd: Usd,
    /// Fee rate in basis points.
    pub fee_bps: u32,
}

impl FeeTier {
    /// `"0.50%"` for 50 bps.
    pub fn fee_percent_text(&self) -> String {
        format!("{}.{:02}%", self.fee_bps / 100, self.fee_bps % 100)
    }
}

/// A sorted, validated fee table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    tiers: Vec<FeeTier>,
}

impl FeeSchedule {
    /// Builds a schedule from the contract's parallel arrays.
    ///
    /// If either array is empty the schedule is empty (every resolution
    /// yields "no tier"). Non-empty arrays of different lengths are an error.
    pub fn from_pairs(thresholds: &[Usd], bps: &[u32]) -> Result<Self, FeeError> {
        if thresholds.is_empty() || bps.is_empty() {
            return Ok(Self::default());
        }
        if thresholds.len() != bps.len() {
            return Err(FeeError::LengthMismatch {
                thresholds: thresholds.len(),
                bps: bps.len(),
            });
        }
        if let Some(&rate) = bps.iter().find(|&&b| b > 10_000) {
            return Err(FeeError::RateTooHigh(rate));
        }

        let mut pairs: Vec<(Usd, u32)> = thresholds.iter().copied().zip(bps.iter().copied()).collect();
        pairs.sort_by_key(|(threshold, _)| *threshold);

        let tiers = pairs
            .into_iter()
            .enumerate()
            .map(|(i, (threshold_usd, fee_bps))| FeeTier {
                index: i + 1,
                threshold_usd,
                fee_bps,
            })
            .collect();
        Ok(Self { tiers })
    }

    /// The sorted tiers.
    pub fn tiers(&self) -> &[FeeTier] {
        &self.tiers
    }

    /// Returns `true` if the schedule has no tiers.
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Selects the tier for `value` under `mode`.
    pub fn resolve(&self, value: Usd, mode: TierMode) -> Option<&FeeTier> {
        match mode {
            TierMode::Cap => self
                .tiers
                .iter()
                .find(|t| t.threshold_usd >= value)
                .or_else(|| self.tiers.last()),
            TierMode::Floor => self.tiers.iter().rev().find(|t| t.threshold_usd <= value),
        }
    }

    /// Resolves the tier for `gross` and splits it into fee and net.
    ///
    /// The tier is picked on the gross value, not the net. Net depends on
    /// the tier's own rate, and the vault charges the rate of the tier the
    /// full redeemed value falls in.
    pub fn breakdown(&self, gross: Usd, mode: TierMode) -> Result<FeeBreakdown, FeeError> {
        let tier = self.resolve(gross, mode).cloned();
        let fee = match &tier {
            Some(t) => apply_bps(gross, t.fee_bps)?,
            None => Usd::ZERO,
        };
        // fee <= gross because bps <= 10_000.
        let net = gross.checked_sub(fee).unwrap_or(Usd::ZERO);
        Ok(FeeBreakdown {
            gross,
            fee,
            net,
            tier,
        })
    }
}

/// One-shot resolution straight from the contract arrays.
pub fn resolve_tier(
    value: Usd,
    thresholds: &[Usd],
    bps: &[u32],
    mode: TierMode,
) -> Result<Option<FeeTier>, FeeError> {
    Ok(FeeSchedule::from_pairs(thresholds, bps)?
        .resolve(value, mode)
        .cloned())
}

/// Gross value split into fee and net, all in whole USD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    /// Value of the redeemed tokens.
    pub gross: Usd,
    /// `floor(gross * bps / 10_000)`, zero without a tier.
    pub fee: Usd,
    /// `gross - fee`.
    pub net: Usd,
    /// The tier that set the rate.
    pub tier: Option<FeeTier>,
}

impl FeeBreakdown {
    /// Fee rate in basis points, zero without a tier.
    pub fn fee_bps(&self) -> u32 {
        self.tier.as_ref().map(|t| t.fee_bps).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd(values: &[u64]) -> Vec<Usd> {
        values.iter().map(|&v| Usd::from_dollars(v)).collect()
    }

    fn standard() -> FeeSchedule {
        FeeSchedule::from_pairs(&usd(&[100, 500, 1000]), &[50, 30, 10]).unwrap()
    }

    // -----------------------------------------------------------------------
    // 1. Cap mode
    // -----------------------------------------------------------------------

    #[test]
    fn cap_exact_threshold_selects_that_tier() {
        let tier = standard().resolve(Usd::from_dollars(100), TierMode::Cap).cloned().unwrap();
        assert_eq!(tier.index, 1);
        assert_eq!(tier.fee_bps, 50);
        assert_eq!(tier.fee_percent_text(), "0.50%");
    }

    #[test]
    fn cap_between_thresholds_rounds_up() {
        let tier = standard().resolve(Usd::from_dollars(600), TierMode::Cap).cloned().unwrap();
        assert_eq!(tier.index, 3);
        assert_eq!(tier.fee_percent_text(), "0.10%");
    }

    #[test]
    fn cap_above_all_thresholds_falls_back_to_last() {
        let tier = standard().resolve(Usd::from_dollars(5000), TierMode::Cap).cloned().unwrap();
        assert_eq!(tier.index, 3);
        assert_eq!(tier.fee_bps, 10);
    }

    #[test]
    fn cap_below_first_threshold_is_first_tier() {
        let tier = standard().resolve(Usd::ZERO, TierMode::Cap).cloned().unwrap();
        assert_eq!(tier.index, 1);
    }

    // -----------------------------------------------------------------------
    // 2. Floor mode
    // -----------------------------------------------------------------------

    #[test]
    fn floor_selects_last_threshold_at_or_below() {
        let s = standard();
        assert_eq!(s.resolve(Usd::from_dollars(600), TierMode::Floor).unwrap().index, 2);
        assert_eq!(s.resolve(Usd::from_dollars(1000), TierMode::Floor).unwrap().index, 3);
        assert_eq!(s.resolve(Usd::from_dollars(5000), TierMode::Floor).unwrap().index, 3);
    }

    #[test]
    fn floor_below_every_threshold_is_no_tier() {
        assert!(standard().resolve(Usd::from_dollars(99), TierMode::Floor).is_none());
    }

    // -----------------------------------------------------------------------
    // 3. Ordering and degenerate input
    // -----------------------------------------------------------------------

    #[test]
    fn input_order_does_not_matter() {
        let shuffled = FeeSchedule::from_pairs(&usd(&[1000, 100, 500]), &[10, 50, 30]).unwrap();
        assert_eq!(shuffled, standard());
        let tier = shuffled.resolve(Usd::from_dollars(100), TierMode::Cap).unwrap();
        assert_eq!((tier.index, tier.fee_bps), (1, 50));
    }

    #[test]
    fn equal_thresholds_keep_input_order() {
        let s = FeeSchedule::from_pairs(&usd(&[500, 500]), &[30, 20]).unwrap();
        assert_eq!(s.tiers()[0].fee_bps, 30);
        assert_eq!(s.tiers()[1].fee_bps, 20);
    }

    #[test]
    fn empty_input_is_no_tier_not_error() {
        assert_eq!(resolve_tier(Usd::from_dollars(10), &[], &[], TierMode::Cap), Ok(None));
        assert_eq!(
            resolve_tier(Usd::from_dollars(10), &usd(&[100]), &[], TierMode::Floor),
            Ok(None)
        );
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        assert_eq!(
            FeeSchedule::from_pairs(&usd(&[1, 2]), &[10]),
            Err(FeeError::LengthMismatch { thresholds: 2, bps: 1 })
        );
    }

    #[test]
    fn rates_above_one_hundred_percent_are_rejected() {
        assert_eq!(
            FeeSchedule::from_pairs(&usd(&[1]), &[10_001]),
            Err(FeeError::RateTooHigh(10_001))
        );
    }

    // -----------------------------------------------------------------------
    // 4. Breakdown
    // -----------------------------------------------------------------------

    #[test]
    fn breakdown_floors_fee() {
        let b = standard().breakdown(Usd::from_dollars(999), TierMode::Cap).unwrap();
        // $999 -> tier 3 (10 bps) -> 0.999 -> $0 fee.
        assert_eq!(b.fee, Usd::ZERO);
        assert_eq!(b.net, Usd::from_dollars(999));

        let b = standard().breakdown(Usd::from_dollars(100), TierMode::Cap).unwrap();
        // $100 at 50 bps = $0.50 -> $0.
        assert_eq!(b.fee, Usd::ZERO);

        let b = standard().breakdown(Usd::from_dollars(25_000), TierMode::Cap).unwrap();
        // $25,000 at 10 bps = $25.
        assert_eq!(b.fee, Usd::from_dollars(25));
        assert_eq!(b.net, Usd::from_dollars(24_975));
        assert_eq!(b.fee_bps(), 10);
    }

    #[test]
    fn breakdown_picks_tier_on_gross_value() {
        // $500 floors into the $500 tier; the $499 net would not.
        let b = standard().breakdown(Usd::from_dollars(500), TierMode::Floor).unwrap();
        assert_eq!(b.tier.as_ref().map(|t| t.index), Some(2));
        assert_eq!(b.fee, Usd::from_dollars(1));
        assert_eq!(b.net, Usd::from_dollars(499));
        assert_eq!(
            standard().resolve(b.net, TierMode::Floor).map(|t| t.index),
            Some(1)
        );
    }

    #[test]
    fn breakdown_without_tier_charges_nothing() {
        let b = standard().breakdown(Usd::from_dollars(50), TierMode::Floor).unwrap();
        assert!(b.tier.is_none());
        assert_eq!(b.fee, Usd::ZERO);
        assert_eq!(b.net, Usd::from_dollars(50));
    }

    #[test]
    fn tier_mode_parses() {
        assert_eq!("CAP".parse::<TierMode>(), Ok(TierMode::Cap));
        assert_eq!("floor".parse::<TierMode>(), Ok(TierMode::Floor));
        assert!("ceiling".parse::<TierMode>().is_err());
    }
}
