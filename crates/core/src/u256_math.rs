//! Fixed-point helpers for price comparisons.
//!
//! Prices are 18-decimal U256 values; ratios are expressed in basis points
//! (4 decimal places of a fraction) so the hot path never touches floats.

use alloy::primitives::U256;

/// WAD constant: 1e18 for 18-decimal fixed-point arithmetic
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// Basis points denominator (10000 = 100%)
pub const BPS_DENOMINATOR: U256 = U256::from_limbs([10000u64, 0, 0, 0]);

/// Distance of `liquidation_price` below `current_price` as a fraction of
/// `current_price`, in basis points, floored.
///
/// Negative when the liquidation price is above the current price. Returns
/// `None` for a zero current price.
pub fn price_ratio_bps(current_price: U256, liquidation_price: U256) -> Option<i64> {
    if current_price.is_zero() {
        return None;
    }

    if current_price >= liquidation_price {
        let bps = (current_price - liquidation_price).saturating_mul(BPS_DENOMINATOR) / current_price;
        Some(saturating_i64(bps))
    } else {
        // Floor of a negative quotient rounds away from zero.
        let num = (liquidation_price - current_price).saturating_mul(BPS_DENOMINATOR);
        let mut bps = num / current_price;
        if !(num % current_price).is_zero() {
            bps += U256::from(1u64);
        }
        Some(-saturating_i64(bps))
    }
}

/// Apply basis points reduction.
/// Returns: value * (10000 - basis_points) / 10000
///
/// Example: apply_basis_points(1000, 100) = 990 (1% reduction)
#[inline(always)]
pub fn apply_basis_points(value: U256, basis_points: u64) -> U256 {
    let factor = U256::from(10_000u64.saturating_sub(basis_points));
    value.saturating_mul(factor) / BPS_DENOMINATOR
}

/// Convert WAD (18 decimals) to f64.
/// Use only for display/logging, not for computation.
#[inline(always)]
pub fn wad_to_f64(wad: U256) -> f64 {
    if wad <= U256::from(u128::MAX) {
        let value: u128 = wad.to();
        value as f64 / 1e18
    } else {
        let limbs = wad.as_limbs();
        let high = limbs[1] as f64 * (u64::MAX as f64 + 1.0);
        let low = limbs[0] as f64;
        (high + low) / 1e18
    }
}

fn saturating_i64(value: U256) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
