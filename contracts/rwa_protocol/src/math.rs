//! Integer helpers shared by every engine.
//!
//! All products are taken in `i128` and narrowed back with a range check.

use crate::errors::{Error, Result};

/// 100% in basis points.
pub const BASIS_POINTS: i64 = 10_000;

/// `10^exp` for token precisions (`exp <= 18`).
pub const fn pow10(exp: u8) -> i64 {
    let mut ret = 1i64;
    let mut i = 0;
    while i < exp {
        ret *= 10;
        i += 1;
    }
    ret
}

fn narrow(v: i128) -> Result<i64> {
    i64::try_from(v).map_err(|_| Error::Overflow)
}

/// `floor(a * b / c)` with a double-width intermediate.
pub fn mul_div_floor(a: i64, b: i64, c: i64) -> Result<i64> {
    if c == 0 {
        return Err(Error::InvalidParameter("division by zero".into()));
    }
    let num = (a as i128).checked_mul(b as i128).ok_or(Error::Overflow)?;
    narrow(num.div_euclid(c as i128))
}

/// Split `total` across `weights` proportionally.
///
/// Every entry but the last receives `floor(total * w_i / Σw)`; the last
/// receives `total - Σ(previous)`, so the result always sums to `total`.
pub fn split_proportional(total: i64, weights: &[i64]) -> Result<Vec<i64>> {
    if total < 0 {
        return Err(Error::NotPositive("split total must not be negative".into()));
    }
    if weights.is_empty() {
        return Err(Error::RecordNotFound("no weights to split across".into()));
    }
    if weights.iter().any(|w| *w < 0) {
        return Err(Error::InvalidParameter("negative weight".into()));
    }
    let sum: i128 = weights.iter().map(|w| *w as i128).sum();
    if sum == 0 {
        if total == 0 {
            return Ok(vec![0; weights.len()]);
        }
        return Err(Error::InvalidParameter("weights sum to zero".into()));
    }

    let mut shares = Vec::with_capacity(weights.len());
    let mut allotted: i64 = 0;
    for w in &weights[..weights.len() - 1] {
        let share = narrow(total as i128 * *w as i128 / sum)?;
        allotted = allotted.checked_add(share).ok_or(Error::Overflow)?;
        shares.push(share);
    }
    shares.push(total.checked_sub(allotted).ok_or(Error::Overflow)?);
    Ok(shares)
}

/// Constant-product output for swapping `amount_in` into a pool, after the
/// pool fee (basis points) is taken from the input.
pub fn amm_output(amount_in: i64, reserve_in: i64, reserve_out: i64, fee_bp: i64) -> Result<i64> {
    if amount_in <= 0 {
        return Err(Error::NotPositive("swap input must be positive".into()));
    }
    if reserve_in <= 0 || reserve_out <= 0 {
        return Err(Error::QuantityInsufficient("trading pair has no liquidity".into()));
    }
    if !(0..BASIS_POINTS).contains(&fee_bp) {
        return Err(Error::InvalidParameter(format!("fee {fee_bp} bp out of range")));
    }
    let in_after_fee = amount_in as i128 * (BASIS_POINTS - fee_bp) as i128 / BASIS_POINTS as i128;
    let num = in_after_fee
        .checked_mul(reserve_out as i128)
        .ok_or(Error::Overflow)?;
    let den = reserve_in as i128 + in_after_fee;
    narrow(num / den)
}
