//! Fixed-point and percentage arithmetic.
//!
//! Pure functions with no state. Overflow is always an error, never a wrap;
//! the only silent saturation is [`diff_or_zero`], whose contract is to
//! clamp at zero.

use crate::error::{GraphError, Result};
use crate::types::{Ppm, FIXED_POINT_SCALING_FACTOR, MAX_PPM, U256};

/// e^-1 in 1e18 fixed point
const E_INV_WAD: U256 = U256::from_limbs([367_879_441_171_442_321, 0, 0, 0]);

/// Beyond e^-41 the result is below 1e-18 and truncates to zero
const EXP_NEG_CUTOFF: u64 = 41;

/// Taylor terms evaluated for the fractional part of an exponent
const EXP_SERIES_TERMS: u64 = 32;

pub fn checked_add(a: U256, b: U256) -> Result<U256> {
    a.checked_add(b).ok_or(GraphError::ArithmeticOverflow)
}

pub fn checked_sub(a: U256, b: U256) -> Result<U256> {
    a.checked_sub(b).ok_or(GraphError::ArithmeticUnderflow)
}

pub fn checked_mul(a: U256, b: U256) -> Result<U256> {
    a.checked_mul(b).ok_or(GraphError::ArithmeticOverflow)
}

pub fn checked_div(a: U256, b: U256) -> Result<U256> {
    if b.is_zero() {
        return Err(GraphError::DivisionByZero);
    }
    Ok(a / b)
}

/// `a * b / denominator`, truncating
pub fn mul_div(a: U256, b: U256, denominator: U256) -> Result<U256> {
    checked_div(checked_mul(a, b)?, denominator)
}

/// `value * ppm / 1_000_000`, truncating. A PPM at or above 100% returns
/// `value` unchanged.
pub fn percent_of(ppm: Ppm, value: U256) -> Result<U256> {
    if ppm >= MAX_PPM {
        return Ok(value);
    }
    mul_div(value, U256::from(ppm), U256::from(MAX_PPM))
}

/// Whether a value is a valid PPM percentage (at most 100%)
pub fn is_valid_ppm(ppm: Ppm) -> bool {
    ppm <= MAX_PPM
}

/// `(value_a * weight_a + value_b * weight_b) / (weight_a + weight_b)`
pub fn weighted_average(value_a: U256, weight_a: U256, value_b: U256, weight_b: U256) -> Result<U256> {
    let numerator = checked_add(checked_mul(value_a, weight_a)?, checked_mul(value_b, weight_b)?)?;
    checked_div(numerator, checked_add(weight_a, weight_b)?)
}

/// `x - y` if `x > y`, else 0
pub fn diff_or_zero(x: U256, y: U256) -> U256 {
    x.saturating_sub(y)
}

pub fn min(a: U256, b: U256) -> U256 {
    a.min(b)
}

pub fn max(a: U256, b: U256) -> U256 {
    a.max(b)
}

/// Narrow to `u64`, failing if the value does not fit
pub fn to_u64(value: U256) -> Result<u64> {
    if value > U256::from(u64::MAX) {
        return Err(GraphError::ArithmeticOverflow);
    }
    Ok(value.as_limbs()[0])
}

/// `base^exponent` in fixed point with the given `scale`, by repeated
/// squaring. Every intermediate product is truncated (rounds down), so a
/// base equal to `scale` yields exactly `scale` for any exponent.
pub fn pow(base: U256, exponent: u64, scale: U256) -> Result<U256> {
    if scale.is_zero() {
        return Err(GraphError::DivisionByZero);
    }
    if exponent == 0 {
        return Ok(scale);
    }
    if base.is_zero() {
        return Ok(U256::ZERO);
    }

    let mut z = if exponent % 2 == 1 { base } else { scale };
    let mut x = base;
    let mut n = exponent / 2;
    while n > 0 {
        x = checked_mul(x, x)? / scale;
        if n % 2 == 1 {
            z = checked_mul(z, x)? / scale;
        }
        n /= 2;
    }
    Ok(z)
}

/// Integer square root, rounded down
pub fn sqrt(x: U256) -> U256 {
    if x.is_zero() {
        return U256::ZERO;
    }
    if x <= U256::from(3u8) {
        return U256::from(1u8);
    }
    let two = U256::from(2u8);
    let mut z = x;
    let mut y = x / two + U256::from(1u8);
    while y < z {
        z = y;
        y = (x / y + y) / two;
    }
    z
}

/// `e^(-x)` for `x` in 1e18 fixed point, result in 1e18 fixed point.
///
/// Integer part via repeated multiplication by e^-1, fractional part via
/// the reciprocal of a truncated Taylor series of e^x.
pub fn exp_neg(x: U256) -> Result<U256> {
    let wad = FIXED_POINT_SCALING_FACTOR;
    let whole = x / wad;
    if whole >= U256::from(EXP_NEG_CUTOFF) {
        return Ok(U256::ZERO);
    }
    let fraction = x % wad;

    let mut series = wad;
    let mut term = wad;
    for k in 1..=EXP_SERIES_TERMS {
        term = checked_mul(term, fraction)? / wad / U256::from(k);
        if term.is_zero() {
            break;
        }
        series = checked_add(series, term)?;
    }
    let mut result = mul_div(wad, wad, series)?;

    for _ in 0..to_u64(whole)? {
        result = checked_mul(result, E_INV_WAD)? / wad;
    }
    Ok(result)
}
