//! # Fixed-Point Math
//!
//! WAD (10^18) helpers used by every accounting path. Products are formed in a
//! 256-bit intermediate so `a * b / d` never overflows for `u128` inputs; only a
//! quotient that does not fit back into `u128` fails.
//!
//! Divisions truncate toward zero.

use crate::constants::{DECIMALS, WAD};
use crate::error::{FundError, Result};
pub use primitive_types::U256;

/// Compute `a * b / denominator` with a 256-bit intermediate product
pub fn mul_div(a: u128, b: u128, denominator: u128) -> Result<u128> {
    if denominator == 0 {
        return Err(FundError::DivisionByZero);
    }

    let product = U256::from(a)
        .checked_mul(U256::from(b))
        .ok_or(FundError::ArithmeticOverflow)?;
    let quotient = product / U256::from(denominator);

    if quotient > U256::from(u128::MAX) {
        return Err(FundError::ArithmeticOverflow);
    }
    Ok(quotient.as_u128())
}

/// Multiply two WAD values: `a * b / WAD`
pub fn wad_mul(a: u128, b: u128) -> Result<u128> {
    mul_div(a, b, WAD)
}

/// Divide two WAD values: `a * WAD / b`
pub fn wad_div(a: u128, b: u128) -> Result<u128> {
    mul_div(a, WAD, b)
}

/// `amount * WAD / weight` as a 256-bit accumulator increment
pub fn index_increment(amount: u128, weight: u128) -> Result<U256> {
    if weight == 0 {
        return Err(FundError::DivisionByZero);
    }
    Ok(U256::from(amount) * U256::from(WAD) / U256::from(weight))
}

/// `floor(weight * index / WAD)` for a 256-bit index
///
/// Split as `weight * (index / WAD) + weight * (index % WAD) / WAD`, which is
/// exact and keeps every intermediate inside 256 bits.
pub fn wad_mul_wide(weight: u128, index: U256) -> Result<U256> {
    let wad = U256::from(WAD);
    let weight = U256::from(weight);
    let high = weight
        .checked_mul(index / wad)
        .ok_or(FundError::ArithmeticOverflow)?;
    let low = weight * (index % wad) / wad;
    high.checked_add(low).ok_or(FundError::ArithmeticOverflow)
}

/// Narrow a 256-bit value back to `u128`
pub fn to_u128(value: U256) -> Result<u128> {
    if value > U256::from(u128::MAX) {
        return Err(FundError::ArithmeticOverflow);
    }
    Ok(value.as_u128())
}

/// Smaller of two amounts
pub const fn min(a: u128, b: u128) -> u128 {
    if a < b {
        a
    } else {
        b
    }
}

/// Addition that reports overflow instead of wrapping
pub fn checked_add(a: u128, b: u128) -> Result<u128> {
    a.checked_add(b).ok_or(FundError::ArithmeticOverflow)
}

/// Subtraction that reports underflow instead of wrapping
pub fn checked_sub(a: u128, b: u128) -> Result<u128> {
    a.checked_sub(b).ok_or(FundError::ArithmeticOverflow)
}

/// Render a WAD amount as a decimal string, e.g. `618.2`
pub fn format_units(amount: u128) -> String {
    let whole = amount / WAD;
    let frac = amount % WAD;
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{:0width$}", frac, width = DECIMALS as usize);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

/// Parse a decimal string such as `"1000"` or `"0.25"` into WAD units
pub fn parse_units(input: &str) -> Result<u128> {
    let input = input.trim();
    let (whole, frac) = match input.split_once('.') {
        Some((w, f)) => (w, f),
        None => (input, ""),
    };

    let invalid = || FundError::InvalidInput(format!("not an amount: {input}"));
    if (whole.is_empty() && frac.is_empty()) || frac.len() > DECIMALS as usize {
        return Err(invalid());
    }
    if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| FundError::ArithmeticOverflow)?
    };
    let frac_scaled: u128 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac, width = DECIMALS as usize);
        padded.parse().map_err(|_| invalid())?
    };

    checked_add(
        whole.checked_mul(WAD).ok_or(FundError::ArithmeticOverflow)?,
        frac_scaled,
    )
}
