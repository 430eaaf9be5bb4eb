//! Proof-of-work arithmetic: compact targets, per-header work, and the
//! 2016-block retarget rule.
//!
//! Everything is exact integer math on [`BigUint`]; no floating point.
use bitcoin::{hashes::Hash, BlockHash};
use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::error::RelayError;

/// Headers per difficulty epoch.
pub const RETARGET_INTERVAL: u32 = 2_016;

/// Expected seconds per epoch (two weeks).
pub const TARGET_TIMESPAN: u64 = 14 * 24 * 60 * 60;

/// Decode compact `bits` into a 256-bit target.
///
/// Rejects the sign bit, exponents that overflow 256 bits, and zero targets.
pub fn target_from_bits(bits: u32) -> Result<BigUint, RelayError> {
    let size = bits >> 24;
    let mut word = bits & 0x007f_ffff;

    if word != 0 && bits & 0x0080_0000 != 0 {
        return Err(RelayError::BadBits(bits));
    }
    if word != 0 && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32)) {
        return Err(RelayError::BadBits(bits));
    }

    let target = if size <= 3 {
        word >>= 8 * (3 - size);
        BigUint::from(word)
    } else {
        BigUint::from(word) << ((8 * (size - 3)) as usize)
    };

    if target.is_zero() {
        return Err(RelayError::BadBits(bits));
    }
    Ok(target)
}

/// Encode a target in compact form, truncating to a 23-bit mantissa.
pub fn bits_from_target(target: &BigUint) -> u32 {
    if target.is_zero() {
        return 0;
    }

    let mut size = target.bits().div_ceil(8) as u32;
    let mut compact: u32 = if size <= 3 {
        low_u32(target) << (8 * (3 - size))
    } else {
        low_u32(&(target >> ((8 * (size - 3)) as usize)))
    };

    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }

    (size << 24) | (compact & 0x007f_ffff)
}

fn low_u32(value: &BigUint) -> u32 {
    value.iter_u32_digits().next().unwrap_or(0)
}

/// A digest read as a little-endian 256-bit integer.
pub fn digest_value(digest: &BlockHash) -> BigUint {
    BigUint::from_bytes_le(digest.as_byte_array())
}

/// `digest <= target`.
pub fn meets_target(digest: &BlockHash, target: &BigUint) -> bool {
    digest_value(digest) <= *target
}

/// Expected number of hashes to hit `target`: `2^256 / (target + 1)`.
pub fn work_from_target(target: &BigUint) -> BigUint {
    (BigUint::one() << 256usize) / (target + BigUint::one())
}

/// Bitcoin's retarget rule.
///
/// `new = old * clamp(actual, expected/4, expected*4) / expected`, capped at
/// `pow_limit`. `first_time` and `last_time` are the timestamps of the first
/// and last header of the closing epoch.
pub fn retarget(old: &BigUint, first_time: u32, last_time: u32, pow_limit: &BigUint) -> BigUint {
    let actual = i64::from(last_time) - i64::from(first_time);
    let timespan = actual.clamp(
        (TARGET_TIMESPAN / 4) as i64,
        (TARGET_TIMESPAN * 4) as i64,
    ) as u64;

    let adjusted = old * BigUint::from(timespan) / BigUint::from(TARGET_TIMESPAN);
    if adjusted > *pow_limit {
        pow_limit.clone()
    } else {
        adjusted
    }
}
