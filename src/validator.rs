//! Proof-of-work, linkage and retarget checks for incoming headers.
//!
//! Nothing here moves the best tip; chain selection lives in [`crate::ancestry`].
use num_bigint::BigUint;
use tracing::debug;

use crate::{
    config::RelayConfig,
    error::RelayError,
    header::{BitcoinHeader, Digest},
    pow::{self, RETARGET_INTERVAL},
    store::{HeaderRecord, HeaderStore, Transition},
};

/// Which difficulty bits a header must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BitsRule {
    /// Inside an epoch: the parent's bits.
    SameAsParent,
    /// First header of a new epoch: the retargeted bits.
    Retarget(u32),
}

/// Decode the target and check the digest meets it. Returns the target.
pub fn check_pow(config: &RelayConfig, header: &BitcoinHeader) -> Result<BigUint, RelayError> {
    let target = header.target()?;
    if target > pow::target_from_bits(config.pow_limit_bits())? {
        return Err(RelayError::BadBits(header.bits()));
    }
    if !pow::meets_target(&header.digest(), &target) {
        return Err(RelayError::InsufficientWork(header.digest()));
    }
    Ok(target)
}

/// Validate one header and append it under its stored parent.
///
/// The header must carry its parent's bits and must not open a new epoch;
/// epoch boundaries are only crossed by [`ingest_difficulty_change`].
/// Re-ingesting a stored header returns the existing record unchanged.
pub fn ingest_header<S: HeaderStore + ?Sized>(
    tx: &mut Transition<'_, S>,
    config: &RelayConfig,
    header: &BitcoinHeader,
) -> Result<HeaderRecord, RelayError> {
    ingest_with(tx, config, header, BitsRule::SameAsParent)
}

fn ingest_with<S: HeaderStore + ?Sized>(
    tx: &mut Transition<'_, S>,
    config: &RelayConfig,
    header: &BitcoinHeader,
    rule: BitsRule,
) -> Result<HeaderRecord, RelayError> {
    let digest = header.digest();
    let target = check_pow(config, header)?;

    if let Some(existing) = tx.header(&digest)? {
        return Ok(existing);
    }

    let parent = tx.get_header(&header.prev_digest())?;
    let height = parent.height + 1;
    match rule {
        BitsRule::SameAsParent if height % RETARGET_INTERVAL == 0 => {
            return Err(RelayError::bad_retarget(format!(
                "header {digest} at height {height} opens an epoch outside a retarget batch"
            )));
        }
        BitsRule::SameAsParent if header.bits() != parent.header.bits() => {
            return Err(RelayError::bad_retarget(format!(
                "header {digest} at height {height} changes difficulty outside a retarget batch"
            )));
        }
        BitsRule::Retarget(bits) if header.bits() != bits => {
            return Err(RelayError::bad_retarget(format!(
                "header {digest} has bits {:#010x}, expected {bits:#010x}",
                header.bits()
            )));
        }
        _ => {}
    }

    let record = HeaderRecord {
        header: header.clone(),
        height,
        accumulated_work: parent.accumulated_work + pow::work_from_target(&target),
    };
    tx.put_header(record.clone())?;
    debug!(%digest, height, "header ingested");
    Ok(record)
}

/// Ingest a linked batch that stays within one difficulty epoch: every new
/// header must carry its parent's bits.
pub fn ingest_headers<S: HeaderStore + ?Sized>(
    tx: &mut Transition<'_, S>,
    config: &RelayConfig,
    headers: &[BitcoinHeader],
) -> Result<Vec<HeaderRecord>, RelayError> {
    headers.iter().map(|h| ingest_header(tx, config, h)).collect()
}

/// Ingest a batch that opens a new difficulty epoch.
///
/// `prev_epoch_start` is the first header of the closing epoch; the parent of
/// `headers[0]` must be its last. Every header in the batch must carry exactly
/// the retargeted bits, and the batch may not reach the following epoch.
pub fn ingest_difficulty_change<S: HeaderStore + ?Sized>(
    tx: &mut Transition<'_, S>,
    config: &RelayConfig,
    prev_epoch_start: &Digest,
    headers: &[BitcoinHeader],
) -> Result<Vec<HeaderRecord>, RelayError> {
    let first = headers
        .first()
        .ok_or_else(|| RelayError::bad_retarget("empty difficulty change batch"))?;

    let epoch_start = tx.get_header(prev_epoch_start)?;
    let anchor = tx.get_header(&first.prev_digest())?;

    if (anchor.height + 1) % RETARGET_INTERVAL != 0 {
        return Err(RelayError::bad_retarget(format!(
            "anchor {} at height {} does not close an epoch",
            anchor.digest(),
            anchor.height
        )));
    }
    if anchor.height.checked_sub(epoch_start.height) != Some(RETARGET_INTERVAL - 1) {
        return Err(RelayError::bad_retarget(format!(
            "epoch start at height {} does not open the epoch closed at {}",
            epoch_start.height, anchor.height
        )));
    }

    let expected = pow::retarget(
        &anchor.header.target()?,
        epoch_start.header.time(),
        anchor.header.time(),
        &pow::target_from_bits(config.pow_limit_bits())?,
    );
    let expected_bits = pow::bits_from_target(&expected);

    if let Some(bad) = headers.iter().find(|h| h.bits() != expected_bits) {
        return Err(RelayError::bad_retarget(format!(
            "header {} has bits {:#010x}, expected {:#010x}",
            bad.digest(),
            bad.bits(),
            expected_bits
        )));
    }

    debug!(bits = expected_bits, height = anchor.height + 1, "retarget accepted");
    let mut records = Vec::with_capacity(headers.len());
    records.push(ingest_with(tx, config, first, BitsRule::Retarget(expected_bits))?);
    for h in &headers[1..] {
        records.push(ingest_header(tx, config, h)?);
    }
    Ok(records)
}

/// Store a header with no stored parent (relay genesis, epoch start).
pub(crate) fn anchor_header<S: HeaderStore + ?Sized>(
    tx: &mut Transition<'_, S>,
    config: &RelayConfig,
    header: &BitcoinHeader,
    height: u32,
) -> Result<HeaderRecord, RelayError> {
    let target = check_pow(config, header)?;
    let record = HeaderRecord {
        header: header.clone(),
        height,
        accumulated_work: pow::work_from_target(&target),
    };
    tx.put_header(record.clone())?;
    Ok(record)
}
