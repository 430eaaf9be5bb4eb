//! Bounded walks over `prev` links and heaviest-chain selection.
//!
//! Chain depth is attacker-influenced, so every walk takes an explicit step
//! bound and runs as a loop over stored records: O(limit) work, constant stack.
use tracing::info;

use crate::{
    config::RelayConfig,
    error::RelayError,
    header::{BitcoinHeader, Digest},
    store::{HeaderStore, Slot, Transition},
    validator,
};

/// Reject a caller-supplied bound before any traversal starts.
pub fn check_bound(config: &RelayConfig, limit: u32) -> Result<(), RelayError> {
    if limit > config.max_traversal {
        return Err(RelayError::ExcessiveLimit {
            limit,
            max: config.max_traversal,
        });
    }
    Ok(())
}

fn prev_of<S: HeaderStore + ?Sized>(store: &S, digest: &Digest) -> Result<Option<Digest>, RelayError> {
    Ok(store.header(digest)?.map(|r| r.prev_digest()))
}

/// The stored header exactly `offset` links behind `digest`.
pub fn find_ancestor<S: HeaderStore + ?Sized>(
    store: &S,
    digest: &Digest,
    offset: u32,
) -> Result<Digest, RelayError> {
    let not_found = || RelayError::NotFound {
        digest: *digest,
        offset,
    };

    let mut current = *digest;
    for _ in 0..offset {
        current = prev_of(store, &current)?.ok_or_else(not_found)?;
    }
    // the final step may have walked off the stored chain
    if store.header(&current)?.is_none() {
        return Err(not_found());
    }
    Ok(current)
}

/// Whether `ancestor` is reached from `descendant` within `limit` backward
/// steps. A header is its own ancestor at zero steps.
pub fn is_ancestor<S: HeaderStore + ?Sized>(
    store: &S,
    ancestor: &Digest,
    descendant: &Digest,
    limit: u32,
) -> Result<bool, RelayError> {
    let mut current = *descendant;
    if current == *ancestor {
        return Ok(true);
    }
    for _ in 0..limit {
        match prev_of(store, &current)? {
            Some(prev) => current = prev,
            None => return Ok(false),
        }
        if current == *ancestor {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Whether `ancestor` is the nearest header both `left` and `right` descend
/// from, each within `limit` steps.
///
/// Both walks stop on reaching `ancestor`; it is the most recent common
/// ancestor iff both reached it and the headers just above it differ.
pub fn is_most_recent_common_ancestor<S: HeaderStore + ?Sized>(
    store: &S,
    ancestor: &Digest,
    left: &Digest,
    right: &Digest,
    limit: u32,
) -> Result<bool, RelayError> {
    if ancestor == left && ancestor == right {
        return Ok(true);
    }

    let (mut left_cur, mut left_prev) = (*left, Some(*left));
    let (mut right_cur, mut right_prev) = (*right, Some(*right));

    for _ in 0..limit {
        if left_prev != Some(*ancestor) {
            if let Some(p) = left_prev {
                left_cur = p;
                left_prev = prev_of(store, &p)?;
            }
        }
        if right_prev != Some(*ancestor) {
            if let Some(p) = right_prev {
                right_cur = p;
                right_prev = prev_of(store, &p)?;
            }
        }
    }

    if left_cur == right_cur {
        // a nearer common ancestor exists
        return Ok(false);
    }
    Ok(left_prev == Some(*ancestor) && right_prev == Some(*ancestor))
}

/// Of two descendants of `ancestor`, the one with more accumulated work.
/// Ties keep `current_best`.
pub fn heaviest_from_ancestor<S: HeaderStore + ?Sized>(
    store: &S,
    ancestor: &Digest,
    current_best: &Digest,
    new_best: &Digest,
    limit: u32,
) -> Result<Digest, RelayError> {
    if !is_ancestor(store, ancestor, current_best, limit)?
        || !is_ancestor(store, ancestor, new_best, limit)?
    {
        return Err(RelayError::CouldNotDetermine(*current_best, *new_best));
    }

    let current = store.get_header(current_best)?;
    let candidate = store.get_header(new_best)?;
    if candidate.accumulated_work > current.accumulated_work {
        Ok(*new_best)
    } else {
        Ok(*current_best)
    }
}

/// Reorg the best tip onto `new_best` and record `ancestor` as the last reorg
/// common ancestor.
///
/// `new_best` is ingested first if needed; `current_best` must be the stored tip.
pub fn mark_new_heaviest<S: HeaderStore + ?Sized>(
    tx: &mut Transition<'_, S>,
    config: &RelayConfig,
    ancestor: &Digest,
    current_best: &BitcoinHeader,
    new_best: &BitcoinHeader,
    limit: u32,
) -> Result<(), RelayError> {
    check_bound(config, limit)?;

    let stored_best = tx.best_known_digest()?;
    if current_best.digest() != stored_best {
        return Err(RelayError::NotBestKnown(current_best.digest()));
    }

    validator::ingest_headers(tx, config, std::slice::from_ref(new_best))?;

    let new_digest = new_best.digest();
    if new_digest == stored_best {
        return Err(RelayError::NotHeaviest(new_digest));
    }
    if !is_most_recent_common_ancestor(&*tx, ancestor, &stored_best, &new_digest, limit)? {
        return Err(RelayError::NotMostRecentAncestor(*ancestor));
    }
    if heaviest_from_ancestor(&*tx, ancestor, &stored_best, &new_digest, limit)? != new_digest {
        return Err(RelayError::NotHeaviest(new_digest));
    }

    tx.set_best_known_digest(new_digest);
    tx.set_last_reorg_lca(*ancestor);
    info!(best = %new_digest, lca = %ancestor, "new heaviest tip");
    Ok(())
}

/// Move the tip forward to `candidate` when it directly extends the current
/// best within `limit` steps and carries more work.
///
/// The previous best is the most recent common ancestor of the old and new
/// tips, so it becomes the last reorg ancestor.
pub fn extend_best<S: HeaderStore + ?Sized>(
    tx: &mut Transition<'_, S>,
    candidate: &Digest,
    limit: u32,
) -> Result<bool, RelayError> {
    let Some(best) = tx.slot(Slot::BestKnown)? else {
        return Ok(false);
    };
    if best == *candidate || !is_ancestor(&*tx, &best, candidate, limit)? {
        return Ok(false);
    }

    let best_rec = tx.get_header(&best)?;
    let candidate_rec = tx.get_header(candidate)?;
    if candidate_rec.accumulated_work <= best_rec.accumulated_work {
        return Ok(false);
    }

    tx.set_best_known_digest(*candidate);
    tx.set_last_reorg_lca(best);
    info!(best = %candidate, lca = %best, height = candidate_rec.height, "best tip extended");
    Ok(true)
}
