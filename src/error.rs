//! Error types shared by every relay component.
use bitcoin::BlockHash;

use crate::requests::RequestId;

/// Failures raised by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A header with the same digest but different content is already stored.
    #[error("refusing to overwrite stored header {0}")]
    Conflict(BlockHash),

    /// A stored value could not be decoded.
    #[error("corrupt stored value under {key}: {reason}")]
    Corrupt {
        /// Which kind of value failed to decode.
        key: String,
        /// Decoder message.
        reason: String,
    },

    /// The backend itself failed.
    #[error("storage backend: {0}")]
    Backend(String),
}

#[cfg(feature = "store-sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Every way a relay transition or query can fail.
///
/// Errors are never retried internally; a failed transition commits nothing.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Header input was not 80 bytes (or a multiple of 80 for a chain).
    #[error("malformed header: expected 80 bytes, got {0}")]
    MalformedHeader(usize),

    /// Compact bits that are negative, overflow, or exceed the network limit.
    #[error("invalid difficulty bits {0:#010x}")]
    BadBits(u32),

    /// Digest above the target the header claims.
    #[error("header {0} does not meet its claimed target")]
    InsufficientWork(BlockHash),

    /// A header that was looked up is not stored.
    #[error("unknown block {0}")]
    UnknownBlock(BlockHash),

    /// A state pointer (genesis, best, reorg ancestor) is unset.
    #[error("bad hash256 digest: {0}")]
    BadHash256Digest(String),

    /// Difficulty changed where it must not, or not to the computed value.
    #[error("bad retarget: {reason}")]
    BadRetarget {
        /// What was wrong with the batch.
        reason: String,
    },

    /// Proof header is not within reach above the last reorg ancestor.
    #[error("confirming header {0} does not descend from the last reorg ancestor")]
    NotAncestor(BlockHash),

    /// Walking back `offset` links left the stored chain.
    #[error("could not find ancestor {offset} blocks behind {digest}")]
    NotFound {
        /// Where the walk started.
        digest: BlockHash,
        /// How far it was asked to go.
        offset: u32,
    },

    /// Reorg candidate does not carry more work than the current best.
    #[error("new best {0} does not have more work than the current best")]
    NotHeaviest(BlockHash),

    /// Heaviest-chain comparison between headers not both above the ancestor.
    #[error("could not determine if {0} is heavier than {1}: not both descendants of the ancestor")]
    CouldNotDetermine(BlockHash, BlockHash),

    /// Caller's view of the best tip is stale.
    #[error("{0} is not the best known digest")]
    NotBestKnown(BlockHash),

    /// Claimed fork point is not the nearest shared ancestor.
    #[error("{0} is not the most recent common ancestor")]
    NotMostRecentAncestor(BlockHash),

    /// Caller-supplied bound or batch length over `max_traversal`.
    #[error("traversal bound {limit} exceeds the configured maximum {max}")]
    ExcessiveLimit {
        /// Requested bound.
        limit: u32,
        /// Configured maximum.
        max: u32,
    },

    /// Merkle path does not lead to the header's root.
    #[error("bad merkle proof for {0}")]
    BadMerkleProof(bitcoin::Txid),

    /// Proof transaction failed to decode.
    #[error("malformed transaction: {0}")]
    BadTransaction(String),

    /// `initialize` called twice.
    #[error("relay genesis is already set")]
    AlreadyInitialized,

    /// No request was ever opened under this id.
    #[error("request not found: {0}")]
    RequestNotFound(RequestId),

    /// Request exists but is inactive.
    #[error("request {0} is closed")]
    ClosedRequest(RequestId),

    /// Proof header is not buried deep enough for the request.
    #[error("request {id} needs {required} confirmations, have {actual}")]
    NotEnoughConfs {
        /// Request being filled.
        id: RequestId,
        /// Its minimum confirmations.
        required: u32,
        /// Confirmations of the proof's header.
        actual: u32,
    },

    /// Filled request points past the transaction's inputs or outputs.
    #[error("{kind} index {index} out of range")]
    IndexOutOfRange {
        /// `"input"` or `"output"`.
        kind: &'static str,
        /// Offending index.
        index: u32,
    },

    /// Named input spends a different outpoint.
    #[error("input does not spend the outpoint requested by {0}")]
    SpendsMismatch(RequestId),

    /// Named output pays a different script.
    #[error("output does not pay the script requested by {0}")]
    PaysMismatch(RequestId),

    /// Named output pays less than requested.
    #[error("output value {actual} is below the {required} requested by {id}")]
    InsufficientValue {
        /// Request being filled.
        id: RequestId,
        /// Requested minimum, in satoshis.
        required: u64,
        /// Value of the named output.
        actual: u64,
    },

    /// The blocking task running a call panicked or was cancelled.
    #[error("relay task failed: {0}")]
    TaskFailed(String),

    /// Storage backend failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RelayError {
    pub(crate) fn bad_retarget(reason: impl Into<String>) -> Self {
        Self::BadRetarget {
            reason: reason.into(),
        }
    }
}
