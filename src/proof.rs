//! SPV proofs: Merkle inclusion against a stored header, and confirmation depth.
use bitcoin::{
    consensus,
    hashes::{sha256d, Hash},
    Transaction, TxMerkleNode, Txid,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    ancestry,
    config::RelayConfig,
    error::RelayError,
    header::Digest,
    store::{HeaderRecord, HeaderStore},
};

/// Inclusion proof for one transaction. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpvProof {
    /// Consensus-encoded transaction; witness data is allowed but not hashed.
    pub tx: Vec<u8>,
    /// Sibling hashes from leaf to root, in internal byte order.
    pub intermediate_nodes: Vec<[u8; 32]>,
    /// Position of the transaction in the block.
    pub index: u32,
    /// Header whose merkle root commits to the transaction.
    pub confirming_digest: Digest,
}

/// What a successful validation proved.
#[derive(Debug, Clone)]
pub struct ValidatedProof {
    /// Decoded transaction.
    pub transaction: Transaction,
    /// Its witness-stripped id.
    pub txid: Txid,
    /// Stored record of the confirming header.
    pub confirming: HeaderRecord,
}

/// Headers from `digest` to the best known tip, inclusive.
///
/// A header above the tip's height (on a lighter branch) has zero confirmations.
pub fn get_confs<S: HeaderStore + ?Sized>(store: &S, digest: &Digest) -> Result<u32, RelayError> {
    let best = store.best_known_digest()?;
    let best = store.get_header(&best)?;
    let header = store.get_header(digest)?;
    Ok((best.height + 1).saturating_sub(header.height))
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(left);
    data.extend_from_slice(right);
    sha256d::Hash::hash(&data).to_byte_array()
}

/// Fold `leaf` up the tree. `None` when `index` does not fit a tree of this depth.
pub fn merkle_root_from_path(leaf: [u8; 32], index: u32, nodes: &[[u8; 32]]) -> Option<[u8; 32]> {
    let mut current = leaf;
    let mut index = u64::from(index);

    for sibling in nodes {
        current = if index & 1 == 0 {
            hash_pair(&current, sibling)
        } else {
            hash_pair(sibling, &current)
        };
        index >>= 1;
    }

    (index == 0).then_some(current)
}

/// Whether `txid` at `index` hashes up to `root` along `nodes`.
pub fn verify_merkle_path(txid: &Txid, index: u32, nodes: &[[u8; 32]], root: &TxMerkleNode) -> bool {
    merkle_root_from_path(txid.to_byte_array(), index, nodes)
        .is_some_and(|computed| computed == root.to_byte_array())
}

/// Validate `proof` against the stored chain.
///
/// The confirming header must descend from the last reorg ancestor within
/// `config.proof_ancestry_limit` steps, then the transaction must hash up to
/// that header's merkle root.
pub fn validate_proof<S: HeaderStore + ?Sized>(
    store: &S,
    config: &RelayConfig,
    proof: &SpvProof,
) -> Result<ValidatedProof, RelayError> {
    let lca = store.last_reorg_lca()?;
    if !ancestry::is_ancestor(store, &lca, &proof.confirming_digest, config.proof_ancestry_limit)? {
        warn!(confirming = %proof.confirming_digest, %lca, "proof header not on the relayed chain");
        return Err(RelayError::NotAncestor(proof.confirming_digest));
    }
    let confirming = store.get_header(&proof.confirming_digest)?;

    let transaction: Transaction =
        consensus::deserialize(&proof.tx).map_err(|e| RelayError::BadTransaction(e.to_string()))?;
    let txid = transaction.compute_txid();

    if !verify_merkle_path(&txid, proof.index, &proof.intermediate_nodes, &confirming.header.merkle_root()) {
        warn!(%txid, confirming = %proof.confirming_digest, "merkle proof mismatch");
        return Err(RelayError::BadMerkleProof(txid));
    }

    Ok(ValidatedProof {
        transaction,
        txid,
        confirming,
    })
}
