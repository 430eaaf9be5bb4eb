#![allow(dead_code)]
//! Shared fixtures: headers are mined for real (nonce search) at easy
//! difficulties so every one of them passes the proof-of-work check.
use bitcoin::{
    absolute::LockTime,
    block::{Header, Version as BlockVersion},
    hashes::{sha256d, Hash},
    pow::CompactTarget,
    transaction::Version,
    Amount, BlockHash, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxMerkleNode,
    TxOut, Txid, Witness,
};
use btc_relay::{pow, BitcoinHeader, MemoryStore, Relay, RelayConfig, RelayStore};

/// Bits of the fixture's first epoch. Quick to mine, and a 4x retarget stays
/// under the regtest limit.
pub const EPOCH_BITS: u32 = 0x2000_ffff;
/// `EPOCH_BITS` after a slow epoch (timespan clamped to 4x).
pub const RETARGET_BITS: u32 = 0x2003_fffc;
/// `EPOCH_BITS` after a fast epoch (timespan clamped to 1/4).
pub const FAST_RETARGET_BITS: u32 = 0x1f3f_ffc0;

pub const EPOCH_START_HEIGHT: u32 = 0;
/// Closes the first epoch: the next header needs a retarget batch.
pub const GENESIS_HEIGHT: u32 = 2_015;
/// Leaves room for plain batches before the epoch closes.
pub const MID_EPOCH_HEIGHT: u32 = 2_000;
pub const T0: u32 = 1_600_000_000;

pub fn mine_with(prev: BlockHash, time: u32, bits: u32, merkle_root: TxMerkleNode) -> BitcoinHeader {
    let mut header = Header {
        version: BlockVersion::from_consensus(0x2000_0000),
        prev_blockhash: prev,
        merkle_root,
        time,
        bits: CompactTarget::from_consensus(bits),
        nonce: 0,
    };
    loop {
        let parsed = BitcoinHeader::from_header(header);
        let target = parsed.target().expect("fixture bits are valid");
        if pow::meets_target(&parsed.digest(), &target) {
            return parsed;
        }
        header.nonce += 1;
    }
}

pub fn mine(prev: BlockHash, time: u32, bits: u32) -> BitcoinHeader {
    mine_with(prev, time, bits, TxMerkleNode::all_zeros())
}

/// `n` headers on top of `tip`, ten minutes apart. `salt` separates forks.
pub fn extend(tip: &BitcoinHeader, n: usize, bits: u32, salt: u8) -> Vec<BitcoinHeader> {
    let mut out: Vec<BitcoinHeader> = Vec::with_capacity(n);
    for i in 0..n {
        let prev = out.last().unwrap_or(tip).digest();
        let root = TxMerkleNode::from_byte_array([salt; 32]);
        out.push(mine_with(prev, tip.time() + 600 * (i as u32 + 1), bits, root));
    }
    out
}

/// Concatenated wire bytes.
pub fn raw(headers: &[BitcoinHeader]) -> Vec<u8> {
    headers.iter().flat_map(|h| h.raw().to_vec()).collect()
}

pub struct Fixture<S> {
    pub relay: Relay<S>,
    pub epoch_start: BitcoinHeader,
    /// Last header of the first epoch; the relay is anchored here.
    pub genesis: BitcoinHeader,
}

/// Epoch start and relay genesis `span` seconds apart.
pub fn anchors_spanning(span: u32) -> (BitcoinHeader, BitcoinHeader) {
    let epoch_start = mine(BlockHash::all_zeros(), T0, EPOCH_BITS);
    let genesis = mine(BlockHash::from_byte_array([0x11; 32]), T0 + span, EPOCH_BITS);
    (epoch_start, genesis)
}

/// Anchors whose closing epoch took four times the target timespan.
pub fn anchors() -> (BitcoinHeader, BitcoinHeader) {
    anchors_spanning(4 * pow::TARGET_TIMESPAN as u32)
}

pub fn initialized_at<S: RelayStore>(
    store: S,
    (epoch_start, genesis): (BitcoinHeader, BitcoinHeader),
    height: u32,
) -> anyhow::Result<Fixture<S>> {
    let mut relay = Relay::new(store).with_config(RelayConfig::new(Network::Regtest));
    relay.initialize(genesis.raw(), height, epoch_start.raw())?;
    Ok(Fixture {
        relay,
        epoch_start,
        genesis,
    })
}

/// Relay anchored at the last header of a slow epoch.
pub fn initialized_with<S: RelayStore>(store: S) -> anyhow::Result<Fixture<S>> {
    initialized_at(store, anchors(), GENESIS_HEIGHT)
}

pub fn initialized() -> anyhow::Result<Fixture<MemoryStore>> {
    initialized_with(MemoryStore::new())
}

/// Relay anchored inside its epoch, for plain same-difficulty batches.
pub fn mid_epoch_with<S: RelayStore>(store: S) -> anyhow::Result<Fixture<S>> {
    initialized_at(store, anchors(), MID_EPOCH_HEIGHT)
}

pub fn mid_epoch() -> anyhow::Result<Fixture<MemoryStore>> {
    mid_epoch_with(MemoryStore::new())
}

// ---- transactions and merkle trees ----

pub fn payment(prev: OutPoint, script: ScriptBuf, sats: u64) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: prev,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(sats),
            script_pubkey: script,
        }],
    }
}

/// Distinct filler transactions.
pub fn filler(n: u8) -> Transaction {
    payment(
        OutPoint {
            txid: Txid::from_byte_array([n; 32]),
            vout: u32::from(n),
        },
        ScriptBuf::from_bytes(vec![0x6a, n]),
        1_000 + u64::from(n),
    )
}

fn pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left);
    data[32..].copy_from_slice(right);
    sha256d::Hash::hash(&data).to_byte_array()
}

/// Merkle root of `txs` and the sibling path of the transaction at `index`.
pub fn merkle_tree(txs: &[Transaction], index: usize) -> (TxMerkleNode, Vec<[u8; 32]>) {
    let mut level: Vec<[u8; 32]> = txs.iter().map(|t| t.compute_txid().to_byte_array()).collect();
    let mut idx = index;
    let mut path = Vec::new();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            let last = *level.last().expect("non-empty level");
            level.push(last);
        }
        path.push(level[idx ^ 1]);
        level = level.chunks_exact(2).map(|p| pair(&p[0], &p[1])).collect();
        idx /= 2;
    }
    (TxMerkleNode::from_byte_array(level[0]), path)
}
