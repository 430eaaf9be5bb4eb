//! Raw Bitcoin header parsing and hashing.
use bitcoin::{
    block::Header,
    consensus,
    hashes::{sha256d, Hash},
    BlockHash, TxMerkleNode,
};
use num_bigint::BigUint;

use crate::{error::RelayError, pow};

/// Block digest in storage (little-endian) byte order.
///
/// `Display`/`FromStr` use the big-endian display form; [`digest_from_hex_le`]
/// and [`digest_to_hex_le`] use the storage form.
pub type Digest = BlockHash;

/// Length of a serialized header.
pub const HEADER_LEN: usize = 80;

/// A parsed 80-byte header together with its raw bytes and digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitcoinHeader {
    header: Header,
    raw: [u8; HEADER_LEN],
    digest: Digest,
}

impl BitcoinHeader {
    /// Parse canonical wire bytes. Anything but exactly 80 bytes is rejected.
    pub fn parse(raw: &[u8]) -> Result<Self, RelayError> {
        let raw: [u8; HEADER_LEN] = raw
            .try_into()
            .map_err(|_| RelayError::MalformedHeader(raw.len()))?;
        let header: Header =
            consensus::deserialize(&raw).map_err(|_| RelayError::MalformedHeader(HEADER_LEN))?;
        let d = sha256d::Hash::hash(&raw);
        Ok(Self {
            header,
            raw,
            digest: BlockHash::from_byte_array(*d.as_ref()),
        })
    }

    /// Wrap an already decoded header.
    pub fn from_header(header: Header) -> Self {
        let mut raw = [0u8; HEADER_LEN];
        raw.copy_from_slice(&consensus::serialize(&header));
        Self {
            digest: header.block_hash(),
            header,
            raw,
        }
    }

    /// Double-SHA256 of the raw bytes.
    pub fn digest(&self) -> Digest {
        self.digest
    }

    /// Wire bytes.
    pub fn raw(&self) -> &[u8; HEADER_LEN] {
        &self.raw
    }

    /// Decoded `bitcoin` header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Block version.
    pub fn version(&self) -> i32 {
        self.header.version.to_consensus()
    }

    /// Digest of the parent header.
    pub fn prev_digest(&self) -> Digest {
        self.header.prev_blockhash
    }

    /// Root of the block's txid tree.
    pub fn merkle_root(&self) -> TxMerkleNode {
        self.header.merkle_root
    }

    /// Block timestamp, seconds since the epoch.
    pub fn time(&self) -> u32 {
        self.header.time
    }

    /// Compact difficulty bits.
    pub fn bits(&self) -> u32 {
        self.header.bits.to_consensus()
    }

    /// Proof-of-work nonce.
    pub fn nonce(&self) -> u32 {
        self.header.nonce
    }

    /// Target decoded from the header's difficulty bits.
    pub fn target(&self) -> Result<BigUint, RelayError> {
        pow::target_from_bits(self.bits())
    }

    /// Work this header contributes to its chain.
    pub fn work(&self) -> Result<BigUint, RelayError> {
        Ok(pow::work_from_target(&self.target()?))
    }
}

/// Split concatenated headers into parsed headers. The input must be a
/// non-empty multiple of 80 bytes.
pub fn parse_chain(raw: &[u8]) -> Result<Vec<BitcoinHeader>, RelayError> {
    if raw.is_empty() || raw.len() % HEADER_LEN != 0 {
        return Err(RelayError::MalformedHeader(raw.len()));
    }
    raw.chunks_exact(HEADER_LEN).map(BitcoinHeader::parse).collect()
}

/// Parse a digest given as 64 hex chars in storage byte order.
pub fn digest_from_hex_le(s: &str) -> Result<Digest, RelayError> {
    let bytes = hex::decode(s).map_err(|e| RelayError::BadHash256Digest(e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|v: Vec<u8>| RelayError::BadHash256Digest(format!("{} bytes", v.len())))?;
    Ok(BlockHash::from_byte_array(bytes))
}

/// Hex of a digest in storage byte order.
pub fn digest_to_hex_le(digest: &Digest) -> String {
    hex::encode(digest.as_byte_array())
}
