//! Persistence interfaces used by the relay, plus concrete stores.
//!
//! Reads go through [`HeaderStore`]. Writes are never applied piecemeal: a
//! top-level call buffers them in a [`Transition`] and the resulting
//! [`ChangeSet`] is handed to [`RelayStore::commit`] only if the call succeeds.
use std::collections::BTreeMap;

use bitcoin::hashes::Hash;
use num_bigint::BigUint;

use crate::{
    error::{RelayError, StoreError},
    header::{BitcoinHeader, Digest, HEADER_LEN},
    requests::{Request, RequestId},
};

/// Stored metadata for one accepted header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRecord {
    /// The header as received.
    pub header: BitcoinHeader,
    /// Height in the Bitcoin chain.
    pub height: u32,
    /// Work of this header plus every stored ancestor.
    pub accumulated_work: BigUint,
}

const RECORD_FIXED_LEN: usize = 32 + 4 + 32 + HEADER_LEN;

impl HeaderRecord {
    /// Digest of the stored header.
    pub fn digest(&self) -> Digest {
        self.header.digest()
    }

    /// Digest of the parent.
    pub fn prev_digest(&self) -> Digest {
        self.header.prev_digest()
    }

    /// `digest(32) | height(u32 LE) | prev(32) | raw(80) | work (BE, variable)`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let work = self.accumulated_work.to_bytes_be();
        let mut out = Vec::with_capacity(RECORD_FIXED_LEN + work.len());
        out.extend_from_slice(self.digest().as_byte_array());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(self.prev_digest().as_byte_array());
        out.extend_from_slice(self.header.raw());
        out.extend_from_slice(&work);
        out
    }

    /// Decode [`HeaderRecord::to_bytes`] output, checking the digests against the raw header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        let corrupt = |reason: &str| StoreError::Corrupt {
            key: "header".into(),
            reason: reason.into(),
        };
        if bytes.len() < RECORD_FIXED_LEN {
            return Err(corrupt("record too short"));
        }

        let (digest, rest) = bytes.split_at(32);
        let (height, rest) = rest.split_at(4);
        let (prev, rest) = rest.split_at(32);
        let (raw, work) = rest.split_at(HEADER_LEN);

        let header = BitcoinHeader::parse(raw).map_err(|e| corrupt(&e.to_string()))?;
        if header.digest().as_byte_array().as_slice() != digest
            || header.prev_digest().as_byte_array().as_slice() != prev
        {
            return Err(corrupt("digest does not match raw header"));
        }

        let mut h = [0u8; 4];
        h.copy_from_slice(height);
        Ok(Self {
            header,
            height: u32::from_le_bytes(h),
            accumulated_work: BigUint::from_bytes_be(work),
        })
    }
}

/// Single-slot relay state fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    /// Header the relay was initialized at.
    Genesis,
    /// First header of the current difficulty epoch.
    EpochStart,
    /// Heaviest known tip.
    BestKnown,
    /// Most recent common ancestor recorded by the last tip change.
    LastReorgLca,
}

impl Slot {
    /// Every slot, in storage order.
    pub const ALL: [Slot; 4] = [
        Slot::Genesis,
        Slot::EpochStart,
        Slot::BestKnown,
        Slot::LastReorgLca,
    ];

    /// Key the slot is persisted under.
    pub fn key(self) -> &'static str {
        match self {
            Slot::Genesis => "genesis",
            Slot::EpochStart => "epoch_start",
            Slot::BestKnown => "best_known",
            Slot::LastReorgLca => "last_reorg_lca",
        }
    }
}

/// Read side of relay storage.
pub trait HeaderStore {
    /// Header record by digest, if stored.
    fn header(&self, digest: &Digest) -> Result<Option<HeaderRecord>, StoreError>;

    /// Current value of a single-slot field.
    fn slot(&self, slot: Slot) -> Result<Option<Digest>, StoreError>;

    /// Request by id, if ever created.
    fn request(&self, id: &RequestId) -> Result<Option<Request>, StoreError>;

    /// Header record by digest; `UnknownBlock` when absent.
    fn get_header(&self, digest: &Digest) -> Result<HeaderRecord, RelayError> {
        self.header(digest)?
            .ok_or(RelayError::UnknownBlock(*digest))
    }

    /// Slot value; `BadHash256Digest` when unset.
    fn required_slot(&self, slot: Slot) -> Result<Digest, RelayError> {
        self.slot(slot)?
            .ok_or_else(|| RelayError::BadHash256Digest(format!("{} is unset", slot.key())))
    }

    /// Heaviest known tip.
    fn best_known_digest(&self) -> Result<Digest, RelayError> {
        self.required_slot(Slot::BestKnown)
    }

    /// Ancestor recorded by the last tip change.
    fn last_reorg_lca(&self) -> Result<Digest, RelayError> {
        self.required_slot(Slot::LastReorgLca)
    }

    /// Header the relay was initialized at.
    fn relay_genesis(&self) -> Result<Digest, RelayError> {
        self.required_slot(Slot::Genesis)
    }
}

/// Durable side of relay storage.
pub trait RelayStore: HeaderStore {
    /// Apply every change or none of them.
    fn commit(&mut self, changes: ChangeSet) -> Result<(), StoreError>;
}

/// Writes buffered by one transition.
#[derive(Debug, Default, Clone)]
pub struct ChangeSet {
    /// New header records.
    pub headers: BTreeMap<Digest, HeaderRecord>,
    /// Slot values to overwrite.
    pub slots: BTreeMap<Slot, Digest>,
    /// Requests to insert or replace.
    pub requests: BTreeMap<RequestId, Request>,
}

impl ChangeSet {
    /// Nothing to write.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.slots.is_empty() && self.requests.is_empty()
    }
}

/// Write buffer layered over a read-only store borrow.
///
/// Reads observe buffered writes first, so later steps of a transition see
/// what earlier steps wrote.
pub struct Transition<'a, S: ?Sized> {
    base: &'a S,
    changes: ChangeSet,
}

impl<'a, S: HeaderStore + ?Sized> Transition<'a, S> {
    /// Empty overlay on `base`.
    pub fn new(base: &'a S) -> Self {
        Self {
            base,
            changes: ChangeSet::default(),
        }
    }

    /// Append a header record. Re-putting identical content is a no-op;
    /// different content under a stored digest is refused.
    pub fn put_header(&mut self, record: HeaderRecord) -> Result<(), RelayError> {
        let digest = record.digest();
        match self.header(&digest)? {
            Some(existing) if existing == record => Ok(()),
            Some(_) => Err(StoreError::Conflict(digest).into()),
            None => {
                self.changes.headers.insert(digest, record);
                Ok(())
            }
        }
    }

    /// Last write wins.
    pub fn set_slot(&mut self, slot: Slot, digest: Digest) {
        self.changes.slots.insert(slot, digest);
    }

    /// Move the best tip.
    pub fn set_best_known_digest(&mut self, digest: Digest) {
        self.set_slot(Slot::BestKnown, digest);
    }

    /// Record the ancestor of a tip change.
    pub fn set_last_reorg_lca(&mut self, digest: Digest) {
        self.set_slot(Slot::LastReorgLca, digest);
    }

    /// Insert or replace a request.
    pub fn put_request(&mut self, request: Request) {
        self.changes.requests.insert(request.id, request);
    }

    /// Everything buffered so far.
    pub fn into_changes(self) -> ChangeSet {
        self.changes
    }
}

impl<S: HeaderStore + ?Sized> HeaderStore for Transition<'_, S> {
    fn header(&self, digest: &Digest) -> Result<Option<HeaderRecord>, StoreError> {
        match self.changes.headers.get(digest) {
            Some(r) => Ok(Some(r.clone())),
            None => self.base.header(digest),
        }
    }

    fn slot(&self, slot: Slot) -> Result<Option<Digest>, StoreError> {
        match self.changes.slots.get(&slot) {
            Some(d) => Ok(Some(*d)),
            None => self.base.slot(slot),
        }
    }

    fn request(&self, id: &RequestId) -> Result<Option<Request>, StoreError> {
        match self.changes.requests.get(id) {
            Some(r) => Ok(Some(r.clone())),
            None => self.base.request(id),
        }
    }
}

// submodules / concrete stores live here
pub mod memory;
pub use memory::MemoryStore;

#[cfg(feature = "store-sqlite")]
pub mod sqlite_store;
#[cfg(feature = "store-sqlite")]
pub use sqlite_store::SqliteStore;


#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow;

    fn record(height: u32) -> HeaderRecord {
        let header = test_util::mine(Digest::all_zeros(), 1_600_000_000 + height);
        let work = header.work().unwrap();
        HeaderRecord {
            header,
            height,
            accumulated_work: work,
        }
    }

    #[test]
    fn record_bytes_roundtrip() {
        let mut r = record(7);
        r.accumulated_work = pow::work_from_target(&pow::target_from_bits(0x1d00_ffff).unwrap()) * 1_000u32;
        let bytes = r.to_bytes();
        assert_eq!(&bytes[32..36], &7u32.to_le_bytes());
        assert_eq!(HeaderRecord::from_bytes(&bytes).unwrap(), r);
    }

    #[test]
    fn record_rejects_tampered_digest() {
        let mut bytes = record(1).to_bytes();
        bytes[0] ^= 1;
        assert!(matches!(
            HeaderRecord::from_bytes(&bytes),
            Err(StoreError::Corrupt { .. })
        ));
        assert!(HeaderRecord::from_bytes(&bytes[..100]).is_err());
    }

    #[test]
    fn transition_reads_its_own_writes_and_leaves_base_alone() {
        let base = MemoryStore::new();
        let r = record(3);
        let mut tx = Transition::new(&base);
        tx.put_header(r.clone()).unwrap();
        tx.set_best_known_digest(r.digest());

        assert_eq!(tx.get_header(&r.digest()).unwrap(), r);
        assert_eq!(tx.best_known_digest().unwrap(), r.digest());
        assert!(base.header(&r.digest()).unwrap().is_none());
        assert!(matches!(
            base.best_known_digest(),
            Err(RelayError::BadHash256Digest(_))
        ));

        let changes = tx.into_changes();
        assert_eq!(changes.headers.len(), 1);
        assert!(!changes.is_empty());
    }

    #[test]
    fn put_header_is_append_only() {
        let base = MemoryStore::new();
        let r = record(3);
        let mut tx = Transition::new(&base);
        tx.put_header(r.clone()).unwrap();
        tx.put_header(r.clone()).unwrap();

        let mut other = r.clone();
        other.height += 1;
        assert!(matches!(
            tx.put_header(other),
            Err(RelayError::Store(StoreError::Conflict(_)))
        ));
    }
}
