//! Host-facing relay surface.
//!
//! Every mutating call:
//! 1) opens a [`Transition`] over the store,
//! 2) runs validation and chain selection against that overlay,
//! 3) commits the buffered writes in one [`RelayStore::commit`] only if nothing failed.
//!
//! Queries read the store directly and never write.
use tracing::info;

use crate::{
    ancestry,
    config::RelayConfig,
    error::RelayError,
    header::{self, BitcoinHeader, Digest},
    pow::RETARGET_INTERVAL,
    proof::{self, SpvProof, ValidatedProof},
    requests::{self, FilledRequest, Request, RequestId, RequestMode},
    store::{HeaderRecord, HeaderStore, RelayStore, Slot, Transition},
    validator,
};

/// Relay state machine over a store `S`.
pub struct Relay<S> {
    store: S,
    config: RelayConfig,
}

impl<S: RelayStore> Relay<S> {
    /// Wrap a store with the default (mainnet) configuration.
    pub fn new(store: S) -> Self {
        Self {
            store,
            config: RelayConfig::default(),
        }
    }

    /// Replace the configuration, e.g. to relay another network.
    pub fn with_config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Read access to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Give the store back.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Run `f` against a write overlay and commit its changes if it succeeds.
    fn transact<T>(
        &mut self,
        f: impl FnOnce(&mut Transition<'_, S>, &RelayConfig) -> Result<T, RelayError>,
    ) -> Result<T, RelayError> {
        let mut tx = Transition::new(&self.store);
        let out = f(&mut tx, &self.config)?;
        let changes = tx.into_changes();
        if !changes.is_empty() {
            self.store.commit(changes)?;
        }
        Ok(out)
    }

    fn check_batch_len(&self, len: usize) -> Result<(), RelayError> {
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        ancestry::check_bound(&self.config, len)
    }

    // ---- transitions ----

    /// Anchor the relay at `genesis`, a header at `height`, together with the
    /// first header of its difficulty epoch.
    ///
    /// Both headers are stored without their parents. Best tip and last reorg
    /// ancestor start at the genesis.
    ///
    /// # Errors
    /// `AlreadyInitialized` once a genesis is set; `BadRetarget` when
    /// `genesis` opens an epoch but `epoch_start` is a different header;
    /// codec and proof-of-work errors from either header.
    pub fn initialize(
        &mut self,
        genesis_raw: &[u8],
        height: u32,
        epoch_start_raw: &[u8],
    ) -> Result<(), RelayError> {
        let genesis = BitcoinHeader::parse(genesis_raw)?;
        let epoch_start = BitcoinHeader::parse(epoch_start_raw)?;

        self.transact(|tx, config| {
            if tx.slot(Slot::Genesis)?.is_some() {
                return Err(RelayError::AlreadyInitialized);
            }

            let epoch_height = height - height % RETARGET_INTERVAL;
            if epoch_height == height && epoch_start.digest() != genesis.digest() {
                return Err(RelayError::bad_retarget(
                    "genesis opens an epoch, so it must be its own epoch start",
                ));
            }

            let anchor = validator::anchor_header(tx, config, &genesis, height)?;
            if epoch_height != height {
                validator::anchor_header(tx, config, &epoch_start, epoch_height)?;
            }

            tx.set_slot(Slot::Genesis, anchor.digest());
            tx.set_slot(Slot::EpochStart, epoch_start.digest());
            tx.set_best_known_digest(anchor.digest());
            tx.set_last_reorg_lca(anchor.digest());
            info!(genesis = %anchor.digest(), height, epoch_start = %epoch_start.digest(), "relay initialized");
            Ok(())
        })
    }

    /// Ingest one header on top of a stored parent with unchanged difficulty.
    pub fn ingest_header(&mut self, raw: &[u8]) -> Result<HeaderRecord, RelayError> {
        let header = BitcoinHeader::parse(raw)?;
        let mut records = self.ingest_batch(vec![header])?;
        records.pop().ok_or(RelayError::MalformedHeader(raw.len()))
    }

    /// Ingest concatenated headers forming a chain inside one difficulty epoch.
    ///
    /// When the batch extends the current best tip with more work, the tip
    /// moves forward to the last header and the previous tip becomes the last
    /// reorg ancestor.
    ///
    /// # Errors
    /// `ExcessiveLimit` when the batch is longer than `max_traversal`;
    /// `BadRetarget` when any header changes difficulty or opens a new epoch;
    /// any ingest error.
    pub fn ingest_headers(&mut self, raw_chain: &[u8]) -> Result<Vec<HeaderRecord>, RelayError> {
        self.ingest_batch(header::parse_chain(raw_chain)?)
    }

    fn ingest_batch(&mut self, headers: Vec<BitcoinHeader>) -> Result<Vec<HeaderRecord>, RelayError> {
        self.check_batch_len(headers.len())?;

        self.transact(|tx, config| {
            let records = validator::ingest_headers(tx, config, &headers)?;
            advance_tip(tx, &records)?;
            Ok(records)
        })
    }

    /// Ingest concatenated headers that open a new difficulty epoch.
    ///
    /// `prev_epoch_start` names the first header of the epoch being closed.
    /// On success the first new header becomes the stored epoch start.
    pub fn ingest_difficulty_change(
        &mut self,
        prev_epoch_start: &Digest,
        raw_chain: &[u8],
    ) -> Result<Vec<HeaderRecord>, RelayError> {
        let headers = header::parse_chain(raw_chain)?;
        self.check_batch_len(headers.len())?;

        self.transact(|tx, config| {
            let records = validator::ingest_difficulty_change(tx, config, prev_epoch_start, &headers)?;
            if let Some(first) = records.first() {
                tx.set_slot(Slot::EpochStart, first.digest());
            }
            advance_tip(tx, &records)?;
            Ok(records)
        })
    }

    /// Reorg onto `new_best_raw`, whose most recent common ancestor with the
    /// stored best `current_best_raw` is `ancestor`.
    pub fn mark_new_heaviest(
        &mut self,
        ancestor: &Digest,
        current_best_raw: &[u8],
        new_best_raw: &[u8],
        limit: u32,
    ) -> Result<(), RelayError> {
        let current_best = BitcoinHeader::parse(current_best_raw)?;
        let new_best = BitcoinHeader::parse(new_best_raw)?;

        self.transact(|tx, config| {
            ancestry::mark_new_heaviest(tx, config, ancestor, &current_best, &new_best, limit)
        })
    }

    /// Validate `proof` and fill every request in `filled` with it.
    ///
    /// Returns the ids that were filled. Any failing entry fails the call and
    /// no request changes.
    pub fn provide_proof(
        &mut self,
        proof: &SpvProof,
        filled: &[FilledRequest],
    ) -> Result<Vec<RequestId>, RelayError> {
        self.transact(|tx, config| {
            let validated = proof::validate_proof(&*tx, config, proof)?;
            requests::check_requests_filled(tx, &validated.transaction, &proof.confirming_digest, filled)
        })
    }

    /// Open a request, or reactivate the one with identical terms.
    pub fn new_request(
        &mut self,
        spends: &[u8],
        pays: &[u8],
        value: u64,
        min_confs: u32,
        mode: RequestMode,
        metadata: &[u8],
    ) -> Result<RequestId, RelayError> {
        self.transact(|tx, _| requests::set_request(tx, spends, pays, value, min_confs, mode, metadata))
    }

    /// Close a request, or reopen a closed one.
    pub fn set_request_state(&mut self, id: &RequestId, active: bool) -> Result<(), RelayError> {
        self.transact(|tx, _| requests::set_request_state(tx, id, active))
    }

    // ---- queries ----

    /// Header the relay was initialized at.
    pub fn relay_genesis(&self) -> Result<Digest, RelayError> {
        self.store.relay_genesis()
    }

    /// Heaviest known tip.
    pub fn best_digest(&self) -> Result<Digest, RelayError> {
        self.store.best_known_digest()
    }

    /// Common ancestor recorded by the last tip change.
    pub fn last_reorg_lca(&self) -> Result<Digest, RelayError> {
        self.store.last_reorg_lca()
    }

    /// First header of the most recently ingested difficulty epoch.
    pub fn epoch_start(&self) -> Result<Digest, RelayError> {
        self.store.required_slot(Slot::EpochStart)
    }

    /// Stored record for `digest`; `UnknownBlock` when absent.
    pub fn header(&self, digest: &Digest) -> Result<HeaderRecord, RelayError> {
        self.store.get_header(digest)
    }

    /// Whether `ancestor` is within `limit` links behind `descendant`.
    pub fn is_ancestor(&self, ancestor: &Digest, descendant: &Digest, limit: u32) -> Result<bool, RelayError> {
        ancestry::check_bound(&self.config, limit)?;
        ancestry::is_ancestor(&self.store, ancestor, descendant, limit)
    }

    /// The header `offset` links behind `digest`.
    pub fn find_ancestor(&self, digest: &Digest, offset: u32) -> Result<Digest, RelayError> {
        ancestry::check_bound(&self.config, offset)?;
        ancestry::find_ancestor(&self.store, digest, offset)
    }

    /// Of two descendants of `ancestor`, the one with more work; ties keep `current_best`.
    pub fn heaviest_from_ancestor(
        &self,
        ancestor: &Digest,
        current_best: &Digest,
        new_best: &Digest,
        limit: u32,
    ) -> Result<Digest, RelayError> {
        ancestry::check_bound(&self.config, limit)?;
        ancestry::heaviest_from_ancestor(&self.store, ancestor, current_best, new_best, limit)
    }

    /// Whether `ancestor` is the nearest header both `left` and `right` descend from.
    pub fn is_most_recent_common_ancestor(
        &self,
        ancestor: &Digest,
        left: &Digest,
        right: &Digest,
        limit: u32,
    ) -> Result<bool, RelayError> {
        ancestry::check_bound(&self.config, limit)?;
        ancestry::is_most_recent_common_ancestor(&self.store, ancestor, left, right, limit)
    }

    /// Validate `proof` without touching any request.
    pub fn check_proof(&self, proof: &SpvProof) -> Result<ValidatedProof, RelayError> {
        proof::validate_proof(&self.store, &self.config, proof)
    }

    /// Confirmations of `digest` counted to the best tip, inclusive.
    pub fn get_confs(&self, digest: &Digest) -> Result<u32, RelayError> {
        proof::get_confs(&self.store, digest)
    }

    /// Stored request; `RequestNotFound` when absent.
    pub fn request(&self, id: &RequestId) -> Result<Request, RelayError> {
        self.store.request(id)?.ok_or(RelayError::RequestNotFound(*id))
    }
}

/// Fast-forward the best tip to the last record of a freshly ingested batch.
fn advance_tip<S: HeaderStore + ?Sized>(
    tx: &mut Transition<'_, S>,
    records: &[HeaderRecord],
) -> Result<(), RelayError> {
    if let Some(last) = records.last() {
        let reach = u32::try_from(records.len()).unwrap_or(u32::MAX);
        ancestry::extend_best(tx, &last.digest(), reach)?;
    }
    Ok(())
}
