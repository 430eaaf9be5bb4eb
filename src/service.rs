//! Async handle for hosts running on tokio.
//!
//! Relay transitions are synchronous and may touch disk, so each call runs on
//! the blocking pool while holding the relay lock. One lock means transitions
//! are applied one at a time, in the order they acquire it.
use std::sync::Arc;

use tokio::{sync::Mutex, task};

use crate::{
    engine::Relay,
    error::RelayError,
    header::Digest,
    proof::{SpvProof, ValidatedProof},
    requests::{FilledRequest, Request, RequestId, RequestMode},
    store::{HeaderRecord, RelayStore},
};

/// Cloneable, serialized access to one [`Relay`].
pub struct RelayHandle<S> {
    inner: Arc<Mutex<Relay<S>>>,
}

impl<S> Clone for RelayHandle<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> RelayHandle<S>
where
    S: RelayStore + Send + 'static,
{
    /// Take ownership of `relay`.
    pub fn new(relay: Relay<S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(relay)),
        }
    }

    /// Run `f` with exclusive access to the relay on the blocking pool.
    pub async fn with_relay<T, F>(&self, f: F) -> Result<T, RelayError>
    where
        F: FnOnce(&mut Relay<S>) -> Result<T, RelayError> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        task::spawn_blocking(move || {
            let mut relay = inner.blocking_lock();
            f(&mut *relay)
        })
        .await
        .map_err(|e| RelayError::TaskFailed(e.to_string()))?
    }

    /// See [`Relay::initialize`].
    pub async fn initialize(
        &self,
        genesis_raw: Vec<u8>,
        height: u32,
        epoch_start_raw: Vec<u8>,
    ) -> Result<(), RelayError> {
        self.with_relay(move |r| r.initialize(&genesis_raw, height, &epoch_start_raw))
            .await
    }

    /// See [`Relay::ingest_header`].
    pub async fn ingest_header(&self, raw: Vec<u8>) -> Result<HeaderRecord, RelayError> {
        self.with_relay(move |r| r.ingest_header(&raw)).await
    }

    /// See [`Relay::ingest_headers`].
    pub async fn ingest_headers(&self, raw_chain: Vec<u8>) -> Result<Vec<HeaderRecord>, RelayError> {
        self.with_relay(move |r| r.ingest_headers(&raw_chain)).await
    }

    /// See [`Relay::ingest_difficulty_change`].
    pub async fn ingest_difficulty_change(
        &self,
        prev_epoch_start: Digest,
        raw_chain: Vec<u8>,
    ) -> Result<Vec<HeaderRecord>, RelayError> {
        self.with_relay(move |r| r.ingest_difficulty_change(&prev_epoch_start, &raw_chain))
            .await
    }

    /// See [`Relay::mark_new_heaviest`].
    pub async fn mark_new_heaviest(
        &self,
        ancestor: Digest,
        current_best_raw: Vec<u8>,
        new_best_raw: Vec<u8>,
        limit: u32,
    ) -> Result<(), RelayError> {
        self.with_relay(move |r| {
            r.mark_new_heaviest(&ancestor, &current_best_raw, &new_best_raw, limit)
        })
        .await
    }

    /// See [`Relay::provide_proof`].
    pub async fn provide_proof(
        &self,
        proof: SpvProof,
        filled: Vec<FilledRequest>,
    ) -> Result<Vec<RequestId>, RelayError> {
        self.with_relay(move |r| r.provide_proof(&proof, &filled)).await
    }

    /// See [`Relay::new_request`].
    pub async fn new_request(
        &self,
        spends: Vec<u8>,
        pays: Vec<u8>,
        value: u64,
        min_confs: u32,
        mode: RequestMode,
        metadata: Vec<u8>,
    ) -> Result<RequestId, RelayError> {
        self.with_relay(move |r| r.new_request(&spends, &pays, value, min_confs, mode, &metadata))
            .await
    }

    /// See [`Relay::set_request_state`].
    pub async fn set_request_state(&self, id: RequestId, active: bool) -> Result<(), RelayError> {
        self.with_relay(move |r| r.set_request_state(&id, active)).await
    }

    /// Heaviest known tip.
    pub async fn best_digest(&self) -> Result<Digest, RelayError> {
        self.with_relay(|r| r.best_digest()).await
    }

    /// Common ancestor recorded by the last tip change.
    pub async fn last_reorg_lca(&self) -> Result<Digest, RelayError> {
        self.with_relay(|r| r.last_reorg_lca()).await
    }

    /// See [`Relay::get_confs`].
    pub async fn get_confs(&self, digest: Digest) -> Result<u32, RelayError> {
        self.with_relay(move |r| r.get_confs(&digest)).await
    }

    /// See [`Relay::check_proof`].
    pub async fn check_proof(&self, proof: SpvProof) -> Result<ValidatedProof, RelayError> {
        self.with_relay(move |r| r.check_proof(&proof)).await
    }

    /// See [`Relay::request`].
    pub async fn request(&self, id: RequestId) -> Result<Request, RelayError> {
        self.with_relay(move |r| r.request(&id)).await
    }
}
