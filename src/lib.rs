#![forbid(unsafe_code)]
#![deny(missing_docs)]
//! btc-relay: a Bitcoin header relay for a foreign ledger.
//!
//! ## What the relay does
//! - Accepts raw 80-byte headers, checks **proof of work**, linkage and
//!   **difficulty retargets**, and stores them with height and accumulated work.
//! - Tracks the **heaviest** chain through reorgs, remembering the most recent
//!   common ancestor of the last reorg.
//! - Validates **SPV proofs** (Merkle path plus confirmation depth) and fills
//!   outstanding **requests** with them.
//!
//! ## What you provide
//! - A [`RelayStore`]: [`MemoryStore`] and [`SqliteStore`] ship with the crate.
//! - Serialized transitions: call [`Relay`] from one place, or share a
//!   [`RelayHandle`] between tasks.
//!
//! ## Minimal usage
//! ```rust,ignore
//! use btc_relay::prelude::*;
//!
//! fn run(genesis: &[u8], epoch_start: &[u8], next: &[u8]) -> Result<(), RelayError> {
//!     let mut relay = Relay::new(SqliteStore::new("relay.sqlite")?)
//!         .with_config(RelayConfig::new(bitcoin::Network::Bitcoin));
//!     relay.initialize(genesis, 800_000, epoch_start)?;
//!     relay.ingest_headers(next)?;
//!     println!("best: {}", relay.best_digest()?);
//!     Ok(())
//! }
//! ```

/// Host-facing transitions and queries.
pub mod engine;

/// Error types for transitions and storage.
pub mod error;

/// Relay parameters and per-network consensus limits.
pub mod config;

/// Raw header codec.
pub mod header;

/// Compact targets, work and the retarget rule.
pub mod pow;

/// Proof-of-work, linkage and retarget validation.
pub mod validator;

/// Bounded ancestry queries and heaviest-chain updates.
pub mod ancestry;

/// SPV proof validation and confirmation counting.
pub mod proof;

/// Confirmation-gated requests.
pub mod requests;

/// Persistence layer (traits, in-memory and SQLite implementations).
pub mod store;

/// Async handle (tokio).
#[cfg(feature = "runtime")]
pub mod service;

// Public re-exports
pub use config::RelayConfig;
pub use engine::Relay;
pub use error::{RelayError, StoreError};
pub use header::{BitcoinHeader, Digest};
pub use proof::SpvProof;
pub use requests::{FilledRequest, RequestId, RequestMode};
#[cfg(feature = "runtime")]
pub use service::RelayHandle;
#[cfg(feature = "store-sqlite")]
pub use store::SqliteStore;
pub use store::{HeaderStore, MemoryStore, RelayStore};

/// Convenience prelude for end users.
pub mod prelude {
    pub use crate::{
        Digest, FilledRequest, HeaderStore, MemoryStore, Relay, RelayConfig, RelayError,
        RelayStore, RequestId, RequestMode, SpvProof,
    };
    #[cfg(feature = "runtime")]
    pub use crate::RelayHandle;
    #[cfg(feature = "store-sqlite")]
    pub use crate::SqliteStore;
}
