//! Relay configuration and per-network consensus parameters.
use bitcoin::{consensus::params::Params, Network};
use serde::Deserialize;

/// Default bound on caller-supplied `limit`/`offset` values: two retarget epochs.
pub const DEFAULT_MAX_TRAVERSAL: u32 = 4_032;

/// Default depth a confirming header may sit below the last reorg ancestor.
pub const DEFAULT_PROOF_ANCESTRY_LIMIT: u32 = 240;

/// Compact encoding of the easiest target a header may claim on `network`.
pub fn pow_limit_bits(network: Network) -> u32 {
    Params::new(network)
        .max_attainable_target
        .to_compact_lossy()
        .to_consensus()
}

/// Relay tuning knobs.
///
/// Deserializes from e.g. `{"network": "regtest", "max_traversal": 100}`;
/// omitted fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Bitcoin network whose headers are relayed.
    pub network: Network,
    /// Upper bound for any caller-supplied traversal bound.
    pub max_traversal: u32,
    /// Bound used when checking a proof's header descends from the last reorg ancestor.
    pub proof_ancestry_limit: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            max_traversal: DEFAULT_MAX_TRAVERSAL,
            proof_ancestry_limit: DEFAULT_PROOF_ANCESTRY_LIMIT,
        }
    }
}

impl RelayConfig {
    /// Defaults for `network`.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    /// Override the traversal bound.
    pub fn with_max_traversal(mut self, max: u32) -> Self {
        self.max_traversal = max;
        self
    }

    /// Override how deep below the last reorg ancestor a proof may reach.
    pub fn with_proof_ancestry_limit(mut self, limit: u32) -> Self {
        self.proof_ancestry_limit = limit;
        self
    }

    pub(crate) fn pow_limit_bits(&self) -> u32 {
        pow_limit_bits(self.network)
    }
}
