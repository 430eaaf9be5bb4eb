//! Request ledger: "tell me when a transaction matching these terms has N
//! confirmations", filled against validated SPV proofs.
use std::fmt;

use bitcoin::{
    consensus,
    hashes::{sha256, Hash, HashEngine},
    Transaction, Txid,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::RelayError,
    header::Digest,
    proof,
    store::{HeaderStore, Transition},
};

/// Deterministic request key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId([u8; 32]);

impl RequestId {
    /// Commit to every term of a request. Metadata is not part of the id.
    pub fn derive(spends: &[u8], pays: &[u8], value: u64, min_confs: u32, mode: RequestMode) -> Self {
        let mut engine = sha256::Hash::engine();
        engine.input(&(spends.len() as u32).to_le_bytes());
        engine.input(spends);
        engine.input(&(pays.len() as u32).to_le_bytes());
        engine.input(pays);
        engine.input(&value.to_le_bytes());
        engine.input(&min_confs.to_le_bytes());
        engine.input(&[mode as u8]);
        Self(sha256::Hash::from_engine(engine).to_byte_array())
    }

    /// Wrap raw id bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw id bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({self})")
    }
}

/// Who is notified when the request fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestMode {
    /// Consumed on the host ledger itself.
    Local = 0,
    /// Forwarded to another chain.
    CrossChain = 1,
}

/// One proof that satisfied a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fulfillment {
    /// Proven transaction.
    pub txid: Txid,
    /// Header the transaction was proven against.
    pub confirming_digest: Digest,
    /// Input that matched `spends`.
    pub input_index: u32,
    /// Output that matched `pays`.
    pub output_index: u32,
    /// Value of that output, in satoshis.
    pub value: u64,
}

/// Stored request. Never deleted; closing or filling only clears `active`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Hash of the request terms.
    pub id: RequestId,
    /// 36-byte outpoint the transaction must spend; empty matches any input.
    pub spends: Vec<u8>,
    /// Output script the transaction must pay; empty matches any output.
    pub pays: Vec<u8>,
    /// Minimum value of the paying output, in satoshis.
    pub value: u64,
    /// Confirmations the proof's header needs.
    pub min_confs: u32,
    /// Who consumes the fill.
    pub mode: RequestMode,
    /// Open for fills.
    pub active: bool,
    /// Opaque host data; not part of the id.
    pub metadata: Vec<u8>,
    /// Proofs that filled this request, oldest first.
    pub fulfillments: Vec<Fulfillment>,
}

/// A claim that the proven transaction satisfies request `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilledRequest {
    /// Request being filled.
    pub id: RequestId,
    /// Input checked against `spends`.
    pub input_index: u32,
    /// Output checked against `pays` and `value`.
    pub output_index: u32,
}

/// Create a request, or reactivate the one with identical terms.
pub fn set_request<S: HeaderStore + ?Sized>(
    tx: &mut Transition<'_, S>,
    spends: &[u8],
    pays: &[u8],
    value: u64,
    min_confs: u32,
    mode: RequestMode,
    metadata: &[u8],
) -> Result<RequestId, RelayError> {
    let id = RequestId::derive(spends, pays, value, min_confs, mode);
    let request = match tx.request(&id)? {
        Some(mut existing) => {
            existing.active = true;
            existing.metadata = metadata.to_vec();
            existing
        }
        None => Request {
            id,
            spends: spends.to_vec(),
            pays: pays.to_vec(),
            value,
            min_confs,
            mode,
            active: true,
            metadata: metadata.to_vec(),
            fulfillments: Vec::new(),
        },
    };
    info!(%id, min_confs, value, "request set");
    tx.put_request(request);
    Ok(id)
}

/// Open or close a request.
pub fn set_request_state<S: HeaderStore + ?Sized>(
    tx: &mut Transition<'_, S>,
    id: &RequestId,
    active: bool,
) -> Result<(), RelayError> {
    let mut request = tx.request(id)?.ok_or(RelayError::RequestNotFound(*id))?;
    request.active = active;
    tx.put_request(request);
    Ok(())
}

/// Check every claimed fulfillment against `transaction`, confirmed by
/// `confirming`, and close each satisfied request.
///
/// The transaction's inclusion must already have been proven. Any failing
/// entry fails the whole batch.
pub fn check_requests_filled<S: HeaderStore + ?Sized>(
    tx: &mut Transition<'_, S>,
    transaction: &Transaction,
    confirming: &Digest,
    filled: &[FilledRequest],
) -> Result<Vec<RequestId>, RelayError> {
    let txid = transaction.compute_txid();
    let mut ids = Vec::with_capacity(filled.len());

    for claim in filled {
        let mut request = tx
            .request(&claim.id)?
            .ok_or(RelayError::RequestNotFound(claim.id))?;
        if !request.active {
            return Err(RelayError::ClosedRequest(claim.id));
        }

        let confs = proof::get_confs(&*tx, confirming)?;
        if confs < request.min_confs {
            return Err(RelayError::NotEnoughConfs {
                id: claim.id,
                required: request.min_confs,
                actual: confs,
            });
        }

        let value = check_terms(&request, transaction, claim)?;

        debug!(id = %claim.id, %txid, confs, "request filled");
        request.active = false;
        request.fulfillments.push(Fulfillment {
            txid,
            confirming_digest: *confirming,
            input_index: claim.input_index,
            output_index: claim.output_index,
            value,
        });
        tx.put_request(request);
        ids.push(claim.id);
    }

    Ok(ids)
}

/// Match the spends/pays/value terms; returns the paying output's value.
fn check_terms(
    request: &Request,
    transaction: &Transaction,
    claim: &FilledRequest,
) -> Result<u64, RelayError> {
    let input = transaction
        .input
        .get(claim.input_index as usize)
        .ok_or(RelayError::IndexOutOfRange {
            kind: "input",
            index: claim.input_index,
        })?;
    let output = transaction
        .output
        .get(claim.output_index as usize)
        .ok_or(RelayError::IndexOutOfRange {
            kind: "output",
            index: claim.output_index,
        })?;

    if !request.spends.is_empty() && consensus::serialize(&input.previous_output) != request.spends {
        return Err(RelayError::SpendsMismatch(request.id));
    }

    let value = output.value.to_sat();
    if !request.pays.is_empty() {
        if output.script_pubkey.as_bytes() != request.pays.as_slice() {
            return Err(RelayError::PaysMismatch(request.id));
        }
        if value < request.value {
            return Err(RelayError::InsufficientValue {
                id: request.id,
                required: request.value,
                actual: value,
            });
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use bitcoin::{
        absolute::LockTime, transaction::Version, Amount, OutPoint, ScriptBuf, Sequence, TxIn,
        TxOut, Witness,
    };

    fn spend_tx() -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: Txid::from_byte_array([9u8; 32]),
                    vout: 3,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(50_000),
                script_pubkey: ScriptBuf::from_bytes(vec![0x51]),
            }],
        }
    }

    fn request(spends: Vec<u8>, pays: Vec<u8>, value: u64) -> Request {
        Request {
            id: RequestId::derive(&spends, &pays, value, 1, RequestMode::Local),
            spends,
            pays,
            value,
            min_confs: 1,
            mode: RequestMode::Local,
            active: true,
            metadata: vec![],
            fulfillments: vec![],
        }
    }

    fn claim(r: &Request) -> FilledRequest {
        FilledRequest {
            id: r.id,
            input_index: 0,
            output_index: 0,
        }
    }

    #[test]
    fn id_commits_to_every_term() {
        let base = RequestId::derive(b"", b"\x51", 5, 1, RequestMode::Local);
        assert_eq!(base, RequestId::derive(b"", b"\x51", 5, 1, RequestMode::Local));
        assert_ne!(base, RequestId::derive(b"", b"\x51", 6, 1, RequestMode::Local));
        assert_ne!(base, RequestId::derive(b"", b"\x51", 5, 2, RequestMode::Local));
        assert_ne!(base, RequestId::derive(b"", b"\x51", 5, 1, RequestMode::CrossChain));
        // length prefixes keep spends/pays boundaries unambiguous
        assert_ne!(
            RequestId::derive(b"\x51", b"", 5, 1, RequestMode::Local),
            RequestId::derive(b"", b"\x51", 5, 1, RequestMode::Local)
        );
    }

    #[test]
    fn empty_terms_match_anything() {
        let r = request(vec![], vec![], 0);
        assert_eq!(check_terms(&r, &spend_tx(), &claim(&r)).unwrap(), 50_000);
    }

    #[test]
    fn spends_must_name_the_input_outpoint() {
        let tx = spend_tx();
        let outpoint = consensus::serialize(&tx.input[0].previous_output);
        assert_eq!(outpoint.len(), 36);

        let ok = request(outpoint, vec![], 0);
        assert!(check_terms(&ok, &tx, &claim(&ok)).is_ok());

        let bad = request(vec![0u8; 36], vec![], 0);
        assert!(matches!(
            check_terms(&bad, &tx, &claim(&bad)),
            Err(RelayError::SpendsMismatch(_))
        ));
    }

    #[test]
    fn pays_checks_script_and_value() {
        let tx = spend_tx();
        let ok = request(vec![], vec![0x51], 50_000);
        assert!(check_terms(&ok, &tx, &claim(&ok)).is_ok());

        let wrong_script = request(vec![], vec![0x52], 0);
        assert!(matches!(
            check_terms(&wrong_script, &tx, &claim(&wrong_script)),
            Err(RelayError::PaysMismatch(_))
        ));

        let too_much = request(vec![], vec![0x51], 50_001);
        assert!(matches!(
            check_terms(&too_much, &tx, &claim(&too_much)),
            Err(RelayError::InsufficientValue { actual: 50_000, .. })
        ));
    }

    #[test]
    fn out_of_range_indexes_are_rejected() {
        let r = request(vec![], vec![], 0);
        let mut c = claim(&r);
        c.output_index = 1;
        assert!(matches!(
            check_terms(&r, &spend_tx(), &c),
            Err(RelayError::IndexOutOfRange { kind: "output", index: 1 })
        ));
    }

    #[test]
    fn set_request_reactivates_and_state_toggles() {
        let store = MemoryStore::new();
        let mut tx = Transition::new(&store);
        let id = set_request(&mut tx, b"", b"\x51", 0, 1, RequestMode::Local, b"meta").unwrap();

        set_request_state(&mut tx, &id, false).unwrap();
        assert!(!tx.request(&id).unwrap().unwrap().active);

        let again = set_request(&mut tx, b"", b"\x51", 0, 1, RequestMode::Local, b"").unwrap();
        assert_eq!(again, id);
        let stored = tx.request(&id).unwrap().unwrap();
        assert!(stored.active);
        assert!(stored.metadata.is_empty());

        let missing = RequestId::from_bytes([1u8; 32]);
        assert!(matches!(
            set_request_state(&mut tx, &missing, true),
            Err(RelayError::RequestNotFound(_))
        ));
    }
}
