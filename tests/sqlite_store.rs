#![cfg(feature = "store-sqlite")]

mod common;

use bitcoin::{hashes::Hash, BlockHash};
use btc_relay::{
    prelude::*,
    store::{ChangeSet, HeaderRecord, Slot},
    StoreError,
};
use common::*;

#[test]
fn sqlite_store_roundtrips() -> anyhow::Result<()> {
    // temp dir so the WAL files go away with it
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("relay.sqlite");

    let store = SqliteStore::new(&path)?;

    // Defaults on a fresh DB
    assert!(store.header(&BlockHash::all_zeros())?.is_none());
    for slot in Slot::ALL {
        assert!(store.slot(slot)?.is_none(), "fresh DB has no {}", slot.key());
    }
    assert!(store.request(&RequestId::from_bytes([0u8; 32]))?.is_none());

    // Drive a relay over it, then reopen from disk
    let Fixture { mut relay, genesis, .. } = mid_epoch_with(store)?;
    let chain = extend(&genesis, 3, EPOCH_BITS, 0);
    let records = relay.ingest_headers(&raw(&chain))?;
    let id = relay.new_request(&[], &[0x51], 10, 2, RequestMode::CrossChain, b"persist me")?;
    let request = relay.request(&id)?;
    drop(relay);

    let reopened = Relay::new(SqliteStore::new(&path)?);
    assert_eq!(reopened.relay_genesis()?, genesis.digest());
    assert_eq!(reopened.best_digest()?, chain[2].digest());
    assert_eq!(reopened.last_reorg_lca()?, genesis.digest());
    for rec in &records {
        assert_eq!(&reopened.header(&rec.digest())?, rec);
    }
    assert_eq!(reopened.request(&id)?, request);
    assert_eq!(reopened.request(&id)?.metadata, b"persist me".to_vec());
    Ok(())
}

#[test]
fn conflicting_commit_rolls_back() -> anyhow::Result<()> {
    let mut store = SqliteStore::new_in_memory()?;

    let (epoch_start, genesis) = anchors();
    let record = |header: &btc_relay::BitcoinHeader, height| -> anyhow::Result<HeaderRecord> {
        Ok(HeaderRecord {
            header: header.clone(),
            height,
            accumulated_work: header.work()?,
        })
    };

    let mut first = ChangeSet::default();
    first.headers.insert(genesis.digest(), record(&genesis, 2_015)?);
    store.commit(first)?;

    // identical content is accepted again
    let mut same = ChangeSet::default();
    same.headers.insert(genesis.digest(), record(&genesis, 2_015)?);
    store.commit(same)?;

    let mut clash = ChangeSet::default();
    clash.headers.insert(epoch_start.digest(), record(&epoch_start, 0)?);
    clash.headers.insert(genesis.digest(), record(&genesis, 9)?);
    clash.slots.insert(Slot::BestKnown, epoch_start.digest());
    assert!(matches!(store.commit(clash), Err(StoreError::Conflict(d)) if d == genesis.digest()));

    assert!(store.header(&epoch_start.digest())?.is_none());
    assert!(store.slot(Slot::BestKnown)?.is_none());
    assert_eq!(store.header(&genesis.digest())?.map(|r| r.height), Some(2_015));
    Ok(())
}
