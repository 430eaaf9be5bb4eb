#![cfg(feature = "runtime")]

mod common;

use btc_relay::prelude::*;
use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handle_serializes_concurrent_callers() -> anyhow::Result<()> {
    let Fixture { relay, genesis, .. } = mid_epoch()?;
    let handle = RelayHandle::new(relay);

    let chain = extend(&genesis, 4, EPOCH_BITS, 0);
    handle.ingest_headers(raw(&chain)).await?;
    assert_eq!(handle.best_digest().await?, chain[3].digest());

    let mut tasks = Vec::new();
    for n in 0..16u64 {
        let h = handle.clone();
        tasks.push(tokio::spawn(async move {
            h.new_request(vec![], vec![0x51], n, 1, RequestMode::Local, vec![])
                .await
        }));
    }
    let mut ids = Vec::new();
    for t in tasks {
        ids.push(t.await??);
    }

    for (n, id) in ids.iter().enumerate() {
        let request = handle.request(*id).await?;
        assert!(request.active);
        assert_eq!(request.value, n as u64);
    }
    assert_eq!(handle.get_confs(genesis.digest()).await?, 5);
    Ok(())
}

#[tokio::test]
async fn handle_surfaces_relay_errors() -> anyhow::Result<()> {
    let Fixture { relay, .. } = initialized()?;
    let handle = RelayHandle::new(relay);

    let err = handle.ingest_headers(vec![0u8; 79]).await.unwrap_err();
    assert!(matches!(err, RelayError::MalformedHeader(79)));

    let lca = handle.with_relay(|r| r.last_reorg_lca()).await?;
    assert_eq!(handle.last_reorg_lca().await?, lca);
    Ok(())
}
