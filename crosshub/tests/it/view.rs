use std::{sync::Arc, time::Duration};

use alloy::primitives::{Address, B256, Bytes, U256};
use crosshub::{
    codec::CanonicalEvent,
    crypto::CtxSigner,
    error::{RpcError, ViewError},
    relay::Relay,
    store::{CrossTxStore, FieldName},
    types::{CrossStatus, SignedCrossTransaction},
};

use crate::{MockChain, chain_view, codec, log, maker_log, secret_key};

#[tokio::test]
async fn maker_tx_is_signed_and_sent() {
    let key = secret_key(1);
    let address = key.address();
    let chain = MockChain::new(200, vec![maker_log(50, 7)]);
    let (mut view, mut receiver) = chain_view(chain.clone(), Some(key), 16);

    assert_eq!(view.tick().await.unwrap(), 1);
    assert_eq!(view.current_height(), 100);
    assert_eq!(chain.queries(), vec![(1, 100)]);

    let signed = receiver.recv().await.unwrap();
    assert_eq!(signed.tx.tx_id, B256::repeat_byte(7));
    assert_eq!(signed.tx.block_number, 50);
    assert_eq!(signed.tx.destination_id, U256::from(1));
    assert_eq!(signed.tx.value, U256::from(1_000));
    assert_eq!(CtxSigner::new(11).sender(&signed).unwrap(), address);
}

#[tokio::test]
async fn catch_up_then_wait_for_confirmations() {
    let chain = MockChain::new(200, vec![]);
    let (mut view, _receiver) = chain_view(chain.clone(), Some(secret_key(1)), 16);

    view.tick().await.unwrap();
    view.tick().await.unwrap();
    view.tick().await.unwrap();

    assert_eq!(view.current_height(), 188);
    assert_eq!(chain.queries(), vec![(1, 100), (101, 188)]);

    chain.state.lock().height = 201;
    view.tick().await.unwrap();
    assert_eq!(view.current_height(), 189);
    assert_eq!(chain.queries().last(), Some(&(189, 189)));
}

#[tokio::test]
async fn height_failure_scans_nothing() {
    let chain = MockChain::new(200, vec![maker_log(50, 7)]);
    chain.state.lock().fail_height = true;
    let (mut view, _receiver) = chain_view(chain.clone(), Some(secret_key(1)), 16);

    let err = view.tick().await.unwrap_err();

    assert!(matches!(err, ViewError::Rpc(RpcError::InvalidResponse(_))));
    assert!(chain.queries().is_empty());
    assert_eq!(view.current_height(), 0);
}

#[tokio::test]
async fn log_failure_retries_the_same_window() {
    let chain = MockChain::new(200, vec![maker_log(50, 7)]);
    chain.state.lock().fail_logs = true;
    let (mut view, mut receiver) = chain_view(chain.clone(), Some(secret_key(1)), 16);

    assert!(view.tick().await.is_err());
    assert_eq!(view.current_height(), 0);

    chain.state.lock().fail_logs = false;
    assert_eq!(view.tick().await.unwrap(), 1);

    assert_eq!(view.current_height(), 100);
    assert_eq!(chain.queries(), vec![(1, 100), (1, 100)]);
    assert_eq!(receiver.recv().await.unwrap().tx.block_number, 50);
}

#[tokio::test]
async fn undecodable_and_unknown_logs_are_dropped() {
    let mut truncated = maker_log(10, 1);
    truncated.data = Bytes::from_static(&[0; 31]);
    let mut unknown = maker_log(11, 2);
    unknown.topics[0] = B256::repeat_byte(0xee);
    let chain = MockChain::new(200, vec![truncated, unknown, maker_log(12, 3)]);
    let (mut view, mut receiver) = chain_view(chain, Some(secret_key(1)), 16);

    assert_eq!(view.tick().await.unwrap(), 1);

    assert_eq!(view.current_height(), 100);
    assert_eq!(
        receiver.recv().await.unwrap().tx.tx_id,
        B256::repeat_byte(3)
    );
    assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn taker_and_finish_are_only_logged() {
    let taker = CanonicalEvent::TakerTx {
        tx_id: B256::repeat_byte(1),
        to: Address::repeat_byte(2),
        from: Address::repeat_byte(3),
        remote_chain_id: U256::from(1),
        value: U256::from(5),
        dest_value: U256::from(4),
    };
    let finish = CanonicalEvent::MakerFinish {
        tx_id: B256::repeat_byte(1),
        to: Address::repeat_byte(2),
    };
    let codec = codec();
    let chain = MockChain::new(
        200,
        vec![log(20, codec.encode(&taker)), log(21, codec.encode(&finish))],
    );
    let (mut view, mut receiver) = chain_view(chain, Some(secret_key(1)), 16);

    assert_eq!(view.tick().await.unwrap(), 0);
    assert_eq!(view.current_height(), 100);
    assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn unsigned_maker_tx_is_dropped() {
    let chain = MockChain::new(200, vec![maker_log(50, 7)]);
    let (mut view, mut receiver) = chain_view(chain, None, 16);

    assert_eq!(view.tick().await.unwrap(), 0);
    assert_eq!(view.current_height(), 100);
    assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn closed_downstream_keeps_cursor() {
    let chain = MockChain::new(200, vec![maker_log(50, 7)]);
    let (mut view, receiver) = chain_view(chain, Some(secret_key(1)), 16);
    drop(receiver);

    assert!(matches!(view.tick().await, Err(ViewError::ChannelClosed)));
    assert_eq!(view.current_height(), 0);
}

#[tokio::test]
async fn slow_downstream_blocks_the_view() {
    let chain = MockChain::new(200, vec![maker_log(10, 1), maker_log(11, 2)]);
    let (mut view, mut receiver) = chain_view(chain, Some(secret_key(1)), 1);

    let task = tokio::spawn(async move {
        let sent = view.tick().await;
        (view, sent)
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!task.is_finished());

    assert_eq!(receiver.recv().await.unwrap().tx.block_number, 10);
    assert_eq!(receiver.recv().await.unwrap().tx.block_number, 11);

    let (view, sent) = task.await.unwrap();
    assert_eq!(sent.unwrap(), 2);
    assert_eq!(view.current_height(), 100);
}

#[test]
fn run_can_be_spawned() {
    fn assert_send<T: Send + 'static>(_: T) {}

    let (view, _receiver) = chain_view(MockChain::new(0, vec![]), None, 1);
    let (_stop, stopped) = tokio::sync::watch::channel(false);
    assert_send(view.run(stopped));
}

#[tokio::test]
async fn stop_is_idempotent() {
    let chain = MockChain::new(0, vec![]);
    let (view, _receiver) = chain_view(chain, Some(secret_key(1)), 16);

    let handle = view.start();
    handle.stop();
    handle.stop();

    let height = tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(height, 0);
}

#[tokio::test]
async fn view_stops_when_downstream_goes_away() {
    let chain = MockChain::new(200, vec![maker_log(50, 7)]);
    let (view, receiver) = chain_view(chain, Some(secret_key(1)), 16);
    drop(receiver);

    let height = tokio::time::timeout(Duration::from_secs(5), view.start().join())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(height, 0);
}

#[tokio::test]
async fn relayed_transactions_are_stored() {
    let store = Arc::new(CrossTxStore::open(None, "mychannel").unwrap());
    let chain = MockChain::new(200, vec![maker_log(50, 7), maker_log(60, 8)]);
    let (view, receiver) = chain_view(chain, Some(secret_key(1)), 1);

    let handle = view.start();
    let relay = tokio::spawn(Relay::new(store.clone(), receiver).run());

    tokio::time::timeout(Duration::from_secs(5), async {
        while store.count(&[]).unwrap() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    handle.stop();
    assert!(handle.join().await.unwrap() >= 100);
    assert_eq!(relay.await.unwrap(), 2);

    let stored = store
        .one(FieldName::CrossId, hex::encode(B256::repeat_byte(7)))
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, CrossStatus::Prepared);
    assert_eq!(stored.event_name, "MakerTx");
    assert_eq!(stored.block_number, 50);
    let signed: SignedCrossTransaction = serde_json::from_slice(&stored.payload).unwrap();
    assert_eq!(signed.tx.tx_id, B256::repeat_byte(7));
    assert_eq!(
        CtxSigner::new(11).sender(&signed).unwrap(),
        secret_key(1).address()
    );
}
