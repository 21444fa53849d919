use std::sync::Arc;

use crosshub::{
    cfg::CourierConfig,
    courier::Courier,
    error::ExtractionError,
    fabric::{
        Block, BlockHeader, BlockMetadata, ChaincodeAction, ChaincodeEvent, ChannelHeader, Envelope,
        Header, HeaderType, SignatureHeader, Transaction, TransactionAction,
    },
    store::{CrossTxStore, FieldName, Matcher},
    types::{ContractStatus, CrossStatus},
};
use serde_json::json;

use crate::timestamp;

fn contract_payload(cross_id: &str, status: ContractStatus) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "cross_id": cross_id,
        "status": status,
        "from": "Org1MSP:User1",
        "to": "0x70997970c51812dc3a010c7d01b50e0d17dc79c8",
        "value": "0x64",
        "dest_value": "0x63",
    }))
    .unwrap()
}

fn envelope(tx_id: &str, events: &[(&str, Vec<u8>)]) -> Envelope {
    let actions = events
        .iter()
        .map(|(name, payload)| TransactionAction {
            chaincode_action: Some(ChaincodeAction {
                event: Some(ChaincodeEvent {
                    chaincode_id: "crosscc".to_owned(),
                    tx_id: tx_id.to_owned(),
                    event_name: (*name).to_owned(),
                    payload: payload.clone(),
                }),
            }),
        })
        .collect();

    Envelope {
        header: Some(Header {
            channel_header: Some(ChannelHeader {
                kind: HeaderType::EndorserTransaction,
                tx_id: tx_id.to_owned(),
                timestamp: Some(timestamp(1_598_492_802)),
                channel_id: "mychannel".to_owned(),
            }),
            signature_header: Some(SignatureHeader::default()),
        }),
        transaction: Some(Transaction { actions }),
    }
}

fn block(number: u64, data: Vec<Envelope>) -> Block {
    Block {
        header: BlockHeader { number },
        data,
        metadata: BlockMetadata::default(),
    }
}

fn courier(event_filter: &[&str]) -> (Courier, Arc<CrossTxStore>) {
    let store = Arc::new(CrossTxStore::open(None, "mychannel").unwrap());
    let config = CourierConfig {
        event_filter: event_filter.iter().map(|s| (*s).to_owned()).collect(),
    };
    (Courier::new(store.clone(), config), store)
}

#[test]
fn prepared_then_finished() {
    let (courier, store) = courier(&["evt"]);
    assert_eq!(courier.last_height(), None);

    let opened = block(
        4,
        vec![envelope(
            "t-1",
            &[
                ("evtLock", contract_payload("c-1", ContractStatus::Init)),
                ("audit", b"ignored".to_vec()),
            ],
        )],
    );
    assert_eq!(courier.handle_block(&opened).unwrap(), 1);
    assert_eq!(courier.last_height(), Some(4));

    let stored = store.one(FieldName::CrossId, "c-1").unwrap().unwrap();
    assert_eq!(stored.tx_id, "t-1");
    assert_eq!(stored.event_name, "evtLock");
    assert_eq!(stored.status, CrossStatus::Prepared);

    let finished = block(
        5,
        vec![envelope(
            "t-2",
            &[("evtUnlock", contract_payload("c-1", ContractStatus::Finished))],
        )],
    );
    assert_eq!(courier.handle_block(&finished).unwrap(), 1);
    assert_eq!(courier.last_height(), Some(5));

    let stored = store.one(FieldName::CrossId, "c-1").unwrap().unwrap();
    assert_eq!(stored.status, CrossStatus::Completed);
    assert_eq!(stored.tx_id, "t-1");
    assert_eq!(store.count(&[]).unwrap(), 1);
}

#[test]
fn opaque_payloads_are_keyed_by_tx_id() {
    let (courier, store) = courier(&[]);

    let block = block(
        7,
        vec![
            envelope("t-1", &[("evtTransfer", b"a transfer to b 10".to_vec())]),
            envelope("t-2", &[("evtTransfer", b"b transfer to a 3".to_vec())]),
        ],
    );
    assert_eq!(courier.handle_block(&block).unwrap(), 2);

    let stored = store
        .query(
            0,
            0,
            &[FieldName::TxId],
            false,
            &[Matcher::equal(FieldName::BlockNumber, 7u64)],
        )
        .unwrap();
    let ids: Vec<_> = stored.iter().map(|tx| tx.cross_id.as_str()).collect();
    assert_eq!(ids, ["t-1", "t-2"]);
    assert!(stored.iter().all(|tx| tx.contract.is_none()));
}

#[test]
fn malformed_block_is_not_checkpointed() {
    let (courier, store) = courier(&[]);
    courier.handle_block(&block(3, vec![])).unwrap();

    let mut broken = envelope("t-1", &[("evtLock", contract_payload("c-1", ContractStatus::Init))]);
    broken.transaction = None;
    let err = courier.handle_block(&block(4, vec![broken])).unwrap_err();

    assert_eq!(
        err.downcast_ref::<ExtractionError>(),
        Some(&ExtractionError::MissingTransaction(0))
    );
    assert_eq!(courier.last_height(), Some(3));
    assert_eq!(store.count(&[]).unwrap(), 0);
}
