use alloy::primitives::U256;
use crosshub::{
    store::{CrossTxStore, FieldName, Matcher},
    types::{ContractStatus, CrossContract, CrossStatus, CrossTx},
};

use crate::timestamp;

fn cross_tx(cross_id: &str, block_number: u64, status: ContractStatus) -> CrossTx {
    CrossTx {
        pk: None,
        cross_id: cross_id.to_owned(),
        tx_id: format!("tx-{cross_id}-{block_number}"),
        block_number,
        timestamp: timestamp(1_600_000_000 + block_number as i64),
        event_name: "evtTransfer".to_owned(),
        payload: cross_id.as_bytes().to_vec(),
        contract: Some(CrossContract {
            cross_id: cross_id.to_owned(),
            status,
            from: "a".to_owned(),
            to: "b".to_owned(),
            value: U256::from(10),
            dest_value: U256::from(9),
            purpose: 0,
            data: Default::default(),
        }),
        status: CrossStatus::Prepared,
    }
}

#[test]
fn records_survive_reopening() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = CrossTxStore::open(Some(dir.path()), "mychannel").unwrap();
        store
            .save(&[
                cross_tx("c-1", 1, ContractStatus::Init),
                cross_tx("c-2", 2, ContractStatus::Init),
            ])
            .unwrap();
        store.set("courier", "height", &2u64).unwrap();
    }

    let store = CrossTxStore::open(Some(dir.path()), "mychannel").unwrap();
    assert_eq!(store.count(&[]).unwrap(), 2);
    assert_eq!(store.get::<u64>("courier", "height"), Some(2));

    store
        .save(&[cross_tx("c-1", 3, ContractStatus::Finished)])
        .unwrap();
    let completed = store
        .query(
            0,
            0,
            &[],
            false,
            &[Matcher::equal(FieldName::Status, CrossStatus::Completed)],
        )
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].cross_id, "c-1");
    assert_eq!(completed[0].block_number, 1);
}

#[test]
fn channels_are_kept_apart() {
    let dir = tempfile::tempdir().unwrap();
    let first = CrossTxStore::open(Some(dir.path()), "first").unwrap();
    let second = CrossTxStore::open(Some(dir.path()), "second").unwrap();

    first
        .save(&[cross_tx("c-1", 1, ContractStatus::Init)])
        .unwrap();
    second
        .save(&[
            cross_tx("c-1", 5, ContractStatus::Init),
            cross_tx("c-2", 6, ContractStatus::Init),
        ])
        .unwrap();
    first.set("courier", "height", &1u64).unwrap();

    assert_eq!(first.channel(), "first");
    assert_eq!(first.count(&[]).unwrap(), 1);
    assert_eq!(second.count(&[]).unwrap(), 2);
    assert_eq!(
        first
            .one(FieldName::CrossId, "c-1")
            .unwrap()
            .unwrap()
            .block_number,
        1
    );
    assert_eq!(
        second
            .one(FieldName::CrossId, "c-1")
            .unwrap()
            .unwrap()
            .block_number,
        5
    );
    assert_eq!(first.get::<u64>("courier", "height"), Some(1));
    assert_eq!(second.get::<u64>("courier", "height"), None);

    second
        .save(&[cross_tx("c-1", 7, ContractStatus::Finished)])
        .unwrap();
    assert_eq!(
        first.one(FieldName::CrossId, "c-1").unwrap().unwrap().status,
        CrossStatus::Prepared
    );
    assert_eq!(
        second.one(FieldName::CrossId, "c-1").unwrap().unwrap().status,
        CrossStatus::Completed
    );
}

#[test]
fn block_range_is_half_open() {
    let store = CrossTxStore::open(None, "mychannel").unwrap();
    let txs: Vec<_> = (1..=6)
        .map(|n| cross_tx(&format!("c-{n}"), n, ContractStatus::Init))
        .collect();
    store.save(&txs).unwrap();

    let range = [
        Matcher::at_least(FieldName::BlockNumber, 2u64),
        Matcher::less_than(FieldName::BlockNumber, 5u64),
    ];
    let found = store.query(0, 0, &[FieldName::BlockNumber], true, &range).unwrap();
    let blocks: Vec<_> = found.iter().map(|tx| tx.block_number).collect();
    assert_eq!(blocks, [4, 3, 2]);

    assert_eq!(
        store
            .count(&[Matcher::at_most(FieldName::BlockNumber, 5u64)])
            .unwrap(),
        5
    );
}

#[test]
fn open_creates_missing_directories() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b");

    let store = CrossTxStore::open(Some(&nested), "mychannel").unwrap();
    store
        .save(&[cross_tx("c-1", 1, ContractStatus::Init)])
        .unwrap();

    assert!(nested.join("crosshub.sqlite3").exists());
}
