use std::time::{SystemTime, UNIX_EPOCH};

use alloy::primitives::{B256, Bytes, U256};
use serde::{Deserialize, Serialize};

/// The canonical cross-chain transaction built from a `MakerTx` log and the transaction which emitted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossTransaction {
    pub value: U256,
    pub dest_value: U256,
    pub from: String,
    pub to: String,
    pub destination_id: U256,
    pub purpose: u8,
    pub tx_id: B256,
    pub tx_hash: B256,
    pub block_hash: B256,
    /// Where the log was found. Not covered by the signature.
    pub block_number: u64,
    pub payload: Bytes,
}

impl CrossTransaction {
    pub fn cross_id(&self) -> String {
        hex::encode(self.tx_id)
    }
}

/// An EIP-155 style signature, with the chain id folded into `v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtxSignature {
    pub v: u64,
    pub r: U256,
    pub s: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedCrossTransaction {
    pub tx: CrossTransaction,
    pub signature: CtxSignature,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    pub fn now() -> Timestamp {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp {
            seconds: since_epoch.as_secs() as i64,
            nanos: since_epoch.subsec_nanos() as i32,
        }
    }

    /// Nanoseconds since the Unix epoch. This is the form timestamps are ordered by in storage.
    pub fn as_nanos(&self) -> i64 {
        self.seconds
            .saturating_mul(1_000_000_000)
            .saturating_add(self.nanos as i64)
    }

    pub fn from_nanos(nanos: i64) -> Timestamp {
        Timestamp {
            seconds: nanos.div_euclid(1_000_000_000),
            nanos: nanos.rem_euclid(1_000_000_000) as i32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Init,
    Finished,
}

/// The contract carried in a cross transaction's payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossContract {
    pub cross_id: String,
    pub status: ContractStatus,
    pub from: String,
    pub to: String,
    pub value: U256,
    pub dest_value: U256,
    #[serde(default)]
    pub purpose: u8,
    #[serde(default)]
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossStatus {
    Prepared = 0,
    Completed = 1,
}

impl CrossStatus {
    pub fn from_i64(value: i64) -> Option<CrossStatus> {
        match value {
            0 => Some(CrossStatus::Prepared),
            1 => Some(CrossStatus::Completed),
            _ => None,
        }
    }
}

/// A cross transaction as it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossTx {
    /// Assigned by the store on insert.
    pub pk: Option<i64>,
    pub cross_id: String,
    pub tx_id: String,
    pub block_number: u64,
    pub timestamp: Timestamp,
    pub event_name: String,
    pub payload: Vec<u8>,
    /// `None` when the payload could not be decoded.
    pub contract: Option<CrossContract>,
    pub status: CrossStatus,
}

impl CrossTx {
    pub fn is_finished(&self) -> bool {
        matches!(
            self.contract,
            Some(CrossContract {
                status: ContractStatus::Finished,
                ..
            })
        )
    }

    /// The record for a signed `MakerTx`. The payload holds the whole signed transaction so a consumer can re-verify
    /// it.
    pub fn from_signed(
        signed: &SignedCrossTransaction,
        timestamp: Timestamp,
    ) -> Result<CrossTx, serde_json::Error> {
        let tx = &signed.tx;
        let cross_id = tx.cross_id();
        Ok(CrossTx {
            pk: None,
            cross_id: cross_id.clone(),
            tx_id: hex::encode(tx.tx_hash),
            block_number: tx.block_number,
            timestamp,
            event_name: "MakerTx".to_owned(),
            payload: serde_json::to_vec(signed)?,
            contract: Some(CrossContract {
                cross_id,
                status: ContractStatus::Init,
                from: tx.from.clone(),
                to: tx.to.clone(),
                value: tx.value,
                dest_value: tx.dest_value,
                purpose: tx.purpose,
                data: tx.payload.clone(),
            }),
            status: CrossStatus::Prepared,
        })
    }
}
