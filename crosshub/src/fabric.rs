//! Extraction of cross transactions from permissioned-ledger blocks.
//!
//! Blocks arrive already parsed from their wire format. Only the parts of the structure needed to find chaincode
//! events are modelled here.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{error::ExtractionError, types::Timestamp};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub data: Vec<Envelope>,
    #[serde(default)]
    pub metadata: BlockMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadata {
    /// One validation code per envelope. Zero means the transaction was valid. Envelopes beyond the end of the
    /// filter are treated as valid.
    #[serde(default)]
    pub transaction_filter: Vec<u8>,
}

impl BlockMetadata {
    pub fn is_valid(&self, index: usize) -> bool {
        self.transaction_filter
            .get(index)
            .is_none_or(|code| *code == TX_VALIDATION_VALID)
    }
}

pub const TX_VALIDATION_VALID: u8 = 0;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub header: Option<Header>,
    pub transaction: Option<Transaction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub channel_header: Option<ChannelHeader>,
    pub signature_header: Option<SignatureHeader>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeaderType {
    Message,
    Config,
    ConfigUpdate,
    #[default]
    EndorserTransaction,
    OrdererTransaction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHeader {
    pub kind: HeaderType,
    /// May be empty, in which case the id is derived from the signature header.
    #[serde(default)]
    pub tx_id: String,
    pub timestamp: Option<Timestamp>,
    pub channel_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureHeader {
    pub creator: Vec<u8>,
    pub nonce: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub actions: Vec<TransactionAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionAction {
    pub chaincode_action: Option<ChaincodeAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeAction {
    pub event: Option<ChaincodeEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeEvent {
    pub chaincode_id: String,
    pub tx_id: String,
    pub event_name: String,
    pub payload: Vec<u8>,
}

/// A chaincode event that may start or finish a cross transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareCrossTx {
    pub tx_id: String,
    pub block_number: u64,
    pub timestamp: Timestamp,
    pub event_name: String,
    pub payload: Vec<u8>,
}

/// The transaction id the ledger itself would assign: the hex SHA-256 of the nonce followed by the creator.
pub fn compute_tx_id(signature_header: &SignatureHeader) -> String {
    let mut hasher = Sha256::new();
    hasher.update(&signature_header.nonce);
    hasher.update(&signature_header.creator);
    hex::encode(hasher.finalize())
}

fn resolve_tx_id(
    index: usize,
    header: &Header,
    channel_header: &ChannelHeader,
) -> Result<String, ExtractionError> {
    if !channel_header.tx_id.is_empty() {
        return Ok(channel_header.tx_id.clone());
    }
    let signature_header = header
        .signature_header
        .as_ref()
        .ok_or(ExtractionError::MissingSignatureHeader(index))?;
    Ok(compute_tx_id(signature_header))
}

/// Yields every chaincode event in `block` whose name satisfies `is_relevant`, in block order.
///
/// Configuration envelopes and transactions the ledger marked invalid are skipped.
pub fn extract(
    block: &Block,
    is_relevant: impl Fn(&str) -> bool,
) -> Result<Vec<PrepareCrossTx>, ExtractionError> {
    let number = block.header.number;
    let mut prepared = Vec::new();

    for (index, envelope) in block.data.iter().enumerate() {
        let header = envelope
            .header
            .as_ref()
            .ok_or(ExtractionError::MissingHeader(index))?;
        let channel_header = header
            .channel_header
            .as_ref()
            .ok_or(ExtractionError::MissingChannelHeader(index))?;

        if channel_header.kind != HeaderType::EndorserTransaction {
            debug!(number, index, kind = ?channel_header.kind, "skipping non-endorser envelope");
            continue;
        }
        if !block.metadata.is_valid(index) {
            debug!(number, index, "skipping invalid transaction");
            continue;
        }

        let timestamp = channel_header
            .timestamp
            .ok_or(ExtractionError::MissingTimestamp(index))?;
        let transaction = envelope
            .transaction
            .as_ref()
            .ok_or(ExtractionError::MissingTransaction(index))?;

        for action in &transaction.actions {
            let Some(event) = action
                .chaincode_action
                .as_ref()
                .and_then(|action| action.event.as_ref())
            else {
                continue;
            };
            if !is_relevant(&event.event_name) {
                continue;
            }

            prepared.push(PrepareCrossTx {
                tx_id: resolve_tx_id(index, header, channel_header)?,
                block_number: number,
                timestamp,
                event_name: event.event_name.clone(),
                payload: event.payload.clone(),
            });
        }
    }

    Ok(prepared)
}
