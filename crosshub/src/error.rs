use std::time::Duration;

use crate::codec::EventKind;

/// The event catalog could not be loaded.
#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("could not read event catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed event catalog: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported event catalog version {0}")]
    UnsupportedVersion(u32),
    #[error("event catalog does not declare {0}")]
    MissingEvent(EventKind),
}

/// A log claimed an event signature but its payload did not match that event's schema. The event is dropped and the
/// rest of the batch continues.
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("{kind} payload does not match its schema: {source}")]
    Abi {
        kind: EventKind,
        #[source]
        source: alloy::dyn_abi::Error,
    },
    #[error("{kind} expects {expected} fields, got {actual}")]
    FieldCount {
        kind: EventKind,
        expected: usize,
        actual: usize,
    },
    #[error("{kind} field `{field}` has an unexpected type")]
    FieldType { kind: EventKind, field: &'static str },
}

/// A permissioned-ledger block is structurally malformed.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("envelope {0} has no header")]
    MissingHeader(usize),
    #[error("envelope {0} has no channel header")]
    MissingChannelHeader(usize),
    #[error("envelope {0} has no timestamp")]
    MissingTimestamp(usize),
    #[error("envelope {0} has no transaction")]
    MissingTransaction(usize),
    #[error("envelope {0} has no transaction id and no signature header to derive one from")]
    MissingSignatureHeader(usize),
}

#[derive(thiserror::Error, Debug)]
pub enum SigningError {
    #[error("no signing key available")]
    MissingKey,
    #[error("invalid secret key: {0}")]
    InvalidKey(String),
    #[error("chain id {0} is too large to encode in a signature")]
    ChainIdOverflow(u64),
    #[error("signing failed: {0}")]
    Signature(#[from] k256::ecdsa::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum VerificationError {
    #[error("signature with v={v} was not produced for chain {chain_id}")]
    ChainIdMismatch { v: u64, chain_id: u64 },
    #[error("malformed signature: {0}")]
    InvalidSignature(k256::ecdsa::Error),
    #[error("could not recover signer: {0}")]
    Recovery(k256::ecdsa::Error),
}

/// A store operation failed. Batch operations are rolled back as a whole when this is returned.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no record with cross id {0}")]
    NotFound(String),
}

#[derive(thiserror::Error, Debug)]
pub enum RpcError {
    #[error("rpc transport error: {0}")]
    Transport(#[from] jsonrpsee::core::ClientError),
    #[error("invalid rpc endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("rpc call timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid rpc response: {0}")]
    InvalidResponse(String),
}

/// A chain view tick could not complete. The cursor is left where it was.
#[derive(thiserror::Error, Debug)]
pub enum ViewError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("downstream channel closed")]
    ChannelClosed,
}
