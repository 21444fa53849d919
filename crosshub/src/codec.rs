//! Decoding of cross-chain contract logs into typed events.
//!
//! The event schemas come from an [EventCatalog], a versioned JSON document wrapping a Solidity ABI. The catalog is
//! parsed once and then shared immutably by every [EventCodec].

use std::{fmt, fs, path::Path, sync::Arc};

use alloy::{
    dyn_abi::{DynSolValue, EventExt},
    json_abi::{Event, JsonAbi},
    primitives::{Address, B256, Bytes, U256},
};
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, DecodeError};

const EMBEDDED_CATALOG: &str = include_str!("../abi/crosschain.json");

/// The catalog document version this build understands.
pub const CATALOG_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    MakerTx,
    TakerTx,
    MakerFinish,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::MakerTx, EventKind::TakerTx, EventKind::MakerFinish];

    pub fn name(self) -> &'static str {
        match self {
            EventKind::MakerTx => "MakerTx",
            EventKind::TakerTx => "TakerTx",
            EventKind::MakerFinish => "MakerFinish",
        }
    }

    fn field_count(self) -> usize {
        match self {
            EventKind::MakerTx => 7,
            EventKind::TakerTx => 6,
            EventKind::MakerFinish => 2,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A log emitted by the watched contract, together with where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub tx_hash: B256,
    pub block_hash: B256,
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CanonicalEvent {
    /// A transfer was opened on the source chain.
    MakerTx {
        tx_id: B256,
        value: U256,
        dest_value: U256,
        from: String,
        to: String,
        purpose: u8,
        payload: Bytes,
    },
    /// A transfer was taken up on the remote chain.
    TakerTx {
        tx_id: B256,
        to: Address,
        from: Address,
        remote_chain_id: U256,
        value: U256,
        dest_value: U256,
    },
    /// A transfer was settled.
    MakerFinish { tx_id: B256, to: Address },
}

impl CanonicalEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CanonicalEvent::MakerTx { .. } => EventKind::MakerTx,
            CanonicalEvent::TakerTx { .. } => EventKind::TakerTx,
            CanonicalEvent::MakerFinish { .. } => EventKind::MakerFinish,
        }
    }

    pub fn tx_id(&self) -> B256 {
        match self {
            CanonicalEvent::MakerTx { tx_id, .. }
            | CanonicalEvent::TakerTx { tx_id, .. }
            | CanonicalEvent::MakerFinish { tx_id, .. } => *tx_id,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogDocument {
    version: u32,
    abi: JsonAbi,
}

/// Immutable mapping from event selectors to the schemas of the events we relay.
#[derive(Debug, Clone)]
pub struct EventCatalog {
    version: u32,
    maker_tx: Event,
    taker_tx: Event,
    maker_finish: Event,
    selectors: [(EventKind, B256); 3],
}

impl EventCatalog {
    pub fn from_json(json: &str) -> Result<EventCatalog, CatalogError> {
        let document: CatalogDocument = serde_json::from_str(json)?;
        if document.version != CATALOG_VERSION {
            return Err(CatalogError::UnsupportedVersion(document.version));
        }

        let lookup = |kind: EventKind| {
            document
                .abi
                .event(kind.name())
                .and_then(|overloads| overloads.first())
                .cloned()
                .ok_or(CatalogError::MissingEvent(kind))
        };

        let maker_tx = lookup(EventKind::MakerTx)?;
        let taker_tx = lookup(EventKind::TakerTx)?;
        let maker_finish = lookup(EventKind::MakerFinish)?;
        let selectors = [
            (EventKind::MakerTx, maker_tx.selector()),
            (EventKind::TakerTx, taker_tx.selector()),
            (EventKind::MakerFinish, maker_finish.selector()),
        ];

        Ok(EventCatalog {
            version: document.version,
            maker_tx,
            taker_tx,
            maker_finish,
            selectors,
        })
    }

    pub fn from_path(path: &Path) -> Result<EventCatalog, CatalogError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// The catalog compiled into this binary.
    pub fn embedded() -> Result<EventCatalog, CatalogError> {
        Self::from_json(EMBEDDED_CATALOG)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn event(&self, kind: EventKind) -> &Event {
        match kind {
            EventKind::MakerTx => &self.maker_tx,
            EventKind::TakerTx => &self.taker_tx,
            EventKind::MakerFinish => &self.maker_finish,
        }
    }

    pub fn selector(&self, kind: EventKind) -> B256 {
        self.selectors
            .iter()
            .find_map(|(k, selector)| (*k == kind).then_some(*selector))
            .unwrap_or_else(|| self.event(kind).selector())
    }

    pub fn kind_of(&self, topic0: &B256) -> Option<EventKind> {
        self.selectors
            .iter()
            .find_map(|(kind, selector)| (selector == topic0).then_some(*kind))
    }
}

/// Stateless decoder of contract logs. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventCodec {
    catalog: Arc<EventCatalog>,
}

impl EventCodec {
    pub fn new(catalog: Arc<EventCatalog>) -> Self {
        EventCodec { catalog }
    }

    pub fn catalog(&self) -> &EventCatalog {
        &self.catalog
    }

    /// Identifies the event a log claims to be from its first topic.
    pub fn classify(&self, topics: &[B256]) -> Option<EventKind> {
        topics.first().and_then(|topic0| self.catalog.kind_of(topic0))
    }

    /// Decodes a log, returning `None` if it is not one of the events we relay.
    pub fn decode_log(&self, log: &RawLog) -> Option<Result<CanonicalEvent, DecodeError>> {
        let kind = self.classify(&log.topics)?;
        Some(self.decode(kind, &log.topics, &log.data))
    }

    pub fn decode(
        &self,
        kind: EventKind,
        topics: &[B256],
        data: &[u8],
    ) -> Result<CanonicalEvent, DecodeError> {
        let event = self.catalog.event(kind);
        let decoded = event
            .decode_log_parts(topics.iter().copied(), data, true)
            .map_err(|source| DecodeError::Abi { kind, source })?;

        // Put the indexed and non-indexed values back into declaration order.
        let mut indexed = decoded.indexed.into_iter();
        let mut body = decoded.body.into_iter();
        let values: Vec<DynSolValue> = event
            .inputs
            .iter()
            .filter_map(|input| {
                if input.indexed {
                    indexed.next()
                } else {
                    body.next()
                }
            })
            .collect();

        if values.len() != kind.field_count() {
            return Err(DecodeError::FieldCount {
                kind,
                expected: kind.field_count(),
                actual: values.len(),
            });
        }
        let fields = Fields { kind, values };

        Ok(match kind {
            EventKind::MakerTx => CanonicalEvent::MakerTx {
                tx_id: fields.word(0, "txId")?,
                value: fields.uint(1, "value")?,
                dest_value: fields.uint(2, "destValue")?,
                from: fields.string(3, "from")?,
                to: fields.string(4, "to")?,
                purpose: fields.small(5, "purpose")?,
                payload: fields.bytes(6, "payload")?,
            },
            EventKind::TakerTx => CanonicalEvent::TakerTx {
                tx_id: fields.word(0, "txId")?,
                to: fields.address(1, "to")?,
                remote_chain_id: fields.uint(2, "remoteChainId")?,
                from: fields.address(3, "from")?,
                value: fields.uint(4, "value")?,
                dest_value: fields.uint(5, "destValue")?,
            },
            EventKind::MakerFinish => CanonicalEvent::MakerFinish {
                tx_id: fields.word(0, "txId")?,
                to: fields.address(1, "to")?,
            },
        })
    }

    /// Produces the topics and data a contract would emit for `event`. Every field is carried in the data, as in the
    /// built-in catalog.
    pub fn encode(&self, event: &CanonicalEvent) -> (Vec<B256>, Bytes) {
        let values = match event {
            CanonicalEvent::MakerTx {
                tx_id,
                value,
                dest_value,
                from,
                to,
                purpose,
                payload,
            } => vec![
                DynSolValue::FixedBytes(*tx_id, 32),
                DynSolValue::Uint(*value, 256),
                DynSolValue::Uint(*dest_value, 256),
                DynSolValue::String(from.clone()),
                DynSolValue::String(to.clone()),
                DynSolValue::Uint(U256::from(*purpose), 8),
                DynSolValue::Bytes(payload.to_vec()),
            ],
            CanonicalEvent::TakerTx {
                tx_id,
                to,
                from,
                remote_chain_id,
                value,
                dest_value,
            } => vec![
                DynSolValue::FixedBytes(*tx_id, 32),
                DynSolValue::Address(*to),
                DynSolValue::Uint(*remote_chain_id, 256),
                DynSolValue::Address(*from),
                DynSolValue::Uint(*value, 256),
                DynSolValue::Uint(*dest_value, 256),
            ],
            CanonicalEvent::MakerFinish { tx_id, to } => vec![
                DynSolValue::FixedBytes(*tx_id, 32),
                DynSolValue::Address(*to),
            ],
        };

        let topics = vec![self.catalog.selector(event.kind())];
        (topics, DynSolValue::Tuple(values).abi_encode_params().into())
    }
}

struct Fields {
    kind: EventKind,
    values: Vec<DynSolValue>,
}

impl Fields {
    fn mismatch(&self, field: &'static str) -> DecodeError {
        DecodeError::FieldType {
            kind: self.kind,
            field,
        }
    }

    fn word(&self, i: usize, field: &'static str) -> Result<B256, DecodeError> {
        match self.values[i].as_fixed_bytes() {
            Some((bytes, 32)) => Ok(B256::from_slice(bytes)),
            _ => Err(self.mismatch(field)),
        }
    }

    fn uint(&self, i: usize, field: &'static str) -> Result<U256, DecodeError> {
        self.values[i]
            .as_uint()
            .map(|(value, _)| value)
            .ok_or_else(|| self.mismatch(field))
    }

    fn small(&self, i: usize, field: &'static str) -> Result<u8, DecodeError> {
        u8::try_from(self.uint(i, field)?).map_err(|_| self.mismatch(field))
    }

    fn address(&self, i: usize, field: &'static str) -> Result<Address, DecodeError> {
        self.values[i]
            .as_address()
            .ok_or_else(|| self.mismatch(field))
    }

    fn string(&self, i: usize, field: &'static str) -> Result<String, DecodeError> {
        self.values[i]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| self.mismatch(field))
    }

    fn bytes(&self, i: usize, field: &'static str) -> Result<Bytes, DecodeError> {
        self.values[i]
            .as_bytes()
            .map(Bytes::copy_from_slice)
            .ok_or_else(|| self.mismatch(field))
    }
}
