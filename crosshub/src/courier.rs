use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::{
    cfg::CourierConfig,
    fabric::{self, Block, PrepareCrossTx},
    store::CrossTxStore,
    types::{CrossContract, CrossStatus, CrossTx},
};

const CHECKPOINT_BUCKET: &str = "courier";
const HEIGHT_KEY: &str = "height";

/// Records the cross transactions found in permissioned-ledger blocks.
pub struct Courier {
    store: Arc<CrossTxStore>,
    config: CourierConfig,
}

impl Courier {
    pub fn new(store: Arc<CrossTxStore>, config: CourierConfig) -> Self {
        Courier { store, config }
    }

    /// Saves the relevant events in `block` and then checkpoints its height. Returns the number of events found.
    pub fn handle_block(&self, block: &Block) -> Result<usize> {
        let number = block.header.number;
        let records: Vec<CrossTx> = fabric::extract(block, |name| self.config.is_relevant(name))?
            .into_iter()
            .map(to_cross_tx)
            .collect();

        self.store.save(&records)?;
        self.store.set(CHECKPOINT_BUCKET, HEIGHT_KEY, &number)?;

        info!(number, events = records.len(), "block handled");
        Ok(records.len())
    }

    /// The height of the last block handled, if any.
    pub fn last_height(&self) -> Option<u64> {
        self.store.get(CHECKPOINT_BUCKET, HEIGHT_KEY)
    }
}

/// Builds the stored form of a chaincode event. The payload is expected to hold a JSON [CrossContract]. If it does
/// not, the record is kept without a contract under its transaction id.
pub fn to_cross_tx(prepared: PrepareCrossTx) -> CrossTx {
    let contract = match serde_json::from_slice::<CrossContract>(&prepared.payload) {
        Ok(contract) => Some(contract),
        Err(e) => {
            warn!(tx_id = %prepared.tx_id, event = %prepared.event_name, %e, "payload is not a cross contract");
            None
        }
    };
    let cross_id = contract
        .as_ref()
        .map(|contract| contract.cross_id.clone())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| prepared.tx_id.clone());

    CrossTx {
        pk: None,
        cross_id,
        tx_id: prepared.tx_id,
        block_number: prepared.block_number,
        timestamp: prepared.timestamp,
        event_name: prepared.event_name,
        payload: prepared.payload,
        contract,
        status: CrossStatus::Prepared,
    }
}
