use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::{
    store::CrossTxStore,
    types::{CrossTx, SignedCrossTransaction, Timestamp},
};

/// Persists the cross transactions a chain view produces.
pub struct Relay {
    store: Arc<CrossTxStore>,
    receiver: mpsc::Receiver<SignedCrossTransaction>,
}

impl Relay {
    pub fn new(store: Arc<CrossTxStore>, receiver: mpsc::Receiver<SignedCrossTransaction>) -> Self {
        Relay { store, receiver }
    }

    /// Saves every received transaction until the sending side is dropped. Returns the number saved.
    ///
    /// A transaction which cannot be saved is logged and not retried.
    pub async fn run(mut self) -> usize {
        let mut saved = 0;

        while let Some(signed) = self.receiver.recv().await {
            let cross_id = signed.tx.cross_id();
            let record = match CrossTx::from_signed(&signed, Timestamp::now()) {
                Ok(record) => record,
                Err(e) => {
                    error!(cross_id, %e, "failed to encode cross transaction");
                    continue;
                }
            };

            match self.store.save(&[record]) {
                Ok(()) => saved += 1,
                Err(e) => error!(cross_id, %e, "failed to save cross transaction"),
            }
        }

        info!(saved, "relay finished");
        saved
    }
}
