//! Incremental scanning of the cross-chain contract's logs.
//!
//! A [ChainView] remembers the last block it has fully scanned. Every poll it asks the chain for its height, scans
//! the next window of blocks and hands each signed `MakerTx` downstream. The most recent blocks are left alone until
//! they have enough confirmations, so shallow reorganisations are never observed.

use std::{sync::Arc, time::Duration};

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use tokio::{
    select,
    sync::{mpsc, watch},
    task::{JoinError, JoinHandle},
    time::{self, MissedTickBehavior},
};
use tracing::*;

use crate::{
    cfg::ChainConfig,
    codec::{CanonicalEvent, EventCodec, RawLog},
    crypto::{CtxSigner, SecretKey},
    error::{RpcError, ViewError},
    types::{CrossTransaction, SignedCrossTransaction},
};

/// The chain queries a [ChainView] needs.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn block_number(&self) -> Result<u64, RpcError>;

    /// Logs emitted by `address` in blocks `from..=to`.
    async fn filter_logs(
        &self,
        from: u64,
        to: u64,
        address: Address,
    ) -> Result<Vec<RawLog>, RpcError>;
}

/// The last block to scan this poll, given the last scanned block and the chain height.
///
/// While more than `batch` blocks behind, at most `batch` blocks are scanned. Otherwise scanning stops
/// `confirmations` blocks short of the tip. The result is never below `current`.
pub fn next_window(current: u64, height: u64, batch: u64, confirmations: u64) -> u64 {
    let to = if current < height.saturating_sub(batch) {
        current + batch
    } else {
        height.saturating_sub(confirmations)
    };
    to.max(current)
}

pub struct ChainView {
    config: ChainConfig,
    rpc: Arc<dyn ChainRpc>,
    codec: EventCodec,
    signer: CtxSigner,
    key: Option<SecretKey>,
    sender: mpsc::Sender<SignedCrossTransaction>,
    current_height: u64,
}

impl ChainView {
    pub fn new(
        config: ChainConfig,
        rpc: Arc<dyn ChainRpc>,
        codec: EventCodec,
        key: Option<SecretKey>,
        sender: mpsc::Sender<SignedCrossTransaction>,
    ) -> ChainView {
        ChainView {
            signer: CtxSigner::new(config.chain_id),
            current_height: config.start_height,
            config,
            rpc,
            codec,
            key,
            sender,
        }
    }

    /// The last block which has been fully scanned.
    pub fn current_height(&self) -> u64 {
        self.current_height
    }

    /// Polls the chain once, returning the number of cross transactions sent downstream.
    ///
    /// The cursor only moves once the whole window has been fetched and dispatched. On error the same window is
    /// retried next time.
    pub async fn tick(&mut self) -> Result<usize, ViewError> {
        let timeout = self.config.rpc_timeout;

        let height = time::timeout(timeout, self.rpc.block_number())
            .await
            .map_err(|_| RpcError::Timeout(timeout))??;
        let to = next_window(
            self.current_height,
            height,
            self.config.batch_size,
            self.config.confirmations,
        );
        if to == self.current_height {
            trace!(height, current = self.current_height, "nothing to scan");
            return Ok(0);
        }

        let from = self.current_height + 1;
        let logs = time::timeout(
            timeout,
            self.rpc.filter_logs(from, to, self.config.contract),
        )
        .await
        .map_err(|_| RpcError::Timeout(timeout))??;
        debug!(from, to, height, logs = logs.len(), "scanned blocks");

        let mut sent = 0;
        for log in &logs {
            let Some(signed) = self.dispatch(log) else {
                continue;
            };
            self.sender
                .send(signed)
                .await
                .map_err(|_| ViewError::ChannelClosed)?;
            sent += 1;
        }

        self.current_height = to;
        Ok(sent)
    }

    fn dispatch(&self, log: &RawLog) -> Option<SignedCrossTransaction> {
        let event = match self.codec.decode_log(log)? {
            Ok(event) => event,
            Err(e) => {
                warn!(block = log.block_number, tx_hash = %log.tx_hash, %e, "dropping undecodable event");
                return None;
            }
        };

        match event {
            CanonicalEvent::MakerTx {
                tx_id,
                value,
                dest_value,
                from,
                to,
                purpose,
                payload,
            } => {
                let tx = CrossTransaction {
                    value,
                    dest_value,
                    from,
                    to,
                    destination_id: U256::from(self.config.destination_id),
                    purpose,
                    tx_id,
                    tx_hash: log.tx_hash,
                    block_hash: log.block_hash,
                    block_number: log.block_number,
                    payload,
                };
                self.sign(tx)
            }
            CanonicalEvent::TakerTx {
                tx_id,
                to,
                from,
                remote_chain_id,
                value,
                dest_value,
            } => {
                info!(%tx_id, %from, %to, %remote_chain_id, %value, %dest_value, "TakerTx");
                None
            }
            CanonicalEvent::MakerFinish { tx_id, to } => {
                info!(%tx_id, %to, "MakerFinish");
                None
            }
        }
    }

    /// Signs `tx` and checks the signature recovers to our own key. Anything which cannot be verified is dropped.
    fn sign(&self, tx: CrossTransaction) -> Option<SignedCrossTransaction> {
        let tx_id = tx.tx_id;
        let signed = match self.signer.sign(tx, self.key.as_ref()) {
            Ok(signed) => signed,
            Err(e) => {
                error!(%tx_id, %e, "failed to sign cross transaction");
                return None;
            }
        };

        let expected = self.key.as_ref().map(SecretKey::address);
        match self.signer.sender(&signed) {
            Ok(sender) if Some(sender) == expected => {
                info!(%tx_id, %sender, value = %signed.tx.value, to = %signed.tx.to, "MakerTx");
                Some(signed)
            }
            Ok(sender) => {
                error!(%tx_id, %sender, "recovered signer is not our key, dropping");
                None
            }
            Err(e) => {
                error!(%tx_id, %e, "failed to verify cross transaction, dropping");
                None
            }
        }
    }

    /// Polls every `poll_interval` until `stop` fires or downstream goes away. Returns the last scanned height.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> u64 {
        let mut interval = time::interval(self.config.poll_interval.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            height = self.current_height,
            contract = %self.config.contract,
            chain_id = self.signer.chain_id(),
            "chain view started"
        );

        loop {
            select! {
                biased;
                _ = async { let _ = stop.wait_for(|stopped| *stopped).await; } => break,
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(_) => {}
                        Err(ViewError::ChannelClosed) => {
                            warn!(height = self.current_height, "downstream closed, stopping chain view");
                            break;
                        }
                        Err(e) => {
                            warn!(%e, height = self.current_height, "chain view poll failed");
                        }
                    }
                }
            }
        }

        info!(height = self.current_height, "chain view stopped");
        self.current_height
    }

    /// Runs the view on a new task.
    pub fn start(self) -> ChainViewHandle {
        let (stop, stopped) = watch::channel(false);
        let task = tokio::spawn(self.run(stopped));
        ChainViewHandle { stop, task }
    }
}

pub struct ChainViewHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl ChainViewHandle {
    /// Prevents any further polls. A poll already in flight is allowed to finish. Calling this more than once has no
    /// further effect.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Waits for the view to stop, returning the last scanned height.
    pub async fn join(self) -> Result<u64, JoinError> {
        self.task.await
    }
}
