//! Pair Writer
//!
//! One writer task per active trading pair: the sole mutator of that pair's
//! book, order-status fields and trade log. Commands arrive on a bounded
//! queue; a submission acquires a queue slot *before* freezing funds, so an
//! overloaded pair rejects without touching the ledger. Cancel is
//! synchronous: the call returns only after the order is terminal.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, OwnedPermit};
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::matching::{MatchResult, MatchingEngine};
use crate::error::CoreError;
use crate::models::Order;

pub enum PairCommand {
    Submit {
        order_id: Uuid,
        reply: oneshot::Sender<Result<MatchResult, CoreError>>,
    },
    Cancel {
        order_id: Uuid,
        user_id: Uuid,
        reply: oneshot::Sender<Result<Order, CoreError>>,
    },
}

#[derive(Clone)]
pub struct PairWriter {
    symbol: String,
    tx: mpsc::Sender<PairCommand>,
    engine: Arc<MatchingEngine>,
}

impl PairWriter {
    /// Spawn the writer loop and a periodic full-snapshot ticker.
    pub fn spawn(
        engine: Arc<MatchingEngine>,
        queue_depth: usize,
        snapshot_interval: Duration,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<PairCommand>(queue_depth);
        let symbol = engine.pair().symbol.clone();

        let worker = Arc::clone(&engine);
        let worker_symbol = symbol.clone();
        tokio::spawn(async move {
            info!(symbol = %worker_symbol, "matching writer started");
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    PairCommand::Submit { order_id, reply } => {
                        let _ = reply.send(worker.process(order_id));
                    }
                    PairCommand::Cancel {
                        order_id,
                        user_id,
                        reply,
                    } => {
                        let _ = reply.send(worker.cancel(order_id, user_id));
                    }
                }
            }
            warn!(symbol = %worker_symbol, "matching writer stopped");
        });

        let ticker = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(snapshot_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                ticker.publish_snapshot();
            }
        });

        Self { symbol, tx, engine }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn engine(&self) -> &Arc<MatchingEngine> {
        &self.engine
    }

    /// Reserve a queue slot. With a deadline, waiting longer than the
    /// deadline returns `Overloaded`; without one the caller suspends until
    /// the writer drains.
    pub async fn acquire_slot(
        &self,
        deadline: Option<Duration>,
    ) -> Result<OwnedPermit<PairCommand>, CoreError> {
        let tx = self.tx.clone();
        match deadline {
            Some(deadline) => match tokio::time::timeout(deadline, tx.reserve_owned()).await {
                Ok(Ok(permit)) => Ok(permit),
                Ok(Err(_)) => Err(CoreError::Overloaded(format!(
                    "writer for {} is gone",
                    self.symbol
                ))),
                Err(_) => Err(CoreError::Overloaded(format!(
                    "writer queue for {} exceeded the submission deadline",
                    self.symbol
                ))),
            },
            None => tx.reserve_owned().await.map_err(|_| {
                CoreError::Overloaded(format!("writer for {} is gone", self.symbol))
            }),
        }
    }

    /// Hand an admitted order to the writer through a previously acquired
    /// slot and await the matching result.
    pub async fn submit(
        &self,
        permit: OwnedPermit<PairCommand>,
        order_id: Uuid,
    ) -> Result<MatchResult, CoreError> {
        let (reply, rx) = oneshot::channel();
        permit.send(PairCommand::Submit { order_id, reply });
        rx.await
            .map_err(|_| CoreError::Invariant(format!("writer for {} dropped reply", self.symbol)))?
    }

    pub async fn cancel(&self, order_id: Uuid, user_id: Uuid) -> Result<Order, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PairCommand::Cancel {
                order_id,
                user_id,
                reply,
            })
            .await
            .map_err(|_| CoreError::Overloaded(format!("writer for {} is gone", self.symbol)))?;
        rx.await
            .map_err(|_| CoreError::Invariant(format!("writer for {} dropped reply", self.symbol)))?
    }
}
