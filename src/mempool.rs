//! Pending transaction pool
//!
//! Strict FIFO queue guarded by a mutex. Besides the queue, the pool tracks
//! the post-state each participant will have once its queued transactions are
//! mined, so a participant can chain several transactions before the next
//! block lands.

use crate::core::Transaction;
use crate::error::ValidationError;
use crate::ledger::{validate_transaction, AccountState, Ledger};
use crate::types::{Address, Hash};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy)]
struct PendingState {
    state: AccountState,
    queued: usize,
}

#[derive(Debug, Default)]
struct PoolInner {
    queue: VecDeque<Transaction>,
    pending: HashMap<Address, PendingState>,
}

/// FIFO transaction pool
#[derive(Debug)]
pub struct TxPool {
    ledger: Arc<Ledger>,
    inner: Mutex<PoolInner>,
}

impl TxPool {
    /// Create an empty pool validating against `ledger`
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// Validate `tx` and append it to the queue
    ///
    /// Participants are checked against their pending post-state if they have
    /// queued transactions, otherwise against the ledger.
    pub fn add(&self, tx: Transaction) -> std::result::Result<Hash, ValidationError> {
        let mut inner = self.inner.lock();

        validate_transaction(&tx, |address| {
            inner
                .pending
                .get(address)
                .map(|p| p.state)
                .unwrap_or_else(|| self.ledger.state(address))
        })?;

        let hash = tx.hash();
        for (i, address) in tx.addresses().into_iter().enumerate() {
            let entry = inner.pending.entry(address).or_insert(PendingState {
                state: AccountState::default(),
                queued: 0,
            });
            entry.state = AccountState {
                nonce: tx.nonces[i],
                balance: tx.values[i],
                last_tx: hash,
            };
            entry.queued += 1;
        }
        inner.queue.push_back(tx);

        debug!(tx = %hash.short(), depth = inner.queue.len(), "Added transaction to pool");
        Ok(hash)
    }

    /// Pop the oldest transaction
    ///
    /// Fails if the queue and the pending index disagree, which means the
    /// pool state can no longer be trusted.
    pub fn dequeue(&self) -> Result<Option<Transaction>> {
        let mut inner = self.inner.lock();
        let Some(tx) = inner.queue.pop_front() else {
            return Ok(None);
        };

        for address in tx.addresses() {
            match inner.pending.get_mut(&address) {
                Some(pending) if pending.queued > 0 => pending.queued -= 1,
                _ => {
                    return Err(Error::invalid_state(format!(
                        "Queued transaction {} has no pending entry for {}",
                        tx.hash().short(),
                        address
                    )))
                }
            }
        }

        trace!(tx = %tx.hash().short(), "Dequeued transaction");
        Ok(Some(tx))
    }

    /// Current queue depth
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// State of `address` once its queued transactions are applied
    pub fn pending_state(&self, address: &Address) -> AccountState {
        let inner = self.inner.lock();
        inner
            .pending
            .get(address)
            .map(|p| p.state)
            .unwrap_or_else(|| self.ledger.state(address))
    }

    /// Drop pending entries that have nothing left in the queue
    ///
    /// Run after a mined block is accepted or rejected so participants fall
    /// back to the ledger. Returns the number of entries dropped.
    pub fn reconcile(&self) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.pending.len();
        inner.pending.retain(|_, p| p.queued > 0);
        before - inner.pending.len()
    }
}
