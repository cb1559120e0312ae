//! Account ledger
//!
//! Maps addresses to their latest nonce, balance and last transaction. The
//! ledger only changes by applying validated transactions, a whole block at a
//! time.

use crate::core::Transaction;
use crate::error::ValidationError;
use crate::types::{Address, Hash};
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// State tracked for one address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountState {
    /// Number of transactions the address took part in
    pub nonce: u64,
    /// Current balance
    pub balance: u64,
    /// Hash of the last transaction, zero if none
    pub last_tx: Hash,
}

/// Public view of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account address
    pub address: Address,
    /// Current nonce
    pub nonce: u64,
    /// Current balance
    pub balance: u64,
}

/// One ledger entry as exchanged during peer sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    /// Account address
    pub address: Address,
    /// Account state
    pub state: AccountState,
    /// The transaction `state.last_tx` refers to, if any
    pub transaction: Option<Transaction>,
}

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<Address, AccountState>,
    transactions: HashMap<Hash, Transaction>,
}

/// Shared account ledger
#[derive(Debug, Default)]
pub struct Ledger {
    inner: RwLock<LedgerState>,
}

impl Ledger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger with funded accounts
    pub fn with_allocations(allocations: impl IntoIterator<Item = (Address, u64)>) -> Self {
        let accounts = allocations
            .into_iter()
            .map(|(address, balance)| {
                (
                    address,
                    AccountState {
                        balance,
                        ..AccountState::default()
                    },
                )
            })
            .collect();

        Self {
            inner: RwLock::new(LedgerState {
                accounts,
                transactions: HashMap::new(),
            }),
        }
    }

    /// State of `address`, the zero state if unknown
    pub fn state(&self, address: &Address) -> AccountState {
        self.inner
            .read()
            .accounts
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    /// Account view of `address`, if it has ever been touched
    pub fn account(&self, address: &Address) -> Option<Account> {
        self.inner.read().accounts.get(address).map(|state| Account {
            address: *address,
            nonce: state.nonce,
            balance: state.balance,
        })
    }

    /// Number of known accounts
    pub fn len(&self) -> usize {
        self.inner.read().accounts.len()
    }

    /// Whether no account is known
    pub fn is_empty(&self) -> bool {
        self.inner.read().accounts.is_empty()
    }

    /// Sum of all balances
    pub fn total_balance(&self) -> u128 {
        self.inner
            .read()
            .accounts
            .values()
            .map(|state| u128::from(state.balance))
            .sum()
    }

    /// Commitment over all accounts, ordered by address
    pub fn state_root(&self) -> Hash {
        let inner = self.inner.read();
        let ordered: BTreeMap<_, _> = inner.accounts.iter().collect();
        let mut buf = Vec::with_capacity(ordered.len() * 68);
        for (address, state) in ordered {
            buf.extend_from_slice(address.as_bytes());
            buf.extend_from_slice(&state.nonce.to_le_bytes());
            buf.extend_from_slice(&state.balance.to_le_bytes());
            buf.extend_from_slice(state.last_tx.as_bytes());
        }
        Hash::digest(&buf)
    }

    /// Validate a transaction against the current ledger
    pub fn check(&self, tx: &Transaction) -> std::result::Result<(), ValidationError> {
        let inner = self.inner.read();
        validate_transaction(tx, |address| {
            inner.accounts.get(address).copied().unwrap_or_default()
        })
    }

    /// Apply a block's transactions in order, all or nothing
    pub fn apply_block(&self, transactions: &[Transaction]) -> std::result::Result<(), ValidationError> {
        let mut inner = self.inner.write();
        let mut staged: HashMap<Address, AccountState> = HashMap::new();

        for tx in transactions {
            validate_transaction(tx, |address| {
                staged
                    .get(address)
                    .or_else(|| inner.accounts.get(address))
                    .copied()
                    .unwrap_or_default()
            })?;
            stage_post_state(&mut staged, tx);
        }

        inner.accounts.extend(staged);
        for tx in transactions {
            inner.transactions.insert(tx.hash(), tx.clone());
        }

        if !transactions.is_empty() {
            debug!(count = transactions.len(), "Applied transactions to ledger");
        }
        Ok(())
    }

    /// All entries ordered by address
    pub fn snapshot(&self) -> Vec<StateEntry> {
        let inner = self.inner.read();
        let ordered: BTreeMap<_, _> = inner.accounts.iter().collect();
        ordered
            .into_iter()
            .map(|(address, state)| StateEntry {
                address: *address,
                state: *state,
                transaction: inner.transactions.get(&state.last_tx).cloned(),
            })
            .collect()
    }

    /// Replace the ledger with entries received from a peer
    ///
    /// Each entry's transaction must hash to its `last_tx` and must carry
    /// the claimed post-state for the address.
    pub fn import(&self, entries: Vec<StateEntry>) -> Result<()> {
        let mut state = LedgerState::default();

        for entry in entries {
            match &entry.transaction {
                Some(tx) => {
                    tx.check_well_formed()?;
                    if tx.hash() != entry.state.last_tx {
                        return Err(Error::protocol(format!(
                            "State entry for {} references a different transaction",
                            entry.address
                        )));
                    }
                    let index = tx
                        .addresses()
                        .iter()
                        .position(|a| *a == entry.address)
                        .ok_or_else(|| {
                            Error::protocol(format!("{} is not part of its last transaction", entry.address))
                        })?;
                    if tx.nonces[index] != entry.state.nonce || tx.values[index] != entry.state.balance {
                        return Err(Error::protocol(format!(
                            "State entry for {} disagrees with its last transaction",
                            entry.address
                        )));
                    }
                    state.transactions.insert(entry.state.last_tx, tx.clone());
                }
                None if !entry.state.last_tx.is_zero() => {
                    return Err(Error::protocol(format!(
                        "State entry for {} is missing its last transaction",
                        entry.address
                    )));
                }
                None => {}
            }
            state.accounts.insert(entry.address, entry.state);
        }

        *self.inner.write() = state;
        Ok(())
    }
}

/// Write a transaction's post-state into `states`
pub(crate) fn stage_post_state(states: &mut HashMap<Address, AccountState>, tx: &Transaction) {
    let hash = tx.hash();
    for (i, address) in tx.addresses().into_iter().enumerate() {
        states.insert(
            address,
            AccountState {
                nonce: tx.nonces[i],
                balance: tx.values[i],
                last_tx: hash,
            },
        );
    }
}

/// Check a transaction against participant pre-states supplied by `lookup`
///
/// Checks, in order: shape, nonce continuity, previous transaction hashes,
/// balance conservation, signatures.
pub fn validate_transaction<F>(tx: &Transaction, lookup: F) -> std::result::Result<(), ValidationError>
where
    F: Fn(&Address) -> AccountState,
{
    tx.check_well_formed()?;

    let prior: Vec<AccountState> = tx.addresses().iter().map(|a| lookup(a)).collect();

    for (i, state) in prior.iter().enumerate() {
        if state.nonce.checked_add(1) != Some(tx.nonces[i]) {
            return Err(ValidationError::IncorrectNonce);
        }
    }

    for (i, state) in prior.iter().enumerate() {
        if state.last_tx != tx.prev_tx_hashes[i] {
            return Err(ValidationError::IncorrectPrevState);
        }
    }

    let pre_sum: u128 = prior.iter().map(|s| u128::from(s.balance)).sum();
    if pre_sum != tx.post_balance_sum() {
        return Err(ValidationError::IncorrectBalance);
    }

    tx.verify_signatures()
}
