//! Credit Ledger: the only shared mutable state in the payment core.
//!
//! Both backends give the same two guarantees:
//! - `insert` is the arbiter of transaction-hash uniqueness (no check-then-insert),
//! - `claim_oldest` finds and marks a credit used in one atomic step, oldest first.

pub mod memory;
pub mod redis_ledger;

pub use self::memory::MemoryLedger;
pub use self::redis_ledger::RedisLedger;

use crate::models::{PaymentCredit, TxHash, WalletAddress};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Duplicate transaction hash: {0}")]
    DuplicateKey(TxHash),

    #[error("Ledger store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt ledger record: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Stores a new credit. Fails with `DuplicateKey` if its hash is already known.
    async fn insert(&self, credit: &PaymentCredit) -> Result<(), LedgerError>;

    async fn contains_transaction(&self, hash: &TxHash) -> Result<bool, LedgerError>;

    /// True when the wallet holds at least one verified, unused credit. Does not consume.
    async fn has_unused(&self, wallet: &WalletAddress) -> Result<bool, LedgerError>;

    /// Atomically marks the wallet's oldest unused credit as used and returns it.
    async fn claim_oldest(&self, wallet: &WalletAddress) -> Result<Option<PaymentCredit>, LedgerError>;

    async fn get(&self, hash: &TxHash) -> Result<Option<PaymentCredit>, LedgerError>;

    async fn ping(&self) -> bool;
}
