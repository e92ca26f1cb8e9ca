use super::{CreditLedger, LedgerError};
use crate::models::{PaymentCredit, TxHash, WalletAddress};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    credits: HashMap<TxHash, PaymentCredit>,
    /// Unused credit hashes per wallet, ordered by `created_at`.
    unused: HashMap<WalletAddress, VecDeque<TxHash>>,
}

/// Process-local ledger for development and tests. Not durable.
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.credits.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CreditLedger for MemoryLedger {
    async fn insert(&self, credit: &PaymentCredit) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        if inner.credits.contains_key(&credit.transaction_hash) {
            return Err(LedgerError::DuplicateKey(credit.transaction_hash));
        }

        if credit.is_claimable() {
            let created_at = credit.created_at;
            let Inner { credits, unused } = &mut *inner;
            let queue = unused.entry(credit.wallet_address).or_default();
            let position = queue
                .iter()
                .position(|h| credits.get(h).map_or(false, |c| c.created_at > created_at))
                .unwrap_or(queue.len());
            queue.insert(position, credit.transaction_hash);
        }

        inner
            .credits
            .insert(credit.transaction_hash, credit.clone());
        Ok(())
    }

    async fn contains_transaction(&self, hash: &TxHash) -> Result<bool, LedgerError> {
        Ok(self.inner.lock().await.credits.contains_key(hash))
    }

    async fn has_unused(&self, wallet: &WalletAddress) -> Result<bool, LedgerError> {
        Ok(self
            .inner
            .lock()
            .await
            .unused
            .get(wallet)
            .map_or(false, |q| !q.is_empty()))
    }

    async fn claim_oldest(&self, wallet: &WalletAddress) -> Result<Option<PaymentCredit>, LedgerError> {
        let mut inner = self.inner.lock().await;
        let Inner { credits, unused } = &mut *inner;

        let Some(queue) = unused.get_mut(wallet) else {
            return Ok(None);
        };
        let Some(hash) = queue.pop_front() else {
            return Ok(None);
        };
        if queue.is_empty() {
            unused.remove(wallet);
        }

        let credit = credits
            .get_mut(&hash)
            .ok_or_else(|| LedgerError::Corrupt(format!("queued credit {} has no record", hash)))?;
        credit.used = true;
        credit.used_at = Some(Utc::now());
        Ok(Some(credit.clone()))
    }

    async fn get(&self, hash: &TxHash) -> Result<Option<PaymentCredit>, LedgerError> {
        Ok(self.inner.lock().await.credits.get(hash).cloned())
    }

    async fn ping(&self) -> bool {
        true
    }
}
