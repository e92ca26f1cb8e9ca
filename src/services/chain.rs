//! Chain Client: a thin JSON-RPC wrapper over the payment network.
//!
//! "Not found" is an ordinary `None` for lookups since it usually means the
//! transaction has not propagated yet. Only transport failures are errors.

use crate::models::{TxHash, WalletAddress};
use async_trait::async_trait;
use ethers::{
    prelude::*,
    providers::{Http, Provider, ProviderError},
    types::{TransactionReceipt, TransactionRequest, U256},
};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("RPC unavailable: {0}")]
    Unavailable(String),

    #[error("Transaction not found: {0}")]
    NotFound(String),

    #[error("Broadcast rejected: {0}")]
    Broadcast(String),
}

impl From<ProviderError> for ChainError {
    fn from(err: ProviderError) -> Self {
        ChainError::Unavailable(err.to_string())
    }
}

/// The fields of a transaction the verifier reasons about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub hash: TxHash,
    pub from: WalletAddress,
    /// `None` for contract creation.
    pub to: Option<WalletAddress>,
    pub value: U256,
    pub block_number: Option<u64>,
}

impl From<Transaction> for ChainTransaction {
    fn from(tx: Transaction) -> Self {
        Self {
            hash: tx.hash.into(),
            from: tx.from.into(),
            to: tx.to.map(Into::into),
            value: tx.value,
            block_number: tx.block_number.map(|n| n.as_u64()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReceipt {
    pub transaction_hash: TxHash,
    pub block_number: Option<u64>,
    pub succeeded: bool,
}

impl From<TransactionReceipt> for ChainReceipt {
    fn from(receipt: TransactionReceipt) -> Self {
        Self {
            transaction_hash: receipt.transaction_hash.into(),
            block_number: receipt.block_number.map(|n| n.as_u64()),
            succeeded: receipt.status == Some(1.into()),
        }
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_transaction(&self, hash: TxHash) -> Result<Option<ChainTransaction>, ChainError>;

    async fn get_receipt(&self, hash: TxHash) -> Result<Option<ChainReceipt>, ChainError>;

    async fn get_balance(&self, address: WalletAddress) -> Result<U256, ChainError>;

    /// Signs a plain value transfer with `wallet` and broadcasts it.
    async fn send_transfer(
        &self,
        wallet: &LocalWallet,
        to: WalletAddress,
        value: U256,
    ) -> Result<TxHash, ChainError>;

    /// Waits until `hash` has `confirmations` blocks on top of it.
    async fn await_confirmations(
        &self,
        hash: TxHash,
        confirmations: usize,
    ) -> Result<ChainReceipt, ChainError>;

    async fn block_number(&self) -> Result<u64, ChainError>;
}

pub struct EthereumChain {
    provider: Provider<Http>,
    chain_id: u64,
    confirmation_timeout: Duration,
}

impl EthereumChain {
    pub fn new(rpc_url: &str, chain_id: u64, confirmation_timeout: Duration) -> anyhow::Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)?;

        Ok(Self {
            provider,
            chain_id,
            confirmation_timeout,
        })
    }
}

#[async_trait]
impl ChainClient for EthereumChain {
    async fn get_transaction(&self, hash: TxHash) -> Result<Option<ChainTransaction>, ChainError> {
        let tx = self.provider.get_transaction(hash.as_h256()).await?;
        Ok(tx.map(ChainTransaction::from))
    }

    async fn get_receipt(&self, hash: TxHash) -> Result<Option<ChainReceipt>, ChainError> {
        let receipt = self.provider.get_transaction_receipt(hash.as_h256()).await?;
        Ok(receipt.map(ChainReceipt::from))
    }

    async fn get_balance(&self, address: WalletAddress) -> Result<U256, ChainError> {
        Ok(self.provider.get_balance(address.as_address(), None).await?)
    }

    async fn send_transfer(
        &self,
        wallet: &LocalWallet,
        to: WalletAddress,
        value: U256,
    ) -> Result<TxHash, ChainError> {
        let signer = wallet.clone().with_chain_id(self.chain_id);
        let client = SignerMiddleware::new(self.provider.clone(), signer);

        let request = TransactionRequest::new()
            .from(wallet.address())
            .to(to.as_address())
            .value(value);

        let pending = client
            .send_transaction(request, None)
            .await
            .map_err(|e| ChainError::Broadcast(e.to_string()))?;

        Ok(pending.tx_hash().into())
    }

    async fn await_confirmations(
        &self,
        hash: TxHash,
        confirmations: usize,
    ) -> Result<ChainReceipt, ChainError> {
        let pending = PendingTransaction::new(hash.as_h256(), &self.provider)
            .confirmations(confirmations);

        let receipt = tokio::time::timeout(self.confirmation_timeout, pending)
            .await
            .map_err(|_| {
                ChainError::Unavailable(format!(
                    "no confirmation for {} within {:?}",
                    hash, self.confirmation_timeout
                ))
            })??;

        receipt
            .map(ChainReceipt::from)
            .ok_or_else(|| ChainError::NotFound(hash.to_string()))
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }
}
