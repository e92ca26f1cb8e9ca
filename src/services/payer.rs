//! Autonomous Payer: pays the configured price from the service's own custodial
//! wallet so an agent can be credited without holding funds itself.

use crate::error::AppError;
use crate::models::{format_native, TxHash, WalletAddress};
use crate::services::chain::ChainClient;
use crate::services::Analytics;
use anyhow::Context;
use ethers::{signers::LocalWallet, signers::Signer, types::U256};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// A confirmed, successful payment originated by this service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub tx_hash: TxHash,
    pub from: WalletAddress,
    pub to: WalletAddress,
    pub amount_wei: U256,
    pub amount_native: String,
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayFailure {
    /// Needs operator action: top up the custodial wallet.
    InsufficientFunds { balance: U256, required: U256 },
    /// Broadcast and mined but reverted. The hash is kept for inspection.
    OnChainRevert { tx_hash: TxHash },
}

impl PayFailure {
    pub fn code(&self) -> &'static str {
        match self {
            PayFailure::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            PayFailure::OnChainRevert { .. } => "ON_CHAIN_REVERT",
        }
    }

    pub fn message(&self) -> String {
        match self {
            PayFailure::InsufficientFunds { balance, required } => format!(
                "Agent wallet has insufficient funds. Balance: {} ETH, required: {} ETH (including gas buffer).",
                format_native(*balance),
                format_native(*required)
            ),
            PayFailure::OnChainRevert { tx_hash } => {
                format!("Auto-payment transaction {} reverted on-chain.", tx_hash)
            }
        }
    }

    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            PayFailure::OnChainRevert { tx_hash } => Some(*tx_hash),
            PayFailure::InsufficientFunds { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayOutcome {
    Paid(PaymentReceipt),
    Failed(PayFailure),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletInfo {
    pub address: WalletAddress,
    pub balance_native: String,
    pub balance_atomic: String,
    pub network: String,
}

pub struct AutoPayer {
    chain: Arc<dyn ChainClient>,
    wallet: LocalWallet,
    address: WalletAddress,
    recipient: WalletAddress,
    amount: U256,
    gas_buffer: U256,
    confirmations: usize,
    network: String,
    analytics: Arc<Analytics>,
    /// Held from balance check to confirmation so two payments never race for a nonce.
    send_lock: Mutex<()>,
}

pub struct AutoPayerSettings {
    pub recipient: WalletAddress,
    pub amount: U256,
    pub gas_buffer: U256,
    pub confirmations: usize,
    pub network: String,
}

impl AutoPayer {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        private_key: &str,
        settings: AutoPayerSettings,
        analytics: Arc<Analytics>,
    ) -> anyhow::Result<Self> {
        let wallet: LocalWallet = private_key
            .parse()
            .context("AGENT_PRIVATE_KEY is not a valid secp256k1 key")?;
        let address = WalletAddress::from(wallet.address());

        info!(
            payer = %address,
            recipient = %settings.recipient,
            amount = %format_native(settings.amount),
            "Autonomous payer initialized"
        );

        Ok(Self {
            chain,
            wallet,
            address,
            recipient: settings.recipient,
            amount: settings.amount,
            gas_buffer: settings.gas_buffer,
            confirmations: settings.confirmations.max(1),
            network: settings.network,
            analytics,
            send_lock: Mutex::new(()),
        })
    }

    pub fn address(&self) -> WalletAddress {
        self.address
    }

    /// Pays the configured price to the configured recipient and waits for it to be mined.
    pub async fn pay(&self) -> Result<PayOutcome, AppError> {
        let _guard = self.send_lock.lock().await;

        let required = self.amount.saturating_add(self.gas_buffer);
        let balance = self.chain.get_balance(self.address).await?;
        if balance < required {
            warn!(
                payer = %self.address,
                balance = %format_native(balance),
                required = %format_native(required),
                "Auto-pay refused: insufficient funds"
            );
            return Ok(PayOutcome::Failed(PayFailure::InsufficientFunds { balance, required }));
        }

        let tx_hash = self
            .chain
            .send_transfer(&self.wallet, self.recipient, self.amount)
            .await?;
        info!(tx_hash = %tx_hash, payer = %self.address, "Auto-payment broadcast");

        let receipt = self
            .chain
            .await_confirmations(tx_hash, self.confirmations)
            .await?;

        if !receipt.succeeded {
            warn!(tx_hash = %tx_hash, "Auto-payment reverted");
            return Ok(PayOutcome::Failed(PayFailure::OnChainRevert { tx_hash }));
        }

        let block_number = match receipt.block_number {
            Some(block) => block,
            None => self.chain.block_number().await?,
        };

        self.analytics.record_auto_payment();
        info!(tx_hash = %tx_hash, block = block_number, "Auto-payment confirmed");

        Ok(PayOutcome::Paid(PaymentReceipt {
            tx_hash,
            from: self.address,
            to: self.recipient,
            amount_wei: self.amount,
            amount_native: format_native(self.amount),
            block_number,
        }))
    }

    pub async fn wallet_info(&self) -> Result<WalletInfo, AppError> {
        let balance = self.chain.get_balance(self.address).await?;
        Ok(WalletInfo {
            address: self.address,
            balance_native: format_native(balance),
            balance_atomic: balance.to_string(),
            network: self.network.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::chain::testing::MockChain;
    use std::sync::atomic::Ordering;

    // Well-known development key; never funded outside local chains.
    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const KEY_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    fn recipient() -> WalletAddress {
        WalletAddress::parse(&format!("0x{}", "11".repeat(20))).unwrap()
    }

    fn payer(chain: Arc<MockChain>) -> AutoPayer {
        AutoPayer::new(
            chain,
            KEY,
            AutoPayerSettings {
                recipient: recipient(),
                amount: U256::exp10(15),
                gas_buffer: U256::exp10(14) * U256::from(5u64),
                confirmations: 1,
                network: "Sepolia Testnet".to_string(),
            },
            Arc::new(Analytics::new()),
        )
        .unwrap()
    }

    #[test]
    fn address_is_derived_from_key() {
        let payer = payer(Arc::new(MockChain::new()));
        assert_eq!(payer.address().to_string(), KEY_ADDRESS);
    }

    #[test]
    fn malformed_key_is_refused() {
        let result = AutoPayer::new(
            Arc::new(MockChain::new()),
            "0xnot-a-key",
            AutoPayerSettings {
                recipient: recipient(),
                amount: U256::one(),
                gas_buffer: U256::zero(),
                confirmations: 1,
                network: "Sepolia Testnet".to_string(),
            },
            Arc::new(Analytics::new()),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn balance_below_amount_plus_buffer_broadcasts_nothing() {
        let chain = Arc::new(MockChain::new());
        let payer = payer(chain.clone());
        // exactly one wei short of amount + buffer
        chain.set_balance(payer.address(), U256::exp10(15) + U256::exp10(14) * U256::from(5u64) - U256::one());

        let outcome = payer.pay().await.unwrap();
        assert!(matches!(
            outcome,
            PayOutcome::Failed(PayFailure::InsufficientFunds { .. })
        ));
        assert!(chain.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn funded_wallet_pays_configured_recipient() {
        let chain = Arc::new(MockChain::new());
        let payer = payer(chain.clone());
        chain.set_balance(payer.address(), U256::exp10(18));

        let PayOutcome::Paid(receipt) = payer.pay().await.unwrap() else {
            panic!("expected payment to succeed");
        };
        assert_eq!(receipt.from, payer.address());
        assert_eq!(receipt.to, recipient());
        assert_eq!(receipt.amount_native, "0.001");
        assert_eq!(receipt.block_number, 100);

        let sent = chain.sent.lock().unwrap();
        assert_eq!(sent.as_slice(), &[(payer.address(), recipient(), U256::exp10(15))]);
    }

    #[tokio::test]
    async fn reverted_payment_reports_its_hash() {
        let chain = Arc::new(MockChain::new());
        let payer = payer(chain.clone());
        chain.set_balance(payer.address(), U256::exp10(18));
        chain.revert_sends.store(true, Ordering::SeqCst);

        let PayOutcome::Failed(failure) = payer.pay().await.unwrap() else {
            panic!("expected revert");
        };
        assert_eq!(failure.code(), "ON_CHAIN_REVERT");
        assert!(failure.tx_hash().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_payments_are_serialized() {
        let chain = Arc::new(MockChain::new());
        let payer = Arc::new(payer(chain.clone()));
        chain.set_balance(payer.address(), U256::exp10(18));

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let payer = payer.clone();
                tokio::spawn(async move { payer.pay().await.unwrap() })
            })
            .collect();
        let outcomes = futures::future::join_all(tasks).await;

        let mut hashes: Vec<_> = outcomes
            .into_iter()
            .map(|r| match r.unwrap() {
                PayOutcome::Paid(receipt) => receipt.tx_hash,
                PayOutcome::Failed(f) => panic!("unexpected failure: {:?}", f),
            })
            .collect();
        hashes.sort_by_key(|h| h.to_string());
        hashes.dedup();
        assert_eq!(hashes.len(), 5);
    }

    #[tokio::test]
    async fn wallet_info_reports_balance() {
        let chain = Arc::new(MockChain::new());
        let payer = payer(chain.clone());
        chain.set_balance(payer.address(), U256::exp10(16) * U256::from(25u64));

        let info = payer.wallet_info().await.unwrap();
        assert_eq!(info.balance_native, "0.25");
        assert_eq!(info.balance_atomic, "250000000000000000");
    }

    #[tokio::test]
    async fn rpc_outage_surfaces_as_error() {
        let chain = Arc::new(MockChain::new());
        let payer = payer(chain.clone());
        chain.unavailable.store(true, Ordering::SeqCst);

        assert!(matches!(payer.pay().await, Err(AppError::Chain(_))));
    }
}
