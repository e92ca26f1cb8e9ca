use crate::config::PaymentTerms;
use crate::models::{format_native, TxHash, WalletAddress};
use chrono::{DateTime, Utc};
use ethers::types::U256;
use serde::{Deserialize, Serialize};

/// How a credit came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CreditSource {
    /// A client-submitted transaction that passed every verification check.
    Verified,
    /// A payment the service originated from its own wallet.
    AutoPay,
}

impl CreditSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditSource::Verified => "verified",
            CreditSource::AutoPay => "autoPay",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "verified" => Some(CreditSource::Verified),
            "autoPay" => Some(CreditSource::AutoPay),
            _ => None,
        }
    }
}

/// One unit of paid access. Never stored unverified; `used` flips once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCredit {
    pub wallet_address: WalletAddress,
    pub transaction_hash: TxHash,
    pub amount_native: String,
    /// Wei, as an exact decimal integer string.
    pub amount_atomic: String,
    pub block_number: u64,
    pub verified: bool,
    pub used: bool,
    pub source: CreditSource,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
}

impl PaymentCredit {
    pub fn issue(
        wallet_address: WalletAddress,
        transaction_hash: TxHash,
        amount_wei: U256,
        block_number: u64,
        source: CreditSource,
    ) -> Self {
        Self {
            wallet_address,
            transaction_hash,
            amount_native: format_native(amount_wei),
            amount_atomic: amount_wei.to_string(),
            block_number,
            verified: true,
            used: false,
            source,
            created_at: Utc::now(),
            used_at: None,
        }
    }

    /// Sort key for FIFO consumption.
    pub fn created_at_micros(&self) -> i64 {
        self.created_at.timestamp_micros()
    }

    pub fn is_claimable(&self) -> bool {
        self.verified && !self.used
    }
}

/// Machine-readable 402 challenge telling a client what to pay and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub status: String,
    pub message: String,
    pub required_amount_native: String,
    pub required_amount_atomic: String,
    pub destination_address: WalletAddress,
    pub network: String,
    pub chain_id: u64,
    pub asset: String,
    pub instructions: Vec<String>,
}

impl Challenge {
    pub fn from_terms(terms: &PaymentTerms) -> Self {
        Self {
            status: "payment_required".to_string(),
            message: format!(
                "Each query requires a payment of {} {}. Send it to the destination address.",
                terms.required_native, terms.asset
            ),
            required_amount_native: terms.required_native.clone(),
            required_amount_atomic: terms.required_atomic.to_string(),
            destination_address: terms.receiver,
            network: terms.network.clone(),
            chain_id: terms.chain_id,
            asset: terms.asset.clone(),
            instructions: vec![
                "1. Send the specified amount to the destination address".to_string(),
                "2. Wait for transaction confirmation".to_string(),
                "3. Call /api/verify-payment with the transaction hash".to_string(),
                "4. Retry the original request".to_string(),
            ],
        }
    }
}
