//! Verification Engine: decides whether a submitted transaction is a valid,
//! fresh and sufficient payment, and mints a credit when it is.
//!
//! Checks run cheapest first. The local duplicate lookup happens before any RPC
//! so repeated submissions of a spent hash cost nothing upstream.

use crate::config::PaymentTerms;
use crate::error::AppError;
use crate::models::{format_native, CreditSource, PaymentCredit, TxHash, WalletAddress};
use crate::services::chain::ChainClient;
use crate::services::ledger::{CreditLedger, LedgerError};
use crate::services::payer::PaymentReceipt;
use crate::services::Analytics;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    AlreadyUsed,
    NotFound,
    WrongRecipient,
    InsufficientAmount,
    NotMined,
    Reverted,
    SenderMismatch,
}

impl RejectionReason {
    /// Chain state may still change; the same hash can be resubmitted later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RejectionReason::NotFound | RejectionReason::NotMined)
    }

    /// Outcomes that depend only on the transaction, never on who submits it.
    fn is_cacheable(&self) -> bool {
        matches!(
            self,
            RejectionReason::WrongRecipient
                | RejectionReason::InsufficientAmount
                | RejectionReason::Reverted
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectionReason,
    pub message: String,
}

impl Rejection {
    fn new(reason: RejectionReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified(PaymentCredit),
    Rejected(Rejection),
}

impl VerificationOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationOutcome::Verified(_))
    }

    pub fn rejection_reason(&self) -> Option<RejectionReason> {
        match self {
            VerificationOutcome::Rejected(r) => Some(r.reason),
            VerificationOutcome::Verified(_) => None,
        }
    }
}

pub struct PaymentVerifier {
    chain: Arc<dyn ChainClient>,
    ledger: Arc<dyn CreditLedger>,
    terms: Arc<PaymentTerms>,
    analytics: Arc<Analytics>,
    rejections: Cache<TxHash, Rejection>,
}

impl PaymentVerifier {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        ledger: Arc<dyn CreditLedger>,
        terms: Arc<PaymentTerms>,
        analytics: Arc<Analytics>,
        rejection_ttl: Duration,
    ) -> Self {
        let rejections = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(rejection_ttl)
            .build();

        Self {
            chain,
            ledger,
            terms,
            analytics,
            rejections,
        }
    }

    /// Verifies a client-submitted payment claimed to come from `claimed_sender`.
    ///
    /// Business failures come back as `Rejected`; only store or RPC faults are `Err`.
    pub async fn verify(
        &self,
        tx_hash: TxHash,
        claimed_sender: WalletAddress,
    ) -> Result<VerificationOutcome, AppError> {
        let outcome = self.run_checks(tx_hash, claimed_sender).await?;

        match &outcome {
            VerificationOutcome::Verified(credit) => {
                info!(
                    wallet = %credit.wallet_address,
                    tx_hash = %credit.transaction_hash,
                    amount = %credit.amount_native,
                    block = credit.block_number,
                    "Payment verified, credit issued"
                );
            }
            VerificationOutcome::Rejected(rejection) => {
                self.analytics.record_rejection();
                warn!(
                    tx_hash = %tx_hash,
                    wallet = %claimed_sender,
                    reason = ?rejection.reason,
                    "Payment verification rejected: {}",
                    rejection.message
                );
            }
        }

        Ok(outcome)
    }

    async fn run_checks(
        &self,
        tx_hash: TxHash,
        claimed_sender: WalletAddress,
    ) -> Result<VerificationOutcome, AppError> {
        use RejectionReason::*;

        // 1. duplicate
        if self.ledger.contains_transaction(&tx_hash).await? {
            return rejected(AlreadyUsed, "This transaction has already been used for payment.");
        }

        if let Some(cached) = self.rejections.get(&tx_hash).await {
            return Ok(VerificationOutcome::Rejected(cached));
        }

        // 2. existence
        let Some(tx) = self.chain.get_transaction(tx_hash).await? else {
            return rejected(
                NotFound,
                format!(
                    "Transaction not found on {}. It may still be pending, try again in a few seconds.",
                    self.terms.network
                ),
            );
        };

        // 3. recipient
        if tx.to != Some(self.terms.receiver) {
            let actual = tx
                .to
                .map_or_else(|| "contract creation".to_string(), |a| a.to_string());
            let message = format!(
                "Transaction recipient ({}) does not match the payment address.",
                actual
            );
            return self.remember(tx_hash, WrongRecipient, message).await;
        }

        // 4. sufficiency, exact integer comparison in wei
        if tx.value < self.terms.required_atomic {
            let message = format!(
                "Insufficient payment. Required: {} {}, received: {} {}.",
                self.terms.required_native,
                self.terms.asset,
                format_native(tx.value),
                self.terms.asset
            );
            return self.remember(tx_hash, InsufficientAmount, message).await;
        }

        // 5. finality
        let Some(receipt) = self.chain.get_receipt(tx_hash).await? else {
            return rejected(NotMined, "Transaction has not been mined yet. Please wait and retry.");
        };

        // 6. status
        if !receipt.succeeded {
            return self
                .remember(tx_hash, Reverted, "Transaction was reverted on-chain.".to_string())
                .await;
        }

        // 7. sender
        if tx.from != claimed_sender {
            return rejected(
                SenderMismatch,
                "Transaction sender does not match the provided wallet address.",
            );
        }

        let Some(block_number) = receipt.block_number.or(tx.block_number) else {
            return rejected(NotMined, "Transaction has no block number yet. Please wait and retry.");
        };

        let credit = PaymentCredit::issue(
            claimed_sender,
            tx_hash,
            tx.value,
            block_number,
            CreditSource::Verified,
        );
        self.persist(credit).await
    }

    /// Trusted issuance: credits `beneficiary` for a payment the service itself
    /// originated. Sender matching is skipped; the payer's key is the authority.
    /// Recipient, amount and uniqueness are still enforced.
    pub async fn issue_trusted(
        &self,
        beneficiary: WalletAddress,
        payment: &PaymentReceipt,
    ) -> Result<VerificationOutcome, AppError> {
        if payment.to != self.terms.receiver {
            return Ok(VerificationOutcome::Rejected(Rejection::new(
                RejectionReason::WrongRecipient,
                format!(
                    "Auto-payment went to {}, not the receiving address {}.",
                    payment.to, self.terms.receiver
                ),
            )));
        }
        if payment.amount_wei < self.terms.required_atomic {
            return Ok(VerificationOutcome::Rejected(Rejection::new(
                RejectionReason::InsufficientAmount,
                format!(
                    "Auto-payment of {} {} is below the required {} {}.",
                    payment.amount_native, self.terms.asset, self.terms.required_native, self.terms.asset
                ),
            )));
        }

        let credit = PaymentCredit::issue(
            beneficiary,
            payment.tx_hash,
            payment.amount_wei,
            payment.block_number,
            CreditSource::AutoPay,
        );
        let outcome = self.persist(credit).await?;

        if let VerificationOutcome::Verified(credit) = &outcome {
            info!(
                wallet = %credit.wallet_address,
                tx_hash = %credit.transaction_hash,
                payer = %payment.from,
                "Trusted credit issued from auto-payment"
            );
        }
        Ok(outcome)
    }

    /// The insert is the arbiter: a concurrent verifier that lost the race sees
    /// `DuplicateKey`, which is reported as `AlreadyUsed`.
    async fn persist(&self, credit: PaymentCredit) -> Result<VerificationOutcome, AppError> {
        match self.ledger.insert(&credit).await {
            Ok(()) => {
                self.analytics.record_credit_issued();
                Ok(VerificationOutcome::Verified(credit))
            }
            Err(LedgerError::DuplicateKey(hash)) => {
                tracing::debug!(tx_hash = %hash, "Lost insert race for transaction");
                Ok(VerificationOutcome::Rejected(Rejection::new(
                    RejectionReason::AlreadyUsed,
                    "This transaction has already been used for payment.",
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remember(
        &self,
        tx_hash: TxHash,
        reason: RejectionReason,
        message: String,
    ) -> Result<VerificationOutcome, AppError> {
        let rejection = Rejection::new(reason, message);
        if reason.is_cacheable() {
            self.rejections.insert(tx_hash, rejection.clone()).await;
        }
        Ok(VerificationOutcome::Rejected(rejection))
    }
}

fn rejected(
    reason: RejectionReason,
    message: impl Into<String>,
) -> Result<VerificationOutcome, AppError> {
    Ok(VerificationOutcome::Rejected(Rejection::new(reason, message)))
}
