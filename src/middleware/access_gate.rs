//! Access Gate: consumes one credit per admitted request, before the handler runs.

use crate::config::PaymentTerms;
use crate::error::AppError;
use crate::models::{Challenge, PaymentCredit, WalletAddress};
use crate::services::{Analytics, CreditLedger};
use axum::{extract::Request, middleware::Next, response::Response};
use std::sync::Arc;

pub const WALLET_HEADER: &str = "x-wallet-address";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// The claimed credit, already marked used.
    Admit(PaymentCredit),
    Deny(Challenge),
}

/// The wallet an admitted request was paid for, available to handlers as an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaidWallet(pub WalletAddress);

pub struct AccessGate {
    ledger: Arc<dyn CreditLedger>,
    terms: Arc<PaymentTerms>,
    analytics: Arc<Analytics>,
}

impl AccessGate {
    pub fn new(
        ledger: Arc<dyn CreditLedger>,
        terms: Arc<PaymentTerms>,
        analytics: Arc<Analytics>,
    ) -> Self {
        Self {
            ledger,
            terms,
            analytics,
        }
    }

    /// Malformed input is an `Err` (400); absence of credit is `Deny`, not an error.
    pub async fn check(&self, wallet: &str) -> Result<AccessDecision, AppError> {
        let wallet = WalletAddress::parse(wallet)?;

        // find and mark used in one ledger operation; a lost race simply finds nothing
        match self.ledger.claim_oldest(&wallet).await? {
            Some(credit) => {
                self.analytics.record_claim();
                tracing::info!(
                    wallet = %wallet,
                    tx_hash = %credit.transaction_hash,
                    "Credit claimed, access granted"
                );
                Ok(AccessDecision::Admit(credit))
            }
            None => {
                self.analytics.record_denial();
                tracing::debug!(wallet = %wallet, "No unused credit, payment required");
                Ok(AccessDecision::Deny(Challenge::from_terms(&self.terms)))
            }
        }
    }
}

// Axum middleware function
pub async fn access_gate_middleware(
    gate: Arc<AccessGate>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let wallet = request
        .headers()
        .get(WALLET_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::InvalidInput(format!("{} header is required", WALLET_HEADER)))?
        .to_string();

    match gate.check(&wallet).await? {
        AccessDecision::Admit(credit) => {
            request
                .extensions_mut()
                .insert(PaidWallet(credit.wallet_address));
            Ok(next.run(request).await)
        }
        AccessDecision::Deny(challenge) => Err(AppError::PaymentRequired(Box::new(challenge))),
    }
}
