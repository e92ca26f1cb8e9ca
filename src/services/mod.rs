pub mod agent;
pub mod analytics;
pub mod chain;
pub mod ledger;
pub mod payer;
pub mod verifier;

pub use agent::{AgentAnswer, AgentBackend};
pub use analytics::Analytics;
pub use chain::{ChainClient, ChainError, EthereumChain};
pub use ledger::{CreditLedger, LedgerError, MemoryLedger, RedisLedger};
pub use payer::{AutoPayer, AutoPayerSettings, PayFailure, PayOutcome, PaymentReceipt, WalletInfo};
pub use verifier::{PaymentVerifier, Rejection, RejectionReason, VerificationOutcome};
