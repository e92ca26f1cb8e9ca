pub mod access_gate;
pub mod rate_limit;

pub use access_gate::{access_gate_middleware, AccessDecision, AccessGate, PaidWallet, WALLET_HEADER};
pub use rate_limit::{rate_limit_middleware, ClientRateLimiter};
