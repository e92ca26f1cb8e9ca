pub mod agent;
pub mod health;
pub mod payment;
pub mod stats;

pub use agent::*;
pub use health::*;
pub use payment::*;
pub use stats::*;
