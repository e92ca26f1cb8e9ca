pub mod amount;
pub mod identifiers;
pub mod payment;
pub mod response;

pub use amount::*;
pub use identifiers::*;
pub use payment::*;
pub use response::*;
