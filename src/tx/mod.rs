//! Transaction lifecycle: gas resolution, building with fee-model fallback,
//! submission with retries, and confirmation tracking

pub mod builder;
pub mod confirm;
pub mod gas;
pub mod sender;

pub use builder::TransactionBuilder;
pub use confirm::ConfirmationTracker;
pub use gas::GasResolver;
pub use sender::{Broadcaster, RetrySubmitter};
