pub mod policy;
pub mod retry;

pub use policy::{ErrorPolicy, RetryPolicy};
pub use retry::RetryTracker;
