/// Resilience patterns shared across worker components: retry with
/// exponential backoff, and deadline enforcement for async operations.
pub mod retry;
pub mod timeout;

pub use retry::{with_retry, RetryConfig, RetryError};
pub use timeout::{with_timeout, TimeoutError};
