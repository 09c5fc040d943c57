//! Push Layer
//!
//! Delivers labeled scrape batches to a Prometheus Pushgateway.
//!
//! - [`Push`]: Destination trait used by the scrape scheduler
//! - [`GatewayPusher`]: HTTP implementation with bounded retry
//! - [`RetryPolicy`]: Exponential backoff for transport failures and 5xx

mod gateway;
mod retry;
mod traits;

pub use gateway::{GatewayPusher, PushMethod, TEXT_CONTENT_TYPE};
pub use retry::{DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF, RetryPolicy};
pub use traits::{Push, PushError, PushReport};
