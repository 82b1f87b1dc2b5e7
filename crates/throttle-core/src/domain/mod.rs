//! Domain types for fixed-window rate limiting.

mod decision;
mod key;
mod limit;

pub use decision::{Decision, Denial};
pub use key::{ClientIdentity, RateLimitKey};
pub use limit::Limit;
