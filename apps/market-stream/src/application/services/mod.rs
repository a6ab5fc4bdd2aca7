//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `MarketStream`: builds sessions and routers from configuration and
//!   hands out consumer bindings
//! - `ConsumerBinding`: one consumer's subscriptions, callbacks and reads

mod binding;
mod stream;

pub use binding::{BindingError, ConsumerBinding, UpdateStream, group_requests};
pub use stream::MarketStream;
