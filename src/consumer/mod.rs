//! Consumer side: issue requests through the live pool
//!
//! - `workload` - the request made through a chosen proxy
//! - `retry` - select, validate, use, evict and retry per unit of work

pub mod retry;
pub mod workload;

pub use retry::{ExhaustReason, ProxyConsumer, RetryPolicy, UnitOutcome, UnitState};
pub use workload::{FetchOutcome, HttpWorkload, Workload};
