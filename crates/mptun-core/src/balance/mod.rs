//! Balancer: `Elect(ctx, backends) -> Backend`. Two named variants
//! (`roundrobin`, `iphash`) are built through an explicit name->factory
//! mapping instead of a runtime type registry.
//!
//! Bypassed in the session path in favor of the consistent ring; used only
//! for the `TakeBackend` admin/elect operation on the Scheduler.

mod iphash;
mod roundrobin;

pub use iphash::IpHashBalancer;
pub use roundrobin::RoundRobinBalancer;

use crate::types::{Backend, Context};

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum BalanceError {
    #[error("can't elect backend, backends empty")]
    EmptyList,
    #[error("unknown balance strategy: {0:?}")]
    Unknown(String),
}

pub trait Balancer: Send + Sync {
    fn elect(&self, ctx: &dyn Context, backends: &[Backend]) -> Result<Backend, BalanceError>;
}

/// Construct a Balancer by name. Replaces the original's reflect-on-type
/// registry with an explicit match.
pub fn new(name: &str) -> Result<Box<dyn Balancer>, BalanceError> {
    match name {
        "roundrobin" => Ok(Box::new(RoundRobinBalancer::new())),
        "iphash" => Ok(Box::new(IpHashBalancer::new())),
        other => Err(BalanceError::Unknown(other.to_string())),
    }
}
