use super::{BalanceError, Balancer};
use crate::types::{Backend, Context};

/// Deterministic hash of `ctx.ip()` bytes modulo `backends.len()`. Stable
/// only while the backend count is stable.
#[derive(Default)]
pub struct IpHashBalancer;

impl IpHashBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl Balancer for IpHashBalancer {
    fn elect(&self, ctx: &dyn Context, backends: &[Backend]) -> Result<Backend, BalanceError> {
        if backends.is_empty() {
            return Err(BalanceError::EmptyList);
        }

        let hash = match ctx.ip() {
            std::net::IpAddr::V4(v4) => crate::ring::fnv1a32(&v4.octets()),
            std::net::IpAddr::V6(v6) => crate::ring::fnv1a32(&v6.octets()),
        };

        let idx = (hash as usize) % backends.len();
        Ok(backends[idx].clone())
    }
}
