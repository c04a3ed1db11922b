use std::collections::HashMap;
use std::sync::Mutex;

use super::{BalanceError, Balancer};
use crate::types::{Backend, Context};

/// Round-robin balancer. Remembers a per-context cursor, keyed by
/// `ctx.string()`. Cursor state lives on `self`, not a module-level static,
/// so distinct `RoundRobinBalancer` instances never share state.
#[derive(Default)]
pub struct RoundRobinBalancer {
    cursors: Mutex<HashMap<String, usize>>,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Balancer for RoundRobinBalancer {
    fn elect(&self, ctx: &dyn Context, backends: &[Backend]) -> Result<Backend, BalanceError> {
        if backends.is_empty() {
            return Err(BalanceError::EmptyList);
        }

        let mut cursors = self.cursors.lock().expect("cursor mutex poisoned");
        let cursor = cursors.entry(ctx.string()).or_insert(0);
        if *cursor >= backends.len() {
            *cursor = 0;
        }

        let backend = backends[*cursor].clone();
        *cursor += 1;
        Ok(backend)
    }
}
