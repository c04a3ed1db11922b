//! Consistent hash ring: maps an arbitrary key to one of N server ids with
//! minimal remapping under membership change.
//!
//! `R = 20` virtual points per server, placed at `hash32("<server>|<i>")`.
//! `Get` hashes the key and returns the server owning the first point at or
//! after the key's hash, wrapping around. Hash is FNV-1a/32 — stable across
//! `Set` calls and processes since it's a pure byte fold with no seed; any
//! stable 32-bit hash would satisfy the contract, this one is picked to
//! match the FNV family already used by [`crate::jumphash`].

use std::collections::BTreeMap;

/// Virtual replicas placed per server.
const REPLICAS: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum RingError {
    #[error("ring is empty")]
    Empty,
}

/// Sorted `(hash, server)` points. Immutable between `set` calls.
#[derive(Debug, Default)]
pub struct Consistent {
    points: BTreeMap<u32, String>,
}

impl Consistent {
    pub fn new() -> Self {
        Self { points: BTreeMap::new() }
    }

    /// Total replacement of ring membership — not incremental.
    pub fn set(&mut self, servers: &[String]) {
        let mut points = BTreeMap::new();
        for server in servers {
            for replica in 0..REPLICAS {
                let key = format!("{server}|{replica}");
                points.insert(fnv1a32(key.as_bytes()), server.clone());
            }
        }
        self.points = points;
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns the server owning the first point whose hash is >= the key's
    /// hash, wrapping around to the first point if none is found.
    pub fn get(&self, key: &str) -> Result<String, RingError> {
        if self.points.is_empty() {
            return Err(RingError::Empty);
        }
        let h = fnv1a32(key.as_bytes());
        let server = self
            .points
            .range(h..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, server)| server.clone())
            .expect("checked non-empty above");
        Ok(server)
    }
}

/// 32-bit FNV-1a.
pub fn fnv1a32(data: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c9dc5;
    const PRIME: u32 = 0x01000193;
    let mut hash = OFFSET_BASIS;
    for &b in data {
        hash ^= b as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
