use serde::{Deserialize, Serialize};

/// Point-in-time pool counters, for one route or the whole pool.
///
/// Counters are read under one lock but may be stale as soon as they are
/// returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Connections currently checked out by callers
    pub leased: usize,
    /// Callers blocked waiting for a lease
    pub pending: usize,
    /// Idle connections kept open for reuse
    pub available: usize,
    /// Effective cap for this scope
    pub max: usize,
}

impl PoolStats {
    pub fn new(leased: usize, pending: usize, available: usize, max: usize) -> Self {
        Self {
            leased,
            pending,
            available,
            max,
        }
    }
}
