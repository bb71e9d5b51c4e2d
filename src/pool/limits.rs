use super::route::RouteKey;
use std::collections::HashMap;

pub const DEFAULT_MAX_TOTAL: usize = 200;
pub const DEFAULT_MAX_PER_ROUTE: usize = 5;

/// Global and per-route connection caps.
#[derive(Debug, Clone)]
pub struct PoolLimits {
    pub max_total: usize,
    pub default_max_per_route: usize,
    per_route: HashMap<RouteKey, usize>,
}

impl PoolLimits {
    pub fn new(max_total: usize, default_max_per_route: usize) -> Self {
        Self {
            max_total,
            default_max_per_route,
            per_route: HashMap::new(),
        }
    }

    /// Effective cap for a route: its override, else the default.
    pub fn max_for(&self, route: &RouteKey) -> usize {
        self.per_route
            .get(route)
            .copied()
            .unwrap_or(self.default_max_per_route)
    }

    pub fn set_max_for(&mut self, route: RouteKey, max: usize) {
        self.per_route.insert(route, max);
    }

    pub fn overrides(&self) -> impl Iterator<Item = (&RouteKey, &usize)> {
        self.per_route.iter()
    }
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOTAL, DEFAULT_MAX_PER_ROUTE)
    }
}
