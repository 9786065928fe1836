//! Application state.

use std::sync::Arc;

use crate::pool::PoolService;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<PoolService>,
}

impl AppState {
    pub fn new(pool: Arc<PoolService>) -> Self {
        Self { pool }
    }
}
