pub mod bonuses;
pub mod callbacks;
pub mod topup;

use crate::database::store::GatewayStore;
use crate::services::lifecycle::LifecycleEngine;
use std::sync::Arc;

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<LifecycleEngine>,
    pub store: Arc<dyn GatewayStore>,
}
