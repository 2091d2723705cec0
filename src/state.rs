use std::sync::Arc;

use crate::services::engine::SignalEngine;
use crate::services::signal_state::SharedSignalState;

#[derive(Clone)]
pub struct AppState {
    pub signal_state: SharedSignalState,
    pub engine: Arc<SignalEngine>,
}
