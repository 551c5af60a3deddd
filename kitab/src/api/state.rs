use std::sync::Arc;

use crate::chat::ChatRelay;
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub relay: ChatRelay,
}

impl AppState {
    pub fn new(config: Config, relay: ChatRelay) -> Self {
        Self {
            config: Arc::new(config),
            relay,
        }
    }
}
