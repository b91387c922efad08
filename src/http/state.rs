use crate::audio::AudioDevices;
use crate::config::Config;
use crate::session::{Authorizer, SessionHandle};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Active voice sessions (session_id → handle)
    pub sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,

    pub config: Arc<Config>,

    /// Capture and output backends handed to each new session
    pub devices: Arc<dyn AudioDevices>,

    pub authorizer: Arc<dyn Authorizer>,
}

impl AppState {
    /// State with backends built from configuration
    pub fn new(config: Config) -> Self {
        let devices = Arc::new(config.devices());
        let authorizer = Arc::new(config.authorizer());
        Self::with_backends(config, devices, authorizer)
    }

    pub fn with_backends(
        config: Config,
        devices: Arc<dyn AudioDevices>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(config),
            devices,
            authorizer,
        }
    }

    pub async fn session(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(session_id).cloned()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
