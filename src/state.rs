//! Shared application state handed to every request handler.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::upstream::SessionOptions;
use crate::tools::ToolRegistry;

/// State shared across handlers. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// Tools advertised to and invocable by the model
    pub tools: Arc<ToolRegistry>,
}

impl AppState {
    pub fn new(config: AppConfig, tools: ToolRegistry) -> Self {
        Self {
            config: Arc::new(config),
            tools: Arc::new(tools),
        }
    }

    /// Session options for a new session, with the registered tools attached.
    pub fn session_options(&self) -> SessionOptions {
        self.config.session.to_options(self.tools.descriptors())
    }
}
