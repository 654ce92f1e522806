use std::path::Path;
use std::sync::Arc;

use crate::app::error::Result;
use crate::config::Config;
use crate::domain::RequestDefaults;
use crate::transport::{HttpTransport, Transport};

pub struct AppContext {
    pub config: Config,
    pub transport: Arc<dyn Transport + Send + Sync>,
}

impl AppContext {
    /// Load configuration (from `config_path`, or the default location) and
    /// build the HTTP transport from it.
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let transport: Arc<dyn Transport + Send + Sync> =
            Arc::new(HttpTransport::new(&config.request_defaults())?);

        Ok(Self { config, transport })
    }

    /// Override the configured worker count, e.g. from the command line.
    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        if let Some(workers) = workers {
            self.config.http.workers = workers.max(1);
        }
        self
    }

    pub fn workers(&self) -> usize {
        self.config.http.workers
    }

    pub fn request_defaults(&self) -> RequestDefaults {
        self.config.request_defaults()
    }
}
