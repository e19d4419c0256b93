use once_cell::sync::OnceCell;
use tracing::warn;

use super::{config::configuration::Configuration, logging::tracing::tracing_subscribe};

static LOGGER_INSTALLED: OnceCell<bool> = OnceCell::new();

#[derive(Debug, Clone)]
pub struct Application {
    pub config: Configuration,
}

impl Application {
    pub async fn initialize(config: Configuration) -> Self {
        Self { config }
    }

    pub fn install_logging(config: &Configuration) {
        if let Some(true) = LOGGER_INSTALLED.get() {
            return;
        }

        if !tracing_subscribe(config) {
            warn!("failed to install tracing subscriber, one is probably already installed");
        }

        LOGGER_INSTALLED.set(true).unwrap();
    }
}
