pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http_server;
pub mod models;
pub mod session;
pub mod upload;

#[cfg(test)]
mod testing;

use std::sync::Arc;

pub use config::Config;
use dispatch::Dispatcher;
use session::{SessionFactory, SessionManager};

pub const DEFAULT_PORT: u16 = 3001;

/// The running control panel: configuration, the WhatsApp session and the
/// dispatcher that fans sends out over it.
#[derive(Clone)]
pub struct Panel {
    pub config: Arc<Config>,
    pub sessions: SessionManager,
    pub dispatcher: Arc<Dispatcher>,
}

impl Panel {
    pub fn new(config: Config, factory: Arc<dyn SessionFactory>) -> Self {
        let sessions = SessionManager::new(factory, config.auth_dir.clone());
        let dispatcher = Arc::new(Dispatcher::from_config(&config));
        Self {
            config: Arc::new(config),
            sessions,
            dispatcher,
        }
    }

    /// Brings up the WhatsApp session and serves HTTP until ctrl-c.
    pub async fn start(&self) -> crate::error::Result<()> {
        self.sessions.start().await;

        let served = self.start_http_server().await;
        self.sessions.shutdown().await;
        served
    }
}
