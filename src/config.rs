use std::{path::PathBuf, time::Duration};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{error::Result, DEFAULT_PORT};

pub const CONFIG_FILE: &str = "wabulk.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub port: u16,
    /// Where `/upload-media` stores files; also served under `/uploads`.
    pub upload_dir: PathBuf,
    /// Base directory media paths in send requests are resolved against.
    pub media_root: PathBuf,
    /// Session credentials written by the gateway; wiped on every teardown.
    pub auth_dir: PathBuf,
    pub country_code: String,
    pub bridge_url: String,
    pub session_name: String,
    pub bridge_poll_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            upload_dir: PathBuf::from("uploads"),
            media_root: PathBuf::from("."),
            auth_dir: PathBuf::from(".wwebjs_auth"),
            country_code: "20".to_string(),
            bridge_url: "http://127.0.0.1:3000".to_string(),
            session_name: "default".to_string(),
            bridge_poll_ms: 1000,
        }
    }
}

impl Config {
    /// Defaults, then `wabulk.toml` if present, then `WABULK_*` variables, then
    /// a bare `PORT`.
    pub fn new() -> Result<Self> {
        Self::from_figment(Figment::new().merge(Toml::file(CONFIG_FILE)))
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(figment)
            .merge(Env::prefixed("WABULK_"))
            .merge(Env::raw().only(&["PORT"]))
            .extract()
            .map_err(Box::new)?; // boxed because the error size from figment is large

        log::info!("using config: {config:?}");
        Ok(config)
    }

    pub fn bridge_poll_interval(&self) -> Duration {
        Duration::from_millis(self.bridge_poll_ms.max(50))
    }
}
