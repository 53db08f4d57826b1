use std::sync::Arc;

use wabulk::{bridge::BridgeFactory, error::Result, Config, Panel};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::new()?;
    let factory = Arc::new(BridgeFactory::from_config(&config)?);

    Panel::new(config, factory).start().await
}
