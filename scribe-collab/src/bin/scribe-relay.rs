//! Scribe relay - room server for collaborative editing.
//!
//! Configuration comes from the environment (`SCRIBE_RELAY_ADDR`,
//! `SCRIBE_RELAY_CAPACITY`, `SCRIBE_RELAY_STORAGE`); a first positional
//! argument overrides the bind address.

use log::info;
use scribe_collab::relay::{RelayConfig, RelayServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    let mut config = RelayConfig::from_env();
    if let Some(addr) = std::env::args().nth(1) {
        config.bind_addr = addr;
    }

    info!(
        "Starting Scribe relay on {} (storage: {})",
        config.bind_addr,
        config
            .storage_path
            .as_ref()
            .map_or_else(|| "memory".to_string(), |p| p.display().to_string())
    );

    let server = RelayServer::new(config)?;
    server.run().await
}
