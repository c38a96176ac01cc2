//! Drop all stored graph data.

use tracing::info;

use super::open_store;
use crate::config::Config;
use crate::Result;

pub async fn run(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    store.prune().await?;
    info!("Knowledge store pruned");
    println!("Knowledge graph data removed.");
    Ok(())
}
