//! Print knowledge graph statistics.

use super::open_store;
use crate::config::Config;
use crate::Result;

pub async fn run(config: &Config) -> Result<()> {
    let stats = open_store(config)?.stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
