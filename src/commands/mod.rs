//! Command implementations
//!
//! Each module corresponds to a subcommand in the CLI.

pub mod ingest;
pub mod prune;
pub mod query;
pub mod serve;
pub mod stats;

use std::sync::Arc;

use crate::config::Config;
use crate::knowledge::KnowledgeStore;
use crate::Result;

/// Open the configured knowledge store.
pub fn open_store(config: &Config) -> Result<Arc<KnowledgeStore>> {
    Ok(Arc::new(KnowledgeStore::from_config(config)?))
}
