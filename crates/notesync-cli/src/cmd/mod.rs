pub mod config;
pub mod init;
pub mod show;
pub mod status;
pub mod sync;
pub mod update;

use anyhow::Context;
use notesync_core::config::Config;
use notesync_core::store::HttpRecordStore;
use std::path::Path;

/// Load the config file and apply environment overrides. This is the only
/// place credentials are read.
pub fn load_config(root: &Path) -> anyhow::Result<Config> {
    let config = Config::load(root).context("failed to load config")?;
    Ok(config.with_env())
}

pub fn open_store(config: &Config) -> anyhow::Result<HttpRecordStore> {
    HttpRecordStore::new(&config.store).context("failed to set up record store client")
}
