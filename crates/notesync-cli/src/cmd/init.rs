use anyhow::Context;
use notesync_core::config::{Config, API_TOKEN_ENV};
use notesync_core::paths;
use std::path::Path;

pub fn run(root: &Path, base_id: &str, table: &str, force: bool) -> anyhow::Result<()> {
    println!("Initializing notesync in: {}", root.display());

    let config_path = paths::config_path(root);
    if config_path.exists() && !force {
        println!("  exists:  {}", paths::CONFIG_FILE);
        return Ok(());
    }

    let cfg = Config::new(base_id, table);
    cfg.save(root).context("failed to write config.yaml")?;
    println!("  created: {}", paths::CONFIG_FILE);

    if base_id.is_empty() {
        println!("  next:    set store.base_id in {}", paths::CONFIG_FILE);
    }
    println!("  next:    export {API_TOKEN_ENV}=<token>");
    Ok(())
}
