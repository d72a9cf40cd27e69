use crate::cmd::{load_config, open_store};
use crate::output::{print_json, print_table};
use anyhow::Context;
use notesync_core::manifest::Manifest;
use notesync_core::sync::Updater;
use std::path::Path;

pub fn run(root: &Path, manifest_path: &Path, dry_run: bool, json: bool) -> anyhow::Result<()> {
    let manifest = Manifest::load(manifest_path)
        .with_context(|| format!("failed to read manifest {}", manifest_path.display()))?;

    let config = load_config(root)?;
    let store = open_store(&config)?;
    let report = Updater::new(store, config.retry.clone())
        .dry_run(dry_run)
        .apply_all(&manifest);

    if json {
        print_json(&report)?;
    } else if report.results.is_empty() {
        println!("No updates in {}.", manifest_path.display());
    } else {
        let rows: Vec<Vec<String>> = report
            .results
            .iter()
            .map(|r| {
                let result = match (&r.error, r.written) {
                    (Some(e), _) => format!("failed: {e}"),
                    (None, true) => "updated".to_string(),
                    (None, false) => "dry run".to_string(),
                };
                vec![
                    r.task_id.clone(),
                    format!("{} {}", r.status.icon(), r.status.canonical()),
                    result,
                ]
            })
            .collect();
        print_table(&["TASK", "STATUS", "RESULT"], rows);
        println!();
        println!("{}", report.summary());
    }

    if !report.is_success() {
        anyhow::bail!("{} of {} updates failed", report.failed(), report.results.len());
    }
    Ok(())
}
