use crate::cmd::{load_config, open_store};
use crate::output::{first_line, print_json, print_table};
use anyhow::Context;
use notesync_core::notes::parse_history;
use notesync_core::store::RecordStore;
use std::path::Path;

pub fn run(root: &Path, task_id: &str, raw: bool, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let store = open_store(&config)?;
    let record = store
        .find(task_id)
        .with_context(|| format!("failed to fetch '{task_id}'"))?;

    if raw {
        print!("{}", record.notes);
        return Ok(());
    }

    let history = parse_history(&record.notes);

    if json {
        return print_json(&serde_json::json!({
            "task_id": record.task_id,
            "record_id": record.id,
            "status": record.status,
            "history": history,
        }));
    }

    println!("Task:    {} ({})", record.task_id, record.id);
    println!(
        "Status:  {}",
        record.status.as_deref().unwrap_or("(none)")
    );
    println!("Entries: {}", history.entries.len());
    println!();

    if let Some(leading) = &history.leading {
        println!("{leading}");
        println!();
    }

    if history.entries.is_empty() {
        if history.leading.is_none() {
            println!("No notes for '{task_id}'.");
        }
        return Ok(());
    }

    let rows: Vec<Vec<String>> = history
        .entries
        .iter()
        .map(|e| {
            vec![
                format!("{} {}", e.status.icon(), e.status.canonical()),
                e.timestamp.format("%Y-%m-%d %H:%M UTC").to_string(),
                first_line(&e.content),
            ]
        })
        .collect();
    print_table(&["STATUS", "WHEN", "UPDATE"], rows);

    if let Some(trailing) = &history.trailing {
        println!();
        println!("Earlier notes:");
        println!("{trailing}");
    }
    Ok(())
}
