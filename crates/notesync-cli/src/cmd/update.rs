use crate::cmd::{load_config, open_store};
use crate::output::print_json;
use anyhow::Context;
use notesync_core::io::read_text_arg;
use notesync_core::status::Status;
use notesync_core::sync::{UpdateRequest, Updater};
use std::path::Path;

pub struct UpdateArgs {
    pub task_id: String,
    pub status: String,
    pub content: Vec<String>,
    pub dry_run: bool,
    pub keep_status: bool,
    pub strict: bool,
}

/// Join positional words; a lone `-` or `@path` is read instead.
pub fn resolve_content(words: &[String]) -> anyhow::Result<String> {
    let text = match words {
        [single] if single == "-" || single.starts_with('@') => {
            read_text_arg(single).with_context(|| format!("failed to read content from '{single}'"))?
        }
        _ => words.join(" "),
    };
    Ok(text.trim_end_matches(['\n', '\r']).to_string())
}

pub fn run(root: &Path, args: UpdateArgs, json: bool) -> anyhow::Result<()> {
    let status = if args.strict {
        args.status.parse::<Status>()?
    } else {
        Status::parse(&args.status)
    };
    let content = resolve_content(&args.content)?;

    let config = load_config(root)?;
    let store = open_store(&config)?;
    let updater = Updater::new(store, config.retry.clone()).dry_run(args.dry_run);

    let request = UpdateRequest {
        task_id: args.task_id.clone(),
        status,
        content,
        set_status: !args.keep_status,
    };
    let outcome = updater
        .apply(&request)
        .with_context(|| format!("failed to update '{}'", args.task_id))?;

    if json {
        return print_json(&outcome);
    }

    if outcome.written {
        println!(
            "Updated {} ({}): {}",
            outcome.task_id,
            outcome.record_id,
            outcome.entry.header()
        );
    } else {
        println!("Dry run: notes for {} would become:", outcome.task_id);
        println!();
        print!("{}", outcome.notes);
    }
    Ok(())
}
