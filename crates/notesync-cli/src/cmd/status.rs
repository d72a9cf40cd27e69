use crate::output::{print_json, print_table};
use clap::Subcommand;
use notesync_core::status::Status;

#[derive(Subcommand)]
pub enum StatusSubcommand {
    /// List canonical statuses and the text accepted for each
    List,
    /// Show how a status text is recorded
    Resolve {
        text: Vec<String>,
        /// Fail instead of defaulting unknown text to planned
        #[arg(long)]
        strict: bool,
    },
}

pub fn run(subcmd: StatusSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        StatusSubcommand::List => list(json),
        StatusSubcommand::Resolve { text, strict } => resolve(&text.join(" "), strict, json),
    }
}

fn list(json: bool) -> anyhow::Result<()> {
    if json {
        let items: Vec<serde_json::Value> = Status::all()
            .iter()
            .map(|s| {
                serde_json::json!({
                    "status": s,
                    "icon": s.icon(),
                    "canonical": s.canonical(),
                    "field_value": s.field_value(),
                    "synonyms": s.synonyms().collect::<Vec<_>>(),
                })
            })
            .collect();
        return print_json(&items);
    }

    let rows: Vec<Vec<String>> = Status::all()
        .iter()
        .map(|s| {
            vec![
                s.icon().to_string(),
                s.canonical().to_string(),
                s.synonyms().collect::<Vec<_>>().join(", "),
            ]
        })
        .collect();
    print_table(&["", "STATUS", "ACCEPTS"], rows);
    println!();
    println!("Anything else is recorded as PLANNED.");
    Ok(())
}

fn resolve(text: &str, strict: bool, json: bool) -> anyhow::Result<()> {
    let known = Status::lookup(text);
    let status = if strict {
        text.parse::<Status>()?
    } else {
        Status::parse(text)
    };

    if json {
        return print_json(&serde_json::json!({
            "input": text,
            "status": status,
            "canonical": status.canonical(),
            "defaulted": known.is_none(),
        }));
    }

    print!("{} {}", status.icon(), status.canonical());
    if known.is_none() {
        print!(" (unrecognized '{text}', defaulted)");
    }
    println!();
    Ok(())
}
