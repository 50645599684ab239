use std::fmt::Display;

use ansi_term::Style;
use anyhow::{bail, Result};
use chrono::Duration;
use clap::{Subcommand, ValueEnum};
use serde_json::{Map, Value};

use crate::{
    app::App,
    store::{Record, RecordType},
    utils::time::format_duration,
};

use super::filter::WhereClause;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecordKind {
    /// Tracked by the daemon whenever the program is in focus.
    Auto,
    /// Only holds intervals added by hand.
    Manual,
}

impl From<RecordKind> for RecordType {
    fn from(value: RecordKind) -> Self {
        match value {
            RecordKind::Auto => RecordType::Auto,
            RecordKind::Manual => RecordType::Manual,
        }
    }
}

impl Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(RecordType::from(*self).as_str())
    }
}

#[derive(Subcommand, Debug)]
pub enum RecordCommand {
    #[command(about = "Start tracking a program")]
    Add {
        name: String,
        #[arg(long = "type", default_value_t = RecordKind::Auto)]
        kind: RecordKind,
        #[arg(long, help = "Full path to the executable, for example /usr/bin/nvim")]
        path: Option<String>,
    },
    #[command(about = "List tracked programs")]
    List {
        #[command(flatten)]
        filter: WhereClause,
    },
    #[command(about = "Change a tracked program")]
    Update {
        id: u64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "type")]
        kind: Option<RecordKind>,
        #[arg(long, help = "New executable path. Pass an empty string to stop tracking")]
        path: Option<String>,
    },
    #[command(about = "Delete a tracked program together with its time")]
    Delete { id: u64 },
}

pub fn process_record_command(app: &App, command: RecordCommand) -> Result<()> {
    match command {
        RecordCommand::Add { name, kind, path } => {
            let path = path.unwrap_or_default();
            ensure_available(app, &path)?;
            if kind == RecordKind::Auto && path.is_empty() {
                eprintln!("Record has no executable path, it won't be tracked automatically");
            }
            let id = app.create_record(&name, kind.into(), &path)?;
            println!("Created record {id}");
        }
        RecordCommand::List { filter } => {
            let records = app.list_records(filter.predicate()?.as_ref())?;
            print_records(&records);
        }
        RecordCommand::Update {
            id,
            name,
            kind,
            path,
        } => {
            let mut changes = Map::new();
            if let Some(name) = name {
                changes.insert("name".into(), Value::String(name));
            }
            if let Some(kind) = kind {
                changes.insert("type".into(), Value::String(kind.to_string()));
            }
            if let Some(path) = path {
                if app.record(id)?.executable_path != path {
                    ensure_available(app, &path)?;
                }
                changes.insert("executablePath".into(), Value::String(path));
            }
            if changes.is_empty() {
                bail!("Nothing to update, pass --name, --type or --path");
            }
            app.update_record(id, &changes)?;
            println!("Updated record {id}");
        }
        RecordCommand::Delete { id } => {
            app.delete_record(id)?;
            println!("Deleted record {id}");
        }
    }
    Ok(())
}

/// Two records can't share one executable.
fn ensure_available(app: &App, path: &str) -> Result<()> {
    if path.is_empty() {
        return Ok(());
    }
    if let Some(record) = app.find_record_by_path(path)? {
        bail!("{path} is already tracked by record {}", record.id);
    }
    Ok(())
}

fn print_records(records: &[Record]) {
    if records.is_empty() {
        println!("No records");
        return;
    }
    println!(
        "{}",
        Style::new()
            .bold()
            .paint(format!("{:>4}\t{:<6}\t{:>10}\t{:<16}\t{}", "id", "type", "total", "name", "path"))
    );
    for record in records {
        println!(
            "{:>4}\t{:<6}\t{:>10}\t{:<16}\t{}",
            record.id,
            record.kind.as_str(),
            format_duration(Duration::milliseconds(record.total_time_ms)),
            record.name,
            record.executable_path
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;

    use super::{process_record_command, RecordCommand, RecordKind};
    use crate::{
        app::App,
        store::{RecordType, Store},
    };

    fn add(app: &App, name: &str, path: Option<&str>) -> Result<()> {
        process_record_command(
            app,
            RecordCommand::Add {
                name: name.into(),
                kind: RecordKind::Auto,
                path: path.map(String::from),
            },
        )
    }

    #[test]
    fn test_add_and_update() -> Result<()> {
        let app = App::new(Arc::new(Store::open_in_memory()?));
        add(&app, "nvim", Some("/usr/bin/nvim"))?;
        process_record_command(
            &app,
            RecordCommand::Update {
                id: 1,
                name: Some("editor".into()),
                kind: Some(RecordKind::Manual),
                path: None,
            },
        )?;

        let record = app.record(1)?;
        assert_eq!(record.name, "editor");
        assert_eq!(record.kind, RecordType::Manual);
        assert_eq!(record.executable_path, "/usr/bin/nvim");
        Ok(())
    }

    #[test]
    fn test_duplicate_path_is_rejected() -> Result<()> {
        let app = App::new(Arc::new(Store::open_in_memory()?));
        add(&app, "nvim", Some("/usr/bin/nvim"))?;
        assert!(add(&app, "again", Some("/usr/bin/nvim")).is_err());
        // Records without a path never clash.
        add(&app, "first", None)?;
        add(&app, "second", None)?;
        assert_eq!(app.list_records(None)?.len(), 3);
        Ok(())
    }

    #[test]
    fn test_empty_update_fails() -> Result<()> {
        let app = App::new(Arc::new(Store::open_in_memory()?));
        add(&app, "nvim", Some("/usr/bin/nvim"))?;
        let result = process_record_command(
            &app,
            RecordCommand::Update {
                id: 1,
                name: None,
                kind: None,
                path: None,
            },
        );
        assert!(result.is_err());
        Ok(())
    }
}
