use ansi_term::Style;
use anyhow::{bail, Result};
use chrono::{Duration, Local};
use clap::Subcommand;
use serde_json::{Map, Value};

use crate::{
    app::App,
    store::Time,
    utils::time::{format_duration, ms_to_local},
};

use super::{
    dates::{parse_date, parse_ms_or_now, DateStyle, DATE_HELP, DATE_STYLE_HELP},
    filter::WhereClause,
};

#[derive(Subcommand, Debug)]
pub enum TimeCommand {
    #[command(about = "Add time spent in a program by hand")]
    Add {
        record: u64,
        #[arg(long, help = format!("Start of the interval. {DATE_HELP}"))]
        start: String,
        #[arg(long, help = format!("End of the interval, now by default. {DATE_HELP}"))]
        end: Option<String>,
        #[arg(long, default_value_t = DateStyle::Uk, help = DATE_STYLE_HELP)]
        date_style: DateStyle,
    },
    #[command(about = "List time intervals of a program")]
    List {
        record: u64,
        #[command(flatten)]
        filter: WhereClause,
    },
    #[command(about = "Move the start or end of an interval")]
    Update {
        record: u64,
        id: u64,
        #[arg(long, help = format!("New start. {DATE_HELP}"))]
        start: Option<String>,
        #[arg(long, help = format!("New end. {DATE_HELP}"))]
        end: Option<String>,
        #[arg(long, default_value_t = DateStyle::Uk, help = DATE_STYLE_HELP)]
        date_style: DateStyle,
    },
    #[command(about = "Delete an interval")]
    Delete { record: u64, id: u64 },
}

pub fn process_time_command(app: &App, command: TimeCommand) -> Result<()> {
    let now = Local::now();
    match command {
        TimeCommand::Add {
            record,
            start,
            end,
            date_style,
        } => {
            let start = parse_date(&start, date_style, now)?.timestamp_millis();
            let end = parse_ms_or_now(end.as_deref(), date_style, now)?;
            let id = app.create_time(record, start, end)?;
            println!("Created interval {id} of record {record}");
        }
        TimeCommand::List { record, filter } => {
            let times = app.list_times(record, filter.predicate()?.as_ref())?;
            print_times(&times);
        }
        TimeCommand::Update {
            record,
            id,
            start,
            end,
            date_style,
        } => {
            let mut changes = Map::new();
            if let Some(start) = start {
                let start = parse_date(&start, date_style, now)?.timestamp_millis();
                changes.insert("start".into(), Value::from(start));
            }
            if let Some(end) = end {
                let end = parse_date(&end, date_style, now)?.timestamp_millis();
                changes.insert("end".into(), Value::from(end));
            }
            if changes.is_empty() {
                bail!("Nothing to update, pass --start or --end");
            }
            app.update_time(record, id, &changes)?;
            println!("Updated interval {id} of record {record}");
        }
        TimeCommand::Delete { record, id } => {
            app.delete_time(record, id)?;
            println!("Deleted interval {id} of record {record}");
        }
    }
    Ok(())
}

fn format_ms(ms: i64) -> String {
    ms_to_local(ms)
        .map(|v| v.format("%x %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn print_times(times: &[Time]) {
    if times.is_empty() {
        println!("No intervals");
        return;
    }
    println!(
        "{}",
        Style::new()
            .bold()
            .paint(format!("{:>4}\t{:<17}\t{:<17}\t{}", "id", "start", "end", "duration"))
    );
    for time in times {
        println!(
            "{:>4}\t{:<17}\t{:<17}\t{}",
            time.id,
            format_ms(time.start),
            format_ms(time.end),
            format_duration(Duration::milliseconds(time.duration_ms()))
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use chrono::{Duration, Local};

    use super::{process_time_command, TimeCommand};
    use crate::{
        app::App,
        cli::dates::DateStyle,
        store::{RecordType, Store, StoreError},
    };

    fn app() -> Result<App> {
        let app = App::new(Arc::new(Store::open_in_memory()?));
        app.create_record("demo", RecordType::Manual, "")?;
        Ok(app)
    }

    #[test]
    fn test_add_relative_interval() -> Result<()> {
        let app = app()?;
        process_time_command(
            &app,
            TimeCommand::Add {
                record: 1,
                start: "2 hours ago".into(),
                end: Some("1 hour ago".into()),
                date_style: DateStyle::Uk,
            },
        )?;
        let times = app.list_times(1, None)?;
        assert_eq!(times.len(), 1);
        assert_eq!(times[0].duration_ms(), 3_600_000);
        assert_eq!(app.record(1)?.total_time_ms, 3_600_000);
        Ok(())
    }

    #[test]
    fn test_reversed_interval_is_rejected() -> Result<()> {
        let app = app()?;
        let result = process_time_command(
            &app,
            TimeCommand::Add {
                record: 1,
                start: "1 hour ago".into(),
                end: Some("2 hours ago".into()),
                date_style: DateStyle::Uk,
            },
        );
        let error = result.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<StoreError>(),
            Some(StoreError::InvalidInterval { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_update_and_delete() -> Result<()> {
        let app = app()?;
        let start = (Local::now() - Duration::hours(2)).timestamp_millis();
        let id = app.create_time(1, start, start + 1_000)?;
        process_time_command(
            &app,
            TimeCommand::Update {
                record: 1,
                id,
                start: None,
                end: Some("1 hour ago".into()),
                date_style: DateStyle::Uk,
            },
        )?;
        let time = app.list_times(1, None)?.remove(0);
        assert!(time.duration_ms() > 1_000);
        assert_eq!(app.record(1)?.total_time_ms, time.duration_ms());

        process_time_command(&app, TimeCommand::Delete { record: 1, id })?;
        assert!(app.list_times(1, None)?.is_empty());
        assert_eq!(app.record(1)?.total_time_ms, 0);
        Ok(())
    }
}
