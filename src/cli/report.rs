use ansi_term::Style;
use anyhow::Result;
use chrono::{DateTime, Duration, Local};
use clap::Parser;
use now::DateTimeNow;

use crate::{
    app::App,
    store::{Operator, Predicate, Record},
    utils::{
        percentage::{share_of, Percentage},
        time::{format_duration, next_day_start},
    },
};

use super::dates::{parse_date, DateStyle, DATE_HELP, DATE_STYLE_HELP};

#[derive(Debug, Parser)]
pub struct ReportCommand {
    #[arg(long = "start", short, help = format!("Start of the range. {DATE_HELP}"))]
    start_date: Option<String>,
    #[arg(long = "end", short, help = format!("End of the range. {DATE_HELP}"))]
    end_date: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = DATE_STYLE_HELP)]
    date_style: DateStyle,
    #[arg(
        long = "days",
        default_value_t = false,
        help = "Take inputs as whole days. For example if start and end are both 15/03/2025 this option allows to extract the whole day"
    )]
    treat_as_days: bool,
    #[arg(short = 'p', long = "percentage", help = "Filter programs to have at least specified percentage", default_value_t = Percentage::ZERO)]
    min_percentage: Percentage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Usage {
    pub record: Record,
    pub duration_ms: i64,
}

/// Time spent per record, longest first. Without a range the rolling totals are used, with one
/// every interval is clamped to it.
pub fn collect_usage(app: &App, range: Option<(i64, i64)>) -> Result<Vec<Usage>> {
    let mut usage = Vec::new();
    for record in app.list_records(None)? {
        let duration_ms = match range {
            None => record.total_time_ms,
            Some((start, end)) => {
                let overlapping = Predicate::new("end", start, Operator::Gte);
                app.list_times(record.id, Some(&overlapping))?
                    .iter()
                    .map(|time| (time.end.min(end) - time.start.max(start)).max(0))
                    .sum()
            }
        };
        usage.push(Usage {
            record,
            duration_ms,
        });
    }
    usage.sort_by(|a, b| {
        b.duration_ms
            .cmp(&a.duration_ms)
            .then(a.record.id.cmp(&b.record.id))
    });
    Ok(usage)
}

/// Command to process `report`. Prints the time spent in every tracked program.
pub fn process_report_command(
    app: &App,
    ReportCommand {
        start_date,
        end_date,
        date_style,
        treat_as_days,
        min_percentage,
    }: ReportCommand,
) -> Result<()> {
    let range = parse_range(start_date, end_date, date_style, treat_as_days, Local::now())?;
    let usage = collect_usage(app, range.map(|(start, end)| {
        (start.timestamp_millis(), end.timestamp_millis())
    }))?;
    let whole = usage.iter().map(|v| v.duration_ms).sum::<i64>();

    if let Some((start, end)) = range {
        println!(
            "{}",
            Style::new().bold().paint(format!(
                "{} - {}",
                start.format("%x %H:%M"),
                end.format("%x %H:%M")
            ))
        );
    }

    let mut printed = 0;
    for entry in usage {
        let share = share_of(entry.duration_ms, whole);
        if entry.duration_ms == 0 || share < min_percentage {
            continue;
        }
        println!(
            "{:>5}\t{:>10}\t{}\t{}",
            share.to_string(),
            format_duration(Duration::milliseconds(entry.duration_ms)),
            entry.record.name,
            Style::new().dimmed().paint(entry.record.executable_path)
        );
        printed += 1;
    }
    if printed == 0 {
        println!("Nothing tracked yet");
    } else {
        println!(
            "{}",
            Style::new()
                .bold()
                .paint(format!("Total {}", format_duration(Duration::milliseconds(whole))))
        );
    }
    Ok(())
}

/// No dates means all time. A missing start means the beginning of tracking, a missing end
/// means now.
fn parse_range(
    start_date: Option<String>,
    end_date: Option<String>,
    date_style: DateStyle,
    treat_as_days: bool,
    now: DateTime<Local>,
) -> Result<Option<(DateTime<Local>, DateTime<Local>)>> {
    if start_date.is_none() && end_date.is_none() {
        return Ok(None);
    }
    let mut start = match start_date {
        Some(v) => parse_date(&v, date_style, now)?,
        None => DateTime::UNIX_EPOCH.with_timezone(&Local),
    };
    let mut end = match end_date {
        Some(v) => parse_date(&v, date_style, now)?,
        None => now,
    };
    if treat_as_days {
        start = start.beginning_of_day();
        end = next_day_start(end);
    }
    Ok(Some((start, end)))
}
