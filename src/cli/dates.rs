use std::fmt::Display;

use anyhow::Result;
use chrono::{DateTime, Local};
use chrono_english::parse_date_string;
use clap::{CommandFactory, ValueEnum};

use super::Args;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

pub const DATE_HELP: &str = "Examples are \"yesterday\", \"1 hour ago\", \"15/03/2025\", \"12:00 16/03/2025\", \"12 AM 16/03/2025\"";
pub const DATE_STYLE_HELP: &str =
    "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year";

/// Parses a human readable date relative to `now`, reporting failures as clap errors.
pub fn parse_date(value: &str, style: DateStyle, now: DateTime<Local>) -> Result<DateTime<Local>> {
    match parse_date_string(value, now, style.into()) {
        Ok(v) => Ok(v.with_timezone(&Local)),
        Err(e) => Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                format!("Failed to validate date {value:?} {e}"),
            )
            .into()),
    }
}

/// Epoch milliseconds of an optional date, `now` when missing.
pub fn parse_ms_or_now(value: Option<&str>, style: DateStyle, now: DateTime<Local>) -> Result<i64> {
    Ok(match value {
        Some(value) => parse_date(value, style, now)?,
        None => now,
    }
    .timestamp_millis())
}
