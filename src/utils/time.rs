use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone, Utc};

/// Converts stored epoch milliseconds into local time for display.
pub fn ms_to_local(ms: i64) -> Option<DateTime<Local>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|v| v.with_timezone(&Local))
}

/// Returns start of the next day.
pub fn next_day_start<Tz: TimeZone>(date: DateTime<Tz>) -> DateTime<Tz> {
    let next = date + Duration::days(1);
    next.with_time(NaiveTime::MIN).earliest().unwrap_or(next)
}

pub fn format_duration(v: Duration) -> String {
    if v.num_hours() > 0 {
        format!(
            "{}h{}m{}s",
            v.num_hours(),
            v.num_minutes() % 60,
            v.num_seconds() % 60
        )
    } else if v.num_minutes() > 0 {
        format!("{}m{}s", v.num_minutes() % 60, v.num_seconds() % 60)
    } else {
        format!("{}s", v.num_seconds() % 60)
    }
}
