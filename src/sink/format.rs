//! Line layout used by the console and file sinks.

use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;

use crate::record::LogRecord;

const TIMESTAMP_FORMAT: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
);

/// Render a Unix timestamp in milliseconds as `YYYY-MM-DD HH:MM:SS.mmm` (UTC).
///
/// Out-of-range timestamps fall back to the raw millisecond value.
pub fn format_timestamp(millis: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()
        .and_then(|at| at.format(TIMESTAMP_FORMAT).ok())
        .unwrap_or_else(|| millis.to_string())
}

/// Render a record as one line plus one extra line per error trace element.
///
/// The returned string always ends with a newline.
pub fn format_record(record: &LogRecord) -> String {
    let mut line = format!(
        "{} {:<5} [{}]",
        format_timestamp(record.timestamp_millis),
        record.level.as_str(),
        record.logger
    );
    if let Some(marker) = &record.marker {
        line.push_str(" <");
        line.push_str(marker.name());
        line.push('>');
    }
    line.push(' ');
    line.push_str(&record.text);
    line.push('\n');

    if let Some(error) = &record.error {
        for trace in error.trace_lines() {
            line.push_str(&trace);
            line.push('\n');
        }
    }
    line
}
