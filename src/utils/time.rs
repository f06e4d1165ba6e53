use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};

const DATE_KEY_FORMAT: &str = "%Y-%m-%d";

/// This is the standard way of converting a date to a rollup key in acuity.
pub fn date_to_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

pub fn key_to_date(key: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(key, DATE_KEY_FORMAT)
        .with_context(|| format!("invalid date key '{key}'"))
}

pub fn parse_timestamp(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_timestamp(value: Option<String>, field: &str) -> Result<Option<DateTime<Utc>>> {
    value.map(|raw| parse_timestamp(&raw, field)).transpose()
}
