use chrono::{DateTime, NaiveDateTime, Utc};

pub fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}

pub fn parse_iso(value: &str) -> Result<NaiveDateTime, String> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc).naive_utc())
        .map_err(|err| format!("invalid RFC 3339 timestamp '{value}': {err}"))
}
