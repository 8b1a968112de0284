//! Call-time front matter: `Oct 30, 2019` + `5:00 p.m. ET` → RFC 3339.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone};
use chrono_tz::America::New_York;
use chrono_tz::Tz;

/// Combines the page's date and time labels into an Eastern-time timestamp string.
pub fn parse_call_timestamp(date: &str, time: &str) -> Result<String, String> {
    let date = parse_date(date)?;
    let time = parse_time(time)?;
    let local = NaiveDateTime::new(date, time);
    let zoned = to_eastern(local)?;
    Ok(zoned.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    let cleaned = raw
        .replace('.', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let cleaned = cleaned.replacen("Sept ", "Sep ", 1);
    NaiveDate::parse_from_str(&cleaned, "%b %d, %Y")
        .or_else(|_| NaiveDate::parse_from_str(&cleaned, "%B %d, %Y"))
        .or_else(|_| NaiveDate::parse_from_str(&cleaned, "%Y-%m-%d"))
        .map_err(|err| format!("unparseable call date {raw:?}: {err}"))
}

fn parse_time(raw: &str) -> Result<NaiveTime, String> {
    let lowered = raw.to_lowercase().replace('.', "");
    let cleaned = lowered
        .split_whitespace()
        .filter(|part| !matches!(*part, "et" | "est" | "edt"))
        .collect::<Vec<_>>()
        .join(" ");
    // "5 pm" carries no minutes; chrono needs them to build a time.
    let cleaned = match cleaned.split_once(' ') {
        Some((hour, meridiem)) if !hour.contains(':') => format!("{hour}:00 {meridiem}"),
        _ => cleaned,
    };
    NaiveTime::parse_from_str(&cleaned, "%I:%M %p")
        .or_else(|_| NaiveTime::parse_from_str(&cleaned, "%H:%M"))
        .map_err(|err| format!("unparseable call time {raw:?}: {err}"))
}

/// Resolves a wall-clock time in `America/New_York`. A repeated hour takes its first
/// (daylight) reading; a skipped hour does not exist and is rejected.
fn to_eastern(local: NaiveDateTime) -> Result<DateTime<Tz>, String> {
    New_York
        .from_local_datetime(&local)
        .earliest()
        .ok_or_else(|| format!("local time {local} does not exist in US Eastern time"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn summer_calls_use_daylight_offset() {
        assert_eq!(
            parse_call_timestamp("Oct 30, 2019", "5:00 p.m. ET").unwrap(),
            "2019-10-30T17:00:00-04:00"
        );
    }

    #[test]
    fn winter_calls_use_standard_offset() {
        assert_eq!(
            parse_call_timestamp("Jan. 28, 2022", "8:30 a.m. ET").unwrap(),
            "2022-01-28T08:30:00-05:00"
        );
        assert_eq!(
            parse_call_timestamp("November 20, 2024", "5 p.m. ET").unwrap(),
            "2024-11-20T17:00:00-05:00"
        );
    }

    #[test]
    fn calls_before_2007_follow_the_old_dst_rules() {
        // DST ended on the last Sunday of October and began on the first Sunday of April.
        assert_eq!(
            parse_call_timestamp("Nov 2, 2006", "5:00 p.m. ET").unwrap(),
            "2006-11-02T17:00:00-05:00"
        );
        assert_eq!(
            parse_call_timestamp("Mar 20, 2006", "8:30 a.m. ET").unwrap(),
            "2006-03-20T08:30:00-05:00"
        );
    }

    #[test]
    fn transition_hours_resolve_or_fail() {
        assert_eq!(
            parse_call_timestamp("Nov 3, 2024", "1:30 a.m. ET").unwrap(),
            "2024-11-03T01:30:00-04:00"
        );
        let err = parse_call_timestamp("Mar 10, 2024", "2:30 a.m. ET").unwrap_err();
        assert!(err.contains("does not exist"), "{err}");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_call_timestamp("someday", "5:00 p.m. ET").is_err());
        assert!(parse_call_timestamp("Oct 30, 2019", "later").is_err());
    }
}
