//! 事件时间戳格式（秒精度，UTC）

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 当前时间截断到秒
pub fn now_seconds() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// `#[serde(with = "second_precision")]`
pub mod second_precision {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp '{}'", raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_and_parse() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 9, 7, 5, 1).unwrap();
        let text = format_timestamp(&ts);
        assert_eq!(text, "2025-03-09 07:05:01");
        assert_eq!(parse_timestamp(&text), Some(ts));
    }

    #[test]
    fn test_parse_rejects_other_formats() {
        assert!(parse_timestamp("2025-03-09T07:05:01Z").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_now_has_no_subseconds() {
        assert_eq!(now_seconds().timestamp_subsec_nanos(), 0);
    }
}
