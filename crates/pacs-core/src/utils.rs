//! 通用工具函数

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// 缺失值的占位显示
pub const PLACEHOLDER: &str = "-";

/// 格式化日期时间，缺失时返回占位符
pub fn format_datetime(value: Option<&DateTime<Utc>>) -> String {
    value
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}

/// 解析仓库中常见的日期时间写法，无时区的按 UTC 处理
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y%m%d%H%M%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    for format in ["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}

/// 可选文本的显示值
pub fn display_text(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => PLACEHOLDER.to_string(),
    }
}

/// 大小写不敏感的子串匹配，`needle` 需已转为小写
pub fn contains_lowercase(haystack: Option<&str>, needle: &str) -> bool {
    haystack
        .map(|text| text.to_lowercase().contains(needle))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_datetime() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 0).unwrap();
        assert_eq!(format_datetime(Some(&dt)), "2024-03-05 14:07");
        assert_eq!(format_datetime(None), "-");
    }

    #[test]
    fn test_parse_datetime() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap();
        assert_eq!(parse_datetime("2024-01-15T09:30:00Z"), Some(expected));
        assert_eq!(parse_datetime("2024-01-15T17:30:00+08:00"), Some(expected));
        assert_eq!(parse_datetime("2024-01-15 09:30:00"), Some(expected));
        assert_eq!(parse_datetime("20240115093000"), Some(expected));

        let midnight = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        assert_eq!(parse_datetime("2024-01-15"), Some(midnight));
        assert_eq!(parse_datetime("20240115"), Some(midnight));

        assert_eq!(parse_datetime(""), None);
        assert_eq!(parse_datetime("yesterday"), None);
    }

    #[test]
    fn test_display_text() {
        assert_eq!(display_text(Some(" CT ")), "CT");
        assert_eq!(display_text(Some("")), "-");
        assert_eq!(display_text(None), "-");
    }

    #[test]
    fn test_contains_lowercase() {
        assert!(contains_lowercase(Some("DOE^John"), "john"));
        assert!(!contains_lowercase(None, "john"));
    }
}
