//! Lenient number parsing for scraped market values.
//!
//! Upstream pages format prices as `"1,234.50"`, percentages as `"-2.3%"`,
//! negatives sometimes as `"(12.5)"`, and use placeholders such as `"-"` or
//! `"N/A"` for missing values. The NEPSE API sends the same fields either as
//! JSON numbers or as strings.

use serde::{Deserialize, Deserializer};

const MISSING_MARKERS: &[&str] = &["", "-", "N/A", "NA", "null", "None", "–"];

/// 解析數字文字，無法解析時回傳 None
pub fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if MISSING_MARKERS.contains(&trimmed) {
        return None;
    }

    let mut cleaned: String = trimmed
        .replace("Rs.", "")
        .replace("रु", "")
        .chars()
        .filter(|c| !matches!(c, ',' | ' ' | '%' | '\u{a0}'))
        .collect();

    let mut negative = false;
    if cleaned.starts_with('(') && cleaned.ends_with(')') && cleaned.len() > 2 {
        cleaned = cleaned[1..cleaned.len() - 1].to_string();
        negative = true;
    }

    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

pub fn parse_integer(text: &str) -> Option<i64> {
    parse_number(text).map(|v| v.round() as i64)
}

/// 四捨五入到小數點後兩位 (資料庫的 decimal_places=2)
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<NumberOrText> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(NumberOrText::Number(n)) if n.is_finite() => Some(n),
        Some(NumberOrText::Text(s)) => parse_number(&s),
        _ => None,
    })
}

pub fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_f64(deserializer)?.map(|v| v.round() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_formatted_numbers() {
        assert_eq!(parse_number("1,234.50"), Some(1234.5));
        assert_eq!(parse_number(" 2.34% "), Some(2.34));
        assert_eq!(parse_number("-1.25"), Some(-1.25));
        assert_eq!(parse_number("(12.5)"), Some(-12.5));
        assert_eq!(parse_number("Rs. 425"), Some(425.0));
        assert_eq!(parse_number("रु 1,000"), Some(1000.0));
    }

    #[test]
    fn test_missing_markers() {
        for marker in ["", "-", "N/A", "NA", "null", "None", "–", "   "] {
            assert_eq!(parse_number(marker), None, "marker {:?}", marker);
        }
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("inf"), None);
    }

    #[test]
    fn test_parse_integer_and_round() {
        assert_eq!(parse_integer("12,345"), Some(12345));
        assert_eq!(round2(2.345_678), 2.35);
        assert_eq!(round2(-0.004), -0.0);
    }

    #[test]
    fn test_lenient_deserialize() {
        #[derive(Deserialize)]
        struct Row {
            #[serde(default, deserialize_with = "lenient_f64")]
            a: Option<f64>,
            #[serde(default, deserialize_with = "lenient_f64")]
            b: Option<f64>,
            #[serde(default, deserialize_with = "lenient_f64")]
            c: Option<f64>,
            #[serde(default, deserialize_with = "lenient_i64")]
            d: Option<i64>,
            #[serde(default, deserialize_with = "lenient_f64")]
            e: Option<f64>,
        }

        let row: Row =
            serde_json::from_str(r#"{"a": 10.5, "b": "1,100.25", "c": null, "d": "2,000", "e": true}"#)
                .unwrap();
        assert_eq!(row.a, Some(10.5));
        assert_eq!(row.b, Some(1100.25));
        assert_eq!(row.c, None);
        assert_eq!(row.d, Some(2000));
        assert_eq!(row.e, None);
    }
}
