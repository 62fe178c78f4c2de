// FleetWatch - ChromeOS fleet collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Pure per-metric conversions
//!
//! Every function takes the raw text of one field and returns the rendered
//! value or a [`ConvertError`]. The engine turns errors into the `None`
//! sentinel.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

const BYTES_PER_GB: f64 = (1u64 << 30) as f64;
const MAC_ADDRESS_LENGTH: usize = 12;

/// Raw input timestamp, always UTC
const INPUT_DATETIME: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";
const OUTPUT_DATETIME: &str = "%b %d, %Y, %-I:%M %p";
const INPUT_DATE: &str = "%Y-%m-%d";
const OUTPUT_DATE: &str = "%b %d, %Y";
const OUTPUT_MONTH: &str = "%b %Y";

/// Why a single metric could not be rendered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    /// Input is empty
    Missing,
    /// Input is not a number
    NotNumeric(String),
    /// Input does not match the expected date pattern
    BadDate(String),
    /// Input is not a non-empty JSON array
    NotArray,
    /// Array element lacks the expected sub-field
    MissingField(&'static str),
    /// Hardware address is not 12 hex characters
    BadHardwareAddress(String),
}

impl std::fmt::Display for ConvertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvertError::Missing => write!(f, "value is empty"),
            ConvertError::NotNumeric(v) => write!(f, "'{}' is not numeric", v),
            ConvertError::BadDate(v) => write!(f, "'{}' is not a valid date", v),
            ConvertError::NotArray => write!(f, "value is not a non-empty array"),
            ConvertError::MissingField(name) => write!(f, "missing field '{}'", name),
            ConvertError::BadHardwareAddress(v) => write!(f, "'{}' is not a hardware address", v),
        }
    }
}

pub type ConvertResult = std::result::Result<String, ConvertError>;

fn present(value: &str) -> Result<&str, ConvertError> {
    let value = value.trim();
    if value.is_empty() {
        Err(ConvertError::Missing)
    } else {
        Ok(value)
    }
}

/// Raw value passed through
pub fn verbatim(value: &str) -> ConvertResult {
    present(value).map(str::to_string)
}

/// First whitespace separated token
pub fn first_token(value: &str) -> ConvertResult {
    present(value)?
        .split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or(ConvertError::Missing)
}

/// Epoch milliseconds rendered as month and year
pub fn month_year(value: &str) -> ConvertResult {
    let value = present(value)?;
    let millis: i64 = value
        .parse()
        .map_err(|_| ConvertError::NotNumeric(value.to_string()))?;
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format(OUTPUT_MONTH).to_string())
        .ok_or_else(|| ConvertError::BadDate(value.to_string()))
}

/// ISO-8601 UTC timestamp rendered for humans
pub fn human_datetime(value: &str) -> ConvertResult {
    let value = present(value)?;
    NaiveDateTime::parse_from_str(value, INPUT_DATETIME)
        .map(|dt| dt.format(OUTPUT_DATETIME).to_string())
        .map_err(|_| ConvertError::BadDate(value.to_string()))
}

/// `yyyy-mm-dd` rendered as `Mon dd, yyyy`
pub fn human_date(value: &str) -> ConvertResult {
    let value = present(value)?;
    NaiveDate::parse_from_str(value, INPUT_DATE)
        .map(|d| d.format(OUTPUT_DATE).to_string())
        .map_err(|_| ConvertError::BadDate(value.to_string()))
}

/// Colon separated uppercase octets
pub fn hardware_address(value: &str) -> ConvertResult {
    let value = present(value)?;
    if value.len() != MAC_ADDRESS_LENGTH || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ConvertError::BadHardwareAddress(value.to_string()));
    }
    let pairs: Vec<String> = value
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).to_ascii_uppercase())
        .collect();
    Ok(pairs.join(":"))
}

/// Byte count rendered as gigabytes with two decimals
pub fn gigabytes(value: &str) -> ConvertResult {
    let value = present(value)?;
    let bytes: f64 = value
        .parse()
        .map_err(|_| ConvertError::NotNumeric(value.to_string()))?;
    if !bytes.is_finite() {
        return Err(ConvertError::NotNumeric(value.to_string()));
    }
    let gb = (bytes / BYTES_PER_GB * 100.0).round() / 100.0;
    // Debug keeps the trailing ".0" on whole numbers
    Ok(format!("{:?}", gb))
}

/// Millisecond duration rendered as `N s`, `N min` or `H h M min`
pub fn human_duration(value: &str) -> ConvertResult {
    let value = present(value)?;
    let millis: u64 = value
        .parse()
        .map_err(|_| ConvertError::NotNumeric(value.to_string()))?;
    let seconds = millis / 1000;
    if seconds < 60 {
        return Ok(format!("{} s", seconds));
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return Ok(format!("{} min", minutes));
    }
    Ok(format!("{} h {} min", minutes / 60, minutes % 60))
}

// ============================================================================
// Array-valued telemetry
// ============================================================================

/// Parse raw text as a non-empty JSON array
pub fn parse_array(value: &str) -> Result<Vec<Value>, ConvertError> {
    let value = present(value)?;
    match serde_json::from_str::<Value>(value) {
        Ok(Value::Array(items)) if !items.is_empty() => Ok(items),
        _ => Err(ConvertError::NotArray),
    }
}

/// Element `back` positions from the end (0 is the last one)
fn from_end(items: &[Value], back: usize) -> Result<&Value, ConvertError> {
    items
        .len()
        .checked_sub(back + 1)
        .and_then(|i| items.get(i))
        .ok_or(ConvertError::NotArray)
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn field(item: &Value, name: &'static str) -> Result<String, ConvertError> {
    item.get(name)
        .and_then(text_of)
        .ok_or(ConvertError::MissingField(name))
}

/// First element of the sub-array `name` of `item`
fn first_of(item: &Value, name: &'static str) -> Result<String, ConvertError> {
    item.get(name)
        .and_then(Value::as_array)
        .and_then(|values| values.first())
        .and_then(text_of)
        .ok_or(ConvertError::MissingField(name))
}

/// Internal address of the most recent network
pub fn last_ip_address(value: &str) -> ConvertResult {
    let items = parse_array(value)?;
    field(from_end(&items, 0)?, "ipAddress")
}

/// Public address of the most recent network
pub fn last_wan_ip_address(value: &str) -> ConvertResult {
    let items = parse_array(value)?;
    field(from_end(&items, 0)?, "wanIpAddress")
}

/// Email of the most recent user
pub fn last_user_email(value: &str) -> ConvertResult {
    let items = parse_array(value)?;
    field(from_end(&items, 0)?, "email")
}

/// `"<duration> on <date>"` of the most recent activity range
pub fn last_activity(value: &str) -> ConvertResult {
    let items = parse_array(value)?;
    let last = from_end(&items, 0)?;
    let date = human_date(&field(last, "date")?)?;
    let duration = human_duration(&field(last, "activeTime")?)?;
    Ok(format!("{} on {}", duration, date))
}

/// Free memory of the most recent sample, in gigabytes
pub fn last_free_memory(value: &str) -> ConvertResult {
    let items = parse_array(value)?;
    gigabytes(&first_of(from_end(&items, 0)?, "systemRamFreeInfo")?)
}

/// CPU utilization of the second most recent sample.
///
/// The newest sample may still be accumulating.
pub fn settled_cpu_utilization(value: &str) -> ConvertResult {
    let items = parse_array(value)?;
    first_of(from_end(&items, 1)?, "cpuUtilizationPercentageInfo")
}

/// Temperature for `label` in the most recent sample, 0 when not reported
pub fn cpu_temperature(value: &str, label: &str) -> ConvertResult {
    let items = parse_array(value)?;
    let readings = from_end(&items, 0)?
        .get("cpuTemperatureInfo")
        .and_then(Value::as_array)
        .filter(|r| !r.is_empty())
        .ok_or(ConvertError::MissingField("cpuTemperatureInfo"))?;

    let temperature = readings
        .iter()
        .find(|r| {
            r.get("label")
                .and_then(Value::as_str)
                .map_or(false, |l| l == label)
        })
        .and_then(|r| r.get("temperature"))
        .and_then(|t| t.as_i64().or_else(|| t.as_f64().map(|f| f as i64)))
        .unwrap_or(0);
    Ok(temperature.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbatim_and_first_token() {
        assert_eq!(verbatim("ACTIVE").unwrap(), "ACTIVE");
        assert_eq!(verbatim("  "), Err(ConvertError::Missing));
        assert_eq!(first_token("15359.58.0 (Official Build)").unwrap(), "15359.58.0");
    }

    #[test]
    fn test_gigabytes() {
        assert_eq!(gigabytes("8589934592").unwrap(), "8.0");
        assert_eq!(gigabytes("4000000000").unwrap(), "3.73");
        assert_eq!(gigabytes("0").unwrap(), "0.0");
        assert_eq!(gigabytes("10737418240000000000000000").unwrap(), "1e16");
        assert!(matches!(gigabytes("lots"), Err(ConvertError::NotNumeric(_))));
    }

    #[test]
    fn test_hardware_address() {
        assert_eq!(hardware_address("a1b2c3d4e5f6").unwrap(), "A1:B2:C3:D4:E5:F6");
        assert!(hardware_address("a1b2c3d4e5").is_err());
        assert!(hardware_address("a1b2c3d4e5f6a7").is_err());
        assert!(hardware_address("zzb2c3d4e5f6").is_err());
    }

    #[test]
    fn test_human_datetime() {
        assert_eq!(
            human_datetime("2023-06-05T14:07:09.123Z").unwrap(),
            "Jun 05, 2023, 2:07 PM"
        );
        assert_eq!(
            human_datetime("2023-01-15T00:30:00.000Z").unwrap(),
            "Jan 15, 2023, 12:30 AM"
        );
        assert!(human_datetime("2023-06-05").is_err());
    }

    #[test]
    fn test_month_year() {
        assert_eq!(month_year("1719792000000").unwrap(), "Jul 2024");
        assert!(month_year("soon").is_err());
    }

    #[test]
    fn test_human_duration() {
        assert_eq!(human_duration("59999").unwrap(), "59 s");
        assert_eq!(human_duration("600000").unwrap(), "10 min");
        assert_eq!(human_duration("5400000").unwrap(), "1 h 30 min");
        assert!(human_duration("-5").is_err());
    }

    #[test]
    fn test_last_activity() {
        let raw = r#"[{"date":"2023-06-01","activeTime":60000},{"date":"2023-06-02","activeTime":7260000}]"#;
        assert_eq!(last_activity(raw).unwrap(), "2 h 1 min on Jun 02, 2023");

        let bad_date = r#"[{"date":"yesterday","activeTime":60000}]"#;
        assert!(last_activity(bad_date).is_err());

        let bad_duration = r#"[{"date":"2023-06-01","activeTime":"abc"}]"#;
        assert!(matches!(last_activity(bad_duration), Err(ConvertError::NotNumeric(_))));

        let no_duration = r#"[{"date":"2023-06-01"}]"#;
        assert_eq!(
            last_activity(no_duration),
            Err(ConvertError::MissingField("activeTime"))
        );
    }

    #[test]
    fn test_last_network() {
        let raw = r#"[{"ipAddress":"10.0.0.1","wanIpAddress":"1.1.1.1"},{"ipAddress":"10.0.0.2","wanIpAddress":"2.2.2.2"}]"#;
        assert_eq!(last_ip_address(raw).unwrap(), "10.0.0.2");
        assert_eq!(last_wan_ip_address(raw).unwrap(), "2.2.2.2");
        assert_eq!(last_ip_address("[]"), Err(ConvertError::NotArray));
        assert_eq!(last_ip_address("not json"), Err(ConvertError::NotArray));
    }

    #[test]
    fn test_settled_cpu_utilization() {
        let raw = r#"[{"cpuUtilizationPercentageInfo":[10]},{"cpuUtilizationPercentageInfo":[20]},{"cpuUtilizationPercentageInfo":[30]}]"#;
        assert_eq!(settled_cpu_utilization(raw).unwrap(), "20");

        let single = r#"[{"cpuUtilizationPercentageInfo":[10]}]"#;
        assert!(settled_cpu_utilization(single).is_err());
    }

    #[test]
    fn test_last_free_memory() {
        let raw = r#"[{"systemRamFreeInfo":["1073741824"]},{"systemRamFreeInfo":["2147483648"]}]"#;
        assert_eq!(last_free_memory(raw).unwrap(), "2.0");
    }

    #[test]
    fn test_cpu_temperature() {
        let raw = r#"[{"cpuTemperatureInfo":[{"temperature":40,"label":"Core 0\n"}]},
                      {"cpuTemperatureInfo":[{"temperature":51,"label":"Core 1\n"},{"temperature":48,"label":"Core 0\n"}]}]"#;
        assert_eq!(cpu_temperature(raw, "Core 1\n").unwrap(), "51");
        assert_eq!(cpu_temperature(raw, "Core 0\n").unwrap(), "48");
        assert_eq!(cpu_temperature(raw, "iwlwifi_1\n").unwrap(), "0");
        assert_eq!(cpu_temperature(raw, "Core 1").unwrap(), "0");
        assert!(cpu_temperature(r#"[{"cpuUtilizationPercentageInfo":[1]}]"#, "Core 1\n").is_err());
    }
}
