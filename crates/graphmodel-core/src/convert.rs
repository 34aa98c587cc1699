//! Property converters.
//!
//! A converter turns a domain value held by an entity field into a graph
//! primitive the store can hold. Converters run while a change set is compiled
//! and while snapshots are taken, so the dirty check compares converted values.

use std::fmt;

use crate::value::Value;

/// Signature of a converter function. `Err` carries the rejection reason.
pub type ConvertFn = fn(&Value) -> Result<Value, String>;

/// A named, stateless property converter.
#[derive(Clone, Copy)]
pub struct Converter {
    name: &'static str,
    to_graph: ConvertFn,
}

impl Converter {
    /// Wrap a conversion function under a name used in error messages.
    pub const fn new(name: &'static str, to_graph: ConvertFn) -> Self {
        Self { name, to_graph }
    }

    /// Converter name.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Convert a field value to its graph representation.
    ///
    /// NULL always converts to NULL.
    pub fn to_graph(&self, value: &Value) -> Result<Value, String> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        (self.to_graph)(value)
    }

    /// Date (days since epoch) to an ISO-8601 `YYYY-MM-DD` string.
    pub const DATE_ISO: Converter = Converter::new("date_iso", date_to_iso);

    /// Timestamp (microseconds) to epoch milliseconds.
    pub const TIMESTAMP_MILLIS: Converter = Converter::new("timestamp_millis", timestamp_to_millis);

    /// UUID bytes to the hyphenated lowercase form.
    pub const UUID_STRING: Converter = Converter::new("uuid_string", uuid_to_string);

    /// Decimal to its canonical string, rejecting non-numeric text.
    pub const DECIMAL_STRING: Converter = Converter::new("decimal_string", decimal_to_string);

    /// JSON document to a compact JSON string.
    pub const JSON_STRING: Converter = Converter::new("json_string", json_to_string);
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Converter").field(&self.name).finish()
    }
}

fn date_to_iso(value: &Value) -> Result<Value, String> {
    match value {
        Value::Date(days) => {
            let (y, m, d) = civil_from_days(i64::from(*days));
            Ok(Value::String(format!("{:04}-{:02}-{:02}", y, m, d)))
        }
        other => Err(format!("expected DATE, found {}", other.type_name())),
    }
}

fn timestamp_to_millis(value: &Value) -> Result<Value, String> {
    match value {
        Value::Timestamp(micros) => Ok(Value::Integer(micros.div_euclid(1000))),
        other => Err(format!("expected TIMESTAMP, found {}", other.type_name())),
    }
}

fn uuid_to_string(value: &Value) -> Result<Value, String> {
    match value {
        Value::Uuid(bytes) => Ok(Value::String(format_uuid(bytes))),
        other => Err(format!("expected UUID, found {}", other.type_name())),
    }
}

fn decimal_to_string(value: &Value) -> Result<Value, String> {
    match value {
        Value::Decimal(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.parse::<f64>().is_err() {
                return Err(format!("'{}' is not a decimal number", s));
            }
            Ok(Value::String(trimmed.to_string()))
        }
        other => Err(format!("expected DECIMAL, found {}", other.type_name())),
    }
}

fn json_to_string(value: &Value) -> Result<Value, String> {
    match value {
        Value::Json(doc) => serde_json::to_string(doc)
            .map(Value::String)
            .map_err(|e| e.to_string()),
        other => Err(format!("expected JSON, found {}", other.type_name())),
    }
}

/// Format 16 UUID bytes as `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`.
pub fn format_uuid(bytes: &[u8; 16]) -> String {
    let mut out = String::with_capacity(36);
    for (i, b) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Civil date for a day count relative to 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month as u32, day as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_iso() {
        let c = Converter::DATE_ISO;
        assert_eq!(c.to_graph(&Value::Date(0)).unwrap(), Value::from("1970-01-01"));
        assert_eq!(
            c.to_graph(&Value::Date(19_723)).unwrap(),
            Value::from("2024-01-01")
        );
        assert_eq!(c.to_graph(&Value::Date(-1)).unwrap(), Value::from("1969-12-31"));
    }

    #[test]
    fn test_null_passes_through() {
        assert_eq!(Converter::DATE_ISO.to_graph(&Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_wrong_input_rejected() {
        let err = Converter::DATE_ISO.to_graph(&Value::from("yesterday")).unwrap_err();
        assert!(err.contains("expected DATE"));
    }

    #[test]
    fn test_decimal_rejects_garbage() {
        let c = Converter::DECIMAL_STRING;
        assert_eq!(
            c.to_graph(&Value::Decimal("12.50".into())).unwrap(),
            Value::from("12.50")
        );
        assert!(c.to_graph(&Value::Decimal("twelve".into())).is_err());
    }

    #[test]
    fn test_uuid_and_json() {
        let mut bytes = [0u8; 16];
        bytes[15] = 0xab;
        assert_eq!(
            Converter::UUID_STRING.to_graph(&Value::Uuid(bytes)).unwrap(),
            Value::from("00000000-0000-0000-0000-0000000000ab")
        );
        assert_eq!(
            Converter::JSON_STRING
                .to_graph(&Value::Json(serde_json::json!({"k": [1, 2]})))
                .unwrap(),
            Value::from(r#"{"k":[1,2]}"#)
        );
    }

    #[test]
    fn test_timestamp_millis() {
        assert_eq!(
            Converter::TIMESTAMP_MILLIS
                .to_graph(&Value::Timestamp(1_500_999))
                .unwrap(),
            Value::Integer(1_500)
        );
    }
}
