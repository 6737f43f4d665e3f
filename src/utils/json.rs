use serde_json::Value;

/// Distinguishes a PATCH field that was left out from one explicitly set to null.
#[derive(Debug, PartialEq, Eq)]
pub enum NullableValue {
    Omitted,
    Null,
    String(String),
}

pub fn classify_nullable(optional_value: Option<&Value>) -> Result<NullableValue, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(Value::String(s)) => Ok(NullableValue::String(s.to_owned())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

impl NullableValue {
    /// Change to apply to a nullable text column: `None` leaves it alone,
    /// `Some(None)` clears it. Blank strings clear as well.
    pub fn into_change(self) -> Option<Option<String>> {
        match self {
            NullableValue::Omitted => None,
            NullableValue::Null => Some(None),
            NullableValue::String(value) => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    Some(None)
                } else {
                    Some(Some(trimmed.to_string()))
                }
            }
        }
    }
}

pub fn nullable_field(body: &Value, field: &str) -> Result<Option<Option<String>>, String> {
    classify_nullable(body.get(field))
        .map(NullableValue::into_change)
        .map_err(|err| format!("{field}: {err}"))
}
