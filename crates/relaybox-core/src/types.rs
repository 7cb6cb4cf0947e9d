/*!
 * Core data types for RelayBox.
 *
 * This module defines the scalar values carried by configuration entries
 * and sensor readings, together with their wire-level type tags.
 */
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Type tag attached to values on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Signed integer
    Integer,
    /// Floating-point number
    Float,
    /// UTF-8 text
    String,
}

impl ValueType {
    /// Wire name of the tag
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Integer => "integer",
            ValueType::Float => "float",
            ValueType::String => "string",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "integer" => Ok(ValueType::Integer),
            "float" => Ok(ValueType::Float),
            "string" => Ok(ValueType::String),
            other => Err(Error::invalid_value(format!(
                "unsupported value type '{}'",
                other
            ))),
        }
    }
}

/// A typed scalar value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Integer value
    Integer(i64),
    /// Floating-point value
    Float(f64),
    /// String value
    String(String),
}

impl Value {
    /// The type tag of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Integer(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
        }
    }

    /// Interpret the value as an integer.
    ///
    /// Floats are truncated toward zero; strings are parsed as an integer
    /// first and as a float second.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            Value::Float(_) => None,
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            }
        }
    }

    /// Interpret the value as a float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::String(s) => s.trim().parse::<f64>().ok(),
        }
    }

    /// Try to get a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric truthiness: non-zero numbers are true
    pub fn is_truthy(&self) -> bool {
        match self.as_float() {
            Some(f) => f != 0.0,
            None => false,
        }
    }

    /// Coerce a JSON value to the requested type
    pub fn coerce(raw: &serde_json::Value, value_type: ValueType) -> Result<Self> {
        use serde_json::Value as Json;

        let invalid = || {
            Error::invalid_value(format!("cannot coerce {} to {}", raw, value_type))
        };

        match (value_type, raw) {
            (ValueType::Integer, Json::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
                .map(Value::Integer)
                .ok_or_else(invalid),
            (ValueType::Integer, Json::String(s)) => {
                s.trim().parse::<i64>().map(Value::Integer).map_err(|_| invalid())
            }
            (ValueType::Integer, Json::Bool(b)) => Ok(Value::Integer(i64::from(*b))),

            (ValueType::Float, Json::Number(n)) => {
                n.as_f64().map(Value::Float).ok_or_else(invalid)
            }
            (ValueType::Float, Json::String(s)) => {
                s.trim().parse::<f64>().map(Value::Float).map_err(|_| invalid())
            }
            (ValueType::Float, Json::Bool(b)) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),

            (ValueType::String, Json::String(s)) => Ok(Value::String(s.clone())),
            (ValueType::String, Json::Number(n)) => Ok(Value::String(n.to_string())),
            (ValueType::String, Json::Bool(b)) => Ok(Value::String(b.to_string())),

            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            // Debug keeps the fractional part so the text reads back as a float
            Value::Float(v) => write!(f, "{:?}", v),
            Value::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_type_names() {
        assert_eq!(ValueType::Integer.as_str(), "integer");
        assert_eq!("float".parse::<ValueType>().unwrap(), ValueType::Float);
        assert_eq!("string".parse::<ValueType>().unwrap(), ValueType::String);
        assert!("bool".parse::<ValueType>().is_err());
        assert!("Integer".parse::<ValueType>().is_err());
    }

    #[test]
    fn test_coerce_integer() {
        assert_eq!(Value::coerce(&json!(5), ValueType::Integer).unwrap(), Value::Integer(5));
        assert_eq!(Value::coerce(&json!(5.9), ValueType::Integer).unwrap(), Value::Integer(5));
        assert_eq!(Value::coerce(&json!(" 42 "), ValueType::Integer).unwrap(), Value::Integer(42));
        assert_eq!(Value::coerce(&json!(true), ValueType::Integer).unwrap(), Value::Integer(1));
        assert!(Value::coerce(&json!("4.5"), ValueType::Integer).is_err());
        assert!(Value::coerce(&json!(null), ValueType::Integer).is_err());
        assert!(Value::coerce(&json!([1]), ValueType::Integer).is_err());
    }

    #[test]
    fn test_coerce_float_and_string() {
        assert_eq!(Value::coerce(&json!(2), ValueType::Float).unwrap(), Value::Float(2.0));
        assert_eq!(Value::coerce(&json!("2.5"), ValueType::Float).unwrap(), Value::Float(2.5));
        assert!(Value::coerce(&json!("abc"), ValueType::Float).is_err());

        assert_eq!(
            Value::coerce(&json!("broker.local"), ValueType::String).unwrap(),
            Value::String("broker.local".to_string())
        );
        assert_eq!(Value::coerce(&json!(10), ValueType::String).unwrap(), Value::from("10"));
        assert!(Value::coerce(&json!({"a": 1}), ValueType::String).is_err());
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Float(3.7).as_integer(), Some(3));
        assert_eq!(Value::from("12").as_integer(), Some(12));
        assert_eq!(Value::from("12.5").as_integer(), Some(12));
        assert_eq!(Value::from("host").as_integer(), None);
        assert!(Value::Integer(1).is_truthy());
        assert!(!Value::Integer(0).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(!Value::from("yes").is_truthy());
        assert!(Value::from("1").is_truthy());
    }

    #[test]
    fn test_display_keeps_float_marker() {
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Integer(3).to_string(), "3");
        assert_eq!(Value::from("RB_1").to_string(), "RB_1");
    }

    #[test]
    fn test_json_serialization_is_untagged() {
        assert_eq!(serde_json::to_string(&Value::Integer(25)).unwrap(), "25");
        assert_eq!(serde_json::to_string(&Value::Float(39.2)).unwrap(), "39.2");
        assert_eq!(serde_json::to_string(&ValueType::Float).unwrap(), "\"float\"");
    }
}
