//! Typed conversion out of [`Value`].
//!
//! Conversions are explicit and fail loudly: a value of the wrong shape is a
//! [`ConversionError`], never a silent default. The few accepted widenings
//! are listed per target type below.
//!
//! | Target | Accepts |
//! |--------|---------|
//! | `String` | strings; numbers and booleans in their JSON text form |
//! | `i64`, `i32`, `u64`, `u32` | integral numbers in range; strings holding such a number |
//! | `f64` | numbers; strings holding a number |
//! | `bool` | booleans; the strings `"true"` and `"false"` |
//! | `DateTime<FixedOffset>`, `DateTime<Utc>` | strings in a format accepted by [`parse_date`] |
//! | `JsonMap` | maps |
//! | `Vec<T>` | lists whose every element converts to `T` |
//! | `Value` | anything |

use chrono::{DateTime, FixedOffset, Utc};

use crate::date::{accepted_formats, parse_date};
use crate::error::ConversionError;
use crate::value::{JsonMap, Value};

/// A type a [`Value`] can be converted into.
///
/// `path` is only used to label errors.
pub trait FromValue: Sized {
    /// Name reported as [`ConversionError::expected`].
    const TYPE_NAME: &'static str;

    fn from_value(value: &Value, path: &str) -> Result<Self, ConversionError>;
}

fn mismatch<T: FromValue>(value: &Value, path: &str) -> ConversionError {
    ConversionError::new(path, T::TYPE_NAME, value.kind())
}

impl FromValue for Value {
    const TYPE_NAME: &'static str = "value";

    fn from_value(value: &Value, _path: &str) -> Result<Self, ConversionError> {
        Ok(value.clone())
    }
}

impl FromValue for String {
    const TYPE_NAME: &'static str = "string";

    fn from_value(value: &Value, path: &str) -> Result<Self, ConversionError> {
        match value {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                value.scalar_text().ok_or_else(|| mismatch::<Self>(value, path))
            }
            _ => Err(mismatch::<Self>(value, path)),
        }
    }
}

impl FromValue for i64 {
    const TYPE_NAME: &'static str = "integer";

    fn from_value(value: &Value, path: &str) -> Result<Self, ConversionError> {
        match value {
            Value::Number(n) => n.as_i64().ok_or_else(|| {
                mismatch::<Self>(value, path)
                    .with_detail(format!("{n} is not a signed 64-bit integer"))
            }),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|e| mismatch::<Self>(value, path).with_detail(e.to_string())),
            _ => Err(mismatch::<Self>(value, path)),
        }
    }
}

impl FromValue for u64 {
    const TYPE_NAME: &'static str = "unsigned integer";

    fn from_value(value: &Value, path: &str) -> Result<Self, ConversionError> {
        match value {
            Value::Number(n) => n.as_u64().ok_or_else(|| {
                mismatch::<Self>(value, path)
                    .with_detail(format!("{n} is not an unsigned 64-bit integer"))
            }),
            Value::String(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|e| mismatch::<Self>(value, path).with_detail(e.to_string())),
            _ => Err(mismatch::<Self>(value, path)),
        }
    }
}

impl FromValue for i32 {
    const TYPE_NAME: &'static str = "32-bit integer";

    fn from_value(value: &Value, path: &str) -> Result<Self, ConversionError> {
        let wide = i64::from_value(value, path).map_err(|e| ConversionError {
            expected: Self::TYPE_NAME,
            ..e
        })?;
        i32::try_from(wide)
            .map_err(|e| mismatch::<Self>(value, path).with_detail(e.to_string()))
    }
}

impl FromValue for u32 {
    const TYPE_NAME: &'static str = "32-bit unsigned integer";

    fn from_value(value: &Value, path: &str) -> Result<Self, ConversionError> {
        let wide = u64::from_value(value, path).map_err(|e| ConversionError {
            expected: Self::TYPE_NAME,
            ..e
        })?;
        u32::try_from(wide)
            .map_err(|e| mismatch::<Self>(value, path).with_detail(e.to_string()))
    }
}

impl FromValue for f64 {
    const TYPE_NAME: &'static str = "float";

    fn from_value(value: &Value, path: &str) -> Result<Self, ConversionError> {
        match value {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| mismatch::<Self>(value, path)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|e| mismatch::<Self>(value, path).with_detail(e.to_string())),
            _ => Err(mismatch::<Self>(value, path)),
        }
    }
}

impl FromValue for bool {
    const TYPE_NAME: &'static str = "boolean";

    fn from_value(value: &Value, path: &str) -> Result<Self, ConversionError> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::String(s) if s == "true" => Ok(true),
            Value::String(s) if s == "false" => Ok(false),
            _ => Err(mismatch::<Self>(value, path)),
        }
    }
}

impl FromValue for DateTime<FixedOffset> {
    const TYPE_NAME: &'static str = "date";

    fn from_value(value: &Value, path: &str) -> Result<Self, ConversionError> {
        let Value::String(text) = value else {
            return Err(mismatch::<Self>(value, path));
        };
        parse_date(text).ok_or_else(|| {
            mismatch::<Self>(value, path).with_detail(format!(
                "{text:?} matches none of: {}",
                accepted_formats().join(", ")
            ))
        })
    }
}

impl FromValue for DateTime<Utc> {
    const TYPE_NAME: &'static str = "date";

    fn from_value(value: &Value, path: &str) -> Result<Self, ConversionError> {
        DateTime::<FixedOffset>::from_value(value, path).map(|dt| dt.with_timezone(&Utc))
    }
}

impl FromValue for JsonMap {
    const TYPE_NAME: &'static str = "map";

    fn from_value(value: &Value, path: &str) -> Result<Self, ConversionError> {
        match value {
            Value::Map(m) => Ok(m.clone()),
            _ => Err(mismatch::<Self>(value, path)),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    const TYPE_NAME: &'static str = "list";

    fn from_value(value: &Value, path: &str) -> Result<Self, ConversionError> {
        let Value::List(items) = value else {
            return Err(mismatch::<Self>(value, path));
        };
        items
            .iter()
            .enumerate()
            .map(|(i, item)| T::from_value(item, &format!("{path}.{i}")))
            .collect()
    }
}
