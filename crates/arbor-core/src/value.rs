//! Layer 3: Typed property values.
//!
//! `Value` is the internal representation of a single property value; a
//! property carries an ordered list of them. `ValueType` is the repository
//! scalar type tag, including `Undefined` for freshly created property
//! states whose type has not been set yet.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{CoreError, ValueError};
use super::identity::NodeId;
use super::name::QName;

/// Repository scalar type of a property value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Undefined,
    String,
    Binary,
    Long,
    Double,
    Date,
    Boolean,
    Name,
    Path,
    Reference,
}

arbor_macros::str_enum! {
    impl ValueType {
        Undefined => "undefined",
        String => "string",
        Binary => "binary",
        Long => "long",
        Double => "double",
        Date => "date",
        Boolean => "boolean",
        Name => "name",
        Path => "path",
        Reference => "reference",
    }
}

/// A single typed value.
///
/// `Date` carries ISO-8601 text; calendar arithmetic is a caller concern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    String(String),
    Binary(Vec<u8>),
    Long(i64),
    Double(f64),
    Date(String),
    Boolean(bool),
    Name(QName),
    Path(String),
    Reference(NodeId),
}

impl Value {
    /// The scalar type of this value. Total.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::String(_) => ValueType::String,
            Value::Binary(_) => ValueType::Binary,
            Value::Long(_) => ValueType::Long,
            Value::Double(_) => ValueType::Double,
            Value::Date(_) => ValueType::Date,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Name(_) => ValueType::Name,
            Value::Path(_) => ValueType::Path,
            Value::Reference(_) => ValueType::Reference,
        }
    }

    /// The target node for `Reference` values, `None` otherwise.
    pub fn reference_target(&self) -> Option<NodeId> {
        match self {
            Value::Reference(id) => Some(*id),
            _ => None,
        }
    }

    /// Parses text into a value of the requested type.
    pub fn try_from_text(value_type: ValueType, raw: &str) -> Result<Self, CoreError> {
        let invalid = |reason: String| -> CoreError {
            ValueError {
                expected: value_type,
                raw: raw.to_string(),
                reason,
            }
            .into()
        };
        match value_type {
            ValueType::Undefined => Err(invalid("type is undefined".into())),
            ValueType::String => Ok(Value::String(raw.to_string())),
            ValueType::Binary => Ok(Value::Binary(raw.as_bytes().to_vec())),
            ValueType::Long => raw
                .parse::<i64>()
                .map(Value::Long)
                .map_err(|err| invalid(err.to_string())),
            ValueType::Double => raw
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|err| invalid(err.to_string())),
            ValueType::Date => Ok(Value::Date(raw.to_string())),
            ValueType::Boolean => raw
                .parse::<bool>()
                .map(Value::Boolean)
                .map_err(|err| invalid(err.to_string())),
            ValueType::Name => QName::parse_expanded(raw).map(Value::Name),
            ValueType::Path => Ok(Value::Path(raw.to_string())),
            ValueType::Reference => NodeId::parse_str(raw).map(Value::Reference),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::Long(n) => write!(f, "{n}"),
            Value::Double(n) => write!(f, "{n}"),
            Value::Date(s) => f.write_str(s),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Name(name) => write!(f, "{name}"),
            Value::Path(path) => f.write_str(path),
            Value::Reference(id) => write!(f, "{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::rep_root;

    #[test]
    fn value_type_is_total() {
        let values = [
            Value::String("x".into()),
            Value::Binary(vec![1, 2]),
            Value::Long(7),
            Value::Double(1.5),
            Value::Date("2026-01-01T00:00:00Z".into()),
            Value::Boolean(true),
            Value::Name(rep_root().clone()),
            Value::Path("/a/b".into()),
            Value::Reference(NodeId::random()),
        ];
        for value in &values {
            assert_ne!(value.value_type(), ValueType::Undefined);
        }
    }

    #[test]
    fn reference_target_only_for_references() {
        let target = NodeId::random();
        assert_eq!(Value::Reference(target).reference_target(), Some(target));
        assert_eq!(Value::Long(1).reference_target(), None);
    }

    #[test]
    fn try_from_text_parses_and_rejects() {
        assert_eq!(
            Value::try_from_text(ValueType::Long, "42").unwrap(),
            Value::Long(42)
        );
        assert_eq!(
            Value::try_from_text(ValueType::Boolean, "true").unwrap(),
            Value::Boolean(true)
        );
        let id = NodeId::random();
        assert_eq!(
            Value::try_from_text(ValueType::Reference, &id.to_string()).unwrap(),
            Value::Reference(id)
        );
        assert!(Value::try_from_text(ValueType::Long, "forty-two").is_err());
        assert!(Value::try_from_text(ValueType::Undefined, "x").is_err());
    }

    #[test]
    fn name_values_use_expanded_form() {
        let value = Value::try_from_text(ValueType::Name, &rep_root().to_expanded()).unwrap();
        assert_eq!(value, Value::Name(rep_root().clone()));
    }
}
