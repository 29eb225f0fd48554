//! Field names, field types, and typed field values.
//!
//! Every dynamic event attribute is named `rawname__type(__secondarytype)?`.
//! The name is parsed once into a [`FieldName`]; the attribute's value is a
//! [`FieldValue`] whose variant must agree with the declared type.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::blob::BlobReference;
use crate::error::TypeError;
use crate::namespace::Namespace;
use crate::time;

/// Canonical name of the fixed event id field.
pub const ID_FIELD: &str = "id__id";
/// Canonical name of the fixed event time field.
pub const TIME_FIELD: &str = "time__time";
/// Canonical name of the fixed event namespace field.
pub const NAMESPACE_FIELD: &str = "type__namespace";

/// Separator between the parts of a field name.
const SEPARATOR: &str = "__";

/// The fixed set of field types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Number,
    String,
    Text,
    Enum,
    Raw,
    Bool,
    Time,
    Id,
    Long,
    File,
    Namespace,
}

impl FieldType {
    pub const ALL: [FieldType; 11] = [
        Self::Number,
        Self::String,
        Self::Text,
        Self::Enum,
        Self::Raw,
        Self::Bool,
        Self::Time,
        Self::Id,
        Self::Long,
        Self::File,
        Self::Namespace,
    ];

    /// The lowercase spelling used inside field names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::String => "string",
            Self::Text => "text",
            Self::Enum => "enum",
            Self::Raw => "raw",
            Self::Bool => "bool",
            Self::Time => "time",
            Self::Id => "id",
            Self::Long => "long",
            Self::File => "file",
            Self::Namespace => "namespace",
        }
    }

    /// Types whose values are plain strings.
    pub fn is_string_like(&self) -> bool {
        matches!(
            self,
            Self::String | Self::Text | Self::Enum | Self::Namespace
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TypeError::UnknownFieldType(s.to_string()))
    }
}

/// Returns `true` if `s` matches `[a-z][a-z0-9]*(_[a-z0-9]+)*`.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    if s.ends_with('_') || s.contains(SEPARATOR) {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// A parsed field name.
///
/// Equality, ordering and hashing only consider the full name, so a
/// `FieldName` can be looked up in maps by `&str`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldName {
    full: String,
    raw: String,
    field_type: FieldType,
    secondary: Option<String>,
}

impl FieldName {
    /// Parse a field name, failing if it does not match the grammar.
    pub fn parse(name: &str) -> Result<Self, TypeError> {
        let invalid = |reason: &str| TypeError::InvalidFieldName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = name.split(SEPARATOR).collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(invalid("expected rawname__type or rawname__type__secondary"));
        }
        if !is_identifier(parts[0]) {
            return Err(invalid("raw name must match [a-z][a-z0-9]*(_[a-z0-9]+)*"));
        }
        let field_type = parts[1]
            .parse::<FieldType>()
            .map_err(|_| invalid(&format!("unknown type {:?}", parts[1])))?;
        let secondary = match parts.get(2) {
            Some(s) if is_identifier(s) => Some(s.to_string()),
            Some(_) => {
                return Err(invalid(
                    "secondary type must match [a-z][a-z0-9]*(_[a-z0-9]+)*",
                ))
            }
            None => None,
        };

        Ok(Self {
            full: name.to_string(),
            raw: parts[0].to_string(),
            field_type,
            secondary,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// The name with type information stripped off.
    pub fn raw_name(&self) -> &str {
        &self.raw
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Unit (NUMBER) or encoding (STRING) qualifier, if any.
    pub fn secondary_type(&self) -> Option<&str> {
        self.secondary.as_deref()
    }
}

impl PartialEq for FieldName {
    fn eq(&self, other: &Self) -> bool {
        self.full == other.full
    }
}

impl Eq for FieldName {}

impl Hash for FieldName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.full.hash(state);
    }
}

impl PartialOrd for FieldName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FieldName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.full.cmp(&other.full)
    }
}

impl Borrow<str> for FieldName {
    fn borrow(&self) -> &str {
        &self.full
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl FromStr for FieldName {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FieldName {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FieldName> for String {
    fn from(name: FieldName) -> Self {
        name.full
    }
}

/// The field type named by `name`.
pub fn field_type(name: &str) -> Result<FieldType, TypeError> {
    FieldName::parse(name).map(|n| n.field_type())
}

/// The raw name of `name`.
pub fn raw_name(name: &str) -> Result<String, TypeError> {
    FieldName::parse(name).map(|n| n.raw)
}

/// The secondary type of `name`, if it has one.
pub fn secondary_type(name: &str) -> Result<Option<String>, TypeError> {
    FieldName::parse(name).map(|n| n.secondary)
}

/// A typed field value. One variant per [`FieldType`].
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Number(f64),
    String(String),
    Text(String),
    Enum(String),
    Raw(Vec<u8>),
    Bool(bool),
    Time(DateTime<Utc>),
    Id(Uuid),
    Long(u64),
    File(BlobReference),
    Namespace(String),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Number(_) => FieldType::Number,
            Self::String(_) => FieldType::String,
            Self::Text(_) => FieldType::Text,
            Self::Enum(_) => FieldType::Enum,
            Self::Raw(_) => FieldType::Raw,
            Self::Bool(_) => FieldType::Bool,
            Self::Time(_) => FieldType::Time,
            Self::Id(_) => FieldType::Id,
            Self::Long(_) => FieldType::Long,
            Self::File(_) => FieldType::File,
            Self::Namespace(_) => FieldType::Namespace,
        }
    }

    /// Build a LONG value, rejecting anything that does not fit in a `u64`.
    pub fn long(value: u128) -> Result<Self, TypeError> {
        u64::try_from(value)
            .map(Self::Long)
            .map_err(|_| TypeError::LongOutOfRange(value))
    }

    /// The string payload of string-like variants.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Text(s) | Self::Enum(s) | Self::Namespace(s) => Some(s),
            _ => None,
        }
    }

    /// Check this value against the type declared by `name`, normalizing it.
    ///
    /// String-like values are re-tagged with the declared string type, TIME
    /// values are truncated to microseconds.
    pub fn conform(self, name: &FieldName) -> Result<Self, TypeError> {
        let declared = name.field_type();
        let mismatch = || TypeError::TypeMismatch {
            field: name.to_string(),
            expected: declared.to_string(),
        };

        if declared.is_string_like() {
            let s = match self {
                Self::String(s) | Self::Text(s) | Self::Enum(s) | Self::Namespace(s) => s,
                _ => return Err(mismatch()),
            };
            return Ok(match declared {
                FieldType::String => Self::String(s),
                FieldType::Text => Self::Text(s),
                FieldType::Enum => Self::Enum(s),
                _ => {
                    Namespace::parse(&s)?;
                    Self::Namespace(s)
                }
            });
        }
        if self.field_type() != declared {
            return Err(mismatch());
        }
        match self {
            Self::Number(n) if !n.is_finite() => Err(TypeError::InvalidValue {
                field: name.to_string(),
                reason: "NUMBER values must be finite".into(),
            }),
            // -0.0 and 0.0 compare equal, so they must encode the same.
            Self::Number(n) if n == 0.0 => Ok(Self::Number(0.0)),
            Self::Time(t) => Ok(Self::Time(time::normalize(t))),
            v => Ok(v),
        }
    }

    /// Canonical JSON encoding of this value.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Number(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
            Self::String(s) | Self::Text(s) | Self::Enum(s) | Self::Namespace(s) => {
                Value::String(s.clone())
            }
            Self::Raw(bytes) => Value::String(BASE64.encode(bytes)),
            Self::Bool(b) => Value::Bool(*b),
            Self::Time(t) => Value::String(time::to_iso8601(t)),
            Self::Id(id) => Value::String(id.simple().to_string()),
            Self::Long(v) => Value::Number((*v).into()),
            Self::File(blob) => blob.to_json(),
        }
    }

    /// Decode a canonical JSON value for the field `name`.
    pub fn from_json(name: &FieldName, value: &Value) -> Result<Self, TypeError> {
        let invalid = |reason: &str| TypeError::InvalidValue {
            field: name.to_string(),
            reason: reason.to_string(),
        };
        let as_str = || value.as_str().ok_or_else(|| invalid("expected a JSON string"));

        let decoded = match name.field_type() {
            FieldType::Number => Self::Number(value.as_f64().ok_or_else(|| invalid("expected a JSON number"))?),
            FieldType::String => Self::String(as_str()?.to_string()),
            FieldType::Text => Self::Text(as_str()?.to_string()),
            FieldType::Enum => Self::Enum(as_str()?.to_string()),
            FieldType::Namespace => Self::Namespace(as_str()?.to_string()),
            FieldType::Raw => Self::Raw(
                BASE64
                    .decode(as_str()?)
                    .map_err(|e| invalid(&format!("invalid base64: {e}")))?,
            ),
            FieldType::Bool => Self::Bool(value.as_bool().ok_or_else(|| invalid("expected a JSON boolean"))?),
            FieldType::Time => Self::Time(time::parse_iso8601(as_str()?)?),
            FieldType::Id => Self::Id(
                Uuid::try_parse(as_str()?).map_err(|e| invalid(&format!("invalid id: {e}")))?,
            ),
            FieldType::Long => Self::Long(
                value
                    .as_u64()
                    .ok_or_else(|| invalid("expected an unsigned integer below 2^64"))?,
            ),
            FieldType::File => Self::File(BlobReference::from_json(value)?),
        };
        decoded.conform(name)
    }

    /// Compare two values of the same variant. `None` for mixed variants.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.partial_cmp(b),
            (Self::Raw(a), Self::Raw(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Time(a), Self::Time(b)) => Some(a.cmp(b)),
            (Self::Id(a), Self::Id(b)) => Some(a.cmp(b)),
            (Self::Long(a), Self::Long(b)) => Some(a.cmp(b)),
            (Self::File(a), Self::File(b)) => Some(a.name().cmp(&b.name())),
            (a, b) => match (a.as_str(), b.as_str()) {
                (Some(x), Some(y)) if a.field_type() == b.field_type() => Some(x.cmp(y)),
                _ => None,
            },
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        Self::Long(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Raw(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Time(v)
    }
}

impl From<Uuid> for FieldValue {
    fn from(v: Uuid) -> Self {
        Self::Id(v)
    }
}

impl From<BlobReference> for FieldValue {
    fn from(v: BlobReference) -> Self {
        Self::File(v)
    }
}
