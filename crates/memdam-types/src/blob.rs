use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::TypeError;

/// Identifies one blob: a UUID plus a file extension.
///
/// The canonical name is `<32 lowercase hex>.<extension>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "(String, String)", into = "(String, String)")]
pub struct BlobReference {
    id: Uuid,
    extension: String,
}

impl BlobReference {
    /// Create a reference. The extension must match `[a-z0-9_]+`.
    pub fn new(id: Uuid, extension: impl Into<String>) -> Result<Self, TypeError> {
        let extension = extension.into();
        let valid = !extension.is_empty()
            && extension
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid {
            return Err(TypeError::InvalidBlobName {
                name: format!("{}.{}", id.simple(), extension),
                reason: "extension must match [a-z0-9_]+".into(),
            });
        }
        Ok(Self { id, extension })
    }

    /// A reference with a freshly generated id.
    pub fn generate(extension: impl Into<String>) -> Result<Self, TypeError> {
        Self::new(Uuid::new_v4(), extension)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn name(&self) -> String {
        format!("{}.{}", self.id.simple(), self.extension)
    }

    /// `[hex, extension]`
    pub fn to_json(&self) -> Value {
        Value::Array(vec![
            Value::String(self.id.simple().to_string()),
            Value::String(self.extension.clone()),
        ])
    }

    pub fn from_json(value: &Value) -> Result<Self, TypeError> {
        let invalid = || TypeError::InvalidBlobName {
            name: value.to_string(),
            reason: "expected [hex, extension]".into(),
        };
        match value.as_array().map(Vec::as_slice) {
            Some([Value::String(hex), Value::String(ext)]) => {
                Self::new(parse_hex_id(hex, &value.to_string())?, ext.clone())
            }
            _ => Err(invalid()),
        }
    }
}

fn parse_hex_id(hex: &str, name: &str) -> Result<Uuid, TypeError> {
    let invalid = |reason: &str| TypeError::InvalidBlobName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if hex.len() != 32 || !hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)) {
        return Err(invalid("id must be 32 lowercase hex characters"));
    }
    Uuid::try_parse(hex).map_err(|e| invalid(&e.to_string()))
}

impl fmt::Display for BlobReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.id.simple(), self.extension)
    }
}

impl FromStr for BlobReference {
    type Err = TypeError;

    /// Parse a canonical blob name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hex, ext) = s.split_once('.').ok_or_else(|| TypeError::InvalidBlobName {
            name: s.to_string(),
            reason: "missing extension".into(),
        })?;
        Self::new(parse_hex_id(hex, s)?, ext)
    }
}

impl TryFrom<(String, String)> for BlobReference {
    type Error = TypeError;

    fn try_from((hex, ext): (String, String)) -> Result<Self, Self::Error> {
        Self::new(parse_hex_id(&hex, &format!("{hex}.{ext}"))?, ext)
    }
}

impl From<BlobReference> for (String, String) {
    fn from(blob: BlobReference) -> Self {
        (blob.id.simple().to_string(), blob.extension)
    }
}
