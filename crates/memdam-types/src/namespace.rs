use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A dot-separated event namespace such as `com.example.cpu`.
///
/// Each segment matches `[a-z][a-z0-9]*`. Segments never contain `_`, so the
/// table name (dots replaced with underscores) maps back to exactly one
/// namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let invalid = |reason: &str| TypeError::InvalidNamespace {
            namespace: s.to_string(),
            reason: reason.to_string(),
        };

        if s.is_empty() {
            return Err(invalid("namespace is empty"));
        }
        for segment in s.split('.') {
            let mut chars = segment.chars();
            match chars.next() {
                None => return Err(invalid("empty segment")),
                Some(c) if !c.is_ascii_lowercase() => {
                    return Err(invalid("segments must start with a lowercase letter"))
                }
                _ => {}
            }
            if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
                return Err(invalid("segments may only contain [a-z0-9]"));
            }
        }
        Ok(Self(s.to_string()))
    }

    /// Recover the namespace stored in the table `table`.
    pub fn from_table_name(table: &str) -> Result<Self, TypeError> {
        Self::parse(&table.replace('_', "."))
    }

    /// The storage table name for this namespace.
    pub fn table_name(&self) -> String {
        self.0.replace('.', "_")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Namespace {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Namespace {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_roundtrip() {
        let ns = Namespace::parse("com.example.cpu2").unwrap();
        assert_eq!(ns.table_name(), "com_example_cpu2");
        assert_eq!(Namespace::from_table_name("com_example_cpu2").unwrap(), ns);
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", ".", "a..b", "a.", "A.b", "a_b", "1a", "a.b-c", "a b"] {
            assert!(Namespace::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }
}
