//! Field values to and from SQLite storage values.
//!
//! | type      | column  | stored as                          |
//! |-----------|---------|------------------------------------|
//! | NUMBER    | FLOAT   | real                               |
//! | STRING    | TEXT    | text                               |
//! | TEXT      | INTEGER | row id into the companion FTS table |
//! | ENUM      | TEXT    | text                               |
//! | RAW       | BLOB    | bytes                              |
//! | BOOL      | BOOL    | 0 / 1                              |
//! | TIME      | INTEGER | microseconds since the Unix epoch  |
//! | ID        | BLOB    | 16 UUID bytes                      |
//! | LONG      | INTEGER | u64 with the top bit flipped       |
//! | FILE      | TEXT    | canonical blob name                |
//! | NAMESPACE | TEXT    | text                               |

use memdam_types::{time, BlobReference, FieldName, FieldType, FieldValue, TypeError};
use rusqlite::types::{Value, ValueRef};
use uuid::Uuid;

const LONG_BIAS: u64 = 1 << 63;

/// Column type for a field type.
pub(crate) fn sql_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Number => "FLOAT",
        FieldType::String | FieldType::Enum | FieldType::File | FieldType::Namespace => "TEXT",
        FieldType::Text | FieldType::Time | FieldType::Long => "INTEGER",
        FieldType::Raw | FieldType::Id => "BLOB",
        FieldType::Bool => "BOOL",
    }
}

/// Storage value for `value`. TEXT values encode as their text; the caller
/// stores them in the companion table.
pub(crate) fn encode(value: &FieldValue) -> Value {
    match value {
        FieldValue::Number(n) => Value::Real(*n),
        FieldValue::String(s)
        | FieldValue::Text(s)
        | FieldValue::Enum(s)
        | FieldValue::Namespace(s) => Value::Text(s.clone()),
        FieldValue::Raw(bytes) => Value::Blob(bytes.clone()),
        FieldValue::Bool(b) => Value::Integer(i64::from(*b)),
        FieldValue::Time(t) => Value::Integer(time::to_micros(t)),
        FieldValue::Id(id) => encode_id(*id),
        FieldValue::Long(v) => Value::Integer(long_to_sql(*v)),
        FieldValue::File(blob) => Value::Text(blob.name()),
    }
}

/// Map a u64 onto i64 keeping its order, so SQL comparisons and sorting on
/// LONG columns agree with numeric order.
fn long_to_sql(v: u64) -> i64 {
    (v ^ LONG_BIAS) as i64
}

fn long_from_sql(i: i64) -> u64 {
    (i as u64) ^ LONG_BIAS
}

pub(crate) fn encode_id(id: Uuid) -> Value {
    Value::Blob(id.as_bytes().to_vec())
}

fn invalid(name: &FieldName, stored: &str) -> TypeError {
    TypeError::InvalidValue {
        field: name.to_string(),
        reason: format!("cannot decode stored {stored}"),
    }
}

/// Decode a stored value. `NULL` means the event has no such field.
///
/// For TEXT fields `value` must already be the joined text, not the row id.
pub(crate) fn decode(name: &FieldName, value: ValueRef<'_>) -> Result<Option<FieldValue>, TypeError> {
    let decoded = match (name.field_type(), value) {
        (_, ValueRef::Null) => return Ok(None),
        (FieldType::Number, ValueRef::Real(n)) => FieldValue::Number(n),
        (FieldType::Number, ValueRef::Integer(n)) => FieldValue::Number(n as f64),
        (FieldType::String, ValueRef::Text(s)) => FieldValue::String(utf8(name, s)?),
        (FieldType::Text, ValueRef::Text(s)) => FieldValue::Text(utf8(name, s)?),
        (FieldType::Enum, ValueRef::Text(s)) => FieldValue::Enum(utf8(name, s)?),
        (FieldType::Namespace, ValueRef::Text(s)) => FieldValue::Namespace(utf8(name, s)?),
        (FieldType::Raw, ValueRef::Blob(b)) => FieldValue::Raw(b.to_vec()),
        (FieldType::Bool, ValueRef::Integer(i)) => FieldValue::Bool(i != 0),
        (FieldType::Time, ValueRef::Integer(i)) => FieldValue::Time(time::from_micros(i)?),
        (FieldType::Id, ValueRef::Blob(b)) => FieldValue::Id(decode_id(b).ok_or_else(|| invalid(name, "id"))?),
        (FieldType::Long, ValueRef::Integer(i)) => FieldValue::Long(long_from_sql(i)),
        (FieldType::File, ValueRef::Text(s)) => FieldValue::File(utf8(name, s)?.parse::<BlobReference>()?),
        (_, other) => return Err(invalid(name, &format!("{:?}", other.data_type()))),
    };
    Ok(Some(decoded))
}

pub(crate) fn decode_id(bytes: &[u8]) -> Option<Uuid> {
    Uuid::from_slice(bytes).ok()
}

fn utf8(name: &FieldName, bytes: &[u8]) -> Result<String, TypeError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| invalid(name, "non-UTF-8 text"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(name: &str, value: FieldValue) {
        let name = FieldName::parse(name).unwrap();
        let stored = encode(&value);
        let back = decode(&name, ValueRef::from(&stored)).unwrap();
        assert_eq!(back, Some(value));
    }

    #[test]
    fn long_storage_preserves_order() {
        roundtrip("n__long", FieldValue::Long(u64::MAX));
        roundtrip("n__long", FieldValue::Long(0));
        assert_eq!(encode(&FieldValue::Long(0)), Value::Integer(i64::MIN));
        assert_eq!(encode(&FieldValue::Long(u64::MAX)), Value::Integer(i64::MAX));

        let stored: Vec<i64> = [0, 5, 1 << 63, u64::MAX].into_iter().map(long_to_sql).collect();
        assert!(stored.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn id_is_sixteen_bytes() {
        let id = Uuid::new_v4();
        match encode_id(id) {
            Value::Blob(b) => assert_eq!(b.len(), 16),
            other => panic!("unexpected {other:?}"),
        }
        roundtrip("parent__id", FieldValue::Id(id));
    }

    #[test]
    fn typed_values() {
        roundtrip("x__number", FieldValue::Number(0.25));
        roundtrip("flag__bool", FieldValue::Bool(true));
        roundtrip("at__time", FieldValue::Time(time::now()));
        roundtrip("shot__file", FieldValue::File(BlobReference::generate("jpg").unwrap()));
        roundtrip("payload__raw", FieldValue::Raw(vec![0, 159, 146, 150]));
    }

    #[test]
    fn null_is_absent() {
        let name = FieldName::parse("x__number").unwrap();
        assert_eq!(decode(&name, ValueRef::Null).unwrap(), None);
    }

    #[test]
    fn wrong_storage_class_is_an_error() {
        let name = FieldName::parse("flag__bool").unwrap();
        assert!(decode(&name, ValueRef::Text(b"yes")).is_err());
    }

    #[test]
    fn column_types() {
        assert_eq!(sql_type(FieldType::Text), "INTEGER");
        assert_eq!(sql_type(FieldType::Id), "BLOB");
        assert_eq!(sql_type(FieldType::Bool), "BOOL");
        assert_eq!(sql_type(FieldType::Number), "FLOAT");
    }
}
