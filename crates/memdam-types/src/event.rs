//! The event model and its canonical JSON form.

use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::blob::BlobReference;
use crate::error::TypeError;
use crate::field::{FieldName, FieldType, FieldValue, ID_FIELD, NAMESPACE_FIELD, TIME_FIELD};
use crate::namespace::Namespace;
use crate::time;

/// Raw names taken by the fixed fields.
const RESERVED_RAW_NAMES: [&str; 3] = ["id", "time", "type"];

/// One timestamped, namespaced record.
///
/// Immutable once built. Two events are equal when their canonical forms are
/// equal.
#[derive(Clone, Debug)]
pub struct Event {
    id: Uuid,
    time: DateTime<Utc>,
    namespace: Namespace,
    fields: BTreeMap<FieldName, FieldValue>,
}

impl Event {
    /// Build an event with a fresh id and the current time.
    pub fn new<I, K, V>(namespace: &str, fields: I) -> Result<Self, TypeError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<FieldValue>,
    {
        let namespace = Namespace::parse(namespace)?;
        let fields = fields
            .into_iter()
            .map(|(k, v)| Ok((FieldName::parse(k.as_ref())?, v.into())))
            .collect::<Result<Vec<_>, TypeError>>()?;
        Self::from_parts(Uuid::new_v4(), time::now(), namespace, fields)
    }

    /// Start building an event in `namespace`.
    pub fn builder(namespace: &str) -> EventBuilder {
        EventBuilder {
            namespace: namespace.to_string(),
            id: None,
            time: None,
            fields: Vec::new(),
        }
    }

    /// Assemble an event from already-parsed parts, validating every field.
    pub fn from_parts(
        id: Uuid,
        time: DateTime<Utc>,
        namespace: Namespace,
        fields: impl IntoIterator<Item = (FieldName, FieldValue)>,
    ) -> Result<Self, TypeError> {
        let mut raw_names: BTreeSet<String> =
            RESERVED_RAW_NAMES.iter().map(|s| s.to_string()).collect();
        let mut checked = BTreeMap::new();
        for (name, value) in fields {
            if !raw_names.insert(name.raw_name().to_string()) {
                return Err(TypeError::DuplicateRawName {
                    raw_name: name.raw_name().to_string(),
                });
            }
            let value = value.conform(&name)?;
            checked.insert(name, value);
        }
        Ok(Self {
            id,
            time: time::normalize(time),
            namespace,
            fields: checked,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Dynamic fields, keyed by full field name.
    pub fn fields(&self) -> &BTreeMap<FieldName, FieldValue> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Look up any field by name, including the fixed ones.
    pub fn value_of(&self, name: &str) -> Option<FieldValue> {
        match name {
            ID_FIELD => Some(FieldValue::Id(self.id)),
            TIME_FIELD => Some(FieldValue::Time(self.time)),
            NAMESPACE_FIELD => Some(FieldValue::Namespace(self.namespace.to_string())),
            _ => self.fields.get(name).cloned(),
        }
    }

    /// Every blob referenced by a FILE field, without duplicates.
    pub fn blob_references(&self) -> Vec<BlobReference> {
        let mut seen = BTreeSet::new();
        self.fields
            .values()
            .filter_map(|v| match v {
                FieldValue::File(blob) if seen.insert(blob.clone()) => Some(blob.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn has_blobs(&self) -> bool {
        self.fields
            .keys()
            .any(|name| name.field_type() == FieldType::File)
    }

    /// The canonical mapping: fixed keys plus every dynamic field.
    pub fn to_canonical_form(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(ID_FIELD.to_string(), FieldValue::Id(self.id).to_json());
        map.insert(TIME_FIELD.to_string(), FieldValue::Time(self.time).to_json());
        map.insert(
            NAMESPACE_FIELD.to_string(),
            Value::String(self.namespace.to_string()),
        );
        for (name, value) in &self.fields {
            map.insert(name.to_string(), value.to_json());
        }
        map
    }

    /// Decode a canonical mapping. `null` values are treated as absent.
    pub fn from_canonical_form(map: &Map<String, Value>) -> Result<Self, TypeError> {
        let fixed = |key: &str| -> Result<FieldValue, TypeError> {
            let value = map
                .get(key)
                .filter(|v| !v.is_null())
                .ok_or_else(|| TypeError::MissingField(key.to_string()))?;
            FieldValue::from_json(&FieldName::parse(key)?, value)
        };

        let id = match fixed(ID_FIELD)? {
            FieldValue::Id(id) => id,
            _ => return Err(TypeError::MissingField(ID_FIELD.into())),
        };
        let time = match fixed(TIME_FIELD)? {
            FieldValue::Time(t) => t,
            _ => return Err(TypeError::MissingField(TIME_FIELD.into())),
        };
        let namespace = match fixed(NAMESPACE_FIELD)? {
            FieldValue::Namespace(ns) => Namespace::parse(&ns)?,
            _ => return Err(TypeError::MissingField(NAMESPACE_FIELD.into())),
        };

        let mut fields = Vec::new();
        for (key, value) in map {
            if matches!(key.as_str(), ID_FIELD | TIME_FIELD | NAMESPACE_FIELD) || value.is_null() {
                continue;
            }
            let name = FieldName::parse(key)?;
            let value = FieldValue::from_json(&name, value)?;
            fields.push((name, value));
        }
        Self::from_parts(id, time, namespace, fields)
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.to_canonical_form())
    }

    pub fn from_json(value: &Value) -> Result<Self, TypeError> {
        match value {
            Value::Object(map) => Self::from_canonical_form(map),
            other => Err(TypeError::Serialization(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.to_canonical_form() == other.to_canonical_form()
    }
}

// NUMBER values are always finite, so equality is reflexive.
impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (key, value) in self.to_canonical_form() {
            key.hash(state);
            value.to_string().hash(state);
        }
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_canonical_form().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Self::from_canonical_form(&map).map_err(D::Error::custom)
    }
}

/// Incremental [`Event`] construction. Errors surface from [`build`](Self::build).
#[derive(Debug)]
pub struct EventBuilder {
    namespace: String,
    id: Option<Uuid>,
    time: Option<DateTime<Utc>>,
    fields: Vec<(String, FieldValue)>,
}

impl EventBuilder {
    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn field(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.push((name.to_string(), value.into()));
        self
    }

    pub fn build(self) -> Result<Event, TypeError> {
        let namespace = Namespace::parse(&self.namespace)?;
        let fields = self
            .fields
            .into_iter()
            .map(|(k, v)| Ok((FieldName::parse(&k)?, v)))
            .collect::<Result<Vec<_>, TypeError>>()?;
        Event::from_parts(
            self.id.unwrap_or_else(Uuid::new_v4),
            self.time.unwrap_or_else(time::now),
            namespace,
            fields,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn hash_of(event: &Event) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        let mut hasher = DefaultHasher::new();
        event.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn negative_zero_hashes_like_zero() {
        let id = Uuid::new_v4();
        let at = time::now();
        let namespace = Namespace::parse("test.ns").unwrap();
        let field = FieldName::parse("x__number").unwrap();
        let positive =
            Event::from_parts(id, at, namespace.clone(), [(field.clone(), FieldValue::Number(0.0))]).unwrap();
        let negative = Event::from_parts(id, at, namespace, [(field, FieldValue::Number(-0.0))]).unwrap();

        assert_eq!(positive, negative);
        assert_eq!(hash_of(&positive), hash_of(&negative));
        assert_eq!(negative.to_json()["x__number"], json!(0.0));
    }

    fn sample() -> Event {
        Event::builder("com.example.cpu")
            .field("cpu__number__percent", 12.5)
            .field("host__string", "laptop")
            .field("note__text", "the quick brown fox")
            .field("level__enum", "high")
            .field("payload__raw", b"\x00\x01\x02".to_vec())
            .field("on_battery__bool", false)
            .field("seen__time", time::now())
            .field("parent__id", Uuid::new_v4())
            .field("bytes__long", u64::MAX)
            .field("shot__file", BlobReference::generate("jpg").unwrap())
            .field("source__namespace", "com.example.source")
            .build()
            .unwrap()
    }

    #[test]
    fn canonical_form_has_fixed_keys() {
        let event = sample();
        let form = event.to_canonical_form();
        assert_eq!(form[ID_FIELD], json!(event.id().simple().to_string()));
        assert_eq!(form[NAMESPACE_FIELD], json!("com.example.cpu"));
        assert!(form[TIME_FIELD].as_str().unwrap().ends_with('Z'));
        assert_eq!(form.len(), 3 + 11);
    }

    #[test]
    fn canonical_form_roundtrip() {
        let event = sample();
        let decoded = Event::from_canonical_form(&event.to_canonical_form()).unwrap();
        assert_eq!(decoded, event);
        assert_eq!(decoded.fields(), event.fields());
    }

    #[test]
    fn serde_uses_canonical_form() {
        let event = sample();
        let text = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn rejects_reserved_raw_names() {
        for name in ["id__string", "time__number", "type__enum"] {
            let err = Event::new("a.b", [(name, FieldValue::from("x"))]).unwrap_err();
            assert!(matches!(err, TypeError::DuplicateRawName { .. }), "{name}");
        }
    }

    #[test]
    fn rejects_duplicate_raw_names() {
        let err = Event::builder("a.b")
            .field("x__number", 1.0)
            .field("x__string", "one")
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            TypeError::DuplicateRawName {
                raw_name: "x".into()
            }
        );
    }

    #[test]
    fn rejects_invalid_namespace() {
        assert!(Event::new("Not A Namespace", Vec::<(&str, FieldValue)>::new()).is_err());
    }

    #[test]
    fn missing_fixed_field_is_an_error() {
        let mut form = sample().to_canonical_form();
        form.remove(TIME_FIELD);
        assert_eq!(
            Event::from_canonical_form(&form).unwrap_err(),
            TypeError::MissingField(TIME_FIELD.into())
        );
    }

    #[test]
    fn null_fields_are_absent() {
        let mut form = sample().to_canonical_form();
        form.insert("extra__number".into(), Value::Null);
        let event = Event::from_canonical_form(&form).unwrap();
        assert!(event.field("extra__number").is_none());
    }

    #[test]
    fn value_of_covers_fixed_fields() {
        let event = sample();
        assert_eq!(event.value_of(ID_FIELD), Some(FieldValue::Id(event.id())));
        assert_eq!(
            event.value_of(NAMESPACE_FIELD),
            Some(FieldValue::Namespace("com.example.cpu".into()))
        );
        assert_eq!(event.value_of("missing__number"), None);
    }

    #[test]
    fn blob_references_are_deduplicated() {
        let blob = BlobReference::generate("png").unwrap();
        let event = Event::builder("a.b")
            .field("front__file", blob.clone())
            .field("back__file", blob.clone())
            .build()
            .unwrap();
        assert!(event.has_blobs());
        assert_eq!(event.blob_references(), vec![blob]);

        let plain = Event::new("a.b", [("x__number", 1.0)]).unwrap();
        assert!(!plain.has_blobs());
        assert!(plain.blob_references().is_empty());
    }

    #[test]
    fn equal_events_hash_equal() {
        use std::collections::hash_map::DefaultHasher;
        let event = sample();
        let copy = Event::from_json(&event.to_json()).unwrap();
        let hash = |e: &Event| {
            let mut h = DefaultHasher::new();
            e.hash(&mut h);
            h.finish()
        };
        assert_eq!(hash(&event), hash(&copy));
    }

    proptest! {
        #[test]
        fn arbitrary_events_roundtrip(
            number in -1.0e12f64..1.0e12,
            long in any::<u64>(),
            text in "[ -~]{0,40}",
            raw in proptest::collection::vec(any::<u8>(), 0..64),
            flag in any::<bool>(),
            micros in 0i64..4_000_000_000_000_000,
        ) {
            let event = Event::builder("prop.test")
                .time(time::from_micros(micros).unwrap())
                .field("n__number", number)
                .field("l__long", long)
                .field("t__text", text)
                .field("r__raw", raw)
                .field("b__bool", flag)
                .build()
                .unwrap();
            let back = Event::from_json(&event.to_json()).unwrap();
            prop_assert_eq!(back, event);
        }
    }
}
