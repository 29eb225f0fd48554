use thiserror::Error;

/// Errors produced while constructing or decoding memdam values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid field name {name:?}: {reason}")]
    InvalidFieldName { name: String, reason: String },

    #[error("unknown field type: {0}")]
    UnknownFieldType(String),

    #[error("invalid namespace {namespace:?}: {reason}")]
    InvalidNamespace { namespace: String, reason: String },

    #[error("invalid blob name {name:?}: {reason}")]
    InvalidBlobName { name: String, reason: String },

    #[error("field {field}: expected a {expected} value")]
    TypeMismatch { field: String, expected: String },

    #[error("field {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("raw name {raw_name:?} is used by more than one field")]
    DuplicateRawName { raw_name: String },

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("LONG value {0} does not fit in 64 unsigned bits")]
    LongOutOfRange(u128),

    #[error("invalid time {value:?}: {reason}")]
    InvalidTime { value: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors produced while building or evaluating a query.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("operator {operator} expects {expected}")]
    InvalidOperand { operator: String, expected: String },

    #[error("invalid order field {0:?}")]
    InvalidOrderField(String),

    #[error("namespace can only be filtered with a top-level equality")]
    UnsupportedNamespaceFilter,

    #[error(transparent)]
    Type(#[from] TypeError),
}
