//! Structured queries over events.
//!
//! A [`Query`] is a conjunction of [`QueryFilter`] trees, an ordering and an
//! optional limit. Filters arrive as loosely typed JSON; [`Query::plan`]
//! validates them into a [`QueryPlan`] that storage backends translate and
//! that can also be evaluated directly against events.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::QueryError;
use crate::event::Event;
use crate::field::{FieldName, FieldType, FieldValue, NAMESPACE_FIELD};
use crate::namespace::Namespace;

/// Supported filter operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Like,
    Match,
}

impl Operator {
    /// Parse an operator token. Keywords are case-insensitive.
    pub fn parse(token: &str) -> Result<Self, QueryError> {
        let op = match token.trim().to_ascii_lowercase().as_str() {
            "=" | "==" => Self::Eq,
            "!=" | "<>" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            "and" => Self::And,
            "or" => Self::Or,
            "like" => Self::Like,
            "match" => Self::Match,
            _ => return Err(QueryError::UnsupportedOperator(token.to_string())),
        };
        Ok(op)
    }

    /// SQL spelling.
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Like => "LIKE",
            Self::Match => "MATCH",
        }
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql())
    }
}

/// Either side of a filter: a nested filter or a JSON value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Filter(Box<QueryFilter>),
    Value(Value),
}

impl From<QueryFilter> for Operand {
    fn from(filter: QueryFilter) -> Self {
        Self::Filter(Box::new(filter))
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for Operand {
    fn from(value: &str) -> Self {
        Self::Value(Value::String(value.to_string()))
    }
}

impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        Self::Value(value.into())
    }
}

impl From<u64> for Operand {
    fn from(value: u64) -> Self {
        Self::Value(value.into())
    }
}

impl From<bool> for Operand {
    fn from(value: bool) -> Self {
        Self::Value(value.into())
    }
}

/// `{ "lhs": ..., "operator": ..., "rhs": ... }`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub lhs: Operand,
    pub operator: String,
    pub rhs: Operand,
}

impl QueryFilter {
    pub fn new(lhs: impl Into<Operand>, operator: &str, rhs: impl Into<Operand>) -> Self {
        Self {
            lhs: lhs.into(),
            operator: operator.to_string(),
            rhs: rhs.into(),
        }
    }

    pub fn eq(field: &str, value: impl Into<Operand>) -> Self {
        Self::new(field, "=", value)
    }

    pub fn and(lhs: QueryFilter, rhs: QueryFilter) -> Self {
        Self::new(lhs, "and", rhs)
    }

    pub fn or(lhs: QueryFilter, rhs: QueryFilter) -> Self {
        Self::new(lhs, "or", rhs)
    }

    /// Restrict results to one namespace.
    pub fn namespace(namespace: &str) -> Self {
        Self::eq(NAMESPACE_FIELD, namespace)
    }

    /// Validate this filter into a [`Condition`] tree.
    pub fn condition(&self) -> Result<Condition, QueryError> {
        let operator = Operator::parse(&self.operator)?;
        if operator.is_logical() {
            let (Operand::Filter(lhs), Operand::Filter(rhs)) = (&self.lhs, &self.rhs) else {
                return Err(QueryError::InvalidOperand {
                    operator: operator.to_string(),
                    expected: "filters on both sides".into(),
                });
            };
            let (lhs, rhs) = (Box::new(lhs.condition()?), Box::new(rhs.condition()?));
            return Ok(match operator {
                Operator::And => Condition::And(lhs, rhs),
                _ => Condition::Or(lhs, rhs),
            });
        }

        let (Operand::Value(Value::String(field)), Operand::Value(value)) = (&self.lhs, &self.rhs)
        else {
            return Err(QueryError::InvalidOperand {
                operator: operator.to_string(),
                expected: "a field name on the left and a value on the right".into(),
            });
        };
        let field = FieldName::parse(field)?;
        if matches!(operator, Operator::Like | Operator::Match) && !value.is_string() {
            return Err(QueryError::InvalidOperand {
                operator: operator.to_string(),
                expected: "a string pattern".into(),
            });
        }
        if operator == Operator::Like && !field.field_type().is_string_like() {
            return Err(QueryError::InvalidOperand {
                operator: operator.to_string(),
                expected: "a string-valued field".into(),
            });
        }
        if operator == Operator::Match && field.field_type() != FieldType::Text {
            return Err(QueryError::InvalidOperand {
                operator: operator.to_string(),
                expected: "a TEXT field".into(),
            });
        }
        Ok(Condition::Compare {
            field,
            operator,
            value: value.clone(),
        })
    }
}

/// A validated filter tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Compare {
        field: FieldName,
        operator: Operator,
        value: Value,
    },
}

impl Condition {
    fn mentions_namespace(&self) -> bool {
        match self {
            Self::And(a, b) | Self::Or(a, b) => a.mentions_namespace() || b.mentions_namespace(),
            Self::Compare { field, .. } => field.as_str() == NAMESPACE_FIELD,
        }
    }

    /// Evaluate against an event. Absent fields never match.
    pub fn matches(&self, event: &Event) -> Result<bool, QueryError> {
        match self {
            Self::And(a, b) => Ok(a.matches(event)? && b.matches(event)?),
            Self::Or(a, b) => Ok(a.matches(event)? || b.matches(event)?),
            Self::Compare {
                field,
                operator,
                value,
            } => {
                let Some(actual) = event.value_of(field.as_str()) else {
                    return Ok(false);
                };
                match operator {
                    Operator::Like | Operator::Match => {
                        let (Some(text), Some(pattern)) = (actual.as_str(), value.as_str()) else {
                            return Ok(false);
                        };
                        Ok(if *operator == Operator::Like {
                            like(pattern, text)
                        } else {
                            full_text_match(pattern, text)
                        })
                    }
                    _ => {
                        let expected = FieldValue::from_json(field, value)?;
                        let Some(ordering) = actual.compare(&expected) else {
                            return Ok(false);
                        };
                        Ok(match operator {
                            Operator::Eq => ordering == Ordering::Equal,
                            Operator::Ne => ordering != Ordering::Equal,
                            Operator::Lt => ordering == Ordering::Less,
                            Operator::Le => ordering != Ordering::Greater,
                            Operator::Gt => ordering == Ordering::Greater,
                            _ => ordering != Ordering::Less,
                        })
                    }
                }
            }
        }
    }
}

/// SQL `LIKE`: `%` matches any run, `_` one character, ASCII case-insensitive.
pub fn like(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();
    let t: Vec<char> = text.chars().map(|c| c.to_ascii_lowercase()).collect();
    // matched[j]: p[..i] matches t[..j]
    let mut matched = vec![false; t.len() + 1];
    matched[0] = true;
    for pc in &p {
        let mut next = vec![false; t.len() + 1];
        match pc {
            '%' => {
                let mut any = false;
                for j in 0..=t.len() {
                    any |= matched[j];
                    next[j] = any;
                }
            }
            _ => {
                for j in 1..=t.len() {
                    next[j] = matched[j - 1] && (*pc == '_' || *pc == t[j - 1]);
                }
            }
        }
        matched = next;
    }
    matched[t.len()]
}

/// Approximate a porter-tokenized full-text match: every query term must
/// match some word of `text`, comparing crude stems. A trailing `*` makes a
/// term a prefix.
pub fn full_text_match(query: &str, text: &str) -> bool {
    let words: Vec<String> = tokens(text).map(|w| stem(&w)).collect();
    query.split_whitespace().all(|term| {
        let lowered = term.to_lowercase();
        if let Some(prefix) = lowered.strip_suffix('*') {
            let prefix: String = tokens(prefix).collect();
            return tokens(text).any(|w| w.starts_with(&prefix));
        }
        let wanted: Vec<String> = tokens(&lowered).map(|w| stem(&w)).collect();
        wanted.iter().all(|w| words.contains(w))
    })
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn stem(word: &str) -> String {
    for suffix in ["ing", "ed", "es", "s"] {
        if let Some(base) = word.strip_suffix(suffix) {
            if base.len() >= 3 {
                return base.to_string();
            }
        }
    }
    word.to_string()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `{ "filters": [...], "order": [[field, ascending], ...], "limit": n }`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default, deserialize_with = "null_as_default")]
    pub filters: Vec<QueryFilter>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub order: Vec<(String, bool)>,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: &str, ascending: bool) -> Self {
        self.order.push((field.to_string(), ascending));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Validate the query.
    ///
    /// Top-level `type__namespace = <ns>` filters become the namespace scope;
    /// any other use of the namespace field is rejected.
    pub fn plan(&self) -> Result<QueryPlan, QueryError> {
        let mut scope = NamespaceScope::Any;
        let mut conditions = Vec::new();
        for filter in &self.filters {
            let condition = filter.condition()?;
            if let Condition::Compare {
                field,
                operator: Operator::Eq,
                value: Value::String(ns),
            } = &condition
            {
                if field.as_str() == NAMESPACE_FIELD {
                    scope = scope.narrow(Namespace::parse(ns)?);
                    continue;
                }
            }
            if condition.mentions_namespace() {
                return Err(QueryError::UnsupportedNamespaceFilter);
            }
            conditions.push(condition);
        }

        let order = self
            .order
            .iter()
            .map(|(field, ascending)| {
                FieldName::parse(field)
                    .map(|name| (name, *ascending))
                    .map_err(|_| QueryError::InvalidOrderField(field.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(QueryPlan {
            scope,
            conditions,
            order,
            limit: self.limit,
        })
    }

    pub fn matches(&self, event: &Event) -> Result<bool, QueryError> {
        self.plan()?.matches(event)
    }

    /// Filter, order and limit `events`.
    pub fn apply(&self, events: impl IntoIterator<Item = Event>) -> Result<Vec<Event>, QueryError> {
        let plan = self.plan()?;
        let mut kept = Vec::new();
        for event in events {
            if plan.matches(&event)? {
                kept.push(event);
            }
        }
        Ok(plan.order_and_limit(kept))
    }
}

/// Which namespaces a query can return.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NamespaceScope {
    Any,
    Only(Namespace),
    /// Contradictory namespace filters.
    Nothing,
}

impl NamespaceScope {
    fn narrow(self, namespace: Namespace) -> Self {
        match self {
            Self::Any => Self::Only(namespace),
            Self::Only(current) if current == namespace => Self::Only(current),
            _ => Self::Nothing,
        }
    }

    pub fn admits(&self, namespace: &Namespace) -> bool {
        match self {
            Self::Any => true,
            Self::Only(only) => only == namespace,
            Self::Nothing => false,
        }
    }
}

/// A validated [`Query`].
#[derive(Clone, Debug, PartialEq)]
pub struct QueryPlan {
    pub scope: NamespaceScope,
    pub conditions: Vec<Condition>,
    pub order: Vec<(FieldName, bool)>,
    pub limit: Option<u64>,
}

impl QueryPlan {
    pub fn matches(&self, event: &Event) -> Result<bool, QueryError> {
        if !self.scope.admits(event.namespace()) {
            return Ok(false);
        }
        for condition in &self.conditions {
            if !condition.matches(event)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Order two events. Absent values sort before present ones.
    pub fn compare(&self, a: &Event, b: &Event) -> Ordering {
        for (field, ascending) in &self.order {
            let ordering = match (a.value_of(field.as_str()), b.value_of(field.as_str())) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => x.compare(&y).unwrap_or(Ordering::Equal),
            };
            let ordering = if *ascending { ordering } else { ordering.reverse() };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Stable-sort by the plan's order, then apply the limit.
    pub fn order_and_limit(&self, mut events: Vec<Event>) -> Vec<Event> {
        if !self.order.is_empty() {
            events.sort_by(|a, b| self.compare(a, b));
        }
        if let Some(limit) = self.limit {
            events.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        events
    }
}
