//! Translation of validated query conditions into SQL predicates.

use memdam_types::{Condition, FieldName, FieldType, FieldValue, Operator, QueryError, QueryPlan};
use rusqlite::types::Value;

use super::codec;
use super::schema::{docs_table, quote, TableSchema};

/// A `SELECT` for one table with its bound parameters.
#[derive(Debug)]
pub(crate) struct TableQuery {
    pub(crate) sql: String,
    pub(crate) params: Vec<Value>,
}

/// Build the per-table `SELECT ... WHERE ... ORDER BY ... LIMIT` for `plan`.
///
/// Comparisons on columns the table lacks are false, so a top-level filter on
/// a missing column yields no rows. Order terms on missing columns are
/// skipped.
pub(crate) fn table_query(schema: &TableSchema, plan: &QueryPlan) -> Result<TableQuery, QueryError> {
    let mut params = Vec::new();
    let mut sql = schema.select_sql();

    let predicates = plan
        .conditions
        .iter()
        .map(|c| predicate(schema, c, &mut params))
        .collect::<Result<Vec<_>, _>>()?;
    if !predicates.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&predicates.join(" AND "));
    }

    let order: Vec<String> = plan
        .order
        .iter()
        .filter(|(field, _)| schema.has_column(field.as_str()))
        .map(|(field, ascending)| {
            format!(
                "{} {}",
                schema.value_expr(field),
                if *ascending { "ASC" } else { "DESC" }
            )
        })
        .collect();
    if !order.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));
    }

    if let Some(limit) = plan.limit {
        sql.push_str(" LIMIT ?");
        params.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
    }
    Ok(TableQuery { sql, params })
}

fn predicate(
    schema: &TableSchema,
    condition: &Condition,
    params: &mut Vec<Value>,
) -> Result<String, QueryError> {
    match condition {
        Condition::And(a, b) => Ok(format!(
            "({} AND {})",
            predicate(schema, a, params)?,
            predicate(schema, b, params)?
        )),
        Condition::Or(a, b) => Ok(format!(
            "({} OR {})",
            predicate(schema, a, params)?,
            predicate(schema, b, params)?
        )),
        Condition::Compare {
            field,
            operator,
            value,
        } => {
            if !schema.has_column(field.as_str()) {
                return Ok("0".to_string());
            }
            match operator {
                Operator::Match => {
                    params.push(Value::Text(pattern(value)));
                    Ok(format!(
                        "{table}.{field} IN (SELECT docid FROM {docs} WHERE data MATCH ?)",
                        table = quote(&schema.table),
                        docs = docs_table(&schema.table, field)
                    ))
                }
                Operator::Like => {
                    params.push(Value::Text(pattern(value)));
                    Ok(format!("{} LIKE ?", schema.value_expr(field)))
                }
                _ => {
                    params.push(bind(field, value)?);
                    Ok(format!("{} {} ?", schema.value_expr(field), operator.sql()))
                }
            }
        }
    }
}

fn pattern(value: &serde_json::Value) -> String {
    value.as_str().unwrap_or_default().to_string()
}

/// Encode a comparison operand the way `field` is stored.
fn bind(field: &FieldName, value: &serde_json::Value) -> Result<Value, QueryError> {
    let decoded = FieldValue::from_json(field, value)?;
    Ok(match (field.field_type(), decoded) {
        (FieldType::Text, FieldValue::Text(s)) => Value::Text(s),
        (_, v) => codec::encode(&v),
    })
}
