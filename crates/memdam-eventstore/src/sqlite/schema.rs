//! Per-namespace table layout and additive schema evolution.
//!
//! Table and column names are spliced into SQL text. Both come from validated
//! namespaces and field names, so they only ever contain `[a-z0-9_]`. Table
//! names are still quoted: a single-segment namespace can be a keyword such as
//! `order`. Column names always contain `__` and never are.

use std::thread;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use memdam_types::{FieldName, FieldType, Namespace, ID_FIELD, TIME_FIELD};
use rusqlite::{Connection, ErrorCode, TransactionBehavior};
use tracing::{debug, warn};

use super::codec;
use crate::error::{EventstoreError, EventstoreResult};

/// Internal integer row key, distinct from the event id.
pub(crate) const ROW_ID: &str = "_id";

const COLUMN_RETRIES: usize = 5;

/// Prefix for tables whose namespace would land in SQLite's reserved
/// `sqlite_` name space.
const RESERVED_PREFIX: &str = "sqlite_";
const ESCAPE_PREFIX: &str = "ns_";

/// Name of the table holding `namespace` inside its database file.
///
/// This is the namespace with dots replaced by underscores, except that
/// names SQLite reserves for itself get an `ns_` prefix.
pub(crate) fn table_name(namespace: &Namespace) -> String {
    let table = namespace.table_name();
    if table.starts_with(RESERVED_PREFIX) {
        format!("{ESCAPE_PREFIX}{table}")
    } else {
        table
    }
}

/// `ident` as a quoted SQL identifier.
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

pub(crate) fn index_name(table: &str, column: &str) -> String {
    quote(&format!("{table}__{column}__asc"))
}

/// Quoted name of the full-text companion table for a TEXT field.
pub(crate) fn docs_table(table: &str, field: &FieldName) -> String {
    quote(&format!("{table}__{field}__docs"))
}

/// DDL for a freshly created namespace table.
pub(crate) fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE {name} ({ROW_ID} INTEGER PRIMARY KEY, {TIME_FIELD} INTEGER, {ID_FIELD} BLOB);\n\
         CREATE INDEX {time_index} ON {name} ({TIME_FIELD} ASC);\n\
         CREATE INDEX {id_index} ON {name} ({ID_FIELD} ASC);",
        name = quote(table),
        time_index = index_name(table, TIME_FIELD),
        id_index = index_name(table, ID_FIELD),
    )
}

/// The dynamic columns of one namespace table.
#[derive(Debug, Clone)]
pub(crate) struct TableSchema {
    pub(crate) table: String,
    pub(crate) fields: Vec<FieldName>,
}

impl TableSchema {
    /// Read the current columns of `table`.
    pub(crate) fn load(conn: &Connection, table: &str) -> EventstoreResult<Self> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut fields = Vec::new();
        for name in names {
            if name == ROW_ID || name == TIME_FIELD || name == ID_FIELD {
                continue;
            }
            let field = FieldName::parse(&name).map_err(|e| EventstoreError::Corrupt {
                table: table.to_string(),
                reason: e.to_string(),
            })?;
            fields.push(field);
        }
        Ok(Self {
            table: table.to_string(),
            fields,
        })
    }

    /// Whether `name` is a column of this table, fixed columns included.
    pub(crate) fn has_column(&self, name: &str) -> bool {
        name == TIME_FIELD || name == ID_FIELD || self.fields.iter().any(|f| f.as_str() == name)
    }

    pub(crate) fn text_fields(&self) -> impl Iterator<Item = &FieldName> {
        self.fields
            .iter()
            .filter(|f| f.field_type() == FieldType::Text)
    }

    /// SQL expression yielding the stored value of `field`. TEXT fields are
    /// resolved through their companion table.
    pub(crate) fn value_expr(&self, field: &FieldName) -> String {
        let name = quote(&self.table);
        if field.field_type() == FieldType::Text {
            format!(
                "(SELECT data FROM {docs} WHERE docid = {name}.{field})",
                docs = docs_table(&self.table, field)
            )
        } else {
            format!("{name}.{field}")
        }
    }

    /// `SELECT` over every column, dynamic columns in `self.fields` order
    /// starting at index 2.
    pub(crate) fn select_sql(&self) -> String {
        let name = quote(&self.table);
        let mut columns = vec![format!("{name}.{TIME_FIELD}"), format!("{name}.{ID_FIELD}")];
        columns.extend(self.fields.iter().map(|f| self.value_expr(f)));
        format!("SELECT {} FROM {name}", columns.join(", "))
    }
}

fn is_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn is_duplicate_column(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("duplicate column name"))
}

/// Add `field` as a column of `table`, with its index and, for TEXT fields,
/// its full-text table.
///
/// Runs in its own exclusive transaction, retried with backoff while the
/// database is busy. A column that already exists counts as added.
pub(crate) fn add_column(conn: &mut Connection, table: &str, field: &FieldName) -> EventstoreResult<()> {
    let backoff = ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(20))
        .with_max_delay(Duration::from_millis(500))
        .with_max_times(COLUMN_RETRIES)
        .with_jitter()
        .build();

    let mut last_error = None;
    for (attempt, delay) in std::iter::once(Duration::ZERO).chain(backoff).enumerate() {
        if attempt > 0 {
            thread::sleep(delay);
        }
        match try_add_column(conn, table, field) {
            Ok(()) => return Ok(()),
            Err(e) if is_contention(&e) => {
                warn!(
                    table,
                    column = %field,
                    attempt = attempt + 1,
                    error = %e,
                    "schema change contended, retrying"
                );
                last_error = Some(e);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(last_error
        .map(EventstoreError::from)
        .unwrap_or_else(|| EventstoreError::Corrupt {
            table: table.to_string(),
            reason: format!("could not add column {field}"),
        }))
}

fn try_add_column(conn: &mut Connection, table: &str, field: &FieldName) -> rusqlite::Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
    let alter = format!(
        "ALTER TABLE {} ADD COLUMN {field} {}",
        quote(table),
        codec::sql_type(field.field_type())
    );
    match tx.execute_batch(&alter) {
        Ok(()) => {}
        Err(e) if is_duplicate_column(&e) => {
            debug!(table, column = %field, "column already added by another writer");
            return Ok(());
        }
        Err(e) => return Err(e),
    }
    if field.field_type() != FieldType::Raw {
        tx.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS {index} ON {name} ({field} ASC)",
            index = index_name(table, field.as_str()),
            name = quote(table)
        ))?;
    }
    if field.field_type() == FieldType::Text {
        tx.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {docs} USING fts4(data, tokenize=porter)",
            docs = docs_table(table, field)
        ))?;
    }
    tx.commit()?;
    debug!(table, column = %field, "added column");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> (Connection, TableSchema) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&create_table_sql("test_ns")).unwrap();
        let schema = TableSchema::load(&conn, "test_ns").unwrap();
        (conn, schema)
    }

    #[test]
    fn fresh_table_has_no_dynamic_columns() {
        let (_conn, schema) = table();
        assert!(schema.fields.is_empty());
        assert!(schema.has_column(TIME_FIELD));
        assert!(schema.has_column(ID_FIELD));
        assert!(!schema.has_column("x__number"));
    }

    #[test]
    fn add_column_is_idempotent() {
        let (mut conn, _) = table();
        let field = FieldName::parse("x__number").unwrap();
        add_column(&mut conn, "test_ns", &field).unwrap();
        add_column(&mut conn, "test_ns", &field).unwrap();

        let schema = TableSchema::load(&conn, "test_ns").unwrap();
        assert_eq!(schema.fields, vec![field]);
        let index: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'test_ns__x__number__asc'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn text_columns_get_a_docs_table() {
        let (mut conn, _) = table();
        let field = FieldName::parse("note__text").unwrap();
        add_column(&mut conn, "test_ns", &field).unwrap();
        let docs: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'test_ns__note__text__docs'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(docs, 1);
    }

    #[test]
    fn raw_columns_are_not_indexed() {
        let (mut conn, _) = table();
        let field = FieldName::parse("payload__raw").unwrap();
        add_column(&mut conn, "test_ns", &field).unwrap();
        let index: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name LIKE '%payload%'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(index, 0);
    }

    #[test]
    fn add_column_retries_while_the_database_is_locked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.sqlite");
        let mut conn = Connection::open(&path).unwrap();
        conn.execute_batch(&create_table_sql("locked")).unwrap();
        conn.busy_timeout(Duration::ZERO).unwrap();

        let (held_tx, held_rx) = std::sync::mpsc::channel();
        let holder_path = path.clone();
        let holder = thread::spawn(move || {
            let other = Connection::open(holder_path).unwrap();
            other.execute_batch("BEGIN EXCLUSIVE").unwrap();
            held_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(150));
            other.execute_batch("COMMIT").unwrap();
        });
        held_rx.recv().unwrap();

        let started = std::time::Instant::now();
        let field = FieldName::parse("x__number").unwrap();
        add_column(&mut conn, "locked", &field).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
        holder.join().unwrap();

        let schema = TableSchema::load(&conn, "locked").unwrap();
        assert_eq!(schema.fields, vec![field]);
    }

    #[test]
    fn keyword_and_reserved_namespaces_get_usable_tables() {
        let keyword = Namespace::parse("order").unwrap();
        assert_eq!(table_name(&keyword), "order");
        let reserved = Namespace::parse("sqlite.meta").unwrap();
        assert_eq!(table_name(&reserved), "ns_sqlite_meta");

        let mut conn = Connection::open_in_memory().unwrap();
        for table in [table_name(&keyword), table_name(&reserved)] {
            conn.execute_batch(&create_table_sql(&table)).unwrap();
            add_column(&mut conn, &table, &FieldName::parse("note__text").unwrap()).unwrap();
            assert_eq!(TableSchema::load(&conn, &table).unwrap().fields.len(), 1);
        }
    }

    #[test]
    fn select_resolves_text_through_docs() {
        let (mut conn, _) = table();
        add_column(&mut conn, "test_ns", &FieldName::parse("note__text").unwrap()).unwrap();
        let schema = TableSchema::load(&conn, "test_ns").unwrap();
        assert_eq!(
            schema.select_sql(),
            "SELECT \"test_ns\".time__time, \"test_ns\".id__id, \
             (SELECT data FROM \"test_ns__note__text__docs\" WHERE docid = \"test_ns\".note__text) \
             FROM \"test_ns\""
        );
    }
}
