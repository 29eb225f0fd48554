//! Folder-backed SQLite event store.
//!
//! Layout: one database file per namespace, `<folder>/<table>.sqlite`, where
//! the table name is the namespace with dots replaced by underscores. The
//! `<table>.lock` file beside it serializes first-time creation. Inside the
//! file the table carries the same name, unless SQLite reserves it (see
//! [`schema::table_name`]).

mod codec;
mod filter;
mod lock;
mod schema;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use memdam_types::{time, Event, FieldName, FieldType, Namespace, NamespaceScope, Query, QueryPlan, ID_FIELD, TIME_FIELD};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, Row, Transaction, TransactionBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use self::lock::TableLock;
use self::schema::{quote, TableSchema, ROW_ID};
use crate::error::{EventstoreError, EventstoreResult};
use crate::traits::Eventstore;

const TABLE_EXTENSION: &str = "sqlite";
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Event store keeping one SQLite database per namespace under a folder.
#[derive(Debug, Clone)]
pub struct SqliteEventstore {
    folder: PathBuf,
}

impl SqliteEventstore {
    /// Open (creating if needed) a store rooted at `folder`.
    pub fn open(folder: impl AsRef<Path>) -> EventstoreResult<Self> {
        fs::create_dir_all(folder.as_ref())?;
        let folder = fs::canonicalize(folder.as_ref())?;
        Ok(Self { folder })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Database file holding `namespace`.
    pub fn table_path(&self, namespace: &Namespace) -> PathBuf {
        self.folder
            .join(format!("{}.{TABLE_EXTENSION}", namespace.table_name()))
    }

    fn lock_path(&self, namespace: &Namespace) -> PathBuf {
        self.folder.join(format!("{}.lock", namespace.table_name()))
    }

    /// Namespaces that currently have a table, sorted.
    pub fn namespaces(&self) -> EventstoreResult<Vec<Namespace>> {
        let mut found = BTreeSet::new();
        for entry in fs::read_dir(&self.folder)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TABLE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(namespace) = Namespace::from_table_name(stem) {
                found.insert(namespace);
            }
        }
        Ok(found.into_iter().collect())
    }

    fn read_connection(&self, path: &Path) -> EventstoreResult<Connection> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn write_connection(&self, path: &Path) -> EventstoreResult<Connection> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Make sure the table for `namespace` exists, creating it if needed.
    ///
    /// Creation happens under the table's file lock: the table is built in a
    /// temporary file and renamed into place, so other processes either see
    /// no file or a complete one.
    fn ensure_table(&self, namespace: &Namespace) -> EventstoreResult<PathBuf> {
        let path = self.table_path(namespace);
        if path.exists() {
            return Ok(path);
        }

        let _lock = TableLock::acquire(&self.lock_path(namespace))?;
        if path.exists() {
            debug!(namespace = %namespace, "table created by another writer");
            return Ok(path);
        }

        let table = schema::table_name(namespace);
        let temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", namespace.table_name()))
            .suffix(".tmp")
            .tempfile_in(&self.folder)?;
        {
            let conn = Connection::open(temp.path())?;
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
            conn.execute_batch(&schema::create_table_sql(&table))?;
        }
        temp.persist(&path).map_err(|e| e.error)?;
        info!(namespace = %namespace, path = %path.display(), "created table");
        Ok(path)
    }

    fn save_batch(&self, namespace: &Namespace, events: &[&Event]) -> EventstoreResult<()> {
        let path = self.ensure_table(namespace)?;
        let table = schema::table_name(namespace);
        let mut conn = self.write_connection(&path)?;

        let existing = TableSchema::load(&conn, &table)?;
        let missing: BTreeSet<&FieldName> = events
            .iter()
            .flat_map(|e| e.fields().keys())
            .filter(|f| !existing.has_column(f.as_str()))
            .collect();
        for field in missing {
            schema::add_column(&mut conn, &table, field)?;
        }
        let schema = TableSchema::load(&conn, &table)?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
        for event in events {
            delete_rows(&tx, &schema, event.id())?;
        }
        let mut row_id: i64 = tx.query_row(
            &format!("SELECT COALESCE(MAX({ROW_ID}), 0) FROM {}", quote(&table)),
            [],
            |row| row.get(0),
        )?;
        for event in events {
            row_id += 1;
            insert_row(&tx, &schema, row_id, event)?;
        }
        tx.commit()?;
        debug!(namespace = %namespace, count = events.len(), "saved events");
        Ok(())
    }

    fn find_in_table(&self, namespace: &Namespace, plan: &QueryPlan) -> EventstoreResult<Vec<Event>> {
        let conn = self.read_connection(&self.table_path(namespace))?;
        let schema = TableSchema::load(&conn, &schema::table_name(namespace))?;
        let query = filter::table_query(&schema, plan)?;

        let mut stmt = conn.prepare(&query.sql)?;
        let mut rows = stmt.query(params_from_iter(query.params.iter()))?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(decode_row(&schema, namespace, row)?);
        }
        Ok(events)
    }

    fn get_from_table(&self, namespace: &Namespace, id: Uuid) -> EventstoreResult<Option<Event>> {
        let conn = self.read_connection(&self.table_path(namespace))?;
        let schema = TableSchema::load(&conn, &schema::table_name(namespace))?;
        let sql = format!(
            "{} WHERE {}.{ID_FIELD} = ?1 LIMIT 1",
            schema.select_sql(),
            quote(&schema.table)
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![codec::encode_id(id)])?;
        match rows.next()? {
            Some(row) => Ok(Some(decode_row(&schema, namespace, row)?)),
            None => Ok(None),
        }
    }

    fn contains(&self, namespace: &Namespace, id: Uuid) -> EventstoreResult<bool> {
        let conn = self.read_connection(&self.table_path(namespace))?;
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {ID_FIELD} = ?1",
                quote(&schema::table_name(namespace))
            ),
            params![codec::encode_id(id)],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

/// Remove the rows (and their text rows) of event `id`.
fn delete_rows(tx: &Transaction<'_>, schema: &TableSchema, id: Uuid) -> rusqlite::Result<usize> {
    let table = quote(&schema.table);
    let id = codec::encode_id(id);
    for field in schema.text_fields() {
        tx.execute(
            &format!(
                "DELETE FROM {docs} WHERE docid IN (SELECT {field} FROM {table} WHERE {ID_FIELD} = ?1)",
                docs = schema::docs_table(&schema.table, field)
            ),
            params![id],
        )?;
    }
    tx.execute(&format!("DELETE FROM {table} WHERE {ID_FIELD} = ?1"), params![id])
}

fn insert_row(tx: &Transaction<'_>, schema: &TableSchema, row_id: i64, event: &Event) -> rusqlite::Result<()> {
    let table = &schema.table;
    let quoted = quote(table);
    let mut columns = vec![ROW_ID.to_string(), TIME_FIELD.to_string(), ID_FIELD.to_string()];
    let mut values = vec![
        Value::Integer(row_id),
        Value::Integer(time::to_micros(&event.time())),
        codec::encode_id(event.id()),
    ];
    for (name, value) in event.fields() {
        columns.push(name.to_string());
        if name.field_type() == FieldType::Text {
            tx.execute(
                &format!(
                    "INSERT INTO {docs} (docid, data) VALUES (?1, ?2)",
                    docs = schema::docs_table(table, name)
                ),
                params![row_id, codec::encode(value)],
            )?;
            values.push(Value::Integer(row_id));
        } else {
            values.push(codec::encode(value));
        }
    }
    let placeholders = vec!["?"; values.len()].join(", ");
    tx.execute(
        &format!("INSERT INTO {quoted} ({}) VALUES ({placeholders})", columns.join(", ")),
        params_from_iter(values.iter()),
    )?;
    Ok(())
}

fn decode_row(schema: &TableSchema, namespace: &Namespace, row: &Row<'_>) -> EventstoreResult<Event> {
    let corrupt = |reason: &str| EventstoreError::Corrupt {
        table: schema.table.clone(),
        reason: reason.to_string(),
    };
    let time = match row.get_ref(0)? {
        ValueRef::Integer(micros) => time::from_micros(micros)?,
        _ => return Err(corrupt("time column is not an integer")),
    };
    let id = match row.get_ref(1)? {
        ValueRef::Blob(bytes) => codec::decode_id(bytes).ok_or_else(|| corrupt("id column is not 16 bytes"))?,
        _ => return Err(corrupt("id column is not a blob")),
    };

    let mut fields = Vec::new();
    for (i, field) in schema.fields.iter().enumerate() {
        if let Some(value) = codec::decode(field, row.get_ref(i + 2)?)? {
            fields.push((field.clone(), value));
        }
    }
    Ok(Event::from_parts(id, time, namespace.clone(), fields)?)
}

impl Eventstore for SqliteEventstore {
    fn save(&self, events: &[Event]) -> EventstoreResult<()> {
        // The last copy of a repeated event wins.
        let mut seen = HashSet::new();
        let mut unique: Vec<&Event> = events.iter().rev().filter(|e| seen.insert(e.id())).collect();
        unique.reverse();

        let mut batches: BTreeMap<&Namespace, Vec<&Event>> = BTreeMap::new();
        for event in unique {
            batches.entry(event.namespace()).or_default().push(event);
        }
        for (namespace, batch) in batches {
            self.save_batch(namespace, &batch)?;
        }
        Ok(())
    }

    fn get(&self, id: Uuid) -> EventstoreResult<Event> {
        for namespace in self.namespaces()? {
            if let Some(event) = self.get_from_table(&namespace, id)? {
                return Ok(event);
            }
        }
        Err(EventstoreError::NotFound(id))
    }

    fn find(&self, query: &Query) -> EventstoreResult<Vec<Event>> {
        let plan = query.plan()?;
        let namespaces = match &plan.scope {
            NamespaceScope::Nothing => return Ok(Vec::new()),
            NamespaceScope::Only(ns) if !self.table_path(ns).exists() => return Ok(Vec::new()),
            NamespaceScope::Only(ns) => vec![ns.clone()],
            NamespaceScope::Any => self.namespaces()?,
        };

        let mut events = Vec::new();
        for namespace in &namespaces {
            events.extend(self.find_in_table(namespace, &plan)?);
        }
        Ok(plan.order_and_limit(events))
    }

    fn delete(&self, id: Uuid) -> EventstoreResult<()> {
        for namespace in self.namespaces()? {
            if !self.contains(&namespace, id)? {
                continue;
            }
            let mut conn = self.write_connection(&self.table_path(&namespace))?;
            let schema = TableSchema::load(&conn, &schema::table_name(&namespace))?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
            let removed = delete_rows(&tx, &schema, id)?;
            tx.commit()?;
            debug!(namespace = %namespace, event_id = %id.simple(), removed, "deleted event");
        }
        Ok(())
    }
}
