// 💾 Local SQLite store - offline mirror of the hosted schema
//
// Same three tiers as the hosted database, with real foreign keys and unique
// constraints, so ordering and idempotence behave the way they do remotely.

use crate::error::StoreError;
use crate::store::{check_identifier, Conflict, Filter, Row, Store, TableLayout};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use std::path::Path;

pub struct SqliteStore {
    conn: Connection,
    /// Column filled with a fresh UUID when an inserted row has none
    id_column: String,
}

impl SqliteStore {
    /// Open (or create) a database file and make sure the schema exists
    pub fn open(path: &Path, layout: &TableLayout) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for crash recovery
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Self::with_connection(conn, layout)
    }

    /// Fresh in-memory database with the schema in place
    pub fn open_in_memory(layout: &TableLayout) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, layout)
    }

    fn with_connection(conn: Connection, layout: &TableLayout) -> Result<Self, StoreError> {
        setup_database(&conn, layout)?;
        Ok(SqliteStore {
            conn,
            id_column: layout.leaves.id.clone(),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection, layout: &TableLayout) -> Result<(), StoreError> {
    layout.validate()?;

    // Deletes in the wrong order must fail here just like they do remotely
    conn.pragma_update(None, "foreign_keys", "ON")?;

    let c = &layout.categories;
    let l = &layout.leaves;
    let d = &layout.dependents;

    // ==========================================================================
    // Categories (industries)
    // ==========================================================================
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                {id} TEXT PRIMARY KEY,
                {name} TEXT NOT NULL UNIQUE,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            table = c.table,
            id = c.id,
            name = c.name,
        ),
        [],
    )?;

    // ==========================================================================
    // Leaf records (niches) - one row per (category, name)
    // ==========================================================================
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                {id} TEXT PRIMARY KEY,
                {name} TEXT NOT NULL,
                {category_id} TEXT NOT NULL REFERENCES {categories}({category_pk}),
                {scale} TEXT NOT NULL CHECK ({scale} IN ('Local', 'National', 'National/Local')),
                {size_class} TEXT NOT NULL CHECK ({size_class} IN ('Small', 'Big')),
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE ({category_id}, {name})
            )",
            table = l.table,
            id = l.id,
            name = l.name,
            category_id = l.category_id,
            categories = c.table,
            category_pk = c.id,
            scale = l.scale,
            size_class = l.size_class,
        ),
        [],
    )?;

    // ==========================================================================
    // Dependent state (per-user progress on a niche)
    // ==========================================================================
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                {leaf_id} TEXT NOT NULL REFERENCES {leaves}({leaf_pk}),
                user_id TEXT,
                status TEXT,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            table = d.table,
            leaf_id = d.leaf_id,
            leaves = l.table,
            leaf_pk = l.id,
        ),
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        &format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table}({column})",
            table = l.table,
            column = l.category_id,
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table}({column})",
            table = d.table,
            column = d.leaf_id,
        ),
        [],
    )?;

    Ok(())
}

/// Row count of a table
pub fn verify_count(conn: &Connection, table: &str) -> Result<i64, StoreError> {
    let table = check_identifier(table)?;
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// VALUE CONVERSION
// ============================================================================

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::from(bytes.to_vec()),
    }
}

/// WHERE clause and its parameters
fn where_clause(filter: &Filter) -> Result<(String, Vec<SqlValue>), StoreError> {
    match filter {
        Filter::All => Ok((String::new(), Vec::new())),
        Filter::NotNull(column) => Ok((format!(" WHERE {} IS NOT NULL", check_identifier(column)?), Vec::new())),
        Filter::In(column, values) => {
            let column = check_identifier(column)?;
            if values.is_empty() {
                return Ok((" WHERE 0".to_string(), Vec::new()));
            }
            let placeholders = vec!["?"; values.len()].join(", ");
            let params = values.iter().map(|v| SqlValue::Text(v.clone())).collect();
            Ok((format!(" WHERE {} IN ({})", column, placeholders), params))
        }
    }
}

// ============================================================================
// STORE IMPLEMENTATION
// ============================================================================

impl Store for SqliteStore {
    fn select(&mut self, table: &str, columns: &[&str], filter: &Filter) -> Result<Vec<Row>, StoreError> {
        let table = check_identifier(table)?;
        for column in columns {
            check_identifier(column)?;
        }

        let (clause, params) = where_clause(filter)?;
        let sql = format!("SELECT {} FROM {}{}", columns.join(", "), table, clause);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                let mut out = Row::new();
                for (i, column) in columns.iter().enumerate() {
                    out.insert(column.to_string(), from_sql(row.get_ref(i)?));
                }
                Ok(out)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn insert(&mut self, table: &str, rows: &[Row], conflict: &Conflict) -> Result<Vec<Row>, StoreError> {
        let table = check_identifier(table)?;

        let on_conflict = match conflict {
            Conflict::Fail => String::new(),
            Conflict::Ignore(columns) => {
                for column in columns {
                    check_identifier(column)?;
                }
                format!(" ON CONFLICT ({}) DO NOTHING", columns.join(", "))
            }
        };

        // One batch = one transaction
        let tx = self.conn.transaction()?;
        let mut inserted = Vec::new();

        for row in rows {
            let mut row = row.clone();
            if !row.contains_key(&self.id_column) {
                row.insert(self.id_column.clone(), Value::from(uuid::Uuid::new_v4().to_string()));
            }

            let columns: Vec<&str> = row.keys().map(String::as_str).collect();
            for column in &columns {
                check_identifier(column)?;
            }
            let placeholders = vec!["?"; columns.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({}){}",
                table,
                columns.join(", "),
                placeholders,
                on_conflict
            );

            let changed = tx.execute(&sql, params_from_iter(row.values().map(to_sql)))?;
            if changed > 0 {
                inserted.push(row);
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn delete(&mut self, table: &str, filter: &Filter) -> Result<usize, StoreError> {
        let table = check_identifier(table)?;
        let (clause, params) = where_clause(filter)?;

        let deleted = self
            .conn
            .execute(&format!("DELETE FROM {}{}", table, clause), params_from_iter(params.iter()))?;

        Ok(deleted)
    }
}
