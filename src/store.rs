// 🗄️ Store abstraction - the three calls the loader needs from a database
//
// select / insert / delete over JSON-shaped rows. Implemented by the remote
// PostgREST client (`postgrest.rs`) and the local SQLite store (`db.rs`).

use crate::error::StoreError;
use serde_json::Value;

/// A row as the store sees it: column name → JSON value
pub type Row = serde_json::Map<String, Value>;

// ============================================================================
// FILTERS & CONFLICT HANDLING
// ============================================================================

/// Row filter for select and delete
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every row (select only; deletes must name a column)
    All,
    /// `column IN (values)`
    In(String, Vec<String>),
    /// `column IS NOT NULL` - how an unconditional delete is expressed
    NotNull(String),
}

impl Filter {
    pub fn is_in<S: Into<String>>(column: &str, values: impl IntoIterator<Item = S>) -> Self {
        Filter::In(column.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn not_null(column: &str) -> Self {
        Filter::NotNull(column.to_string())
    }
}

/// What an insert does when a unique key already exists
#[derive(Debug, Clone, PartialEq)]
pub enum Conflict {
    /// Surface the constraint violation as an error
    Fail,
    /// Skip the conflicting row; the key is the listed columns
    Ignore(Vec<String>),
}

impl Conflict {
    pub fn ignore_on(columns: &[&str]) -> Self {
        Conflict::Ignore(columns.iter().map(|c| c.to_string()).collect())
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

pub trait Store {
    /// Read `columns` of the rows matching `filter`
    fn select(&mut self, table: &str, columns: &[&str], filter: &Filter) -> Result<Vec<Row>, StoreError>;

    /// Insert `rows` in one write; returns the rows actually inserted (with ids)
    fn insert(&mut self, table: &str, rows: &[Row], conflict: &Conflict) -> Result<Vec<Row>, StoreError>;

    /// Delete the rows matching `filter`; returns how many went away
    fn delete(&mut self, table: &str, filter: &Filter) -> Result<usize, StoreError>;
}

impl<S: Store + ?Sized> Store for &mut S {
    fn select(&mut self, table: &str, columns: &[&str], filter: &Filter) -> Result<Vec<Row>, StoreError> {
        (**self).select(table, columns, filter)
    }

    fn insert(&mut self, table: &str, rows: &[Row], conflict: &Conflict) -> Result<Vec<Row>, StoreError> {
        (**self).insert(table, rows, conflict)
    }

    fn delete(&mut self, table: &str, filter: &Filter) -> Result<usize, StoreError> {
        (**self).delete(table, filter)
    }
}

impl<S: Store + ?Sized> Store for Box<S> {
    fn select(&mut self, table: &str, columns: &[&str], filter: &Filter) -> Result<Vec<Row>, StoreError> {
        (**self).select(table, columns, filter)
    }

    fn insert(&mut self, table: &str, rows: &[Row], conflict: &Conflict) -> Result<Vec<Row>, StoreError> {
        (**self).insert(table, rows, conflict)
    }

    fn delete(&mut self, table: &str, filter: &Filter) -> Result<usize, StoreError> {
        (**self).delete(table, filter)
    }
}

/// Table and column names must be plain identifiers (letters, digits, `_`)
pub fn check_identifier(name: &str) -> Result<&str, StoreError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Read a column as an identifier string; ids may come back as text or numbers
pub fn row_id(row: &Row, table: &str, column: &str) -> Result<String, StoreError> {
    match row.get(column) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        other => Err(StoreError::malformed(
            table,
            format!("column {} is {:?}, expected an identifier", column, other),
        )),
    }
}

/// Read a text column
pub fn row_text<'a>(row: &'a Row, table: &str, column: &str) -> Result<&'a str, StoreError> {
    row.get(column)
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::malformed(table, format!("column {} missing or not text", column)))
}

// ============================================================================
// TABLE LAYOUT
// ============================================================================

/// Physical names of the three tiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub categories: CategoryTable,
    pub leaves: LeafTable,
    pub dependents: DependentTable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryTable {
    pub table: String,
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafTable {
    pub table: String,
    pub id: String,
    pub name: String,
    pub category_id: String,
    pub scale: String,
    pub size_class: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentTable {
    pub table: String,
    /// Foreign key to the leaf table; also the column the delete-all filters on
    pub leaf_id: String,
}

impl TableLayout {
    /// Hosted schema: industries / niches / niche_user_state
    pub fn niches() -> Self {
        TableLayout {
            categories: CategoryTable {
                table: "industries".to_string(),
                id: "id".to_string(),
                name: "name".to_string(),
            },
            leaves: LeafTable {
                table: "niches".to_string(),
                id: "id".to_string(),
                name: "niche_name".to_string(),
                category_id: "industry_id".to_string(),
                scale: "scale".to_string(),
                size_class: "database_size".to_string(),
            },
            dependents: DependentTable {
                table: "niche_user_state".to_string(),
                leaf_id: "niche_id".to_string(),
            },
        }
    }

    /// Neutral names: categories / leaf_records / dependent_state
    pub fn generic() -> Self {
        TableLayout {
            categories: CategoryTable {
                table: "categories".to_string(),
                id: "id".to_string(),
                name: "name".to_string(),
            },
            leaves: LeafTable {
                table: "leaf_records".to_string(),
                id: "id".to_string(),
                name: "name".to_string(),
                category_id: "category_id".to_string(),
                scale: "scale".to_string(),
                size_class: "size_class".to_string(),
            },
            dependents: DependentTable {
                table: "dependent_state".to_string(),
                leaf_id: "leaf_record_id".to_string(),
            },
        }
    }

    /// Every table and column name, for up-front validation
    pub fn identifiers(&self) -> Vec<&str> {
        vec![
            &self.categories.table,
            &self.categories.id,
            &self.categories.name,
            &self.leaves.table,
            &self.leaves.id,
            &self.leaves.name,
            &self.leaves.category_id,
            &self.leaves.scale,
            &self.leaves.size_class,
            &self.dependents.table,
            &self.dependents.leaf_id,
        ]
        .into_iter()
        .map(String::as_str)
        .collect()
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        for name in self.identifiers() {
            check_identifier(name)?;
        }
        Ok(())
    }
}

impl Default for TableLayout {
    fn default() -> Self {
        TableLayout::niches()
    }
}
