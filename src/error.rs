// ⚠️ Error Taxonomy - every way a load run can stop
//
// All kinds are fatal for the run. Nothing here is retried: the operator
// fixes the data or the credentials and re-runs.

use thiserror::Error;

// ============================================================================
// RUN STAGE
// ============================================================================

/// Where in the run an error happened (used in error messages)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuring,
    LoadingDataset,
    Resetting,
    ResolvingCategories,
    Upserting,
    Verifying,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Configuring => "configuring",
            Stage::LoadingDataset => "loading dataset",
            Stage::Resetting => "resetting",
            Stage::ResolvingCategories => "resolving categories",
            Stage::Upserting => "upserting",
            Stage::Verifying => "verifying",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// STORE ERRORS (backend level)
// ============================================================================

/// Errors raised by a `Store` backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// Remote store answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Request never completed (DNS, TLS, connection reset, ...)
    #[error("transport error: {0}")]
    Transport(String),

    /// Local SQLite failure
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Table or column name that is not a plain identifier
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Store returned a row the loader cannot interpret
    #[error("malformed row from {table}: {message}")]
    MalformedRow { table: String, message: String },
}

impl StoreError {
    pub fn malformed(table: &str, message: impl Into<String>) -> Self {
        StoreError::MalformedRow {
            table: table.to_string(),
            message: message.into(),
        }
    }

    /// The conflict columns of an insert have no unique index behind them
    /// (PostgreSQL 42P10, or SQLite's ON CONFLICT mismatch)
    pub fn is_missing_unique_constraint(&self) -> bool {
        match self {
            StoreError::Http { message, .. } => message.contains("42P10"),
            StoreError::Sqlite(err) => err
                .to_string()
                .contains("ON CONFLICT clause does not match"),
            _ => false,
        }
    }
}

// ============================================================================
// LOAD ERRORS (run level)
// ============================================================================

/// Fatal errors of a load run
#[derive(Debug, Error)]
pub enum LoadError {
    /// Missing or unusable credentials / options
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Dataset file could not be read, parsed or failed a critical check
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Dataset references categories that exist neither in the store nor in the creation set
    #[error("unknown categories referenced by dataset: {}", .names.join(", "))]
    NotFound { names: Vec<String> },

    /// A write, read or delete against the store failed
    #[error("persistence error while {stage}{}: {source} ({committed} rows already committed)",
        batch_suffix(.batch_index))]
    Persistence {
        stage: Stage,
        /// Zero-based index of the failing batch, when the failure was a batch write
        batch_index: Option<usize>,
        /// Rows already committed by this stage before the failure
        committed: usize,
        #[source]
        source: StoreError,
    },
}

fn batch_suffix(batch_index: &Option<usize>) -> String {
    match batch_index {
        Some(index) => format!(" (batch {})", index + 1),
        None => String::new(),
    }
}

impl LoadError {
    pub fn configuration(message: impl Into<String>) -> Self {
        LoadError::Configuration(message.into())
    }

    pub fn dataset(message: impl Into<String>) -> Self {
        LoadError::Dataset(message.into())
    }

    /// Persistence failure outside of a batch write
    pub fn persistence(stage: Stage, committed: usize, source: StoreError) -> Self {
        LoadError::Persistence {
            stage,
            batch_index: None,
            committed,
            source,
        }
    }

    /// Stage the error belongs to
    pub fn stage(&self) -> Stage {
        match self {
            LoadError::Configuration(_) => Stage::Configuring,
            LoadError::Dataset(_) => Stage::LoadingDataset,
            LoadError::NotFound { .. } => Stage::ResolvingCategories,
            LoadError::Persistence { stage, .. } => *stage,
        }
    }

    /// Rows committed before the failure (0 for errors raised before any write)
    pub fn committed(&self) -> usize {
        match self {
            LoadError::Persistence { committed, .. } => *committed,
            _ => 0,
        }
    }
}
