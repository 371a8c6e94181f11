// Niche Seeder - Core Library
// Loads the industry/niche reference dataset into a store, idempotently.
// Used by the CLI and by the integration tests.

pub mod error;
pub mod config;
pub mod dataset;   // Reference Dataset - JSON / CSV files
pub mod quality;   // Dataset checks before anything is written
pub mod store;     // Store trait + table layout
pub mod db;        // SQLite backend
#[cfg(feature = "remote")]
pub mod postgrest; // Hosted backend (Supabase REST)
pub mod progress;
pub mod resolver;  // Category Resolver
pub mod upsert;    // Bulk Upsert Engine
pub mod reset;     // Reset Coordinator
pub mod verify;
pub mod loader;

// Re-export commonly used types
pub use error::{LoadError, Stage, StoreError};
pub use config::{LoaderOptions, RemoteConfig, DEFAULT_BATCH_SIZE};
pub use dataset::{DatasetFormat, LeafRecord, ReferenceDataset, Scale, SizeClass};
pub use quality::{check_dataset, QualityIssue, QualityReport, Severity};
pub use store::{Conflict, Filter, Row, Store, TableLayout};
pub use db::{setup_database, verify_count, SqliteStore};
#[cfg(feature = "remote")]
pub use postgrest::PostgrestStore;
pub use progress::{BatchProgress, LogObserver, ProgressObserver, Recorder, RunState};
pub use resolver::{resolve_categories, CategoryMap};
pub use upsert::{batch_count, resolve_leaves, upsert_leaves, ResolvedLeaf, UpsertSummary};
pub use reset::{reset_all, ResetSummary, Tier, RESET_ORDER};
pub use verify::{verify_load, VerifyReport};
pub use loader::{plan, LoadPlan, LoadReport, Loader};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
