// 📦 Bulk Upsert Engine - leaf records → rows, written in fixed-size batches
//
// One write per batch, each an insert that skips rows whose
// (category_id, name) already exists. Batches are independent: a failure
// leaves the earlier ones committed.

use crate::dataset::ReferenceDataset;
use crate::error::{LoadError, Stage};
use crate::progress::{BatchProgress, ProgressObserver};
use crate::resolver::CategoryMap;
use crate::store::{Conflict, Row, Store, TableLayout};
use serde_json::Value;

/// Leaf record with its category id filled in
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLeaf {
    pub category_id: String,
    pub name: String,
    pub scale: String,
    pub size_class: String,
}

impl ResolvedLeaf {
    pub fn to_row(&self, layout: &TableLayout) -> Row {
        let t = &layout.leaves;
        let mut row = Row::new();
        row.insert(t.name.clone(), Value::from(self.name.as_str()));
        row.insert(t.category_id.clone(), Value::from(self.category_id.as_str()));
        row.insert(t.scale.clone(), Value::from(self.scale.as_str()));
        row.insert(t.size_class.clone(), Value::from(self.size_class.as_str()));
        row
    }
}

/// Attach category ids to every leaf of the dataset
///
/// Every referenced category must be in `categories`; the resolver guarantees
/// that, so a miss here is reported as `NotFound` rather than skipped.
pub fn resolve_leaves(dataset: &ReferenceDataset, categories: &CategoryMap) -> Result<Vec<ResolvedLeaf>, LoadError> {
    let mut leaves = Vec::with_capacity(dataset.len());
    let mut unknown = Vec::new();

    for (category, leaf) in dataset.records() {
        match categories.id(category) {
            Some(id) => leaves.push(ResolvedLeaf {
                category_id: id.to_string(),
                name: leaf.name.clone(),
                scale: leaf.scale.as_str().to_string(),
                size_class: leaf.size_class.as_str().to_string(),
            }),
            None => {
                if !unknown.iter().any(|u: &String| u == category) {
                    unknown.push(category.to_string());
                }
            }
        }
    }

    if unknown.is_empty() {
        Ok(leaves)
    } else {
        Err(LoadError::NotFound { names: unknown })
    }
}

/// Outcome of a bulk upsert
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub batches: usize,
    /// Rows handed to the store
    pub submitted: usize,
    /// Rows the store inserted
    pub affected: usize,
}

impl UpsertSummary {
    /// Rows that already existed
    pub fn skipped(&self) -> usize {
        self.submitted - self.affected
    }
}

/// Number of writes for `len` records
pub fn batch_count(len: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        0
    } else {
        len.div_ceil(batch_size)
    }
}

pub fn upsert_leaves<S: Store, O: ProgressObserver + ?Sized>(
    store: &mut S,
    layout: &TableLayout,
    leaves: &[ResolvedLeaf],
    batch_size: usize,
    observer: &mut O,
) -> Result<UpsertSummary, LoadError> {
    if batch_size == 0 {
        return Err(LoadError::configuration("batch size must be at least 1"));
    }

    let t = &layout.leaves;
    let conflict = Conflict::ignore_on(&[t.category_id.as_str(), t.name.as_str()]);
    let batch_total = batch_count(leaves.len(), batch_size);

    let mut summary = UpsertSummary::default();

    for (batch_index, batch) in leaves.chunks(batch_size).enumerate() {
        let rows: Vec<Row> = batch.iter().map(|leaf| leaf.to_row(layout)).collect();

        let inserted = store
            .insert(&t.table, &rows, &conflict)
            .map_err(|source| LoadError::Persistence {
                stage: Stage::Upserting,
                batch_index: Some(batch_index),
                committed: summary.affected,
                source,
            })?;

        summary.batches += 1;
        summary.submitted += batch.len();
        summary.affected += inserted.len();

        observer.on_batch(&BatchProgress {
            batch_index,
            batch_count: batch_total,
            submitted: batch.len(),
            written: inserted.len(),
            cumulative: summary.affected,
            total_records: leaves.len(),
        });
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::progress::Recorder;
    use crate::store::Filter;

    /// Store that records write sizes and can fail on a chosen call
    #[derive(Default)]
    struct CountingStore {
        writes: Vec<usize>,
        fail_on: Option<usize>,
    }

    impl Store for CountingStore {
        fn select(&mut self, _table: &str, _columns: &[&str], _filter: &Filter) -> Result<Vec<Row>, StoreError> {
            Ok(Vec::new())
        }

        fn insert(&mut self, _table: &str, rows: &[Row], _conflict: &Conflict) -> Result<Vec<Row>, StoreError> {
            if self.fail_on == Some(self.writes.len()) {
                return Err(StoreError::Http {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            self.writes.push(rows.len());
            Ok(rows.to_vec())
        }

        fn delete(&mut self, _table: &str, _filter: &Filter) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    fn leaves(n: usize) -> Vec<ResolvedLeaf> {
        (0..n)
            .map(|i| ResolvedLeaf {
                category_id: "cat".to_string(),
                name: format!("Niche {}", i),
                scale: "Local".to_string(),
                size_class: "Small".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_batch_partitioning() {
        for (n, b) in [(0, 50), (1, 50), (50, 50), (51, 50), (137, 50), (10, 3), (1536, 50)] {
            let mut store = CountingStore::default();
            let mut recorder = Recorder::default();

            let summary = upsert_leaves(&mut store, &TableLayout::niches(), &leaves(n), b, &mut recorder).unwrap();

            assert_eq!(store.writes.len(), batch_count(n, b), "n={} b={}", n, b);
            assert!(store.writes.iter().all(|&w| w <= b && w > 0));
            assert_eq!(store.writes.iter().sum::<usize>(), n);
            assert_eq!(summary.submitted, n);
            assert_eq!(recorder.batches.len(), store.writes.len());
        }
    }

    #[test]
    fn test_progress_is_cumulative() {
        let mut store = CountingStore::default();
        let mut recorder = Recorder::default();

        upsert_leaves(&mut store, &TableLayout::niches(), &leaves(120), 50, &mut recorder).unwrap();

        let cumulative: Vec<usize> = recorder.batches.iter().map(|b| b.cumulative).collect();
        assert_eq!(cumulative, vec![50, 100, 120]);
        assert!(recorder.batches.iter().all(|b| b.batch_count == 3 && b.total_records == 120));
    }

    #[test]
    fn test_failed_batch_reports_index_and_committed() {
        let mut store = CountingStore {
            writes: Vec::new(),
            fail_on: Some(2),
        };
        let mut recorder = Recorder::default();

        let err = upsert_leaves(&mut store, &TableLayout::niches(), &leaves(200), 50, &mut recorder).unwrap_err();

        match err {
            LoadError::Persistence {
                stage,
                batch_index,
                committed,
                ..
            } => {
                assert_eq!(stage, Stage::Upserting);
                assert_eq!(batch_index, Some(2));
                assert_eq!(committed, 100);
            }
            other => panic!("expected Persistence, got {:?}", other),
        }
        // batches before the failure stay written
        assert_eq!(store.writes, vec![50, 50]);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut store = CountingStore::default();
        let mut recorder = Recorder::default();

        let err = upsert_leaves(&mut store, &TableLayout::niches(), &leaves(3), 0, &mut recorder).unwrap_err();
        assert!(matches!(err, LoadError::Configuration(_)));
        assert!(store.writes.is_empty());
    }

    #[test]
    fn test_row_uses_layout_columns() {
        let leaf = &leaves(1)[0];

        let row = leaf.to_row(&TableLayout::niches());
        assert_eq!(row["niche_name"], "Niche 0");
        assert_eq!(row["industry_id"], "cat");
        assert_eq!(row["database_size"], "Small");

        let row = leaf.to_row(&TableLayout::generic());
        assert_eq!(row["name"], "Niche 0");
        assert_eq!(row["category_id"], "cat");
        assert_eq!(row["size_class"], "Small");
    }

    #[test]
    fn test_batch_count() {
        assert_eq!(batch_count(0, 50), 0);
        assert_eq!(batch_count(1, 50), 1);
        assert_eq!(batch_count(100, 50), 2);
        assert_eq!(batch_count(101, 50), 3);
        assert_eq!(batch_count(5, 0), 0);
    }
}
