// 🔍 Verifier - after a load, every dataset leaf must exist exactly once

use crate::dataset::ReferenceDataset;
use crate::error::{LoadError, Stage};
use crate::resolver::CategoryMap;
use crate::store::{row_id, row_text, Filter, Store, TableLayout};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Dataset leaves checked
    pub expected: usize,
    /// Leaf rows found under the dataset's categories
    pub rows_found: usize,
    /// (category, name) pairs with no row
    pub missing: Vec<(String, String)>,
    /// (category, name) pairs with more than one row
    pub duplicated: Vec<(String, String)>,
}

impl VerifyReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.duplicated.is_empty()
    }
}

pub fn verify_load<S: Store>(
    store: &mut S,
    layout: &TableLayout,
    dataset: &ReferenceDataset,
    categories: &CategoryMap,
) -> Result<VerifyReport, LoadError> {
    let t = &layout.leaves;
    let ids: Vec<String> = dataset
        .referenced_categories()
        .iter()
        .filter_map(|name| categories.id(name).map(str::to_string))
        .collect();

    let rows = store
        .select(
            &t.table,
            &[t.category_id.as_str(), t.name.as_str()],
            &Filter::In(t.category_id.clone(), ids),
        )
        .map_err(|e| LoadError::persistence(Stage::Verifying, 0, e))?;

    let mut counts: HashMap<(String, String), usize> = HashMap::new();
    for row in &rows {
        let key = (
            row_id(row, &t.table, &t.category_id).map_err(|e| LoadError::persistence(Stage::Verifying, 0, e))?,
            row_text(row, &t.table, &t.name)
                .map_err(|e| LoadError::persistence(Stage::Verifying, 0, e))?
                .to_string(),
        );
        *counts.entry(key).or_default() += 1;
    }

    let mut report = VerifyReport {
        rows_found: rows.len(),
        ..VerifyReport::default()
    };

    for (category, leaf) in dataset.records() {
        report.expected += 1;
        let count = categories
            .id(category)
            .and_then(|id| counts.get(&(id.to_string(), leaf.name.clone())))
            .copied()
            .unwrap_or(0);

        match count {
            0 => report.missing.push((category.to_string(), leaf.name.clone())),
            1 => {}
            _ => report.duplicated.push((category.to_string(), leaf.name.clone())),
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::dataset::{LeafRecord, Scale, SizeClass};
    use crate::resolver::resolve_categories;
    use crate::error::StoreError;
    use crate::store::{Conflict, Row, Store};
    use serde_json::Value;

    /// Returns canned leaf rows for every select
    struct CannedStore {
        rows: Vec<Row>,
    }

    impl Store for CannedStore {
        fn select(&mut self, _table: &str, _columns: &[&str], _filter: &Filter) -> Result<Vec<Row>, StoreError> {
            Ok(self.rows.clone())
        }

        fn insert(&mut self, _table: &str, rows: &[Row], _conflict: &Conflict) -> Result<Vec<Row>, StoreError> {
            Ok(rows
                .iter()
                .enumerate()
                .map(|(i, row)| {
                    let mut row = row.clone();
                    row.insert("id".to_string(), Value::from(format!("cat-{}", i)));
                    row
                })
                .collect())
        }

        fn delete(&mut self, _table: &str, _filter: &Filter) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    fn leaf_row(category_id: &str, name: &str) -> Row {
        let mut row = Row::new();
        row.insert("industry_id".to_string(), Value::from(category_id));
        row.insert("niche_name".to_string(), Value::from(name));
        row
    }

    #[test]
    fn test_reports_missing_rows() {
        let layout = TableLayout::niches();
        let mut store = SqliteStore::open_in_memory(&layout).unwrap();
        let dataset = ReferenceDataset::from_groups(vec![(
            "Sports",
            vec![
                LeafRecord::new("Golf Courses", Scale::Local, SizeClass::Small),
                LeafRecord::new("Ski Shops", Scale::Local, SizeClass::Small),
            ],
        )]);
        let categories = resolve_categories(
            &mut store,
            &layout,
            dataset.declared_categories(),
            &dataset.referenced_categories(),
        )
        .unwrap();

        let mut row = Row::new();
        row.insert("niche_name".to_string(), Value::from("Golf Courses"));
        row.insert("industry_id".to_string(), Value::from(categories.id("Sports").unwrap()));
        row.insert("scale".to_string(), Value::from("Local"));
        row.insert("database_size".to_string(), Value::from("Small"));
        store.insert("niches", &[row], &Conflict::Fail).unwrap();

        let report = verify_load(&mut store, &layout, &dataset, &categories).unwrap();

        assert_eq!(report.expected, 2);
        assert_eq!(report.rows_found, 1);
        assert_eq!(report.missing, vec![("Sports".to_string(), "Ski Shops".to_string())]);
        assert!(!report.is_complete());
    }

    #[test]
    fn test_reports_duplicated_rows() {
        let layout = TableLayout::niches();
        let dataset = ReferenceDataset::from_groups(vec![(
            "Sports",
            vec![
                LeafRecord::new("Golf Courses", Scale::Local, SizeClass::Small),
                LeafRecord::new("Ski Shops", Scale::Local, SizeClass::Small),
            ],
        )]);
        let mut store = CannedStore { rows: Vec::new() };
        let categories = resolve_categories(
            &mut store,
            &layout,
            dataset.declared_categories(),
            &dataset.referenced_categories(),
        )
        .unwrap();
        let id = categories.id("Sports").unwrap().to_string();

        store.rows = vec![
            leaf_row(&id, "Golf Courses"),
            leaf_row(&id, "Golf Courses"),
            leaf_row(&id, "Ski Shops"),
        ];
        let report = verify_load(&mut store, &layout, &dataset, &categories).unwrap();

        assert_eq!(report.rows_found, 3);
        assert_eq!(report.duplicated, vec![("Sports".to_string(), "Golf Courses".to_string())]);
        assert!(report.missing.is_empty());
        assert!(!report.is_complete());
    }
}
