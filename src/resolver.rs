// 🏷️ Category Resolver - category name → persisted id
//
// Reuses existing categories, creates the declared ones that are missing
// (upsert by name) and refuses to continue if a referenced category is still
// unknown afterwards.

use crate::error::{LoadError, Stage, StoreError};
use crate::store::{row_id, row_text, Conflict, Filter, Row, Store, TableLayout};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Resolved categories; read-only once built
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryMap {
    ids: BTreeMap<String, String>,
    created: Vec<String>,
}

impl CategoryMap {
    pub fn id(&self, name: &str) -> Option<&str> {
        self.ids.get(name).map(String::as_str)
    }

    /// Names created by this run, in creation order
    pub fn created(&self) -> &[String] {
        &self.created
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.ids.iter().map(|(name, id)| (name.as_str(), id.as_str()))
    }
}

/// Read `(name, id)` pairs for `names` from the category table
fn existing_categories<S: Store>(
    store: &mut S,
    layout: &TableLayout,
    names: &BTreeSet<String>,
) -> Result<Vec<(String, String)>, StoreError> {
    let table = &layout.categories;
    let rows = store.select(
        &table.table,
        &[table.id.as_str(), table.name.as_str()],
        &Filter::is_in(&table.name, names.iter().cloned()),
    )?;

    rows.iter().map(|row| name_and_id(row, layout)).collect()
}

fn name_and_id(row: &Row, layout: &TableLayout) -> Result<(String, String), StoreError> {
    let table = &layout.categories;
    Ok((
        row_text(row, &table.table, &table.name)?.to_string(),
        row_id(row, &table.table, &table.id)?,
    ))
}

/// Fold pairs into the map, warning about duplicated category rows
fn absorb(ids: &mut BTreeMap<String, String>, pairs: Vec<(String, String)>) {
    for (name, id) in pairs {
        match ids.get(&name) {
            Some(existing) if existing != &id => {
                log::warn!(
                    "category {:?} exists more than once (ids {} and {}); using {}",
                    name,
                    existing,
                    id,
                    existing
                );
            }
            Some(_) => {}
            None => {
                ids.insert(name, id);
            }
        }
    }
}

/// Insert by name, skipping names that already exist
///
/// Without a unique index on the name column the store rejects the conflict
/// target; the rows were just found missing, so they are inserted plainly.
fn insert_categories<S: Store>(
    store: &mut S,
    table: &str,
    name_column: &str,
    rows: &[Row],
) -> Result<Vec<Row>, StoreError> {
    match store.insert(table, rows, &Conflict::ignore_on(&[name_column])) {
        Err(err) if err.is_missing_unique_constraint() => {
            log::warn!(
                "{}.{} has no unique index ({}); inserting {} categories without conflict handling",
                table,
                name_column,
                err,
                rows.len()
            );
            store.insert(table, rows, &Conflict::Fail)
        }
        result => result,
    }
}

/// Resolve every referenced category, creating missing declared ones
///
/// Fails with `NotFound`, before any category or leaf is written, when a
/// referenced name is neither in the store nor in `declared`.
pub fn resolve_categories<S: Store>(
    store: &mut S,
    layout: &TableLayout,
    declared: &[String],
    referenced: &BTreeSet<String>,
) -> Result<CategoryMap, LoadError> {
    let table = &layout.categories;

    let wanted: BTreeSet<String> = declared.iter().cloned().chain(referenced.iter().cloned()).collect();
    if wanted.is_empty() {
        return Ok(CategoryMap::default());
    }

    let mut ids = BTreeMap::new();
    let existing = existing_categories(store, layout, &wanted)
        .map_err(|e| LoadError::persistence(Stage::ResolvingCategories, 0, e))?;
    absorb(&mut ids, existing);
    log::info!("{} of {} categories already exist", ids.len(), wanted.len());

    // Neither stored nor creatable: fail before anything is inserted
    let unknown: Vec<String> = referenced
        .iter()
        .filter(|name| !ids.contains_key(*name) && !declared.contains(*name))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(LoadError::NotFound { names: unknown });
    }

    // Declared order is kept so ids are handed out in file order
    let mut seen = BTreeSet::new();
    let missing: Vec<&String> = declared
        .iter()
        .filter(|name| !ids.contains_key(*name) && seen.insert(name.as_str()))
        .collect();

    let mut created = Vec::new();
    if !missing.is_empty() {
        let rows: Vec<Row> = missing
            .iter()
            .map(|name| {
                let mut row = Row::new();
                row.insert(table.name.clone(), Value::from(name.as_str()));
                row
            })
            .collect();

        let inserted = insert_categories(store, &table.table, &table.name, &rows)
            .map_err(|e| LoadError::persistence(Stage::ResolvingCategories, 0, e))?;

        let pairs = inserted
            .iter()
            .map(|row| name_and_id(row, layout))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LoadError::persistence(Stage::ResolvingCategories, inserted.len(), e))?;
        created = pairs.iter().map(|(name, _)| name.clone()).collect();
        absorb(&mut ids, pairs);
        log::info!("created {} categories", created.len());

        // Someone else may have created a row between our read and write;
        // ignore-duplicates then returns nothing for it, so read it back
        let unresolved: BTreeSet<String> = missing
            .iter()
            .filter(|name| !ids.contains_key(name.as_str()))
            .map(|name| name.to_string())
            .collect();
        if !unresolved.is_empty() {
            let committed = created.len();
            let again = existing_categories(store, layout, &unresolved)
                .map_err(|e| LoadError::persistence(Stage::ResolvingCategories, committed, e))?;
            absorb(&mut ids, again);
        }
    }

    let unknown: Vec<String> = referenced
        .iter()
        .filter(|name| !ids.contains_key(*name))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(LoadError::NotFound { names: unknown });
    }

    Ok(CategoryMap { ids, created })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{verify_count, SqliteStore};

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn declared(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_creates_missing_categories() {
        let layout = TableLayout::niches();
        let mut store = SqliteStore::open_in_memory(&layout).unwrap();

        let map = resolve_categories(
            &mut store,
            &layout,
            &declared(&["Sports", "Education"]),
            &names(&["Sports"]),
        )
        .unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map.created(), &declared(&["Sports", "Education"])[..]);
        assert!(map.id("Sports").is_some());
        assert_eq!(verify_count(store.connection(), "industries").unwrap(), 2);
    }

    #[test]
    fn test_reuses_existing_ids() {
        let layout = TableLayout::niches();
        let mut store = SqliteStore::open_in_memory(&layout).unwrap();

        let first = resolve_categories(&mut store, &layout, &declared(&["Sports"]), &names(&["Sports"])).unwrap();
        let second = resolve_categories(&mut store, &layout, &declared(&["Sports"]), &names(&["Sports"])).unwrap();

        assert_eq!(first.id("Sports"), second.id("Sports"));
        assert!(second.created().is_empty());
        assert_eq!(verify_count(store.connection(), "industries").unwrap(), 1);
    }

    #[test]
    fn test_referenced_but_not_declared_must_exist() {
        let layout = TableLayout::niches();
        let mut store = SqliteStore::open_in_memory(&layout).unwrap();
        resolve_categories(&mut store, &layout, &declared(&["Sports"]), &BTreeSet::new()).unwrap();

        let ok = resolve_categories(&mut store, &layout, &[], &names(&["Sports"])).unwrap();
        assert!(ok.id("Sports").is_some());

        let err = resolve_categories(&mut store, &layout, &[], &names(&["Sports", "Nonexistent Industry"]))
            .unwrap_err();
        match err {
            LoadError::NotFound { names } => assert_eq!(names, vec!["Nonexistent Industry".to_string()]),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_category_creates_nothing() {
        let layout = TableLayout::niches();
        let mut store = SqliteStore::open_in_memory(&layout).unwrap();

        let err = resolve_categories(
            &mut store,
            &layout,
            &declared(&["Sports"]),
            &names(&["Sports", "Nonexistent Industry"]),
        )
        .unwrap_err();

        assert!(matches!(err, LoadError::NotFound { .. }));
        assert_eq!(verify_count(store.connection(), "industries").unwrap(), 0);
    }

    /// Store whose category table has no unique index on the name
    #[derive(Default)]
    struct NoUniqueIndex {
        inserts: Vec<Conflict>,
    }

    impl Store for NoUniqueIndex {
        fn select(&mut self, _table: &str, _columns: &[&str], _filter: &Filter) -> Result<Vec<Row>, StoreError> {
            Ok(Vec::new())
        }

        fn insert(&mut self, _table: &str, rows: &[Row], conflict: &Conflict) -> Result<Vec<Row>, StoreError> {
            self.inserts.push(conflict.clone());
            if let Conflict::Ignore(_) = conflict {
                return Err(StoreError::Http {
                    status: 400,
                    message: "42P10: there is no unique or exclusion constraint matching the ON CONFLICT specification"
                        .to_string(),
                });
            }
            Ok(rows
                .iter()
                .enumerate()
                .map(|(i, row)| {
                    let mut row = row.clone();
                    row.insert("id".to_string(), Value::from(i as i64 + 1));
                    row
                })
                .collect())
        }

        fn delete(&mut self, _table: &str, _filter: &Filter) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    #[test]
    fn test_falls_back_without_unique_index() {
        let layout = TableLayout::niches();
        let mut store = NoUniqueIndex::default();

        let map = resolve_categories(&mut store, &layout, &declared(&["Sports"]), &names(&["Sports"])).unwrap();

        assert_eq!(map.id("Sports"), Some("1"));
        assert_eq!(map.created(), &declared(&["Sports"])[..]);
        assert_eq!(store.inserts, vec![Conflict::ignore_on(&["name"]), Conflict::Fail]);
    }

    #[test]
    fn test_empty_request_touches_nothing() {
        let layout = TableLayout::niches();
        let mut store = SqliteStore::open_in_memory(&layout).unwrap();

        let map = resolve_categories(&mut store, &layout, &[], &BTreeSet::new()).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_absorb_keeps_first_duplicate() {
        let mut ids = BTreeMap::new();
        absorb(
            &mut ids,
            vec![
                ("Sports".to_string(), "a".to_string()),
                ("Sports".to_string(), "b".to_string()),
            ],
        );

        assert_eq!(ids.get("Sports").map(String::as_str), Some("a"));
    }
}
