// 🧹 Reset Coordinator - delete everything, children first
//
// Dependent state → leaf records → categories. Any other order trips the
// foreign keys. Destructive and irreversible; only runs when asked for.

use crate::error::{LoadError, Stage};
use crate::store::{Filter, Store, TableLayout};

/// The three tiers, in the only order they may be deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    DependentState,
    LeafRecords,
    Categories,
}

pub const RESET_ORDER: [Tier; 3] = [Tier::DependentState, Tier::LeafRecords, Tier::Categories];

impl Tier {
    /// Table and the always-set column the delete-all filters on
    pub fn target<'a>(&self, layout: &'a TableLayout) -> (&'a str, &'a str) {
        match self {
            Tier::DependentState => (layout.dependents.table.as_str(), layout.dependents.leaf_id.as_str()),
            Tier::LeafRecords => (layout.leaves.table.as_str(), layout.leaves.id.as_str()),
            Tier::Categories => (layout.categories.table.as_str(), layout.categories.id.as_str()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tier::DependentState => "dependent state",
            Tier::LeafRecords => "leaf records",
            Tier::Categories => "categories",
        }
    }
}

/// Rows deleted per tier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetSummary {
    pub dependent_state: usize,
    pub leaf_records: usize,
    pub categories: usize,
}

impl ResetSummary {
    pub fn total(&self) -> usize {
        self.dependent_state + self.leaf_records + self.categories
    }

    fn record(&mut self, tier: Tier, deleted: usize) {
        match tier {
            Tier::DependentState => self.dependent_state = deleted,
            Tier::LeafRecords => self.leaf_records = deleted,
            Tier::Categories => self.categories = deleted,
        }
    }
}

/// Delete all rows of all three tiers, in `RESET_ORDER`
pub fn reset_all<S: Store>(store: &mut S, layout: &TableLayout) -> Result<ResetSummary, LoadError> {
    let mut summary = ResetSummary::default();

    for tier in RESET_ORDER {
        let (table, key) = tier.target(layout);

        let deleted = store
            .delete(table, &Filter::not_null(key))
            .map_err(|e| LoadError::persistence(Stage::Resetting, summary.total(), e))?;

        log::info!("reset: deleted {} {} from {}", deleted, tier.name(), table);
        summary.record(tier, deleted);
    }

    Ok(summary)
}
