// 🚚 Loader - one run: (reset) → resolve categories → upsert leaves → (verify)
//
// Owns the store for the duration of the run and walks the run-state machine,
// reporting each transition. The first error moves the run to Failed.

use crate::config::LoaderOptions;
use crate::dataset::ReferenceDataset;
use crate::error::LoadError;
use crate::progress::{ProgressObserver, RunState};
use crate::quality::{check_dataset, QualityReport, Severity};
use crate::reset::{reset_all, ResetSummary};
use crate::resolver::resolve_categories;
use crate::store::Store;
use crate::upsert::{batch_count, resolve_leaves, upsert_leaves, UpsertSummary};
use crate::verify::{verify_load, VerifyReport};
use chrono::{DateTime, Utc};

// ============================================================================
// REPORTS
// ============================================================================

/// What a run would do, computed without touching the store
#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub fingerprint: String,
    pub records: usize,
    pub categories_declared: usize,
    pub categories_referenced: usize,
    pub batches: usize,
    pub batch_size: usize,
    pub reset: bool,
    pub quality: QualityReport,
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub fingerprint: String,
    pub quality: QualityReport,
    pub reset: Option<ResetSummary>,
    pub categories_resolved: usize,
    pub categories_created: Vec<String>,
    pub upsert: UpsertSummary,
    pub verify: Option<VerifyReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl LoadReport {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Check the dataset and describe the run; shared by dry runs and real runs
pub fn plan(dataset: &mut ReferenceDataset, options: &LoaderOptions) -> Result<LoadPlan, LoadError> {
    options.validate()?;
    let quality = check_dataset(dataset).into_result()?;

    // After a reset no category exists, so every referenced one must be creatable
    if options.reset {
        let uncreatable: Vec<String> = dataset
            .referenced_categories()
            .into_iter()
            .filter(|name| !dataset.declared_categories().contains(name))
            .collect();
        if !uncreatable.is_empty() {
            return Err(LoadError::configuration(format!(
                "reset would delete categories the dataset cannot recreate: {}",
                uncreatable.join(", ")
            )));
        }
    }

    Ok(LoadPlan {
        fingerprint: dataset.fingerprint(),
        records: dataset.len(),
        categories_declared: dataset.declared_categories().len(),
        categories_referenced: dataset.referenced_categories().len(),
        batches: batch_count(dataset.len(), options.batch_size),
        batch_size: options.batch_size,
        reset: options.reset,
        quality,
    })
}

// ============================================================================
// LOADER
// ============================================================================

pub struct Loader<S: Store> {
    store: S,
    options: LoaderOptions,
    state: RunState,
}

impl<S: Store> Loader<S> {
    pub fn new(store: S, options: LoaderOptions) -> Self {
        Loader {
            store,
            options,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn advance<O: ProgressObserver + ?Sized>(&mut self, next: RunState, observer: &mut O) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        log::debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
        observer.on_state(next);
    }

    /// Execute one load. A loader runs once; a second call is a configuration error.
    pub fn run<O: ProgressObserver + ?Sized>(
        &mut self,
        mut dataset: ReferenceDataset,
        observer: &mut O,
    ) -> Result<LoadReport, LoadError> {
        if self.state != RunState::Idle {
            return Err(LoadError::configuration(format!(
                "loader already ran (state {:?})",
                self.state
            )));
        }

        match self.execute(&mut dataset, observer) {
            Ok(report) => {
                self.advance(RunState::Done, observer);
                Ok(report)
            }
            Err(err) => {
                log::error!("run failed while {}: {}", err.stage(), err);
                self.advance(RunState::Failed, observer);
                Err(err)
            }
        }
    }

    fn execute<O: ProgressObserver + ?Sized>(
        &mut self,
        dataset: &mut ReferenceDataset,
        observer: &mut O,
    ) -> Result<LoadReport, LoadError> {
        let started_at = Utc::now();

        let plan = plan(dataset, &self.options)?;
        log::info!(
            "dataset {}: {} records, {} categories, {} batches of {}",
            &plan.fingerprint[..12],
            plan.records,
            plan.categories_referenced,
            plan.batches,
            plan.batch_size
        );
        for issue in &plan.quality.issues {
            match issue.severity {
                Severity::Info => log::info!("dataset: {}", issue),
                _ => log::warn!("dataset: {}", issue),
            }
        }

        let layout = self.options.layout.clone();

        let reset = if self.options.reset {
            self.advance(RunState::Resetting, observer);
            Some(reset_all(&mut self.store, &layout)?)
        } else {
            None
        };

        self.advance(RunState::ResolvingCategories, observer);
        let categories = resolve_categories(
            &mut self.store,
            &layout,
            dataset.declared_categories(),
            &dataset.referenced_categories(),
        )?;
        let leaves = resolve_leaves(dataset, &categories)?;

        self.advance(RunState::Upserting, observer);
        let upsert = upsert_leaves(&mut self.store, &layout, &leaves, self.options.batch_size, observer)?;
        log::info!(
            "upserted {} of {} records ({} already present)",
            upsert.affected,
            upsert.submitted,
            upsert.skipped()
        );

        let verify = if self.options.verify {
            self.advance(RunState::Verifying, observer);
            Some(verify_load(&mut self.store, &layout, dataset, &categories)?)
        } else {
            None
        };

        Ok(LoadReport {
            fingerprint: plan.fingerprint,
            quality: plan.quality,
            reset,
            categories_resolved: categories.len(),
            categories_created: categories.created().to_vec(),
            upsert,
            verify,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{LeafRecord, Scale, SizeClass};
    use crate::db::{verify_count, SqliteStore};
    use crate::progress::Recorder;
    use crate::store::TableLayout;

    fn sports() -> ReferenceDataset {
        ReferenceDataset::from_groups(vec![(
            "Sports",
            vec![
                LeafRecord::new("Golf Courses", Scale::Local, SizeClass::Small),
                LeafRecord::new("Sporting Goods", Scale::NationalLocal, SizeClass::Big),
            ],
        )])
    }

    fn loader(options: LoaderOptions) -> Loader<SqliteStore> {
        let store = SqliteStore::open_in_memory(&options.layout).unwrap();
        Loader::new(store, options)
    }

    #[test]
    fn test_states_without_reset() {
        let mut loader = loader(LoaderOptions::default());
        let mut recorder = Recorder::default();

        loader.run(sports(), &mut recorder).unwrap();

        assert_eq!(
            recorder.states,
            vec![RunState::ResolvingCategories, RunState::Upserting, RunState::Done]
        );
        assert_eq!(loader.state(), RunState::Done);
    }

    #[test]
    fn test_states_with_reset_and_verify() {
        let mut loader = loader(LoaderOptions {
            reset: true,
            verify: true,
            ..LoaderOptions::default()
        });
        let mut recorder = Recorder::default();

        let report = loader.run(sports(), &mut recorder).unwrap();

        assert_eq!(
            recorder.states,
            vec![
                RunState::Resetting,
                RunState::ResolvingCategories,
                RunState::Upserting,
                RunState::Verifying,
                RunState::Done
            ]
        );
        assert!(report.verify.as_ref().unwrap().is_complete());
        assert_eq!(report.reset.as_ref().unwrap().total(), 0);
        assert!(report.duration_ms() >= 0);
    }

    #[test]
    fn test_failure_moves_to_failed() {
        let mut loader = loader(LoaderOptions::default());
        let mut recorder = Recorder::default();
        let dataset = sports().without_creation_set();

        let err = loader.run(dataset, &mut recorder).unwrap_err();

        assert!(matches!(err, LoadError::NotFound { .. }));
        assert_eq!(loader.state(), RunState::Failed);
        assert_eq!(recorder.states.last(), Some(&RunState::Failed));
        assert!(recorder.batches.is_empty());
    }

    #[test]
    fn test_invalid_options_fail_before_store() {
        let mut loader = loader(LoaderOptions {
            batch_size: 0,
            ..LoaderOptions::default()
        });
        let mut recorder = Recorder::default();

        let err = loader.run(sports(), &mut recorder).unwrap_err();

        assert!(matches!(err, LoadError::Configuration(_)));
        assert_eq!(recorder.states, vec![RunState::Failed]);
    }

    #[test]
    fn test_reset_refused_when_categories_cannot_be_recreated() {
        let mut loader = loader(LoaderOptions::default());
        loader.run(sports(), &mut Recorder::default()).unwrap();
        let mut store = loader.into_store();

        let mut recorder = Recorder::default();
        let mut second = Loader::new(
            &mut store,
            LoaderOptions {
                reset: true,
                ..LoaderOptions::default()
            },
        );
        let err = second.run(sports().without_creation_set(), &mut recorder).unwrap_err();

        assert!(matches!(err, LoadError::Configuration(_)));
        assert!(err.to_string().contains("Sports"));
        assert_eq!(recorder.states, vec![RunState::Failed]);
        assert_eq!(verify_count(store.connection(), "niches").unwrap(), 2);
        assert_eq!(verify_count(store.connection(), "industries").unwrap(), 1);
    }

    #[test]
    fn test_loader_runs_once() {
        let mut loader = loader(LoaderOptions::default());
        let mut recorder = Recorder::default();
        loader.run(sports(), &mut recorder).unwrap();

        let err = loader.run(sports(), &mut recorder).unwrap_err();
        assert!(matches!(err, LoadError::Configuration(_)));
    }

    #[test]
    fn test_plan_counts_batches() {
        let mut dataset = sports();
        let plan = plan(
            &mut dataset,
            &LoaderOptions {
                batch_size: 1,
                reset: true,
                ..LoaderOptions::default()
            },
        )
        .unwrap();

        assert_eq!(plan.records, 2);
        assert_eq!(plan.batches, 2);
        assert_eq!(plan.categories_referenced, 1);
        assert!(plan.reset);
    }

    #[test]
    fn test_generic_layout() {
        let options = LoaderOptions {
            layout: TableLayout::generic(),
            verify: true,
            ..LoaderOptions::default()
        };
        let mut loader = loader(options);
        let mut recorder = Recorder::default();

        let report = loader.run(sports(), &mut recorder).unwrap();
        assert_eq!(report.upsert.affected, 2);
        assert!(report.verify.as_ref().unwrap().is_complete());
    }
}
