// 📈 Progress - structured events instead of free-text prints
//
// The loader reports run-state transitions and one event per written batch.
// The CLI turns them into lines on stdout; tests collect them.

use serde::Serialize;

/// Per-run state machine
///
/// Idle → (Resetting) → ResolvingCategories → Upserting → (Verifying) → Done,
/// with Failed reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    Resetting,
    ResolvingCategories,
    Upserting,
    Verifying,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_advance_to(&self, next: RunState) -> bool {
        use RunState::*;

        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Idle, Resetting | ResolvingCategories) => true,
            (Resetting, ResolvingCategories) => true,
            (ResolvingCategories, Upserting) => true,
            (Upserting, Verifying | Done) => true,
            (Verifying, Done) => true,
            _ => false,
        }
    }
}

/// One batch written by the upsert engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    /// Zero-based batch number
    pub batch_index: usize,
    pub batch_count: usize,
    /// Rows submitted in this batch
    pub submitted: usize,
    /// Rows the store actually inserted (conflicts are skipped)
    pub written: usize,
    /// Rows inserted so far, this batch included
    pub cumulative: usize,
    pub total_records: usize,
}

pub trait ProgressObserver {
    fn on_state(&mut self, _state: RunState) {}

    fn on_batch(&mut self, progress: &BatchProgress);
}

/// Closures observe batches only
impl<F: FnMut(&BatchProgress)> ProgressObserver for F {
    fn on_batch(&mut self, progress: &BatchProgress) {
        self(progress)
    }
}

/// Sends everything to the `log` facade
pub struct LogObserver;

impl ProgressObserver for LogObserver {
    fn on_state(&mut self, state: RunState) {
        log::info!("state: {:?}", state);
    }

    fn on_batch(&mut self, progress: &BatchProgress) {
        log::info!(
            "batch {}/{}: {} of {} rows written (total {}/{})",
            progress.batch_index + 1,
            progress.batch_count,
            progress.written,
            progress.submitted,
            progress.cumulative,
            progress.total_records,
        );
    }
}

/// Keeps every event; used by tests and by callers that report afterwards
#[derive(Debug, Default)]
pub struct Recorder {
    pub states: Vec<RunState>,
    pub batches: Vec<BatchProgress>,
}

impl ProgressObserver for Recorder {
    fn on_state(&mut self, state: RunState) {
        self.states.push(state);
    }

    fn on_batch(&mut self, progress: &BatchProgress) {
        self.batches.push(progress.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            RunState::Idle,
            RunState::Resetting,
            RunState::ResolvingCategories,
            RunState::Upserting,
            RunState::Verifying,
            RunState::Done,
        ];

        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
        assert!(RunState::Idle.can_advance_to(RunState::ResolvingCategories));
        assert!(RunState::Upserting.can_advance_to(RunState::Done));
    }

    #[test]
    fn test_failed_reachable_only_from_non_terminal() {
        for state in [
            RunState::Idle,
            RunState::Resetting,
            RunState::ResolvingCategories,
            RunState::Upserting,
            RunState::Verifying,
        ] {
            assert!(state.can_advance_to(RunState::Failed));
            assert!(!state.is_terminal());
        }

        assert!(!RunState::Done.can_advance_to(RunState::Failed));
        assert!(!RunState::Failed.can_advance_to(RunState::Idle));
    }

    #[test]
    fn test_no_skipping_or_going_back() {
        assert!(!RunState::Idle.can_advance_to(RunState::Upserting));
        assert!(!RunState::Upserting.can_advance_to(RunState::Resetting));
        assert!(!RunState::ResolvingCategories.can_advance_to(RunState::Resetting));
    }

    #[test]
    fn test_closure_observer() {
        let mut seen = Vec::new();
        {
            let mut observer = |p: &BatchProgress| seen.push(p.batch_index);
            observer.on_state(RunState::Upserting);
            observer.on_batch(&BatchProgress {
                batch_index: 3,
                batch_count: 4,
                submitted: 50,
                written: 50,
                cumulative: 200,
                total_records: 200,
            });
        }
        assert_eq!(seen, vec![3]);
    }
}
