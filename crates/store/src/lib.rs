//! Entity store: tests, assignments, hot counters, and the append-only
//! event log behind an injected trait so backends can be swapped without
//! touching engine logic.

pub mod memory;

pub use memory::InMemoryStore;

use split_core::types::{Assignment, Test, TestSnapshot, TrackedEvent};
use split_core::SplitResult;
use uuid::Uuid;

/// Storage seam for the experimentation engine. All operations are per-key
/// atomic; none may take a lock wider than a single (test, variant) entry.
pub trait ExperimentStore: Send + Sync {
    // ─── Tests ──────────────────────────────────────────────────────────

    fn insert_test(&self, test: Test) -> SplitResult<()>;

    fn get_test(&self, id: &Uuid) -> Option<Test>;

    fn list_tests(&self) -> Vec<Test>;

    /// Atomically apply a mutation to a stored test. Fails with `NotFound`
    /// for unknown ids.
    fn update_test(&self, id: &Uuid, apply: &mut dyn FnMut(&mut Test)) -> SplitResult<()>;

    // ─── Assignments ────────────────────────────────────────────────────

    /// Create-if-absent. Concurrent duplicate requests collapse to a single
    /// winner; the returned record is whichever assignment actually landed,
    /// and the bool reports whether this call created it.
    fn create_assignment(&self, assignment: Assignment) -> (Assignment, bool);

    fn get_assignment(&self, test_id: &Uuid, user_id: &str) -> Option<Assignment>;

    fn assignments_for_user(&self, user_id: &str) -> Vec<Assignment>;

    // ─── Dedup flags ────────────────────────────────────────────────────

    /// First-exposure flag per assignment. Returns true exactly once.
    fn try_mark_exposed(&self, test_id: &Uuid, user_id: &str) -> bool;

    /// First-conversion flag per (assignment, goal). Returns true exactly once.
    fn try_mark_converted(&self, test_id: &Uuid, user_id: &str, goal_id: &Uuid) -> bool;

    // ─── Counters ───────────────────────────────────────────────────────

    fn record_exposure(&self, test_id: &Uuid, variant_id: &Uuid);

    fn record_conversion(&self, test_id: &Uuid, variant_id: &Uuid, goal_id: &Uuid, value: f64);

    fn record_metric(&self, test_id: &Uuid, variant_id: &Uuid, metric: &str, value: f64);

    /// Point-in-time counter copy in variant definition order. Does not
    /// block concurrent writers.
    fn snapshot(&self, test: &Test) -> TestSnapshot;

    /// Clear counters, dedup flags, and events for a new run. Assignments
    /// are preserved: a user keeps their variant across runs.
    fn reset_counters(&self, test_id: &Uuid);

    // ─── Events ─────────────────────────────────────────────────────────

    fn append_event(&self, event: TrackedEvent);

    fn events_for_test(&self, test_id: &Uuid) -> Vec<TrackedEvent>;
}
