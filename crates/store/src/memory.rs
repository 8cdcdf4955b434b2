//! In-memory store backed by DashMap.
//!
//! Production: replace with a persistent backend behind the same trait.
//! This provides the full API surface for development and testing.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

use split_core::types::{
    Assignment, GoalSnapshot, RunningAggregate, Test, TestSnapshot, TrackedEvent, VariantSnapshot,
};
use split_core::{SplitError, SplitResult};

use crate::ExperimentStore;

/// Hot per-(test, variant) counter state. Exposures are lock-free; goal and
/// metric aggregates mutate under their own per-key entry guard.
#[derive(Default)]
struct VariantCounters {
    exposures: AtomicU64,
    goals: DashMap<Uuid, GoalSnapshot>,
    metrics: DashMap<String, RunningAggregate>,
}

/// Thread-safe in-memory store for tests, assignments, counters, and events.
pub struct InMemoryStore {
    tests: DashMap<Uuid, Test>,
    assignments: DashMap<(Uuid, String), Assignment>,
    exposed: DashMap<(Uuid, String), ()>,
    converted: DashMap<(Uuid, String, Uuid), ()>,
    counters: DashMap<(Uuid, Uuid), VariantCounters>,
    events: RwLock<Vec<TrackedEvent>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        info!("Experiment store initialized (in-memory, development mode)");
        Self {
            tests: DashMap::new(),
            assignments: DashMap::new(),
            exposed: DashMap::new(),
            converted: DashMap::new(),
            counters: DashMap::new(),
            events: RwLock::new(Vec::new()),
        }
    }
}

impl ExperimentStore for InMemoryStore {
    fn insert_test(&self, test: Test) -> SplitResult<()> {
        debug!(test_id = %test.id, name = %test.name, "Inserting test");
        self.tests.insert(test.id, test);
        Ok(())
    }

    fn get_test(&self, id: &Uuid) -> Option<Test> {
        self.tests.get(id).map(|t| t.clone())
    }

    fn list_tests(&self) -> Vec<Test> {
        let mut tests: Vec<Test> = self.tests.iter().map(|t| t.clone()).collect();
        tests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tests
    }

    fn update_test(&self, id: &Uuid, apply: &mut dyn FnMut(&mut Test)) -> SplitResult<()> {
        let mut entry = self
            .tests
            .get_mut(id)
            .ok_or_else(|| SplitError::NotFound(format!("test {id}")))?;
        apply(entry.value_mut());
        Ok(())
    }

    fn create_assignment(&self, assignment: Assignment) -> (Assignment, bool) {
        let key = (assignment.test_id, assignment.user_id.clone());
        // The entry guard makes check-then-create atomic: a concurrent
        // duplicate request blocks on this key and then reads the winner.
        let mut created = false;
        let stored = self
            .assignments
            .entry(key)
            .or_insert_with(|| {
                created = true;
                assignment
            })
            .clone();
        (stored, created)
    }

    fn get_assignment(&self, test_id: &Uuid, user_id: &str) -> Option<Assignment> {
        self.assignments
            .get(&(*test_id, user_id.to_string()))
            .map(|a| a.clone())
    }

    fn assignments_for_user(&self, user_id: &str) -> Vec<Assignment> {
        let mut out: Vec<Assignment> = self
            .assignments
            .iter()
            .filter(|entry| entry.key().1 == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        out.sort_by(|a, b| a.assigned_at.cmp(&b.assigned_at));
        out
    }

    fn try_mark_exposed(&self, test_id: &Uuid, user_id: &str) -> bool {
        self.exposed
            .insert((*test_id, user_id.to_string()), ())
            .is_none()
    }

    fn try_mark_converted(&self, test_id: &Uuid, user_id: &str, goal_id: &Uuid) -> bool {
        self.converted
            .insert((*test_id, user_id.to_string(), *goal_id), ())
            .is_none()
    }

    fn record_exposure(&self, test_id: &Uuid, variant_id: &Uuid) {
        self.counters
            .entry((*test_id, *variant_id))
            .or_default()
            .exposures
            .fetch_add(1, Ordering::Relaxed);
    }

    fn record_conversion(&self, test_id: &Uuid, variant_id: &Uuid, goal_id: &Uuid, value: f64) {
        let counters = self.counters.entry((*test_id, *variant_id)).or_default();
        let mut goal = counters.goals.entry(*goal_id).or_default();
        goal.conversions += 1;
        goal.value.fold(value);
    }

    fn record_metric(&self, test_id: &Uuid, variant_id: &Uuid, metric: &str, value: f64) {
        let counters = self.counters.entry((*test_id, *variant_id)).or_default();
        let mut agg = counters.metrics.entry(metric.to_string()).or_default();
        agg.fold(value);
    }

    fn snapshot(&self, test: &Test) -> TestSnapshot {
        let variants = test
            .variants
            .iter()
            .map(|variant| {
                let key = (test.id, variant.id);
                match self.counters.get(&key) {
                    Some(counters) => VariantSnapshot {
                        variant_id: variant.id,
                        exposures: counters.exposures.load(Ordering::Relaxed),
                        goals: counters
                            .goals
                            .iter()
                            .map(|g| (*g.key(), g.value().clone()))
                            .collect(),
                        metrics: counters
                            .metrics
                            .iter()
                            .map(|m| (m.key().clone(), *m.value()))
                            .collect(),
                    },
                    None => VariantSnapshot {
                        variant_id: variant.id,
                        exposures: 0,
                        goals: HashMap::new(),
                        metrics: HashMap::new(),
                    },
                }
            })
            .collect();

        TestSnapshot {
            test_id: test.id,
            variants,
            taken_at: Utc::now(),
        }
    }

    fn reset_counters(&self, test_id: &Uuid) {
        info!(test_id = %test_id, "Resetting counters for new run");
        self.counters.retain(|key, _| key.0 != *test_id);
        self.exposed.retain(|key, _| key.0 != *test_id);
        self.converted.retain(|key, _| key.0 != *test_id);
        self.events.write().retain(|e| e.test_id != *test_id);
    }

    fn append_event(&self, event: TrackedEvent) {
        self.events.write().push(event);
    }

    fn events_for_test(&self, test_id: &Uuid) -> Vec<TrackedEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.test_id == *test_id)
            .cloned()
            .collect()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}
