//! The operations facade. Collaborators construct one `ExperimentEngine`
//! over an injected store and drive everything through these methods; the
//! engine itself never performs network or disk I/O.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use split_assignment::AssignmentEngine;
use split_bandit::{BanditOptimizer, BanditPolicy};
use split_core::config::EngineConfig;
use split_core::types::{
    AnalysisMethod, AnalysisResult, Assignment, DeviceInfo, PropertyValue, SessionInfo, Test,
    TestStatus, TestType, TrafficAllocation, UserProfile,
};
use split_core::{SplitError, SplitResult};
use split_stats::analyzer::user_outcomes_from_events;
use split_stats::{Analyzer, CancelToken};
use split_store::{ExperimentStore, InMemoryStore};
use split_tracking::EventTracker;

use crate::lifecycle::{self, TestConfig};

pub struct ExperimentEngine {
    store: Arc<dyn ExperimentStore>,
    assigner: AssignmentEngine,
    tracker: EventTracker,
    analyzer: Analyzer,
    optimizer: BanditOptimizer,
    config: EngineConfig,
}

impl ExperimentEngine {
    pub fn new(store: Arc<dyn ExperimentStore>, config: EngineConfig) -> Self {
        Self {
            assigner: AssignmentEngine::new(Arc::clone(&store)),
            tracker: EventTracker::new(Arc::clone(&store)),
            analyzer: Analyzer::new(config.clone()),
            optimizer: BanditOptimizer::new(
                BanditPolicy::default(),
                config.bandit.exploration_floor,
                config.bandit.thompson_draws,
            ),
            store,
            config,
        }
    }

    /// Engine over the in-memory store, for development and tests.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(Arc::new(InMemoryStore::new()), config)
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Validate and persist a new test in `Draft`.
    pub fn create_test(&self, config: TestConfig) -> SplitResult<Test> {
        lifecycle::validate(&config, &self.config)?;
        let test = lifecycle::build_test(config, &self.config);
        info!(test_id = %test.id, name = %test.name, test_type = ?test.test_type, "Test created");
        self.store.insert_test(test.clone())?;
        Ok(test)
    }

    /// Transition `Draft -> Running`, freezing variant and goal definitions
    /// and stamping the activation time.
    pub fn start_test(&self, test_id: &Uuid) -> SplitResult<()> {
        self.transition(test_id, TestStatus::Draft, TestStatus::Running, "draft")?;
        info!(test_id = %test_id, "Test started");
        Ok(())
    }

    /// Transition `Running -> Concluded`. Analysis remains available.
    pub fn conclude_test(&self, test_id: &Uuid) -> SplitResult<()> {
        self.transition(test_id, TestStatus::Running, TestStatus::Concluded, "running")?;
        info!(test_id = %test_id, "Test concluded");
        Ok(())
    }

    /// Scrap an unstarted test: `Draft -> Archived`.
    pub fn archive_test(&self, test_id: &Uuid) -> SplitResult<()> {
        self.transition(test_id, TestStatus::Draft, TestStatus::Archived, "draft")?;
        info!(test_id = %test_id, "Test archived");
        Ok(())
    }

    fn transition(
        &self,
        test_id: &Uuid,
        from: TestStatus,
        to: TestStatus,
        expected: &str,
    ) -> SplitResult<()> {
        let mut outcome = Ok(());
        self.store.update_test(test_id, &mut |test| {
            if test.status != from {
                outcome = Err(SplitError::InvalidTransition {
                    test_id: *test_id,
                    status: test.status.as_str().to_string(),
                    expected: expected.to_string(),
                });
                return;
            }
            test.status = to;
            match to {
                TestStatus::Running => test.activated_at = Some(chrono::Utc::now()),
                TestStatus::Concluded => test.concluded_at = Some(chrono::Utc::now()),
                _ => {}
            }
        })?;
        outcome
    }

    // ─── Assignment ─────────────────────────────────────────────────────

    /// Deterministically assign a user, or None when the test is unknown,
    /// not running, or the user is outside the audience.
    pub fn assign_user_to_variant(
        &self,
        test_id: &Uuid,
        user_id: &str,
        profile: &UserProfile,
        session: &SessionInfo,
        device: &DeviceInfo,
    ) -> Option<Uuid> {
        let test = self.store.get_test(test_id)?;
        self.assigner.assign(&test, user_id, profile, session, device)
    }

    // ─── Tracking ───────────────────────────────────────────────────────

    pub fn track_exposure(
        &self,
        test_id: &Uuid,
        user_id: &str,
        properties: HashMap<String, PropertyValue>,
    ) -> SplitResult<()> {
        let test = self.require_test(test_id)?;
        self.tracker.track_exposure(&test, user_id, properties)
    }

    pub fn track_conversion(
        &self,
        test_id: &Uuid,
        user_id: &str,
        goal_id: &Uuid,
        value: Option<f64>,
        properties: HashMap<String, PropertyValue>,
    ) -> SplitResult<()> {
        let test = self.require_test(test_id)?;
        self.tracker
            .track_conversion(&test, user_id, goal_id, value, properties)
    }

    pub fn track_metric(
        &self,
        test_id: &Uuid,
        user_id: &str,
        metric: &str,
        value: f64,
        properties: HashMap<String, PropertyValue>,
    ) -> SplitResult<()> {
        let test = self.require_test(test_id)?;
        self.tracker
            .track_metric(&test, user_id, metric, value, properties)
    }

    // ─── Analysis ───────────────────────────────────────────────────────

    /// Analyze accumulated counters. Callable any number of times while the
    /// test runs and after conclusion; each call on a sequential test spends
    /// one look, persisted before the analysis runs.
    pub fn analyze_test(
        &self,
        test_id: &Uuid,
        cancel: Option<&CancelToken>,
    ) -> SplitResult<AnalysisResult> {
        let mut test = self.require_test(test_id)?;

        if test.test_type == TestType::Sequential {
            self.store.update_test(test_id, &mut |t| {
                t.looks_spent += 1;
            })?;
            test.looks_spent += 1;
        }

        let snapshot = self.store.snapshot(&test);
        let outcomes = if test.statistics.method == AnalysisMethod::Bootstrap {
            let events = self.store.events_for_test(test_id);
            user_outcomes_from_events(&events, &test.primary_goal)
        } else {
            HashMap::new()
        };

        self.analyzer.analyze(&test, &snapshot, &outcomes, cancel)
    }

    // ─── Bandit ─────────────────────────────────────────────────────────

    /// Recompute and persist bandit weights from current reward statistics.
    /// The assignment engine picks them up on its next call.
    pub fn update_weights(&self, test_id: &Uuid) -> SplitResult<TrafficAllocation> {
        let test = self.require_test(test_id)?;
        if test.test_type != TestType::MultiArmedBandit {
            return Err(SplitError::InvalidConfiguration(format!(
                "test {test_id} is not a multi-armed bandit"
            )));
        }
        if test.status != TestStatus::Running {
            return Err(SplitError::InvalidTransition {
                test_id: *test_id,
                status: test.status.as_str().to_string(),
                expected: "running".to_string(),
            });
        }

        let snapshot = self.store.snapshot(&test);
        let allocation = self.optimizer.update_weights(
            &snapshot,
            &test.primary_goal,
            &mut rand::thread_rng(),
        )?;

        let persisted = allocation.clone();
        self.store.update_test(test_id, &mut |t| {
            t.traffic_allocation = persisted.clone();
        })?;
        Ok(allocation)
    }

    // ─── Reads ──────────────────────────────────────────────────────────

    pub fn get_test(&self, test_id: &Uuid) -> Option<Test> {
        self.store.get_test(test_id)
    }

    pub fn get_tests(&self) -> Vec<Test> {
        self.store.list_tests()
    }

    /// All assignments for a user across tests, so collaborators can render
    /// consistent experiment context within a session.
    pub fn get_user_experiments(&self, user_id: &str) -> Vec<Assignment> {
        self.store.assignments_for_user(user_id)
    }

    /// Clear counters, dedup flags, and events for a fresh run of this
    /// test. Assignments survive: users keep their variants.
    pub fn reset_counters(&self, test_id: &Uuid) -> SplitResult<()> {
        self.require_test(test_id)?;
        self.store.reset_counters(test_id);
        Ok(())
    }

    fn require_test(&self, test_id: &Uuid) -> SplitResult<Test> {
        self.store
            .get_test(test_id)
            .ok_or_else(|| SplitError::NotFound(format!("test {test_id}")))
    }
}
