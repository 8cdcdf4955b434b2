use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use split_core::types::{EventKind, Goal, PropertyValue, Test, TrackedEvent};
use split_core::{SplitError, SplitResult};
use split_store::ExperimentStore;

/// Records events against assignments. Tracking a user with no assignment
/// is an error the caller must see, never a silent drop.
pub struct EventTracker {
    store: Arc<dyn ExperimentStore>,
}

impl EventTracker {
    pub fn new(store: Arc<dyn ExperimentStore>) -> Self {
        Self { store }
    }

    /// Record that a user experienced their assigned variant. Idempotent by
    /// default: repeats after the first are accepted no-ops unless the test
    /// allows repeat exposures.
    pub fn track_exposure(
        &self,
        test: &Test,
        user_id: &str,
        properties: HashMap<String, PropertyValue>,
    ) -> SplitResult<()> {
        let assignment = self.resolve_assignment(&test.id, user_id)?;

        let first = self.store.try_mark_exposed(&test.id, user_id);
        if !first && !test.allow_repeat_exposures {
            return Ok(());
        }

        self.store
            .record_exposure(&test.id, &assignment.variant_id);
        self.store.append_event(TrackedEvent {
            event_id: Uuid::new_v4(),
            test_id: test.id,
            user_id: user_id.to_string(),
            variant_id: assignment.variant_id,
            kind: EventKind::Exposure,
            value: None,
            properties,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Record a goal conversion, folding `value` (default 1.0) into the
    /// goal's running aggregate. Deduplicated per (assignment, goal) unless
    /// the goal allows repeat conversions.
    pub fn track_conversion(
        &self,
        test: &Test,
        user_id: &str,
        goal_id: &Uuid,
        value: Option<f64>,
        properties: HashMap<String, PropertyValue>,
    ) -> SplitResult<()> {
        let assignment = self.resolve_assignment(&test.id, user_id)?;
        let goal = Self::find_goal(test, goal_id)?;

        let first = self.store.try_mark_converted(&test.id, user_id, goal_id);
        if !first && !goal.allow_repeat_conversions {
            debug!(test_id = %test.id, user_id, goal_id = %goal_id, "Duplicate conversion ignored");
            return Ok(());
        }

        let value = value.unwrap_or(1.0);
        self.store
            .record_conversion(&test.id, &assignment.variant_id, goal_id, value);
        self.store.append_event(TrackedEvent {
            event_id: Uuid::new_v4(),
            test_id: test.id,
            user_id: user_id.to_string(),
            variant_id: assignment.variant_id,
            kind: EventKind::Conversion { goal_id: *goal_id },
            value: Some(value),
            properties,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Fold a value into a named auxiliary metric (latency, engagement).
    /// Never gates the primary decision; never deduplicated.
    pub fn track_metric(
        &self,
        test: &Test,
        user_id: &str,
        metric: &str,
        value: f64,
        properties: HashMap<String, PropertyValue>,
    ) -> SplitResult<()> {
        let assignment = self.resolve_assignment(&test.id, user_id)?;

        self.store
            .record_metric(&test.id, &assignment.variant_id, metric, value);
        self.store.append_event(TrackedEvent {
            event_id: Uuid::new_v4(),
            test_id: test.id,
            user_id: user_id.to_string(),
            variant_id: assignment.variant_id,
            kind: EventKind::Metric {
                name: metric.to_string(),
            },
            value: Some(value),
            properties,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn resolve_assignment(
        &self,
        test_id: &Uuid,
        user_id: &str,
    ) -> SplitResult<split_core::types::Assignment> {
        self.store
            .get_assignment(test_id, user_id)
            .ok_or_else(|| SplitError::NoAssignment {
                test_id: *test_id,
                user_id: user_id.to_string(),
            })
    }

    fn find_goal<'a>(test: &'a Test, goal_id: &Uuid) -> SplitResult<&'a Goal> {
        if test.primary_goal.id == *goal_id {
            return Ok(&test.primary_goal);
        }
        test.secondary_goals
            .iter()
            .find(|g| g.id == *goal_id)
            .ok_or(SplitError::UnknownGoal {
                test_id: test.id,
                goal_id: *goal_id,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use split_core::types::{
        Assignment, DeviceInfo, GoalDirection, GoalMetric, SessionInfo, StatisticalConfiguration,
        TestStatus, TestType, TrafficAllocation, Variant,
    };
    use split_store::InMemoryStore;

    fn fixture() -> (Arc<InMemoryStore>, EventTracker, Test) {
        let store = Arc::new(InMemoryStore::new());
        let tracker = EventTracker::new(Arc::clone(&store) as Arc<dyn ExperimentStore>);

        let control = Variant {
            id: Uuid::new_v4(),
            name: "control".to_string(),
            is_control: true,
            changes: HashMap::new(),
        };
        let treatment = Variant {
            id: Uuid::new_v4(),
            name: "treatment".to_string(),
            is_control: false,
            changes: HashMap::new(),
        };
        let test = Test {
            id: Uuid::new_v4(),
            name: "checkout-flow".to_string(),
            description: String::new(),
            test_type: TestType::SimpleAb,
            status: TestStatus::Running,
            variants: vec![control, treatment],
            traffic_allocation: TrafficAllocation::even(2),
            audience: None,
            primary_goal: Goal {
                id: Uuid::new_v4(),
                name: "purchase".to_string(),
                metric: GoalMetric::Binary,
                direction: GoalDirection::HigherIsBetter,
                weight: 1.0,
                allow_repeat_conversions: false,
            },
            secondary_goals: vec![Goal {
                id: Uuid::new_v4(),
                name: "revenue".to_string(),
                metric: GoalMetric::Continuous,
                direction: GoalDirection::HigherIsBetter,
                weight: 0.5,
                allow_repeat_conversions: true,
            }],
            planned_duration_days: None,
            min_sample_size: 100,
            statistics: StatisticalConfiguration::default(),
            allow_repeat_exposures: false,
            looks_spent: 0,
            owner: "growth".to_string(),
            tags: vec![],
            created_at: Utc::now(),
            activated_at: Some(Utc::now()),
            concluded_at: None,
        };
        (store, tracker, test)
    }

    fn assign(store: &InMemoryStore, test: &Test, user: &str) {
        store.create_assignment(Assignment {
            test_id: test.id,
            user_id: user.to_string(),
            variant_id: test.variants[0].id,
            audience_snapshot: None,
            session: SessionInfo::default(),
            device: DeviceInfo::default(),
            assigned_at: Utc::now(),
        });
    }

    #[test]
    fn test_tracking_without_assignment_fails() {
        let (_store, tracker, test) = fixture();
        let err = tracker
            .track_exposure(&test, "ghost", HashMap::new())
            .unwrap_err();
        assert!(matches!(err, SplitError::NoAssignment { .. }));
    }

    #[test]
    fn test_exposure_is_idempotent_by_default() {
        let (store, tracker, test) = fixture();
        assign(&store, &test, "u1");

        tracker.track_exposure(&test, "u1", HashMap::new()).unwrap();
        tracker.track_exposure(&test, "u1", HashMap::new()).unwrap();
        tracker.track_exposure(&test, "u1", HashMap::new()).unwrap();

        let snap = store.snapshot(&test);
        assert_eq!(snap.variants[0].exposures, 1);
    }

    #[test]
    fn test_repeat_exposures_when_allowed() {
        let (store, tracker, mut test) = fixture();
        test.allow_repeat_exposures = true;
        assign(&store, &test, "u1");

        tracker.track_exposure(&test, "u1", HashMap::new()).unwrap();
        tracker.track_exposure(&test, "u1", HashMap::new()).unwrap();

        let snap = store.snapshot(&test);
        assert_eq!(snap.variants[0].exposures, 2);
    }

    #[test]
    fn test_conversion_dedup_per_goal() {
        let (store, tracker, test) = fixture();
        assign(&store, &test, "u1");
        let goal_id = test.primary_goal.id;

        tracker
            .track_conversion(&test, "u1", &goal_id, None, HashMap::new())
            .unwrap();
        tracker
            .track_conversion(&test, "u1", &goal_id, None, HashMap::new())
            .unwrap();

        let snap = store.snapshot(&test);
        assert_eq!(snap.variants[0].goal(&goal_id).conversions, 1);
    }

    #[test]
    fn test_repeat_conversions_for_revenue_goal() {
        let (store, tracker, test) = fixture();
        assign(&store, &test, "u1");
        let revenue = test.secondary_goals[0].id;

        tracker
            .track_conversion(&test, "u1", &revenue, Some(19.99), HashMap::new())
            .unwrap();
        tracker
            .track_conversion(&test, "u1", &revenue, Some(5.01), HashMap::new())
            .unwrap();

        let snap = store.snapshot(&test);
        let goal = snap.variants[0].goal(&revenue);
        assert_eq!(goal.conversions, 2);
        assert!((goal.value.sum - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_goal_rejected() {
        let (store, tracker, test) = fixture();
        assign(&store, &test, "u1");

        let err = tracker
            .track_conversion(&test, "u1", &Uuid::new_v4(), None, HashMap::new())
            .unwrap_err();
        assert!(matches!(err, SplitError::UnknownGoal { .. }));
    }

    #[test]
    fn test_metric_folds_regardless_of_goals() {
        let (store, tracker, test) = fixture();
        assign(&store, &test, "u1");

        tracker
            .track_metric(&test, "u1", "latency_ms", 120.0, HashMap::new())
            .unwrap();
        tracker
            .track_metric(&test, "u1", "latency_ms", 80.0, HashMap::new())
            .unwrap();

        let snap = store.snapshot(&test);
        let agg = snap.variants[0].metrics.get("latency_ms").unwrap();
        assert_eq!(agg.count, 2);
        assert!((agg.mean() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_events_are_appended() {
        let (store, tracker, test) = fixture();
        assign(&store, &test, "u1");

        tracker.track_exposure(&test, "u1", HashMap::new()).unwrap();
        tracker
            .track_conversion(&test, "u1", &test.primary_goal.id, None, HashMap::new())
            .unwrap();

        let events = store.events_for_test(&test.id);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Exposure);
    }
}
