//! Deterministic assignment of users to variants.

use chrono::Utc;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use split_core::types::{
    Assignment, DeviceInfo, SessionInfo, Test, TestStatus, TestType, UserProfile,
};
use split_store::ExperimentStore;

use crate::bucketing::{bucket_for, pick_index};
use crate::targeting::matches_audience;

/// Maps (test, user) to a variant. Idempotent: an existing assignment is
/// always returned as-is, regardless of traffic allocation changes since.
pub struct AssignmentEngine {
    store: Arc<dyn ExperimentStore>,
}

impl AssignmentEngine {
    pub fn new(store: Arc<dyn ExperimentStore>) -> Self {
        Self { store }
    }

    /// Assign a user to a variant, or None when the test is not running or
    /// the user falls outside the audience. This is the single write path
    /// creating assignments.
    pub fn assign(
        &self,
        test: &Test,
        user_id: &str,
        profile: &UserProfile,
        session: &SessionInfo,
        device: &DeviceInfo,
    ) -> Option<Uuid> {
        if test.status != TestStatus::Running {
            return None;
        }

        // Sticky: an existing assignment wins over everything, including
        // reallocated bandit weights.
        if let Some(existing) = self.store.get_assignment(&test.id, user_id) {
            return Some(existing.variant_id);
        }

        if !matches_audience(test.audience.as_ref(), profile, session, device) {
            debug!(test_id = %test.id, user_id, "User outside audience, skipping assignment");
            return None;
        }

        // Bandit tests read the latest persisted weights; the optimizer
        // rewrites them between assignment calls.
        let weights = &test.traffic_allocation.weights;
        debug_assert_eq!(weights.len(), test.variants.len());

        let bucket = bucket_for(&test.id, user_id);
        let idx = pick_index(weights, bucket)?;
        let variant_id = test.variants[idx].id;

        let candidate = Assignment {
            test_id: test.id,
            user_id: user_id.to_string(),
            variant_id,
            audience_snapshot: test.audience.clone(),
            session: session.clone(),
            device: device.clone(),
            assigned_at: Utc::now(),
        };

        // Concurrent first-time requests collapse to one winner here; the
        // loser gets the winner's record back.
        let (stored, created) = self.store.create_assignment(candidate);
        if created {
            debug!(
                test_id = %test.id,
                user_id,
                variant_id = %stored.variant_id,
                bucket,
                test_type = ?test.test_type,
                "Created assignment"
            );
        }
        Some(stored.variant_id)
    }

    /// Whether a test's allocation is expected to drift between calls.
    pub fn has_adaptive_allocation(test: &Test) -> bool {
        test.test_type == TestType::MultiArmedBandit
    }
}
