//! Test creation requests, configuration validation, and entity
//! construction. A test that fails validation is rejected before any state
//! changes.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use split_core::config::EngineConfig;
use split_core::types::{
    AudienceSegment, Goal, PropertyValue, StatisticalConfiguration, Test, TestStatus, TestType,
    TrafficAllocation, Variant,
};
use split_core::{SplitError, SplitResult};

const WEIGHT_SUM_EPSILON: f64 = 1e-6;

/// Request payload for `create_test`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub test_type: TestType,
    pub variants: Vec<VariantConfig>,
    /// Weights parallel to `variants`; even split when omitted.
    #[serde(default)]
    pub weights: Option<Vec<f64>>,
    #[serde(default)]
    pub audience: Option<AudienceSegment>,
    pub primary_goal: GoalConfig,
    #[serde(default)]
    pub secondary_goals: Vec<GoalConfig>,
    #[serde(default)]
    pub planned_duration_days: Option<u32>,
    /// Per-arm minimum sample size; engine default when omitted.
    #[serde(default)]
    pub min_sample_size: Option<u64>,
    #[serde(default)]
    pub statistics: StatisticalConfiguration,
    #[serde(default)]
    pub allow_repeat_exposures: bool,
    pub owner: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantConfig {
    pub name: String,
    #[serde(default)]
    pub is_control: bool,
    #[serde(default)]
    pub changes: HashMap<String, PropertyValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalConfig {
    pub name: String,
    pub metric: split_core::types::GoalMetric,
    pub direction: split_core::types::GoalDirection,
    #[serde(default = "default_goal_weight")]
    pub weight: f64,
    #[serde(default)]
    pub allow_repeat_conversions: bool,
}

fn default_goal_weight() -> f64 {
    1.0
}

/// Validate a creation request against the invariants: at least two
/// variants, exactly one control, weights summing to 1.0, a named primary
/// goal, sane statistical parameters, and a feasible bandit floor.
pub fn validate(config: &TestConfig, engine: &EngineConfig) -> SplitResult<()> {
    if config.name.trim().is_empty() {
        return Err(SplitError::InvalidConfiguration(
            "test name must not be empty".to_string(),
        ));
    }
    if config.variants.len() < 2 {
        return Err(SplitError::InvalidConfiguration(format!(
            "a test needs at least 2 variants, got {}",
            config.variants.len()
        )));
    }

    let controls = config.variants.iter().filter(|v| v.is_control).count();
    if controls != 1 {
        return Err(SplitError::InvalidConfiguration(format!(
            "exactly one control variant required, got {controls}"
        )));
    }

    if let Some(weights) = &config.weights {
        if weights.len() != config.variants.len() {
            return Err(SplitError::InvalidConfiguration(format!(
                "{} weights for {} variants",
                weights.len(),
                config.variants.len()
            )));
        }
        if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return Err(SplitError::InvalidConfiguration(
                "variant weights must be finite and non-negative".to_string(),
            ));
        }
        let total: f64 = weights.iter().sum();
        if (total - 1.0).abs() > WEIGHT_SUM_EPSILON {
            return Err(SplitError::InvalidConfiguration(format!(
                "variant weights must sum to 1.0, got {total}"
            )));
        }
    }

    if config.primary_goal.name.trim().is_empty() {
        return Err(SplitError::InvalidConfiguration(
            "primary goal must be named".to_string(),
        ));
    }

    let stats = &config.statistics;
    if !(0.0..1.0).contains(&stats.significance_level) || stats.significance_level <= 0.0 {
        return Err(SplitError::InvalidConfiguration(format!(
            "significance level must be in (0, 1), got {}",
            stats.significance_level
        )));
    }
    if !(0.0..1.0).contains(&stats.confidence_level) || stats.confidence_level <= 0.0 {
        return Err(SplitError::InvalidConfiguration(format!(
            "confidence level must be in (0, 1), got {}",
            stats.confidence_level
        )));
    }

    if config.test_type == TestType::MultiArmedBandit {
        let floor = engine.bandit.exploration_floor;
        if floor * config.variants.len() as f64 > 1.0 {
            return Err(SplitError::InvalidConfiguration(format!(
                "exploration floor {floor} infeasible for {} arms",
                config.variants.len()
            )));
        }
    }

    Ok(())
}

/// Build the entity from a validated request. Created in `Draft`; identity
/// and timestamps are stamped here.
pub fn build_test(config: TestConfig, engine: &EngineConfig) -> Test {
    let variants: Vec<Variant> = config
        .variants
        .into_iter()
        .map(|v| Variant {
            id: Uuid::new_v4(),
            name: v.name,
            is_control: v.is_control,
            changes: v.changes,
        })
        .collect();

    let traffic_allocation = match config.weights {
        Some(weights) => TrafficAllocation {
            weights,
            updated_at: Utc::now(),
        },
        None => TrafficAllocation::even(variants.len()),
    };

    Test {
        id: Uuid::new_v4(),
        name: config.name,
        description: config.description,
        test_type: config.test_type,
        status: TestStatus::Draft,
        variants,
        traffic_allocation,
        audience: config.audience,
        primary_goal: build_goal(config.primary_goal),
        secondary_goals: config.secondary_goals.into_iter().map(build_goal).collect(),
        planned_duration_days: config.planned_duration_days,
        min_sample_size: config
            .min_sample_size
            .unwrap_or(engine.default_min_sample_size),
        statistics: config.statistics,
        allow_repeat_exposures: config.allow_repeat_exposures,
        looks_spent: 0,
        owner: config.owner,
        tags: config.tags,
        created_at: Utc::now(),
        activated_at: None,
        concluded_at: None,
    }
}

fn build_goal(config: GoalConfig) -> Goal {
    Goal {
        id: Uuid::new_v4(),
        name: config.name,
        metric: config.metric,
        direction: config.direction,
        weight: config.weight,
        allow_repeat_conversions: config.allow_repeat_conversions,
    }
}
