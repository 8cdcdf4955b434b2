use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ─── Collaborator Inputs ────────────────────────────────────────────────

/// User profile supplied by the caller, used for audience targeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub attributes: HashMap<String, PropertyValue>,
}

/// Session context captured at assignment time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    pub landing_page: Option<String>,
}

/// Device context captured at assignment time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub os: Option<String>,
    pub browser: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    Ctv,
}

/// Closed scalar set for event properties and profile attributes.
/// Keeps aggregation well-typed where a raw JSON value would not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    String(String),
    Number(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl PropertyValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }
}

// ─── Audience Targeting ─────────────────────────────────────────────────

/// Targeting predicate tree attached to a test. A user must match for the
/// assignment engine to bucket them; non-matching users are simply skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudienceSegment {
    pub name: String,
    pub criteria: PredicateGroup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredicateGroup {
    pub operator: LogicalOperator,
    pub predicates: Vec<Predicate>,
    pub groups: Vec<PredicateGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Attribute {
        key: String,
        operator: ComparisonOperator,
        value: PropertyValue,
    },
    Device {
        device_type: DeviceType,
    },
    Os {
        operator: ComparisonOperator,
        value: String,
    },
    Browser {
        operator: ComparisonOperator,
        value: String,
    },
    Referrer {
        operator: ComparisonOperator,
        value: String,
    },
    LandingPage {
        operator: ComparisonOperator,
        value: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    IsSet,
    IsNotSet,
}

// ─── Tests & Variants ───────────────────────────────────────────────────

/// A controlled experiment definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Test {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub test_type: TestType,
    pub status: TestStatus,
    /// Ordered; traffic allocation weights are parallel to this order.
    pub variants: Vec<Variant>,
    pub traffic_allocation: TrafficAllocation,
    pub audience: Option<AudienceSegment>,
    pub primary_goal: Goal,
    pub secondary_goals: Vec<Goal>,
    pub planned_duration_days: Option<u32>,
    /// Minimum sample size per arm before a verdict may be declared.
    pub min_sample_size: u64,
    pub statistics: StatisticalConfiguration,
    /// Allow exposure events to count more than once per assignment
    /// (multi-session funnels). Default: once per assignment.
    pub allow_repeat_exposures: bool,
    /// Analysis looks spent so far (sequential tests only).
    pub looks_spent: u32,
    pub owner: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub concluded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    SimpleAb,
    Multivariate,
    MultiArmedBandit,
    Sequential,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Draft,
    Running,
    Concluded,
    Archived,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Draft => "draft",
            TestStatus::Running => "running",
            TestStatus::Concluded => "concluded",
            TestStatus::Archived => "archived",
        }
    }
}

/// One treatment arm. Definition only; hot counters live in the store so
/// the definition can freeze at start while counters keep mutating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: Uuid,
    pub name: String,
    pub is_control: bool,
    /// Parameter/content differences this arm represents.
    pub changes: HashMap<String, PropertyValue>,
}

/// Weight distribution across variants, parallel to `Test::variants` order.
/// Weights sum to 1.0 (validated at creation, renormalized by the bandit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficAllocation {
    pub weights: Vec<f64>,
    pub updated_at: DateTime<Utc>,
}

impl TrafficAllocation {
    pub fn even(arms: usize) -> Self {
        let w = 1.0 / arms.max(1) as f64;
        Self {
            weights: vec![w; arms],
            updated_at: Utc::now(),
        }
    }
}

// ─── Goals ──────────────────────────────────────────────────────────────

/// A success metric a test optimizes for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: Uuid,
    pub name: String,
    pub metric: GoalMetric,
    pub direction: GoalDirection,
    /// Reporting weight when multiple goals are shown together. The primary
    /// goal alone drives the verdict.
    pub weight: f64,
    /// Revenue-style goals may convert repeatedly per assignment.
    pub allow_repeat_conversions: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GoalMetric {
    /// Converted or not; rate analysis over exposures.
    Binary,
    /// Numeric outcome per user; mean analysis.
    Continuous,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GoalDirection {
    HigherIsBetter,
    LowerIsBetter,
}

// ─── Statistical Configuration ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticalConfiguration {
    pub method: AnalysisMethod,
    /// Significance threshold alpha (frequentist / sequential).
    pub significance_level: f64,
    pub power: f64,
    /// Credible/confidence interval coverage, e.g. 0.95.
    pub confidence_level: f64,
    /// Bootstrap resampling iterations; falls back to the engine default.
    pub bootstrap_iterations: Option<u32>,
    /// Alpha-spending boundaries for sequential tests.
    pub sequential: Option<SequentialBoundaries>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SequentialBoundaries {
    /// Planned maximum number of interim analysis looks.
    pub max_looks: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMethod {
    Frequentist,
    Bayesian,
    Bootstrap,
}

// ─── Assignments & Events ───────────────────────────────────────────────

/// Immutable (test, user) → variant record. Created exactly once; repeated
/// assignment requests return this record unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub test_id: Uuid,
    pub user_id: String,
    pub variant_id: Uuid,
    /// Audience definition in force when eligibility was decided.
    pub audience_snapshot: Option<AudienceSegment>,
    pub session: SessionInfo,
    pub device: DeviceInfo,
    pub assigned_at: DateTime<Utc>,
}

/// Append-only event referencing an assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedEvent {
    pub event_id: Uuid,
    pub test_id: Uuid,
    pub user_id: String,
    pub variant_id: Uuid,
    pub kind: EventKind,
    pub value: Option<f64>,
    pub properties: HashMap<String, PropertyValue>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Exposure,
    Conversion { goal_id: Uuid },
    Metric { name: String },
}

// ─── Counter Snapshots ──────────────────────────────────────────────────

/// Running aggregate of a stream of numeric observations.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunningAggregate {
    pub count: u64,
    pub sum: f64,
    pub sum_sq: f64,
}

impl RunningAggregate {
    pub fn fold(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Unbiased sample variance.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        ((self.sum_sq - self.sum * self.sum / n) / (n - 1.0)).max(0.0)
    }
}

/// Point-in-time copy of one variant's counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSnapshot {
    pub variant_id: Uuid,
    pub exposures: u64,
    pub goals: HashMap<Uuid, GoalSnapshot>,
    pub metrics: HashMap<String, RunningAggregate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoalSnapshot {
    pub conversions: u64,
    pub value: RunningAggregate,
}

/// Non-blocking read snapshot across all variants of a test, in variant
/// definition order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSnapshot {
    pub test_id: Uuid,
    pub variants: Vec<VariantSnapshot>,
    pub taken_at: DateTime<Utc>,
}

impl VariantSnapshot {
    pub fn goal(&self, goal_id: &Uuid) -> GoalSnapshot {
        self.goals.get(goal_id).cloned().unwrap_or_default()
    }

    pub fn conversion_rate(&self, goal_id: &Uuid) -> f64 {
        if self.exposures == 0 {
            return 0.0;
        }
        self.goal(goal_id).conversions as f64 / self.exposures as f64
    }
}

// ─── Analysis Results ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub test_id: Uuid,
    pub goal_id: Uuid,
    pub method: AnalysisMethod,
    pub verdict: Verdict,
    pub variants: Vec<VariantSummary>,
    /// One entry per non-control variant, compared against control.
    pub comparisons: Vec<VariantComparison>,
    pub total_exposures: u64,
    pub min_sample_size: u64,
    /// Interim looks spent so far, including this one (sequential tests).
    pub looks_spent: Option<u32>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Not enough data to say anything either way.
    Inconclusive,
    /// Enough data, no significant difference from control.
    NoDifference,
    SignificantWinner { variant_id: Uuid },
}

/// Per-variant descriptive statistics for the analyzed goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSummary {
    pub variant_id: Uuid,
    pub name: String,
    pub is_control: bool,
    pub exposures: u64,
    pub conversions: u64,
    pub conversion_rate: f64,
    pub mean_value: f64,
    pub variance: f64,
    pub lift_vs_control: Option<f64>,
}

/// One variant-vs-control inferential comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantComparison {
    pub variant_id: Uuid,
    /// Direction-adjusted effect size (positive means better than control).
    pub effect: f64,
    pub significant: bool,
    pub outcome: MethodOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodOutcome {
    Frequentist {
        statistic: f64,
        p_value: f64,
        ci_lower: f64,
        ci_upper: f64,
    },
    Bayesian {
        prob_beats_control: f64,
        credible_lower: f64,
        credible_upper: f64,
    },
    Bootstrap {
        interval_lower: f64,
        interval_upper: f64,
        iterations: u32,
    },
}

impl Default for StatisticalConfiguration {
    fn default() -> Self {
        Self {
            method: AnalysisMethod::Frequentist,
            significance_level: 0.05,
            power: 0.8,
            confidence_level: 0.95,
            bootstrap_iterations: None,
            sequential: None,
        }
    }
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self {
            session_id: String::new(),
            started_at: Utc::now(),
            referrer: None,
            user_agent: None,
            landing_page: None,
        }
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            device_type: DeviceType::Desktop,
            os: None,
            browser: None,
            timezone: None,
        }
    }
}
