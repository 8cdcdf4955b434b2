//! Assembles per-variant summaries and variant-vs-control comparisons into
//! an `AnalysisResult` with a verdict.
//!
//! An under-sampled comparison is reported Inconclusive, never a false
//! NoDifference. Sequential tests always run the frequentist path with the
//! look-adjusted alpha; the configured method applies to the other test
//! types.

use chrono::Utc;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use split_core::config::EngineConfig;
use split_core::types::{
    AnalysisMethod, AnalysisResult, EventKind, Goal, GoalDirection, GoalMetric, MethodOutcome,
    Test, TestSnapshot, TestType, TrackedEvent, VariantComparison, VariantSnapshot,
    VariantSummary, Verdict,
};
use split_core::{SplitError, SplitResult};

use crate::bayesian;
use crate::bootstrap::{self, CancelToken};
use crate::frequentist;
use crate::sequential;

pub struct Analyzer {
    config: EngineConfig,
}

impl Analyzer {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Read-only analysis over a counter snapshot. `user_outcomes` feeds
    /// bootstrap resampling and may be empty for the other methods;
    /// `test.looks_spent` must already include the current look for
    /// sequential tests.
    pub fn analyze(
        &self,
        test: &Test,
        snapshot: &TestSnapshot,
        user_outcomes: &HashMap<Uuid, Vec<f64>>,
        cancel: Option<&CancelToken>,
    ) -> SplitResult<AnalysisResult> {
        let control = test
            .variants
            .iter()
            .find(|v| v.is_control)
            .ok_or_else(|| {
                SplitError::InvalidConfiguration("test has no control variant".to_string())
            })?;
        let control_snap = snapshot
            .variants
            .iter()
            .find(|s| s.variant_id == control.id)
            .ok_or_else(|| SplitError::NotFound(format!("counters for variant {}", control.id)))?;

        let goal = &test.primary_goal;
        let method = if test.test_type == TestType::Sequential {
            AnalysisMethod::Frequentist
        } else {
            test.statistics.method
        };

        let summaries = self.summarize(test, snapshot, goal, control_snap);

        let default_token = CancelToken::new();
        let cancel = cancel.unwrap_or(&default_token);

        let mut comparisons = Vec::new();
        for (variant, snap) in test.variants.iter().zip(&snapshot.variants) {
            if variant.is_control {
                continue;
            }
            let comparison = self.compare(
                test,
                goal,
                method,
                control.id,
                control_snap,
                snap,
                user_outcomes,
                cancel,
            )?;
            comparisons.push(comparison);
        }

        let verdict = self.verdict(test, control.id, control_snap, snapshot, &comparisons);
        debug!(test_id = %test.id, ?verdict, method = ?method, "Analysis complete");

        Ok(AnalysisResult {
            test_id: test.id,
            goal_id: goal.id,
            method,
            verdict,
            variants: summaries,
            comparisons,
            total_exposures: snapshot.variants.iter().map(|v| v.exposures).sum(),
            min_sample_size: test.min_sample_size,
            looks_spent: (test.test_type == TestType::Sequential).then_some(test.looks_spent),
            computed_at: Utc::now(),
        })
    }

    fn summarize(
        &self,
        test: &Test,
        snapshot: &TestSnapshot,
        goal: &Goal,
        control_snap: &VariantSnapshot,
    ) -> Vec<VariantSummary> {
        let control_metric = arm_metric(goal, control_snap);

        test.variants
            .iter()
            .zip(&snapshot.variants)
            .map(|(variant, snap)| {
                let goal_snap = snap.goal(&goal.id);
                let rate = snap.conversion_rate(&goal.id);
                let (mean_value, variance) = match goal.metric {
                    GoalMetric::Binary => (rate, rate * (1.0 - rate)),
                    GoalMetric::Continuous => (goal_snap.value.mean(), goal_snap.value.variance()),
                };
                let lift = if variant.is_control || control_metric.abs() < f64::EPSILON {
                    None
                } else {
                    Some((arm_metric(goal, snap) - control_metric) / control_metric)
                };
                VariantSummary {
                    variant_id: variant.id,
                    name: variant.name.clone(),
                    is_control: variant.is_control,
                    exposures: snap.exposures,
                    conversions: goal_snap.conversions,
                    conversion_rate: rate,
                    mean_value,
                    variance,
                    lift_vs_control: lift,
                }
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn compare(
        &self,
        test: &Test,
        goal: &Goal,
        method: AnalysisMethod,
        control_id: Uuid,
        control: &VariantSnapshot,
        variant: &VariantSnapshot,
        user_outcomes: &HashMap<Uuid, Vec<f64>>,
        cancel: &CancelToken,
    ) -> SplitResult<VariantComparison> {
        let sampled =
            control.exposures >= test.min_sample_size && variant.exposures >= test.min_sample_size;
        let confidence = test.statistics.confidence_level;

        let alpha = if test.test_type == TestType::Sequential {
            let max_looks = test
                .statistics
                .sequential
                .map(|s| s.max_looks)
                .unwrap_or(self.config.sequential.default_max_looks);
            sequential::adjusted_alpha(
                test.statistics.significance_level,
                test.looks_spent,
                max_looks,
            )
        } else {
            test.statistics.significance_level
        };

        let (difference, significant, outcome) = match method {
            AnalysisMethod::Frequentist => {
                let result = match goal.metric {
                    GoalMetric::Binary => frequentist::two_proportion_z(
                        control.goal(&goal.id).conversions,
                        control.exposures,
                        variant.goal(&goal.id).conversions,
                        variant.exposures,
                        confidence,
                    ),
                    GoalMetric::Continuous => {
                        let c = control.goal(&goal.id).value;
                        let v = variant.goal(&goal.id).value;
                        frequentist::welch_t(
                            c.mean(),
                            c.variance(),
                            c.count,
                            v.mean(),
                            v.variance(),
                            v.count,
                            confidence,
                        )
                    }
                };
                match result {
                    Ok(out) => (
                        out.difference,
                        out.p_value < alpha,
                        MethodOutcome::Frequentist {
                            statistic: out.statistic,
                            p_value: out.p_value,
                            ci_lower: out.ci_lower,
                            ci_upper: out.ci_upper,
                        },
                    ),
                    Err(SplitError::InsufficientData(_)) => (0.0, false, neutral(method)),
                    Err(e) => return Err(e),
                }
            }
            AnalysisMethod::Bayesian => {
                let result = match goal.metric {
                    GoalMetric::Binary => bayesian::beta_binomial(
                        control.goal(&goal.id).conversions,
                        control.exposures,
                        variant.goal(&goal.id).conversions,
                        variant.exposures,
                        confidence,
                        self.config.bayesian.posterior_draws,
                        &mut rand::thread_rng(),
                    ),
                    GoalMetric::Continuous => {
                        let c = control.goal(&goal.id).value;
                        let v = variant.goal(&goal.id).value;
                        bayesian::normal_normal(
                            c.mean(),
                            c.variance(),
                            c.count,
                            v.mean(),
                            v.variance(),
                            v.count,
                            confidence,
                        )
                    }
                };
                match result {
                    Ok(out) => (
                        out.difference,
                        out.prob_beats_control > confidence
                            || out.prob_beats_control < 1.0 - confidence,
                        MethodOutcome::Bayesian {
                            prob_beats_control: out.prob_beats_control,
                            credible_lower: out.credible_lower,
                            credible_upper: out.credible_upper,
                        },
                    ),
                    Err(SplitError::InsufficientData(_)) => (0.0, false, neutral(method)),
                    Err(e) => return Err(e),
                }
            }
            AnalysisMethod::Bootstrap => {
                let empty = Vec::new();
                let c = user_outcomes.get(&control_id).unwrap_or(&empty);
                let v = user_outcomes.get(&variant.variant_id).unwrap_or(&empty);
                let iterations = test
                    .statistics
                    .bootstrap_iterations
                    .unwrap_or(self.config.bootstrap.iterations);
                match bootstrap::bootstrap_difference(
                    c,
                    v,
                    iterations,
                    confidence,
                    cancel,
                    self.config.bootstrap.cancel_check_interval,
                    &mut rand::thread_rng(),
                ) {
                    Ok(out) => (
                        out.difference,
                        out.interval_lower > 0.0 || out.interval_upper < 0.0,
                        MethodOutcome::Bootstrap {
                            interval_lower: out.interval_lower,
                            interval_upper: out.interval_upper,
                            iterations: out.iterations,
                        },
                    ),
                    Err(SplitError::InsufficientData(_)) => (0.0, false, neutral(method)),
                    Err(e) => return Err(e),
                }
            }
        };

        let effect = match goal.direction {
            GoalDirection::HigherIsBetter => difference,
            GoalDirection::LowerIsBetter => -difference,
        };

        Ok(VariantComparison {
            variant_id: variant.variant_id,
            effect,
            // A comparison never declares significance before both arms
            // reach the minimum sample size.
            significant: significant && sampled,
            outcome,
        })
    }

    fn verdict(
        &self,
        test: &Test,
        control_id: Uuid,
        control: &VariantSnapshot,
        snapshot: &TestSnapshot,
        comparisons: &[VariantComparison],
    ) -> Verdict {
        // Largest direction-adjusted effect wins among significant beats.
        let best_winner = comparisons
            .iter()
            .filter(|c| c.significant && c.effect > 0.0)
            .max_by(|a, b| a.effect.partial_cmp(&b.effect).expect("effects are finite"));
        if let Some(winner) = best_winner {
            return Verdict::SignificantWinner {
                variant_id: winner.variant_id,
            };
        }

        // Every significant difference points the wrong way: control wins.
        if comparisons.iter().any(|c| c.significant)
            && control.exposures >= test.min_sample_size
        {
            return Verdict::SignificantWinner {
                variant_id: control_id,
            };
        }

        let fully_sampled = snapshot
            .variants
            .iter()
            .all(|v| v.exposures >= test.min_sample_size);
        if fully_sampled {
            Verdict::NoDifference
        } else {
            Verdict::Inconclusive
        }
    }
}

fn arm_metric(goal: &Goal, snap: &VariantSnapshot) -> f64 {
    match goal.metric {
        GoalMetric::Binary => snap.conversion_rate(&goal.id),
        GoalMetric::Continuous => snap.goal(&goal.id).value.mean(),
    }
}

fn neutral(method: AnalysisMethod) -> MethodOutcome {
    match method {
        AnalysisMethod::Frequentist => MethodOutcome::Frequentist {
            statistic: 0.0,
            p_value: 1.0,
            ci_lower: 0.0,
            ci_upper: 0.0,
        },
        AnalysisMethod::Bayesian => MethodOutcome::Bayesian {
            prob_beats_control: 0.5,
            credible_lower: 0.0,
            credible_upper: 0.0,
        },
        AnalysisMethod::Bootstrap => MethodOutcome::Bootstrap {
            interval_lower: 0.0,
            interval_upper: 0.0,
            iterations: 0,
        },
    }
}

/// Derive per-user outcomes for the analyzed goal from the event log:
/// exposed users contribute one outcome each, 0/1 for binary goals and the
/// summed conversion value for continuous goals.
pub fn user_outcomes_from_events(
    events: &[TrackedEvent],
    goal: &Goal,
) -> HashMap<Uuid, Vec<f64>> {
    let mut exposed: HashMap<&str, Uuid> = HashMap::new();
    let mut values: HashMap<&str, f64> = HashMap::new();

    for event in events {
        match &event.kind {
            EventKind::Exposure => {
                exposed.entry(&event.user_id).or_insert(event.variant_id);
            }
            EventKind::Conversion { goal_id } if *goal_id == goal.id => {
                let value = match goal.metric {
                    GoalMetric::Binary => 1.0,
                    GoalMetric::Continuous => event.value.unwrap_or(1.0),
                };
                match goal.metric {
                    GoalMetric::Binary => {
                        values.insert(&event.user_id, value);
                    }
                    GoalMetric::Continuous => {
                        *values.entry(&event.user_id).or_insert(0.0) += value;
                    }
                }
            }
            _ => {}
        }
    }

    let mut outcomes: HashMap<Uuid, Vec<f64>> = HashMap::new();
    for (user, variant_id) in exposed {
        let outcome = values.get(user).copied().unwrap_or(0.0);
        outcomes.entry(variant_id).or_default().push(outcome);
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use split_core::types::{
        GoalSnapshot, RunningAggregate, StatisticalConfiguration, TestStatus, TrafficAllocation,
        Variant,
    };

    fn binary_goal() -> Goal {
        Goal {
            id: Uuid::new_v4(),
            name: "signup".to_string(),
            metric: GoalMetric::Binary,
            direction: GoalDirection::HigherIsBetter,
            weight: 1.0,
            allow_repeat_conversions: false,
        }
    }

    fn fixture(
        method: AnalysisMethod,
        min_sample_size: u64,
        arms: &[(u64, u64)],
    ) -> (Test, TestSnapshot) {
        let goal = binary_goal();
        let variants: Vec<Variant> = arms
            .iter()
            .enumerate()
            .map(|(i, _)| Variant {
                id: Uuid::new_v4(),
                name: if i == 0 {
                    "control".to_string()
                } else {
                    format!("treatment-{i}")
                },
                is_control: i == 0,
                changes: HashMap::new(),
            })
            .collect();

        let snapshot = TestSnapshot {
            test_id: Uuid::new_v4(),
            variants: variants
                .iter()
                .zip(arms)
                .map(|(v, (exposures, conversions))| {
                    let mut value = RunningAggregate::default();
                    for _ in 0..*conversions {
                        value.fold(1.0);
                    }
                    let mut goals = HashMap::new();
                    goals.insert(
                        goal.id,
                        GoalSnapshot {
                            conversions: *conversions,
                            value,
                        },
                    );
                    VariantSnapshot {
                        variant_id: v.id,
                        exposures: *exposures,
                        goals,
                        metrics: HashMap::new(),
                    }
                })
                .collect(),
            taken_at: Utc::now(),
        };

        let test = Test {
            id: snapshot.test_id,
            name: "pricing-page".to_string(),
            description: String::new(),
            test_type: TestType::SimpleAb,
            status: TestStatus::Running,
            traffic_allocation: TrafficAllocation::even(variants.len()),
            variants,
            audience: None,
            primary_goal: goal,
            secondary_goals: vec![],
            planned_duration_days: None,
            min_sample_size,
            statistics: StatisticalConfiguration {
                method,
                ..StatisticalConfiguration::default()
            },
            allow_repeat_exposures: false,
            looks_spent: 0,
            owner: "growth".to_string(),
            tags: vec![],
            created_at: Utc::now(),
            activated_at: Some(Utc::now()),
            concluded_at: None,
        };
        (test, snapshot)
    }

    #[test]
    fn test_clear_winner_is_significant() {
        let (test, snapshot) =
            fixture(AnalysisMethod::Frequentist, 500, &[(1000, 100), (1000, 150)]);
        let analyzer = Analyzer::new(EngineConfig::default());
        let result = analyzer
            .analyze(&test, &snapshot, &HashMap::new(), None)
            .unwrap();

        assert_eq!(
            result.verdict,
            Verdict::SignificantWinner {
                variant_id: test.variants[1].id
            }
        );
        match &result.comparisons[0].outcome {
            MethodOutcome::Frequentist { p_value, .. } => assert!(*p_value < 0.05),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_small_noisy_difference_is_inconclusive() {
        let (test, snapshot) =
            fixture(AnalysisMethod::Frequentist, 1000, &[(100, 10), (100, 12)]);
        let analyzer = Analyzer::new(EngineConfig::default());
        let result = analyzer
            .analyze(&test, &snapshot, &HashMap::new(), None)
            .unwrap();

        assert_eq!(result.verdict, Verdict::Inconclusive);
    }

    #[test]
    fn test_sampled_equal_arms_report_no_difference() {
        let (test, snapshot) =
            fixture(AnalysisMethod::Frequentist, 500, &[(1000, 100), (1000, 101)]);
        let analyzer = Analyzer::new(EngineConfig::default());
        let result = analyzer
            .analyze(&test, &snapshot, &HashMap::new(), None)
            .unwrap();

        assert_eq!(result.verdict, Verdict::NoDifference);
    }

    #[test]
    fn test_undersampled_never_declares_winner() {
        // The rate difference is huge but the arms are tiny.
        let (test, snapshot) = fixture(AnalysisMethod::Frequentist, 10_000, &[(50, 5), (50, 25)]);
        let analyzer = Analyzer::new(EngineConfig::default());
        let result = analyzer
            .analyze(&test, &snapshot, &HashMap::new(), None)
            .unwrap();

        assert_eq!(result.verdict, Verdict::Inconclusive);
    }

    #[test]
    fn test_largest_effect_wins_tiebreak() {
        let (test, snapshot) = fixture(
            AnalysisMethod::Frequentist,
            500,
            &[(2000, 200), (2000, 260), (2000, 320)],
        );
        let analyzer = Analyzer::new(EngineConfig::default());
        let result = analyzer
            .analyze(&test, &snapshot, &HashMap::new(), None)
            .unwrap();

        assert_eq!(
            result.verdict,
            Verdict::SignificantWinner {
                variant_id: test.variants[2].id
            }
        );
    }

    #[test]
    fn test_significantly_worse_variant_crowns_control() {
        let (test, snapshot) =
            fixture(AnalysisMethod::Frequentist, 500, &[(2000, 300), (2000, 180)]);
        let analyzer = Analyzer::new(EngineConfig::default());
        let result = analyzer
            .analyze(&test, &snapshot, &HashMap::new(), None)
            .unwrap();

        assert_eq!(
            result.verdict,
            Verdict::SignificantWinner {
                variant_id: test.variants[0].id
            }
        );
    }

    #[test]
    fn test_bayesian_winner() {
        let (test, snapshot) =
            fixture(AnalysisMethod::Bayesian, 500, &[(1000, 100), (1000, 160)]);
        let analyzer = Analyzer::new(EngineConfig::default());
        let result = analyzer
            .analyze(&test, &snapshot, &HashMap::new(), None)
            .unwrap();

        assert_eq!(
            result.verdict,
            Verdict::SignificantWinner {
                variant_id: test.variants[1].id
            }
        );
        match &result.comparisons[0].outcome {
            MethodOutcome::Bayesian {
                prob_beats_control, ..
            } => assert!(*prob_beats_control > 0.95),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_sequential_first_look_blocks_modest_signal() {
        let (mut test, snapshot) =
            fixture(AnalysisMethod::Frequentist, 500, &[(1000, 100), (1000, 140)]);
        test.test_type = TestType::Sequential;
        test.statistics.sequential = Some(split_core::types::SequentialBoundaries { max_looks: 10 });
        test.looks_spent = 1;

        let analyzer = Analyzer::new(EngineConfig::default());
        let result = analyzer
            .analyze(&test, &snapshot, &HashMap::new(), None)
            .unwrap();

        // p ~ 0.006 clears a fixed 0.05 threshold but not the first
        // O'Brien-Fleming look.
        assert_ne!(
            result.verdict,
            Verdict::SignificantWinner {
                variant_id: test.variants[1].id
            }
        );
        assert_eq!(result.looks_spent, Some(1));
    }

    #[test]
    fn test_sequential_final_look_releases_signal() {
        let (mut test, snapshot) =
            fixture(AnalysisMethod::Frequentist, 500, &[(1000, 100), (1000, 140)]);
        test.test_type = TestType::Sequential;
        test.statistics.sequential = Some(split_core::types::SequentialBoundaries { max_looks: 10 });
        test.looks_spent = 10;

        let analyzer = Analyzer::new(EngineConfig::default());
        let result = analyzer
            .analyze(&test, &snapshot, &HashMap::new(), None)
            .unwrap();

        assert_eq!(
            result.verdict,
            Verdict::SignificantWinner {
                variant_id: test.variants[1].id
            }
        );
    }

    #[test]
    fn test_user_outcomes_group_by_variant() {
        let goal = binary_goal();
        let variant_a = Uuid::new_v4();
        let variant_b = Uuid::new_v4();
        let test_id = Uuid::new_v4();

        let exposure = |user: &str, variant| TrackedEvent {
            event_id: Uuid::new_v4(),
            test_id,
            user_id: user.to_string(),
            variant_id: variant,
            kind: EventKind::Exposure,
            value: None,
            properties: HashMap::new(),
            timestamp: Utc::now(),
        };
        let conversion = |user: &str, variant| TrackedEvent {
            event_id: Uuid::new_v4(),
            test_id,
            user_id: user.to_string(),
            variant_id: variant,
            kind: EventKind::Conversion { goal_id: goal.id },
            value: Some(1.0),
            properties: HashMap::new(),
            timestamp: Utc::now(),
        };

        let events = vec![
            exposure("u1", variant_a),
            exposure("u2", variant_a),
            conversion("u2", variant_a),
            exposure("u3", variant_b),
        ];

        let outcomes = user_outcomes_from_events(&events, &goal);
        let mut a = outcomes.get(&variant_a).cloned().unwrap();
        a.sort_by(|x, y| x.partial_cmp(y).unwrap());
        assert_eq!(a, vec![0.0, 1.0]);
        assert_eq!(outcomes.get(&variant_b).unwrap(), &vec![0.0]);
    }

    #[test]
    fn test_bootstrap_method_end_to_end() {
        let (test, snapshot) =
            fixture(AnalysisMethod::Bootstrap, 100, &[(200, 20), (200, 80)]);
        let mut outcomes = HashMap::new();
        outcomes.insert(
            test.variants[0].id,
            (0..200).map(|i| if i < 20 { 1.0 } else { 0.0 }).collect(),
        );
        outcomes.insert(
            test.variants[1].id,
            (0..200).map(|i| if i < 80 { 1.0 } else { 0.0 }).collect(),
        );

        let analyzer = Analyzer::new(EngineConfig::default());
        let result = analyzer.analyze(&test, &snapshot, &outcomes, None).unwrap();

        assert_eq!(
            result.verdict,
            Verdict::SignificantWinner {
                variant_id: test.variants[1].id
            }
        );
    }

    #[test]
    fn test_cancelled_bootstrap_propagates() {
        let (test, snapshot) = fixture(AnalysisMethod::Bootstrap, 100, &[(200, 20), (200, 80)]);
        let mut outcomes = HashMap::new();
        outcomes.insert(test.variants[0].id, vec![0.0; 200]);
        outcomes.insert(test.variants[1].id, vec![1.0; 200]);

        let token = CancelToken::new();
        token.cancel();

        let analyzer = Analyzer::new(EngineConfig::default());
        let err = analyzer
            .analyze(&test, &snapshot, &outcomes, Some(&token))
            .unwrap_err();
        assert!(matches!(err, SplitError::Cancelled));
    }
}
