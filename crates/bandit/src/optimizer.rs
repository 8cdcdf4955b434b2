//! Adaptive traffic reallocation. Exploitation weight follows posterior-mean
//! reward; a floor epsilon keeps every arm collecting data so a losing arm
//! is never starved entirely.

use chrono::Utc;
use rand::Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};
use tracing::info;

use split_core::types::{Goal, TestSnapshot, TrafficAllocation};
use split_core::{SplitError, SplitResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BanditPolicy {
    #[default]
    ThompsonSampling,
    EpsilonGreedy,
}

pub struct BanditOptimizer {
    policy: BanditPolicy,
    exploration_floor: f64,
    thompson_draws: u32,
}

impl BanditOptimizer {
    pub fn new(policy: BanditPolicy, exploration_floor: f64, thompson_draws: u32) -> Self {
        Self {
            policy,
            exploration_floor,
            thompson_draws,
        }
    }

    /// Recompute allocation weights from the snapshot's reward statistics
    /// for the given goal. Pure over its inputs; the caller persists the
    /// returned allocation.
    pub fn update_weights(
        &self,
        snapshot: &TestSnapshot,
        goal: &Goal,
        rng: &mut impl Rng,
    ) -> SplitResult<TrafficAllocation> {
        let arms = snapshot.variants.len();
        if arms < 2 {
            return Err(SplitError::InvalidConfiguration(
                "bandit reallocation requires at least two arms".to_string(),
            ));
        }
        let floor = self.exploration_floor;
        if floor * arms as f64 > 1.0 {
            return Err(SplitError::InvalidConfiguration(format!(
                "exploration floor {floor} infeasible for {arms} arms"
            )));
        }

        let exploit_share = 1.0 - floor * arms as f64;
        let exploit = match self.policy {
            BanditPolicy::EpsilonGreedy => self.posterior_mean_shares(snapshot, goal),
            BanditPolicy::ThompsonSampling => self.best_arm_probabilities(snapshot, goal, rng)?,
        };

        let mut weights: Vec<f64> = exploit
            .iter()
            .map(|share| floor + exploit_share * share)
            .collect();

        let total: f64 = weights.iter().sum();
        for w in &mut weights {
            *w /= total;
        }

        info!(
            test_id = %snapshot.test_id,
            policy = ?self.policy,
            weights = ?weights,
            "Bandit weights updated"
        );

        Ok(TrafficAllocation {
            weights,
            updated_at: Utc::now(),
        })
    }

    /// Exploitation shares proportional to each arm's posterior-mean reward.
    fn posterior_mean_shares(&self, snapshot: &TestSnapshot, goal: &Goal) -> Vec<f64> {
        let means: Vec<f64> = snapshot
            .variants
            .iter()
            .map(|v| {
                let conversions = v.goal(&goal.id).conversions;
                (1.0 + conversions as f64) / (2.0 + v.exposures as f64)
            })
            .collect();

        let total: f64 = means.iter().sum();
        if total <= 0.0 {
            return vec![1.0 / means.len() as f64; means.len()];
        }
        means.iter().map(|m| m / total).collect()
    }

    /// Probability each arm is best, estimated from repeated paired draws of
    /// the Beta(1 + conversions, 1 + exposures - conversions) posteriors.
    fn best_arm_probabilities(
        &self,
        snapshot: &TestSnapshot,
        goal: &Goal,
        rng: &mut impl Rng,
    ) -> SplitResult<Vec<f64>> {
        let posteriors: Vec<Beta<f64>> = snapshot
            .variants
            .iter()
            .map(|v| {
                let conversions = v.goal(&goal.id).conversions.min(v.exposures);
                let alpha = 1.0 + conversions as f64;
                let beta = 1.0 + (v.exposures - conversions) as f64;
                Beta::new(alpha, beta).map_err(|e| {
                    SplitError::InsufficientData(format!("degenerate Beta posterior: {e}"))
                })
            })
            .collect::<SplitResult<_>>()?;

        let mut wins = vec![0u32; posteriors.len()];
        for _ in 0..self.thompson_draws {
            let mut best_idx = 0;
            let mut best_sample = f64::NEG_INFINITY;
            for (idx, posterior) in posteriors.iter().enumerate() {
                let sample = posterior.sample(rng);
                if sample > best_sample {
                    best_sample = sample;
                    best_idx = idx;
                }
            }
            wins[best_idx] += 1;
        }

        Ok(wins
            .iter()
            .map(|w| *w as f64 / self.thompson_draws as f64)
            .collect())
    }
}
