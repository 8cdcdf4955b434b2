use serde::Deserialize;

/// Engine configuration. Loaded from environment variables with the prefix
/// `SPLIT_EXPRESS__` (double-underscore separated).
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_min_sample_size")]
    pub default_min_sample_size: u64,
    #[serde(default = "default_significance_level")]
    pub default_significance_level: f64,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub bandit: BanditConfig,
    #[serde(default)]
    pub sequential: SequentialConfig,
    #[serde(default)]
    pub bayesian: BayesianConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default = "default_bootstrap_iterations")]
    pub iterations: u32,
    /// How many iterations run between cancellation checks.
    #[serde(default = "default_cancel_check_interval")]
    pub cancel_check_interval: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BanditConfig {
    /// Minimum allocation weight every arm keeps, regardless of performance.
    #[serde(default = "default_exploration_floor")]
    pub exploration_floor: f64,
    /// Posterior draws used to estimate probability-of-being-best.
    #[serde(default = "default_thompson_draws")]
    pub thompson_draws: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SequentialConfig {
    #[serde(default = "default_max_looks")]
    pub default_max_looks: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BayesianConfig {
    /// Monte Carlo draws for probability-to-beat-control estimation.
    #[serde(default = "default_posterior_draws")]
    pub posterior_draws: u32,
}

fn default_min_sample_size() -> u64 { 1000 }
fn default_significance_level() -> f64 { 0.05 }
fn default_bootstrap_iterations() -> u32 { 2000 }
fn default_cancel_check_interval() -> u32 { 64 }
fn default_exploration_floor() -> f64 { 0.05 }
fn default_thompson_draws() -> u32 { 2000 }
fn default_max_looks() -> u32 { 10 }
fn default_posterior_draws() -> u32 { 10_000 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_min_sample_size: default_min_sample_size(),
            default_significance_level: default_significance_level(),
            bootstrap: BootstrapConfig::default(),
            bandit: BanditConfig::default(),
            sequential: SequentialConfig::default(),
            bayesian: BayesianConfig::default(),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            iterations: default_bootstrap_iterations(),
            cancel_check_interval: default_cancel_check_interval(),
        }
    }
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            exploration_floor: default_exploration_floor(),
            thompson_draws: default_thompson_draws(),
        }
    }
}

impl Default for SequentialConfig {
    fn default() -> Self {
        Self {
            default_max_looks: default_max_looks(),
        }
    }
}

impl Default for BayesianConfig {
    fn default() -> Self {
        Self {
            posterior_draws: default_posterior_draws(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("SPLIT_EXPRESS")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert!(cfg.default_significance_level > 0.0 && cfg.default_significance_level < 1.0);
        assert!(cfg.bandit.exploration_floor > 0.0 && cfg.bandit.exploration_floor < 0.5);
        assert!(cfg.bootstrap.iterations >= 100);
    }
}
