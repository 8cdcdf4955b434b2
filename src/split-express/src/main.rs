//! Split Express: controlled experimentation engine.
//!
//! Demo entry point: drives synthetic traffic through an in-memory engine
//! and prints the analysis, exercising the full assignment → tracking →
//! analysis pipeline.

use clap::Parser;
use std::collections::HashMap;
use tracing::{info, warn};

use split_core::config::EngineConfig;
use split_core::types::{
    AnalysisMethod, DeviceInfo, GoalDirection, GoalMetric, SessionInfo, StatisticalConfiguration,
    TestType, UserProfile,
};
use split_engine::{ExperimentEngine, GoalConfig, TestConfig, VariantConfig};

#[derive(Parser, Debug)]
#[command(name = "split-express")]
#[command(about = "Controlled experimentation engine - simulation driver")]
#[command(version)]
struct Cli {
    /// Synthetic users to run through the test
    #[arg(long, default_value_t = 20_000, env = "SPLIT_EXPRESS__SIM__USERS")]
    users: u64,

    /// True conversion rate of the control arm, percent
    #[arg(long, default_value_t = 10, env = "SPLIT_EXPRESS__SIM__CONTROL_RATE")]
    control_rate: u64,

    /// True conversion rate of the treatment arm, percent
    #[arg(long, default_value_t = 12, env = "SPLIT_EXPRESS__SIM__TREATMENT_RATE")]
    treatment_rate: u64,

    /// Inference method: frequentist, bayesian, or bootstrap
    #[arg(long, default_value = "frequentist")]
    method: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "split_express=info,split_engine=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let engine_config = EngineConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        EngineConfig::default()
    });

    let method = match cli.method.as_str() {
        "frequentist" => AnalysisMethod::Frequentist,
        "bayesian" => AnalysisMethod::Bayesian,
        "bootstrap" => AnalysisMethod::Bootstrap,
        other => anyhow::bail!("unknown method {other}"),
    };

    info!(
        users = cli.users,
        control_rate = cli.control_rate,
        treatment_rate = cli.treatment_rate,
        method = %cli.method,
        "Split Express simulation starting"
    );

    let engine = ExperimentEngine::in_memory(engine_config);

    let test = engine.create_test(TestConfig {
        name: "simulated-ab".to_string(),
        description: "synthetic traffic demo".to_string(),
        test_type: TestType::SimpleAb,
        variants: vec![
            VariantConfig {
                name: "control".to_string(),
                is_control: true,
                changes: HashMap::new(),
            },
            VariantConfig {
                name: "treatment".to_string(),
                is_control: false,
                changes: HashMap::new(),
            },
        ],
        weights: None,
        audience: None,
        primary_goal: GoalConfig {
            name: "conversion".to_string(),
            metric: GoalMetric::Binary,
            direction: GoalDirection::HigherIsBetter,
            weight: 1.0,
            allow_repeat_conversions: false,
        },
        secondary_goals: vec![],
        planned_duration_days: None,
        min_sample_size: Some(cli.users / 20),
        statistics: StatisticalConfiguration {
            method,
            ..StatisticalConfiguration::default()
        },
        allow_repeat_exposures: false,
        owner: "simulator".to_string(),
        tags: vec!["demo".to_string()],
    })?;
    engine.start_test(&test.id)?;

    let control_id = test.variants.iter().find(|v| v.is_control).unwrap().id;
    let goal_id = test.primary_goal.id;
    let mut seen_per_variant: HashMap<uuid::Uuid, u64> = HashMap::new();

    for i in 0..cli.users {
        let user = format!("user-{i}");
        let profile = UserProfile {
            user_id: user.clone(),
            attributes: HashMap::new(),
        };
        let Some(variant) = engine.assign_user_to_variant(
            &test.id,
            &user,
            &profile,
            &SessionInfo::default(),
            &DeviceInfo::default(),
        ) else {
            continue;
        };
        engine.track_exposure(&test.id, &user, HashMap::new())?;

        let seen = seen_per_variant.entry(variant).or_insert(0);
        *seen += 1;
        let rate = if variant == control_id {
            cli.control_rate
        } else {
            cli.treatment_rate
        };
        if *seen % 100 < rate {
            engine.track_conversion(&test.id, &user, &goal_id, None, HashMap::new())?;
        }
    }

    let result = engine.analyze_test(&test.id, None)?;
    info!(
        verdict = ?result.verdict,
        total_exposures = result.total_exposures,
        "Simulation analysis complete"
    );
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
