use thiserror::Error;
use uuid::Uuid;

pub type SplitResult<T> = Result<T, SplitError>;

#[derive(Error, Debug)]
pub enum SplitError {
    #[error("Invalid test configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid lifecycle transition: test {test_id} is {status}, expected {expected}")]
    InvalidTransition {
        test_id: Uuid,
        status: String,
        expected: String,
    },

    #[error("No assignment for user {user_id} in test {test_id}")]
    NoAssignment { test_id: Uuid, user_id: String },

    #[error("Unknown goal {goal_id} for test {test_id}")]
    UnknownGoal { test_id: Uuid, goal_id: Uuid },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Analysis cancelled by caller")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
