use crate::fragment::FragmentId;
use igloo_common::QueryId;
use igloo_plan::{OperatorId, PlanError};
use thiserror::Error;

/// Failures that abort planning of a query. Nothing is dispatched once one
/// of these is returned.
#[derive(Error, Debug)]
pub enum PlanningError {
    #[error("Fragment setup failed at operator {operator}: {reason}")]
    MalformedPlan { operator: OperatorId, reason: String },

    #[error("Failed to read physical plan: {0}")]
    PlanRead(#[from] PlanError),

    #[error("Insufficient cluster for fragment {fragment}: {reason}")]
    InsufficientCluster { fragment: FragmentId, reason: String },

    #[error("Query {0} was cancelled during planning")]
    Cancelled(QueryId),

    #[error("Failed to load planner configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Failed to encode work unit: {0}")]
    Encode(#[from] bincode::Error),
}

impl PlanningError {
    pub fn malformed(operator: OperatorId, reason: impl Into<String>) -> Self {
        PlanningError::MalformedPlan {
            operator,
            reason: reason.into(),
        }
    }

    pub fn insufficient(fragment: FragmentId, reason: impl Into<String>) -> Self {
        PlanningError::InsufficientCluster {
            fragment,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlanningError>;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Worker ID not found: {0}")]
    WorkerNotFound(String),

    #[error("Invalid worker address: {0}")]
    InvalidAddress(#[from] igloo_common::Error),
}
