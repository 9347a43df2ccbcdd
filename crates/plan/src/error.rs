use crate::physical_plan::OperatorId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Failed to parse physical plan: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported physical plan version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Malformed physical plan: {0}")]
    Malformed(String),

    #[error("Operator {0} is referenced but not defined")]
    DanglingReference(OperatorId),
}

pub type Result<T> = std::result::Result<T, PlanError>;
