use thiserror::Error;

#[derive(Debug, Error)]
pub enum BdiError {
    #[error("Belief message not found: {0}")]
    MessageNotFound(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Plan '{0}' has no body")]
    PlanMissingBody(String),

    #[error("Task target out of bounds: {0}")]
    BadTaskTarget(i32),

    #[error(transparent)]
    Core(#[from] volition_core::CoreError),
}

pub type Result<T> = std::result::Result<T, BdiError>;
