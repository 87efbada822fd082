use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Template not found: {kind} '{name}'")]
    TemplateNotFound { kind: &'static str, name: String },

    #[error("Template invalid: {kind} '{name}': {reason}")]
    TemplateInvalid {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Entity queue closed: {0}")]
    QueueClosed(String),

    #[error(transparent)]
    Bdi(#[from] volition_bdi::BdiError),

    #[error(transparent)]
    Core(#[from] volition_core::CoreError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
