use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unknown field type: {0}")]
    UnknownFieldType(String),

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Field type mismatch on '{field}': expected {expected}, got {got}")]
    FieldTypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("Message does not conform to schema '{schema}': {reason}")]
    SchemaMismatch { schema: String, reason: String },

    #[error("Malformed bus address: {0}")]
    MalformedAddress(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
