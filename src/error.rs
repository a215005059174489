//! Ingestion error taxonomy

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Empty content, insufficient references, malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// A link names an entity (or class) that does not exist and cannot be created
    #[error("Unknown reference: {key}:{value}")]
    Reference { key: String, value: String },

    /// The acting user lacks write access to a referenced entity
    #[error("Forbidden reference: {key}:{value}")]
    Forbidden { key: String, value: String },

    /// Deferred stage failure or lock contention; retried by the queue
    #[error("Transient error: {0}")]
    Transient(String),

    /// An internal invariant broke (e.g. compression lost a link)
    #[error("Structural invariant violated: {0}")]
    StructuralInvariant(String),

    /// No access-vector bit left to hand out
    #[error("Access vector capacity exhausted: {max} offsets in use")]
    AccessCapacity { max: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Store(#[from] anyhow::Error),
}

impl IngestError {
    /// Whether the queue should try the unit again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Store(_))
    }

    /// Whether the error is raised before anything is persisted
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Reference { .. } | Self::Forbidden { .. }
        )
    }
}

pub type IngestResult<T> = Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats() {
        let err = IngestError::Validation("note content is empty".into());
        assert_eq!(err.to_string(), "Validation error: note content is empty");

        let err = IngestError::Reference {
            key: "actor".into(),
            value: "apt28".into(),
        };
        assert_eq!(err.to_string(), "Unknown reference: actor:apt28");

        let err = IngestError::AccessCapacity { max: 2046 };
        assert_eq!(
            err.to_string(),
            "Access vector capacity exhausted: 2046 offsets in use"
        );
    }

    #[test]
    fn retryable_classification() {
        assert!(IngestError::Transient("lock busy".into()).is_retryable());
        assert!(IngestError::Store(anyhow::anyhow!("io")).is_retryable());
        assert!(!IngestError::Validation("x".into()).is_retryable());
        assert!(!IngestError::StructuralInvariant("x".into()).is_retryable());
    }

    #[test]
    fn rejection_classification() {
        assert!(IngestError::Forbidden {
            key: "actor".into(),
            value: "x".into()
        }
        .is_rejection());
        assert!(!IngestError::Transient("x".into()).is_rejection());
    }
}
