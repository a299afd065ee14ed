//! Application error type.
//!
//! Every fallible operation in the crate returns `Result<_, AppError>`. The
//! error carries an `ErrorKind` (what went wrong, used by the HTTP layer and
//! by tests) and a human-readable message. The binary maps the kind to a
//! process exit code.

/// Error taxonomy shared by the bundle, store, service and CV harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// Bad flags, bad configuration or unusable input data.
    #[error("invalid input")]
    InvalidInput,
    /// An input row lacks a required predictor or carries the wrong type,
    /// or a pipeline/model pair disagree on the feature schema.
    #[error("schema mismatch")]
    SchemaMismatch,
    /// A value could not be transformed with the frozen pipeline state.
    #[error("transform error")]
    TransformError,
    /// The artifact name or version does not exist in the store.
    #[error("not found")]
    NotFound,
    /// Missing or rejected store credential.
    #[error("authentication failed")]
    AuthError,
    /// The store could not be reached or timed out.
    #[error("store unavailable")]
    Unavailable,
    /// The numeric fit for a fold (or the final fit) did not converge.
    #[error("fit failed")]
    FoldFitError,
    /// A stored payload failed its hash check or could not be decoded.
    #[error("corrupt artifact")]
    CorruptArtifact,
}

impl ErrorKind {
    /// Stable snake_case identifier used in HTTP error bodies.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::SchemaMismatch => "schema_mismatch",
            ErrorKind::TransformError => "transform_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::FoldFitError => "fold_fit_error",
            ErrorKind::CorruptArtifact => "corrupt_artifact",
        }
    }

    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::InvalidInput => 2,
            ErrorKind::SchemaMismatch | ErrorKind::TransformError => 3,
            ErrorKind::FoldFitError => 4,
            ErrorKind::NotFound => 5,
            ErrorKind::AuthError => 6,
            ErrorKind::Unavailable => 7,
            ErrorKind::CorruptArtifact => 8,
        }
    }
}

#[derive(Clone, thiserror::Error)]
#[error("{message}")]
pub struct AppError {
    kind: ErrorKind,
    message: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn exit_code(&self) -> u8 {
        self.kind.exit_code()
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_failure_family() {
        assert_eq!(AppError::new(ErrorKind::InvalidInput, "x").exit_code(), 2);
        assert_eq!(AppError::new(ErrorKind::NotFound, "x").exit_code(), 5);
        assert_eq!(AppError::new(ErrorKind::AuthError, "x").exit_code(), 6);
        assert_ne!(
            ErrorKind::Unavailable.exit_code(),
            ErrorKind::CorruptArtifact.exit_code()
        );
    }

    #[test]
    fn display_is_the_message() {
        let err = AppError::new(ErrorKind::TransformError, "unseen level 'Z' in column 'area'");
        assert_eq!(err.to_string(), "unseen level 'Z' in column 'area'");
        assert_eq!(err.kind().code(), "transform_error");
    }
}
