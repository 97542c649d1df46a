//! Request-level failures
//!
//! Anything in here aborts the whole request. Failures scoped to a single
//! test case never use this type; they are recorded in that case's
//! `TestResult` instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    /// Malformed request, rejected before any resource is acquired
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Execution failed: Package {package} not allowed")]
    UnauthorizedPackage { package: String },

    #[error("Execution failed: Unsupported database type: {kind}")]
    UnsupportedDatabaseKind { kind: String },

    #[error("Execution failed: {kind} fixture setup failed: {source:#}")]
    FixtureSetup {
        kind: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Execution failed: {context}: {source}")]
    Workspace {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExecutionError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ExecutionError::InvalidRequest(message.into())
    }

    pub fn workspace(context: impl Into<String>, source: std::io::Error) -> Self {
        ExecutionError::Workspace {
            context: context.into(),
            source,
        }
    }

    /// Short machine-readable tag, used for metrics labels and API bodies
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::InvalidRequest(_) => "invalid_request",
            ExecutionError::UnauthorizedPackage { .. } => "unauthorized_package",
            ExecutionError::UnsupportedDatabaseKind { .. } => "unsupported_database_kind",
            ExecutionError::FixtureSetup { .. } => "fixture_setup_failure",
            ExecutionError::Workspace { .. } => "workspace_failure",
        }
    }

    /// Whether the caller can fix this by changing the request
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            ExecutionError::InvalidRequest(_)
                | ExecutionError::UnauthorizedPackage { .. }
                | ExecutionError::UnsupportedDatabaseKind { .. }
        )
    }
}
