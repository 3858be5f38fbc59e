//! Error types for nidam.
//!
//! Lookup and build failures are hard errors surfaced to the command layer.
//! A model that does not fit a machine is *not* an error: the matcher reports
//! that as a zero score.

use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Main error type for the nidam core library.
#[derive(Debug, Error)]
pub enum NidamError {
    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Failed to parse manifest {path}: {message}")]
    ManifestParse {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<serde_yaml::Error>,
    },

    #[error("Invalid manifest {path}: {field} {message}")]
    ManifestInvalid {
        path: PathBuf,
        field: String,
        message: String,
    },

    // Lookup errors
    #[error("Unknown accelerator type: {0}")]
    UnknownAccelerator(String),

    #[error("No model found for {query}")]
    ModelNotFound { query: String },

    #[error("Multiple models match {query}: {}", candidates.join(", "))]
    AmbiguousModel {
        query: String,
        candidates: Vec<String>,
    },

    #[error("Repo `{name}` not found, known repos: {}", known.join(", "))]
    RepoNotFound { name: String, known: Vec<String> },

    #[error("No available deployment target")]
    NoAvailableTarget,

    // Environment and process errors
    #[error("Failed to install dependencies to {path}: {message}")]
    EnvironmentBuild { path: PathBuf, message: String },

    #[error("Command failed: {program} ({status})")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Model server failed to become ready on port {port}")]
    ServerNotReady { port: u16 },

    #[error("Not logged in to the cloud: {0}")]
    CloudNotLoggedIn(String),

    #[error("Environment variable {0} is required but not provided")]
    MissingEnvVar(String),

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("HTTP error: {0}")]
    Http(String),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for nidam operations.
pub type Result<T> = std::result::Result<T, NidamError>;

impl From<std::io::Error> for NidamError {
    fn from(err: std::io::Error) -> Self {
        NidamError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for NidamError {
    fn from(err: serde_json::Error) -> Self {
        NidamError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for NidamError {
    fn from(err: reqwest::Error) -> Self {
        NidamError::Http(err.to_string())
    }
}

impl NidamError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        NidamError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Build a `CommandFailed` from a finished process.
    pub fn command_failed(program: impl Into<String>, status: ExitStatus, stderr: &[u8]) -> Self {
        NidamError::CommandFailed {
            program: program.into(),
            status: status.to_string(),
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }

    /// Whether this is a lookup failure (unknown model, repo or accelerator).
    pub fn is_lookup_failure(&self) -> bool {
        matches!(
            self,
            NidamError::UnknownAccelerator(_)
                | NidamError::ModelNotFound { .. }
                | NidamError::AmbiguousModel { .. }
                | NidamError::RepoNotFound { .. }
        )
    }

    /// Map the error to a process exit code.
    ///
    /// - 2: lookup failures (unknown model, repo, accelerator, ambiguity)
    /// - 3: environment build failures
    /// - 4: external tool failures
    /// - 5: no deployment target could serve the model
    /// - 1: everything else
    pub fn exit_code(&self) -> i32 {
        match self {
            e if e.is_lookup_failure() => 2,
            NidamError::EnvironmentBuild { .. } => 3,
            NidamError::CommandFailed { .. }
            | NidamError::ServerNotReady { .. }
            | NidamError::CloudNotLoggedIn(_) => 4,
            NidamError::NoAvailableTarget => 5,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NidamError::ModelNotFound {
            query: "llama3".into(),
        };
        assert_eq!(err.to_string(), "No model found for llama3");

        let err = NidamError::AmbiguousModel {
            query: "llama".into(),
            candidates: vec!["llama3:8b".into(), "llama3:70b".into()],
        };
        assert_eq!(
            err.to_string(),
            "Multiple models match llama: llama3:8b, llama3:70b"
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(NidamError::UnknownAccelerator("x".into()).exit_code(), 2);
        assert_eq!(
            NidamError::EnvironmentBuild {
                path: PathBuf::from("/tmp/v"),
                message: "boom".into()
            }
            .exit_code(),
            3
        );
        assert_eq!(NidamError::NoAvailableTarget.exit_code(), 5);
        assert_eq!(NidamError::Other("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_lookup_failures() {
        assert!(NidamError::RepoNotFound {
            name: "nope".into(),
            known: vec!["default".into()]
        }
        .is_lookup_failure());
        assert!(!NidamError::NoAvailableTarget.is_lookup_failure());
    }
}
