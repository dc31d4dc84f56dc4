//! Error types for repository resolution and credential staging

use chartroom_core::CoreError;
use thiserror::Error;

/// Repository operation errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Resolution Errors ============
    #[error("No repository found for {reference} (namespace: '{namespace}')")]
    RepositoryNotFound { reference: String, namespace: String },

    #[error("Failed to list repositories in namespace '{namespace}': {message}")]
    RepositoryListFailed { namespace: String, message: String },

    #[error("Invalid repository URL: {url} - {reason}")]
    InvalidRepositoryUrl { url: String, reason: String },

    #[error("Cluster API error: {message}")]
    ClusterApi { message: String },

    // ============ Credential Errors ============
    #[error("{kind} {namespace}/{name} not found")]
    CredentialObjectNotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    #[error("Failed to find {key} key in {object_name}")]
    CredentialKeyMissing { key: String, object_name: String },

    #[error("Failed to stage ephemeral file '{pattern}': {message}")]
    EphemeralWriteFailed { pattern: String, message: String },

    #[error("Invalid TLS material: {message}")]
    InvalidTlsMaterial { message: String },

    // ============ Network Errors ============
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    // ============ Index Errors ============
    #[error("Index not found at {url}")]
    IndexNotFound { url: String },

    #[error("Index parse error: {message}")]
    IndexParseError { message: String },

    #[error("Package not found: {name} in repository {repo}")]
    PackNotFound { name: String, repo: String },

    #[error("Version not found: {name}@{version} in repository {repo}")]
    VersionNotFound {
        name: String,
        version: String,
        repo: String,
    },

    #[error("Integrity check failed for {name}: expected {expected}, got {actual}")]
    IntegrityCheckFailed {
        name: String,
        expected: String,
        actual: String,
    },

    // ============ Package Errors ============
    #[error("Failed to locate package {name} {version}: {source}")]
    PackageLocateFailed {
        name: String,
        version: String,
        #[source]
        source: Box<RepoError>,
    },

    #[error("Failed to load package from {path}: {source}")]
    PackageLoadFailed {
        path: String,
        #[source]
        source: CoreError,
    },

    // ============ IO Errors ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl RepoError {
    /// Whether the error means "the thing asked for does not exist"
    ///
    /// Locate failures are classified by their underlying cause, so an
    /// unpublished version and an HTTP 404 both count.
    pub fn is_not_found(&self) -> bool {
        match self {
            RepoError::RepositoryNotFound { .. }
            | RepoError::CredentialObjectNotFound { .. }
            | RepoError::IndexNotFound { .. }
            | RepoError::PackNotFound { .. }
            | RepoError::VersionNotFound { .. } => true,
            RepoError::HttpError { status, .. } => *status == 404,
            RepoError::PackageLocateFailed { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            RepoError::HttpError {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else if e.is_connect() {
            RepoError::NetworkError {
                message: format!("Connection failed: {}", e),
            }
        } else {
            RepoError::NetworkError {
                message: e.to_string(),
            }
        }
    }
}

impl From<serde_yaml::Error> for RepoError {
    fn from(e: serde_yaml::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(e: serde_json::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<url::ParseError> for RepoError {
    fn from(e: url::ParseError) -> Self {
        RepoError::InvalidRepositoryUrl {
            url: String::new(),
            reason: e.to_string(),
        }
    }
}
