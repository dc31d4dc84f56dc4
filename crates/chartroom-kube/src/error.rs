//! Error types for chartroom-kube

use chartroom_repo::RepoError;
use thiserror::Error;

/// Result type for chartroom-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while fetching, installing or upgrading packages
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Repository resolution, credential or package error
    #[error(transparent)]
    Repo(#[from] RepoError),

    /// No release history at all
    #[error("release '{name}' not found in namespace '{namespace}'")]
    ReleaseNotFound { name: String, namespace: String },

    /// History exists but nothing is deployed
    #[error("no deployed revision for release '{name}' in namespace '{namespace}'")]
    ReleaseRevisionNotFound { name: String, namespace: String },

    /// Release name (or revision) already taken
    #[error("release '{name}' already exists in namespace '{namespace}'")]
    ReleaseAlreadyExists { name: String, namespace: String },

    /// Declared dependencies not bundled with the package
    #[error("package '{package}' is missing dependencies: {}", missing.join(", "))]
    DependencyCheckFailed {
        package: String,
        missing: Vec<String>,
    },

    /// Applying the release to the cluster failed
    #[error("failed to apply release '{name}' in namespace '{namespace}': {message}")]
    ApplyFailed {
        name: String,
        namespace: String,
        message: String,
    },

    /// Caller supplied an unusable request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Whether the thing asked for does not exist: repository, package
    /// version, release, or a Kubernetes 404
    ///
    /// A release with history but no deployed revision is not classified
    /// as not-found; see [`KubeError::ReleaseRevisionNotFound`].
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::ReleaseNotFound { .. } => true,
            KubeError::Repo(e) => e.is_not_found(),
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Check if this is a conflict error (409 or an existing revision)
    pub fn is_conflict(&self) -> bool {
        match self {
            KubeError::ReleaseAlreadyExists { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 409,
            _ => false,
        }
    }
}
