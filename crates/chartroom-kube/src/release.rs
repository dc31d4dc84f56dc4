//! Release records and their state machine

use chartroom_core::{PackageArchive, PackageMetadata, Values};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One revision of an installed package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRelease {
    /// Release name
    pub name: String,

    /// Kubernetes namespace
    pub namespace: String,

    /// Revision number (1-indexed, increments with each upgrade)
    pub version: u32,

    pub state: ReleaseState,

    /// Package metadata at deploy time, including the `chart_url` annotation
    pub package: PackageMetadata,

    /// User-supplied configuration values
    pub config: Values,

    /// Templates as shipped, concatenated in path order
    pub manifest: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl StoredRelease {
    /// Create revision 1 for installation
    pub fn for_install(
        name: impl Into<String>,
        namespace: impl Into<String>,
        package: &PackageArchive,
        config: Values,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            namespace: namespace.into(),
            version: 1,
            state: ReleaseState::PendingInstall { started_at: now },
            package: package.metadata.clone(),
            config,
            manifest: render_manifest(package),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create the next revision
    ///
    /// Without a package the previous revision's package and manifest are
    /// carried over (values-only upgrade).
    pub fn for_upgrade(
        previous: &StoredRelease,
        version: u32,
        package: Option<&PackageArchive>,
        config: Values,
    ) -> Self {
        let now = Utc::now();
        let (metadata, manifest) = match package {
            Some(package) => (package.metadata.clone(), render_manifest(package)),
            None => (previous.package.clone(), previous.manifest.clone()),
        };

        Self {
            name: previous.name.clone(),
            namespace: previous.namespace.clone(),
            version,
            state: ReleaseState::PendingUpgrade {
                started_at: now,
                previous_version: previous.version,
            },
            package: metadata,
            config,
            manifest,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_deployed(&self) -> bool {
        self.state == ReleaseState::Deployed
    }

    /// Archive URL recorded at install or upgrade time
    pub fn chart_url(&self) -> Option<&str> {
        self.package.chart_url()
    }

    pub fn mark_deployed(&mut self) {
        self.state = ReleaseState::Deployed;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.state = ReleaseState::Failed {
            reason: reason.into(),
            failed_at: Utc::now(),
        };
        self.updated_at = Utc::now();
    }

    /// Mark the release as superseded (replaced by a newer version)
    pub fn mark_superseded(&mut self) {
        self.state = ReleaseState::Superseded;
        self.updated_at = Utc::now();
    }
}

/// Concatenate template sources into a single manifest
fn render_manifest(package: &PackageArchive) -> String {
    package
        .templates
        .iter()
        .map(|(path, content)| {
            format!(
                "---\n# Source: {}/{}\n{}",
                package.name(),
                path,
                String::from_utf8_lossy(content).trim_end()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Release state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ReleaseState {
    /// Successfully deployed
    Deployed,

    /// Deployment failed
    Failed {
        reason: String,
        failed_at: DateTime<Utc>,
    },

    /// Replaced by a newer revision
    Superseded,

    /// Installation in progress
    PendingInstall { started_at: DateTime<Utc> },

    /// Upgrade in progress
    PendingUpgrade {
        started_at: DateTime<Utc>,
        previous_version: u32,
    },
}

impl ReleaseState {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::PendingInstall { .. } | Self::PendingUpgrade { .. })
    }

    /// Human-readable status name
    pub fn status_name(&self) -> &'static str {
        match self {
            Self::Deployed => "deployed",
            Self::Failed { .. } => "failed",
            Self::Superseded => "superseded",
            Self::PendingInstall { .. } => "pending-install",
            Self::PendingUpgrade { .. } => "pending-upgrade",
        }
    }
}

impl std::fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed { reason, .. } => write!(f, "failed: {}", reason),
            other => write!(f, "{}", other.status_name()),
        }
    }
}
