//! Get, install and upgrade driven from a package URL
//!
//! Every operation walks the same states:
//!
//! ```text
//! Resolving -> Authenticating -> Locating -> Loading -> Applying -> Done
//! ```
//!
//! with `Failed` reachable from any of them. Credential files staged while
//! authenticating live until the operation finishes, whether it succeeds or
//! fails, and are then removed or kept according to
//! [`Settings::cleanup_files`].

use chartroom_core::{ChartInfo, PackageArchive, Settings, Values};
use chartroom_repo::{
    CredentialMaterializer, LocateRequest, PackageLoader, RepositoryRecord, RepositoryRef,
    RepositoryResolver, StagedFiles, Strategy,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::dependency::DependencyChecker;
use crate::error::{KubeError, Result};
use crate::release::StoredRelease;
use crate::store::ReleaseStore;

/// Install counter, labelled by package name and version
pub const INSTALLS_COUNTER: &str = "chartroom_package_installs_total";

/// Upgrade counter, labelled by package name and version
pub const UPGRADES_COUNTER: &str = "chartroom_package_upgrades_total";

/// Where an operation currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Resolving,
    Authenticating,
    Locating,
    Loading,
    Applying,
    Done,
    Failed,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resolving => "resolving",
            Self::Authenticating => "authenticating",
            Self::Locating => "locating",
            Self::Loading => "loading",
            Self::Applying => "applying",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// State log for one operation
#[derive(Debug)]
struct Progress {
    operation: &'static str,
    states: Vec<OperationState>,
}

impl Progress {
    fn new(operation: &'static str) -> Self {
        Self {
            operation,
            states: Vec::new(),
        }
    }

    fn enter(&mut self, state: OperationState) {
        tracing::debug!(operation = self.operation, state = %state, "state transition");
        self.states.push(state);
    }

    fn current(&self) -> Option<OperationState> {
        self.states.last().copied()
    }

    fn fail(&mut self, error: &KubeError) {
        tracing::warn!(
            operation = self.operation,
            state = ?self.current(),
            error = %error,
            "operation failed"
        );
        self.states.push(OperationState::Failed);
    }
}

/// Fetch a package without installing it
#[derive(Debug, Clone, Default)]
pub struct GetRequest {
    /// Archive URL
    pub url: String,
    /// Namespace whose project repositories are visible
    pub namespace: String,
    /// Skip URL matching and use this repository
    pub repository: Option<RepositoryRef>,
}

impl GetRequest {
    pub fn new(url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: namespace.into(),
            repository: None,
        }
    }

    pub fn with_repository(mut self, repository: RepositoryRef) -> Self {
        self.repository = Some(repository);
        self
    }
}

/// Install a package as a new release
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Release name
    pub name: String,
    pub namespace: String,
    pub url: String,
    pub values: Values,
    pub repository: Option<RepositoryRef>,
}

impl InstallRequest {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            url: url.into(),
            values: Values::new(),
            repository: None,
        }
    }

    pub fn with_values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }

    pub fn with_repository(mut self, repository: RepositoryRef) -> Self {
        self.repository = Some(repository);
        self
    }

    fn get_request(&self) -> GetRequest {
        GetRequest {
            url: self.url.clone(),
            namespace: self.namespace.clone(),
            repository: self.repository.clone(),
        }
    }
}

/// Upgrade an existing release
///
/// An empty `url` reuses the URL recorded on the deployed revision; when
/// none was recorded the upgrade only changes values.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    /// Release name
    pub name: String,
    pub namespace: String,
    pub url: String,
    pub values: Values,
    pub repository: Option<RepositoryRef>,
}

impl UpgradeRequest {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            url: String::new(),
            values: Values::new(),
            repository: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }

    pub fn with_repository(mut self, repository: RepositoryRef) -> Self {
        self.repository = Some(repository);
        self
    }
}

/// Result of [`PackageOrchestrator::get_package`]
#[derive(Debug, Clone)]
pub struct FetchedPackage {
    pub package: PackageArchive,
    pub repository: RepositoryRecord,
    pub strategy: Strategy,
    /// URL the package was fetched from
    pub chart_url: String,
    /// Credential files staged for the fetch (already removed when cleanup is on)
    pub staged_files: Vec<PathBuf>,
    pub states: Vec<OperationState>,
}

/// Result of an install or upgrade
#[derive(Debug, Clone)]
pub struct ReleaseOutcome {
    pub release: StoredRelease,
    /// `None` for a values-only upgrade
    pub repository: Option<RepositoryRecord>,
    pub staged_files: Vec<PathBuf>,
    pub states: Vec<OperationState>,
}

/// Resolved and loaded package, before cleanup
struct Loaded {
    package: PackageArchive,
    repository: RepositoryRecord,
    strategy: Strategy,
}

/// Composes resolution, credential staging, loading and the release store
pub struct PackageOrchestrator {
    resolver: RepositoryResolver,
    materializer: CredentialMaterializer,
    loader: Arc<dyn PackageLoader>,
    releases: Arc<dyn ReleaseStore>,
    dependencies: Arc<dyn DependencyChecker>,
    settings: Settings,
    staging_dir: Option<PathBuf>,
}

impl PackageOrchestrator {
    pub fn new(
        resolver: RepositoryResolver,
        materializer: CredentialMaterializer,
        loader: Arc<dyn PackageLoader>,
        releases: Arc<dyn ReleaseStore>,
        dependencies: Arc<dyn DependencyChecker>,
        settings: Settings,
    ) -> Self {
        Self {
            resolver,
            materializer,
            loader,
            releases,
            dependencies,
            settings,
            staging_dir: None,
        }
    }

    /// Stage credential files under `dir` instead of the system temp directory
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn staged_files(&self) -> StagedFiles {
        let staged = StagedFiles::new(self.settings.cleanup_files);
        match &self.staging_dir {
            Some(dir) => staged.in_dir(dir),
            None => staged,
        }
    }

    /// Resolve, authenticate, locate and load the package at `url`
    async fn load_package(
        &self,
        request: &GetRequest,
        staged: &mut StagedFiles,
        progress: &mut Progress,
    ) -> Result<Loaded> {
        progress.enter(OperationState::Resolving);
        let resolution = self
            .resolver
            .resolve(&request.url, &request.namespace, request.repository.as_ref())
            .await?;
        let repository = resolution.repository;

        progress.enter(OperationState::Authenticating);
        let credentials = self
            .materializer
            .materialize(&repository.connection_config(), staged)
            .await?;

        progress.enter(OperationState::Locating);
        // a matched index entry already knows the real name and version
        let (name, version) = match resolution.entry {
            Some(entry) => (entry.name, entry.version),
            None => {
                let info = ChartInfo::from_url(&request.url);
                (info.name, info.version)
            }
        };
        let locate = LocateRequest::new(name, version, &repository.base_url)
            .with_credentials(credentials);
        let path = self.loader.locate(&locate).await?;

        progress.enter(OperationState::Loading);
        let package = self.loader.load(&path).await?;

        tracing::info!(
            url = %request.url,
            repository = %repository.display_name(),
            strategy = %resolution.strategy,
            package = %package.name(),
            version = %package.version(),
            "loaded package"
        );

        Ok(Loaded {
            package,
            repository,
            strategy: resolution.strategy,
        })
    }

    /// Fetch and load the package at `request.url`
    ///
    /// Idempotent: nothing is written to the release store.
    pub async fn get_package(&self, request: &GetRequest) -> Result<FetchedPackage> {
        let mut progress = Progress::new("get");
        let mut staged = self.staged_files();

        match self.load_package(request, &mut staged, &mut progress).await {
            Ok(loaded) => {
                progress.enter(OperationState::Done);
                Ok(FetchedPackage {
                    package: loaded.package,
                    repository: loaded.repository,
                    strategy: loaded.strategy,
                    chart_url: request.url.clone(),
                    staged_files: staged.cleanup_all(),
                    states: progress.states,
                })
            }
            Err(e) => {
                progress.fail(&e);
                Err(e)
            }
        }
    }

    /// Install the package at `request.url` as release `request.name`
    pub async fn install_package(&self, request: &InstallRequest) -> Result<ReleaseOutcome> {
        let mut progress = Progress::new("install");
        let mut staged = self.staged_files();

        match self.install(request, &mut staged, &mut progress).await {
            Ok((release, repository)) => {
                progress.enter(OperationState::Done);
                Ok(ReleaseOutcome {
                    release,
                    repository: Some(repository),
                    staged_files: staged.cleanup_all(),
                    states: progress.states,
                })
            }
            Err(e) => {
                progress.fail(&e);
                Err(e)
            }
        }
    }

    async fn install(
        &self,
        request: &InstallRequest,
        staged: &mut StagedFiles,
        progress: &mut Progress,
    ) -> Result<(StoredRelease, RepositoryRecord)> {
        if request.name.is_empty() {
            return Err(KubeError::InvalidRequest("release name is required".to_string()));
        }

        let Loaded {
            mut package,
            repository,
            ..
        } = self
            .load_package(&request.get_request(), staged, progress)
            .await?;

        package.metadata.set_chart_url(&request.url);

        progress.enter(OperationState::Applying);
        let release = self
            .releases
            .run_install(&request.name, &request.namespace, &package, &request.values)
            .await?;

        record_counter(INSTALLS_COUNTER, &release);
        Ok((release, repository))
    }

    /// Upgrade release `request.name`
    ///
    /// Fails with [`KubeError::ReleaseNotFound`] when the release was never
    /// installed and [`KubeError::ReleaseRevisionNotFound`] when it has no
    /// deployed revision.
    pub async fn upgrade_release(&self, request: &UpgradeRequest) -> Result<ReleaseOutcome> {
        let mut progress = Progress::new("upgrade");
        let mut staged = self.staged_files();

        match self.upgrade(request, &mut staged, &mut progress).await {
            Ok((release, repository)) => {
                progress.enter(OperationState::Done);
                Ok(ReleaseOutcome {
                    release,
                    repository,
                    staged_files: staged.cleanup_all(),
                    states: progress.states,
                })
            }
            Err(e) => {
                progress.fail(&e);
                Err(e)
            }
        }
    }

    async fn upgrade(
        &self,
        request: &UpgradeRequest,
        staged: &mut StagedFiles,
        progress: &mut Progress,
    ) -> Result<(StoredRelease, Option<RepositoryRecord>)> {
        let current = self
            .releases
            .get_latest(&request.namespace, &request.name)
            .await?;

        let url = if request.url.is_empty() {
            current.chart_url().unwrap_or_default().to_string()
        } else {
            request.url.clone()
        };

        let loaded = if url.is_empty() {
            tracing::debug!(release = %request.name, "no package URL, upgrading values only");
            None
        } else {
            let get = GetRequest {
                url: url.clone(),
                namespace: request.namespace.clone(),
                repository: request.repository.clone(),
            };
            Some(self.load_package(&get, staged, progress).await?)
        };

        let (package, repository) = match loaded {
            Some(Loaded {
                mut package,
                repository,
                ..
            }) => {
                if !package.metadata.dependencies.is_empty() {
                    self.dependencies.check(&package, &request.values)?;
                }
                package.metadata.set_chart_url(&url);
                (Some(package), Some(repository))
            }
            None => (None, None),
        };

        progress.enter(OperationState::Applying);
        let release = self
            .releases
            .run_upgrade(
                &request.name,
                &request.namespace,
                package.as_ref(),
                &request.values,
            )
            .await?;

        record_counter(UPGRADES_COUNTER, &release);
        Ok((release, repository))
    }

    /// Latest deployed revision of a release
    pub async fn get_release(&self, namespace: &str, name: &str) -> Result<StoredRelease> {
        self.releases.get_latest(namespace, name).await
    }
}

/// `package` and `version` labels, present only when both are non-empty
fn counter_labels(release: &StoredRelease) -> Option<(String, String)> {
    let package = &release.package;
    if package.name.is_empty() || package.version.is_empty() {
        return None;
    }
    Some((package.name.clone(), package.version.clone()))
}

fn record_counter(name: &'static str, release: &StoredRelease) {
    if let Some((package, version)) = counter_labels(release) {
        metrics::counter!(name, 1u64, "package" => package, "version" => version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_records_failure() {
        let mut progress = Progress::new("get");
        progress.enter(OperationState::Resolving);
        progress.fail(&KubeError::InvalidRequest("bad".to_string()));
        assert_eq!(
            progress.states,
            vec![OperationState::Resolving, OperationState::Failed]
        );
    }

    #[test]
    fn test_counter_labels_require_name_and_version() {
        use chartroom_core::PackageMetadata;

        let release = |name: &str, version: &str| {
            let package = PackageArchive::new(PackageMetadata::new(name, version));
            StoredRelease::for_install("db", "default", &package, Values::new())
        };

        assert_eq!(
            counter_labels(&release("mariadb", "7.3.5")),
            Some(("mariadb".to_string(), "7.3.5".to_string()))
        );
        assert_eq!(counter_labels(&release("mariadb", "")), None);
        assert_eq!(counter_labels(&release("", "7.3.5")), None);
    }

    #[test]
    fn test_upgrade_request_defaults() {
        let request = UpgradeRequest::new("db", "default");
        assert!(request.url.is_empty());
        assert!(request.values.is_empty());
        assert!(request.repository.is_none());
        assert_eq!(OperationState::Authenticating.to_string(), "authenticating");
    }
}
