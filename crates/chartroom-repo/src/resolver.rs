//! Mapping package URLs to the repository that owns them
//!
//! Resolution runs an ordered chain of strategies over the repositories
//! visible from a namespace (project-scoped first, then cluster-scoped). The
//! first strategy to produce a match wins. Supplying an explicit repository
//! name and namespace skips URL matching entirely.

use std::fmt;
use std::sync::Arc;

use crate::config::{RepositoryRecord, RepositoryScope, RepositoryStore};
use crate::error::{RepoError, Result};
use crate::http::IndexFetcher;
use crate::index::IndexEntry;

/// One way of deciding that a repository owns a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Repository named by the caller
    Explicit,
    /// URL starts with the repository's prefix override or base URL
    Prefix,
    /// URL equals a download URL listed in the repository's index
    IndexEntry,
}

impl Strategy {
    /// Default matcher chain
    pub const DEFAULT_CHAIN: [Strategy; 2] = [Strategy::Prefix, Strategy::IndexEntry];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Explicit => write!(f, "explicit"),
            Strategy::Prefix => write!(f, "prefix"),
            Strategy::IndexEntry => write!(f, "index-entry"),
        }
    }
}

/// Repository named by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    pub name: String,
    pub namespace: String,
}

impl RepositoryRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

/// Outcome of a successful resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub repository: RepositoryRecord,
    pub strategy: Strategy,
    /// Index entry whose download URL matched, for [`Strategy::IndexEntry`]
    pub entry: Option<IndexEntry>,
}

/// Finds the repository owning a package URL
#[derive(Clone)]
pub struct RepositoryResolver {
    store: Arc<dyn RepositoryStore>,
    fetcher: Arc<dyn IndexFetcher>,
    chain: Vec<Strategy>,
}

impl RepositoryResolver {
    pub fn new(store: Arc<dyn RepositoryStore>, fetcher: Arc<dyn IndexFetcher>) -> Self {
        Self {
            store,
            fetcher,
            chain: Strategy::DEFAULT_CHAIN.to_vec(),
        }
    }

    /// Replace the matcher chain (`Explicit` entries are ignored)
    pub fn with_chain(mut self, chain: impl IntoIterator<Item = Strategy>) -> Self {
        self.chain = chain
            .into_iter()
            .filter(|s| *s != Strategy::Explicit)
            .collect();
        self
    }

    /// Resolve `url` as seen from `namespace`
    pub async fn resolve(
        &self,
        url: &str,
        namespace: &str,
        explicit: Option<&RepositoryRef>,
    ) -> Result<Resolution> {
        if let Some(reference) = explicit {
            return self.resolve_explicit(reference).await;
        }

        let mut repositories =
            self.store
                .list(namespace)
                .await
                .map_err(|e| RepoError::RepositoryListFailed {
                    namespace: namespace.to_string(),
                    message: e.to_string(),
                })?;
        // stable: keeps store order within each scope
        repositories.sort_by_key(|r| r.scope != RepositoryScope::Project);

        for strategy in &self.chain {
            let found = match strategy {
                Strategy::Prefix => match_prefix(url, &repositories).map(|r| (r, None)),
                Strategy::IndexEntry => self
                    .match_index_entry(url, &repositories)
                    .await
                    .map(|(r, entry)| (r, Some(entry))),
                Strategy::Explicit => None,
            };

            if let Some((repository, entry)) = found {
                tracing::debug!(
                    url,
                    repository = %repository.display_name(),
                    strategy = %strategy,
                    "resolved repository"
                );
                return Ok(Resolution {
                    repository: repository.clone(),
                    strategy: *strategy,
                    entry,
                });
            }
        }

        Err(RepoError::RepositoryNotFound {
            reference: url.to_string(),
            namespace: namespace.to_string(),
        })
    }

    async fn resolve_explicit(&self, reference: &RepositoryRef) -> Result<Resolution> {
        let project = self
            .store
            .get(RepositoryScope::Project, &reference.namespace, &reference.name)
            .await?;

        let repository = match project {
            Some(repository) => Some(repository),
            None => {
                self.store
                    .get(RepositoryScope::Cluster, &reference.namespace, &reference.name)
                    .await?
            }
        };

        let repository = repository.ok_or_else(|| RepoError::RepositoryNotFound {
            reference: reference.name.clone(),
            namespace: reference.namespace.clone(),
        })?;

        tracing::debug!(repository = %repository.display_name(), "using explicit repository");
        Ok(Resolution {
            repository,
            strategy: Strategy::Explicit,
            entry: None,
        })
    }

    async fn match_index_entry<'a>(
        &self,
        url: &str,
        repositories: &'a [RepositoryRecord],
    ) -> Option<(&'a RepositoryRecord, IndexEntry)> {
        for repository in repositories {
            match self.fetcher.fetch_index(repository).await {
                Ok(index) => {
                    if let Some(entry) = index.find_by_url(url, &repository.base_url) {
                        return Some((repository, entry.clone()));
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        repository = %repository.display_name(),
                        error = %e,
                        "skipping repository, index unavailable"
                    );
                }
            }
        }
        None
    }
}

fn match_prefix<'a>(url: &str, repositories: &'a [RepositoryRecord]) -> Option<&'a RepositoryRecord> {
    repositories.iter().find(|r| {
        let prefix = r.match_prefix();
        !prefix.is_empty() && url.starts_with(prefix)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryRepositoryStore;
    use crate::index::{IndexEntry, RepositoryIndex};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned indexes keyed by repository name
    #[derive(Default)]
    struct StaticIndexes {
        indexes: HashMap<String, RepositoryIndex>,
        fetched: Mutex<Vec<String>>,
    }

    impl StaticIndexes {
        fn with(mut self, repo: &str, urls: &[&str]) -> Self {
            let mut index = RepositoryIndex::default();
            for (i, url) in urls.iter().enumerate() {
                index.add_entry(IndexEntry {
                    name: format!("pkg{i}"),
                    version: "1.0.0".to_string(),
                    urls: vec![url.to_string()],
                    ..Default::default()
                });
            }
            self.indexes.insert(repo.to_string(), index);
            self
        }
    }

    #[async_trait]
    impl IndexFetcher for StaticIndexes {
        async fn fetch_index(&self, repo: &RepositoryRecord) -> Result<RepositoryIndex> {
            self.fetched.lock().unwrap().push(repo.name.clone());
            self.indexes
                .get(&repo.name)
                .cloned()
                .ok_or_else(|| RepoError::IndexNotFound {
                    url: repo.index_url(),
                })
        }
    }

    struct FailingStore;

    #[async_trait]
    impl RepositoryStore for FailingStore {
        async fn get(
            &self,
            _scope: RepositoryScope,
            _namespace: &str,
            _name: &str,
        ) -> Result<Option<RepositoryRecord>> {
            Ok(None)
        }

        async fn list(&self, _namespace: &str) -> Result<Vec<RepositoryRecord>> {
            Err(RepoError::ClusterApi {
                message: "forbidden".to_string(),
            })
        }
    }

    fn resolver(store: MemoryRepositoryStore, indexes: StaticIndexes) -> RepositoryResolver {
        RepositoryResolver::new(Arc::new(store), Arc::new(indexes))
    }

    #[tokio::test]
    async fn test_prefix_match() {
        let store = MemoryRepositoryStore::with_records([RepositoryRecord::cluster(
            "without-tls",
            "http://localhost:8080",
        )]);
        let resolution = resolver(store, StaticIndexes::default())
            .resolve("http://localhost:8080/charts/mariadb-7.3.5.tgz", "default", None)
            .await
            .unwrap();

        assert_eq!(resolution.repository.name, "without-tls");
        assert_eq!(resolution.strategy, Strategy::Prefix);
        assert!(resolution.entry.is_none());
    }

    #[tokio::test]
    async fn test_project_wins_over_cluster() {
        let store = MemoryRepositoryStore::with_records([
            RepositoryRecord::cluster("shared", "https://charts.example.com"),
            RepositoryRecord::project("mirror", "team-a", "https://charts.example.com"),
        ]);
        let resolver = resolver(store, StaticIndexes::default());

        let resolution = resolver
            .resolve("https://charts.example.com/nginx-1.0.0.tgz", "team-a", None)
            .await
            .unwrap();
        assert_eq!(resolution.repository.scope, RepositoryScope::Project);
        assert_eq!(resolution.repository.namespace, "team-a");

        let resolution = resolver
            .resolve("https://charts.example.com/nginx-1.0.0.tgz", "team-b", None)
            .await
            .unwrap();
        assert_eq!(resolution.repository.name, "shared");
    }

    #[tokio::test]
    async fn test_prefix_override() {
        let store = MemoryRepositoryStore::with_records([
            RepositoryRecord::cluster("origin", "https://origin.example.com")
                .with_url_prefix("https://cdn.example.com/origin/"),
        ]);
        let resolver = resolver(store, StaticIndexes::default());

        let resolution = resolver
            .resolve("https://cdn.example.com/origin/app-1.0.0.tgz", "default", None)
            .await
            .unwrap();
        assert_eq!(resolution.repository.name, "origin");

        // base URL is not consulted once an override exists
        let err = resolver
            .resolve("https://origin.example.com/app-1.0.0.tgz", "default", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::RepositoryNotFound { .. }));
    }

    #[tokio::test]
    async fn test_index_entry_match_any_namespace() {
        let store = MemoryRepositoryStore::with_records([
            RepositoryRecord::cluster("first", "https://first.example.com"),
            RepositoryRecord::cluster("second", "https://second.example.com"),
        ]);
        let indexes = StaticIndexes::default()
            .with("first", &["https://cdn.example.com/other-1.0.0.tgz"])
            .with("second", &["https://cdn.example.com/influxdb-3.0.2.tgz"]);
        let resolver = resolver(store, indexes);

        for namespace in ["default", "team-a"] {
            let resolution = resolver
                .resolve("https://cdn.example.com/influxdb-3.0.2.tgz", namespace, None)
                .await
                .unwrap();
            assert_eq!(resolution.repository.name, "second");
            assert_eq!(resolution.strategy, Strategy::IndexEntry);
            assert_eq!(resolution.entry.map(|e| e.name), Some("pkg0".to_string()));
        }
    }

    #[tokio::test]
    async fn test_index_entry_non_canonical_urls() {
        for url in [
            "https://cdn.example.com:443/influxdb-3.0.2.tgz",
            "https://CDN.example.com/influxdb-3.0.2.tgz",
            "https://cdn.example.com",
        ] {
            let store = MemoryRepositoryStore::with_records([RepositoryRecord::cluster(
                "influx",
                "https://influx.example.com",
            )]);
            let indexes = StaticIndexes::default().with("influx", &[url]);

            let resolution = resolver(store, indexes)
                .resolve(url, "default", None)
                .await
                .unwrap_or_else(|e| panic!("{url}: {e}"));
            assert_eq!(resolution.repository.name, "influx");
            assert_eq!(resolution.strategy, Strategy::IndexEntry);
        }
    }

    #[tokio::test]
    async fn test_relative_index_urls() {
        let store = MemoryRepositoryStore::with_records([RepositoryRecord::cluster(
            "stable",
            "https://stable.example.com/charts",
        )
        .with_url_prefix("https://unused.example.com")]);
        let indexes = StaticIndexes::default().with("stable", &["nginx-1.0.0.tgz"]);

        let resolution = resolver(store, indexes)
            .resolve("https://stable.example.com/charts/nginx-1.0.0.tgz", "default", None)
            .await
            .unwrap();
        assert_eq!(resolution.strategy, Strategy::IndexEntry);
    }

    #[tokio::test]
    async fn test_unavailable_index_skipped() {
        let store = MemoryRepositoryStore::with_records([
            RepositoryRecord::cluster("broken", "https://broken.example.com"),
            RepositoryRecord::cluster("working", "https://working.example.com"),
        ]);
        let indexes =
            StaticIndexes::default().with("working", &["https://cdn.example.com/app-2.0.0.tgz"]);

        let resolution = resolver(store, indexes)
            .resolve("https://cdn.example.com/app-2.0.0.tgz", "default", None)
            .await
            .unwrap();
        assert_eq!(resolution.repository.name, "working");
    }

    #[tokio::test]
    async fn test_not_found() {
        let store = MemoryRepositoryStore::with_records([RepositoryRecord::cluster(
            "without-tls",
            "http://localhost:8080",
        )]);
        let err = resolver(store, StaticIndexes::default())
            .resolve("https://elsewhere.example.com/x-1.0.0.tgz", "default", None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_explicit_skips_url_matching() {
        let store = MemoryRepositoryStore::with_records([
            RepositoryRecord::cluster("shared", "https://shared.example.com"),
            RepositoryRecord::project("shared", "team-a", "https://team-a.example.com"),
        ]);
        let resolver = resolver(store, StaticIndexes::default());

        let resolution = resolver
            .resolve(
                "https://unrelated.example.com/x-1.0.0.tgz",
                "default",
                Some(&RepositoryRef::new("shared", "team-a")),
            )
            .await
            .unwrap();
        assert_eq!(resolution.strategy, Strategy::Explicit);
        assert_eq!(resolution.repository.scope, RepositoryScope::Project);

        let resolution = resolver
            .resolve("", "default", Some(&RepositoryRef::new("shared", "team-b")))
            .await
            .unwrap();
        assert_eq!(resolution.repository.scope, RepositoryScope::Cluster);

        let err = resolver
            .resolve("", "default", Some(&RepositoryRef::new("missing", "team-a")))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::RepositoryNotFound { .. }));
    }

    #[tokio::test]
    async fn test_prefix_only_chain_never_fetches() {
        let store = MemoryRepositoryStore::with_records([RepositoryRecord::cluster(
            "other",
            "https://other.example.com",
        )]);
        let indexes = Arc::new(StaticIndexes::default());
        let resolver = RepositoryResolver::new(Arc::new(store), indexes.clone())
            .with_chain([Strategy::Prefix]);

        let err = resolver
            .resolve("https://cdn.example.com/app-1.0.0.tgz", "default", None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(indexes.fetched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_failure() {
        let resolver =
            RepositoryResolver::new(Arc::new(FailingStore), Arc::new(StaticIndexes::default()));
        let err = resolver
            .resolve("https://charts.example.com/x-1.0.0.tgz", "team-a", None)
            .await
            .unwrap_err();

        match err {
            RepoError::RepositoryListFailed { namespace, message } => {
                assert_eq!(namespace, "team-a");
                assert!(message.contains("forbidden"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
