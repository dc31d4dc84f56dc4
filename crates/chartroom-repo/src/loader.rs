//! Locating and loading package archives

use async_trait::async_trait;
use chartroom_core::{PackageArchive, Settings, load_archive};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::credentials::CredentialBundle;
use crate::error::{RepoError, Result};
use crate::http::{RepoHttpClient, verify_digest};

/// What to fetch and how to authenticate while fetching it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocateRequest {
    /// Package name, or an absolute archive URL
    pub name: String,
    /// Exact version; empty means latest
    pub version: String,
    /// Repository base URL used to look the package up
    pub repo_url: String,
    pub credentials: CredentialBundle,
}

impl LocateRequest {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        repo_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            repo_url: repo_url.into(),
            credentials: CredentialBundle::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: CredentialBundle) -> Self {
        self.credentials = credentials;
        self
    }
}

/// Package archive loader
#[async_trait]
pub trait PackageLoader: Send + Sync {
    /// Find the archive and return a local path to it
    async fn locate(&self, request: &LocateRequest) -> Result<PathBuf>;

    /// Parse a local archive
    async fn load(&self, path: &Path) -> Result<PackageArchive>;
}

/// Loader that downloads archives from HTTP repositories into a cache
#[derive(Debug, Clone)]
pub struct HttpPackageLoader {
    cache_dir: PathBuf,
}

impl HttpPackageLoader {
    pub fn new(settings: &Settings) -> Self {
        Self {
            cache_dir: settings.cache_dir.clone(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    async fn fetch(&self, request: &LocateRequest) -> Result<PathBuf> {
        let client = RepoHttpClient::new(&request.credentials)?;

        if is_absolute_url(&request.name) {
            let data = client.get_bytes(&request.name).await?;
            let file_name = request
                .name
                .split(['?', '#'])
                .next()
                .and_then(|path| path.rsplit('/').next())
                .filter(|segment| !segment.is_empty())
                .unwrap_or("package.tgz");
            return self.write_cache(file_name, &data);
        }

        let index = client.fetch_index(&request.repo_url).await?;
        let entry = if request.version.is_empty() {
            index.get_latest(&request.name)
        } else {
            index.get_version(&request.name, &request.version)
        };
        let entry = entry.ok_or_else(|| {
            if index.entries.contains_key(&request.name) {
                RepoError::VersionNotFound {
                    name: request.name.clone(),
                    version: request.version.clone(),
                    repo: request.repo_url.clone(),
                }
            } else {
                RepoError::PackNotFound {
                    name: request.name.clone(),
                    repo: request.repo_url.clone(),
                }
            }
        })?;

        let file_name = format!("{}-{}.tgz", entry.name, entry.version);
        let cached = self.cache_dir.join(&file_name);
        if entry.digest.is_some() && cached.exists() {
            let data = std::fs::read(&cached)?;
            if verify_digest(entry, &data).is_ok() {
                tracing::debug!(path = %cached.display(), "using cached archive");
                return Ok(cached);
            }
        }

        let data = client.download(entry, &request.repo_url).await?;
        self.write_cache(&file_name, &data)
    }

    /// Write through a temporary file and rename, so a concurrent reader
    /// only ever sees a complete archive
    fn write_cache(&self, file_name: &str, data: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.cache_dir)?;
        let path = self.cache_dir.join(file_name);
        let mut file = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(&self.cache_dir)?;
        file.write_all(data)?;
        file.persist(&path).map_err(|e| e.error)?;
        Ok(path)
    }
}

fn is_absolute_url(name: &str) -> bool {
    name.starts_with("http://") || name.starts_with("https://")
}

#[async_trait]
impl PackageLoader for HttpPackageLoader {
    async fn locate(&self, request: &LocateRequest) -> Result<PathBuf> {
        let path = self
            .fetch(request)
            .await
            .map_err(|e| RepoError::PackageLocateFailed {
                name: request.name.clone(),
                version: request.version.clone(),
                source: Box::new(e),
            })?;
        tracing::debug!(name = %request.name, version = %request.version, path = %path.display(), "located package");
        Ok(path)
    }

    async fn load(&self, path: &Path) -> Result<PackageArchive> {
        load_archive(path).map_err(|source| RepoError::PackageLoadFailed {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::compute_digest;
    use chartroom_core::create_archive;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn build_archive(temp: &TempDir, name: &str, version: &str) -> Vec<u8> {
        let dir = temp.path().join(format!("src-{name}-{version}"));
        std::fs::create_dir_all(dir.join("templates")).unwrap();
        std::fs::write(
            dir.join("Chart.yaml"),
            format!("apiVersion: v2\nname: {name}\nversion: {version}\n"),
        )
        .unwrap();
        std::fs::write(dir.join("values.yaml"), "image:\n  tag: latest\n").unwrap();
        std::fs::write(dir.join("templates/service.yaml"), "kind: Service\n").unwrap();

        let out = temp.path().join(format!("{name}-{version}.tgz"));
        create_archive(&dir, &out).unwrap();
        std::fs::read(out).unwrap()
    }

    async fn serve(server: &MockServer, archive: &[u8], expected_downloads: u64) {
        let index = format!(
            r#"apiVersion: v1
entries:
  mariadb:
    - name: mariadb
      version: "7.3.5"
      digest: "{}"
      urls:
        - charts/mariadb-7.3.5.tgz
    - name: mariadb
      version: "7.3.4"
      urls:
        - charts/mariadb-7.3.4.tgz
"#,
            compute_digest(archive)
        );
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(index))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/charts/mariadb-7.3.5.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive.to_vec()))
            .expect(expected_downloads)
            .mount(server)
            .await;
    }

    fn loader(temp: &TempDir) -> HttpPackageLoader {
        HttpPackageLoader::new(&Settings::default().with_cache_dir(temp.path().join("cache")))
    }

    #[tokio::test]
    async fn test_locate_and_load_by_name() {
        let temp = TempDir::new().unwrap();
        let server = MockServer::start().await;
        serve(&server, &build_archive(&temp, "mariadb", "7.3.5"), 1).await;

        let loader = loader(&temp);
        let path = loader
            .locate(&LocateRequest::new("mariadb", "7.3.5", server.uri()))
            .await
            .unwrap();
        assert!(path.starts_with(loader.cache_dir()));

        let package = loader.load(&path).await.unwrap();
        assert_eq!(package.name(), "mariadb");
        assert_eq!(package.version(), "7.3.5");
        assert!(package.templates.contains_key("templates/service.yaml"));
    }

    #[tokio::test]
    async fn test_cached_archive_reused() {
        let temp = TempDir::new().unwrap();
        let server = MockServer::start().await;
        serve(&server, &build_archive(&temp, "mariadb", "7.3.5"), 1).await;

        let loader = loader(&temp);
        let request = LocateRequest::new("mariadb", "7.3.5", server.uri());
        let first = loader.locate(&request).await.unwrap();
        let second = loader.locate(&request).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_latest_when_version_empty() {
        let temp = TempDir::new().unwrap();
        let server = MockServer::start().await;
        serve(&server, &build_archive(&temp, "mariadb", "7.3.5"), 1).await;

        let path = loader(&temp)
            .locate(&LocateRequest::new("mariadb", "", server.uri()))
            .await
            .unwrap();
        assert!(path.ends_with("mariadb-7.3.5.tgz"));
    }

    #[tokio::test]
    async fn test_unpublished_version_is_not_found() {
        let temp = TempDir::new().unwrap();
        let server = MockServer::start().await;
        serve(&server, &build_archive(&temp, "mariadb", "7.3.5"), 0).await;

        let err = loader(&temp)
            .locate(&LocateRequest::new("mariadb", "7.3.6", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::PackageLocateFailed { .. }));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_unknown_package_is_not_found() {
        let temp = TempDir::new().unwrap();
        let server = MockServer::start().await;
        serve(&server, &build_archive(&temp, "mariadb", "7.3.5"), 0).await;

        let err = loader(&temp)
            .locate(&LocateRequest::new("postgres", "1.0.0", server.uri()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_locate_absolute_url() {
        let temp = TempDir::new().unwrap();
        let server = MockServer::start().await;
        serve(&server, &build_archive(&temp, "mariadb", "7.3.5"), 1).await;

        let url = format!("{}/charts/mariadb-7.3.5.tgz", server.uri());
        let path = loader(&temp)
            .locate(&LocateRequest::new(url, "", ""))
            .await
            .unwrap();
        assert!(path.ends_with("mariadb-7.3.5.tgz"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_fetches_load_complete_archives() {
        let temp = TempDir::new().unwrap();
        let server = MockServer::start().await;
        let archive = build_archive(&temp, "mariadb", "7.3.5");
        // index carries no digest so every locate downloads and rewrites the cache
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "apiVersion: v1\nentries:\n  mariadb:\n    - name: mariadb\n      version: \"7.3.5\"\n      urls:\n        - charts/mariadb-7.3.5.tgz\n",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/charts/mariadb-7.3.5.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
            .mount(&server)
            .await;

        let loader = std::sync::Arc::new(loader(&temp));
        for _ in 0..10 {
            let tasks: Vec<_> = (0..8)
                .map(|_| {
                    let loader = loader.clone();
                    let request = LocateRequest::new("mariadb", "7.3.5", server.uri());
                    tokio::spawn(async move {
                        let path = loader.locate(&request).await.unwrap();
                        loader.load(&path).await
                    })
                })
                .collect();

            for task in tasks {
                let package = task.await.unwrap().unwrap();
                assert_eq!(package.version(), "7.3.5");
            }
        }

        let leftovers = std::fs::read_dir(loader.cache_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".download-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_load_corrupt_archive() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.tgz");
        std::fs::write(&path, b"not gzip").unwrap();

        let err = loader(&temp).load(&path).await.unwrap_err();
        assert!(matches!(err, RepoError::PackageLoadFailed { .. }));
    }
}
