//! HTTP access to repositories
//!
//! [`RepoHttpClient`] presents staged TLS material (client certificate and
//! extra CA) to the repository server. [`HttpIndexFetcher`] stages the
//! credentials of a repository, fetches its `index.yaml` and disposes of the
//! files again.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::RepositoryRecord;
use crate::credentials::{CredentialBundle, CredentialMaterializer};
use crate::error::{RepoError, Result};
use crate::index::{IndexEntry, RepositoryIndex, resolve_url};
use crate::staging::StagedFiles;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client configured from a credential bundle
#[derive(Debug, Clone)]
pub struct RepoHttpClient {
    client: reqwest::Client,
}

impl RepoHttpClient {
    /// Build a client presenting the bundle's client certificate and
    /// trusting its CA file in addition to the system roots
    pub fn new(bundle: &CredentialBundle) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(REQUEST_TIMEOUT);

        if let (Some(cert_file), Some(key_file)) = (&bundle.cert_file, &bundle.key_file) {
            let mut pem = std::fs::read(cert_file)?;
            pem.push(b'\n');
            pem.extend(std::fs::read(key_file)?);
            let identity =
                reqwest::Identity::from_pem(&pem).map_err(|e| RepoError::InvalidTlsMaterial {
                    message: format!("client certificate: {}", e),
                })?;
            builder = builder.identity(identity);
        }

        if let Some(ca_file) = &bundle.ca_file {
            let pem = std::fs::read(ca_file)?;
            let certs = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
                RepoError::InvalidTlsMaterial {
                    message: format!("CA bundle: {}", e),
                }
            })?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        let client = builder.build().map_err(|e| RepoError::NetworkError {
            message: e.to_string(),
        })?;

        Ok(Self { client })
    }

    /// Fetch bytes from URL
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(RepoError::HttpError {
                status: status.as_u16(),
                message: format!("Request to {} failed", url),
            });
        }

        let bytes = response.bytes().await.map_err(|e| RepoError::NetworkError {
            message: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    /// Fetch and parse `<base_url>/index.yaml`
    pub async fn fetch_index(&self, base_url: &str) -> Result<RepositoryIndex> {
        let index_url = format!("{}/index.yaml", base_url.trim_end_matches('/'));
        let data = self.get_bytes(&index_url).await.map_err(|e| match e {
            RepoError::HttpError { status: 404, .. } => RepoError::IndexNotFound {
                url: index_url.clone(),
            },
            other => other,
        })?;
        RepositoryIndex::from_bytes(&data)
    }

    /// Download an index entry's archive, verifying its digest when the
    /// index declares one
    pub async fn download(&self, entry: &IndexEntry, base_url: &str) -> Result<Vec<u8>> {
        let url = entry.download_url().ok_or_else(|| RepoError::PackNotFound {
            name: entry.name.clone(),
            repo: base_url.to_string(),
        })?;
        let full_url = resolve_url(base_url, url)?;

        let data = self.get_bytes(&full_url).await?;
        verify_digest(entry, &data)?;

        Ok(data)
    }
}

/// Check downloaded bytes against the entry's declared digest
pub fn verify_digest(entry: &IndexEntry, data: &[u8]) -> Result<()> {
    let Some(expected) = &entry.digest else {
        return Ok(());
    };

    let actual = compute_digest(data);
    if digest_matches(expected, &actual) {
        Ok(())
    } else {
        Err(RepoError::IntegrityCheckFailed {
            name: entry.name.clone(),
            expected: expected.clone(),
            actual,
        })
    }
}

/// Compute SHA256 digest of data
pub fn compute_digest(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Compare digests, ignoring case and an optional `sha256:` prefix
fn digest_matches(expected: &str, actual: &str) -> bool {
    fn normalize(digest: &str) -> String {
        let digest = digest.trim().to_lowercase();
        digest
            .strip_prefix("sha256:")
            .map(str::to_string)
            .unwrap_or(digest)
    }

    normalize(expected) == normalize(actual)
}

/// Source of repository indexes
#[async_trait]
pub trait IndexFetcher: Send + Sync {
    async fn fetch_index(&self, repo: &RepositoryRecord) -> Result<RepositoryIndex>;
}

/// Fetches indexes over HTTP using each repository's own credentials
#[derive(Clone)]
pub struct HttpIndexFetcher {
    materializer: CredentialMaterializer,
    cleanup: bool,
}

impl HttpIndexFetcher {
    pub fn new(materializer: CredentialMaterializer, cleanup: bool) -> Self {
        Self {
            materializer,
            cleanup,
        }
    }
}

#[async_trait]
impl IndexFetcher for HttpIndexFetcher {
    async fn fetch_index(&self, repo: &RepositoryRecord) -> Result<RepositoryIndex> {
        let mut staged = StagedFiles::new(self.cleanup);
        let bundle = self
            .materializer
            .materialize(&repo.connection_config(), &mut staged)
            .await?;
        let client = RepoHttpClient::new(&bundle)?;
        client.fetch_index(&repo.base_url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const INDEX: &str = r#"
apiVersion: v1
entries:
  mariadb:
    - name: mariadb
      version: "7.3.5"
      urls:
        - charts/mariadb-7.3.5.tgz
"#;

    #[test]
    fn test_compute_digest() {
        let digest = compute_digest(b"hello world");
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest.len(), 7 + 64);
    }

    #[test]
    fn test_digest_matches() {
        assert!(digest_matches("sha256:abc123", "sha256:ABC123"));
        assert!(digest_matches("sha256:abc123", "abc123"));
        assert!(!digest_matches("sha256:abc123", "sha256:xyz789"));
    }

    #[tokio::test]
    async fn test_fetch_index() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(INDEX))
            .mount(&server)
            .await;

        let client = RepoHttpClient::new(&CredentialBundle::default()).unwrap();
        let index = client.fetch_index(&server.uri()).await.unwrap();
        assert_eq!(index.get_latest("mariadb").unwrap().version, "7.3.5");
    }

    #[tokio::test]
    async fn test_missing_index() {
        let server = MockServer::start().await;

        let client = RepoHttpClient::new(&CredentialBundle::default()).unwrap();
        let err = client.fetch_index(&server.uri()).await.unwrap_err();
        assert!(matches!(err, RepoError::IndexNotFound { .. }));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_download_verifies_digest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/charts/mariadb-7.3.5.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"archive".to_vec()))
            .mount(&server)
            .await;

        let client = RepoHttpClient::new(&CredentialBundle::default()).unwrap();
        let mut entry = IndexEntry {
            name: "mariadb".to_string(),
            version: "7.3.5".to_string(),
            urls: vec!["charts/mariadb-7.3.5.tgz".to_string()],
            digest: Some(compute_digest(b"archive")),
            ..Default::default()
        };

        let data = client.download(&entry, &server.uri()).await.unwrap();
        assert_eq!(data, b"archive");

        entry.digest = Some(compute_digest(b"something else"));
        let err = client.download(&entry, &server.uri()).await.unwrap_err();
        assert!(matches!(err, RepoError::IntegrityCheckFailed { .. }));
    }

    #[tokio::test]
    async fn test_invalid_client_certificate() {
        let temp = tempfile::TempDir::new().unwrap();
        let cert = temp.path().join("cert");
        let key = temp.path().join("key");
        std::fs::write(&cert, "not a certificate").unwrap();
        std::fs::write(&key, "not a key").unwrap();

        let bundle = CredentialBundle {
            cert_file: Some(cert),
            key_file: Some(key),
            ca_file: None,
        };
        let err = RepoHttpClient::new(&bundle).unwrap_err();
        assert!(matches!(err, RepoError::InvalidTlsMaterial { .. }));
    }

    #[tokio::test]
    async fn test_index_fetcher_without_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(INDEX))
            .mount(&server)
            .await;

        let materializer =
            CredentialMaterializer::new(Arc::new(MemoryCredentialStore::new()), "chartroom-config");
        let fetcher = HttpIndexFetcher::new(materializer, true);
        let repo = RepositoryRecord::cluster("local", server.uri());

        let index = fetcher.fetch_index(&repo).await.unwrap();
        assert!(index.get_version("mariadb", "7.3.5").is_some());
    }

    #[tokio::test]
    async fn test_index_fetcher_missing_secret() {
        let materializer =
            CredentialMaterializer::new(Arc::new(MemoryCredentialStore::new()), "chartroom-config");
        let fetcher = HttpIndexFetcher::new(materializer, true);
        let repo = RepositoryRecord::cluster("secure", "https://secure.invalid")
            .with_tls_secret("secure-tls", None);

        let err = fetcher.fetch_index(&repo).await.unwrap_err();
        assert!(matches!(err, RepoError::CredentialObjectNotFound { .. }));
    }
}
