//! Chartroom Repository Resolution
//!
//! This crate maps package URLs to the repositories that own them and
//! turns each repository's TLS configuration into files an HTTP client can
//! use:
//!
//! - **Resolution**: ordered strategy chain (explicit, URL prefix, index entry)
//!   with project-scoped repositories taking precedence over cluster-scoped ones
//! - **Credentials**: client certificate and CA bundle read from secrets and
//!   config objects, staged as ephemeral files
//! - **Staging**: scoped temporary files that are removed exactly once
//! - **Loading**: locating archives in HTTP repositories and loading them
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chartroom_repo::{
//!     CredentialMaterializer, HttpIndexFetcher, MemoryCredentialStore,
//!     MemoryRepositoryStore, RepositoryRecord, RepositoryResolver, StagedFiles,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repos = Arc::new(MemoryRepositoryStore::with_records([
//!     RepositoryRecord::cluster("without-tls", "http://localhost:8080"),
//! ]));
//! let materializer =
//!     CredentialMaterializer::new(Arc::new(MemoryCredentialStore::new()), "chartroom-config");
//! let fetcher = Arc::new(HttpIndexFetcher::new(materializer.clone(), true));
//!
//! let resolver = RepositoryResolver::new(repos, fetcher);
//! let resolution = resolver
//!     .resolve("http://localhost:8080/charts/mariadb-7.3.5.tgz", "default", None)
//!     .await?;
//!
//! let mut staged = StagedFiles::new(true);
//! let bundle = materializer
//!     .materialize(&resolution.repository.connection_config(), &mut staged)
//!     .await?;
//! # let _ = bundle;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod http;
pub mod index;
pub mod loader;
pub mod resolver;
pub mod staging;

pub use config::{
    CaConfig, ConnectionConfig, MemoryRepositoryStore, RepositoryRecord, RepositoryScope,
    RepositoryStore, TlsClientConfig,
};
pub use credentials::{
    CredentialBundle, CredentialMaterializer, CredentialStore, MemoryCredentialStore,
};
pub use error::{RepoError, Result};
pub use http::{HttpIndexFetcher, IndexFetcher, RepoHttpClient};
pub use index::{IndexEntry, RepositoryIndex};
pub use loader::{HttpPackageLoader, LocateRequest, PackageLoader};
pub use resolver::{RepositoryRef, RepositoryResolver, Resolution, Strategy};
pub use staging::StagedFiles;
