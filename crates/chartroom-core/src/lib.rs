//! Chartroom Core - shared types for repository-hosted packages
//!
//! This crate provides the foundational types used throughout Chartroom:
//! - `PackageMetadata`: The `Chart.yaml` descriptor of a package
//! - `PackageArchive`: A package loaded from a `.tgz` archive
//! - `Values`: Configuration values with deep merge support
//! - `ChartInfo`: Name/version parsed from a package archive URL
//! - `Settings`: Process-wide loader settings, passed explicitly

pub mod archive;
pub mod chart_ref;
pub mod error;
pub mod package;
pub mod settings;
pub mod values;

pub use archive::{PackageArchive, create_archive, load_archive, load_archive_bytes};
pub use chart_ref::ChartInfo;
pub use error::{CoreError, Result};
pub use package::{CHART_URL_ANNOTATION, Dependency, Maintainer, PackageMetadata};
pub use settings::Settings;
pub use values::Values;
