//! Package archive loading and creation
//!
//! Archives are `.tgz` files with a single top-level directory named after
//! the package:
//!
//! ```text
//! mariadb/Chart.yaml
//! mariadb/values.yaml
//! mariadb/templates/*
//! mariadb/charts/<dependency>/...   (unpacked sub-package)
//! mariadb/charts/<dependency>.tgz   (packed sub-package)
//! ```

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, Header};
use walkdir::WalkDir;

use crate::error::{CoreError, Result};
use crate::package::PackageMetadata;
use crate::values::Values;

const CHART_FILE: &str = "Chart.yaml";
const VALUES_FILE: &str = "values.yaml";

/// A package loaded into memory
#[derive(Debug, Clone, PartialEq)]
pub struct PackageArchive {
    /// Parsed `Chart.yaml`
    pub metadata: PackageMetadata,

    /// Default values from `values.yaml`
    pub values: Values,

    /// Template files keyed by path relative to the package root
    pub templates: BTreeMap<String, Vec<u8>>,

    /// Bundled sub-packages from `charts/`
    pub dependencies: Vec<PackageArchive>,

    /// SHA256 digest of the archive bytes (only for packages read from an archive)
    pub digest: Option<String>,
}

impl PackageArchive {
    /// Create an archive-less package (values-only, no templates)
    pub fn new(metadata: PackageMetadata) -> Self {
        Self {
            metadata,
            values: Values::new(),
            templates: BTreeMap::new(),
            dependencies: Vec::new(),
            digest: None,
        }
    }

    /// Package name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Package version
    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    /// Names of bundled sub-packages
    pub fn bundled_names(&self) -> Vec<&str> {
        self.dependencies.iter().map(|d| d.name()).collect()
    }
}

/// Load a package from a `.tgz` file on disk
pub fn load_archive(path: &Path) -> Result<PackageArchive> {
    if !path.exists() {
        return Err(CoreError::PackageNotFound {
            path: path.display().to_string(),
        });
    }
    let data = std::fs::read(path)?;
    load_archive_bytes(&data)
}

/// Load a package from in-memory `.tgz` bytes
pub fn load_archive_bytes(data: &[u8]) -> Result<PackageArchive> {
    let files = read_all_files(data)?;

    let root = files
        .keys()
        .filter_map(|path| path.strip_suffix(CHART_FILE))
        .filter(|prefix| prefix.matches('/').count() == 1)
        .min_by_key(|prefix| prefix.len())
        .map(str::to_string)
        .ok_or_else(|| CoreError::Archive {
            message: format!("{} file is missing", CHART_FILE),
        })?;

    let mut package = build_package(&root, &files)?;
    package.digest = Some(hex::encode(Sha256::digest(data)));
    Ok(package)
}

/// Read every regular file of a gzipped tarball in a single pass
fn read_all_files(data: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
    let decoder = GzDecoder::new(data);
    let mut archive = Archive::new(decoder);
    let mut contents = BTreeMap::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_dir() {
            continue;
        }

        let path = entry.path()?.to_string_lossy().to_string();
        let path = path.trim_start_matches("./").to_string();
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        contents.insert(path, buf);
    }

    Ok(contents)
}

/// Assemble a package from the files under `prefix` (which ends in `/`)
fn build_package(prefix: &str, files: &BTreeMap<String, Vec<u8>>) -> Result<PackageArchive> {
    let chart_yaml = files
        .get(&format!("{}{}", prefix, CHART_FILE))
        .ok_or_else(|| CoreError::Archive {
            message: format!("{} file is missing under {}", CHART_FILE, prefix),
        })?;
    let metadata = PackageMetadata::from_yaml(&utf8(chart_yaml, CHART_FILE)?)?;

    let values = match files.get(&format!("{}{}", prefix, VALUES_FILE)) {
        Some(raw) => Values::from_yaml(&utf8(raw, VALUES_FILE)?)?,
        None => Values::new(),
    };

    let mut templates = BTreeMap::new();
    let mut unpacked_subcharts = Vec::new();
    let mut dependencies = Vec::new();

    let charts_prefix = format!("{}charts/", prefix);
    for (path, data) in files.range(prefix.to_string()..) {
        let Some(rel) = path.strip_prefix(prefix) else {
            break;
        };

        if rel.starts_with("templates/") {
            templates.insert(rel.to_string(), data.clone());
        } else if let Some(sub) = path.strip_prefix(&charts_prefix) {
            match sub.split_once('/') {
                Some((dir, CHART_FILE)) => unpacked_subcharts.push(dir.to_string()),
                None if sub.ends_with(".tgz") => dependencies.push(load_archive_bytes(data)?),
                _ => {}
            }
        }
    }

    for dir in unpacked_subcharts {
        dependencies.push(build_package(&format!("{}{}/", charts_prefix, dir), files)?);
    }

    Ok(PackageArchive {
        metadata,
        values,
        templates,
        dependencies,
        digest: None,
    })
}

fn utf8(data: &[u8], what: &str) -> Result<String> {
    String::from_utf8(data.to_vec()).map_err(|e| CoreError::Archive {
        message: format!("Invalid UTF-8 in {}: {}", what, e),
    })
}

/// Create a `.tgz` archive from a package directory
///
/// The directory must contain a `Chart.yaml`; entries are stored under a
/// top-level directory named after the package. Timestamps are zeroed so the
/// same directory always produces the same bytes.
pub fn create_archive(dir: &Path, output: &Path) -> Result<PathBuf> {
    let chart_yaml = std::fs::read_to_string(dir.join(CHART_FILE)).map_err(|_| {
        CoreError::PackageNotFound {
            path: dir.display().to_string(),
        }
    })?;
    let metadata = PackageMetadata::from_yaml(&chart_yaml)?;

    let file = File::create(output)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| CoreError::Archive {
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let content = std::fs::read(entry.path())?;
        add_bytes_to_archive(&mut builder, &format!("{}/{}", metadata.name, rel), &content)?;
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?;

    Ok(output.to_path_buf())
}

fn add_bytes_to_archive<W: Write>(
    builder: &mut Builder<W>,
    archive_path: &str,
    content: &[u8],
) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();

    builder.append_data(&mut header, archive_path, content)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_package(dir: &Path, name: &str, version: &str) {
        std::fs::create_dir_all(dir.join("templates")).unwrap();
        std::fs::write(
            dir.join("Chart.yaml"),
            format!("apiVersion: v2\nname: {}\nversion: {}\n", name, version),
        )
        .unwrap();
        std::fs::write(dir.join("values.yaml"), "replicas: 3\n").unwrap();
        std::fs::write(
            dir.join("templates").join("deployment.yaml"),
            "apiVersion: apps/v1\nkind: Deployment\n",
        )
        .unwrap();
    }

    #[test]
    fn test_create_and_load_archive() {
        let temp = TempDir::new().unwrap();
        let pkg_dir = temp.path().join("src");
        write_package(&pkg_dir, "mariadb", "7.3.5");

        let archive_path = temp.path().join("mariadb-7.3.5.tgz");
        create_archive(&pkg_dir, &archive_path).unwrap();

        let package = load_archive(&archive_path).unwrap();
        assert_eq!(package.name(), "mariadb");
        assert_eq!(package.version(), "7.3.5");
        assert_eq!(package.values.get("replicas"), Some(&serde_json::json!(3)));
        assert!(package.templates.contains_key("templates/deployment.yaml"));
        assert!(package.dependencies.is_empty());
        assert_eq!(package.digest.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn test_archive_is_reproducible() {
        let temp = TempDir::new().unwrap();
        let pkg_dir = temp.path().join("src");
        write_package(&pkg_dir, "influxdb", "3.0.2");

        let first = create_archive(&pkg_dir, &temp.path().join("a.tgz")).unwrap();
        let second = create_archive(&pkg_dir, &temp.path().join("b.tgz")).unwrap();

        assert_eq!(std::fs::read(first).unwrap(), std::fs::read(second).unwrap());
    }

    #[test]
    fn test_load_bundled_dependencies() {
        let temp = TempDir::new().unwrap();
        let pkg_dir = temp.path().join("src");
        write_package(&pkg_dir, "wildfly", "1.0.0");
        write_package(&pkg_dir.join("charts").join("common"), "wildfly-common", "1.0.0");

        let packed_dir = temp.path().join("packed");
        write_package(&packed_dir, "postgres", "12.0.0");
        create_archive(
            &packed_dir,
            &pkg_dir.join("charts").join("postgres-12.0.0.tgz"),
        )
        .unwrap();

        let archive_path = temp.path().join("wildfly-1.0.0.tgz");
        create_archive(&pkg_dir, &archive_path).unwrap();

        let package = load_archive(&archive_path).unwrap();
        let mut names = package.bundled_names();
        names.sort();
        assert_eq!(names, vec!["postgres", "wildfly-common"]);
        assert!(!package.templates.keys().any(|k| k.contains("charts/")));
    }

    #[test]
    fn test_missing_chart_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty.tgz");
        {
            let file = File::create(&path).unwrap();
            let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
            add_bytes_to_archive(&mut builder, "thing/values.yaml", b"a: 1\n").unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let err = load_archive(&path).unwrap_err();
        assert!(matches!(err, CoreError::Archive { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = load_archive(Path::new("/nonexistent/invalid.tgz")).unwrap_err();
        assert!(matches!(err, CoreError::PackageNotFound { .. }));
    }
}
