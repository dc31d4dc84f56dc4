//! Package name and version parsed from an archive URL

use std::fmt;

/// Name and version taken from the final path segment of a package URL
///
/// `http://localhost:8080/charts/mariadb-7.3.5.tgz` parses to
/// `mariadb` / `7.3.5`. The split happens at the first `-` followed by a
/// digit, so a name that itself contains such a boundary (`k8s-3scale`)
/// splits early.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ChartInfo {
    pub name: String,
    pub version: String,
}

impl ChartInfo {
    /// Parse from a full URL (query and fragment are ignored)
    pub fn from_url(url: &str) -> Self {
        let path = url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_end_matches('/');
        let segment = path.rsplit('/').next().unwrap_or(path);
        Self::parse_segment(segment)
    }

    /// Parse a single file name such as `influxdb-3.0.2.tgz`
    pub fn parse_segment(segment: &str) -> Self {
        let stem = segment
            .strip_suffix(".tgz")
            .or_else(|| segment.strip_suffix(".tar.gz"))
            .unwrap_or(segment);

        let bytes = stem.as_bytes();
        let boundary = bytes
            .windows(2)
            .position(|w| w[0] == b'-' && w[1].is_ascii_digit());

        match boundary {
            Some(idx) => Self {
                name: stem[..idx].to_string(),
                version: stem[idx + 1..].to_string(),
            },
            None => Self {
                name: stem.to_string(),
                version: String::new(),
            },
        }
    }

    /// Whether a version was present in the segment
    pub fn has_version(&self) -> bool {
        !self.version.is_empty()
    }
}

impl fmt::Display for ChartInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}-{}", self.name, self.version)
        }
    }
}
