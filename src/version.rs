//! Container versioning utilities

use semver::Version;
use std::fmt;

use crate::error::{Result, StoreError};

/// Version given to the first container generated for a descriptor
pub const DEFAULT_CONTAINER_VERSION: &str = "1.0.0";

/// A semantic container version
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ContainerVersion {
    pub version: Version,
}

impl ContainerVersion {
    pub fn new(version: Version) -> Self {
        Self { version }
    }

    /// Parse a version string, tolerating a leading `v`
    pub fn parse(version_str: &str) -> Result<Self> {
        let trimmed = version_str.strip_prefix('v').unwrap_or(version_str);
        Version::parse(trimmed)
            .map(Self::new)
            .map_err(|_| StoreError::VersionFormat {
                version: version_str.to_string(),
            })
    }

    /// Bump patch version. A prerelease is promoted to its release instead.
    pub fn bump_patch(&self) -> Self {
        let Version { major, minor, patch, .. } = self.version;
        if self.version.pre.is_empty() {
            Self::new(Version::new(major, minor, patch + 1))
        } else {
            Self::new(Version::new(major, minor, patch))
        }
    }
}

impl fmt::Display for ContainerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version)
    }
}

/// Compute the next container version.
///
/// An explicit version is returned verbatim. Otherwise the prior version is
/// patch incremented, or [`DEFAULT_CONTAINER_VERSION`] is used when there is none.
pub fn next_container_version(explicit: Option<&str>, prior: Option<&str>) -> Result<String> {
    if let Some(explicit) = explicit {
        return Ok(explicit.to_string());
    }
    match prior {
        Some(prior) => Ok(ContainerVersion::parse(prior)?.bump_patch().to_string()),
        None => Ok(DEFAULT_CONTAINER_VERSION.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        let v = ContainerVersion::parse("1.2.3").unwrap();
        assert_eq!(v.to_string(), "1.2.3");
        let v = ContainerVersion::parse("v1.2.3").unwrap();
        assert_eq!(v.to_string(), "1.2.3");
    }

    #[test]
    fn test_version_bumps() {
        let v = ContainerVersion::parse("1.2.3").unwrap();
        assert_eq!(v.bump_patch().to_string(), "1.2.4");
        let v = ContainerVersion::parse("1.2.3+build.7").unwrap();
        assert_eq!(v.bump_patch().to_string(), "1.2.4");
    }

    #[test]
    fn test_prerelease_is_promoted_to_release() {
        assert_eq!(next_container_version(None, Some("1.2.3-beta.1")).unwrap(), "1.2.3");
        assert_eq!(next_container_version(None, Some("v2.0.0-rc.2")).unwrap(), "2.0.0");
    }

    #[test]
    fn test_next_version_increments_patch() {
        assert_eq!(next_container_version(None, Some("2.3.1")).unwrap(), "2.3.2");
    }

    #[test]
    fn test_next_version_defaults() {
        assert_eq!(next_container_version(None, None).unwrap(), "1.0.0");
    }

    #[test]
    fn test_explicit_version_is_verbatim() {
        assert_eq!(
            next_container_version(Some("0.0.1-rc"), Some("9.9.9")).unwrap(),
            "0.0.1-rc"
        );
    }

    #[test]
    fn test_non_semver_prior_fails() {
        let err = next_container_version(None, Some("v1")).unwrap_err();
        assert!(matches!(err, StoreError::VersionFormat { ref version } if version == "v1"));
    }
}
