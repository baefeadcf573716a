//! Dependency references
//!
//! A package path identifies a distributable module by registry name, git
//! location or local directory. Parsing runs a fixed precedence cascade and
//! yields a tagged [`PackageSource`]; the `is_*_path` predicates are plain
//! matches on that variant.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::{Result, StoreError};

static GITHUB_SSH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^git@[^:]+:[^/]+/.+\.git(#.+)?$").unwrap());
static GIT_SSH_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(git\+ssh://.+)#(.+)$").unwrap());
static GIT_HTTPS_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(https://.+)#(.+)$").unwrap());
static GIT_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(git\+ssh|https)://.+$").unwrap());
static FILE_WITH_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^file:(.+)$").unwrap());
static FILE_ABSOLUTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(/.+)$").unwrap());
static FILE_WINDOWS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-zA-Z]:\\[\\\S|*\S]?.*)$").unwrap());
static FILE_HOME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^~/(.+)$").unwrap());
static REGISTRY_VERSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.+)@(.+)$").unwrap());

/// Where a package comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    /// `name[@version]`
    Registry {
        name: String,
        version: Option<String>,
    },
    /// `git+ssh://...[#ref]` or `https://...[#ref]`
    Git {
        url: String,
        reference: Option<String>,
    },
    /// Local directory; name and version come from its `package.json`
    File {
        path: PathBuf,
        name: Option<String>,
        version: Option<String>,
    },
}

/// A parsed dependency reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagePath {
    full_path: String,
    source: PackageSource,
}

#[derive(Deserialize)]
struct PackageManifest {
    name: Option<String>,
    version: Option<String>,
}

impl PackagePath {
    /// Parse a dependency reference.
    ///
    /// Only fails for file paths whose target has no readable `package.json`.
    pub fn parse(path: &str) -> Result<Self> {
        let full_path = if GITHUB_SSH.is_match(path) {
            format!("git+ssh://{}", path.replacen(':', "/", 1))
        } else {
            path.to_string()
        };

        let source = if let Some(caps) = GIT_SSH_VERSION
            .captures(&full_path)
            .or_else(|| GIT_HTTPS_VERSION.captures(&full_path))
        {
            PackageSource::Git {
                url: caps[1].to_string(),
                reference: Some(caps[2].to_string()),
            }
        } else if GIT_BARE.is_match(&full_path) {
            PackageSource::Git {
                url: full_path.clone(),
                reference: None,
            }
        } else if let Some(caps) = FILE_WITH_PREFIX
            .captures(&full_path)
            .or_else(|| FILE_ABSOLUTE.captures(&full_path))
            .or_else(|| FILE_WINDOWS.captures(&full_path))
        {
            Self::file_source(PathBuf::from(&caps[1]))?
        } else if let Some(caps) = FILE_HOME.captures(&full_path) {
            Self::file_source(expand_home(&caps[1]))?
        } else if let Some(caps) = REGISTRY_VERSION.captures(&full_path) {
            PackageSource::Registry {
                name: caps[1].to_string(),
                version: Some(caps[2].to_string()),
            }
        } else {
            PackageSource::Registry {
                name: full_path.clone(),
                version: None,
            }
        };

        Ok(Self { full_path, source })
    }

    /// Build a registry path from a name and optional version
    pub fn registry(name: impl Into<String>, version: Option<&str>) -> Self {
        let name = name.into();
        let full_path = match version {
            Some(v) => format!("{}@{}", name, v),
            None => name.clone(),
        };
        Self {
            full_path,
            source: PackageSource::Registry {
                name,
                version: version.map(String::from),
            },
        }
    }

    fn file_source(path: PathBuf) -> Result<PackageSource> {
        let manifest_path = path.join("package.json");
        let content = fs::read_to_string(&manifest_path).map_err(|e| StoreError::ManifestRead {
            path: manifest_path.clone(),
            reason: e.to_string(),
        })?;
        let manifest: PackageManifest =
            serde_json::from_str(&content).map_err(|e| StoreError::ManifestRead {
                path: manifest_path,
                reason: e.to_string(),
            })?;
        Ok(PackageSource::File {
            path,
            name: manifest.name,
            version: manifest.version,
        })
    }

    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    pub fn source(&self) -> &PackageSource {
        &self.source
    }

    /// Path without version: registry name, git url without ref, or directory
    pub fn base_path(&self) -> String {
        match &self.source {
            PackageSource::Registry { name, .. } => name.clone(),
            PackageSource::Git { url, .. } => url.clone(),
            PackageSource::File { path, .. } => path.display().to_string(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match &self.source {
            PackageSource::Registry { name, .. } => Some(name),
            PackageSource::Git { .. } => None,
            PackageSource::File { name, .. } => name.as_deref(),
        }
    }

    /// Registry version, git ref, or manifest version
    pub fn version(&self) -> Option<&str> {
        match &self.source {
            PackageSource::Registry { version, .. } | PackageSource::File { version, .. } => {
                version.as_deref()
            }
            PackageSource::Git { reference, .. } => reference.as_deref(),
        }
    }

    pub fn is_git_path(&self) -> bool {
        matches!(self.source, PackageSource::Git { .. })
    }

    pub fn is_file_path(&self) -> bool {
        matches!(self.source, PackageSource::File { .. })
    }

    pub fn is_registry_path(&self) -> bool {
        matches!(self.source, PackageSource::Registry { .. })
    }

    /// Compare base paths and, unless ignored, versions
    pub fn same(&self, other: &PackagePath, ignore_version: bool) -> bool {
        self.base_path() == other.base_path()
            && (ignore_version || self.version() == other.version())
    }
}

fn expand_home(rest: &str) -> PathBuf {
    match directories::BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => Path::new("~").join(rest),
    }
}

impl fmt::Display for PackagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_path)
    }
}

impl std::str::FromStr for PackagePath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_registry_with_version() {
        let p = PackagePath::parse("react-native@0.72.4").unwrap();
        assert_eq!(p.base_path(), "react-native");
        assert_eq!(p.name(), Some("react-native"));
        assert_eq!(p.version(), Some("0.72.4"));
        assert!(p.is_registry_path());
    }

    #[test]
    fn test_scoped_registry() {
        let p = PackagePath::parse("@walmart/cart-api@1.2.3").unwrap();
        assert_eq!(p.base_path(), "@walmart/cart-api");
        assert_eq!(p.version(), Some("1.2.3"));

        let p = PackagePath::parse("@walmart/cart-api").unwrap();
        assert_eq!(p.base_path(), "@walmart/cart-api");
        assert_eq!(p.version(), None);
        assert!(p.is_registry_path());
    }

    #[test]
    fn test_git_ssh_with_branch() {
        let p = PackagePath::parse("git+ssh://github.com/org/repo#develop").unwrap();
        assert_eq!(p.base_path(), "git+ssh://github.com/org/repo");
        assert_eq!(p.version(), Some("develop"));
        assert!(p.is_git_path());
        assert_eq!(p.name(), None);
    }

    #[test]
    fn test_git_https() {
        let p = PackagePath::parse("https://github.com/org/repo.git#v1.0.0").unwrap();
        assert_eq!(p.base_path(), "https://github.com/org/repo.git");
        assert_eq!(p.version(), Some("v1.0.0"));

        let p = PackagePath::parse("https://github.com/org/repo.git").unwrap();
        assert_eq!(p.base_path(), "https://github.com/org/repo.git");
        assert_eq!(p.version(), None);
        assert!(p.is_git_path());
    }

    #[test]
    fn test_github_shorthand_is_rewritten() {
        let p = PackagePath::parse("git@github.com:org/repo.git#main").unwrap();
        assert_eq!(p.full_path(), "git+ssh://git@github.com/org/repo.git#main");
        assert_eq!(p.base_path(), "git+ssh://git@github.com/org/repo.git");
        assert_eq!(p.version(), Some("main"));
        assert!(p.is_git_path());
    }

    #[test]
    fn test_file_path_reads_manifest() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"name": "my-miniapp", "version": "2.1.0"}"#,
        )
        .unwrap();

        let raw = format!("file:{}", dir.path().display());
        let p = PackagePath::parse(&raw).unwrap();
        assert!(p.is_file_path());
        assert_eq!(p.name(), Some("my-miniapp"));
        assert_eq!(p.version(), Some("2.1.0"));
        assert_eq!(p.base_path(), dir.path().display().to_string());

        let absolute = PackagePath::parse(&dir.path().display().to_string()).unwrap();
        assert!(absolute.is_file_path());
        assert!(absolute.same(&p, false));
    }

    #[test]
    fn test_file_path_without_manifest_fails() {
        let dir = tempdir().unwrap();
        let err = PackagePath::parse(&format!("file:{}", dir.path().display())).unwrap_err();
        assert!(matches!(err, StoreError::ManifestRead { .. }));
    }

    #[test]
    fn test_same_ignores_version_on_request() {
        let a = PackagePath::parse("foo@1.0.0").unwrap();
        let b = PackagePath::parse("foo@2.0.0").unwrap();
        assert!(!a.same(&b, false));
        assert!(a.same(&b, true));
    }
}
