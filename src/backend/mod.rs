//! Backing stores
//!
//! A backend holds the store document plus a small file area, and provides the
//! begin/commit/discard envelope. [`GitStore`] is the durable, branch-addressable
//! implementation; [`MemoryStore`] keeps everything in process.

pub mod git;
pub mod memory;

pub use git::GitStore;
pub use memory::MemoryStore;

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::model::StoreDocument;

/// Branch used when a store URL has no `#branch` suffix
pub const DEFAULT_BRANCH: &str = "master";

/// Durable storage behind a store connection
pub trait StoreBackend {
    /// Read the whole store document
    fn read_document(&self) -> Result<StoreDocument>;

    /// Replace the store document.
    ///
    /// Outside a transaction the write is made durable immediately with `message`.
    fn write_document(&mut self, document: &StoreDocument, message: &str) -> Result<()>;

    /// Read a file from the file area
    fn read_file(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a file to the file area
    fn write_file(&mut self, key: &str, content: &[u8]) -> Result<()>;

    fn begin_transaction(&mut self) -> Result<()>;

    fn commit_transaction(&mut self, message: &str) -> Result<()>;

    fn discard_transaction(&mut self) -> Result<()>;

    fn in_transaction(&self) -> bool;

    /// Schema version recorded in the store
    fn schema_version(&self) -> Result<String> {
        Ok(self.read_document()?.schema_version)
    }
}

/// Where a store lives, resolved from a configured URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLocation {
    /// Working directory of the store
    pub path: PathBuf,
    /// Remote repository, `None` for a purely local store
    pub remote: Option<String>,
    pub branch: String,
}

impl StoreLocation {
    /// Resolve a configured URL of the form `<url-or-path>[#branch]`.
    ///
    /// Absolute paths are used in place; remote URLs are checked out into `local_path`.
    pub fn resolve(url: &str, local_path: &Path) -> Self {
        let (base, branch) = match url.rsplit_once('#') {
            Some((base, branch)) if !branch.is_empty() => (base, branch.to_string()),
            _ => (url, DEFAULT_BRANCH.to_string()),
        };
        if Path::new(base).is_absolute() {
            Self {
                path: PathBuf::from(base),
                remote: None,
                branch,
            }
        } else {
            Self {
                path: local_path.to_path_buf(),
                remote: Some(base.to_string()),
                branch,
            }
        }
    }
}

/// Opens a backend for a resolved location
pub trait StoreOpener {
    fn open(&self, location: &StoreLocation) -> Result<Box<dyn StoreBackend>>;
}

/// Opens git-backed stores
#[derive(Debug, Default, Clone, Copy)]
pub struct GitStoreOpener;

impl StoreOpener for GitStoreOpener {
    fn open(&self, location: &StoreLocation) -> Result<Box<dyn StoreBackend>> {
        Ok(Box::new(GitStore::open(location)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_remote_with_branch() {
        let loc = StoreLocation::resolve(
            "git@github.com:org/cauldron.git#develop",
            Path::new("/tmp/c"),
        );
        assert_eq!(loc.remote.as_deref(), Some("git@github.com:org/cauldron.git"));
        assert_eq!(loc.branch, "develop");
        assert_eq!(loc.path, PathBuf::from("/tmp/c"));
    }

    #[test]
    fn test_resolve_defaults_to_master() {
        let loc = StoreLocation::resolve("https://host/org/cauldron.git", Path::new("/tmp/c"));
        assert_eq!(loc.branch, DEFAULT_BRANCH);
    }

    #[test]
    fn test_resolve_absolute_path_is_local() {
        let loc = StoreLocation::resolve("/srv/cauldron#main", Path::new("/tmp/c"));
        assert_eq!(loc.remote, None);
        assert_eq!(loc.path, PathBuf::from("/srv/cauldron"));
        assert_eq!(loc.branch, "main");
    }
}
