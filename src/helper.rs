//! Store session
//!
//! [`StoreHelper`] owns one backend connection, enforces the single open
//! transaction rule, and exposes the descriptor-level operations used by the
//! sync orchestrator and the validation checks.

use std::fmt;
use std::fs;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::StoreBackend;
use crate::checksum::Checksum;
use crate::descriptor::AppVersionDescriptor;
use crate::error::{Result, StoreError, TransactionError};
use crate::model::{NativeAppVersion, StoreDocument};
use crate::package_path::PackagePath;
use crate::version::next_container_version;

/// Per-descriptor flag: track container versions per version instead of per platform
pub const DETACH_CONTAINER_VERSION_KEY: &str = "detachContainerVersionFromRoot";
/// Semver range the client must satisfy to use the store
pub const REQUIRED_CLIENT_VERSION_KEY: &str = "requiredClientVersion";
pub const COMPOSITE_GENERATOR_KEY: &str = "compositeGenerator";
pub const SOURCE_MAP_STORE_KEY: &str = "sourceMapStore";
pub const CRASH_REPORTING_KEY: &str = "crashReporting";

/// Configuration keys the store understands
pub const KNOWN_CONFIG_KEYS: &[&str] = &[
    DETACH_CONTAINER_VERSION_KEY,
    REQUIRED_CLIENT_VERSION_KEY,
    COMPOSITE_GENERATOR_KEY,
    SOURCE_MAP_STORE_KEY,
    CRASH_REPORTING_KEY,
];

/// File area holding lock files
const LOCKS_AREA: &str = "locks";

/// A commit message built from one or more lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitMessage(Vec<String>);

impl CommitMessage {
    pub fn new(summary: impl Into<String>) -> Self {
        Self(vec![summary.into()])
    }

    /// Append an itemized line
    pub fn push(&mut self, line: impl Into<String>) {
        self.0.push(line.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for CommitMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("\n"))
    }
}

impl From<&str> for CommitMessage {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CommitMessage {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<Vec<String>> for CommitMessage {
    fn from(lines: Vec<String>) -> Self {
        Self(lines)
    }
}

/// Base composite and extra dependencies used to generate composites
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeGeneratorConfig {
    #[serde(default)]
    pub base_composite: Option<String>,
    #[serde(default)]
    pub resolutions: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMapStoreConfig {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashReportingConfig {
    pub api_key: String,
}

/// Session over one store connection
pub struct StoreHelper {
    key: String,
    backend: Box<dyn StoreBackend>,
    transaction_open: bool,
}

impl StoreHelper {
    pub fn new(key: impl Into<String>, backend: Box<dyn StoreBackend>) -> Self {
        Self {
            key: key.into(),
            backend,
            transaction_open: false,
        }
    }

    /// Key of the store this session is connected to
    pub fn key(&self) -> &str {
        &self.key
    }

    // --- Transactions ---

    pub fn begin_transaction(&mut self) -> Result<()> {
        if self.transaction_open {
            return Err(TransactionError::AlreadyOpen.into());
        }
        self.backend.begin_transaction()?;
        self.transaction_open = true;
        debug!(store = %self.key, "began transaction");
        Ok(())
    }

    pub fn commit_transaction(&mut self, message: impl Into<CommitMessage>) -> Result<()> {
        if !self.transaction_open {
            return Err(TransactionError::NotOpen.into());
        }
        let message = message.into();
        self.backend.commit_transaction(&message.to_string())?;
        self.transaction_open = false;
        let summary = message.lines().first().cloned().unwrap_or_default();
        info!(store = %self.key, summary = %summary, "committed transaction");
        Ok(())
    }

    /// Discard the open transaction. A no-op when none is open.
    pub fn discard_transaction(&mut self) -> Result<()> {
        if !self.transaction_open {
            debug!(store = %self.key, "no open transaction to discard");
            return Ok(());
        }
        self.transaction_open = false;
        self.backend.discard_transaction()?;
        warn!(store = %self.key, "discarded transaction");
        Ok(())
    }

    pub fn has_open_transaction(&self) -> bool {
        self.transaction_open
    }

    // --- Document access ---

    pub fn document(&self) -> Result<StoreDocument> {
        self.backend.read_document()
    }

    pub fn schema_version(&self) -> Result<String> {
        self.backend.schema_version()
    }

    fn update<T>(
        &mut self,
        message: &str,
        f: impl FnOnce(&mut StoreDocument) -> Result<T>,
    ) -> Result<T> {
        let mut document = self.backend.read_document()?;
        let result = f(&mut document)?;
        self.backend.write_document(&document, message)?;
        Ok(result)
    }

    fn update_version<T>(
        &mut self,
        descriptor: &AppVersionDescriptor,
        message: &str,
        f: impl FnOnce(&mut NativeAppVersion) -> Result<T>,
    ) -> Result<T> {
        self.update(message, |doc| f(doc.version_mut(descriptor)?))
    }

    /// The record of a complete descriptor
    pub fn native_app_version(
        &self,
        descriptor: &AppVersionDescriptor,
    ) -> Result<NativeAppVersion> {
        Ok(self.document()?.version(descriptor)?.clone())
    }

    /// Names of all native applications in the store
    pub fn native_apps(&self) -> Result<Vec<String>> {
        Ok(self.document()?.native_apps.into_iter().map(|a| a.name).collect())
    }

    pub fn is_descriptor_in_store(&self, descriptor: &AppVersionDescriptor) -> Result<bool> {
        Ok(self.document()?.contains(descriptor))
    }

    /// All complete descriptors matching an optional filter
    pub fn descriptors(
        &self,
        filter: Option<&AppVersionDescriptor>,
    ) -> Result<Vec<AppVersionDescriptor>> {
        Ok(self.document()?.descriptors(filter))
    }

    pub fn add_descriptor(&mut self, descriptor: &AppVersionDescriptor) -> Result<bool> {
        let message = format!("Add {} native application version", descriptor);
        self.update(&message, |doc| doc.insert_descriptor(descriptor))
    }

    pub fn set_released(
        &mut self,
        descriptor: &AppVersionDescriptor,
        released: bool,
    ) -> Result<()> {
        let message = format!("Set {} released flag to {}", descriptor, released);
        self.update_version(descriptor, &message, |v| {
            v.is_released = released;
            Ok(())
        })
    }

    // --- Configuration ---

    pub fn config_for_key(
        &self,
        key: &str,
        descriptor: Option<&AppVersionDescriptor>,
    ) -> Result<Option<Value>> {
        Ok(self.document()?.config_for_key(key, descriptor).cloned())
    }

    fn typed_config<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
        descriptor: Option<&AppVersionDescriptor>,
    ) -> Result<Option<T>> {
        match self.config_for_key(key, descriptor)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Boolean configuration flag, `false` when absent
    pub fn config_flag(
        &self,
        key: &str,
        descriptor: Option<&AppVersionDescriptor>,
    ) -> Result<bool> {
        Ok(self
            .config_for_key(key, descriptor)?
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    pub fn required_client_version(&self) -> Result<Option<String>> {
        self.typed_config(REQUIRED_CLIENT_VERSION_KEY, None)
    }

    pub fn composite_generator_config(
        &self,
        descriptor: &AppVersionDescriptor,
    ) -> Result<Option<CompositeGeneratorConfig>> {
        self.typed_config(COMPOSITE_GENERATOR_KEY, Some(descriptor))
    }

    pub fn source_map_store_config(&self) -> Result<Option<SourceMapStoreConfig>> {
        self.typed_config(SOURCE_MAP_STORE_KEY, None)
    }

    pub fn crash_report_config(
        &self,
        descriptor: &AppVersionDescriptor,
    ) -> Result<Option<CrashReportingConfig>> {
        self.typed_config(CRASH_REPORTING_KEY, Some(descriptor))
    }

    // --- Container versions ---

    pub fn container_version(&self, descriptor: &AppVersionDescriptor) -> Result<Option<String>> {
        Ok(self.document()?.version(descriptor)?.container_version.clone())
    }

    /// Container version shared at the platform level
    pub fn top_level_container_version(
        &self,
        descriptor: &AppVersionDescriptor,
    ) -> Result<Option<String>> {
        Ok(self
            .document()?
            .find_platform(descriptor)
            .and_then(|p| p.container_version.clone()))
    }

    /// Record a new container version, also at the platform level unless detached
    pub fn update_container_version(
        &mut self,
        descriptor: &AppVersionDescriptor,
        version: &str,
    ) -> Result<()> {
        let detached = self.config_flag(DETACH_CONTAINER_VERSION_KEY, Some(descriptor))?;
        let message = format!("Update container version of {} to {}", descriptor, version);
        self.update(&message, |doc| {
            doc.version_mut(descriptor)?.container_version = Some(version.to_string());
            if !detached {
                doc.platform_mut(descriptor)?.container_version = Some(version.to_string());
            }
            Ok(())
        })
    }

    /// Record the client version that generated the container
    pub fn update_container_generator_version(
        &mut self,
        descriptor: &AppVersionDescriptor,
        version: &str,
    ) -> Result<()> {
        let message = format!(
            "Update container generator version of {} to {}",
            descriptor, version
        );
        self.update_version(descriptor, &message, |v| {
            v.container.generator_version = Some(version.to_string());
            v.container.generated_at = Some(Utc::now());
            Ok(())
        })
    }

    /// Compute the version of the next container for `descriptor`.
    ///
    /// `explicit` is used verbatim. Otherwise the prior version (per-descriptor
    /// when detached, platform-level otherwise) is patch incremented.
    pub fn next_container_version(
        &self,
        descriptor: &AppVersionDescriptor,
        explicit: Option<&str>,
    ) -> Result<String> {
        if explicit.is_some() {
            return next_container_version(explicit, None);
        }
        let prior = if self.config_flag(DETACH_CONTAINER_VERSION_KEY, Some(descriptor))? {
            self.container_version(descriptor)?
        } else {
            self.top_level_container_version(descriptor)?
        };
        next_container_version(None, prior.as_deref())
    }

    // --- Native dependencies ---

    pub fn native_dependencies(
        &self,
        descriptor: &AppVersionDescriptor,
    ) -> Result<Vec<PackagePath>> {
        parse_all(&self.document()?.version(descriptor)?.container.native_deps)
    }

    pub fn set_native_dependencies_in_container(
        &mut self,
        descriptor: &AppVersionDescriptor,
        dependencies: &[PackagePath],
    ) -> Result<()> {
        let message = format!("Set native dependencies of {}", descriptor);
        self.update_version(descriptor, &message, |v| {
            v.container.native_deps = dependencies.iter().map(|d| d.to_string()).collect();
            Ok(())
        })
    }

    pub fn container_native_dependency(
        &self,
        descriptor: &AppVersionDescriptor,
        base_path: &str,
    ) -> Result<Option<PackagePath>> {
        Ok(self
            .native_dependencies(descriptor)?
            .into_iter()
            .find(|d| d.base_path() == base_path))
    }

    pub fn add_container_native_dependency(
        &mut self,
        descriptor: &AppVersionDescriptor,
        dependency: &PackagePath,
    ) -> Result<()> {
        let message = format!("Add {} native dependency to {}", dependency, descriptor);
        self.update_version(descriptor, &message, |v| {
            upsert(&mut v.container.native_deps, dependency)
        })
    }

    pub fn remove_container_native_dependency(
        &mut self,
        descriptor: &AppVersionDescriptor,
        base_path: &str,
    ) -> Result<bool> {
        let message = format!("Remove {} native dependency from {}", base_path, descriptor);
        self.update_version(descriptor, &message, |v| {
            remove_by_base(&mut v.container.native_deps, base_path)
        })
    }

    // --- MiniApps and JS API implementations ---

    pub fn container_miniapps(
        &self,
        descriptor: &AppVersionDescriptor,
    ) -> Result<Vec<PackagePath>> {
        parse_all(&self.document()?.version(descriptor)?.container.mini_apps)
    }

    pub fn container_miniapp(
        &self,
        descriptor: &AppVersionDescriptor,
        base_path: &str,
    ) -> Result<Option<PackagePath>> {
        Ok(self
            .container_miniapps(descriptor)?
            .into_iter()
            .find(|m| m.base_path() == base_path))
    }

    pub fn is_miniapp_in_container(
        &self,
        descriptor: &AppVersionDescriptor,
        base_path: &str,
    ) -> Result<bool> {
        Ok(self.container_miniapp(descriptor, base_path)?.is_some())
    }

    /// Add MiniApps, replacing any already present with the same base path
    pub fn sync_container_miniapps(
        &mut self,
        descriptor: &AppVersionDescriptor,
        miniapps: &[PackagePath],
    ) -> Result<()> {
        let message = format!("Sync MiniApps of {}", descriptor);
        self.update_version(descriptor, &message, |v| {
            for miniapp in miniapps {
                upsert(&mut v.container.mini_apps, miniapp)?;
            }
            Ok(())
        })
    }

    pub fn remove_container_miniapp(
        &mut self,
        descriptor: &AppVersionDescriptor,
        base_path: &str,
    ) -> Result<bool> {
        let message = format!("Remove {} MiniApp from {}", base_path, descriptor);
        self.update_version(descriptor, &message, |v| {
            remove_by_base(&mut v.container.mini_apps, base_path)
        })
    }

    pub fn container_js_api_impls(
        &self,
        descriptor: &AppVersionDescriptor,
    ) -> Result<Vec<PackagePath>> {
        parse_all(&self.document()?.version(descriptor)?.container.js_api_impls)
    }

    pub fn sync_container_js_api_impls(
        &mut self,
        descriptor: &AppVersionDescriptor,
        impls: &[PackagePath],
    ) -> Result<()> {
        let message = format!("Sync JS API implementations of {}", descriptor);
        self.update_version(descriptor, &message, |v| {
            for js_api_impl in impls {
                upsert(&mut v.container.js_api_impls, js_api_impl)?;
            }
            Ok(())
        })
    }

    // --- Lock files ---

    /// Store the lock file at `path` and reference it under `key` for the descriptor
    pub fn add_or_update_lock_file(
        &mut self,
        descriptor: &AppVersionDescriptor,
        key: &str,
        path: &Path,
    ) -> Result<Checksum> {
        let content = fs::read(path)?;
        let checksum = Checksum::from_bytes(&content);
        let file_key = checksum.file_key(LOCKS_AREA);
        if self.backend.read_file(&file_key)?.is_none() {
            self.backend.write_file(&file_key, &content)?;
        }
        let message = format!("Update {} lock file of {}", key, descriptor);
        let id = checksum.to_string();
        self.update_version(descriptor, &message, |v| {
            v.lock_files.insert(key.to_string(), id);
            Ok(())
        })?;
        debug!(descriptor = %descriptor, key, checksum = %checksum, "stored lock file");
        Ok(checksum)
    }

    /// Read a stored lock file, checking its content against the recorded checksum
    pub fn lock_file(
        &self,
        descriptor: &AppVersionDescriptor,
        key: &str,
    ) -> Result<Option<Vec<u8>>> {
        let record = self.native_app_version(descriptor)?;
        let Some(id) = record.lock_files.get(key) else {
            return Ok(None);
        };
        let checksum = Checksum::from(id.clone());
        let file_key = checksum.file_key(LOCKS_AREA);
        match self.backend.read_file(&file_key)? {
            Some(content) if !checksum.verify(&content) => {
                Err(StoreError::InvalidDocument(format!(
                    "{} lock file of {} does not match checksum {}",
                    key, descriptor, checksum
                )))
            }
            content => Ok(content),
        }
    }
}

fn parse_all(paths: &[String]) -> Result<Vec<PackagePath>> {
    paths.iter().map(|p| PackagePath::parse(p)).collect()
}

/// Insert `path` into `list`, replacing an entry with the same base path
fn upsert(list: &mut Vec<String>, path: &PackagePath) -> Result<()> {
    let base = path.base_path();
    for entry in list.iter_mut() {
        if PackagePath::parse(entry)?.base_path() == base {
            *entry = path.to_string();
            return Ok(());
        }
    }
    list.push(path.to_string());
    Ok(())
}

fn remove_by_base(list: &mut Vec<String>, base_path: &str) -> Result<bool> {
    let before = list.len();
    let mut kept = Vec::with_capacity(before);
    for entry in list.drain(..) {
        if PackagePath::parse(&entry)?.base_path() != base_path {
            kept.push(entry);
        }
    }
    *list = kept;
    Ok(list.len() != before)
}
