//! Dependency compatibility checking
//!
//! Classifies a local dependency set (typically a MiniApp's) against the
//! dependencies recorded for a native application version, and decides
//! whether the local set can be merged into it.

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::descriptor::AppVersionDescriptor;
use crate::error::Result;
use crate::helper::StoreHelper;
use crate::package_path::PackagePath;

/// Remote version reported for a local dependency absent from the remote set
pub const MISSING_REMOTE_VERSION: &str = "MISSING";

const BRIDGE_MODULE: &str = "react-native-electrode-bridge";
const BRIDGING_SUFFIXES: &[&str] = &["-api", "-api-impl"];

/// One classified dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityEntry {
    pub dependency_name: String,
    pub local_version: Option<String>,
    pub remote_version: Option<String>,
}

/// Result of comparing a local dependency set with a remote one
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityReport {
    /// Same version on both sides
    pub compatible: Vec<CompatibilityEntry>,
    /// Bridging modules where the local version is an older minor/patch of the remote
    pub compatible_non_strict: Vec<CompatibilityEntry>,
    pub incompatible: Vec<CompatibilityEntry>,
}

impl CompatibilityReport {
    pub fn is_compatible(&self) -> bool {
        self.incompatible.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Report local dependencies missing from the remote set as incompatible.
    ///
    /// Only meaningful when the remote side can no longer be regenerated,
    /// i.e. for released native application versions.
    pub treat_missing_remote_as_incompatible: bool,
}

/// Whether a module is an API, API implementation or the bridge itself.
///
/// Those follow semver strictly, so an older local minor stays compatible.
pub fn is_bridging_module(name: &str) -> bool {
    name == BRIDGE_MODULE || BRIDGING_SUFFIXES.iter().any(|s| name.ends_with(s))
}

fn dependency_name(path: &PackagePath) -> String {
    path.name().map(String::from).unwrap_or_else(|| path.base_path())
}

/// Classify `local` against `remote`.
///
/// Remote dependencies without a local counterpart are left out of the report.
pub fn resolve(
    local: &[PackagePath],
    remote: &[PackagePath],
    options: ResolveOptions,
) -> CompatibilityReport {
    let mut report = CompatibilityReport::default();

    for remote_dep in remote {
        let Some(local_dep) = local.iter().find(|l| remote_dep.same(l, true)) else {
            continue;
        };
        let name = dependency_name(remote_dep);
        let entry = CompatibilityEntry {
            dependency_name: name.clone(),
            local_version: local_dep.version().map(String::from),
            remote_version: remote_dep.version().map(String::from),
        };

        match (local_dep.version(), remote_dep.version()) {
            (None, None) => report.compatible.push(entry),
            (Some(l), Some(r)) if l == r => report.compatible.push(entry),
            (Some(l), Some(r)) if is_bridging_module(&name) => {
                if is_backward_compatible(l, r) {
                    report.compatible_non_strict.push(entry);
                } else {
                    report.incompatible.push(entry);
                }
            }
            _ => report.incompatible.push(entry),
        }
    }

    if options.treat_missing_remote_as_incompatible {
        for local_dep in local {
            let name = dependency_name(local_dep);
            if remote.iter().any(|r| dependency_name(r) == name) {
                continue;
            }
            report.incompatible.push(CompatibilityEntry {
                dependency_name: name,
                local_version: local_dep.version().map(String::from),
                remote_version: Some(MISSING_REMOTE_VERSION.to_string()),
            });
        }
    }

    debug!(
        compatible = report.compatible.len(),
        compatible_non_strict = report.compatible_non_strict.len(),
        incompatible = report.incompatible.len(),
        "resolved compatibility"
    );
    report
}

/// Same major, local strictly older. Non-semver versions are never compatible.
fn is_backward_compatible(local: &str, remote: &str) -> bool {
    match (Version::parse(local), Version::parse(remote)) {
        (Ok(l), Ok(r)) => l.major == r.major && l < r,
        _ => false,
    }
}

/// Compatibility of a dependency set with one native application version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeAppCompatibility {
    pub descriptor: AppVersionDescriptor,
    pub binary: Option<String>,
    pub is_released: bool,
    pub is_compatible: bool,
    pub compatibility: CompatibilityReport,
}

/// Check `local` against the native dependencies of every store version matching `filter`.
///
/// Released versions treat missing remote dependencies as incompatible since
/// their container can no longer be regenerated.
pub fn native_app_compatibility(
    helper: &StoreHelper,
    local: &[PackagePath],
    filter: Option<&AppVersionDescriptor>,
) -> Result<Vec<NativeAppCompatibility>> {
    let mut result = Vec::new();
    for descriptor in helper.descriptors(filter)? {
        let record = helper.native_app_version(&descriptor)?;
        let remote = helper.native_dependencies(&descriptor)?;
        let compatibility = resolve(
            local,
            &remote,
            ResolveOptions {
                treat_missing_remote_as_incompatible: record.is_released,
            },
        );
        result.push(NativeAppCompatibility {
            is_compatible: compatibility.is_compatible(),
            binary: record.binary,
            is_released: record.is_released,
            descriptor,
            compatibility,
        });
    }
    Ok(result)
}
