//! Store document types
//!
//! The whole Cauldron is a single JSON document:
//!
//! ```text
//! schemaVersion
//! config
//! nativeApps[]
//! └── platforms[]            (containerVersion: top-level version)
//!     └── versions[]         (containerVersion, lockFiles, container, config)
//!         └── container      (miniApps, jsApiImpls, nativeDeps, generatorVersion)
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::descriptor::AppVersionDescriptor;
use crate::error::{Result, StoreError};

/// Root of the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDocument {
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub native_apps: Vec<NativeApp>,
}

/// A native application and its platforms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeApp {
    pub name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub platforms: Vec<PlatformEntry>,
}

/// A platform of a native application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformEntry {
    pub name: String,
    /// Container version shared by all versions of this platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_version: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub versions: Vec<NativeAppVersion>,
}

/// A single native application version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeAppVersion {
    pub name: String,
    #[serde(default)]
    pub is_released: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_version: Option<String>,
    /// Lock file key -> stored file checksum
    #[serde(default)]
    pub lock_files: BTreeMap<String, String>,
    #[serde(default)]
    pub container: ContainerRecord,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
}

/// Recorded composition of a container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    #[serde(default)]
    pub mini_apps: Vec<String>,
    #[serde(default)]
    pub js_api_impls: Vec<String>,
    #[serde(default)]
    pub native_deps: Vec<String>,
    /// Client version that generated the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
}

impl NativeAppVersion {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_released: false,
            binary: None,
            container_version: None,
            lock_files: BTreeMap::new(),
            container: ContainerRecord::default(),
            config: Map::new(),
        }
    }
}

impl StoreDocument {
    /// Create an empty document at the given schema version
    pub fn new(schema_version: impl Into<String>) -> Self {
        Self {
            schema_version: schema_version.into(),
            config: Map::new(),
            native_apps: Vec::new(),
        }
    }

    pub fn find_app(&self, name: &str) -> Option<&NativeApp> {
        self.native_apps.iter().find(|a| a.name == name)
    }

    pub fn find_platform(&self, descriptor: &AppVersionDescriptor) -> Option<&PlatformEntry> {
        let platform = descriptor.platform.as_deref()?;
        self.find_app(&descriptor.name)?
            .platforms
            .iter()
            .find(|p| p.name == platform)
    }

    pub fn find_version(&self, descriptor: &AppVersionDescriptor) -> Option<&NativeAppVersion> {
        let version = descriptor.version.as_deref()?;
        self.find_platform(descriptor)?
            .versions
            .iter()
            .find(|v| v.name == version)
    }

    /// The version record for a complete descriptor
    pub fn version(&self, descriptor: &AppVersionDescriptor) -> Result<&NativeAppVersion> {
        require_complete(descriptor)?;
        self.find_version(descriptor)
            .ok_or_else(|| not_found(descriptor))
    }

    pub fn version_mut(
        &mut self,
        descriptor: &AppVersionDescriptor,
    ) -> Result<&mut NativeAppVersion> {
        self.platform_mut(descriptor)?
            .versions
            .iter_mut()
            .find(|v| Some(&v.name) == descriptor.version.as_ref())
            .ok_or_else(|| not_found(descriptor))
    }

    pub fn platform_mut(
        &mut self,
        descriptor: &AppVersionDescriptor,
    ) -> Result<&mut PlatformEntry> {
        require_complete(descriptor)?;
        self.native_apps
            .iter_mut()
            .find(|a| a.name == descriptor.name)
            .and_then(|a| {
                a.platforms
                    .iter_mut()
                    .find(|p| Some(&p.name) == descriptor.platform.as_ref())
            })
            .ok_or_else(|| not_found(descriptor))
    }

    /// Whether the descriptor (partial or complete) exists
    pub fn contains(&self, descriptor: &AppVersionDescriptor) -> bool {
        match (&descriptor.platform, &descriptor.version) {
            (None, None) => self.find_app(&descriptor.name).is_some(),
            (Some(_), None) => self.find_platform(descriptor).is_some(),
            (_, Some(_)) => self.find_version(descriptor).is_some(),
        }
    }

    /// Create the app, platform and version entries of a complete descriptor
    ///
    /// Returns `false` if the version already existed.
    pub fn insert_descriptor(&mut self, descriptor: &AppVersionDescriptor) -> Result<bool> {
        let (Some(platform), Some(version)) =
            (descriptor.platform.clone(), descriptor.version.clone())
        else {
            return Err(StoreError::IncompleteDescriptor {
                descriptor: descriptor.to_string(),
            });
        };

        if self.find_app(&descriptor.name).is_none() {
            self.native_apps.push(NativeApp {
                name: descriptor.name.clone(),
                config: Map::new(),
                platforms: Vec::new(),
            });
        }
        let app = self
            .native_apps
            .iter_mut()
            .find(|a| a.name == descriptor.name)
            .ok_or_else(|| not_found(descriptor))?;

        if !app.platforms.iter().any(|p| p.name == platform) {
            app.platforms.push(PlatformEntry {
                name: platform.clone(),
                container_version: None,
                config: Map::new(),
                versions: Vec::new(),
            });
        }
        let entry = app
            .platforms
            .iter_mut()
            .find(|p| p.name == platform)
            .ok_or_else(|| not_found(descriptor))?;

        if entry.versions.iter().any(|v| v.name == version) {
            return Ok(false);
        }
        entry.versions.push(NativeAppVersion::new(version));
        Ok(true)
    }

    /// All complete descriptors matching a (possibly partial) filter
    pub fn descriptors(&self, filter: Option<&AppVersionDescriptor>) -> Vec<AppVersionDescriptor> {
        let mut result = Vec::new();
        for app in &self.native_apps {
            for platform in &app.platforms {
                for version in &platform.versions {
                    let d = AppVersionDescriptor::new(&app.name, &platform.name, &version.name);
                    if filter.map_or(true, |f| f.matches(&d)) {
                        result.push(d);
                    }
                }
            }
        }
        result
    }

    /// Look up a configuration key, from the most specific level to the store root
    pub fn config_for_key(
        &self,
        key: &str,
        descriptor: Option<&AppVersionDescriptor>,
    ) -> Option<&Value> {
        if let Some(d) = descriptor {
            let scoped = [
                self.find_version(d).map(|v| &v.config),
                self.find_platform(d).map(|p| &p.config),
                self.find_app(&d.name).map(|a| &a.config),
            ];
            for config in scoped.into_iter().flatten() {
                if let Some(value) = config.get(key) {
                    return Some(value);
                }
            }
        }
        self.config.get(key)
    }
}

fn require_complete(descriptor: &AppVersionDescriptor) -> Result<()> {
    if descriptor.is_partial() {
        return Err(StoreError::IncompleteDescriptor {
            descriptor: descriptor.to_string(),
        });
    }
    Ok(())
}

fn not_found(descriptor: &AppVersionDescriptor) -> StoreError {
    StoreError::DescriptorNotFound {
        descriptor: descriptor.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> StoreDocument {
        let mut doc = StoreDocument::new("3.0.0");
        doc.insert_descriptor(&AppVersionDescriptor::parse("app:android:1.0.0")).unwrap();
        doc.insert_descriptor(&AppVersionDescriptor::parse("app:android:2.0.0")).unwrap();
        doc.insert_descriptor(&AppVersionDescriptor::parse("app:ios:1.0.0")).unwrap();
        doc
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut doc = sample();
        assert_eq!(doc.descriptors(None).len(), 3);
        assert!(doc.contains(&AppVersionDescriptor::parse("app:ios")));
        assert!(!doc.contains(&AppVersionDescriptor::parse("app:ios:9.0.0")));
        assert!(!doc
            .insert_descriptor(&AppVersionDescriptor::parse("app:ios:1.0.0"))
            .unwrap());
    }

    #[test]
    fn test_partial_descriptor_rejected_for_records() {
        let doc = sample();
        let err = doc.version(&AppVersionDescriptor::parse("app:android")).unwrap_err();
        assert!(matches!(err, StoreError::IncompleteDescriptor { .. }));
    }

    #[test]
    fn test_config_cascade() {
        let mut doc = sample();
        let d = AppVersionDescriptor::parse("app:android:1.0.0");
        doc.config.insert("flag".into(), json!("root"));
        assert_eq!(doc.config_for_key("flag", Some(&d)), Some(&json!("root")));

        doc.native_apps[0].config.insert("flag".into(), json!("app"));
        assert_eq!(doc.config_for_key("flag", Some(&d)), Some(&json!("app")));

        doc.version_mut(&d).unwrap().config.insert("flag".into(), json!("version"));
        assert_eq!(doc.config_for_key("flag", Some(&d)), Some(&json!("version")));
        assert_eq!(doc.config_for_key("flag", None), Some(&json!("root")));
    }

    #[test]
    fn test_serde_field_names() {
        let doc = sample();
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["schemaVersion"], "3.0.0");
        let version = &json["nativeApps"][0]["platforms"][0]["versions"][0];
        assert!(version["container"]["miniApps"].is_array());
    }
}
