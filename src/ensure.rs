//! Precondition checks
//!
//! Every check returns a [`CheckResult`]. Checks reading the store wrap it in
//! the crate [`Result`] so store failures stay distinct from failed checks.
//! Callers gather results in a [`Checklist`] and surface the first failure or
//! all of them.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use regex::Regex;
use semver::Version;

use crate::descriptor::AppVersionDescriptor;
use crate::error::{Result, StoreError};
use crate::helper::{StoreHelper, KNOWN_CONFIG_KEYS};
use crate::package_path::PackagePath;

static CONTAINER_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").unwrap());

/// A failed check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Name of the check that failed
    pub check: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(check: &'static str, message: impl Into<String>) -> Self {
        Self {
            check,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type CheckResult = std::result::Result<(), ValidationError>;

/// Collected check results
#[derive(Debug, Default)]
pub struct Checklist {
    failures: Vec<ValidationError>,
}

impl Checklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, result: CheckResult) -> &mut Self {
        if let Err(e) = result {
            self.failures.push(e);
        }
        self
    }

    pub fn failures(&self) -> &[ValidationError] {
        &self.failures
    }

    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fail with the first recorded failure only
    pub fn first_failure(mut self) -> Result<()> {
        self.failures.truncate(1);
        self.into_result()
    }

    /// Fail with every recorded failure
    pub fn into_result(self) -> Result<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Validation(self.failures))
        }
    }
}

pub fn is_valid_container_version(version: &str) -> CheckResult {
    if CONTAINER_VERSION.is_match(version) {
        Ok(())
    } else {
        Err(ValidationError::new(
            "valid_container_version",
            format!("{} is not a valid container version", version),
        ))
    }
}

/// `version` must be strictly greater than the current top-level container version
pub fn is_newer_container_version(
    helper: &StoreHelper,
    descriptor: &AppVersionDescriptor,
    version: &str,
) -> Result<CheckResult> {
    const CHECK: &str = "newer_container_version";
    let Some(current) = helper.top_level_container_version(descriptor)? else {
        return Ok(Ok(()));
    };
    let newer = match (Version::parse(version), Version::parse(&current)) {
        (Ok(new), Ok(cur)) => new > cur,
        _ => false,
    };
    if newer {
        Ok(Ok(()))
    } else {
        Ok(Err(ValidationError::new(
            CHECK,
            format!("Container version {} is not newer than {}", version, current),
        )))
    }
}

pub fn is_complete_descriptor(descriptor: &AppVersionDescriptor) -> CheckResult {
    if descriptor.is_complete() {
        Ok(())
    } else {
        Err(ValidationError::new(
            "complete_descriptor",
            format!(
                "{} is not a complete native application descriptor, \
                 in the form application:platform:version",
                descriptor
            ),
        ))
    }
}

pub fn same_native_application_and_platform(descriptors: &[AppVersionDescriptor]) -> CheckResult {
    let pairs: BTreeSet<_> = descriptors.iter().map(|d| d.without_version()).collect();
    if pairs.len() > 1 {
        return Err(ValidationError::new(
            "same_native_application_and_platform",
            "Descriptors do not all match the same native application/platform pair",
        ));
    }
    Ok(())
}

pub fn no_git_or_file_path(paths: &[PackagePath]) -> CheckResult {
    match paths.iter().find(|p| p.is_git_path() || p.is_file_path()) {
        Some(p) => Err(ValidationError::new(
            "no_git_or_file_path",
            format!("Found a git or file system path: {}", p),
        )),
        None => Ok(()),
    }
}

pub fn no_file_path(paths: &[PackagePath]) -> CheckResult {
    match paths.iter().find(|p| p.is_file_path()) {
        Some(p) => Err(ValidationError::new(
            "no_file_path",
            format!("Found a file system path: {}", p),
        )),
        None => Ok(()),
    }
}

pub fn descriptor_exists(
    helper: &StoreHelper,
    descriptors: &[AppVersionDescriptor],
) -> Result<CheckResult> {
    for d in descriptors {
        if !helper.is_descriptor_in_store(d)? {
            return Ok(Err(ValidationError::new(
                "descriptor_exists",
                format!("{} descriptor does not exist in Cauldron", d),
            )));
        }
    }
    Ok(Ok(()))
}

pub fn descriptor_does_not_exist(
    helper: &StoreHelper,
    descriptor: &AppVersionDescriptor,
) -> Result<CheckResult> {
    if helper.is_descriptor_in_store(descriptor)? {
        return Ok(Err(ValidationError::new(
            "descriptor_does_not_exist",
            format!("{} descriptor exists in Cauldron", descriptor),
        )));
    }
    Ok(Ok(()))
}

pub fn miniapp_not_in_container(
    helper: &StoreHelper,
    descriptor: &AppVersionDescriptor,
    miniapps: &[PackagePath],
) -> Result<CheckResult> {
    for m in miniapps {
        if helper.is_miniapp_in_container(descriptor, &m.base_path())? {
            return Ok(Err(ValidationError::new(
                "miniapp_not_in_container",
                format!("{} MiniApp exists in {}", m.base_path(), descriptor),
            )));
        }
    }
    Ok(Ok(()))
}

pub fn miniapp_in_container(
    helper: &StoreHelper,
    descriptor: &AppVersionDescriptor,
    miniapps: &[PackagePath],
) -> Result<CheckResult> {
    for m in miniapps {
        if !helper.is_miniapp_in_container(descriptor, &m.base_path())? {
            return Ok(Err(ValidationError::new(
                "miniapp_in_container",
                format!("{} MiniApp does not exist in {}", m.base_path(), descriptor),
            )));
        }
    }
    Ok(Ok(()))
}

/// Each MiniApp is in the container, at another version than the given one
pub fn miniapp_in_container_with_different_version(
    helper: &StoreHelper,
    descriptor: &AppVersionDescriptor,
    miniapps: &[PackagePath],
) -> Result<CheckResult> {
    const CHECK: &str = "miniapp_in_container_with_different_version";
    for m in miniapps {
        let Some(current) = helper.container_miniapp(descriptor, &m.base_path())? else {
            return Ok(Err(ValidationError::new(
                CHECK,
                format!("{} MiniApp does not exist in {}", m.base_path(), descriptor),
            )));
        };
        if current.version() == m.version() {
            return Ok(Err(ValidationError::new(
                CHECK,
                format!(
                    "{} is already at version {} in {}",
                    current.base_path(),
                    m.version().unwrap_or_default(),
                    descriptor
                ),
            )));
        }
    }
    Ok(Ok(()))
}

pub fn dependency_not_in_container(
    helper: &StoreHelper,
    descriptor: &AppVersionDescriptor,
    dependencies: &[PackagePath],
) -> Result<CheckResult> {
    for dep in dependencies {
        if helper.container_native_dependency(descriptor, &dep.base_path())?.is_some() {
            return Ok(Err(ValidationError::new(
                "dependency_not_in_container",
                format!("{} dependency exists in {}", dep.base_path(), descriptor),
            )));
        }
    }
    Ok(Ok(()))
}

pub fn dependency_in_container(
    helper: &StoreHelper,
    descriptor: &AppVersionDescriptor,
    dependencies: &[PackagePath],
) -> Result<CheckResult> {
    for dep in dependencies {
        if helper.container_native_dependency(descriptor, &dep.base_path())?.is_none() {
            return Ok(Err(ValidationError::new(
                "dependency_in_container",
                format!("{} does not exist in {}", dep.base_path(), descriptor),
            )));
        }
    }
    Ok(Ok(()))
}

pub fn dependency_in_container_with_different_version(
    helper: &StoreHelper,
    descriptor: &AppVersionDescriptor,
    dependencies: &[PackagePath],
) -> Result<CheckResult> {
    const CHECK: &str = "dependency_in_container_with_different_version";
    for dep in dependencies {
        let Some(current) = helper.container_native_dependency(descriptor, &dep.base_path())? else {
            return Ok(Err(ValidationError::new(
                CHECK,
                format!("{} does not exist in {}", dep.base_path(), descriptor),
            )));
        };
        if current.version() == dep.version() {
            return Ok(Err(ValidationError::new(
                CHECK,
                format!(
                    "{} is already at version {} in {}",
                    dep.base_path(),
                    current.version().unwrap_or("undefined"),
                    descriptor
                ),
            )));
        }
    }
    Ok(Ok(()))
}

/// `key` must be a configuration key the store understands
pub fn is_valid_config_key(key: &str) -> CheckResult {
    if KNOWN_CONFIG_KEYS.contains(&key) {
        return Ok(());
    }
    let message = match suggest_config_key(key) {
        Some(suggestion) => format!(
            "Unknown configuration key '{}'. Did you mean '{}'?",
            key, suggestion
        ),
        None => format!("Unknown configuration key '{}'", key),
    };
    Err(ValidationError::new("valid_config_key", message))
}

fn suggest_config_key(key: &str) -> Option<&'static str> {
    let matcher = SkimMatcherV2::default().ignore_case();
    KNOWN_CONFIG_KEYS
        .iter()
        .filter_map(|candidate| {
            let score = matcher
                .fuzzy_match(candidate, key)
                .max(matcher.fuzzy_match(key, candidate))?;
            Some((score, *candidate))
        })
        .max_by_key(|(score, _)| *score)
        .map(|(_, candidate)| candidate)
}
