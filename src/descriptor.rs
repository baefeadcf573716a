//! Native application version descriptors
//!
//! A descriptor identifies an `application:platform:version` triple. Partial
//! descriptors (missing the version and/or platform) are only used for lookups.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a native application version
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppVersionDescriptor {
    pub name: String,
    pub platform: Option<String>,
    pub version: Option<String>,
}

impl AppVersionDescriptor {
    /// Create a complete descriptor
    pub fn new(
        name: impl Into<String>,
        platform: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            platform: Some(platform.into()),
            version: Some(version.into()),
        }
    }

    /// Create a partial descriptor
    pub fn partial(name: impl Into<String>, platform: Option<&str>) -> Self {
        Self {
            name: name.into(),
            platform: platform.map(String::from),
            version: None,
        }
    }

    /// Parse a `name[:platform[:version]]` string. Never fails.
    pub fn parse(s: &str) -> Self {
        let mut parts = s.trim().splitn(3, ':');
        let segment = |p: Option<&str>| p.filter(|p| !p.is_empty()).map(String::from);
        let name = parts.next().unwrap_or_default().to_string();
        let platform = segment(parts.next());
        let version = segment(parts.next());
        Self {
            name,
            platform,
            version,
        }
    }

    /// All three fields are present
    pub fn is_complete(&self) -> bool {
        self.platform.is_some() && self.version.is_some()
    }

    pub fn is_partial(&self) -> bool {
        !self.is_complete()
    }

    /// Check whether `other` matches every field present in this descriptor
    pub fn matches(&self, other: &AppVersionDescriptor) -> bool {
        self.name == other.name
            && self.platform.as_ref().map_or(true, |p| other.platform.as_ref() == Some(p))
            && self.version.as_ref().map_or(true, |v| other.version.as_ref() == Some(v))
    }

    /// The `name:platform` part of this descriptor
    pub fn without_version(&self) -> Self {
        Self {
            name: self.name.clone(),
            platform: self.platform.clone(),
            version: None,
        }
    }
}

impl fmt::Display for AppVersionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.platform.is_some() || self.version.is_some() {
            write!(f, ":{}", self.platform.as_deref().unwrap_or_default())?;
        }
        if let Some(version) = &self.version {
            write!(f, ":{}", version)?;
        }
        Ok(())
    }
}

impl FromStr for AppVersionDescriptor {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for AppVersionDescriptor {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_round_trip() {
        for s in ["myapp:android:1.0.0", "walmart:ios:17.3.0-beta", "a:b:c"] {
            let d = AppVersionDescriptor::parse(s);
            assert!(d.is_complete());
            assert_eq!(d.to_string(), s);
        }
    }

    #[test]
    fn test_partial_descriptors() {
        let d = AppVersionDescriptor::parse("myapp");
        assert_eq!(d.platform, None);
        assert_eq!(d.version, None);
        assert!(d.is_partial());
        assert_eq!(d.to_string(), "myapp");

        let d = AppVersionDescriptor::parse("myapp:ios");
        assert_eq!(d.platform.as_deref(), Some("ios"));
        assert_eq!(d.to_string(), "myapp:ios");

        let d = AppVersionDescriptor::parse("myapp::1.0.0");
        assert_eq!(d.platform, None);
        assert_eq!(d.version.as_deref(), Some("1.0.0"));
        assert_eq!(d.to_string(), "myapp::1.0.0");
    }

    #[test]
    fn test_matches_partial_pattern() {
        let full = AppVersionDescriptor::new("myapp", "android", "1.0.0");
        assert!(AppVersionDescriptor::parse("myapp").matches(&full));
        assert!(AppVersionDescriptor::parse("myapp:android").matches(&full));
        assert!(!AppVersionDescriptor::parse("myapp:ios").matches(&full));
        assert!(!AppVersionDescriptor::parse("MyApp").matches(&full));
    }

    #[test]
    fn test_equality_is_case_sensitive() {
        assert_ne!(
            AppVersionDescriptor::parse("app:android:1.0.0"),
            AppVersionDescriptor::parse("app:Android:1.0.0")
        );
    }
}
