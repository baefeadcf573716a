//! Schema gate and connection management
//!
//! A [`StoreConnectionManager`] is the one place a process gets a store
//! session from. It resolves the active store key to a location, opens the
//! backend, and refuses to hand out a session whose schema or required client
//! version does not fit this client.

use std::cmp::Ordering;

use semver::{Version, VersionReq};
use tracing::{debug, info, warn};

use crate::backend::{GitStoreOpener, StoreLocation, StoreOpener};
use crate::config::ClientConfig;
use crate::error::{Result, SchemaMismatch, StoreError};
use crate::helper::StoreHelper;

/// Store schema version this client reads and writes
pub const SUPPORTED_SCHEMA_VERSION: &str = "3.0.0";

/// Switches for the schema gate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    pub ignore_schema_version_mismatch: bool,
    pub ignore_required_client_version: bool,
}

/// Compare the store's schema version with the one this client supports.
///
/// Identical strings always pass and `ignore` skips the check entirely, so a
/// store whose version is not semver can still be opened on request.
pub fn check_schema_version(store: &str, client: &str, ignore: bool) -> Result<()> {
    if store == client {
        return Ok(());
    }
    if ignore {
        warn!(store, client, "ignoring Cauldron schema version mismatch");
        return Ok(());
    }

    let store_version = Version::parse(store)?;
    let client_version = Version::parse(client)?;
    let mismatch = match store_version.cmp(&client_version) {
        Ordering::Equal => return Ok(()),
        Ordering::Greater => SchemaMismatch::StoreTooNew {
            store: store.to_string(),
            client: client.to_string(),
        },
        Ordering::Less => SchemaMismatch::StoreNeedsUpgrade {
            store: store.to_string(),
            client: client.to_string(),
        },
    };
    Err(StoreError::SchemaMismatch(mismatch))
}

/// Check the running client against the store's required client version range.
pub fn check_required_client_version(required: &str, client: &Version, ignore: bool) -> Result<()> {
    if ignore {
        debug!(required, "skipping required client version check");
        return Ok(());
    }
    let alternatives = parse_version_range(required)?;
    if alternatives.iter().any(|req| req.matches(client)) {
        return Ok(());
    }
    Err(StoreError::SchemaMismatch(SchemaMismatch::RequiredClientVersion {
        required: required.to_string(),
        client: client.to_string(),
    }))
}

/// Parse a version range, accepting npm style ranges (`>=1.0.0 <2.0.0`, `^1 || ^2`).
fn parse_version_range(range: &str) -> Result<Vec<VersionReq>> {
    range
        .split("||")
        .map(|part| {
            let part = part.trim();
            match VersionReq::parse(part) {
                Ok(req) => Ok(req),
                Err(_) => {
                    let normalized = part.split_whitespace().collect::<Vec<_>>().join(", ");
                    Ok(VersionReq::parse(&normalized)?)
                }
            }
        })
        .collect()
}

/// Owns the active store session of a process
pub struct StoreConnectionManager {
    config: ClientConfig,
    client_version: Version,
    opener: Box<dyn StoreOpener>,
    active_key: Option<String>,
    connected_key: Option<String>,
    helper: Option<StoreHelper>,
}

impl StoreConnectionManager {
    /// Manager opening git-backed stores, running as the current crate version
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client_version = Version::parse(env!("CARGO_PKG_VERSION"))?;
        Ok(Self::with_opener(config, client_version, Box::new(GitStoreOpener)))
    }

    pub fn with_opener(
        config: ClientConfig,
        client_version: Version,
        opener: Box<dyn StoreOpener>,
    ) -> Self {
        let active_key = config.store.active.clone();
        Self {
            config,
            client_version,
            opener,
            active_key,
            connected_key: None,
            helper: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn client_version(&self) -> &Version {
        &self.client_version
    }

    pub fn active_key(&self) -> Option<&str> {
        self.active_key.as_deref()
    }

    pub fn connected_key(&self) -> Option<&str> {
        self.connected_key.as_deref()
    }

    /// Make `key` the active store. The next [`active`](Self::active) call connects to it.
    pub fn set_active_store(&mut self, key: impl Into<String>) {
        let key = key.into();
        if self.connected_key.as_deref() != Some(key.as_str()) {
            if let Some(mut helper) = self.helper.take() {
                if helper.has_open_transaction() {
                    warn!(
                        store = %helper.key(),
                        "switching stores with an open transaction, discarding it"
                    );
                    if let Err(e) = helper.discard_transaction() {
                        warn!(error = %e, "failed to discard transaction");
                    }
                }
            }
            self.connected_key = None;
        }
        self.active_key = Some(key);
    }

    /// The session of the active store, connecting first if needed.
    pub fn active(&mut self, options: &ConnectOptions) -> Result<&mut StoreHelper> {
        let key = self.active_key.clone().ok_or_else(|| {
            StoreError::Connection(
                "no active Cauldron, set store.active in the configuration".to_string(),
            )
        })?;

        if self.helper.is_none() || self.connected_key.as_deref() != Some(key.as_str()) {
            let helper = self.connect(&key, options)?;
            self.helper = Some(helper);
            self.connected_key = Some(key);
        }

        self.helper
            .as_mut()
            .ok_or_else(|| StoreError::Connection("store session unavailable".to_string()))
    }

    fn connect(&self, key: &str, options: &ConnectOptions) -> Result<StoreHelper> {
        let url = self.config.store.repositories.get(key).ok_or_else(|| {
            StoreError::Connection(format!("no repository configured for Cauldron '{}'", key))
        })?;
        let location = StoreLocation::resolve(url, &self.config.store_local_path(key));
        debug!(
            store = key,
            path = %location.path.display(),
            branch = %location.branch,
            "connecting to Cauldron"
        );

        let backend = self
            .opener
            .open(&location)
            .map_err(|e| {
                StoreError::Connection(format!("unable to open Cauldron '{}': {}", key, e))
            })?;
        let helper = StoreHelper::new(key, backend);

        let schema_version = helper.schema_version()?;
        check_schema_version(
            &schema_version,
            SUPPORTED_SCHEMA_VERSION,
            options.ignore_schema_version_mismatch,
        )?;

        if let Some(required) = helper.required_client_version()? {
            let ignore = options.ignore_required_client_version
                || self.config.store.ignore_required_client_version;
            check_required_client_version(&required, &self.client_version, ignore)?;
        }

        info!(store = key, schema = %schema_version, "connected to Cauldron");
        Ok(helper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryStoreOpener;
    use crate::backend::{MemoryStore, StoreBackend};
    use crate::model::StoreDocument;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    struct CountingOpener {
        store: MemoryStore,
        opened: Arc<AtomicUsize>,
    }

    impl StoreOpener for CountingOpener {
        fn open(&self, _location: &StoreLocation) -> Result<Box<dyn StoreBackend>> {
            self.opened.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(Box::new(self.store.clone()))
        }
    }

    fn config() -> ClientConfig {
        let mut config = ClientConfig::default();
        config.store.active = Some("default".into());
        config.store.repositories.insert("default".into(), "/srv/default".into());
        config.store.repositories.insert("qa".into(), "/srv/qa#develop".into());
        config
    }

    fn manager(doc: StoreDocument) -> StoreConnectionManager {
        let opener = MemoryStoreOpener { store: MemoryStore::new(doc) };
        StoreConnectionManager::with_opener(config(), Version::new(0, 5, 0), Box::new(opener))
    }

    #[test]
    fn test_schema_gate() {
        assert!(check_schema_version("3.0.0", "3.0.0", false).is_ok());

        let err = check_schema_version("4.0.0", "3.0.0", false).unwrap_err();
        assert!(matches!(err, StoreError::SchemaMismatch(SchemaMismatch::StoreTooNew { .. })));
        assert!(err.to_string().contains("Upgrade this client"));

        let err = check_schema_version("2.1.0", "3.0.0", false).unwrap_err();
        assert!(matches!(
            err,
            StoreError::SchemaMismatch(SchemaMismatch::StoreNeedsUpgrade { .. })
        ));

        assert!(check_schema_version("4.0.0", "3.0.0", true).is_ok());
    }

    #[test]
    fn test_ignored_schema_gate_accepts_non_semver_store() {
        assert!(check_schema_version("3.0", "3.0.0", true).is_ok());
        assert!(matches!(
            check_schema_version("3.0", "3.0.0", false),
            Err(StoreError::Semver(_))
        ));
    }

    #[test]
    fn test_required_client_version_ranges() {
        let client = Version::new(1, 4, 2);
        assert!(check_required_client_version(">=1.0.0", &client, false).is_ok());
        assert!(check_required_client_version(">=1.0.0 <2.0.0", &client, false).is_ok());
        assert!(check_required_client_version("^0.9 || ^1.4", &client, false).is_ok());

        let err = check_required_client_version(">=2.0.0", &client, false).unwrap_err();
        assert!(matches!(
            err,
            StoreError::SchemaMismatch(SchemaMismatch::RequiredClientVersion { .. })
        ));
        assert!(check_required_client_version(">=2.0.0", &client, true).is_ok());
    }

    #[test]
    fn test_connect_and_cache() {
        let opened = Arc::new(AtomicUsize::new(0));
        let opener = CountingOpener {
            store: MemoryStore::new(StoreDocument::new(SUPPORTED_SCHEMA_VERSION)),
            opened: opened.clone(),
        };
        let mut manager =
            StoreConnectionManager::with_opener(config(), Version::new(0, 5, 0), Box::new(opener));
        let options = ConnectOptions::default();

        assert_eq!(manager.active(&options).unwrap().key(), "default");
        manager.active(&options).unwrap();
        assert_eq!(opened.load(AtomicOrdering::SeqCst), 1);

        manager.set_active_store("qa");
        assert_eq!(manager.connected_key(), None);
        assert_eq!(manager.active(&options).unwrap().key(), "qa");
        assert_eq!(opened.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(manager.connected_key(), Some("qa"));
    }

    #[test]
    fn test_schema_mismatch_is_not_cached() {
        let mut manager = manager(StoreDocument::new("9.0.0"));
        let err = manager.active(&ConnectOptions::default()).err().unwrap();
        assert!(err.is_schema_mismatch());
        assert_eq!(manager.connected_key(), None);

        let options = ConnectOptions {
            ignore_schema_version_mismatch: true,
            ..Default::default()
        };
        assert!(manager.active(&options).is_ok());
        assert_eq!(manager.connected_key(), Some("default"));
    }

    #[test]
    fn test_required_client_version_suppressed_by_config() {
        let mut doc = StoreDocument::new(SUPPORTED_SCHEMA_VERSION);
        doc.config.insert("requiredClientVersion".into(), json!(">=1.0.0"));

        let mut strict = manager(doc.clone());
        assert!(strict.active(&ConnectOptions::default()).is_err());

        let mut config = config();
        config.store.ignore_required_client_version = true;
        let opener = MemoryStoreOpener { store: MemoryStore::new(doc) };
        let mut lenient =
            StoreConnectionManager::with_opener(config, Version::new(0, 5, 0), Box::new(opener));
        assert!(lenient.active(&ConnectOptions::default()).is_ok());
    }

    #[test]
    fn test_unknown_or_missing_store_key() {
        let mut manager = manager(StoreDocument::new(SUPPORTED_SCHEMA_VERSION));
        manager.set_active_store("nope");
        let err = manager.active(&ConnectOptions::default()).err().unwrap();
        assert!(matches!(err, StoreError::Connection(_)));

        let opener = MemoryStoreOpener { store: MemoryStore::empty() };
        let mut none = StoreConnectionManager::with_opener(
            ClientConfig::default(),
            Version::new(0, 5, 0),
            Box::new(opener),
        );
        assert!(matches!(
            none.active(&ConnectOptions::default()).err().unwrap(),
            StoreError::Connection(_)
        ));
    }

    #[test]
    fn test_switch_discards_open_transaction() {
        let store = MemoryStore::new(StoreDocument::new(SUPPORTED_SCHEMA_VERSION));
        let opener = MemoryStoreOpener { store: store.clone() };
        let mut manager =
            StoreConnectionManager::with_opener(config(), Version::new(0, 5, 0), Box::new(opener));

        let before = store.document_bytes();
        let helper = manager.active(&ConnectOptions::default()).unwrap();
        helper.begin_transaction().unwrap();
        helper
            .add_descriptor(&crate::descriptor::AppVersionDescriptor::parse("app:android:1.0.0"))
            .unwrap();

        manager.set_active_store("qa");
        assert!(!store.in_transaction());
        assert_eq!(store.document_bytes(), before);
    }
}
