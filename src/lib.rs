//! Cauldron
//!
//! A versioned, transactional store recording which MiniApps, native
//! dependencies and JS API implementations compose each native application
//! version, plus the compatibility resolver that decides which changes to
//! that composition are safe.
//!
//! ## Features
//!
//! - **Git-backed storage**: Every store change is a commit on a branch of a store repository
//! - **Transactions**: Multi-step updates are committed or discarded as a whole
//! - **Schema gate**: Sessions are refused when the store schema or required client
//!   version does not fit
//! - **Compatibility resolution**: Dependency sets are classified against released and
//!   in-progress versions
//! - **Container sync**: Mutations regenerate the container and bump its version atomically
//!
//! ## Store layout
//!
//! ```text
//! <store repository>/
//! ├── cauldron.json        (schema version, config, native apps)
//! └── locks/
//!     └── <sha256>         (lock files referenced by native app versions)
//! ```

pub mod backend;
pub mod checksum;
pub mod compatibility;
pub mod config;
pub mod connection;
pub mod descriptor;
pub mod ensure;
pub mod error;
pub mod helper;
pub mod model;
pub mod package_path;
pub mod sync;
pub mod version;

pub use backend::{GitStore, MemoryStore, StoreBackend, StoreLocation};
pub use checksum::Checksum;
pub use compatibility::{resolve, CompatibilityEntry, CompatibilityReport, ResolveOptions};
pub use config::ClientConfig;
pub use connection::{ConnectOptions, StoreConnectionManager, SUPPORTED_SCHEMA_VERSION};
pub use descriptor::AppVersionDescriptor;
pub use ensure::{Checklist, ValidationError};
pub use error::{Result, SchemaMismatch, StoreError, TransactionError};
pub use helper::{CommitMessage, StoreHelper};
pub use package_path::{PackagePath, PackageSource};
pub use sync::{ContainerSync, ContainerToolchain, SyncOptions};
pub use version::ContainerVersion;
