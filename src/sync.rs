//! Container sync
//!
//! Applies a mutation to a native application version and regenerates its
//! container inside one store transaction. Either the mutation, the new
//! native dependency set, the new container version and the lock file are all
//! committed together, or the transaction is discarded and the store is left
//! as it was.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::connection::{ConnectOptions, StoreConnectionManager};
use crate::descriptor::AppVersionDescriptor;
use crate::error::{Result, StoreError};
use crate::helper::{CommitMessage, CrashReportingConfig, SourceMapStoreConfig, StoreHelper};
use crate::package_path::PackagePath;

/// Lock file key of the container scope
pub const CONTAINER_LOCK_KEY: &str = "container";

/// Inputs for composite generation
#[derive(Debug, Clone)]
pub struct CompositeRequest<'a> {
    pub descriptor: &'a AppVersionDescriptor,
    pub base_composite: Option<&'a str>,
    pub miniapps: &'a [PackagePath],
    pub js_api_impls: &'a [PackagePath],
    pub out_dir: &'a Path,
}

/// A generated composite project
#[derive(Debug, Clone, PartialEq)]
pub struct Composite {
    pub path: PathBuf,
    /// Native dependencies to inject in the container
    pub native_dependencies: Vec<PackagePath>,
    pub lock_file: PathBuf,
}

/// Inputs for container generation
#[derive(Debug, Clone)]
pub struct ContainerRequest<'a> {
    pub descriptor: &'a AppVersionDescriptor,
    pub composite: &'a Composite,
    pub out_dir: &'a Path,
    pub reset_cache: bool,
    pub source_map_output: &'a Path,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerGenResult {
    pub bundle_path: PathBuf,
    pub source_map_path: Option<PathBuf>,
}

/// Composite generation, container generation and the post-generation pipeline
pub trait ContainerToolchain {
    fn generate_composite(&self, request: &CompositeRequest<'_>) -> Result<Composite>;

    fn generate_container(&self, request: &ContainerRequest<'_>) -> Result<ContainerGenResult>;

    /// Run the configured transformers and publishers on a generated container
    fn run_pipeline(
        &self,
        descriptor: &AppVersionDescriptor,
        container_path: &Path,
        container_version: &str,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SourceMapUpload<'a> {
    pub descriptor: &'a AppVersionDescriptor,
    pub container_version: &'a str,
    pub source_map_path: &'a Path,
}

#[derive(Debug, Clone)]
pub struct CrashReportUpload<'a> {
    pub bundle_path: &'a Path,
    pub source_map_path: &'a Path,
    pub project_root: PathBuf,
}

/// Best-effort artifact side channels. Failures never abort a sync.
pub trait ArtifactUploader {
    fn upload_source_map(
        &self,
        store: &SourceMapStoreConfig,
        upload: &SourceMapUpload<'_>,
    ) -> Result<()>;

    fn upload_crash_report(
        &self,
        config: &CrashReportingConfig,
        upload: &CrashReportUpload<'_>,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Use this container version instead of a patch increment
    pub container_version: Option<String>,
    pub reset_cache: bool,
    /// Where the bundle source map goes, a temporary file by default
    pub source_map_output: Option<PathBuf>,
    pub connect: ConnectOptions,
}

/// Runs mutations against the store and regenerates the affected container
pub struct ContainerSync {
    toolchain: Box<dyn ContainerToolchain>,
    uploader: Option<Box<dyn ArtifactUploader>>,
    out_dir: Option<PathBuf>,
    client_version: String,
}

impl ContainerSync {
    pub fn new(toolchain: Box<dyn ContainerToolchain>) -> Self {
        Self {
            toolchain,
            uploader: None,
            out_dir: None,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_uploader(mut self, uploader: Box<dyn ArtifactUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Root for generated containers, overriding the configured one
    pub fn with_out_dir(mut self, out_dir: impl Into<PathBuf>) -> Self {
        self.out_dir = Some(out_dir.into());
        self
    }

    /// Client version recorded as the container generator
    pub fn with_client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = version.into();
        self
    }

    /// Apply `mutate` to the store and regenerate the container of `descriptor`.
    ///
    /// Returns the new container version. On failure any open transaction is
    /// discarded and the original error is returned.
    pub fn sync<F>(
        &self,
        manager: &mut StoreConnectionManager,
        descriptor: &AppVersionDescriptor,
        commit_message: impl Into<CommitMessage>,
        options: &SyncOptions,
        mutate: F,
    ) -> Result<String>
    where
        F: FnOnce(&mut StoreHelper, &mut CommitMessage) -> Result<()>,
    {
        let Some(platform) = descriptor.platform.as_deref() else {
            return Err(StoreError::MissingPlatform {
                descriptor: descriptor.to_string(),
            });
        };
        let out_dir = match &self.out_dir {
            Some(dir) => dir.join(platform),
            None => manager.config().container_out_dir(platform),
        };

        let helper = manager.active(&options.connect)?;
        let mut message = commit_message.into();

        match self.run(helper, descriptor, &out_dir, &mut message, options, mutate) {
            Ok(version) => {
                info!(
                    descriptor = %descriptor,
                    version = %version,
                    "added new container version in Cauldron"
                );
                Ok(version)
            }
            Err(e) => {
                error!(descriptor = %descriptor, error = %e, "container sync failed");
                if let Err(discard) = helper.discard_transaction() {
                    warn!(error = %discard, "failed to discard Cauldron transaction");
                }
                Err(e)
            }
        }
    }

    fn run<F>(
        &self,
        helper: &mut StoreHelper,
        descriptor: &AppVersionDescriptor,
        out_dir: &Path,
        message: &mut CommitMessage,
        options: &SyncOptions,
        mutate: F,
    ) -> Result<String>
    where
        F: FnOnce(&mut StoreHelper, &mut CommitMessage) -> Result<()>,
    {
        // Computed from the state before the mutation
        let explicit = options.container_version.as_deref();
        let version = helper.next_container_version(descriptor, explicit)?;

        helper.begin_transaction()?;
        mutate(helper, message)?;

        let generator_config = helper.composite_generator_config(descriptor)?.unwrap_or_default();
        let miniapps = helper.container_miniapps(descriptor)?;
        let js_api_impls = helper.container_js_api_impls(descriptor)?;
        let composite_dir = tempfile::tempdir()?;
        let composite = self.toolchain.generate_composite(&CompositeRequest {
            descriptor,
            base_composite: generator_config.base_composite.as_deref(),
            miniapps: &miniapps,
            js_api_impls: &js_api_impls,
            out_dir: composite_dir.path(),
        })?;
        helper.set_native_dependencies_in_container(descriptor, &composite.native_dependencies)?;

        let source_map_dir = tempfile::tempdir()?;
        let source_map_output = options
            .source_map_output
            .clone()
            .unwrap_or_else(|| source_map_dir.path().join("index.map"));
        let container = self.toolchain.generate_container(&ContainerRequest {
            descriptor,
            composite: &composite,
            out_dir,
            reset_cache: options.reset_cache,
            source_map_output: &source_map_output,
        })?;

        helper.update_container_version(descriptor, &version)?;
        helper.update_container_generator_version(descriptor, &self.client_version)?;

        helper.add_or_update_lock_file(descriptor, CONTAINER_LOCK_KEY, &composite.lock_file)?;
        self.toolchain.run_pipeline(descriptor, out_dir, &version)?;

        self.upload_artifacts(
            helper,
            descriptor,
            &version,
            &composite,
            &container,
            &source_map_output,
        )?;

        helper.commit_transaction(std::mem::take(message))?;
        Ok(version)
    }

    fn upload_artifacts(
        &self,
        helper: &StoreHelper,
        descriptor: &AppVersionDescriptor,
        version: &str,
        composite: &Composite,
        container: &ContainerGenResult,
        source_map_output: &Path,
    ) -> Result<()> {
        let Some(uploader) = &self.uploader else {
            return Ok(());
        };
        let source_map_path = container.source_map_path.as_deref().unwrap_or(source_map_output);

        if let Some(store) = helper.source_map_store_config()? {
            let upload = SourceMapUpload {
                descriptor,
                container_version: version,
                source_map_path,
            };
            if let Err(e) = uploader.upload_source_map(&store, &upload) {
                warn!(url = %store.url, error = %e, "source map upload failed");
            }
        }

        if let Some(config) = helper.crash_report_config(descriptor)? {
            let upload = CrashReportUpload {
                bundle_path: &container.bundle_path,
                source_map_path,
                project_root: composite.path.join("node_modules"),
            };
            if let Err(e) = uploader.upload_crash_report(&config, &upload) {
                warn!(error = %e, "crash report upload failed");
            }
        }
        Ok(())
    }
}
