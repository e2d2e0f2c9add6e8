//! Per-plugin load sequence.
//!
//! [`Loader::prepare`] opens the image, reads its metadata, applies the
//! configuration decision and checks the version; no plugin code runs.
//! [`Loader::activate`] then runs early init and the registration entry.
//! The split lets the host publish the image before any plugin code can
//! call back into it.

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use plughost_sdk::abi::{entry_symbol, HostContext, INIT_STATUS_OK};

use crate::discovery::PluginCandidate;
use crate::error::{PluginError, Result};
use crate::image::{ImageHandle, ImageLoader};
use crate::metadata::{self, PluginMetadata};
use crate::resolver::{Decision, Resolution};
use crate::version::HostVersion;

/// Terminal state of one load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOutcome {
    Loaded,
    Disabled,
    VersionMismatch,
    LoadError,
    Overridden,
}

impl Display for LoadOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Loaded => "loaded",
            Self::Disabled => "disabled",
            Self::VersionMismatch => "version mismatch",
            Self::LoadError => "load error",
            Self::Overridden => "overridden",
        };
        f.write_str(s)
    }
}

/// Registry record of one plugin.
///
/// Clones are snapshots: they carry everything but the image, which stays
/// owned by the host.
#[derive(Debug, Serialize)]
pub struct LoadedPlugin {
    pub name: String,
    pub path: PathBuf,
    pub metadata: Option<PluginMetadata>,
    pub outcome: LoadOutcome,
    pub error: Option<String>,
    pub overridden_by: Option<String>,
    pub loaded_at: DateTime<Utc>,
    #[serde(skip)]
    image: Option<Arc<ImageHandle>>,
}

impl Clone for LoadedPlugin {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            path: self.path.clone(),
            metadata: self.metadata.clone(),
            outcome: self.outcome,
            error: self.error.clone(),
            overridden_by: self.overridden_by.clone(),
            loaded_at: self.loaded_at,
            image: None,
        }
    }
}

impl LoadedPlugin {
    fn new(name: &str, path: impl Into<PathBuf>, outcome: LoadOutcome) -> Self {
        Self {
            name: name.to_string(),
            path: path.into(),
            metadata: None,
            outcome,
            error: None,
            overridden_by: None,
            loaded_at: Utc::now(),
            image: None,
        }
    }

    fn failed(
        name: &str,
        path: impl Into<PathBuf>,
        outcome: LoadOutcome,
        error: &PluginError,
    ) -> Self {
        let mut record = Self::new(name, path, outcome);
        record.error = Some(error.to_string());
        record
    }

    fn with_metadata(mut self, metadata: PluginMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.outcome == LoadOutcome::Loaded
    }

    /// The image of a Loaded plugin.
    pub(crate) fn image(&self) -> Option<&Arc<ImageHandle>> {
        self.image.as_ref()
    }

    /// Drop the image, leaving the record as it was.
    pub(crate) fn take_image(&mut self) -> Option<Arc<ImageHandle>> {
        self.image.take()
    }

    /// Turn a Loaded record into one overridden by `by`, handing back its
    /// image for the caller to close.
    pub(crate) fn retire(&mut self, by: &str) -> Option<Arc<ImageHandle>> {
        self.outcome = LoadOutcome::Overridden;
        self.overridden_by = Some(by.to_string());
        self.take_image()
    }

    pub fn summary(&self) -> PluginSummary {
        let metadata = self.metadata.as_ref();
        PluginSummary {
            name: self.name.clone(),
            outcome: self.outcome,
            version: metadata.map(|m| m.version.clone()).unwrap_or_default(),
            description: metadata.and_then(|m| m.description.clone()).unwrap_or_default(),
            path: self.path.clone(),
            error: self.error.clone(),
            overridden_by: self.overridden_by.clone(),
        }
    }
}

/// Flat per-plugin line for reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginSummary {
    pub name: String,
    pub outcome: LoadOutcome,
    pub version: String,
    pub description: String,
    pub path: PathBuf,
    pub error: Option<String>,
    pub overridden_by: Option<String>,
}

/// An opened, version-checked plugin whose code has not run yet.
#[derive(Debug)]
pub struct PreparedPlugin {
    pub name: String,
    pub path: PathBuf,
    pub metadata: PluginMetadata,
    image: Arc<ImageHandle>,
}

impl PreparedPlugin {
    pub(crate) fn image(&self) -> &Arc<ImageHandle> {
        &self.image
    }

    /// Record this plugin as overridden by `by`; the image is closed.
    pub fn overridden(self, by: &str) -> LoadedPlugin {
        tracing::info!("Plugin {} overridden by {}", self.name, by);
        let mut record = LoadedPlugin::new(&self.name, self.path, LoadOutcome::Overridden)
            .with_metadata(self.metadata);
        record.overridden_by = Some(by.to_string());
        record
    }
}

/// Result of [`Loader::prepare`].
#[derive(Debug)]
pub enum Prepared {
    /// Eligible for loading.
    Ready(PreparedPlugin),
    /// Finished without running plugin code.
    Done(LoadedPlugin),
}

/// Runs the load sequence against an [`ImageLoader`].
#[derive(Clone)]
pub struct Loader {
    images: Arc<dyn ImageLoader>,
    host_version: HostVersion,
}

impl Loader {
    pub fn new(images: Arc<dyn ImageLoader>, host_version: HostVersion) -> Self {
        Self {
            images,
            host_version,
        }
    }

    pub fn host_version(&self) -> &HostVersion {
        &self.host_version
    }

    /// Read a plugin's metadata without keeping it open or running its code.
    pub fn peek(&self, candidate: &PluginCandidate) -> Result<PluginMetadata> {
        let image = ImageHandle::open(self.images.as_ref(), &candidate.path, false)?;
        Ok(metadata::read(&candidate.name, &image)?)
    }

    /// Open the image and decide whether it may run.
    pub fn prepare(&self, candidate: &PluginCandidate, resolution: &Resolution) -> Prepared {
        let name = candidate.name.as_str();
        let path = &candidate.path;

        if resolution.decision_without_metadata() == Some(Decision::Disabled) {
            tracing::debug!(plugin = %name, "Disabled by configuration");
            return Prepared::Done(LoadedPlugin::new(name, path, LoadOutcome::Disabled));
        }

        let (image, metadata) = match self.open(candidate) {
            Ok(opened) => opened,
            Err(e) => {
                tracing::warn!("Failed to load plugin {}: {}", name, e);
                return Prepared::Done(LoadedPlugin::failed(name, path, LoadOutcome::LoadError, &e));
            }
        };

        if resolution.decision(metadata.default_disabled) == Decision::Disabled {
            tracing::debug!(plugin = %name, "Disabled by default");
            return Prepared::Done(
                LoadedPlugin::new(name, path, LoadOutcome::Disabled).with_metadata(metadata),
            );
        }

        if resolution.skip_version_check {
            tracing::debug!(plugin = %name, "Skipping version check");
        } else if let Err(e) = self.host_version.check(&metadata.version_required) {
            tracing::warn!("Plugin {} not loaded: {}", name, e);
            return Prepared::Done(
                LoadedPlugin::failed(name, path, LoadOutcome::VersionMismatch, &e)
                    .with_metadata(metadata),
            );
        }

        Prepared::Ready(PreparedPlugin {
            name: name.to_string(),
            path: path.clone(),
            metadata,
            image: Arc::new(image),
        })
    }

    /// Open and read metadata, reopening with deep binding when asked for.
    fn open(&self, candidate: &PluginCandidate) -> Result<(ImageHandle, PluginMetadata)> {
        let image = ImageHandle::open(self.images.as_ref(), &candidate.path, false)?;
        let metadata = metadata::read(&candidate.name, &image)?;
        if !metadata.deep_bind {
            return Ok((image, metadata));
        }

        drop(image);
        tracing::debug!(plugin = %candidate.name, "Reopening with deep binding");
        let image = ImageHandle::open(self.images.as_ref(), &candidate.path, true)?;
        Ok((image, metadata))
    }

    /// Run early init and the registration entry.
    ///
    /// On failure the record carries no image; the caller's other
    /// references to it are the only ones left.
    pub fn activate(&self, prepared: PreparedPlugin, ctx: &HostContext) -> LoadedPlugin {
        let PreparedPlugin {
            name,
            path,
            metadata,
            image,
        } = prepared;

        let fail = |reason: String, metadata: PluginMetadata| {
            let e = PluginError::load_failed(&path, reason);
            tracing::warn!("{}", e);
            LoadedPlugin::failed(&name, &path, LoadOutcome::LoadError, &e).with_metadata(metadata)
        };

        if let Some(symbol) = metadata.early_init.as_deref() {
            // SAFETY: early-init symbols share the init function signature.
            match unsafe { image.function(symbol) } {
                Some(early_init) => {
                    tracing::debug!(plugin = %name, "Calling early init {}", symbol);
                    // SAFETY: the image stays open for the call and `ctx` outlives it.
                    let status = unsafe { early_init(ctx) };
                    if status != INIT_STATUS_OK {
                        let reason = format!("early init {} returned {}", symbol, status);
                        return fail(reason, metadata);
                    }
                }
                None => {
                    tracing::warn!("Plugin {}: early init symbol {} not found", name, symbol);
                }
            }
        }

        let entry = entry_symbol(&name);
        // SAFETY: the entry symbol name is reserved for the registration entry.
        let Some(register) = (unsafe { image.function(&entry) }) else {
            return fail(format!("missing entry point {}", entry), metadata);
        };
        // SAFETY: as for early init; the host has published this image already.
        let status = unsafe { register(ctx) };
        if status != INIT_STATUS_OK {
            return fail(format!("{} returned {}", entry, status), metadata);
        }

        tracing::info!(
            "Loaded plugin: {} ({})",
            name,
            metadata
                .description
                .as_deref()
                .filter(|d| !d.is_empty())
                .unwrap_or(metadata.version.as_str())
        );
        let mut record = LoadedPlugin::new(&name, &path, LoadOutcome::Loaded).with_metadata(metadata);
        record.image = Some(image);
        record
    }

    /// Prepare and, unless overridden, activate.
    pub fn load(
        &self,
        candidate: &PluginCandidate,
        resolution: &Resolution,
        overridden_by: Option<&str>,
        ctx: &HostContext,
    ) -> LoadedPlugin {
        match self.prepare(candidate, resolution) {
            Prepared::Done(record) => record,
            Prepared::Ready(prepared) => match overridden_by {
                Some(by) => prepared.overridden(by),
                None => self.activate(prepared, ctx),
            },
        }
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("host_version", &self.host_version)
            .finish_non_exhaustive()
    }
}
