//! Native plugin discovery and loading for plughost.
//!
//! A [`PluginHost`] scans its search path for shared libraries, reads each
//! image's registration record, applies the configured directives and the
//! override table, checks version compatibility and calls the plugin's
//! registration entry. Plugin code calls back through the
//! [`HostContext`](plughost_sdk::HostContext) to run other plugins' init
//! functions exactly once.

pub mod config;
pub mod discovery;
pub mod error;
pub mod host;
pub mod image;
pub mod ledger;
pub mod loader;
pub mod metadata;
pub mod overrides;
pub mod resolver;
pub mod version;

pub use config::{PluginDirective, PluginsConfig, PLUGIN_PATH_ENV};
pub use discovery::{discover, PluginCandidate};
pub use error::{InitError, MetadataError, PluginError, Result};
pub use host::{LoadReport, PluginHost};
pub use image::{
    Image, ImageHandle, ImageId, ImageLoader, NativeImageLoader, StaticImage, StaticImageLoader,
};
pub use loader::{LoadOutcome, LoadedPlugin, Loader, PluginSummary};
pub use metadata::PluginMetadata;
pub use overrides::OverrideTable;
pub use resolver::{ConfigResolver, Decision, Resolution};
pub use version::HostVersion;

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{PluginDirective, PluginsConfig};
    pub use crate::error::{InitError, PluginError, Result};
    pub use crate::host::{LoadReport, PluginHost};
    pub use crate::loader::{LoadOutcome, PluginSummary};
}
