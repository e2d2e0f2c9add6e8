//! Shared fixtures: plugin files on disk backed by in-process static images.

#![allow(dead_code)]

use std::env::consts::{DLL_EXTENSION, DLL_PREFIX};
use std::ffi::c_int;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use plughost_core::{PluginHost, PluginsConfig, StaticImage, StaticImageLoader};
use plughost_sdk::abi::{entry_symbol, HostContext, PluginRegistration, REGISTRATION_SYMBOL};

/// Platform file name of the plugin `name`.
pub fn lib_file(name: &str) -> String {
    format!("{}{}.{}", DLL_PREFIX, name, DLL_EXTENSION)
}

/// Create an empty plugin file for `name` in `dir`.
pub fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(lib_file(name));
    std::fs::write(&path, b"").unwrap();
    path
}

pub unsafe extern "C" fn entry_ok(_ctx: *const HostContext) -> c_int {
    0
}

/// Image exporting a fixed record and the given entry point.
pub fn plugin_image(
    name: &str,
    registration: &'static PluginRegistration,
    entry: unsafe extern "C" fn(*const HostContext) -> c_int,
) -> StaticImage {
    StaticImage::new()
        .with_data(REGISTRATION_SYMBOL, registration)
        .with_function(entry_symbol(name), entry)
}

/// Plugin directory plus the images its files resolve to.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub images: StaticImageLoader,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            images: StaticImageLoader::new(),
        }
    }

    /// Add a plugin file backed by `image`.
    pub fn plugin(mut self, name: &str, image: StaticImage) -> Self {
        touch(self.dir.path(), name);
        self.images = self.images.with_image(lib_file(name), image);
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Host searching only this fixture's directory.
    pub fn host(self, config: PluginsConfig, host_version: &str) -> (PluginHost, tempfile::TempDir) {
        let (host, dir, _) = self.host_tracked(config, host_version);
        (host, dir)
    }

    /// Like [`Fixture::host`], keeping a handle on the image loader.
    pub fn host_tracked(
        self,
        config: PluginsConfig,
        host_version: &str,
    ) -> (PluginHost, tempfile::TempDir, Arc<StaticImageLoader>) {
        let Self { dir, images } = self;
        let images = Arc::new(images);
        let config = config.with_path(dir.path());
        let host = PluginHost::with_image_loader(config, host_version, images.clone()).unwrap();
        (host, dir, images)
    }
}
