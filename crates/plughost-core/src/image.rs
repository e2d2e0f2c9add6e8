//! Opened plugin images and the seam between the host and the system loader.
//!
//! [`ImageLoader`] opens a file into an [`Image`] that answers symbol
//! lookups. [`NativeImageLoader`] goes through the platform dynamic linker;
//! [`StaticImageLoader`] serves images assembled in-process from symbols the
//! host binary already contains.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use plughost_sdk::abi::PluginInitFn;

use crate::error::{PluginError, Result};

/// Symbol lookup in one opened image.
pub trait Image: Send + Sync {
    /// Address of the exported symbol `name`, if present.
    fn symbol(&self, name: &str) -> Option<NonNull<c_void>>;
}

/// Opens plugin files.
pub trait ImageLoader: Send + Sync {
    /// Open `path`. With `deep_bind`, the image resolves its own symbols
    /// ahead of those already in the process.
    fn open(&self, path: &Path, deep_bind: bool) -> Result<Box<dyn Image>>;
}

/// Unique identity of one opened image for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(u64);

impl ImageId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// An opened image, closed when the last handle is dropped.
pub struct ImageHandle {
    id: ImageId,
    path: PathBuf,
    image: Box<dyn Image>,
}

impl ImageHandle {
    pub fn new(path: impl Into<PathBuf>, image: Box<dyn Image>) -> Self {
        Self {
            id: ImageId::next(),
            path: path.into(),
            image,
        }
    }

    pub fn open(loader: &dyn ImageLoader, path: &Path, deep_bind: bool) -> Result<Self> {
        Ok(Self::new(path, loader.open(path, deep_bind)?))
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn symbol(&self, name: &str) -> Option<NonNull<c_void>> {
        self.image.symbol(name)
    }

    /// Borrow the exported data symbol `name` as a `T`.
    ///
    /// # Safety
    /// The symbol must point to a live, properly aligned `T`.
    pub(crate) unsafe fn record<T>(&self, name: &str) -> Option<&T> {
        self.symbol(name).map(|ptr| &*(ptr.as_ptr() as *const T))
    }

    /// Resolve the exported function `name` with the init/entry signature.
    ///
    /// # Safety
    /// The symbol must be a function with the [`PluginInitFn`] signature.
    pub(crate) unsafe fn function(&self, name: &str) -> Option<PluginInitFn> {
        self.symbol(name)
            .map(|ptr| std::mem::transmute::<*mut c_void, PluginInitFn>(ptr.as_ptr()))
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageHandle")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}

/// `RTLD_DEEPBIND` on glibc; libloading does not export it.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
const RTLD_DEEPBIND: std::os::raw::c_int = 0x0008;

/// Image opened through the platform dynamic linker.
pub struct NativeImage {
    library: libloading::Library,
}

impl Image for NativeImage {
    fn symbol(&self, name: &str) -> Option<NonNull<c_void>> {
        // SAFETY: the address is only read as `*mut c_void`; callers decide
        // how to interpret it.
        let symbol = unsafe { self.library.get::<*mut c_void>(name.as_bytes()) }.ok()?;
        NonNull::new(*symbol)
    }
}

/// Loader backed by `libloading`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeImageLoader;

impl NativeImageLoader {
    pub fn new() -> Self {
        Self
    }

    #[cfg(unix)]
    fn open_library(
        path: &Path,
        deep_bind: bool,
    ) -> std::result::Result<libloading::Library, libloading::Error> {
        use libloading::os::unix::{Library, RTLD_LAZY, RTLD_LOCAL};

        #[allow(unused_mut)]
        let mut flags = RTLD_LAZY | RTLD_LOCAL;
        #[cfg(all(target_os = "linux", target_env = "gnu"))]
        if deep_bind {
            flags |= RTLD_DEEPBIND;
        }
        #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
        if deep_bind {
            tracing::debug!(path = %path.display(), "deep binding not supported on this platform");
        }

        // SAFETY: running a plugin's initializers is the point of loading it.
        unsafe { Library::open(Some(path), flags) }.map(Into::into)
    }

    #[cfg(not(unix))]
    fn open_library(
        path: &Path,
        _deep_bind: bool,
    ) -> std::result::Result<libloading::Library, libloading::Error> {
        // SAFETY: as above.
        unsafe { libloading::Library::new(path) }
    }
}

impl ImageLoader for NativeImageLoader {
    fn open(&self, path: &Path, deep_bind: bool) -> Result<Box<dyn Image>> {
        let library = Self::open_library(path, deep_bind)
            .map_err(|e| PluginError::load_failed(path, format!("Failed to load library: {}", e)))?;
        Ok(Box::new(NativeImage { library }))
    }
}

/// An image assembled from addresses already present in the process.
#[derive(Debug, Clone, Default)]
pub struct StaticImage {
    symbols: HashMap<String, usize>,
}

impl StaticImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export `address` under `name`.
    pub fn with_symbol(mut self, name: impl Into<String>, address: *const c_void) -> Self {
        self.symbols.insert(name.into(), address as usize);
        self
    }

    /// Export a `'static` data object under `name`.
    pub fn with_data<T: Sync>(self, name: impl Into<String>, data: &'static T) -> Self {
        self.with_symbol(name, data as *const T as *const c_void)
    }

    /// Export an entry point or init function under `name`.
    pub fn with_function(self, name: impl Into<String>, function: PluginInitFn) -> Self {
        self.with_symbol(name, function as *const c_void)
    }
}

impl Image for StaticImage {
    fn symbol(&self, name: &str) -> Option<NonNull<c_void>> {
        self.symbols
            .get(name)
            .and_then(|address| NonNull::new(*address as *mut c_void))
    }
}

/// Loader serving [`StaticImage`]s registered by path or file name.
#[derive(Debug, Default)]
pub struct StaticImageLoader {
    images: HashMap<PathBuf, StaticImage>,
    opens: Mutex<Vec<(PathBuf, bool)>>,
}

impl StaticImageLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `image` for `path`. A bare file name matches that file in any
    /// directory.
    pub fn with_image(mut self, path: impl Into<PathBuf>, image: StaticImage) -> Self {
        self.images.insert(path.into(), image);
        self
    }

    /// Every `open` so far, with its deep-bind flag.
    pub fn opens(&self) -> Vec<(PathBuf, bool)> {
        self.opens.lock().clone()
    }

    fn find(&self, path: &Path) -> Option<&StaticImage> {
        self.images.get(path).or_else(|| {
            let file_name = path.file_name()?;
            self.images.get(Path::new(file_name))
        })
    }
}

impl ImageLoader for StaticImageLoader {
    fn open(&self, path: &Path, deep_bind: bool) -> Result<Box<dyn Image>> {
        self.opens.lock().push((path.to_path_buf(), deep_bind));
        let image = self
            .find(path)
            .ok_or_else(|| PluginError::load_failed(path, "no such image"))?;
        Ok(Box::new(image.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::c_int;

    use plughost_sdk::abi::HostContext;

    static VALUE: u32 = 7;

    unsafe extern "C" fn returns_three(_ctx: *const HostContext) -> c_int {
        3
    }

    #[test]
    fn test_image_ids_are_unique() {
        let a = ImageHandle::new("/a", Box::new(StaticImage::new()));
        let b = ImageHandle::new("/a", Box::new(StaticImage::new()));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_static_image_symbols() {
        let image = StaticImage::new()
            .with_data("value", &VALUE)
            .with_function("three", returns_three);
        let handle = ImageHandle::new("/lib/x.so", Box::new(image));

        let value = unsafe { handle.record::<u32>("value") }.unwrap();
        assert_eq!(*value, 7);

        let f = unsafe { handle.function("three") }.unwrap();
        assert_eq!(unsafe { f(std::ptr::null()) }, 3);

        assert!(handle.symbol("missing").is_none());
    }

    #[test]
    fn test_static_loader_matches_file_name() {
        let loader = StaticImageLoader::new().with_image("libx.so", StaticImage::new());
        assert!(loader.open(Path::new("/any/dir/libx.so"), false).is_ok());
        assert!(loader.open(Path::new("/any/dir/liby.so"), true).is_err());
        assert_eq!(loader.opens().len(), 2);
        assert!(loader.opens()[1].1);
    }

    #[test]
    fn test_native_loader_reports_missing_file() {
        let err = NativeImageLoader::new()
            .open(Path::new("/nonexistent/libnothing.so"), false)
            .err()
            .unwrap();
        assert!(matches!(err, PluginError::LoadFailed { .. }));
    }
}
