//! The plugin host: registry, override table, init ledger and open images.
//!
//! All state sits behind one reentrant lock so plugin code running inside a
//! load pass can call back into the host on the same thread. RefCell borrows
//! are never held while plugin code runs.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use serde::Serialize;

use plughost_sdk::abi::{
    init_symbol, HostContext, INIT_STATUS_NOT_FOUND, INIT_STATUS_OK, PLUGIN_ABI_VERSION,
};

use crate::config::PluginsConfig;
use crate::discovery::{discover, PluginCandidate};
use crate::error::{InitError, PluginError, Result};
use crate::image::{ImageHandle, ImageLoader, NativeImageLoader};
use crate::ledger::{FunctionId, InitLedger};
use crate::loader::{LoadOutcome, LoadedPlugin, Loader, Prepared, PluginSummary};
use crate::overrides::OverrideTable;
use crate::resolver::ConfigResolver;
use crate::version::HostVersion;

/// Counts for one [`PluginHost::load_new_plugins`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub discovered: usize,
    pub shadowed: usize,
    pub loaded: usize,
    pub disabled: usize,
    pub overridden: usize,
    pub version_mismatch: usize,
    pub failed: usize,
}

impl LoadReport {
    fn count(&mut self, outcome: LoadOutcome) {
        match outcome {
            LoadOutcome::Loaded => self.loaded += 1,
            LoadOutcome::Disabled => self.disabled += 1,
            LoadOutcome::Overridden => self.overridden += 1,
            LoadOutcome::VersionMismatch => self.version_mismatch += 1,
            LoadOutcome::LoadError => self.failed += 1,
        }
    }
}

struct HostState {
    config: PluginsConfig,
    resolver: ConfigResolver,
    plugins: BTreeMap<String, LoadedPlugin>,
    /// Images symbols may be resolved in: Loaded plugins and the one being
    /// activated.
    images: HashMap<String, Arc<ImageHandle>>,
    overrides: OverrideTable,
    ledger: InitLedger,
    shadowed: Vec<PluginCandidate>,
}

/// Discovers, loads and tracks plugins for one host process.
pub struct PluginHost {
    state: ReentrantMutex<RefCell<HostState>>,
    loader: Loader,
    host_version: CString,
}

impl PluginHost {
    /// Host using the platform dynamic linker.
    pub fn new(config: PluginsConfig, host_version: &str) -> Result<Self> {
        Self::with_image_loader(config, host_version, Arc::new(NativeImageLoader::new()))
    }

    pub fn with_image_loader(
        config: PluginsConfig,
        host_version: &str,
        images: Arc<dyn ImageLoader>,
    ) -> Result<Self> {
        let version: HostVersion = host_version.parse()?;
        let host_version = CString::new(version.as_str())
            .map_err(|_| PluginError::config("host version contains NUL"))?;
        let resolver = ConfigResolver::new(&config)?;

        Ok(Self {
            state: ReentrantMutex::new(RefCell::new(HostState {
                config,
                resolver,
                plugins: BTreeMap::new(),
                images: HashMap::new(),
                overrides: OverrideTable::new(),
                ledger: InitLedger::new(),
                shadowed: Vec::new(),
            })),
            loader: Loader::new(images, version),
            host_version,
        })
    }

    pub fn host_version(&self) -> &HostVersion {
        self.loader.host_version()
    }

    pub fn config(&self) -> PluginsConfig {
        self.state.lock().borrow().config.clone()
    }

    /// Replace the configuration used by later passes.
    pub fn update_config(&self, config: PluginsConfig) -> Result<()> {
        let resolver = ConfigResolver::new(&config)?;
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.config = config;
        state.resolver = resolver;
        Ok(())
    }

    /// Scan the search path and load every eligible plugin not loaded yet.
    ///
    /// Plugins that failed in an earlier pass are tried again. An override
    /// cycle aborts the pass before any plugin code runs.
    pub fn load_new_plugins(&self) -> Result<LoadReport> {
        let guard = self.state.lock();
        let (paths, resolver) = {
            let state = guard.borrow();
            (state.config.search_paths(), state.resolver.clone())
        };

        let candidates = discover(&paths, resolver.name_filter());
        let mut report = LoadReport {
            discovered: candidates.len(),
            ..Default::default()
        };

        let mut done = Vec::new();
        let mut ready = Vec::new();
        let mut shadowed = Vec::new();
        for candidate in candidates {
            if candidate.shadowed {
                report.shadowed += 1;
                shadowed.push(candidate);
                continue;
            }
            let active = {
                let state = guard.borrow();
                state.images.contains_key(&candidate.name)
                    || state
                        .plugins
                        .get(&candidate.name)
                        .is_some_and(LoadedPlugin::is_loaded)
            };
            if active {
                tracing::debug!(plugin = %candidate.name, "Already loaded");
                continue;
            }
            let Some(resolution) = resolver.resolve(&candidate.name) else {
                continue;
            };
            match self.loader.prepare(&candidate, &resolution) {
                Prepared::Ready(prepared) => ready.push(prepared),
                Prepared::Done(record) => done.push(record),
            }
        }
        ready.sort_by(|a, b| a.name.cmp(&b.name));

        let overrides = {
            let state = guard.borrow();
            let declarations: Vec<(&str, &str)> = ready
                .iter()
                .map(|p| (p.name.as_str(), p.metadata.overrides.as_str()))
                .chain(state.plugins.values().filter(|p| p.is_loaded()).map(|p| {
                    let overrides = p.metadata.as_ref().map_or("", |m| m.overrides.as_str());
                    (p.name.as_str(), overrides)
                }))
                .collect();
            OverrideTable::build(declarations)
        };
        let overrides = match overrides {
            Ok(table) => table,
            Err(e) => {
                tracing::error!("Plugin load pass aborted: {}", e);
                return Err(e);
            }
        };

        {
            let mut state = guard.borrow_mut();
            state.shadowed = shadowed;
            state.overrides = overrides.clone();
            for record in done {
                report.count(record.outcome);
                state.plugins.insert(record.name.clone(), record);
            }
        }

        for prepared in ready {
            // a nested pass run from plugin code may have loaded it meanwhile
            if guard.borrow().images.contains_key(&prepared.name) {
                tracing::debug!(plugin = %prepared.name, "Already loaded");
                continue;
            }
            if let Some(by) = overrides.overridden_by(&prepared.name) {
                let record = prepared.overridden(by);
                report.count(record.outcome);
                guard.borrow_mut().plugins.insert(record.name.clone(), record);
                continue;
            }

            let name = prepared.name.clone();
            report.overridden += Self::retire_overridden(&guard, &overrides, &name);
            guard
                .borrow_mut()
                .images
                .insert(name.clone(), Arc::clone(prepared.image()));

            let ctx = self.context();
            let record = self.loader.activate(prepared, &ctx);

            let mut state = guard.borrow_mut();
            if !record.is_loaded() {
                state.images.remove(&name);
            }
            report.count(record.outcome);
            state.plugins.insert(name, record);
        }

        tracing::info!(
            "Plugin pass: {} discovered, {} loaded, {} disabled, {} overridden, {} version mismatch, {} failed",
            report.discovered,
            report.loaded,
            report.disabled,
            report.overridden,
            report.version_mismatch,
            report.failed
        );
        Ok(report)
    }

    /// Close plugins loaded by an earlier pass that `overrider` now overrides.
    ///
    /// Returns how many were retired.
    fn retire_overridden(
        guard: &ReentrantMutexGuard<'_, RefCell<HostState>>,
        overrides: &OverrideTable,
        overrider: &str,
    ) -> usize {
        let mut closing: Vec<Arc<ImageHandle>> = Vec::new();
        let mut retired = 0;
        {
            let mut state = guard.borrow_mut();
            let state = &mut *state;
            let targets: Vec<String> = overrides
                .edges()
                .filter(|(_, by)| *by == overrider)
                .map(|(target, _)| target.to_string())
                .collect();

            for target in targets {
                let Some(record) = state.plugins.get_mut(&target).filter(|p| p.is_loaded()) else {
                    continue;
                };
                tracing::info!("Plugin {} overridden by {}, unloading", target, overrider);
                closing.extend(record.retire(overrider));
                closing.extend(state.images.remove(&target));
                retired += 1;
            }
        }

        drop(closing);
        retired
    }

    /// Run `symbol` in the loaded plugin `plugin` unless it already ran.
    ///
    /// The function is marked before it is entered, so a call that re-enters
    /// through a dependency cycle returns `Ok` instead of recursing.
    pub fn call_init(&self, plugin: &str, symbol: &str) -> std::result::Result<(), InitError> {
        let guard = self.state.lock();
        let (image, function) = {
            let state = guard.borrow();
            let image = state
                .images
                .get(plugin)
                .cloned()
                .ok_or_else(|| InitError::not_found(plugin, symbol))?;
            // SAFETY: symbols called through this path use the init signature.
            let function = unsafe { image.function(symbol) }
                .ok_or_else(|| InitError::not_found(plugin, symbol))?;
            (image, function)
        };

        let id = FunctionId::new(image.id(), function);
        if !guard.borrow_mut().ledger.mark(id) {
            return Ok(());
        }

        tracing::debug!(plugin = %plugin, "Calling init function {}", symbol);
        let ctx = self.context();
        // SAFETY: `image` keeps the code mapped until the call returns.
        let status = unsafe { function(&ctx) };
        drop(image);

        if status == INIT_STATUS_OK {
            Ok(())
        } else {
            Err(InitError::Failed {
                plugin: plugin.to_string(),
                symbol: symbol.to_string(),
                status,
            })
        }
    }

    /// [`call_init`](Self::call_init) for `plughost_init_<name>`.
    pub fn call_init_function(&self, plugin: &str, name: &str) -> std::result::Result<(), InitError> {
        self.call_init(plugin, &init_symbol(name))
    }

    /// Address of `symbol` in a loaded plugin.
    pub fn get_symbol(&self, plugin: &str, symbol: &str) -> Option<NonNull<c_void>> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.images.get(plugin)?.symbol(symbol)
    }

    pub fn status(&self, plugin: &str) -> Option<LoadOutcome> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.plugins.get(plugin).map(|p| p.outcome)
    }

    pub fn plugin(&self, plugin: &str) -> Option<LoadedPlugin> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.plugins.get(plugin).cloned()
    }

    /// Every plugin record, in name order.
    pub fn summaries(&self) -> Vec<PluginSummary> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.plugins.values().map(LoadedPlugin::summary).collect()
    }

    /// Candidates from the last pass hidden by an earlier same-named file.
    pub fn shadowed(&self) -> Vec<PluginCandidate> {
        self.state.lock().borrow().shadowed.clone()
    }

    pub fn overrides(&self) -> OverrideTable {
        self.state.lock().borrow().overrides.clone()
    }

    /// Number of distinct init functions entered so far.
    pub fn init_calls(&self) -> usize {
        self.state.lock().borrow().ledger.len()
    }

    /// Close a loaded plugin's image and forget its record.
    pub fn unload(&self, plugin: &str) -> Result<()> {
        let guard = self.state.lock();
        let (record, image) = {
            let mut state = guard.borrow_mut();
            if !state.plugins.get(plugin).is_some_and(LoadedPlugin::is_loaded) {
                return Err(PluginError::NotFound(plugin.to_string()));
            }
            let image = state.images.remove(plugin);
            (state.plugins.remove(plugin), image)
        };

        tracing::info!("Unloading plugin: {}", plugin);
        drop(record);
        drop(image);
        Ok(())
    }

    /// Close every image and clear the registry.
    pub fn shutdown(&self) {
        let guard = self.state.lock();
        let (plugins, images) = {
            let mut state = guard.borrow_mut();
            (
                std::mem::take(&mut state.plugins),
                std::mem::take(&mut state.images),
            )
        };

        let loaded = plugins.values().filter(|p| p.is_loaded()).count();
        if loaded > 0 {
            tracing::info!("Shutting down {} plugins", loaded);
        }
        drop(images);
        for (_, mut record) in plugins {
            drop(record.take_image());
        }
    }

    fn context(&self) -> HostContext {
        HostContext {
            abi_version: PLUGIN_ABI_VERSION,
            host: self as *const Self as *const c_void,
            host_version: self.host_version.as_ptr(),
            call_init: ffi_call_init,
            get_symbol: ffi_get_symbol,
        }
    }
}

impl Drop for PluginHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("host_version", self.host_version())
            .finish_non_exhaustive()
    }
}

unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

unsafe extern "C" fn ffi_call_init(
    host: *const c_void,
    plugin: *const c_char,
    symbol: *const c_char,
) -> c_int {
    let Some(host) = (host as *const PluginHost).as_ref() else {
        return INIT_STATUS_NOT_FOUND;
    };
    let (Some(plugin), Some(symbol)) = (c_str(plugin), c_str(symbol)) else {
        return INIT_STATUS_NOT_FOUND;
    };
    match host.call_init(plugin, symbol) {
        Ok(()) => INIT_STATUS_OK,
        Err(InitError::NotFound { .. }) => INIT_STATUS_NOT_FOUND,
        Err(InitError::Failed { status, .. }) => status,
    }
}

unsafe extern "C" fn ffi_get_symbol(
    host: *const c_void,
    plugin: *const c_char,
    symbol: *const c_char,
) -> *const c_void {
    let Some(host) = (host as *const PluginHost).as_ref() else {
        return std::ptr::null();
    };
    let (Some(plugin), Some(symbol)) = (c_str(plugin), c_str(symbol)) else {
        return std::ptr::null();
    };
    host.get_symbol(plugin, symbol)
        .map_or(std::ptr::null(), |ptr| ptr.as_ptr() as *const c_void)
}
