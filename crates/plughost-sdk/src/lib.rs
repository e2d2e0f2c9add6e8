//! plughost plugin SDK
//!
//! Types and macros a plugin image needs to be discovered and loaded by a
//! plughost host.
//!
//! A plugin is a `cdylib` that exports:
//! - exactly one registration record, either [`abi::PluginRegistration`]
//!   (`plughost_plugin_registration`) or [`abi::PluginRegistrationR2`]
//!   (`plughost_plugin_r2`) together with its blob (`plughost_plugin_r2_data`)
//! - a registration entry `plughost_register_<name>` where `<name>` is the
//!   library file name without platform prefix and extension
//! - optionally init functions `plughost_init_<x>` other plugins may depend on
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use plughost_sdk::prelude::*;
//!
//! export_registration!(
//!     PluginRegistration::new("1.0")
//!         .version_required("2.0")
//!         .description(c"Counts packets")
//! );
//!
//! #[no_mangle]
//! pub unsafe extern "C" fn plughost_register_counter(ctx: *const HostContext) -> c_int {
//!     INIT_STATUS_OK
//! }
//! ```

pub mod abi;
#[macro_use]
pub mod macros;

pub use abi::{
    entry_symbol, init_symbol, HostContext, PluginEntryFn, PluginInitFn, PluginRegistration,
    PluginRegistrationR2, R2Data, R2String, RegistrationFlags, PLUGIN_ABI_VERSION,
};

/// Prelude module with common imports
pub mod prelude {
    pub use crate::abi::{
        HostContext, PluginRegistration, PluginRegistrationR2, R2Data, INIT_STATUS_NOT_FOUND,
        INIT_STATUS_OK,
    };
    pub use crate::{call_plugin_init, export_registration, export_registration_r2};
    pub use std::ffi::c_int;
}
