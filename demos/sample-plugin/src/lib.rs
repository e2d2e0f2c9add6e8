//! Sample plughost plugin
//!
//! Builds to `libsample_plugin.so` (or the platform equivalent), so the host
//! knows it as `sample_plugin` and calls `plughost_register_sample_plugin`.
//!
//! ```sh
//! cargo build --release
//! plughost --path target/release load
//! ```
//!
//! # Features
//!
//! - Offset/length registration record
//! - Early init run before the entry point
//! - An init function other plugins can depend on

use std::sync::atomic::{AtomicU64, Ordering};

use plughost_sdk::prelude::*;

export_registration_r2! {
    version: "0.1.0",
    version_required: "0.1",
    overrides: "",
    early_init: "plughost_init_early",
    description: "Sample plugin counting its init calls",
    default_disabled: false,
}

/// Times `plughost_init_setup` ran; the host guarantees at most once.
static SETUP_CALLS: AtomicU64 = AtomicU64::new(0);

#[no_mangle]
pub unsafe extern "C" fn plughost_init_early(_ctx: *const HostContext) -> c_int {
    INIT_STATUS_OK
}

#[no_mangle]
pub unsafe extern "C" fn plughost_init_setup(_ctx: *const HostContext) -> c_int {
    SETUP_CALLS.fetch_add(1, Ordering::Relaxed);
    INIT_STATUS_OK
}

#[no_mangle]
pub unsafe extern "C" fn plughost_register_sample_plugin(ctx: *const HostContext) -> c_int {
    let Some(ctx) = ctx.as_ref() else {
        return INIT_STATUS_NOT_FOUND;
    };
    if let Err(status) = call_plugin_init!(ctx, "sample_plugin", setup) {
        return status;
    }
    // a second request is answered from the host's ledger
    match call_plugin_init!(ctx, "sample_plugin", setup) {
        Ok(()) if SETUP_CALLS.load(Ordering::Relaxed) == 1 => INIT_STATUS_OK,
        Ok(()) => 1,
        Err(status) => status,
    }
}
