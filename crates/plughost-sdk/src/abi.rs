//! Binary contract between the host and a plugin image.
//!
//! Every symbol name and `#[repr(C)]` layout the host looks up lives here, so a
//! plugin built against this crate and the host agree on them by construction.

use std::ffi::{c_char, c_int, c_void, CStr};
use std::ptr::NonNull;

/// Current host context ABI version.
pub const PLUGIN_ABI_VERSION: u32 = 1;

/// Symbol exporting a fixed-layout [`PluginRegistration`].
pub const REGISTRATION_SYMBOL: &str = "plughost_plugin_registration";

/// Symbol exporting an offset/length [`PluginRegistrationR2`].
pub const REGISTRATION_R2_SYMBOL: &str = "plughost_plugin_r2";

/// Symbol exporting the [`R2Data`] blob the offset/length record points into.
pub const R2_DATA_SYMBOL: &str = "plughost_plugin_r2_data";

/// Prefix of the registration entry point, followed by the plugin name.
pub const ENTRY_SYMBOL_PREFIX: &str = "plughost_register_";

/// Prefix of init functions callable through [`HostContext::call_init`].
pub const INIT_SYMBOL_PREFIX: &str = "plughost_init_";

/// Size of the `version` and `version_required` arrays, NUL included.
pub const VERSION_FIELD_LEN: usize = 64;

/// Size of the `overrides` array, NUL included.
pub const OVERRIDES_FIELD_LEN: usize = 256;

/// Upper bound for the pointer-like fields (`early_init`, `description`), NUL included.
pub const POINTER_FIELD_MAX_LEN: usize = 4096;

/// Status returned by init functions and entry points on success.
pub const INIT_STATUS_OK: c_int = 0;

/// Status the host reports when a plugin or init symbol cannot be resolved.
///
/// Reserved: init functions must not return it themselves.
pub const INIT_STATUS_NOT_FOUND: c_int = -1;

bitflags::bitflags! {
    /// Flag bits of [`PluginRegistration::flags`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RegistrationFlags: u8 {
        /// Plugin stays disabled unless a directive enables it.
        const DEFAULT_DISABLED = 1 << 0;
        /// Resolve the plugin's own symbols before global ones.
        const DEEP_BIND = 1 << 1;
    }
}

/// Fixed-layout registration record.
///
/// The three arrays hold NUL-terminated strings; a string that fills its array
/// without a terminator is rejected by the host.
#[repr(C)]
pub struct PluginRegistration {
    pub flags: u8,
    pub version: [u8; VERSION_FIELD_LEN],
    pub version_required: [u8; VERSION_FIELD_LEN],
    pub overrides: [u8; OVERRIDES_FIELD_LEN],
    pub early_init: *const c_char,
    pub description: *const c_char,
}

// SAFETY: the pointer fields only ever refer to immutable 'static C strings.
unsafe impl Sync for PluginRegistration {}

impl PluginRegistration {
    /// Start a record for the given plugin version.
    pub const fn new(version: &str) -> Self {
        Self {
            flags: 0,
            version: fixed_field(version),
            version_required: [0; VERSION_FIELD_LEN],
            overrides: [0; OVERRIDES_FIELD_LEN],
            early_init: std::ptr::null(),
            description: std::ptr::null(),
        }
    }

    pub const fn version_required(mut self, version: &str) -> Self {
        self.version_required = fixed_field(version);
        self
    }

    /// Names of plugins this one supersedes, separated by spaces or commas.
    pub const fn overrides(mut self, names: &str) -> Self {
        self.overrides = fixed_field(names);
        self
    }

    pub const fn early_init(mut self, symbol: &'static CStr) -> Self {
        self.early_init = symbol.as_ptr();
        self
    }

    pub const fn description(mut self, text: &'static CStr) -> Self {
        self.description = text.as_ptr();
        self
    }

    pub const fn default_disabled(mut self) -> Self {
        self.flags |= RegistrationFlags::DEFAULT_DISABLED.bits();
        self
    }

    pub const fn deep_bind(mut self) -> Self {
        self.flags |= RegistrationFlags::DEEP_BIND.bits();
        self
    }

    pub fn registration_flags(&self) -> RegistrationFlags {
        RegistrationFlags::from_bits_truncate(self.flags)
    }
}

/// Copy `value` into a NUL-padded array, failing const evaluation when it
/// does not fit together with its terminator.
pub const fn fixed_field<const N: usize>(value: &str) -> [u8; N] {
    let bytes = value.as_bytes();
    assert!(bytes.len() < N, "registration string does not fit its field");
    let mut out = [0u8; N];
    let mut i = 0;
    while i < bytes.len() {
        out[i] = bytes[i];
        i += 1;
    }
    out
}

/// One `{offset, length}` pair into the image's [`R2Data`] blob.
///
/// A zero length denotes an absent field.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct R2String {
    pub data_segment_offset: usize,
    pub length: usize,
}

/// Offset/length registration record, for toolchains that cannot emit
/// [`PluginRegistration`] directly.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginRegistrationR2 {
    pub default_disabled: c_int,
    pub version: R2String,
    pub version_required: R2String,
    pub overrides: R2String,
    pub early_init: R2String,
    pub description: R2String,
}

impl PluginRegistrationR2 {
    /// Record whose fields are stored back to back in the blob, in the order
    /// version, version_required, overrides, early_init, description.
    pub const fn packed(lengths: [usize; 5], default_disabled: bool) -> Self {
        let mut fields = [R2String {
            data_segment_offset: 0,
            length: 0,
        }; 5];
        let mut cursor = 0;
        let mut i = 0;
        while i < 5 {
            fields[i] = R2String {
                data_segment_offset: cursor,
                length: lengths[i],
            };
            cursor += lengths[i];
            i += 1;
        }
        Self {
            default_disabled: default_disabled as c_int,
            version: fields[0],
            version_required: fields[1],
            overrides: fields[2],
            early_init: fields[3],
            description: fields[4],
        }
    }
}

/// Base and length of the string blob an R2 record refers to.
#[repr(C)]
#[derive(Debug)]
pub struct R2Data {
    pub base: *const u8,
    pub len: usize,
}

// SAFETY: the blob is immutable 'static data.
unsafe impl Sync for R2Data {}

impl R2Data {
    pub const fn new(bytes: &'static [u8]) -> Self {
        Self {
            base: bytes.as_ptr(),
            len: bytes.len(),
        }
    }
}

/// Callback a plugin uses to run an init function exactly once.
pub type HostCallInitFn = unsafe extern "C" fn(
    host: *const c_void,
    plugin: *const c_char,
    symbol: *const c_char,
) -> c_int;

/// Callback a plugin uses to resolve a symbol in another loaded plugin.
pub type HostGetSymbolFn = unsafe extern "C" fn(
    host: *const c_void,
    plugin: *const c_char,
    symbol: *const c_char,
) -> *const c_void;

/// Registration entry point: `plughost_register_<name>`. Zero keeps the
/// plugin loaded, anything else asks the host to unload it.
pub type PluginEntryFn = unsafe extern "C" fn(ctx: *const HostContext) -> c_int;

/// Init function (`plughost_init_<name>`), also the early-init signature.
pub type PluginInitFn = unsafe extern "C" fn(ctx: *const HostContext) -> c_int;

/// Extension context handed to every plugin entry point and init function.
///
/// Only valid for the duration of the call it was passed to.
#[repr(C)]
pub struct HostContext {
    pub abi_version: u32,
    pub host: *const c_void,
    pub host_version: *const c_char,
    pub call_init: HostCallInitFn,
    pub get_symbol: HostGetSymbolFn,
}

impl HostContext {
    /// Run `symbol` in `plugin` unless it already ran.
    ///
    /// # Safety
    /// `self` must be the context the host passed to the running callback.
    pub unsafe fn call_init(&self, plugin: &CStr, symbol: &CStr) -> Result<(), c_int> {
        match (self.call_init)(self.host, plugin.as_ptr(), symbol.as_ptr()) {
            INIT_STATUS_OK => Ok(()),
            status => Err(status),
        }
    }

    /// Address of `symbol` in the loaded plugin `plugin`.
    ///
    /// # Safety
    /// `self` must be the context the host passed to the running callback.
    pub unsafe fn get_symbol(&self, plugin: &CStr, symbol: &CStr) -> Option<NonNull<c_void>> {
        NonNull::new((self.get_symbol)(self.host, plugin.as_ptr(), symbol.as_ptr()) as *mut c_void)
    }

    /// # Safety
    /// `self` must be the context the host passed to the running callback.
    pub unsafe fn host_version(&self) -> &CStr {
        if self.host_version.is_null() {
            c""
        } else {
            CStr::from_ptr(self.host_version)
        }
    }
}

/// Registration entry symbol for a plugin name.
pub fn entry_symbol(plugin_name: &str) -> String {
    format!("{}{}", ENTRY_SYMBOL_PREFIX, symbol_safe(plugin_name))
}

/// Init function symbol for an init name.
pub fn init_symbol(init_name: &str) -> String {
    format!("{}{}", INIT_SYMBOL_PREFIX, symbol_safe(init_name))
}

fn symbol_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_field_is_nul_padded() {
        let field: [u8; 8] = fixed_field("2.3");
        assert_eq!(&field[..4], b"2.3\0");
        assert!(field[3..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_registration_flags() {
        let reg = PluginRegistration::new("1.0").default_disabled().deep_bind();
        let flags = reg.registration_flags();
        assert!(flags.contains(RegistrationFlags::DEFAULT_DISABLED));
        assert!(flags.contains(RegistrationFlags::DEEP_BIND));
    }

    #[test]
    fn test_packed_offsets_are_contiguous() {
        let r2 = PluginRegistrationR2::packed([3, 0, 5, 2, 4], true);
        assert_eq!(r2.default_disabled, 1);
        assert_eq!(r2.version, R2String { data_segment_offset: 0, length: 3 });
        assert_eq!(r2.version_required.length, 0);
        assert_eq!(r2.overrides.data_segment_offset, 3);
        assert_eq!(r2.early_init.data_segment_offset, 8);
        assert_eq!(r2.description.data_segment_offset, 10);
    }

    #[test]
    fn test_symbol_names() {
        assert_eq!(entry_symbol("acl-plugin"), "plughost_register_acl_plugin");
        assert_eq!(init_symbol("setup"), "plughost_init_setup");
    }
}
