//! Declarative macros for exporting registration records.

/// Export a fixed-layout registration record under the well-known symbol.
///
/// # Example
///
/// ```rust,ignore
/// use plughost_sdk::prelude::*;
///
/// export_registration!(
///     PluginRegistration::new("1.0")
///         .version_required("2.3")
///         .description(c"Packet counters")
/// );
/// ```
#[macro_export]
macro_rules! export_registration {
    ($registration:expr $(,)?) => {
        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static plughost_plugin_registration: $crate::abi::PluginRegistration = $registration;
    };
}

/// Declare an offset/length registration record and the blob it points into.
///
/// Field values must be string literals; they are concatenated into one blob
/// and the record's offsets are computed at compile time.
///
/// # Example
///
/// ```rust
/// plughost_sdk::registration_r2! {
///     static RECORD;
///     static DATA;
///     version: "1.0",
///     version_required: "2.0",
///     overrides: "",
///     early_init: "",
///     description: "Example",
///     default_disabled: false,
/// }
///
/// assert_eq!(RECORD.description.length, 7);
/// assert_eq!(DATA.len, 13);
/// ```
#[macro_export]
macro_rules! registration_r2 {
    (
        $(#[$record_attr:meta])* static $record:ident;
        $(#[$data_attr:meta])* static $data:ident;
        version: $version:literal,
        version_required: $required:literal,
        overrides: $overrides:literal,
        early_init: $early_init:literal,
        description: $description:literal,
        default_disabled: $default_disabled:expr $(,)?
    ) => {
        $(#[$data_attr])*
        pub static $data: $crate::abi::R2Data = $crate::abi::R2Data::new(
            concat!($version, $required, $overrides, $early_init, $description).as_bytes(),
        );

        $(#[$record_attr])*
        pub static $record: $crate::abi::PluginRegistrationR2 =
            $crate::abi::PluginRegistrationR2::packed(
                [
                    $version.len(),
                    $required.len(),
                    $overrides.len(),
                    $early_init.len(),
                    $description.len(),
                ],
                $default_disabled,
            );
    };
}

/// Export an offset/length registration record under the well-known symbols.
///
/// Takes the same fields as [`registration_r2!`].
#[macro_export]
macro_rules! export_registration_r2 {
    ($($fields:tt)*) => {
        $crate::registration_r2! {
            #[no_mangle]
            #[allow(non_upper_case_globals)]
            static plughost_plugin_r2;
            #[no_mangle]
            #[allow(non_upper_case_globals)]
            static plughost_plugin_r2_data;
            $($fields)*
        }
    };
}

/// Call `plughost_init_<init>` in `plugin` through the host context.
///
/// Expands to an `unsafe` call; use it inside the plugin's entry point or init
/// function with the context that was passed in.
///
/// ```rust,ignore
/// #[no_mangle]
/// pub unsafe extern "C" fn plughost_register_nat(ctx: *const HostContext) -> c_int {
///     match call_plugin_init!(&*ctx, "ip_tables", setup) {
///         Ok(()) => INIT_STATUS_OK,
///         Err(status) => status,
///     }
/// }
/// ```
#[macro_export]
macro_rules! call_plugin_init {
    ($ctx:expr, $plugin:literal, $init:ident) => {{
        let plugin = ::std::ffi::CStr::from_bytes_with_nul(concat!($plugin, "\0").as_bytes());
        let symbol = ::std::ffi::CStr::from_bytes_with_nul(
            concat!("plughost_init_", stringify!($init), "\0").as_bytes(),
        );
        match (plugin, symbol) {
            (Ok(plugin), Ok(symbol)) => $ctx.call_init(plugin, symbol),
            _ => Err($crate::abi::INIT_STATUS_NOT_FOUND),
        }
    }};
}
