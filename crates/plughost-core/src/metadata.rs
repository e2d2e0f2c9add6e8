//! Registration record reading.
//!
//! An image exports either a fixed-layout [`PluginRegistration`] or an
//! offset/length [`PluginRegistrationR2`] plus its blob. Both are normalized
//! into one [`PluginMetadata`]; nothing past a declared bound is ever read.

use std::ffi::c_char;

use serde::Serialize;

use plughost_sdk::abi::{
    PluginRegistration, PluginRegistrationR2, R2Data, R2String, RegistrationFlags,
    OVERRIDES_FIELD_LEN, POINTER_FIELD_MAX_LEN, R2_DATA_SYMBOL, REGISTRATION_R2_SYMBOL,
    REGISTRATION_SYMBOL, VERSION_FIELD_LEN,
};

use crate::error::MetadataError;
use crate::image::ImageHandle;
use crate::overrides::parse_override_list;

/// Normalized plugin metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PluginMetadata {
    /// Derived from the file name, not from the record.
    pub name: String,
    pub version: String,
    pub version_required: String,
    /// Raw override list as declared.
    pub overrides: String,
    /// Early-init symbol, run before the entry point.
    pub early_init: Option<String>,
    pub description: Option<String>,
    pub default_disabled: bool,
    pub deep_bind: bool,
}

impl PluginMetadata {
    /// Names listed in `overrides`.
    pub fn overridden_names(&self) -> impl Iterator<Item = &str> {
        parse_override_list(&self.overrides)
    }
}

/// A registration record as exported by the image.
#[derive(Clone, Copy)]
pub enum RawRegistration<'a> {
    Fixed(&'a PluginRegistration),
    Offsets {
        record: &'a PluginRegistrationR2,
        data: &'a [u8],
    },
}

impl<'a> RawRegistration<'a> {
    /// Find the one registration record `image` exports.
    pub fn locate(image: &'a ImageHandle) -> Result<Self, MetadataError> {
        // SAFETY: the symbol names are reserved for these record types.
        let fixed = unsafe { image.record::<PluginRegistration>(REGISTRATION_SYMBOL) };
        let r2 = unsafe { image.record::<PluginRegistrationR2>(REGISTRATION_R2_SYMBOL) };

        match (fixed, r2) {
            (Some(_), Some(_)) => Err(MetadataError::AmbiguousRecord),
            (Some(record), None) => Ok(Self::Fixed(record)),
            (None, Some(record)) => {
                let blob = unsafe { image.record::<R2Data>(R2_DATA_SYMBOL) }
                    .ok_or(MetadataError::MissingDataSegment)?;
                let data = if blob.len == 0 {
                    &[][..]
                } else if blob.base.is_null() {
                    return Err(MetadataError::MissingDataSegment);
                } else {
                    // SAFETY: the blob describes an immutable static region of the image.
                    unsafe { std::slice::from_raw_parts(blob.base, blob.len) }
                };
                Ok(Self::Offsets { record, data })
            }
            (None, None) => Err(MetadataError::MissingRecord),
        }
    }

    /// Convert into [`PluginMetadata`] for the plugin called `name`.
    pub fn normalize(&self, name: &str) -> Result<PluginMetadata, MetadataError> {
        match *self {
            Self::Fixed(record) => {
                let flags = record.registration_flags();
                Ok(PluginMetadata {
                    name: name.to_string(),
                    version: array_field("version", &record.version)?,
                    version_required: array_field("version_required", &record.version_required)?,
                    overrides: array_field("overrides", &record.overrides)?,
                    // SAFETY: the pointers were set from 'static C strings, or are null.
                    early_init: unsafe { pointer_field("early_init", record.early_init) }?,
                    description: unsafe { pointer_field("description", record.description) }?,
                    default_disabled: flags.contains(RegistrationFlags::DEFAULT_DISABLED),
                    deep_bind: flags.contains(RegistrationFlags::DEEP_BIND),
                })
            }
            Self::Offsets { record, data } => Ok(PluginMetadata {
                name: name.to_string(),
                version: slice_field("version", record.version, data, VERSION_FIELD_LEN)?
                    .unwrap_or_default(),
                version_required: slice_field(
                    "version_required",
                    record.version_required,
                    data,
                    VERSION_FIELD_LEN,
                )?
                .unwrap_or_default(),
                overrides: slice_field("overrides", record.overrides, data, OVERRIDES_FIELD_LEN)?
                    .unwrap_or_default(),
                early_init: slice_field("early_init", record.early_init, data, POINTER_FIELD_MAX_LEN)?,
                description: slice_field(
                    "description",
                    record.description,
                    data,
                    POINTER_FIELD_MAX_LEN,
                )?,
                default_disabled: record.default_disabled != 0,
                deep_bind: false,
            }),
        }
    }
}

/// Read the registration metadata of the plugin `name` from `image`.
pub fn read(name: &str, image: &ImageHandle) -> Result<PluginMetadata, MetadataError> {
    RawRegistration::locate(image)?.normalize(name)
}

/// A NUL-terminated string inside a fixed array.
fn array_field(field: &'static str, bytes: &[u8]) -> Result<String, MetadataError> {
    let end = bytes
        .iter()
        .position(|b| *b == 0)
        .ok_or(MetadataError::FieldTooLong {
            field,
            max: bytes.len() - 1,
        })?;
    utf8(field, &bytes[..end])
}

/// A C string behind a pointer, scanned at most `POINTER_FIELD_MAX_LEN` bytes.
///
/// # Safety
/// `ptr` must be null or point to a readable NUL-terminated string, or to at
/// least `POINTER_FIELD_MAX_LEN` readable bytes.
unsafe fn pointer_field(
    field: &'static str,
    ptr: *const c_char,
) -> Result<Option<String>, MetadataError> {
    if ptr.is_null() {
        return Ok(None);
    }
    let base = ptr as *const u8;
    let mut len = 0;
    while *base.add(len) != 0 {
        len += 1;
        if len >= POINTER_FIELD_MAX_LEN {
            return Err(MetadataError::FieldTooLong {
                field,
                max: POINTER_FIELD_MAX_LEN - 1,
            });
        }
    }
    let text = utf8(field, std::slice::from_raw_parts(base, len))?;
    Ok((!text.is_empty()).then_some(text))
}

/// A `{offset, length}` slice of the blob.
///
/// Trailing NULs are dropped; a field left empty is absent, as with the
/// fixed record. A NUL inside the text is rejected.
fn slice_field(
    field: &'static str,
    location: R2String,
    data: &[u8],
    bound: usize,
) -> Result<Option<String>, MetadataError> {
    let R2String {
        data_segment_offset: offset,
        length,
    } = location;
    if length == 0 {
        return Ok(None);
    }
    if length >= bound {
        return Err(MetadataError::FieldTooLong {
            field,
            max: bound - 1,
        });
    }
    let bytes = offset
        .checked_add(length)
        .and_then(|end| data.get(offset..end))
        .ok_or(MetadataError::OutOfBounds {
            field,
            offset,
            length,
            segment_len: data.len(),
        })?;
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |last| last + 1);
    let bytes = &bytes[..end];
    if bytes.contains(&0) {
        return Err(MetadataError::EmbeddedNul { field });
    }
    let text = utf8(field, bytes)?;
    Ok((!text.is_empty()).then_some(text))
}

fn utf8(field: &'static str, bytes: &[u8]) -> Result<String, MetadataError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| MetadataError::InvalidUtf8 { field })
}
