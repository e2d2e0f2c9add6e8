//! Registration record reading from both record forms.

use std::ptr;

use plughost_core::metadata::{self, PluginMetadata};
use plughost_core::{ImageHandle, MetadataError, StaticImage};
use plughost_sdk::abi::{
    PluginRegistration, PluginRegistrationR2, R2Data, R2String, R2_DATA_SYMBOL,
    REGISTRATION_R2_SYMBOL, REGISTRATION_SYMBOL,
};

static FIXED: PluginRegistration = PluginRegistration::new("1.4")
    .version_required("2.3")
    .overrides("legacy_acl, old_acl")
    .early_init(c"plughost_init_tables")
    .description(c"Access lists")
    .default_disabled();

plughost_sdk::registration_r2! {
    static R2_RECORD;
    static R2_DATA;
    version: "1.4",
    version_required: "2.3",
    overrides: "legacy_acl, old_acl",
    early_init: "plughost_init_tables",
    description: "Access lists",
    default_disabled: true,
}

const fn at(offset: usize, length: usize) -> R2String {
    R2String {
        data_segment_offset: offset,
        length,
    }
}

const fn r2(version: R2String) -> PluginRegistrationR2 {
    PluginRegistrationR2 {
        default_disabled: 0,
        version,
        version_required: at(0, 0),
        overrides: at(0, 0),
        early_init: at(0, 0),
        description: at(0, 0),
    }
}

static SHORT_BLOB: R2Data = R2Data::new(b"1.0\0");
static PAST_END: PluginRegistrationR2 = r2(at(2, 5));
static EMPTY: PluginRegistrationR2 = r2(at(0, 0));

static BAD_UTF8_BLOB: R2Data = R2Data::new(b"\xff\xfe");
static BAD_UTF8: PluginRegistrationR2 = r2(at(0, 2));

static UNTERMINATED: PluginRegistration = PluginRegistration {
    flags: 0,
    version: [b'1'; 64],
    version_required: [0; 64],
    overrides: [0; 256],
    early_init: ptr::null(),
    description: ptr::null(),
};

fn handle(image: StaticImage) -> ImageHandle {
    ImageHandle::new("/plugins/libacl.so", Box::new(image))
}

fn read(image: StaticImage) -> Result<PluginMetadata, MetadataError> {
    metadata::read("acl", &handle(image))
}

#[test]
fn test_fixed_and_r2_normalize_identically() {
    let fixed = read(StaticImage::new().with_data(REGISTRATION_SYMBOL, &FIXED)).unwrap();
    let offsets = read(
        StaticImage::new()
            .with_data(REGISTRATION_R2_SYMBOL, &R2_RECORD)
            .with_data(R2_DATA_SYMBOL, &R2_DATA),
    )
    .unwrap();

    assert_eq!(fixed, offsets);
    assert_eq!(fixed.name, "acl");
    assert_eq!(fixed.version, "1.4");
    assert_eq!(fixed.version_required, "2.3");
    assert_eq!(
        fixed.overridden_names().collect::<Vec<_>>(),
        ["legacy_acl", "old_acl"]
    );
    assert_eq!(fixed.early_init.as_deref(), Some("plughost_init_tables"));
    assert_eq!(fixed.description.as_deref(), Some("Access lists"));
    assert!(fixed.default_disabled);
    assert!(!fixed.deep_bind);
}

#[test]
fn test_missing_record() {
    assert_eq!(read(StaticImage::new()), Err(MetadataError::MissingRecord));
}

#[test]
fn test_both_records_is_ambiguous() {
    let image = StaticImage::new()
        .with_data(REGISTRATION_SYMBOL, &FIXED)
        .with_data(REGISTRATION_R2_SYMBOL, &R2_RECORD)
        .with_data(R2_DATA_SYMBOL, &R2_DATA);
    assert_eq!(read(image), Err(MetadataError::AmbiguousRecord));
}

#[test]
fn test_r2_without_blob() {
    let image = StaticImage::new().with_data(REGISTRATION_R2_SYMBOL, &R2_RECORD);
    assert_eq!(read(image), Err(MetadataError::MissingDataSegment));
}

#[test]
fn test_r2_field_past_blob_end() {
    let image = StaticImage::new()
        .with_data(REGISTRATION_R2_SYMBOL, &PAST_END)
        .with_data(R2_DATA_SYMBOL, &SHORT_BLOB);
    assert_eq!(
        read(image),
        Err(MetadataError::OutOfBounds {
            field: "version",
            offset: 2,
            length: 5,
            segment_len: 4,
        })
    );
}

#[test]
fn test_r2_zero_lengths_are_empty() {
    let image = StaticImage::new()
        .with_data(REGISTRATION_R2_SYMBOL, &EMPTY)
        .with_data(R2_DATA_SYMBOL, &SHORT_BLOB);
    let meta = read(image).unwrap();
    assert_eq!(meta.version, "");
    assert_eq!(meta.overrides, "");
    assert_eq!(meta.early_init, None);
    assert_eq!(meta.description, None);
    assert!(!meta.default_disabled);
}

#[test]
fn test_r2_invalid_utf8() {
    let image = StaticImage::new()
        .with_data(REGISTRATION_R2_SYMBOL, &BAD_UTF8)
        .with_data(R2_DATA_SYMBOL, &BAD_UTF8_BLOB);
    assert_eq!(read(image), Err(MetadataError::InvalidUtf8 { field: "version" }));
}

#[test]
fn test_unterminated_fixed_field_is_rejected() {
    let image = StaticImage::new().with_data(REGISTRATION_SYMBOL, &UNTERMINATED);
    assert_eq!(
        read(image),
        Err(MetadataError::FieldTooLong {
            field: "version",
            max: 63,
        })
    );
}
