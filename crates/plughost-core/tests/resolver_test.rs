//! Enable/disable decisions from directives, defaults and the name filter.

use plughost_core::{ConfigResolver, Decision, PluginDirective, PluginsConfig};

fn resolver(config: PluginsConfig) -> ConfigResolver {
    ConfigResolver::new(&config).unwrap()
}

#[test]
fn test_disable_all_then_enable_one() {
    let r = resolver(
        PluginsConfig::new()
            .with_directive(PluginDirective::new("*").disable())
            .with_directive(PluginDirective::new("X").enable()),
    );

    assert_eq!(r.decide("X", false), Some((Decision::Enabled, false)));
    assert_eq!(r.decide("W", false), Some((Decision::Disabled, false)));
}

#[test]
fn test_name_filter_excludes() {
    let r = resolver(PluginsConfig::new().with_name_filter("acl"));
    assert!(r.admits("acl_plugin"));
    assert_eq!(r.decide("nat", false), None);
    assert!(r.resolve("nat").is_none());
}

#[test]
fn test_metadata_default_applies_without_directive() {
    let r = resolver(PluginsConfig::new());
    assert_eq!(r.decide("x", true), Some((Decision::Disabled, false)));
    assert_eq!(r.decide("x", false), Some((Decision::Enabled, false)));
}

#[test]
fn test_explicit_enable_beats_metadata_default() {
    let r = resolver(PluginsConfig::new().with_directive(PluginDirective::new("x").enable()));
    assert_eq!(r.decide("x", true), Some((Decision::Enabled, false)));
}

#[test]
fn test_explicit_disable_beats_metadata_enabled() {
    let r = resolver(PluginsConfig::new().with_directive(PluginDirective::new("x").disable()));
    assert_eq!(r.decide("x", false), Some((Decision::Disabled, false)));
}

#[test]
fn test_global_default_disable() {
    let r = resolver(
        PluginsConfig::new()
            .with_default_disable(true)
            .with_directive(PluginDirective::new("keep").enable()),
    );
    assert_eq!(r.decide("keep", true), Some((Decision::Enabled, false)));
    assert_eq!(r.decide("other", false), Some((Decision::Disabled, false)));
}

#[test]
fn test_enable_does_not_skip_version_check() {
    let r = resolver(
        PluginsConfig::new()
            .with_directive(PluginDirective::new("x").enable())
            .with_directive(PluginDirective::new("y").skip_version_check()),
    );
    assert_eq!(r.decide("x", false), Some((Decision::Enabled, false)));
    assert_eq!(r.decide("y", false), Some((Decision::Enabled, true)));
}

#[test]
fn test_glob_directive_from_toml() {
    let config = PluginsConfig::from_toml_str(
        r#"
        [plugins]
        default_disable = true

        [[plugins.plugin]]
        name = "acl_*"
        enable = true
        skip_version_check = true
        "#,
    )
    .unwrap();
    let r = resolver(config);

    assert_eq!(r.decide("acl_v4", false), Some((Decision::Enabled, true)));
    assert_eq!(r.decide("nat", false), Some((Decision::Disabled, false)));
}

#[test]
fn test_invalid_directive_pattern_rejected() {
    let config = PluginsConfig::new().with_directive(PluginDirective::new("acl[").enable());
    assert!(ConfigResolver::new(&config).is_err());
}
