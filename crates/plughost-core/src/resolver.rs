//! Per-plugin enable/disable decisions.
//!
//! Precedence: explicit enable > explicit disable > the plugin's own
//! `default_disabled` > the global `default_disable`. Among directives, the
//! last matching one that says enable or disable wins.

use globset::{Glob, GlobMatcher};

use crate::config::{PluginDirective, PluginsConfig};
use crate::error::{PluginError, Result};

/// Final enablement of one plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    Enabled,
    Disabled,
}

/// Configuration outcome for one admitted plugin name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Decision made by a directive, if any matched with enable/disable.
    pub explicit: Option<Decision>,
    pub skip_version_check: bool,
    pub global_default_disabled: bool,
}

impl Resolution {
    /// Decision once the plugin's own `default_disabled` flag is known.
    pub fn decision(&self, metadata_default_disabled: bool) -> Decision {
        match self.explicit {
            Some(decision) => decision,
            None if self.global_default_disabled || metadata_default_disabled => {
                Decision::Disabled
            }
            None => Decision::Enabled,
        }
    }

    /// Decision that holds whatever the plugin's metadata says, so the image
    /// need not be opened to learn it.
    pub fn decision_without_metadata(&self) -> Option<Decision> {
        match self.explicit {
            Some(decision) => Some(decision),
            None if self.global_default_disabled => Some(Decision::Disabled),
            None => None,
        }
    }
}

/// A directive name: exact unless it contains glob metacharacters.
#[derive(Debug, Clone)]
pub struct NamePattern {
    pattern: String,
    matcher: Option<GlobMatcher>,
}

impl NamePattern {
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        let matcher = compile_glob(&pattern)?;
        Ok(Self { pattern, matcher })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, name: &str) -> bool {
        match &self.matcher {
            Some(matcher) => matcher.is_match(name),
            None => self.pattern == name,
        }
    }
}

/// The name filter: a glob, or a plain name prefix.
#[derive(Debug, Clone)]
pub struct NameFilter {
    pattern: String,
    matcher: Option<GlobMatcher>,
}

impl NameFilter {
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        let matcher = compile_glob(&pattern)?;
        Ok(Self { pattern, matcher })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn admits(&self, name: &str) -> bool {
        match &self.matcher {
            Some(matcher) => matcher.is_match(name),
            None => name.starts_with(&self.pattern),
        }
    }
}

fn compile_glob(pattern: &str) -> Result<Option<GlobMatcher>> {
    let is_glob = pattern.contains('*') || pattern.contains('?') || pattern.contains('[');
    if !is_glob {
        return Ok(None);
    }
    let glob = Glob::new(pattern).map_err(|e| {
        PluginError::config(format!("Invalid plugin name pattern {:?}: {}", pattern, e))
    })?;
    Ok(Some(glob.compile_matcher()))
}

/// Compiled form of [`PluginsConfig`]'s filter, directives and default.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    filter: Option<NameFilter>,
    directives: Vec<(NamePattern, PluginDirective)>,
    default_disabled: bool,
}

impl ConfigResolver {
    pub fn new(config: &PluginsConfig) -> Result<Self> {
        config.validate()?;
        let filter = config.name_filter.as_deref().map(NameFilter::new).transpose()?;
        let directives = config
            .directives
            .iter()
            .map(|d| Ok((NamePattern::new(d.name.trim())?, d.clone())))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            filter,
            directives,
            default_disabled: config.default_disable,
        })
    }

    pub fn name_filter(&self) -> Option<&NameFilter> {
        self.filter.as_ref()
    }

    /// Whether the name filter lets `name` through.
    pub fn admits(&self, name: &str) -> bool {
        self.filter.as_ref().map_or(true, |f| f.admits(name))
    }

    /// Directive outcome for `name`, or `None` if the name filter excludes it.
    pub fn resolve(&self, name: &str) -> Option<Resolution> {
        if !self.admits(name) {
            return None;
        }

        let mut explicit = None;
        let mut skip_version_check = false;
        for (pattern, directive) in &self.directives {
            if !pattern.matches(name) {
                continue;
            }
            if directive.enable {
                explicit = Some(Decision::Enabled);
            } else if directive.disable {
                explicit = Some(Decision::Disabled);
            }
            skip_version_check |= directive.skip_version_check;
        }

        Some(Resolution {
            explicit,
            skip_version_check,
            global_default_disabled: self.default_disabled,
        })
    }

    /// Decision and skip-version-check flag for `name`, given the plugin's
    /// own `default_disabled`. `None` if the name filter excludes it.
    pub fn decide(&self, name: &str, metadata_default_disabled: bool) -> Option<(Decision, bool)> {
        self.resolve(name)
            .map(|r| (r.decision(metadata_default_disabled), r.skip_version_check))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(config: PluginsConfig) -> ConfigResolver {
        ConfigResolver::new(&config).unwrap()
    }

    #[test]
    fn test_pattern_exact_and_glob() {
        let exact = NamePattern::new("acl").unwrap();
        assert!(exact.matches("acl"));
        assert!(!exact.matches("acl_plugin"));

        let glob = NamePattern::new("acl*").unwrap();
        assert!(glob.matches("acl_plugin"));
        assert!(!glob.matches("nat"));
    }

    #[test]
    fn test_filter_prefix_and_glob() {
        let prefix = NameFilter::new("ac").unwrap();
        assert!(prefix.admits("acl"));
        assert!(!prefix.admits("nat"));

        let glob = NameFilter::new("*_test").unwrap();
        assert!(glob.admits("acl_test"));
        assert!(!glob.admits("acl"));
    }

    #[test]
    fn test_invalid_glob_rejected() {
        assert!(NamePattern::new("acl[").is_err());
    }

    #[test]
    fn test_enable_wins_within_directive() {
        let r = resolver(
            PluginsConfig::new().with_directive(PluginDirective::new("x").enable().disable()),
        );
        assert_eq!(r.decide("x", false), Some((Decision::Enabled, false)));
    }

    #[test]
    fn test_later_directive_overrides() {
        let r = resolver(
            PluginsConfig::new()
                .with_directive(PluginDirective::new("x").enable())
                .with_directive(PluginDirective::new("*").disable()),
        );
        assert_eq!(r.decide("x", false), Some((Decision::Disabled, false)));
    }

    #[test]
    fn test_skip_only_directive_keeps_decision() {
        let r = resolver(
            PluginsConfig::new()
                .with_directive(PluginDirective::new("x").disable())
                .with_directive(PluginDirective::new("x").skip_version_check()),
        );
        assert_eq!(r.decide("x", false), Some((Decision::Disabled, true)));
    }

    #[test]
    fn test_decision_without_metadata() {
        let r = resolver(PluginsConfig::new());
        assert_eq!(r.resolve("x").unwrap().decision_without_metadata(), None);

        let r = resolver(PluginsConfig::new().with_default_disable(true));
        assert_eq!(
            r.resolve("x").unwrap().decision_without_metadata(),
            Some(Decision::Disabled)
        );
    }
}
