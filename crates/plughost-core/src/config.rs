//! Plugin search and enablement configuration.
//!
//! Loaded from the `[plugins]` table of a TOML file:
//!
//! ```toml
//! [plugins]
//! path = ["/usr/lib/plughost_plugins"]
//! add_path = ["/opt/site/plugins"]
//! name_filter = "acl*"
//! default_disable = false
//!
//! [[plugins.plugin]]
//! name = "*"
//! disable = true
//!
//! [[plugins.plugin]]
//! name = "acl"
//! enable = true
//! skip_version_check = true
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, Result};

/// Environment variable replacing the configured search path.
pub const PLUGIN_PATH_ENV: &str = "PLUGHOST_PLUGIN_PATH";

/// Default plugin directory, relative to the host executable's directory.
pub const DEFAULT_PLUGIN_DIR: &str = "../lib/plughost_plugins";

/// One per-plugin directive. Later matching directives take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginDirective {
    /// Plugin name or glob pattern.
    pub name: String,
    pub disable: bool,
    pub enable: bool,
    pub skip_version_check: bool,
}

impl PluginDirective {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn enable(mut self) -> Self {
        self.enable = true;
        self
    }

    pub fn disable(mut self) -> Self {
        self.disable = true;
        self
    }

    pub fn skip_version_check(mut self) -> Self {
        self.skip_version_check = true;
        self
    }
}

/// Resolved plugin options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Search directories, replacing the default path.
    pub path: Vec<PathBuf>,
    /// Directories appended after `path`.
    pub add_path: Vec<PathBuf>,
    /// Only plugins whose name matches are considered at all.
    pub name_filter: Option<String>,
    /// Disable every plugin no directive enables.
    pub default_disable: bool,
    /// Per-plugin directives, in input order.
    #[serde(rename = "plugin")]
    pub directives: Vec<PluginDirective>,
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    plugins: PluginsConfig,
}

impl PluginsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `[plugins]` table of a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)
            .map_err(|e| PluginError::config(format!("Failed to parse config: {}", e)))?;
        file.plugins.validate()?;
        Ok(file.plugins)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PluginError::config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path.push(path.into());
        self
    }

    pub fn with_add_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.add_path.push(path.into());
        self
    }

    pub fn with_name_filter(mut self, filter: impl Into<String>) -> Self {
        self.name_filter = Some(filter.into());
        self
    }

    pub fn with_default_disable(mut self, disable: bool) -> Self {
        self.default_disable = disable;
        self
    }

    pub fn with_directive(mut self, directive: PluginDirective) -> Self {
        self.directives.push(directive);
        self
    }

    /// Reject directives without a name and empty filters.
    pub fn validate(&self) -> Result<()> {
        if let Some(filter) = &self.name_filter {
            if filter.trim().is_empty() {
                return Err(PluginError::config("name_filter must not be empty"));
            }
        }
        for (index, directive) in self.directives.iter().enumerate() {
            if directive.name.trim().is_empty() {
                return Err(PluginError::config(format!(
                    "plugin directive #{} has no name",
                    index
                )));
            }
        }
        Ok(())
    }

    /// Directories to scan, in precedence order.
    ///
    /// `PLUGHOST_PLUGIN_PATH` replaces `path`; with neither set the default
    /// directory next to the executable is used. `add_path` always follows.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        let env_path = std::env::var_os(PLUGIN_PATH_ENV);
        let mut paths: Vec<PathBuf> = match env_path {
            Some(value) if !value.is_empty() => std::env::split_paths(&value).collect(),
            _ if !self.path.is_empty() => self.path.clone(),
            _ => default_search_path().into_iter().collect(),
        };
        paths.extend(self.add_path.iter().cloned());
        paths
    }
}

/// `<exe dir>/../lib/plughost_plugins`, if the executable path is known.
pub fn default_search_path() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    Some(exe.parent()?.join(DEFAULT_PLUGIN_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plugins_table() {
        let config = PluginsConfig::from_toml_str(
            r#"
            [plugins]
            path = ["/usr/lib/plughost_plugins"]
            add_path = ["/opt/site"]
            name_filter = "acl*"
            default_disable = true

            [[plugins.plugin]]
            name = "*"
            disable = true

            [[plugins.plugin]]
            name = "acl"
            enable = true
            skip_version_check = true
            "#,
        )
        .unwrap();

        assert_eq!(config.path, vec![PathBuf::from("/usr/lib/plughost_plugins")]);
        assert_eq!(config.add_path, vec![PathBuf::from("/opt/site")]);
        assert_eq!(config.name_filter.as_deref(), Some("acl*"));
        assert!(config.default_disable);
        assert_eq!(
            config.directives,
            vec![
                PluginDirective::new("*").disable(),
                PluginDirective::new("acl").enable().skip_version_check(),
            ]
        );
    }

    #[test]
    fn test_missing_table_is_default() {
        let config = PluginsConfig::from_toml_str("").unwrap();
        assert_eq!(config, PluginsConfig::default());
    }

    #[test]
    fn test_directive_without_name_rejected() {
        let err = PluginsConfig::from_toml_str(
            r#"
            [[plugins.plugin]]
            enable = true
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, PluginError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_unknown_toml_is_error() {
        assert!(PluginsConfig::from_toml_str("[plugins\npath = 3").is_err());
    }

    #[test]
    fn test_add_path_follows_path() {
        let config = PluginsConfig::new()
            .with_path("/a")
            .with_add_path("/b");
        if std::env::var_os(PLUGIN_PATH_ENV).is_none() {
            assert_eq!(
                config.search_paths(),
                vec![PathBuf::from("/a"), PathBuf::from("/b")]
            );
        }
    }
}
