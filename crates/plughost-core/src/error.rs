//! Error types for plugin discovery, loading and init calls.

use std::path::PathBuf;

/// Result type for plugin host operations.
pub type Result<T> = std::result::Result<T, PluginError>;

/// Plugin host errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    /// Malformed or missing registration record.
    #[error("Invalid plugin metadata: {0}")]
    Metadata(#[from] MetadataError),

    /// Override declarations form a cycle; fatal for the whole pass.
    #[error("Override cycle detected: {}", .cycle.join(" -> "))]
    OverrideCycle { cycle: Vec<String> },

    /// The image could not be opened, lacks its entry point, or asked to be unloaded.
    #[error("Failed to load plugin {}: {reason}", .path.display())]
    LoadFailed { path: PathBuf, reason: String },

    /// Plugin requires a host version this host does not satisfy.
    #[error("Plugin version mismatch: requires {required}, host is {host}")]
    VersionMismatch { required: String, host: String },

    /// Invalid plugin configuration.
    #[error("Invalid plugin configuration: {0}")]
    InvalidConfiguration(String),

    /// Plugin not found.
    #[error("Plugin not found: {0}")]
    NotFound(String),

    /// Init function dependency failure.
    #[error(transparent)]
    Init(#[from] InitError),
}

impl PluginError {
    pub fn load_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::LoadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }
}

/// Registration record errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    #[error("no registration record exported")]
    MissingRecord,

    #[error("both fixed and offset/length registration records exported")]
    AmbiguousRecord,

    #[error("offset/length registration record without data segment")]
    MissingDataSegment,

    #[error("field '{field}' exceeds {max} bytes")]
    FieldTooLong { field: &'static str, max: usize },

    #[error("field '{field}' ({offset}+{length}) runs past data segment of {segment_len} bytes")]
    OutOfBounds {
        field: &'static str,
        offset: usize,
        length: usize,
        segment_len: usize,
    },

    #[error("field '{field}' is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("field '{field}' contains a NUL byte")]
    EmbeddedNul { field: &'static str },
}

/// Errors surfaced to plugin code calling init functions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("Plugin {plugin} and/or symbol {symbol} not found")]
    NotFound { plugin: String, symbol: String },

    #[error("Init function {symbol} in plugin {plugin} failed with status {status}")]
    Failed {
        plugin: String,
        symbol: String,
        status: i32,
    },
}

impl InitError {
    pub fn not_found(plugin: &str, symbol: &str) -> Self {
        Self::NotFound {
            plugin: plugin.to_string(),
            symbol: symbol.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display() {
        let err = PluginError::OverrideCycle {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Override cycle detected: a -> b -> a");
    }

    #[test]
    fn test_init_error_display() {
        let err = InitError::not_found("nat", "plughost_init_setup");
        assert_eq!(
            err.to_string(),
            "Plugin nat and/or symbol plughost_init_setup not found"
        );
    }

    #[test]
    fn test_metadata_error_converts() {
        let err: PluginError = MetadataError::MissingRecord.into();
        assert!(err.to_string().contains("no registration record"));
    }
}
