//! Host version and plugin compatibility checks.
//!
//! Versions are `<major>.<minor>`; a trailing patch component is accepted and
//! ignored. A plugin requiring `M.m` runs on a host `M.n` with `n >= m`.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::PluginError;

/// Version the host advertises to plugins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostVersion {
    major: u64,
    minor: u64,
    raw: String,
}

impl HostVersion {
    pub fn new(major: u64, minor: u64) -> Self {
        Self {
            major,
            minor,
            raw: format!("{}.{}", major, minor),
        }
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Check a plugin's `version_required` against this host.
    ///
    /// An empty requirement is always satisfied.
    pub fn check(&self, required: &str) -> Result<(), PluginError> {
        let required = required.trim();
        if required.is_empty() {
            return Ok(());
        }

        let mismatch = || PluginError::VersionMismatch {
            required: required.to_string(),
            host: self.raw.clone(),
        };

        let (major, minor) = parse_major_minor(required).ok_or_else(mismatch)?;
        if major == self.major && self.minor >= minor {
            Ok(())
        } else {
            Err(mismatch())
        }
    }

    pub fn is_compatible(&self, required: &str) -> bool {
        self.check(required).is_ok()
    }
}

impl FromStr for HostVersion {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = parse_major_minor(s)
            .ok_or_else(|| PluginError::config(format!("Invalid host version: {:?}", s)))?;
        Ok(Self {
            major,
            minor,
            raw: s.trim().to_string(),
        })
    }
}

impl Display for HostVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parse `<major>.<minor>` or a full semver string.
fn parse_major_minor(s: &str) -> Option<(u64, u64)> {
    let s = s.trim();
    let version = semver::Version::parse(s)
        .or_else(|_| semver::Version::parse(&format!("{}.0", s)))
        .ok()?;
    Some((version.major, version.minor))
}
