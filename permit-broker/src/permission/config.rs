//! Start-up permission configuration
//!
//! The configuration object an embedding host supplies instead of (or in
//! addition to) command-line flags. Stored as JSON:
//!
//! ```json
//! {
//!   "allow": { "net": ["0.0.0.0:8000"], "env": true },
//!   "deny": { "read": ["/etc"] },
//!   "no_prompt": true
//! }
//! ```
//!
//! `true` seeds the unscoped entry, a list seeds one scoped entry per item,
//! and `{ "all": true, "scopes": [..] }` seeds both.

use permit_api::{PermissionKind, PermissionState, Scope, ScopeError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::set::PermissionEntry;

/// Error type for configuration loading and validation
///
/// All of these are fatal at start-up.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read permission config {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse permission config {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid {state} rule for {kind}: {source}")]
    InvalidScope {
        kind: PermissionKind,
        state: PermissionState,
        #[source]
        source: ScopeError,
    },
}

/// A rule for one kind
///
/// `true` (unscoped), a list of scopes, or both as
/// `{ "all": true, "scopes": [...] }`. Use [`Rule::from_parts`] to build the
/// smallest form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rule {
    Unscoped(bool),
    Scoped(Vec<String>),
    Mixed { all: bool, scopes: Vec<String> },
}

impl Default for Rule {
    fn default() -> Self {
        Self::Unscoped(false)
    }
}

impl Rule {
    pub fn from_parts(all: bool, scopes: Vec<String>) -> Self {
        match (all, scopes.is_empty()) {
            (all, true) => Self::Unscoped(all),
            (false, false) => Self::Scoped(scopes),
            (true, false) => Self::Mixed { all, scopes },
        }
    }

    /// Whether the unscoped entry is set
    pub fn is_unscoped(&self) -> bool {
        match self {
            Self::Unscoped(all) | Self::Mixed { all, .. } => *all,
            Self::Scoped(_) => false,
        }
    }

    pub fn scopes(&self) -> &[String] {
        match self {
            Self::Unscoped(_) => &[],
            Self::Scoped(scopes) | Self::Mixed { scopes, .. } => scopes,
        }
    }

    fn is_unset(&self) -> bool {
        !self.is_unscoped() && self.scopes().is_empty()
    }
}

/// Rules per permission kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuleTable {
    #[serde(skip_serializing_if = "Rule::is_unset")]
    pub net: Rule,
    #[serde(skip_serializing_if = "Rule::is_unset")]
    pub read: Rule,
    #[serde(skip_serializing_if = "Rule::is_unset")]
    pub write: Rule,
    #[serde(skip_serializing_if = "Rule::is_unset")]
    pub env: Rule,
    #[serde(skip_serializing_if = "Rule::is_unset")]
    pub plugin: Rule,
    #[serde(skip_serializing_if = "Rule::is_unset")]
    pub hrtime: Rule,
}

impl RuleTable {
    pub fn get(&self, kind: PermissionKind) -> &Rule {
        match kind {
            PermissionKind::NetworkAccess => &self.net,
            PermissionKind::FileRead => &self.read,
            PermissionKind::FileWrite => &self.write,
            PermissionKind::EnvironmentRead => &self.env,
            PermissionKind::PluginLoad => &self.plugin,
            PermissionKind::HighResTime => &self.hrtime,
        }
    }

    pub fn set(&mut self, kind: PermissionKind, rule: Rule) {
        let slot = match kind {
            PermissionKind::NetworkAccess => &mut self.net,
            PermissionKind::FileRead => &mut self.read,
            PermissionKind::FileWrite => &mut self.write,
            PermissionKind::EnvironmentRead => &mut self.env,
            PermissionKind::PluginLoad => &mut self.plugin,
            PermissionKind::HighResTime => &mut self.hrtime,
        };
        *slot = rule;
    }

    fn entries(&self, state: PermissionState) -> Result<Vec<PermissionEntry>, ConfigError> {
        let mut entries = Vec::new();
        for kind in PermissionKind::ALL {
            let rule = self.get(kind);
            if rule.is_unscoped() {
                entries.push(PermissionEntry {
                    kind,
                    scope: None,
                    state,
                });
            }
            for raw in rule.scopes() {
                let scope = Scope::parse(kind, raw).map_err(|source| ConfigError::InvalidScope {
                    kind,
                    state,
                    source,
                })?;
                entries.push(PermissionEntry {
                    kind,
                    scope: Some(scope),
                    state,
                });
            }
        }
        Ok(entries)
    }
}

/// Permission configuration object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PermissionsConfig {
    pub allow: RuleTable,
    pub deny: RuleTable,
    /// Grant everything (development only)
    pub allow_all: bool,
    /// Deny instead of prompting
    pub no_prompt: bool,
}

impl PermissionsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Default location: `<config_dir>/<app>/permissions.json`
    pub fn default_path(app_name: &str) -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(app_name)
            .join("permissions.json")
    }

    /// Load from the default location; a missing file yields an empty config
    pub fn load_default(app_name: &str) -> Result<Self, ConfigError> {
        let path = Self::default_path(app_name);
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate every rule and produce the entries to seed
    ///
    /// Denials come after grants so that a key listed in both is denied.
    pub fn entries(&self) -> Result<Vec<PermissionEntry>, ConfigError> {
        let mut entries = self.allow.entries(PermissionState::Granted)?;
        entries.extend(self.deny.entries(PermissionState::Denied)?);
        Ok(entries)
    }
}
