//! Permission flag parsing for CLI integration
//!
//! Template-based flag recognition, so hosts can pick their own flag
//! spelling without the broker reserving names.
//!
//! ```rust
//! use permit_broker::permission::FlagConfig;
//!
//! // Default: --allow-net=..., --deny-read=..., --allow-all, -A, --no-prompt
//! let config = FlagConfig::default();
//!
//! // Custom: --grant-net, --forbid-read
//! let config = FlagConfig::new()
//!     .with_allow_template("--grant-{kind}")
//!     .with_deny_template("--forbid-{kind}");
//! ```

use permit_api::{PermissionKind, PermissionState, Scope, ScopeError};
use thiserror::Error;

use super::config::{PermissionsConfig, Rule};
use super::set::PermissionEntry;

/// Error type for flag parsing
#[derive(Debug, Error)]
pub enum FlagError {
    #[error("Unknown permission flag: {0}")]
    UnknownFlag(String),

    #[error("Flag {0} requires at least one value after '='")]
    EmptyValue(String),

    #[error("Invalid value for {flag}: {source}")]
    InvalidScope {
        flag: String,
        #[source]
        source: ScopeError,
    },
}

/// Permission flag configuration
#[derive(Debug, Clone)]
pub struct FlagConfig {
    /// Recognize permission flags at all
    pub enabled: bool,

    /// Grant flag template; `{kind}` is replaced with the kind's flag name
    pub allow_template: String,

    /// Deny flag template
    pub deny_template: String,

    /// Flags that grant everything
    pub allow_all_flags: Vec<String>,

    /// Flag that disables prompting
    pub no_prompt_flag: String,

    /// Additional aliases
    pub aliases: Vec<FlagAlias>,
}

impl Default for FlagConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_template: "--allow-{kind}".into(),
            deny_template: "--deny-{kind}".into(),
            allow_all_flags: vec!["--allow-all".into(), "-A".into()],
            no_prompt_flag: "--no-prompt".into(),
            aliases: vec![],
        }
    }
}

impl FlagConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable permission flags entirely
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_allow_template(mut self, template: impl Into<String>) -> Self {
        self.allow_template = template.into();
        self
    }

    pub fn with_deny_template(mut self, template: impl Into<String>) -> Self {
        self.deny_template = template.into();
        self
    }

    /// Add a custom alias
    pub fn with_alias(mut self, flag: impl Into<String>, effect: FlagEffect) -> Self {
        self.aliases.push(FlagAlias {
            flag: flag.into(),
            description: effect.default_description(),
            effect,
        });
        self
    }

    /// Generate the flag name for a kind
    pub fn generate_flag(&self, kind: PermissionKind, state: PermissionState) -> String {
        let template = match state {
            PermissionState::Denied => &self.deny_template,
            _ => &self.allow_template,
        };
        template.replace("{kind}", kind.flag_name())
    }

    /// Help text for every generated flag, in display order
    pub fn help_lines(&self) -> Vec<(String, String)> {
        let mut lines = Vec::new();
        for kind in PermissionKind::ALL {
            let value = if kind.supports_scope() { "[=<SCOPE>...]" } else { "" };
            lines.push((
                format!("{}{}", self.generate_flag(kind, PermissionState::Granted), value),
                format!("Allow {}", kind.description()),
            ));
            lines.push((
                format!("{}{}", self.generate_flag(kind, PermissionState::Denied), value),
                format!("Deny {}", kind.description()),
            ));
        }
        lines.push((
            self.allow_all_flags.join(", "),
            "Allow everything (dangerous)".into(),
        ));
        lines.push((self.no_prompt_flag.clone(), "Deny instead of prompting".into()));
        for alias in &self.aliases {
            lines.push((alias.flag.clone(), alias.description.clone()));
        }
        lines
    }

    /// Split `args` into permission flags and everything else
    ///
    /// Arguments after a bare `--` are passed through untouched.
    pub fn parse_args(&self, args: &[String]) -> Result<(PermissionFlags, Vec<String>), FlagError> {
        let mut flags = PermissionFlags::default();
        let mut rest = Vec::new();

        if !self.enabled {
            return Ok((flags, args.to_vec()));
        }

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if arg == "--" {
                rest.push(arg.clone());
                rest.extend(iter.by_ref().cloned());
                break;
            }

            if let Some(alias) = self.aliases.iter().find(|a| &a.flag == arg) {
                flags.apply(&alias.effect, arg)?;
                continue;
            }

            if self.allow_all_flags.iter().any(|f| f == arg) {
                flags.allow_all = true;
                continue;
            }

            if arg == &self.no_prompt_flag {
                flags.no_prompt = true;
                continue;
            }

            if let Some(parsed) = self.match_kind_flag(arg, PermissionState::Granted)? {
                flags.entries.extend(parsed);
                continue;
            }

            if let Some(parsed) = self.match_kind_flag(arg, PermissionState::Denied)? {
                flags.entries.extend(parsed);
                continue;
            }

            rest.push(arg.clone());
        }

        Ok((flags, rest))
    }

    /// Match `arg` against every kind's flag for `state`
    fn match_kind_flag(
        &self,
        arg: &str,
        state: PermissionState,
    ) -> Result<Option<Vec<PermissionEntry>>, FlagError> {
        for kind in PermissionKind::ALL {
            let flag = self.generate_flag(kind, state);
            if arg == flag {
                return Ok(Some(vec![PermissionEntry {
                    kind,
                    scope: None,
                    state,
                }]));
            }
            if let Some(value) = arg.strip_prefix(&format!("{}=", flag)) {
                return parse_scoped(&flag, kind, state, value).map(Some);
            }
        }

        // Catch misspelt kinds such as --allow-ffi
        let template = match state {
            PermissionState::Denied => &self.deny_template,
            _ => &self.allow_template,
        };
        if let Some((prefix, _)) = template.split_once("{kind}") {
            if !prefix.is_empty() && arg.starts_with(prefix) {
                return Err(FlagError::UnknownFlag(arg.to_string()));
            }
        }

        Ok(None)
    }
}

fn parse_scoped(
    flag: &str,
    kind: PermissionKind,
    state: PermissionState,
    value: &str,
) -> Result<Vec<PermissionEntry>, FlagError> {
    let values: Vec<&str> = value.split(',').filter(|v| !v.trim().is_empty()).collect();
    if values.is_empty() {
        return Err(FlagError::EmptyValue(flag.to_string()));
    }
    values
        .into_iter()
        .map(|raw| {
            let scope = Scope::parse(kind, raw).map_err(|source| FlagError::InvalidScope {
                flag: flag.to_string(),
                source,
            })?;
            Ok(PermissionEntry {
                kind,
                scope: Some(scope),
                state,
            })
        })
        .collect()
}

/// Custom flag alias
#[derive(Debug, Clone)]
pub struct FlagAlias {
    /// The flag (e.g., "--trust-me")
    pub flag: String,
    pub description: String,
    pub effect: FlagEffect,
}

/// Effect of an alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagEffect {
    /// Grant a kind, optionally scoped
    Allow {
        kind: PermissionKind,
        scope: Option<String>,
    },
    /// Deny a kind, optionally scoped
    Deny {
        kind: PermissionKind,
        scope: Option<String>,
    },
    /// Grant everything
    AllowAll,
    /// Never prompt
    NoPrompt,
}

impl FlagEffect {
    fn default_description(&self) -> String {
        match self {
            Self::Allow { kind, scope } => match scope {
                Some(scope) => format!("Allow {} to {}", kind.description(), scope),
                None => format!("Allow {}", kind.description()),
            },
            Self::Deny { kind, scope } => match scope {
                Some(scope) => format!("Deny {} to {}", kind.description(), scope),
                None => format!("Deny {}", kind.description()),
            },
            Self::AllowAll => "Allow everything (dangerous)".into(),
            Self::NoPrompt => "Deny instead of prompting".into(),
        }
    }
}

/// Permission flags parsed from the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionFlags {
    /// Validated entries in the order given
    pub entries: Vec<PermissionEntry>,
    pub allow_all: bool,
    pub no_prompt: bool,
}

impl PermissionFlags {
    fn apply(&mut self, effect: &FlagEffect, flag: &str) -> Result<(), FlagError> {
        let (kind, scope, state) = match effect {
            FlagEffect::AllowAll => {
                self.allow_all = true;
                return Ok(());
            }
            FlagEffect::NoPrompt => {
                self.no_prompt = true;
                return Ok(());
            }
            FlagEffect::Allow { kind, scope } => (*kind, scope, PermissionState::Granted),
            FlagEffect::Deny { kind, scope } => (*kind, scope, PermissionState::Denied),
        };
        match scope {
            Some(raw) => self
                .entries
                .extend(parse_scoped(flag, kind, state, raw)?),
            None => self.entries.push(PermissionEntry {
                kind,
                scope: None,
                state,
            }),
        }
        Ok(())
    }

    /// Whether any permission flag was given
    pub fn has_any(&self) -> bool {
        self.allow_all || self.no_prompt || !self.entries.is_empty()
    }

    /// Fold the flags into a configuration object; flags add to what the
    /// configuration already holds, and scoped entries survive an unscoped
    /// flag of the same kind
    pub fn merge_into(&self, config: &mut PermissionsConfig) {
        config.allow_all |= self.allow_all;
        config.no_prompt |= self.no_prompt;

        for entry in &self.entries {
            let table = match entry.state {
                PermissionState::Denied => &mut config.deny,
                _ => &mut config.allow,
            };
            let rule = table.get(entry.kind);
            let mut all = rule.is_unscoped();
            let mut scopes = rule.scopes().to_vec();
            match &entry.scope {
                None => all = true,
                Some(scope) => {
                    if !scopes.iter().any(|s| s == scope.as_str()) {
                        scopes.push(scope.to_string());
                    }
                }
            }
            let merged = Rule::from_parts(all, scopes);
            table.set(entry.kind, merged);
        }
    }
}

/// Common flag spellings
pub struct FlagPresets;

impl FlagPresets {
    /// `--allow-{kind}` / `--deny-{kind}`
    pub fn standard() -> FlagConfig {
        FlagConfig::default()
    }

    /// `--grant-{kind}` / `--forbid-{kind}`
    pub fn grant_style() -> FlagConfig {
        FlagConfig::new()
            .with_allow_template("--grant-{kind}")
            .with_deny_template("--forbid-{kind}")
    }

    pub fn disabled() -> FlagConfig {
        FlagConfig::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_flags() {
        let config = FlagConfig::default();
        assert_eq!(
            config.generate_flag(PermissionKind::NetworkAccess, PermissionState::Granted),
            "--allow-net"
        );
        assert_eq!(
            config.generate_flag(PermissionKind::FileRead, PermissionState::Denied),
            "--deny-read"
        );
    }

    #[test]
    fn test_parse_args() {
        let config = FlagConfig::default();
        let (flags, rest) = config
            .parse_args(&args(&[
                "--allow-net=0.0.0.0:8000,deno.land",
                "--allow-env",
                "--deny-read=/etc",
                "server.ts",
                "--port",
            ]))
            .unwrap();

        assert_eq!(rest, args(&["server.ts", "--port"]));
        assert_eq!(flags.entries.len(), 4);
        assert_eq!(flags.entries[0].kind, PermissionKind::NetworkAccess);
        assert_eq!(flags.entries[1].scope.as_ref().unwrap().as_str(), "deno.land");
        assert_eq!(flags.entries[2].scope, None);
        assert_eq!(flags.entries[3].state, PermissionState::Denied);
        assert!(!flags.allow_all);
    }

    #[test]
    fn test_allow_all_and_no_prompt() {
        let config = FlagConfig::default();
        let (flags, rest) = config.parse_args(&args(&["-A", "--no-prompt"])).unwrap();
        assert!(flags.allow_all);
        assert!(flags.no_prompt);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_double_dash_stops_parsing() {
        let config = FlagConfig::default();
        let (flags, rest) = config
            .parse_args(&args(&["--allow-hrtime", "--", "--allow-net"]))
            .unwrap();
        assert_eq!(flags.entries.len(), 1);
        assert_eq!(rest, args(&["--", "--allow-net"]));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let config = FlagConfig::default();
        assert!(matches!(
            config.parse_args(&args(&["--allow-ffi"])),
            Err(FlagError::UnknownFlag(_))
        ));
        assert!(matches!(
            config.parse_args(&args(&["--allow-net="])),
            Err(FlagError::EmptyValue(_))
        ));
        assert!(matches!(
            config.parse_args(&args(&["--allow-hrtime=now"])),
            Err(FlagError::InvalidScope { .. })
        ));
    }

    #[test]
    fn test_custom_template_and_alias() {
        let config = FlagPresets::grant_style().with_alias(
            "--serve",
            FlagEffect::Allow {
                kind: PermissionKind::NetworkAccess,
                scope: Some("0.0.0.0:8000".into()),
            },
        );
        let (flags, rest) = config
            .parse_args(&args(&["--grant-read", "--serve", "--allow-net"]))
            .unwrap();

        assert_eq!(flags.entries.len(), 2);
        assert_eq!(flags.entries[0].kind, PermissionKind::FileRead);
        assert_eq!(
            flags.entries[1].scope.as_ref().unwrap().as_str(),
            "0.0.0.0:8000"
        );
        // Not this config's spelling, so it passes through
        assert_eq!(rest, args(&["--allow-net"]));
    }

    #[test]
    fn test_disabled_config() {
        let config = FlagConfig::disabled();
        let (flags, rest) = config.parse_args(&args(&["--allow-net"])).unwrap();
        assert!(!flags.has_any());
        assert_eq!(rest, args(&["--allow-net"]));
    }

    #[test]
    fn test_merge_into_config() {
        let mut config = PermissionsConfig::new();
        config.allow.set(
            PermissionKind::NetworkAccess,
            Rule::Scoped(vec!["deno.land".into()]),
        );

        let (flags, _) = FlagConfig::default()
            .parse_args(&args(&["--allow-net=localhost:8000", "--deny-env", "--no-prompt"]))
            .unwrap();
        flags.merge_into(&mut config);

        assert_eq!(
            config.allow.net,
            Rule::Scoped(vec!["deno.land".into(), "localhost:8000".into()])
        );
        assert_eq!(config.deny.env, Rule::Unscoped(true));
        assert!(config.no_prompt);
    }

    #[test]
    #[cfg(unix)]
    fn test_merged_config_decides_like_flags() {
        use crate::permission::presets::BrokerBuilder;
        use permit_api::Decision;

        let mut config = PermissionsConfig::new();
        config
            .allow
            .set(PermissionKind::FileRead, Rule::Scoped(vec!["/tmp".into()]));
        config
            .deny
            .set(PermissionKind::FileRead, Rule::Scoped(vec!["/tmp/secret".into()]));
        let (flags, _) = FlagConfig::default()
            .parse_args(&args(&["--deny-read", "--allow-read=/tmp/secret/public", "--no-prompt"]))
            .unwrap();

        let direct = BrokerBuilder::new()
            .config(config.clone())
            .flags(flags.clone())
            .build()
            .unwrap();

        let mut merged = config;
        flags.merge_into(&mut merged);
        assert!(merged.deny.read.is_unscoped());
        assert_eq!(merged.deny.read.scopes(), ["/tmp/secret".to_string()]);
        let json = serde_json::to_string(&merged).unwrap();
        let reloaded: PermissionsConfig = serde_json::from_str(&json).unwrap();
        let from_config = BrokerBuilder::new().config(reloaded).build().unwrap();

        for path in ["/tmp/secret/key", "/tmp/other", "/tmp/secret/public/a", "/var"] {
            let scope = Scope::path(path).unwrap();
            let expected = direct.check(PermissionKind::FileRead, Some(&scope));
            assert_eq!(
                from_config.check(PermissionKind::FileRead, Some(&scope)),
                expected,
                "{path}"
            );
        }
        let key = Scope::path("/tmp/secret/key").unwrap();
        assert_eq!(direct.check(PermissionKind::FileRead, Some(&key)), Decision::Deny);
    }

    #[test]
    fn test_help_lines() {
        let lines = FlagConfig::default().help_lines();
        assert!(lines.iter().any(|(flag, _)| flag == "--allow-net[=<SCOPE>...]"));
        assert!(lines.iter().any(|(flag, _)| flag == "--deny-hrtime"));
    }
}
