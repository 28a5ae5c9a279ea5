//! Broker builder and pre-configured setups for common use cases

use std::path::PathBuf;
use std::sync::Arc;

use super::broker::PermissionBroker;
use super::config::{ConfigError, PermissionsConfig};
use super::flags::PermissionFlags;
use super::prompt::{PromptHandler, ScriptedPromptHandler, TerminalPromptHandler};
use super::set::{PermissionEntry, PermissionSet};
use crate::audit::{AuditSink, FileAuditSink, MemoryAuditSink, NullAuditSink};
use permit_api::{PermissionKind, Scope};

/// Error type for broker construction
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to initialize audit: {0}")]
    AuditInit(String),
}

/// Builder for a [`PermissionBroker`]
///
/// Seeds are applied in order: configuration object, then flags, then
/// individual entries. A denial is never overridden by a later grant of the
/// same key.
///
/// ```rust
/// use permit_broker::audit::NullAuditSink;
/// use permit_broker::permission::{AutoPromptHandler, BrokerBuilder};
/// use permit_broker::{PermissionKind, Scope};
///
/// let broker = BrokerBuilder::new()
///     .allow(PermissionKind::NetworkAccess, Some(Scope::net("0.0.0.0", Some(8000)).unwrap()))
///     .prompt(AutoPromptHandler::always_deny())
///     .audit(NullAuditSink)
///     .build()
///     .unwrap();
/// # let _ = broker;
/// ```
#[derive(Default)]
pub struct BrokerBuilder {
    config: Option<PermissionsConfig>,
    flags: Option<PermissionFlags>,
    entries: Vec<PermissionEntry>,
    prompt: Option<Arc<dyn PromptHandler>>,
    audit: Option<Arc<dyn AuditSink>>,
    no_prompt: bool,
    grant_all: bool,
}

impl BrokerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a configuration object (validated in `build`)
    pub fn config(mut self, config: PermissionsConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Seed from parsed command-line flags
    pub fn flags(mut self, flags: PermissionFlags) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn allow(mut self, kind: PermissionKind, scope: Option<Scope>) -> Self {
        self.entries.push(PermissionEntry::granted(kind, scope));
        self
    }

    pub fn deny(mut self, kind: PermissionKind, scope: Option<Scope>) -> Self {
        self.entries.push(PermissionEntry::denied(kind, scope));
        self
    }

    pub fn prompt(mut self, prompt: impl PromptHandler + 'static) -> Self {
        self.prompt = Some(Arc::new(prompt));
        self
    }

    /// Use a shared prompt handler (e.g. to inspect it afterwards)
    pub fn prompt_shared(mut self, prompt: Arc<dyn PromptHandler>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn audit(mut self, audit: impl AuditSink + 'static) -> Self {
        self.audit = Some(Arc::new(audit));
        self
    }

    pub fn audit_shared(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Deny instead of prompting
    pub fn no_prompt(mut self, no_prompt: bool) -> Self {
        self.no_prompt = no_prompt;
        self
    }

    /// Start with every capability granted (development only)
    pub fn grant_all(mut self) -> Self {
        self.grant_all = true;
        self
    }

    pub fn build(self) -> Result<PermissionBroker, BuildError> {
        let mut set = PermissionSet::new();
        let mut no_prompt = self.no_prompt;
        let mut grant_all = self.grant_all;

        if let Some(config) = &self.config {
            set.seed_all(config.entries()?);
            no_prompt |= config.no_prompt;
            grant_all |= config.allow_all;
        }

        if let Some(flags) = self.flags {
            set.seed_all(flags.entries);
            no_prompt |= flags.no_prompt;
            grant_all |= flags.allow_all;
        }

        set.seed_all(self.entries);

        let broker = PermissionBroker::new(
            set,
            self.prompt
                .unwrap_or_else(|| Arc::new(TerminalPromptHandler::new())),
            self.audit.unwrap_or_else(|| Arc::new(NullAuditSink)),
            no_prompt,
        );

        if grant_all {
            broker.grant_all();
        }

        Ok(broker)
    }
}

// ============================================================================
// Preset Configurations
// ============================================================================

/// Preset brokers for common use cases
pub struct BrokerPresets;

impl BrokerPresets {
    /// Interactive mode
    ///
    /// - Configuration from `<config_dir>/<app>/permissions.json` (if present)
    /// - Flags layered on top
    /// - Terminal prompts
    /// - File-based audit log at `<config_dir>/<app>/audit.jsonl`
    pub fn interactive(app_name: &str, flags: PermissionFlags) -> Result<PermissionBroker, BuildError> {
        let config = PermissionsConfig::load_default(app_name)?;
        let audit = FileAuditSink::new(Self::config_dir(app_name).join("audit.jsonl"))
            .map_err(|e| BuildError::AuditInit(e.to_string()))?;

        BrokerBuilder::new()
            .config(config)
            .flags(flags)
            .prompt(TerminalPromptHandler::new())
            .audit(audit)
            .build()
    }

    /// Non-interactive mode: undecided keys are denied without prompting
    pub fn non_interactive(config: PermissionsConfig) -> Result<PermissionBroker, BuildError> {
        BrokerBuilder::new()
            .config(config)
            .no_prompt(true)
            .audit(NullAuditSink)
            .build()
    }

    /// Testing mode: non-interactive, in-memory audit
    pub fn testing(audit: Arc<MemoryAuditSink>) -> PermissionBroker {
        PermissionBroker::new(
            PermissionSet::new(),
            Arc::new(ScriptedPromptHandler::new([]).non_interactive()),
            audit,
            true,
        )
    }

    /// Dangerous: grants everything (DEVELOPMENT ONLY)
    pub fn trust_all_dangerous() -> PermissionBroker {
        let broker = PermissionBroker::new(
            PermissionSet::new(),
            Arc::new(ScriptedPromptHandler::new([]).non_interactive()),
            Arc::new(NullAuditSink),
            true,
        );
        broker.grant_all();
        broker
    }

    fn config_dir(app_name: &str) -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(app_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::config::Rule;
    use crate::permission::flags::FlagConfig;
    use crate::permission::prompt::AutoPromptHandler;
    use permit_api::{Decision, PermissionState};

    #[test]
    fn test_builder_layers_config_and_flags() {
        let mut config = PermissionsConfig::new();
        config
            .allow
            .set(PermissionKind::FileRead, Rule::Scoped(vec!["/tmp".into()]));

        let (flags, _) = FlagConfig::default()
            .parse_args(&["--deny-read=/tmp".to_string(), "--allow-hrtime".to_string()])
            .unwrap();

        let broker = BrokerBuilder::new()
            .config(config)
            .flags(flags)
            .prompt(AutoPromptHandler::always_allow())
            .no_prompt(true)
            .build()
            .unwrap();

        let tmp = Scope::path("/tmp").unwrap();
        assert_eq!(
            broker.query(PermissionKind::FileRead, Some(&tmp)),
            PermissionState::Denied
        );
        assert_eq!(broker.check(PermissionKind::HighResTime, None), Decision::Allow);
        assert!(!broker.is_interactive());
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let mut config = PermissionsConfig::new();
        config
            .deny
            .set(PermissionKind::FileWrite, Rule::Scoped(vec!["relative/dir".into()]));

        let result = BrokerBuilder::new().config(config).build();
        assert!(matches!(result, Err(BuildError::Config(_))));
    }

    #[test]
    fn test_config_allow_all() {
        let config = PermissionsConfig {
            allow_all: true,
            ..Default::default()
        };
        let broker = BrokerPresets::non_interactive(config).unwrap();
        assert!(broker.is_all_granted());
        assert_eq!(broker.check(PermissionKind::PluginLoad, None), Decision::Allow);
    }

    #[test]
    fn test_testing_preset() {
        let audit = Arc::new(MemoryAuditSink::new());
        let broker = BrokerPresets::testing(audit.clone());
        assert!(!broker.is_interactive());
        assert_eq!(broker.check(PermissionKind::NetworkAccess, None), Decision::Deny);
        assert_eq!(audit.count(), 1);
    }

    #[test]
    fn test_trust_all_dangerous() {
        let broker = BrokerPresets::trust_all_dangerous();
        for kind in PermissionKind::ALL {
            assert_eq!(broker.check(kind, None), Decision::Allow);
        }
    }
}
