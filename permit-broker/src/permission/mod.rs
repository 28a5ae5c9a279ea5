//! Permission system gating script capabilities
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                          PermissionBroker                             │
//! │  ┌──────────────┐ ┌──────────────┐ ┌──────────────┐ ┌───────────────┐ │
//! │  │ PermissionSet│ │   Prompt     │ │   Seeding    │ │    Audit      │ │
//! │  │              │ │              │ │              │ │               │ │
//! │  │ - exact      │ │ - Terminal   │ │ - Config     │ │ - File (JSONL)│ │
//! │  │ - broader    │ │ - Auto       │ │   (JSON)     │ │ - Memory      │ │
//! │  │ - unscoped   │ │ - Scripted   │ │ - Flags      │ │ - Null        │ │
//! │  │ - Prompt     │ │              │ │   (--allow-*)│ │ - Composite   │ │
//! │  └──────────────┘ └──────────────┘ └──────────────┘ └───────────────┘ │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use permit_broker::permission::{BrokerPresets, FlagConfig};
//!
//! let args: Vec<String> = std::env::args().skip(1).collect();
//! let (flags, script_args) = FlagConfig::default().parse_args(&args)?;
//! let broker = BrokerPresets::interactive("myhost", flags)?;
//!
//! // In the I/O layer:
//! broker.check_request(&PermissionRequest::net("0.0.0.0", 8000)?)?;
//! ```
//!
//! # Decisions
//!
//! | Resolved state | Interactive | Non-interactive |
//! |----------------|-------------|-----------------|
//! | Granted | Allow | Allow |
//! | Denied | Deny | Deny |
//! | Prompt | ask the user | Deny |
//!
//! "Always" answers are cached for the rest of the process; "once" answers
//! are not.

pub mod broker;
pub mod config;
pub mod flags;
pub mod presets;
pub mod prompt;
pub mod set;

pub use broker::PermissionBroker;
pub use config::{ConfigError, PermissionsConfig, Rule, RuleTable};
pub use flags::{FlagAlias, FlagConfig, FlagEffect, FlagError, FlagPresets, PermissionFlags};
pub use presets::{BrokerBuilder, BrokerPresets, BuildError};
pub use prompt::{AutoPromptHandler, ScriptedPromptHandler, TerminalPromptHandler};
pub use prompt::{PromptAnswer, PromptError, PromptHandler, PromptRequest};
pub use set::{PermissionEntry, PermissionKey, PermissionSet};
