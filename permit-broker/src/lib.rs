//! permit-broker: permission-gated capability broker
//!
//! Sits between untrusted script code and the host environment. The
//! script-execution host calls [`PermissionBroker::check`] before every
//! network, filesystem, environment, plugin or timer operation.

pub mod audit;
pub mod permission;

pub use permission::{BrokerBuilder, BrokerPresets, PermissionBroker, PermissionSet};
pub use permit_api::{
    Decision, PermissionDenied, PermissionKind, PermissionRequest, PermissionState, Scope,
    ScopeError,
};
