//! The capability broker
//!
//! Every sensitive operation a script requests goes through
//! [`PermissionBroker::check`]. The broker resolves the request against its
//! [`PermissionSet`], prompting the controlling user when the key is still
//! undecided, and always returns a [`Decision`].
//!
//! # Serialization
//!
//! ```text
//!   check(kind, scope)
//!        │
//!        ▼
//!   ┌──────────── state lock ────────────┐
//!   │ resolve → Granted / Denied → return│
//!   │ Prompt + no channel       → Deny   │
//!   │ Prompt + pending prompt   → join   │──► wait for the leader's answer
//!   │ Prompt                    → lead   │
//!   └────────────────────────────────────┘
//!        │ (leader)
//!        ▼
//!   ┌──────────── prompt lock ───────────┐
//!   │ re-resolve, present prompt,        │
//!   │ cache "always" answers             │
//!   └────────────────────────────────────┘
//!        │
//!        ▼
//!   publish decision to every joined caller
//! ```

use permit_api::{Decision, PermissionDenied, PermissionKind, PermissionRequest, PermissionState, Scope};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use super::prompt::{PromptAnswer, PromptHandler, PromptRequest};
use super::set::{PermissionEntry, PermissionSet};
use crate::audit::{self, AuditEvent, AuditSink, DecisionSource};

/// Mutable broker state, guarded by one lock
struct BrokerState {
    set: PermissionSet,
    /// Prompts currently outstanding, keyed by exact request
    pending: HashMap<PermissionRequest, Arc<PendingPrompt>>,
}

/// A prompt that other callers for the same key can wait on
struct PendingPrompt {
    decision: Mutex<Option<Decision>>,
    ready: Condvar,
}

impl PendingPrompt {
    fn new() -> Self {
        Self {
            decision: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn publish(&self, decision: Decision) {
        let mut slot = self.decision.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(decision);
        self.ready.notify_all();
    }

    fn wait(&self) -> Decision {
        let mut slot = self.decision.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(decision) = *slot {
                return decision;
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Held by the caller presenting a prompt
///
/// Dropping it clears the pending entry and releases waiters with the
/// recorded decision, which stays `Deny` if the leader unwinds.
struct PromptTicket<'a> {
    broker: &'a PermissionBroker,
    request: &'a PermissionRequest,
    pending: Arc<PendingPrompt>,
    decision: Decision,
}

impl Drop for PromptTicket<'_> {
    fn drop(&mut self) {
        self.broker.lock_state().pending.remove(self.request);
        self.pending.publish(self.decision);
    }
}

enum Turn {
    Resolved(Decision),
    Join(Arc<PendingPrompt>),
    Lead(Arc<PendingPrompt>),
}

/// Permission-gated capability broker
///
/// Shared between call sites as `Arc<PermissionBroker>`; all methods take
/// `&self`.
pub struct PermissionBroker {
    state: Mutex<BrokerState>,
    /// Serializes prompt presentation across keys
    prompt_lock: Mutex<()>,
    prompt: Arc<dyn PromptHandler>,
    audit: Arc<dyn AuditSink>,
    /// Deny instead of prompting, even when a prompt channel exists
    no_prompt: bool,
}

impl PermissionBroker {
    pub fn new(
        set: PermissionSet,
        prompt: Arc<dyn PromptHandler>,
        audit: Arc<dyn AuditSink>,
        no_prompt: bool,
    ) -> Self {
        Self {
            state: Mutex::new(BrokerState {
                set,
                pending: HashMap::new(),
            }),
            prompt_lock: Mutex::new(()),
            prompt,
            audit,
            no_prompt,
        }
    }

    /// Gate a sensitive operation
    ///
    /// `scope` must already be normalized (see [`Scope`]). Never fails: a
    /// missing prompt channel, a prompt error or a timeout all resolve to
    /// `Deny`.
    pub fn check(&self, kind: PermissionKind, scope: Option<&Scope>) -> Decision {
        let request = PermissionRequest {
            kind,
            scope: scope.cloned(),
        };
        self.decide(&request)
    }

    /// Gate a request, mapping `Deny` into [`PermissionDenied`]
    pub fn check_request(&self, request: &PermissionRequest) -> Result<(), PermissionDenied> {
        match self.decide(request) {
            Decision::Allow => Ok(()),
            Decision::Deny => Err(PermissionDenied::new(request.clone())),
        }
    }

    /// Async form of [`check`](Self::check) for hosts running on tokio
    ///
    /// The check runs on the blocking pool, so a pending prompt suspends
    /// only the calling task.
    pub async fn check_async(self: &Arc<Self>, kind: PermissionKind, scope: Option<Scope>) -> Decision {
        let broker = Arc::clone(self);
        tokio::task::spawn_blocking(move || broker.check(kind, scope.as_ref()))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, %kind, "permission check task failed, denying");
                Decision::Deny
            })
    }

    /// Current state for a key, without prompting
    pub fn query(&self, kind: PermissionKind, scope: Option<&Scope>) -> PermissionState {
        self.lock_state().set.resolve(kind, scope)
    }

    /// Grant every capability for the rest of the process (development only)
    pub fn grant_all(&self) {
        self.lock_state().set.grant_all();
        tracing::warn!("all permissions granted; every check will be allowed");
        self.record(audit::all_granted());
    }

    pub fn is_all_granted(&self) -> bool {
        self.lock_state().set.is_all_granted()
    }

    /// Whether an undecided key would be prompted for right now
    pub fn is_interactive(&self) -> bool {
        !self.no_prompt && self.prompt.is_interactive()
    }

    /// Explicit entries (seeded and cached), sorted
    pub fn snapshot(&self) -> Vec<PermissionEntry> {
        self.lock_state().set.entries()
    }

    fn decide(&self, request: &PermissionRequest) -> Decision {
        let turn = {
            let mut state = self.lock_state();
            match state.set.resolve(request.kind, request.scope.as_ref()) {
                PermissionState::Granted => Turn::Resolved(Decision::Allow),
                PermissionState::Denied => Turn::Resolved(Decision::Deny),
                PermissionState::Prompt if !self.is_interactive() => {
                    drop(state);
                    tracing::debug!(%request, "no prompt channel, denying");
                    self.record(audit::permission_denied(
                        request,
                        DecisionSource::NoPrompt,
                        Some("prompt unavailable"),
                    ));
                    return Decision::Deny;
                }
                PermissionState::Prompt => match state.pending.get(request) {
                    Some(pending) => Turn::Join(Arc::clone(pending)),
                    None => {
                        let pending = Arc::new(PendingPrompt::new());
                        state.pending.insert(request.clone(), Arc::clone(&pending));
                        Turn::Lead(pending)
                    }
                },
            }
        };

        match turn {
            Turn::Resolved(decision) => {
                tracing::debug!(%request, ?decision, "resolved from permission set");
                self.record_decision(request, decision, DecisionSource::PermissionSet);
                decision
            }
            Turn::Join(pending) => {
                tracing::debug!(%request, "joining outstanding prompt");
                pending.wait()
            }
            Turn::Lead(pending) => {
                let mut ticket = PromptTicket {
                    broker: self,
                    request,
                    pending,
                    decision: Decision::Deny,
                };
                ticket.decision = self.run_prompt(request);
                ticket.decision
            }
        }
    }

    /// Present the prompt for `request` and cache an "always" answer
    fn run_prompt(&self, request: &PermissionRequest) -> Decision {
        let _turn = self.prompt_lock.lock().unwrap_or_else(PoisonError::into_inner);

        // An earlier prompt (for a broader scope) or grant_all may have
        // settled this key while we queued.
        match self.query(request.kind, request.scope.as_ref()) {
            PermissionState::Granted => {
                self.record_decision(request, Decision::Allow, DecisionSource::PermissionSet);
                return Decision::Allow;
            }
            PermissionState::Denied => {
                self.record_decision(request, Decision::Deny, DecisionSource::PermissionSet);
                return Decision::Deny;
            }
            PermissionState::Prompt => {}
        }

        self.record(audit::permission_requested(request));
        let prompt_request = PromptRequest::new(request.clone());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.prompt.prompt(&prompt_request)));
        let answer = match outcome {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                tracing::warn!(%request, error = %e, "permission prompt failed, denying");
                self.record(audit::permission_denied(
                    request,
                    DecisionSource::NoPrompt,
                    Some(&e.to_string()),
                ));
                return Decision::Deny;
            }
            Err(_) => {
                tracing::warn!(%request, "permission prompt handler panicked, denying");
                self.record(audit::permission_denied(
                    request,
                    DecisionSource::NoPrompt,
                    Some("prompt handler panicked"),
                ));
                return Decision::Deny;
            }
        };

        let source = match answer.persisted_state() {
            Some(state) => {
                self.lock_state()
                    .set
                    .promote(request.kind, request.scope.clone(), state);
                DecisionSource::PromptAlways
            }
            None => DecisionSource::PromptOnce,
        };

        let decision = answer.decision();
        tracing::info!(%request, ?answer, "permission prompt answered");
        self.record_decision(request, decision, source);
        decision
    }

    fn record_decision(&self, request: &PermissionRequest, decision: Decision, source: DecisionSource) {
        let event = match decision {
            Decision::Allow => audit::permission_granted(request, source),
            Decision::Deny => audit::permission_denied(request, source, None),
        };
        self.record(event);
    }

    fn record(&self, event: AuditEvent) {
        if let Err(e) = self.audit.record(event) {
            tracing::warn!(error = %e, "failed to record audit event");
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PermissionBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionBroker")
            .field("entries", &self.snapshot().len())
            .field("no_prompt", &self.no_prompt)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEventType, MemoryAuditSink, NullAuditSink};
    use crate::permission::prompt::{AutoPromptHandler, ScriptedPromptHandler};

    fn broker_with(set: PermissionSet, prompt: Arc<dyn PromptHandler>) -> PermissionBroker {
        PermissionBroker::new(set, prompt, Arc::new(NullAuditSink), false)
    }

    fn non_interactive(set: PermissionSet) -> PermissionBroker {
        broker_with(
            set,
            Arc::new(ScriptedPromptHandler::new([]).non_interactive()),
        )
    }

    fn addr() -> Scope {
        Scope::net("0.0.0.0", Some(8000)).unwrap()
    }

    #[test]
    fn test_unconfigured_denies_non_interactive() {
        let broker = non_interactive(PermissionSet::new());
        for kind in PermissionKind::ALL {
            assert_eq!(broker.check(kind, None), Decision::Deny);
        }
        assert_eq!(
            broker.check(PermissionKind::NetworkAccess, Some(&addr())),
            Decision::Deny
        );
    }

    #[test]
    fn test_granted_is_stable() {
        let set = PermissionSet::new().with_grant(PermissionKind::NetworkAccess, None);
        let broker = non_interactive(set);
        for _ in 0..3 {
            assert_eq!(
                broker.check(PermissionKind::NetworkAccess, Some(&addr())),
                Decision::Allow
            );
        }
    }

    #[test]
    fn test_no_prompt_flag_overrides_handler() {
        let prompt = Arc::new(AutoPromptHandler::always_allow());
        let broker = PermissionBroker::new(
            PermissionSet::new(),
            prompt,
            Arc::new(NullAuditSink),
            true,
        );
        assert!(!broker.is_interactive());
        assert_eq!(broker.check(PermissionKind::HighResTime, None), Decision::Deny);
    }

    #[test]
    fn test_allow_once_does_not_persist() {
        let prompt = Arc::new(ScriptedPromptHandler::new([PromptAnswer::AllowOnce]));
        let broker = broker_with(PermissionSet::new(), prompt.clone());

        assert_eq!(
            broker.check(PermissionKind::EnvironmentRead, None),
            Decision::Allow
        );
        assert_eq!(
            broker.query(PermissionKind::EnvironmentRead, None),
            PermissionState::Prompt
        );
        // Queue is empty now, so the second prompt answers DenyOnce
        assert_eq!(
            broker.check(PermissionKind::EnvironmentRead, None),
            Decision::Deny
        );
        assert_eq!(prompt.prompt_count(), 2);
    }

    #[test]
    fn test_always_answers_are_cached() {
        let prompt = Arc::new(ScriptedPromptHandler::new([
            PromptAnswer::AllowAlways,
            PromptAnswer::DenyAlways,
        ]));
        let broker = broker_with(PermissionSet::new(), prompt.clone());

        assert_eq!(broker.check(PermissionKind::HighResTime, None), Decision::Allow);
        assert_eq!(broker.check(PermissionKind::HighResTime, None), Decision::Allow);
        assert_eq!(broker.check(PermissionKind::PluginLoad, None), Decision::Deny);
        assert_eq!(broker.check(PermissionKind::PluginLoad, None), Decision::Deny);

        assert_eq!(prompt.prompt_count(), 2);
        assert_eq!(
            broker.query(PermissionKind::PluginLoad, None),
            PermissionState::Denied
        );
    }

    #[test]
    fn test_prompt_error_fails_closed() {
        struct BrokenPrompt;

        impl PromptHandler for BrokenPrompt {
            fn prompt(
                &self,
                _request: &PromptRequest,
            ) -> Result<PromptAnswer, crate::permission::PromptError> {
                Err(crate::permission::PromptError::Timeout)
            }

            fn is_interactive(&self) -> bool {
                true
            }
        }

        let audit = Arc::new(MemoryAuditSink::new());
        let broker = PermissionBroker::new(
            PermissionSet::new(),
            Arc::new(BrokenPrompt),
            audit.clone(),
            false,
        );

        assert_eq!(broker.check(PermissionKind::FileRead, None), Decision::Deny);
        assert_eq!(
            broker.query(PermissionKind::FileRead, None),
            PermissionState::Prompt
        );
        assert_eq!(audit.find_by_type(AuditEventType::PermissionDenied).len(), 1);
    }

    #[test]
    fn test_prompt_panic_fails_closed() {
        struct PanickingPrompt;

        impl PromptHandler for PanickingPrompt {
            fn prompt(
                &self,
                _request: &PromptRequest,
            ) -> Result<PromptAnswer, crate::permission::PromptError> {
                panic!("dialog crashed");
            }

            fn is_interactive(&self) -> bool {
                true
            }
        }

        let audit = Arc::new(MemoryAuditSink::new());
        let broker = PermissionBroker::new(
            PermissionSet::new(),
            Arc::new(PanickingPrompt),
            audit.clone(),
            false,
        );

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            broker.check(PermissionKind::HighResTime, None)
        }));
        assert_eq!(result.ok(), Some(Decision::Deny));
        assert_eq!(
            broker.query(PermissionKind::HighResTime, None),
            PermissionState::Prompt
        );
        assert_eq!(audit.find_by_type(AuditEventType::PermissionDenied).len(), 1);

        // The broker stays usable afterwards
        assert_eq!(broker.check(PermissionKind::HighResTime, None), Decision::Deny);
    }

    #[test]
    fn test_zero_capacity_audit_sink() {
        let broker = PermissionBroker::new(
            PermissionSet::new(),
            Arc::new(ScriptedPromptHandler::new([]).non_interactive()),
            Arc::new(MemoryAuditSink::with_capacity(0)),
            true,
        );
        assert_eq!(broker.check(PermissionKind::HighResTime, None), Decision::Deny);
    }

    #[test]
    fn test_grant_all_allows_everything() {
        let set = PermissionSet::new().with_deny(PermissionKind::NetworkAccess, Some(addr()));
        let broker = non_interactive(set);
        broker.grant_all();

        assert!(broker.is_all_granted());
        assert_eq!(
            broker.check(PermissionKind::NetworkAccess, Some(&addr())),
            Decision::Allow
        );
        for kind in PermissionKind::ALL {
            assert_eq!(broker.check(kind, None), Decision::Allow);
        }
    }

    #[test]
    fn test_check_request_maps_deny_to_error() {
        let broker = non_interactive(PermissionSet::new());
        let request = PermissionRequest::net("0.0.0.0", 8000).unwrap();

        let err = broker.check_request(&request).unwrap_err();
        assert_eq!(err.kind(), PermissionKind::NetworkAccess);
        assert_eq!(err.scope(), Some(&addr()));
    }

    #[test]
    fn test_audit_records_prompt_flow() {
        let audit = Arc::new(MemoryAuditSink::new());
        let broker = PermissionBroker::new(
            PermissionSet::new(),
            Arc::new(AutoPromptHandler::always_allow()),
            audit.clone(),
            false,
        );

        broker.check(PermissionKind::HighResTime, None);
        broker.check(PermissionKind::HighResTime, None);

        assert_eq!(audit.find_by_type(AuditEventType::PermissionRequested).len(), 1);
        assert_eq!(audit.find_by_type(AuditEventType::PermissionGranted).len(), 2);
    }
}
