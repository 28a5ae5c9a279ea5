//! Permission set: the (kind, scope) → state table consulted by the broker
//!
//! Entries seeded at start-up are fixed for the process lifetime. Keys that
//! resolve to `Prompt` can be promoted once, after an "always" answer.

use permit_api::{PermissionKind, PermissionState, Scope};
use serde::Serialize;
use std::collections::HashMap;

/// Key of a permission entry
pub type PermissionKey = (PermissionKind, Option<Scope>);

/// A single explicit entry in a permission set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionEntry {
    pub kind: PermissionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    pub state: PermissionState,
}

impl PermissionEntry {
    pub fn granted(kind: PermissionKind, scope: Option<Scope>) -> Self {
        Self {
            kind,
            scope,
            state: PermissionState::Granted,
        }
    }

    pub fn denied(kind: PermissionKind, scope: Option<Scope>) -> Self {
        Self {
            kind,
            scope,
            state: PermissionState::Denied,
        }
    }
}

/// Where an entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Seeded from flags or configuration before any check ran
    Startup,
    /// Cached from an "always" prompt answer
    Promoted,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    state: PermissionState,
    origin: Origin,
}

/// Mapping from (kind, optional scope) to permission state
///
/// Lookup walks from the most specific applicable entry to the least:
/// the exact scope, then broader scopes (ancestor directories, the bare
/// host of a `host:port`), then the unscoped entry, then `Prompt`.
#[derive(Debug, Clone, Default)]
pub struct PermissionSet {
    entries: HashMap<PermissionKey, Slot>,
    all_granted: bool,
}

impl PermissionSet {
    /// Create an empty set; every key resolves to `Prompt`
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry at start-up
    ///
    /// A `Denied` seed is never overwritten by a later `Granted` seed for the
    /// same key.
    pub fn seed(&mut self, entry: PermissionEntry) {
        let key = (entry.kind, entry.scope);
        if let Some(existing) = self.entries.get(&key) {
            if existing.state == PermissionState::Denied
                && entry.state == PermissionState::Granted
            {
                return;
            }
        }
        self.entries.insert(
            key,
            Slot {
                state: entry.state,
                origin: Origin::Startup,
            },
        );
    }

    /// Seed a batch of entries
    pub fn seed_all(&mut self, entries: impl IntoIterator<Item = PermissionEntry>) {
        for entry in entries {
            self.seed(entry);
        }
    }

    /// Seed a grant
    pub fn grant(&mut self, kind: PermissionKind, scope: Option<Scope>) {
        self.seed(PermissionEntry::granted(kind, scope));
    }

    /// Seed a denial
    pub fn deny(&mut self, kind: PermissionKind, scope: Option<Scope>) {
        self.seed(PermissionEntry::denied(kind, scope));
    }

    /// Chainable form of [`grant`](Self::grant)
    pub fn with_grant(mut self, kind: PermissionKind, scope: Option<Scope>) -> Self {
        self.grant(kind, scope);
        self
    }

    /// Chainable form of [`deny`](Self::deny)
    pub fn with_deny(mut self, kind: PermissionKind, scope: Option<Scope>) -> Self {
        self.deny(kind, scope);
        self
    }

    /// Grant every kind unscoped; all later lookups resolve `Granted`
    pub fn grant_all(&mut self) {
        self.all_granted = true;
        for kind in PermissionKind::ALL {
            self.entries.insert(
                (kind, None),
                Slot {
                    state: PermissionState::Granted,
                    origin: Origin::Startup,
                },
            );
        }
    }

    /// Whether `grant_all` has been applied
    pub fn is_all_granted(&self) -> bool {
        self.all_granted
    }

    /// Resolve the effective state for a key
    pub fn resolve(&self, kind: PermissionKind, scope: Option<&Scope>) -> PermissionState {
        if self.all_granted {
            return PermissionState::Granted;
        }

        if let Some(scope) = scope {
            if let Some(state) = self.explicit(kind, Some(scope)) {
                return state;
            }
            for broader in scope.broader(kind) {
                if let Some(state) = self.explicit(kind, Some(&broader)) {
                    return state;
                }
            }
        }

        self.explicit(kind, None).unwrap_or_default()
    }

    /// Promote a key after an "always" answer
    ///
    /// Returns `false` if the exact key already holds a terminal state.
    pub fn promote(
        &mut self,
        kind: PermissionKind,
        scope: Option<Scope>,
        state: PermissionState,
    ) -> bool {
        if state == PermissionState::Prompt {
            return false;
        }
        let key = (kind, scope);
        if let Some(existing) = self.entries.get(&key) {
            if existing.state != PermissionState::Prompt {
                return false;
            }
        }
        self.entries.insert(
            key,
            Slot {
                state,
                origin: Origin::Promoted,
            },
        );
        true
    }

    /// State of the exact key, if present
    fn explicit(&self, kind: PermissionKind, scope: Option<&Scope>) -> Option<PermissionState> {
        self.entries
            .get(&(kind, scope.cloned()))
            .map(|slot| slot.state)
    }

    /// Explicit entries, sorted by kind then scope
    pub fn entries(&self) -> Vec<PermissionEntry> {
        let mut entries: Vec<PermissionEntry> = self
            .entries
            .iter()
            .map(|((kind, scope), slot)| PermissionEntry {
                kind: *kind,
                scope: scope.clone(),
                state: slot.state,
            })
            .collect();
        entries.sort_by(|a, b| (a.kind, &a.scope).cmp(&(b.kind, &b.scope)));
        entries
    }

    /// Number of entries cached from prompt answers
    pub fn promoted_count(&self) -> usize {
        self.entries
            .values()
            .filter(|slot| slot.origin == Origin::Promoted)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
