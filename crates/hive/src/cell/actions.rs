//! Action Registry (host side)
//!
//! Actions are named, triggerable units of script logic with an
//! externally observable state. The handler closures stay inside the
//! interpreter; this table holds the state the rest of the system reads.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Externally observable action state. Transitions happen only through
/// explicit `loading`/`active` calls from the handler or administrative
/// enable/disable, never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionState {
    Enabled,
    Disabled,
    Loading,
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionState::Enabled => write!(f, "enabled"),
            ActionState::Disabled => write!(f, "disabled"),
            ActionState::Loading => write!(f, "loading"),
        }
    }
}

/// All actions registered by one project.
#[derive(Debug, Default)]
pub struct ActionTable {
    states: Mutex<HashMap<String, ActionState>>,
}

impl ActionTable {
    /// Register an action, (re)setting its state to Enabled.
    pub fn register(&self, slug: &str) {
        self.states
            .lock()
            .insert(slug.to_string(), ActionState::Enabled);
    }

    pub fn get(&self, slug: &str) -> Option<ActionState> {
        self.states.lock().get(slug).copied()
    }

    /// `loading(true)` from a handler; `loading(false)` returns to
    /// Enabled.
    pub fn set_loading(&self, slug: &str, flag: bool) -> Option<ActionState> {
        self.transition(slug, if flag {
            ActionState::Loading
        } else {
            ActionState::Enabled
        })
    }

    /// `active(true)` enables, `active(false)` disables.
    pub fn set_active(&self, slug: &str, flag: bool) -> Option<ActionState> {
        self.transition(slug, if flag {
            ActionState::Enabled
        } else {
            ActionState::Disabled
        })
    }

    /// Administrative enable/disable.
    pub fn set_enabled(&self, slug: &str, enabled: bool) -> Option<ActionState> {
        self.set_active(slug, enabled)
    }

    fn transition(&self, slug: &str, state: ActionState) -> Option<ActionState> {
        let mut states = self.states.lock();
        let slot = states.get_mut(slug)?;
        *slot = state;
        Some(state)
    }

    /// All (slug, state) pairs, sorted by slug.
    pub fn states(&self) -> Vec<(String, ActionState)> {
        let mut all: Vec<_> = self
            .states
            .lock()
            .iter()
            .map(|(slug, state)| (slug.clone(), *state))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_defaults_to_enabled() {
        let table = ActionTable::default();
        table.register("sync");
        assert_eq!(table.get("sync"), Some(ActionState::Enabled));
        assert_eq!(table.get("missing"), None);
    }

    #[test]
    fn loading_and_active_transitions() {
        let table = ActionTable::default();
        table.register("sync");

        assert_eq!(table.set_loading("sync", true), Some(ActionState::Loading));
        assert_eq!(table.set_loading("sync", false), Some(ActionState::Enabled));
        assert_eq!(table.set_active("sync", false), Some(ActionState::Disabled));
        assert_eq!(table.set_active("sync", true), Some(ActionState::Enabled));
        assert_eq!(table.set_loading("missing", true), None);
    }

    #[test]
    fn states_are_sorted() {
        let table = ActionTable::default();
        table.register("b");
        table.register("a");
        let states = table.states();
        assert_eq!(states[0].0, "a");
        assert_eq!(states[1].0, "b");
    }
}
