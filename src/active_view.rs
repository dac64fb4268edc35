//! Shared display state: what the table monitor is showing and how the
//! CHARON overlay behaves. A single in-memory snapshot the GM mutates
//! and the approval workflow reads; persistence is someone else's job.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViewType {
    #[default]
    Standby,
    Messages,
    CommTerminal,
    EncounterMap,
    ShipDashboard,
}

/// Whether the CHARON overlay is display-only or accepting player queries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CharonMode {
    #[default]
    Display,
    Query,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ViewState {
    pub view_type: ViewType,
    pub location_slug: String,
    pub view_slug: String,
    pub charon_mode: CharonMode,
    /// Explicitly configured location for CHARON, e.g. "sol/earth".
    /// Encounter channels override this.
    pub charon_location_path: String,
    pub charon_active_channel: String,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            view_type: ViewType::default(),
            location_slug: String::new(),
            view_slug: String::new(),
            charon_mode: CharonMode::default(),
            charon_location_path: String::new(),
            charon_active_channel: "story".to_string(),
        }
    }
}

#[derive(Default)]
pub struct ActiveView {
    state: Mutex<ViewState>,
}

impl ActiveView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ViewState {
        self.state.lock().unwrap().clone()
    }

    /// Applies a partial update and returns the new snapshot.
    pub fn update(&self, patch: impl FnOnce(&mut ViewState)) -> ViewState {
        let mut state = self.state.lock().unwrap();
        patch(&mut state);
        state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let view = ActiveView::new();
        let state = view.snapshot();
        assert_eq!(state.view_type, ViewType::Standby);
        assert_eq!(state.charon_mode, CharonMode::Display);
        assert_eq!(state.charon_active_channel, "story");
    }

    #[test]
    fn test_partial_update() {
        let view = ActiveView::new();
        view.update(|s| {
            s.charon_mode = CharonMode::Query;
            s.charon_location_path = "sol/earth".to_string();
        });
        let state = view.snapshot();
        assert_eq!(state.charon_mode, CharonMode::Query);
        assert_eq!(state.charon_location_path, "sol/earth");
        // Untouched fields keep their values.
        assert_eq!(state.charon_active_channel, "story");
    }
}
