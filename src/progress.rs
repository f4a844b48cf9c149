//! Named-step progress checklist.
//!
//! The tracker is a render-only projection: it is driven by progress events
//! but never becomes part of the transcript.

use serde::{Deserialize, Serialize};

/// The state of a single progress step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    /// Not started this turn.
    #[default]
    Idle,
    /// Work on this step is under way.
    #[serde(alias = "in_progress", alias = "started", alias = "active")]
    Running,
    /// The step has finished.
    #[serde(alias = "complete", alias = "completed", alias = "finished")]
    Done,
}

/// A catalogue entry: one step known ahead of time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Identifier used by progress events.
    pub id: String,
    /// Label shown until an event supplies a new one.
    pub label: String,
}

impl StepDefinition {
    /// Creates a catalogue entry.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// One row of the checklist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressStep {
    /// Step identifier.
    pub id: String,
    /// Current label.
    pub label: String,
    /// Current state.
    pub state: StepState,
}

/// An ordered checklist over a fixed catalogue of steps.
#[derive(Clone, Debug)]
pub struct ProgressTracker {
    catalogue: Vec<StepDefinition>,
    steps: Vec<ProgressStep>,
}

impl ProgressTracker {
    /// Creates a tracker with every step idle.
    pub fn new(catalogue: Vec<StepDefinition>) -> Self {
        let mut tracker = Self {
            catalogue,
            steps: Vec::new(),
        };
        tracker.rearm();
        tracker
    }

    /// Resets every step to idle with its catalogue label.
    pub fn rearm(&mut self) {
        self.steps = self
            .catalogue
            .iter()
            .map(|def| ProgressStep {
                id: def.id.clone(),
                label: def.label.clone(),
                state: StepState::Idle,
            })
            .collect();
    }

    /// Moves the named step to `state`, replacing its label when one is given.
    ///
    /// Returns false when the step is not in the catalogue.
    pub fn apply(&mut self, step_id: &str, state: StepState, label: Option<&str>) -> bool {
        let Some(step) = self.steps.iter_mut().find(|step| step.id == step_id) else {
            return false;
        };
        step.state = state;
        if let Some(label) = label.filter(|label| !label.is_empty()) {
            step.label = label.to_string();
        }
        true
    }

    /// The checklist, in catalogue order.
    pub fn steps(&self) -> &[ProgressStep] {
        &self.steps
    }

    /// Looks up one step.
    pub fn step(&self, step_id: &str) -> Option<&ProgressStep> {
        self.steps.iter().find(|step| step.id == step_id)
    }

    /// True once every step is done.
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|step| step.state == StepState::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ProgressTracker {
        ProgressTracker::new(vec![
            StepDefinition::new("p1", "Reading request"),
            StepDefinition::new("p2", "Pricing"),
        ])
    }

    #[test]
    fn starts_idle() {
        let tracker = tracker();
        assert_eq!(tracker.steps().len(), 2);
        assert!(tracker.steps().iter().all(|s| s.state == StepState::Idle));
        assert!(!tracker.is_complete());
    }

    #[test]
    fn apply_moves_state_and_label() {
        let mut tracker = tracker();
        assert!(tracker.apply("p2", StepState::Running, Some("Pricing 3 funds")));
        let step = tracker.step("p2").unwrap();
        assert_eq!(step.state, StepState::Running);
        assert_eq!(step.label, "Pricing 3 funds");
        assert!(tracker.apply("p2", StepState::Done, None));
        assert_eq!(tracker.step("p2").unwrap().label, "Pricing 3 funds");
    }

    #[test]
    fn unknown_steps_are_ignored() {
        let mut tracker = tracker();
        assert!(!tracker.apply("p9", StepState::Done, None));
        assert_eq!(tracker.steps().len(), 2);
    }

    #[test]
    fn rearm_restores_catalogue() {
        let mut tracker = tracker();
        tracker.apply("p1", StepState::Done, Some("Read"));
        tracker.apply("p2", StepState::Done, None);
        assert!(tracker.is_complete());
        tracker.rearm();
        let step = tracker.step("p1").unwrap();
        assert_eq!(step.state, StepState::Idle);
        assert_eq!(step.label, "Reading request");
    }

    #[test]
    fn state_aliases_deserialize() {
        let state: StepState = serde_json::from_str("\"in_progress\"").unwrap();
        assert_eq!(state, StepState::Running);
        let state: StepState = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(state, StepState::Done);
    }
}
