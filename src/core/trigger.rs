//! Trigger evaluation: decide whether an incoming event materializes a run.

use serde::Serialize;

use crate::workflow::Workflow;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDecision {
    pub event: String,
    pub matched: bool,
    pub triggers: Vec<String>,
}

/// Absence of a match is a silent no-run, never an error.
pub fn evaluate(workflow: &Workflow, event: &str) -> TriggerDecision {
    TriggerDecision {
        event: event.to_string(),
        matched: workflow.on.iter().any(|t| t == event),
        triggers: workflow.on.clone(),
    }
}
