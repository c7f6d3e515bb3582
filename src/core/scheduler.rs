//! Workflow planning and concurrent job scheduling.
//!
//! Jobs are independent: each matrix-expanded instance runs on its own
//! thread against its own context, reports its own pass/fail, and the
//! workflow's aggregate result is the logical AND of all instance results.

use std::collections::HashMap;
use std::path::PathBuf;
use std::thread;

use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::executor::{self, ExecDeps, JobRunResult, JobStatus};
use crate::matrix;
use crate::trigger;
use crate::workflow::{StepAction, Workflow, BUILTIN_ACTIONS};

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepPlanStatus {
    Ready,
    Missing,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepPlan {
    pub label: String,
    pub kind: String,
    pub guarded: bool,
    pub status: StepPlanStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstancePlan {
    pub instance_id: String,
    pub job_id: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub matrix: HashMap<String, String>,
    pub runner: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
    pub steps: Vec<StepPlan>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowPlan {
    pub workflow: String,
    pub event: String,
    pub triggered: bool,
    pub instances: Vec<InstancePlan>,
}

/// Evaluate the trigger and expand every job's matrix into a step-level
/// plan. An unmatched event produces a plan with no instances.
pub fn plan(workflow: &Workflow, event: &str) -> WorkflowPlan {
    let decision = trigger::evaluate(workflow, event);
    if !decision.matched {
        return WorkflowPlan {
            workflow: workflow.name.clone(),
            event: event.to_string(),
            triggered: false,
            instances: Vec::new(),
        };
    }

    let mut instances = Vec::new();
    for job in &workflow.jobs {
        for instance in matrix::expand(job) {
            let steps = job
                .steps
                .iter()
                .enumerate()
                .map(|(index, step)| {
                    let status = match &step.action {
                        StepAction::Uses { action, .. }
                            if !BUILTIN_ACTIONS.contains(&action.as_str()) =>
                        {
                            StepPlanStatus::Missing
                        }
                        _ => StepPlanStatus::Ready,
                    };
                    StepPlan {
                        label: step.label(index),
                        kind: step.action.kind().to_string(),
                        guarded: step.condition.is_some(),
                        status,
                    }
                })
                .collect();

            instances.push(InstancePlan {
                instance_id: instance.instance_id.clone(),
                job_id: job.id.clone(),
                matrix: instance.matrix,
                runner: job.runs_on.clone(),
                services: job.services.iter().map(|s| s.name.clone()).collect(),
                steps,
            });
        }
    }

    WorkflowPlan {
        workflow: workflow.name.clone(),
        event: event.to_string(),
        triggered: true,
        instances,
    }
}

// ---------------------------------------------------------------------------
// Running
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
    NoRun,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_jobs: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_steps: usize,
    pub skipped_steps: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRunResult {
    pub run_id: Uuid,
    pub workflow: String,
    pub event: String,
    pub status: RunStatus,
    pub jobs: Vec<JobRunResult>,
    pub summary: RunSummary,
    pub started_at: String,
    pub finished_at: String,
}

pub struct RunOptions {
    pub event: String,
    pub workspace: PathBuf,
    /// Restrict the run to a single job id.
    pub job: Option<String>,
}

pub fn run(
    workflow: &Workflow,
    options: &RunOptions,
    deps: &ExecDeps<'_>,
) -> Result<WorkflowRunResult> {
    let run_id = Uuid::new_v4();
    let started_at = chrono::Utc::now().to_rfc3339();

    let decision = trigger::evaluate(workflow, &options.event);
    if !decision.matched {
        return Ok(WorkflowRunResult {
            run_id,
            workflow: workflow.name.clone(),
            event: options.event.clone(),
            status: RunStatus::NoRun,
            jobs: Vec::new(),
            summary: summarize(&[]),
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
        });
    }

    if let Some(job_id) = &options.job {
        // Fail early on a typo rather than silently running nothing.
        workflow.job(job_id)?;
    }

    let selected: Vec<_> = workflow
        .jobs
        .iter()
        .filter(|job| options.job.as_ref().is_none_or(|id| &job.id == id))
        .collect();

    let mut jobs: Vec<JobRunResult> = Vec::new();
    thread::scope(|scope| {
        let mut handles = Vec::new();
        for &job in &selected {
            for instance in matrix::expand(job) {
                let workspace = options.workspace.clone();
                let event = options.event.clone();
                let instance_id = instance.instance_id.clone();
                let handle = scope.spawn(move || {
                    executor::execute_job(workflow, job, &instance, &workspace, &event, deps)
                });
                handles.push((job.id.clone(), instance_id, handle));
            }
        }
        for (job_id, instance_id, handle) in handles {
            match handle.join() {
                Ok(result) => jobs.push(result),
                // A panicked job thread counts as a failed job, not a crashed run.
                Err(_) => jobs.push(JobRunResult {
                    instance_id,
                    job_id,
                    matrix: HashMap::new(),
                    status: JobStatus::Failed,
                    steps: Vec::new(),
                    warnings: Vec::new(),
                    setup_error: Some("Job thread panicked".to_string()),
                    started_at: started_at.clone(),
                    finished_at: chrono::Utc::now().to_rfc3339(),
                }),
            }
        }
    });

    let failed = jobs.iter().any(|job| job.status != JobStatus::Success);
    let status = if failed {
        RunStatus::Failed
    } else {
        RunStatus::Success
    };

    Ok(WorkflowRunResult {
        run_id,
        workflow: workflow.name.clone(),
        event: options.event.clone(),
        status,
        summary: summarize(&jobs),
        jobs,
        started_at,
        finished_at: chrono::Utc::now().to_rfc3339(),
    })
}

fn summarize(jobs: &[JobRunResult]) -> RunSummary {
    let succeeded = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Success)
        .count();
    let total_steps = jobs.iter().map(|j| j.steps.len()).sum();
    let skipped_steps = jobs
        .iter()
        .flat_map(|j| &j.steps)
        .filter(|s| s.status == executor::StepStatus::Skipped)
        .count();

    RunSummary {
        total_jobs: jobs.len(),
        succeeded,
        failed: jobs.len() - succeeded,
        total_steps,
        skipped_steps,
    }
}
