//! Workflow definition model and YAML loading.
//!
//! The dialect mirrors the hosted-CI shape: a named workflow with a trigger
//! set, workflow-level env, and a map of jobs, each with a runner label,
//! optional matrix, service containers, and an ordered step list. Job and
//! step declaration order is execution-relevant and preserved.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::expr::Condition;

pub const BUILTIN_ACTIONS: &[&str] = &["checkout", "cache", "migration-compat"];

#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub on: Vec<String>,
    pub env: HashMap<String, String>,
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub runs_on: String,
    pub matrix: Vec<(String, Vec<String>)>,
    pub services: Vec<Service>,
    pub env: HashMap<String, String>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    #[serde(skip_deserializing)]
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Port mappings as `host:container` pairs.
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub health: Option<HealthCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub cmd: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_interval_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_retries() -> u32 {
    10
}

#[derive(Debug, Clone)]
pub struct Step {
    pub id: Option<String>,
    pub name: Option<String>,
    pub action: StepAction,
    pub env: HashMap<String, String>,
    pub condition: Option<Condition>,
    pub working_dir: Option<String>,
}

impl Step {
    /// Stable identifier for reporting: explicit id, else name, else position.
    pub fn label(&self, index: usize) -> String {
        if let Some(id) = &self.id {
            return id.clone();
        }
        if let Some(name) = &self.name {
            return name.clone();
        }
        format!("step-{}", index + 1)
    }
}

#[derive(Debug, Clone)]
pub enum StepAction {
    /// Inline shell script run under `sh -c`.
    Run { script: String },
    /// Reference to a builtin action with parameters.
    Uses {
        action: String,
        with: serde_yml::Value,
    },
}

impl StepAction {
    pub fn kind(&self) -> &str {
        match self {
            StepAction::Run { .. } => "run",
            StepAction::Uses { action, .. } => action,
        }
    }
}

// ---------------------------------------------------------------------------
// Raw deserialization shapes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawWorkflow {
    name: String,
    on: RawTriggers,
    #[serde(default)]
    env: HashMap<String, String>,
    jobs: serde_yml::Mapping,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTriggers {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize)]
struct RawJob {
    #[serde(rename = "runs-on")]
    runs_on: String,
    #[serde(default)]
    strategy: Option<RawStrategy>,
    #[serde(default)]
    services: serde_yml::Mapping,
    #[serde(default)]
    env: HashMap<String, String>,
    steps: Vec<RawStep>,
}

#[derive(Deserialize)]
struct RawStrategy {
    matrix: serde_yml::Mapping,
}

#[derive(Deserialize)]
struct RawStep {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    uses: Option<String>,
    #[serde(default)]
    with: Option<serde_yml::Value>,
    #[serde(default)]
    run: Option<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default, rename = "if")]
    condition: Option<String>,
    #[serde(default, rename = "working-directory")]
    working_dir: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

pub fn load(path: &Path) -> Result<Workflow> {
    if !path.exists() {
        return Err(Error::workflow_not_found(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;
    parse(&content, &path.display().to_string())
}

pub fn parse(content: &str, source: &str) -> Result<Workflow> {
    let raw: RawWorkflow = serde_yml::from_str(content)
        .map_err(|e| Error::workflow_invalid_yaml(source, e.to_string()))?;

    let on = match raw.on {
        RawTriggers::One(event) => vec![event],
        RawTriggers::Many(events) => events,
    };
    if on.is_empty() {
        return Err(Error::workflow_invalid_value(
            "on",
            None,
            "Trigger set must not be empty",
        ));
    }

    if raw.jobs.is_empty() {
        return Err(Error::workflow_invalid_value(
            "jobs",
            None,
            "Workflow declares no jobs",
        ));
    }

    let mut jobs = Vec::with_capacity(raw.jobs.len());
    for (key, value) in raw.jobs {
        let id = mapping_key_string(&key, "jobs")?;
        let raw_job: RawJob = serde_yml::from_value(value).map_err(|e| {
            Error::workflow_invalid_yaml(source, format!("job '{}': {}", id, e))
        })?;
        jobs.push(convert_job(id, raw_job)?);
    }

    Ok(Workflow {
        name: raw.name,
        on,
        env: raw.env,
        jobs,
    })
}

fn mapping_key_string(key: &serde_yml::Value, field: &str) -> Result<String> {
    key.as_str().map(str::to_string).ok_or_else(|| {
        Error::workflow_invalid_value(field, None, "Mapping keys must be strings")
    })
}

fn convert_job(id: String, raw: RawJob) -> Result<Job> {
    let mut matrix = Vec::new();
    if let Some(strategy) = raw.strategy {
        for (axis_key, axis_values) in strategy.matrix {
            let axis = mapping_key_string(&axis_key, &format!("jobs.{}.strategy.matrix", id))?;
            let values: Vec<String> = serde_yml::from_value(axis_values).map_err(|e| {
                Error::workflow_invalid_value(
                    format!("jobs.{}.strategy.matrix.{}", id, axis),
                    None,
                    format!("Axis values must be a list of scalars: {}", e),
                )
            })?;
            if values.is_empty() {
                return Err(Error::workflow_invalid_value(
                    format!("jobs.{}.strategy.matrix.{}", id, axis),
                    None,
                    "Matrix axis must declare at least one value",
                ));
            }
            matrix.push((axis, values));
        }
    }

    let mut services = Vec::with_capacity(raw.services.len());
    for (service_key, service_value) in raw.services {
        let name = mapping_key_string(&service_key, &format!("jobs.{}.services", id))?;
        let mut service: Service = serde_yml::from_value(service_value).map_err(|e| {
            Error::workflow_invalid_value(
                format!("jobs.{}.services.{}", id, name),
                None,
                e.to_string(),
            )
        })?;
        service.name = name;
        services.push(service);
    }

    if raw.steps.is_empty() {
        return Err(Error::workflow_invalid_value(
            format!("jobs.{}.steps", id),
            None,
            "Job declares no steps",
        ));
    }

    let mut steps = Vec::with_capacity(raw.steps.len());
    let mut seen_ids: Vec<String> = Vec::new();
    for (index, raw_step) in raw.steps.into_iter().enumerate() {
        let step = convert_step(&id, index, raw_step)?;
        if let Some(step_id) = &step.id {
            if seen_ids.contains(step_id) {
                return Err(Error::workflow_invalid_value(
                    format!("jobs.{}.steps", id),
                    Some(step_id.clone()),
                    "Duplicate step id",
                ));
            }
            seen_ids.push(step_id.clone());
        }
        steps.push(step);
    }

    Ok(Job {
        id,
        runs_on: raw.runs_on,
        matrix,
        services,
        env: raw.env,
        steps,
    })
}

fn convert_step(job_id: &str, index: usize, raw: RawStep) -> Result<Step> {
    let field = format!("jobs.{}.steps[{}]", job_id, index);

    let action = match (raw.uses, raw.run) {
        (Some(action), None) => StepAction::Uses {
            action,
            with: raw.with.unwrap_or(serde_yml::Value::Null),
        },
        (None, Some(script)) => {
            if raw.with.is_some() {
                return Err(Error::workflow_invalid_value(
                    field,
                    None,
                    "'with' is only valid on action steps",
                ));
            }
            StepAction::Run { script }
        }
        (Some(_), Some(_)) => {
            return Err(Error::workflow_invalid_value(
                field,
                None,
                "A step declares either 'uses' or 'run', not both",
            ));
        }
        (None, None) => {
            return Err(Error::workflow_invalid_value(
                field,
                None,
                "A step must declare 'uses' or 'run'",
            ));
        }
    };

    let condition = raw
        .condition
        .as_deref()
        .map(Condition::parse)
        .transpose()?;

    Ok(Step {
        id: raw.id,
        name: raw.name,
        action,
        env: raw.env,
        condition,
        working_dir: raw.working_dir,
    })
}

impl Workflow {
    pub fn job(&self, id: &str) -> Result<&Job> {
        self.jobs
            .iter()
            .find(|job| job.id == id)
            .ok_or_else(|| Error::job_not_found(id))
    }
}

// ---------------------------------------------------------------------------
// Static validation beyond what parsing enforces
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub workflow: String,
    pub jobs: usize,
    pub warnings: Vec<ValidationWarning>,
}

/// Validate a parsed workflow. Parsing already rejects malformed shapes;
/// this pass surfaces advisory findings that do not block execution.
pub fn validate(workflow: &Workflow) -> ValidationReport {
    let mut warnings = Vec::new();

    for (key, value) in &workflow.env {
        if looks_like_hardcoded_credential(key, value) {
            warnings.push(ValidationWarning {
                field: format!("env.{}", key),
                message: "Hardcoded credential value; keep this workflow confined to isolated test environments".to_string(),
            });
        }
    }

    for job in &workflow.jobs {
        for (index, step) in job.steps.iter().enumerate() {
            if let StepAction::Uses { action, .. } = &step.action {
                if !BUILTIN_ACTIONS.contains(&action.as_str()) {
                    warnings.push(ValidationWarning {
                        field: format!("jobs.{}.steps[{}].uses", job.id, index),
                        message: format!("Unknown action '{}'; the step will fail at run time", action),
                    });
                }
            }
        }
        for service in &job.services {
            if service.image.is_empty() {
                warnings.push(ValidationWarning {
                    field: format!("jobs.{}.services.{}.image", job.id, service.name),
                    message: "Service has an empty image reference".to_string(),
                });
            }
        }
    }

    ValidationReport {
        workflow: workflow.name.clone(),
        jobs: workflow.jobs.len(),
        warnings,
    }
}

fn looks_like_hardcoded_credential(key: &str, value: &str) -> bool {
    let key_upper = key.to_uppercase();
    let sensitive = key_upper.contains("SECRET")
        || key_upper.contains("PASSWORD")
        || key_upper.contains("TOKEN");
    sensitive && !value.is_empty() && !value.contains("${{")
}
