use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    WorkflowNotFound,
    WorkflowInvalidYaml,
    WorkflowInvalidValue,

    ValidationInvalidArgument,

    JobNotFound,

    ServiceStartFailed,
    ServiceUnhealthy,

    MigrationCompatFailed,

    GitCommandFailed,

    InternalIoError,
    InternalJsonError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::WorkflowNotFound => "workflow.not_found",
            ErrorCode::WorkflowInvalidYaml => "workflow.invalid_yaml",
            ErrorCode::WorkflowInvalidValue => "workflow.invalid_value",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::JobNotFound => "job.not_found",

            ErrorCode::ServiceStartFailed => "service.start_failed",
            ErrorCode::ServiceUnhealthy => "service.unhealthy",

            ErrorCode::MigrationCompatFailed => "migration.compat_failed",

            ErrorCode::GitCommandFailed => "git.command_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundDetails {
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInvalidYamlDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInvalidValueDetails {
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceFailureDetails {
    pub service: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let details = serde_json::to_value(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.into(),
            id,
            tried,
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            details,
        )
    }

    pub fn workflow_not_found(path: impl Into<String>) -> Self {
        Self::not_found(ErrorCode::WorkflowNotFound, "Workflow file not found", path)
            .with_hint("Pass the path to a workflow definition, e.g. workflows/backend-ci.yml")
    }

    pub fn workflow_invalid_yaml(path: impl Into<String>, error: impl Into<String>) -> Self {
        let details = serde_json::to_value(WorkflowInvalidYamlDetails {
            path: path.into(),
            error: error.into(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(ErrorCode::WorkflowInvalidYaml, "Invalid workflow YAML", details)
    }

    pub fn workflow_invalid_value(
        field: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let details = serde_json::to_value(WorkflowInvalidValueDetails {
            field: field.into(),
            value,
            problem: problem.into(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(
            ErrorCode::WorkflowInvalidValue,
            "Invalid workflow value",
            details,
        )
    }

    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::not_found(ErrorCode::JobNotFound, "Job not found", id)
            .with_hint("Run 'greenlight plan <file>' to see the jobs a workflow declares")
    }

    pub fn service_start_failed(
        service: impl Into<String>,
        image: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        let details = serde_json::to_value(ServiceFailureDetails {
            service: service.into(),
            image: image.into(),
            attempts: None,
            stderr: Some(stderr.into()),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(
            ErrorCode::ServiceStartFailed,
            "Service container failed to start",
            details,
        )
    }

    pub fn service_unhealthy(
        service: impl Into<String>,
        image: impl Into<String>,
        attempts: u32,
    ) -> Self {
        let details = serde_json::to_value(ServiceFailureDetails {
            service: service.into(),
            image: image.into(),
            attempts: Some(attempts),
            stderr: None,
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(
            ErrorCode::ServiceUnhealthy,
            "Service health check never passed",
            details,
        )
        .with_retryable(true)
    }

    pub fn migration_compat_failed(phase: &str, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::MigrationCompatFailed,
            "Migration backward-compatibility check failed",
            serde_json::json!({ "phase": phase, "error": message.into() }),
        )
    }

    pub fn git_command_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::GitCommandFailed,
            "Git command failed",
            serde_json::json!({ "error": message.into() }),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            serde_json::json!({ "error": error.into(), "context": context }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            serde_json::json!({ "error": error.into(), "context": context }),
        )
    }

    fn not_found(code: ErrorCode, message: &str, id: impl Into<String>) -> Self {
        let details = serde_json::to_value(NotFoundDetails { id: id.into() })
            .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Self::new(code, message, details)
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }
}
