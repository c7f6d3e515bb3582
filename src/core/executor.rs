//! Step execution for a single job instance.
//!
//! Steps run strictly in declared order. A guard condition that evaluates
//! false skips the step (neither pass nor fail). A non-skipped step exiting
//! non-zero marks the job failed and causes every later step to be skipped
//! unless its guard is `always()` or `failure()`. No automatic retries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use serde::Serialize;

use crate::cache::{self, CacheConfig, CacheStore};
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::expr::Condition;
use crate::log_status;
use crate::matrix::JobInstance;
use crate::migration::{self, MigrationCompatConfig, TreeFetcher};
use crate::service::{self, ServiceRuntime};
use crate::workflow::{Job, Step, StepAction, Workflow};

#[derive(Debug, Clone)]
pub struct ScriptOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ScriptOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Seam between step dispatch and actual process execution. The shell
/// runner is the real thing; dry runs and tests substitute their own.
pub trait StepRunner: Send + Sync {
    fn run_script(
        &self,
        script: &str,
        env: &HashMap<String, String>,
        dir: &Path,
    ) -> Result<ScriptOutcome>;
}

/// Runs scripts under `sh -c` with the step's environment overlay.
pub struct ShellRunner;

impl StepRunner for ShellRunner {
    fn run_script(
        &self,
        script: &str,
        env: &HashMap<String, String>,
        dir: &Path,
    ) -> Result<ScriptOutcome> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(script)
            .envs(env)
            .current_dir(dir)
            .output()
            .map_err(|e| {
                Error::internal_io(e.to_string(), Some("run step script".to_string()))
            })?;

        Ok(ScriptOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Never executes anything; every script reports success.
pub struct DryRunRunner;

impl StepRunner for DryRunRunner {
    fn run_script(
        &self,
        _script: &str,
        _env: &HashMap<String, String>,
        _dir: &Path,
    ) -> Result<ScriptOutcome> {
        Ok(ScriptOutcome {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
    Missing,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub kind: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRunResult {
    pub instance_id: String,
    pub job_id: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub matrix: HashMap<String, String>,
    pub status: JobStatus,
    pub steps: Vec<StepResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_error: Option<String>,
    pub started_at: String,
    pub finished_at: String,
}

/// Everything job execution needs beyond the workflow itself. Bundling the
/// seams keeps `execute_job` callable with real, dry-run, or test doubles.
pub struct ExecDeps<'a> {
    pub runner: &'a dyn StepRunner,
    pub services: &'a dyn ServiceRuntime,
    pub store: &'a CacheStore,
    pub fetcher: &'a dyn TreeFetcher,
    pub dry_run: bool,
}

pub fn execute_job(
    workflow: &Workflow,
    job: &Job,
    instance: &JobInstance,
    workspace: &Path,
    event: &str,
    deps: &ExecDeps<'_>,
) -> JobRunResult {
    let started_at = chrono::Utc::now().to_rfc3339();
    let mut ctx = RunContext::new(workflow, job, instance, workspace, event);
    let mut warnings: Vec<String> = Vec::new();

    log_status!("run", "Job instance {} starting", instance.instance_id);

    // Setup failure aborts the job before any step runs.
    let handles = match service::provision(&job.services, deps.services, &instance.instance_id) {
        Ok(handles) => handles,
        Err(err) => {
            return JobRunResult {
                instance_id: instance.instance_id.clone(),
                job_id: job.id.clone(),
                matrix: instance.matrix.clone(),
                status: JobStatus::Failed,
                steps: Vec::new(),
                warnings,
                setup_error: Some(err.message),
                started_at,
                finished_at: chrono::Utc::now().to_rfc3339(),
            };
        }
    };

    // Service ports are now known; re-layer env so connection strings built
    // from `${{ services.<name>.port }}` resolve.
    for handle in &handles {
        if let Some(port) = handle.host_port {
            ctx.record_service_port(&handle.name, port);
        }
    }
    for (key, value) in &workflow.env {
        ctx.set_env(key, value);
    }
    for (key, value) in &job.env {
        ctx.set_env(key, value);
    }

    let mut steps: Vec<StepResult> = Vec::with_capacity(job.steps.len());
    let mut pending_saves: Vec<(String, PathBuf)> = Vec::new();

    for (index, step) in job.steps.iter().enumerate() {
        steps.push(execute_step(
            step,
            index,
            &mut ctx,
            deps,
            &mut pending_saves,
            &mut warnings,
        ));
    }

    let failed = steps
        .iter()
        .any(|s| matches!(s.status, StepStatus::Failed | StepStatus::Missing));
    let status = if failed {
        JobStatus::Failed
    } else {
        JobStatus::Success
    };

    // Cache saves run at job end, best-effort, only for succeeded jobs.
    if status == JobStatus::Success && !deps.dry_run {
        for (key, path) in &pending_saves {
            if let Err(err) = deps.store.save(key, path) {
                warnings.push(format!("Cache save for '{}' failed: {}", key, err.message));
            }
        }
    }

    service::teardown(&handles, deps.services);

    JobRunResult {
        instance_id: instance.instance_id.clone(),
        job_id: job.id.clone(),
        matrix: instance.matrix.clone(),
        status,
        steps,
        warnings,
        setup_error: None,
        started_at,
        finished_at: chrono::Utc::now().to_rfc3339(),
    }
}

fn execute_step(
    step: &Step,
    index: usize,
    ctx: &mut RunContext,
    deps: &ExecDeps<'_>,
    pending_saves: &mut Vec<(String, PathBuf)>,
    warnings: &mut Vec<String>,
) -> StepResult {
    let label = step.label(index);
    let clock = Instant::now();

    let condition = step.condition.clone().unwrap_or(Condition::Success);
    if !condition.evaluate(ctx.vars(), ctx.prior_failure) {
        let reason = if ctx.prior_failure {
            "an earlier step failed".to_string()
        } else {
            "guard condition evaluated to false".to_string()
        };
        return StepResult {
            label,
            id: step.id.clone(),
            kind: step.action.kind().to_string(),
            status: StepStatus::Skipped,
            exit_code: None,
            skip_reason: Some(reason),
            error: None,
            data: None,
            duration_ms: elapsed_ms(clock),
        };
    }

    log_status!("run", "Step '{}'", label);

    let mut result = match &step.action {
        StepAction::Run { script } => run_script_step(step, script, ctx, deps),
        StepAction::Uses { action, with } => match action.as_str() {
            "checkout" => StepResult {
                label: String::new(),
                id: None,
                kind: "checkout".to_string(),
                status: StepStatus::Success,
                exit_code: Some(0),
                skip_reason: None,
                error: None,
                data: Some(serde_json::json!({ "workspace": ctx.workspace.display().to_string() })),
                duration_ms: 0,
            },
            "cache" => cache_step(step, with, ctx, deps, pending_saves, warnings),
            "migration-compat" => migration_step(with, ctx, deps),
            other => {
                StepResult {
                    label: String::new(),
                    id: None,
                    kind: other.to_string(),
                    status: StepStatus::Missing,
                    exit_code: None,
                    skip_reason: None,
                    error: Some(format!("Unknown action '{}'", other)),
                    data: None,
                    duration_ms: 0,
                }
            }
        },
    };

    result.label = label;
    result.id = step.id.clone();
    result.duration_ms = elapsed_ms(clock);

    if matches!(result.status, StepStatus::Failed | StepStatus::Missing) {
        ctx.prior_failure = true;
    }

    result
}

fn run_script_step(
    step: &Step,
    script: &str,
    ctx: &RunContext,
    deps: &ExecDeps<'_>,
) -> StepResult {
    let rendered = ctx.render(script);
    let env = ctx.step_env(step);
    let dir = ctx.resolve_dir(step.working_dir.as_deref());

    match deps.runner.run_script(&rendered, &env, &dir) {
        Ok(outcome) => {
            let status = if outcome.success() {
                StepStatus::Success
            } else {
                StepStatus::Failed
            };
            let error = if outcome.success() {
                None
            } else {
                Some(stderr_excerpt(&outcome))
            };
            StepResult {
                label: String::new(),
                id: None,
                kind: "run".to_string(),
                status,
                exit_code: Some(outcome.exit_code),
                skip_reason: None,
                error,
                data: None,
                duration_ms: 0,
            }
        }
        Err(err) => StepResult {
            label: String::new(),
            id: None,
            kind: "run".to_string(),
            status: StepStatus::Failed,
            exit_code: None,
            skip_reason: None,
            error: Some(err.message),
            data: None,
            duration_ms: 0,
        },
    }
}

fn cache_step(
    step: &Step,
    with: &serde_yml::Value,
    ctx: &mut RunContext,
    deps: &ExecDeps<'_>,
    pending_saves: &mut Vec<(String, PathBuf)>,
    warnings: &mut Vec<String>,
) -> StepResult {
    let config: CacheConfig = match serde_yml::from_value(with.clone()) {
        Ok(config) => config,
        Err(e) => return config_failure("cache", e.to_string()),
    };

    let key = match cache::render_key(&config.key, ctx.vars(), &ctx.workspace) {
        Ok(key) => key,
        Err(err) => return config_failure("cache", err.message),
    };
    let mut restore_keys = Vec::with_capacity(config.restore_keys.len());
    for template in &config.restore_keys {
        match cache::render_key(template, ctx.vars(), &ctx.workspace) {
            Ok(rendered) => restore_keys.push(rendered),
            Err(err) => return config_failure("cache", err.message),
        }
    }

    let path_rendered = ctx.render(&config.path);
    let path = PathBuf::from(shellexpand::tilde(&path_rendered).into_owned());
    let path = if path.is_absolute() {
        path
    } else {
        ctx.workspace.join(path)
    };

    let outcome = deps.store.lookup(&key, &restore_keys);

    if outcome.hit && !deps.dry_run {
        if let Err(err) = deps.store.restore(&outcome, &path) {
            warnings.push(format!("Cache restore for '{}' failed: {}", key, err.message));
        }
    }
    if !outcome.exact {
        pending_saves.push((key.clone(), path));
    }

    // Exact hits only; a prefix restore still needs the install step.
    let cache_hit = if outcome.exact { "true" } else { "false" };
    if let Some(id) = &step.id {
        ctx.record_step_output(id, "cache-hit", cache_hit);
    }

    StepResult {
        label: String::new(),
        id: None,
        kind: "cache".to_string(),
        status: StepStatus::Success,
        exit_code: None,
        skip_reason: None,
        error: None,
        data: serde_json::to_value(&outcome).ok(),
        duration_ms: 0,
    }
}

fn migration_step(
    with: &serde_yml::Value,
    ctx: &RunContext,
    deps: &ExecDeps<'_>,
) -> StepResult {
    let config: MigrationCompatConfig = match serde_yml::from_value(with.clone()) {
        Ok(config) => config,
        Err(e) => return config_failure("migration-compat", e.to_string()),
    };

    if deps.dry_run {
        return StepResult {
            label: String::new(),
            id: None,
            kind: "migration-compat".to_string(),
            status: StepStatus::Success,
            exit_code: None,
            skip_reason: None,
            error: None,
            data: Some(serde_json::json!({
                "dryRun": true,
                "stableRef": config.stable_ref,
                "currentRef": config.current_ref,
            })),
            duration_ms: 0,
        };
    }

    match migration::verify_migration_backward_compatibility(
        &config,
        ctx,
        deps.fetcher,
        deps.runner,
    ) {
        Ok(report) => StepResult {
            label: String::new(),
            id: None,
            kind: "migration-compat".to_string(),
            status: StepStatus::Success,
            exit_code: None,
            skip_reason: None,
            error: None,
            data: serde_json::to_value(&report).ok(),
            duration_ms: 0,
        },
        Err(err) => StepResult {
            label: String::new(),
            id: None,
            kind: "migration-compat".to_string(),
            status: StepStatus::Failed,
            exit_code: None,
            skip_reason: None,
            error: Some(err.message),
            data: Some(err.details),
            duration_ms: 0,
        },
    }
}

fn config_failure(kind: &str, message: String) -> StepResult {
    StepResult {
        label: String::new(),
        id: None,
        kind: kind.to_string(),
        status: StepStatus::Failed,
        exit_code: None,
        skip_reason: None,
        error: Some(message),
        data: None,
        duration_ms: 0,
    }
}

fn stderr_excerpt(outcome: &ScriptOutcome) -> String {
    let text = if outcome.stderr.trim().is_empty() {
        outcome.stdout.trim()
    } else {
        outcome.stderr.trim()
    };
    let mut excerpt: String = text.chars().take(2000).collect();
    if excerpt.len() < text.len() {
        excerpt.push_str(" […]");
    }
    format!("exit {}: {}", outcome.exit_code, excerpt)
}

fn elapsed_ms(clock: Instant) -> u64 {
    clock.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::matrix;
    use crate::service::NullRuntime;
    use crate::workflow::parse;
    use std::fs;

    struct NoopFetcher;

    impl TreeFetcher for NoopFetcher {
        fn fetch(
            &self,
            _repository: &str,
            _reference: &str,
            _dest: &Path,
        ) -> crate::error::Result<()> {
            Ok(())
        }
    }

    fn run_single_job(yaml: &str, store: &CacheStore, workspace: &Path) -> JobRunResult {
        let wf = parse(yaml, "t.yml").unwrap();
        let job = &wf.jobs[0];
        let instance = matrix::expand(job).remove(0);
        let deps = ExecDeps {
            runner: &ShellRunner,
            services: &NullRuntime,
            store,
            fetcher: &NoopFetcher,
            dry_run: false,
        };
        execute_job(&wf, job, &instance, workspace, "pull_request", &deps)
    }

    #[test]
    fn steps_run_in_order_and_fail_fast() {
        let ws = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(store_dir.path().to_path_buf());

        let result = run_single_job(
            r#"
name: FailFast
on: [pull_request]
jobs:
  tests:
    runs-on: ubuntu-latest
    steps:
      - name: Passes
        run: "true"
      - name: Breaks
        run: "exit 3"
      - name: Never runs
        run: "true"
      - name: Cleanup
        if: always()
        run: "true"
"#,
            &store,
            ws.path(),
        );

        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.steps[0].status, StepStatus::Success);
        assert_eq!(result.steps[1].status, StepStatus::Failed);
        assert_eq!(result.steps[1].exit_code, Some(3));
        assert_eq!(result.steps[2].status, StepStatus::Skipped);
        assert_eq!(
            result.steps[2].skip_reason.as_deref(),
            Some("an earlier step failed")
        );
        assert_eq!(result.steps[3].status, StepStatus::Success);
    }

    #[test]
    fn cache_hit_skips_guarded_install_step() {
        let ws = tempfile::tempdir().unwrap();
        fs::write(ws.path().join("requirements.txt"), "pytest\n").unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(store_dir.path().to_path_buf());

        let yaml = r#"
name: CacheGuard
on: [pull_request]
jobs:
  tests:
    runs-on: ubuntu-latest
    steps:
      - id: cache-deps
        uses: cache
        with:
          path: pip-cache
          key: pip-${{ hashFiles('requirements.txt') }}
      - name: Install dependencies
        if: steps.cache-deps.outputs.cache-hit != 'true'
        run: mkdir -p pip-cache && touch pip-cache/installed
"#;

        // First run: miss, install runs, save happens at job end.
        let first = run_single_job(yaml, &store, ws.path());
        assert_eq!(first.status, JobStatus::Success);
        assert_eq!(first.steps[1].status, StepStatus::Success);

        // Second run over the same manifest: exact hit, install skipped.
        let second = run_single_job(yaml, &store, ws.path());
        assert_eq!(second.status, JobStatus::Success);
        assert_eq!(second.steps[1].status, StepStatus::Skipped);
        assert_eq!(
            second.steps[1].skip_reason.as_deref(),
            Some("guard condition evaluated to false")
        );
    }

    #[test]
    fn manifest_change_invalidates_cache_key() {
        let ws = tempfile::tempdir().unwrap();
        fs::write(ws.path().join("requirements.txt"), "pytest\n").unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(store_dir.path().to_path_buf());

        let yaml = r#"
name: CacheMiss
on: [pull_request]
jobs:
  tests:
    runs-on: ubuntu-latest
    steps:
      - id: cache-deps
        uses: cache
        with:
          path: pip-cache
          key: pip-${{ hashFiles('requirements.txt') }}
      - name: Install dependencies
        if: steps.cache-deps.outputs.cache-hit != 'true'
        run: mkdir -p pip-cache
"#;

        run_single_job(yaml, &store, ws.path());
        fs::write(ws.path().join("requirements.txt"), "pytest\ndjango\n").unwrap();
        let after_change = run_single_job(yaml, &store, ws.path());

        // New key, no exact hit: install path taken again.
        assert_eq!(after_change.steps[1].status, StepStatus::Success);
    }

    #[test]
    fn unknown_action_fails_the_job() {
        let ws = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(store_dir.path().to_path_buf());

        let result = run_single_job(
            r#"
name: Unknown
on: [pull_request]
jobs:
  x:
    runs-on: ubuntu-latest
    steps:
      - uses: vendor/some-action@v3
      - run: "true"
"#,
            &store,
            ws.path(),
        );

        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.steps[0].status, StepStatus::Missing);
        assert_eq!(result.steps[1].status, StepStatus::Skipped);
    }

    #[test]
    fn service_failure_aborts_before_any_step() {
        struct DeadRuntime;
        impl ServiceRuntime for DeadRuntime {
            fn start(
                &self,
                service: &crate::workflow::Service,
                _instance_id: &str,
            ) -> crate::error::Result<String> {
                Err(Error::service_start_failed(
                    service.name.clone(),
                    service.image.clone(),
                    "no docker",
                ))
            }
            fn check_health(
                &self,
                _container: &str,
                _check: &crate::workflow::HealthCheck,
            ) -> bool {
                false
            }
            fn stop(&self, _container: &str) {}
        }

        let ws = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(store_dir.path().to_path_buf());

        let wf = parse(
            r#"
name: Svc
on: [pull_request]
jobs:
  tests:
    runs-on: ubuntu-latest
    services:
      postgres:
        image: postgres:12
    steps:
      - run: "true"
"#,
            "t.yml",
        )
        .unwrap();
        let job = &wf.jobs[0];
        let instance = matrix::expand(job).remove(0);
        let deps = ExecDeps {
            runner: &ShellRunner,
            services: &DeadRuntime,
            store: &store,
            fetcher: &NoopFetcher,
            dry_run: false,
        };
        let result = execute_job(&wf, job, &instance, ws.path(), "pull_request", &deps);

        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.steps.is_empty());
        assert!(result.setup_error.is_some());
    }

    #[test]
    fn dry_run_executes_nothing_but_reports_success() {
        let ws = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(store_dir.path().to_path_buf());

        let wf = parse(
            r#"
name: Dry
on: [pull_request]
jobs:
  tests:
    runs-on: ubuntu-latest
    steps:
      - name: Would explode
        run: "exit 99"
"#,
            "t.yml",
        )
        .unwrap();
        let job = &wf.jobs[0];
        let instance = matrix::expand(job).remove(0);
        let deps = ExecDeps {
            runner: &DryRunRunner,
            services: &NullRuntime,
            store: &store,
            fetcher: &NoopFetcher,
            dry_run: true,
        };
        let result = execute_job(&wf, job, &instance, ws.path(), "pull_request", &deps);
        assert_eq!(result.status, JobStatus::Success);
    }
}
