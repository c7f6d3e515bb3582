//! Exercises the bundled backend CI workflow end to end in dry-run mode.

use std::path::{Path, PathBuf};

use greenlight::cache::CacheStore;
use greenlight::executor::{DryRunRunner, ExecDeps, StepStatus};
use greenlight::migration::TreeFetcher;
use greenlight::scheduler::{self, RunOptions, RunStatus, StepPlanStatus};
use greenlight::service::NullRuntime;
use greenlight::workflow::{self, StepAction, Workflow};

struct NoopFetcher;

impl TreeFetcher for NoopFetcher {
    fn fetch(&self, _repository: &str, _reference: &str, _dest: &Path) -> greenlight::Result<()> {
        Ok(())
    }
}

fn bundled() -> Workflow {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("workflows/backend-ci.yml");
    workflow::load(&path).unwrap()
}

#[test]
fn bundled_workflow_has_four_jobs_in_declared_order() {
    let wf = bundled();
    let ids: Vec<&str> = wf.jobs.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["code-quality", "backend-tests", "cloud", "enterprise"]
    );
    assert_eq!(wf.on, vec!["pull_request"]);
}

#[test]
fn backend_tests_matrix_covers_three_interpreter_versions() {
    let wf = bundled();
    let tests = wf.job("backend-tests").unwrap();
    assert_eq!(tests.matrix.len(), 1);
    assert_eq!(tests.matrix[0].0, "python-version");
    assert_eq!(tests.matrix[0].1, vec!["3.9", "3.10", "3.11"]);
}

#[test]
fn foss_test_command_excludes_extension_tests_by_marker() {
    let wf = bundled();
    let tests = wf.job("backend-tests").unwrap();
    let run_foss = tests
        .steps
        .iter()
        .find_map(|step| match &step.action {
            StepAction::Run { script } if script.contains("pytest") => Some(script.as_str()),
            _ => None,
        })
        .unwrap();
    assert!(run_foss.contains("not ee"));
}

#[test]
fn enterprise_job_declares_both_backing_stores() {
    let wf = bundled();
    let enterprise = wf.job("enterprise").unwrap();
    let names: Vec<&str> = enterprise.services.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["postgres", "clickhouse"]);

    let clickhouse = &enterprise.services[1];
    assert_eq!(clickhouse.ports.len(), 4);
    assert!(clickhouse.ports.contains(&"8123:8123".to_string()));
    assert!(clickhouse.health.is_some());
}

#[test]
fn cloud_job_carries_the_migration_compat_step() {
    let wf = bundled();
    let cloud = wf.job("cloud").unwrap();
    let has_compat = cloud
        .steps
        .iter()
        .any(|step| matches!(&step.action, StepAction::Uses { action, .. } if action == "migration-compat"));
    assert!(has_compat);
}

#[test]
fn plan_expands_to_six_instances_all_ready() {
    let wf = bundled();
    let plan = scheduler::plan(&wf, "pull_request");
    assert!(plan.triggered);
    assert_eq!(plan.instances.len(), 6);

    let matrix_instances: Vec<&str> = plan
        .instances
        .iter()
        .filter(|i| i.job_id == "backend-tests")
        .map(|i| i.instance_id.as_str())
        .collect();
    assert_eq!(
        matrix_instances,
        vec!["backend-tests--3-9", "backend-tests--3-10", "backend-tests--3-11"]
    );

    for instance in &plan.instances {
        for step in &instance.steps {
            assert_eq!(step.status, StepPlanStatus::Ready);
        }
    }
}

#[test]
fn plan_for_push_event_is_a_silent_no_run() {
    let wf = bundled();
    let plan = scheduler::plan(&wf, "push");
    assert!(!plan.triggered);
    assert!(plan.instances.is_empty());
}

#[test]
fn dry_run_succeeds_without_docker_or_installed_toolchains() {
    let wf = bundled();
    let ws = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(store_dir.path().to_path_buf());

    let deps = ExecDeps {
        runner: &DryRunRunner,
        services: &NullRuntime,
        store: &store,
        fetcher: &NoopFetcher,
        dry_run: true,
    };
    let options = RunOptions {
        event: "pull_request".to_string(),
        workspace: ws.path().to_path_buf(),
        job: None,
    };
    let result = scheduler::run(&wf, &options, &deps).unwrap();

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.jobs.len(), 6);
    for job in &result.jobs {
        assert!(job.setup_error.is_none(), "{}: {:?}", job.job_id, job.setup_error);
        for step in &job.steps {
            assert_ne!(step.status, StepStatus::Failed, "{}/{}", job.job_id, step.label);
        }
    }
}

#[test]
fn validate_flags_the_hardcoded_secret_only() {
    let wf = bundled();
    let report = workflow::validate(&wf);
    assert_eq!(report.jobs, 4);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].field, "env.SECRET_KEY");
}
