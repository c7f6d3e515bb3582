//! Service container provisioning with health-check gating.
//!
//! Containers start before a job's steps and are torn down after. A declared
//! health check is polled at its interval up to its retry budget; exhausting
//! the budget fails the job before any step runs. This is the only retry
//! logic in the tool.

use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::log_status;
use crate::utils::command;
use crate::workflow::{HealthCheck, Service};

pub trait ServiceRuntime: Send + Sync {
    /// Start a container and return its runtime handle (container name).
    fn start(&self, service: &Service, instance_id: &str) -> Result<String>;
    fn check_health(&self, container: &str, check: &HealthCheck) -> bool;
    fn stop(&self, container: &str);
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHandle {
    pub name: String,
    pub container: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
}

/// First declared host port of a `host:container` mapping, if any.
pub fn host_port(service: &Service) -> Option<u16> {
    service
        .ports
        .first()
        .and_then(|mapping| mapping.split(':').next())
        .and_then(|host| host.parse().ok())
}

/// Start every declared service and wait for health. On failure, everything
/// already started is stopped before returning.
pub fn provision(
    services: &[Service],
    runtime: &dyn ServiceRuntime,
    instance_id: &str,
) -> Result<Vec<ServiceHandle>> {
    let mut handles: Vec<ServiceHandle> = Vec::with_capacity(services.len());

    for service in services {
        log_status!("service", "Starting {} ({})", service.name, service.image);
        let container = match runtime.start(service, instance_id) {
            Ok(container) => container,
            Err(err) => {
                teardown(&handles, runtime);
                return Err(err);
            }
        };
        handles.push(ServiceHandle {
            name: service.name.clone(),
            container,
            host_port: host_port(service),
        });
    }

    for (service, handle) in services.iter().zip(&handles) {
        if let Some(check) = &service.health {
            if let Err(err) = await_healthy(service, handle, check, runtime) {
                teardown(&handles, runtime);
                return Err(err);
            }
        }
    }

    Ok(handles)
}

fn await_healthy(
    service: &Service,
    handle: &ServiceHandle,
    check: &HealthCheck,
    runtime: &dyn ServiceRuntime,
) -> Result<()> {
    for attempt in 1..=check.retries {
        if runtime.check_health(&handle.container, check) {
            log_status!("service", "{} healthy after {} attempt(s)", service.name, attempt);
            return Ok(());
        }
        if attempt < check.retries {
            thread::sleep(Duration::from_secs(check.interval_secs));
        }
    }
    Err(Error::service_unhealthy(
        service.name.clone(),
        service.image.clone(),
        check.retries,
    ))
}

pub fn teardown(handles: &[ServiceHandle], runtime: &dyn ServiceRuntime) {
    for handle in handles {
        runtime.stop(&handle.container);
    }
}

// ---------------------------------------------------------------------------
// Docker-backed runtime
// ---------------------------------------------------------------------------

pub struct DockerRuntime;

impl ServiceRuntime for DockerRuntime {
    fn start(&self, service: &Service, instance_id: &str) -> Result<String> {
        let container = format!("greenlight-{}-{}", instance_id, service.name);

        let mut args: Vec<String> = vec![
            "run".to_string(),
            "-d".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            container.clone(),
        ];
        for (key, value) in &service.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        for mapping in &service.ports {
            args.push("-p".to_string());
            args.push(mapping.clone());
        }
        args.push(service.image.clone());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        command::run("docker", &arg_refs, "docker run").map_err(|e| {
            Error::service_start_failed(
                service.name.clone(),
                service.image.clone(),
                e.to_string(),
            )
        })?;

        Ok(container)
    }

    fn check_health(&self, container: &str, check: &HealthCheck) -> bool {
        let args = health_probe_args(container, check);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        command::succeeded_in("/", "docker", &arg_refs)
    }

    fn stop(&self, container: &str) {
        // --rm containers disappear on stop; failures here are not actionable.
        let _ = command::run("docker", &["stop", container], "docker stop");
    }
}

/// Probe command for one health-check attempt. `timeout` inside the
/// container kills a hung probe at the declared limit, keeping the overall
/// wait bounded by retries x interval.
fn health_probe_args(container: &str, check: &HealthCheck) -> Vec<String> {
    vec![
        "exec".to_string(),
        container.to_string(),
        "timeout".to_string(),
        check.timeout_secs.to_string(),
        "sh".to_string(),
        "-c".to_string(),
        check.cmd.clone(),
    ]
}

/// Inert runtime for dry runs: containers are never started, health always
/// passes, declared ports are reported as-is.
pub struct NullRuntime;

impl ServiceRuntime for NullRuntime {
    fn start(&self, service: &Service, instance_id: &str) -> Result<String> {
        Ok(format!("dry-{}-{}", instance_id, service.name))
    }

    fn check_health(&self, _container: &str, _check: &HealthCheck) -> bool {
        true
    }

    fn stop(&self, _container: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn service(name: &str, retries: u32) -> Service {
        Service {
            name: name.to_string(),
            image: "postgres:12".to_string(),
            env: HashMap::new(),
            ports: vec!["5432:5432".to_string()],
            health: Some(HealthCheck {
                cmd: "pg_isready".to_string(),
                interval_secs: 0,
                timeout_secs: 1,
                retries,
            }),
        }
    }

    /// Becomes healthy after a fixed number of probes.
    struct FlakyRuntime {
        healthy_after: u32,
        probes: AtomicU32,
    }

    impl ServiceRuntime for FlakyRuntime {
        fn start(&self, service: &Service, instance_id: &str) -> Result<String> {
            Ok(format!("flaky-{}-{}", instance_id, service.name))
        }

        fn check_health(&self, _container: &str, _check: &HealthCheck) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst) + 1 >= self.healthy_after
        }

        fn stop(&self, _container: &str) {}
    }

    #[test]
    fn provision_waits_for_health_within_budget() {
        let runtime = FlakyRuntime {
            healthy_after: 3,
            probes: AtomicU32::new(0),
        };
        let handles = provision(&[service("postgres", 5)], &runtime, "job-1").unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].host_port, Some(5432));
        assert_eq!(runtime.probes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn provision_fails_when_retry_budget_exhausted() {
        let runtime = FlakyRuntime {
            healthy_after: 10,
            probes: AtomicU32::new(0),
        };
        let err = provision(&[service("postgres", 3)], &runtime, "job-1").unwrap_err();
        assert_eq!(err.code.as_str(), "service.unhealthy");
        assert_eq!(runtime.probes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn null_runtime_always_healthy() {
        let handles = provision(&[service("clickhouse", 1)], &NullRuntime, "job-2").unwrap();
        assert_eq!(handles[0].container, "dry-job-2-clickhouse");
    }

    #[test]
    fn health_probe_is_bounded_by_the_declared_timeout() {
        let svc = service("postgres", 3);
        let check = svc.health.as_ref().unwrap();
        let args = health_probe_args("greenlight-tests-postgres", check);
        assert_eq!(
            args,
            vec![
                "exec",
                "greenlight-tests-postgres",
                "timeout",
                "1",
                "sh",
                "-c",
                "pg_isready",
            ]
        );
    }

    #[test]
    fn host_port_parses_first_mapping() {
        let mut svc = service("clickhouse", 1);
        svc.ports = vec!["8123:8123".to_string(), "9000:9000".to_string()];
        assert_eq!(host_port(&svc), Some(8123));
        svc.ports.clear();
        assert_eq!(host_port(&svc), None);
    }
}
