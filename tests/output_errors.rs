use greenlight::output::{exit_code_for_error, map_cmd_result_to_json, CliResponse};
use greenlight::{Error, ErrorCode};

#[test]
fn service_start_failure_serializes_image_and_stderr() {
    let err = Error::service_start_failed(
        "clickhouse",
        "yandex/clickhouse-server:21.6",
        "docker: Error response from daemon: port is already allocated",
    );

    let json = CliResponse::<()>::from_error(&err).to_json().unwrap();

    assert!(json.contains("\"code\": \"service.start_failed\""));
    assert!(json.contains("yandex/clickhouse-server:21.6"));
    assert!(json.contains("port is already allocated"));
}

#[test]
fn migration_compat_error_names_the_failing_phase() {
    let err = Error::migration_compat_failed("current", "migrate exited with 1");
    let json = CliResponse::<()>::from_error(&err).to_json().unwrap();

    assert!(json.contains("\"code\": \"migration.compat_failed\""));
    assert!(json.contains("\"phase\": \"current\""));
}

#[test]
fn execution_errors_map_to_exit_code_20() {
    let err = Error::migration_compat_failed("current", "boom");
    let (_value, exit_code) = map_cmd_result_to_json::<serde_json::Value>(Err(err));
    assert_eq!(exit_code, 20);
}

#[test]
fn lookup_errors_map_to_exit_code_4() {
    assert_eq!(exit_code_for_error(ErrorCode::JobNotFound), 4);
    assert_eq!(exit_code_for_error(ErrorCode::WorkflowNotFound), 4);
}
