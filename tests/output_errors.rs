use deckhand::error::{CommandFailedDetails, TargetDetails};
use deckhand::output::{exit_code_for_error, map_cmd_result_to_json, CliResponse};
use deckhand::{Error, ErrorCode, Task};

#[test]
fn remote_command_failed_serializes_stdout_stderr() {
    let err = Error::remote_command_failed(CommandFailedDetails {
        command: "sudo initctl status api".to_string(),
        exit_code: 127,
        stdout: "some stdout".to_string(),
        stderr: "some stderr".to_string(),
        target: TargetDetails {
            host: Some("web1.example.com".to_string()),
            user: Some("deploy".to_string()),
        },
    });

    let json = CliResponse::<()>::from_error(&err).to_json().unwrap();

    assert!(json.contains("\"success\": false"));
    assert!(json.contains("\"code\": \"remote.command_failed\""));
    assert!(json.contains("some stdout"));
    assert!(json.contains("some stderr"));
    assert!(json.contains("\"exitCode\": 127"));
    assert!(json.contains("web1.example.com"));
}

#[test]
fn remote_command_failed_maps_to_exit_code_20() {
    let err = Error::remote_command_failed(CommandFailedDetails {
        command: "ls".to_string(),
        exit_code: 1,
        stdout: String::new(),
        stderr: String::new(),
        target: TargetDetails {
            host: None,
            user: None,
        },
    });

    let (_value, exit_code) = map_cmd_result_to_json::<serde_json::Value>(Err(err));

    assert_eq!(exit_code, 20);
}

#[test]
fn unknown_task_is_a_validation_error_with_hint() {
    let err = "deplyo".parse::<Task>().unwrap_err();
    let json = CliResponse::<()>::from_error(&err).to_json().unwrap();

    assert_eq!(exit_code_for_error(err.code), 2);
    assert!(json.contains("\"code\": \"validation.unknown_task\""));
    assert!(json.contains("deckhand tasks"));
}

#[test]
fn missing_hosts_maps_to_ssh_exit_code() {
    assert_eq!(exit_code_for_error(ErrorCode::SshNoHosts), 10);
    let err = Error::ssh_no_hosts("staging");
    assert_eq!(err.hints.len(), 2);
}

#[test]
fn success_keeps_command_exit_code() {
    let (value, exit_code) =
        map_cmd_result_to_json(Ok((serde_json::json!({ "failures": 2 }), 1)));

    assert_eq!(exit_code, 1);
    assert_eq!(value.unwrap()["failures"], 2);
}

#[test]
fn every_error_code_has_a_failing_exit_code_and_parses_back() {
    for code in deckhand::error::codes::all_codes() {
        assert!(exit_code_for_error(*code) > 0, "{}", code.as_str());
        assert_eq!(deckhand::error::codes::parse_code(code.as_str()), Some(*code));
    }
}
