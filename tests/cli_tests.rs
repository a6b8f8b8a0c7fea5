mod common;

use common::{run_camctl, TestEnv};

#[test]
fn camctl_help_shows_usage() {
    let output = run_camctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        output.status.success(),
        "--help should succeed\nstdout:\n{}\nstderr:\n{}",
        stdout,
        stderr
    );
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("Commands:"));
    assert!(stdout.contains("status"));
}

#[test]
fn camctl_version_shows_version() {
    let output = run_camctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("camctl "));
}

#[test]
fn completions_bash_outputs_script() {
    let output = run_camctl(&["completions", "bash"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        output.status.success(),
        "completions bash should succeed\nstdout:\n{}\nstderr:\n{}",
        stdout,
        stderr
    );
    assert!(
        stdout.contains("camctl"),
        "expected completion output to reference command name\nstdout:\n{}",
        stdout
    );
}

#[test]
fn config_show_includes_env_overrides() {
    let env = TestEnv::new();
    let output = env.run(&["config", "show"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        output.status.success(),
        "config show should succeed\nstdout:\n{}\nstderr:\n{}",
        stdout,
        stderr
    );
    assert!(stdout.contains("[pipes]"));
    assert!(stdout.contains(&*env.command_pipe().to_string_lossy()));
}

#[test]
fn config_path_returns_valid_path() {
    let output = run_camctl(&["config", "path"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("config.toml"));
}

#[test]
fn config_init_refuses_to_overwrite() {
    let env = TestEnv::new();

    let first = env.run(&["config", "init"]);
    assert!(first.status.success());
    assert!(env.config_path().exists());

    let second = env.run(&["config", "init"]);
    assert!(!second.status.success());
    assert!(String::from_utf8_lossy(&second.stderr).contains("--force"));

    let forced = env.run(&["config", "init", "--force"]);
    assert!(forced.status.success());
}

#[test]
fn status_without_recorder_fails_fast() {
    let env = TestEnv::new();
    env.write_config("[timeouts]\nsend_ms = 100\nstatus_ms = 100\n");

    let started = std::time::Instant::now();
    let output = env.run(&["status"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(
        stderr.contains("camctl daemon start"),
        "expected a hint about starting the recorder\nstderr:\n{}",
        stderr
    );
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
}

#[test]
fn set_rejects_values_with_separators() {
    let output = run_camctl(&["set", "prefix", "/var/hdd;exit"]);
    assert!(!output.status.success());
}

#[test]
fn daemon_status_reports_not_running() {
    let output = run_camctl(&["daemon", "status"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        output.status.success(),
        "daemon status should succeed\nstdout:\n{}\nstderr:\n{}",
        stdout,
        stderr
    );
    assert!(stdout.contains("Recorder is not running"));
}
