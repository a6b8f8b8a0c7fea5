use std::path::PathBuf;
use std::process::{Command, Output};

use tempfile::TempDir;

pub fn run_camctl(args: &[&str]) -> Output {
    TestEnv::new().run(args)
}

pub struct TestEnv {
    home: TempDir,
    config: TempDir,
    runtime: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            home: tempfile::tempdir().expect("create temporary HOME dir"),
            config: tempfile::tempdir().expect("create temporary XDG config dir"),
            runtime: tempfile::tempdir().expect("create temporary pipe dir"),
        }
    }

    pub fn command_pipe(&self) -> PathBuf {
        self.runtime.path().join("camogm_cmd")
    }

    pub fn status_pipe(&self) -> PathBuf {
        self.runtime.path().join("camogm.state")
    }

    pub fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_camctl"))
            .args(args)
            .env("HOME", self.home.path())
            .env("XDG_CONFIG_HOME", self.config.path())
            .env("CAMCTL_COMMAND_PIPE", self.command_pipe())
            .env("CAMCTL_STATUS_PIPE", self.status_pipe())
            .env_remove("RUST_LOG")
            .output()
            .expect("failed to execute camctl binary")
    }

    #[allow(dead_code)]
    pub fn config_path(&self) -> PathBuf {
        let output = self.run(&["config", "path"]);
        assert!(
            output.status.success(),
            "config path should succeed\nstdout:\n{}\nstderr:\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );

        let path = String::from_utf8_lossy(&output.stdout);
        PathBuf::from(path.trim())
    }

    #[allow(dead_code)]
    pub fn write_config(&self, contents: &str) {
        let config_path = self.config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).expect("create config parent directory");
        }
        std::fs::write(&config_path, contents).expect("write config file");
    }
}
