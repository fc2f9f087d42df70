//! Integration tests for dvm

use std::process::Output;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use libtest_mimic::{Arguments, Trial};
use serde_json::Value;
use tempfile::TempDir;

pub(crate) use integration_tests::{
    integration_test, select_dvm_command, DVM_PATH_ENV, INTEGRATION_TESTS,
};

mod tests {
    pub mod create;
    pub mod list;
}

/// Get the path to the dvm binary, checking DVM_PATH env var first, then falling back to "dvm"
pub(crate) fn get_dvm_command() -> Result<String> {
    let target = Utf8Path::new(env!("CARGO_MANIFEST_DIR")).join("../../target");
    let builds = [target.join("debug"), target.join("release")];
    let builds: Vec<&Utf8Path> = builds.iter().map(|p| p.as_path()).collect();
    select_dvm_command(std::env::var(DVM_PATH_ENV).ok(), &builds)
}

/// Captured output from a command with decoded stdout/stderr strings
pub(crate) struct CapturedOutput {
    pub output: Output,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    /// Create from a raw Output
    pub fn new(output: Output) -> Self {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Self {
            output,
            stdout,
            stderr,
        }
    }

    /// Assert that the command succeeded, printing debug info on failure
    pub fn assert_success(&self, context: &str) {
        assert!(
            self.output.status.success(),
            "{} failed: {}",
            context,
            self.stderr
        );
    }

    /// Assert that the command failed with the creation failure status
    pub fn assert_failure(&self, context: &str) {
        assert_eq!(
            self.exit_code(),
            Some(2),
            "{context}: expected exit status 2; stderr: {}",
            self.stderr
        );
    }

    /// Get the exit code
    pub fn exit_code(&self) -> Option<i32> {
        self.output.status.code()
    }
}

/// A scratch platform: a state directory plus an empty configuration file.
pub(crate) struct TestPlatform {
    _tempdir: TempDir,
    pub root: Utf8PathBuf,
    pub state_dir: Utf8PathBuf,
    config: Utf8PathBuf,
}

impl TestPlatform {
    pub fn new() -> Result<Self> {
        let tempdir = TempDir::new()?;
        let root = Utf8PathBuf::from_path_buf(tempdir.path().to_path_buf())
            .map_err(|p| eyre!("temp path is not UTF-8: {p:?}"))?;
        let config = root.join("config.toml");
        std::fs::write(&config, "")?;
        Ok(Self {
            _tempdir: tempdir,
            state_dir: root.join("state"),
            root,
            config,
        })
    }

    /// Run dvm against this platform, capturing output
    pub fn run(&self, args: &[&str]) -> Result<CapturedOutput> {
        let output = std::process::Command::new(get_dvm_command()?)
            .arg("--config")
            .arg(&self.config)
            .arg("--state-dir")
            .arg(&self.state_dir)
            .args(args)
            .env_remove("DVM_CONFIG")
            .output()
            .context("Running dvm")?;
        Ok(CapturedOutput::new(output))
    }

    /// Run `dvm create --force-root` with the given arguments
    pub fn create(&self, args: &[&str]) -> Result<CapturedOutput> {
        let mut full = vec!["create", "--force-root"];
        full.extend_from_slice(args);
        self.run(&full)
    }

    /// Path of the committed state document
    pub fn state_file(&self) -> Utf8PathBuf {
        self.state_dir.join(dvm::store::STATE_FILE)
    }

    /// Parse the committed state
    pub fn state(&self) -> Result<Value> {
        let path = self.state_file();
        let content =
            std::fs::read_to_string(&path).with_context(|| format!("Reading {path}"))?;
        serde_json::from_str(&content).with_context(|| format!("Parsing {path}"))
    }
}

fn main() {
    let args = Arguments::from_args();

    // Collect tests from the distributed slice
    let tests: Vec<Trial> = INTEGRATION_TESTS
        .iter()
        .map(|test| {
            let name = test.name;
            let f = test.f;
            Trial::test(name, move || f().map_err(|e| format!("{:?}", e).into()))
        })
        .collect();

    // Run the tests and exit with the result
    libtest_mimic::run(&args, tests).exit();
}
