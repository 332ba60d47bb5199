//! Shared helpers for integration tests: throwaway stores and the binary.
#![allow(dead_code)]

use kdex::index::{build, IndexReader, ScanSummary};
use kdex::utils::AppConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// A knowledge store in a temporary directory
pub struct TestStore {
    dir: TempDir,
}

impl TestStore {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp store"),
        }
    }

    /// Canonical root, matching what the engine records
    pub fn root(&self) -> PathBuf {
        self.dir.path().canonicalize().unwrap()
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    pub fn remove(&self, rel: &str) {
        fs::remove_file(self.dir.path().join(rel)).unwrap();
    }

    pub fn config(&self) -> AppConfig {
        AppConfig::default()
    }

    /// Write `.kdex/config.json`
    pub fn write_config(&self, config: &AppConfig) {
        config.save(&self.root()).unwrap();
    }

    pub fn full_scan(&self) -> ScanSummary {
        build::full_scan(&self.root(), &self.config().index, true).unwrap()
    }

    pub fn incremental_scan(&self) -> ScanSummary {
        build::incremental_scan(&self.root(), &self.config().index).unwrap()
    }

    pub fn reader(&self) -> IndexReader {
        IndexReader::open_or_build(&self.root(), &self.config()).unwrap()
    }

    pub fn report_path(&self, name: &str) -> PathBuf {
        self.root().join(".kdex").join("reports").join(name)
    }
}

/// A markdown entry with an optional metadata comment
pub fn entry(title: &str, body: &str, meta: Option<&str>) -> String {
    let mut text = format!("# {}\n\n{}\n", title, body.trim_end());
    if let Some(meta) = meta {
        text.push_str(&format!("\n<!-- {} -->\n", meta));
    }
    text
}

/// Output of one CLI invocation
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

pub fn kdex_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_kdex"))
}

/// Run the binary with logging and color off
pub fn run_kdex(args: &[&str], cwd: &Path) -> RunOutput {
    let output = Command::new(kdex_binary())
        .args(args)
        .arg("--no-color")
        .current_dir(cwd)
        .env_remove("KDEX_LOG")
        .env_remove("KDEX_SESSION")
        .env_remove("KDEX_BRANCH")
        .output()
        .expect("Failed to run kdex");

    RunOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        code: output.status.code(),
    }
}
