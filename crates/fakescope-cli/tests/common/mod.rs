//! Shared setup for CLI integration tests.
//!
//! Every test runs in its own scratch directory holding a tiny checkpoint and a
//! `.fakescope.toml` with the matching architecture. XDG directories point into
//! the scratch directory so user configuration never leaks in.

#![allow(dead_code, clippy::unwrap_used, clippy::missing_panics_doc, deprecated)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use fakescope_core::SourceImage;
use fakescope_test_support::{CheckpointBuilder, SyntheticImageBuilder};
use serde_json::Value;

pub struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    /// Scratch directory with `tiny.safetensors` and a project config selecting its architecture.
    pub fn new() -> Self {
        Self::with_checkpoint(&CheckpointBuilder::tiny())
    }

    pub fn with_checkpoint(builder: &CheckpointBuilder) -> Self {
        let dir = tempfile::tempdir().unwrap();
        builder.write_to(&dir.path().join("tiny.safetensors")).unwrap();
        std::fs::create_dir_all(dir.path().join("xdg")).unwrap();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        let workspace = Self { dir };
        workspace.write_project_config("");
        workspace
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn checkpoint(&self) -> PathBuf {
        self.path().join("tiny.safetensors")
    }

    /// Replaces `.fakescope.toml`; `extra` is prepended to the architecture table.
    pub fn write_project_config(&self, extra: &str) {
        let content = format!("{extra}\n{}", CheckpointBuilder::tiny_arch_toml());
        std::fs::write(self.path().join(".fakescope.toml"), content).unwrap();
    }

    /// Writes `~/.config/fakescope/config.toml` inside the scratch directory.
    pub fn write_xdg_config(&self, content: &str) {
        let dir = self.path().join("xdg").join("fakescope");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config.toml"), content).unwrap();
    }

    /// Saves a synthetic image under `name` and returns its path.
    pub fn write_image(&self, name: &str, image: &SourceImage) -> PathBuf {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        image.image.save(&path).unwrap();
        path
    }

    pub fn write_gray(&self, name: &str) -> PathBuf {
        self.write_image(name, &SyntheticImageBuilder::uniform_gray(256, 256, 128))
    }

    /// `fakescope` with the scratch directory as cwd and XDG home.
    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("fakescope").unwrap();
        cmd.current_dir(self.path())
            .env("XDG_CONFIG_HOME", self.path().join("xdg"))
            .env("XDG_DATA_HOME", self.path().join("data"))
            .env_remove("RUST_LOG");
        cmd
    }

    /// `fakescope predict --cpu --checkpoint <tiny>`.
    pub fn predict(&self) -> Command {
        let mut cmd = self.command();
        cmd.arg("predict")
            .arg("--cpu")
            .arg("--checkpoint")
            .arg(self.checkpoint());
        cmd
    }
}

/// TOML string literal for a path.
pub fn toml_path(path: &Path) -> String {
    toml::Value::String(path.display().to_string()).to_string()
}

/// Parses JSON Lines output.
pub fn json_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}
