//! Integration tests for configuration layering.
//!
//! Tests the full priority chain: hardcoded defaults < XDG config < project config < CLI args

#![allow(clippy::unwrap_used)] // Test code uses unwrap for brevity
#![allow(deprecated)] // cargo_bin deprecation warning

mod common;

use common::{json_lines, toml_path, Workspace};
use predicates::prelude::*;

#[test]
fn test_project_config_applies_format() {
    let workspace = Workspace::new();
    workspace.write_project_config("[output]\nformat = 'json'\n");
    let image = workspace.write_gray("gray.png");

    workspace
        .predict()
        .arg(&image)
        .assert()
        .code(0)
        .stdout(predicate::str::starts_with("["));
}

#[test]
fn test_cli_overrides_project_config() {
    let workspace = Workspace::new();
    workspace.write_project_config("[output]\nformat = 'json'\n");
    let image = workspace.write_gray("gray.png");

    workspace
        .predict()
        .arg("--format")
        .arg("jsonl")
        .arg(&image)
        .assert()
        .code(0)
        .stdout(predicate::str::starts_with("{"));
}

#[test]
fn test_project_config_provides_checkpoint() {
    let workspace = Workspace::new();
    workspace.write_project_config(&format!(
        "[model]\ncheckpoint = {}\n",
        toml_path(&workspace.checkpoint())
    ));
    let image = workspace.write_gray("gray.png");

    workspace
        .command()
        .arg("predict")
        .arg("--cpu")
        .arg(&image)
        .assert()
        .code(0);
}

#[test]
fn test_xdg_config_provides_checkpoint() {
    let workspace = Workspace::new();
    workspace.write_xdg_config(&format!(
        "[model]\ncheckpoint = {}\n",
        toml_path(&workspace.checkpoint())
    ));
    let image = workspace.write_gray("gray.png");

    workspace
        .command()
        .arg("predict")
        .arg("--cpu")
        .arg(&image)
        .assert()
        .code(0);
}

#[test]
fn test_project_config_overrides_xdg() {
    let workspace = Workspace::new();
    workspace.write_xdg_config("[output]\nheatmap_dir = 'xdg_maps'\nformat = 'json'\n");
    workspace.write_project_config("[output]\nheatmap_dir = 'project_maps'\n");
    let image = workspace.write_gray("gray.png");

    let output = workspace.predict().arg(&image).output().unwrap();
    assert_eq!(output.status.code(), Some(0));

    // heatmap_dir overridden, format inherited from XDG
    assert!(workspace
        .path()
        .join("project_maps")
        .join("hm_gray.png")
        .exists());
    assert!(!workspace.path().join("xdg_maps").exists());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with('['));
}

#[test]
fn test_cli_heatmap_dir_overrides_config() {
    let workspace = Workspace::new();
    workspace.write_project_config("[output]\nheatmap_dir = 'project_maps'\n");
    let image = workspace.write_gray("gray.png");

    workspace
        .predict()
        .arg("--heatmap-dir")
        .arg("cli_maps")
        .arg(&image)
        .assert()
        .success();

    assert!(workspace.path().join("cli_maps").join("hm_gray.png").exists());
    assert!(!workspace.path().join("project_maps").exists());
}

#[test]
fn test_config_pvr_k_changes_pvr() {
    let workspace = Workspace::new();
    let image = workspace.write_image(
        "noise.png",
        &fakescope_test_support::SyntheticImageBuilder::noise(64, 64, 3),
    );

    let strict = workspace.predict().arg(&image).output().unwrap();
    workspace.write_project_config("[analysis]\npvr_k = 0.5\n");
    let loose = workspace.predict().arg(&image).output().unwrap();

    let strict_pvr = json_lines(&strict.stdout)[0]["pvr"].as_f64().unwrap();
    let loose_pvr = json_lines(&loose.stdout)[0]["pvr"].as_f64().unwrap();
    assert!(loose_pvr > strict_pvr);
}

#[test]
fn test_out_of_range_config_warns() {
    let workspace = Workspace::new();
    workspace.write_project_config("[fetch]\ntimeout_secs = 0\n");
    let image = workspace.write_gray("gray.png");

    workspace
        .predict()
        .arg(&image)
        .assert()
        .stderr(predicate::str::contains("fetch.timeout_secs"));
}

#[test]
fn test_malformed_xdg_config_is_ignored() {
    let workspace = Workspace::new();
    workspace.write_xdg_config("[output\nformat = 'json'\n");
    let image = workspace.write_gray("gray.png");

    workspace
        .predict()
        .arg(&image)
        .assert()
        .code(0)
        .stdout(predicate::str::starts_with("{"));
}
