use assert_cmd::cargo::cargo_bin_cmd;
use podium_document::sample_pdf;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

fn deck(dir: &Path, pages: u32) -> PathBuf {
    let path = dir.join("talk.pdf");
    fs::write(&path, sample_pdf(pages)).expect("fixture should be written");
    path
}

fn json_stdout(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("stdout should contain valid json")
}

#[test]
fn info_emits_stable_json_contract() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = deck(temp.path(), 3);

    let output = cargo_bin_cmd!("podium")
        .arg("info")
        .arg(&file)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = json_stdout(&output);
    assert_eq!(value["page_count"], 3);
    assert_eq!(value["path"], file.display().to_string());
    assert_eq!(value["namespace"].as_str().map(str::len), Some(16));
}

#[test]
fn render_fills_cache_and_reports_summary() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = deck(temp.path(), 4);
    let cache_root = temp.path().join("cache");

    let output = cargo_bin_cmd!("podium")
        .arg("render")
        .arg(&file)
        .arg("--scale")
        .arg("0.5")
        .arg("--threads")
        .arg("2")
        .arg("--focus")
        .arg("3")
        .arg("--cache-dir")
        .arg(&cache_root)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = json_stdout(&output);
    assert_eq!(value["page_count"], 4);
    assert_eq!(value["rendered"], 4);
    assert_eq!(value["focus"], 3);
    assert_eq!(value["scale"], 0.5);
    assert_eq!(value["failed"], Value::Array(Vec::new()));

    let cache_dir = PathBuf::from(value["cache_dir"].as_str().expect("cache_dir should be set"));
    assert!(cache_dir.starts_with(&cache_root));
    let artifacts = fs::read_dir(&cache_dir).expect("cache dir should exist").count();
    assert_eq!(artifacts, 4);
    assert!(cache_dir.join("page_000002_x500.png").is_file());
}

#[test]
fn render_reuses_cache_across_runs() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = deck(temp.path(), 2);
    let cache_root = temp.path().join("cache");

    for _ in 0..2 {
        cargo_bin_cmd!("podium")
            .arg("render")
            .arg(&file)
            .arg("--cache-dir")
            .arg(&cache_root)
            .arg("--all")
            .assert()
            .success()
            .stdout(predicate::str::contains("\"rendered\": 2"));
    }
}

#[test]
fn render_reads_config_file() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = deck(temp.path(), 1);
    let config = temp.path().join("podium.toml");
    let cache_root = temp.path().join("from-config");
    fs::write(
        &config,
        format!("render_scale = 1.5\ncache_dir = {:?}\n", cache_root.display().to_string()),
    )
    .expect("config should be written");

    cargo_bin_cmd!("podium")
        .arg("render")
        .arg(&file)
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"scale\": 1.5"));

    assert!(cache_root.is_dir());
}

#[test]
fn render_rejects_zero_focus() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = deck(temp.path(), 1);

    cargo_bin_cmd!("podium")
        .arg("render")
        .arg(&file)
        .arg("--focus")
        .arg("0")
        .arg("--cache-dir")
        .arg(temp.path().join("cache"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("--focus is 1-based"));
}

#[test]
fn render_rejects_zero_threads() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = deck(temp.path(), 1);

    cargo_bin_cmd!("podium")
        .arg("render")
        .arg(&file)
        .arg("--threads")
        .arg("0")
        .arg("--cache-dir")
        .arg(temp.path().join("cache"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("worker_threads"));
}

#[test]
fn clear_cache_removes_one_document() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = deck(temp.path(), 2);
    let cache_root = temp.path().join("cache");

    cargo_bin_cmd!("podium")
        .arg("render")
        .arg(&file)
        .arg("--cache-dir")
        .arg(&cache_root)
        .assert()
        .success();

    let output = cargo_bin_cmd!("podium")
        .arg("clear-cache")
        .arg(&file)
        .arg("--cache-dir")
        .arg(&cache_root)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value = json_stdout(&output);
    assert_eq!(value["removed"], true);
    let dir = PathBuf::from(value["cache_dir"].as_str().expect("cache_dir should be set"));
    assert_eq!(fs::read_dir(dir).expect("namespace dir should remain").count(), 0);
}

#[test]
fn clear_cache_removes_whole_root() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let cache_root = temp.path().join("cache");
    fs::create_dir_all(cache_root.join("0123456789abcdef")).expect("dir should be created");

    cargo_bin_cmd!("podium")
        .arg("clear-cache")
        .arg("--cache-dir")
        .arg(&cache_root)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"removed\": true"));

    assert!(!cache_root.exists());
}

#[test]
fn info_fails_for_missing_file() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    cargo_bin_cmd!("podium")
        .arg("info")
        .arg(temp.path().join("missing.pdf"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("file does not exist"));
}

#[test]
fn info_fails_for_invalid_pdf() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = temp.path().join("invalid.pdf");
    fs::write(&file, b"this is not a pdf").expect("fixture should be written");

    cargo_bin_cmd!("podium")
        .arg("info")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open document"));
}

#[test]
fn info_fails_for_encrypted_marker_pdf() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = temp.path().join("encrypted-marker.pdf");
    fs::write(&file, b"%PDF-1.7\ntrailer << /Encrypt 5 0 R >>\n%%EOF\n")
        .expect("fixture should be written");

    cargo_bin_cmd!("podium")
        .arg("info")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("encrypted PDFs are not supported"));
}

#[test]
fn version_prints_package_version() {
    cargo_bin_cmd!("podium")
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
