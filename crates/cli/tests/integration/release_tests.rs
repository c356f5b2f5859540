use predicates::prelude::*;
use serial_test::serial;

use super::common::{TestEnv, combined};

fn tree(env: &TestEnv, repositories: &[&str]) -> std::path::PathBuf {
  for repository in repositories {
    env.context(&format!("src/{repository}"));
  }
  env.path("src")
}

#[test]
#[serial]
fn releases_each_recipe_in_order() {
  let env = TestEnv::new();
  let src = tree(&env, &["b", "a"]);

  let output = env
    .cmd()
    .arg("release")
    .arg(&src)
    .args(["registry.example/app", "-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success(), "release failed: {}", combined(&output));

  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let records = report["records"].as_array().unwrap();
  assert_eq!(records.len(), 2);
  assert_eq!(records[0]["address"], "registry.example/app/a:latest");
  assert_eq!(records[0]["digest"], "registry.example/app/a@sha256:deadbeef");
  assert_eq!(records[1]["address"], "registry.example/app/b:latest");
  assert_eq!(records[1]["digest"], "registry.example/app/b@sha256:deadbeef");
  assert!(records[0]["scan"].is_null());
  assert_eq!(records[0]["signed"], false);
  assert!(env.work_dir_entries().is_empty());
}

#[test]
#[serial]
fn critical_finding_stops_the_batch() {
  let env = TestEnv::new();
  let src = tree(&env, &["a", "b"]);

  env
    .cmd()
    .arg("release")
    .arg(&src)
    .args(["registry.example/app", "--scan"])
    .env("FAKE_GRYPE_SEVERITY", "Critical")
    .assert()
    .failure()
    .code(3)
    .stdout(predicate::str::contains("openssl 3.0.1 CVE-2024-0001 Critical"))
    .stderr(predicate::str::contains("release of 'a' failed"));

  let log = env.tool_log();
  assert!(!log.contains("src/b"));
  assert!(!log.contains("crane"));
  assert!(env.work_dir_entries().is_empty());
}

#[test]
#[serial]
fn high_finding_passes_default_floor() {
  let env = TestEnv::new();
  let src = tree(&env, &["a"]);

  let output = env
    .cmd()
    .arg("release")
    .arg(&src)
    .args(["registry.example/app", "--scan", "-o", "json"])
    .env("FAKE_GRYPE_SEVERITY", "High")
    .output()
    .unwrap();
  assert!(output.status.success(), "release failed: {}", combined(&output));

  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let scan = &report["records"][0]["scan"];
  assert_eq!(scan["passed"], true);
  assert_eq!(scan["floor"], "critical");
  assert_eq!(scan["highest"], "high");
}

#[test]
#[serial]
fn publish_failure_reports_completed_targets() {
  let env = TestEnv::new();
  let src = tree(&env, &["a", "b", "c"]);

  let output = env
    .cmd()
    .arg("release")
    .arg(&src)
    .args(["registry.example/app", "-o", "json"])
    .env("FAKE_CRANE_FAIL", "app/b")
    .output()
    .unwrap();

  assert_eq!(output.status.code(), Some(1));
  let completed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(completed["records"].as_array().unwrap().len(), 1);
  assert_eq!(completed["records"][0]["repository"], "a");
  assert!(String::from_utf8_lossy(&output.stderr).contains("release of 'b' failed"));
  assert!(!env.tool_log().contains("src/c"));
}

#[test]
#[serial]
fn release_signs_every_digest() {
  let env = TestEnv::new();
  let src = tree(&env, &["a", "b"]);

  env
    .cmd()
    .arg("release")
    .arg(&src)
    .args(["registry.example/app", "--sign", "--key", "env:TEST_KEY", "--key-password", "env:TEST_PW"])
    .env("TEST_KEY", "k")
    .env("TEST_PW", "p")
    .assert()
    .success()
    .stdout(predicate::str::contains("Released 2 target(s)"));

  let log = env.tool_log();
  assert!(log.contains("cosign sign registry.example/app/a@sha256:deadbeef"));
  assert!(log.contains("cosign sign registry.example/app/b@sha256:deadbeef"));
}

#[test]
#[serial]
fn release_builds_every_platform() {
  let env = TestEnv::new();
  let src = tree(&env, &["a"]);

  env
    .cmd()
    .arg("release")
    .arg(&src)
    .args(["registry.example/app", "--platform", "linux/amd64,linux/arm64"])
    .assert()
    .success();

  let log = env.tool_log();
  assert!(log.contains("crane index append --tag registry.example/app/a:latest"));
  assert!(log.contains("registry.example/app/a:latest-linux-arm64"));
}

#[test]
#[serial]
fn configured_tag_is_used() {
  let env = TestEnv::new();
  let src = tree(&env, &["a"]);
  let config = std::fs::read_to_string(&env.config_path).unwrap();
  std::fs::write(&env.config_path, format!("{config}\n[release]\ntag = \"stable\"\n")).unwrap();

  env
    .cmd()
    .arg("release")
    .arg(&src)
    .arg("registry.example/app")
    .assert()
    .success()
    .stdout(predicate::str::contains("registry.example/app/a:stable"));
}
