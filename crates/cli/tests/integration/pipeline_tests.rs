use predicates::prelude::*;
use serial_test::serial;

use super::common::{TestEnv, combined, layout_index};

fn build(env: &TestEnv, platforms: &str) -> std::process::Output {
  let context = env.context("app");
  env
    .cmd()
    .arg("build")
    .arg(&context)
    .args(["--platform", platforms])
    .output()
    .unwrap()
}

fn platforms(state: &serde_json::Value) -> Vec<String> {
  state["variants"]
    .as_array()
    .unwrap()
    .iter()
    .map(|v| v["platform"].as_str().unwrap().to_string())
    .collect()
}

#[test]
#[serial]
fn build_saves_variants_in_requested_order() {
  let env = TestEnv::new();

  let output = build(&env, "linux/arm64,linux/amd64");
  assert!(output.status.success(), "build failed: {}", combined(&output));

  assert_eq!(platforms(&env.state()), vec!["linux/arm64", "linux/amd64"]);
  let log = env.tool_log();
  assert!(log.contains("--platform linux/arm64"));
  assert!(log.contains("--platform linux/amd64"));
}

#[test]
#[serial]
fn build_json_lists_archives() {
  let env = TestEnv::new();
  let context = env.context("app");

  let output = env
    .cmd()
    .arg("build")
    .arg(&context)
    .args(["--platform", "linux/amd64", "-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success(), "build failed: {}", combined(&output));

  let built: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let archive = built[0]["archive"].as_str().unwrap();
  assert!(std::path::Path::new(archive).exists());
}

#[test]
#[serial]
fn failed_build_keeps_previous_state() {
  let env = TestEnv::new();
  assert!(build(&env, "linux/amd64").status.success());

  let output = env
    .cmd()
    .arg("build")
    .arg(env.path("app"))
    .args(["--platform", "linux/amd64,linux/arm64"])
    .env("FAKE_DOCKER_FAIL", "linux/arm64")
    .output()
    .unwrap();

  assert!(!output.status.success());
  assert!(combined(&output).contains("linux/arm64"));
  assert_eq!(platforms(&env.state()), vec!["linux/amd64"]);
}

#[test]
#[serial]
fn build_passes_recipe_and_target() {
  let env = TestEnv::new();
  env.write_file("app/docker/Dockerfile.prod", "FROM scratch AS runtime\n");
  let context = env.context("app");

  env
    .cmd()
    .arg("build")
    .arg(&context)
    .args(["-f", "docker/Dockerfile.prod", "--target", "runtime", "--platform", "linux/amd64"])
    .assert()
    .success();

  let log = env.tool_log();
  assert!(log.contains("docker/Dockerfile.prod"));
  assert!(log.contains("--target runtime"));
}

#[test]
#[serial]
fn scan_passes_without_floor() {
  let env = TestEnv::new();
  assert!(build(&env, "linux/amd64").status.success());

  env
    .cmd()
    .arg("scan")
    .env("FAKE_GRYPE_SEVERITY", "Critical")
    .assert()
    .success()
    .stdout(predicate::str::contains("CVE-2024-0001"));
}

#[test]
#[serial]
fn scan_gate_failure_exits_with_gate_code() {
  let env = TestEnv::new();
  assert!(build(&env, "linux/amd64").status.success());

  env
    .cmd()
    .args(["scan", "--fail-on", "high"])
    .env("FAKE_GRYPE_SEVERITY", "Critical")
    .assert()
    .failure()
    .code(3)
    .stdout(predicate::str::contains("CVE-2024-0001"))
    .stderr(predicate::str::contains("scan gate failed"));
}

#[test]
#[serial]
fn scan_floor_above_finding_passes() {
  let env = TestEnv::new();
  assert!(build(&env, "linux/amd64").status.success());

  env
    .cmd()
    .args(["scan", "--fail-on", "critical"])
    .env("FAKE_GRYPE_SEVERITY", "Medium")
    .assert()
    .success()
    .stdout(predicate::str::contains("Scan passed").not())
    .stderr(predicate::str::contains("Scan passed"));
}

#[test]
#[serial]
fn scan_stdout_is_the_report_with_a_final_newline() {
  let env = TestEnv::new();
  assert!(build(&env, "linux/amd64").status.success());

  let output = env
    .cmd()
    .arg("scan")
    .env("FAKE_GRYPE_SEVERITY", "Medium")
    .output()
    .unwrap();
  assert!(output.status.success(), "scan failed: {}", combined(&output));
  assert_eq!(String::from_utf8_lossy(&output.stdout), "openssl 3.0.1 CVE-2024-0001 Medium\n");

  let output = env.cmd().arg("scan-report").output().unwrap();
  assert!(output.status.success(), "scan-report failed: {}", combined(&output));
  assert_eq!(String::from_utf8_lossy(&output.stdout), "No vulnerabilities found\n");
}

#[test]
#[serial]
fn report_only_policy_downgrades_gate() {
  let env = TestEnv::new();
  assert!(build(&env, "linux/amd64").status.success());

  env
    .cmd()
    .args(["scan", "--fail-on", "low", "--policy", "report-only"])
    .env("FAKE_GRYPE_SEVERITY", "Critical")
    .assert()
    .success()
    .stderr(predicate::str::contains("report-only"));
}

#[test]
#[serial]
fn scan_selects_platform_and_format() {
  let env = TestEnv::new();
  assert!(build(&env, "linux/amd64,linux/arm64").status.success());

  env
    .cmd()
    .args(["scan-report", "--platform", "linux/arm64", "--format", "json"])
    .assert()
    .success();

  let log = env.tool_log();
  let grype = log.lines().find(|l| l.starts_with("grype")).unwrap();
  assert!(grype.contains("linux-arm64.tar"));
  assert!(grype.contains("--output json "));
}

#[test]
#[serial]
fn scan_unbuilt_platform_fails() {
  let env = TestEnv::new();
  assert!(build(&env, "linux/amd64").status.success());

  env
    .cmd()
    .args(["scan", "--platform", "linux/386"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("linux/386"));
}

#[test]
#[serial]
fn export_writes_one_layout_for_all_platforms() {
  let env = TestEnv::new();
  assert!(build(&env, "linux/amd64,linux/arm64").status.success());
  let dest = env.path("out/image.tar");

  env
    .cmd()
    .args(["export", "--compress", "--dest"])
    .arg(&dest)
    .assert()
    .success()
    .stdout(predicate::str::contains("image.tar"));

  let index = layout_index(&dest);
  let manifests = index["manifests"].as_array().unwrap();
  assert_eq!(manifests.len(), 2);
  assert_eq!(manifests[0]["platform"]["architecture"], "amd64");
  assert_eq!(manifests[1]["platform"]["architecture"], "arm64");
}

#[test]
#[serial]
fn import_replaces_built_variants() {
  let env = TestEnv::new();
  let output = env
    .cmd()
    .arg("build")
    .arg(env.context("app"))
    .args(["--platform", "linux/amd64", "-o", "json"])
    .output()
    .unwrap();
  assert!(output.status.success(), "build failed: {}", combined(&output));
  let built: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let built_archive = std::path::PathBuf::from(built[0]["archive"].as_str().unwrap());

  let output = env
    .cmd()
    .args(["import", "registry.example/app:1.0", "--platform", "linux/arm64,linux/amd64"])
    .output()
    .unwrap();
  assert!(output.status.success(), "import failed: {}", combined(&output));

  assert_eq!(platforms(&env.state()), vec!["linux/arm64", "linux/amd64"]);
  assert!(!built_archive.exists());
  assert!(
    env
      .tool_log()
      .contains("crane pull --platform linux/arm64 --format oci registry.example/app:1.0")
  );

  let dest = env.path("out/image.tar");
  env.cmd().args(["export", "--dest"]).arg(&dest).assert().success();
  assert_eq!(layout_index(&dest)["manifests"].as_array().unwrap().len(), 2);
}

#[test]
#[serial]
fn failed_import_keeps_previous_state() {
  let env = TestEnv::new();
  assert!(build(&env, "linux/amd64").status.success());

  env
    .cmd()
    .args(["import", "registry.example/app:1.0", "--platform", "linux/arm64"])
    .env("FAKE_CRANE_FAIL", "pull")
    .assert()
    .failure()
    .stderr(predicate::str::contains("registry.example/app:1.0"));

  assert_eq!(platforms(&env.state()), vec!["linux/amd64"]);
}

#[test]
#[serial]
fn build_with_apko_kind_uses_apko_config() {
  let env = TestEnv::new();
  env.write_file("base/apko.yaml", "contents: {}\n");

  let output = env
    .cmd()
    .arg("build")
    .arg(env.path("base"))
    .args(["--kind", "apko", "--platform", "linux/arm64"])
    .output()
    .unwrap();
  assert!(output.status.success(), "build failed: {}", combined(&output));

  assert_eq!(platforms(&env.state()), vec!["linux/arm64"]);
  let log = env.tool_log();
  assert!(log.contains("apko build --arch arm64 apko.yaml image:latest "));
  assert!(!log.contains("docker"));
}

#[test]
#[serial]
fn publish_then_sign_uses_stored_digest() {
  let env = TestEnv::new();
  assert!(build(&env, "linux/amd64").status.success());

  env
    .cmd()
    .args(["publish", "registry.example/app:1.0", "mirror.example/app:1.0"])
    .assert()
    .success()
    .stdout(predicate::str::contains("registry.example/app@sha256:deadbeef"));

  assert_eq!(env.state()["digest"], "registry.example/app@sha256:deadbeef");

  let output = env
    .cmd()
    .args(["sign", "--key", "env:TEST_SIGNING_KEY", "--password", "env:TEST_SIGNING_PASSWORD"])
    .env("TEST_SIGNING_KEY", "key-material-1234")
    .env("TEST_SIGNING_PASSWORD", "signing-password-5678")
    .arg("-v")
    .output()
    .unwrap();
  assert!(output.status.success(), "sign failed: {}", combined(&output));

  let text = combined(&output);
  assert!(text.contains("tlog entry created"));
  assert!(!text.contains("key-material-1234"));
  assert!(!text.contains("signing-password-5678"));
  assert!(env.tool_log().contains("cosign sign registry.example/app@sha256:deadbeef"));
}

#[test]
#[serial]
fn publish_failure_stops_at_failing_address() {
  let env = TestEnv::new();
  assert!(build(&env, "linux/amd64").status.success());

  env
    .cmd()
    .args(["publish", "registry.example/app:1.0", "mirror.example/app:1.0"])
    .env("FAKE_CRANE_FAIL", "registry.example")
    .assert()
    .failure()
    .stderr(predicate::str::contains("registry.example/app:1.0"));

  assert!(!env.tool_log().contains("mirror.example"));
  assert!(env.state()["digest"].is_null());
}

#[test]
#[serial]
fn publish_logs_in_without_leaking_password() {
  let env = TestEnv::new();
  assert!(build(&env, "linux/amd64").status.success());
  env.write_file("registry-password", "registry-pw-0000\n");

  let output = env
    .cmd()
    .args(["-v", "publish", "registry.example/app:1.0", "--username", "ci", "--password"])
    .arg(format!("file:{}", env.path("registry-password").display()))
    .output()
    .unwrap();
  assert!(output.status.success(), "publish failed: {}", combined(&output));

  assert!(env.tool_log().contains("crane auth login registry.example --username ci --password-stdin"));
  assert!(!combined(&output).contains("registry-pw-0000"));
}

#[test]
#[serial]
fn explicit_digest_overrides_state() {
  let env = TestEnv::new();

  env
    .cmd()
    .args(["sign", "--key", "env:TEST_SIGNING_KEY", "--password", "env:TEST_SIGNING_PASSWORD"])
    .args(["--digest", "other.example/app@sha256:cafe"])
    .env("TEST_SIGNING_KEY", "k")
    .env("TEST_SIGNING_PASSWORD", "p")
    .assert()
    .success();

  assert!(env.tool_log().contains("cosign sign other.example/app@sha256:cafe"));
}

#[test]
#[serial]
fn state_clear_forgets_everything() {
  let env = TestEnv::new();
  assert!(build(&env, "linux/amd64").status.success());
  assert_eq!(env.work_dir_entries().len(), 1);

  env.cmd().args(["state", "--clear"]).assert().success();

  assert_eq!(env.state()["variants"], serde_json::json!([]));
  assert!(env.work_dir_entries().is_empty());
}

#[test]
#[serial]
fn rebuild_removes_superseded_archives() {
  let env = TestEnv::new();
  assert!(build(&env, "linux/amd64").status.success());
  let first = env.work_dir_entries();

  assert!(build(&env, "linux/arm64").status.success());
  let second = env.work_dir_entries();

  assert_eq!(second.len(), 1);
  assert_ne!(first, second);
}
