//! Shared test helpers for CLI integration tests.
//!
//! Every test gets a temp directory holding stub `docker`, `apko`, `grype`,
//! `crane` and `cosign` scripts, a config file pointing at them, and isolated XDG
//! directories. Builds and pulls write small but valid OCI layouts. The stubs
//! append their arguments to a shared log and react to a few environment
//! variables:
//!
//! - `FAKE_DOCKER_FAIL`: docker fails when its arguments contain this text
//! - `FAKE_GRYPE_SEVERITY`: grype reports one finding with this severity
//! - `FAKE_CRANE_FAIL`: crane fails when its arguments contain this text

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Shell functions shared by the stubs: `make_layout DIR LABEL` writes a
/// one-layer OCI layout into DIR, `write_layout TAR LABEL` packs one into TAR.
const LAYOUT_FUNCTIONS: &str = r#"
sha() {
  if command -v sha256sum >/dev/null 2>&1; then sha256sum "$1"; else shasum -a 256 "$1"; fi | cut -d' ' -f1
}
size() { wc -c < "$1" | tr -d ' '; }
store() {
  digest=$(sha "$2")
  mv "$2" "$1/blobs/sha256/$digest"
  echo "$digest"
}
make_layout() {
  dir="$1"
  mkdir -p "$dir/blobs/sha256"
  printf '%s layer\n' "$2" > "$dir/layer"
  layer_size=$(size "$dir/layer"); layer=$(store "$dir" "$dir/layer")
  printf '{"os":"linux","label":"%s"}' "$2" > "$dir/config"
  config_size=$(size "$dir/config"); config=$(store "$dir" "$dir/config")
  printf '{"schemaVersion":2,"mediaType":"application/vnd.oci.image.manifest.v1+json","config":{"mediaType":"application/vnd.oci.image.config.v1+json","digest":"sha256:%s","size":%s},"layers":[{"mediaType":"application/vnd.oci.image.layer.v1.tar","digest":"sha256:%s","size":%s}]}' \
    "$config" "$config_size" "$layer" "$layer_size" > "$dir/manifest"
  manifest_size=$(size "$dir/manifest"); manifest=$(store "$dir" "$dir/manifest")
  printf '{"schemaVersion":2,"manifests":[{"mediaType":"application/vnd.oci.image.manifest.v1+json","digest":"sha256:%s","size":%s}]}' \
    "$manifest" "$manifest_size" > "$dir/index.json"
  printf '{"imageLayoutVersion":"1.0.0"}' > "$dir/oci-layout"
}
write_layout() {
  case "$1" in /*) tar_path="$1" ;; *) tar_path="$PWD/$1" ;; esac
  scratch=$(mktemp -d)
  make_layout "$scratch" "$2"
  (cd "$scratch" && tar -cf "$tar_path" oci-layout index.json blobs)
  rm -rf "$scratch"
}
"#;

const DOCKER_STUB: &str = r#"
echo "docker $*" >> "$DOCKREL_TOOL_LOG"
if [ -n "$FAKE_DOCKER_FAIL" ]; then
  case "$*" in *"$FAKE_DOCKER_FAIL"*) echo "build exploded" >&2; exit 1 ;; esac
fi
for arg in "$@"; do
  case "$arg" in type=oci,dest=*) dest="${arg#type=oci,dest=}" ;; esac
done
[ -n "$dest" ] || exit 1
write_layout "$dest" "$(basename "$dest")"
"#;

const APKO_STUB: &str = r#"
echo "apko $*" >> "$DOCKREL_TOOL_LOG"
[ -f "$4" ] || { echo "no config $4 in $PWD" >&2; exit 1; }
for last; do :; done
write_layout "$last" "apko-$3"
"#;

const GRYPE_STUB: &str = r#"
echo "grype $*" >> "$DOCKREL_TOOL_LOG"
for arg in "$@"; do
  case "$arg" in json=*) out="${arg#json=}" ;; esac
done
if [ -n "$FAKE_GRYPE_SEVERITY" ]; then
  printf '{"matches":[{"vulnerability":{"id":"CVE-2024-0001","severity":"%s"},"artifact":{"name":"openssl","version":"3.0.1"}}]}' "$FAKE_GRYPE_SEVERITY" > "$out"
  echo "openssl 3.0.1 CVE-2024-0001 $FAKE_GRYPE_SEVERITY"
else
  printf '{"matches":[]}' > "$out"
  echo "No vulnerabilities found"
fi
"#;

const CRANE_STUB: &str = r#"
echo "crane $*" >> "$DOCKREL_TOOL_LOG"
if [ -n "$FAKE_CRANE_FAIL" ]; then
  case "$*" in *"$FAKE_CRANE_FAIL"*) echo "denied" >&2; exit 1 ;; esac
fi
case "$1" in
  digest) echo "sha256:deadbeef" ;;
  auth) cat > /dev/null ;;
  pull) for last; do :; done; make_layout "$last" "pulled-$3" ;;
esac
"#;

const COSIGN_STUB: &str = r#"
[ -n "$COSIGN_PRIVATE_KEY" ] || { echo "no key" >&2; exit 1; }
[ -n "$COSIGN_PASSWORD" ] || { echo "no password" >&2; exit 1; }
[ "$COSIGN_YES" = "true" ] || { echo "would prompt" >&2; exit 1; }
echo "cosign $*" >> "$DOCKREL_TOOL_LOG"
echo "tlog entry created"
"#;

/// Isolated test environment.
pub struct TestEnv {
  pub temp: TempDir,
  pub config_path: PathBuf,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let bin = temp.path().join("bin");
    std::fs::create_dir_all(&bin).unwrap();

    for (name, body) in [
      ("docker", DOCKER_STUB),
      ("apko", APKO_STUB),
      ("grype", GRYPE_STUB),
      ("crane", CRANE_STUB),
      ("cosign", COSIGN_STUB),
    ] {
      let path = bin.join(name);
      std::fs::write(&path, format!("#!/bin/sh\n{LAYOUT_FUNCTIONS}{body}")).unwrap();
      std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    let config_path = temp.path().join("dockrel.toml");
    let config = format!(
      "[tools]\ndocker = {:?}\napko = {:?}\ngrype = {:?}\ncrane = {:?}\ncosign = {:?}\n",
      bin.join("docker"),
      bin.join("apko"),
      bin.join("grype"),
      bin.join("crane"),
      bin.join("cosign"),
    );
    std::fs::write(&config_path, config).unwrap();

    Self { temp, config_path }
  }

  pub fn path(&self, relative_path: &str) -> PathBuf {
    self.temp.path().join(relative_path)
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.path(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// A build context holding a recipe.
  pub fn context(&self, relative_path: &str) -> PathBuf {
    self.write_file(&format!("{relative_path}/Dockerfile"), "FROM scratch\n");
    let p = self.path(relative_path);
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Every stub invocation so far, one per line.
  pub fn tool_log(&self) -> String {
    std::fs::read_to_string(self.path("tools.log")).unwrap_or_default()
  }

  fn dir(&self, name: &str) -> PathBuf {
    let p = self.path(name);
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// A pre-configured Command for the dockrel binary.
  pub fn cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("dockrel");
    cmd.env("XDG_CONFIG_HOME", self.dir("config"));
    cmd.env("XDG_DATA_HOME", self.dir("data"));
    cmd.env("XDG_CACHE_HOME", self.dir("cache"));
    cmd.env("DOCKREL_TOOL_LOG", self.path("tools.log"));
    cmd.env_remove("DOCKREL_CONFIG");
    cmd.env_remove("RUST_LOG");
    cmd.env_remove("FAKE_DOCKER_FAIL");
    cmd.env_remove("FAKE_GRYPE_SEVERITY");
    cmd.env_remove("FAKE_CRANE_FAIL");
    cmd.arg("--config").arg(&self.config_path);
    cmd
  }

  /// Names left in the work dir, sorted.
  pub fn work_dir_entries(&self) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(self.path("cache/dockrel/work")) else {
      return Vec::new();
    };
    let mut names: Vec<String> = entries
      .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
      .collect();
    names.sort();
    names
  }

  /// Saved pipeline state as JSON.
  pub fn state(&self) -> serde_json::Value {
    let output = self.cmd().args(["state", "-o", "json"]).output().unwrap();
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).unwrap()
  }
}

/// `index.json` of an exported layout archive.
pub fn layout_index(archive: &std::path::Path) -> serde_json::Value {
  let file = std::fs::File::open(archive).unwrap();
  let mut tar = tar::Archive::new(file);
  for entry in tar.entries().unwrap() {
    let entry = entry.unwrap();
    if entry.path().unwrap().to_str() == Some("index.json") {
      return serde_json::from_reader(entry).unwrap();
    }
  }
  panic!("no index.json in {}", archive.display());
}

pub fn combined(output: &std::process::Output) -> String {
  format!(
    "{}{}",
    String::from_utf8_lossy(&output.stdout),
    String::from_utf8_lossy(&output.stderr)
  )
}

