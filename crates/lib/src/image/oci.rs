//! OCI image layouts.
//!
//! Build engines and registry clients hand over one OCI layout archive per
//! platform. [`merge`] combines them into a single layout: blobs are pooled,
//! every platform manifest is listed in one `index.json`, and layers are
//! rewritten to the requested compression. Manifests whose layers need no
//! rewrite keep their original bytes and digest.
//!
//! Sources written in the `docker save` format (a `manifest.json` instead of
//! an `index.json`, as apko produces) are converted to a layout first.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest as _, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use super::Compression;
use crate::platform::Platform;

const LAYOUT_VERSION: &str = "1.0.0";
const LAYOUT_FILE: &str = "oci-layout";
const INDEX_FILE: &str = "index.json";
const DOCKER_ARCHIVE_FILE: &str = "manifest.json";
const BLOBS_DIR: &str = "blobs";

const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

const OCI_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";
const OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
const DOCKER_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar";
const DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Annotation buildx uses to tie an attestation manifest to its image.
const REFERENCE_ANNOTATION: &str = "vnd.docker.reference.digest";

#[derive(Debug, Error)]
pub enum OciError {
  #[error("{path} is not an OCI image layout: {reason}")]
  Layout { path: PathBuf, reason: String },

  #[error("invalid JSON in {path}: {source}")]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid blob digest: {0}")]
  Digest(String),

  #[error("io error: {0}")]
  Io(#[from] io::Error),
}

/// Content descriptor. Fields this module does not interpret are carried through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
  #[serde(rename = "mediaType")]
  pub media_type: String,
  pub digest: String,
  pub size: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub platform: Option<DescriptorPlatform>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorPlatform {
  pub architecture: String,
  pub os: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub variant: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl From<&Platform> for DescriptorPlatform {
  fn from(platform: &Platform) -> Self {
    Self {
      architecture: platform.arch.to_string(),
      os: platform.os.to_string(),
      variant: platform.variant.clone(),
      extra: Map::new(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
  #[serde(rename = "schemaVersion")]
  pub schema_version: u32,
  #[serde(rename = "mediaType", default, skip_serializing_if = "Option::is_none")]
  pub media_type: Option<String>,
  pub manifests: Vec<Descriptor>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  config: Option<Descriptor>,
  #[serde(default)]
  layers: Vec<Descriptor>,
  #[serde(flatten)]
  rest: Map<String, Value>,
}

/// One image in a `docker save` archive's `manifest.json`.
#[derive(Debug, Deserialize)]
struct DockerArchiveEntry {
  #[serde(rename = "Config")]
  config: String,
  #[serde(rename = "Layers")]
  layers: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LayoutMarker {
  #[serde(rename = "imageLayoutVersion")]
  image_layout_version: String,
}

/// Merge per-platform layout archives into one layout archive at `dest`.
///
/// Each top-level manifest without a platform is labelled with the platform
/// it was built for. Nested indexes are flattened so the written index lists
/// manifests only.
pub fn merge(sources: &[(Platform, PathBuf)], compression: Compression, dest: &Path) -> Result<(), OciError> {
  let parent = dest
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or(Path::new("."));
  fs::create_dir_all(parent)?;
  let staging = tempfile::Builder::new().prefix(".oci-").tempdir_in(parent)?;

  let mut layout = LayoutWriter::create(staging.path().join("layout"))?;
  let mut manifests = Vec::new();

  for (position, (platform, archive)) in sources.iter().enumerate() {
    let source = staging.path().join(format!("source-{position}"));
    unpack(archive, &source)?;
    let index: Index = read_json(&source.join(INDEX_FILE))?;

    let mut entries = Vec::new();
    for descriptor in index.manifests {
      if is_index(&descriptor.media_type) {
        let nested: Index = read_json(&blob_file(&source, &descriptor.digest)?)?;
        entries.extend(nested.manifests);
      } else {
        entries.push(descriptor);
      }
    }

    for mut descriptor in layout.rewrite_all(&source, entries, compression)? {
      if descriptor.platform.is_none() && is_manifest(&descriptor.media_type) {
        descriptor.platform = Some(DescriptorPlatform::from(platform));
      }
      manifests.push(descriptor);
    }

    debug!(platform = %platform, archive = %archive.display(), "merged platform layout");
    fs::remove_dir_all(&source)?;
  }

  let index = Index {
    schema_version: 2,
    media_type: Some(OCI_INDEX.to_string()),
    manifests,
    extra: Map::new(),
  };
  layout.finish(&index, dest)?;

  info!(dest = %dest.display(), platforms = sources.len(), %compression, "wrote image layout");
  Ok(())
}

/// Pack an unpacked layout directory into an archive at `dest`.
pub fn archive_layout(dir: &Path, dest: &Path) -> Result<(), OciError> {
  if !dir.join(INDEX_FILE).is_file() {
    return Err(OciError::Layout {
      path: dir.to_path_buf(),
      reason: format!("missing {INDEX_FILE}"),
    });
  }
  let mut builder = tar::Builder::new(BufWriter::new(File::create(dest)?));
  builder.mode(tar::HeaderMode::Deterministic);
  builder.append_dir_all("", dir)?;
  builder.into_inner()?.flush()?;
  Ok(())
}

/// Read the top-level index of a layout archive.
pub fn read_index(archive: &Path) -> Result<Index, OciError> {
  let staging = tempfile::tempdir()?;
  unpack(archive, staging.path())?;
  read_json(&staging.path().join(INDEX_FILE))
}

/// Unpack `archive` into `dest`, leaving an OCI layout there.
fn unpack(archive: &Path, dest: &Path) -> Result<(), OciError> {
  fs::create_dir_all(dest)?;
  let file = File::open(archive)?;
  tar::Archive::new(BufReader::new(file)).unpack(dest)?;

  if dest.join(INDEX_FILE).is_file() {
    return Ok(());
  }
  if dest.join(DOCKER_ARCHIVE_FILE).is_file() {
    debug!(archive = %archive.display(), "converting docker archive to an image layout");
    return convert_docker_archive(dest);
  }
  Err(OciError::Layout {
    path: archive.to_path_buf(),
    reason: format!("missing {INDEX_FILE}"),
  })
}

/// Rewrite an unpacked `docker save` archive as an OCI layout, in place.
fn convert_docker_archive(root: &Path) -> Result<(), OciError> {
  let entries: Vec<DockerArchiveEntry> = read_json(&root.join(DOCKER_ARCHIVE_FILE))?;
  if entries.is_empty() {
    return Err(OciError::Layout {
      path: root.to_path_buf(),
      reason: format!("{DOCKER_ARCHIVE_FILE} lists no images"),
    });
  }

  let mut manifests = Vec::with_capacity(entries.len());
  for entry in entries {
    let config = store_member(root, &entry.config, |_| OCI_CONFIG)?;
    let layers = entry
      .layers
      .iter()
      .map(|layer| store_member(root, layer, |gzipped| if gzipped { OCI_LAYER_GZIP } else { OCI_LAYER }))
      .collect::<Result<Vec<_>, _>>()?;

    let mut rest = Map::new();
    rest.insert("schemaVersion".to_string(), Value::from(2));
    rest.insert("mediaType".to_string(), Value::from(OCI_MANIFEST));
    let manifest = Manifest {
      config: Some(config),
      layers,
      rest,
    };
    let bytes = serde_json::to_vec(&manifest).map_err(|source| OciError::Json {
      path: root.join(DOCKER_ARCHIVE_FILE),
      source,
    })?;
    let digest = format!("sha256:{}", hex::encode(Sha256::digest(&bytes)));
    let path = blob_file(root, &digest)?;
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::write(&path, &bytes)?;
    manifests.push(Descriptor {
      media_type: OCI_MANIFEST.to_string(),
      digest,
      size: bytes.len() as u64,
      platform: None,
      extra: Map::new(),
    });
  }

  let index = Index {
    schema_version: 2,
    media_type: Some(OCI_INDEX.to_string()),
    manifests,
    extra: Map::new(),
  };
  write_json(&root.join(INDEX_FILE), &index)
}

/// Hash a file named by a docker archive and make it a blob of the same layout.
///
/// `media_type` is told whether the file is gzip compressed.
fn store_member(root: &Path, member: &str, media_type: impl Fn(bool) -> &'static str) -> Result<Descriptor, OciError> {
  let relative = Path::new(member);
  if relative.is_absolute() || relative.components().any(|c| !matches!(c, std::path::Component::Normal(_))) {
    return Err(OciError::Layout {
      path: root.to_path_buf(),
      reason: format!("unsafe member path {member}"),
    });
  }
  let file = root.join(relative);

  let mut reader = BufReader::new(File::open(&file)?);
  let mut hashing = HashingWriter::new(io::sink());
  io::copy(&mut reader, &mut hashing)?;
  let (_, digest, size) = hashing.finish();

  let mut magic = [0u8; 2];
  let gzipped = File::open(&file)?.read_exact(&mut magic).is_ok() && magic == [0x1f, 0x8b];

  let blob = blob_file(root, &digest)?;
  if !blob.is_file() {
    if let Some(parent) = blob.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::copy(&file, &blob)?;
  }

  Ok(Descriptor {
    media_type: media_type(gzipped).to_string(),
    digest,
    size,
    platform: None,
    extra: Map::new(),
  })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, OciError> {
  let bytes = fs::read(path)?;
  serde_json::from_slice(&bytes).map_err(|source| OciError::Json {
    path: path.to_path_buf(),
    source,
  })
}

fn is_index(media_type: &str) -> bool {
  media_type == OCI_INDEX || media_type == DOCKER_MANIFEST_LIST
}

fn is_manifest(media_type: &str) -> bool {
  media_type == OCI_MANIFEST || media_type == DOCKER_MANIFEST
}

/// Media type a layer takes under `compression`, when it has to change.
fn converted_media_type(media_type: &str, compression: Compression) -> Option<&'static str> {
  match (media_type, compression) {
    (OCI_LAYER, Compression::Gzip) => Some(OCI_LAYER_GZIP),
    (DOCKER_LAYER, Compression::Gzip) => Some(DOCKER_LAYER_GZIP),
    (OCI_LAYER_GZIP, Compression::Uncompressed) => Some(OCI_LAYER),
    (DOCKER_LAYER_GZIP, Compression::Uncompressed) => Some(DOCKER_LAYER),
    _ => None,
  }
}

/// Relative blob path (`sha256/<hex>`) for a digest.
fn blob_path(digest: &str) -> Result<PathBuf, OciError> {
  let valid = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric());
  match digest.split_once(':') {
    Some((algorithm, encoded)) if valid(algorithm) && valid(encoded) => Ok(Path::new(algorithm).join(encoded)),
    _ => Err(OciError::Digest(digest.to_string())),
  }
}

fn blob_file(root: &Path, digest: &str) -> Result<PathBuf, OciError> {
  Ok(root.join(BLOBS_DIR).join(blob_path(digest)?))
}

/// Writer that hashes and counts what passes through it.
struct HashingWriter<W> {
  inner: W,
  hasher: Sha256,
  size: u64,
}

impl<W: Write> HashingWriter<W> {
  fn new(inner: W) -> Self {
    Self {
      inner,
      hasher: Sha256::new(),
      size: 0,
    }
  }

  fn finish(self) -> (W, String, u64) {
    let digest = format!("sha256:{}", hex::encode(self.hasher.finalize()));
    (self.inner, digest, self.size)
  }
}

impl<W: Write> Write for HashingWriter<W> {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    let written = self.inner.write(buf)?;
    self.hasher.update(&buf[..written]);
    self.size += written as u64;
    Ok(written)
  }

  fn flush(&mut self) -> io::Result<()> {
    self.inner.flush()
  }
}

/// A layout being assembled in a staging directory.
struct LayoutWriter {
  root: PathBuf,
  /// Relative paths of every blob written so far.
  blobs: BTreeSet<PathBuf>,
}

impl LayoutWriter {
  fn create(root: PathBuf) -> Result<Self, OciError> {
    fs::create_dir_all(root.join(BLOBS_DIR))?;
    Ok(Self {
      root,
      blobs: BTreeSet::new(),
    })
  }

  /// Rewrite a list of sibling descriptors, then point any attestation that
  /// referenced a rewritten manifest at its new digest.
  fn rewrite_all(
    &mut self,
    source: &Path,
    descriptors: Vec<Descriptor>,
    compression: Compression,
  ) -> Result<Vec<Descriptor>, OciError> {
    let mut renamed = HashMap::new();
    let mut rewritten = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
      let original = descriptor.digest.clone();
      let descriptor = self.rewrite(source, descriptor, compression)?;
      if descriptor.digest != original {
        renamed.insert(original, descriptor.digest.clone());
      }
      rewritten.push(descriptor);
    }

    if !renamed.is_empty() {
      for descriptor in &mut rewritten {
        let reference = descriptor
          .extra
          .get_mut("annotations")
          .and_then(Value::as_object_mut)
          .and_then(|annotations| annotations.get_mut(REFERENCE_ANNOTATION));
        if let Some(Value::String(digest)) = reference
          && let Some(new) = renamed.get(digest.as_str())
        {
          *digest = new.clone();
        }
      }
    }
    Ok(rewritten)
  }

  fn rewrite(&mut self, source: &Path, descriptor: Descriptor, compression: Compression) -> Result<Descriptor, OciError> {
    if is_index(&descriptor.media_type) {
      let mut index: Index = read_json(&blob_file(source, &descriptor.digest)?)?;
      let children = std::mem::take(&mut index.manifests);
      let before: Vec<String> = children.iter().map(|d| d.digest.clone()).collect();
      index.manifests = self.rewrite_all(source, children, compression)?;
      if index.manifests.iter().map(|d| &d.digest).eq(before.iter()) {
        self.copy_blob(source, &descriptor.digest)?;
        return Ok(descriptor);
      }
      return self.replace(descriptor, &index);
    }

    if is_manifest(&descriptor.media_type) {
      let mut manifest: Manifest = read_json(&blob_file(source, &descriptor.digest)?)?;
      if let Some(config) = &manifest.config {
        self.copy_blob(source, &config.digest)?;
      }

      let mut changed = false;
      for layer in &mut manifest.layers {
        match converted_media_type(&layer.media_type, compression) {
          Some(media_type) => {
            let (digest, size) = self.convert_layer(source, &layer.digest, compression)?;
            layer.media_type = media_type.to_string();
            layer.digest = digest;
            layer.size = size;
            changed = true;
          }
          None => self.copy_blob(source, &layer.digest)?,
        }
      }

      if !changed {
        self.copy_blob(source, &descriptor.digest)?;
        return Ok(descriptor);
      }
      return self.replace(descriptor, &manifest);
    }

    self.copy_blob(source, &descriptor.digest)?;
    Ok(descriptor)
  }

  /// Store a re-serialized document and return `descriptor` pointing at it.
  fn replace<T: Serialize>(&mut self, descriptor: Descriptor, document: &T) -> Result<Descriptor, OciError> {
    let bytes = serde_json::to_vec(document).map_err(|source| OciError::Json {
      path: PathBuf::from(&descriptor.digest),
      source,
    })?;
    let (digest, size) = self.write_blob(&bytes)?;
    Ok(Descriptor {
      digest,
      size,
      ..descriptor
    })
  }

  fn copy_blob(&mut self, source: &Path, digest: &str) -> Result<(), OciError> {
    let relative = blob_path(digest)?;
    if self.blobs.contains(&relative) {
      return Ok(());
    }
    let from = source.join(BLOBS_DIR).join(&relative);
    if !from.is_file() {
      return Err(OciError::Layout {
        path: source.to_path_buf(),
        reason: format!("missing blob {digest}"),
      });
    }
    let to = self.root.join(BLOBS_DIR).join(&relative);
    if let Some(parent) = to.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::copy(&from, &to)?;
    self.blobs.insert(relative);
    Ok(())
  }

  fn write_blob(&mut self, bytes: &[u8]) -> Result<(String, u64), OciError> {
    let digest = format!("sha256:{}", hex::encode(Sha256::digest(bytes)));
    let relative = blob_path(&digest)?;
    let to = self.root.join(BLOBS_DIR).join(&relative);
    if let Some(parent) = to.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::write(&to, bytes)?;
    self.blobs.insert(relative);
    Ok((digest, bytes.len() as u64))
  }

  /// Re-encode one layer blob for `compression` and store the result.
  fn convert_layer(&mut self, source: &Path, digest: &str, compression: Compression) -> Result<(String, u64), OciError> {
    let mut input = BufReader::new(File::open(blob_file(source, digest)?)?);
    let staged = tempfile::NamedTempFile::new_in(&self.root)?;

    let (digest, size) = {
      let writer = HashingWriter::new(BufWriter::new(staged.as_file()));
      let writer = match compression {
        Compression::Gzip => {
          let mut encoder = GzEncoder::new(writer, flate2::Compression::default());
          io::copy(&mut input, &mut encoder)?;
          encoder.finish()?
        }
        Compression::Uncompressed => {
          let mut writer = writer;
          io::copy(&mut GzDecoder::new(input), &mut writer)?;
          writer
        }
      };
      let (buffered, digest, size) = writer.finish();
      buffered.into_inner().map_err(|e| e.into_error())?;
      (digest, size)
    };

    let relative = blob_path(&digest)?;
    let to = self.root.join(BLOBS_DIR).join(&relative);
    if let Some(parent) = to.parent() {
      fs::create_dir_all(parent)?;
    }
    staged.persist(&to).map_err(|e| e.error)?;
    self.blobs.insert(relative);
    Ok((digest, size))
  }

  /// Write `index.json` and `oci-layout`, then pack the layout into `dest`.
  fn finish(self, index: &Index, dest: &Path) -> Result<(), OciError> {
    let marker = LayoutMarker {
      image_layout_version: LAYOUT_VERSION.to_string(),
    };
    let index_path = self.root.join(INDEX_FILE);
    let marker_path = self.root.join(LAYOUT_FILE);
    write_json(&marker_path, &marker)?;
    write_json(&index_path, index)?;

    let mut builder = tar::Builder::new(BufWriter::new(File::create(dest)?));
    builder.mode(tar::HeaderMode::Deterministic);
    builder.append_path_with_name(&marker_path, LAYOUT_FILE)?;
    builder.append_path_with_name(&index_path, INDEX_FILE)?;
    for relative in &self.blobs {
      let name = Path::new(BLOBS_DIR).join(relative);
      builder.append_path_with_name(self.root.join(&name), &name)?;
    }
    builder.into_inner()?.flush()?;
    Ok(())
  }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), OciError> {
  let bytes = serde_json::to_vec_pretty(value).map_err(|source| OciError::Json {
    path: path.to_path_buf(),
    source,
  })?;
  fs::write(path, bytes)?;
  Ok(())
}
