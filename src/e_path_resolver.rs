//! Turns opaque file references (`file://` and `content://` URIs) into
//! absolute paths the native compiler can open.
//!
//! Resolution is a chain of strategies tried in order; the first one that
//! yields a path wins. A strategy that fails internally is logged and the
//! chain moves on, so the caller only ever sees a path or `None`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use log::debug;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use url::Url;

use crate::e_config::StorageConfig;

/// Document-id prefix of the primary shared storage volume.
pub const PRIMARY_VOLUME: &str = "primary:";

/// Facts about the storage layout the resolver consults.
pub trait StorageEnvironment: Send + Sync {
    /// Root of the primary external storage volume.
    fn primary_root(&self) -> anyhow::Result<PathBuf>;
    /// Public downloads directory.
    fn downloads_root(&self) -> anyhow::Result<PathBuf>;
    /// Currently mounted external storage locations. Entries may be
    /// app-specific directories below a volume root; everything from their
    /// `/Android` component on is ignored.
    fn mounted_roots(&self) -> anyhow::Result<Vec<PathBuf>>;
    /// Raw path recorded for `reference` in the legacy metadata store.
    fn legacy_path(&self, reference: &str) -> anyhow::Result<Option<String>>;

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Storage layout of the machine we are running on, from configuration with
/// `dirs` defaults.
#[derive(Debug, Clone)]
pub struct HostStorage {
    primary_root: Option<PathBuf>,
    downloads_root: Option<PathBuf>,
    mount_dir: PathBuf,
    legacy_index: Option<PathBuf>,
}

/// Default directory whose subdirectories are mounted volumes.
pub const DEFAULT_MOUNT_DIR: &str = "/storage";

#[derive(Debug, Default, Deserialize)]
struct LegacyIndex {
    #[serde(default)]
    paths: BTreeMap<String, String>,
}

impl HostStorage {
    pub fn new() -> Self {
        HostStorage {
            primary_root: None,
            downloads_root: None,
            mount_dir: PathBuf::from(DEFAULT_MOUNT_DIR),
            legacy_index: None,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        HostStorage {
            primary_root: config.primary_root.clone(),
            downloads_root: config.downloads_root.clone(),
            mount_dir: config
                .mount_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MOUNT_DIR)),
            legacy_index: config.legacy_index.clone(),
        }
    }

    pub fn with_primary_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.primary_root = Some(root.into());
        self
    }

    pub fn with_downloads_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.downloads_root = Some(root.into());
        self
    }

    pub fn with_mount_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mount_dir = dir.into();
        self
    }

    pub fn with_legacy_index(mut self, index: impl Into<PathBuf>) -> Self {
        self.legacy_index = Some(index.into());
        self
    }
}

impl Default for HostStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEnvironment for HostStorage {
    fn primary_root(&self) -> anyhow::Result<PathBuf> {
        self.primary_root
            .clone()
            .or_else(dirs::home_dir)
            .ok_or_else(|| anyhow!("no primary storage root configured"))
    }

    fn downloads_root(&self) -> anyhow::Result<PathBuf> {
        if let Some(root) = &self.downloads_root {
            return Ok(root.clone());
        }
        if let Some(root) = &self.primary_root {
            return Ok(root.join("Download"));
        }
        dirs::download_dir().ok_or_else(|| anyhow!("no downloads directory configured"))
    }

    fn mounted_roots(&self) -> anyhow::Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.mount_dir)
            .with_context(|| format!("cannot list mounts in {}", self.mount_dir.display()))?;
        let mut roots = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                roots.push(entry.path());
            }
        }
        roots.sort();
        Ok(roots)
    }

    fn legacy_path(&self, reference: &str) -> anyhow::Result<Option<String>> {
        let Some(index_path) = &self.legacy_index else {
            return Ok(None);
        };
        let contents = fs::read_to_string(index_path)
            .with_context(|| format!("cannot read legacy index {}", index_path.display()))?;
        let index: LegacyIndex = toml::from_str(&contents)
            .with_context(|| format!("malformed legacy index {}", index_path.display()))?;
        Ok(index.paths.get(reference).cloned())
    }
}

/// Resolves opaque file references against a [`StorageEnvironment`].
#[derive(Debug, Clone)]
pub struct PathResolver<S> {
    storage: S,
}

impl<S: StorageEnvironment> PathResolver<S> {
    pub fn new(storage: S) -> Self {
        PathResolver { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Absolute path for `reference`, or `None` when it cannot be accessed.
    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let uri = match Url::parse(reference) {
            Ok(uri) => uri,
            Err(e) => {
                debug!("not a URI {:?}: {}", reference, e);
                return None;
            }
        };
        match uri.scheme() {
            "file" => Some(PathBuf::from(decode(uri.path()))),
            "content" => self.resolve_content(reference, &uri),
            other => {
                debug!("unsupported scheme {:?} in {}", other, reference);
                None
            }
        }
    }

    fn resolve_content(&self, reference: &str, uri: &Url) -> Option<PathBuf> {
        match document_id(uri) {
            Ok(id) => {
                if let Some(path) = attempt("volume alias", reference, self.from_volume_alias(&id)) {
                    return Some(path);
                }
                if let Some(path) =
                    attempt("mounted volume", reference, self.from_mounted_volume(&id))
                {
                    return Some(path);
                }
            }
            Err(e) => debug!("no document id in {}: {:#}", reference, e),
        }
        let legacy = self
            .storage
            .legacy_path(reference)
            .map(|path| path.map(PathBuf::from));
        if let Some(path) = attempt("legacy store", reference, legacy) {
            return Some(path);
        }
        debug!("cannot resolve {}", reference);
        None
    }

    /// `primary:rel`, `home:rel`, `downloads:rel` and `raw:/abs`.
    fn from_volume_alias(&self, id: &str) -> anyhow::Result<Option<PathBuf>> {
        if let Some(relative) = id.strip_prefix(PRIMARY_VOLUME) {
            return Ok(Some(join_relative(&self.storage.primary_root()?, relative)));
        }
        let Some((kind, relative)) = split_typed(id) else {
            return Ok(None);
        };
        let path = match kind.to_lowercase().as_str() {
            "home" => join_relative(&self.storage.primary_root()?, relative),
            "downloads" => join_relative(&self.storage.downloads_root()?, relative),
            "raw" => PathBuf::from(relative),
            _ => return Ok(None),
        };
        Ok(Some(path))
    }

    /// `volume:rel` against every mounted root, first existing match wins.
    fn from_mounted_volume(&self, id: &str) -> anyhow::Result<Option<PathBuf>> {
        let Some((_, relative)) = split_typed(id) else {
            return Ok(None);
        };
        for mounted in self.storage.mounted_roots()? {
            let candidate = join_relative(&volume_root(&mounted), relative);
            if self.storage.exists(&candidate) {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

impl Default for PathResolver<HostStorage> {
    fn default() -> Self {
        PathResolver::new(HostStorage::new())
    }
}

fn attempt(
    stage: &str,
    reference: &str,
    outcome: anyhow::Result<Option<PathBuf>>,
) -> Option<PathBuf> {
    match outcome {
        Ok(found) => found,
        Err(e) => {
            debug!("{} lookup failed for {}: {:#}", stage, reference, e);
            None
        }
    }
}

fn decode(text: &str) -> String {
    percent_decode_str(text).decode_utf8_lossy().into_owned()
}

/// The segment following `document` in the URI path, decoded.
fn document_id(uri: &Url) -> anyhow::Result<String> {
    let mut segments = uri
        .path_segments()
        .ok_or_else(|| anyhow!("reference has no path"))?;
    segments
        .by_ref()
        .find(|segment| *segment == "document")
        .ok_or_else(|| anyhow!("reference is not a document"))?;
    let id = segments
        .next()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| anyhow!("reference has an empty document id"))?;
    Ok(decode(id))
}

/// `type:relative` with exactly one separator.
fn split_typed(id: &str) -> Option<(&str, &str)> {
    let (kind, relative) = id.split_once(':')?;
    if relative.contains(':') {
        return None;
    }
    Some((kind, relative))
}

fn join_relative(root: &Path, relative: &str) -> PathBuf {
    root.join(relative.trim_start_matches('/'))
}

/// Everything before the `Android` component, e.g. the volume of an
/// app-specific files directory.
fn volume_root(dir: &Path) -> PathBuf {
    dir.components()
        .take_while(|component| component.as_os_str() != "Android")
        .collect()
}
