//! `pawnc.toml`: compiler options, storage roots and the library location.
//!
//! ```toml
//! [compiler]
//! include_paths = ["/gm/pawno/include"]
//! debug_level = 3
//! disabled_warnings = [203, 214]
//! defines = { MAX_PLAYERS = "50" }
//!
//! [storage]
//! primary_root = "/storage/emulated/0"
//!
//! [library]
//! path = "/opt/pawnc/libpawnc.so"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use log::debug;
use serde::Deserialize;

use crate::e_compiler_bridge::DEFAULT_PROGRAM_NAME;
use crate::e_native::default_library_name;

/// File looked up in the working directory when no config is given.
pub const DEFAULT_CONFIG_FILE: &str = "pawnc.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub compiler: CompilerConfig,
    pub storage: StorageConfig,
    pub library: LibraryConfig,
}

impl Settings {
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let settings: Settings = toml::from_str(contents).context("invalid settings")?;
        settings.compiler.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("cannot read settings file {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("in {}", path.display()))
    }

    /// An explicit path must exist; otherwise `pawnc.toml` in `dir` is used
    /// when present, and defaults when not.
    pub fn discover(explicit: Option<&Path>, dir: &Path) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let candidate = dir.join(DEFAULT_CONFIG_FILE);
        if candidate.is_file() {
            debug!("using settings from {}", candidate.display());
            Self::load(&candidate)
        } else {
            Ok(Settings::default())
        }
    }
}

/// Options handed to pawncc in front of the source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    /// `argv[0]`; defaults to `pawncc`.
    pub program_name: Option<String>,
    pub include_paths: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    /// `-d0` .. `-d3`
    pub debug_level: Option<u8>,
    /// `-O0` .. `-O2`
    pub optimization: Option<u8>,
    pub require_semicolons: bool,
    pub require_parentheses: bool,
    pub tab_size: Option<u8>,
    pub disabled_warnings: Vec<u32>,
    /// `sym=value` constants.
    pub defines: BTreeMap<String, String>,
    /// `-v0` .. `-v2`
    pub verbosity: Option<u8>,
    /// Passed through untouched, after everything else.
    pub extra: Vec<String>,
}

impl CompilerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        check_range("debug_level", self.debug_level, 3)?;
        check_range("optimization", self.optimization, 2)?;
        check_range("verbosity", self.verbosity, 2)?;
        if let Some(name) = self.defines.keys().find(|name| name.is_empty() || name.contains('=')) {
            bail!("invalid define name {:?}", name);
        }
        Ok(())
    }

    pub fn program_name(&self) -> &str {
        self.program_name.as_deref().unwrap_or(DEFAULT_PROGRAM_NAME)
    }

    /// The option vector for `CompilerBridge::compile`.
    pub fn build_options(&self) -> Vec<String> {
        let mut options = Vec::new();
        for include in &self.include_paths {
            options.push(format!("-i{}", include.display()));
        }
        if let Some(output) = &self.output {
            options.push(format!("-o{}", output.display()));
        }
        if let Some(level) = self.debug_level {
            options.push(format!("-d{}", level));
        }
        if let Some(level) = self.optimization {
            options.push(format!("-O{}", level));
        }
        if self.require_semicolons {
            options.push("-;+".to_string());
        }
        if self.require_parentheses {
            options.push("-(+".to_string());
        }
        if let Some(size) = self.tab_size {
            options.push(format!("-t{}", size));
        }
        for warning in &self.disabled_warnings {
            options.push(format!("-w{}-", warning));
        }
        for (name, value) in &self.defines {
            options.push(format!("{}={}", name, value));
        }
        if let Some(level) = self.verbosity {
            options.push(format!("-v{}", level));
        }
        options.extend(self.extra.iter().cloned());
        options
    }
}

fn check_range(name: &str, value: Option<u8>, max: u8) -> anyhow::Result<()> {
    match value {
        Some(level) if level > max => bail!("{} must be between 0 and {}, got {}", name, max, level),
        _ => Ok(()),
    }
}

/// Where the resolver finds storage volumes. Unset fields fall back to the
/// host's home and downloads directories and `/storage`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub primary_root: Option<PathBuf>,
    pub downloads_root: Option<PathBuf>,
    pub mount_dir: Option<PathBuf>,
    /// TOML file with a `[paths]` table mapping references to raw paths.
    pub legacy_index: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LibraryConfig {
    pub path: Option<PathBuf>,
}

impl LibraryConfig {
    pub fn library_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_library_name)
    }
}
