//! Project configuration.
//!
//! An optional `builder.toml` in the project directory can change the build
//! matrix, the output root, the worker count and the toolchain. Every field
//! is optional; a missing file means all defaults.
//!
//! ```toml
//! output_dir = "release"
//! systems = ["linux", "windows"]
//! architectures = ["amd64", "arm64"]
//! jobs = 4
//!
//! [toolchain]
//! program = "go"
//! args = ["build", "-trimpath"]
//! ```
//!
//! The file is resolved together with command-line overrides and the
//! environment into an immutable [`BuildConfig`] that is passed to every
//! build operation.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use crate::dist::DEFAULT_OUTPUT_DIR;
use crate::matrix;
use crate::toolchain::Toolchain;

/// Config file name looked up in the project directory.
pub const CONFIG_FILE_NAME: &str = "builder.toml";

/// Environment variable overriding the output root.
pub const OUTPUT_DIR_ENV_VAR: &str = "BUILDER_OUTPUT_DIR";

const DEFAULT_JOBS: usize = 1;

/// Contents of `builder.toml`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Output root, relative to the project directory unless absolute.
    pub output_dir: Option<String>,
    /// Operating systems to build for.
    pub systems: Option<Vec<String>>,
    /// Architectures to build for.
    pub architectures: Option<Vec<String>>,
    /// Number of builds to run at once.
    pub jobs: Option<usize>,
    /// External build command.
    pub toolchain: Option<Toolchain>,
}

impl ProjectConfig {
    /// Default config file path inside a project directory.
    pub fn path_in(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_FILE_NAME)
    }

    /// Load config from a specific path. Returns defaults if the file does not exist.
    ///
    /// Parse errors and I/O errors other than file-not-found are hard failures.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("failed to parse config file at {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to read config file at {}", path.display()))
            }
        }
    }

    /// Load an explicitly requested config file. Unlike [`load_from`](Self::load_from)
    /// a missing file is an error.
    pub fn load_required(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("config file {} does not exist", path.display());
        }
        Self::load_from(path)
    }
}

/// Values supplied on the command line for this invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub output_dir: Option<String>,
    pub jobs: Option<usize>,
}

/// Fully resolved, immutable configuration for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    /// Project name; the base name of the project directory.
    pub project: String,
    /// Directory the build command runs in.
    pub project_dir: PathBuf,
    /// Absolute output root.
    pub output_root: PathBuf,
    pub systems: Vec<String>,
    pub architectures: Vec<String>,
    pub toolchain: Toolchain,
    /// Number of builds to run at once; always at least 1.
    pub jobs: usize,
}

impl BuildConfig {
    /// Defaults for a project directory, as if no config file and no overrides
    /// were given.
    pub fn for_project(project_dir: &Path) -> Result<Self> {
        Self::resolve_with_env(
            project_dir,
            ProjectConfig::default(),
            &CliOverrides::default(),
            None,
        )
    }

    /// Resolve the effective configuration.
    ///
    /// Output root priority (highest wins):
    /// 1. `--out` command-line flag
    /// 2. `BUILDER_OUTPUT_DIR` environment variable
    /// 3. `output_dir` from `builder.toml`
    /// 4. `dist`
    ///
    /// Empty or whitespace-only values at any layer fall through to the next.
    pub fn resolve(
        project_dir: &Path,
        file: ProjectConfig,
        overrides: &CliOverrides,
    ) -> Result<Self> {
        Self::resolve_with_env(
            project_dir,
            file,
            overrides,
            std::env::var(OUTPUT_DIR_ENV_VAR).ok(),
        )
    }

    /// Internal resolver that accepts the env var value as a parameter for testability.
    fn resolve_with_env(
        project_dir: &Path,
        file: ProjectConfig,
        overrides: &CliOverrides,
        env_output_dir: Option<String>,
    ) -> Result<Self> {
        let project = project_name(project_dir)?;

        let output_dir = non_empty_trimmed(overrides.output_dir.clone())
            .or_else(|| non_empty_trimmed(env_output_dir))
            .or_else(|| non_empty_trimmed(file.output_dir.clone()))
            .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string());
        let output_root = normalize_lexically(&project_dir.join(output_dir));

        let systems = file.systems.unwrap_or_else(matrix::default_systems);
        let architectures = file
            .architectures
            .unwrap_or_else(matrix::default_architectures);
        let toolchain = file.toolchain.unwrap_or_default();
        let jobs = overrides.jobs.or(file.jobs).unwrap_or(DEFAULT_JOBS);

        let config = Self {
            project,
            project_dir: project_dir.to_path_buf(),
            output_root,
            systems,
            architectures,
            toolchain,
            jobs,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.systems.is_empty() {
            bail!("systems must list at least one operating system");
        }
        if self.architectures.is_empty() {
            bail!("architectures must list at least one architecture");
        }
        if let Some(bad) = self
            .systems
            .iter()
            .chain(&self.architectures)
            .find(|v| v.trim().is_empty())
        {
            bail!("systems and architectures must not contain empty values (got {bad:?})");
        }
        // Each target owns one output subdirectory and one staging path.
        for (kind, list) in [
            ("systems", &self.systems),
            ("architectures", &self.architectures),
        ] {
            if let Some(dup) = first_duplicate(list) {
                bail!("{kind} lists {dup:?} more than once");
            }
        }
        if self.jobs == 0 {
            bail!("jobs must be at least 1");
        }
        self.toolchain.validate()?;
        if self.jobs > 1 && self.toolchain.output_flag.is_none() {
            bail!(
                "jobs = {} requires toolchain.output_flag so parallel builds do not overwrite each other",
                self.jobs
            );
        }
        // The output root is removed recursively at the start of a run.
        if self.project_dir.starts_with(&self.output_root) {
            bail!(
                "output directory {} must not contain the project directory",
                self.output_root.display()
            );
        }
        Ok(())
    }

    /// Whether builds run concurrently and therefore write to staging paths.
    pub fn is_parallel(&self) -> bool {
        self.jobs > 1
    }
}

/// The project name: the final component of the project directory.
pub fn project_name(project_dir: &Path) -> Result<String> {
    let name = project_dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "cannot determine project name from directory {}",
                project_dir.display()
            )
        })?;
    Ok(name.to_string())
}

fn first_duplicate(values: &[String]) -> Option<&str> {
    let mut seen = HashSet::new();
    values
        .iter()
        .map(String::as_str)
        .find(|v| !seen.insert(*v))
}

/// Resolve `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Return the trimmed value if non-empty after trimming, otherwise `None`.
fn non_empty_trimmed(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
