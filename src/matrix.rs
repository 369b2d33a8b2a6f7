//! Build matrix: the (OS, architecture) pairs a run produces artifacts for.
//!
//! The matrix is the cartesian product of the configured OS list and
//! architecture list. Either list may be narrowed to a single value from the
//! command line; values that are not in the list are ignored and the full
//! list is kept.

use std::fmt;

use crate::output;

/// Operating systems built by default.
pub const DEFAULT_SYSTEMS: &[&str] = &["darwin", "linux", "windows"];

/// Architectures built by default.
pub const DEFAULT_ARCHITECTURES: &[&str] = &["amd64", "386"];

/// The OS value whose artifacts carry an executable extension.
const WINDOWS_OS: &str = "windows";

const WINDOWS_EXTENSION: &str = ".exe";

/// One (operating system, architecture) pair to build for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildTarget {
    pub os: String,
    pub arch: String,
}

impl BuildTarget {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// Platform name used for the output subdirectory: `<os>_<arch>`.
    pub fn platform(&self) -> String {
        format!("{}_{}", self.os, self.arch)
    }

    pub fn is_windows(&self) -> bool {
        self.os == WINDOWS_OS
    }

    /// File name of the artifact the build command produces for this target.
    ///
    /// `<project>.exe` for Windows, `<project>` everywhere else.
    pub fn artifact_name(&self, project: &str) -> String {
        if self.is_windows() {
            format!("{project}{WINDOWS_EXTENSION}")
        } else {
            project.to_string()
        }
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.os, self.arch)
    }
}

/// Returns the default OS list as owned strings.
pub fn default_systems() -> Vec<String> {
    DEFAULT_SYSTEMS.iter().map(|s| s.to_string()).collect()
}

/// Returns the default architecture list as owned strings.
pub fn default_architectures() -> Vec<String> {
    DEFAULT_ARCHITECTURES.iter().map(|s| s.to_string()).collect()
}

pub fn is_supported(value: &str, list: &[String]) -> bool {
    list.iter().any(|item| item == value)
}

/// Narrow `list` to the single value `filter` if it is a member of `list`.
///
/// An absent or blank filter keeps the full list. An unsupported value is not
/// an error: the full list is kept and a note is printed in verbose mode.
pub fn narrow(list: &[String], filter: Option<&str>, kind: &str) -> Vec<String> {
    let value = match filter.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => return list.to_vec(),
    };

    if is_supported(value, list) {
        return vec![value.to_string()];
    }

    if output::is_verbose() {
        output::note(&format!(
            "unsupported {kind} '{value}' ignored; building for all of: {}",
            list.join(", ")
        ));
    }
    list.to_vec()
}

/// Build the target matrix in OS-major order.
///
/// Each filter is checked against its own list: the OS filter against
/// `systems`, the architecture filter against `architectures`.
pub fn enumerate_targets(
    systems: &[String],
    architectures: &[String],
    os_filter: Option<&str>,
    arch_filter: Option<&str>,
) -> Vec<BuildTarget> {
    let systems = narrow(systems, os_filter, "operating system");
    let architectures = narrow(architectures, arch_filter, "architecture");

    systems
        .iter()
        .flat_map(|os| {
            architectures
                .iter()
                .map(move |arch| BuildTarget::new(os.as_str(), arch.as_str()))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
