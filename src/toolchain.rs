//! External build command invocation.
//!
//! The toolchain is the command that compiles the project (`go build` by
//! default) together with the names of the two environment variables it reads
//! to select the target platform. Each invocation receives its target through
//! a [`BuildRequest`] applied to the child process only; the driver's own
//! environment is never modified.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::matrix::BuildTarget;

pub const DEFAULT_PROGRAM: &str = "go";
pub const DEFAULT_ARGS: &[&str] = &["build"];
pub const DEFAULT_OS_VAR: &str = "GOOS";
pub const DEFAULT_ARCH_VAR: &str = "GOARCH";
pub const DEFAULT_OUTPUT_FLAG: &str = "-o";

/// Description of the external build command.
///
/// Deserialized from the `[toolchain]` table of `builder.toml`; any field left
/// out takes its default.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Toolchain {
    /// Program to run, looked up on `PATH` if not a path.
    pub program: String,
    /// Arguments passed before any output flag.
    pub args: Vec<String>,
    /// Environment variable selecting the target operating system.
    pub os_var: String,
    /// Environment variable selecting the target architecture.
    pub arch_var: String,
    /// Flag that redirects the artifact to a given path. Needed for parallel builds.
    pub output_flag: Option<String>,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            args: DEFAULT_ARGS.iter().map(|s| s.to_string()).collect(),
            os_var: DEFAULT_OS_VAR.to_string(),
            arch_var: DEFAULT_ARCH_VAR.to_string(),
            output_flag: Some(DEFAULT_OUTPUT_FLAG.to_string()),
        }
    }
}

/// Parameters for a single build invocation.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    pub target: &'a BuildTarget,
    /// Where the artifact should be written. `None` leaves it at the
    /// toolchain's default location in the project directory.
    pub output: Option<&'a Path>,
}

impl<'a> BuildRequest<'a> {
    pub fn new(target: &'a BuildTarget) -> Self {
        Self {
            target,
            output: None,
        }
    }

    pub fn with_output(target: &'a BuildTarget, output: &'a Path) -> Self {
        Self {
            target,
            output: Some(output),
        }
    }
}

impl Toolchain {
    /// Check the toolchain description for values that can never work.
    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            bail!("toolchain program must not be empty");
        }
        if self.os_var.trim().is_empty() || self.arch_var.trim().is_empty() {
            bail!("toolchain os_var and arch_var must not be empty");
        }
        if let Some(flag) = &self.output_flag {
            if flag.trim().is_empty() {
                bail!("toolchain output_flag must not be empty when set");
            }
        }
        Ok(())
    }

    /// Full argument list for a request.
    pub fn args_for(&self, request: &BuildRequest<'_>) -> Result<Vec<String>> {
        let mut args = self.args.clone();
        if let Some(output) = request.output {
            let flag = self.output_flag.as_deref().ok_or_else(|| {
                anyhow::anyhow!(
                    "toolchain '{}' has no output_flag; cannot redirect the artifact to {}",
                    self.program,
                    output.display()
                )
            })?;
            args.push(flag.to_string());
            args.push(output.to_string_lossy().to_string());
        }
        Ok(args)
    }

    /// Build the child command for a request, run from `project_dir`.
    pub fn command(&self, request: &BuildRequest<'_>, project_dir: &Path) -> Result<Command> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args_for(request)?)
            .current_dir(project_dir)
            .env(&self.os_var, &request.target.os)
            .env(&self.arch_var, &request.target.arch)
            .stdin(Stdio::null());
        Ok(cmd)
    }

    /// Human-readable command line, e.g. `GOOS=linux GOARCH=386 go build`.
    pub fn describe(&self, request: &BuildRequest<'_>) -> String {
        let mut parts = vec![
            format!("{}={}", self.os_var, request.target.os),
            format!("{}={}", self.arch_var, request.target.arch),
            self.program.clone(),
        ];
        match self.args_for(request) {
            Ok(args) => parts.extend(args),
            Err(_) => parts.extend(self.args.iter().cloned()),
        }
        parts.join(" ")
    }

    /// Run the build command for a request.
    ///
    /// Returns an error if the command cannot be spawned or exits non-zero;
    /// the error carries the command's trimmed stderr.
    pub fn invoke(&self, request: &BuildRequest<'_>, project_dir: &Path) -> Result<()> {
        let output = self
            .command(request, project_dir)?
            .output()
            .with_context(|| format!("failed to execute {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            if stderr.is_empty() {
                bail!("{} failed ({})", self.describe(request), output.status);
            }
            bail!(
                "{} failed ({}): {}",
                self.describe(request),
                output.status,
                stderr
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
