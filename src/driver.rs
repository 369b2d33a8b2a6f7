//! Build driver: runs the external build command once per target and moves
//! each artifact into the output tree.
//!
//! A run goes through these steps:
//! 1. Snapshot the toolchain's target-selection environment variables
//! 2. Remove the previous output root (fatal on failure)
//! 3. Build every target on a worker pool that is joined once, after the
//!    whole matrix has been dispatched
//! 4. Restore the environment snapshot
//!
//! A target that fails is reported and skipped; it never aborts the run.

use anyhow::{Context, Result};
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::BuildConfig;
use crate::dist;
use crate::env_snapshot::EnvSnapshot;
use crate::matrix::BuildTarget;
use crate::output::{self, Status};
use crate::toolchain::BuildRequest;

/// Prefix of the per-run staging directory used by parallel builds.
const STAGING_PREFIX: &str = ".builder-staging-";

/// The step of a target's build that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    CreateDir,
    Invoke,
    Relocate,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildStage::CreateDir => "creating output directory",
            BuildStage::Invoke => "running build command",
            BuildStage::Relocate => "moving artifact",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Built { artifact: PathBuf },
    Failed { stage: BuildStage, error: String },
}

impl BuildOutcome {
    fn failed(stage: BuildStage, error: anyhow::Error) -> Self {
        BuildOutcome::Failed {
            stage,
            error: format!("{error:#}"),
        }
    }

    pub fn is_built(&self) -> bool {
        matches!(self, BuildOutcome::Built { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub target: BuildTarget,
    pub outcome: BuildOutcome,
}

/// Per-target results of a run, in matrix order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub reports: Vec<TargetReport>,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.reports.len()
    }

    pub fn built(&self) -> usize {
        self.reports.iter().filter(|r| r.outcome.is_built()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &TargetReport> {
        self.reports.iter().filter(|r| !r.outcome.is_built())
    }
}

/// Build a single target.
///
/// Creates `<root>/<os>_<arch>/`, runs the build command with the target's
/// OS and architecture, and moves the artifact into that directory. When
/// `staging` is given the build command is told to write the artifact under
/// it instead of the project directory.
///
/// Failures are reported on stderr and returned as [`BuildOutcome::Failed`];
/// they never leave an artifact in the target's directory.
pub fn build_one(
    config: &BuildConfig,
    target: &BuildTarget,
    staging: Option<&Path>,
) -> BuildOutcome {
    let platform = target.platform();
    let artifact_name = target.artifact_name(&config.project);

    output::action("Building", &format!("{} for {platform}", config.project));

    let outcome = build_one_inner(config, target, staging, &artifact_name);
    match &outcome {
        BuildOutcome::Built { artifact } => {
            output::verbose(&format!("-> {}", artifact.display()));
        }
        BuildOutcome::Failed { stage, error } => {
            output::fail("Failed", &format!("{platform}: {stage}: {error}"));
            if *stage == BuildStage::Invoke {
                output::detail(
                    "make sure you are running builder from the directory with the main package",
                );
            }
        }
    }
    outcome
}

fn build_one_inner(
    config: &BuildConfig,
    target: &BuildTarget,
    staging: Option<&Path>,
    artifact_name: &str,
) -> BuildOutcome {
    let out_dir = match dist::create_target_dir(&config.output_root, target) {
        Ok(dir) => dir,
        Err(e) => return BuildOutcome::failed(BuildStage::CreateDir, e),
    };

    let staged = match staging {
        Some(dir) => {
            let stage_dir = dir.join(target.platform());
            if let Err(e) = std::fs::create_dir_all(&stage_dir)
                .with_context(|| format!("failed to create {}", stage_dir.display()))
            {
                return BuildOutcome::failed(BuildStage::CreateDir, e);
            }
            Some(stage_dir.join(artifact_name))
        }
        None => None,
    };

    let request = match &staged {
        Some(path) => BuildRequest::with_output(target, path),
        None => BuildRequest::new(target),
    };
    output::verbose(&config.toolchain.describe(&request));

    if let Err(e) = config.toolchain.invoke(&request, &config.project_dir) {
        return BuildOutcome::failed(BuildStage::Invoke, e);
    }

    let source = staged.unwrap_or_else(|| config.project_dir.join(artifact_name));
    let dest = out_dir.join(artifact_name);
    if let Err(e) = dist::relocate_artifact(&source, &dest) {
        return BuildOutcome::failed(BuildStage::Relocate, e);
    }

    BuildOutcome::Built { artifact: dest }
}

/// Build every target and collect the results in matrix order.
///
/// Targets are pulled from a shared queue by `config.jobs` workers (never more
/// than there are targets). All workers are joined once, after every target
/// has been handed out. With `jobs = 1` the targets are built strictly in
/// order, each writing to the project directory. With `jobs > 1` each build
/// writes to its own staging path that is removed afterwards.
pub fn run_all(config: &BuildConfig, targets: &[BuildTarget]) -> Result<RunSummary> {
    if targets.is_empty() {
        return Ok(RunSummary::default());
    }

    let workers = config.jobs.clamp(1, targets.len());

    // Staging lives inside the project directory so artifacts can be
    // hard-linked into the output tree on the same filesystem.
    let staging = if config.is_parallel() {
        Some(
            tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .tempdir_in(&config.project_dir)
                .context("failed to create staging directory for parallel builds")?,
        )
    } else {
        None
    };
    let staging_path = staging.as_ref().map(|d| d.path());

    let next = &AtomicUsize::new(0);
    let results: Vec<Vec<(usize, BuildOutcome)>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(move || {
                    let mut done = Vec::new();
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(target) = targets.get(index) else {
                            break;
                        };
                        done.push((index, build_one(config, target, staging_path)));
                    }
                    done
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .map_err(|_| anyhow::anyhow!("a build worker panicked"))
            })
            .collect::<Result<Vec<_>>>()
    })?;

    let mut indexed: Vec<(usize, BuildOutcome)> = results.into_iter().flatten().collect();
    indexed.sort_by_key(|(index, _)| *index);

    let reports = indexed
        .into_iter()
        .map(|(index, outcome)| TargetReport {
            target: targets[index].clone(),
            outcome,
        })
        .collect();

    if let Some(dir) = staging {
        let path = dir.path().to_path_buf();
        if let Err(e) = dir.close() {
            output::note(&format!(
                "could not remove staging directory {}: {e}",
                path.display()
            ));
        }
    }

    Ok(RunSummary { reports })
}

/// Write the end-of-run report: a `Done` line with the built/total count and
/// one detail line per failed target naming the step that failed.
pub fn write_summary(
    w: &mut dyn Write,
    summary: &RunSummary,
    output_root: &Path,
    is_tty: bool,
) -> io::Result<()> {
    let done = format!(
        "built {} of {} targets; artifacts are under '{}'",
        summary.built(),
        summary.total(),
        output_root.display()
    );
    output::write_line(w, Status::Success("Done"), &done, is_tty)?;
    for report in summary.failed() {
        if let BuildOutcome::Failed { stage, .. } = &report.outcome {
            let line = format!("{} failed while {stage}", report.target);
            output::write_line(w, Status::Detail, &line, is_tty)?;
        }
    }
    Ok(())
}

/// Run the whole build: snapshot the environment, clear old output, build
/// every target, and restore the environment.
///
/// Only initialization failures (clearing the output root, creating the
/// staging directory) are returned as errors. Per-target failures are in the
/// returned summary.
pub fn run(config: &BuildConfig, targets: &[BuildTarget]) -> Result<RunSummary> {
    let restore = EnvSnapshot::capture([
        config.toolchain.os_var.as_str(),
        config.toolchain.arch_var.as_str(),
    ])
    .restore_on_drop();

    dist::clear_previous_builds(&config.output_root)?;

    output::action(
        "Starting",
        &format!("build in {}", config.project_dir.display()),
    );

    let summary = run_all(config, targets)?;

    drop(restore);

    let _ = write_summary(
        &mut std::io::stderr(),
        &summary,
        &config.output_root,
        output::stderr_is_tty(),
    );

    Ok(summary)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::Toolchain;
    use tempfile::TempDir;

    /// Helper: a project directory named `app` whose toolchain is an inline
    /// `sh` script. The script sees the target in `GOOS`/`GOARCH` and any
    /// output flag arguments as `$1`/`$2`.
    fn project_with_script(script: &str) -> (TempDir, BuildConfig) {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("app");
        std::fs::create_dir_all(&dir).unwrap();

        let mut config = BuildConfig::for_project(&dir).unwrap();
        config.toolchain = Toolchain {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "sh".to_string()],
            ..Toolchain::default()
        };
        (tmp, config)
    }

    const WRITE_ARTIFACT: &str = r#"
out="app"
[ "$GOOS" = "windows" ] && out="app.exe"
[ "$1" = "-o" ] && out="$2"
printf '%s_%s' "$GOOS" "$GOARCH" > "$out"
"#;

    #[test]
    fn stage_display_names_the_step() {
        assert_eq!(BuildStage::Invoke.to_string(), "running build command");
        assert_eq!(BuildStage::Relocate.to_string(), "moving artifact");
    }

    #[test]
    fn summary_counts_built_and_failed() {
        let summary = RunSummary {
            reports: vec![
                TargetReport {
                    target: BuildTarget::new("linux", "amd64"),
                    outcome: BuildOutcome::Built {
                        artifact: PathBuf::from("dist/linux_amd64/app"),
                    },
                },
                TargetReport {
                    target: BuildTarget::new("linux", "386"),
                    outcome: BuildOutcome::Failed {
                        stage: BuildStage::Invoke,
                        error: "boom".to_string(),
                    },
                },
            ],
        };
        assert_eq!(summary.total(), 2);
        assert_eq!(summary.built(), 1);
        assert_eq!(summary.failed().count(), 1);
    }

    #[test]
    fn summary_reports_count_and_failed_steps() {
        let summary = RunSummary {
            reports: vec![
                TargetReport {
                    target: BuildTarget::new("linux", "amd64"),
                    outcome: BuildOutcome::Built {
                        artifact: PathBuf::from("dist/linux_amd64/app"),
                    },
                },
                TargetReport {
                    target: BuildTarget::new("windows", "386"),
                    outcome: BuildOutcome::Failed {
                        stage: BuildStage::Invoke,
                        error: "exit status: 2".to_string(),
                    },
                },
                TargetReport {
                    target: BuildTarget::new("darwin", "amd64"),
                    outcome: BuildOutcome::Failed {
                        stage: BuildStage::Relocate,
                        error: "none was produced".to_string(),
                    },
                },
            ],
        };

        let mut buf = Vec::new();
        write_summary(&mut buf, &summary, Path::new("/work/app/dist"), false).unwrap();
        let out = String::from_utf8(buf).unwrap();

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines,
            vec![
                "        Done built 1 of 3 targets; artifacts are under '/work/app/dist'",
                "             windows_386 failed while running build command",
                "             darwin_amd64 failed while moving artifact",
            ]
        );
    }

    #[test]
    fn summary_without_failures_is_single_line() {
        let summary = RunSummary {
            reports: vec![TargetReport {
                target: BuildTarget::new("linux", "386"),
                outcome: BuildOutcome::Built {
                    artifact: PathBuf::from("dist/linux_386/app"),
                },
            }],
        };

        let mut buf = Vec::new();
        write_summary(&mut buf, &summary, Path::new("dist"), false).unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert_eq!(out, "        Done built 1 of 1 targets; artifacts are under 'dist'\n");
    }

    #[test]
    fn run_all_with_no_targets_is_empty() {
        let (_tmp, config) = project_with_script("exit 0");
        let summary = run_all(&config, &[]).unwrap();
        assert_eq!(summary, RunSummary::default());
    }

    #[cfg(unix)]
    #[test]
    fn build_one_moves_artifact_into_target_dir() {
        let (_tmp, config) = project_with_script(WRITE_ARTIFACT);
        let target = BuildTarget::new("windows", "amd64");

        let outcome = build_one(&config, &target, None);

        let expected = config.output_root.join("windows_amd64").join("app.exe");
        assert_eq!(
            outcome,
            BuildOutcome::Built {
                artifact: expected.clone()
            }
        );
        assert_eq!(std::fs::read_to_string(&expected).unwrap(), "windows_amd64");
        assert!(!config.project_dir.join("app.exe").exists());
    }

    #[cfg(unix)]
    #[test]
    fn build_one_failure_leaves_no_artifact() {
        let (_tmp, config) = project_with_script("echo 'cannot find main module' >&2; exit 1");
        let target = BuildTarget::new("linux", "386");

        let outcome = build_one(&config, &target, None);

        match outcome {
            BuildOutcome::Failed { stage, error } => {
                assert_eq!(stage, BuildStage::Invoke);
                assert!(error.contains("cannot find main module"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        let dir = config.output_root.join("linux_386");
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn build_one_reports_missing_artifact_as_relocate_failure() {
        let (_tmp, config) = project_with_script("exit 0");
        let target = BuildTarget::new("darwin", "amd64");

        let outcome = build_one(&config, &target, None);

        assert!(matches!(
            outcome,
            BuildOutcome::Failed {
                stage: BuildStage::Relocate,
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn build_one_with_staging_passes_output_flag() {
        let (tmp, config) = project_with_script(WRITE_ARTIFACT);
        let staging = tmp.path().join("staging");
        let target = BuildTarget::new("linux", "amd64");

        let outcome = build_one(&config, &target, Some(&staging));

        assert!(outcome.is_built());
        assert_eq!(
            std::fs::read_to_string(config.output_root.join("linux_amd64/app")).unwrap(),
            "linux_amd64"
        );
        assert!(!staging.join("linux_amd64/app").exists());
        assert!(!config.project_dir.join("app").exists());
    }

    #[cfg(unix)]
    #[test]
    fn run_all_preserves_matrix_order_in_parallel() {
        let (_tmp, mut config) = project_with_script(WRITE_ARTIFACT);
        config.jobs = 3;
        let targets =
            crate::matrix::enumerate_targets(&config.systems, &config.architectures, None, None);

        let summary = run_all(&config, &targets).unwrap();

        let order: Vec<_> = summary.reports.iter().map(|r| r.target.clone()).collect();
        assert_eq!(order, targets);
        assert_eq!(summary.built(), 6);

        // Staging directories are cleaned up.
        let leftovers: Vec<_> = std::fs::read_dir(&config.project_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(STAGING_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }
}
