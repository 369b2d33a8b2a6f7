use anyhow::{Context, Result};
use builder_cli::config::{BuildConfig, CliOverrides, ProjectConfig};
use builder_cli::{driver, matrix, output};
use clap::Parser;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process;

/// Builder: cross-compile the current project for every OS/architecture pair.
///
/// Runs the build command once per target with the target's OS and
/// architecture selected, and collects the artifacts under
/// `dist/<os>_<arch>/`.
#[derive(Parser, Debug)]
#[command(
    name = "builder",
    version,
    about,
    after_help = "Examples:\n  builder\n  builder -for linux\n  builder --for windows --arch 386\n  builder --jobs 4 --out release\n  builder --list"
)]
struct Cli {
    /// Only build for this operating system (ignored if unsupported).
    #[arg(long = "for", value_name = "OS")]
    target_os: Option<String>,

    /// Only build for this architecture (ignored if unsupported).
    #[arg(long, value_name = "ARCH")]
    arch: Option<String>,

    /// Output directory, relative to the project directory.
    #[arg(long, value_name = "DIR")]
    out: Option<String>,

    /// Number of builds to run at once.
    #[arg(short, long, value_name = "N")]
    jobs: Option<usize>,

    /// Config file to use instead of ./builder.toml.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the build matrix and exit without building.
    #[arg(long)]
    list: bool,

    /// Print build commands and other detail.
    #[arg(short, long)]
    verbose: bool,
}

/// Long flags that are also accepted with a single dash, e.g. `-for linux`.
const LEGACY_FLAGS: &[&str] = &["for", "arch", "out", "jobs", "config", "list", "verbose"];

/// Rewrite single-dash long flags (`-for`, `-arch=amd64`) to their double-dash
/// form so they parse like `--for` / `--arch=amd64`.
///
/// Short flags such as `-j` and `-v` are left alone, as is everything after
/// a bare `--`.
fn normalize_legacy_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut passthrough = false;
    args.into_iter()
        .map(|arg| {
            if passthrough {
                return arg;
            }
            let Some(s) = arg.to_str() else {
                return arg;
            };
            if s == "--" {
                passthrough = true;
                return arg;
            }
            match s.strip_prefix('-') {
                Some(rest) if !rest.starts_with('-') => {
                    let name = rest.split_once('=').map_or(rest, |(name, _)| name);
                    if LEGACY_FLAGS.contains(&name) {
                        OsString::from(format!("-{s}"))
                    } else {
                        arg
                    }
                }
                _ => arg,
            }
        })
        .collect()
}

/// Load the project config and resolve it with the command-line overrides.
fn load_build_config(cli: &Cli, project_dir: &Path) -> Result<BuildConfig> {
    let file = match &cli.config {
        Some(path) => ProjectConfig::load_required(&project_dir.join(path))?,
        None => ProjectConfig::load_from(&ProjectConfig::path_in(project_dir))?,
    };
    let overrides = CliOverrides {
        output_dir: cli.out.clone(),
        jobs: cli.jobs,
    };
    BuildConfig::resolve(project_dir, file, &overrides)
}

fn run(cli: Cli) -> Result<()> {
    let project_dir =
        std::env::current_dir().context("failed to read the current working directory")?;
    let config = load_build_config(&cli, &project_dir)?;

    let targets = matrix::enumerate_targets(
        &config.systems,
        &config.architectures,
        cli.target_os.as_deref(),
        cli.arch.as_deref(),
    );

    if cli.list {
        for target in &targets {
            println!("{target}");
        }
        return Ok(());
    }

    driver::run(&config, &targets)?;
    Ok(())
}

fn main() {
    let cli = Cli::parse_from(normalize_legacy_args(std::env::args_os()));
    output::set_verbose(cli.verbose);

    if let Err(e) = run(cli) {
        output::fail("Failed", &format!("{e:#}"));
        process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
