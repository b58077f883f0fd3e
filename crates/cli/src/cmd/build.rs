//! Implementation of the `procbuild build` command.
//!
//! Builds a function into a processor image (the default) or a standalone
//! processor binary, using the local docker daemon.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tracing::debug;

use procbuild_lib::backend::DockerCli;
use procbuild_lib::cmd::CmdRunner;
use procbuild_lib::workspace::PlatformSource;
use procbuild_lib::{BuildError, BuildOptions, BuildReport, Builder, OutputKind};

use crate::output::{format_duration, print_info, print_stat, print_success, print_warning};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputArg {
  #[default]
  Docker,
  Binary,
}

impl From<OutputArg> for OutputKind {
  fn from(arg: OutputArg) -> Self {
    match arg {
      OutputArg::Docker => OutputKind::Docker,
      OutputArg::Binary => OutputKind::Binary,
    }
  }
}

#[derive(Debug, Args)]
pub struct BuildArgs {
  /// Function directory, or a source file inside it
  pub path: PathBuf,

  /// What to produce
  #[arg(short, long, value_enum, default_value_t = OutputArg::Docker)]
  pub output: OutputArg,

  /// Image name or binary path (derived from the function name by default)
  #[arg(short = 'n', long)]
  pub name: Option<String>,

  /// Version appended to the output name
  #[arg(long, default_value = "latest")]
  pub version: String,

  /// Local nuclio source tree to build against
  #[arg(long, value_name = "DIR", conflicts_with = "nuclio_src_url")]
  pub nuclio_src_dir: Option<PathBuf>,

  /// nuclio git repository to clone, optionally followed by #REF
  #[arg(long, value_name = "URL")]
  pub nuclio_src_url: Option<String>,

  /// Registry to push the image to
  #[arg(long, value_name = "REGISTRY")]
  pub push: Option<String>,

  /// Keep the build workspace on disk for inspection
  #[arg(long)]
  pub keep_workspace: bool,

  /// Timeout for each external command, in seconds
  #[arg(long, value_name = "SECS")]
  pub timeout: Option<u64>,
}

impl BuildArgs {
  pub fn into_options(self, verbose: bool) -> BuildOptions {
    let platform_source = match (self.nuclio_src_dir, self.nuclio_src_url) {
      (Some(dir), _) => PlatformSource::LocalDir(dir),
      (None, Some(url)) => PlatformSource::remote(&url),
      (None, None) => PlatformSource::default(),
    };

    let mut options = BuildOptions::new(self.path);
    options.output = self.output.into();
    options.output_name = self.name;
    options.version = self.version;
    options.platform_source = platform_source;
    options.push_registry = self.push;
    options.verbose = verbose;
    options.keep_workspace = self.keep_workspace;
    options.command_timeout = self.timeout.map(Duration::from_secs);
    options
  }
}

/// Execute the build command.
pub fn cmd_build(args: BuildArgs, verbose: bool) -> Result<()> {
  let options = args.into_options(verbose);
  options.validate().context("Invalid build options")?;
  debug!(?options, "build options");

  let started = Instant::now();
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt.block_on(async {
    let docker = DockerCli::connect(CmdRunner::with_timeout(options.command_timeout))
      .await
      .context("Docker is not available")?;

    let builder = Builder::new(docker);
    builder.build(&options).await.map_err(|err| {
      report_cleanup_failures(&err);
      anyhow::Error::new(err).context("Build failed")
    })
  })?;

  print_report(&report, started.elapsed());
  Ok(())
}

fn print_report(report: &BuildReport, elapsed: Duration) {
  let what = match report.kind {
    OutputKind::Docker => "image",
    OutputKind::Binary => "binary",
  };
  print_success(&format!("Built {} {}", what, report.output_name));
  print_stat("Function", &report.function_name);
  print_stat("Handler", &report.handler);
  if let Some(pushed) = &report.pushed {
    print_stat("Pushed", pushed);
  }
  print_stat("Took", &format_duration(elapsed));

  if !report.cleanup.removed.is_empty() {
    print_info(&format!("Removed {} builder container(s)", report.cleanup.removed.len()));
  }
  for failure in &report.cleanup.failures {
    print_warning(&format!("Cleanup: {}", failure.message));
  }
}

fn report_cleanup_failures(err: &BuildError) {
  let Some(cleanup) = err.cleanup() else {
    return;
  };
  for failure in &cleanup.failures {
    print_warning(&format!("Cleanup: {}", failure.message));
  }
}
