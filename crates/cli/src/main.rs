mod cmd;
mod output;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::output::print_error;

/// procbuild - build nuclio processors from function sources
#[derive(Parser)]
#[command(name = "procbuild")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build a function into a processor image or binary
  Build(cmd::BuildArgs),
}

fn init_tracing(verbose: bool) {
  let default = if verbose {
    "procbuild=debug,procbuild_lib=debug"
  } else {
    "procbuild=info,procbuild_lib=info"
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let result = match cli.command {
    Commands::Build(args) => cmd::cmd_build(args, cli.verbose),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      // library errors already carry their causes in the message
      let message = match err.chain().nth(1) {
        Some(cause) => format!("{}: {}", err, cause),
        None => err.to_string(),
      };
      print_error(&message);
      ExitCode::FAILURE
    }
  }
}
