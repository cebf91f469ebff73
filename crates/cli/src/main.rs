//! filenotifier CLI - fnotify command

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

mod cmd;

/// fnotify - Report file changes under watched directory trees
#[derive(Parser)]
#[command(name = "fnotify")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct OutputArgs {
    /// Print events as JSON objects
    #[arg(long, conflicts_with = "timestamps")]
    json: bool,

    /// Prefix each event line with the local time
    #[arg(long)]
    timestamps: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation pass per enabled channel
    Scan {
        /// Channel configuration file (TOML)
        config: PathBuf,

        #[command(flatten)]
        output: OutputArgs,
    },
    /// Reconcile, then watch for native events until Ctrl-C
    Watch {
        /// Channel configuration file (TOML)
        config: PathBuf,

        #[command(flatten)]
        output: OutputArgs,
    },
    /// Validate a configuration file
    Check {
        /// Channel configuration file (TOML)
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    // Events go to stdout, so logs stay on stderr
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Scan { config, output } => {
            cmd::scan::run(&config, output.format())
        }
        Commands::Watch { config, output } => {
            cmd::watch::run(&config, output.format())
        }
        Commands::Check { config } => cmd::check::run(&config),
    }
}

impl OutputArgs {
    fn format(&self) -> notifier_cli::LineFormat {
        if self.json {
            notifier_cli::LineFormat::Json
        } else {
            notifier_cli::LineFormat::Text {
                timestamps: self.timestamps,
            }
        }
    }
}
