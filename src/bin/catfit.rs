//! Command-line driver for the per-category fits, workspace checks and datacards.

use std::path::PathBuf;

use catfit::{config::AnalysisConfig, pipeline::Pipeline, CatfitResult};
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "catfit",
    version,
    about = "Signal-plus-background fits and datacards per analysis category"
)]
struct Cli {
    /// TOML configuration file (built-in defaults when omitted)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory receiving workspaces, plots and datacards
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Fit every category and write its plot and workspace
    Fit,
    /// Read every workspace back and report the fitted signal shape
    Check,
    /// Write every category's datacard
    Cards,
    /// Fit, check, then write the datacards
    All,
}

fn run(cli: Cli) -> CatfitResult<()> {
    let config = match &cli.config {
        Some(path) => AnalysisConfig::from_toml_file(path)?,
        None => AnalysisConfig::default(),
    };
    let pipeline = Pipeline::new(config, &cli.output_dir);
    match cli.command {
        Command::Fit => {
            pipeline.do_initial_fits()?;
        }
        Command::Check => {
            pipeline.check()?;
        }
        Command::Cards => {
            pipeline.make_cards()?;
        }
        Command::All => {
            pipeline.do_initial_fits()?;
            pipeline.check()?;
            pipeline.make_cards()?;
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        error!("{err}");
        std::process::exit(1);
    }
}
