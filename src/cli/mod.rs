mod measure;
mod output;
mod provision;
mod publish;

pub(crate) use output::{output_json, OutputFormat};

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;

// Perf Publish builds the CLI packages and ships them to the performance test machines
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the python environment and install the CLI packages into it
    Provision(provision::Params),
    /// Build the packages, bundle them and upload the bundle to blob storage
    Publish(publish::Params),
    /// Time repeated runs of a command inside the python environment
    Measure(measure::Params),
}

impl Cli {
    pub fn run() -> Result<()> {
        let cli = Cli::parse();
        match cli.command {
            Commands::Provision(args) => provision::execute(args),
            Commands::Publish(args) => publish::execute(args),
            Commands::Measure(args) => measure::execute(args),
        }
    }
}
