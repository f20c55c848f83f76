//! Tessera CLI
//!
//! Runs the handle microbenchmarks and reports how the engine is configured.

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about = "Tessera handle ABI engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the call microbenchmarks through a context
    Bench {
        /// Context to run under (universal, debug, trace)
        #[arg(short, long, default_value = "universal")]
        mode: String,

        /// Calls per workload
        #[arg(short = 'n', long, default_value = "100000")]
        iterations: usize,

        /// Only run workloads whose name contains this string
        #[arg(long)]
        filter: Option<String>,

        /// Output results as JSON
        #[arg(long)]
        json: bool,

        /// Engine configuration file (TOML)
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Display ABI version and resolved engine configuration
    Info {
        /// Engine configuration file (TOML)
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Bench {
            mode,
            iterations,
            filter,
            json,
            config,
        } => commands::bench::execute(&mode, iterations, filter, json, config),

        Commands::Info { config } => commands::info::execute(config),
    }
}
