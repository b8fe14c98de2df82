use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Load mailed meter readings into PostgreSQL", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Harvest labeled mail, normalize spreadsheets, then apply pending batches
    Run(RunArgs),
    /// Apply and archive pending statement batches without touching mail
    Sweep(SweepArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Pipeline settings file (YAML)
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,
}

#[derive(Debug, Args)]
pub struct SweepArgs {
    /// Pipeline settings file (YAML)
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,
}
