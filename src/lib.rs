pub mod cli;
pub mod config;
pub mod data;
pub mod execute;
pub mod extract;
pub mod mail;
pub mod normalize;
pub mod pipeline;
pub mod sheet;
pub mod statement;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use crate::cli::{Cli, Commands};
use crate::config::Settings;

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("mailmeter", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => handle_run(&args),
        Commands::Sweep(args) => handle_sweep(&args),
    }
}

fn handle_run(args: &cli::RunArgs) -> Result<()> {
    let settings = Settings::load(&args.config)?;
    let source = mail::MaildirSource::new(&settings.mail.root, &settings.mail.label);
    pipeline::run_pipeline(&settings, &source, || {
        execute::PgExecutor::connect(&settings.database)
    })
}

fn handle_sweep(args: &cli::SweepArgs) -> Result<()> {
    let settings = Settings::load(&args.config)?;
    let mut executor = execute::PgExecutor::connect(&settings.database)?;
    pipeline::run_sweep(&settings, &mut executor)
}
