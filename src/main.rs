mod cli;
mod commands;
mod output;

use clap::Parser;
use tracing::{error, info};

use cli::{Cli, Commands};
use output::OutputWriter;
use tms_deploy::DeployConfig;
use tms_deploy::error::Result;
use tms_deploy::logging::{self, FileLogger};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let (config, source) =
        DeployConfig::resolve(cli.config.as_deref(), commands::process_env)?;
    let writer = OutputWriter::new(cli.output);

    // Only the long-running supervisor writes a log file; it must stay alive
    // until the process exits.
    let _log_guard = match &cli.command {
        Commands::Start => Some(logging::setup_logging_with_file(
            cli.log_level.as_deref(),
            &FileLogger::new(config.app.log_dir.clone()),
        )?),
        _ => {
            logging::setup_logging(cli.log_level.as_deref())?;
            None
        }
    };
    // Resolution ran before any subscriber existed; report it now.
    match &source {
        Some(path) => info!(path = %path.display(), "Using config file"),
        None => info!("No config file found, using defaults"),
    }

    match cli.command {
        Commands::Start => commands::start::execute(config).await,
        Commands::Stop(args) => commands::stop::execute(args, &config, &writer).await,
        Commands::Status => commands::status::execute(&config, &writer).await,
        Commands::Validate => commands::validate::execute(
            &config,
            source.map(|p| p.display().to_string()),
            &writer,
        ),
        Commands::Notify(args) => commands::notify::execute(args, &config, &writer).await,
    }
}
