use clap::{CommandFactory, Parser};
use proxlock::{
    Config,
    cli::{self, App},
    config::Args,
    telemetry,
};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Parse CLI args
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args)?;

    // If --validate flag is set, exit successfully after config validation
    if args.validate {
        println!("Configuration is valid.");
        return Ok(ExitCode::SUCCESS);
    }

    telemetry::init_telemetry()?;
    tracing::debug!("{:?}", args);

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(ExitCode::from(2));
    };

    let app = App::new(config)?;
    let succeeded = app.execute(command).await;
    cli::print_notices(app.notices());

    Ok(if succeeded { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
