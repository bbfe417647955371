//! `llamactl` entry point.

use clap::Parser;

use llamactl_cli::{Cli, Commands, handlers, init_tracing, load_config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            listen,
            no_autostart,
        } => handlers::serve::execute(&config, listen, !no_autostart).await?,
        Commands::Call {
            event,
            payload,
            connect,
        } => handlers::call::execute(&config, &event, payload.as_deref(), connect).await?,
        Commands::Watch { stream, connect } => {
            handlers::watch::execute(&config, stream, connect).await?;
        }
        Commands::Args => handlers::args::execute(&config.server),
    }

    Ok(())
}
