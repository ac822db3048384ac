use crate::brokers::{self, CheckBrokersArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use vote_receiver::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "vote-receiver",
    about = "Accept votes over HTTP and hand them to Kafka",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Probe the configured brokers and print a per-broker health report
    CheckBrokers(CheckBrokersArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::CheckBrokers(args) => brokers::run_check(args).await,
    }
}
