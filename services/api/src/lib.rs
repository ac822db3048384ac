mod brokers;
mod cli;
mod infra;
mod routes;
mod server;

use vote_receiver::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
