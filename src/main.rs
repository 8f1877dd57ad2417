//! download-watch - Binary Entry Point
//!
//! Follows the download server's event stream and prints every delivered
//! message as one JSON line on stdout.

use download_stream::{EventStreamClient, StreamConfig, StreamMessage};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = StreamConfig::from_env()?;
    info!(
        "{} v{} watching {}",
        download_stream::NAME,
        download_stream::VERSION,
        config.events_url()?
    );

    let client = EventStreamClient::spawn(&config)?;
    client.connect(print_message)?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    client.shutdown().await;
    Ok(())
}

fn print_message(message: StreamMessage) {
    match serde_json::to_string(&message) {
        Ok(line) => println!("{}", line),
        Err(e) => error!(error = %e, "Failed to encode message"),
    }
}
