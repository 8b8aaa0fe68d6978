//! kafka-ctl
//!
//! Loads configuration, registers the event consumers, runs them until
//! Ctrl-C and shuts the control plane down.
//!
//! Configuration comes from the TOML file named by `KAFKA_CTL_CONFIG` when
//! set, otherwise from environment variables.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use kafka_ctl::config::Config;
use kafka_ctl::{KafkaEventUseCase, KafkaManager};

fn load_config() -> kafka_ctl::Result<Config> {
    match std::env::var("KAFKA_CTL_CONFIG") {
        Ok(path) => Config::from_file(path),
        Err(_) => Config::from_env(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    kafka_ctl::telemetry::init(&config.log_level);

    info!(
        brokers = ?config.kafka.brokers,
        group_id = %config.kafka.group_id,
        security = ?config.kafka.security,
        "Starting kafka-ctl"
    );

    let manager = Arc::new(KafkaManager::from_config(&config.kafka)?);
    let events = KafkaEventUseCase::new(manager.clone(), config.kafka.topics.clone());

    events.consume_user_events()?;
    events.consume_translation_events()?;

    let cancel = CancellationToken::new();
    let launched = manager.start_all(&cancel);
    info!(consumers = launched, "Consumers running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    cancel.cancel();
    if let Err(e) = manager.close().await {
        error!(error = %e, "Error during shutdown");
        return Err(e.into());
    }

    info!("kafka-ctl stopped");
    Ok(())
}
