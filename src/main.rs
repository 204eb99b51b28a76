use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use card_lobby_client::client::{
    register_handlers, ClientRuntime, Command, LobbyClient, LogFrontend, LOCAL_COMMAND,
};
use card_lobby_client::config::ClientConfig;
use card_lobby_client::metrics::Metrics;
use card_lobby_client::net::dispatch::{Dispatcher, QueueSender};
use card_lobby_client::net::protocol::Envelope;
use card_lobby_client::net::transport::{outbound_channel, run_connection};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Card Lobby Client v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::load_or_default();
    config.validate()?;
    info!(
        "Configuration loaded: server={}, user={}, blocked={}",
        config.server_addr(),
        config.username,
        config.blocked_users.len()
    );

    let metrics = Arc::new(Metrics::new());

    #[cfg(feature = "metrics_server")]
    if let Some(port) = config.metrics_port {
        let metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = card_lobby_client::metrics::start_metrics_server(metrics, port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    // Inbound queue and its single consumer
    let (mut dispatcher, queue) = Dispatcher::new(config.queue_capacity);
    register_handlers(&mut dispatcher)?;

    let (outbound, outbound_rx) = outbound_channel();
    let client = LobbyClient::new(config.viewer(), metrics.clone())
        .with_lobby_sounds(config.lobby_sounds);
    let mut runtime = ClientRuntime::new(client, LogFrontend, outbound);

    let stop = Arc::new(AtomicBool::new(false));
    let consumer = {
        let stop = stop.clone();
        std::thread::Builder::new()
            .name("lobby-dispatch".to_string())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed)
                    && dispatcher.dispatch_next(&mut runtime, Duration::from_millis(100))
                {}
            })?
    };

    // Detached: a blocking stdin read must not hold up shutdown
    let commands = queue.clone();
    std::thread::Builder::new()
        .name("lobby-stdin".to_string())
        .spawn(move || read_commands(commands))?;

    let mut connection = tokio::spawn(run_connection(
        config.server_addr(),
        config.reconnect_delay,
        queue,
        outbound_rx,
        metrics.clone(),
    ));

    tokio::select! {
        result = &mut connection => {
            match result {
                Ok(Ok(())) => info!("Connection closed"),
                Ok(Err(e)) => error!("Connection error: {:#}", e),
                Err(e) => error!("Connection task failed: {}", e),
            }
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Shutting down...");
        }
    }

    stop.store(true, Ordering::Relaxed);
    connection.abort();
    tokio::task::spawn_blocking(move || {
        if consumer.join().is_err() {
            error!("Dispatch thread panicked");
        }
    })
    .await?;

    info!("Client stopped");
    Ok(())
}

/// Forward stdin command lines into the inbound queue
fn read_commands(queue: QueueSender) {
    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read command: {}", e);
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };
        let data = match serde_json::to_value(&command) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to encode command: {}", e);
                continue;
            }
        };
        if queue.post_blocking(Envelope::new(LOCAL_COMMAND, data)).is_err() {
            return;
        }
    }
}
