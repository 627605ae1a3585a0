//! Basic example - connecting, sending commands and watching events

use cdp::{Event, Socket, SocketConfig};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = SocketConfig::default()
        .with_url("ws://localhost:9222/devtools/browser")
        .with_command_timeout(Duration::from_secs(10));
    println!("Connecting to Chrome at: {}", config.url);

    let socket = Socket::connect(config).await?;
    println!("Connected!");

    let version = socket.call("Browser.getVersion", None).await?;
    println!("Browser version: {}", version);

    // Subscribe to target events
    let handler = socket.add_event_handler(
        "Target.targetCreated",
        Arc::new(|event: &Event| {
            println!("Target created: {}", event.params);
        }),
    );
    socket
        .call(
            "Target.setDiscoverTargets",
            Some(serde_json::json!({ "discover": true })),
        )
        .await?;

    let targets = socket.call("Target.getTargets", None).await?;
    println!("Targets: {}", targets);

    // Keep alive for a bit to see events
    tokio::time::sleep(Duration::from_secs(2)).await;
    socket.remove_event_handler("Target.targetCreated", handler);

    // Clean shutdown
    socket.close().await?;
    println!("Disconnected");

    Ok(())
}
