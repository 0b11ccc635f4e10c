//! Continuously report devices as they appear
//!
//! Run with: cargo run --example continuous_scan
//!
//! A device is reported again once it has gone unseen for the debounce
//! interval.

use futures::StreamExt;
use gatttool_client::{AdapterConfig, ContinuousOptions, Result, Scanner};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gatttool_client=info".parse().unwrap()),
        )
        .init();

    let scanner = Scanner::new(AdapterConfig::from_env());
    let options = ContinuousOptions::default().with_debounce(Duration::from_secs(10));

    let stopper = scanner.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nStopping...");
            stopper.stop_discovery();
        }
    });

    println!("Watching for devices. Press Ctrl+C to exit.\n");

    let mut devices = Box::pin(scanner.continuous(options).into_stream());
    while let Some(device) = devices.next().await {
        match device {
            Ok(address) => println!("  {}", address),
            Err(e) => println!("  discovery round failed: {}", e),
        }
    }

    println!("Done!");
    Ok(())
}
