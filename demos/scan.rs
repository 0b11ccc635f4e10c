//! Basic example: Discover nearby BLE devices
//!
//! Run with: cargo run --example scan [FILTER_REGEX]
//!
//! Set HCITOOL_PATH or HCI_DEVICE to override the tool or adapter.

use gatttool_client::{AdapterConfig, DiscoveryOptions, Result, Scanner};
use regex::Regex;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gatttool_client=debug".parse().unwrap()),
        )
        .init();

    let mut options = DiscoveryOptions::default().with_max_duration(Duration::from_secs(5));
    if let Some(pattern) = std::env::args().nth(1) {
        let filter = Regex::new(&pattern).map_err(|e| gatttool_client::Error::InvalidParameter {
            name: "filter".to_string(),
            value: e.to_string(),
        })?;
        options = options.with_filter(filter);
    }

    let scanner = Scanner::new(AdapterConfig::from_env());

    println!("Scanning for {:?}...", options.max_duration);
    println!("Press Ctrl+C to stop early.\n");

    let stopper = scanner.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop_discovery();
        }
    });

    let discovery = scanner
        .discover(&options, |address| println!("  found {}", address))
        .await?;

    println!("\n--- Scan Complete ---");
    println!(
        "{} device(s) in {:.1}s{}",
        discovery.devices.len(),
        discovery.elapsed.as_secs_f32(),
        if discovery.cancelled { " (interrupted)" } else { "" }
    );

    Ok(())
}
