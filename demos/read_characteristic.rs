//! Connect to a device and read or write one characteristic
//!
//! Run with: cargo run --example read_characteristic -- <ADDRESS> <UUID> [VALUE]
//!
//! Without VALUE the characteristic is read as a uint8. With VALUE it is
//! written as a uint8 and read back.

use gatttool_client::{
    AdapterConfig, DataFormat, DeviceAddress, Error, Result, Session, SessionEvent,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with trace level to see every gatttool line
    tracing_subscriber::fmt()
        .with_env_filter("gatttool_client=trace")
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(address), Some(uuid)) = (args.next(), args.next()) else {
        eprintln!("usage: read_characteristic <ADDRESS> <UUID> [VALUE]");
        return Ok(());
    };
    let address: DeviceAddress = address.parse()?;
    let value = args
        .next()
        .map(|v| {
            v.parse::<u8>().map_err(|_| Error::InvalidParameter {
                name: "value".to_string(),
                value: v,
            })
        })
        .transpose()?;

    let session = Session::new(address, AdapterConfig::from_env());

    let _disconnected = session.on_disconnected(|| println!("[WARN] Device disconnected"));
    let _errors = session.on_error(|message| println!("[ERROR] {}", message));

    println!("[INFO] Connecting to {}...", address);
    session.connect(Duration::from_secs(10)).await?;

    println!("[INFO] Characteristics:");
    for characteristic in session.characteristics() {
        println!("  {}", characteristic);
    }

    if let Some(value) = value {
        println!("[INFO] Writing {} to {}", value, uuid);
        session
            .set(uuid.as_str(), DataFormat::UInt8, value, Session::DEFAULT_TIMEOUT)
            .await?;
    }

    let read = session
        .get(uuid.as_str(), DataFormat::UInt8, Session::DEFAULT_TIMEOUT)
        .await?;
    println!("[INFO] {} = {}", uuid, read);

    // Watch the link for a few seconds before leaving
    let mut events = session.subscribe();
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(3)) => {}
        Ok(SessionEvent::Disconnected) = events.recv() => {}
    }

    session.disconnect().await?;
    println!("[INFO] Done");

    Ok(())
}
