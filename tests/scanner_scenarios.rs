//! Discovery scenarios against a scripted stand-in for `hcitool lescan`.

#![cfg(unix)]

use std::time::Duration;

use futures::StreamExt;
use gatttool_client::{
    AdapterConfig, ContinuousOptions, DeviceAddress, DiscoveryOptions, Error, Scanner, ToolCommand,
};
use pretty_assertions::assert_eq;
use regex::Regex;
use tokio_test::assert_ok;

fn fake_hcitool(script: &str) -> Scanner {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let tool = ToolCommand::new("sh").with_leading_args(["-c", script, "fake-hcitool"]);
    Scanner::new(AdapterConfig::default().with_scan_tool(tool))
}

fn addr(text: &str) -> DeviceAddress {
    text.parse().unwrap()
}

const TWO_DEVICES: &str = r#"
echo "LE Scan ..."
echo "C4:7C:8D:6A:1F:0E (unknown)"
echo "c4:7c:8d:6a:1f:0e LampA"
echo "AA:BB:CC:DD:EE:FF (unknown)"
echo "C4:7C:8D:6A:1F:0E LampA"
exec sleep 10
"#;

#[tokio::test]
async fn test_discovery_deduplicates() {
    let scanner = fake_hcitool(TWO_DEVICES);
    let options = DiscoveryOptions::default().with_min_duration(Duration::from_millis(300));

    let mut reported = Vec::new();
    let discovery = assert_ok!(scanner.discover(&options, |a| reported.push(*a)).await);

    let expected = vec![addr("C4:7C:8D:6A:1F:0E"), addr("AA:BB:CC:DD:EE:FF")];
    assert_eq!(discovery.devices, expected);
    assert_eq!(reported, expected);
    assert!(!discovery.cancelled);
    assert!(discovery.elapsed < Duration::from_secs(2));
    assert!(!scanner.is_discovering());
}

#[tokio::test]
async fn test_discovery_filter() {
    let scanner = fake_hcitool(TWO_DEVICES);
    let options = DiscoveryOptions::default()
        .with_min_duration(Duration::from_millis(300))
        .with_filter(Regex::new("^AA:BB:").unwrap());

    let devices = assert_ok!(scanner.scan(&options).await);
    assert_eq!(devices, vec![addr("AA:BB:CC:DD:EE:FF")]);
}

#[tokio::test]
async fn test_discovery_runs_until_max_duration() {
    let scanner = fake_hcitool("exec sleep 10");
    let options = DiscoveryOptions::default().with_max_duration(Duration::from_millis(400));

    let discovery = assert_ok!(scanner.discover(&options, |_| {}).await);
    assert!(discovery.devices.is_empty());
    assert!(discovery.elapsed >= Duration::from_millis(400));
    assert!(discovery.elapsed < Duration::from_secs(5));
}

#[tokio::test]
async fn test_discovery_tool_failure() {
    let scanner = fake_hcitool(
        r#"echo "Set scan parameters failed: Input/output error" >&2; exit 1"#,
    );

    match scanner.scan(&DiscoveryOptions::default()).await {
        Err(Error::ProcessExitedUnexpectedly { code }) => assert_eq!(code, Some(1)),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_stop_discovery() {
    let scanner = fake_hcitool("exec sleep 10");
    let options = DiscoveryOptions::default().with_max_duration(Duration::from_secs(10));

    let stopper = scanner.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        stopper.stop_discovery();
    });

    let discovery = assert_ok!(scanner.discover(&options, |_| {}).await);
    assert!(discovery.cancelled);
    assert!(discovery.elapsed < Duration::from_secs(5));
}

#[tokio::test]
async fn test_find_device() {
    let single = fake_hcitool("echo 'C4:7C:8D:6A:1F:0E LampA'; exec sleep 10");
    let found = assert_ok!(single.find_device(&DiscoveryOptions::default()).await);
    assert_eq!(found, addr("C4:7C:8D:6A:1F:0E"));

    let none = fake_hcitool("exec sleep 10");
    let options = DiscoveryOptions::default().with_max_duration(Duration::from_millis(300));
    assert!(matches!(
        none.find_device(&options).await,
        Err(Error::DeviceNotFound)
    ));

    let many = fake_hcitool(TWO_DEVICES);
    let options = DiscoveryOptions::default().with_min_duration(Duration::from_millis(300));
    match many.find_device(&options).await {
        Err(Error::MultipleDevices { addresses }) => {
            assert_eq!(addresses, vec!["C4:7C:8D:6A:1F:0E", "AA:BB:CC:DD:EE:FF"])
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_continuous_discovery_debounces() {
    let scanner = fake_hcitool(TWO_DEVICES);
    let options = ContinuousOptions::default().with_debounce(Duration::from_secs(60));
    let mut discovery = scanner.continuous(options);

    let first = assert_ok!(discovery.next().await.unwrap());
    let second = assert_ok!(discovery.next().await.unwrap());
    assert_eq!(
        vec![first, second],
        vec![addr("C4:7C:8D:6A:1F:0E"), addr("AA:BB:CC:DD:EE:FF")]
    );

    // Both devices keep showing up but are inside the debounce interval.
    let stopper = scanner.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        stopper.stop_discovery();
    });
    assert!(discovery.next().await.is_none());
}

#[tokio::test]
async fn test_continuous_stream_reports_again_after_debounce() {
    let scanner = fake_hcitool("echo 'C4:7C:8D:6A:1F:0E LampA'; exec sleep 10");
    let options = ContinuousOptions::default().with_debounce(Duration::ZERO);

    let devices: Vec<_> = scanner.continuous(options).into_stream().take(2).collect().await;
    assert_eq!(devices.len(), 2);
    for device in devices {
        assert_eq!(assert_ok!(device), addr("C4:7C:8D:6A:1F:0E"));
    }
}
