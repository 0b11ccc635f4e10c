//! BLE scanning functionality.
//!
//! Discovery runs `hcitool lescan` for a bounded time and collects the
//! addresses it prints. [`ContinuousDiscovery`] repeats bounded rounds and
//! reports devices that were not seen recently.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use futures::Stream;
use regex::Regex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::ble::address::DeviceAddress;
use crate::config::{AdapterConfig, ContinuousOptions, DiscoveryOptions};
use crate::error::{Error, Result};
use crate::process::{ControlProcess, OutputLine, OutputStream};

/// How often stop conditions are checked during discovery.
const DISCOVERY_TICK: Duration = Duration::from_millis(100);

static ADDRESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<address>(?:[0-9a-f]{2}:){5}[0-9a-f]{2})(?:\s.*)?$").unwrap()
});

/// Result of one bounded discovery run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Discovery {
    /// Distinct matching addresses in the order they were first seen.
    pub devices: Vec<DeviceAddress>,
    /// Whether the run was ended by [`Scanner::stop_discovery`].
    pub cancelled: bool,
    /// How long the run took.
    pub elapsed: Duration,
}

/// Device discovery through the scan tool.
///
/// Clones share the cancellation flag, so a clone can stop a discovery that
/// another clone is running.
#[derive(Debug, Clone)]
pub struct Scanner {
    config: Arc<AdapterConfig>,
    cancelled: Arc<AtomicBool>,
    discovering: Arc<AtomicBool>,
}

impl Scanner {
    /// Create a scanner for an adapter.
    pub fn new(config: AdapterConfig) -> Self {
        Self {
            config: Arc::new(config),
            cancelled: Arc::new(AtomicBool::new(false)),
            discovering: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Adapter configuration.
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Whether a discovery run is in progress.
    pub fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }

    /// Stop the running discovery at its next check.
    pub fn stop_discovery(&self) {
        debug!("Discovery stop requested");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Run one bounded discovery, calling `on_found` for each new device.
    ///
    /// # Errors
    ///
    /// - [`Error::ToolNotFound`] / [`Error::PermissionDenied`] on spawn failure
    /// - [`Error::ProcessExitedUnexpectedly`] if the scan tool fails on its own
    pub async fn discover<F>(&self, options: &DiscoveryOptions, mut on_found: F) -> Result<Discovery>
    where
        F: FnMut(&DeviceAddress),
    {
        self.cancelled.store(false, Ordering::SeqCst);
        self.discover_round(options, &mut on_found).await
    }

    /// Run one bounded discovery and return the devices found.
    pub async fn scan(&self, options: &DiscoveryOptions) -> Result<Vec<DeviceAddress>> {
        Ok(self.discover(options, |_| {}).await?.devices)
    }

    /// Discover exactly one device.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceNotFound`] if nothing matched, [`Error::MultipleDevices`]
    /// if more than one device did.
    pub async fn find_device(&self, options: &DiscoveryOptions) -> Result<DeviceAddress> {
        let devices = self.scan(options).await?;
        match devices.as_slice() {
            [] => Err(Error::DeviceNotFound),
            [device] => Ok(*device),
            _ => Err(Error::MultipleDevices {
                addresses: devices.iter().map(ToString::to_string).collect(),
            }),
        }
    }

    /// Start repeated discovery rounds.
    pub fn continuous(&self, options: ContinuousOptions) -> ContinuousDiscovery {
        ContinuousDiscovery::new(self.clone(), options)
    }

    /// Like [`discover`](Self::discover) but keeps a pending stop request.
    async fn discover_round<F>(&self, options: &DiscoveryOptions, on_found: &mut F) -> Result<Discovery>
    where
        F: FnMut(&DeviceAddress),
    {
        self.discovering.store(true, Ordering::SeqCst);
        let result = self.run_discovery(options, on_found).await;
        self.discovering.store(false, Ordering::SeqCst);
        result
    }

    async fn run_discovery<F>(&self, options: &DiscoveryOptions, on_found: &mut F) -> Result<Discovery>
    where
        F: FnMut(&DeviceAddress),
    {
        let start = Instant::now();
        let (mut process, mut lines) = ControlProcess::spawn(
            &self.config.scan_tool,
            &["-i", &self.config.hci_device, "lescan"],
        )?;

        info!(
            "Discovering devices on {} for up to {:?}",
            self.config.hci_device, options.max_duration
        );

        let mut seen = HashSet::new();
        let mut devices = Vec::new();
        let mut cancelled = false;
        let mut output_open = true;

        let mut ticker = tokio::time::interval(DISCOVERY_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                line = lines.next(), if output_open => match line {
                    Some(line) => {
                        if let Some(address) = self.match_line(&line, options) {
                            if seen.insert(address) {
                                debug!("Discovered {}", address);
                                devices.push(address);
                                on_found(&address);
                            }
                        }
                    }
                    None => output_open = false,
                },
                _ = ticker.tick() => {
                    let elapsed = start.elapsed();
                    if self.cancelled.load(Ordering::SeqCst) {
                        debug!("Discovery cancelled after {:?}", elapsed);
                        cancelled = true;
                        break;
                    }
                    if elapsed >= options.max_duration {
                        break;
                    }
                    if !devices.is_empty() && elapsed >= options.min_duration {
                        break;
                    }
                    if !output_open && process.try_exit()?.is_some() {
                        break;
                    }
                }
            }
        }

        let status = process.shutdown(self.config.timing.shutdown_grace).await?;
        let elapsed = start.elapsed();

        if !process.was_interrupted() && !cancelled && !status.success() {
            warn!("{} failed with {}", process.program(), status);
            return Err(Error::ProcessExitedUnexpectedly {
                code: status.code(),
            });
        }

        info!(
            "Discovery finished: {} device(s) in {:?}",
            devices.len(),
            elapsed
        );

        Ok(Discovery {
            devices,
            cancelled,
            elapsed,
        })
    }

    fn match_line(&self, line: &OutputLine, options: &DiscoveryOptions) -> Option<DeviceAddress> {
        if line.stream == OutputStream::Stderr {
            debug!("{} reported: {}", self.config.scan_tool.program().display(), line.text);
            return None;
        }

        let caps = ADDRESS_LINE.captures(line.text.trim_end())?;
        let address: DeviceAddress = caps.name("address")?.as_str().parse().ok()?;

        if let Some(filter) = &options.filter {
            if !filter.is_match(&address.to_string()) {
                trace!("{} does not match filter", address);
                return None;
            }
        }

        Some(address)
    }
}

/// Tracks when each device was last seen and decides whether to report it.
#[derive(Debug, Clone)]
pub(crate) struct DebounceTracker {
    interval: Duration,
    last_seen: HashMap<DeviceAddress, Instant>,
}

impl DebounceTracker {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_seen: HashMap::new(),
        }
    }

    /// Record a sighting at `now`. Returns whether it should be reported.
    pub(crate) fn observe(&mut self, address: DeviceAddress, now: Instant) -> bool {
        let report = match self.last_seen.get(&address) {
            Some(&last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        };
        self.last_seen.insert(address, now);
        report
    }
}

/// Repeated discovery rounds yielding newly seen devices.
///
/// [`next`](Self::next) returns `None` once [`Scanner::stop_discovery`]
/// interrupts it. Calling it again starts over.
#[derive(Debug)]
pub struct ContinuousDiscovery {
    scanner: Scanner,
    options: ContinuousOptions,
    tracker: DebounceTracker,
    ready: VecDeque<DeviceAddress>,
    rounds: u64,
}

impl ContinuousDiscovery {
    fn new(scanner: Scanner, options: ContinuousOptions) -> Self {
        let tracker = DebounceTracker::new(options.debounce);
        Self {
            scanner,
            options,
            tracker,
            ready: VecDeque::new(),
            rounds: 0,
        }
    }

    /// Wait for the next device to report.
    pub async fn next(&mut self) -> Option<Result<DeviceAddress>> {
        loop {
            if let Some(address) = self.ready.pop_front() {
                return Some(Ok(address));
            }

            if self.rounds == 0 {
                self.scanner.cancelled.store(false, Ordering::SeqCst);
            } else if !self.pause().await {
                return self.stop();
            }

            let round = self
                .scanner
                .discover_round(&self.options.round(), &mut |_: &DeviceAddress| {})
                .await;
            self.rounds += 1;

            match round {
                Ok(discovery) if discovery.cancelled => return self.stop(),
                Ok(discovery) => {
                    let now = Instant::now();
                    for address in discovery.devices {
                        if self.tracker.observe(address, now) {
                            self.ready.push_back(address);
                        }
                    }
                }
                Err(e) => {
                    warn!("Discovery round failed: {}", e);
                    return Some(Err(e));
                }
            }
        }
    }

    /// Adapt into a [`Stream`] of discovered devices.
    pub fn into_stream(self) -> impl Stream<Item = Result<DeviceAddress>> {
        futures::stream::unfold(self, |mut discovery| async move {
            let item = discovery.next().await?;
            Some((item, discovery))
        })
    }

    /// Sleep between rounds. Returns `false` if discovery was stopped.
    async fn pause(&self) -> bool {
        let deadline = Instant::now() + self.options.pause;

        loop {
            if self.scanner.cancelled.load(Ordering::SeqCst) {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            tokio::time::sleep(remaining.min(DISCOVERY_TICK)).await;
        }
    }

    fn stop(&mut self) -> Option<Result<DeviceAddress>> {
        info!("Continuous discovery stopped after {} round(s)", self.rounds);
        self.rounds = 0;
        self.ready.clear();
        None
    }
}
