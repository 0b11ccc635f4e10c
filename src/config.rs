//! Adapter and timing configuration.
//!
//! Tool paths are taken as given: nothing here searches `PATH` or checks
//! that a binary exists. A missing tool surfaces as
//! [`Error::ToolNotFound`](crate::Error::ToolNotFound) when it is spawned.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;

/// Environment variable overriding the scan tool path.
pub const HCITOOL_PATH_ENV: &str = "HCITOOL_PATH";
/// Environment variable overriding the GATT tool path.
pub const GATTTOOL_PATH_ENV: &str = "GATTTOOL_PATH";
/// Environment variable overriding the HCI device name.
pub const HCI_DEVICE_ENV: &str = "HCI_DEVICE";

/// An external program plus arguments placed before the ones the crate adds.
///
/// Leading arguments allow wrapping the tool, e.g. `sudo gatttool`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: PathBuf,
    leading_args: Vec<OsString>,
}

impl ToolCommand {
    /// Create a command for `program` with no leading arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Set the arguments placed before the crate's own arguments.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// The program to run.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments placed before the crate's own arguments.
    pub fn leading_args(&self) -> &[OsString] {
        &self.leading_args
    }
}

/// Timing parameters of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Interval between heartbeat writes and state machine ticks.
    pub heartbeat_interval: Duration,
    /// How long to wait for the connection acknowledgement.
    pub connect_budget: Duration,
    /// Heartbeat intervals without a new characteristic before enumeration
    /// is considered complete.
    pub settle_ticks: u32,
    /// How long a process gets to exit after an interrupt before it is
    /// killed.
    pub shutdown_grace: Duration,
}

impl Timing {
    /// Default heartbeat interval (100ms).
    pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);
    /// Default connect budget (2 seconds).
    pub const DEFAULT_CONNECT_BUDGET: Duration = Duration::from_secs(2);
    /// Default settle window in heartbeat intervals.
    pub const DEFAULT_SETTLE_TICKS: u32 = 3;
    /// Default shutdown grace period (1 second).
    pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

    /// Quiet time after which enumeration is considered complete.
    pub fn settle_window(&self) -> Duration {
        self.heartbeat_interval * self.settle_ticks
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            heartbeat_interval: Self::DEFAULT_HEARTBEAT_INTERVAL,
            connect_budget: Self::DEFAULT_CONNECT_BUDGET,
            settle_ticks: Self::DEFAULT_SETTLE_TICKS,
            shutdown_grace: Self::DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// Configuration shared by scanners and sessions on one adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    /// HCI device name passed with `-i`, e.g. `hci0`.
    pub hci_device: String,
    /// Tool used for `lescan`.
    pub scan_tool: ToolCommand,
    /// Tool used for interactive GATT sessions.
    pub gatt_tool: ToolCommand,
    /// Session timing.
    pub timing: Timing,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            hci_device: "hci0".to_string(),
            scan_tool: ToolCommand::new("hcitool"),
            gatt_tool: ToolCommand::new("gatttool"),
            timing: Timing::default(),
        }
    }
}

impl AdapterConfig {
    /// Default configuration with overrides from `HCITOOL_PATH`,
    /// `GATTTOOL_PATH` and `HCI_DEVICE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(path) = std::env::var_os(HCITOOL_PATH_ENV) {
            config.scan_tool = ToolCommand::new(path);
        }
        if let Some(path) = std::env::var_os(GATTTOOL_PATH_ENV) {
            config.gatt_tool = ToolCommand::new(path);
        }
        if let Ok(device) = std::env::var(HCI_DEVICE_ENV) {
            config.hci_device = device;
        }

        config
    }

    /// Set the HCI device.
    pub fn with_hci_device(mut self, device: impl Into<String>) -> Self {
        self.hci_device = device.into();
        self
    }

    /// Set the scan tool.
    pub fn with_scan_tool(mut self, tool: ToolCommand) -> Self {
        self.scan_tool = tool;
        self
    }

    /// Set the GATT tool.
    pub fn with_gatt_tool(mut self, tool: ToolCommand) -> Self {
        self.gatt_tool = tool;
        self
    }

    /// Set the session timing.
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }
}

/// Parameters of one bounded discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Stop after this long regardless of results.
    pub max_duration: Duration,
    /// Once at least one device was found, stop after this long.
    pub min_duration: Duration,
    /// Only report addresses whose canonical text matches.
    pub filter: Option<Regex>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(2),
            min_duration: Duration::ZERO,
            filter: None,
        }
    }
}

impl DiscoveryOptions {
    /// Set the maximum duration.
    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = duration;
        self
    }

    /// Set the early-exit duration.
    pub fn with_min_duration(mut self, duration: Duration) -> Self {
        self.min_duration = duration;
        self
    }

    /// Set the address filter.
    pub fn with_filter(mut self, filter: Regex) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Parameters of continuous discovery.
#[derive(Debug, Clone)]
pub struct ContinuousOptions {
    /// Maximum length of each discovery round.
    pub window: Duration,
    /// Early-exit time of each round once something was found.
    pub min_window: Duration,
    /// Pause between rounds.
    pub pause: Duration,
    /// How long a device must go unseen before it is reported again.
    pub debounce: Duration,
    /// Only report addresses whose canonical text matches.
    pub filter: Option<Regex>,
}

impl Default for ContinuousOptions {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            min_window: Duration::from_millis(200),
            pause: Duration::from_millis(500),
            debounce: Duration::from_secs(3),
            filter: None,
        }
    }
}

impl ContinuousOptions {
    /// Set the address filter.
    pub fn with_filter(mut self, filter: Regex) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set the debounce interval.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub(crate) fn round(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            max_duration: self.window,
            min_duration: self.min_window,
            filter: self.filter.clone(),
        }
    }
}
