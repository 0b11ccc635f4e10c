//! Connection state machine.
//!
//! A [`ConnectionDriver`] runs as one background task per connection. It owns
//! the `gatttool` process, consumes its output, and is the only writer of the
//! connection state and the handle map. The public [`Session`] handle talks to
//! it through a request channel and receives results on one-shot channels.
//!
//! [`Session`]: crate::session::Session

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::ble::address::DeviceAddress;
use crate::ble::characteristics::HandleMap;
use crate::ble::uuids::CharacteristicUuid;
use crate::config::Timing;
use crate::error::{Error, Result};
use crate::process::{ControlProcess, OutputLine, OutputLines, OutputStream};
use crate::protocol::codec::{DataFormat, Value};
use crate::protocol::lines::{LineEvent, HEARTBEAT_MARKER};
use crate::utils::encode_hex;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Not connected to the device.
    #[default]
    Disconnected,
    /// Waiting for the connection or enumerating characteristics.
    Connecting,
    /// Connected and ready for reads and writes.
    Connected,
    /// Shutting the control process down.
    Disconnecting,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Notification emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionEvent {
    /// Enumeration finished and the session is ready.
    Connected,
    /// The device dropped the connection.
    Disconnected,
    /// The session ended because of an error.
    Error {
        /// Description of the failure.
        message: String,
    },
}

/// State published by the driver for readers on other tasks.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionSnapshot {
    pub state: ConnectionState,
    pub characteristics: Vec<CharacteristicUuid>,
    pub process_running: bool,
}

pub(crate) type Responder<T> = oneshot::Sender<Result<T>>;

/// Requests sent from the session handle to its driver.
pub(crate) enum Request {
    Read {
        uuid: CharacteristicUuid,
        format: DataFormat,
        respond: Responder<Value>,
    },
    Write {
        uuid: CharacteristicUuid,
        format: DataFormat,
        value: Value,
        respond: Responder<()>,
    },
    Disconnect {
        respond: oneshot::Sender<()>,
    },
}

/// The single operation a connection may have in flight.
enum PendingOperation {
    Connect(Responder<()>),
    Read {
        format: DataFormat,
        respond: Responder<Value>,
    },
    Write(Responder<()>),
    /// A read or write whose caller gave up. Its reply is still owed by the
    /// tool and is discarded when it arrives or once `until` passes.
    Draining {
        operation: &'static str,
        until: Instant,
    },
}

impl PendingOperation {
    fn name(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Read { .. } => "read",
            Self::Write(_) => "write",
            Self::Draining { operation, .. } => operation,
        }
    }

    /// The caller stopped waiting, usually because it timed out.
    fn is_abandoned(&self) -> bool {
        match self {
            Self::Connect(respond) | Self::Write(respond) => respond.is_closed(),
            Self::Read { respond, .. } => respond.is_closed(),
            Self::Draining { .. } => false,
        }
    }

    fn fail(self, error: Error) {
        debug!("Failing pending {}: {}", self.name(), error);
        match self {
            Self::Connect(respond) | Self::Write(respond) => {
                let _ = respond.send(Err(error));
            }
            Self::Read { respond, .. } => {
                let _ = respond.send(Err(error));
            }
            Self::Draining { .. } => {}
        }
    }
}

enum Phase {
    AwaitingAck { deadline: Instant },
    Enumerating { quiet_since: Instant },
    Ready,
}

/// Background state machine of one connection.
pub(crate) struct ConnectionDriver {
    address: DeviceAddress,
    process: ControlProcess,
    lines: OutputLines,
    timing: Timing,
    shared: Arc<RwLock<SessionSnapshot>>,
    events: broadcast::Sender<SessionEvent>,
    handles: HandleMap,
    phase: Phase,
    pending: Option<PendingOperation>,
    finished: bool,
}

impl ConnectionDriver {
    pub(crate) fn new(
        address: DeviceAddress,
        process: ControlProcess,
        lines: OutputLines,
        timing: Timing,
        shared: Arc<RwLock<SessionSnapshot>>,
        events: broadcast::Sender<SessionEvent>,
        respond: Responder<()>,
    ) -> Self {
        let driver = Self {
            address,
            process,
            lines,
            timing,
            shared,
            events,
            handles: HandleMap::new(),
            phase: Phase::AwaitingAck {
                deadline: Instant::now() + timing.connect_budget,
            },
            pending: Some(PendingOperation::Connect(respond)),
            finished: false,
        };

        {
            let mut shared = driver.shared.write();
            shared.characteristics.clear();
            shared.process_running = true;
        }
        driver.set_state(ConnectionState::Connecting);

        driver
    }

    /// Drive the connection until it is torn down.
    pub(crate) async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request>) {
        info!("Connecting to {}", self.address);

        if let Err(e) = self.process.send_line("connect").await {
            warn!("Failed to send connect command: {}", e);
        }

        let mut ticker = tokio::time::interval(self.timing.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        while !self.finished {
            tokio::select! {
                biased;
                line = self.lines.next() => match line {
                    Some(line) => self.handle_line(line).await,
                    None => self.handle_exit().await,
                },
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => {
                        debug!("Session handle for {} dropped", self.address);
                        self.teardown(Error::ConnectionLost).await;
                    }
                },
                _ = ticker.tick() => self.handle_tick().await,
            }
        }

        debug!("Connection task for {} ended", self.address);
    }

    fn state(&self) -> ConnectionState {
        self.shared.read().state
    }

    fn set_state(&self, new_state: ConnectionState) {
        let old_state = {
            let mut shared = self.shared.write();
            std::mem::replace(&mut shared.state, new_state)
        };

        if old_state != new_state {
            debug!(
                "Connection state of {} changed: {} -> {}",
                self.address, old_state, new_state
            );
        }
    }

    async fn handle_tick(&mut self) {
        if let Err(e) = self.process.send_line(HEARTBEAT_MARKER).await {
            trace!("Heartbeat write failed: {}", e);
        }

        self.drop_abandoned();

        let now = Instant::now();
        match self.phase {
            Phase::AwaitingAck { deadline } if now >= deadline => {
                warn!(
                    "No connection acknowledgement from {} within {:?}",
                    self.address, self.timing.connect_budget
                );
                self.fail(Error::ConnectionTimeout).await;
            }
            Phase::Enumerating { quiet_since }
                if now.duration_since(quiet_since) >= self.timing.settle_window() =>
            {
                self.finish_connect();
            }
            _ => {}
        }
    }

    async fn handle_line(&mut self, line: OutputLine) {
        if line.stream == OutputStream::Stderr {
            let message = line.text.trim();
            if !message.is_empty() {
                self.handle_error_line(message.to_string()).await;
            }
            return;
        }

        let Some(event) = LineEvent::parse(&line.text) else {
            trace!("Dropping unrecognized line: {:?}", line.text);
            return;
        };

        match event {
            LineEvent::Heartbeat | LineEvent::InProgress => {}
            LineEvent::DisconnectNotice { address } if address == self.address => {
                match self.phase {
                    Phase::Ready if self.state().is_connected() => {
                        self.handle_remote_disconnect().await
                    }
                    // Before the ack the plain prompt is normal.
                    Phase::Enumerating { .. } => {
                        warn!("{} dropped the link during enumeration", self.address);
                        self.fail(Error::ConnectionFailed {
                            reason: "device disconnected during characteristic discovery"
                                .to_string(),
                        })
                        .await;
                    }
                    _ => {}
                }
            }
            LineEvent::DisconnectNotice { .. } => {}
            LineEvent::Error { message } => self.handle_error_line(message).await,
            LineEvent::ConnectAck => {
                if let Phase::AwaitingAck { .. } = self.phase {
                    info!(
                        "Connection to {} acknowledged, enumerating characteristics",
                        self.address
                    );
                    self.phase = Phase::Enumerating {
                        quiet_since: Instant::now(),
                    };
                    if let Err(e) = self.process.send_line("characteristics").await {
                        warn!("Failed to request characteristics: {}", e);
                    }
                }
            }
            LineEvent::CharacteristicDescriptor { handle, uuid } => {
                if let Phase::Enumerating { quiet_since } = &mut self.phase {
                    *quiet_since = Instant::now();
                    self.handles.insert(uuid, handle);
                } else {
                    debug!("Ignoring characteristic {} outside enumeration", uuid);
                }
            }
            LineEvent::CharacteristicValue { value } => self.complete_read(value),
            LineEvent::WriteAck => self.complete_write(),
        }
    }

    async fn handle_request(&mut self, request: Request) {
        self.drop_abandoned();

        match request {
            Request::Read {
                uuid,
                format,
                respond,
            } => {
                if let Err(e) = self.check_ready(&uuid) {
                    let _ = respond.send(Err(e));
                    return;
                }

                match self.process.send_line(&format!("char-read-uuid {}", uuid)).await {
                    Ok(()) => self.pending = Some(PendingOperation::Read { format, respond }),
                    Err(e) => {
                        let _ = respond.send(Err(e));
                    }
                }
            }
            Request::Write {
                uuid,
                format,
                value,
                respond,
            } => {
                let handle = match self.check_ready(&uuid) {
                    Ok(handle) => handle,
                    Err(e) => {
                        let _ = respond.send(Err(e));
                        return;
                    }
                };
                let data = match format.encode(&value) {
                    Ok(data) => data,
                    Err(e) => {
                        let _ = respond.send(Err(e));
                        return;
                    }
                };

                let command = format!("char-write-req {} {}", handle, encode_hex(&data));
                match self.process.send_line(&command).await {
                    Ok(()) => self.pending = Some(PendingOperation::Write(respond)),
                    Err(e) => {
                        let _ = respond.send(Err(e));
                    }
                }
            }
            Request::Disconnect { respond } => {
                info!("Disconnecting from {}", self.address);
                self.teardown(Error::ConnectionLost).await;
                let _ = respond.send(());
            }
        }
    }

    /// Check that a read or write may be issued and return the value handle.
    fn check_ready(&self, uuid: &CharacteristicUuid) -> Result<String> {
        if !self.state().is_connected() {
            return Err(Error::NotConnected);
        }
        if let Some(pending) = &self.pending {
            debug!("Rejecting request while {} is pending", pending.name());
            return Err(Error::OperationInProgress);
        }
        self.handles
            .get(uuid)
            .map(str::to_string)
            .ok_or_else(|| Error::UnknownCharacteristic {
                uuid: uuid.to_string(),
            })
    }

    /// Move an abandoned read or write into the draining state and clear
    /// drains whose window has passed.
    fn drop_abandoned(&mut self) {
        let now = Instant::now();

        if let Some(PendingOperation::Draining { operation, until }) = &self.pending {
            if now >= *until {
                debug!("No late reply to abandoned {}, accepting requests", operation);
                self.pending = None;
            }
            return;
        }

        if !self.pending.as_ref().is_some_and(PendingOperation::is_abandoned) {
            return;
        }

        self.pending = match self.pending.take() {
            Some(PendingOperation::Connect(_)) | None => {
                debug!("Dropping abandoned connect");
                None
            }
            Some(pending) => {
                debug!("Draining abandoned {} operation", pending.name());
                Some(PendingOperation::Draining {
                    operation: pending.name(),
                    until: now + self.timing.connect_budget,
                })
            }
        };
    }

    fn finish_connect(&mut self) {
        self.handles.freeze();
        self.phase = Phase::Ready;
        self.shared.write().characteristics = self.handles.uuids();
        self.set_state(ConnectionState::Connected);

        info!(
            "Connected to {} ({} characteristics)",
            self.address,
            self.handles.len()
        );

        match self.pending.take() {
            Some(PendingOperation::Connect(respond)) => {
                let _ = respond.send(Ok(()));
            }
            other => self.pending = other,
        }

        let _ = self.events.send(SessionEvent::Connected);
    }

    fn complete_read(&mut self, value: Vec<u8>) {
        match self.pending.take() {
            Some(PendingOperation::Read { format, respond }) => {
                let result = format.decode(&value);
                if let Err(e) = &result {
                    warn!("Failed to decode {} value: {}", format, e);
                }
                let _ = respond.send(result);
            }
            Some(PendingOperation::Draining { operation, .. }) => {
                debug!("Discarding late {} reply {:02X?}", operation, value);
            }
            other => {
                debug!("Unsolicited characteristic value {:02X?}", value);
                self.pending = other;
            }
        }
    }

    fn complete_write(&mut self) {
        match self.pending.take() {
            Some(PendingOperation::Write(respond)) => {
                let _ = respond.send(Ok(()));
            }
            Some(PendingOperation::Draining { operation, .. }) => {
                debug!("Discarding late {} acknowledgement", operation);
            }
            other => {
                debug!("Unsolicited write acknowledgement");
                self.pending = other;
            }
        }
    }

    async fn handle_error_line(&mut self, message: String) {
        if matches!(
            self.state(),
            ConnectionState::Disconnected | ConnectionState::Disconnecting
        ) {
            debug!("Ignoring error after disconnect: {}", message);
            return;
        }

        warn!("{} reported: {}", self.process.program(), message);

        let connecting = !matches!(self.phase, Phase::Ready)
            || matches!(self.pending, Some(PendingOperation::Connect(_)));
        let error = if connecting {
            Error::ConnectionFailed {
                reason: message.clone(),
            }
        } else {
            Error::ControlProcessError {
                message: message.clone(),
            }
        };

        self.teardown(error).await;
        let _ = self.events.send(SessionEvent::Error { message });
    }

    async fn handle_remote_disconnect(&mut self) {
        info!("{} dropped the connection", self.address);
        self.teardown(Error::ConnectionLost).await;
        let _ = self.events.send(SessionEvent::Disconnected);
    }

    async fn handle_exit(&mut self) {
        let code = match self.process.shutdown(self.timing.shutdown_grace).await {
            Ok(status) => status.code(),
            Err(e) => {
                warn!("Failed to reap {}: {}", self.process.program(), e);
                None
            }
        };

        warn!(
            "{} for {} exited unexpectedly (code {:?})",
            self.process.program(),
            self.address,
            code
        );

        let error = if matches!(self.pending, Some(PendingOperation::Connect(_))) {
            Error::ConnectionFailed {
                reason: format!(
                    "{} exited while connecting (code {:?})",
                    self.process.program(),
                    code
                ),
            }
        } else {
            Error::ProcessExitedUnexpectedly { code }
        };
        let message = error.to_string();
        self.teardown(error).await;
        let _ = self.events.send(SessionEvent::Error { message });
    }

    async fn fail(&mut self, error: Error) {
        let message = error.to_string();
        self.teardown(error).await;
        let _ = self.events.send(SessionEvent::Error { message });
    }

    /// Stop the process, reset to `Disconnected` and fail whatever is
    /// pending with `error`.
    async fn teardown(&mut self, error: Error) {
        if self.state() != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnecting);
        }

        if self.process.is_running() {
            if let Err(e) = self.process.send_line("quit").await {
                trace!("Failed to send quit: {}", e);
            }
            match self.process.shutdown(self.timing.shutdown_grace).await {
                Ok(status) => debug!("{} stopped with {}", self.process.program(), status),
                Err(e) => warn!("Failed to stop {}: {}", self.process.program(), e),
            }
        }

        self.handles.clear();
        {
            let mut shared = self.shared.write();
            shared.characteristics.clear();
            shared.process_running = false;
        }
        self.set_state(ConnectionState::Disconnected);

        if let Some(pending) = self.pending.take() {
            pending.fail(error);
        }

        self.finished = true;
    }
}
