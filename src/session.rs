//! GATT session with one device.
//!
//! A [`Session`] is a cheap handle: the connection itself is driven by a
//! background task that owns the `gatttool` process. Every operation sends a
//! request to that task and waits for the reply under a caller-supplied
//! timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::ble::address::DeviceAddress;
use crate::ble::connection::{
    ConnectionDriver, ConnectionState, Request, SessionEvent, SessionSnapshot,
};
use crate::ble::uuids::{CharacteristicUuid, ToCharacteristicUuid};
use crate::config::AdapterConfig;
use crate::error::{Error, Result};
use crate::process::ControlProcess;
use crate::protocol::codec::{DataFormat, Value};

/// Callback handle for unregistering callbacks.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle").field("id", &self.id).finish()
    }
}

struct DriverHandle {
    requests: mpsc::UnboundedSender<Request>,
    task: JoinHandle<()>,
}

/// A GATT session with one device.
///
/// Dropping the session stops its control process the same way
/// [`disconnect`](Self::disconnect) does.
pub struct Session {
    address: DeviceAddress,
    config: AdapterConfig,
    shared: Arc<RwLock<SessionSnapshot>>,
    driver: Mutex<Option<DriverHandle>>,
    event_tx: broadcast::Sender<SessionEvent>,
    callback_counter: AtomicU64,
}

impl Session {
    /// Timeout used by the demos and a reasonable default for callers.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

    /// Create a disconnected session for `address`.
    pub fn new(address: DeviceAddress, config: AdapterConfig) -> Self {
        let (event_tx, _) = broadcast::channel(16);

        Self {
            address,
            config,
            shared: Arc::new(RwLock::new(SessionSnapshot::default())),
            driver: Mutex::new(None),
            event_tx,
            callback_counter: AtomicU64::new(0),
        }
    }

    /// Device address.
    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.read().state
    }

    /// Whether the session is connected and ready.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Whether the control process of this session is alive.
    pub fn is_process_running(&self) -> bool {
        self.shared.read().process_running
    }

    /// Characteristics discovered on connect. Empty unless connected.
    pub fn characteristics(&self) -> Vec<CharacteristicUuid> {
        self.shared.read().characteristics.clone()
    }

    // === Connection ===

    /// Connect and enumerate characteristics.
    ///
    /// Returns immediately if already connected. On timeout the control
    /// process is stopped before this returns.
    ///
    /// # Errors
    ///
    /// - [`Error::OperationInProgress`] if another connect is running
    /// - [`Error::ConnectionTimeout`] if `timeout` or the connect budget expires
    /// - [`Error::ConnectionFailed`] if the tool reported an error or exited,
    ///   or the link dropped during characteristic discovery
    /// - [`Error::ToolNotFound`] / [`Error::PermissionDenied`] on spawn failure
    pub async fn connect(&self, timeout: Duration) -> Result<()> {
        let rx = {
            let mut driver = self.driver.lock();

            if driver.as_ref().is_some_and(|d| !d.task.is_finished()) {
                return match self.state() {
                    ConnectionState::Connected => {
                        debug!("{} is already connected", self.address);
                        Ok(())
                    }
                    _ => Err(Error::OperationInProgress),
                };
            }

            let address = self.address.to_string();
            let (process, lines) = ControlProcess::spawn(
                &self.config.gatt_tool,
                &["-i", &self.config.hci_device, "-b", &address, "-I"],
            )?;

            let (respond, rx) = oneshot::channel();
            let (requests, request_rx) = mpsc::unbounded_channel();
            let connection = ConnectionDriver::new(
                self.address,
                process,
                lines,
                self.config.timing,
                self.shared.clone(),
                self.event_tx.clone(),
                respond,
            );
            let task = tokio::spawn(connection.run(request_rx));

            *driver = Some(DriverHandle { requests, task });
            rx
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Internal(
                "connection task ended without a result".to_string(),
            )),
            Err(_) => {
                warn!("Connecting to {} timed out after {:?}", self.address, timeout);
                self.disconnect().await?;
                Err(Error::ConnectionTimeout)
            }
        }
    }

    /// Stop the control process and reset to `Disconnected`.
    ///
    /// Safe to call in any state. The process has been reaped when this
    /// returns.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(handle) = self.driver.lock().take() else {
            return Ok(());
        };

        let (respond, rx) = oneshot::channel();
        if handle.requests.send(Request::Disconnect { respond }).is_ok() {
            let _ = rx.await;
        }

        if let Err(e) = handle.task.await {
            error!("Connection task for {} failed: {}", self.address, e);
            let mut shared = self.shared.write();
            shared.state = ConnectionState::Disconnected;
            shared.characteristics.clear();
            shared.process_running = false;
            return Err(Error::Internal(e.to_string()));
        }

        info!("Disconnected from {}", self.address);
        Ok(())
    }

    // === Characteristics ===

    /// Read a characteristic and decode it as `format`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the session is not connected
    /// - [`Error::UnknownCharacteristic`] if the device has no such characteristic
    /// - [`Error::OperationInProgress`] if another read or write is pending,
    ///   including one whose caller timed out and whose reply is still owed
    /// - [`Error::OperationTimeout`] if no value arrives within `timeout`
    pub async fn get<U>(&self, uuid: U, format: DataFormat, timeout: Duration) -> Result<Value>
    where
        U: ToCharacteristicUuid,
    {
        let uuid = uuid.to_characteristic_uuid()?;
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let (respond, rx) = oneshot::channel();
        self.send(Request::Read {
            uuid,
            format,
            respond,
        })?;
        self.await_response(rx, timeout).await
    }

    /// Encode `value` as `format` and write it to a characteristic.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get), plus [`Error::InvalidParameter`] if `value`
    /// does not fit `format`.
    pub async fn set<U>(
        &self,
        uuid: U,
        format: DataFormat,
        value: impl Into<Value>,
        timeout: Duration,
    ) -> Result<()>
    where
        U: ToCharacteristicUuid,
    {
        let uuid = uuid.to_characteristic_uuid()?;
        let value = value.into();
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let (respond, rx) = oneshot::channel();
        self.send(Request::Write {
            uuid,
            format,
            value,
            respond,
        })?;
        self.await_response(rx, timeout).await
    }

    fn send(&self, request: Request) -> Result<()> {
        let driver = self.driver.lock();
        let handle = driver.as_ref().ok_or(Error::NotConnected)?;
        handle
            .requests
            .send(request)
            .map_err(|_| Error::NotConnected)
    }

    async fn await_response<T>(
        &self,
        rx: oneshot::Receiver<Result<T>>,
        timeout: Duration,
    ) -> Result<T> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_) => {
                debug!("Operation on {} timed out after {:?}", self.address, timeout);
                Err(Error::OperationTimeout)
            }
        }
    }

    // === Events ===

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Register a callback invoked when the device drops the connection.
    pub fn on_disconnected<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.event_tx.subscribe();

        let handle = tokio::spawn(async move {
            while let Some(event) = next_event(&mut rx).await {
                if event == SessionEvent::Disconnected {
                    callback();
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Register a callback invoked with the message of a session error.
    pub fn on_error<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.event_tx.subscribe();

        let handle = tokio::spawn(async move {
            while let Some(event) = next_event(&mut rx).await {
                if let SessionEvent::Error { message } = event {
                    callback(&message);
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }
}

/// Receive the next event, skipping over any the receiver lagged behind on.
///
/// Returns `None` once the session is gone.
async fn next_event(rx: &mut broadcast::Receiver<SessionEvent>) -> Option<SessionEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Event callback fell behind, skipped {} event(s)", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn session() -> Session {
        Session::new(
            "C4:7C:8D:6A:1F:0E".parse().unwrap(),
            AdapterConfig::default(),
        )
    }

    #[test]
    fn test_callback_handle() {
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let handle = CallbackHandle::new(42, move || {
            called_clone.store(true, Ordering::SeqCst);
        });

        assert_eq!(handle.id(), 42);
        assert!(!called.load(Ordering::SeqCst));

        handle.unregister();
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_callbacks_survive_lagging() {
        let session = session();
        let disconnects = Arc::new(AtomicU64::new(0));
        let disconnects_clone = disconnects.clone();
        let _handle = session.on_disconnected(move || {
            disconnects_clone.fetch_add(1, Ordering::SeqCst);
        });

        // The callback task cannot run until we yield, so it falls behind.
        for i in 0..40 {
            let _ = session.event_tx.send(SessionEvent::Error {
                message: format!("error {}", i),
            });
        }
        let _ = session.event_tx.send(SessionEvent::Disconnected);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_new_session_is_disconnected() {
        let session = session();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.is_connected());
        assert!(!session.is_process_running());
        assert!(session.characteristics().is_empty());
        assert_eq!(session.address().to_string(), "C4:7C:8D:6A:1F:0E");
    }

    #[tokio::test]
    async fn test_get_requires_connection() {
        let session = session();
        let result = session
            .get("2a37", DataFormat::UInt16, Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(Error::NotConnected)));

        let result = session
            .set("2a37", DataFormat::UInt8, 1u8, Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_invalid_uuid_rejected_before_state_check() {
        let session = session();
        let result = session
            .get("not-a-uuid", DataFormat::UInt8, Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(Error::InvalidUuid { .. })));
    }

    #[tokio::test]
    async fn test_disconnect_when_idle() {
        let session = session();
        tokio_test::assert_ok!(session.disconnect().await);
        tokio_test::assert_ok!(session.disconnect().await);
    }

    #[tokio::test]
    async fn test_connect_missing_tool() {
        let config = AdapterConfig::default()
            .with_gatt_tool(crate::config::ToolCommand::new("/nonexistent/gatttool"));
        let session = Session::new("C4:7C:8D:6A:1F:0E".parse().unwrap(), config);

        let result = session.connect(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::ToolNotFound { .. })));
        assert!(!session.is_process_running());
    }
}
