//! In-memory stand-ins for the BLE stack and the platform permission dialog.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::{self, StreamExt};
use tokio::sync::{watch, Notify};
use tokio::time::sleep;

use crate::device::permission::{Grant, Permission, PermissionRequester};
use crate::device::transport::{AdvertisementStream, BleTransport, PeripheralLink, RadioStateStream};
use crate::device::types::{Advertisement, RadioState};
use crate::error::{PermissionError, TransportError};

pub fn advertisement(id: &str, name: Option<&str>) -> Advertisement {
    Advertisement { id: id.to_string(), local_name: name.map(str::to_string) }
}

#[derive(Debug, Clone)]
pub enum ConnectBehavior {
    Succeed,
    Fail(String),
    // pending until the attempt is cancelled
    Hang,
    SucceedAfter(Duration),
}

struct FakeState {
    radio: RadioState,
    radio_query_fails: bool,
    radio_subscribers: Vec<UnboundedSender<RadioState>>,
    // each delay is relative to the previous advertisement
    discovery_script: Vec<(Duration, Result<Advertisement, String>)>,
    discovery_start_error: Option<String>,
    discovery_starts: usize,
    discovery_stops: usize,
    connect_behavior: ConnectBehavior,
    connect_calls: Vec<String>,
    cancel_connect_calls: Vec<String>,
    capability_error: Option<String>,
    capability_delay: Duration,
    write_delay: Duration,
    write_error: Option<String>,
    writes: Vec<Vec<u8>>,
    disconnect_error: Option<String>,
    disconnect_calls: Vec<String>,
    link_signals: Vec<watch::Sender<bool>>,
}

#[derive(Clone)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
    connect_cancelled: Arc<Notify>,
}

impl FakeTransport {
    pub fn new() -> Self {
        FakeTransport {
            state: Arc::new(Mutex::new(FakeState {
                radio: RadioState::PoweredOn,
                radio_query_fails: false,
                radio_subscribers: Vec::new(),
                discovery_script: Vec::new(),
                discovery_start_error: None,
                discovery_starts: 0,
                discovery_stops: 0,
                connect_behavior: ConnectBehavior::Succeed,
                connect_calls: Vec::new(),
                cancel_connect_calls: Vec::new(),
                capability_error: None,
                capability_delay: Duration::ZERO,
                write_delay: Duration::ZERO,
                write_error: None,
                writes: Vec::new(),
                disconnect_error: None,
                disconnect_calls: Vec::new(),
                link_signals: Vec::new(),
            })),
            connect_cancelled: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake transport state poisoned")
    }

    pub fn set_radio_state(&self, radio: RadioState) {
        let mut state = self.lock();
        state.radio = radio;
        state.radio_subscribers.retain(|subscriber| subscriber.unbounded_send(radio).is_ok());
    }

    pub fn fail_radio_queries(&self) {
        self.lock().radio_query_fails = true;
    }

    pub fn script_discovery(&self, script: Vec<(Duration, Result<Advertisement, String>)>) {
        self.lock().discovery_script = script;
    }

    pub fn fail_discovery_start(&self, message: &str) {
        self.lock().discovery_start_error = Some(message.to_string());
    }

    pub fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        self.lock().connect_behavior = behavior;
    }

    pub fn fail_capability_discovery(&self, message: &str) {
        self.lock().capability_error = Some(message.to_string());
    }

    pub fn delay_capability_discovery(&self, delay: Duration) {
        self.lock().capability_delay = delay;
    }

    /// Every write stays in flight for `delay` before it is recorded.
    pub fn delay_writes(&self, delay: Duration) {
        self.lock().write_delay = delay;
    }

    pub fn fail_writes(&self, message: &str) {
        self.lock().write_error = Some(message.to_string());
    }

    pub fn fail_disconnects(&self, message: &str) {
        self.lock().disconnect_error = Some(message.to_string());
    }

    /// The peripheral drops the most recent link, as if it went out of range.
    pub fn drop_link(&self) {
        if let Some(signal) = self.lock().link_signals.last() {
            signal.send_replace(true);
        }
    }

    pub fn writes(&self) -> Vec<String> {
        self.lock().writes.iter().map(|payload| String::from_utf8_lossy(payload).to_string()).collect()
    }

    pub fn connect_calls(&self) -> Vec<String> {
        self.lock().connect_calls.clone()
    }

    pub fn cancel_connect_calls(&self) -> Vec<String> {
        self.lock().cancel_connect_calls.clone()
    }

    pub fn disconnect_calls(&self) -> Vec<String> {
        self.lock().disconnect_calls.clone()
    }

    pub fn discovery_starts(&self) -> usize {
        self.lock().discovery_starts
    }

    pub fn discovery_stops(&self) -> usize {
        self.lock().discovery_stops
    }

    fn new_link(&self, peripheral_id: &str) -> FakeLink {
        let (signal, dropped) = watch::channel(false);
        let mut state = self.lock();
        state.link_signals.push(signal);

        FakeLink {
            peripheral_id: peripheral_id.to_string(),
            transport: self.clone(),
            signal: state.link_signals.len() - 1,
            dropped,
        }
    }
}

#[async_trait]
impl BleTransport for FakeTransport {
    type Link = FakeLink;

    async fn radio_state(&self) -> Result<RadioState, TransportError> {
        let state = self.lock();
        if state.radio_query_fails {
            return Err(TransportError::Other("radio query failed".to_string()));
        }
        Ok(state.radio)
    }

    async fn radio_state_changes(&self) -> Result<RadioStateStream, TransportError> {
        let (sender, receiver) = unbounded();
        self.lock().radio_subscribers.push(sender);
        Ok(receiver.boxed())
    }

    async fn start_discovery(&self) -> Result<AdvertisementStream, TransportError> {
        let script = {
            let mut state = self.lock();
            if let Some(message) = &state.discovery_start_error {
                return Err(TransportError::Other(message.clone()));
            }
            state.discovery_starts += 1;
            state.discovery_script.clone()
        };

        let advertisements = stream::iter(script)
            .then(|(delay, item)| async move {
                sleep(delay).await;
                item.map_err(TransportError::Other)
            })
            .chain(stream::pending())
            .boxed();

        Ok(advertisements)
    }

    async fn stop_discovery(&self) -> Result<(), TransportError> {
        self.lock().discovery_stops += 1;
        Ok(())
    }

    async fn connect(&self, peripheral_id: &str) -> Result<FakeLink, TransportError> {
        let behavior = {
            let mut state = self.lock();
            state.connect_calls.push(peripheral_id.to_string());
            state.connect_behavior.clone()
        };

        match behavior {
            ConnectBehavior::Succeed => {},
            ConnectBehavior::Fail(message) => return Err(TransportError::Other(message)),
            ConnectBehavior::Hang => {
                self.connect_cancelled.notified().await;
                return Err(TransportError::Other("Connection cancelled".to_string()));
            },
            ConnectBehavior::SucceedAfter(delay) => sleep(delay).await,
        }

        Ok(self.new_link(peripheral_id))
    }

    async fn cancel_connect(&self, peripheral_id: &str) -> Result<(), TransportError> {
        self.lock().cancel_connect_calls.push(peripheral_id.to_string());
        self.connect_cancelled.notify_one();
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakeLink {
    peripheral_id: String,
    transport: FakeTransport,
    signal: usize,
    dropped: watch::Receiver<bool>,
}

#[async_trait]
impl PeripheralLink for FakeLink {
    fn peripheral_id(&self) -> &str {
        &self.peripheral_id
    }

    async fn discover_capabilities(&self) -> Result<(), TransportError> {
        let delay = self.transport.lock().capability_delay;
        if !delay.is_zero() {
            sleep(delay).await;
        }

        match &self.transport.lock().capability_error {
            Some(message) => Err(TransportError::Other(message.clone())),
            None => Ok(()),
        }
    }

    async fn write_command(&self, payload: &[u8]) -> Result<(), TransportError> {
        let delay = self.transport.lock().write_delay;
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let mut state = self.transport.lock();
        if let Some(message) = &state.write_error {
            return Err(TransportError::Other(message.clone()));
        }
        state.writes.push(payload.to_vec());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.transport.lock();
        state.disconnect_calls.push(self.peripheral_id.clone());
        if let Some(message) = &state.disconnect_error {
            return Err(TransportError::Other(message.clone()));
        }
        state.link_signals[self.signal].send_replace(true);
        Ok(())
    }

    async fn disconnected(&self) -> Result<(), TransportError> {
        let mut dropped = self.dropped.clone();
        loop {
            if *dropped.borrow_and_update() {
                return Ok(());
            }
            if dropped.changed().await.is_err() {
                return Ok(());
            }
        }
    }
}

pub struct FakeRequester {
    denied: Vec<Permission>,
    fails: bool,
    requests: AtomicUsize,
}

impl FakeRequester {
    pub fn granting_all() -> Self {
        FakeRequester { denied: Vec::new(), fails: false, requests: AtomicUsize::new(0) }
    }

    pub fn denying(denied: &[Permission]) -> Self {
        FakeRequester { denied: denied.to_vec(), fails: false, requests: AtomicUsize::new(0) }
    }

    pub fn failing() -> Self {
        FakeRequester { denied: Vec::new(), fails: true, requests: AtomicUsize::new(0) }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionRequester for FakeRequester {
    async fn request(&self, permissions: &[Permission]) -> Result<HashMap<Permission, Grant>, PermissionError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.fails {
            return Err(PermissionError::Request("activity is gone".to_string()));
        }

        let grants = permissions
            .iter()
            .map(|permission| {
                let grant = if self.denied.contains(permission) { Grant::Denied } else { Grant::Granted };
                (*permission, grant)
            })
            .collect();
        Ok(grants)
    }
}
