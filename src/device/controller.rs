use std::mem;
use std::sync::Arc;
use std::time::Duration;
use futures::channel::mpsc::{channel, unbounded, SendError, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::device::command::{send_command, Command, SpeedSetting};
use crate::device::connection::{establish, release_link};
use crate::device::constants::{CONNECT_TIMEOUT, SCAN_DURATION, UNKNOWN_PERIPHERAL_NAME};
use crate::device::monitor::RadioStates;
use crate::device::permission::PermissionGate;
use crate::device::scanner::{run_scan, PeripheralList, ScanEvent};
use crate::device::transport::{BleTransport, PeripheralLink};
use crate::device::types::{Intent, Notice, RadioState, Retry, SessionState, Snapshot};
use crate::error::{Failure, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    pub scan_duration: Duration,
    pub connect_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        ControllerSettings {
            scan_duration: Duration::from_millis(SCAN_DURATION),
            connect_timeout: Duration::from_millis(CONNECT_TIMEOUT),
        }
    }
}

/// Outcome of an I/O task, tagged with the generation of the scan or link that started it.
enum Completion<L> {
    Scan { generation: u64, event: ScanEvent },
    Connect { generation: u64, result: Result<L, Failure> },
    LinkDropped { generation: u64 },
    WriteFailed { generation: u64, command: Command, error: TransportError },
    DisconnectFinished { generation: u64 },
}

struct ActiveScan {
    generation: u64,
    // discovery has actually started
    running: bool,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

enum LinkPhase<L> {
    Idle,
    Connecting {
        peripheral_id: String,
        generation: u64,
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    },
    Connected {
        link: L,
        generation: u64,
        _observer: DropGuard,
    },
    Disconnecting {
        peripheral_id: String,
        generation: u64,
        _observer: DropGuard,
    },
}

/// Owns the session. Intents and completions are processed strictly one at a time, all I/O is
/// spawned and reports back through `completions`.
struct Controller<T: BleTransport> {
    transport: Arc<T>,
    permissions: Arc<PermissionGate>,
    settings: ControllerSettings,
    cancel: CancellationToken,
    radio: RadioState,
    scan: Option<ActiveScan>,
    peripherals: PeripheralList,
    link: LinkPhase<T::Link>,
    speed: SpeedSetting,
    last_generation: u64,
    completions: UnboundedSender<Completion<T::Link>>,
    notices: UnboundedSender<Notice>,
    snapshots: watch::Sender<Snapshot>,
}

impl<T: BleTransport> Controller<T> {
    fn next_generation(&mut self) -> u64 {
        self.last_generation += 1;
        self.last_generation
    }

    fn notify(&self, notice: Notice) {
        info!("Notice: {:?}", notice);
        if self.notices.unbounded_send(notice).is_err() {
            debug!("Nobody is listening for notices");
        }
    }

    fn fail(&self, failure: Failure, retry: Option<Retry>) {
        self.notify(Notice::Failure { failure, retry });
    }

    fn session_state(&self) -> SessionState {
        match &self.link {
            LinkPhase::Idle => match &self.scan {
                Some(scan) if scan.running => SessionState::Scanning,
                _ => SessionState::Idle,
            },
            LinkPhase::Connecting { peripheral_id, .. } => SessionState::Connecting { peripheral_id: peripheral_id.clone() },
            LinkPhase::Connected { link, .. } => SessionState::Connected { peripheral_id: link.peripheral_id().to_string() },
            LinkPhase::Disconnecting { peripheral_id, .. } => SessionState::Disconnecting { peripheral_id: peripheral_id.clone() },
        }
    }

    fn publish(&self) {
        let snapshot = Snapshot {
            state: self.session_state(),
            radio: self.radio,
            peripherals: self.peripherals.records(),
            speed: self.speed.value(),
        };

        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            if current.state != snapshot.state {
                info!("Session changed from {} to {}", current.state, snapshot.state);
            }
            *current = snapshot;
            true
        });
    }

    fn handle_radio(&mut self, radio: RadioState) {
        self.radio = radio;
        if radio.is_powered_on() {
            return;
        }

        if !matches!(self.link, LinkPhase::Connected { .. }) {
            return;
        }

        // the radio is gone, a graceful disconnect is not possible anymore
        if let LinkPhase::Connected { link, .. } = mem::replace(&mut self.link, LinkPhase::Idle) {
            warn!("Bluetooth radio is {}, dropping the connection to {}", radio, link.peripheral_id());
            self.notify(Notice::RadioLost { peripheral_id: link.peripheral_id().to_string() });
        }
    }

    fn handle_intent(&mut self, intent: Intent) {
        debug!("Intent: {:?}", intent);
        match intent {
            Intent::Scan => self.start_scan(),
            Intent::Connect { peripheral_id } => self.start_connect(peripheral_id),
            Intent::Send(direction) => {
                if self.connect_required() {
                    return;
                }
                self.send(Command::Direction(direction));
            },
            Intent::AdjustSpeed(step) => {
                // the setting moves even without a link
                let command = self.speed.adjust(step);
                if self.connect_required() {
                    return;
                }
                self.send(command);
            },
            Intent::Disconnect => self.start_disconnect(),
        }
    }

    fn start_scan(&mut self) {
        if self.scan.is_some() {
            debug!("Scan already in progress");
            return;
        }

        let generation = self.next_generation();
        let cancel = self.cancel.child_token();
        let (events, received) = channel(16);

        let scan = run_scan(self.transport.clone(), self.permissions.clone(), self.settings.scan_duration, cancel.clone(), events);
        let forward = received
            .map(move |event| Ok::<_, SendError>(Completion::Scan { generation, event }))
            .forward(self.completions.clone());

        let handle = spawn(async move {
            let (_, forwarded) = futures::join!(scan, forward);
            if let Err(err) = forwarded {
                debug!("Scan events were not delivered: {:?}", err);
            }
        });

        self.scan = Some(ActiveScan { generation, running: false, cancel, handle });
    }

    fn handle_scan_event(&mut self, generation: u64, event: ScanEvent) {
        let scan = match &mut self.scan {
            Some(scan) if scan.generation == generation => scan,
            _ => {
                debug!("Ignoring event of an old scan: {:?}", event);
                return;
            },
        };

        match event {
            ScanEvent::Started => {
                scan.running = true;
                self.peripherals.clear();
            },
            ScanEvent::Sighted(advertisement) => {
                self.peripherals.upsert(&advertisement, Instant::now());
            },
            ScanEvent::Blocked(failure) => {
                self.scan = None;
                self.fail(failure, Some(Retry::Scan));
            },
            ScanEvent::Failed(err) => {
                self.scan = None;
                self.fail(Failure::from_scan_error(&err), Some(Retry::Scan));
            },
            ScanEvent::Finished => {
                self.scan = None;
                info!("Scan found {} peripherals", self.peripherals.len());
                if self.peripherals.is_empty() {
                    self.notify(Notice::NoPeripheralsFound);
                }
            },
        }
    }

    fn start_connect(&mut self, peripheral_id: String) {
        if !matches!(self.link, LinkPhase::Idle) {
            debug!("Not connecting to {}, the session is {}", peripheral_id, self.session_state());
            return;
        }

        let generation = self.next_generation();
        let cancel = self.cancel.child_token();
        let transport = self.transport.clone();
        let timeout = self.settings.connect_timeout;
        let completions = self.completions.clone();

        let handle = spawn({
            let peripheral_id = peripheral_id.clone();
            let cancel = cancel.clone();
            async move {
                let result = establish(transport, &peripheral_id, timeout, &cancel).await;
                if completions.unbounded_send(Completion::Connect { generation, result }).is_err() {
                    debug!("Connect to {} finished after the controller stopped", peripheral_id);
                }
            }
        });

        self.link = LinkPhase::Connecting { peripheral_id, generation, cancel, handle };
    }

    fn handle_connected(&mut self, generation: u64, result: Result<T::Link, Failure>) {
        let peripheral_id = match &self.link {
            LinkPhase::Connecting { peripheral_id, generation: current, .. } if *current == generation => peripheral_id.clone(),
            _ => {
                if let Ok(link) = result {
                    info!("Releasing stale connection to {}", link.peripheral_id());
                    spawn(async move { release_link(&link).await });
                }
                return;
            },
        };

        let link = match result {
            Ok(link) => link,
            Err(failure) => {
                self.link = LinkPhase::Idle;
                self.fail(failure, Some(Retry::Connect { peripheral_id }));
                return;
            },
        };

        let observer = CancellationToken::new();
        spawn(observe_link(link.clone(), generation, observer.clone(), self.completions.clone()));
        self.link = LinkPhase::Connected { link, generation, _observer: observer.drop_guard() };

        let name = match self.peripherals.get(&peripheral_id) {
            Some(record) => record.display_name.clone(),
            None => UNKNOWN_PERIPHERAL_NAME.to_string(),
        };
        self.notify(Notice::Connected { peripheral_id, name });
    }

    /// Redirects the user into the connect flow if there is no live link.
    fn connect_required(&mut self) -> bool {
        if let LinkPhase::Connected { .. } = self.link {
            return false;
        }

        self.notify(Notice::ConnectRequired);
        self.start_scan();
        true
    }

    fn send(&self, command: Command) {
        let (link, generation) = match &self.link {
            LinkPhase::Connected { link, generation, .. } => (link.clone(), *generation),
            _ => return,
        };

        let completions = self.completions.clone();
        spawn(async move {
            if let Err(error) = send_command(&link, &command).await {
                warn!("Sending {} failed: {:?}", command, error);
                if completions.unbounded_send(Completion::WriteFailed { generation, command, error }).is_err() {
                    debug!("Failed write of {} not reported, the controller stopped", command);
                }
            }
        });
    }

    fn handle_write_failed(&mut self, generation: u64, command: Command, error: TransportError) {
        match &self.link {
            LinkPhase::Connected { generation: current, .. } if *current == generation => {},
            _ => {
                debug!("Ignoring failed write of {} on an old link", command);
                return;
            },
        }

        if let LinkPhase::Connected { link, .. } = mem::replace(&mut self.link, LinkPhase::Idle) {
            let peripheral_id = link.peripheral_id().to_string();
            self.fail(Failure::CommandTransmissionFailure { command, message: error.to_string() }, None);
            self.notify(Notice::Disconnected { peripheral_id });
            spawn(async move { release_link(&link).await });
        }
    }

    fn start_disconnect(&mut self) {
        let (link, generation, observer) = match mem::replace(&mut self.link, LinkPhase::Idle) {
            LinkPhase::Connected { link, generation, _observer } => (link, generation, _observer),
            other => {
                debug!("Nothing to disconnect");
                self.link = other;
                return;
            },
        };

        info!("Disconnecting from {}...", link.peripheral_id());
        self.link = LinkPhase::Disconnecting {
            peripheral_id: link.peripheral_id().to_string(),
            generation,
            _observer: observer,
        };

        let completions = self.completions.clone();
        spawn(async move {
            if let Err(err) = link.disconnect().await {
                warn!("Disconnecting from {} failed: {:?}", link.peripheral_id(), err);
            }
            if completions.unbounded_send(Completion::DisconnectFinished { generation }).is_err() {
                debug!("Disconnect from {} finished after the controller stopped", link.peripheral_id());
            }
        });
    }

    /// The link of `generation` is gone, however it ended.
    fn handle_link_ended(&mut self, generation: u64) {
        let peripheral_id = match &self.link {
            LinkPhase::Connected { link, generation: current, .. } if *current == generation => link.peripheral_id().to_string(),
            LinkPhase::Disconnecting { peripheral_id, generation: current, .. } if *current == generation => peripheral_id.clone(),
            _ => {
                debug!("Ignoring the end of an old link");
                return;
            },
        };

        self.link = LinkPhase::Idle;
        self.notify(Notice::Disconnected { peripheral_id });
    }

    fn handle_completion(&mut self, completion: Completion<T::Link>) {
        match completion {
            Completion::Scan { generation, event } => self.handle_scan_event(generation, event),
            Completion::Connect { generation, result } => self.handle_connected(generation, result),
            Completion::WriteFailed { generation, command, error } => self.handle_write_failed(generation, command, error),
            Completion::LinkDropped { generation } | Completion::DisconnectFinished { generation } => self.handle_link_ended(generation),
        }
    }

    async fn teardown(&mut self) {
        if let Some(scan) = self.scan.take() {
            scan.cancel.cancel();
            if let Err(err) = scan.handle.await {
                warn!("Failed to join the scan task: {:?}", err);
            }
        }

        match mem::replace(&mut self.link, LinkPhase::Idle) {
            LinkPhase::Idle => {},
            LinkPhase::Connecting { cancel, handle, .. } => {
                cancel.cancel();
                if let Err(err) = handle.await {
                    warn!("Failed to join the connect task: {:?}", err);
                }
            },
            LinkPhase::Connected { link, .. } => release_link(&link).await,
            LinkPhase::Disconnecting { peripheral_id, .. } => {
                debug!("Leaving the disconnect from {} running", peripheral_id);
            },
        }

        self.publish();
        info!("Controller stopped");
    }

    async fn run(mut self, mut radio: RadioStates, mut intents: UnboundedReceiver<Intent>, mut completions: UnboundedReceiver<Completion<T::Link>>) {
        let cancel = self.cancel.clone();
        let mut radio_open = true;
        self.publish();

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                state = radio.next(), if radio_open => match state {
                    Some(state) => self.handle_radio(state),
                    None => {
                        warn!("Bluetooth radio state is no longer monitored");
                        radio_open = false;
                    },
                },
                intent = intents.next() => match intent {
                    Some(intent) => self.handle_intent(intent),
                    None => {
                        info!("All intent senders are gone");
                        break 'mainloop;
                    },
                },
                Some(completion) = completions.next() => {
                    self.handle_completion(completion);
                },
            }

            self.publish();
        }

        self.teardown().await;
    }
}

async fn observe_link<L: PeripheralLink>(link: L, generation: u64, cancel: CancellationToken, completions: UnboundedSender<Completion<L>>) {
    tokio::select! {
        _ = cancel.cancelled() => {},
        result = link.disconnected() => {
            match result {
                Ok(()) => info!("Peripheral {} disconnected", link.peripheral_id()),
                Err(err) => warn!("Lost track of the connection to {}: {:?}", link.peripheral_id(), err),
            }
            if completions.unbounded_send(Completion::LinkDropped { generation }).is_err() {
                debug!("End of the link to {} not reported, the controller stopped", link.peripheral_id());
            }
        },
    }
}

/// The presentation side of a running controller.
pub struct ControllerHandle {
    intents: UnboundedSender<Intent>,
    snapshots: watch::Receiver<Snapshot>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ControllerHandle {
    pub fn send(&self, intent: Intent) {
        if self.intents.unbounded_send(intent).is_err() {
            warn!("Controller is not running anymore");
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Stops the controller, releasing any live connection.
    pub async fn shutdown(self) {
        self.cancel.cancel();

        if let Err(err) = self.handle.await {
            warn!("Failed to join the controller task: {:?}", err);
        }
    }
}

/// Spawns the controller. Notices are delivered in the order they were raised.
pub fn start_controller<T: BleTransport>(
    transport: Arc<T>,
    permissions: Arc<PermissionGate>,
    radio: RadioStates,
    settings: ControllerSettings,
    initial_speed: u8,
) -> (ControllerHandle, UnboundedReceiver<Notice>) {
    let (intents, intents_received) = unbounded();
    let (completions, completions_received) = unbounded();
    let (notices, notices_received) = unbounded();
    let speed = SpeedSetting::new(initial_speed);

    let (snapshots, snapshots_received) = watch::channel(Snapshot {
        state: SessionState::Idle,
        radio: RadioState::Unknown,
        peripherals: Vec::new(),
        speed: speed.value(),
    });

    let cancel = CancellationToken::new();
    let controller = Controller {
        transport,
        permissions,
        settings,
        cancel: cancel.clone(),
        radio: RadioState::Unknown,
        scan: None,
        peripherals: PeripheralList::new(),
        link: LinkPhase::Idle,
        speed,
        last_generation: 0,
        completions,
        notices,
        snapshots,
    };

    let handle = spawn(controller.run(radio, intents_received, completions_received));
    let controller = ControllerHandle { intents, snapshots: snapshots_received, cancel, handle };
    (controller, notices_received)
}
