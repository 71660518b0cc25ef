use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::device::transport::{BleTransport, RadioStateStream};
use crate::device::types::RadioState;

/// Queries the radio state; a failing query counts as "not usable".
pub async fn query_radio_state<T: BleTransport>(transport: &T) -> RadioState {
    match transport.radio_state().await {
        Ok(state) => state,
        Err(err) => {
            warn!("Error checking the bluetooth radio state: {:?}", err);
            RadioState::Unknown
        },
    }
}

struct Subscribers {
    current: RadioState,
    senders: Vec<UnboundedSender<RadioState>>,
}

type SharedSubscribers = Arc<Mutex<Subscribers>>;

fn lock(subscribers: &SharedSubscribers) -> MutexGuard<'_, Subscribers> {
    subscribers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Watches the power state of the radio for the lifetime of the application.
pub struct AdapterMonitor {
    subscribers: SharedSubscribers,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl AdapterMonitor {
    pub async fn start<T: BleTransport>(transport: Arc<T>) -> Self {
        // subscribe before querying, so that no change is lost in between
        let changes = match transport.radio_state_changes().await {
            Ok(changes) => changes,
            Err(err) => {
                warn!("Failed to subscribe to bluetooth radio state changes: {:?}", err);
                stream::pending().boxed()
            },
        };

        let initial = query_radio_state(&*transport).await;
        info!("Bluetooth radio is {}", initial);

        let subscribers = Arc::new(Mutex::new(Subscribers { current: initial, senders: Vec::new() }));
        let cancel = CancellationToken::new();
        let handle = spawn(watch_radio(changes, subscribers.clone(), cancel.clone()));

        AdapterMonitor { subscribers, cancel, handle }
    }

    /// Every subscriber receives the state at the time of subscribing, then each change.
    pub fn subscribe(&self) -> RadioStates {
        let (sender, receiver) = unbounded();
        let mut subscribers = lock(&self.subscribers);

        if sender.unbounded_send(subscribers.current).is_ok() {
            subscribers.senders.push(sender);
        }
        RadioStates { receiver }
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();

        if let Err(err) = self.handle.await {
            warn!("Failed to join the adapter monitor task: {:?}", err);
        }

        // ends every subscription
        lock(&self.subscribers).senders.clear();
        info!("Adapter monitor stopped");
    }
}

fn publish(subscribers: &SharedSubscribers, state: RadioState) {
    let mut subscribers = lock(subscribers);
    if subscribers.current == state {
        return;
    }

    info!("Bluetooth radio changed from {} to {}", subscribers.current, state);
    subscribers.current = state;
    subscribers.senders.retain(|sender| {
        let delivered = sender.unbounded_send(state).is_ok();
        if !delivered {
            debug!("Dropping a radio state subscriber that went away");
        }
        delivered
    });
}

async fn watch_radio(mut changes: RadioStateStream, subscribers: SharedSubscribers, cancel: CancellationToken) {
    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            change = changes.next() => match change {
                Some(state) => publish(&subscribers, state),
                None => {
                    warn!("Bluetooth radio state changes ended");
                    break 'mainloop;
                },
            },
        }
    }
}

/// A subscription to the radio state. No transition is merged away, a short off/on flap is
/// delivered as two states.
pub struct RadioStates {
    receiver: UnboundedReceiver<RadioState>,
}

impl RadioStates {
    /// Returns `None` once the monitor has stopped.
    pub async fn next(&mut self) -> Option<RadioState> {
        self.receiver.next().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;
    use crate::device::testing::FakeTransport;

    #[tokio::test(start_paused = true)]
    async fn replays_the_current_state_then_follows_changes() {
        let transport = Arc::new(FakeTransport::new());
        let monitor = AdapterMonitor::start(transport.clone()).await;
        let mut states = monitor.subscribe();

        assert_eq!(states.next().await, Some(RadioState::PoweredOn));

        transport.set_radio_state(RadioState::PoweredOff);
        assert_eq!(states.next().await, Some(RadioState::PoweredOff));

        // a late subscriber still sees the current state first
        let mut late = monitor.subscribe();
        assert_eq!(late.next().await, Some(RadioState::PoweredOff));

        monitor.shutdown().await;
        assert_eq!(states.next().await, None);
        assert_eq!(late.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_states_are_not_reported_twice() {
        let transport = Arc::new(FakeTransport::new());
        let monitor = AdapterMonitor::start(transport.clone()).await;
        let mut states = monitor.subscribe();
        assert_eq!(states.next().await, Some(RadioState::PoweredOn));

        transport.set_radio_state(RadioState::PoweredOn);
        transport.set_radio_state(RadioState::Unauthorized);
        assert_eq!(states.next().await, Some(RadioState::Unauthorized));

        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn quick_flaps_deliver_every_transition() {
        let transport = Arc::new(FakeTransport::new());
        let monitor = AdapterMonitor::start(transport.clone()).await;
        let mut states = monitor.subscribe();

        // nobody reads until both changes went through the monitor
        transport.set_radio_state(RadioState::PoweredOff);
        transport.set_radio_state(RadioState::PoweredOn);
        sleep(Duration::from_millis(1)).await;

        assert_eq!(states.next().await, Some(RadioState::PoweredOn));
        assert_eq!(states.next().await, Some(RadioState::PoweredOff));
        assert_eq!(states.next().await, Some(RadioState::PoweredOn));

        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn failed_queries_count_as_unknown() {
        let transport = FakeTransport::new();
        transport.fail_radio_queries();
        assert_eq!(query_radio_state(&transport).await, RadioState::Unknown);
    }
}
