use std::sync::Arc;
use std::time::Duration;
use futures::channel::mpsc::Sender;
use futures::stream::BoxStream;
use futures::{FutureExt, SinkExt, StreamExt};
use indexmap::IndexMap;
use log::{debug, info, warn};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::device::monitor::query_radio_state;
use crate::device::permission::{PermissionGate, PermissionOutcome};
use crate::device::transport::{AdvertisementStream, BleTransport};
use crate::device::types::{Advertisement, PeripheralRecord};
use crate::error::{Failure, TransportError};

/// The peripherals seen during the current scan, in order of first sighting.
#[derive(Debug, Clone, Default)]
pub struct PeripheralList {
    records: IndexMap<String, PeripheralRecord>,
}

impl PeripheralList {
    pub fn new() -> Self {
        PeripheralList::default()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Records a sighting. Advertisements without a name are ignored. Returns true if the
    /// peripheral was not in the list yet.
    pub fn upsert(&mut self, advertisement: &Advertisement, seen_at: Instant) -> bool {
        let name = match advertisement.local_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => return false,
        };

        if let Some(record) = self.records.get_mut(&advertisement.id) {
            // sightings may be delivered out of order, never move last_seen backwards
            record.last_seen = record.last_seen.max(seen_at);
            return false;
        }

        debug!("Discovered {} ({})", name, advertisement.id);
        self.records.insert(
            advertisement.id.clone(),
            PeripheralRecord::new(advertisement.id.clone(), Some(name), seen_at),
        );
        true
    }

    pub fn get(&self, id: &str) -> Option<&PeripheralRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> Vec<PeripheralRecord> {
        self.records.values().cloned().collect()
    }
}

#[derive(Debug)]
pub enum ScanEvent {
    /// A precondition failed, discovery was never started.
    Blocked(Failure),
    Started,
    Sighted(Advertisement),
    /// Discovery reported an error and has been stopped.
    Failed(TransportError),
    /// The scan window elapsed and discovery has been stopped.
    Finished,
}

/// Limits an unbounded discovery to a time window. The returned stream ends when the window
/// elapses or `cancel` fires, whichever is first.
pub fn discovery_window(advertisements: AdvertisementStream, window: Duration, cancel: CancellationToken) -> BoxStream<'static, Result<Advertisement, TransportError>> {
    let stop = async move {
        tokio::select! {
            _ = sleep(window) => {},
            _ = cancel.cancelled() => {},
        }
    };

    advertisements.take_until(stop.boxed()).boxed()
}

async fn stop_discovery<T: BleTransport>(transport: &T) {
    if let Err(err) = transport.stop_discovery().await {
        warn!("Failed to stop scanning: {:?}", err);
    }
}

/// Runs one scan: checks the radio and permissions, then reports sightings until the window
/// elapses or discovery fails. The last event is always `Blocked`, `Failed` or `Finished`.
///
/// Send errors are ignored: the receiver only goes away on shutdown.
pub async fn run_scan<T: BleTransport>(
    transport: Arc<T>,
    permissions: Arc<PermissionGate>,
    window: Duration,
    cancel: CancellationToken,
    mut events: Sender<ScanEvent>,
) {
    let radio = query_radio_state(&*transport).await;
    if !radio.is_powered_on() {
        info!("Not scanning, bluetooth radio is {}", radio);
        let _ = events.send(ScanEvent::Blocked(Failure::RadioUnavailable { state: radio })).await;
        return;
    }

    if let PermissionOutcome::Denied { missing } = permissions.acquire().await {
        let _ = events.send(ScanEvent::Blocked(Failure::PermissionDenied { missing })).await;
        return;
    }

    let advertisements = match transport.start_discovery().await {
        Ok(v) => v,
        Err(err) => {
            warn!("Scanning failed {:?}", err);
            stop_discovery(&*transport).await;
            let _ = events.send(ScanEvent::Failed(err)).await;
            return;
        },
    };

    let _ = events.send(ScanEvent::Started).await;

    let mut advertisements = discovery_window(advertisements, window, cancel);
    while let Some(item) = advertisements.next().await {
        match item {
            Ok(advertisement) => {
                let _ = events.send(ScanEvent::Sighted(advertisement)).await;
            },
            Err(err) => {
                warn!("Scanning failed {:?}", err);
                stop_discovery(&*transport).await;
                let _ = events.send(ScanEvent::Failed(err)).await;
                return;
            },
        }
    }

    stop_discovery(&*transport).await;
    info!("Scan finished");
    let _ = events.send(ScanEvent::Finished).await;
}
