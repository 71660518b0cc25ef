use std::sync::Arc;
use std::time::Duration;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::device::monitor::query_radio_state;
use crate::device::transport::{BleTransport, PeripheralLink};
use crate::error::{ConnectFailureKind, Failure, TransportError};

#[derive(Debug)]
pub enum ConnectError {
    Timeout(Duration),
    Cancelled,
    Transport(TransportError),
}

impl ConnectError {
    pub fn classify(&self) -> Failure {
        match self {
            ConnectError::Timeout(timeout) => Failure::ConnectTimeout { timeout: *timeout },
            ConnectError::Cancelled => Failure::ConnectFailure {
                kind: ConnectFailureKind::Transport,
                message: "the connection attempt was cancelled".to_string(),
            },
            ConnectError::Transport(err) => Failure::from_connect_error(err),
        }
    }
}

type Attempt<L> = JoinHandle<Result<L, TransportError>>;

/// Races a connect attempt against `timeout` and `cancel`. The attempt runs in its own task; when
/// it loses the race it is cancelled, and a link that is established anyway is released.
///
/// After a timeout the release happens in the background. After `cancel` it is awaited, so that
/// nothing is left connected once the caller is done.
pub async fn connect_with_timeout<T: BleTransport>(
    transport: Arc<T>,
    peripheral_id: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T::Link, ConnectError> {
    let mut attempt: Attempt<T::Link> = spawn({
        let transport = transport.clone();
        let peripheral_id = peripheral_id.to_string();
        async move { transport.connect(&peripheral_id).await }
    });

    tokio::select! {
        result = &mut attempt => match result {
            Ok(Ok(link)) => Ok(link),
            Ok(Err(err)) => Err(ConnectError::Transport(err)),
            Err(err) => Err(ConnectError::Transport(TransportError::Abandoned(err.to_string()))),
        },
        _ = sleep(timeout) => {
            warn!("Connecting to {} took too long", peripheral_id);
            spawn(abandon_attempt(transport, peripheral_id.to_string(), attempt));
            Err(ConnectError::Timeout(timeout))
        },
        _ = cancel.cancelled() => {
            info!("Connecting to {} was cancelled", peripheral_id);
            abandon_attempt(transport, peripheral_id.to_string(), attempt).await;
            Err(ConnectError::Cancelled)
        },
    }
}

async fn abandon_attempt<T: BleTransport>(transport: Arc<T>, peripheral_id: String, attempt: Attempt<T::Link>) {
    if let Err(err) = transport.cancel_connect(&peripheral_id).await {
        warn!("Failed to cancel connecting to {}: {:?}", peripheral_id, err);
    }

    match attempt.await {
        Ok(Ok(link)) => {
            info!("Releasing connection to {} that completed after it was abandoned", peripheral_id);
            release_link(&link).await;
        },
        Ok(Err(err)) => debug!("Abandoned connect to {} ended with {:?}", peripheral_id, err),
        Err(err) => warn!("Failed to join abandoned connect to {}: {:?}", peripheral_id, err),
    }
}

/// Disconnects a link nobody is interested in anymore.
pub async fn release_link<L: PeripheralLink>(link: &L) {
    if let Err(err) = link.disconnect().await {
        warn!("Failed to release connection to {}: {:?}", link.peripheral_id(), err);
    }
}

/// Connects to a peripheral and makes sure it can receive commands. A link that exists when
/// `cancel` fires is released before this returns.
pub async fn establish<T: BleTransport>(
    transport: Arc<T>,
    peripheral_id: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T::Link, Failure> {
    let radio = query_radio_state(&*transport).await;
    if !radio.is_powered_on() {
        info!("Not connecting, bluetooth radio is {}", radio);
        return Err(Failure::RadioUnavailable { state: radio });
    }

    info!("Connecting to peripheral {}...", peripheral_id);
    let link = match connect_with_timeout(transport, peripheral_id, timeout, cancel).await {
        Ok(v) => v,
        Err(err) => {
            warn!("Connecting to peripheral failed: {:?}", err);
            return Err(err.classify());
        },
    };

    let discovered = tokio::select! {
        result = link.discover_capabilities() => result,
        _ = cancel.cancelled() => {
            info!("Connecting to {} was cancelled during capability discovery", peripheral_id);
            release_link(&link).await;
            return Err(ConnectError::Cancelled.classify());
        },
    };

    if let Err(err) = discovered {
        warn!("Discovering capabilities of {} failed: {:?}", peripheral_id, err);
        release_link(&link).await;
        return Err(Failure::from_connect_error(&err));
    }

    info!("Peripheral {} ready", peripheral_id);
    Ok(link)
}
