use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::device::types::{Advertisement, RadioState};
use crate::error::TransportError;

pub type AdvertisementStream = BoxStream<'static, Result<Advertisement, TransportError>>;
pub type RadioStateStream = BoxStream<'static, RadioState>;

/// The local BLE radio and everything that happens before a peripheral is connected.
#[async_trait]
pub trait BleTransport: Send + Sync + 'static {
    type Link: PeripheralLink;

    /// Point in time query of the radio state.
    async fn radio_state(&self) -> Result<RadioState, TransportError>;

    /// Radio state changes, not including the current state.
    async fn radio_state_changes(&self) -> Result<RadioStateStream, TransportError>;

    /// Starts an unfiltered discovery. The stream is unbounded, it ends only if the underlying
    /// stack goes away; use `stop_discovery` to stop the radio.
    async fn start_discovery(&self) -> Result<AdvertisementStream, TransportError>;

    async fn stop_discovery(&self) -> Result<(), TransportError>;

    async fn connect(&self, peripheral_id: &str) -> Result<Self::Link, TransportError>;

    /// Abandons a connect attempt that is still in flight.
    async fn cancel_connect(&self, peripheral_id: &str) -> Result<(), TransportError>;

    /// Releases the radio. No other method may be called afterwards.
    async fn shutdown(&self) -> Result<(), TransportError>;
}

/// A live connection to a peripheral.
#[async_trait]
pub trait PeripheralLink: Clone + Send + Sync + 'static {
    fn peripheral_id(&self) -> &str;

    /// Enumerates services and characteristics, fails if the command characteristic is missing.
    async fn discover_capabilities(&self) -> Result<(), TransportError>;

    /// Writes to the command characteristic and waits for the acknowledgement.
    async fn write_command(&self, payload: &[u8]) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Resolves once the link is gone, whoever ended it.
    async fn disconnected(&self) -> Result<(), TransportError>;
}
