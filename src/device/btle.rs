use async_trait::async_trait;
use futures::future;
use futures::stream::{self, StreamExt};
use btleplug::api::{Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use log::{debug, info, warn};

use crate::device::constants::{CAR_COMMAND_CHARACTERISTIC, CAR_SERVICE};
use crate::device::transport::{AdvertisementStream, BleTransport, PeripheralLink, RadioStateStream};
use crate::device::types::{Advertisement, RadioState};
use crate::error::TransportError;

fn radio_state_from_central(state: CentralState) -> RadioState {
    match state {
        CentralState::PoweredOn => RadioState::PoweredOn,
        CentralState::PoweredOff => RadioState::PoweredOff,
        _ => RadioState::Unknown,
    }
}

async fn find_peripheral(adapter: &Adapter, peripheral_id: &str) -> Result<Peripheral, TransportError> {
    for peripheral in adapter.peripherals().await? {
        if peripheral.id().to_string() == peripheral_id {
            return Ok(peripheral);
        }
    }

    Err(TransportError::PeripheralNotFound(peripheral_id.to_string()))
}

async fn read_advertisement(adapter: &Adapter, id: &PeripheralId) -> Option<Advertisement> {
    let peripheral = match adapter.peripheral(id).await {
        Ok(v) => v,
        Err(err) => {
            warn!("Failed to query BLE adapter for peripheral {}: {}", id, err);
            return None;
        },
    };

    match peripheral.properties().await {
        Err(err) => {
            warn!("Could not query peripheral for properties: {:?}", err);
            None
        },
        Ok(None) => {
            debug!("Peripheral {} has no properties", id);
            None
        },
        Ok(Some(properties)) => Some(Advertisement {
            id: id.to_string(),
            local_name: properties.local_name,
        }),
    }
}

/// The BLE radio of this machine, backed by btleplug. Uses the first adapter reported by the OS.
pub struct BtleTransport {
    // the manager owns the connection to the OS bluetooth stack and must outlive the adapter
    _manager: Manager,
    adapter: Option<Adapter>,
}

impl BtleTransport {
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager.adapters().await?.into_iter().next();

        match &adapter {
            Some(adapter) => info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string())),
            None => warn!("No bluetooth adapter found"),
        }

        Ok(BtleTransport { _manager: manager, adapter })
    }

    fn adapter(&self) -> Result<&Adapter, TransportError> {
        self.adapter.as_ref().ok_or(TransportError::NoAdapter)
    }
}

#[async_trait]
impl BleTransport for BtleTransport {
    type Link = BtleLink;

    async fn radio_state(&self) -> Result<RadioState, TransportError> {
        let adapter = match &self.adapter {
            Some(adapter) => adapter,
            None => return Ok(RadioState::Unsupported),
        };

        match adapter.adapter_state().await {
            Ok(state) => Ok(radio_state_from_central(state)),
            Err(btleplug::Error::PermissionDenied) => Ok(RadioState::Unauthorized),
            Err(btleplug::Error::NotSupported(_)) => Ok(RadioState::Unsupported),
            Err(err) => Err(err.into()),
        }
    }

    async fn radio_state_changes(&self) -> Result<RadioStateStream, TransportError> {
        let adapter = match &self.adapter {
            Some(adapter) => adapter,
            None => return Ok(stream::empty().boxed()),
        };

        let states = adapter.events().await?
            .filter_map(|event| future::ready(match event {
                CentralEvent::StateUpdate(state) => Some(radio_state_from_central(state)),
                _ => None,
            }))
            .boxed();

        Ok(states)
    }

    async fn start_discovery(&self) -> Result<AdvertisementStream, TransportError> {
        let adapter = self.adapter()?.clone();

        // subscribe before scanning, so that no advertisement is missed
        let events = adapter.events().await?;

        info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        adapter.start_scan(ScanFilter::default()).await?;

        let advertisements = events
            .filter_map(|event| future::ready(match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => Some(id),
                _ => None,
            }))
            .filter_map(move |id| {
                let adapter = adapter.clone();
                async move { read_advertisement(&adapter, &id).await }
            })
            .map(Ok::<Advertisement, TransportError>)
            .boxed();

        Ok(advertisements)
    }

    async fn stop_discovery(&self) -> Result<(), TransportError> {
        self.adapter()?.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, peripheral_id: &str) -> Result<BtleLink, TransportError> {
        let adapter = self.adapter()?;
        let peripheral = find_peripheral(adapter, peripheral_id).await?;

        peripheral.connect().await?;

        Ok(BtleLink {
            peripheral_id: peripheral_id.to_string(),
            peripheral,
            adapter: adapter.clone(),
        })
    }

    async fn cancel_connect(&self, peripheral_id: &str) -> Result<(), TransportError> {
        let adapter = self.adapter()?;

        match find_peripheral(adapter, peripheral_id).await {
            Ok(peripheral) => {
                peripheral.disconnect().await?;
                Ok(())
            },
            Err(TransportError::PeripheralNotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        if let Some(adapter) = &self.adapter {
            adapter.stop_scan().await?;
        }
        info!("Bluetooth transport released");
        Ok(())
    }
}

#[derive(Clone)]
pub struct BtleLink {
    peripheral_id: String,
    peripheral: Peripheral,
    adapter: Adapter,
}

impl BtleLink {
    // only valid after discover_services()
    fn command_characteristic(&self) -> Result<Characteristic, TransportError> {
        for service in self.peripheral.services() {
            if !service.uuid.eq(&CAR_SERVICE) {
                continue;
            }

            for characteristic in &service.characteristics {
                if characteristic.uuid.eq(&CAR_COMMAND_CHARACTERISTIC) {
                    return Ok(characteristic.clone());
                }
            }
        }

        Err(TransportError::MissingCharacteristic)
    }
}

#[async_trait]
impl PeripheralLink for BtleLink {
    fn peripheral_id(&self) -> &str {
        &self.peripheral_id
    }

    async fn discover_capabilities(&self) -> Result<(), TransportError> {
        info!("Connected; Discovering services...");
        self.peripheral.discover_services().await?;

        let characteristic = self.command_characteristic()?;
        info!("Using characteristic {:?} {:?}", characteristic.service_uuid, characteristic.uuid);
        Ok(())
    }

    async fn write_command(&self, payload: &[u8]) -> Result<(), TransportError> {
        let characteristic = self.command_characteristic()?;
        self.peripheral.write(&characteristic, payload, WriteType::WithResponse).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn disconnected(&self) -> Result<(), TransportError> {
        let id = self.peripheral.id();
        let mut events = self.adapter.events().await?;

        // the link may have dropped before we subscribed
        if !self.peripheral.is_connected().await? {
            return Ok(());
        }

        while let Some(event) = events.next().await {
            if let CentralEvent::DeviceDisconnected(disconnected_id) = event {
                if disconnected_id == id {
                    info!("Peripheral {} disconnected", self.peripheral_id);
                    return Ok(());
                }
            }
        }

        // the adapter event stream only ends when the bluetooth stack went away
        warn!("Adapter event stream ended while connected to {}", self.peripheral_id);
        Ok(())
    }
}
