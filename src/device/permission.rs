use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use async_trait::async_trait;
use log::{info, warn};

use crate::device::constants::ANDROID_BLE_PERMISSIONS_API_LEVEL;
use crate::error::PermissionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    FineLocation,
    CoarseLocation,
    BluetoothScan,
    BluetoothConnect,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            Permission::FineLocation => "Precise location",
            Permission::CoarseLocation => "Approximate location",
            Permission::BluetoothScan => "Bluetooth scan",
            Permission::BluetoothConnect => "Bluetooth connect",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    Granted,
    Denied,
    NeverAskAgain,
}

/// How the platform guards access to the BLE radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionModel {
    /// Desktop platforms: access is granted by the OS without a runtime prompt.
    NoRuntimePermissions,
    Android { api_level: u32 },
}

impl PermissionModel {
    pub fn required_permissions(&self) -> Vec<Permission> {
        match self {
            PermissionModel::NoRuntimePermissions => Vec::new(),
            PermissionModel::Android { api_level } if *api_level >= ANDROID_BLE_PERMISSIONS_API_LEVEL => vec![
                Permission::FineLocation,
                Permission::BluetoothScan,
                Permission::BluetoothConnect,
            ],
            PermissionModel::Android { .. } => vec![
                Permission::FineLocation,
                Permission::CoarseLocation,
            ],
        }
    }
}

/// Shows the native permission dialog. Implemented by the host platform.
#[async_trait]
pub trait PermissionRequester: Send + Sync {
    async fn request(&self, permissions: &[Permission]) -> Result<HashMap<Permission, Grant>, PermissionError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted,
    Denied { missing: Vec<Permission> },
}

pub struct PermissionGate {
    model: PermissionModel,
    requester: Option<Arc<dyn PermissionRequester>>,
}

impl PermissionGate {
    pub fn new(model: PermissionModel, requester: Arc<dyn PermissionRequester>) -> Self {
        PermissionGate { model, requester: Some(requester) }
    }

    pub fn unrestricted() -> Self {
        PermissionGate { model: PermissionModel::NoRuntimePermissions, requester: None }
    }

    pub async fn acquire(&self) -> PermissionOutcome {
        let required = self.model.required_permissions();
        if required.is_empty() {
            return PermissionOutcome::Granted;
        }

        let requester = match &self.requester {
            Some(requester) => requester,
            None => {
                warn!("No way to request permissions for {:?}", self.model);
                return PermissionOutcome::Denied { missing: required };
            },
        };

        info!("Requesting permissions {:?}", required);
        let grants = match requester.request(&required).await {
            Ok(grants) => grants,
            Err(err) => {
                warn!("Permission request failed: {:?}", err);
                HashMap::new()
            },
        };

        let missing: Vec<Permission> = required
            .into_iter()
            .filter(|permission| grants.get(permission) != Some(&Grant::Granted))
            .collect();

        if missing.is_empty() {
            PermissionOutcome::Granted
        }
        else {
            info!("Permissions not granted: {:?}", missing);
            PermissionOutcome::Denied { missing }
        }
    }
}
