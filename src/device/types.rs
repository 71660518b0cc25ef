use std::fmt;
use tokio::time::Instant;

use crate::device::command::{Direction, SpeedStep};
use crate::device::constants::UNKNOWN_PERIPHERAL_NAME;
use crate::error::Failure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    Unknown,
    PoweredOn,
    PoweredOff,
    Unauthorized,
    Unsupported,
}

impl RadioState {
    pub fn is_powered_on(&self) -> bool {
        *self == RadioState::PoweredOn
    }
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            RadioState::Unknown => "state unknown",
            RadioState::PoweredOn => "powered on",
            RadioState::PoweredOff => "powered off",
            RadioState::Unauthorized => "not authorized",
            RadioState::Unsupported => "not supported",
        };

        write!(f, "{}", result)
    }
}

/// The connection lifecycle as seen by the user. The peripheral id is carried by exactly the
/// states that have an active peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Scanning,
    Connecting { peripheral_id: String },
    Connected { peripheral_id: String },
    Disconnecting { peripheral_id: String },
}

impl SessionState {
    pub fn active_peripheral_id(&self) -> Option<&str> {
        match self {
            SessionState::Idle | SessionState::Scanning => None,
            SessionState::Connecting { peripheral_id }
            | SessionState::Connected { peripheral_id }
            | SessionState::Disconnecting { peripheral_id } => Some(peripheral_id),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Scanning => write!(f, "Scanning..."),
            SessionState::Connecting { peripheral_id } => write!(f, "Connecting to {}...", peripheral_id),
            SessionState::Connected { peripheral_id } => write!(f, "Connected to {}", peripheral_id),
            SessionState::Disconnecting { peripheral_id } => write!(f, "Disconnecting from {}...", peripheral_id),
        }
    }
}

/// A single advertisement observed during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: String,
    pub local_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceIcon {
    Vehicle,
    SerialModule,
    Generic,
}

impl DeviceIcon {
    pub fn classify(name: &str) -> DeviceIcon {
        let name = name.to_lowercase();
        if name.contains("esp") {
            DeviceIcon::Vehicle
        }
        else if name.contains("hc") {
            DeviceIcon::SerialModule
        }
        else {
            DeviceIcon::Generic
        }
    }

    pub fn symbol(&self) -> char {
        match self {
            DeviceIcon::Vehicle => '🚗',
            DeviceIcon::SerialModule => '📡',
            DeviceIcon::Generic => '📱',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralRecord {
    pub id: String,
    pub display_name: String,
    pub first_seen: Instant,
    pub last_seen: Instant,
    pub icon: DeviceIcon,
}

impl PeripheralRecord {
    pub fn new(id: String, name: Option<&str>, seen_at: Instant) -> Self {
        let display_name = match name {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => UNKNOWN_PERIPHERAL_NAME.to_string(),
        };

        PeripheralRecord {
            id,
            icon: DeviceIcon::classify(&display_name),
            display_name,
            first_seen: seen_at,
            last_seen: seen_at,
        }
    }
}

/// What the presentation layer may ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Scan,
    Connect { peripheral_id: String },
    Send(Direction),
    AdjustSpeed(SpeedStep),
    Disconnect,
}

/// The operation that a failed notice offers to repeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retry {
    Scan,
    Connect { peripheral_id: String },
}

impl From<Retry> for Intent {
    fn from(retry: Retry) -> Self {
        match retry {
            Retry::Scan => Intent::Scan,
            Retry::Connect { peripheral_id } => Intent::Connect { peripheral_id },
        }
    }
}

/// User facing events, each one is meant to be shown to (and acknowledged by) the user.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Failure { failure: Failure, retry: Option<Retry> },
    NoPeripheralsFound,
    Connected { peripheral_id: String, name: String },
    Disconnected { peripheral_id: String },
    RadioLost { peripheral_id: String },
    // a command was issued without a connection; a scan has been started on behalf of the user
    ConnectRequired,
}

impl Notice {
    pub fn retry(&self) -> Option<Retry> {
        match self {
            Notice::Failure { retry, .. } => retry.clone(),
            Notice::NoPeripheralsFound => Some(Retry::Scan),
            _ => None,
        }
    }
}

/// Everything the presentation layer needs to render the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub state: SessionState,
    pub radio: RadioState,
    pub peripherals: Vec<PeripheralRecord>,
    pub speed: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icons_are_derived_from_the_name() {
        assert_eq!(DeviceIcon::classify("ESP32-CAR"), DeviceIcon::Vehicle);
        assert_eq!(DeviceIcon::classify("HC-08"), DeviceIcon::SerialModule);
        assert_eq!(DeviceIcon::classify("Pixel Buds"), DeviceIcon::Generic);
    }

    #[test]
    fn blank_names_use_the_placeholder() {
        let record = PeripheralRecord::new("AA:BB".to_string(), Some("  "), Instant::now());
        assert_eq!(record.display_name, UNKNOWN_PERIPHERAL_NAME);
        assert_eq!(record.icon, DeviceIcon::Generic);
    }

    #[test]
    fn only_link_states_have_an_active_peripheral() {
        assert_eq!(SessionState::Idle.active_peripheral_id(), None);
        assert_eq!(SessionState::Scanning.active_peripheral_id(), None);

        let state = SessionState::Disconnecting { peripheral_id: "AA:BB".to_string() };
        assert_eq!(state.active_peripheral_id(), Some("AA:BB"));
    }

    #[test]
    fn session_states_are_plain_ascii() {
        assert_eq!(SessionState::Scanning.to_string(), "Scanning...");

        let state = SessionState::Connecting { peripheral_id: "AA:BB".to_string() };
        assert_eq!(state.to_string(), "Connecting to AA:BB...");

        let state = SessionState::Disconnecting { peripheral_id: "AA:BB".to_string() };
        assert_eq!(state.to_string(), "Disconnecting from AA:BB...");
        assert!(state.to_string().is_ascii());
    }

    #[test]
    fn notices_offer_retries() {
        assert_eq!(Notice::NoPeripheralsFound.retry(), Some(Retry::Scan));
        assert_eq!(Notice::ConnectRequired.retry(), None);

        let retry = Retry::Connect { peripheral_id: "AA:BB".to_string() };
        assert_eq!(Intent::from(retry), Intent::Connect { peripheral_id: "AA:BB".to_string() });
    }
}
