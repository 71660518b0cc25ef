use std::io;
use std::str::Utf8Error;
use std::time::Duration;
use thiserror::Error;
use btleplug;
use serde_json;

use crate::device::command::Command;
use crate::device::constants::CONNECT_TIMEOUT;
use crate::device::permission::Permission;
use crate::device::types::RadioState;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (logging): {source}")]
    Logging { #[from] source: fern::InitError },

    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (bluetooth): {source}")]
    Transport { #[from] source: TransportError },

    #[error("Failed to read from the terminal: {source}")]
    Io { #[from] source: io::Error },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Peripheral {0} not found")]
    PeripheralNotFound(String),

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("Connection attempt was abandoned: {0}")]
    Abandoned(String),

    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum PermissionError {
    #[error("Permission request failed: {0}")]
    Request(String),
}

#[derive(Error, Debug)]
pub enum InputError {
    #[error("Unknown command \"{0}\", type \"help\" for a list of commands")]
    UnknownCommand(String),

    #[error("\"{0}\" needs an argument")]
    MissingArgument(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailureKind {
    NotFound,
    Transport,
}

/// A failure of a user operation (scan, connect, send), as presented to the user.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Failure {
    #[error("Bluetooth is not available ({state}). Turn Bluetooth on in the system settings and try again.")]
    RadioUnavailable { state: RadioState },

    #[error("{}", describe_missing_permissions(missing))]
    PermissionDenied { missing: Vec<Permission> },

    #[error("Scanning for devices failed: {message}")]
    ScanTransportError { message: String },

    #[error("Connecting timed out after {}. Make sure the car is switched on and nearby.", humantime::format_duration(*timeout))]
    ConnectTimeout { timeout: Duration },

    #[error("{}", describe_connect_failure(*kind, message))]
    ConnectFailure { kind: ConnectFailureKind, message: String },

    #[error("Could not send {command} to the car: {message}")]
    CommandTransmissionFailure { command: Command, message: String },
}

fn describe_missing_permissions(missing: &[Permission]) -> String {
    if missing.is_empty() {
        return "The application needs Bluetooth and location permissions to work.".to_string();
    }

    let names = missing.iter().map(|permission| permission.to_string()).collect::<Vec<_>>();
    format!("The application needs the following permissions: {}", names.join(", "))
}

fn describe_connect_failure(kind: ConnectFailureKind, message: &str) -> String {
    match kind {
        ConnectFailureKind::NotFound => "Device not found. Make sure it is switched on and in range.".to_string(),
        ConnectFailureKind::Transport => format!("Could not connect: {}", message),
    }
}

enum MessageClass {
    RadioOff,
    PermissionDenied,
    Unsupported,
    Timeout,
    NotFound,
    Other,
}

// Platform stacks mostly report failures as free-form text
fn classify_message(message: &str) -> MessageClass {
    let message = message.to_lowercase();

    if message.contains("not enabled") || message.contains("disabled") || message.contains("powered off") {
        MessageClass::RadioOff
    }
    else if message.contains("permission") || message.contains("denied") {
        MessageClass::PermissionDenied
    }
    else if message.contains("not available") || message.contains("not supported") {
        MessageClass::Unsupported
    }
    else if message.contains("timeout") || message.contains("timed out") {
        MessageClass::Timeout
    }
    else if message.contains("not found") {
        MessageClass::NotFound
    }
    else {
        MessageClass::Other
    }
}

impl Failure {
    pub fn from_scan_error(error: &TransportError) -> Failure {
        match error {
            TransportError::NoAdapter
            | TransportError::Btle { source: btleplug::Error::NotSupported(_) } => {
                return Failure::RadioUnavailable { state: RadioState::Unsupported };
            },
            TransportError::Btle { source: btleplug::Error::PermissionDenied } => {
                return Failure::PermissionDenied { missing: Vec::new() };
            },
            _ => {},
        }

        let message = error.to_string();
        match classify_message(&message) {
            MessageClass::RadioOff => Failure::RadioUnavailable { state: RadioState::PoweredOff },
            MessageClass::PermissionDenied => Failure::PermissionDenied { missing: Vec::new() },
            MessageClass::Unsupported => Failure::RadioUnavailable { state: RadioState::Unsupported },
            _ => Failure::ScanTransportError { message },
        }
    }

    pub fn from_connect_error(error: &TransportError) -> Failure {
        match error {
            TransportError::NoAdapter => {
                return Failure::RadioUnavailable { state: RadioState::Unsupported };
            },
            TransportError::PeripheralNotFound(_)
            | TransportError::Btle { source: btleplug::Error::DeviceNotFound } => {
                return Failure::ConnectFailure { kind: ConnectFailureKind::NotFound, message: error.to_string() };
            },
            TransportError::Btle { source: btleplug::Error::TimedOut(timeout) } => {
                return Failure::ConnectTimeout { timeout: *timeout };
            },
            _ => {},
        }

        let message = error.to_string();
        match classify_message(&message) {
            MessageClass::Timeout => Failure::ConnectTimeout { timeout: Duration::from_millis(CONNECT_TIMEOUT) },
            MessageClass::NotFound => Failure::ConnectFailure { kind: ConnectFailureKind::NotFound, message },
            _ => Failure::ConnectFailure { kind: ConnectFailureKind::Transport, message },
        }
    }

    /// True for failures that the user can only fix outside of this application.
    pub fn needs_manual_remediation(&self) -> bool {
        matches!(self, Failure::RadioUnavailable { .. } | Failure::PermissionDenied { .. })
    }
}
