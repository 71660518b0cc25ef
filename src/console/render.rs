use crate::device::types::{Notice, PeripheralRecord, Snapshot};

pub const HELP: &str = "\
Commands:
  scan              search for nearby devices
  list              show the devices found by the last scan
  connect <n|id>    connect to a device by list number or id
  f, b, l, r, s     forward, backward, left, right, stop
  +, -              increase or decrease the speed
  disconnect        close the connection
  retry             repeat the operation that last failed
  status            show the connection state
  help              show this text
  quit              exit the application";

pub fn describe_notice(notice: &Notice) -> String {
    let mut text = match notice {
        Notice::Failure { failure, .. } => failure.to_string(),
        Notice::NoPeripheralsFound => "No devices found. Make sure the car is switched on and nearby.".to_string(),
        Notice::Connected { peripheral_id, name } => format!("Connected to {} ({})", name, peripheral_id),
        Notice::Disconnected { peripheral_id } => format!("Disconnected from {}", peripheral_id),
        Notice::RadioLost { peripheral_id } => {
            format!("Bluetooth was turned off, the connection to {} is lost", peripheral_id)
        },
        Notice::ConnectRequired => "Connect to your car first. Scanning for devices...".to_string(),
    };

    match notice {
        Notice::Failure { failure, retry: Some(_) } if failure.needs_manual_remediation() => {
            text.push_str(" Type \"retry\" once that is done.");
        },
        _ if notice.retry().is_some() => text.push_str(" Type \"retry\" to try again."),
        _ => {},
    }
    text
}

pub fn describe_peripherals(peripherals: &[PeripheralRecord]) -> String {
    if peripherals.is_empty() {
        return "No devices found yet, type \"scan\" to search.".to_string();
    }

    peripherals
        .iter()
        .enumerate()
        .map(|(index, record)| format!("{:>3}. {} {} ({})", index + 1, record.icon.symbol(), record.display_name, record.id))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn describe_status(snapshot: &Snapshot) -> String {
    format!(
        "Session: {}\nBluetooth: {}\nSpeed: {}\nDevices found: {}",
        snapshot.state,
        snapshot.radio,
        snapshot.speed,
        snapshot.peripherals.len(),
    )
}
