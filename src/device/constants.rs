use uuid::Uuid;

/**
 * How long (milliseconds) a scan for nearby peripherals runs before it is stopped.
 */
pub const SCAN_DURATION: u64 = 5000;

/**
 * How long (milliseconds) connecting to a peripheral may take.
 */
pub const CONNECT_TIMEOUT: u64 = 10000;

/**
 * The UUID of the Bluetooth BLE service exposed by the car (HM-10 style serial bridge).
 */
pub const CAR_SERVICE: Uuid = Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);

/**
 * The UUID of the Bluetooth BLE remote GATT characteristic to send commands to.
 */
pub const CAR_COMMAND_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

pub const MIN_SPEED: u8 = 100;
pub const MAX_SPEED: u8 = 255;
pub const DEFAULT_SPEED: u8 = 200;
pub const SPEED_INCREMENT: u8 = 20;

/**
 * Shown in place of a peripheral name that could not be determined.
 */
pub const UNKNOWN_PERIPHERAL_NAME: &str = "Unknown device";

/**
 * Android API level starting from which BLUETOOTH_SCAN and BLUETOOTH_CONNECT are runtime
 * permissions (Android 12).
 */
pub const ANDROID_BLE_PERMISSIONS_API_LEVEL: u32 = 31;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuids_match_the_car_firmware() {
        assert_eq!(CAR_SERVICE.to_string(), "0000ffe0-0000-1000-8000-00805f9b34fb");
        assert_eq!(CAR_COMMAND_CHARACTERISTIC.to_string(), "0000ffe1-0000-1000-8000-00805f9b34fb");
    }
}
