use uuid::Uuid;

use crate::error::DeskError;

/// Linak DPG service and characteristic UUIDs used by the Idasen desk.
/// Based on reverse engineering of the Linak BLE protocol.

// Main control service advertised by the desk
pub const CONTROL_SERVICE_UUID: Uuid = Uuid::from_u128(0x99fa0001_338a_1024_8a49_009c0215f78a);

// Characteristic for discrete movement commands (stop, wake, up, down)
pub const COMMAND_UUID: Uuid = Uuid::from_u128(0x99fa0002_338a_1024_8a49_009c0215f78a);

// Characteristic for reading the current height (raw units)
pub const HEIGHT_UUID: Uuid = Uuid::from_u128(0x99fa0021_338a_1024_8a49_009c0215f78a);

// Characteristic for the continuously-asserted target position
pub const REFERENCE_INPUT_UUID: Uuid = Uuid::from_u128(0x99fa0031_338a_1024_8a49_009c0215f78a);

/// Raw height units are tenths of a millimeter above this floor.
pub const HEIGHT_OFFSET_MM: f64 = 620.0;

/// Lowest position the desk can physically reach.
pub const HEIGHT_MIN_MM: f64 = 620.0;

/// Highest position the desk can physically reach.
pub const HEIGHT_MAX_MM: f64 = 1270.0;

/// Discrete movement commands, each a fixed opcode sent as a
/// little-endian u16 on the command characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Stop all movement
    Stop = 255,
    /// Wake the controller so it honors reference-position writes
    Wakeup = 254,
    /// Nudge the desk up
    Up = 71,
    /// Nudge the desk down
    Down = 70,
}

impl Command {
    /// Encode the command for transmission. Total over the command set.
    pub fn encode(self) -> [u8; 2] {
        (self as u16).to_le_bytes()
    }
}

/// Parse a height reading from the height characteristic.
///
/// The desk reports either a 16-bit or a 32-bit little-endian raw value
/// depending on firmware; any other payload length is a protocol mismatch.
pub fn decode_height(data: &[u8]) -> Result<f64, DeskError> {
    let raw = match data.len() {
        2 => u16::from_le_bytes([data[0], data[1]]) as u32,
        4 => u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
        len => return Err(DeskError::BadHeightPayload(len)),
    };
    Ok(raw as f64 / 10.0 + HEIGHT_OFFSET_MM)
}

/// Encode a height in millimeters as a raw little-endian u16, rounding to
/// the nearest raw unit.
///
/// Callers keep the height inside the desk's physical travel
/// ([`HEIGHT_MIN_MM`]..=[`HEIGHT_MAX_MM`]); out-of-range values saturate
/// rather than wrap.
pub fn encode_height(height_mm: f64) -> [u8; 2] {
    let raw = ((height_mm - HEIGHT_OFFSET_MM) * 10.0).round() as u16;
    raw.to_le_bytes()
}
