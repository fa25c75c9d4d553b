use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the desk core and its BLE collaborator.
///
/// Codec and transport failures are fatal to the session they occur in;
/// nothing here is retried automatically.
#[derive(Error, Debug)]
pub enum DeskError {
    /// The height characteristic returned a payload the codec cannot read.
    #[error("unexpected height payload length {0} (want 2 or 4 bytes)")]
    BadHeightPayload(usize),

    /// The connected device lacks one of the Linak control characteristics.
    #[error("characteristic {0} not found on device (not an Idasen desk?)")]
    MissingCharacteristic(Uuid),

    /// Connect, read or write failure at the BLE layer.
    #[error("bluetooth error: {0}")]
    Transport(#[from] btleplug::Error),

    /// No Bluetooth adapter is available on this machine.
    #[error("no Bluetooth adapter found")]
    NoAdapter,

    /// The configured desk never showed up during the connect scan.
    #[error("desk {0} not found (check that it is powered and in range)")]
    DeskNotFound(String),

    /// The move target is neither a known preset nor a height in mm.
    #[error("unknown preset '{token}', available: {}", .known.join(", "))]
    UnknownPreset { token: String, known: Vec<String> },

    /// No desk has been paired yet.
    #[error("no desk configured, run `idasen scan` to find and save yours")]
    NotConfigured,
}
