use thiserror::Error;

/// I/O-level failures from the HID transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no matching device found")]
    DeviceNotFound,

    #[error("device disconnected")]
    Disconnected,

    #[error("operation timed out")]
    Timeout,

    #[error("response shorter than 64 bytes")]
    ShortResponse,

    #[error("response carries the 0xAAFF error marker")]
    ErrorMarker,

    #[error("CRC mismatch: expected {expected:04x}, got {actual:04x}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("response sequence token {actual:04x} does not match request CRC {expected:04x}")]
    SequenceMismatch { expected: u16, actual: u16 },

    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    #[error("permission denied opening HID device (udev rules not installed?)")]
    PermissionDenied,

    #[error("internal transport error: {0}")]
    Internal(String),
}

impl TransportError {
    /// Classify a raw hidapi error, distinguishing permission failures
    /// (missing udev rule) from generic I/O failures.
    pub fn from_hid_error(err: hidapi::HidError) -> Self {
        let msg = err.to_string();
        if msg.contains("Permission denied") || msg.contains("Access denied") {
            TransportError::PermissionDenied
        } else {
            TransportError::Hid(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
