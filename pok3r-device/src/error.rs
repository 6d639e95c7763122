use thiserror::Error;

use pok3r_transport::TransportError;

/// Protocol-level failures layered over [`TransportError`].
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("device reports a flash mismatch after write")]
    FlashMismatch,

    #[error("operation not supported by this protocol variant")]
    NotSupported,

    #[error("bad argument: {0}")]
    UsageError(String),

    #[error("device is not QMK-enabled")]
    NotQmk,

    #[error("updater fingerprint not recognized")]
    UnknownPackage,
}

pub type Result<T> = std::result::Result<T, DeviceError>;
