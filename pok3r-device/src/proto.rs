//! Common protocol contract consumed by the CLI (spec §4.0).

use crate::error::DeviceError;

/// Outcome of a protocol operation. Mirrors the original `KBStatus` enum
/// (`SUCCESS`, `ERR_NOT_IMPLEMENTED`, `ERR_USAGE`, `ERR_IO`, `ERR_FLASH`,
/// `ERR_CRC`, `ERR_FALSE`/`ERR_FAIL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    NotImplemented,
    UsageError,
    IoError,
    FlashError,
    CrcError,
    Fail,
}

impl From<&DeviceError> for Status {
    fn from(err: &DeviceError) -> Self {
        match err {
            DeviceError::Transport(_) => Status::IoError,
            DeviceError::FlashMismatch => Status::FlashError,
            DeviceError::NotSupported => Status::NotImplemented,
            DeviceError::UsageError(_) => Status::UsageError,
            DeviceError::NotQmk => Status::Fail,
            DeviceError::UnknownPackage => Status::Fail,
        }
    }
}

/// Capability facet exposed by devices that run QMK firmware, layered atop
/// C6/C7's transport (spec C9).
pub trait QmkExtension {
    fn is_qmk(&mut self) -> bool;
}

/// The shared interface implemented by every protocol front-end: POK3R
/// (C6), CYKB (C7), and Holtek ISP (C8). A capability-interface dispatched
/// by an enum of protocol kinds, per spec §9 ("avoid deep inheritance").
pub trait KBProto {
    fn open(&mut self) -> Result<(), DeviceError>;
    fn close(&mut self);
    fn is_open(&self) -> bool;

    fn is_bootloader(&self) -> bool {
        false
    }
    fn is_qmk(&mut self) -> bool {
        false
    }

    fn reboot_to_firmware(&mut self, reopen: bool) -> Result<(), DeviceError>;
    fn reboot_to_bootloader(&mut self, reopen: bool) -> Result<(), DeviceError>;

    fn read_version(&mut self) -> Result<String, DeviceError>;
    fn clear_version(&mut self) -> Status {
        Status::NotImplemented
    }
    fn set_version(&mut self, _version: &str) -> Status {
        Status::NotImplemented
    }

    fn get_info(&mut self) -> Status {
        Status::NotImplemented
    }

    fn dump_flash(&mut self) -> Result<Vec<u8>, DeviceError> {
        Ok(Vec::new())
    }

    fn write_firmware(&mut self, fw: &[u8]) -> Result<bool, DeviceError>;

    fn erase_and_check(&mut self) -> Result<bool, DeviceError> {
        Ok(false)
    }

    /// Chains: reboot to bootloader -> clear version -> write firmware ->
    /// set version -> reboot to firmware.
    fn update(&mut self, version: &str, fw: &[u8]) -> Result<bool, DeviceError> {
        self.reboot_to_bootloader(true)?;

        if self.clear_version() != Status::Success {
            return Ok(false);
        }

        if !self.write_firmware(fw)? {
            return Ok(false);
        }

        if self.set_version(version) != Status::Success {
            return Ok(false);
        }

        self.reboot_to_firmware(false)?;
        Ok(true)
    }
}

/// Tag for which wire protocol a given `KBProto` object speaks. Devices are
/// constructed with one of these fixed at creation time; QMK is detected at
/// runtime as an optional extension facet, not a fourth variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    Pok3r,
    Cykb,
    Holtek,
}
