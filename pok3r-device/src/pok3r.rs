//! POK3R protocol (spec C6). Used by POK3R, KBP V60/V80, and similar
//! boards. CRC-bearing packets (C2 with [`Framing::Crc`]).

use tracing::{debug, info, warn};

use pok3r_transport::{discovery, Framing, HidTransport, UPDATE_USAGE, UPDATE_USAGE_PAGE};

use crate::error::DeviceError;
use crate::proto::{KBProto, ProtocolKind, Status};
use crate::qmk::QmkState;

const ERASE_CMD: u8 = 0;
const FLASH_CMD: u8 = 1;
const FLASH_CHECK_SUBCMD: u8 = 0;
const FLASH_WRITE_SUBCMD: u8 = 1;
const FLASH_READ_SUBCMD: u8 = 2;
const CRC_CMD: u8 = 2;
const RESET_CMD: u8 = 4;
const RESET_BOOT_SUBCMD: u8 = 0;
const RESET_BUILTIN_SUBCMD: u8 = 1;

const FW_BASE_DEFAULT: u32 = 0x2C00;
const VERSION_OFFSET: u32 = 0x400;
const REBOOT_SLEEP_MS: u64 = 5;

pub struct Pok3rProto {
    api: hidapi::HidApi,
    transport: Option<HidTransport>,
    vid: u16,
    pid: u16,
    boot_pid: u16,
    fw_base: u32,
    builtin: bool,
    qmk: QmkState,
}

impl Pok3rProto {
    pub fn new(vid: u16, pid: u16, boot_pid: u16, fw_base: u32) -> Result<Self, DeviceError> {
        let api = hidapi::HidApi::new().map_err(|e| {
            DeviceError::Transport(pok3r_transport::TransportError::from_hid_error(e))
        })?;
        Ok(Pok3rProto {
            api,
            transport: None,
            vid,
            pid,
            boot_pid,
            fw_base,
            builtin: false,
            qmk: QmkState::Unknown,
        })
    }

    fn transport(&self) -> Result<&HidTransport, DeviceError> {
        self.transport
            .as_ref()
            .ok_or(DeviceError::Transport(pok3r_transport::TransportError::Disconnected))
    }

    fn send_recv(&self, cmd: u8, sub: u8, payload: &[u8]) -> Result<[u8; 64], DeviceError> {
        let packet = self
            .transport()?
            .transact(cmd, sub, payload, Framing::Crc, cmd == RESET_CMD)?;
        Ok(*packet.as_bytes())
    }

    fn base_firmware_addr(&self) -> u32 {
        self.fw_base
    }

    pub fn read_flash(&self, addr: u32) -> Result<[u8; 60], DeviceError> {
        let resp = self.send_recv(FLASH_CMD, FLASH_READ_SUBCMD, &addr.to_le_bytes())?;
        let mut out = [0u8; 60];
        out.copy_from_slice(&resp[4..]);
        Ok(out)
    }

    pub fn write_flash(&self, addr: u32, data: &[u8]) -> Result<(), DeviceError> {
        let mut payload = Vec::with_capacity(4 + 4 + data.len());
        payload.extend_from_slice(&addr.to_le_bytes());
        payload.extend_from_slice(&(addr + data.len() as u32 - 1).to_le_bytes());
        payload.extend_from_slice(data);
        self.send_recv(FLASH_CMD, FLASH_WRITE_SUBCMD, &payload)?;
        Ok(())
    }

    pub fn check_flash(&self, addr: u32, data: &[u8]) -> Result<bool, DeviceError> {
        let mut payload = Vec::with_capacity(4 + 4 + data.len());
        payload.extend_from_slice(&addr.to_le_bytes());
        payload.extend_from_slice(&(addr + data.len() as u32 - 1).to_le_bytes());
        payload.extend_from_slice(data);
        self.send_recv(FLASH_CMD, FLASH_CHECK_SUBCMD, &payload)?;
        Ok(true)
    }

    pub fn erase_flash(&self, start: u32, end: u32) -> Result<(), DeviceError> {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&start.to_le_bytes());
        payload.extend_from_slice(&end.to_le_bytes());
        self.send_recv(ERASE_CMD, 0, &payload)?;
        Ok(())
    }

    pub fn crc_flash(&self, addr: u32, len: u32) -> Result<u16, DeviceError> {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&addr.to_le_bytes());
        payload.extend_from_slice(&len.to_le_bytes());
        let resp = self.send_recv(CRC_CMD, 0, &payload)?;
        Ok(u16::from_le_bytes([resp[4], resp[5]]))
    }

    pub fn qmk_state(&mut self) -> &mut QmkState {
        &mut self.qmk
    }

    pub fn protocol_kind(&self) -> ProtocolKind {
        ProtocolKind::Pok3r
    }

    /// Transport handle for the QMK mixin (spec C9) to frame its own
    /// requests over.
    pub fn qmk_transport(&self) -> Result<&HidTransport, DeviceError> {
        self.transport()
    }
}

impl crate::proto::QmkExtension for Pok3rProto {
    fn is_qmk(&mut self) -> bool {
        match self.qmk {
            QmkState::Yes => return true,
            QmkState::No => return false,
            QmkState::Unknown => {}
        }
        let result = self
            .transport()
            .ok()
            .and_then(|t| crate::qmk::probe_ctrl(t).ok())
            .is_some()
            || crate::qmk::probe_legacy(|addr| self.read_flash(addr), self.fw_base);
        self.qmk = if result { QmkState::Yes } else { QmkState::No };
        result
    }
}

/// Decode the version blob at `fw_base - VERSION_OFFSET`: an all-0xFF
/// region means the slot was erased and never written, otherwise a
/// little-endian u32 byte length followed by ASCII text (spec §4.6,
/// matching [`encode_version_blob`]).
fn parse_version_blob(resp: &[u8; 60]) -> String {
    if resp.iter().all(|&b| b == 0xFF) {
        return "CLEARED".to_string();
    }
    let len = u32::from_le_bytes([resp[0], resp[1], resp[2], resp[3]]).min(56) as usize;
    String::from_utf8_lossy(&resp[4..4 + len]).into_owned()
}

/// Encode a version string for `set_version`: u32 byte length, ASCII bytes,
/// zero-padded to a multiple of 4.
fn encode_version_blob(version: &str) -> Vec<u8> {
    let bytes = version.as_bytes();
    let mut payload = Vec::new();
    payload.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    payload.extend_from_slice(bytes);
    while payload.len() % 4 != 0 {
        payload.push(0);
    }
    payload
}

impl KBProto for Pok3rProto {
    fn open(&mut self) -> Result<(), DeviceError> {
        if let Ok(t) = discovery::find_one(&self.api, self.vid, self.pid, UPDATE_USAGE_PAGE, UPDATE_USAGE) {
            self.transport = Some(t);
            self.builtin = false;
            return Ok(());
        }
        let t = discovery::find_one(&self.api, self.vid, self.boot_pid, UPDATE_USAGE_PAGE, UPDATE_USAGE)?;
        self.transport = Some(t);
        self.builtin = true;
        Ok(())
    }

    fn close(&mut self) {
        self.transport = None;
    }

    fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    fn is_bootloader(&self) -> bool {
        self.builtin
    }

    fn reboot_to_firmware(&mut self, reopen: bool) -> Result<(), DeviceError> {
        info!("reset to firmware");
        self.send_recv(RESET_CMD, RESET_BOOT_SUBCMD, &[])?;
        self.close();
        if reopen {
            std::thread::sleep(std::time::Duration::from_millis(REBOOT_SLEEP_MS));
            self.open()?;
        }
        Ok(())
    }

    fn reboot_to_bootloader(&mut self, reopen: bool) -> Result<(), DeviceError> {
        info!("reset to bootloader");
        self.send_recv(RESET_CMD, RESET_BUILTIN_SUBCMD, &[])?;
        self.close();
        if reopen {
            std::thread::sleep(std::time::Duration::from_millis(REBOOT_SLEEP_MS));
            self.open()?;
            if !self.builtin {
                return Err(DeviceError::FlashMismatch);
            }
        }
        Ok(())
    }

    fn read_version(&mut self) -> Result<String, DeviceError> {
        let base = self.base_firmware_addr() - VERSION_OFFSET;
        let resp = self.read_flash(base)?;
        Ok(parse_version_blob(&resp))
    }

    fn clear_version(&mut self) -> Status {
        let base = self.base_firmware_addr() - VERSION_OFFSET;
        match self.erase_flash(base, base + 8) {
            Ok(()) => match self.read_flash(base) {
                Ok(resp) if resp.iter().all(|&b| b == 0xFF) => Status::Success,
                Ok(_) => {
                    warn!("version region did not clear");
                    Status::FlashError
                }
                Err(_) => Status::IoError,
            },
            Err(_) => Status::IoError,
        }
    }

    fn set_version(&mut self, version: &str) -> Status {
        if self.clear_version() != Status::Success {
            return Status::FlashError;
        }
        let payload = encode_version_blob(version);
        let base = self.base_firmware_addr() - VERSION_OFFSET;
        match self.write_flash(base, &payload) {
            Ok(()) => Status::Success,
            Err(_) => Status::FlashError,
        }
    }

    fn get_info(&mut self) -> Status {
        Status::NotImplemented
    }

    fn dump_flash(&mut self) -> Result<Vec<u8>, DeviceError> {
        let mut dump = Vec::new();
        let mut addr = 0u32;
        loop {
            match self.read_flash(addr) {
                Ok(chunk) => dump.extend_from_slice(&chunk),
                Err(_) => break,
            }
            addr += 60;
            if addr as usize >= 0x10000 {
                break;
            }
        }
        Ok(dump)
    }

    fn write_firmware(&mut self, fw: &[u8]) -> Result<bool, DeviceError> {
        if fw.is_empty() {
            return Ok(false);
        }
        let base = self.base_firmware_addr();
        debug!(len = fw.len(), "write firmware");

        self.erase_flash(base, base + fw.len() as u32)?;

        for (i, chunk) in fw.chunks(52).enumerate() {
            let addr = base + (i * 52) as u32;
            self.write_flash(addr, chunk)?;
        }

        for (i, chunk) in fw.chunks(52).enumerate() {
            let addr = base + (i * 52) as u32;
            if !self.check_flash(addr, chunk)? {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_blob_all_ff_reports_cleared() {
        let resp = [0xFFu8; 60];
        assert_eq!(parse_version_blob(&resp), "CLEARED");
    }

    #[test]
    fn version_blob_decodes_ascii_text() {
        let mut resp = [0u8; 60];
        let payload = encode_version_blob("1.05");
        resp[..payload.len()].copy_from_slice(&payload);
        assert_eq!(parse_version_blob(&resp), "1.05");
    }

    #[test]
    fn set_version_then_read_version_round_trips() {
        let payload = encode_version_blob("1.05-rc2");
        let mut resp = [0u8; 60];
        resp[..payload.len()].copy_from_slice(&payload);
        assert_eq!(parse_version_blob(&resp), "1.05-rc2");
    }
}
