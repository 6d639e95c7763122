//! CYKB protocol (spec C7). Used by newer Vortex-family boards. Packets use
//! C2 **without** CRC (bytes 2-3 always zero); responses are checked only
//! against the 0xAAFF error marker.

use tracing::{debug, info, warn};

use pok3r_transport::{discovery, Framing, HidTransport, UPDATE_USAGE, UPDATE_USAGE_PAGE};

use crate::codec;
use crate::error::DeviceError;
use crate::proto::{KBProto, ProtocolKind, Status};
use crate::qmk::QmkState;

const READ: u8 = 1;
const WRITE: u8 = 2;
const ADDR: u8 = 3;
const RESET: u8 = 4;
const FW: u8 = 0;

const FW_ERASE: u8 = 0;
const FW_CRC: u8 = 2;
const FW_SUM: u8 = 3;

const READ_VER1: u8 = 0x20;
const READ_VER2: u8 = 0x22;
const READ_400: u8 = 0x23;
const READ_3C00: u8 = 0x24;
const READ_MODE: u8 = 0x25;
const READ_ADDR: u8 = 0x26;

const ADDR_SET: u8 = 0;
const ADDR_GET: u8 = 1;

const RESET_FW: u8 = 0;
const RESET_BL: u8 = 1;

const VER_ADDR: u32 = 0x3000;
const FLASH_LEN: u32 = 0x10000;
const WAIT_SLEEP_MS: u64 = 5;
const ERASE_SLEEP_MS: u64 = 2000;

/// Fixed trailing fields of the 60-byte "version 2" blob; everything past
/// the ISP-subversion/constant words is a terminator and padding. Per
/// spec §9(c) the VID/PID words are parameterized per open device rather
/// than hard-coded to the POK3R RGB's own identifiers.
fn version2_blob(vid: u16, pid: u16) -> [u8; 60] {
    let mut words = [0xFFFFFFFFu32; 15];
    words[0] = 0x00800004;
    words[1] = 0x00010300;
    words[2] = 0x00000041;
    words[3] = 0xefffffff;
    words[4] = 0x00000001;
    words[5] = 0x00000000;
    words[6] = ((pid as u32) << 16) | vid as u32;
    words[14] = 0x001c5aa5;

    let mut out = [0u8; 60];
    for (i, w) in words.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
    }
    out
}

pub struct CykbProto {
    api: hidapi::HidApi,
    transport: Option<HidTransport>,
    vid: u16,
    pid: u16,
    boot_pid: u16,
    fw_addr: u32,
    builtin: bool,
    qmk: QmkState,
}

impl CykbProto {
    pub fn new(vid: u16, pid: u16, boot_pid: u16, fw_addr: u32) -> Result<Self, DeviceError> {
        let api = hidapi::HidApi::new().map_err(|e| {
            DeviceError::Transport(pok3r_transport::TransportError::from_hid_error(e))
        })?;
        Ok(CykbProto {
            api,
            transport: None,
            vid,
            pid,
            boot_pid,
            fw_addr,
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
            .transact(cmd, sub, payload, Framing::NoCrc, cmd == RESET)?;
        Ok(*packet.as_bytes())
    }

    pub fn read_flash(&self, addr: u32) -> Result<[u8; 60], DeviceError> {
        let resp = self.send_recv(READ, READ_ADDR, &addr.to_le_bytes())?;
        let mut out = [0u8; 60];
        out.copy_from_slice(&resp[4..]);
        Ok(out)
    }

    pub fn write_flash(&self, addr: u32, data: &[u8]) -> Result<(), DeviceError> {
        if addr < VER_ADDR {
            return Err(DeviceError::UsageError("address below VER_ADDR".into()));
        }
        let target = addr - VER_ADDR;

        let set_resp = self.send_recv(ADDR, ADDR_SET, &target.to_le_bytes())?;
        let _ = set_resp;
        let get_resp = self.send_recv(ADDR, ADDR_GET, &[])?;
        let echoed = u32::from_le_bytes([get_resp[4], get_resp[5], get_resp[6], get_resp[7]]);
        if echoed != target {
            return Err(DeviceError::FlashMismatch);
        }

        let mut pos = target as u16;
        for chunk in data.chunks(52) {
            let resp = self.send_recv(WRITE, chunk.len() as u8, chunk)?;
            let next = u16::from_le_bytes([resp[4], resp[5]]);
            pos = pos.wrapping_add(chunk.len() as u16);
            if next != pos {
                warn!(next, pos, "write sequence mismatch");
            }
        }
        Ok(())
    }

    pub fn erase_flash(&self, start: u32, length: u32) -> Result<(), DeviceError> {
        if start < VER_ADDR {
            return Err(DeviceError::UsageError("address below VER_ADDR".into()));
        }
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&(start - VER_ADDR).to_le_bytes());
        payload.extend_from_slice(&length.to_le_bytes());
        self.send_recv(FW, FW_ERASE, &payload)?;
        std::thread::sleep(std::time::Duration::from_millis(ERASE_SLEEP_MS));
        Ok(())
    }

    pub fn crc_flash(&self, addr: u32, len: u32) -> Result<u32, DeviceError> {
        if addr < VER_ADDR {
            return Err(DeviceError::UsageError("address below VER_ADDR".into()));
        }
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&(addr - VER_ADDR).to_le_bytes());
        payload.extend_from_slice(&len.to_le_bytes());
        let resp = self.send_recv(FW, FW_CRC, &payload)?;
        let crc = u32::from_le_bytes([resp[4], resp[5], resp[6], resp[7]]);

        let sum_resp = self.send_recv(FW, FW_SUM, &payload)?;
        let sum = u32::from_le_bytes([sum_resp[4], sum_resp[5], sum_resp[6], sum_resp[7]]);
        debug!(crc, sum, "flash crc/sum");
        Ok(crc)
    }

    pub fn qmk_state(&mut self) -> &mut QmkState {
        &mut self.qmk
    }

    pub fn protocol_kind(&self) -> ProtocolKind {
        ProtocolKind::Cykb
    }

    /// Transport handle for the QMK mixin (spec C9) to frame its own
    /// requests over.
    pub fn qmk_transport(&self) -> Result<&HidTransport, DeviceError> {
        self.transport()
    }
}

impl crate::proto::QmkExtension for CykbProto {
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
            || crate::qmk::probe_legacy(|addr| self.read_flash(addr), self.fw_addr);
        self.qmk = if result { QmkState::Yes } else { QmkState::No };
        result
    }
}

impl KBProto for CykbProto {
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
        if !self.builtin {
            return Ok(());
        }
        info!("reset to firmware");
        self.send_recv(RESET, RESET_FW, &[])?;
        self.close();
        if reopen {
            std::thread::sleep(std::time::Duration::from_millis(WAIT_SLEEP_MS));
            self.open()?;
            if self.builtin {
                return Err(DeviceError::FlashMismatch);
            }
        }
        Ok(())
    }

    fn reboot_to_bootloader(&mut self, reopen: bool) -> Result<(), DeviceError> {
        if self.builtin {
            return Ok(());
        }
        info!("reset to bootloader");
        self.send_recv(RESET, RESET_BL, &[])?;
        self.close();
        if reopen {
            std::thread::sleep(std::time::Duration::from_millis(WAIT_SLEEP_MS));
            self.open()?;
            if !self.builtin {
                return Err(DeviceError::FlashMismatch);
            }
        }
        Ok(())
    }

    fn read_version(&mut self) -> Result<String, DeviceError> {
        let resp = self.send_recv(READ, READ_VER1, &[])?;
        if resp[4..64].iter().all(|&b| b == 0xFF) {
            return Ok("CLEARED".to_string());
        }
        let len = u32::from_le_bytes([resp[4], resp[5], resp[6], resp[7]]).min(60) as usize;
        let units: Vec<u16> = resp[8..8 + len.min(56)]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }

    fn clear_version(&mut self) -> Status {
        if self.reboot_to_bootloader(true).is_err() {
            return Status::IoError;
        }
        if self.erase_flash(VER_ADDR, 0xB4).is_err() {
            return Status::IoError;
        }
        match self.send_recv(READ, READ_VER2, &[]) {
            Ok(resp) if resp[4..64].iter().all(|&b| b == 0xFF) => Status::Success,
            Ok(_) => Status::FlashError,
            Err(_) => Status::IoError,
        }
    }

    fn set_version(&mut self, version: &str) -> Status {
        if self.clear_version() != Status::Success {
            return Status::FlashError;
        }

        let units: Vec<u16> = version.encode_utf16().chain(std::iter::once(0)).collect();
        let mut sdata = Vec::new();
        sdata.extend_from_slice(&((units.len() * 2) as u32).to_le_bytes());
        for u in &units {
            sdata.extend_from_slice(&u.to_le_bytes());
        }

        let mut vdata = vec![0xFFu8; 0x78];
        vdata.splice(0..sdata.len().min(0x78), sdata.iter().cloned().take(0x78));
        let (vid, pid) = (self.vid, self.pid);
        vdata.extend_from_slice(&version2_blob(vid, pid));

        if self.write_flash(VER_ADDR, &vdata).is_err() {
            return Status::FlashError;
        }

        match self.send_recv(READ, READ_VER2, &[]) {
            Ok(resp) if resp[4..64] == version2_blob(vid, pid) => Status::Success,
            _ => Status::FlashError,
        }
    }

    fn get_info(&mut self) -> Status {
        Status::NotImplemented
    }

    fn dump_flash(&mut self) -> Result<Vec<u8>, DeviceError> {
        let mut dump = Vec::new();
        let mut addr = 0u32;
        while addr < FLASH_LEN - 60 {
            dump.extend_from_slice(&self.read_flash(addr)?);
            addr += 60;
        }
        Ok(dump)
    }

    fn write_firmware(&mut self, fw: &[u8]) -> Result<bool, DeviceError> {
        if fw.is_empty() {
            return Ok(false);
        }
        let mut encoded = fw.to_vec();
        codec::encode_firmware(&mut encoded);

        let host_crc = crc32fast::hash(&encoded);

        self.erase_flash(self.fw_addr, encoded.len() as u32)?;
        std::thread::sleep(std::time::Duration::from_millis(5));
        self.write_flash(self.fw_addr, &encoded)?;

        let device_crc = self.crc_flash(self.fw_addr, encoded.len() as u32)?;
        if device_crc != host_crc {
            return Err(DeviceError::FlashMismatch);
        }
        Ok(true)
    }

    fn erase_and_check(&mut self) -> Result<bool, DeviceError> {
        self.reboot_to_bootloader(true)?;
        let _before = self.crc_flash(VER_ADDR, FLASH_LEN - VER_ADDR)?;
        let mut addr = VER_ADDR;
        for _ in 0..13 {
            self.erase_flash(addr, 0x1000)?;
            addr += 0x1000;
        }
        let _after = self.crc_flash(VER_ADDR, FLASH_LEN - VER_ADDR)?;
        Ok(true)
    }
}

/// Read the 180-byte info blob embedded alongside RGB firmware sections
/// (spec §4.5 edge case): version string UTF-16 at offset 0, version
/// number at 124, VID/PID at 148.
pub struct InfoBlob {
    pub version: String,
    pub version_number: u32,
    pub vid: u16,
    pub pid: u16,
}

pub fn parse_info_section(data: &[u8; 180]) -> InfoBlob {
    let version = if u32::from_le_bytes([data[0], data[1], data[2], data[3]]) == 0xFFFFFFFF {
        "CLEARED".to_string()
    } else {
        let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]).min(60) as usize;
        let units: Vec<u16> = data[4..4 + len.min(56)]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    };

    let version_number = u32::from_le_bytes([data[124], data[125], data[126], data[127]]);
    let vid = u16::from_le_bytes([data[148], data[149]]);
    let pid = u16::from_le_bytes([data[150], data[151]]);

    InfoBlob {
        version,
        version_number,
        vid,
        pid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version2_blob_has_fixed_length() {
        let blob = version2_blob(0x04D9, 0x0167);
        assert_eq!(blob.len(), 60);
        assert_eq!(u32::from_le_bytes([blob[56], blob[57], blob[58], blob[59]]), 0x001c5aa5);
    }

    #[test]
    fn version2_blob_parameterizes_vid_pid() {
        let blob = version2_blob(0x04D9, 0x0112);
        let word = u32::from_le_bytes([blob[24], blob[25], blob[26], blob[27]]);
        assert_eq!(word, (0x0112u32 << 16) | 0x04D9);
    }

    #[test]
    fn info_section_reads_fields_at_documented_offsets() {
        let mut data = [0xFFu8; 180];
        data[124..128].copy_from_slice(&0x00010700u32.to_le_bytes());
        data[148..150].copy_from_slice(&0x04D9u16.to_le_bytes());
        data[150..152].copy_from_slice(&0x0167u16.to_le_bytes());
        let blob = parse_info_section(&data);
        assert_eq!(blob.version_number, 0x00010700);
        assert_eq!(blob.vid, 0x04D9);
        assert_eq!(blob.pid, 0x0167);
    }
}
