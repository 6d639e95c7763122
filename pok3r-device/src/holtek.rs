//! Holtek ISP bootrom protocol (spec C8). Present only in bootloader mode
//! (devices that have wiped the factory bootloader and expose only the
//! HT32 built-in USB ISP). Packets use C2 with CRC.

use tracing::info;

use pok3r_transport::{discovery, Framing, HidTransport, PACKET_LEN, UPDATE_USAGE, UPDATE_USAGE_PAGE};

use crate::error::DeviceError;
use crate::proto::{KBProto, ProtocolKind, Status};
use crate::qmk::QmkState;

const ERASE_CMD: u8 = 0;
const ERASE_PAGE_SUBCMD: u8 = 8;
const ERASE_MASS_SUBCMD: u8 = 10;

const FLASH_CMD: u8 = 1;
const FLASH_CHECK_SUBCMD: u8 = 0;
const FLASH_WRITE_SUBCMD: u8 = 1;
const FLASH_READ_SUBCMD: u8 = 2;

const CRC_CMD: u8 = 2;
const INFO_CMD: u8 = 3;
const RESET_CMD: u8 = 4;
const RESET_BOOT_SUBCMD: u8 = 0;

const FW_ADDR: u32 = 0x0000;
const OB_ADDR: u32 = 0x1FF00000;
/// 16 security/protection bytes plus 4 page-protection masks (spec §4.8).
const OPTION_BYTES_LEN: usize = 20;
const REBOOT_SLEEP_MS: u64 = 5000;
const ERASE_SLEEP_MS: u64 = 5000;

const STATUS_SUCCESS_MARKER: u8 = 0x4F;

pub struct HoltekProto {
    api: hidapi::HidApi,
    transport: Option<HidTransport>,
    vid: u16,
    boot_pid: u16,
    qmk: QmkState,
}

/// Parsed `INFO` response (spec §4.8): ISP version, page size/count, and
/// (version-dependent layout) chip model code.
#[derive(Debug, Clone, Copy)]
pub struct IspInfo {
    pub isp_version: u16,
    pub page_size: u16,
    pub page_count: u16,
    pub flash_size: u32,
    pub model: u32,
}

impl HoltekProto {
    pub fn new(vid: u16, boot_pid: u16) -> Result<Self, DeviceError> {
        let api = hidapi::HidApi::new().map_err(|e| {
            DeviceError::Transport(pok3r_transport::TransportError::from_hid_error(e))
        })?;
        Ok(HoltekProto {
            api,
            transport: None,
            vid,
            boot_pid,
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

    /// Count `0x4F` markers in the asynchronous status buffer; one marker
    /// per completed step.
    fn cmd_status(&self) -> Result<u32, DeviceError> {
        let mut buf = [0u8; PACKET_LEN];
        self.transport()?.poll_status(&mut buf)?;
        Ok(buf.iter().filter(|&&b| b == STATUS_SUCCESS_MARKER).count() as u32)
    }

    pub fn read_info(&self) -> Result<IspInfo, DeviceError> {
        let resp = self.send_recv(INFO_CMD, 0, &[])?;
        Ok(parse_info_response(&resp))
    }

    pub fn read_flash(&self, addr: u32) -> Result<[u8; 60], DeviceError> {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&addr.to_le_bytes());
        payload.extend_from_slice(&(addr + PACKET_LEN as u32 - 1).to_le_bytes());
        let resp = self.send_recv(FLASH_CMD, FLASH_READ_SUBCMD, &payload)?;
        let mut out = [0u8; 60];
        out.copy_from_slice(&resp[4..]);
        Ok(out)
    }

    pub fn write_flash(&self, addr: u32, data: &[u8]) -> Result<(), DeviceError> {
        if data.is_empty() {
            return Err(DeviceError::UsageError("empty write".into()));
        }
        let mut payload = Vec::with_capacity(8 + data.len());
        payload.extend_from_slice(&addr.to_le_bytes());
        payload.extend_from_slice(&(addr + data.len() as u32 - 1).to_le_bytes());
        payload.extend_from_slice(data);
        self.send_recv(FLASH_CMD, FLASH_WRITE_SUBCMD, &payload)?;

        loop {
            if self.cmd_status()? >= 1 {
                break;
            }
        }
        Ok(())
    }

    pub fn check_flash(&self, addr: u32, data: &[u8]) -> Result<bool, DeviceError> {
        if data.is_empty() {
            return Err(DeviceError::UsageError("empty check".into()));
        }
        let mut payload = Vec::with_capacity(8 + data.len());
        payload.extend_from_slice(&addr.to_le_bytes());
        payload.extend_from_slice(&(addr + data.len() as u32 - 1).to_le_bytes());
        payload.extend_from_slice(data);
        self.send_recv(FLASH_CMD, FLASH_CHECK_SUBCMD, &payload)?;
        std::thread::sleep(std::time::Duration::from_micros(500));
        Ok(self.cmd_status()? > 0)
    }

    pub fn mass_erase_flash(&self) -> Result<(), DeviceError> {
        self.send_recv(ERASE_CMD, ERASE_MASS_SUBCMD, &[0u8; 8])?;
        Ok(())
    }

    pub fn erase_flash(&self, start: u32, end: u32) -> Result<(), DeviceError> {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&start.to_le_bytes());
        payload.extend_from_slice(&end.to_le_bytes());
        self.send_recv(ERASE_CMD, ERASE_PAGE_SUBCMD, &payload)?;
        Ok(())
    }

    pub fn crc_flash(&self, addr: u32, len: u32) -> Result<u16, DeviceError> {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&addr.to_le_bytes());
        payload.extend_from_slice(&len.to_le_bytes());
        self.send_recv(CRC_CMD, 0, &payload)?;
        std::thread::sleep(std::time::Duration::from_micros(5000));

        let mut buf = [0u8; PACKET_LEN];
        self.transport()?.poll_status(&mut buf)?;
        Ok(u16::from_le_bytes([buf[0], buf[1]]))
    }

    /// Option Bytes: 16 security/protection bytes plus 4 page-protection
    /// masks (spec §4.8), read via the same `FLASH/READ` path at the fixed
    /// ISP address 0x1FF00000.
    pub fn option_bytes(&self) -> Result<[u8; 60], DeviceError> {
        self.read_flash(OB_ADDR)
    }

    /// Clear the option-byte page and rewrite it all-`0xFF`, lifting page
    /// protection before the firmware pages are programmed (spec §4.8's
    /// full-update algorithm).
    pub fn rewrite_option_bytes(&self) -> Result<(), DeviceError> {
        self.erase_flash(OB_ADDR, OB_ADDR + OPTION_BYTES_LEN as u32 - 1)?;
        self.write_flash(OB_ADDR, &[0xFFu8; OPTION_BYTES_LEN])
    }

    pub fn qmk_state(&mut self) -> &mut QmkState {
        &mut self.qmk
    }

    pub fn protocol_kind(&self) -> ProtocolKind {
        ProtocolKind::Holtek
    }
}

/// Parse an `INFO` response: the chip-model field moved between ISP
/// versions 0x100 and 0x101, everything else is stable.
fn parse_info_response(resp: &[u8; 64]) -> IspInfo {
    let isp_version = u16::from_le_bytes([resp[2], resp[3]]);
    let model = match isp_version {
        0x101 => u32::from_le_bytes([resp[16], resp[17], resp[18], resp[19]]),
        0x100 => u16::from_le_bytes([resp[0], resp[1]]) as u32,
        _ => 0,
    };
    let page_size = u16::from_le_bytes([resp[6], resp[7]]);
    let page_count = u16::from_le_bytes([resp[8], resp[9]]);
    IspInfo {
        isp_version,
        page_size,
        page_count,
        flash_size: page_size as u32 * page_count as u32,
        model,
    }
}

impl KBProto for HoltekProto {
    fn open(&mut self) -> Result<(), DeviceError> {
        let t = discovery::find_one(&self.api, self.vid, self.boot_pid, UPDATE_USAGE_PAGE, UPDATE_USAGE)?;
        self.transport = Some(t);
        Ok(())
    }

    fn close(&mut self) {
        self.transport = None;
    }

    fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    fn is_bootloader(&self) -> bool {
        true
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

    fn reboot_to_bootloader(&mut self, _reopen: bool) -> Result<(), DeviceError> {
        // The bootrom is always the bootloader; nothing to do.
        Ok(())
    }

    fn read_version(&mut self) -> Result<String, DeviceError> {
        let info = self.read_info()?;
        Ok(format!("{:x}", info.isp_version))
    }

    fn clear_version(&mut self) -> Status {
        // ROM version is immutable; report success without effect.
        Status::Success
    }

    fn set_version(&mut self, _version: &str) -> Status {
        Status::Success
    }

    fn get_info(&mut self) -> Status {
        match self.read_info() {
            Ok(_) => Status::Success,
            Err(_) => Status::IoError,
        }
    }

    fn dump_flash(&mut self) -> Result<Vec<u8>, DeviceError> {
        let flash_size = self.read_info()?.flash_size;
        let mut dump = Vec::new();
        let mut addr = 0u32;
        while addr < flash_size {
            dump.extend_from_slice(&self.read_flash(addr)?);
            addr += 64;
        }
        Ok(dump)
    }

    fn write_firmware(&mut self, fw: &[u8]) -> Result<bool, DeviceError> {
        if fw.is_empty() {
            return Ok(false);
        }

        self.mass_erase_flash()?;
        std::thread::sleep(std::time::Duration::from_millis(ERASE_SLEEP_MS));
        self.reboot_to_bootloader(true)?;

        self.rewrite_option_bytes()?;
        self.erase_flash(FW_ADDR, FW_ADDR + fw.len() as u32)?;

        for (i, chunk) in fw.chunks(52).enumerate() {
            self.write_flash(FW_ADDR + (i * 52) as u32, chunk)?;
        }
        for (i, chunk) in fw.chunks(52).enumerate() {
            if !self.check_flash(FW_ADDR + (i * 52) as u32, chunk)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn erase_and_check(&mut self) -> Result<bool, DeviceError> {
        self.mass_erase_flash()?;
        std::thread::sleep(std::time::Duration::from_millis(ERASE_SLEEP_MS));
        self.reboot_to_bootloader(true)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_response_v101_reads_model_from_bytes_16_19() {
        let mut resp = [0u8; 64];
        resp[2..4].copy_from_slice(&0x0101u16.to_le_bytes());
        resp[6..8].copy_from_slice(&256u16.to_le_bytes());
        resp[8..10].copy_from_slice(&128u16.to_le_bytes());
        resp[16..20].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());

        let info = parse_info_response(&resp);
        assert_eq!(info.isp_version, 0x0101);
        assert_eq!(info.page_size, 256);
        assert_eq!(info.page_count, 128);
        assert_eq!(info.flash_size, 256 * 128);
        assert_eq!(info.model, 0xDEAD_BEEF);
    }

    #[test]
    fn info_response_v100_reads_model_from_bytes_0_1() {
        let mut resp = [0u8; 64];
        resp[2..4].copy_from_slice(&0x0100u16.to_le_bytes());
        resp[0..2].copy_from_slice(&0x1234u16.to_le_bytes());

        let info = parse_info_response(&resp);
        assert_eq!(info.isp_version, 0x0100);
        assert_eq!(info.model, 0x1234);
    }

    #[test]
    fn info_response_unknown_version_has_no_model() {
        let mut resp = [0u8; 64];
        resp[2..4].copy_from_slice(&0x0200u16.to_le_bytes());
        let info = parse_info_response(&resp);
        assert_eq!(info.model, 0);
    }
}
