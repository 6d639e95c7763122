//! QMK command extension (spec C9). A mixin layered atop C6/C7's transport:
//! both `Pok3rProto` and `CykbProto` hold a [`QmkState`] and forward into
//! this module's free functions, which frame every request like a POK3R
//! packet (CRC present) and enforce strict request/response CRC chaining.

use pok3r_transport::{Framing, HidTransport};

use crate::error::DeviceError;

pub const CTRL: u8 = 0x81;
pub const CTRL_INFO: u8 = 0;
pub const CTRL_LAYOUT: u8 = 1;

pub const EEPROM: u8 = 0x82;
pub const EEPROM_INFO: u8 = 0;
pub const EEPROM_READ: u8 = 1;
pub const EEPROM_WRITE: u8 = 2;
pub const EEPROM_ERASE: u8 = 3;

pub const KEYMAP: u8 = 0x83;
pub const KEYMAP_INFO: u8 = 0;
pub const KEYMAP_READ: u8 = 1;
pub const KEYMAP_WRITE: u8 = 2;
pub const KEYMAP_COMMIT: u8 = 3;
pub const KEYMAP_RELOAD: u8 = 4;
pub const KEYMAP_RESET: u8 = 5;

pub const BACKLIGHT: u8 = 0x84;
pub const BACKLIGHT_INFO: u8 = 0;
pub const BACKLIGHT_READ: u8 = 1;
pub const BACKLIGHT_WRITE: u8 = 2;
pub const BACKLIGHT_COMMIT: u8 = 3;

pub const FLASH: u8 = 0x85;
pub const FLASH_READ: u8 = 0;

const MARKER: &str = "qmk_pok3r";
const LEGACY_MARKER_OFFSET: u32 = 0x160;
const KEYMAP_WRITE_WINDOW: usize = 56;

/// Whether the open device has been probed for the QMK extension yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QmkState {
    #[default]
    Unknown,
    Yes,
    No,
}

/// Result of `CTRL/INFO`: the marker plus the remaining semicolon-separated
/// fields (pid, version, layout name), left unparsed beyond the split.
#[derive(Debug, Clone)]
pub struct CtrlInfo {
    pub marker: String,
    pub fields: Vec<String>,
}

/// Issue one QMK-framed request/response pair, enforcing the sequence-token
/// and CRC chaining rule from spec §4.9. `quiet` downgrades a transport
/// error during probing to `NotQmk` instead of propagating it.
fn transact(
    transport: &HidTransport,
    cmd: u8,
    sub: u8,
    payload: &[u8],
    quiet: bool,
) -> Result<[u8; 64], DeviceError> {
    match transport.transact(cmd, sub, payload, Framing::Crc, false) {
        Ok(packet) => Ok(*packet.as_bytes()),
        Err(e) if quiet => {
            let _ = e;
            Err(DeviceError::NotQmk)
        }
        Err(e) => Err(DeviceError::Transport(e)),
    }
}

/// Probe for the QMK marker via the control path (`CTRL/INFO`); callers
/// fall back to [`probe_legacy`] (a flash read at `fw_base + 0x160`) for
/// older QMK builds that never wired up the control command.
pub fn probe_ctrl(transport: &HidTransport) -> Result<CtrlInfo, DeviceError> {
    let resp = transact(transport, CTRL, CTRL_INFO, &[], true)?;
    parse_ctrl_info(&resp[4..])
}

/// Probe the legacy marker string embedded at a fixed flash offset.
pub fn probe_legacy(read_flash: impl Fn(u32) -> Result<[u8; 60], DeviceError>, fw_base: u32) -> bool {
    match read_flash(fw_base + LEGACY_MARKER_OFFSET) {
        Ok(bin) => {
            let candidate = String::from_utf8_lossy(&bin[2..2 + MARKER.len().min(bin.len() - 2)]);
            candidate == MARKER
        }
        Err(_) => false,
    }
}

fn parse_ctrl_info(payload: &[u8]) -> Result<CtrlInfo, DeviceError> {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    let text = String::from_utf8_lossy(&payload[..end]);
    let mut fields: Vec<String> = text.split(';').map(|s| s.to_string()).collect();
    if fields.is_empty() || fields[0] != MARKER {
        return Err(DeviceError::NotQmk);
    }
    let marker = fields.remove(0);
    Ok(CtrlInfo { marker, fields })
}

pub fn set_layout(transport: &HidTransport, index: u8) -> Result<(), DeviceError> {
    transact(transport, CTRL, CTRL_LAYOUT, &[index], false)?;
    Ok(())
}

pub fn eeprom_info(transport: &HidTransport) -> Result<[u8; 60], DeviceError> {
    let resp = transact(transport, EEPROM, EEPROM_INFO, &[], false)?;
    let mut out = [0u8; 60];
    out.copy_from_slice(&resp[4..]);
    Ok(out)
}

pub fn eeprom_read(transport: &HidTransport, addr: u32) -> Result<[u8; 60], DeviceError> {
    let resp = transact(transport, EEPROM, EEPROM_READ, &addr.to_le_bytes(), false)?;
    let mut out = [0u8; 60];
    out.copy_from_slice(&resp[4..]);
    Ok(out)
}

pub fn eeprom_write(transport: &HidTransport, addr: u32, data: &[u8]) -> Result<(), DeviceError> {
    let mut payload = Vec::with_capacity(4 + data.len());
    payload.extend_from_slice(&addr.to_le_bytes());
    payload.extend_from_slice(data);
    transact(transport, EEPROM, EEPROM_WRITE, &payload, false)?;
    Ok(())
}

pub fn eeprom_erase(transport: &HidTransport, addr: u32) -> Result<(), DeviceError> {
    transact(transport, EEPROM, EEPROM_ERASE, &addr.to_le_bytes(), false)?;
    Ok(())
}

/// `{layers, rows, cols, kcsize, nlayout, clayout}`, the first 6 bytes of
/// `KEYMAP/INFO`'s response.
#[derive(Debug, Clone, Copy)]
pub struct KeymapInfo {
    pub layers: u8,
    pub rows: u8,
    pub cols: u8,
    pub kcsize: u8,
    pub nlayout: u8,
    pub clayout: u8,
}

const MATRIX_PAGE: u32 = 0x00000;
const LAYOUT_PAGE: u32 = 0x10000;
const STRINGS_PAGE: u32 = 0x20000;

pub fn keymap_info(transport: &HidTransport) -> Result<KeymapInfo, DeviceError> {
    let resp = transact(transport, KEYMAP, KEYMAP_INFO, &[], false)?;
    Ok(KeymapInfo {
        layers: resp[4],
        rows: resp[5],
        cols: resp[6],
        kcsize: resp[7],
        nlayout: resp[8],
        clayout: resp[9],
    })
}

pub fn keymap_read_matrix(transport: &HidTransport, offset: u32, len: usize) -> Result<Vec<u8>, DeviceError> {
    keymap_read_page(transport, MATRIX_PAGE + offset, len)
}

pub fn keymap_read_layout(transport: &HidTransport, offset: u32, len: usize) -> Result<Vec<u8>, DeviceError> {
    keymap_read_page(transport, LAYOUT_PAGE + offset, len)
}

pub fn keymap_read_strings(transport: &HidTransport, offset: u32, len: usize) -> Result<Vec<u8>, DeviceError> {
    keymap_read_page(transport, STRINGS_PAGE + offset, len)
}

fn keymap_read_page(transport: &HidTransport, offset: u32, len: usize) -> Result<Vec<u8>, DeviceError> {
    let mut out = Vec::with_capacity(len);
    let mut pos = offset;
    while out.len() < len {
        let resp = transact(transport, KEYMAP, KEYMAP_READ, &pos.to_le_bytes(), false)?;
        let remaining = len - out.len();
        let take = remaining.min(60);
        out.extend_from_slice(&resp[4..4 + take]);
        pos += take as u32;
    }
    Ok(out)
}

fn keymap_write_window(transport: &HidTransport, offset: u32, data: &[u8]) -> Result<(), DeviceError> {
    let mut payload = Vec::with_capacity(4 + 1 + data.len());
    payload.extend_from_slice(&offset.to_le_bytes());
    payload.push(data.len() as u8);
    payload.extend_from_slice(data);
    transact(transport, KEYMAP, KEYMAP_WRITE, &payload, false)?;
    Ok(())
}

pub fn keymap_commit(transport: &HidTransport) -> Result<(), DeviceError> {
    transact(transport, KEYMAP, KEYMAP_COMMIT, &[], false)?;
    Ok(())
}

pub fn keymap_reload(transport: &HidTransport) -> Result<(), DeviceError> {
    transact(transport, KEYMAP, KEYMAP_RELOAD, &[], false)?;
    Ok(())
}

pub fn keymap_reset(transport: &HidTransport) -> Result<(), DeviceError> {
    transact(transport, KEYMAP, KEYMAP_RESET, &[], false)?;
    Ok(())
}

/// Compute the first-difference..last-difference span between a cached and
/// a new matrix, then upload it as a sequence of `KEYMAP_WRITE_WINDOW`-sized
/// writes (spec §4.9 upload algorithm).
pub fn upload_keymap_diff(transport: &HidTransport, cached: &[u8], new: &[u8]) -> Result<(), DeviceError> {
    let diff = match byte_diff_span(cached, new) {
        Some(span) => span,
        None => return Ok(()),
    };

    let mut offset = diff.start as u32;
    for chunk in new[diff.clone()].chunks(KEYMAP_WRITE_WINDOW) {
        keymap_write_window(transport, offset, chunk)?;
        offset += chunk.len() as u32;
    }
    Ok(())
}

fn byte_diff_span(a: &[u8], b: &[u8]) -> Option<std::ops::Range<usize>> {
    let first = a.iter().zip(b.iter()).position(|(x, y)| x != y)?;
    let last = a
        .iter()
        .zip(b.iter())
        .enumerate()
        .rev()
        .find(|(_, (x, y))| x != y)
        .map(|(i, _)| i)?;
    Some(first..last + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_span_is_tight_around_changed_bytes() {
        let mut a = vec![0u8; 64];
        let mut b = a.clone();
        b[37] = 1;
        b[40] = 2;
        let span = byte_diff_span(&a, &b).unwrap();
        assert_eq!(span, 37..41);
        a[37] = 1;
        a[40] = 2;
        assert_eq!(byte_diff_span(&a, &b), None);
    }

    #[test]
    fn ctrl_info_rejects_non_qmk_marker() {
        let payload = b"not_qmk;foo\0";
        assert!(matches!(parse_ctrl_info(payload), Err(DeviceError::NotQmk)));
    }

    #[test]
    fn ctrl_info_parses_marker_and_fields() {
        let payload = b"qmk_pok3r;0141;v1.0\0";
        let info = parse_ctrl_info(payload).unwrap();
        assert_eq!(info.marker, "qmk_pok3r");
        assert_eq!(info.fields, vec!["0141", "v1.0"]);
    }
}
