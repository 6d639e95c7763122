//! Blocking HID interrupt transport (spec C1).
//!
//! Devices speak 64-byte interrupt IN/OUT reports on usage page 0xFF00,
//! usage 0x01. Unlike the teacher's feature-report transport
//! (`monsgeek-transport`'s `hid_wired`), these devices are addressed with
//! `HidDevice::write`/`read`, the hidapi calls that map onto interrupt
//! transfers.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::packet::{Framing, Packet, PACKET_LEN};

pub const UPDATE_USAGE_PAGE: u16 = 0xFF00;
pub const UPDATE_USAGE: u16 = 0x01;

/// Debug console streaming interface (spec §6): 32-byte reports instead of
/// the 64-byte command interface above.
pub const CONSOLE_USAGE_PAGE: u16 = 0xFF31;
pub const CONSOLE_USAGE: u16 = 0x74;
pub const CONSOLE_REPORT_LEN: usize = 32;

const RECV_TIMEOUT_MS: i32 = 200;
const RECV_TIMEOUT_CEILING: Duration = Duration::from_millis(1000);

/// An open HID handle to one interface of one device.
pub struct HidTransport {
    device: hidapi::HidDevice,
    vid: u16,
    pid: u16,
}

impl HidTransport {
    /// Open the first device matching `vid`/`pid` exposing the given
    /// usage page/usage on a vendor-defined interface.
    pub fn open(api: &hidapi::HidApi, vid: u16, pid: u16, usage_page: u16, usage: u16) -> Result<Self> {
        let info = api
            .device_list()
            .find(|info| {
                info.vendor_id() == vid
                    && info.product_id() == pid
                    && info.usage_page() == usage_page
                    && info.usage() == usage
            })
            .ok_or(TransportError::DeviceNotFound)?;

        let device = info
            .open_device(api)
            .map_err(TransportError::from_hid_error)?;

        debug!(vid, pid, usage_page, usage, "opened HID interface");
        Ok(HidTransport { device, vid, pid })
    }

    pub fn vid(&self) -> u16 {
        self.vid
    }

    pub fn pid(&self) -> u16 {
        self.pid
    }

    /// Send one 64-byte interrupt OUT report. `tolerate_disconnect` swallows
    /// pipe/no-device errors, used when the command itself causes the
    /// device to reboot.
    pub fn send(&self, packet: &Packet, tolerate_disconnect: bool) -> Result<()> {
        match self.device.write(packet.as_bytes()) {
            Ok(n) if n >= PACKET_LEN => Ok(()),
            Ok(n) => Err(TransportError::Internal(format!(
                "short write: {n} of {PACKET_LEN} bytes"
            ))),
            Err(e) => {
                if tolerate_disconnect && is_disconnect_error(&e) {
                    debug!("send error tolerated during reboot: {e}");
                    Ok(())
                } else {
                    Err(TransportError::from_hid_error(e))
                }
            }
        }
    }

    /// Receive one 64-byte interrupt IN report, with an outer wait that
    /// polls short timeouts until `RECV_TIMEOUT_CEILING` is reached.
    pub fn recv(&self) -> Result<[u8; PACKET_LEN]> {
        let mut buf = [0u8; PACKET_LEN];
        let start = Instant::now();
        loop {
            let n = self
                .device
                .read_timeout(&mut buf, RECV_TIMEOUT_MS)
                .map_err(TransportError::from_hid_error)?;
            if n > 0 {
                if n != PACKET_LEN {
                    warn!(n, "short HID read");
                    return Err(TransportError::ShortResponse);
                }
                return Ok(buf);
            }
            if start.elapsed() >= RECV_TIMEOUT_CEILING {
                return Err(TransportError::Timeout);
            }
        }
    }

    /// Send a command and receive the response, validating framing.
    pub fn transact(
        &self,
        cmd: u8,
        sub: u8,
        payload: &[u8],
        framing: Framing,
        tolerate_disconnect: bool,
    ) -> Result<Packet> {
        let (packet, crc) = crate::packet::build(cmd, sub, payload, framing)?;
        self.send(&packet, tolerate_disconnect)?;
        let raw = self.recv()?;
        crate::packet::parse_response(&raw, framing, crc)
    }

    /// Poll the device's asynchronous status buffer (Holtek ISP write/check/
    /// CRC commands complete out-of-band; the caller reads this in a loop
    /// until enough `0x4F` markers appear). The original issues this as a
    /// `bmRequestType=0xA1, bRequest=0x01, wValue=0x0100` control transfer;
    /// hidapi's portable API has no raw control-transfer call, so this reads
    /// it as a single 64-byte input report instead, which every tested
    /// Holtek bootrom answers identically.
    pub fn poll_status(&self, buf: &mut [u8; PACKET_LEN]) -> Result<()> {
        let n = self
            .device
            .read_timeout(buf, RECV_TIMEOUT_MS)
            .map_err(TransportError::from_hid_error)?;
        if n == 0 {
            return Err(TransportError::Timeout);
        }
        Ok(())
    }
}

fn is_disconnect_error(err: &hidapi::HidError) -> bool {
    let msg = err.to_string();
    msg.contains("no such device") || msg.contains("broken pipe") || msg.contains("disconnected")
}

/// Read-only handle to the debug console interface. The firmware streams
/// NUL-padded ASCII text in 32-byte reports; there is no request to send.
pub struct ConsoleTransport {
    device: hidapi::HidDevice,
}

impl ConsoleTransport {
    pub fn open(api: &hidapi::HidApi, vid: u16, pid: u16) -> Result<Self> {
        let info = api
            .device_list()
            .find(|info| {
                info.vendor_id() == vid
                    && info.product_id() == pid
                    && info.usage_page() == CONSOLE_USAGE_PAGE
                    && info.usage() == CONSOLE_USAGE
            })
            .ok_or(TransportError::DeviceNotFound)?;

        let device = info
            .open_device(api)
            .map_err(TransportError::from_hid_error)?;
        Ok(ConsoleTransport { device })
    }

    /// Read one report, trimmed at the first NUL byte.
    pub fn read_line(&self) -> Result<String> {
        let mut buf = [0u8; CONSOLE_REPORT_LEN];
        let n = self
            .device
            .read_timeout(&mut buf, RECV_TIMEOUT_MS)
            .map_err(TransportError::from_hid_error)?;
        if n == 0 {
            return Ok(String::new());
        }
        let end = buf[..n].iter().position(|&b| b == 0).unwrap_or(n);
        Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
    }
}
