//! HID transport and 64-byte packet framing for Holtek HT32-series
//! keyboard update protocols (spec C1/C2).

pub mod discovery;
pub mod error;
pub mod hid;
pub mod packet;

pub use error::{Result, TransportError};
pub use hid::{
    ConsoleTransport, HidTransport, CONSOLE_REPORT_LEN, CONSOLE_USAGE, CONSOLE_USAGE_PAGE,
    UPDATE_USAGE, UPDATE_USAGE_PAGE,
};
pub use packet::{Framing, Packet, MAX_PAYLOAD, PACKET_LEN};
