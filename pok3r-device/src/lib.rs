//! Device-side protocols: firmware codecs (C3), the three wire protocols
//! (C6 POK3R, C7 CYKB, C8 Holtek ISP), the QMK command extension (C9), and
//! the keymap model (C10).

pub mod codec;
pub mod cykb;
pub mod error;
pub mod holtek;
pub mod keymap;
pub mod pok3r;
pub mod proto;
pub mod qmk;

pub use error::{DeviceError, Result};
pub use proto::{KBProto, ProtocolKind, QmkExtension, Status};
