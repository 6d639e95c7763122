//! Command dispatch helpers shared by every subcommand module.
//!
//! Mirrors the teacher's `with_keyboard`/`setup_interrupt_handler` shape,
//! retargeted to this crate's synchronous, trait-object device handle
//! instead of an async transport.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use pok3r_device::cykb::CykbProto;
use pok3r_device::pok3r::Pok3rProto;
use pok3r_device::{DeviceError, KBProto, QmkExtension};
use pok3r_transport::HidTransport;

use crate::devices::{self, AttachedDevice, Protocol};

pub mod console;
pub mod eeprom;
pub mod firmware;
pub mod keymap;
pub mod query;

/// An opened device, holding onto whichever concrete protocol front-end the
/// catalog says this board speaks. QMK (C9) is a mixin reusing the same
/// transport, so callers that need it go through [`OpenDevice::is_qmk`]/
/// [`OpenDevice::qmk_transport`] rather than downcasting.
pub enum OpenDevice {
    Pok3r(Pok3rProto),
    Cykb(CykbProto),
}

impl OpenDevice {
    pub fn as_kbproto(&mut self) -> &mut dyn KBProto {
        match self {
            OpenDevice::Pok3r(p) => p,
            OpenDevice::Cykb(p) => p,
        }
    }

    pub fn is_qmk(&mut self) -> bool {
        match self {
            OpenDevice::Pok3r(p) => p.is_qmk(),
            OpenDevice::Cykb(p) => p.is_qmk(),
        }
    }

    pub fn qmk_transport(&self) -> Result<&HidTransport, DeviceError> {
        match self {
            OpenDevice::Pok3r(p) => p.qmk_transport(),
            OpenDevice::Cykb(p) => p.qmk_transport(),
        }
    }
}

/// Resolve which attached device to operate on: the `--device` slug if
/// given, otherwise the sole attached device (more than one attached
/// device without a slug is a usage error).
pub fn resolve_device(api: &hidapi::HidApi, slug: Option<&str>) -> Result<AttachedDevice> {
    if let Some(slug) = slug {
        let def = devices::find_by_slug(slug)
            .with_context(|| format!("unknown device slug '{slug}'"))?;
        let attached = devices::scan_attached(api)
            .into_iter()
            .find(|a| a.definition.slug == def.slug)
            .with_context(|| format!("{slug} is not attached"))?;
        return Ok(attached);
    }
    let mut found = devices::scan_attached(api);
    match found.len() {
        0 => bail!("no supported device attached"),
        1 => Ok(found.remove(0)),
        _ => bail!("more than one supported device attached; use -t/--device to pick one"),
    }
}

/// Open the matching protocol front-end for an attached device and run `f`
/// against it, guaranteeing the handle is closed on every exit path.
pub fn with_device<F>(api: &hidapi::HidApi, slug: Option<&str>, f: F) -> Result<()>
where
    F: FnOnce(&mut OpenDevice) -> Result<()>,
{
    let attached = resolve_device(api, slug)?;
    let def = attached.definition;

    let mut dev = match def.protocol {
        Protocol::Pok3r => {
            OpenDevice::Pok3r(Pok3rProto::new(def.vid, def.pid, def.boot_pid, def.fw_base)?)
        }
        Protocol::Cykb => {
            OpenDevice::Cykb(CykbProto::new(def.vid, def.pid, def.boot_pid, def.fw_base)?)
        }
    };

    dev.as_kbproto().open()?;
    let result = f(&mut dev);
    dev.as_kbproto().close();
    result
}

/// Install a Ctrl-C handler that flips an `AtomicBool` to false, for
/// commands that loop until interrupted (console streaming).
pub fn setup_interrupt_handler() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
    })
    .ok();
    running
}

/// Confirm a destructive operation unless `--ok` was passed.
pub fn confirm_destructive(ok: bool, prompt: &str) -> Result<()> {
    if ok {
        return Ok(());
    }
    eprint!("{prompt} [y/N] ");
    std::io::stderr().flush().ok();
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    if line.trim().eq_ignore_ascii_case("y") {
        Ok(())
    } else {
        bail!("aborted");
    }
}
