//! Device-query and lifecycle commands: `list`, `version`, `setversion`,
//! `info`, `reboot`, `bootloader`.

use anyhow::{bail, Result};
use pok3r_device::Status;

use crate::commands::{with_device, OpenDevice};
use crate::devices;

pub fn list() -> Result<()> {
    let api = hidapi::HidApi::new()?;
    let attached = devices::scan_attached(&api);
    if attached.is_empty() {
        println!("No supported devices attached.");
        return Ok(());
    }
    for dev in attached {
        println!(
            "{:<12} {:<24} vid=0x{:04X} pid=0x{:04X}{}",
            dev.definition.slug,
            dev.definition.name,
            dev.vid,
            dev.pid,
            if dev.in_bootloader { "  [bootloader]" } else { "" },
        );
    }
    Ok(())
}

pub fn version(slug: Option<&str>) -> Result<()> {
    let api = hidapi::HidApi::new()?;
    with_device(&api, slug, |dev| {
        let version = dev.as_kbproto().read_version()?;
        println!("Version: {version}");
        Ok(())
    })
}

pub fn set_version(slug: Option<&str>, version: &str) -> Result<()> {
    let api = hidapi::HidApi::new()?;
    with_device(&api, slug, |dev| {
        match dev.as_kbproto().set_version(version) {
            Status::Success => {
                println!("Version set to {version}");
                Ok(())
            }
            status => bail!("set_version failed: {status:?}"),
        }
    })
}

pub fn info(slug: Option<&str>) -> Result<()> {
    let api = hidapi::HidApi::new()?;
    with_device(&api, slug, |dev| {
        let kb = dev.as_kbproto();
        println!("Bootloader: {}", kb.is_bootloader());
        match kb.get_info() {
            Status::Success => println!("Info: ok"),
            Status::NotImplemented => {}
            status => bail!("get_info failed: {status:?}"),
        }
        if dev.is_qmk() {
            if let Ok(transport) = dev.qmk_transport() {
                if let Ok(ctrl) = pok3r_device::qmk::probe_ctrl(transport) {
                    println!("QMK: {} fields={:?}", ctrl.marker, ctrl.fields);
                }
            }
        }
        Ok(())
    })
}

pub fn reboot(slug: Option<&str>) -> Result<()> {
    let api = hidapi::HidApi::new()?;
    with_device(&api, slug, |dev| {
        let kb = dev.as_kbproto();
        if kb.is_bootloader() {
            kb.reboot_to_firmware(false)?;
            println!("Rebooting to application firmware.");
        } else {
            kb.reboot_to_bootloader(false)?;
            println!("Rebooting to bootloader.");
        }
        Ok(())
    })
}

pub fn bootloader(slug: Option<&str>) -> Result<()> {
    let api = hidapi::HidApi::new()?;
    with_device(&api, slug, |dev| {
        dev.as_kbproto().reboot_to_bootloader(false)?;
        println!("Rebooting to bootloader.");
        Ok(())
    })
}
