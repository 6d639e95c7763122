//! QMK EEPROM commands: `eeprom dump/erase/wipe/keymap/test`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use pok3r_device::qmk;

use crate::commands::{confirm_destructive, with_device};

/// Total EEPROM size this tool assumes for a full dump/wipe: a conservative
/// bound covering every known QMK-enabled board in the catalog.
const EEPROM_SIZE: u32 = 0x8000;
const EEPROM_PAGE: u32 = 60;

fn require_qmk(dev: &mut crate::commands::OpenDevice) -> Result<()> {
    if !dev.is_qmk() {
        bail!("device is not QMK-enabled");
    }
    Ok(())
}

pub fn dump(slug: Option<&str>, out: &Path) -> Result<()> {
    let api = hidapi::HidApi::new()?;
    with_device(&api, slug, |dev| {
        require_qmk(dev)?;
        let transport = dev.qmk_transport()?;
        let mut bytes = Vec::new();
        let mut addr = 0u32;
        while addr < EEPROM_SIZE {
            let chunk = qmk::eeprom_read(transport, addr)?;
            bytes.extend_from_slice(&chunk);
            addr += EEPROM_PAGE;
        }
        std::fs::write(out, &bytes)
            .with_context(|| format!("writing dump to {}", out.display()))?;
        println!("Wrote {} bytes to {}", bytes.len(), out.display());
        Ok(())
    })
}

pub fn erase(slug: Option<&str>, ok: bool, addr: &str) -> Result<()> {
    confirm_destructive(ok, "This will erase one EEPROM sector. Continue?")?;
    let addr = parse_addr(addr)?;
    let api = hidapi::HidApi::new()?;
    with_device(&api, slug, |dev| {
        require_qmk(dev)?;
        let transport = dev.qmk_transport()?;
        qmk::eeprom_erase(transport, addr)?;
        println!("Erased EEPROM sector at 0x{addr:04X}.");
        Ok(())
    })
}

pub fn wipe(slug: Option<&str>, ok: bool) -> Result<()> {
    confirm_destructive(ok, "This will erase the entire EEPROM. Continue?")?;
    let api = hidapi::HidApi::new()?;
    with_device(&api, slug, |dev| {
        require_qmk(dev)?;
        let transport = dev.qmk_transport()?;
        let mut addr = 0u32;
        while addr < EEPROM_SIZE {
            qmk::eeprom_erase(transport, addr)?;
            addr += EEPROM_PAGE;
        }
        println!("EEPROM wiped.");
        Ok(())
    })
}

pub fn keymap(slug: Option<&str>) -> Result<()> {
    let api = hidapi::HidApi::new()?;
    with_device(&api, slug, |dev| {
        require_qmk(dev)?;
        let transport = dev.qmk_transport()?;
        let info = qmk::keymap_info(transport)?;
        println!(
            "layers={} rows={} cols={} kcsize={} nlayout={} clayout={}",
            info.layers, info.rows, info.cols, info.kcsize, info.nlayout, info.clayout
        );
        let len = info.layers as usize * info.rows as usize * info.cols as usize * info.kcsize as usize;
        let matrix = qmk::keymap_read_matrix(transport, 0, len)?;
        println!("Read {} bytes of matrix EEPROM.", matrix.len());
        Ok(())
    })
}

pub fn test(slug: Option<&str>) -> Result<()> {
    let api = hidapi::HidApi::new()?;
    with_device(&api, slug, |dev| {
        require_qmk(dev)?;
        let transport = dev.qmk_transport()?;
        let scratch_addr = EEPROM_SIZE - EEPROM_PAGE;
        let pattern: Vec<u8> = (0..EEPROM_PAGE as u8).collect();

        qmk::eeprom_write(transport, scratch_addr, &pattern)?;
        let readback = qmk::eeprom_read(transport, scratch_addr)?;
        qmk::eeprom_erase(transport, scratch_addr)?;

        if readback[..pattern.len()] == pattern[..] {
            println!("EEPROM round-trip test passed.");
            Ok(())
        } else {
            bail!("EEPROM round-trip test failed: readback did not match");
        }
    })
}

fn parse_addr(s: &str) -> Result<u32> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).with_context(|| format!("bad hex address '{s}'"))
    } else {
        s.parse::<u32>().with_context(|| format!("bad address '{s}'"))
    }
}
