//! Firmware lifecycle commands: `dump`, `flash`, `wipe`, `decode`.

use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::commands::{confirm_destructive, with_device};
use crate::package;

pub fn dump(slug: Option<&str>, out: &Path) -> Result<()> {
    let api = hidapi::HidApi::new()?;
    with_device(&api, slug, |dev| {
        let bytes = dev.as_kbproto().dump_flash()?;
        std::fs::write(out, &bytes)
            .with_context(|| format!("writing dump to {}", out.display()))?;
        println!("Wrote {} bytes to {}", bytes.len(), out.display());
        Ok(())
    })
}

pub fn flash(slug: Option<&str>, ok: bool, version: &str, image: &Path) -> Result<()> {
    confirm_destructive(ok, "This will erase and reflash the device. Continue?")?;
    let fw = std::fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    let api = hidapi::HidApi::new()?;
    with_device(&api, slug, |dev| {
        if dev.as_kbproto().update(version, &fw)? {
            println!("Flashed {version} ({} bytes).", fw.len());
            Ok(())
        } else {
            bail!("flash failed");
        }
    })
}

pub fn wipe(slug: Option<&str>, ok: bool) -> Result<()> {
    confirm_destructive(ok, "This will mass-erase the device's flash. Continue?")?;
    let api = hidapi::HidApi::new()?;
    with_device(&api, slug, |dev| {
        if dev.as_kbproto().erase_and_check()? {
            println!("Device wiped; it is now in bootloader mode.");
            Ok(())
        } else {
            bail!("wipe failed");
        }
    })
}

pub fn decode(updater: &Path, out: &Path) -> Result<()> {
    let data = std::fs::read(updater).with_context(|| format!("reading {}", updater.display()))?;
    let extracted = package::decode_update_package(&data)?;

    if !extracted.company.is_empty() {
        println!("Company:     {}", extracted.company);
    }
    if !extracted.product.is_empty() {
        println!("Product:     {}", extracted.product);
    }
    if !extracted.version.is_empty() {
        println!("Version:     {}", extracted.version);
    }
    if !extracted.description.is_empty() {
        println!("Description: {}", extracted.description);
    }
    for layout in &extracted.layouts {
        println!("Layout:      {layout}");
    }
    for blob in &extracted.info_blobs {
        println!(
            "Info blob:   version={} number=0x{:08X} vid=0x{:04X} pid=0x{:04X}",
            blob.version, blob.version_number, blob.vid, blob.pid
        );
    }

    if extracted.firmware.is_empty() {
        println!("No firmware section found in this package.");
        return Ok(());
    }

    std::fs::write(out, &extracted.firmware)
        .with_context(|| format!("writing firmware to {}", out.display()))?;
    println!("Wrote {} bytes to {}", extracted.firmware.len(), out.display());

    for (i, extra) in extracted.extra_firmware.iter().enumerate() {
        let extra_out = out.with_extension(format!("extra{i}.bin"));
        std::fs::write(&extra_out, extra)
            .with_context(|| format!("writing extra firmware to {}", extra_out.display()))?;
        println!("Wrote {} bytes to {}", extra.len(), extra_out.display());
    }

    Ok(())
}
