//! Keymap commands: `keymap dump/knownlayouts/set/commit/reload/reset/
//! layouts/setlayout`.

use anyhow::{bail, Context, Result};
use pok3r_device::{keymap, qmk};

use crate::commands::with_device;
use crate::layouts::KNOWN_LAYOUTS;

fn require_qmk(dev: &mut crate::commands::OpenDevice) -> Result<()> {
    if !dev.is_qmk() {
        bail!("device is not QMK-enabled");
    }
    Ok(())
}

pub fn dump(slug: Option<&str>) -> Result<()> {
    let api = hidapi::HidApi::new()?;
    with_device(&api, slug, |dev| {
        require_qmk(dev)?;
        let transport = dev.qmk_transport()?;
        let info = qmk::keymap_info(transport)?;
        let cell_len = info.rows as usize * info.cols as usize * info.kcsize as usize;

        for layer in 0..info.layers as usize {
            let bytes = qmk::keymap_read_matrix(transport, (layer * cell_len) as u32, cell_len)?;
            println!("Layer {layer}:");
            for row in 0..info.rows as usize {
                let mut line = String::new();
                for col in 0..info.cols as usize {
                    let off = (row * info.cols as usize + col) * 2;
                    let code = u16::from_le_bytes([bytes[off], bytes[off + 1]]);
                    line.push_str(&format!("{:>6} ", keymap::keycode_abbrev(code)));
                }
                println!("{line}");
            }
        }
        Ok(())
    })
}

pub fn knownlayouts() -> Result<()> {
    for name in KNOWN_LAYOUTS {
        println!("{name}");
    }
    Ok(())
}

pub fn set(
    slug: Option<&str>,
    layer: u8,
    key: Option<&str>,
    row: Option<u8>,
    col: Option<u8>,
    keycode: &str,
) -> Result<()> {
    let code = resolve_keycode(keycode)?;

    let api = hidapi::HidApi::new()?;
    with_device(&api, slug, |dev| {
        require_qmk(dev)?;
        let transport = dev.qmk_transport()?;
        let info = qmk::keymap_info(transport)?;
        if layer >= info.layers {
            bail!("layer {layer} out of range (0..{})", info.layers);
        }

        let (row, col) = match key {
            Some(key) => {
                let idx: usize = key
                    .parse()
                    .with_context(|| format!("'{key}' is not a numeric matrix index"))?;
                (idx / info.cols as usize, idx % info.cols as usize)
            }
            None => (
                row.context("either <key> or --row/--col is required")? as usize,
                col.context("either <key> or --row/--col is required")? as usize,
            ),
        };
        if row >= info.rows as usize || col >= info.cols as usize {
            bail!("row/col out of range for this device's matrix");
        }

        let total_len = info.layers as usize * info.rows as usize * info.cols as usize * 2;
        let cached = qmk::keymap_read_matrix(transport, 0, total_len)?;
        let mut new = cached.clone();
        let off = (layer as usize * info.rows as usize * info.cols as usize
            + row * info.cols as usize
            + col)
            * 2;
        new[off..off + 2].copy_from_slice(&code.to_le_bytes());

        qmk::upload_keymap_diff(transport, &cached, &new)?;
        println!(
            "Set layer {layer} row {row} col {col} to {} (0x{code:04X}).",
            keymap::keycode_name(code)
        );
        Ok(())
    })
}

fn resolve_keycode(s: &str) -> Result<u16> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u16::from_str_radix(hex, 16).with_context(|| format!("bad hex keycode '{s}'"));
    }
    if let Some(kc) = keymap::keycode_by_name(s) {
        return Ok(kc.code);
    }
    bail!("unknown keycode '{s}'");
}

pub fn commit(slug: Option<&str>) -> Result<()> {
    let api = hidapi::HidApi::new()?;
    with_device(&api, slug, |dev| {
        require_qmk(dev)?;
        qmk::keymap_commit(dev.qmk_transport()?)?;
        println!("Keymap committed.");
        Ok(())
    })
}

pub fn reload(slug: Option<&str>) -> Result<()> {
    let api = hidapi::HidApi::new()?;
    with_device(&api, slug, |dev| {
        require_qmk(dev)?;
        qmk::keymap_reload(dev.qmk_transport()?)?;
        println!("Keymap reloaded.");
        Ok(())
    })
}

pub fn reset(slug: Option<&str>) -> Result<()> {
    let api = hidapi::HidApi::new()?;
    with_device(&api, slug, |dev| {
        require_qmk(dev)?;
        qmk::keymap_reset(dev.qmk_transport()?)?;
        println!("Keymap reset to firmware defaults.");
        Ok(())
    })
}

pub fn layouts(slug: Option<&str>) -> Result<()> {
    let api = hidapi::HidApi::new()?;
    with_device(&api, slug, |dev| {
        require_qmk(dev)?;
        let transport = dev.qmk_transport()?;
        let info = qmk::keymap_info(transport)?;
        let names = read_layout_names(transport, info.nlayout)?;
        for (i, name) in names.iter().enumerate() {
            let marker = if i as u8 == info.clayout { " (active)" } else { "" };
            println!("{i}: {name}{marker}");
        }
        Ok(())
    })
}

pub fn setlayout(slug: Option<&str>, name: &str) -> Result<()> {
    let api = hidapi::HidApi::new()?;
    with_device(&api, slug, |dev| {
        require_qmk(dev)?;
        let transport = dev.qmk_transport()?;
        let info = qmk::keymap_info(transport)?;
        let names = read_layout_names(transport, info.nlayout)?;
        let index = names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
            .with_context(|| format!("no on-device layout named '{name}'"))?;
        qmk::set_layout(transport, index as u8)?;
        println!("Layout set to {name} (index {index}).");
        Ok(())
    })
}

/// Reads the comma-separated, NUL-terminated layout-name list from the
/// strings page, generously bounding the read at 32 bytes per name.
fn read_layout_names(
    transport: &pok3r_transport::HidTransport,
    nlayout: u8,
) -> Result<Vec<String>, pok3r_device::DeviceError> {
    let cap = nlayout as usize * 32;
    let raw = qmk::keymap_read_strings(transport, 0, cap)?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let text = String::from_utf8_lossy(&raw[..end]);
    Ok(text.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect())
}
