//! Debug console streaming: `console`.

use anyhow::{Context, Result};
use pok3r_transport::ConsoleTransport;

use crate::commands::{resolve_device, setup_interrupt_handler};

pub fn stream(slug: Option<&str>) -> Result<()> {
    let api = hidapi::HidApi::new()?;
    let attached = resolve_device(&api, slug)?;
    let def = attached.definition;

    let transport = ConsoleTransport::open(&api, def.vid, def.pid)
        .with_context(|| format!("opening console interface for {}", def.name))?;

    let running = setup_interrupt_handler();
    while running.load(std::sync::atomic::Ordering::SeqCst) {
        let line = transport.read_line()?;
        if !line.is_empty() {
            println!("{line}");
        }
    }
    Ok(())
}
