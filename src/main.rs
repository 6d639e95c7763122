//! pok3rtool: firmware and keymap management for Holtek HT32-series
//! mechanical keyboards.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
use cli::{Cli, Commands, EepromCommands, KeymapCommands};

mod commands;
mod devices;
mod layouts;
mod package;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let slug = cli.device.as_deref();

    match cli.command {
        None | Some(Commands::List) => commands::query::list(),

        Some(Commands::Version) => commands::query::version(slug),
        Some(Commands::SetVersion { version }) => commands::query::set_version(slug, &version),
        Some(Commands::Info) => commands::query::info(slug),
        Some(Commands::Reboot) => commands::query::reboot(slug),
        Some(Commands::Bootloader) => commands::query::bootloader(slug),

        Some(Commands::Dump { out }) => commands::firmware::dump(slug, &out),
        Some(Commands::Flash { version, image }) => {
            commands::firmware::flash(slug, cli.ok, &version, &image)
        }
        Some(Commands::Wipe) => commands::firmware::wipe(slug, cli.ok),
        Some(Commands::Decode { updater, out }) => commands::firmware::decode(&updater, &out),

        Some(Commands::Eeprom(EepromCommands::Dump { out })) => commands::eeprom::dump(slug, &out),
        Some(Commands::Eeprom(EepromCommands::Erase { addr })) => {
            commands::eeprom::erase(slug, cli.ok, &addr)
        }
        Some(Commands::Eeprom(EepromCommands::Wipe)) => commands::eeprom::wipe(slug, cli.ok),
        Some(Commands::Eeprom(EepromCommands::Keymap)) => commands::eeprom::keymap(slug),
        Some(Commands::Eeprom(EepromCommands::Test)) => commands::eeprom::test(slug),

        Some(Commands::Keymap(KeymapCommands::Dump)) => commands::keymap::dump(slug),
        Some(Commands::Keymap(KeymapCommands::Knownlayouts)) => commands::keymap::knownlayouts(),
        Some(Commands::Keymap(KeymapCommands::Set { layer, key, row, col, keycode })) => {
            commands::keymap::set(slug, layer, key.as_deref(), row, col, &keycode)
        }
        Some(Commands::Keymap(KeymapCommands::Commit)) => commands::keymap::commit(slug),
        Some(Commands::Keymap(KeymapCommands::Reload)) => commands::keymap::reload(slug),
        Some(Commands::Keymap(KeymapCommands::Reset)) => commands::keymap::reset(slug),
        Some(Commands::Keymap(KeymapCommands::Layouts)) => commands::keymap::layouts(slug),
        Some(Commands::Keymap(KeymapCommands::Setlayout { name })) => {
            commands::keymap::setlayout(slug, &name)
        }

        Some(Commands::Console) => commands::console::stream(slug),
    }
}
