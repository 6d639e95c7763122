//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pok3rtool")]
#[command(author, version, about = "Firmware and keymap tool for Holtek HT32 mechanical keyboards")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Skip the confirmation prompt before destructive operations
    #[arg(long, global = true)]
    pub ok: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Device catalog slug to target when more than one device is attached
    #[arg(short = 't', long = "device", global = true)]
    pub device: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List attached devices matching the catalog
    #[command(visible_alias = "l")]
    List,

    /// Read the device's stored firmware version
    #[command(visible_aliases = ["ver", "v"])]
    Version,

    /// Write the device's stored firmware version
    #[command(visible_alias = "sv")]
    SetVersion {
        /// Version string
        version: String,
    },

    /// Read device info (ISP info for bootloader devices, QMK info for QMK devices)
    #[command(visible_alias = "i")]
    Info,

    /// Reboot between bootloader and application mode
    Reboot,

    /// Reboot directly into the bootloader
    #[command(visible_alias = "bl")]
    Bootloader,

    /// Dump the full flash contents to a file
    Dump {
        /// Output path
        out: PathBuf,
    },

    /// Flash firmware: reboot to bootloader, clear version, write, set version, reboot
    Flash {
        /// Version string to record after a successful flash
        version: String,
        /// Path to a firmware image (already C3-decoded, plaintext)
        image: PathBuf,
    },

    /// Mass-erase flash and leave the device in bootloader mode
    Wipe,

    /// Decode a vendor updater executable into a firmware image (C5)
    Decode {
        /// Path to the vendor updater executable
        updater: PathBuf,
        /// Output path for the extracted firmware image
        out: PathBuf,
    },

    /// QMK EEPROM commands
    #[command(subcommand, visible_alias = "ee")]
    Eeprom(EepromCommands),

    /// QMK keymap commands
    #[command(subcommand, visible_alias = "km")]
    Keymap(KeymapCommands),

    /// Stream the device's debug console
    Console,
}

#[derive(Subcommand)]
pub enum EepromCommands {
    /// Dump the EEPROM to a file
    Dump {
        /// Output path
        out: PathBuf,
    },

    /// Erase one EEPROM sector at `addr` (hex, e.g. 0x1000, or decimal)
    Erase {
        addr: String,
    },

    /// Erase the entire EEPROM
    Wipe,

    /// Dump the keymap-relevant EEPROM region
    Keymap,

    /// Round-trip read/write test on a scratch EEPROM address
    Test,
}

#[derive(Subcommand)]
pub enum KeymapCommands {
    /// Print the current keymap for every layer
    Dump,

    /// List layout names known to the local layout database
    Knownlayouts,

    /// Set one keycode, addressed either by visual key name/index or by row+col
    Set {
        layer: u8,
        /// Key name or 1-based visual index (mutually exclusive with --row/--col)
        key: Option<String>,
        #[arg(long, requires = "col")]
        row: Option<u8>,
        #[arg(long, requires = "row")]
        col: Option<u8>,
        keycode: String,
    },

    /// Persist the uncommitted keymap to EEPROM
    Commit,

    /// Discard uncommitted changes and reload from EEPROM
    Reload,

    /// Reload the built-in default keymap
    Reset,

    /// Print the currently active layout name and its index
    Layouts,

    /// Switch the active layout by name
    Setlayout {
        name: String,
    },
}
