//! Stand-in for the embedded JSON keymap-layout template database (spec's
//! explicit out-of-scope external collaborator): names only. Building real
//! per-board visual geometry needs that external data, which this tool
//! doesn't ship; `keymap knownlayouts` exists to exercise the contract.

pub static KNOWN_LAYOUTS: &[&str] = &["ansi_60", "iso_60", "hhkb", "tkl_ansi", "tkl_iso"];
