//! Keymap model (spec C10): keycode catalog, visual layout, layer storage,
//! and serialization to the device's storage order.

use std::fmt;

/// `KC_NO`, the keycode meaning "no key here".
pub const KC_NO: u16 = 0x0000;

/// QMK's user-keycode range start; codes below this are HID usage codes,
/// modifiers, or QMK's own quantum keycodes.
pub const SAFE_RANGE: u16 = 0x5F80;

/// One entry in the global keycode catalog.
#[derive(Debug, Clone, Copy)]
pub struct Keycode {
    pub code: u16,
    pub name: &'static str,
    pub abbrev: &'static str,
    pub desc: &'static str,
}

/// Representative keycode catalog: HID usage codes (letters, digits,
/// punctuation, function row, modifiers), a handful of media/consumer
/// codes, and the QMK quantum codes this tool actually needs (layer
/// switching, RGB/backlight, reset/debug). Codes outside this table still
/// round-trip — [`keycode_name`] falls back to a hex label.
pub static KEYCODES: &[Keycode] = &[
    Keycode { code: KC_NO, name: "KC_NO", abbrev: "---", desc: "no key" },
    Keycode { code: 0x0001, name: "KC_TRNS", abbrev: "trns", desc: "transparent" },
    Keycode { code: 0x0004, name: "KC_A", abbrev: "A", desc: "A" },
    Keycode { code: 0x0005, name: "KC_B", abbrev: "B", desc: "B" },
    Keycode { code: 0x0006, name: "KC_C", abbrev: "C", desc: "C" },
    Keycode { code: 0x0007, name: "KC_D", abbrev: "D", desc: "D" },
    Keycode { code: 0x0008, name: "KC_E", abbrev: "E", desc: "E" },
    Keycode { code: 0x0009, name: "KC_F", abbrev: "F", desc: "F" },
    Keycode { code: 0x000A, name: "KC_G", abbrev: "G", desc: "G" },
    Keycode { code: 0x000B, name: "KC_H", abbrev: "H", desc: "H" },
    Keycode { code: 0x000C, name: "KC_I", abbrev: "I", desc: "I" },
    Keycode { code: 0x000D, name: "KC_J", abbrev: "J", desc: "J" },
    Keycode { code: 0x000E, name: "KC_K", abbrev: "K", desc: "K" },
    Keycode { code: 0x000F, name: "KC_L", abbrev: "L", desc: "L" },
    Keycode { code: 0x0010, name: "KC_M", abbrev: "M", desc: "M" },
    Keycode { code: 0x0011, name: "KC_N", abbrev: "N", desc: "N" },
    Keycode { code: 0x0012, name: "KC_O", abbrev: "O", desc: "O" },
    Keycode { code: 0x0013, name: "KC_P", abbrev: "P", desc: "P" },
    Keycode { code: 0x0014, name: "KC_Q", abbrev: "Q", desc: "Q" },
    Keycode { code: 0x0015, name: "KC_R", abbrev: "R", desc: "R" },
    Keycode { code: 0x0016, name: "KC_S", abbrev: "S", desc: "S" },
    Keycode { code: 0x0017, name: "KC_T", abbrev: "T", desc: "T" },
    Keycode { code: 0x0018, name: "KC_U", abbrev: "U", desc: "U" },
    Keycode { code: 0x0019, name: "KC_V", abbrev: "V", desc: "V" },
    Keycode { code: 0x001A, name: "KC_W", abbrev: "W", desc: "W" },
    Keycode { code: 0x001B, name: "KC_X", abbrev: "X", desc: "X" },
    Keycode { code: 0x001C, name: "KC_Y", abbrev: "Y", desc: "Y" },
    Keycode { code: 0x001D, name: "KC_Z", abbrev: "Z", desc: "Z" },
    Keycode { code: 0x001E, name: "KC_1", abbrev: "1", desc: "1" },
    Keycode { code: 0x001F, name: "KC_2", abbrev: "2", desc: "2" },
    Keycode { code: 0x0020, name: "KC_3", abbrev: "3", desc: "3" },
    Keycode { code: 0x0021, name: "KC_4", abbrev: "4", desc: "4" },
    Keycode { code: 0x0022, name: "KC_5", abbrev: "5", desc: "5" },
    Keycode { code: 0x0023, name: "KC_6", abbrev: "6", desc: "6" },
    Keycode { code: 0x0024, name: "KC_7", abbrev: "7", desc: "7" },
    Keycode { code: 0x0025, name: "KC_8", abbrev: "8", desc: "8" },
    Keycode { code: 0x0026, name: "KC_9", abbrev: "9", desc: "9" },
    Keycode { code: 0x0027, name: "KC_0", abbrev: "0", desc: "0" },
    Keycode { code: 0x0028, name: "KC_ENT", abbrev: "Ent", desc: "enter" },
    Keycode { code: 0x0029, name: "KC_ESC", abbrev: "Esc", desc: "escape" },
    Keycode { code: 0x002A, name: "KC_BSPC", abbrev: "Bspc", desc: "backspace" },
    Keycode { code: 0x002B, name: "KC_TAB", abbrev: "Tab", desc: "tab" },
    Keycode { code: 0x002C, name: "KC_SPC", abbrev: "Spc", desc: "space" },
    Keycode { code: 0x002D, name: "KC_MINS", abbrev: "-", desc: "minus" },
    Keycode { code: 0x002E, name: "KC_EQL", abbrev: "=", desc: "equal" },
    Keycode { code: 0x002F, name: "KC_LBRC", abbrev: "[", desc: "left bracket" },
    Keycode { code: 0x0030, name: "KC_RBRC", abbrev: "]", desc: "right bracket" },
    Keycode { code: 0x0031, name: "KC_BSLS", abbrev: "\\", desc: "backslash" },
    Keycode { code: 0x0033, name: "KC_SCLN", abbrev: ";", desc: "semicolon" },
    Keycode { code: 0x0034, name: "KC_QUOT", abbrev: "'", desc: "quote" },
    Keycode { code: 0x0035, name: "KC_GRV", abbrev: "`", desc: "grave" },
    Keycode { code: 0x0036, name: "KC_COMM", abbrev: ",", desc: "comma" },
    Keycode { code: 0x0037, name: "KC_DOT", abbrev: ".", desc: "period" },
    Keycode { code: 0x0038, name: "KC_SLSH", abbrev: "/", desc: "slash" },
    Keycode { code: 0x0039, name: "KC_CAPS", abbrev: "Caps", desc: "caps lock" },
    Keycode { code: 0x003A, name: "KC_F1", abbrev: "F1", desc: "F1" },
    Keycode { code: 0x003B, name: "KC_F2", abbrev: "F2", desc: "F2" },
    Keycode { code: 0x003C, name: "KC_F3", abbrev: "F3", desc: "F3" },
    Keycode { code: 0x003D, name: "KC_F4", abbrev: "F4", desc: "F4" },
    Keycode { code: 0x003E, name: "KC_F5", abbrev: "F5", desc: "F5" },
    Keycode { code: 0x003F, name: "KC_F6", abbrev: "F6", desc: "F6" },
    Keycode { code: 0x0040, name: "KC_F7", abbrev: "F7", desc: "F7" },
    Keycode { code: 0x0041, name: "KC_F8", abbrev: "F8", desc: "F8" },
    Keycode { code: 0x0042, name: "KC_F9", abbrev: "F9", desc: "F9" },
    Keycode { code: 0x0043, name: "KC_F10", abbrev: "F10", desc: "F10" },
    Keycode { code: 0x0044, name: "KC_F11", abbrev: "F11", desc: "F11" },
    Keycode { code: 0x0045, name: "KC_F12", abbrev: "F12", desc: "F12" },
    Keycode { code: 0x0046, name: "KC_PSCR", abbrev: "PScr", desc: "print screen" },
    Keycode { code: 0x0047, name: "KC_SCRL", abbrev: "Scrl", desc: "scroll lock" },
    Keycode { code: 0x0048, name: "KC_PAUS", abbrev: "Paus", desc: "pause" },
    Keycode { code: 0x0049, name: "KC_INS", abbrev: "Ins", desc: "insert" },
    Keycode { code: 0x004A, name: "KC_HOME", abbrev: "Home", desc: "home" },
    Keycode { code: 0x004B, name: "KC_PGUP", abbrev: "PgUp", desc: "page up" },
    Keycode { code: 0x004C, name: "KC_DEL", abbrev: "Del", desc: "delete" },
    Keycode { code: 0x004D, name: "KC_END", abbrev: "End", desc: "end" },
    Keycode { code: 0x004E, name: "KC_PGDN", abbrev: "PgDn", desc: "page down" },
    Keycode { code: 0x004F, name: "KC_RGHT", abbrev: "Rght", desc: "right arrow" },
    Keycode { code: 0x0050, name: "KC_LEFT", abbrev: "Left", desc: "left arrow" },
    Keycode { code: 0x0051, name: "KC_DOWN", abbrev: "Down", desc: "down arrow" },
    Keycode { code: 0x0052, name: "KC_UP", abbrev: "Up", desc: "up arrow" },
    Keycode { code: 0x0053, name: "KC_NLCK", abbrev: "NLck", desc: "num lock" },
    Keycode { code: 0x0065, name: "KC_APP", abbrev: "App", desc: "application" },
    Keycode { code: 0x00E0, name: "KC_LCTL", abbrev: "LCtl", desc: "left control" },
    Keycode { code: 0x00E1, name: "KC_LSFT", abbrev: "LSft", desc: "left shift" },
    Keycode { code: 0x00E2, name: "KC_LALT", abbrev: "LAlt", desc: "left alt" },
    Keycode { code: 0x00E3, name: "KC_LGUI", abbrev: "LGui", desc: "left gui" },
    Keycode { code: 0x00E4, name: "KC_RCTL", abbrev: "RCtl", desc: "right control" },
    Keycode { code: 0x00E5, name: "KC_RSFT", abbrev: "RSft", desc: "right shift" },
    Keycode { code: 0x00E6, name: "KC_RALT", abbrev: "RAlt", desc: "right alt" },
    Keycode { code: 0x00E7, name: "KC_RGUI", abbrev: "RGui", desc: "right gui" },
    Keycode { code: 0x00F0, name: "KC_MPLY", abbrev: "Play", desc: "media play/pause" },
    Keycode { code: 0x00F1, name: "KC_MSTP", abbrev: "Stop", desc: "media stop" },
    Keycode { code: 0x00F2, name: "KC_MVOU", abbrev: "Vol+", desc: "volume up" },
    Keycode { code: 0x00F3, name: "KC_MVOD", abbrev: "Vol-", desc: "volume down" },
    Keycode { code: 0x00F4, name: "KC_MUTE", abbrev: "Mute", desc: "mute" },
    Keycode { code: 0x5C00, name: "RGB_TOG", abbrev: "RGB", desc: "rgb toggle" },
    Keycode { code: 0x5C01, name: "RGB_MOD", abbrev: "RGB+", desc: "rgb next mode" },
    Keycode { code: 0x5C02, name: "RGB_RMOD", abbrev: "RGB-", desc: "rgb prev mode" },
    Keycode { code: 0x5C03, name: "RGB_HUI", abbrev: "Hue+", desc: "rgb hue up" },
    Keycode { code: 0x5C04, name: "RGB_HUD", abbrev: "Hue-", desc: "rgb hue down" },
    Keycode { code: 0x5C05, name: "RGB_SAI", abbrev: "Sat+", desc: "rgb sat up" },
    Keycode { code: 0x5C06, name: "RGB_SAD", abbrev: "Sat-", desc: "rgb sat down" },
    Keycode { code: 0x5C07, name: "RGB_VAI", abbrev: "Brt+", desc: "rgb brightness up" },
    Keycode { code: 0x5C08, name: "RGB_VAD", abbrev: "Brt-", desc: "rgb brightness down" },
    Keycode { code: 0x5D00, name: "DEBUG", abbrev: "Dbg", desc: "toggle debug mode" },
    Keycode { code: 0x5D01, name: "RESET", abbrev: "Rst", desc: "jump to bootloader" },
    Keycode { code: 0x5D02, name: "EEP_RST", abbrev: "EEP", desc: "reset eeprom" },
];

/// Momentary-layer codes occupy `SAFE_RANGE + n` for layer `n`, same as the
/// original's `MO(n)` / `TG(n)` macros collapsed into two ranges.
const MO_BASE: u16 = SAFE_RANGE;
const TG_BASE: u16 = SAFE_RANGE + 0x10;

pub fn keycode_by_code(code: u16) -> Option<&'static Keycode> {
    KEYCODES.iter().find(|k| k.code == code)
}

pub fn keycode_by_name(name: &str) -> Option<&'static Keycode> {
    KEYCODES.iter().find(|k| k.name.eq_ignore_ascii_case(name))
}

/// Momentary-activate layer `n`.
pub fn mo(layer: u8) -> u16 {
    MO_BASE + layer as u16
}

/// Toggle layer `n`.
pub fn tg(layer: u8) -> u16 {
    TG_BASE + layer as u16
}

pub fn keycode_name(code: u16) -> String {
    if let Some(kc) = keycode_by_code(code) {
        return kc.name.to_string();
    }
    if (MO_BASE..TG_BASE).contains(&code) {
        return format!("MO({})", code - MO_BASE);
    }
    if (TG_BASE..TG_BASE + 0x10).contains(&code) {
        return format!("TG({})", code - TG_BASE);
    }
    format!("0x{:04X}", code)
}

pub fn keycode_abbrev(code: u16) -> String {
    if let Some(kc) = keycode_by_code(code) {
        return kc.abbrev.to_string();
    }
    if (MO_BASE..TG_BASE).contains(&code) {
        return format!("M{}", code - MO_BASE);
    }
    if (TG_BASE..TG_BASE + 0x10).contains(&code) {
        return format!("T{}", code - TG_BASE);
    }
    format!("{:04X}", code)
}

pub fn keycode_desc(code: u16) -> String {
    keycode_by_code(code)
        .map(|kc| kc.desc.to_string())
        .unwrap_or_else(|| keycode_name(code))
}

/// One physical position in the visual layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key {
    pub row: u8,
    pub col: u8,
    pub width: u8,
    pub space: bool,
    pub newrow: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum KeymapError {
    #[error("layout index {0} duplicated")]
    DuplicateIndex(u8),
    #[error("layout has {template} non-spacer keys but {layout} non-zero cells")]
    SizeMismatch { template: usize, layout: usize },
    #[error("matrix byte buffer has wrong length: expected {expected}, got {got}")]
    BadLength { expected: usize, got: usize },
}

/// A single row entry in a visual layout template: low 6 bits width, bit 7
/// spacer flag.
pub type TemplateRow = Vec<u8>;

pub struct Keymap {
    rows: u8,
    cols: u8,
    layout: Vec<Key>,
    /// 1-indexed: `matrix2layout[row*cols+col]` = layout index, or 0.
    matrix2layout: Vec<u16>,
    /// 1-indexed: `layout2matrix[layout_index-1]` = `row*cols+col`, or 0.
    layout2matrix: Vec<u16>,
    layers: Vec<Vec<u16>>,
}

impl Keymap {
    pub fn new(rows: u8, cols: u8) -> Self {
        Keymap {
            rows,
            cols,
            layout: Vec::new(),
            matrix2layout: vec![0u16; rows as usize * cols as usize],
            layout2matrix: Vec::new(),
            layers: Vec::new(),
        }
    }

    pub fn rows(&self) -> u8 {
        self.rows
    }

    pub fn cols(&self) -> u8 {
        self.cols
    }

    pub fn key_count(&self) -> usize {
        self.layout.len()
    }

    pub fn layers(&self) -> usize {
        self.layers.len()
    }

    /// Load a visual layout: `layout_bytes` has `rows*cols` entries, each
    /// the 1-based visual key index at that matrix cell (0 = no key).
    /// `template` gives, per visual row, the width/spacer byte for every
    /// key in the template in left-to-right order.
    pub fn load_layout(&mut self, layout_bytes: &[u8], template: &[TemplateRow]) -> Result<(), KeymapError> {
        let expected = self.rows as usize * self.cols as usize;
        if layout_bytes.len() != expected {
            return Err(KeymapError::BadLength { expected, got: layout_bytes.len() });
        }

        let template_keys: usize = template.iter().map(|r| r.iter().filter(|&&b| b & 0x80 == 0).count()).sum();
        let layout_cells = layout_bytes.iter().filter(|&&b| b != 0).count();
        if template_keys != layout_cells {
            return Err(KeymapError::SizeMismatch { template: template_keys, layout: layout_cells });
        }

        let mut seen = vec![false; template_keys + 1];
        let mut matrix2layout = vec![0u16; expected];
        let mut layout2matrix = vec![0u16; template_keys];

        for (matrix_pos, &b) in layout_bytes.iter().enumerate() {
            if b == 0 {
                continue;
            }
            let idx = b as usize;
            if idx > template_keys || seen[idx] {
                return Err(KeymapError::DuplicateIndex(b));
            }
            seen[idx] = true;
            matrix2layout[matrix_pos] = b as u16;
            layout2matrix[idx - 1] = matrix_pos as u16;
        }

        let mut layout = Vec::with_capacity(template_keys);
        for row in template {
            let mut first_in_row = true;
            for &packed in row {
                if packed & 0x80 != 0 {
                    continue;
                }
                let width = packed & 0x3F;
                let matrix_pos = layout2matrix[layout.len()] as usize;
                layout.push(Key {
                    row: (matrix_pos / self.cols as usize) as u8,
                    col: (matrix_pos % self.cols as usize) as u8,
                    width,
                    space: false,
                    newrow: first_in_row,
                });
                first_in_row = false;
            }
        }

        self.layout = layout;
        self.matrix2layout = matrix2layout;
        self.layout2matrix = layout2matrix;
        self.layers.clear();
        Ok(())
    }

    /// Load one layer: `layer_bytes` has `rows*cols*2` little-endian u16
    /// keycodes in matrix row-major order; stored densely by visual index.
    pub fn load_layer(&mut self, layer_bytes: &[u8]) -> Result<(), KeymapError> {
        let expected = self.rows as usize * self.cols as usize * 2;
        if layer_bytes.len() != expected {
            return Err(KeymapError::BadLength { expected, got: layer_bytes.len() });
        }

        let mut layer = vec![KC_NO; self.layout.len()];
        for (visual_idx, &matrix_pos) in self.layout2matrix.iter().enumerate() {
            let off = matrix_pos as usize * 2;
            layer[visual_idx] = u16::from_le_bytes([layer_bytes[off], layer_bytes[off + 1]]);
        }
        self.layers.push(layer);
        Ok(())
    }

    pub fn get(&self, layer: usize, visual_idx: usize) -> Option<u16> {
        self.layers.get(layer)?.get(visual_idx).copied()
    }

    pub fn set(&mut self, layer: usize, visual_idx: usize, code: u16) -> bool {
        match self.layers.get_mut(layer).and_then(|l| l.get_mut(visual_idx)) {
            Some(slot) => {
                *slot = code;
                true
            }
            None => false,
        }
    }

    /// Serialize all layers back to the device's storage order:
    /// `layers * rows * cols * 2` bytes; positions absent from the visual
    /// layout serialize as `KC_NO`.
    pub fn to_matrix(&self) -> Vec<u8> {
        let cells = self.rows as usize * self.cols as usize;
        let mut out = Vec::with_capacity(self.layers.len() * cells * 2);

        for layer in &self.layers {
            for matrix_pos in 0..cells {
                let code = match self.matrix2layout[matrix_pos] {
                    0 => KC_NO,
                    l => layer[(l - 1) as usize],
                };
                out.extend_from_slice(&code.to_le_bytes());
            }
        }
        out
    }

    pub fn layout(&self) -> &[Key] {
        &self.layout
    }

    /// Render one layer as ASCII: key cells are width-sized, abbreviations
    /// centered, `newrow` starts a fresh line.
    pub fn render(&self, layer: usize) -> String {
        let Some(keys) = self.layers.get(layer) else {
            return String::new();
        };

        let mut out = String::new();
        for (i, key) in self.layout.iter().enumerate() {
            if key.newrow {
                out.push('\n');
            }
            let w = key.width.max(3) as usize;
            let label = keycode_abbrev(keys[i]);
            out.push_str(&format!("|{:^width$}", label, width = w));
        }
        out.push('|');
        out
    }
}

impl fmt::Debug for Keymap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keymap")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("keys", &self.layout.len())
            .field("layers", &self.layers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_template() -> Vec<TemplateRow> {
        vec![vec![4, 4], vec![4, 4]]
    }

    #[test]
    fn load_layout_builds_bijective_index_maps() {
        let mut km = Keymap::new(2, 2);
        km.load_layout(&[1, 2, 3, 4], &simple_template()).unwrap();
        for l in 1..=4u16 {
            let matrix_pos = km.layout2matrix[(l - 1) as usize];
            assert_eq!(km.matrix2layout[matrix_pos as usize], l);
        }
    }

    #[test]
    fn load_layout_rejects_duplicate_index() {
        let mut km = Keymap::new(2, 2);
        let err = km.load_layout(&[1, 1, 0, 0], &vec![vec![4, 4]]);
        assert!(matches!(err, Err(KeymapError::DuplicateIndex(1))));
    }

    #[test]
    fn load_layout_rejects_size_mismatch() {
        let mut km = Keymap::new(2, 2);
        let err = km.load_layout(&[1, 2, 3, 0], &simple_template());
        assert!(matches!(err, Err(KeymapError::SizeMismatch { .. })));
    }

    #[test]
    fn layer_round_trips_through_matrix() {
        let mut km = Keymap::new(2, 2);
        km.load_layout(&[1, 2, 3, 4], &simple_template()).unwrap();

        let mut layer_bytes = vec![0u8; 8];
        layer_bytes[0..2].copy_from_slice(&0x0004u16.to_le_bytes()); // matrix (0,0) -> KC_A
        layer_bytes[2..4].copy_from_slice(&0x0005u16.to_le_bytes()); // matrix (0,1) -> KC_B
        layer_bytes[4..6].copy_from_slice(&0x0006u16.to_le_bytes()); // matrix (1,0) -> KC_C
        layer_bytes[6..8].copy_from_slice(&0x0007u16.to_le_bytes()); // matrix (1,1) -> KC_D
        km.load_layer(&layer_bytes).unwrap();

        let out = km.to_matrix();
        assert_eq!(out, layer_bytes);
    }

    #[test]
    fn unmapped_matrix_cells_serialize_as_kc_no() {
        let mut km = Keymap::new(2, 2);
        km.load_layout(&[1, 0, 0, 2], &vec![vec![4], vec![4]]).unwrap();
        km.load_layer(&[0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        km.set(0, 0, 0x0004);
        km.set(0, 1, 0x0005);

        let out = km.to_matrix();
        assert_eq!(u16::from_le_bytes([out[0], out[1]]), 0x0004);
        assert_eq!(u16::from_le_bytes([out[2], out[3]]), KC_NO);
        assert_eq!(u16::from_le_bytes([out[4], out[5]]), KC_NO);
        assert_eq!(u16::from_le_bytes([out[6], out[7]]), 0x0005);
    }

    #[test]
    fn keycode_name_falls_back_to_hex_for_unknown_code() {
        assert_eq!(keycode_name(0x1234), "0x1234");
        assert_eq!(keycode_name(0x0004), "KC_A");
    }

    #[test]
    fn mo_and_tg_format_with_layer_number() {
        assert_eq!(keycode_name(mo(2)), "MO(2)");
        assert_eq!(keycode_name(tg(3)), "TG(3)");
    }
}
