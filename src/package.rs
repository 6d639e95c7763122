//! Package-data codec (C4) and update-package decoder (C5).
//!
//! C4 reverses the outer byte-level obfuscation the vendor updater wraps
//! around its manifest and embedded firmware. C5 identifies which vendor
//! updater a file is by a content fingerprint, then extracts and
//! deobfuscates its embedded firmware(s) using a variant-specific layout.

use thiserror::Error;

use pok3r_device::codec;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("updater fingerprint not recognized")]
    UnknownPackage,

    #[error("file too short: need at least {need} bytes, have {have}")]
    TooShort { need: u64, have: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PackageError>;

/// Reverse the updater's byte-level obfuscation, in place.
///
/// Stage order per decode: byte-level shift, pairwise swap, quintet swap.
/// The pairwise and quintet swaps are involutions; only the shift has a
/// distinct inverse, applied last on encode.
pub fn decode_package_data(bin: &mut [u8]) {
    for i in 0..bin.len() {
        let x = bin[i] as i32;
        bin[i] = (((x - 7) << 4) + (x >> 4)) as u8;
    }

    let mut i = 1;
    while i < bin.len() {
        bin.swap(i - 1, i);
        i += 2;
    }

    let mut i = 4;
    while i < bin.len() {
        bin.swap(i - 4, i);
        i += 5;
    }
}

/// Inverse of [`decode_package_data`].
pub fn encode_package_data(bin: &mut [u8]) {
    let mut i = 4;
    while i < bin.len() {
        bin.swap(i - 4, i);
        i += 5;
    }

    let mut i = 1;
    while i < bin.len() {
        bin.swap(i - 1, i);
        i += 2;
    }

    for b in bin.iter_mut() {
        let x = *b;
        *b = ((((x >> 4).wrapping_add(7)) & 0xF) | (x << 4)) & 0xFF;
    }
}

/// KBP's own XOR, used by V60/V80 instead of C4 for the manifest and
/// firmware blocks.
pub fn kbp_decrypt(data: &mut [u8], key: u32) {
    let xor_key = key.to_be_bytes();
    for (i, b) in data.iter_mut().enumerate() {
        *b ^= xor_key[i % 4] ^ (i & 0xFF) as u8;
    }
}

/// POK3R-protocol firmware carried inside an update package is plaintext
/// once C4 has been reversed (spec §3's data model); the original's
/// `ProtoPOK3R::decode_firmware` has no retrievable implementation in this
/// codebase's reference sources, and the wrapped data is already the final
/// image, so this is the identity.
fn decode_pok3r_package_firmware(_fw: &mut [u8]) {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackType {
    MaaJonsn,
    MaaV101,
    MaaV102,
    MaaV105,
    KbpV60,
    KbpV80,
}

/// Fingerprint → variant lookup table, transcribed from the vendor
/// updater's own table of known executable hashes.
const FINGERPRINT_TABLE: &[(u64, PackType)] = &[
    // POK3R (141)
    (0x62FCF913A689C9AE, PackType::MaaJonsn),
    (0xFE37430DB1FFCF5F, PackType::MaaJonsn),
    (0x8986F7893143E9F7, PackType::MaaJonsn),
    (0xA28E5EFB3F796181, PackType::MaaJonsn),
    (0xEA55CB190C35505F, PackType::MaaJonsn), // pok3r/v117
    // POK3R RGB (167)
    (0x882CB0E4ECE25454, PackType::MaaV102),
    (0x6CFF0BB4F4086C2F, PackType::MaaV102), // pok3r_rgb/v130
    (0xA6EE37F856CD24C1, PackType::MaaV102), // pok3r_rgb/v140
    // Vortex Core (175)
    (0x51BFA86A7FAF4EEA, PackType::MaaV102),
    (0x0582733413943655, PackType::MaaV102),
    (0x61F73244FA73079F, PackType::MaaV102), // core/v145
    (0xAD80988AE986097B, PackType::MaaV105), // dual firmware: HWP + MPC
    // Vortex Core RGB
    (0xA85878CBD05591A1, PackType::MaaV102),
    // Vortex Race 3 (192)
    (0xB542D0D86B9A85C3, PackType::MaaV102),
    (0xFBF40BEE5D0A3C70, PackType::MaaV102), // race/v124
    (0xAD8B210C77D9D90F, PackType::MaaV102),
    // Vortex Cypher (282)
    (0x0C259BB38A57783D, PackType::MaaV102), // cypher/v136
    // POK3R RGB V2 (207)
    (0x8AA1AEA217DA685B, PackType::MaaV102), // pok3r_rgb2/v105
    // Vortex ViBE (216)
    (0xCE7C8EAA3D28B10D, PackType::MaaV102), // vibe/v113
    // Vortex Tab 60 (304)
    (0xF5ED2438D4445703, PackType::MaaV102), // tab60/v1113
    // Vortex Tab 75 (344)
    (0x4399C7232F89BBDD, PackType::MaaV105), // tab75/v104
    // Vortex Tab 90 (346)
    (0xBFCCB61A61996BB3, PackType::MaaV105), // tab90/v104
    // KBP V60 (112)
    (0x6064D8C4EE74BE18, PackType::KbpV60),
    // KBP V80 (129)
    (0xBCF4C9830D800D8C, PackType::KbpV80),
    // Tex Yoda II (163)
    (0xF5A3714FA9A3CA40, PackType::MaaV102),
    // Mistel Barocco MD600 (143)
    (0xFA5DF5F231700316, PackType::MaaV102), // md600/v148
    // Mistel Freeboard MD200 (200)
    (0x58B42FF4B1C57C09, PackType::MaaV102), // md200/v112
    // Cooler Master MasterKeys Pro L White
    (0x38CC849B2E54B6DF, PackType::MaaV102), // cmprolwhite/v180
    // Cooler Master MasterKeys Pro M White
    (0x12FBF4668BDFE188, PackType::MaaV102),
    // Cooler Master MasterKeys Pro S RGB
    (0x091D591AC1A77B2D, PackType::MaaV101), // cmprosrgb/v121
    (0x0836C83CC7D4E9F1, PackType::MaaV101), // cmprosrgb/v122
    // Cooler Master MasterKeys Pro M RGB
    (0xFDF7AC5B93D67EAD, PackType::MaaV102),
    (0x2F69C079F9D53765, PackType::MaaV102),
    // Cooler Master MasterKeys Pro L RGB
    (0x57CA9D8E07D0C95A, PackType::MaaV101),
    (0x2ADC9B96D5CF26C7, PackType::MaaV101),
];

/// Look up a content fingerprint against the known-updater table.
pub fn classify(fingerprint: u64) -> Option<PackType> {
    FINGERPRINT_TABLE
        .iter()
        .find(|(fp, _)| *fp == fingerprint)
        .map(|(_, kind)| *kind)
}

/// Content fingerprint of an updater executable: the leading 8 bytes of
/// its SHA-256 digest, read big-endian.
pub fn content_fingerprint(data: &[u8]) -> u64 {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(data);
    u64::from_be_bytes(digest[..8].try_into().unwrap())
}

/// One UTF-16-LE string field read at a fixed byte offset within a
/// deobfuscated manifest, truncated at the first NUL code unit.
fn read_utf16(buf: &[u8], offset: usize, byte_len: usize) -> String {
    let units: Vec<u16> = buf[offset..offset + byte_len]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

fn read_u32_le(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn tail_slice(data: &[u8], start: usize, len: usize) -> Result<&[u8]> {
    let end = start
        .checked_add(len)
        .filter(|&e| e <= data.len())
        .ok_or(PackageError::TooShort {
            need: (start + len) as u64,
            have: data.len() as u64,
        })?;
    Ok(&data[start..end])
}

/// One extracted firmware image plus the manifest metadata it came with.
#[derive(Debug, Clone)]
pub struct ExtractedPackage {
    pub company: String,
    pub product: String,
    pub version: String,
    pub description: String,
    pub layouts: Vec<String>,
    pub firmware: Vec<u8>,
    pub extra_firmware: Vec<Vec<u8>>,
    pub info_blobs: Vec<pok3r_device::cykb::InfoBlob>,
}

impl ExtractedPackage {
    fn empty() -> Self {
        ExtractedPackage {
            company: String::new(),
            product: String::new(),
            version: String::new(),
            description: String::new(),
            layouts: Vec::new(),
            firmware: Vec::new(),
            extra_firmware: Vec::new(),
            info_blobs: Vec::new(),
        }
    }
}

/// Identify `data` by content fingerprint and extract its embedded
/// firmware(s). Fails `UnknownPackage` on a fingerprint miss.
pub fn decode_update_package(data: &[u8]) -> Result<ExtractedPackage> {
    let kind = classify(content_fingerprint(data)).ok_or(PackageError::UnknownPackage)?;
    match kind {
        PackType::MaaJonsn => decode_maajonsn(data, 0x4B8, 0x10, 0x460, 0x4AE),
        PackType::MaaV101 => decode_maajonsn(data, 0x4BC, 0x10, 0x461, 0x4AF),
        PackType::MaaV102 => decode_maav102(data),
        PackType::MaaV105 => decode_maav105(data),
        PackType::KbpV60 => decode_kbp(data, 0xDA6282CD),
        PackType::KbpV80 => decode_kbp(data, 0xF6F3111F),
    }
}

/// Shared shape of MAAJONSN (POK3R) and MAAV101 (CM Pro S/L RGB): a single
/// firmware section whose length is read from the manifest.
fn decode_maajonsn(
    data: &[u8],
    strings_len: usize,
    offset_company: usize,
    offset_version: usize,
    offset_sig: usize,
) -> Result<ExtractedPackage> {
    let exelen = data.len();
    let strings_start = exelen
        .checked_sub(strings_len)
        .ok_or(PackageError::TooShort {
            need: strings_len as u64,
            have: exelen as u64,
        })?;

    let mut strs = tail_slice(data, strings_start, strings_len)?.to_vec();
    decode_package_data(&mut strs);

    let offset_product = offset_company + 0x208;
    let company = read_utf16(&strs, offset_company, 0x200);
    let product = read_utf16(&strs, offset_product, 0x200);
    let version = String::from_utf8_lossy(&strs[offset_version..offset_version + 12])
        .trim_end_matches('\0')
        .to_string();
    let _signature = &strs[offset_sig..strings_len];

    let sec_len = read_u32_le(&strs, 0x420) as usize;
    let layout = read_utf16(&strs, 0x424, 0x20);

    let total = strings_len + sec_len;
    let sec_start = exelen
        .checked_sub(total)
        .ok_or(PackageError::TooShort { need: total as u64, have: exelen as u64 })?;

    let mut sec = tail_slice(data, sec_start, sec_len)?.to_vec();
    decode_package_data(&mut sec);
    decode_pok3r_package_firmware(&mut sec);

    Ok(ExtractedPackage {
        company,
        product,
        version,
        description: String::new(),
        layouts: vec![layout],
        firmware: sec,
        extra_firmware: Vec::new(),
        info_blobs: Vec::new(),
    })
}

/// POK3R RGB / Vortex Core family: up to 8 `(fw_len, info_len, layout)`
/// slots at a fixed stride; the first non-empty firmware slot is the
/// primary output, the rest (and any 180-byte info blobs) are kept
/// alongside it.
fn decode_maav102(data: &[u8]) -> Result<ExtractedPackage> {
    let exelen = data.len();
    let strings_len = 0xB24usize;
    let strings_start = exelen
        .checked_sub(strings_len)
        .ok_or(PackageError::TooShort { need: strings_len as u64, have: exelen as u64 })?;

    let mut strs = tail_slice(data, strings_start, strings_len)?.to_vec();
    decode_package_data(&mut strs);

    let offset_desc = 0x26;
    let offset_company = offset_desc + 0x208;
    let offset_product = offset_company + 0x208;
    let offset_version = offset_product + 0x208;

    let description = read_utf16(&strs, offset_desc, 0x200);
    let company = read_utf16(&strs, offset_company, 0x200);
    let product = read_utf16(&strs, offset_product, 0x200);
    let version = read_utf16(&strs, offset_version, 0x200);

    let mut sections: Vec<usize> = Vec::new();
    let mut layouts = Vec::new();
    let mut start = 0xAC8usize - (0x50 * 8);
    for _ in 0..8u8 {
        let fwl = read_u32_le(&strs, start) as usize;
        let strl = read_u32_le(&strs, start + 4) as usize;
        if fwl != 0 {
            layouts.push(read_utf16(&strs, start + 8, 0x20));
            sections.push(fwl);
            sections.push(strl);
        }
        start += 0x50;
    }

    let total: usize = strings_len + sections.iter().sum::<usize>();
    let mut sec_start = exelen
        .checked_sub(total)
        .ok_or(PackageError::TooShort { need: total as u64, have: exelen as u64 })?;

    let mut out = ExtractedPackage {
        company,
        product,
        version,
        description,
        layouts,
        ..ExtractedPackage::empty()
    };

    for (i, &sec_len) in sections.iter().enumerate() {
        if sec_len == 0 {
            continue;
        }
        let mut sec = tail_slice(data, sec_start, sec_len)?.to_vec();
        sec_start += sec_len;
        decode_package_data(&mut sec);

        if sec.len() == 180 {
            let arr: [u8; 180] = sec.try_into().unwrap();
            out.info_blobs.push(pok3r_device::cykb::parse_info_section(&arr));
            continue;
        }

        codec::decode_firmware(&mut sec);
        if i == 0 {
            out.firmware = sec;
        } else {
            out.extra_firmware.push(sec);
        }
    }

    Ok(out)
}

/// Tab 75/90 and dual-firmware Core: 4 product slots each carrying a
/// variable-length layout list, with firmware+info pairs read from a
/// fixed absolute offset rather than computed backward from EOF. Each
/// non-empty firmware slot overwrites the primary output, so the last
/// one wins.
fn decode_maav105(data: &[u8]) -> Result<ExtractedPackage> {
    let exelen = data.len();
    let strings_len = 0x2B58usize;
    let strings_start = exelen
        .checked_sub(strings_len)
        .ok_or(PackageError::TooShort { need: strings_len as u64, have: exelen as u64 })?;

    let mut strs = tail_slice(data, strings_start, exelen - strings_start)?.to_vec();
    decode_package_data(&mut strs);

    let offset_desc = 0x232A;
    let pkg_description = read_utf16(&strs, offset_desc, 0x200);
    let offset_company = offset_desc + 0x208;
    let pkg_company = read_utf16(&strs, offset_company, 0x200);
    let offset_product = offset_company + 0x208;
    let pkg_product = read_utf16(&strs, offset_product, 0x200);
    let offset_version = offset_product + 0x208;
    let pkg_version = read_utf16(&strs, offset_version, 0x200);

    let mut section_start = 0x1F1600usize;
    let mut list_pos = 0xC8usize;
    let mut layouts = Vec::new();
    let mut firmware = Vec::new();
    let mut extra_firmware = Vec::new();

    for _ in 0..4 {
        let desc_start = list_pos;
        let version_start = desc_start + 0x208;
        let addr_pos = version_start + 0x208;
        let mut layout_start = addr_pos + 8;

        while strs.get(layout_start).copied().unwrap_or(0) != 0 {
            layouts.push(read_utf16(&strs, layout_start, 0x200));
            layout_start += 80;
        }
        list_pos = layout_start + 0x2C8;

        let fwl = read_u32_le(&strs, addr_pos) as usize;
        let strl = read_u32_le(&strs, addr_pos + 4) as usize;

        let mut fw = tail_slice(data, section_start, fwl)?.to_vec();
        section_start += fwl;
        decode_package_data(&mut fw);
        codec::decode_firmware(&mut fw);

        let info = tail_slice(data, section_start, strl)?.to_vec();
        section_start += strl;
        let mut info = info;
        decode_package_data(&mut info);

        if !fw.is_empty() {
            if !firmware.is_empty() {
                extra_firmware.push(std::mem::replace(&mut firmware, fw));
            } else {
                firmware = fw;
            }
        }
    }

    Ok(ExtractedPackage {
        company: pkg_company,
        product: pkg_product,
        version: pkg_version,
        description: pkg_description,
        layouts,
        firmware,
        extra_firmware,
        info_blobs: Vec::new(),
    })
}

/// KBP V60/V80: manifest and firmware both use `kbp_decrypt` instead of
/// C4; the firmware lives at a fixed absolute file offset.
fn decode_kbp(data: &[u8], key: u32) -> Result<ExtractedPackage> {
    let exelen = data.len();
    let strings_len = 588usize;
    let strings_start = exelen
        .checked_sub(strings_len)
        .ok_or(PackageError::TooShort { need: strings_len as u64, have: exelen as u64 })?;

    let mut strs = tail_slice(data, strings_start, strings_len)?.to_vec();
    kbp_decrypt(&mut strs, key);

    let fw_start = 0x54000usize;
    let fw_len = read_u32_le(&strs, 4) as usize;

    let mut fw = tail_slice(data, fw_start, fw_len)?.to_vec();
    kbp_decrypt(&mut fw, key);
    decode_pok3r_package_firmware(&mut fw);

    Ok(ExtractedPackage {
        firmware: fw,
        ..ExtractedPackage::empty()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_data_round_trips() {
        let original: Vec<u8> = (0..10u8).collect();
        let mut bin = original.clone();
        encode_package_data(&mut bin);
        decode_package_data(&mut bin);
        assert_eq!(bin, original);
    }

    #[test]
    fn decode_then_encode_restores_original() {
        let original: Vec<u8> = (0..=255u8).collect();
        let mut bin = original.clone();
        decode_package_data(&mut bin);
        encode_package_data(&mut bin);
        assert_eq!(bin, original);
    }

    #[test]
    fn kbp_decrypt_is_an_involution() {
        let original: Vec<u8> = (0..128u8).collect();
        let mut bin = original.clone();
        kbp_decrypt(&mut bin, 0xDA6282CD);
        kbp_decrypt(&mut bin, 0xDA6282CD);
        assert_eq!(bin, original);
    }

    #[test]
    fn fingerprint_classifies_pok3r_v117() {
        assert_eq!(classify(0xEA55CB190C35505F), Some(PackType::MaaJonsn));
    }

    #[test]
    fn fingerprint_classifies_kbp_variants() {
        assert_eq!(classify(0x6064D8C4EE74BE18), Some(PackType::KbpV60));
        assert_eq!(classify(0xBCF4C9830D800D8C), Some(PackType::KbpV80));
    }

    #[test]
    fn unknown_fingerprint_misses() {
        assert_eq!(classify(0x1), None);
    }

    /// Builds a synthetic MAAJONSN-shaped file: strings block with a
    /// firmware-length field at 0x420 and a firmware section of that
    /// length, both obfuscated with C4, so the real extraction path can
    /// be exercised without a vendor binary on hand.
    #[test]
    fn maajonsn_extraction_yields_firmware_of_the_declared_length() {
        let strings_len = 0x4B8usize;
        let fw_len = 64usize;

        let mut strs = vec![0u8; strings_len];
        strs[0x420..0x424].copy_from_slice(&(fw_len as u32).to_le_bytes());
        encode_package_data(&mut strs);

        let mut fw = vec![0xABu8; fw_len];
        encode_package_data(&mut fw);

        let mut file = fw;
        file.extend_from_slice(&strs);

        let out = decode_maajonsn(&file, strings_len, 0x10, 0x460, 0x4AE).unwrap();
        assert_eq!(out.firmware.len(), fw_len);
        assert!(out.firmware.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn kbp_extraction_reads_firmware_from_fixed_offset() {
        let key = 0xDA6282CDu32;
        let fw_len = 32usize;
        let fw_start = 0x54000usize;

        let mut strs = vec![0u8; 588];
        strs[4..8].copy_from_slice(&(fw_len as u32).to_le_bytes());
        kbp_decrypt(&mut strs, key);

        let mut fw = vec![0x42u8; fw_len];
        kbp_decrypt(&mut fw, key);

        let mut file = vec![0u8; fw_start];
        file.extend_from_slice(&fw);
        file.extend_from_slice(&vec![0u8; 4]);
        file.extend_from_slice(&strs);

        let out = decode_kbp(&file, key).unwrap();
        assert_eq!(out.firmware, vec![0x42u8; fw_len]);
    }

    #[test]
    fn unknown_package_fails_cleanly() {
        let data = vec![0u8; 4096];
        assert!(matches!(decode_update_package(&data), Err(PackageError::UnknownPackage)));
    }
}
