//! CYKB firmware XOR codec (spec C3).
//!
//! A fixed 52-byte key, applied word-wise and cycling every 13 words.
//! Symmetric: decode and encode are the same operation.

pub const XOR_KEY: [u32; 13] = [
    0xe7c29474, 0x79084b10, 0x53d54b0d, 0xfc1e8f32, 0x48e81a9b, 0x773c808e, 0xb7483552, 0xd9cb8c76,
    0x2a8c8bc6, 0x0967ada8, 0xd4520f5c, 0xd0c3279d, 0xeac091c5,
];

/// XOR-encode or decode a firmware image in place. Operates on whole
/// 4-byte little-endian words; a trailing partial word, if any, is XOR'd
/// against the low bytes of the cycling key word.
pub fn xor_codec(buf: &mut [u8]) {
    let mut chunks = buf.chunks_exact_mut(4);
    for (i, chunk) in (&mut chunks).enumerate() {
        let key = XOR_KEY[i % 13].to_le_bytes();
        for j in 0..4 {
            chunk[j] ^= key[j];
        }
    }
    let rem = chunks.into_remainder();
    if !rem.is_empty() {
        let word_index = buf.len() / 4;
        let key = XOR_KEY[word_index % 13].to_le_bytes();
        for (j, b) in rem.iter_mut().enumerate() {
            *b ^= key[j];
        }
    }
}

pub fn decode_firmware(buf: &mut [u8]) {
    xor_codec(buf);
}

pub fn encode_firmware(buf: &mut [u8]) {
    xor_codec(buf);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_zero_block_encodes_to_the_key_bytes() {
        let mut buf = [0u8; 52];
        encode_firmware(&mut buf);
        let mut expected = Vec::with_capacity(52);
        for word in XOR_KEY {
            expected.extend_from_slice(&word.to_le_bytes());
        }
        assert_eq!(&buf[..], &expected[..]);
    }

    #[test]
    fn encode_then_decode_is_identity() {
        let mut buf = [0u8; 52];
        encode_firmware(&mut buf);
        decode_firmware(&mut buf);
        assert_eq!(buf, [0u8; 52]);
    }

    #[test]
    fn key_cycles_every_52_bytes() {
        let mut buf = [0u8; 104];
        encode_firmware(&mut buf);
        assert_eq!(&buf[..52], &buf[52..]);
    }

    #[test]
    fn non_multiple_of_four_length_still_round_trips() {
        let mut buf = [0xAAu8; 53];
        let original = buf;
        encode_firmware(&mut buf);
        decode_firmware(&mut buf);
        assert_eq!(buf, original);
    }
}
