//! UTF-16 transcoding for header text fields.
//!
//! The sparse header stores the parent's base name as UTF-16 big endian, while the
//! Windows parent locators hold UTF-16 little endian paths. Unlike a lossy
//! conversion, invalid input is reported rather than replaced.

use crate::{PlatformError, Result};

/// Byte order of a UTF-16 buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Most significant byte first (sparse header name field)
    Big,
    /// Least significant byte first (W2ku / W2ru locators)
    Little,
}

impl Endian {
    fn unit_bytes(self, unit: u16) -> [u8; 2] {
        match self {
            Endian::Big => unit.to_be_bytes(),
            Endian::Little => unit.to_le_bytes(),
        }
    }

    fn unit_from(self, bytes: [u8; 2]) -> u16 {
        match self {
            Endian::Big => u16::from_be_bytes(bytes),
            Endian::Little => u16::from_le_bytes(bytes),
        }
    }
}

/// Encode `text` as UTF-16 in the given byte order.
pub fn encode_utf16(text: &str, endian: Endian) -> Vec<u8> {
    text.encode_utf16()
        .flat_map(|unit| endian.unit_bytes(unit))
        .collect()
}

/// Encode `text` into a fixed-capacity field, returning the number of bytes written.
///
/// Bytes of `dest` past the encoded text are left untouched.
pub fn encode_utf16_into(text: &str, endian: Endian, dest: &mut [u8]) -> Result<usize> {
    let encoded = encode_utf16(text, endian);
    if encoded.len() > dest.len() {
        return Err(PlatformError::BufferOverflow {
            needed: encoded.len(),
            capacity: dest.len(),
        });
    }
    dest[..encoded.len()].copy_from_slice(&encoded);
    Ok(encoded.len())
}

/// Decode a UTF-16 buffer, stopping at the first NUL code unit.
pub fn decode_utf16(bytes: &[u8], endian: Endian) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(PlatformError::InvalidSequence(format!(
            "UTF-16 buffer has odd length {}",
            bytes.len()
        )));
    }

    let units = bytes
        .chunks_exact(2)
        .map(|pair| endian.unit_from([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0);

    char::decode_utf16(units)
        .collect::<std::result::Result<String, _>>()
        .map_err(|e| {
            PlatformError::InvalidSequence(format!(
                "unpaired surrogate 0x{:04X}",
                e.unpaired_surrogate()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_big_endian() {
        assert_eq!(encode_utf16("AB", Endian::Big), vec![0x00, 0x41, 0x00, 0x42]);
    }

    #[test]
    fn test_encode_little_endian() {
        assert_eq!(encode_utf16("AB", Endian::Little), vec![0x41, 0x00, 0x42, 0x00]);
    }

    #[test]
    fn test_encode_non_bmp() {
        // U+1F4BE FLOPPY DISK is a surrogate pair
        let bytes = encode_utf16("\u{1F4BE}", Endian::Big);
        assert_eq!(bytes, vec![0xD8, 0x3D, 0xDC, 0xBE]);
        assert_eq!(decode_utf16(&bytes, Endian::Big).unwrap(), "\u{1F4BE}");
    }

    #[test]
    fn test_encode_into_field() {
        let mut field = [0u8; 16];
        let n = encode_utf16_into("base.vhd", Endian::Big, &mut field).unwrap();
        assert_eq!(n, 16);
        assert_eq!(decode_utf16(&field, Endian::Big).unwrap(), "base.vhd");
    }

    #[test]
    fn test_encode_into_overflow() {
        let mut field = [0u8; 4];
        let err = encode_utf16_into("abc", Endian::Little, &mut field).unwrap_err();
        assert!(matches!(
            err,
            PlatformError::BufferOverflow {
                needed: 6,
                capacity: 4
            }
        ));
        assert_eq!(field, [0u8; 4]);
    }

    #[test]
    fn test_decode_stops_at_nul() {
        let mut field = [0u8; 512];
        encode_utf16_into("parent.vhd", Endian::Big, &mut field).unwrap();
        assert_eq!(decode_utf16(&field, Endian::Big).unwrap(), "parent.vhd");
    }

    #[test]
    fn test_decode_rejects_lone_surrogate() {
        let bytes = [0x00, 0xD8, 0x41, 0x00];
        let err = decode_utf16(&bytes, Endian::Little).unwrap_err();
        assert!(matches!(err, PlatformError::InvalidSequence(_)));
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        assert!(decode_utf16(&[0x41, 0x00, 0x42], Endian::Little).is_err());
    }
}
