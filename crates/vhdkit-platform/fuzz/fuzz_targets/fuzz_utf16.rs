//! Fuzz test for UTF-16 transcoding
//!
//! Decoding arbitrary bytes must never panic, and anything that decodes must
//! re-encode to the same prefix of the input.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vhdkit_platform::{decode_utf16, encode_utf16, encode_utf16_into, Endian};

fuzz_target!(|data: &[u8]| {
    for endian in [Endian::Big, Endian::Little] {
        if let Ok(text) = decode_utf16(data, endian) {
            // Text stops at the first NUL unit, so re-encoding yields a prefix
            let encoded = encode_utf16(&text, endian);
            assert!(encoded.len() <= data.len());
            assert_eq!(&data[..encoded.len()], encoded.as_slice());
        }
    }

    // Encoding into a 512-byte name field either fits or reports overflow
    if let Ok(text) = std::str::from_utf8(data) {
        let mut field = [0u8; 512];
        match encode_utf16_into(text, Endian::Big, &mut field) {
            Ok(n) => assert!(n <= field.len()),
            Err(_) => assert!(text.encode_utf16().count() * 2 > field.len()),
        }
    }
});
