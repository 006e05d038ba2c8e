//! Fuzz test for sparse header decoding
//!
//! Header bytes round-trip exactly, and the derived block layout and parent name
//! never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vhdkit_core::header::{SparseHeader, HEADER_SIZE, PLATFORM_W2KU, PLATFORM_W2RU};

fuzz_target!(|data: &[u8]| {
    let Some(bytes) = data.get(..HEADER_SIZE) else {
        return;
    };
    let Ok(bytes) = <[u8; HEADER_SIZE]>::try_from(bytes) else {
        return;
    };

    let header = SparseHeader::parse(&bytes);
    assert_eq!(header.to_bytes(), bytes);

    if header.block_size >= 512 {
        let spb = header.sectors_per_block();
        assert!(header.bitmap_sectors() * 512 * 8 >= spb);
    }
    let _ = header.parent_name();
    let _ = header.locator(PLATFORM_W2KU);
    let _ = header.locator(PLATFORM_W2RU);
});
