//! Fuzz test for footer decoding
//!
//! Any 512 bytes decode to a footer that re-encodes to the same bytes, and the
//! checksum engine agrees with itself after stamping.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vhdkit_core::checksum;
use vhdkit_core::footer::{Footer, FOOTER_SIZE};

fuzz_target!(|data: &[u8]| {
    let Some(bytes) = data.get(..FOOTER_SIZE) else {
        return;
    };
    let Ok(bytes) = <[u8; FOOTER_SIZE]>::try_from(bytes) else {
        return;
    };

    let mut footer = Footer::parse(&bytes);
    assert_eq!(footer.to_bytes(), bytes);

    let _ = footer.kind();
    let _ = footer.creation_time();

    checksum::stamp(&mut footer);
    assert!(checksum::validate(&footer));
});
