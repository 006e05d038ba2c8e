//! Fuzz test for geometry calculation
//!
//! Every requested size maps to a geometry inside the legal ranges whose
//! capacity never exceeds the request.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vhdkit_core::geometry::{calculate_geometry, calculate_geometry_bytes};

fuzz_target!(|input: (u32, u64)| {
    let (size_mb, size_bytes) = input;

    let (g, achieved) = calculate_geometry(size_mb);
    assert!((4..=16).contains(&g.heads));
    assert!(matches!(g.spt, 17 | 31 | 63 | 255));
    assert!(achieved <= u64::from(size_mb) * 1024 * 1024);
    assert_eq!(achieved, g.capacity());

    let (g, achieved) = calculate_geometry_bytes(size_bytes);
    assert!(achieved <= size_bytes);
    assert_eq!(achieved, g.capacity());
});
