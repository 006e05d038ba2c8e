//! Fuzz test for locator path handling
//!
//! Separator normalization and relative path computation must accept any
//! string without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use std::path::Path;
use vhdkit_platform::{normalize_separators, relative_path};

fuzz_target!(|input: (&str, &str)| {
    let (from, to) = input;

    let normalized = normalize_separators(from);
    assert_eq!(normalized.len(), from.len());
    #[cfg(not(windows))]
    assert!(!normalized.contains('\\'));

    if from.contains('\0') || to.contains('\0') {
        return;
    }

    // Either a relative path or a clean error
    if let Ok(rel) = relative_path(Path::new(from), Path::new(to)) {
        assert!(!rel.as_os_str().is_empty());
    }
});
