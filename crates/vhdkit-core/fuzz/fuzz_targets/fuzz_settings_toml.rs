//! Fuzz test for settings TOML parsing
//!
//! Settings deserialization must handle arbitrary TOML safely, and anything
//! that parses must serialize back.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vhdkit_core::settings::{BehaviorSettings, ConvertSettings, CreateSettings, Settings};

fuzz_target!(|data: &str| {
    if let Ok(settings) = toml::from_str::<Settings>(data) {
        assert!(toml::to_string_pretty(&settings).is_ok());
        let _ = settings.create.block_size.len();
        let _ = settings.convert.chunk_size.len();
    }

    let _: Result<CreateSettings, _> = toml::from_str(data);
    let _: Result<ConvertSettings, _> = toml::from_str(data);
    let _: Result<BehaviorSettings, _> = toml::from_str(data);

    for section in ["create", "convert", "behavior"] {
        let wrapped = format!("[{}]\n{}", section, data);
        let _: Result<Settings, _> = toml::from_str(&wrapped);
    }
});
