#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    let Ok(cfg) = toml::from_str::<shade_config::Config>(data) else {
        return;
    };
    if cfg.validate().is_ok() {
        // Curve rules and group conflicts are checked when settings are built.
        let _ = shade_core::Settings::from_config(&cfg);
    }
});
