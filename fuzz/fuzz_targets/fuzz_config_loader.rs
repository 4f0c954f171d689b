#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parsing and validation may reject anything, but never panic.
    let Ok(cfg) = shot_config::load_toml(data) else {
        return;
    };
    if cfg.validate().is_err() {
        return;
    }
    // A config that validates must also pass the core builder's checks.
    let built = shot_core::ShotControllerBuilder::from(&cfg).build();
    assert!(built.is_ok(), "validated config rejected by builder: {built:?}");
});
