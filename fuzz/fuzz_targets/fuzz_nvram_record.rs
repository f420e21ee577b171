#![no_main]
use libfuzzer_sys::fuzz_target;

// Exercise the persisted NVRAM record decoder against arbitrary bytes: it
// must never panic, and any `Ok` result must carry a config that already
// satisfies `sanitize()` (load-time sanitization is idempotent).
fuzz_target!(|data: &[u8]| {
    if let Ok(cfg) = nutrient_core::config::decode_record(data) {
        let mut sanitized = cfg.clone();
        sanitized.sanitize();
        assert_eq!(cfg, sanitized);
    }
});
