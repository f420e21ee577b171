use nutrient_config::load_toml;

#[test]
fn rejects_zero_tick_ms() {
    let toml = r#"
[runtime]
tick_ms = 0
"#;

    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject tick_ms=0");
    assert!(
        format!("{err}")
            .to_lowercase()
            .contains("tick_ms must be >= 1")
    );
}

#[test]
fn accepts_positive_tick_ms() {
    let toml = r#"
[runtime]
tick_ms = 50

[backend]
hardware = false

[backend.adc]
ph_channel = 0
ec_channel = 1
vcc_channel = 2

[nvram]
path = "profile.bin"
"#;

    let cfg = load_toml(toml).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
}

#[test]
fn rejects_adc_channel_out_of_range() {
    let toml = r#"
[backend.adc]
ec_channel = 8
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject channel 8");
    assert!(format!("{err}").contains("ec_channel"));
}

#[test]
fn rejects_empty_nvram_path() {
    let toml = r#"
[nvram]
path = "   "
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    assert!(cfg.validate().is_err());
}
