#![cfg(feature = "hardware")]

// These tests only run against real SPI/GPIO wiring (or a loopback rig); on
// a desktop `cargo test --features hardware` they are expected to fail at
// device-open time, not hang or panic, which is what they check for.

#[test]
fn mcp3008_rejects_out_of_range_channel() {
    let Ok(spi) = rppal::spi::Spi::new(
        rppal::spi::Bus::Spi0,
        rppal::spi::SlaveSelect::Ss0,
        1_350_000,
        rppal::spi::Mode::Mode0,
    ) else {
        return;
    };
    let mut adc = nutrient_hardware::adc::Mcp3008::new(spi);
    let err = adc
        .read_channel(nutrient_hardware::adc::AdcChannel(9))
        .expect_err("channel 9 does not exist on an 8-channel ADC");
    assert!(format!("{err}").contains("out of range"));
}
