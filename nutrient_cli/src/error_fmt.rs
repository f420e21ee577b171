//! Human-readable error descriptions and the process exit-code policy.

/// Map an `eyre::Report` to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("open mcp3008") || lower.contains("spi bus") {
        return "What happened: Failed to open the MCP3008 analog front-end.\nLikely causes: Wrong backend.adc.spi_bus/spi_select, or SPI not enabled on this device.\nHow to fix: Check [backend.adc] in the config and enable SPI (e.g. raspi-config).".to_string();
    }
    if lower.contains("open gpio relays") {
        return "What happened: Failed to open one or more relay GPIO pins.\nLikely causes: Wrong pin numbers in [backend.relays], or insufficient GPIO permissions.\nHow to fix: Check the pin assignment and ensure the process can access /dev/gpiomem.".to_string();
    }
    if lower.contains("eeprom") {
        return "What happened: Failed to initialize or access the NVRAM EEPROM.\nLikely causes: Wrong I2C bus/address in [nvram.eeprom], or the device is not wired up.\nHow to fix: Check [nvram] in the config, or set nvram.hardware = false to use a file-backed record instead.".to_string();
    }
    if lower.contains("invalid configuration") {
        return "What happened: The desktop tuning profile failed validation.\nLikely causes: An out-of-range or empty value in the TOML.\nHow to fix: Edit the config file and rerun; CONFIG_DUMP shows the currently persisted firmware values separately.".to_string();
    }
    if lower.contains("parse config") {
        return "What happened: The desktop tuning profile TOML could not be parsed.\nLikely causes: A syntax error or a field with the wrong type.\nHow to fix: Check the file against the [runtime]/[logging]/[nvram]/[backend]/[seed] tables.".to_string();
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!("Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}")
}

/// Stable process exit code for a top-level error. `1` covers every
/// construction/config/I-O failure surfaced before the loop starts. A
/// faulted batch during `run` is not surfaced as a `Result` error at all —
/// the cooperative loop keeps running and reporting `FAULT` frames over the
/// wire, so this function never sees it.
pub fn exit_code_for_error(_err: &eyre::Report) -> i32 {
    1
}
