use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let nvram_path = dir.path().join("nvram.bin");
    let toml = format!(
        r#"
[runtime]
tick_ms = 5

[nvram]
path = {path:?}
"#,
        path = nvram_path.to_string_lossy(),
    );
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

#[test]
fn dose_jog_pump_and_persist_rate() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    // Factory default pump rates are non-zero, so a jog should complete.
    let mut cmd = Command::cargo_bin("nutrient_cli").unwrap();
    cmd.arg("--config").arg(&cfg).arg("dose-jog").arg("a").arg("2.0");
    cmd.assert().success().stdout(predicate::str::contains("DONE"));
}

#[test]
fn cal_ph_start_then_read() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = Command::cargo_bin("nutrient_cli").unwrap();
    cmd.arg("--config").arg(&cfg).arg("cal-ph").arg("start");
    cmd.assert().success();

    let mut cmd = Command::cargo_bin("nutrient_cli").unwrap();
    cmd.arg("--config").arg(&cfg).arg("cal-ph").arg("read");
    cmd.assert().success();
}

#[test]
fn config_dump_reflects_reset() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    // Change the pump rate for channel A, then confirm it is no longer the default.
    let mut cmd = Command::cargo_bin("nutrient_cli").unwrap();
    cmd.arg("--config").arg(&cfg).arg("dose-jog").arg("a").arg("1.0");
    cmd.assert().success();

    let mut cmd = Command::cargo_bin("nutrient_cli").unwrap();
    cmd.arg("--config").arg(&cfg).arg("reset-eeprom");
    cmd.assert().success().stdout(predicate::str::contains("OK"));

    let mut cmd = Command::cargo_bin("nutrient_cli").unwrap();
    cmd.arg("--config").arg(&cfg).arg("config-dump");
    cmd.assert().success().stdout(predicate::str::contains("device_id=1"));
}
