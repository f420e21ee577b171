use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
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

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["config-dump"], 0, "device_id", "stdout")]
fn cli_table_cases(#[case] args: &[&str], #[case] exit_code: i32, #[case] needle: &str, #[case] stream: &str) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = Command::cargo_bin("nutrient_cli").unwrap();
    cmd.arg("--config").arg(&cfg);
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[test]
fn rejects_bad_config_path() {
    let mut cmd = Command::cargo_bin("nutrient_cli").unwrap();
    cmd.arg("--config").arg("/nonexistent/path.toml").arg("config-dump");
    cmd.assert().failure().stderr(predicate::str::contains("How to fix"));
}

#[test]
fn mix_only_completes_and_persists() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = Command::cargo_bin("nutrient_cli").unwrap();
    cmd.arg("--config").arg(&cfg).arg("mix-only").arg("20");
    cmd.assert().success().stdout(predicate::str::contains("DONE"));
}

#[test]
fn dose_jog_rejects_unknown_channel() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = Command::cargo_bin("nutrient_cli").unwrap();
    cmd.arg("--config").arg(&cfg).arg("dose-jog").arg("NOT_A_CHANNEL").arg("5");
    cmd.assert().success().stdout(predicate::str::contains("ERR"));
}
