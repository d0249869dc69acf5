use std::fs;
use std::process::{Command, Output};

fn rockprov(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rockprov"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run rockprov binary")
}

fn combined(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{}{}", stdout, stderr)
}

#[test]
fn dry_run_logs_every_stage_plan() {
    let work = tempfile::tempdir().unwrap();
    let work_dir = work.path().join("flash");
    let output = rockprov(&[
        "run",
        "--dry-run",
        "--work-dir",
        work_dir.to_str().unwrap(),
    ]);

    let text = combined(&output);
    assert!(output.status.success(), "{}", text);
    assert!(text.contains("DRY RUN: flash 1/12: FetchZeroFill (https://dl.radxa.com/"));
    assert!(text.contains("DRY RUN: flash 12/12: VerifyFlashAfterBootloader"));
    assert!(text.contains("DRY RUN: disk 3/7: WriteOsImage -> /dev/nvme0n1"));
    assert!(text.contains("DRY RUN: customize 1/6: MountTargets (/dev/nvme0n1p2 at /mnt)"));
    assert!(!work_dir.exists(), "dry run must not create the work dir");
}

#[test]
fn skipped_stages_are_not_planned() {
    let output = rockprov(&[
        "run",
        "--dry-run",
        "--skip-flash",
        "--skip-customize",
        "--work-dir",
        "/tmp/rockprov-dry",
    ]);

    let text = combined(&output);
    assert!(output.status.success(), "{}", text);
    assert!(text.contains("DRY RUN: disk 1/7: CheckDiskPresent"));
    assert!(!text.contains("DRY RUN: flash"));
    assert!(!text.contains("DRY RUN: customize"));
}

#[test]
fn execution_without_yes_is_refused() {
    let output = rockprov(&["run", "--work-dir", "/tmp/rockprov-refused"]);

    assert!(!output.status.success());
    assert!(combined(&output).contains("Missing --yes flag"));
}

#[test]
fn disabling_every_stage_is_a_config_error() {
    let output = rockprov(&[
        "run",
        "--dry-run",
        "--skip-flash",
        "--skip-disk",
        "--skip-customize",
    ]);

    assert!(!output.status.success());
    assert!(combined(&output).contains("no stages enabled"));
}

#[test]
fn show_config_layers_file_then_flags() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("provision.toml");
    fs::write(
        &config,
        r#"
[devices]
disk = "/dev/sda"
flash_device = "/dev/mtdblock1"

[network]
interface = "eth0"
address = "dhcp"
"#,
    )
    .unwrap();

    let output = rockprov(&[
        "show-config",
        "--config",
        config.to_str().unwrap(),
        "--disk",
        "/dev/nvme1n1",
        "--work-dir",
        "/srv/rockprov",
    ]);

    let text = combined(&output);
    assert!(output.status.success(), "{}", text);
    assert!(text.contains("/dev/nvme1n1p2"));
    assert!(text.contains("/dev/mtdblock1"));
    assert!(text.contains("Address:             dhcp"));
    assert!(text.contains("/srv/rockprov"));
}

#[test]
fn invalid_config_file_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("broken.toml");
    fs::write(&config, "[devices\ndisk = ").unwrap();

    let output = rockprov(&["show-config", "--config", config.to_str().unwrap()]);

    assert!(!output.status.success());
    assert!(combined(&output).contains("Invalid config file"));
}

#[test]
fn digest_prints_md5_of_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("abc.bin");
    fs::write(&path, b"abc").unwrap();

    let output = rockprov(&["digest", path.to_str().unwrap()]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("900150983cd24fb0d6963f7d28e17f72"));

    let output = rockprov(&["digest", "--algorithm", "sha256", path.to_str().unwrap()]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout
        .starts_with("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"));
}
