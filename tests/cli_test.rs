use std::fs;
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn fpe() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_fpe"));
    // Keep the caller's environment from leaking into the run.
    command.env_remove("RUST_LOG");
    for (key, _) in std::env::vars() {
        if key.starts_with("FPE_") {
            command.env_remove(key);
        }
    }
    command
}

fn wait_with_timeout(mut child: Child, timeout: Duration) -> Output {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if child.try_wait().unwrap().is_some() {
            return child.wait_with_output().unwrap();
        }
        thread::sleep(Duration::from_millis(50));
    }
    child.kill().unwrap();
    panic!("fpe did not exit within {timeout:?}");
}

#[test]
fn test_list_command() {
    let output = fpe().arg("--list").output().expect("Failed to run fpe --list");

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Copy File"));
    assert!(stdout.contains("Video File Conversion"));
    assert!(stdout.contains("Run Command"));
}

#[test]
fn test_missing_task_parameter_fails() {
    let temp_dir = TempDir::new().unwrap();

    let output = fpe()
        .arg("-w")
        .arg(temp_dir.path().join("watch"))
        .args(["-t", "copy"])
        .output()
        .expect("Failed to run fpe");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("FPE Error: Task option 'destination' missing."));
}

#[test]
fn test_invalid_task_fails() {
    let temp_dir = TempDir::new().unwrap();

    let output = fpe()
        .arg("-w")
        .arg(temp_dir.path())
        .args(["-t", "42"])
        .output()
        .expect("Failed to run fpe");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("FPE Error:"));
}

#[test]
fn test_show_config_layers_file_and_flags() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("fpe.toml");
    fs::write(
        &config_path,
        "watch = \"/srv/in\"\ntask = \"copy\"\nkill_count = 7\n",
    )
    .unwrap();

    let output = fpe()
        .arg("-c")
        .arg(&config_path)
        .args(["--maxdepth", "-1", "-k", "2", "--param", "mailbox=Inbox"])
        .arg("--show-config")
        .output()
        .expect("Failed to run fpe --show-config");

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("watch = \"/srv/in\""));
    assert!(stdout.contains("kill_count = 2"));
    assert!(stdout.contains("max_depth = -1"));
    assert!(stdout.contains("mailbox = \"Inbox\""));
}

#[test]
fn test_missing_config_file_fails() {
    let temp_dir = TempDir::new().unwrap();

    let output = fpe()
        .arg("-c")
        .arg(temp_dir.path().join("nope.toml"))
        .output()
        .expect("Failed to run fpe");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("does not exist"));
}

#[test]
fn test_copy_task_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let watch = temp_dir.path().join("watch");
    let destination = temp_dir.path().join("dest");
    let log = temp_dir.path().join("fpe.log");

    let child = fpe()
        .arg("-w")
        .arg(&watch)
        .arg("-d")
        .arg(&destination)
        .args(["-t", "copy", "-k", "1", "--delete"])
        .arg("-l")
        .arg(&log)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to start fpe");

    // The engine creates the watch folder; wait for it before dropping a file.
    wait_for(&watch);
    thread::sleep(Duration::from_millis(500));
    fs::write(watch.join("report.txt"), b"quarterly").unwrap();

    let output = wait_with_timeout(child, Duration::from_secs(15));
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    assert_eq!(fs::read(destination.join("report.txt")).unwrap(), b"quarterly");
    assert!(!watch.join("report.txt").exists());

    let log_text = fs::read_to_string(&log).unwrap();
    assert!(log_text.contains("*** task = [Copy File] ***"));
    assert!(log_text.contains("kill count reached"));
}

fn wait_for(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !path.exists() {
        assert!(Instant::now() < deadline, "{} never appeared", path.display());
        thread::sleep(Duration::from_millis(20));
    }
}
