//! CLI subprocess integration tests.
//!
//! These tests invoke the `glew` binary as a subprocess and verify exit
//! codes, stdout content, and JSON output stability.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new(settings: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("glew.toml"), settings).unwrap();
        Self { dir }
    }

    fn preview() -> Self {
        Self::new(
            r#"settings_version = 1
[engine]
backend = "preview"
"#,
        )
    }

    fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    fn glew(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_glew"));
        cmd.arg("--config")
            .arg(self.dir.path().join("glew.toml"))
            .arg("--data-dir")
            .arg(self.data_dir())
            .env("GLEW_LOG", "warn");
        cmd
    }

    fn script(&self, body: &str) -> PathBuf {
        let path = self.dir.path().join("signals.txt");
        std::fs::write(&path, body).unwrap();
        path
    }
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("invalid JSON ({e}): {stdout}"))
}

fn status_lines(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|l| l.starts_with('{'))
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn wait_for_file(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !path.exists() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    std::thread::sleep(Duration::from_millis(200));
}

#[test]
fn cli_version_exits_zero() {
    let output = Command::new(env!("CARGO_BIN_EXE_glew"))
        .arg("--version")
        .output()
        .unwrap();
    assert!(output.status.success(), "glew --version must exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("glew"), "version output must contain 'glew': {stdout}");
}

#[test]
fn cli_help_lists_commands() {
    let output = Command::new(env!("CARGO_BIN_EXE_glew"))
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["run", "new-wallet", "recover", "years"] {
        assert!(stdout.contains(command), "help must list '{command}'");
    }
}

#[test]
fn cli_years_json_ends_with_default() {
    let ws = Workspace::preview();
    let output = ws.glew().args(["--json", "years"]).output().unwrap();
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["network"], "testnet");
    let years = json["years"].as_array().unwrap();
    assert!(!years.is_empty());
    assert_eq!(years.last().unwrap(), &json["default"]);
}

#[test]
fn cli_new_wallet_prints_twelve_words() {
    let ws = Workspace::preview();
    let output = ws.glew().args(["--json", "new-wallet"]).output().unwrap();
    assert!(
        output.status.success(),
        "new-wallet failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let json = stdout_json(&output);
    assert_eq!(json["words"].as_array().unwrap().len(), 12);
    assert!(json["year"].as_u64().is_some());
}

#[test]
fn cli_recover_with_launcher_backend() {
    let ws = Workspace::new("settings_version = 1\n");
    let output = ws
        .glew()
        .args(["--json", "recover", "--entropy", "00112233445566778899aabbccddeeff"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "recover failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let json = stdout_json(&output);
    assert!(!json["words"].as_array().unwrap().is_empty());
}

#[test]
fn cli_recover_rejects_bad_entropy() {
    let ws = Workspace::preview();
    let output = ws
        .glew()
        .args(["recover", "--entropy", "not-hex"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid entropy"), "stderr: {stderr}");
}

#[test]
fn cli_new_wallet_rejects_unknown_year() {
    let ws = Workspace::preview();
    let output = ws
        .glew()
        .args(["new-wallet", "--year", "1990"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not selectable"));
}

#[test]
fn cli_invalid_settings_exit_two() {
    let ws = Workspace::new("settings_version = 7\n");
    let output = ws.glew().arg("years").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("settings error"));
}

#[test]
fn cli_run_script_reports_phases() {
    let ws = Workspace::preview();
    let script = ws.script(
        "# foreground then background\n\
         foreground\n\
         wait running\n\
         status\n\
         background\n\
         wait idle\n\
         status\n\
         terminate\n",
    );
    let output = ws
        .glew()
        .arg("--json")
        .arg("run")
        .arg("--script")
        .arg(&script)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let statuses = status_lines(&output);
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0]["phase"]["state"], "running");
    assert_eq!(statuses[0]["model"]["running"], true);
    assert_eq!(statuses[1]["phase"]["state"], "idle");
}

#[test]
fn cli_run_background_task_completes_after_expiry() {
    let ws = Workspace::new(
        r#"settings_version = 1
[engine]
backend = "preview"
[background]
enabled = true
completion_delay_secs = 0
"#,
    );
    let script = ws.script(
        "bg-task\n\
         wait running\n\
         expire\n\
         wait idle\n\
         sleep 200\n\
         status\n",
    );
    let output = ws
        .glew()
        .args(["--json", "run", "--script"])
        .arg(&script)
        .output()
        .unwrap();
    assert!(output.status.success());

    let statuses = status_lines(&output);
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0]["phase"]["state"], "idle");
    assert_eq!(statuses[0]["task_completed"], true);
    assert_eq!(statuses[0]["model"]["background"], false);
}

#[test]
fn cli_run_unknown_signal_fails() {
    let ws = Workspace::preview();
    let script = ws.script("foreground\nlaunch\n");
    let output = ws
        .glew()
        .args(["run", "--script"])
        .arg(&script)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("line 2: unknown signal 'launch'"));
}

#[test]
fn cli_second_run_on_locked_data_dir_exits_three() {
    let ws = Workspace::preview();
    let mut holder = ws
        .glew()
        .arg("run")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    wait_for_file(&ws.data_dir().join(".glew.lock"));

    let output = ws.glew().arg("years").output().unwrap();
    assert!(output.status.success(), "years does not need the lock");

    let script = ws.script("status\n");
    let output = ws
        .glew()
        .args(["run", "--script"])
        .arg(&script)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("data dir lock"));

    let mut stdin = holder.stdin.take().unwrap();
    writeln!(stdin, "terminate").unwrap();
    drop(stdin);
    assert!(holder.wait().unwrap().success());
}

#[test]
fn cli_completions_and_man_pages() {
    let output = Command::new(env!("CARGO_BIN_EXE_glew"))
        .args(["completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("glew"));

    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_glew"))
        .arg("man-pages")
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(dir.path().join("glew.1").exists());
    assert!(dir.path().join("glew-run.1").exists());
}
