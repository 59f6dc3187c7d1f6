use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        Self::with_git_settings("")
    }

    /// Extra `[git]` keys are appended below `scan_paths`.
    fn with_git_settings(git_settings: &str) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");
        let code = home.join("code");

        fs::create_dir_all(&code).expect("failed to create scan root");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(xdg_config.join("pulseboard"))
            .expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        // Everything remote is off; git scans an empty directory and the
        // board is read from the local store.
        let config = format!(
            r#"
[git]
scan_paths = ["{}"]
{}

[kanban]
api_url = ""

[weather]
enabled = false
"#,
            code.display(),
            git_settings
        );
        fs::write(xdg_config.join("pulseboard/config.toml"), config)
            .expect("failed to write config");

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    fn db_path(&self) -> PathBuf {
        self.xdg_data.join("pulseboard/pulseboard.db")
    }
}

fn command(env: &CliTestEnv, args: &[&str]) -> Command {
    let mut command = Command::new(assert_cmd::cargo::cargo_bin!("pulseboard"));
    command
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env_remove("PULSEBOARD_TODOIST_TOKEN")
        .env_remove("PULSEBOARD_LINEAR_API_KEY");
    command
}

fn run(env: &CliTestEnv, args: &[&str]) -> Output {
    command(env, args)
        .output()
        .unwrap_or_else(|e| panic!("failed to execute pulseboard: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    assert!(
        output.status.success(),
        "pulseboard {:?} failed\nstdout:\n{}\nstderr:\n{}",
        args,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn snapshot_json_reports_every_source() {
    let env = CliTestEnv::new();
    let args = ["snapshot", "--json"];
    let output = run(&env, &args);
    assert_success(&args, &output);

    let envelope: Value =
        serde_json::from_slice(&output.stdout).expect("snapshot output should be JSON");
    let sources = envelope["sources"].as_object().expect("sources map");
    assert_eq!(sources.len(), 4);
    assert_eq!(envelope["sources"]["git"]["status"], "ok");
    assert_eq!(envelope["sources"]["kanban"]["status"], "ok");
    assert_eq!(envelope["sources"]["todoist"]["status"], "not_configured");
    assert_eq!(envelope["storage"]["status"], "ok");
    assert!(env.db_path().exists(), "snapshot should create the database");
}

#[test]
fn snapshot_no_store_skips_persistence() {
    let env = CliTestEnv::new();
    let args = ["snapshot", "--json", "--no-store"];
    let output = run(&env, &args);
    assert_success(&args, &output);

    let envelope: Value = serde_json::from_slice(&output.stdout).expect("JSON output");
    assert_eq!(envelope["storage"]["status"], "skipped");
}

#[test]
fn trends_after_snapshot() {
    let env = CliTestEnv::new();
    assert_success(&["snapshot"], &run(&env, &["snapshot"]));

    let args = ["trends", "--days", "7"];
    let output = run(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("git:"), "stdout: {stdout}");
    assert!(stdout.contains("samples=1"), "stdout: {stdout}");
}

#[test]
fn trends_rejects_out_of_range_days() {
    let env = CliTestEnv::new();
    let output = run(&env, &["trends", "--days", "0"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--days"));
}

#[test]
fn sessions_on_empty_store() {
    let env = CliTestEnv::new();
    let args = ["sessions", "--days", "30"];
    let output = run(&env, &args);
    assert_success(&args, &output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("Sessions:       0"));
}

#[test]
fn config_reports_status() {
    let env = CliTestEnv::new();
    let args = ["config"];
    let output = run(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("No problems found"), "stdout: {stdout}");
    assert!(stdout.contains("\"configured\": false"), "stdout: {stdout}");
}

#[cfg(unix)]
#[test]
fn watch_stops_on_interrupt_mid_cycle() {
    use std::os::unix::fs::PermissionsExt;
    use std::process::Stdio;
    use std::time::{Duration, Instant};

    let tools = TempDir::new().expect("failed to create tools dir");
    let hanging_git = tools.path().join("git");
    fs::write(&hanging_git, "#!/bin/sh\nsleep 30\n").expect("failed to write git stub");
    fs::set_permissions(&hanging_git, fs::Permissions::from_mode(0o755))
        .expect("failed to mark git stub executable");

    let env = CliTestEnv::with_git_settings(&format!(
        "git_binary = \"{}\"\ncommand_timeout_secs = 30\ntimeout_secs = 20",
        hanging_git.display()
    ));
    fs::create_dir_all(env.home.join("code/stuck/.git")).expect("failed to create repo");

    let mut child = command(&env, &["snapshot", "--watch", "--interval", "60"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn pulseboard");

    // The first cycle is stuck on the hanging repository by now.
    std::thread::sleep(Duration::from_millis(1500));
    let sent = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .expect("failed to run kill");
    assert!(sent.success());

    let deadline = Instant::now() + Duration::from_secs(10);
    while child.try_wait().expect("failed to poll pulseboard").is_none() {
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("pulseboard kept running after Ctrl+C");
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let output = child.wait_with_output().expect("failed to collect output");
    assert_success(&["snapshot", "--watch"], &output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("Stopped"));
}
