//! Shared helpers for CLI integration tests.

use std::fs;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_tep") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "tep.exe" } else { "tep" };
    let mut path = std::env::current_exe().expect("test binary path");
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push(exe_name);
    path
}

fn log_dir() -> PathBuf {
    let dir = std::env::temp_dir().join("tep-test-logs");
    fs::create_dir_all(&dir).expect("create log dir");
    dir
}

/// Run the CLI with `args` and extra environment variables, capturing
/// output to a per-case log file for post-mortem inspection.
pub fn run_cli_case(case: &str, args: &[&str], envs: &[(&str, &str)]) -> CmdResult {
    let bin = resolve_bin_path();
    let mut command = Command::new(&bin);
    command.args(args);
    for (key, value) in envs {
        command.env(key, value);
    }

    let output = command.output().expect("spawn tep binary");
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let log_path = log_dir().join(format!("{}_{}.log", sanitize(case), now_millis()));
    let log_body = format!(
        "case: {case}\nbin: {}\nargs: {args:?}\nstatus: {:?}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}\n",
        bin.display(),
        output.status.code()
    );
    fs::write(&log_path, log_body).expect("write case log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
