//! Top-level CLI definition and dispatch.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use tailnet_exit_prep::audit::{AuditReport, CheckStatus, Finding};
use tailnet_exit_prep::core::config::Config;
use tailnet_exit_prep::core::errors::TepError;
use tailnet_exit_prep::forwarding::FORWARD_KEYS;
use tailnet_exit_prep::logger::{RunOutcome, RunRecord, append_run};
use tailnet_exit_prep::monitor::{HostSampler, HostStats, UsageTier};
use tailnet_exit_prep::persist::PersistOutcome;
use tailnet_exit_prep::platform::pal::detect_platform;
use tailnet_exit_prep::setup;

/// Tailnet Exit Prep — prepares a Linux host to act as a Tailscale exit node.
#[derive(Debug, Parser)]
#[command(
    name = "tep",
    author,
    version,
    about = "Tailnet Exit Prep - exit-node host setup",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Enable and persist IP forwarding, then audit the environment.
    Apply(ApplyArgs),
    /// Show current forwarding flags, persistence, and audit state.
    Status(StatusArgs),
    /// Run the environment audit only.
    Audit(AuditArgs),
    /// Sample host statistics (CPU, memory, disk, network, load).
    Monitor(MonitorArgs),
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Show version and optional build metadata.
    Version(VersionArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct ApplyArgs {
    /// Print planned actions without touching the system.
    #[arg(long)]
    dry_run: bool,
    /// Override the persistent sysctl config file.
    #[arg(long, value_name = "PATH")]
    persist_file: Option<PathBuf>,
    /// Override the env file checked by the audit.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args, Default)]
struct StatusArgs {
    /// Override the env file checked by the audit.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args, Default)]
struct AuditArgs {
    /// Override the env file checked by the audit.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args, Default)]
struct MonitorArgs {
    /// Milliseconds between samples.
    #[arg(long, value_name = "MS")]
    interval_ms: Option<u64>,
    /// Number of samples to emit.
    #[arg(long, default_value_t = 1)]
    count: u32,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args, Default)]
struct VersionArgs {
    /// Include additional build metadata fields.
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping. Exit 1 is reserved
/// for precondition failures (privilege, verification); invalid usage
/// exits 2 like clap's own usage errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Privilege or verification failure — the strict exit-1 contract.
    #[error("{0}")]
    Precondition(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Precondition(_) => 1,
            Self::User(_) | Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

impl From<TepError> for CliError {
    fn from(value: TepError) -> Self {
        if value.is_precondition() {
            Self::Precondition(value.to_string())
        } else {
            Self::Runtime(value.to_string())
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Apply(args) => run_apply(cli, args),
        Command::Status(args) => run_status(cli, args),
        Command::Audit(args) => run_audit(cli, args),
        Command::Monitor(args) => run_monitor(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Version(args) => emit_version(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn output_mode(cli: &Cli) -> OutputMode {
    if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Config::load(cli.config.as_deref()).map_err(|e| CliError::Runtime(e.to_string()))
}

fn run_apply(cli: &Cli, args: &ApplyArgs) -> Result<(), CliError> {
    let mut config = load_config(cli)?;
    if let Some(persist_file) = &args.persist_file {
        if !persist_file.is_absolute() {
            return Err(CliError::User(format!(
                "--persist-file must be absolute, got {}",
                persist_file.display()
            )));
        }
        config.sysctl.persist_file = persist_file.clone();
    }
    if let Some(env_file) = &args.env_file {
        config.env_audit.env_file = env_file.clone();
    }

    let platform = detect_platform(&config).map_err(|e| CliError::Runtime(e.to_string()))?;

    if cli.verbose && !cli.quiet {
        eprintln!("tep: config {}", config.paths.config_file.display());
        eprintln!("tep: persist file {}", config.sysctl.persist_file.display());
    }

    let outcome = match setup::apply(platform.as_ref(), &config, args.dry_run) {
        Ok(outcome) => outcome,
        Err(e) => {
            // Failed runs are logged too; log failures only warn.
            let record = RunRecord::new("apply", RunOutcome::Failed).with_error(e.to_string());
            if let Err(log_err) = append_run(&config.paths.run_log, &record) {
                eprintln!("tep: warning: run log unavailable: {log_err}");
            }
            return Err(e.into());
        }
    };

    let run_outcome = if outcome.dry_run {
        RunOutcome::DryRun
    } else {
        RunOutcome::Success
    };
    let mut record = RunRecord::new("apply", run_outcome).with_audit(&outcome.audit);
    if let Some(state) = &outcome.verified {
        record = record.with_forwarding(state.clone());
    }
    if let Some(persist) = &outcome.persist {
        record = record.with_persist(persist.clone());
    }
    if let Err(log_err) = append_run(&config.paths.run_log, &record) {
        eprintln!("tep: warning: run log unavailable: {log_err}");
    }

    match output_mode(cli) {
        OutputMode::Human => {
            if cli.quiet {
                return Ok(());
            }
            render_apply_human(&config, &outcome);
        }
        OutputMode::Json => {
            let payload = serde_json::to_value(&outcome)?;
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn render_apply_human(config: &Config, outcome: &setup::ApplyOutcome) {
    let version = env!("CARGO_PKG_VERSION");
    if outcome.dry_run {
        println!("Tailnet Exit Prep v{version} (dry run)");
    } else {
        println!("Tailnet Exit Prep v{version}");
    }
    println!("  Persist file: {}", config.sysctl.persist_file.display());

    println!("\nForwarding:");
    let after = outcome.verified.as_ref();
    print_flag_transition(FORWARD_KEYS[0], &outcome.before.ipv4, after.map(|s| s.ipv4.as_str()));
    print_flag_transition(FORWARD_KEYS[1], &outcome.before.ipv6, after.map(|s| s.ipv6.as_str()));

    match (&outcome.persist, outcome.persist_needed) {
        (Some(PersistOutcome::AlreadyPresent), _) => {
            println!(
                "Persistence: {} (directives already present)",
                "skipped".yellow()
            );
        }
        (Some(PersistOutcome::Appended { backup }), _) => match backup {
            Some(path) => println!(
                "Persistence: {} (backup: {})",
                "appended".green(),
                path.display()
            ),
            None => println!("Persistence: {} (new file)", "appended".green()),
        },
        (None, true) => println!("Persistence: would append directives"),
        (None, false) => println!("Persistence: directives already present"),
    }

    if outcome.verified.is_some() {
        println!("Verification: {}", "OK".green().bold());
    }

    render_audit_human(&outcome.audit);

    let warnings = outcome.audit.warn_count();
    if outcome.dry_run {
        println!("\nSummary: dry run, nothing changed ({warnings} warnings)");
    } else if warnings == 0 {
        println!("\nSummary: {}", "host ready for exit-node duty".green());
    } else {
        println!(
            "\nSummary: {} ({warnings} warnings)",
            "forwarding configured".green()
        );
    }
}

fn print_flag_transition(key: &str, before: &str, after: Option<&str>) {
    match after {
        Some(after) => println!("  {key:<30} {before} -> {after}"),
        None => println!("  {key:<30} {before} -> 1 (planned)"),
    }
}

fn run_status(cli: &Cli, args: &StatusArgs) -> Result<(), CliError> {
    let mut config = load_config(cli)?;
    if let Some(env_file) = &args.env_file {
        config.env_audit.env_file = env_file.clone();
    }
    let platform = detect_platform(&config).map_err(|e| CliError::Runtime(e.to_string()))?;
    let view = setup::status(platform.as_ref(), &config)?;

    match output_mode(cli) {
        OutputMode::Human => {
            if cli.quiet {
                return Ok(());
            }
            let version = env!("CARGO_PKG_VERSION");
            println!("Tailnet Exit Prep v{version}");
            println!("  Config: {}", config.paths.config_file.display());

            println!("\nForwarding:");
            print_flag_state(FORWARD_KEYS[0], &view.forwarding.ipv4);
            print_flag_state(FORWARD_KEYS[1], &view.forwarding.ipv6);
            if view.persisted {
                println!(
                    "  Persisted in {}: {}",
                    config.sysctl.persist_file.display(),
                    "yes".green()
                );
            } else {
                println!(
                    "  Persisted in {}: {}",
                    config.sysctl.persist_file.display(),
                    "no".yellow()
                );
            }

            println!("\nPrivilege:");
            print_finding(&view.privilege);

            render_audit_human(&view.audit);
        }
        OutputMode::Json => {
            let payload = serde_json::to_value(&view)?;
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn print_flag_state(key: &str, value: &str) {
    if value == "1" {
        println!("  {key:<30} {}", "1 (enabled)".green());
    } else {
        let label = format!("{value} (disabled)");
        println!("  {key:<30} {}", label.as_str().yellow());
    }
}

fn run_audit(cli: &Cli, args: &AuditArgs) -> Result<(), CliError> {
    let mut config = load_config(cli)?;
    if let Some(env_file) = &args.env_file {
        config.env_audit.env_file = env_file.clone();
    }
    let platform = detect_platform(&config).map_err(|e| CliError::Runtime(e.to_string()))?;
    let report = tailnet_exit_prep::audit::run_audit(platform.as_ref(), &config);

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                render_audit_human(&report);
            }
        }
        OutputMode::Json => {
            let payload = serde_json::to_value(&report)?;
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_monitor(cli: &Cli, args: &MonitorArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let platform = detect_platform(&config).map_err(|e| CliError::Runtime(e.to_string()))?;
    let interval = Duration::from_millis(args.interval_ms.unwrap_or(config.monitor.interval_ms));
    let mut sampler = HostSampler::new(config.monitor.disk_path.clone());

    // Priming read: CPU and network rates need two counter snapshots.
    sampler.sample(platform.as_ref())?;
    for _ in 0..args.count.max(1) {
        std::thread::sleep(interval);
        let stats = sampler.sample(platform.as_ref())?;
        match output_mode(cli) {
            OutputMode::Human => {
                if !cli.quiet {
                    print_host_stats(&stats);
                }
            }
            OutputMode::Json => {
                let payload = serde_json::to_value(&stats)?;
                write_json_line(&payload)?;
            }
        }
    }
    Ok(())
}

fn print_host_stats(stats: &HostStats) {
    let tier = match stats.tier {
        UsageTier::Low => "low".green(),
        UsageTier::Medium => "medium".yellow(),
        UsageTier::High => "high".red().bold(),
    };
    println!(
        "[{tier:<6}] cpu {:5.1}%  mem {:5.1}%  load {:.2}  procs {}  net up {}/s down {}/s  disk {:.0}% used ({} free)",
        stats.cpu_percent,
        stats.memory_percent,
        stats.load_avg,
        stats.process_count,
        format_rate(stats.net_up_bytes_per_sec),
        format_rate(stats.net_down_bytes_per_sec),
        stats.disk_percent,
        format_bytes(stats.disk_available_bytes),
    );
}

fn format_rate(bytes_per_sec: f64) -> String {
    let kb = bytes_per_sec / 1024.0;
    if kb >= 1024.0 {
        format!("{:.1}M", kb / 1024.0)
    } else if kb >= 10.0 {
        format!("{kb:.0}K")
    } else {
        format!("{kb:.1}K")
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    let gib = bytes as f64 / (1024.0 * 1024.0 * 1024.0);
    if gib >= 1.0 {
        format!("{gib:.1}G")
    } else {
        format!("{:.0}M", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn render_audit_human(report: &AuditReport) {
    println!("\nEnvironment audit:");
    for finding in &report.findings {
        print_finding(finding);
    }
}

fn print_finding(finding: &Finding) {
    let badge = match finding.status {
        CheckStatus::Ok => "ok".green(),
        CheckStatus::Warn => "warn".yellow(),
        CheckStatus::Fatal => "fatal".red().bold(),
    };
    println!("  [{badge:<4}] {:<16} {}", finding.name, finding.summary);
    if let Some(remedy) = &finding.remedy {
        for line in remedy.lines() {
            println!("         -> {line}");
        }
    }
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    let command = args.command.as_ref().unwrap_or(&ConfigCommand::Show);
    match command {
        ConfigCommand::Path => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(Config::default_path);
            match output_mode(cli) {
                OutputMode::Human => println!("{}", path.display()),
                OutputMode::Json => write_json_line(&json!({ "path": path }))?,
            }
            Ok(())
        }
        ConfigCommand::Show => {
            let config = load_config(cli)?;
            match output_mode(cli) {
                OutputMode::Human => {
                    let rendered = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(e.to_string()))?;
                    print!("{rendered}");
                }
                OutputMode::Json => {
                    let payload = serde_json::to_value(&config)?;
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        ConfigCommand::Validate => {
            // Load already validates; reaching here means the config is good.
            let config = load_config(cli)?;
            match output_mode(cli) {
                OutputMode::Human => {
                    if !cli.quiet {
                        println!(
                            "{} {}",
                            "valid:".green(),
                            config.paths.config_file.display()
                        );
                    }
                }
                OutputMode::Json => {
                    write_json_line(&json!({
                        "valid": true,
                        "path": config.paths.config_file,
                    }))?;
                }
            }
            Ok(())
        }
    }
}

fn emit_version(cli: &Cli, args: &VersionArgs) -> Result<(), CliError> {
    let version = env!("CARGO_PKG_VERSION");
    match output_mode(cli) {
        OutputMode::Human => {
            println!("tep {version}");
            if args.verbose {
                println!("  default config: {}", Config::default_path().display());
            }
        }
        OutputMode::Json => {
            let mut payload = json!({ "name": "tep", "version": version });
            if args.verbose {
                payload["default_config"] = json!(Config::default_path());
            }
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    stdout.write_all(b"\n")?;
    Ok(())
}
