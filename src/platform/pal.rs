//! PAL trait and platform-specific implementations (Linux + test mock).

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use crate::core::config::{Config, SysctlConfig};
use crate::core::errors::{Result, TepError};

/// Result of probing for a service unit's active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Active,
    Inactive,
    /// Service manager unavailable or query failed; advisory checks treat
    /// this as a warning, never a hard failure.
    Unknown,
}

/// Aggregate CPU time counters since boot, in jiffies. Rates come from
/// deltas between two readings, never from a single snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub busy: u64,
    pub idle: u64,
}

/// Physical memory totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Cumulative traffic counters summed over non-loopback interfaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Capacity and free space of one filesystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// OS abstraction used by the forwarding pipeline, environment audit, and
/// host statistics monitor.
pub trait Platform: Send + Sync {
    /// Effective UID of the current process.
    fn effective_uid(&self) -> u32;

    /// Read a kernel tunable by dotted key (e.g. `net.ipv4.ip_forward`),
    /// returning the trimmed value text.
    fn read_sysctl(&self, key: &str) -> Result<String>;

    /// Set a kernel tunable with immediate runtime effect.
    fn write_sysctl(&self, key: &str, value: &str) -> Result<()>;

    /// Whether a binary with this name is reachable via `PATH`.
    fn command_available(&self, name: &str) -> bool;

    /// Active state of a service unit.
    fn service_state(&self, unit: &str) -> ServiceState;

    /// Run a probe command and report whether it exited successfully.
    /// Used for compose-tool detection where mere binary presence is not
    /// enough (`docker compose` is a plugin, not a binary).
    fn probe_succeeds(&self, program: &str, args: &[&str]) -> bool;

    /// Aggregate CPU time counters since boot.
    fn cpu_times(&self) -> Result<CpuTimes>;

    /// Total and available physical memory.
    fn memory_info(&self) -> Result<MemoryInfo>;

    /// One-minute load average.
    fn load_average(&self) -> Result<f64>;

    /// Number of live processes.
    fn process_count(&self) -> Result<usize>;

    /// Cumulative network traffic counters, loopback excluded.
    fn net_counters(&self) -> Result<NetCounters>;

    /// Capacity and free space of the filesystem holding `path`.
    fn disk_usage(&self, path: &Path) -> Result<DiskUsage>;
}

/// Linux platform implementation: `/proc/sys` reads + `sysctl -w` writes.
#[derive(Debug, Clone)]
pub struct LinuxPlatform {
    proc_root: PathBuf,
    sysctl_command: String,
    host_proc_root: PathBuf,
}

impl LinuxPlatform {
    #[must_use]
    pub fn new(sysctl: &SysctlConfig) -> Self {
        Self {
            proc_root: sysctl.proc_root.clone(),
            sysctl_command: sysctl.command.clone(),
            host_proc_root: PathBuf::from("/proc"),
        }
    }

    /// Override the process/stat pseudo-file root used for host
    /// statistics (distinct from the sysctl tree root).
    #[must_use]
    pub fn with_host_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.host_proc_root = root.into();
        self
    }

    fn read_host_file(&self, name: &str) -> Result<String> {
        let path = self.host_proc_root.join(name);
        fs::read_to_string(&path).map_err(|source| TepError::StatsRead {
            subject: name.to_string(),
            details: format!("{}: {source}", path.display()),
        })
    }

    /// Pseudo-file path for a dotted sysctl key under the configured root.
    #[must_use]
    pub fn proc_path(&self, key: &str) -> PathBuf {
        let mut path = self.proc_root.clone();
        for segment in key.split('.') {
            path.push(segment);
        }
        path
    }
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::new(&SysctlConfig::default())
    }
}

impl Platform for LinuxPlatform {
    fn effective_uid(&self) -> u32 {
        #[cfg(unix)]
        {
            nix::unistd::geteuid().as_raw()
        }
        #[cfg(not(unix))]
        {
            u32::MAX
        }
    }

    fn read_sysctl(&self, key: &str) -> Result<String> {
        let path = self.proc_path(key);
        let raw = fs::read_to_string(&path).map_err(|source| TepError::SysctlRead {
            key: key.to_string(),
            details: format!("{}: {source}", path.display()),
        })?;
        Ok(raw.trim().to_string())
    }

    fn write_sysctl(&self, key: &str, value: &str) -> Result<()> {
        let assignment = format!("{key}={value}");
        let output = Command::new(&self.sysctl_command)
            .arg("-w")
            .arg(&assignment)
            .output()
            .map_err(|source| TepError::SysctlWrite {
                key: key.to_string(),
                details: format!("failed to spawn {}: {source}", self.sysctl_command),
            })?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(TepError::SysctlWrite {
                key: key.to_string(),
                details: format!(
                    "{} -w {assignment} exited {}: {}",
                    self.sysctl_command,
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            })
        }
    }

    fn command_available(&self, name: &str) -> bool {
        which_binary(name).is_some()
    }

    fn service_state(&self, unit: &str) -> ServiceState {
        if !self.command_available("systemctl") {
            return ServiceState::Unknown;
        }
        let output = Command::new("systemctl")
            .args(["is-active", "--quiet", unit])
            .status();
        match output {
            Ok(status) if status.success() => ServiceState::Active,
            Ok(_) => ServiceState::Inactive,
            Err(_) => ServiceState::Unknown,
        }
    }

    fn probe_succeeds(&self, program: &str, args: &[&str]) -> bool {
        Command::new(program)
            .args(args)
            .output()
            .is_ok_and(|output| output.status.success())
    }

    fn cpu_times(&self) -> Result<CpuTimes> {
        let raw = self.read_host_file("stat")?;
        parse_cpu_times(&raw).ok_or_else(|| TepError::StatsRead {
            subject: "stat".to_string(),
            details: "no aggregate cpu line".to_string(),
        })
    }

    fn memory_info(&self) -> Result<MemoryInfo> {
        let raw = self.read_host_file("meminfo")?;
        parse_meminfo(&raw).ok_or_else(|| TepError::StatsRead {
            subject: "meminfo".to_string(),
            details: "missing MemTotal or MemAvailable".to_string(),
        })
    }

    fn load_average(&self) -> Result<f64> {
        let raw = self.read_host_file("loadavg")?;
        raw.split_whitespace()
            .next()
            .and_then(|field| field.parse().ok())
            .ok_or_else(|| TepError::StatsRead {
                subject: "loadavg".to_string(),
                details: format!("unparseable contents: {raw:?}"),
            })
    }

    fn process_count(&self) -> Result<usize> {
        let entries =
            fs::read_dir(&self.host_proc_root).map_err(|source| TepError::StatsRead {
                subject: "process directories".to_string(),
                details: format!("{}: {source}", self.host_proc_root.display()),
            })?;
        let mut count = 0;
        for entry in entries {
            let entry = entry.map_err(|source| TepError::StatsRead {
                subject: "process directories".to_string(),
                details: source.to_string(),
            })?;
            // PID directories are the purely numeric entries.
            let is_pid = entry
                .file_name()
                .to_str()
                .is_some_and(|name| !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()));
            if is_pid {
                count += 1;
            }
        }
        Ok(count)
    }

    fn net_counters(&self) -> Result<NetCounters> {
        let raw = self.read_host_file("net/dev")?;
        Ok(parse_net_counters(&raw))
    }

    fn disk_usage(&self, path: &Path) -> Result<DiskUsage> {
        #[cfg(unix)]
        {
            let stat = nix::sys::statvfs::statvfs(path).map_err(|source| TepError::StatsRead {
                subject: "disk usage".to_string(),
                details: format!("statvfs {}: {source}", path.display()),
            })?;
            let fragment: u64 = stat.fragment_size().into();
            Ok(DiskUsage {
                total_bytes: u64::from(stat.blocks()).saturating_mul(fragment),
                available_bytes: u64::from(stat.blocks_available()).saturating_mul(fragment),
            })
        }
        #[cfg(not(unix))]
        {
            let _ = path;
            Err(TepError::UnsupportedPlatform {
                details: "disk usage requires unix statvfs".to_string(),
            })
        }
    }
}

/// Parse the aggregate `cpu` line of the kernel stat file. Busy time is
/// everything except idle and iowait; idle includes iowait.
fn parse_cpu_times(raw: &str) -> Option<CpuTimes> {
    let line = raw.lines().find(|line| line.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map_while(|field| field.parse().ok())
        .collect();
    if fields.len() < 5 {
        return None;
    }
    let idle = fields[3].saturating_add(fields[4]);
    let busy = fields.iter().sum::<u64>().saturating_sub(idle);
    Some(CpuTimes { busy, idle })
}

fn parse_meminfo(raw: &str) -> Option<MemoryInfo> {
    // meminfo values are in kB.
    let field = |name: &str| -> Option<u64> {
        raw.lines()
            .find(|line| line.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse::<u64>()
            .ok()
            .map(|kb| kb.saturating_mul(1024))
    };
    Some(MemoryInfo {
        total_bytes: field("MemTotal:")?,
        available_bytes: field("MemAvailable:")?,
    })
}

/// Sum rx/tx byte counters over all interfaces except loopback. Malformed
/// lines are skipped rather than failing the whole read.
fn parse_net_counters(raw: &str) -> NetCounters {
    let mut counters = NetCounters::default();
    for line in raw.lines().skip(2) {
        let Some((iface, rest)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let fields: Vec<&str> = rest.split_whitespace().collect();
        if fields.len() < 9 {
            continue;
        }
        counters.rx_bytes = counters
            .rx_bytes
            .saturating_add(fields[0].parse().unwrap_or(0));
        counters.tx_bytes = counters
            .tx_bytes
            .saturating_add(fields[8].parse().unwrap_or(0));
    }
    counters
}

fn which_binary(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&paths) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// In-memory mock implementation for deterministic tests.
#[derive(Debug, Default)]
pub struct MockPlatform {
    euid: u32,
    sysctls: Mutex<HashMap<String, String>>,
    /// Keys whose runtime write is silently ignored, for exercising the
    /// verification-mismatch path.
    stuck_keys: HashSet<String>,
    /// Keys whose write reports failure outright.
    failing_writes: HashSet<String>,
    commands: HashSet<String>,
    services: HashMap<String, ServiceState>,
    probes: HashSet<String>,
    write_log: Mutex<Vec<(String, String)>>,
    cpu: CpuTimes,
    memory: MemoryInfo,
    load_avg: f64,
    process_count: usize,
    net: NetCounters,
    disk: DiskUsage,
}

impl MockPlatform {
    /// Mock running as root with both forwarding flags initially disabled.
    #[must_use]
    pub fn root() -> Self {
        let mut mock = Self {
            euid: 0,
            ..Self::default()
        };
        mock.set_sysctl(crate::forwarding::IPV4_FORWARD_KEY, "0");
        mock.set_sysctl(crate::forwarding::IPV6_FORWARD_KEY, "0");
        mock
    }

    /// Mock running as an unprivileged user.
    #[must_use]
    pub fn unprivileged(euid: u32) -> Self {
        Self {
            euid,
            ..Self::default()
        }
    }

    pub fn set_sysctl(&mut self, key: &str, value: &str) {
        self.sysctls
            .lock()
            .expect("sysctl map lock")
            .insert(key.to_string(), value.to_string());
    }

    /// Make writes to `key` succeed without changing the stored value.
    pub fn stick_key(&mut self, key: &str) {
        self.stuck_keys.insert(key.to_string());
    }

    /// Make writes to `key` fail.
    pub fn fail_writes(&mut self, key: &str) {
        self.failing_writes.insert(key.to_string());
    }

    pub fn add_command(&mut self, name: &str) {
        self.commands.insert(name.to_string());
    }

    pub fn set_service(&mut self, unit: &str, state: ServiceState) {
        self.services.insert(unit.to_string(), state);
    }

    /// Register a probe invocation (program + args joined by spaces) as
    /// succeeding.
    pub fn add_probe(&mut self, invocation: &str) {
        self.probes.insert(invocation.to_string());
    }

    /// Writes observed so far, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<(String, String)> {
        self.write_log.lock().expect("write log lock").clone()
    }

    pub fn set_cpu_times(&mut self, busy: u64, idle: u64) {
        self.cpu = CpuTimes { busy, idle };
    }

    pub fn set_memory(&mut self, total_bytes: u64, available_bytes: u64) {
        self.memory = MemoryInfo {
            total_bytes,
            available_bytes,
        };
    }

    pub fn set_load_average(&mut self, load: f64) {
        self.load_avg = load;
    }

    pub fn set_process_count(&mut self, count: usize) {
        self.process_count = count;
    }

    pub fn set_net_counters(&mut self, rx_bytes: u64, tx_bytes: u64) {
        self.net = NetCounters { rx_bytes, tx_bytes };
    }

    pub fn set_disk_usage(&mut self, total_bytes: u64, available_bytes: u64) {
        self.disk = DiskUsage {
            total_bytes,
            available_bytes,
        };
    }
}

impl Platform for MockPlatform {
    fn effective_uid(&self) -> u32 {
        self.euid
    }

    fn read_sysctl(&self, key: &str) -> Result<String> {
        self.sysctls
            .lock()
            .expect("sysctl map lock")
            .get(key)
            .cloned()
            .ok_or_else(|| TepError::SysctlRead {
                key: key.to_string(),
                details: "mock tunable not found".to_string(),
            })
    }

    fn write_sysctl(&self, key: &str, value: &str) -> Result<()> {
        if self.failing_writes.contains(key) {
            return Err(TepError::SysctlWrite {
                key: key.to_string(),
                details: "mock write failure".to_string(),
            });
        }
        self.write_log
            .lock()
            .expect("write log lock")
            .push((key.to_string(), value.to_string()));
        if !self.stuck_keys.contains(key) {
            self.sysctls
                .lock()
                .expect("sysctl map lock")
                .insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn command_available(&self, name: &str) -> bool {
        self.commands.contains(name)
    }

    fn service_state(&self, unit: &str) -> ServiceState {
        self.services
            .get(unit)
            .copied()
            .unwrap_or(ServiceState::Unknown)
    }

    fn probe_succeeds(&self, program: &str, args: &[&str]) -> bool {
        let mut invocation = program.to_string();
        for arg in args {
            invocation.push(' ');
            invocation.push_str(arg);
        }
        self.probes.contains(&invocation)
    }

    fn cpu_times(&self) -> Result<CpuTimes> {
        Ok(self.cpu)
    }

    fn memory_info(&self) -> Result<MemoryInfo> {
        Ok(self.memory)
    }

    fn load_average(&self) -> Result<f64> {
        Ok(self.load_avg)
    }

    fn process_count(&self) -> Result<usize> {
        Ok(self.process_count)
    }

    fn net_counters(&self) -> Result<NetCounters> {
        Ok(self.net)
    }

    fn disk_usage(&self, _path: &Path) -> Result<DiskUsage> {
        Ok(self.disk)
    }
}

/// Detect active platform implementation.
pub fn detect_platform(config: &Config) -> Result<Arc<dyn Platform>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(
            LinuxPlatform::new(&config.sysctl).with_host_proc_root(&config.monitor.proc_root),
        ))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = config;
        Err(TepError::UnsupportedPlatform {
            details: "only Linux is currently implemented".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarding::{IPV4_FORWARD_KEY, IPV6_FORWARD_KEY};
    use std::path::Path;

    #[test]
    fn proc_path_maps_dotted_key() {
        let platform = LinuxPlatform::default();
        assert_eq!(
            platform.proc_path(IPV4_FORWARD_KEY),
            Path::new("/proc/sys/net/ipv4/ip_forward")
        );
        assert_eq!(
            platform.proc_path(IPV6_FORWARD_KEY),
            Path::new("/proc/sys/net/ipv6/conf/all/forwarding")
        );
    }

    #[test]
    fn linux_read_uses_proc_root_override() {
        let dir = tempfile::tempdir().expect("tempdir");
        let flag_dir = dir.path().join("net/ipv4");
        fs::create_dir_all(&flag_dir).expect("mkdir");
        fs::write(flag_dir.join("ip_forward"), "1\n").expect("write flag");

        let platform = LinuxPlatform::new(&SysctlConfig {
            proc_root: dir.path().to_path_buf(),
            ..SysctlConfig::default()
        });
        let value = platform.read_sysctl(IPV4_FORWARD_KEY).expect("read");
        assert_eq!(value, "1", "value must be trimmed");
    }

    #[test]
    fn linux_read_missing_tunable_is_labeled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let platform = LinuxPlatform::new(&SysctlConfig {
            proc_root: dir.path().to_path_buf(),
            ..SysctlConfig::default()
        });
        let err = platform
            .read_sysctl(IPV4_FORWARD_KEY)
            .expect_err("missing pseudo-file must fail");
        assert_eq!(err.code(), "TEP-2101");
    }

    #[test]
    fn mock_write_updates_value_and_log() {
        let mock = MockPlatform::root();
        mock.write_sysctl(IPV4_FORWARD_KEY, "1").expect("write");
        assert_eq!(mock.read_sysctl(IPV4_FORWARD_KEY).expect("read"), "1");
        assert_eq!(
            mock.writes(),
            vec![(IPV4_FORWARD_KEY.to_string(), "1".to_string())]
        );
    }

    #[test]
    fn mock_stuck_key_accepts_write_without_effect() {
        let mut mock = MockPlatform::root();
        mock.stick_key(IPV6_FORWARD_KEY);
        mock.write_sysctl(IPV6_FORWARD_KEY, "1").expect("write ok");
        assert_eq!(mock.read_sysctl(IPV6_FORWARD_KEY).expect("read"), "0");
    }

    #[test]
    fn mock_failing_write_errors() {
        let mut mock = MockPlatform::root();
        mock.fail_writes(IPV4_FORWARD_KEY);
        let err = mock
            .write_sysctl(IPV4_FORWARD_KEY, "1")
            .expect_err("write must fail");
        assert_eq!(err.code(), "TEP-2102");
    }

    #[test]
    fn mock_service_defaults_to_unknown() {
        let mock = MockPlatform::root();
        assert_eq!(mock.service_state("docker"), ServiceState::Unknown);
    }

    #[test]
    fn parses_aggregate_cpu_line() {
        let raw = "cpu  100 20 80 700 100 0 0 0 0 0\ncpu0 50 10 40 350 50 0 0 0 0 0\n";
        let times = parse_cpu_times(raw).expect("cpu line");
        // idle = idle + iowait, busy = everything else.
        assert_eq!(times.idle, 800);
        assert_eq!(times.busy, 200);
    }

    #[test]
    fn cpu_parse_rejects_truncated_line() {
        assert!(parse_cpu_times("cpu  100 20 80\n").is_none());
        assert!(parse_cpu_times("intr 12345\n").is_none());
    }

    #[test]
    fn parses_meminfo_kilobytes_to_bytes() {
        let raw = "MemTotal:       2048 kB\nMemFree:         512 kB\nMemAvailable:   1024 kB\n";
        let info = parse_meminfo(raw).expect("meminfo");
        assert_eq!(info.total_bytes, 2048 * 1024);
        assert_eq!(info.available_bytes, 1024 * 1024);
        assert!(parse_meminfo("MemTotal:       2048 kB\n").is_none());
    }

    #[test]
    fn net_counters_skip_loopback_and_sum_interfaces() {
        let raw = "Inter-|   Receive                                                |  Transmit\n\
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n\
    lo: 9999999    100    0    0    0     0          0         0  9999999     100    0    0    0     0       0          0\n\
  eth0: 1000    10    0    0    0     0          0         0  2000      20    0    0    0     0       0          0\n\
  wlan0: 300     3    0    0    0     0          0         0  700        7    0    0    0     0       0          0\n";
        let counters = parse_net_counters(raw);
        assert_eq!(counters.rx_bytes, 1300);
        assert_eq!(counters.tx_bytes, 2700);
    }

    fn write_host_fixture(root: &Path) {
        fs::create_dir_all(root.join("net")).expect("mkdir");
        fs::write(root.join("stat"), "cpu  100 0 100 700 100 0 0 0 0 0\n").expect("stat");
        fs::write(
            root.join("meminfo"),
            "MemTotal:       4096 kB\nMemAvailable:   1024 kB\n",
        )
        .expect("meminfo");
        fs::write(root.join("loadavg"), "0.42 0.30 0.25 1/200 12345\n").expect("loadavg");
        fs::write(
            root.join("net/dev"),
            "header\nheader\n  eth0: 100 1 0 0 0 0 0 0 200 2 0 0 0 0 0 0\n",
        )
        .expect("net/dev");
        for pid in ["1", "42", "1337"] {
            fs::create_dir_all(root.join(pid)).expect("pid dir");
        }
        // Non-numeric entries must not count as processes.
        fs::create_dir_all(root.join("sys")).expect("sys dir");
    }

    #[test]
    fn linux_host_stats_read_fixture_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_host_fixture(dir.path());
        let platform = LinuxPlatform::default().with_host_proc_root(dir.path());

        let cpu = platform.cpu_times().expect("cpu");
        assert_eq!(cpu, CpuTimes { busy: 200, idle: 800 });
        let memory = platform.memory_info().expect("memory");
        assert_eq!(memory.total_bytes, 4096 * 1024);
        assert!((platform.load_average().expect("load") - 0.42).abs() < f64::EPSILON);
        assert_eq!(platform.process_count().expect("procs"), 3);
        let net = platform.net_counters().expect("net");
        assert_eq!(net, NetCounters { rx_bytes: 100, tx_bytes: 200 });
    }

    #[test]
    fn linux_host_stats_missing_tree_is_labeled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let platform = LinuxPlatform::default().with_host_proc_root(dir.path().join("absent"));
        let err = platform.cpu_times().expect_err("missing stat must fail");
        assert_eq!(err.code(), "TEP-2104");
    }

    #[test]
    fn mock_probe_matches_full_invocation() {
        let mut mock = MockPlatform::root();
        mock.add_probe("docker compose version");
        assert!(mock.probe_succeeds("docker", &["compose", "version"]));
        assert!(!mock.probe_succeeds("docker-compose", &["--version"]));
    }
}
