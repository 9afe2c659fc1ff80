//! Host statistics sampling and usage-tier classification.
//!
//! Rates (CPU percent, network throughput) are deltas between successive
//! samples of a [`HostSampler`], so the first sample of a sampler reports
//! zero rates. Tier transitions use hysteresis: entering a tier takes a
//! higher combined score than staying in it, which keeps the reported
//! level from flapping around a boundary.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;

use crate::core::errors::Result;
use crate::platform::pal::{CpuTimes, NetCounters, Platform};

/// Coarse host usage level.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UsageTier {
    #[default]
    Low,
    Medium,
    High,
}

const HIGH_ENTER: f64 = 0.7;
const HIGH_HOLD: f64 = 0.5;
const MEDIUM_ENTER: f64 = 0.4;
const MEDIUM_HOLD: f64 = 0.3;

/// Combined network throughput at or above this many bytes per second
/// counts as a fully loaded network score.
const NET_SATURATION_BYTES_PER_SEC: f64 = 1_024_000.0;

/// One host statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HostStats {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub load_avg: f64,
    pub process_count: usize,
    pub disk_percent: f64,
    pub disk_available_bytes: u64,
    pub net_up_bytes_per_sec: f64,
    pub net_down_bytes_per_sec: f64,
    pub tier: UsageTier,
}

/// Classify a combined usage score in `0.0..=1.0` against the previous
/// tier, with hysteresis on the downward transitions.
#[must_use]
pub fn classify(score: f64, previous: UsageTier) -> UsageTier {
    if score >= HIGH_ENTER || (previous == UsageTier::High && score >= HIGH_HOLD) {
        UsageTier::High
    } else if score >= MEDIUM_ENTER || (previous == UsageTier::Medium && score >= MEDIUM_HOLD) {
        UsageTier::Medium
    } else {
        UsageTier::Low
    }
}

#[derive(Debug, Clone, Copy)]
struct PreviousSample {
    cpu: CpuTimes,
    net: NetCounters,
    at: Instant,
}

/// Stateful sampler computing per-interval rates over a [`Platform`].
#[derive(Debug)]
pub struct HostSampler {
    disk_path: PathBuf,
    tier: UsageTier,
    previous: Option<PreviousSample>,
}

impl HostSampler {
    #[must_use]
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        Self {
            disk_path: disk_path.into(),
            tier: UsageTier::Low,
            previous: None,
        }
    }

    /// Take one sample stamped with the current time.
    pub fn sample(&mut self, platform: &dyn Platform) -> Result<HostStats> {
        self.sample_at(platform, Instant::now())
    }

    /// Time-injectable variant of [`Self::sample`].
    pub fn sample_at(&mut self, platform: &dyn Platform, now: Instant) -> Result<HostStats> {
        let cpu = platform.cpu_times()?;
        let net = platform.net_counters()?;
        let memory = platform.memory_info()?;
        let disk = platform.disk_usage(&self.disk_path)?;
        let load_avg = platform.load_average()?;
        let process_count = platform.process_count()?;

        let (cpu_percent, net_up, net_down) = match self.previous {
            Some(prev) => {
                let dt = now.duration_since(prev.at).as_secs_f64();
                (
                    cpu_percent_between(prev.cpu, cpu),
                    rate(prev.net.tx_bytes, net.tx_bytes, dt),
                    rate(prev.net.rx_bytes, net.rx_bytes, dt),
                )
            }
            None => (0.0, 0.0, 0.0),
        };
        self.previous = Some(PreviousSample { cpu, net, at: now });

        let memory_percent = percent_used(memory.total_bytes, memory.available_bytes);
        let disk_percent = percent_used(disk.total_bytes, disk.available_bytes);

        let score = usage_score(cpu_percent, memory_percent, net_up + net_down);
        self.tier = classify(score, self.tier);

        Ok(HostStats {
            cpu_percent,
            memory_percent,
            load_avg,
            process_count,
            disk_percent,
            disk_available_bytes: disk.available_bytes,
            net_up_bytes_per_sec: net_up,
            net_down_bytes_per_sec: net_down,
            tier: self.tier,
        })
    }
}

fn cpu_percent_between(prev: CpuTimes, current: CpuTimes) -> f64 {
    let busy = current.busy.saturating_sub(prev.busy) as f64;
    let idle = current.idle.saturating_sub(prev.idle) as f64;
    let total = busy + idle;
    if total <= 0.0 { 0.0 } else { busy / total * 100.0 }
}

fn rate(prev: u64, current: u64, dt: f64) -> f64 {
    if dt <= f64::EPSILON {
        return 0.0;
    }
    current.saturating_sub(prev) as f64 / dt
}

fn percent_used(total: u64, available: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    total.saturating_sub(available) as f64 / total as f64 * 100.0
}

/// Mean of the CPU, memory, and network load scores, each clamped to 1.0.
fn usage_score(cpu_percent: f64, memory_percent: f64, net_bytes_per_sec: f64) -> f64 {
    let cpu = (cpu_percent / 100.0).min(1.0);
    let memory = (memory_percent / 100.0).min(1.0);
    let net = (net_bytes_per_sec / NET_SATURATION_BYTES_PER_SEC).min(1.0);
    (cpu + memory + net) / 3.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::pal::MockPlatform;
    use std::time::Duration;

    fn approx(actual: f64, expected: f64) -> bool {
        (actual - expected).abs() < 1e-6
    }

    #[test]
    fn classify_uses_plain_thresholds_from_low() {
        assert_eq!(classify(0.1, UsageTier::Low), UsageTier::Low);
        assert_eq!(classify(0.4, UsageTier::Low), UsageTier::Medium);
        assert_eq!(classify(0.7, UsageTier::Low), UsageTier::High);
    }

    #[test]
    fn classify_holds_tier_through_hysteresis_band() {
        // 0.55 is below the high entry threshold but above its hold floor.
        assert_eq!(classify(0.55, UsageTier::High), UsageTier::High);
        assert_eq!(classify(0.55, UsageTier::Low), UsageTier::Medium);
        // Same band for medium: 0.35 keeps medium, does not enter it.
        assert_eq!(classify(0.35, UsageTier::Medium), UsageTier::Medium);
        assert_eq!(classify(0.35, UsageTier::Low), UsageTier::Low);
    }

    #[test]
    fn classify_drops_straight_to_low_when_score_collapses() {
        assert_eq!(classify(0.2, UsageTier::High), UsageTier::Low);
        assert_eq!(classify(0.49, UsageTier::High), UsageTier::Medium);
    }

    #[test]
    fn first_sample_reports_zero_rates() {
        let mut mock = MockPlatform::root();
        mock.set_cpu_times(500, 500);
        mock.set_memory(1000, 250);
        mock.set_load_average(0.5);
        mock.set_process_count(42);
        mock.set_disk_usage(2000, 500);

        let mut sampler = HostSampler::new("/");
        let stats = sampler.sample_at(&mock, Instant::now()).expect("sample");
        assert!(approx(stats.cpu_percent, 0.0));
        assert!(approx(stats.net_up_bytes_per_sec, 0.0));
        assert!(approx(stats.memory_percent, 75.0));
        assert!(approx(stats.disk_percent, 75.0));
        assert_eq!(stats.process_count, 42);
        assert!(approx(stats.load_avg, 0.5));
    }

    #[test]
    fn second_sample_computes_cpu_and_net_rates() {
        let mut mock = MockPlatform::root();
        mock.set_cpu_times(100, 900);
        mock.set_net_counters(1000, 2000);
        mock.set_memory(1000, 1000);
        mock.set_disk_usage(1000, 1000);

        let t0 = Instant::now();
        let mut sampler = HostSampler::new("/");
        sampler.sample_at(&mock, t0).expect("priming sample");

        // One second later: 100 busy jiffies out of 900 elapsed, 512 B
        // received and 1024 B sent.
        mock.set_cpu_times(200, 1700);
        mock.set_net_counters(1512, 3024);
        let stats = sampler
            .sample_at(&mock, t0 + Duration::from_secs(1))
            .expect("sample");
        assert!(
            approx(stats.cpu_percent, 100.0 / 900.0 * 100.0),
            "cpu {}",
            stats.cpu_percent
        );
        assert!(approx(stats.net_down_bytes_per_sec, 512.0));
        assert!(approx(stats.net_up_bytes_per_sec, 1024.0));
    }

    #[test]
    fn tier_sticks_to_high_until_score_falls_past_hold_floor() {
        let mut mock = MockPlatform::root();
        mock.set_cpu_times(0, 1000);
        mock.set_net_counters(0, 0);
        mock.set_memory(1000, 1000);
        mock.set_disk_usage(1000, 1000);

        let t0 = Instant::now();
        let mut sampler = HostSampler::new("/");
        sampler.sample_at(&mock, t0).expect("priming sample");

        // cpu 0.9, memory 0.9, net 0.6 of saturation: score 0.8, enters high.
        mock.set_cpu_times(900, 1100);
        mock.set_memory(1000, 100);
        mock.set_net_counters(307_200, 307_200);
        let hot = sampler
            .sample_at(&mock, t0 + Duration::from_secs(1))
            .expect("hot sample");
        assert_eq!(hot.tier, UsageTier::High);

        // cpu 0.5, memory 0.7, net 0.4: score ~0.533, inside the hold band.
        mock.set_cpu_times(1400, 1600);
        mock.set_memory(1000, 300);
        mock.set_net_counters(512_000, 512_000);
        let cooling = sampler
            .sample_at(&mock, t0 + Duration::from_secs(2))
            .expect("cooling sample");
        assert_eq!(cooling.tier, UsageTier::High, "hold band keeps high");

        // Everything quiet: score collapses, tier drops to low.
        mock.set_cpu_times(1400, 2600);
        mock.set_memory(1000, 1000);
        let idle = sampler
            .sample_at(&mock, t0 + Duration::from_secs(3))
            .expect("idle sample");
        assert_eq!(idle.tier, UsageTier::Low);
    }
}
