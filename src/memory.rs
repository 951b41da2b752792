//! Process memory reporting

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{Pid, System};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const MEGABYTE: f64 = 1024.0 * 1024.0;

/// Interval between samples taken by [`spawn_sampler`]
pub const SAMPLE_PERIOD: Duration = Duration::from_millis(250);

/// Memory usage of this process at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemorySnapshot {
    /// Resident set size in bytes
    pub resident_bytes: u64,
    pub virtual_bytes: u64,
}

impl fmt::Display for MemorySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rss {:.1} Mb, virtual {:.1} Mb",
            self.resident_bytes as f64 / MEGABYTE,
            self.virtual_bytes as f64 / MEGABYTE
        )
    }
}

/// Samples this process's memory and remembers the peak resident size
pub struct MemoryMonitor {
    system: System,
    pid: Option<Pid>,
    peak_resident: u64,
}

impl MemoryMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
            peak_resident: 0,
        }
    }

    /// Current usage, `None` when the platform does not report it
    pub fn sample(&mut self) -> Option<MemorySnapshot> {
        let pid = self.pid?;
        if !self.system.refresh_process(pid) {
            return None;
        }
        let process = self.system.process(pid)?;
        let snapshot = MemorySnapshot {
            resident_bytes: process.memory(),
            virtual_bytes: process.virtual_memory(),
        };
        self.peak_resident = self.peak_resident.max(snapshot.resident_bytes);
        Some(snapshot)
    }

    /// Highest resident size seen by [`sample`](Self::sample)
    pub fn peak_resident_mb(&self) -> f64 {
        self.peak_resident as f64 / MEGABYTE
    }
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Monitor shared between the sampling task and the run summary
pub type SharedMonitor = Arc<Mutex<MemoryMonitor>>;

/// Sample `monitor` until the returned task is aborted
///
/// Samples every [`SAMPLE_PERIOD`] so the peak reflects the whole run. When
/// `report_every` is set, a sample is also logged at that interval.
pub fn spawn_sampler(monitor: SharedMonitor, report_every: Option<Duration>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SAMPLE_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_report: Option<Instant> = None;
        loop {
            ticker.tick().await;
            let Some(snapshot) = monitor.lock().await.sample() else {
                continue;
            };
            if let Some(every) = report_every
                && last_report.is_none_or(|at| at.elapsed() >= every)
            {
                tracing::info!("Memory usage: {}", snapshot);
                last_report = Some(Instant::now());
            }
        }
    })
}
