//! Memory monitor for the streaming diff.
//!
//! A sampling thread reads a [`MemoryProbe`] every `interval`; the main path
//! also calls [`MemoryMonitor::checkpoint`] after each chunk so a breach is
//! seen even when the sampler is between ticks.  The monitor's atomics are
//! the only state shared between the two.
//!
//! | Usage | Effect |
//! |-------|--------|
//! | `> limit × warning_ratio` | backpressure callback, once per run |
//! | `> limit` | `exceeded` latched; the run must abort |

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::warn;
use sysinfo::{get_current_pid, Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Source of the current memory usage in bytes.
pub trait MemoryProbe: Send + Sync {
    /// `None` when usage cannot be determined; such samples are ignored.
    fn current(&self) -> Option<u64>;
}

/// Resident memory of this process, via `sysinfo`.
pub struct ProcessMemory {
    system: Mutex<System>,
    pid:    Option<Pid>,
}

impl Default for ProcessMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMemory {
    pub fn new() -> Self {
        Self { system: Mutex::new(System::new()), pid: get_current_pid().ok() }
    }
}

impl MemoryProbe for ProcessMemory {
    fn current(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut sys = self.system.lock().ok()?;
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        sys.process(pid).map(|p| p.memory())
    }
}

pub type PressureFn = dyn Fn(u64) + Send + Sync;

/// Point-in-time view of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStatus {
    pub current:  u64,
    pub peak:     u64,
    pub pressure: bool,
    pub exceeded: bool,
}

struct Shared {
    probe:       Arc<dyn MemoryProbe>,
    limit:       u64,
    warning:     u64,
    on_pressure: Option<Arc<PressureFn>>,
    current:     AtomicU64,
    peak:        AtomicU64,
    pressure:    AtomicBool,
    exceeded:    AtomicBool,
}

impl Shared {
    fn sample(&self) {
        let Some(used) = self.probe.current() else { return };
        self.current.store(used, Ordering::Relaxed);
        self.peak.fetch_max(used, Ordering::Relaxed);

        if used > self.limit {
            if !self.exceeded.swap(true, Ordering::AcqRel) {
                warn!("memory limit exceeded: {used} > {} bytes", self.limit);
            }
        } else if used > self.warning && !self.pressure.swap(true, Ordering::AcqRel) {
            warn!("memory pressure: {used} bytes of {} allowed", self.limit);
            if let Some(cb) = &self.on_pressure {
                cb(used);
            }
        }
    }

    fn status(&self) -> MonitorStatus {
        MonitorStatus {
            current:  self.current.load(Ordering::Relaxed),
            peak:     self.peak.load(Ordering::Relaxed),
            pressure: self.pressure.load(Ordering::Acquire),
            exceeded: self.exceeded.load(Ordering::Acquire),
        }
    }
}

pub struct MemoryMonitor {
    shared: Arc<Shared>,
    stop:   Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MemoryMonitor {
    /// Start sampling.  Takes one sample synchronously before returning.
    pub fn start(
        probe:         Arc<dyn MemoryProbe>,
        limit:         u64,
        warning_ratio: f64,
        interval:      Duration,
        on_pressure:   Option<Arc<PressureFn>>,
    ) -> Self {
        let shared = Arc::new(Shared {
            probe,
            limit,
            warning:  (limit as f64 * warning_ratio) as u64,
            on_pressure,
            current:  AtomicU64::new(0),
            peak:     AtomicU64::new(0),
            pressure: AtomicBool::new(false),
            exceeded: AtomicBool::new(false),
        });
        shared.sample();

        let (tx, rx) = mpsc::channel::<()>();
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("hdiff-memory-monitor".into())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => worker.sample(),
                    _                              => break,
                }
            });

        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                // Checkpoints alone still enforce the cap.
                warn!("memory sampler thread unavailable: {e}");
                None
            }
        };

        Self { shared, stop: Some(tx), handle }
    }

    /// Take a synchronous sample and report the latest state.
    pub fn checkpoint(&self) -> MonitorStatus {
        self.shared.sample();
        self.shared.status()
    }

    pub fn status(&self) -> MonitorStatus {
        self.shared.status()
    }

    pub fn limit(&self) -> u64 {
        self.shared.limit
    }

    /// Stop the sampler and return the final state.
    pub fn stop(mut self) -> MonitorStatus {
        self.shutdown();
        self.shared.status()
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for MemoryMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
