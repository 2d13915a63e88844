use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::manifest::{Manifest, RaftLogPointer};
use crate::wal::{Wal, WalMetrics};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Watchdog configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchdogConfig {
    /// Time between ticks of the background loop. Zero means the default.
    pub interval: Duration,
    /// Reclaim only once at least this many segments are removable.
    pub min_removable: usize,
    /// Remove at most this many segments per tick.
    pub max_batch: usize,
    /// Warn when raft-typed records fall below this share of all records...
    pub typed_ratio_warn: f64,
    /// ...while more than this many segments carry raft records.
    pub raft_segment_floor: usize,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        WatchdogConfig {
            interval: DEFAULT_INTERVAL,
            min_removable: 1,
            max_batch: 4,
            typed_ratio_warn: 0.5,
            raft_segment_floor: 4,
        }
    }
}

impl WatchdogConfig {
    /// Reclamation is on only when both knobs are non-zero.
    pub fn auto_reclaim(&self) -> bool {
        self.min_removable > 0 && self.max_batch > 0
    }
}

/// What the last tick saw and the counters accumulated so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchdogSnapshot {
    /// Segments found fully superseded on the last tick.
    pub removable: Vec<u32>,
    /// Raft-typed records / all records; 1.0 for an empty log.
    pub typed_ratio: f64,
    pub warning: bool,
    pub reason: Option<String>,
    pub ticks: u64,
    /// Ticks that attempted reclamation.
    pub auto_runs: u64,
    pub segments_removed: u64,
    pub last_run: Option<SystemTime>,
    pub last_removal: Option<SystemTime>,
}

/// Background observer of the WAL.
///
/// Each tick finds segments every raft group has moved past, checks the
/// typed-record ratio, and (if enabled) removes a batch of the reclaimable
/// segments. It only uses the managers' public, locked methods, so it never
/// blocks appends beyond one manager call, and it never touches the active
/// segment.
pub struct Watchdog {
    wal: Arc<dyn Wal>,
    manifest: Arc<dyn Manifest>,
    config: WatchdogConfig,
    state: Mutex<WatchdogSnapshot>,
}

impl Watchdog {
    pub fn new(wal: Arc<dyn Wal>, manifest: Arc<dyn Manifest>, config: WatchdogConfig) -> Self {
        Watchdog {
            wal,
            manifest,
            config,
            state: Mutex::new(WatchdogSnapshot {
                typed_ratio: 1.0,
                ..Default::default()
            }),
        }
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Segments no raft group needs any more.
    ///
    /// A group needs everything from `segment_index` on, or from `segment`
    /// when it never truncated but has applied entries, or everything when
    /// it has applied nothing. Segments that also hold plain entries must
    /// sit below the manifest's WAL replay cursor. With no raft groups
    /// nothing is provably superseded.
    pub fn removable_segments(&self, metrics: &WalMetrics) -> Vec<u32> {
        let pointers = self.manifest.raft_pointer_snapshot();
        let Some(floor) = pointers.values().map(needed_from).min() else {
            return Vec::new();
        };
        let log_segment = self.manifest.current().log_segment;

        self.wal
            .list_segments()
            .into_iter()
            .filter(|&id| id != metrics.active_segment && u64::from(id) < floor)
            .filter(|&id| {
                self.wal
                    .segment_metrics(id)
                    .is_some_and(|counts| counts.entries == 0 || id < log_segment)
            })
            .collect()
    }

    /// Typed ratio, and a reason when it looks unhealthy.
    fn health(&self, metrics: &WalMetrics) -> (f64, Option<String>) {
        let total = metrics.record_counts.total();
        let ratio = if total == 0 {
            1.0
        } else {
            metrics.record_counts.raft_records() as f64 / total as f64
        };

        if metrics.segments_with_raft_records > self.config.raft_segment_floor
            && ratio < self.config.typed_ratio_warn
        {
            let reason = format!(
                "typed record ratio {ratio:.2} below {:.2} across {} raft segments",
                self.config.typed_ratio_warn, metrics.segments_with_raft_records
            );
            return (ratio, Some(reason));
        }
        (ratio, None)
    }

    /// One tick: sample, maybe reclaim, update counters.
    pub fn run_once(&self) -> WatchdogSnapshot {
        let metrics = self.wal.metrics();
        let removable = self.removable_segments(&metrics);
        let (typed_ratio, reason) = self.health(&metrics);
        if let Some(reason) = &reason {
            warn!(%reason, "WAL health warning");
        }

        let attempt = self.config.auto_reclaim()
            && !removable.is_empty()
            && removable.len() >= self.config.min_removable;

        let mut removed = 0u64;
        if attempt {
            for &id in removable.iter().take(self.config.max_batch) {
                match self.wal.remove_segment(id) {
                    Ok(()) => removed += 1,
                    Err(e) if e.is_not_found() => {
                        debug!(segment = id, "WAL segment already removed");
                    }
                    Err(e) => {
                        warn!(segment = id, error = %e, "failed to remove WAL segment");
                    }
                }
            }
            if removed > 0 {
                info!(removed, removable = removable.len(), "reclaimed WAL segments");
            }
        }

        let now = SystemTime::now();
        let mut state = self.state.lock();
        state.removable = removable;
        state.typed_ratio = typed_ratio;
        state.warning = reason.is_some();
        state.reason = reason;
        state.ticks += 1;
        state.last_run = Some(now);
        if attempt {
            state.auto_runs += 1;
        }
        if removed > 0 {
            state.segments_removed += removed;
            state.last_removal = Some(now);
        }
        state.clone()
    }

    pub fn snapshot(&self) -> WatchdogSnapshot {
        self.state.lock().clone()
    }

    /// Run `run_once` every `interval` on a dedicated thread until the
    /// returned handle is stopped or dropped.
    pub fn spawn(self: Arc<Self>) -> Result<WatchdogHandle> {
        let interval = if self.config.interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            self.config.interval
        };
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let join = thread::Builder::new()
            .name("wal-watchdog".into())
            .spawn(move || {
                debug!(?interval, "WAL watchdog started");
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            self.run_once();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("WAL watchdog stopped");
            })?;

        Ok(WatchdogHandle {
            stop: Some(stop_tx),
            join: Some(join),
        })
    }
}

/// First WAL segment a raft group still needs.
///
/// A truncation mark wins. Without one, `segment` only counts once the group
/// has applied something; a group with nothing applied pins the whole log.
fn needed_from(ptr: &RaftLogPointer) -> u64 {
    if ptr.segment_index > 0 {
        ptr.segment_index
    } else if ptr.applied_index > 0 {
        u64::from(ptr.segment)
    } else {
        0
    }
}

/// Owner of a running watchdog thread. Stopping joins the thread.
pub struct WatchdogHandle {
    stop: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl WatchdogHandle {
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.try_send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
