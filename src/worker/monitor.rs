//! RSS/CPU monitor sampler (§4.12) — grounded on `sysinfo::System` refreshed
//! on a fixed interval, run in its own spawned task per job, never sharing a
//! runtime worker slot with the I/O-domain cache/queue code (§5).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct MonitorStats {
    peak_rss_bytes: AtomicU64,
    cpu_samples_permille: AtomicU64,
    sample_count: AtomicU64,
}

impl MonitorStats {
    pub fn peak_rss_bytes(&self) -> u64 {
        self.peak_rss_bytes.load(Ordering::Relaxed)
    }

    pub fn mean_cpu_pct(&self) -> f32 {
        let count = self.sample_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        (self.cpu_samples_permille.load(Ordering::Relaxed) as f32 / count as f32) / 10.0
    }
}

/// Samples `pid` every `interval` until `stop` fires, updating `stats` and
/// terminating the process if `rss_limit_bytes` is exceeded.
pub async fn run(pid: u32, interval: Duration, rss_limit_bytes: u64, stats: Arc<MonitorStats>, stop: Arc<Notify>) {
    let mut sys = System::new();
    let mut ticker = tokio::time::interval(interval);
    let target = Pid::from_u32(pid);
    loop {
        tokio::select! {
            _ = stop.notified() => break,
            _ = ticker.tick() => {
                sys.refresh_process(target);
                if let Some(proc_) = sys.process(target) {
                    let rss = proc_.memory();
                    stats.peak_rss_bytes.fetch_max(rss, Ordering::Relaxed);
                    let cpu_permille = (proc_.cpu_usage() * 10.0) as u64;
                    stats.cpu_samples_permille.fetch_add(cpu_permille, Ordering::Relaxed);
                    stats.sample_count.fetch_add(1, Ordering::Relaxed);
                    if rss > rss_limit_bytes {
                        tracing::warn!(pid, rss, rss_limit_bytes, "RSS limit exceeded, terminating process tree");
                        #[cfg(unix)]
                        kill_process_group(pid);
                        break;
                    }
                } else {
                    break;
                }
            }
        }
    }
}

/// Sends `SIGKILL` to the whole process group (negative pid), matching the
/// "own process group" spawn contract in §4.12 step 8.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_cpu_pct_is_zero_with_no_samples() {
        let stats = MonitorStats::default();
        assert_eq!(stats.mean_cpu_pct(), 0.0);
    }
}
