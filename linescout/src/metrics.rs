use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Bytes per megabyte used for throughput figures.
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Tracks device pool usage and program cache behaviour
#[derive(Debug, Clone)]
pub struct MemoryMetrics {
    in_use: Arc<AtomicU64>,
    peak: Arc<AtomicU64>,
    allocations: Arc<AtomicU64>,
    cache_hits: Arc<AtomicU64>,
    cache_misses: Arc<AtomicU64>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self {
            in_use: Arc::new(AtomicU64::new(0)),
            peak: Arc::new(AtomicU64::new(0)),
            allocations: Arc::new(AtomicU64::new(0)),
            cache_hits: Arc::new(AtomicU64::new(0)),
            cache_misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Records an allocation and returns the new total in use
    pub fn record_allocation(&self, bytes: u64) -> u64 {
        let total = self.in_use.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.allocations.fetch_add(1, Ordering::Relaxed);
        let mut peak = self.peak.load(Ordering::Relaxed);
        while total > peak {
            match self.peak.compare_exchange_weak(
                peak,
                total,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => peak = current,
            }
        }
        debug!("Device allocated: {} bytes, in use: {} bytes", bytes, total);
        total
    }

    /// Records a release
    pub fn record_deallocation(&self, bytes: u64) {
        let total = self.in_use.fetch_sub(bytes, Ordering::Relaxed) - bytes;
        debug!("Device released: {} bytes, in use: {} bytes", bytes, total);
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn in_use(&self) -> u64 {
        self.in_use.load(Ordering::Relaxed)
    }

    pub fn get_stats(&self) -> MemoryStats {
        MemoryStats {
            in_use: self.in_use.load(Ordering::Relaxed),
            peak: self.peak.load(Ordering::Relaxed),
            allocations: self.allocations.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Device memory stats:\n\
             In use: {} bytes\n\
             Peak: {} bytes\n\
             Allocations: {}\n\
             Program cache hits/misses: {}/{}",
            stats.in_use, stats.peak, stats.allocations, stats.cache_hits, stats.cache_misses
        );
    }
}

impl Default for MemoryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of [`MemoryMetrics`]
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MemoryStats {
    pub in_use: u64,
    pub peak: u64,
    pub allocations: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// The device phases timed in GPU mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    HostToDevice,
    Compute,
    DeviceToHost,
}

/// Running totals for each device phase, summed over every chunk and pattern
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PhaseTimes {
    pub host_to_device: Duration,
    pub compute: Duration,
    pub device_to_host: Duration,
}

impl PhaseTimes {
    pub fn add(&mut self, phase: Phase, elapsed: Duration) {
        match phase {
            Phase::HostToDevice => self.host_to_device += elapsed,
            Phase::Compute => self.compute += elapsed,
            Phase::DeviceToHost => self.device_to_host += elapsed,
        }
    }

    /// Runs `f` and charges its wall time to `phase`, whether it succeeds or not
    pub fn time<T>(&mut self, phase: Phase, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.add(phase, start.elapsed());
        out
    }

    pub fn total(&self) -> Duration {
        self.host_to_device + self.compute + self.device_to_host
    }
}

/// Wall clock for a whole run
#[derive(Debug)]
pub struct RunClock {
    started: Instant,
}

impl RunClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn finish(self, phases: PhaseTimes) -> RunMetrics {
        RunMetrics {
            elapsed: self.started.elapsed(),
            phases,
        }
    }
}

/// Timing collected for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunMetrics {
    pub elapsed: Duration,
    /// Zero in CPU mode
    pub phases: PhaseTimes,
}

/// Values derived from [`RunMetrics`] at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Throughput {
    pub lines_per_sec: f64,
    pub mb_per_sec: f64,
    pub matches_per_sec: f64,
    pub ms_per_line: f64,
}

impl Throughput {
    pub fn derive(metrics: &RunMetrics, lines: usize, total_bytes: u64, matches: u64) -> Self {
        let secs = metrics.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return Self::default();
        }
        let ms_per_line = if lines == 0 {
            0.0
        } else {
            secs * 1000.0 / lines as f64
        };
        Self {
            lines_per_sec: lines as f64 / secs,
            mb_per_sec: total_bytes as f64 / BYTES_PER_MB / secs,
            matches_per_sec: matches as f64 / secs,
            ms_per_line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_allocation_tracking() {
        let metrics = MemoryMetrics::new();

        metrics.record_allocation(1000);
        assert_eq!(metrics.record_allocation(500), 1500);
        let stats = metrics.get_stats();
        assert_eq!(stats.in_use, 1500);
        assert_eq!(stats.peak, 1500);
        assert_eq!(stats.allocations, 2);

        metrics.record_deallocation(500);
        let stats = metrics.get_stats();
        assert_eq!(stats.in_use, 1000);
        assert_eq!(stats.peak, 1500); // Peak should remain unchanged
    }

    #[test]
    fn test_cache_metrics() {
        let metrics = MemoryMetrics::new();
        metrics.record_cache_lookup(false);
        metrics.record_cache_lookup(true);
        metrics.record_cache_lookup(true);
        let stats = metrics.get_stats();
        assert_eq!(stats.cache_hits, 2);
        assert_eq!(stats.cache_misses, 1);
    }

    #[test]
    fn test_phase_accumulation() {
        let mut phases = PhaseTimes::default();
        phases.add(Phase::HostToDevice, Duration::from_millis(5));
        phases.add(Phase::Compute, Duration::from_millis(7));
        phases.add(Phase::Compute, Duration::from_millis(3));
        phases.add(Phase::DeviceToHost, Duration::from_millis(2));

        assert_eq!(phases.host_to_device, Duration::from_millis(5));
        assert_eq!(phases.compute, Duration::from_millis(10));
        assert_eq!(phases.device_to_host, Duration::from_millis(2));
        assert_eq!(phases.total(), Duration::from_millis(17));

        let value = phases.time(Phase::DeviceToHost, || 42);
        assert_eq!(value, 42);
        assert!(phases.device_to_host >= Duration::from_millis(2));
    }

    #[test]
    fn test_throughput_derivation() {
        let metrics = RunMetrics {
            elapsed: Duration::from_secs(2),
            phases: PhaseTimes::default(),
        };
        let t = Throughput::derive(&metrics, 1000, 4 * 1024 * 1024, 500);
        assert_eq!(t.lines_per_sec, 500.0);
        assert_eq!(t.mb_per_sec, 2.0);
        assert_eq!(t.matches_per_sec, 250.0);
        assert_eq!(t.ms_per_line, 2.0);
    }

    #[test]
    fn test_throughput_zero_guards() {
        let t = Throughput::derive(&RunMetrics::default(), 10, 100, 1);
        assert_eq!(t, Throughput::default());

        let metrics = RunMetrics {
            elapsed: Duration::from_secs(1),
            phases: PhaseTimes::default(),
        };
        let t = Throughput::derive(&metrics, 0, 0, 0);
        assert_eq!(t.ms_per_line, 0.0);
        assert_eq!(t.lines_per_sec, 0.0);
    }
}
