use rayon::prelude::*;
use std::num::NonZeroUsize;
use tracing::{debug, error, info};

use super::batch::BatchExecutor;
use super::matcher::{RegexScanEngine, ScanEngine};
use super::worker::{CpuOptions, CpuWorker, WorkerOutput};
use crate::config::{ExecutionMode, ScanConfig};
use crate::device::HostDevice;
use crate::errors::{MatchError, MatchResult};
use crate::input::{LineSet, PatternSet};
use crate::metrics::{PhaseTimes, RunClock};
use crate::partition::partition_lines;
use crate::results::{ResultTable, RunSummary, ScanOutput};

/// Matches every line against every pattern using the configured mode
pub fn run(config: &ScanConfig, patterns: &PatternSet, lines: &LineSet) -> MatchResult<ScanOutput> {
    config.validate()?;
    match config.mode()? {
        ExecutionMode::Cpu => {
            let engine = RegexScanEngine::new();
            run_cpu(
                &engine,
                config.workers()?,
                config.cpu_options(),
                patterns,
                lines,
            )
        }
        ExecutionMode::Gpu => {
            let device = HostDevice::new(config.gpu.device_memory_bytes());
            BatchExecutor::new(&device, &config.gpu)
                .with_progress(config.show_progress)
                .run(patterns, lines)
        }
    }
}

/// Runs CPU mode: one contiguous unit of lines per worker thread.
///
/// The pattern database is compiled once and shared; workers allocate their own
/// scratch. The result table is allocated before any worker starts, and worker
/// outputs are merged into it once all workers have finished.
pub fn run_cpu<E: ScanEngine>(
    engine: &E,
    workers: NonZeroUsize,
    options: CpuOptions,
    patterns: &PatternSet,
    lines: &LineSet,
) -> MatchResult<ScanOutput> {
    info!(
        "Starting cpu run: {} lines, {} patterns, {} workers",
        lines.len(),
        patterns.len(),
        workers
    );
    let clock = RunClock::start();

    let db = engine.compile(patterns.as_slice())?;
    let units = partition_lines(lines.len(), workers.get())?;
    let mut table = ResultTable::with_lines(lines.len())?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.get())
        .thread_name(|i| format!("linescout-worker-{}", i))
        .build()
        .map_err(|e| MatchError::ThreadPool(e.to_string()))?;

    let outputs: Vec<WorkerOutput> = pool.install(|| {
        units
            .par_iter()
            .with_max_len(1)
            .map(|&unit| CpuWorker::new(engine, &db, lines, options).run(unit))
            .collect()
    });

    let mut failed_lines = 0;
    let mut failed_workers = 0;
    for output in outputs {
        debug!(
            "Worker for lines {}..{} found {} matches",
            output.unit.start, output.unit.end, output.match_count
        );
        failed_lines += output.failed_lines;
        if output.startup_failed {
            failed_workers += 1;
        }
        table.merge(output.unit, output.result)?;
    }
    if failed_workers > 0 {
        error!(
            "{} of {} workers produced no results",
            failed_workers,
            units.len()
        );
    }

    let metrics = clock.finish(PhaseTimes::default());
    let mut summary = RunSummary::new(
        ExecutionMode::Cpu,
        lines.len(),
        patterns.len(),
        lines.total_bytes(),
        table.total_matches(),
        metrics,
    );
    summary.workers = Some(workers.get());
    summary.units = units.len();
    summary.failed_lines = failed_lines;
    summary.failed_workers = failed_workers;

    info!(
        "Cpu run complete. Found {} matches in {} lines",
        summary.total_matches, summary.line_count
    );
    Ok(ScanOutput { table, summary })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(items: &[&str]) -> PatternSet {
        PatternSet::new(items.iter().map(|s| s.to_string()).collect())
    }

    fn workers(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_basic_scenario() {
        let output = run_cpu(
            &RegexScanEngine::new(),
            workers(2),
            CpuOptions::default(),
            &patterns(&["ab", "cd"]),
            &LineSet::from_lines(["xaby", "zcdw", "none"]),
        )
        .unwrap();

        let rendered: Vec<&str> = output.table.iter_rendered().collect();
        assert_eq!(rendered, vec!["0", "1", ""]);
        assert_eq!(output.summary.workers, Some(2));
        assert_eq!(output.summary.units, 2);
        assert_eq!(output.summary.total_matches, 2);
        assert!(output.table.is_complete());
    }

    #[test]
    fn test_more_workers_than_lines() {
        let output = run_cpu(
            &RegexScanEngine::new(),
            workers(8),
            CpuOptions::default(),
            &patterns(&["a"]),
            &LineSet::from_lines(["a", "b", "aa"]),
        )
        .unwrap();
        let rendered: Vec<&str> = output.table.iter_rendered().collect();
        assert_eq!(rendered, vec!["0", "", "0,0"]);
        assert_eq!(output.summary.units, 8);
    }

    #[test]
    fn test_order_preserved_across_workers() {
        let lines: Vec<String> = (0..500)
            .map(|i| if i % 3 == 0 { format!("hit {}", i) } else { format!("miss {}", i) })
            .collect();
        let output = run_cpu(
            &RegexScanEngine::new(),
            workers(7),
            CpuOptions::default(),
            &patterns(&["hit", "miss"]),
            &LineSet::from_lines(&lines),
        )
        .unwrap();

        for i in 0..500 {
            let expected = if i % 3 == 0 { "0" } else { "1" };
            assert_eq!(output.table.rendered(i), Some(expected), "line {}", i);
        }
    }

    #[test]
    fn test_dedup_collapses_repeats() {
        let lines = LineSet::from_lines(["ab ab ab"]);
        let pats = patterns(&["ab"]);
        let engine = RegexScanEngine::new();
        let kept = run_cpu(&engine, workers(1), CpuOptions::default(), &pats, &lines).unwrap();
        let dedup = CpuOptions {
            dedup_matches: true,
            ..CpuOptions::default()
        };
        let deduped = run_cpu(&engine, workers(1), dedup, &pats, &lines).unwrap();
        assert_eq!(kept.table.rendered(0), Some("0,0,0"));
        assert_eq!(deduped.table.rendered(0), Some("0"));
    }

    #[test]
    fn test_invalid_pattern_is_fatal_in_cpu_mode() {
        let err = run_cpu(
            &RegexScanEngine::new(),
            workers(2),
            CpuOptions::default(),
            &patterns(&["ok", "(broken"]),
            &LineSet::from_lines(["ok"]),
        )
        .unwrap_err();
        assert!(matches!(err, MatchError::InvalidPattern { id: 1, .. }));
    }

    #[test]
    fn test_run_dispatches_by_mode() {
        let pats = patterns(&["ab", "cd"]);
        let lines = LineSet::from_lines(["xaby", "zcdw", "none"]);

        let cpu = ScanConfig {
            mode: Some(ExecutionMode::Cpu),
            thread_count: Some(2),
            ..ScanConfig::default()
        };
        let gpu = ScanConfig {
            mode: Some(ExecutionMode::Gpu),
            ..ScanConfig::default()
        };

        let cpu_out = run(&cpu, &pats, &lines).unwrap();
        let gpu_out = run(&gpu, &pats, &lines).unwrap();
        assert_eq!(cpu_out.summary.mode, ExecutionMode::Cpu);
        assert_eq!(gpu_out.summary.mode, ExecutionMode::Gpu);
        assert!(cpu_out
            .table
            .iter_rendered()
            .eq(gpu_out.table.iter_rendered()));
    }

    #[test]
    fn test_run_requires_mode() {
        let err = run(
            &ScanConfig::default(),
            &patterns(&["a"]),
            &LineSet::from_lines(["a"]),
        )
        .unwrap_err();
        assert!(matches!(err, MatchError::ConfigError(_)));
    }
}
