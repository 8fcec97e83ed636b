use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, trace, warn};

use crate::config::{ExecutionMode, GpuSettings};
use crate::device::{DeviceBackend, DeviceSession};
use crate::errors::{MatchError, MatchResult};
use crate::input::{LineSet, PatternSet};
use crate::metrics::{Phase, PhaseTimes, RunClock};
use crate::partition::{plan_chunks, WorkUnit};
use crate::results::{MatchRecord, PartialResult, PatternId, ResultTable, RunSummary, ScanOutput};

/// Running counters for one GPU run
#[derive(Debug, Default)]
struct BatchState {
    phases: PhaseTimes,
    pattern_failures: usize,
}

/// Runs GPU mode: chunks one after another, patterns in waves within each chunk.
///
/// Each chunk's lines are uploaded once. Every eligible pattern is then compiled,
/// evaluated against the whole chunk and its mask copied back, with a
/// synchronisation after each device step. The chunk's table is dropped before the
/// next chunk is uploaded, so device memory peaks at about one chunk plus one
/// pattern's program and mask.
pub struct BatchExecutor<'a, B: DeviceBackend> {
    backend: &'a B,
    settings: &'a GpuSettings,
    show_progress: bool,
}

impl<'a, B: DeviceBackend> BatchExecutor<'a, B> {
    pub fn new(backend: &'a B, settings: &'a GpuSettings) -> Self {
        Self {
            backend,
            settings,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Patterns sent to the device, with their ids; empty or over-long ones are left out
    fn eligible_patterns<'p>(&self, patterns: &'p PatternSet) -> Vec<(PatternId, &'p str)> {
        patterns
            .iter()
            .filter(|(id, pattern)| {
                let keep = !pattern.is_empty() && pattern.len() <= self.settings.max_pattern_len;
                if !keep {
                    debug!(
                        "Skipping pattern {} ({} bytes, limit {})",
                        id,
                        pattern.len(),
                        self.settings.max_pattern_len
                    );
                }
                keep
            })
            .collect()
    }

    fn progress_bar(&self, chunks: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let progress = ProgressBar::new(chunks as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} chunks")
        {
            progress.set_style(style.progress_chars("=>-"));
        }
        progress
    }

    pub fn run(&self, patterns: &PatternSet, lines: &LineSet) -> MatchResult<ScanOutput> {
        if self.settings.wave_size == 0 {
            return Err(MatchError::config_error("gpu.wave_size must be positive"));
        }
        let clock = RunClock::start();
        let budget = self.settings.chunk_budget_bytes();
        let chunks = plan_chunks(&lines.byte_lengths(), budget)?;
        let eligible = self.eligible_patterns(patterns);
        let skipped_patterns = patterns.len() - eligible.len();

        info!(
            "Starting gpu run on {}: {} lines in {} chunks, {} of {} patterns in waves of {} (concurrency hint {})",
            self.backend.name(),
            lines.len(),
            chunks.len(),
            eligible.len(),
            patterns.len(),
            self.settings.wave_size,
            self.settings.concurrency_hint
        );

        let mut table = ResultTable::with_lines(lines.len())?;
        let mut state = BatchState::default();
        let progress = self.progress_bar(chunks.len());

        let session = DeviceSession::open(self.backend)?;
        for &chunk in &chunks {
            let records = self.process_chunk(chunk, lines, &eligible, &mut state)?;
            table.merge(chunk, PartialResult::from_records(records))?;
            progress.inc(1);
        }
        drop(session);
        progress.finish_and_clear();

        let metrics = clock.finish(state.phases);
        let mut summary = RunSummary::new(
            ExecutionMode::Gpu,
            lines.len(),
            patterns.len(),
            lines.total_bytes(),
            table.total_matches(),
            metrics,
        );
        summary.wave_size = Some(self.settings.wave_size);
        summary.chunk_budget_bytes = Some(budget);
        summary.units = chunks.len();
        summary.skipped_patterns = skipped_patterns;
        summary.pattern_failures = state.pattern_failures;

        info!(
            "Gpu run complete. Found {} matches in {} lines",
            summary.total_matches, summary.line_count
        );
        Ok(ScanOutput { table, summary })
    }

    fn process_chunk(
        &self,
        chunk: WorkUnit,
        lines: &LineSet,
        eligible: &[(PatternId, &str)],
        state: &mut BatchState,
    ) -> MatchResult<Vec<MatchRecord>> {
        debug!("Processing chunk {}..{}", chunk.start, chunk.end);
        let rows = lines.slice(chunk.range());
        let device_table = state
            .phases
            .time(Phase::HostToDevice, || -> MatchResult<B::Table> {
                let table = self.backend.upload_strings(&rows)?;
                self.backend.synchronize()?;
                Ok(table)
            })?;

        let mut records = vec![MatchRecord::new(); chunk.len()];
        for (wave_index, wave) in eligible.chunks(self.settings.wave_size).enumerate() {
            trace!(
                "Chunk {}..{} wave {} ({} patterns)",
                chunk.start,
                chunk.end,
                wave_index,
                wave.len()
            );
            for &(id, pattern) in wave {
                match self.evaluate(&device_table, chunk.len(), id, pattern, state) {
                    Ok(hits) => {
                        for (record, _) in records.iter_mut().zip(hits).filter(|(_, hit)| *hit) {
                            record.push(id);
                        }
                    }
                    Err(e) if e.is_pattern_error() => {
                        warn!(
                            "Skipping pattern {} for lines {}..{}: {}",
                            id, chunk.start, chunk.end, e
                        );
                        state.pattern_failures += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        drop(device_table);
        Ok(records)
    }

    /// Compiles and evaluates one pattern over the uploaded chunk
    fn evaluate(
        &self,
        table: &B::Table,
        rows: usize,
        id: PatternId,
        pattern: &str,
        state: &mut BatchState,
    ) -> MatchResult<Vec<bool>> {
        let mask = state
            .phases
            .time(Phase::Compute, || -> MatchResult<B::Mask> {
                let program = self.backend.compile_program(id, pattern)?;
                let mask = self.backend.contains(table, &program, id)?;
                self.backend.synchronize()?;
                drop(program);
                Ok(mask)
            })?;

        let hits = state
            .phases
            .time(Phase::DeviceToHost, || self.backend.download(mask))?;
        if hits.len() != rows {
            return Err(MatchError::device(format!(
                "pattern {} returned {} results for {} rows",
                id,
                hits.len(),
                rows
            )));
        }
        Ok(hits)
    }
}
