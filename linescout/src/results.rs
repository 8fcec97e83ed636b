/// Match records and the order-preserving result table.
///
/// Workers and chunks build their results locally, indexed from the start of their
/// own [`WorkUnit`]. The table then takes ownership of each partial result and moves
/// it into place. Because units partition the line range, every merge writes a
/// disjoint slice and no conflict resolution is needed; the table refuses a merge
/// that would overwrite a line or that does not cover its unit exactly.
use itertools::Itertools;
use serde::Serialize;
use std::fmt;

use crate::config::ExecutionMode;
use crate::errors::{MatchError, MatchResult};
use crate::metrics::{RunMetrics, Throughput};
use crate::partition::WorkUnit;

/// Zero-based index of a pattern within the loaded pattern set
pub type PatternId = usize;

/// Pattern ids judged to match one line, in discovery order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRecord {
    pub ids: Vec<PatternId>,
}

impl MatchRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids(ids: Vec<PatternId>) -> Self {
        Self { ids }
    }

    pub fn push(&mut self, id: PatternId) {
        self.ids.push(id);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Drops repeated ids, keeping the first occurrence of each
    pub fn dedup_in_order(&mut self) {
        let mut seen = std::collections::HashSet::with_capacity(self.ids.len());
        self.ids.retain(|id| seen.insert(*id));
    }

    /// Comma-separated decimal ids, empty when nothing matched
    pub fn render(&self) -> String {
        self.ids.iter().join(",")
    }
}

impl fmt::Display for MatchRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Results produced for one work unit, indexed from the unit's start
#[derive(Debug, Clone, Default)]
pub struct PartialResult {
    pub records: Vec<MatchRecord>,
    pub rendered: Vec<String>,
}

impl PartialResult {
    /// Renders each record; used where the producer does not format its own output
    pub fn from_records(records: Vec<MatchRecord>) -> Self {
        let rendered = records.iter().map(MatchRecord::render).collect();
        Self { records, rendered }
    }

    /// An all-empty result for `len` lines
    pub fn empty(len: usize) -> Self {
        Self {
            records: vec![MatchRecord::new(); len],
            rendered: vec![String::new(); len],
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Every line's match record and rendered string, addressable by line index
#[derive(Debug, Clone, Default)]
pub struct ResultTable {
    records: Vec<MatchRecord>,
    rendered: Vec<String>,
    filled: Vec<bool>,
    filled_count: usize,
    total_matches: u64,
}

impl ResultTable {
    /// Allocates the table for `line_count` lines.
    ///
    /// The table is structural, so failing to reserve it is fatal.
    pub fn with_lines(line_count: usize) -> MatchResult<Self> {
        let mut records = Vec::new();
        let mut rendered = Vec::new();
        let mut filled = Vec::new();
        records
            .try_reserve_exact(line_count)
            .and_then(|_| rendered.try_reserve_exact(line_count))
            .and_then(|_| filled.try_reserve_exact(line_count))
            .map_err(|e| {
                MatchError::resource_exhausted(format!(
                    "cannot allocate result table for {} lines: {}",
                    line_count, e
                ))
            })?;
        records.resize_with(line_count, MatchRecord::new);
        rendered.resize_with(line_count, String::new);
        filled.resize(line_count, false);

        Ok(Self {
            records,
            rendered,
            filled,
            filled_count: 0,
            total_matches: 0,
        })
    }

    /// Moves a unit-local result into the table at the unit's positions
    pub fn merge(&mut self, unit: WorkUnit, partial: PartialResult) -> MatchResult<()> {
        if unit.end > self.records.len() {
            return Err(MatchError::aggregation(format!(
                "unit {}..{} exceeds table of {} lines",
                unit.start,
                unit.end,
                self.records.len()
            )));
        }
        if partial.records.len() != unit.len() || partial.rendered.len() != unit.len() {
            return Err(MatchError::aggregation(format!(
                "unit {}..{} produced {} records for {} lines",
                unit.start,
                unit.end,
                partial.records.len(),
                unit.len()
            )));
        }
        if let Some(offset) = self.filled[unit.range()].iter().position(|&f| f) {
            return Err(MatchError::aggregation(format!(
                "line {} already merged from another unit",
                unit.start + offset
            )));
        }

        for (offset, (record, text)) in partial
            .records
            .into_iter()
            .zip(partial.rendered)
            .enumerate()
        {
            let index = unit.start + offset;
            self.total_matches += record.len() as u64;
            self.records[index] = record;
            self.rendered[index] = text;
            self.filled[index] = true;
        }
        self.filled_count += unit.len();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True once every line has been merged exactly once
    pub fn is_complete(&self) -> bool {
        self.filled_count == self.records.len()
    }

    /// Sum of record lengths across the table
    pub fn total_matches(&self) -> u64 {
        self.total_matches
    }

    pub fn record(&self, line: usize) -> Option<&MatchRecord> {
        self.records.get(line)
    }

    pub fn rendered(&self, line: usize) -> Option<&str> {
        self.rendered.get(line).map(String::as_str)
    }

    /// Rendered match strings in line order
    pub fn iter_rendered(&self) -> impl Iterator<Item = &str> {
        self.rendered.iter().map(String::as_str)
    }
}

/// Counts and timings reported for a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub mode: ExecutionMode,
    /// Worker threads (CPU mode)
    pub workers: Option<usize>,
    /// Patterns per wave (GPU mode)
    pub wave_size: Option<usize>,
    /// Chunk byte budget (GPU mode)
    pub chunk_budget_bytes: Option<u64>,
    /// Work units scheduled: workers in CPU mode, chunks in GPU mode
    pub units: usize,
    pub line_count: usize,
    pub pattern_count: usize,
    pub total_bytes: u64,
    pub total_matches: u64,
    /// Lines whose scan or match buffer failed (CPU mode)
    pub failed_lines: usize,
    /// Workers that could not allocate scan state (CPU mode)
    pub failed_workers: usize,
    /// Patterns filtered out as empty or too long (GPU mode)
    pub skipped_patterns: usize,
    /// Per-chunk pattern compile/evaluate failures (GPU mode)
    pub pattern_failures: usize,
    pub metrics: RunMetrics,
    pub throughput: Throughput,
}

impl RunSummary {
    pub fn new(
        mode: ExecutionMode,
        line_count: usize,
        pattern_count: usize,
        total_bytes: u64,
        total_matches: u64,
        metrics: RunMetrics,
    ) -> Self {
        Self {
            mode,
            workers: None,
            wave_size: None,
            chunk_budget_bytes: None,
            units: 0,
            line_count,
            pattern_count,
            total_bytes,
            total_matches,
            failed_lines: 0,
            failed_workers: 0,
            skipped_patterns: 0,
            pattern_failures: 0,
            metrics,
            throughput: Throughput::derive(&metrics, line_count, total_bytes, total_matches),
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} mode: {} matches across {} lines ({} bytes) for {} patterns",
            self.mode, self.total_matches, self.line_count, self.total_bytes, self.pattern_count
        )?;
        writeln!(
            f,
            "elapsed {} ({:.0} lines/s, {:.2} MB/s, {:.0} matches/s, {:.6} ms/line)",
            humantime::format_duration(self.metrics.elapsed),
            self.throughput.lines_per_sec,
            self.throughput.mb_per_sec,
            self.throughput.matches_per_sec,
            self.throughput.ms_per_line
        )?;
        if self.mode == ExecutionMode::Gpu {
            let phases = &self.metrics.phases;
            writeln!(
                f,
                "host->device {}, compute {}, device->host {}",
                humantime::format_duration(phases.host_to_device),
                humantime::format_duration(phases.compute),
                humantime::format_duration(phases.device_to_host)
            )?;
        }
        Ok(())
    }
}

/// Everything a run hands to the reporting side
#[derive(Debug)]
pub struct ScanOutput {
    pub table: ResultTable,
    pub summary: RunSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_rendering() {
        assert_eq!(MatchRecord::new().render(), "");
        assert_eq!(MatchRecord::from_ids(vec![0]).render(), "0");
        assert_eq!(MatchRecord::from_ids(vec![3, 1, 3]).to_string(), "3,1,3");
    }

    #[test]
    fn test_dedup_keeps_discovery_order() {
        let mut record = MatchRecord::from_ids(vec![4, 2, 4, 2, 9]);
        record.dedup_in_order();
        assert_eq!(record.ids, vec![4, 2, 9]);
    }

    #[test]
    fn test_merge_out_of_order_units() {
        let mut table = ResultTable::with_lines(4).unwrap();

        table
            .merge(
                WorkUnit::new(2, 4),
                PartialResult::from_records(vec![
                    MatchRecord::from_ids(vec![1]),
                    MatchRecord::new(),
                ]),
            )
            .unwrap();
        assert!(!table.is_complete());

        table
            .merge(
                WorkUnit::new(0, 2),
                PartialResult::from_records(vec![
                    MatchRecord::from_ids(vec![0, 0]),
                    MatchRecord::from_ids(vec![2]),
                ]),
            )
            .unwrap();

        assert!(table.is_complete());
        assert_eq!(table.total_matches(), 4);
        let rendered: Vec<&str> = table.iter_rendered().collect();
        assert_eq!(rendered, vec!["0,0", "2", "1", ""]);
        assert_eq!(table.record(2).unwrap().ids, vec![1]);
    }

    #[test]
    fn test_empty_unit_merge() {
        let mut table = ResultTable::with_lines(1).unwrap();
        table
            .merge(WorkUnit::new(1, 1), PartialResult::empty(0))
            .unwrap();
        table
            .merge(WorkUnit::new(0, 1), PartialResult::empty(1))
            .unwrap();
        assert!(table.is_complete());
        assert_eq!(table.rendered(0), Some(""));
    }

    #[test]
    fn test_overlapping_merge_rejected() {
        let mut table = ResultTable::with_lines(3).unwrap();
        table
            .merge(WorkUnit::new(0, 2), PartialResult::empty(2))
            .unwrap();
        let err = table
            .merge(WorkUnit::new(1, 3), PartialResult::empty(2))
            .unwrap_err();
        assert!(matches!(err, MatchError::Aggregation(_)));
    }

    #[test]
    fn test_summary_derives_throughput() {
        let metrics = RunMetrics {
            elapsed: std::time::Duration::from_secs(1),
            ..RunMetrics::default()
        };
        let summary = RunSummary::new(ExecutionMode::Cpu, 100, 2, 1024 * 1024, 50, metrics);
        assert_eq!(summary.throughput.lines_per_sec, 100.0);
        assert_eq!(summary.throughput.mb_per_sec, 1.0);
        let text = summary.to_string();
        assert!(text.starts_with("cpu mode: 50 matches across 100 lines"));
        assert!(!text.contains("host->device"));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut table = ResultTable::with_lines(3).unwrap();
        assert!(table
            .merge(WorkUnit::new(0, 2), PartialResult::empty(1))
            .is_err());
        assert!(table
            .merge(WorkUnit::new(2, 4), PartialResult::empty(2))
            .is_err());
    }
}
