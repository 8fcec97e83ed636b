use tracing::{error, trace, warn};

use super::matcher::ScanEngine;
use crate::input::LineSet;
use crate::partition::WorkUnit;
use crate::results::{MatchRecord, PartialResult, PatternId};

const INITIAL_ACCUMULATOR_CAPACITY: usize = 4;

/// Per-line behaviour of CPU workers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuOptions {
    /// Collapse repeated ids on a line, keeping the first occurrence
    pub dedup_matches: bool,
    /// Most ids buffered for one line; a line going past it is handled like a failed allocation
    pub max_matches_per_line: Option<usize>,
}

/// Per-line buffer of pattern ids that doubles its capacity when full.
///
/// Growth uses fallible reservation; once a reservation fails, or the optional id
/// limit is reached, the accumulator is marked failed and ignores further matches.
#[derive(Debug, Default)]
pub struct MatchAccumulator {
    ids: Vec<PatternId>,
    limit: Option<usize>,
    failed: bool,
}

impl MatchAccumulator {
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn push(&mut self, id: PatternId) {
        if self.failed {
            return;
        }
        if self.limit.is_some_and(|limit| self.ids.len() >= limit) {
            self.failed = true;
            return;
        }
        if self.ids.len() == self.ids.capacity() {
            let grow_by = self.ids.capacity().max(INITIAL_ACCUMULATOR_CAPACITY);
            if self.ids.try_reserve_exact(grow_by).is_err() {
                self.failed = true;
                return;
            }
        }
        self.ids.push(id);
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Converts into a record, or `None` when growth failed
    pub fn into_record(self) -> Option<MatchRecord> {
        if self.failed {
            None
        } else {
            Some(MatchRecord::from_ids(self.ids))
        }
    }
}

/// What a worker hands back for its unit
#[derive(Debug)]
pub struct WorkerOutput {
    pub unit: WorkUnit,
    pub result: PartialResult,
    pub match_count: u64,
    pub failed_lines: usize,
    /// Set when the worker could not allocate its scan state
    pub startup_failed: bool,
}

/// Scans one unit of lines against the whole compiled pattern set
pub struct CpuWorker<'a, E: ScanEngine> {
    engine: &'a E,
    db: &'a E::Database,
    lines: &'a LineSet,
    options: CpuOptions,
}

impl<'a, E: ScanEngine> CpuWorker<'a, E> {
    pub fn new(
        engine: &'a E,
        db: &'a E::Database,
        lines: &'a LineSet,
        options: CpuOptions,
    ) -> Self {
        Self {
            engine,
            db,
            lines,
            options,
        }
    }

    /// Processes every line of `unit`.
    ///
    /// Scratch is allocated once here and dropped on return. A line whose scan or
    /// accumulator fails gets an empty record; the worker moves on to the next line.
    pub fn run(&self, unit: WorkUnit) -> WorkerOutput {
        let mut scratch = match self.engine.alloc_scratch(self.db) {
            Ok(scratch) => scratch,
            Err(e) => {
                error!(
                    "Worker for lines {}..{} could not allocate scan state: {}",
                    unit.start, unit.end, e
                );
                return WorkerOutput {
                    unit,
                    result: PartialResult::empty(unit.len()),
                    match_count: 0,
                    failed_lines: 0,
                    startup_failed: true,
                };
            }
        };

        let mut records = Vec::with_capacity(unit.len());
        let mut match_count = 0u64;
        let mut failed_lines = 0;

        for index in unit.range() {
            let mut acc = MatchAccumulator::with_limit(self.options.max_matches_per_line);
            let scanned = self.engine.scan(
                self.db,
                &mut scratch,
                self.lines.line(index),
                &mut |id| acc.push(id),
            );

            let record = match scanned {
                Err(e) => {
                    warn!("Scan failed on line {}: {}", index, e);
                    None
                }
                Ok(()) if acc.is_failed() => {
                    warn!("Match buffer exhausted on line {}", index);
                    None
                }
                Ok(()) => acc.into_record(),
            };

            let record = match record {
                Some(mut record) => {
                    if self.options.dedup_matches {
                        record.dedup_in_order();
                    }
                    trace!("Line {} matched {} times", index, record.len());
                    record
                }
                None => {
                    failed_lines += 1;
                    MatchRecord::new()
                }
            };
            match_count += record.len() as u64;
            records.push(record);
        }

        WorkerOutput {
            unit,
            result: PartialResult::from_records(records),
            match_count,
            failed_lines,
            startup_failed: false,
        }
    }
}
