//! Splits the line range into units of work.
//!
//! CPU mode hands each worker one contiguous range of near-equal size. GPU mode
//! packs lines greedily into chunks bounded by a byte budget so one chunk's string
//! table fits on the device at a time. Both return units that partition
//! `0..line_count` exactly, in order.
use serde::Serialize;
use std::ops::Range;
use tracing::debug;

use crate::errors::{MatchError, MatchResult};

/// A contiguous half-open range of line indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkUnit {
    pub start: usize,
    pub end: usize,
}

impl WorkUnit {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Divides `line_count` lines across `workers` units.
///
/// The first `line_count % workers` units get one extra line, so sizes differ by at
/// most one. With more workers than lines the trailing units are empty.
pub fn partition_lines(line_count: usize, workers: usize) -> MatchResult<Vec<WorkUnit>> {
    if workers == 0 {
        return Err(MatchError::config_error("worker count must be positive"));
    }

    let base = line_count / workers;
    let extra = line_count % workers;
    let mut units = Vec::with_capacity(workers);
    let mut start = 0;
    for i in 0..workers {
        let len = base + usize::from(i < extra);
        units.push(WorkUnit::new(start, start + len));
        start += len;
    }

    debug!(
        "Partitioned {} lines across {} workers ({} per worker, {} with one extra)",
        line_count, workers, base, extra
    );
    Ok(units)
}

/// Packs lines into chunks whose byte total stays within `budget`.
///
/// A chunk is closed when the next line would push it over budget and it already
/// holds at least one line, so a line larger than the budget becomes a chunk of its
/// own. Single pass, no rebalancing.
pub fn plan_chunks(byte_lengths: &[u64], budget: u64) -> MatchResult<Vec<WorkUnit>> {
    if budget == 0 {
        return Err(MatchError::config_error("chunk budget must be positive"));
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut running: u64 = 0;
    for (i, &len) in byte_lengths.iter().enumerate() {
        if i > start && running.saturating_add(len) > budget {
            chunks.push(WorkUnit::new(start, i));
            start = i;
            running = 0;
        }
        running = running.saturating_add(len);
    }
    if start < byte_lengths.len() {
        chunks.push(WorkUnit::new(start, byte_lengths.len()));
    }

    debug!(
        "Planned {} chunks for {} lines with a {} byte budget",
        chunks.len(),
        byte_lengths.len(),
        budget
    );
    Ok(chunks)
}
