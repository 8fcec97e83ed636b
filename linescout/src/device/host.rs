use dashmap::DashMap;
use rayon::prelude::*;
use regex::bytes::{Regex, RegexBuilder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::DeviceBackend;
use crate::errors::{MatchError, MatchResult};
use crate::metrics::{MemoryMetrics, MemoryStats};
use crate::results::PatternId;

/// Compiled-size limit for a single device program
const PROGRAM_SIZE_LIMIT: usize = 10 * 1024 * 1024;

#[derive(Debug)]
struct Pool {
    active: AtomicBool,
    capacity: u64,
    metrics: MemoryMetrics,
}

impl Pool {
    fn allocate(self: &Arc<Self>, bytes: u64) -> MatchResult<Allocation> {
        if !self.active.load(Ordering::Acquire) {
            return Err(MatchError::device("device memory pool is not initialised"));
        }
        // The executor drives the device from one thread, so check-then-record holds
        let in_use = self.metrics.in_use();
        if in_use.saturating_add(bytes) > self.capacity {
            return Err(MatchError::DeviceAllocation {
                requested: bytes,
                in_use,
                capacity: self.capacity,
            });
        }
        self.metrics.record_allocation(bytes);
        Ok(Allocation {
            pool: Arc::clone(self),
            bytes,
        })
    }
}

/// A block of pool memory, returned when dropped
#[derive(Debug)]
struct Allocation {
    pool: Arc<Pool>,
    bytes: u64,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.pool.metrics.record_deallocation(self.bytes);
    }
}

/// Chunk strings laid out as one character buffer plus row offsets
#[derive(Debug)]
pub struct HostTable {
    chars: Vec<u8>,
    offsets: Vec<usize>,
    _alloc: Allocation,
}

impl HostTable {
    pub fn rows(&self) -> usize {
        self.offsets.len() - 1
    }

    fn row(&self, i: usize) -> &[u8] {
        &self.chars[self.offsets[i]..self.offsets[i + 1]]
    }
}

#[derive(Debug)]
pub struct HostProgram {
    regex: Arc<Regex>,
    _alloc: Allocation,
}

/// One byte per row, nonzero where the row contains a match
#[derive(Debug)]
pub struct HostMask {
    bits: Vec<u8>,
    _alloc: Allocation,
}

/// Emulated device keeping its memory in a budgeted host-side pool.
///
/// Containment runs data-parallel across rows on the rayon pool. Compiled programs
/// are cached by pattern text; failed compiles are not cached, so a failing pattern
/// is attempted again on the next chunk.
#[derive(Debug)]
pub struct HostDevice {
    pool: Arc<Pool>,
    programs: DashMap<String, Arc<Regex>>,
}

impl HostDevice {
    /// Creates a device with `capacity` bytes of pool memory
    pub fn new(capacity: u64) -> Self {
        Self {
            pool: Arc::new(Pool {
                active: AtomicBool::new(false),
                capacity,
                metrics: MemoryMetrics::new(),
            }),
            programs: DashMap::new(),
        }
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.pool.metrics.get_stats()
    }

    pub fn is_pool_active(&self) -> bool {
        self.pool.active.load(Ordering::Acquire)
    }

    fn lookup_program(&self, id: PatternId, pattern: &str) -> MatchResult<Arc<Regex>> {
        if let Some(entry) = self.programs.get(pattern) {
            self.pool.metrics.record_cache_lookup(true);
            return Ok(Arc::clone(entry.value()));
        }
        self.pool.metrics.record_cache_lookup(false);

        let regex = RegexBuilder::new(pattern)
            .size_limit(PROGRAM_SIZE_LIMIT)
            .build()
            .map_err(|e| MatchError::pattern_compile(id, e.to_string()))?;
        let regex = Arc::new(regex);
        self.programs
            .insert(pattern.to_string(), Arc::clone(&regex));
        Ok(regex)
    }
}

impl DeviceBackend for HostDevice {
    type Table = HostTable;
    type Program = HostProgram;
    type Mask = HostMask;

    fn name(&self) -> &'static str {
        "host-emulated"
    }

    fn init_pool(&self) -> MatchResult<()> {
        if self.pool.active.swap(true, Ordering::AcqRel) {
            return Err(MatchError::device("device memory pool is already initialised"));
        }
        debug!("Initialised device pool with {} bytes", self.pool.capacity);
        Ok(())
    }

    fn teardown_pool(&self) {
        if !self.pool.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let in_use = self.pool.metrics.in_use();
        if in_use > 0 {
            warn!("Device pool torn down with {} bytes still allocated", in_use);
        }
        // Programs belong to the pool they were compiled for
        self.programs.clear();
        self.pool.metrics.log_stats();
    }

    fn upload_strings(&self, rows: &[&[u8]]) -> MatchResult<HostTable> {
        let char_bytes: usize = rows.iter().map(|r| r.len()).sum();
        let offset_bytes = (rows.len() + 1) * std::mem::size_of::<usize>();
        let alloc = self.pool.allocate((char_bytes + offset_bytes) as u64)?;

        let mut chars = Vec::with_capacity(char_bytes);
        let mut offsets = Vec::with_capacity(rows.len() + 1);
        offsets.push(0);
        for row in rows {
            chars.extend_from_slice(row);
            offsets.push(chars.len());
        }
        trace!("Uploaded {} rows ({} bytes)", rows.len(), char_bytes);
        Ok(HostTable {
            chars,
            offsets,
            _alloc: alloc,
        })
    }

    fn compile_program(&self, id: PatternId, pattern: &str) -> MatchResult<HostProgram> {
        let regex = self.lookup_program(id, pattern)?;
        let alloc = self.pool.allocate(pattern.len().max(1) as u64)?;
        Ok(HostProgram {
            regex,
            _alloc: alloc,
        })
    }

    fn contains(
        &self,
        table: &HostTable,
        program: &HostProgram,
        _id: PatternId,
    ) -> MatchResult<HostMask> {
        let alloc = self.pool.allocate(table.rows() as u64)?;
        let bits: Vec<u8> = (0..table.rows())
            .into_par_iter()
            .map(|i| u8::from(program.regex.is_match(table.row(i))))
            .collect();
        Ok(HostMask {
            bits,
            _alloc: alloc,
        })
    }

    fn download(&self, mask: HostMask) -> MatchResult<Vec<bool>> {
        Ok(mask.bits.iter().map(|&b| b != 0).collect())
    }

    fn synchronize(&self) -> MatchResult<()> {
        if !self.is_pool_active() {
            return Err(MatchError::device("synchronize called without an active pool"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceSession;

    fn rows<'a>(items: &[&'a str]) -> Vec<&'a [u8]> {
        items.iter().map(|s| s.as_bytes()).collect()
    }

    #[test]
    fn test_containment_per_row() {
        let device = HostDevice::new(1 << 20);
        let _session = DeviceSession::open(&device).unwrap();

        let table = device
            .upload_strings(&rows(&["xaby", "zcdw", "none"]))
            .unwrap();
        assert_eq!(table.rows(), 3);
        let program = device.compile_program(0, "ab").unwrap();
        let mask = device.contains(&table, &program, 0).unwrap();
        assert_eq!(device.download(mask).unwrap(), vec![true, false, false]);
    }

    #[test]
    fn test_memory_released_on_drop() {
        let device = HostDevice::new(1 << 20);
        let session = DeviceSession::open(&device).unwrap();
        {
            let _table = device.upload_strings(&rows(&["abc", "def"])).unwrap();
            assert!(device.memory_stats().in_use > 0);
        }
        assert_eq!(device.memory_stats().in_use, 0);
        drop(session);
        assert!(!device.is_pool_active());
    }

    #[test]
    fn test_allocation_beyond_capacity_fails() {
        let device = HostDevice::new(16);
        let _session = DeviceSession::open(&device).unwrap();
        let err = device.upload_strings(&rows(&["0123456789abcdef0123"])).unwrap_err();
        assert!(matches!(err, MatchError::DeviceAllocation { .. }));
        assert!(!err.is_pattern_error());
        assert_eq!(device.memory_stats().in_use, 0);
    }

    #[test]
    fn test_operations_require_pool() {
        let device = HostDevice::new(1 << 20);
        assert!(matches!(
            device.upload_strings(&rows(&["a"])),
            Err(MatchError::Device(_))
        ));
        assert!(device.synchronize().is_err());
    }

    #[test]
    fn test_double_init_rejected() {
        let device = HostDevice::new(1 << 20);
        let _session = DeviceSession::open(&device).unwrap();
        assert!(device.init_pool().is_err());
    }

    #[test]
    fn test_compile_failure_is_pattern_error() {
        let device = HostDevice::new(1 << 20);
        let _session = DeviceSession::open(&device).unwrap();
        let err = device.compile_program(5, "(unclosed").unwrap_err();
        assert!(matches!(err, MatchError::PatternCompile { id: 5, .. }));
        assert!(err.is_pattern_error());
    }

    #[test]
    fn test_program_cache_cleared_on_teardown() {
        let device = HostDevice::new(1 << 20);
        {
            let _session = DeviceSession::open(&device).unwrap();
            device.compile_program(0, "abc").unwrap();
            assert_eq!(device.programs.len(), 1);
        }
        assert!(device.programs.is_empty());

        let _session = DeviceSession::open(&device).unwrap();
        device.compile_program(0, "abc").unwrap();
        let stats = device.memory_stats();
        assert_eq!(stats.cache_hits, 0);
        assert_eq!(stats.cache_misses, 2);
    }

    #[test]
    fn test_program_cache() {
        let device = HostDevice::new(1 << 20);
        let _session = DeviceSession::open(&device).unwrap();
        device.compile_program(0, "abc").unwrap();
        device.compile_program(0, "abc").unwrap();
        device.compile_program(1, "def").unwrap();
        let stats = device.memory_stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 2);
    }
}
