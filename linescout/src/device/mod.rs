//! Device capability used by GPU mode.
//!
//! The batch executor only needs a handful of operations from a device: a memory
//! pool with an explicit lifetime, an upload of a chunk of strings into a
//! device-resident table, a per-pattern program, a containment test producing one
//! boolean per row, a copy of that vector back to the host, and a synchronisation
//! point. Device resources (tables, programs, masks) release their memory when
//! dropped.
//!
//! Errors from `compile_program` and `contains` that satisfy
//! [`MatchError::is_pattern_error`](crate::errors::MatchError::is_pattern_error)
//! are scoped to one pattern; every other error is fatal for the run.
pub mod host;

pub use host::HostDevice;

use tracing::debug;

use crate::errors::MatchResult;
use crate::results::PatternId;

pub trait DeviceBackend {
    type Table;
    type Program;
    type Mask;

    /// Human-friendly identifier for logging
    fn name(&self) -> &'static str;

    /// Initialises the process-wide device memory pool
    fn init_pool(&self) -> MatchResult<()>;

    /// Tears the pool down; safe to call on any exit path
    fn teardown_pool(&self);

    /// Copies `rows` into a device-resident string table
    fn upload_strings(&self, rows: &[&[u8]]) -> MatchResult<Self::Table>;

    /// Compiles one pattern into a device program
    fn compile_program(&self, id: PatternId, pattern: &str) -> MatchResult<Self::Program>;

    /// Evaluates containment of `program` on every row of `table`
    fn contains(
        &self,
        table: &Self::Table,
        program: &Self::Program,
        id: PatternId,
    ) -> MatchResult<Self::Mask>;

    /// Copies a device mask back to the host, one boolean per row
    fn download(&self, mask: Self::Mask) -> MatchResult<Vec<bool>>;

    /// Blocks until all queued device work has completed
    fn synchronize(&self) -> MatchResult<()>;
}

/// Scoped ownership of a backend's memory pool.
///
/// The pool is initialised on creation and torn down when the session is dropped,
/// so it is released on success and on every error path alike.
pub struct DeviceSession<'a, B: DeviceBackend> {
    backend: &'a B,
}

impl<'a, B: DeviceBackend> DeviceSession<'a, B> {
    pub fn open(backend: &'a B) -> MatchResult<Self> {
        backend.init_pool()?;
        debug!("Opened device session on {}", backend.name());
        Ok(Self { backend })
    }
}

impl<B: DeviceBackend> Drop for DeviceSession<'_, B> {
    fn drop(&mut self) {
        self.backend.teardown_pool();
        debug!("Closed device session on {}", self.backend.name());
    }
}
