/// Line matching in both execution modes.
///
/// # CPU mode
///
/// Lines are split into one contiguous unit per worker. Each worker runs on a
/// dedicated rayon pool sized to the requested thread count, scans its lines against
/// the shared compiled database with its own scratch, and formats its records
/// locally. Nothing is shared mutably between workers; their outputs are merged into
/// the result table after the pool joins:
/// ```rust,ignore
/// let outputs: Vec<_> = pool.install(|| {
///     units.par_iter().map(|&unit| worker.run(unit)).collect()
/// });
/// ```
///
/// # GPU mode
///
/// Lines are packed into byte-budgeted chunks processed strictly one after another.
/// Within a chunk, patterns are evaluated in waves, each pattern producing one
/// boolean per line. A pattern that fails to compile or evaluate is skipped for
/// that chunk only; any other device failure ends the run, and the device pool is
/// released on every exit path.
///
/// # Ordering
///
/// In both modes a line's result lands at the line's own index, so the output order
/// never depends on scheduling.
pub mod batch;
pub mod engine;
pub mod matcher;
pub mod worker;

pub use batch::BatchExecutor;
pub use engine::{run, run_cpu};
pub use matcher::{RegexScanEngine, ScanEngine};
pub use worker::{CpuOptions, CpuWorker};
