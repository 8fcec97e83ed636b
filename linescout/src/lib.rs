pub mod config;
pub mod device;
pub mod errors;
pub mod input;
pub mod metrics;
pub mod partition;
pub mod report;
pub mod results;
pub mod search;

pub use config::{ExecutionMode, GpuSettings, ScanConfig};
pub use errors::{MatchError, MatchResult};
pub use input::{LineSet, PatternSet};
pub use results::{MatchRecord, ResultTable, RunSummary, ScanOutput};
