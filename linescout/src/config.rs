use config::{Config as ConfigBuilder, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::errors::{MatchError, MatchResult};
use crate::search::CpuOptions;

/// Patterns longer than this are never sent to the device.
pub const DEFAULT_MAX_PATTERN_LEN: usize = 1024;

/// Execution mode for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Lines are partitioned across worker threads
    Cpu,
    /// Lines are uploaded in byte-budgeted chunks and patterns evaluated in waves
    Gpu,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Cpu => "cpu",
            ExecutionMode::Gpu => "gpu",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning knobs for GPU mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuSettings {
    /// Number of patterns evaluated per wave
    pub wave_size: usize,
    /// Chunk byte budget in MiB
    pub chunk_budget_mib: u64,
    /// Logical concurrency hint. Advisory only, it does not gate parallelism.
    pub concurrency_hint: usize,
    /// Patterns longer than this many bytes are skipped
    pub max_pattern_len: usize,
    /// Capacity of the device memory pool in MiB
    pub device_memory_mib: u64,
}

impl Default for GpuSettings {
    fn default() -> Self {
        Self {
            wave_size: 48,
            chunk_budget_mib: 128,
            concurrency_hint: 6,
            max_pattern_len: DEFAULT_MAX_PATTERN_LEN,
            device_memory_mib: 4096,
        }
    }
}

impl GpuSettings {
    pub fn chunk_budget_bytes(&self) -> u64 {
        self.chunk_budget_mib.saturating_mul(1024 * 1024)
    }

    pub fn device_memory_bytes(&self) -> u64 {
        self.device_memory_mib.saturating_mul(1024 * 1024)
    }
}

/// Values given on the command line; `None` and `false` leave the loaded value alone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOverrides {
    pub mode: Option<ExecutionMode>,
    pub thread_count: Option<usize>,
    pub dedup_matches: bool,
    pub max_matches_per_line: Option<usize>,
    pub wave_size: Option<usize>,
    pub chunk_budget_mib: Option<u64>,
    pub concurrency_hint: Option<usize>,
    pub max_pattern_len: Option<usize>,
    pub device_memory_mib: Option<u64>,
    pub log_level: Option<String>,
    pub show_progress: bool,
}

/// Configuration for a matching run.
///
/// Loaded from YAML in order of precedence (later sources win):
/// 1. Global `$CONFIG_DIR/linescout/config.yaml`
/// 2. Local `.linescout.yaml` in the current directory
/// 3. A file passed with `--config`
///
/// Command-line values are applied on top with [`ScanConfig::merge_with_cli`].
///
/// ```yaml
/// mode: gpu
/// thread_count: 8
/// dedup_matches: false
/// gpu:
///   wave_size: 48
///   chunk_budget_mib: 128
///   concurrency_hint: 6
/// log_level: "info"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Execution mode, required
    #[serde(default)]
    pub mode: Option<ExecutionMode>,

    /// Worker thread count, required in CPU mode
    #[serde(default)]
    pub thread_count: Option<usize>,

    /// Collapse repeated occurrences of a pattern on one line (CPU mode)
    #[serde(default)]
    pub dedup_matches: bool,

    /// Most matches buffered for one line before it is recorded as failed (CPU mode)
    #[serde(default)]
    pub max_matches_per_line: Option<usize>,

    #[serde(default)]
    pub gpu: GpuSettings,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Show a progress bar while chunks are processed
    #[serde(default)]
    pub show_progress: bool,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            mode: None,
            thread_count: None,
            dedup_matches: false,
            max_matches_per_line: None,
            gpu: GpuSettings::default(),
            log_level: default_log_level(),
            show_progress: false,
        }
    }
}

impl ScanConfig {
    /// Loads configuration from the default locations plus an optional explicit file
    pub fn load_from(config_path: Option<&Path>) -> MatchResult<Self> {
        let mut builder = ConfigBuilder::builder();

        let config_files = [
            dirs::config_dir().map(|p| p.join("linescout/config.yaml")),
            Some(PathBuf::from(".linescout.yaml")),
        ];

        for path in config_files.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        // An explicit file must exist
        if let Some(path) = config_path {
            if !path.exists() {
                return Err(MatchError::FileNotFound(path.to_path_buf()));
            }
            builder = builder.add_source(File::from(path));
        }

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Applies every value given on the command line over the loaded configuration
    pub fn merge_with_cli(mut self, cli: CliOverrides) -> Self {
        if cli.mode.is_some() {
            self.mode = cli.mode;
        }
        if cli.thread_count.is_some() {
            self.thread_count = cli.thread_count;
        }
        if cli.dedup_matches {
            self.dedup_matches = true;
        }
        if cli.max_matches_per_line.is_some() {
            self.max_matches_per_line = cli.max_matches_per_line;
        }
        if let Some(wave_size) = cli.wave_size {
            self.gpu.wave_size = wave_size;
        }
        if let Some(chunk_budget_mib) = cli.chunk_budget_mib {
            self.gpu.chunk_budget_mib = chunk_budget_mib;
        }
        if let Some(concurrency_hint) = cli.concurrency_hint {
            self.gpu.concurrency_hint = concurrency_hint;
        }
        if let Some(max_pattern_len) = cli.max_pattern_len {
            self.gpu.max_pattern_len = max_pattern_len;
        }
        if let Some(device_memory_mib) = cli.device_memory_mib {
            self.gpu.device_memory_mib = device_memory_mib;
        }
        if let Some(log_level) = cli.log_level {
            self.log_level = log_level;
        }
        if cli.show_progress {
            self.show_progress = true;
        }
        self
    }

    /// Per-line worker settings for CPU mode
    pub fn cpu_options(&self) -> CpuOptions {
        CpuOptions {
            dedup_matches: self.dedup_matches,
            max_matches_per_line: self.max_matches_per_line,
        }
    }

    /// Returns the execution mode or a configuration error when it is missing
    pub fn mode(&self) -> MatchResult<ExecutionMode> {
        self.mode
            .ok_or_else(|| MatchError::config_error("execution mode (cpu|gpu) is required"))
    }

    /// Returns the worker count for CPU mode
    pub fn workers(&self) -> MatchResult<NonZeroUsize> {
        let count = self
            .thread_count
            .ok_or_else(|| MatchError::config_error("thread_count is required in cpu mode"))?;
        NonZeroUsize::new(count)
            .ok_or_else(|| MatchError::config_error("thread_count must be a positive integer"))
    }

    /// Checks everything a run needs before any matching work starts
    pub fn validate(&self) -> MatchResult<()> {
        match self.mode()? {
            ExecutionMode::Cpu => {
                let workers = self.workers()?;
                let cores = num_cpus::get();
                if workers.get() > cores {
                    warn!(
                        "thread_count {} exceeds the {} available cores",
                        workers, cores
                    );
                }
            }
            ExecutionMode::Gpu => {
                if self.gpu.wave_size == 0 {
                    return Err(MatchError::config_error("gpu.wave_size must be positive"));
                }
                if self.gpu.chunk_budget_mib == 0 {
                    return Err(MatchError::config_error(
                        "gpu.chunk_budget_mib must be positive",
                    ));
                }
                if self.gpu.device_memory_mib == 0 {
                    return Err(MatchError::config_error(
                        "gpu.device_memory_mib must be positive",
                    ));
                }
            }
        }
        Ok(())
    }
}
