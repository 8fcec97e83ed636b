use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use linescout::{
    config::CliOverrides, report, search, ExecutionMode, LineSet, PatternSet, RunSummary,
    ScanConfig,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Cpu,
    Gpu,
}

impl From<Mode> for ExecutionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Cpu => ExecutionMode::Cpu,
            Mode::Gpu => ExecutionMode::Gpu,
        }
    }
}

/// Match every line of a file against every pattern of another
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Execution mode (may also come from the config file)
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// File with one pattern per line
    #[arg(short = 'p', long = "patterns")]
    patterns: PathBuf,

    /// File with the lines to scan
    #[arg(short = 'l', long = "lines")]
    lines: PathBuf,

    /// Number of worker threads (cpu mode)
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Patterns per wave (gpu mode)
    #[arg(long)]
    wave_size: Option<usize>,

    /// Chunk budget in MiB (gpu mode)
    #[arg(long = "chunk-mib")]
    chunk_mib: Option<u64>,

    /// Concurrent-stream hint (gpu mode, advisory)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Longest pattern sent to the device, in bytes (gpu mode)
    #[arg(long)]
    max_pattern_len: Option<usize>,

    /// Device memory pool size in MiB (gpu mode)
    #[arg(long = "device-mib")]
    device_mib: Option<u64>,

    /// Collapse repeated matches of a pattern on one line (cpu mode)
    #[arg(long)]
    dedup: bool,

    /// Most matches kept for one line; busier lines are left empty and counted as failed (cpu mode)
    #[arg(long)]
    max_matches_per_line: Option<usize>,

    /// Output file (default: <lines>.<mode>.matches)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Append a row of run metrics to this CSV file
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Path to an additional config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Show chunk progress (gpu mode)
    #[arg(long)]
    progress: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            mode: self.mode.map(ExecutionMode::from),
            thread_count: self.threads,
            dedup_matches: self.dedup,
            max_matches_per_line: self.max_matches_per_line,
            wave_size: self.wave_size,
            chunk_budget_mib: self.chunk_mib,
            concurrency_hint: self.concurrency,
            max_pattern_len: self.max_pattern_len,
            device_memory_mib: self.device_mib,
            log_level: self.log_level.clone(),
            show_progress: self.progress,
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // A subscriber may already be installed when embedded; keep the existing one
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ScanConfig::load_from(cli.config.as_deref())
        .context("failed to load configuration")?
        .merge_with_cli(cli.overrides());
    init_logging(&config.log_level);
    let mode = config.mode()?;

    let patterns = PatternSet::from_file(&cli.patterns)?;
    let lines = LineSet::from_file(&cli.lines)?;
    info!(
        "Loaded {} patterns and {} lines",
        patterns.len(),
        lines.len()
    );

    let output = search::run(&config, &patterns, &lines)?;

    let out_path = cli
        .output
        .clone()
        .unwrap_or_else(|| report::default_output_path(&cli.lines, mode));
    report::write_results(&out_path, &output.table)?;
    if let Some(csv) = &cli.csv {
        report::append_csv(csv, &output.summary)?;
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&output.summary)?);
    } else {
        print_summary(&output.summary, &out_path);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary, out_path: &std::path::Path) {
    print!("{}", summary.to_string().green());
    if summary.failed_lines > 0 || summary.failed_workers > 0 {
        println!(
            "{}",
            format!(
                "{} lines and {} workers failed and were left empty",
                summary.failed_lines, summary.failed_workers
            )
            .yellow()
        );
    }
    if summary.skipped_patterns > 0 || summary.pattern_failures > 0 {
        println!(
            "{}",
            format!(
                "{} patterns skipped, {} per-chunk pattern failures",
                summary.skipped_patterns, summary.pattern_failures
            )
            .yellow()
        );
    }
    println!("Results written to {}", out_path.display().to_string().bold());
}
