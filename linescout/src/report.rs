use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::ExecutionMode;
use crate::errors::{MatchError, MatchResult};
use crate::results::{ResultTable, RunSummary};

const CSV_HEADER: &str = "mode,workers,lines,bytes,patterns,matches,elapsed_s,lines_per_s,mb_per_s,matches_per_s,ms_per_line,h2d_s,compute_s,d2h_s";

/// `<lines>.<mode>.matches`, next to the lines file
pub fn default_output_path(lines_path: &Path, mode: ExecutionMode) -> PathBuf {
    let mut name = lines_path.as_os_str().to_os_string();
    name.push(format!(".{}.matches", mode));
    PathBuf::from(name)
}

/// Writes one rendered match string per line, in line order
pub fn write_results(path: &Path, table: &ResultTable) -> MatchResult<()> {
    let file = File::create(path).map_err(|e| MatchError::from_io(path, e))?;
    let mut writer = BufWriter::new(file);
    for rendered in table.iter_rendered() {
        writeln!(writer, "{}", rendered)?;
    }
    writer.flush()?;
    debug!("Wrote {} result lines to {}", table.len(), path.display());
    Ok(())
}

/// Appends one row for `summary`, writing the header first if the file is new or empty
pub fn append_csv(path: &Path, summary: &RunSummary) -> MatchResult<()> {
    let needs_header = std::fs::metadata(path).map_or(true, |m| m.len() == 0);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| MatchError::from_io(path, e))?;
    let mut writer = BufWriter::new(file);
    if needs_header {
        writeln!(writer, "{}", CSV_HEADER)?;
    }
    writeln!(writer, "{}", csv_row(summary))?;
    writer.flush()?;
    Ok(())
}

fn csv_row(summary: &RunSummary) -> String {
    let phases = &summary.metrics.phases;
    let t = &summary.throughput;
    format!(
        "{},{},{},{},{},{},{:.6},{:.3},{:.3},{:.3},{:.6},{:.6},{:.6},{:.6}",
        summary.mode,
        summary.workers.map(|w| w.to_string()).unwrap_or_default(),
        summary.line_count,
        summary.total_bytes,
        summary.pattern_count,
        summary.total_matches,
        summary.metrics.elapsed.as_secs_f64(),
        t.lines_per_sec,
        t.mb_per_sec,
        t.matches_per_sec,
        t.ms_per_line,
        phases.host_to_device.as_secs_f64(),
        phases.compute.as_secs_f64(),
        phases.device_to_host.as_secs_f64()
    )
}
