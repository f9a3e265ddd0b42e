use std::path::Path;

use anyhow::{Result, anyhow};
use owo_colors::{OwoColorize, Stream};

use crate::config::Config;
use crate::errors::BenchError;
use crate::runner;
use crate::types::{AggregateStats, RunRecord, RunSample};

pub const LINE_SEPARATOR: &str = "-----------------------------------";

/// Compute totals, extremes and means over a non-empty series.
pub fn aggregate(samples: &[RunSample]) -> Result<AggregateStats, BenchError> {
    let (first, rest) = samples.split_first().ok_or(BenchError::EmptySeries)?;

    let mut stats = AggregateStats {
        count: samples.len(),
        total_cpu: first.cpu_seconds,
        total_wall: first.wall_seconds,
        min_cpu: first.cpu_seconds,
        min_wall: first.wall_seconds,
        max_cpu: first.cpu_seconds,
        max_wall: first.wall_seconds,
        mean_cpu: 0.0,
        mean_wall: 0.0,
    };
    for sample in rest {
        stats.total_cpu += sample.cpu_seconds;
        stats.total_wall += sample.wall_seconds;
        if sample.cpu_seconds < stats.min_cpu {
            stats.min_cpu = sample.cpu_seconds;
        }
        if sample.wall_seconds < stats.min_wall {
            stats.min_wall = sample.wall_seconds;
        }
        if sample.cpu_seconds > stats.max_cpu {
            stats.max_cpu = sample.cpu_seconds;
        }
        if sample.wall_seconds > stats.max_wall {
            stats.max_wall = sample.wall_seconds;
        }
    }
    stats.mean_cpu = stats.total_cpu / stats.count as f64;
    stats.mean_wall = stats.total_wall / stats.count as f64;

    Ok(stats)
}

/// Whole seconds of a wall-clock value; the fraction is dropped, not rounded.
pub fn format_wall(seconds: f64) -> String {
    format!("{}", seconds.trunc() as i64)
}

/// Mean wall time rounded to three decimals with trailing zeros removed:
/// 2.5 → "2.5", 2.0 → "2", 2.567 → "2.567".
pub fn format_mean_wall(seconds: f64) -> String {
    let rounded = format!("{:.3}", seconds);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    }
}

fn format_line(label: &str, cpu: f64, wall: &str) -> String {
    format!("{}\tCPU: {:.3} Wall: {}\n", label, cpu, wall)
}

/// Render per-run lines followed by max, min and mean.
pub fn format_report(samples: &[RunSample], stats: &AggregateStats) -> String {
    let mut out = String::new();
    out.push_str(LINE_SEPARATOR);
    out.push('\n');
    out.push_str("Execution time in CPU and wall clock seconds, precision set to 3 decimals.\n");

    for (i, sample) in samples.iter().enumerate() {
        out.push_str(&format_line(
            &format!("Run {}", i + 1),
            sample.cpu_seconds,
            &format_wall(sample.wall_seconds),
        ));
    }

    out.push_str(LINE_SEPARATOR);
    out.push('\n');
    out.push_str(&format_line("Max", stats.max_cpu, &format_wall(stats.max_wall)));
    out.push_str(&format_line("Min", stats.min_cpu, &format_wall(stats.min_wall)));
    out.push_str(&format_line(
        "Mean",
        stats.mean_cpu,
        &format_mean_wall(stats.mean_wall),
    ));
    out
}

/// Print the report for `samples` and return the statistics behind it.
pub fn report(samples: &[RunSample]) -> Result<AggregateStats, BenchError> {
    let stats = aggregate(samples)?;
    print!("{}", format_report(samples, &stats));
    Ok(stats)
}

/// Summary of the configuration printed before the first run.
pub fn format_preamble(config: &Config) -> String {
    let data = config
        .data_path
        .as_deref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let pids = if config.await_pids.is_empty() {
        "None".to_string()
    } else {
        format!("{:?}", config.await_pids)
    };

    let mut out = String::new();
    out.push_str(&format!("PID:\t\t\t{}\n", std::process::id()));
    out.push_str(&format!("Flags:\t\t\t{}\n", config.flags));
    out.push_str(&format!("Input:\t\t\t{}\n", data));
    out.push_str(&format!("Await PIDs:\t\t{}\n", pids));
    out.push_str(&format!("Await other tests?\t{}\n", config.await_tests));
    out.push_str(&format!("Number of iterations:\t{}\n", config.runs));
    out.push_str(&format!("Comments:\t\t{}\n", config.comment));
    out.push_str(&format!(
        "Testing command:\t{:?}\n",
        runner::command_line(config)
    ));
    out
}

/// Final line of every invocation.
pub fn format_verdict(success: bool) -> String {
    if success {
        "...TEST SUCCEEDED"
            .if_supports_color(Stream::Stdout, |s| s.green())
            .to_string()
    } else {
        "...TEST FAILED"
            .if_supports_color(Stream::Stdout, |s| s.red())
            .to_string()
    }
}

pub fn format_json(record: &RunRecord) -> Result<String> {
    serde_json::to_string_pretty(record).map_err(|err| anyhow!("failed to serialise run record: {}", err))
}

pub fn write_record(path: &Path, record: &RunRecord) -> Result<()> {
    let json = format_json(record)?;
    std::fs::write(path, json + "\n")
        .map_err(|err| anyhow!("failed to write run record to {}: {}", path.display(), err))?;
    log::info!("wrote run record to {}", path.display());
    Ok(())
}
