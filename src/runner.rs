use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::Config;
use crate::errors::{BenchError, TimingError};
use crate::types::RunSample;

/// Flag telling the analyzer where to write its XML output.
pub const OUTPUT_FLAG: &str = "-X";

static DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[+]?\d*\.\d+|\d+").expect("decimal pattern is valid"));

/// Arguments passed to the analyzer: `-X <temp_file> <data_path> <flags...>`.
///
/// Extra flags are split on whitespace; the data path is always one argument.
pub fn analyzer_args(config: &Config, data_path: &Path) -> Vec<OsString> {
    let mut args = vec![
        OsString::from(OUTPUT_FLAG),
        config.temp_file.clone().into_os_string(),
        data_path.as_os_str().to_owned(),
    ];
    args.extend(config.flags.split_whitespace().map(OsString::from));
    args
}

/// The full invocation as printable words, binary first.
pub fn command_line(config: &Config) -> Vec<String> {
    let data_path = config.data_path.as_deref().unwrap_or(Path::new(""));
    std::iter::once(config.analyzer.as_os_str().to_owned())
        .chain(analyzer_args(config, data_path))
        .filter(|word| !word.is_empty())
        .map(|word| word.to_string_lossy().into_owned())
        .collect()
}

/// Run the analyzer `config.runs` times, one after another, and collect a
/// timing sample from each run.
///
/// Any run whose timing cannot be read aborts the whole benchmark.
pub fn run_benchmark(config: &Config) -> Result<Vec<RunSample>, BenchError> {
    let data_path = config
        .data_path
        .as_deref()
        .ok_or(BenchError::DataPathUnresolved)?;

    let mut samples = Vec::with_capacity(config.runs as usize);
    for run in 1..=config.runs {
        let stderr = run_analyzer(config, data_path)?;
        remove_temp_file(&config.temp_file)?;
        let sample = parse_timing_line(&stderr).map_err(|source| BenchError::Timing { run, source })?;
        log::debug!("run {}: {:?}", run, sample);
        samples.push(sample);
    }
    Ok(samples)
}

/// Run the analyzer once to completion and return its stderr.
fn run_analyzer(config: &Config, data_path: &Path) -> Result<String, BenchError> {
    let args = analyzer_args(config, data_path);
    log::debug!("spawning {} {:?}", config.analyzer.display(), args);

    let child = Command::new(&config.analyzer)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| BenchError::AnalyzerSpawn {
            path: config.analyzer.clone(),
            source,
        })?;
    println!("Running subprocess: {}", child.id());

    let output = child
        .wait_with_output()
        .map_err(|source| BenchError::AnalyzerSpawn {
            path: config.analyzer.clone(),
            source,
        })?;
    if !output.status.success() {
        log::warn!("analyzer exited with {}", output.status);
    }

    Ok(String::from_utf8_lossy(&output.stderr).into_owned())
}

/// Remove the analyzer's output file. A file that was never written is fine.
pub fn remove_temp_file(path: &Path) -> Result<(), BenchError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(BenchError::TempFileCleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Extract a timing sample from the analyzer's stderr.
///
/// Takes the last non-empty line and reads the first two decimal numbers in
/// it as CPU seconds and wall-clock seconds. Further numbers are ignored.
pub fn parse_timing_line(stderr: &str) -> Result<RunSample, TimingError> {
    let line = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or(TimingError::NoOutput)?;

    let values = DECIMAL
        .find_iter(line)
        .take(2)
        .map(|token| {
            token
                .as_str()
                .parse::<f64>()
                .map_err(|_| TimingError::InvalidNumber {
                    line: line.to_string(),
                    token: token.as_str().to_string(),
                })
        })
        .collect::<Result<Vec<f64>, _>>()?;

    match values[..] {
        [cpu, wall] => Ok(RunSample::new(cpu, wall)),
        _ => Err(TimingError::MissingFields {
            line: line.to_string(),
            found: values.len(),
        }),
    }
}
