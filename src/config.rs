use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::Parser;
use serde::Deserialize;

use crate::dataset;
use crate::errors::BenchError;
use crate::waiter;

pub const DEFAULT_RUNS: u32 = 3;
pub const DEFAULT_ANALYZER: &str = "percolator";
/// Written by the analyzer through `-X`, removed after every run.
pub const DEFAULT_TEMP_FILE: &str = "tempPOut.xml";
const APP_DIR: &str = "perc-bench";

#[derive(Parser, Debug)]
#[command(
    name = "perc-bench",
    version,
    about = "Measure speed of the Percolator application."
)]
pub struct BenchArgs {
    /// Path to input-data used by percolator
    #[arg(short, long, default_value = "", hide_default_value = true)]
    pub data: String,

    /// Number of tests to evaluate
    #[arg(short, long, default_value_t = DEFAULT_RUNS, value_parser = clap::value_parser!(u32).range(1..))]
    pub runs: u32,

    /// Flags to use with the executable
    #[arg(short, long, default_value = "", hide_default_value = true, allow_hyphen_values = true)]
    pub flags: String,

    /// Wait for other processes running this harness to finish before starting
    #[arg(short, long = "await_tests", visible_alias = "await-tests")]
    pub await_tests: bool,

    /// Other test PIDs to wait for before starting test(s)
    #[arg(short = 'p', long = "processes", num_args = 1.., value_parser = clap::value_parser!(u32).range(1..))]
    pub processes: Vec<u32>,

    /// Comments regarding test details
    #[arg(short, long, default_value = "", hide_default_value = true)]
    pub comments: String,

    /// Analyzer binary to benchmark
    #[arg(long, env = "PERC_BENCH_ANALYZER")]
    pub analyzer: Option<PathBuf>,

    /// Directory the reference dataset is downloaded and extracted into
    #[arg(long, env = "PERC_BENCH_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, env = "PERC_BENCH_DATASET_URL", hide = true)]
    pub dataset_url: Option<String>,

    /// Settings file (TOML)
    #[arg(long, env = "PERC_BENCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write samples and statistics as JSON to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Optional overrides read from `config.toml`.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub analyzer: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub dataset_url: Option<String>,
    pub temp_file: Option<PathBuf>,
    pub download_timeout_secs: Option<u64>,
    pub download_body_timeout_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
}

impl Settings {
    /// Load the named settings file, or the default one if it exists.
    ///
    /// A missing default file yields empty settings; a missing named file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match default_settings_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| anyhow!("failed to read settings file {}: {}", path.display(), err))?;
        let settings = toml::from_str(&text)
            .map_err(|err| anyhow!("invalid settings file {}: {}", path.display(), err))?;
        log::debug!("loaded settings from {}", path.display());
        Ok(settings)
    }
}

pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolved configuration threaded through every stage of a benchmark.
#[derive(Debug, Clone)]
pub struct Config {
    /// `None` until the default dataset has been resolved.
    pub data_path: Option<PathBuf>,
    pub runs: u32,
    pub flags: String,
    pub await_tests: bool,
    pub await_pids: Vec<u32>,
    pub comment: String,
    pub analyzer: PathBuf,
    pub data_dir: PathBuf,
    pub dataset_url: String,
    pub download_timeout: Duration,
    /// Total budget for receiving the dataset archive once headers arrived.
    pub download_body_timeout: Duration,
    pub poll_interval: Duration,
    pub temp_file: PathBuf,
    pub output: Option<PathBuf>,
}

impl Config {
    pub fn new(analyzer: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_path: None,
            runs: DEFAULT_RUNS,
            flags: String::new(),
            await_tests: false,
            await_pids: Vec::new(),
            comment: String::new(),
            analyzer: analyzer.into(),
            data_dir: data_dir.into(),
            dataset_url: dataset::DATASET_URL.to_string(),
            download_timeout: dataset::DOWNLOAD_TIMEOUT,
            download_body_timeout: dataset::DOWNLOAD_BODY_TIMEOUT,
            poll_interval: waiter::POLL_INTERVAL,
            temp_file: PathBuf::from(DEFAULT_TEMP_FILE),
            output: None,
        }
    }

    /// Combine command-line arguments with settings. Arguments (and their
    /// environment variables) win over settings, settings over defaults.
    pub fn from_args(args: BenchArgs, settings: Settings) -> Result<Self, BenchError> {
        let analyzer = args
            .analyzer
            .or(settings.analyzer)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ANALYZER));
        let data_dir = args
            .data_dir
            .or(settings.data_dir)
            .unwrap_or_else(default_data_dir);

        let mut config = Self::new(analyzer, data_dir);
        config.data_path = if args.data.is_empty() {
            None
        } else {
            Some(PathBuf::from(args.data))
        };
        config.runs = args.runs;
        config.flags = args.flags;
        config.await_tests = args.await_tests;
        config.await_pids = args.processes;
        config.comment = args.comments;
        config.output = args.output;

        if let Some(url) = args.dataset_url.or(settings.dataset_url) {
            config.dataset_url = url;
        }
        if let Some(temp_file) = settings.temp_file {
            config.temp_file = temp_file;
        }
        if let Some(secs) = settings.download_timeout_secs {
            config.download_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = settings.download_body_timeout_secs {
            config.download_body_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = settings.poll_interval_secs {
            config.poll_interval = Duration::from_secs(secs);
        }

        config.validate()?;
        log::debug!("resolved configuration: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BenchError> {
        if self.runs == 0 {
            return Err(BenchError::InvalidRunCount);
        }
        if let Some(&pid) = self.await_pids.iter().find(|&&pid| pid == 0) {
            return Err(BenchError::InvalidPid { pid });
        }
        Ok(())
    }
}
