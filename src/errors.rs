use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum BenchError {
    #[error("Number of runs must be at least 1")]
    InvalidRunCount,

    #[error("Process id {pid} is not a valid PID to wait for")]
    InvalidPid { pid: u32 },

    #[error("No input data path resolved; the dataset has not been prepared")]
    DataPathUnresolved,

    #[error("Failed to start analyzer {path}: {source}")]
    AnalyzerSpawn {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read timing of run {run}: {source}")]
    Timing { run: u32, source: TimingError },

    #[error("Failed to remove temporary file {path}: {source}")]
    TempFileCleanup {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot compute statistics over zero runs")]
    EmptySeries,

    #[error("Failed to download test-data. {0}")]
    Dataset(#[from] DatasetError),
}

/// Why a dataset could not be made available locally.
#[derive(thiserror::Error, Debug)]
pub enum DatasetError {
    #[error("Timed out while downloading {url}")]
    Timeout { url: String },

    #[error("HTTP Error code: {code} ({url})")]
    HttpStatus { url: String, code: u16 },

    #[error("Reason: {reason} ({url})")]
    Network { url: String, reason: String },

    #[error("Could not write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not extract {path}: {source}")]
    Extract {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Archive was extracted but {path} is missing")]
    MissingAfterExtract { path: PathBuf },
}

/// Failure to scrape a timing pair out of the analyzer's stderr.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum TimingError {
    #[error("analyzer produced no diagnostic output")]
    NoOutput,

    #[error("expected CPU and wall seconds in last line {line:?}, found {found} value(s)")]
    MissingFields { line: String, found: usize },

    #[error("could not read {token:?} as a number in line {line:?}")]
    InvalidNumber { line: String, token: String },
}
