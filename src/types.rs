use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One (CPU seconds, wall seconds) measurement from a single analyzer run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunSample {
    pub cpu_seconds: f64,
    pub wall_seconds: f64,
}

impl RunSample {
    pub fn new(cpu_seconds: f64, wall_seconds: f64) -> Self {
        Self {
            cpu_seconds,
            wall_seconds,
        }
    }
}

/// Aggregates derived from a series of samples. Recomputed on every report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateStats {
    pub count: usize,
    pub total_cpu: f64,
    pub total_wall: f64,
    pub min_cpu: f64,
    pub min_wall: f64,
    pub max_cpu: f64,
    pub max_wall: f64,
    pub mean_cpu: f64,
    pub mean_wall: f64,
}

/// Everything written to the `--output` JSON file.
#[derive(Debug, Serialize)]
pub struct RunRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub analyzer: PathBuf,
    pub data_path: Option<PathBuf>,
    pub flags: String,
    pub comment: String,
    pub samples: Vec<RunSample>,
    pub stats: AggregateStats,
}
