//! Benchmark phase metrics, appended as JSON lines.

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub output: Option<PathBuf>,
}

impl MetricsConfig {
    pub fn build_recorder(&self) -> io::Result<Option<MetricsRecorder>> {
        if !self.enabled {
            return Ok(None);
        }
        let path = self.output.as_ref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "metrics.output must be set when metrics are enabled",
            )
        })?;
        MetricsRecorder::create(path).map(Some)
    }
}

/// Appends one timestamped JSON object per event to the configured file.
pub struct MetricsRecorder {
    writer: Mutex<BufWriter<File>>,
}

impl MetricsRecorder {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            writer: Mutex::new(BufWriter::new(File::create(path)?)),
        })
    }

    /// Best-effort: a failed write is reported on stderr, never fatal.
    pub fn emit(&self, event: MetricsEvent<'_>) {
        let envelope = EventEnvelope {
            timestamp_ms: now_millis(),
            event,
        };
        let mut guard = self.writer.lock().expect("metrics writer poisoned");
        let outcome = serde_json::to_writer(&mut *guard, &envelope)
            .map_err(io::Error::from)
            .and_then(|_| guard.write_all(b"\n"))
            .and_then(|_| guard.flush());
        if let Err(err) = outcome {
            eprintln!("[metrics] failed to write event: {err}");
        }
    }
}

#[derive(Serialize)]
struct EventEnvelope<'a> {
    timestamp_ms: f64,
    #[serde(flatten)]
    event: MetricsEvent<'a>,
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MetricsEvent<'a> {
    RunStart {
        workers: usize,
        threads: usize,
        grid_nx: usize,
        grid_ny: usize,
        grid_nz: usize,
        npx: usize,
        npy: usize,
        npz: usize,
        max_iter: usize,
        tolerance: f64,
        algorithm: &'a str,
        preconditioned: bool,
    },
    ProblemGenerated {
        local_rows: usize,
        local_nonzeros: u64,
        total_nonzeros: i64,
        boundary_rows: usize,
        neighbors: usize,
        duration_ms: f64,
    },
    HaloReady {
        halo_columns: usize,
        neighbors: usize,
        duration_ms: f64,
    },
    SolveDone {
        iterations: usize,
        initial_residual: f64,
        final_residual: f64,
        converged: bool,
        duration_ms: f64,
        time_dot: f64,
        time_vector_update: f64,
        time_spmv: f64,
        time_allreduce: f64,
        time_preconditioner: f64,
    },
    RunDone {
        duration_ms: f64,
    },
}

fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}
