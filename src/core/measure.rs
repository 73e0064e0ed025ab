use std::time::{Duration, Instant};

use serde::Serialize;
use subprocess::{Exec, ExitStatus, NullFile};
use thiserror::Error;
use tracing::{debug, trace};

use super::{serialize_seconds, ActivationEnv};

#[derive(Debug, Error)]
pub(crate) enum MeasureError {
    #[error("No command given to measure")]
    EmptyCommand,
    #[error("At least one measured run is required")]
    NoRuns,
    #[error("Command '{0}' failed with {1:?} on run {2}")]
    CommandFailed(String, ExitStatus, usize),
    #[error("Failed due to unexpected sub process error")]
    Popen(#[from] subprocess::PopenError),
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct Measurement {
    pub command: Vec<String>,
    pub warmup_runs: usize,
    #[serde(serialize_with = "serialize_samples")]
    pub samples: Vec<Duration>,
    pub stats: DurationStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub(crate) struct DurationStats {
    pub runs: usize,
    #[serde(serialize_with = "serialize_seconds")]
    pub min: Duration,
    #[serde(serialize_with = "serialize_seconds")]
    pub max: Duration,
    #[serde(serialize_with = "serialize_seconds")]
    pub mean: Duration,
    #[serde(serialize_with = "serialize_seconds")]
    pub median: Duration,
}

fn serialize_samples<S>(samples: &[Duration], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_seq(samples.iter().map(|sample| sample.as_secs_f64()))
}

impl DurationStats {
    pub fn from_samples(samples: &[Duration]) -> Option<DurationStats> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort();
        let runs = sorted.len();
        let total: Duration = sorted.iter().sum();
        let median = if runs % 2 == 0 {
            (sorted[runs / 2 - 1] + sorted[runs / 2]) / 2
        } else {
            sorted[runs / 2]
        };
        Some(DurationStats {
            runs,
            min: sorted[0],
            max: sorted[runs - 1],
            mean: total / runs as u32,
            median,
        })
    }
}

/// Runs `command` inside the activated environment `warmup + runs` times and
/// records the wall clock time of the measured runs.
pub(crate) fn measure_command(
    activation: &ActivationEnv,
    command: &[String],
    runs: usize,
    warmup: usize,
) -> Result<Measurement, MeasureError> {
    let (program, args) = command.split_first().ok_or(MeasureError::EmptyCommand)?;
    if runs == 0 {
        return Err(MeasureError::NoRuns);
    }
    let build = || {
        activation
            .apply(Exec::cmd(program).args(args))
            .stdin(NullFile)
            .stdout(NullFile)
            .stderr(NullFile)
    };
    let cmdline = command.join(" ");
    let mut samples = Vec::with_capacity(runs);
    for run in 0..warmup + runs {
        let cmd = build();
        trace!("Executing command: {}", cmd.to_cmdline_lossy());
        let start = Instant::now();
        let exit_status = cmd.join()?;
        let elapsed = start.elapsed();
        if !exit_status.success() {
            return Err(MeasureError::CommandFailed(cmdline, exit_status, run + 1));
        }
        if run < warmup {
            debug!("Warmup run {} took {:.3}s", run + 1, elapsed.as_secs_f64());
        } else {
            debug!(target: "perf", "Run {} took {:.3}s", run + 1 - warmup, elapsed.as_secs_f64());
            samples.push(elapsed);
        }
    }
    let stats = DurationStats::from_samples(&samples).ok_or(MeasureError::NoRuns)?;
    Ok(Measurement {
        command: command.to_vec(),
        warmup_runs: warmup,
        samples,
        stats,
    })
}
