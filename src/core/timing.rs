use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct StepTiming {
    pub label: String,
    #[serde(rename = "seconds", serialize_with = "serialize_seconds")]
    pub duration: Duration,
}

pub(crate) fn serialize_seconds<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(value.as_secs_f64())
}

/// Times a unit of work and reports it on the `perf` log target.
pub(crate) struct PerformanceMonitor {
    label: String,
    start: Instant,
}

impl PerformanceMonitor {
    pub fn start(label: impl Into<String>) -> PerformanceMonitor {
        let label = label.into();
        debug!(target: "perf", "{} started", label);
        PerformanceMonitor {
            label,
            start: Instant::now(),
        }
    }

    pub fn finish(self) -> StepTiming {
        let duration = self.start.elapsed();
        debug!(target: "perf", "{} took {:.3}s", self.label, duration.as_secs_f64());
        StepTiming {
            label: self.label,
            duration,
        }
    }
}

pub(crate) fn total_duration(timings: &[StepTiming]) -> Duration {
    timings.iter().map(|timing| timing.duration).sum()
}
