use std::time::Duration;

use serde::Serialize;

use crate::trace::{Event, EventId};

/// A backend error reported for one replayed event.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub index: EventId,
    pub event: Event,
    pub error: String,
}

/// Outcome of one replay run.
#[derive(Serialize, Debug, Clone)]
pub struct ReplayReport {
    pub events: u32,
    pub elapsed: Duration,
    /// Highest number of operations in flight at once.
    pub peak_in_flight: usize,
    /// Descriptors the trace opened and never closed.
    pub open_descriptors: usize,
    pub failures: Vec<Failure>,
}

impl ReplayReport {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Elapsed-time statistics over repeated runs of one trace.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub runs: usize,
    pub min: Duration,
    pub mean: Duration,
    pub max: Duration,
}

impl Summary {
    pub fn from_reports(reports: &[ReplayReport]) -> Option<Self> {
        let times = reports.iter().map(|report| report.elapsed);
        let min = times.clone().min()?;
        let max = times.clone().max()?;
        let total: Duration = times.sum();
        Some(Self {
            runs: reports.len(),
            min,
            mean: total / reports.len() as u32,
            max,
        })
    }
}
