//! Per-stage counters and the run report.

use calcal_core::StageLog;
use std::fmt;

#[cfg(feature = "serde")]
use serde::Serialize;

/// Counters accumulated by one calibration stage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct StageStats {
    /// Events successfully loaded.
    pub events_read: usize,
    /// Entries the source failed to decode (skipped).
    pub read_failures: usize,
    /// Crystal hits examined.
    pub hits_seen: usize,
    /// Hits that contributed to an accumulator.
    pub hits_used: usize,
    /// Hits skipped for missing inputs (no pedestal, missing readout).
    pub bad_hits: usize,
    /// Hits in towers outside the active set.
    pub foreign_hits: usize,
    /// Per-sample data-quality faults skipped.
    pub soft_faults: usize,
    /// Channels that fell back or were left without a value.
    pub skipped_channels: usize,
    /// Tracks passing selection.
    pub tracks_good: usize,
    /// Good tracks rejected by later geometric cuts.
    pub tracks_rejected: usize,
}

impl StageStats {
    /// Logs the counters as one summary record.
    pub fn log_summary(&self, log: &StageLog<'_>) {
        log.info(format_args!("{self}"));
    }
}

impl fmt::Display for StageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "events={} read_failures={} hits={} used={} bad_hits={} foreign={} soft_faults={} \
             skipped_channels={} tracks_good={} tracks_rejected={}",
            self.events_read,
            self.read_failures,
            self.hits_seen,
            self.hits_used,
            self.bad_hits,
            self.foreign_hits,
            self.soft_faults,
            self.skipped_channels,
            self.tracks_good,
            self.tracks_rejected
        )
    }
}

/// Counters of every stage that ran, in execution order.
///
/// A stage that aborted still contributes the counters it reached and is
/// named in `failed`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PipelineReport {
    /// `(stage name, counters)` pairs.
    pub stages: Vec<(&'static str, StageStats)>,
    /// Stage the run aborted in.
    pub failed: Option<&'static str>,
}

impl PipelineReport {
    /// Appends a stage's counters.
    pub fn push(&mut self, stage: &'static str, stats: StageStats) {
        self.stages.push((stage, stats));
    }

    /// Appends the partial counters of a stage that aborted.
    pub fn push_failed(&mut self, stage: &'static str, stats: StageStats) {
        self.stages.push((stage, stats));
        self.failed = Some(stage);
    }

    /// Counters of a named stage.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageStats> {
        self.stages
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, s)| s)
    }

    /// Sum of bad hits over all stages.
    #[must_use]
    pub fn total_bad_hits(&self) -> usize {
        self.stages.iter().map(|(_, s)| s.bad_hits).sum()
    }

    /// Sum of soft faults over all stages.
    #[must_use]
    pub fn total_soft_faults(&self) -> usize {
        self.stages.iter().map(|(_, s)| s.soft_faults).sum()
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, stats) in &self.stages {
            write!(f, "{name:<16} {stats}")?;
            if self.failed == Some(*name) {
                write!(f, " FAILED")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
