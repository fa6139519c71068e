//! Pipeline metrics
//!
//! Counters and histograms for cache decisions and stage executions, plus an
//! in-memory aggregator used for end-of-run summaries.

use std::collections::BTreeMap;

use contracts::{CacheDecision, StageName};
use metrics::{counter, histogram};

/// Terminal status of a stage, as exported in metric labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Skipped,
    Ran,
    Failed,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Ran => "ran",
            Self::Failed => "failed",
        }
    }
}

/// Record one artifact cache decision
pub fn record_cache_decision(decision: CacheDecision) {
    counter!(
        "face_pipeline_cache_decisions_total",
        "decision" => decision.as_str()
    )
    .increment(1);
}

/// Record an artifact discarded before regeneration
pub fn record_artifact_discarded(stage: StageName) {
    counter!(
        "face_pipeline_artifacts_discarded_total",
        "stage" => stage.as_str()
    )
    .increment(1);
}

/// Record the terminal status of a stage
pub fn record_stage_outcome(stage: StageName, status: StageStatus) {
    counter!(
        "face_pipeline_stage_runs_total",
        "stage" => stage.as_str(),
        "status" => status.as_str()
    )
    .increment(1);
}

/// Record wall-clock duration of a stage operation
pub fn record_stage_duration(stage: StageName, seconds: f64) {
    histogram!(
        "face_pipeline_stage_duration_seconds",
        "stage" => stage.as_str()
    )
    .record(seconds);
}

/// Stage metrics aggregator
///
/// Aggregates per-run statistics in memory for summaries.
#[derive(Debug, Clone, Default)]
pub struct StageMetricsAggregator {
    /// Stages skipped because every output was fresh
    pub skipped: u64,

    /// Stages whose operation ran successfully
    pub ran: u64,

    /// Stages that failed
    pub failed: u64,

    /// Artifacts discarded before regeneration
    pub discarded: u64,

    /// Operation durations (seconds)
    pub duration_stats: RunningStats,

    /// Duration per stage (seconds)
    pub stage_durations: BTreeMap<StageName, f64>,
}

impl StageMetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update with one stage result
    pub fn update(&mut self, stage: StageName, status: StageStatus, seconds: Option<f64>) {
        match status {
            StageStatus::Skipped => self.skipped += 1,
            StageStatus::Ran => self.ran += 1,
            StageStatus::Failed => self.failed += 1,
        }

        if let Some(seconds) = seconds {
            self.duration_stats.push(seconds);
            self.stage_durations.insert(stage, seconds);
        }
    }

    pub fn add_discarded(&mut self, count: u64) {
        self.discarded += count;
    }

    /// Generate summary report
    pub fn summary(&self) -> MetricsSummary {
        let total = self.skipped + self.ran + self.failed;
        MetricsSummary {
            total_stages: total,
            skipped: self.skipped,
            ran: self.ran,
            failed: self.failed,
            discarded: self.discarded,
            reuse_rate: if total > 0 {
                self.skipped as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            duration_secs: StatsSummary::from(&self.duration_stats),
        }
    }
}

/// Metrics summary
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_stages: u64,
    pub skipped: u64,
    pub ran: u64,
    pub failed: u64,
    pub discarded: u64,
    pub reuse_rate: f64,
    pub duration_secs: StatsSummary,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Stage Metrics Summary ===")?;
        writeln!(f, "Total stages: {}", self.total_stages)?;
        writeln!(
            f,
            "Reused (fresh): {} ({:.2}%)",
            self.skipped, self.reuse_rate
        )?;
        writeln!(f, "Executed: {}", self.ran)?;
        writeln!(f, "Failed: {}", self.failed)?;
        writeln!(f, "Discarded artifacts: {}", self.discarded)?;
        writeln!(f, "Stage duration (s): {}", self.duration_secs)?;
        Ok(())
    }
}

/// Statistics summary
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for value in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(value);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_update() {
        let mut aggregator = StageMetricsAggregator::new();
        aggregator.update(StageName::DetectFaces, StageStatus::Skipped, None);
        aggregator.update(StageName::DetectLandmarks, StageStatus::Ran, Some(1.5));
        aggregator.update(StageName::FitIdentity, StageStatus::Failed, Some(0.5));
        aggregator.add_discarded(2);

        assert_eq!(aggregator.skipped, 1);
        assert_eq!(aggregator.ran, 1);
        assert_eq!(aggregator.failed, 1);
        assert_eq!(aggregator.discarded, 2);
        assert_eq!(
            aggregator.stage_durations.get(&StageName::DetectLandmarks),
            Some(&1.5)
        );
        assert_eq!(aggregator.duration_stats.count(), 2);
    }

    #[test]
    fn test_summary_display() {
        let mut aggregator = StageMetricsAggregator::new();
        aggregator.update(StageName::DetectFaces, StageStatus::Skipped, None);
        aggregator.update(StageName::DetectLandmarks, StageStatus::Skipped, None);
        aggregator.update(StageName::FitIdentity, StageStatus::Ran, Some(2.0));
        aggregator.update(StageName::ShapeTexture, StageStatus::Ran, Some(4.0));

        let output = format!("{}", aggregator.summary());
        assert!(output.contains("Total stages: 4"));
        assert!(output.contains("50.00%"));
        assert!(output.contains("mean=3.000"));
    }

    #[test]
    fn test_recorders_without_installed_recorder_are_noops() {
        record_cache_decision(CacheDecision::Stale);
        record_stage_outcome(StageName::SmoothPose, StageStatus::Ran);
        record_stage_duration(StageName::SmoothPose, 0.1);
        record_artifact_discarded(StageName::SmoothPose);
    }
}
