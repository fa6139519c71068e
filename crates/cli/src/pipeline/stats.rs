//! Run statistics.

use observability::{StageMetricsAggregator, StageStatus};
use stage_executor::{PipelineReport, StageState};

/// Statistics from one CLI run
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub report: PipelineReport,
    pub metrics: StageMetricsAggregator,
}

impl RunStats {
    pub fn from_report(report: PipelineReport) -> Self {
        let mut metrics = StageMetricsAggregator::new();
        for record in &report.stages {
            let status = match record.state() {
                StageState::SkippedFresh => StageStatus::Skipped,
                StageState::Done => StageStatus::Ran,
                _ => StageStatus::Failed,
            };
            metrics.update(record.stage, status, record.elapsed_secs);
            metrics.add_discarded(record.discarded as u64);
        }
        Self { report, metrics }
    }

    /// Print the stage table and the aggregated metrics
    pub fn print_summary(&self) {
        println!("\n=== Stages ===\n");
        println!("{}", self.report);
        println!();
        print!("{}", self.metrics.summary());
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_has_no_stages() {
        let stats = RunStats::from_report(PipelineReport::default());
        assert_eq!(stats.metrics.summary().total_stages, 0);
    }
}
