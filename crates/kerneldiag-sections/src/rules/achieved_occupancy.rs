//! Achieved versus theoretical occupancy.

use kerneldiag::{
    Combinator, Finding, FocusMetric, MetricRequest, Rule, RuleContext, RuleId, RuleInfo,
    RuleOutput, RuleResult, Severity, Speedup,
};

use super::{issue_slot_utilization, section, shortfall};

pub const ID: &str = "AchievedOccupancy";

const THEORETICAL_OCCUPANCY: &str = "sm__maximum_warps_per_active_cycle_pct";
const ACHIEVED_OCCUPANCY: &str = "sm__warps_active.avg.pct_of_peak_sustained_active";

/// Percentage points between theoretical and achieved occupancy above which
/// the gap is reported.
const OCCUPANCY_DIFFERENCE_THRESHOLD: f64 = 10.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct AchievedOccupancy;

impl AchievedOccupancy {
    pub fn new() -> Self {
        AchievedOccupancy
    }
}

impl Rule for AchievedOccupancy {
    fn identifier(&self) -> RuleId {
        RuleId::new(ID)
    }

    fn info(&self) -> RuleInfo {
        RuleInfo::new("Achieved Occupancy")
            .with_description("Analysis of occupancy warps")
            .with_section(section::OCCUPANCY)
    }

    fn parent_identifiers(&self) -> Vec<RuleId> {
        vec![RuleId::new(issue_slot_utilization::ID)]
    }

    fn metric_requests(&self) -> Vec<MetricRequest> {
        vec![
            MetricRequest::new(THEORETICAL_OCCUPANCY).alias("theoretical_occupancy"),
            MetricRequest::new(ACHIEVED_OCCUPANCY).alias("achieved_occupancy"),
        ]
    }

    fn apply(&self, ctx: &RuleContext<'_>) -> RuleResult<RuleOutput> {
        let metrics = ctx.metrics();
        let theoretical = metrics.f64("theoretical_occupancy")?;
        let achieved = metrics.f64("achieved_occupancy")?;

        let difference = theoretical - achieved;
        if difference <= OCCUPANCY_DIFFERENCE_THRESHOLD {
            return Ok(RuleOutput::new());
        }

        let speedup = Speedup::compose(
            shortfall(achieved, theoretical),
            ctx.parent_weights().issue_slot_speedup(),
            Combinator::Min,
        );

        let finding = Finding::optimization(format!(
            "The gap between the theoretical occupancy ({:.1}%) and the measured achieved \
             occupancy ({:.1}%) can come from warp scheduling overheads or from load \
             imbalance within or across blocks. See the CUDA Best Practices Guide for \
             techniques to optimize occupancy.",
            theoretical, achieved
        ))
        .with_title("Achieved Occupancy")
        .with_speedup(speedup)
        .with_focus_metric(FocusMetric::new(
            ACHIEVED_OCCUPANCY,
            achieved,
            Severity::High,
            format!(
                "Increase the achieved occupancy towards the theoretical {:.1}%",
                theoretical
            ),
        ));

        Ok(RuleOutput::new().with_finding(finding))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kerneldiag::{MemoryMetricStore, RuleRegistry, RuleScheduler, SpeedupType};

    fn report(theoretical: f64, achieved: f64) -> kerneldiag::AnalysisReport {
        let store = MemoryMetricStore::new()
            .with(THEORETICAL_OCCUPANCY, theoretical)
            .with(ACHIEVED_OCCUPANCY, achieved);
        let registry = RuleRegistry::new().with_rule(AchievedOccupancy::new()).unwrap();
        RuleScheduler::new().run(&registry, &store).unwrap()
    }

    #[test]
    fn test_gap_above_threshold_is_reported() {
        let report = report(100.0, 60.0);
        let finding = report.sink.findings_for(ID).next().unwrap();
        let speedup = finding.speedup.unwrap();
        assert_eq!(speedup.kind(), SpeedupType::Local);
        assert!((speedup.percent() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_small_gap_is_ignored() {
        let report = report(50.0, 45.0);
        assert_eq!(report.sink.findings_for(ID).count(), 0);
    }
}
