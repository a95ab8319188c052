//! Scheduler issue slot utilization.

use kerneldiag::{
    Finding, FocusMetric, MetricRequest, Rule, RuleContext, RuleId, RuleInfo, RuleOutput,
    RuleResult, Severity, Speedup, Weight,
};

use super::{section, sol_bottleneck};

pub const ID: &str = "IssueSlotUtilization";

pub(crate) const ISSUE_ACTIVE: &str = "smsp__issue_active.avg.per_cycle_active";
const THEORETICAL_WARPS: &str = "smsp__maximum_warps_avg_per_active_cycle";
const ACTIVE_WARPS: &str = "smsp__warps_active.avg.per_cycle_active";
const ELIGIBLE_WARPS: &str = "smsp__warps_eligible.avg.per_cycle_active";
const MAX_WARPS: &str = "smsp__warps_active.avg.peak_sustained";

const ISSUE_ACTIVE_THRESHOLD: f64 = 0.6;
const ACTIVE_WARPS_RATIO_THRESHOLD: f64 = 0.8;

/// Flags schedulers that issue an instruction in too few cycles.
///
/// Forwards its parents' weights and, when it fires, the estimated gain as
/// `issue_slot_speedup` so the latency rules below it can bound their
/// estimates.
#[derive(Debug, Clone, Copy, Default)]
pub struct IssueSlotUtilization;

impl IssueSlotUtilization {
    pub fn new() -> Self {
        IssueSlotUtilization
    }
}

impl Rule for IssueSlotUtilization {
    fn identifier(&self) -> RuleId {
        RuleId::new(ID)
    }

    fn info(&self) -> RuleInfo {
        RuleInfo::new("Issue Slots")
            .with_description("Scheduler instruction issue analysis")
            .with_section(section::SCHEDULER_STATS)
    }

    fn parent_identifiers(&self) -> Vec<RuleId> {
        vec![RuleId::new(sol_bottleneck::ID)]
    }

    fn metric_requests(&self) -> Vec<MetricRequest> {
        vec![
            MetricRequest::new(ISSUE_ACTIVE).alias("issue_active"),
            MetricRequest::new(THEORETICAL_WARPS).alias("theoretical_warps"),
            MetricRequest::new(ACTIVE_WARPS).alias("active_warps"),
            MetricRequest::new(ELIGIBLE_WARPS).alias("eligible_warps"),
            MetricRequest::new(MAX_WARPS).alias("max_warps"),
        ]
    }

    fn apply(&self, ctx: &RuleContext<'_>) -> RuleResult<RuleOutput> {
        let metrics = ctx.metrics();
        let issue_active = metrics.f64("issue_active")?;
        let theoretical_warps = metrics.f64("theoretical_warps")?;
        let active_warps = metrics.f64("active_warps")?;
        let eligible_warps = metrics.f64("eligible_warps")?;
        let max_warps = metrics.f64("max_warps")?;

        let mut weights = ctx.parent_weights().merged();
        let mut output = RuleOutput::new();

        if issue_active < ISSUE_ACTIVE_THRESHOLD {
            let cycles_per_issue = if issue_active > 0.0 {
                format!("{:.1}", 1.0 / issue_active)
            } else {
                "infinitely many".to_string()
            };
            let mut body = format!(
                "Every scheduler can issue one instruction per cycle, but this kernel only \
                 issues an instruction every {} cycles, which may leave hardware resources \
                 underused. Each scheduler holds at most {:.0} warps, of which this kernel \
                 allocates an average of {:.2} active warps per scheduler",
                cycles_per_issue, max_warps, active_warps
            );
            if active_warps < 1.0 {
                body.push_str(
                    ", which already leaves the scheduler less than one warp to issue from.",
                );
            } else {
                body.push_str(&format!(
                    ", yet only {:.2} are eligible per cycle. Eligible warps are the subset of \
                     active warps ready to issue; a cycle without any is skipped.",
                    eligible_warps
                ));
                if theoretical_warps > 0.0
                    && active_warps / theoretical_warps < ACTIVE_WARPS_RATIO_THRESHOLD
                {
                    body.push_str(
                        " To raise the number of eligible warps, reduce the time active warps \
                         spend stalled; the Warp State Statistics and Source Counters sections \
                         break the stalls down by reason.",
                    );
                } else {
                    body.push_str(
                        " To raise the number of eligible warps, avoid load imbalance from \
                         warps with very different execution times. Reducing the stalls shown \
                         in the Warp State Statistics and Source Counters sections helps too.",
                    );
                }
            }

            let cap = ctx.parent_weights().max_throughput().map(|m| 1.0 - m);
            let speedup = Speedup::local_capped(1.0 - issue_active, cap);
            weights.known.issue_slot_speedup = Some(Weight::new(speedup.fraction()));

            output.push(
                Finding::optimization(body)
                    .with_title("Issue Slot Utilization")
                    .with_speedup(speedup)
                    .with_focus_metric(FocusMetric::new(
                        ISSUE_ACTIVE,
                        issue_active,
                        Severity::Default,
                        format!(
                            "Increase the issue rate towards one instruction per cycle, \
                             currently {:.2} < {:.2}",
                            issue_active, ISSUE_ACTIVE_THRESHOLD
                        ),
                    )),
            );
        }

        Ok(output.with_child_weights(weights))
    }
}
