//! High-level bottleneck detection from compute and memory throughput.

use kerneldiag::{
    Finding, FocusMetric, KnownWeights, MetricRequest, Rule, RuleContext, RuleId, RuleInfo,
    RuleOutput, RuleResult, Severity, Value, Weight, Weights,
};

use super::section;

pub const ID: &str = "SOLBottleneck";

const NUM_WAVES: &str = "launch__waves_per_multiprocessor";
const SM_THROUGHPUT: &str = "sm__throughput.avg.pct_of_peak_sustained_elapsed";
const MEM_THROUGHPUT: &str = "gpu__compute_memory_throughput.avg.pct_of_peak_sustained_elapsed";
const MEM_BREAKDOWN: &str =
    "breakdown:gpu__compute_memory_throughput.avg.pct_of_peak_sustained_elapsed";

const BALANCED_THRESHOLD: f64 = 10.0;
const LATENCY_BOUND_THRESHOLD: f64 = 60.0;
const NO_BOUND_THRESHOLD: f64 = 80.0;
const WAVES_THRESHOLD: f64 = 1.0;

/// Classifies the kernel as latency, compute, memory or throughput bound and
/// publishes the normalized throughputs every other rule scales against.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolBottleneck;

impl SolBottleneck {
    pub fn new() -> Self {
        SolBottleneck
    }

    /// Memory unit with the highest throughput, resolved from the metric
    /// names listed in the breakdown metric.
    fn busiest_memory_unit(ctx: &RuleContext<'_>) -> RuleResult<Option<&'static str>> {
        let Some(list) = ctx
            .metrics()
            .metric("breakdown_memory")
            .and_then(|m| m.value().as_str())
        else {
            return Ok(None);
        };

        let requests: Vec<MetricRequest> = list
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| MetricRequest::new(name).optional_without_fallback())
            .collect();
        let breakdown = ctx.resolve(&requests)?;

        let mut busiest: Option<(&str, f64)> = None;
        for entry in breakdown.iter() {
            if let Some(value) = entry.metric.value().and_then(Value::as_f64) {
                if value > busiest.map_or(0.0, |(_, v)| v) {
                    busiest = Some((entry.name.as_str(), value));
                }
            }
        }
        Ok(busiest.and_then(|(name, _)| memory_unit(name)))
    }
}

fn memory_unit(metric_name: &str) -> Option<&'static str> {
    const UNITS: [(&str, &str); 6] = [
        ("dram", "DRAM"),
        ("l1tex", "L1"),
        ("lts", "L2"),
        ("ltc", "L2"),
        ("fbpa", "DRAM"),
        ("fbp", "DRAM"),
    ];
    UNITS
        .iter()
        .find(|(prefix, _)| metric_name.starts_with(prefix))
        .map(|(_, unit)| *unit)
}

impl Rule for SolBottleneck {
    fn identifier(&self) -> RuleId {
        RuleId::new(ID)
    }

    fn info(&self) -> RuleInfo {
        RuleInfo::new("Bottleneck")
            .with_description("High-level bottleneck detection")
            .with_section(section::SPEED_OF_LIGHT)
    }

    fn metric_requests(&self) -> Vec<MetricRequest> {
        vec![
            MetricRequest::new(NUM_WAVES).alias("num_waves"),
            MetricRequest::new(SM_THROUGHPUT).alias("sm_sol_pct"),
            MetricRequest::new(MEM_THROUGHPUT).alias("mem_sol_pct"),
            MetricRequest::new(MEM_BREAKDOWN)
                .alias("breakdown_memory")
                .optional_without_fallback(),
        ]
    }

    fn apply(&self, ctx: &RuleContext<'_>) -> RuleResult<RuleOutput> {
        let metrics = ctx.metrics();
        let num_waves = metrics.f64("num_waves")?;
        let sm = metrics.f64("sm_sol_pct")?;
        let mem = metrics.f64("mem_sol_pct")?;

        let busiest_section = if sm >= mem {
            "Compute Workload Analysis"
        } else {
            "Memory Workload Analysis"
        };

        let finding = if sm < NO_BOUND_THRESHOLD && mem < NO_BOUND_THRESHOLD {
            if sm < LATENCY_BOUND_THRESHOLD && mem < LATENCY_BOUND_THRESHOLD {
                if num_waves < WAVES_THRESHOLD {
                    Finding::optimization(format!(
                        "The grid of this kernel is too small to fill the device: it only \
                         amounts to {:.1} full waves across all SMs. See the Launch \
                         Statistics section for details.",
                        num_waves
                    ))
                    .with_title("Small Grid")
                    .with_focus_metric(FocusMetric::new(
                        NUM_WAVES,
                        num_waves,
                        Severity::High,
                        format!("{:.3} < {:.3}", num_waves, WAVES_THRESHOLD),
                    ))
                } else {
                    Finding::optimization(format!(
                        "Both compute throughput and memory bandwidth are low relative to the \
                         peak of this device. Throughput below {:.1}% of peak usually points \
                         to latency issues; the Scheduler Statistics and Warp State \
                         Statistics sections show likely causes.",
                        LATENCY_BOUND_THRESHOLD
                    ))
                    .with_title("Latency Issue")
                    .with_focus_metric(FocusMetric::new(
                        SM_THROUGHPUT,
                        sm,
                        Severity::High,
                        format!("{:.3} < {:.3}", sm, NO_BOUND_THRESHOLD),
                    ))
                    .with_focus_metric(FocusMetric::new(
                        MEM_THROUGHPUT,
                        mem,
                        Severity::High,
                        format!("{:.3} < {:.3}", mem, NO_BOUND_THRESHOLD),
                    ))
                }
            } else if (sm - mem).abs() >= BALANCED_THRESHOLD {
                if sm > mem {
                    Finding::optimization(format!(
                        "Compute is utilized more heavily than memory. The {} section shows \
                         what the compute pipelines spend their time on. Check whether some \
                         computation is redundant or could be replaced by look-up tables.",
                        busiest_section
                    ))
                    .with_title("High Compute Throughput")
                    .with_focus_metric(FocusMetric::new(
                        SM_THROUGHPUT,
                        sm,
                        Severity::Low,
                        format!("{:.3} - {:.3} >= {:.3}", sm, mem, BALANCED_THRESHOLD),
                    ))
                } else {
                    let target = match Self::busiest_memory_unit(ctx)? {
                        Some(unit) => format!("to identify the {} bottleneck", unit),
                        None => "to locate the memory system bottleneck".to_string(),
                    };
                    Finding::optimization(format!(
                        "Memory is utilized more heavily than compute. Use the {} section {}. \
                         Check memory replay (coalescing) metrics to make sure transferred \
                         bytes are used efficiently, and consider doing more work per memory \
                         access (kernel fusion) or recomputing values.",
                        busiest_section, target
                    ))
                    .with_title("High Memory Throughput")
                    .with_focus_metric(FocusMetric::new(
                        MEM_THROUGHPUT,
                        mem,
                        Severity::Low,
                        format!("{:.3} - {:.3} >= {:.3}", mem, sm, BALANCED_THRESHOLD),
                    ))
                }
            } else {
                Finding::ok(
                    "Compute and memory are well balanced. Reducing runtime requires reducing \
                     both computation and memory traffic; check the Compute Workload Analysis \
                     and Memory Workload Analysis sections.",
                )
                .with_title("Balanced Throughput")
            }
        } else {
            let unit = if mem > sm {
                Self::busiest_memory_unit(ctx)?
            } else {
                None
            };
            Finding::ok(format!(
                "The kernel uses more than {:.1}% of the compute or memory performance of the \
                 device. Further gains likely require shifting work from the most utilized \
                 unit to another one. Start by analyzing {} in the {} section.",
                NO_BOUND_THRESHOLD,
                unit.unwrap_or("workloads"),
                busiest_section
            ))
            .with_title("High Throughput")
        };

        let weights = Weights::with_known(KnownWeights {
            compute_throughput: Some(Weight::new(sm / 100.0)),
            memory_throughput: Some(Weight::new(mem / 100.0)),
            max_throughput: Some(Weight::new(sm.max(mem) / 100.0)),
            issue_slot_speedup: None,
        });

        Ok(RuleOutput::new()
            .with_finding(finding)
            .with_child_weights(weights))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_unit_prefixes() {
        assert_eq!(memory_unit("dram__throughput.avg.pct"), Some("DRAM"));
        assert_eq!(memory_unit("lts__t_sectors.avg.pct"), Some("L2"));
        assert_eq!(memory_unit("l1tex__data_pipe.avg.pct"), Some("L1"));
        assert_eq!(memory_unit("fbpa__throughput.avg.pct"), Some("DRAM"));
        assert_eq!(memory_unit("gpu__time_duration"), None);
    }
}
