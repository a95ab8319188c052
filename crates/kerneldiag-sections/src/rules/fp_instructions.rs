//! Fused versus non-fused floating-point instruction mix.

use std::collections::BTreeMap;

use kerneldiag::{
    Combinator, Finding, FocusMetric, MetricRequest, Rule, RuleContext, RuleId, RuleInfo,
    RuleOutput, RuleResult, Severity, Speedup,
};
use tracing::debug;

use super::{section, sol_bottleneck};

pub const ID: &str = "FPInstructions";

const INST_PER_OPCODE: &str = "sass__inst_executed_per_opcode";

/// Non-fused share (halved) above which a precision is reported.
const NON_FUSED_RATIO_THRESHOLD: f64 = 0.1;

struct Precision {
    bits: u32,
    non_fused: [&'static str; 2],
    fused: &'static str,
}

const PRECISIONS: [Precision; 2] = [
    Precision {
        bits: 32,
        non_fused: ["FADD", "FMUL"],
        fused: "FFMA",
    },
    Precision {
        bits: 64,
        non_fused: ["DADD", "DMUL"],
        fused: "DFMA",
    },
];

impl Precision {
    /// Ad hoc weight a pipeline rule may publish with the utilization of
    /// this precision's pipeline, as a fraction of peak.
    fn pipe_weight(&self) -> String {
        format!("fp{}_pipe_utilization", self.bits)
    }
}

/// Estimate for replacing non-fused instructions by fused ones, which have
/// twice the throughput.
pub(crate) fn fusion_gain(non_fused: u64, fused: u64) -> f64 {
    let all = non_fused + fused;
    if all == 0 {
        0.0
    } else {
        0.5 * non_fused as f64 / all as f64
    }
}

/// Reports kernels executing many FADD/FMUL (DADD/DMUL) instructions that
/// could be fused into FFMA (DFMA).
#[derive(Debug, Clone, Copy, Default)]
pub struct FpInstructions;

impl FpInstructions {
    pub fn new() -> Self {
        FpInstructions
    }
}

impl Rule for FpInstructions {
    fn identifier(&self) -> RuleId {
        RuleId::new(ID)
    }

    fn info(&self) -> RuleInfo {
        RuleInfo::new("FP32/64 Instructions")
            .with_description("Floating-point instruction analysis")
            .with_section(section::INSTRUCTION_STATS)
    }

    fn parent_identifiers(&self) -> Vec<RuleId> {
        vec![RuleId::new(sol_bottleneck::ID)]
    }

    fn metric_requests(&self) -> Vec<MetricRequest> {
        vec![MetricRequest::new(INST_PER_OPCODE)]
    }

    fn apply(&self, ctx: &RuleContext<'_>) -> RuleResult<RuleOutput> {
        let mut output = RuleOutput::new();
        let Some(per_opcode) = ctx.metrics().metric(INST_PER_OPCODE) else {
            return Ok(output);
        };
        if !per_opcode.has_correlation_ids() {
            debug!(
                instances = per_opcode.num_instances(),
                "Opcode counts carry no mnemonics"
            );
            return Ok(output);
        }

        // Correlation ids are opcode mnemonics
        let mut executed: BTreeMap<String, u64> = BTreeMap::new();
        for i in 0..per_opcode.num_instances() {
            let Some(opcode) = per_opcode.correlation_id(i)?.as_str() else {
                continue;
            };
            let count = per_opcode.instance(i)?.as_u64().unwrap_or(0);
            *executed.entry(opcode.to_uppercase()).or_default() += count;
        }
        let count_of = |opcode: &str| executed.get(opcode).copied().unwrap_or(0);

        for precision in &PRECISIONS {
            let non_fused: u64 = precision.non_fused.iter().map(|op| count_of(*op)).sum();
            let fused = count_of(precision.fused);
            if non_fused + fused == 0 {
                continue;
            }

            let gain = fusion_gain(non_fused, fused);
            if gain <= NON_FUSED_RATIO_THRESHOLD {
                continue;
            }

            let pipe = ctx.parent_weights().get(&precision.pipe_weight());
            let ceiling = pipe.or_else(|| ctx.parent_weights().compute_throughput());
            let speedup = Speedup::compose(gain, ceiling, Combinator::Product);

            let mut finding = Finding::optimization(format!(
                "This kernel executes {} fused and {} non-fused FP{} instructions. Converting \
                 pairs of non-fused instructions into their fused, higher-throughput \
                 equivalent could raise the achieved FP{} performance by up to {:.0}% of its \
                 current value. The Source page shows where these instructions execute.",
                fused,
                non_fused,
                precision.bits,
                precision.bits,
                100.0 * gain
            ))
            .with_title(format!("FP{} Non-Fused Instructions", precision.bits))
            .with_speedup(speedup)
            .with_focus_metric(FocusMetric::new(
                INST_PER_OPCODE,
                non_fused as f64,
                Severity::High,
                format!(
                    "Decrease the number of non-fused floating-point instructions ({}, {})",
                    precision.non_fused[0], precision.non_fused[1]
                ),
            ));
            if let Some(pipe) = pipe {
                finding = finding.with_focus_metric(FocusMetric::new(
                    precision.pipe_weight(),
                    pipe,
                    Severity::Low,
                    "The busier the pipeline, the more the issue matters",
                ));
            }
            output.push(finding);
        }

        Ok(output)
    }
}
