//! Warp stall analysis.
//!
//! Breaks the average number of cycles between two issued instructions down
//! by stall reason, reports the dominant reasons, and marks the instructions
//! where PC sampling saw a single reason dominate.

use std::collections::BTreeMap;

use kerneldiag::{
    Combinator, Finding, FindingKind, FocusMetric, MetricRequest, MetricValue, Rule, RuleContext,
    RuleId, RuleInfo, RuleOutput, RuleResult, Severity, SourceMarker, Speedup,
};
use tracing::debug;

use super::issue_slot_utilization::{self, ISSUE_ACTIVE};
use super::{section, title_case};

pub const ID: &str = "CPIStall";

const WARP_CYCLES_PER_ISSUE: &str = "smsp__average_warp_latency_per_inst_issued.ratio";
const SAMPLE_COUNT: &str = "smsp__pcsamp_sample_count";

const ISSUE_ACTIVE_THRESHOLD: f64 = 0.8;
const STALL_RATIO_THRESHOLD: f64 = 0.3;
/// Cycles per issue above which a dominant stall reason gets default
/// severity instead of low.
const HIGH_CYCLES_PER_ISSUE: f64 = 10.0;
/// Minimum share of all PC samples an instruction needs to be marked.
const SAMPLE_SHARE_THRESHOLD: f64 = 0.1;

/// One reason a warp can be stalled, with the metrics reporting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallReason {
    /// Snake case reason, as it appears in the metric names
    pub name: &'static str,
    /// What the warp waits for, continuing the sentence "the warp is stalled ..."
    pub description: &'static str,
    /// Name suffix of the PC sampling metric, if it differs from `name`
    sampling_name: Option<&'static str>,
    /// Whether a missing average metric raises the optional metric warning
    warn_if_missing: bool,
}

impl StallReason {
    const fn new(name: &'static str, description: &'static str) -> Self {
        StallReason {
            name,
            description,
            sampling_name: None,
            warn_if_missing: true,
        }
    }

    const fn quiet(mut self) -> Self {
        self.warn_if_missing = false;
        self
    }

    const fn sampled_as(mut self, sampling_name: &'static str) -> Self {
        self.sampling_name = Some(sampling_name);
        self
    }

    /// Average stall cycles per issued instruction.
    pub fn metric_name(&self) -> String {
        format!(
            "smsp__average_warps_issue_stalled_{}_per_issue_active.ratio",
            self.name
        )
    }

    pub fn metric_alias(&self) -> String {
        format!("smsp_average_{}", self.name)
    }

    /// PC sampling counts per instruction.
    pub fn sampling_metric_name(&self) -> String {
        format!(
            "smsp__pcsamp_warps_issue_stalled_{}",
            self.sampling_name.unwrap_or(self.name)
        )
    }

    pub fn sampling_alias(&self) -> String {
        format!("pc_sampling_{}", self.name)
    }

    /// `"long_scoreboard"` -> `"Long Scoreboard Stalls"`
    pub fn title(&self) -> String {
        format!("{} Stalls", title_case(self.name))
    }

    fn requests(&self) -> [MetricRequest; 2] {
        let mut average = MetricRequest::new(self.metric_name())
            .alias(self.metric_alias())
            .optional_without_fallback();
        let mut sampling = MetricRequest::new(self.sampling_metric_name())
            .alias(self.sampling_alias())
            .optional_without_fallback();
        if !self.warn_if_missing {
            average = average.quiet();
            sampling = sampling.quiet();
        }
        [average, sampling]
    }
}

pub static STALL_REASONS: [StallReason; 17] = [
    StallReason::new(
        "barrier",
        "at a block-level barrier until its sibling warps arrive. Diverging code paths \
         before the barrier are the usual cause: some warps reach the synchronization \
         point long before the others. Split the work into blocks with uniform workloads, \
         and consider blocks smaller than 512 threads. Optimize the code before the barrier \
         that accounts for the most stalls first.",
    ),
    StallReason::new(
        "branch_resolving",
        "until a branch target is computed and the program counter updated. Use fewer \
         jumps and reduce control flow divergence, for example by merging conditionals. \
         The No Instruction reason is closely related.",
    ),
    StallReason::new(
        "dispatch_stall",
        "at dispatch: an instruction is ready, but the dispatcher holds the warp back \
         because of another conflict or event.",
    ),
    StallReason::new(
        "drain",
        "after EXIT until its outstanding memory operations complete and its resources can \
         be released. This is common when a kernel writes a lot of data at its end; make \
         sure those stores are well coalesced, and reduce the data in parallel where \
         possible.",
    ),
    StallReason::new(
        "imc_miss",
        "on a miss in the immediate constant cache. Constant reads by threads of one warp \
         to different addresses are serialized, so the cost grows with the number of \
         distinct addresses. Constant memory is fastest when all threads of a warp read \
         the same location.",
    ),
    StallReason::new(
        "lg_throttle",
        "until the L1 queue for local and global memory operations has room. This happens \
         when such instructions execute extremely often. Remove redundant global accesses, \
         avoid local memory from dynamically indexed arrays or register spills, and merge \
         narrow memory operations into wider ones.",
    ),
    StallReason::new(
        "long_scoreboard",
        "on a scoreboard dependency on an L1TEX operation (local, global, surface or \
         texture). Find the instruction producing the awaited data. Improve the access \
         pattern and data locality to raise cache hit rates, or move frequently used data \
         to shared memory.",
    )
    .quiet(),
    StallReason::new(
        "math_pipe_throttle",
        "until an oversubscribed math pipeline becomes available. Increase the number of \
         active warps to hide the latency, or balance the instruction mix across the \
         pipelines.",
    ),
    StallReason::new(
        "membar",
        "on a memory barrier. Remove unnecessary barriers and make sure outstanding memory \
         operations are efficient.",
    ),
    StallReason::new(
        "mio_throttle",
        "until the memory input/output instruction queue has room. The queue serves special \
         math instructions, dynamic branches and shared memory; fewer but wider shared \
         memory loads relieve it.",
    )
    .quiet(),
    StallReason::new("misc", "for a miscellaneous hardware reason."),
    StallReason::new(
        "no_instruction",
        "until it is selected to fetch an instruction or an instruction cache miss is \
         served. This is typical for very short kernels with less than one full wave, and \
         for code that jumps across large blocks of instructions. The Branch Resolving \
         reason is closely related.",
    )
    .sampled_as("no_instructions"),
    StallReason::new(
        "not_selected",
        "while eligible because the scheduler picked another warp. Many such stalls mean \
         there are enough warps to hide latency; fewer active warps may improve cache \
         locality.",
    ),
    StallReason::new(
        "short_scoreboard",
        "on a scoreboard dependency on a memory input/output operation other than L1TEX, \
         most often shared memory. Special math instructions and dynamic branches also \
         contribute. Check the Memory Workload Analysis section for shared memory bank \
         conflicts, and keep frequently accessed values in local variables so the compiler \
         can use registers.",
    ),
    StallReason::new(
        "sleeping",
        "because all of its threads are blocked, yielded or sleeping. Execute fewer \
         NANOSLEEP instructions, shorten the delays, and group threads so that a warp \
         sleeps as a whole.",
    ),
    StallReason::new(
        "tex_throttle",
        "until the L1 queue for texture operations has room, which indicates extreme use \
         of the L1TEX pipeline. Issue fewer texture or surface operations, merge narrow \
         memory operations, or turn texture lookups into global memory loads.",
    ),
    StallReason::new(
        "wait",
        "on a fixed-latency execution dependency. This reason usually dominates only in \
         already well-optimized kernels. Hide the latency with more active warps, loop \
         unrolling or lower-latency instructions such as fast math.",
    ),
];

/// High-level source location of an instruction address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub file: String,
    pub line: u32,
}

impl SourceLine {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        SourceLine {
            file: file.into(),
            line,
        }
    }
}

/// Reports stall reasons that take a large share of the cycles between
/// issued instructions.
#[derive(Debug, Clone, Default)]
pub struct CpiStall {
    source_lines: BTreeMap<u64, SourceLine>,
}

struct ReportedStall {
    reason: &'static StallReason,
    cycles: f64,
    finding: Finding,
}

impl CpiStall {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map instruction addresses to source lines, so that marked
    /// instructions are also marked in the source view.
    pub fn with_source_lines(
        mut self,
        lines: impl IntoIterator<Item = (u64, SourceLine)>,
    ) -> Self {
        self.source_lines.extend(lines);
        self
    }

    /// Markers for instructions whose samples are dominated by one reason.
    fn hotspot_markers(&self, ctx: &RuleContext<'_>) -> RuleResult<Vec<SourceMarker>> {
        let metrics = ctx.metrics();
        let Some(samples) = metrics.metric("pc_sampling_count") else {
            return Ok(Vec::new());
        };
        let total = samples.value().as_u64().unwrap_or(0);

        let mut markers = Vec::new();
        for reason in STALL_REASONS.iter() {
            let Some(stalls) = metrics.metric(&reason.sampling_alias()) else {
                continue;
            };
            if stalls.num_instances() != samples.num_instances() {
                debug!(
                    reason = reason.name,
                    stalls = stalls.num_instances(),
                    samples = samples.num_instances(),
                    "Skipping stall reason with mismatched instance counts"
                );
                continue;
            }
            if !stalls.has_correlation_ids() {
                debug!(
                    reason = reason.name,
                    "Skipping stall reason sampled without instruction addresses"
                );
                continue;
            }

            for i in 0..stalls.num_instances() {
                let local = instance_u64(samples, i)?;
                let stalled = instance_u64(stalls, i)?;
                if local == 0 || total == 0 {
                    continue;
                }
                let reason_share = stalled as f64 / local as f64;
                let sample_share = local as f64 / total as f64;
                if reason_share <= STALL_RATIO_THRESHOLD || sample_share <= SAMPLE_SHARE_THRESHOLD
                {
                    continue;
                }

                let Some(address) = stalls.correlation_id(i)?.as_u64() else {
                    continue;
                };
                markers.push(SourceMarker::sass(
                    address,
                    FindingKind::Warning,
                    format!(
                        "This instruction accounts for {:.1}% of all warp stall samples; \
                         {:.1}% of its samples are {} stalls.",
                        100.0 * sample_share,
                        100.0 * reason_share,
                        reason.name.replace('_', " ")
                    ),
                ));
                if let Some(line) = self.source_lines.get(&address) {
                    markers.push(SourceMarker::source(
                        line.file.clone(),
                        line.line,
                        FindingKind::Warning,
                        "This line causes many warp stalls; the SASS markers have details.",
                    ));
                }
            }
        }
        Ok(markers)
    }
}

fn instance_u64(metric: &MetricValue, index: usize) -> RuleResult<u64> {
    Ok(metric.instance(index)?.as_u64().unwrap_or(0))
}

impl Rule for CpiStall {
    fn identifier(&self) -> RuleId {
        RuleId::new(ID)
    }

    fn info(&self) -> RuleInfo {
        RuleInfo::new("Warp Stall")
            .with_description("Warp stall analysis")
            .with_section(section::WARP_STATE_STATS)
    }

    fn parent_identifiers(&self) -> Vec<RuleId> {
        vec![RuleId::new(issue_slot_utilization::ID)]
    }

    fn metric_requests(&self) -> Vec<MetricRequest> {
        let mut requests = vec![
            MetricRequest::new(ISSUE_ACTIVE).alias("issue_active"),
            MetricRequest::new(WARP_CYCLES_PER_ISSUE).alias("warp_cycles_per_issue"),
            MetricRequest::new(SAMPLE_COUNT)
                .alias("pc_sampling_count")
                .optional_without_fallback(),
        ];
        requests.extend(STALL_REASONS.iter().flat_map(StallReason::requests));
        requests
    }

    fn apply(&self, ctx: &RuleContext<'_>) -> RuleResult<RuleOutput> {
        let metrics = ctx.metrics();
        let issue_active = metrics.f64("issue_active")?;
        let cycles_per_issue = metrics.f64("warp_cycles_per_issue")?;
        let ceiling = ctx.parent_weights().issue_slot_speedup();

        let mut output = RuleOutput::new();

        let markers = self.hotspot_markers(ctx)?;
        if !markers.is_empty() {
            let finding = markers.into_iter().fold(
                Finding::warning(
                    "PC sampling attributes a large share of warp stalls to a few \
                     instructions; see the source markers.",
                )
                .with_title("Stall Hotspots"),
                Finding::with_source_marker,
            );
            output.push(finding);
        }

        let mut reported = Vec::new();
        if issue_active < ISSUE_ACTIVE_THRESHOLD && cycles_per_issue > 0.0 {
            for reason in STALL_REASONS.iter() {
                let Some(cycles) = metrics.opt_f64(&reason.metric_alias())? else {
                    continue;
                };
                let ratio = cycles / cycles_per_issue;
                if ratio <= STALL_RATIO_THRESHOLD {
                    continue;
                }

                let body = format!(
                    "On average, each warp of this kernel spends {:.1} cycles stalled {} \
                     This stall reason accounts for about {:.1}% of the {:.1} cycles between \
                     two issued instructions.",
                    cycles,
                    reason.description,
                    100.0 * ratio,
                    cycles_per_issue
                );
                let severity = if cycles_per_issue > HIGH_CYCLES_PER_ISSUE {
                    Severity::Default
                } else {
                    Severity::Low
                };
                let finding = Finding::optimization(body)
                    .with_title(reason.title())
                    .with_speedup(Speedup::compose(ratio, ceiling, Combinator::Min))
                    .with_focus_metric(FocusMetric::new(
                        ISSUE_ACTIVE,
                        issue_active,
                        Severity::High,
                        "Increase the average number of instructions issued per cycle",
                    ))
                    .with_focus_metric(FocusMetric::new(
                        reason.metric_name(),
                        cycles,
                        severity,
                        format!(
                            "Decrease the number of cycles spent in {} stalls",
                            reason.name.replace('_', " ")
                        ),
                    ));
                reported.push(ReportedStall {
                    reason,
                    cycles,
                    finding,
                });
            }
        }

        // Stable, so equal stall cycles keep the table order
        reported.sort_by(|a, b| b.cycles.total_cmp(&a.cycles));
        debug!(
            reasons = ?reported.iter().map(|s| s.reason.name).collect::<Vec<_>>(),
            "Dominant stall reasons"
        );

        if !reported.is_empty() {
            for stall in reported {
                output.push(stall.finding);
            }
            output.push(Finding::ok(
                "The Warp Stall Sampling table of the Source Counters section lists the top \
                 stall locations in the source. The profiling guide describes each stall \
                 reason in detail.",
            ));
        }

        Ok(output)
    }
}

/// Stall reason by its snake case name.
pub fn stall_reason(name: &str) -> Option<&'static StallReason> {
    STALL_REASONS.iter().find(|r| r.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        let barrier = stall_reason("barrier").unwrap();
        assert_eq!(
            barrier.metric_name(),
            "smsp__average_warps_issue_stalled_barrier_per_issue_active.ratio"
        );
        assert_eq!(
            barrier.sampling_metric_name(),
            "smsp__pcsamp_warps_issue_stalled_barrier"
        );
        assert_eq!(barrier.title(), "Barrier Stalls");

        let no_instruction = stall_reason("no_instruction").unwrap();
        assert_eq!(
            no_instruction.sampling_metric_name(),
            "smsp__pcsamp_warps_issue_stalled_no_instructions"
        );
        assert_eq!(no_instruction.sampling_alias(), "pc_sampling_no_instruction");
    }

    #[test]
    fn test_requests_are_optional_without_fallback() {
        let requests = CpiStall::new().metric_requests();
        assert_eq!(requests.len(), 3 + 2 * STALL_REASONS.len());
        assert!(requests[2..].iter().all(|r| !r.is_required()));
    }
}
