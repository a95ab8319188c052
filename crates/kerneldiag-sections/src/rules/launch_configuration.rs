//! Kernel launch configuration analysis.
//!
//! The estimates here are kernel-wide by construction (idle SMs, masked
//! threads, the tail wave), so they are reported as Global speedups without
//! needing a parent ceiling.

use kerneldiag::{
    Finding, FocusMetric, MetricRequest, Rule, RuleContext, RuleId, RuleInfo, RuleOutput,
    RuleResult, Severity, Speedup,
};

use super::{section, sol_bottleneck};

pub const ID: &str = "LaunchConfiguration";

const BLOCK_SIZE: &str = "launch__block_size";
const GRID_SIZE: &str = "launch__grid_size";
const SM_COUNT: &str = "device__attribute_multiprocessor_count";
const NUM_WAVES: &str = "launch__waves_per_multiprocessor";
const ACHIEVED_OCCUPANCY: &str = "sm__warps_active.avg.pct_of_peak_sustained_active";
const THEORETICAL_OCCUPANCY: &str = "sm__maximum_warps_per_active_cycle_pct";

const WARP_SIZE: u64 = 32;
const TAIL_EFFECT_THRESHOLD: f64 = 0.2;
const OCCUPANCY_RATIO_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, Default)]
pub struct LaunchConfiguration;

impl LaunchConfiguration {
    pub fn new() -> Self {
        LaunchConfiguration
    }
}

/// Fraction of the kernel lost to masked-off threads in the last warp of
/// every block.
pub(crate) fn block_size_waste(block_size: u64) -> f64 {
    let num_warps = block_size.div_ceil(WARP_SIZE);
    let threads_in_last_warp = block_size % WARP_SIZE;
    if num_warps == 0 || threads_in_last_warp == 0 {
        return 0.0;
    }
    (1.0 / num_warps as f64) * (1.0 - threads_in_last_warp as f64 / WARP_SIZE as f64)
}

/// Upper bound on the runtime share of a trailing partial wave.
pub(crate) fn tail_effect(num_waves: f64) -> f64 {
    let whole = num_waves.trunc();
    if num_waves - whole == 0.0 {
        0.0
    } else {
        1.0 / (whole + 1.0)
    }
}

impl Rule for LaunchConfiguration {
    fn identifier(&self) -> RuleId {
        RuleId::new(ID)
    }

    fn info(&self) -> RuleInfo {
        RuleInfo::new("Launch Configuration")
            .with_description("Kernel launch configuration analysis")
            .with_section(section::LAUNCH_STATS)
    }

    fn parent_identifiers(&self) -> Vec<RuleId> {
        vec![RuleId::new(sol_bottleneck::ID)]
    }

    fn metric_requests(&self) -> Vec<MetricRequest> {
        vec![
            MetricRequest::new(BLOCK_SIZE).alias("block_size"),
            MetricRequest::new(GRID_SIZE).alias("grid_size"),
            MetricRequest::new(SM_COUNT),
            MetricRequest::new(NUM_WAVES).alias("num_waves"),
            MetricRequest::new(ACHIEVED_OCCUPANCY),
            MetricRequest::new(THEORETICAL_OCCUPANCY),
        ]
    }

    fn apply(&self, ctx: &RuleContext<'_>) -> RuleResult<RuleOutput> {
        let metrics = ctx.metrics();
        let block_size = metrics.u64("block_size")?;
        let grid_size = metrics.u64("grid_size")?;
        let num_sms = metrics.u64(SM_COUNT)?;
        let num_waves = metrics.f64("num_waves")?;
        let achieved = metrics.f64(ACHIEVED_OCCUPANCY)?;
        let theoretical = metrics.f64(THEORETICAL_OCCUPANCY)?;

        let mut output = RuleOutput::new();

        if block_size % WARP_SIZE != 0 {
            output.push(
                Finding::optimization(format!(
                    "Threads execute in warps of {} threads, but this launch uses {} threads \
                     per block, so some threads of a warp are masked off and their hardware \
                     resources stay unused. Use a multiple of {} threads per block; 128 to \
                     256 is a good starting range.",
                    WARP_SIZE, block_size, WARP_SIZE
                ))
                .with_title("Block Size")
                .with_speedup(Speedup::global(block_size_waste(block_size)))
                .with_focus_metric(FocusMetric::new(
                    BLOCK_SIZE,
                    block_size as f64,
                    Severity::Low,
                    "Arrange the number of threads per block to be a multiple of 32",
                )),
            );
        }

        if grid_size < num_sms {
            let idle = (num_sms - grid_size) as f64 / num_sms as f64;
            output.push(
                Finding::optimization(format!(
                    "The grid only has {} blocks, fewer than the {} multiprocessors of the \
                     device, which leaves some of them idle. Unless other workloads run \
                     concurrently, reduce the block size or grow the grid so that every \
                     multiprocessor gets at least one block.",
                    grid_size, num_sms
                ))
                .with_title("Small Grid")
                .with_speedup(Speedup::global(idle))
                .with_focus_metric(FocusMetric::new(
                    GRID_SIZE,
                    grid_size as f64,
                    Severity::High,
                    format!(
                        "Increase the grid size towards the number of multiprocessors ({})",
                        num_sms
                    ),
                )),
            );
        } else if grid_size < 2 * num_sms {
            output.push(
                Finding::optimization(format!(
                    "Blocks that synchronize with __syncthreads() benefit from more than the \
                     achieved {} blocks per multiprocessor, so that blocks not waiting at the \
                     barrier can keep the hardware busy.",
                    grid_size / num_sms
                ))
                .with_title("Small Grid")
                .with_focus_metric(FocusMetric::new(
                    GRID_SIZE,
                    grid_size as f64,
                    Severity::Low,
                    format!(
                        "Increase the grid size towards twice the number of multiprocessors ({})",
                        2 * num_sms
                    ),
                )),
            );
        }

        let whole_waves = num_waves.trunc();
        let tail = tail_effect(num_waves);
        if whole_waves >= 1.0
            && tail >= TAIL_EFFECT_THRESHOLD
            && theoretical > 0.0
            && achieved < theoretical * OCCUPANCY_RATIO_THRESHOLD
        {
            let partial_blocks = (grid_size as f64 * (num_waves - whole_waves) / num_waves) as u64;
            output.push(
                Finding::optimization(format!(
                    "This launch runs {} full waves and a partial wave of {} blocks. Assuming \
                     uniform block durations, the partial wave may take up to {:.1}% of the \
                     runtime at an occupancy {:.1}% below the theoretical one. Launch a grid \
                     without a partial wave, or with more full waves.",
                    whole_waves as u64,
                    partial_blocks,
                    100.0 * tail,
                    100.0 * (theoretical - achieved) / theoretical
                ))
                .with_title("Tail Effect")
                .with_speedup(Speedup::global(tail))
                .with_focus_metric(FocusMetric::new(
                    NUM_WAVES,
                    num_waves,
                    Severity::Default,
                    "Decrease the number of partial waves",
                )),
            );
        }

        Ok(output)
    }
}
