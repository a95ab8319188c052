//! Section rules for kerneldiag.
//!
//! A set of rules that turn a GPU kernel's performance counters into
//! findings, organized by report section:
//!
//! - [`SolBottleneck`]: classifies the kernel as latency, compute or memory
//!   bound and publishes the throughput weights the other rules scale by
//! - [`LaunchConfiguration`]: block size, grid size and tail effects
//! - [`IssueSlotUtilization`]: schedulers that rarely issue an instruction
//! - [`AchievedOccupancy`]: achieved occupancy far below the theoretical one
//! - [`CpiStall`]: dominant warp stall reasons, with source markers from PC
//!   sampling
//! - [`FpInstructions`]: non-fused floating-point instructions
//!
//! # Example
//!
//! ```
//! use kerneldiag::{MemoryMetricStore, RuleScheduler};
//!
//! let store = MemoryMetricStore::new()
//!     .with("launch__waves_per_multiprocessor", 4.0)
//!     .with("sm__throughput.avg.pct_of_peak_sustained_elapsed", 20.0)
//!     .with("gpu__compute_memory_throughput.avg.pct_of_peak_sustained_elapsed", 25.0);
//!
//! let registry = kerneldiag_sections::default_registry().unwrap();
//! let report = RuleScheduler::new().run(&registry, &store).unwrap();
//!
//! let bottleneck = report.sink.findings_for("SOLBottleneck").next().unwrap();
//! assert_eq!(bottleneck.title.as_deref(), Some("Latency Issue"));
//! ```

pub mod rules;

pub use rules::{
    section, stall_reason, AchievedOccupancy, CpiStall, FpInstructions, IssueSlotUtilization,
    LaunchConfiguration, SolBottleneck, SourceLine, StallReason, STALL_REASONS,
};

use kerneldiag::{EngineResult, RuleRegistry};
use tracing::debug;

/// Registry with every section rule.
pub fn default_registry() -> EngineResult<RuleRegistry> {
    with_cpi_stall(CpiStall::new())
}

/// Like [`default_registry`], with a configured warp stall rule (for
/// example one carrying a source line map).
pub fn with_cpi_stall(cpi_stall: CpiStall) -> EngineResult<RuleRegistry> {
    let registry = RuleRegistry::new()
        .with_rule(SolBottleneck::new())?
        .with_rule(LaunchConfiguration::new())?
        .with_rule(FpInstructions::new())?
        .with_rule(IssueSlotUtilization::new())?
        .with_rule(AchievedOccupancy::new())?
        .with_rule(cpi_stall)?;
    debug!(rules = registry.len(), "Built section rule registry");
    Ok(registry)
}
