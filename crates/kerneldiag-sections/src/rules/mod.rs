//! Section rules.
//!
//! The rules form this dependency graph:
//!
//! ```text
//! SOLBottleneck
//! ├── LaunchConfiguration
//! ├── FPInstructions
//! └── IssueSlotUtilization
//!     ├── AchievedOccupancy
//!     └── CPIStall
//! ```

mod achieved_occupancy;
mod cpi_stall;
mod fp_instructions;
mod issue_slot_utilization;
mod launch_configuration;
mod sol_bottleneck;

pub use achieved_occupancy::AchievedOccupancy;
pub use cpi_stall::{stall_reason, CpiStall, SourceLine, StallReason, STALL_REASONS};
pub use fp_instructions::FpInstructions;
pub use issue_slot_utilization::IssueSlotUtilization;
pub use launch_configuration::LaunchConfiguration;
pub use sol_bottleneck::SolBottleneck;

/// Report sections the rules attach their findings to.
pub mod section {
    pub const SPEED_OF_LIGHT: &str = "SpeedOfLight";
    pub const LAUNCH_STATS: &str = "LaunchStats";
    pub const SCHEDULER_STATS: &str = "SchedulerStats";
    pub const OCCUPANCY: &str = "Occupancy";
    pub const WARP_STATE_STATS: &str = "WarpStateStats";
    pub const INSTRUCTION_STATS: &str = "InstructionStats";
}

/// Fraction of `whole` that `part` is missing, `0` if `whole` is not
/// positive.
pub(crate) fn shortfall(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        ((whole - part) / whole).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// `"long_scoreboard"` -> `"Long Scoreboard"`
pub(crate) fn title_case(snake: &str) -> String {
    snake
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortfall() {
        assert_eq!(shortfall(60.0, 80.0), 0.25);
        assert_eq!(shortfall(90.0, 80.0), 0.0);
        assert_eq!(shortfall(10.0, 0.0), 0.0);
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("long_scoreboard"), "Long Scoreboard");
        assert_eq!(title_case("wait"), "Wait");
    }
}
