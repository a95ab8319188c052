//! Full passes of the section rules over recorded kernel profiles.

use approx::assert_abs_diff_eq;
use kerneldiag::{
    EngineConfig, ExecutionMode, Finding, FindingKind, Instances, MarkerKind, MarkerLocation,
    MemoryMetricStore, MetricValue, RuleRegistry, RuleScheduler, Severity, SpeedupType, Value,
};
use kerneldiag_sections::{default_registry, with_cpi_stall, CpiStall, SolBottleneck, SourceLine};

fn sampled(total: u64, per_address: &[(u64, u64)]) -> MetricValue {
    let instances = Instances::with_correlation_ids(
        per_address.iter().map(|(_, n)| Value::from(*n)).collect(),
        per_address.iter().map(|(addr, _)| Value::from(*addr)).collect(),
    )
    .unwrap();
    MetricValue::new(total).with_instances(instances)
}

/// A latency bound kernel with low occupancy and long scoreboard stalls.
fn latency_bound_kernel() -> MemoryMetricStore {
    let opcodes = Instances::with_correlation_ids(
        vec![Value::from(5000u64), Value::from(1200u64)],
        vec![Value::from("FFMA"), Value::from("IMAD")],
    )
    .unwrap();

    MemoryMetricStore::new()
        // speed of light
        .with("launch__waves_per_multiprocessor", 2.5)
        .with("sm__throughput.avg.pct_of_peak_sustained_elapsed", 30.0)
        .with(
            "gpu__compute_memory_throughput.avg.pct_of_peak_sustained_elapsed",
            45.0,
        )
        .with(
            "breakdown:gpu__compute_memory_throughput.avg.pct_of_peak_sustained_elapsed",
            "dram__throughput.avg.pct_of_peak_sustained_elapsed",
        )
        // launch statistics
        .with("launch__block_size", 100u64)
        .with("launch__grid_size", 400u64)
        .with("device__attribute_multiprocessor_count", 80u64)
        // occupancy
        .with("sm__maximum_warps_per_active_cycle_pct", 75.0)
        .with("sm__warps_active.avg.pct_of_peak_sustained_active", 40.0)
        // scheduler statistics
        .with("smsp__issue_active.avg.per_cycle_active", 0.3)
        .with("smsp__maximum_warps_avg_per_active_cycle", 12.0)
        .with("smsp__warps_active.avg.per_cycle_active", 6.0)
        .with("smsp__warps_eligible.avg.per_cycle_active", 0.5)
        .with("smsp__warps_active.avg.peak_sustained", 16.0)
        // warp state statistics
        .with("smsp__average_warp_latency_per_inst_issued.ratio", 20.0)
        .with(
            "smsp__average_warps_issue_stalled_long_scoreboard_per_issue_active.ratio",
            12.0,
        )
        .with(
            "smsp__average_warps_issue_stalled_barrier_per_issue_active.ratio",
            7.0,
        )
        .with(
            "smsp__average_warps_issue_stalled_wait_per_issue_active.ratio",
            2.0,
        )
        .with(
            "smsp__pcsamp_sample_count",
            sampled(1000, &[(0x100, 500), (0x200, 50), (0x300, 450)]),
        )
        .with(
            "smsp__pcsamp_warps_issue_stalled_long_scoreboard",
            sampled(540, &[(0x100, 400), (0x200, 40), (0x300, 100)]),
        )
        // instruction statistics
        .with(
            "sass__inst_executed_per_opcode",
            MetricValue::new(6200u64).with_instances(opcodes),
        )
}

fn titles<'a>(findings: impl Iterator<Item = &'a Finding>) -> Vec<String> {
    findings
        .map(|f| f.title.clone().unwrap_or_default())
        .collect()
}

#[test]
fn test_latency_bound_kernel() {
    let store = latency_bound_kernel();
    let registry = with_cpi_stall(
        CpiStall::new().with_source_lines([(0x100, SourceLine::new("kernel.cu", 42))]),
    )
    .unwrap();
    let report = RuleScheduler::new().run(&registry, &store).unwrap();

    assert_eq!(report.applied(), 6);
    assert_eq!(report.aborted(), 0);
    assert!(!report.sink.has_errors());

    assert_eq!(
        titles(report.sink.findings_for("SOLBottleneck")),
        vec!["Latency Issue"]
    );
    assert_eq!(report.sink.findings_for("FPInstructions").count(), 0);

    let launch: Vec<_> = report.sink.findings_for("LaunchConfiguration").collect();
    assert_eq!(titles(launch.iter().copied()), vec!["Block Size", "Tail Effect"]);
    let block = launch[0].speedup.unwrap();
    assert_eq!(block.kind(), SpeedupType::Global);
    assert_abs_diff_eq!(block.percent(), 21.875, epsilon = 1e-9);
    assert_abs_diff_eq!(launch[1].speedup.unwrap().percent(), 100.0 / 3.0, epsilon = 1e-9);

    // Capped by the 55% of throughput left unused
    let issue = report
        .sink
        .findings_for("IssueSlotUtilization")
        .next()
        .unwrap();
    let issue_speedup = issue.speedup.unwrap();
    assert_eq!(issue_speedup.kind(), SpeedupType::Local);
    assert_abs_diff_eq!(issue_speedup.percent(), 55.0, epsilon = 1e-9);
    // 6 of 12 theoretical warps active, so the stalls are the lead
    assert!(issue.body.contains("Warp State Statistics"));
    assert!(!issue.body.contains("load imbalance"));
    assert_eq!(issue.focus_metrics[0].severity, Severity::Default);

    let occupancy = report.sink.findings_for("AchievedOccupancy").next().unwrap();
    let occupancy_speedup = occupancy.speedup.unwrap();
    assert_eq!(occupancy_speedup.kind(), SpeedupType::Global);
    assert_abs_diff_eq!(occupancy_speedup.percent(), 100.0 * 35.0 / 75.0, epsilon = 1e-9);
}

#[test]
fn test_warp_stalls_are_sorted_and_bounded_by_issue_slots() {
    let store = latency_bound_kernel();
    let registry = with_cpi_stall(
        CpiStall::new().with_source_lines([(0x100, SourceLine::new("kernel.cu", 42))]),
    )
    .unwrap();
    let report = RuleScheduler::new().run(&registry, &store).unwrap();

    let stalls: Vec<_> = report.sink.findings_for("CPIStall").collect();
    assert_eq!(
        titles(stalls.iter().copied()),
        vec![
            "Missing Optional Metric",
            "Stall Hotspots",
            "Long Scoreboard Stalls",
            "Barrier Stalls",
            "",
        ]
    );
    assert_eq!(stalls[0].kind, FindingKind::Warning);
    assert_eq!(stalls[4].kind, FindingKind::Ok);

    // min(12 / 20, 0.55) and min(7 / 20, 0.55)
    let long_scoreboard = stalls[2].speedup.unwrap();
    assert_eq!(long_scoreboard.kind(), SpeedupType::Global);
    assert_abs_diff_eq!(long_scoreboard.percent(), 55.0, epsilon = 1e-9);
    assert_abs_diff_eq!(stalls[3].speedup.unwrap().percent(), 35.0, epsilon = 1e-9);

    let focus = &stalls[2].focus_metrics;
    assert_eq!(focus.len(), 2);
    assert_eq!(focus[0].severity, Severity::High);
    assert_eq!(focus[1].severity, Severity::Default);
    assert_eq!(
        focus[1].metric_name,
        "smsp__average_warps_issue_stalled_long_scoreboard_per_issue_active.ratio"
    );

    // Only 0x100 has both a dominant reason and a large share of samples
    let markers = &stalls[1].source_markers;
    assert_eq!(markers.len(), 2);
    assert_eq!(markers[0].kind, MarkerKind::Sass);
    assert_eq!(markers[0].location, MarkerLocation::Address(0x100));
    assert_eq!(markers[1].kind, MarkerKind::Source);
    assert_eq!(
        markers[1].location,
        MarkerLocation::Line {
            file: "kernel.cu".to_string(),
            line: 42
        }
    );
}

#[test]
fn test_aborted_parent_leaves_children_local() {
    let mut store = latency_bound_kernel();
    store.remove("smsp__warps_eligible.avg.per_cycle_active");

    let registry = default_registry().unwrap();
    let report = RuleScheduler::new().run(&registry, &store).unwrap();

    assert!(report
        .status("IssueSlotUtilization")
        .is_some_and(|s| s.is_aborted()));
    let errors: Vec<_> = report.sink.findings_for("IssueSlotUtilization").collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, FindingKind::Error);
    assert!(errors[0]
        .body
        .contains("smsp__warps_eligible.avg.per_cycle_active"));

    // Without the issue slot ceiling both children fall back to local estimates
    let occupancy = report.sink.findings_for("AchievedOccupancy").next().unwrap();
    assert_eq!(occupancy.speedup.unwrap().kind(), SpeedupType::Local);

    let long_scoreboard = report
        .sink
        .findings_for("CPIStall")
        .find(|f| f.title.as_deref() == Some("Long Scoreboard Stalls"))
        .unwrap();
    let speedup = long_scoreboard.speedup.unwrap();
    assert_eq!(speedup.kind(), SpeedupType::Local);
    assert_abs_diff_eq!(speedup.percent(), 60.0, epsilon = 1e-9);
}

#[test]
fn test_stall_samples_without_addresses_skip_hotspots() {
    let unaddressed = |total: u64, counts: &[u64]| {
        MetricValue::new(total).with_instances(Instances::new(
            counts.iter().map(|n| Value::from(*n)).collect(),
        ))
    };
    let mut store = latency_bound_kernel();
    store.insert("smsp__pcsamp_sample_count", unaddressed(1000, &[500, 500]));
    store.insert(
        "smsp__pcsamp_warps_issue_stalled_long_scoreboard",
        unaddressed(800, &[400, 400]),
    );

    let report = RuleScheduler::new()
        .run(&default_registry().unwrap(), &store)
        .unwrap();

    assert!(report.status("CPIStall").is_some_and(|s| !s.is_aborted()));
    let stalls: Vec<_> = report.sink.findings_for("CPIStall").collect();
    assert!(stalls.iter().all(|f| f.kind != FindingKind::Error));
    assert!(stalls
        .iter()
        .all(|f| f.title.as_deref() != Some("Stall Hotspots")));

    let long_scoreboard = stalls
        .iter()
        .find(|f| f.title.as_deref() == Some("Long Scoreboard Stalls"))
        .unwrap();
    assert_abs_diff_eq!(long_scoreboard.speedup.unwrap().percent(), 55.0, epsilon = 1e-9);
}

#[test]
fn test_memory_bound_kernel_names_the_busiest_unit() {
    let store = MemoryMetricStore::new()
        .with("launch__waves_per_multiprocessor", 12.0)
        .with("sm__throughput.avg.pct_of_peak_sustained_elapsed", 20.0)
        .with(
            "gpu__compute_memory_throughput.avg.pct_of_peak_sustained_elapsed",
            75.0,
        )
        .with(
            "breakdown:gpu__compute_memory_throughput.avg.pct_of_peak_sustained_elapsed",
            "lts__throughput.avg.pct_of_peak_sustained_elapsed, \
             dram__throughput.avg.pct_of_peak_sustained_elapsed",
        )
        .with("lts__throughput.avg.pct_of_peak_sustained_elapsed", 50.0)
        .with("dram__throughput.avg.pct_of_peak_sustained_elapsed", 70.0);

    let registry = RuleRegistry::new().with_rule(SolBottleneck::new()).unwrap();
    let report = RuleScheduler::new().run(&registry, &store).unwrap();

    let finding = report.sink.findings_for("SOLBottleneck").next().unwrap();
    assert_eq!(finding.title.as_deref(), Some("High Memory Throughput"));
    assert!(finding.body.contains("DRAM bottleneck"));
    assert_eq!(report.sink.len(), 1);
}

/// Evaluates levels on the rayon pool only with `--features parallel`.
#[test]
fn test_parallel_pass_matches_sequential() {
    let store = latency_bound_kernel();
    let registry = default_registry().unwrap();

    let plan = RuleScheduler::plan(&registry).unwrap();
    assert_eq!(plan.levels()[1].len(), 3);

    let scheduler =
        RuleScheduler::with_config(EngineConfig::default().with_execution(ExecutionMode::Parallel));
    assert_eq!(scheduler.runs_in_parallel(), cfg!(feature = "parallel"));

    let sequential = RuleScheduler::new().run(&registry, &store).unwrap();
    let parallel = scheduler.run(&registry, &store).unwrap();

    assert_eq!(
        serde_json::to_string(&sequential.sink).unwrap(),
        serde_json::to_string(&parallel.sink).unwrap()
    );
}

#[test]
fn test_empty_profile_reports_every_rule_as_aborted() {
    let registry = default_registry().unwrap();
    let report = RuleScheduler::new()
        .run(&registry, &MemoryMetricStore::new())
        .unwrap();

    assert_eq!(report.aborted(), 6);
    assert_eq!(report.sink.count(FindingKind::Error), 6);
    assert!(report
        .sink
        .format_all()
        .ends_with("Summary: 0 optimization(s), 0 warning(s), 6 error(s)\n"));
}
