//! Benchmarks for planning and running analysis passes.
//!
//! Run with: cargo bench -p kerneldiag

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kerneldiag::{
    Finding, MemoryMetricStore, MetricRequest, Rule, RuleContext, RuleId, RuleOutput,
    RuleRegistry, RuleResult, RuleScheduler, Speedup, Weights,
};
use std::hint::black_box;

struct Layered {
    id: RuleId,
    parents: Vec<RuleId>,
    metric: String,
}

impl Rule for Layered {
    fn identifier(&self) -> RuleId {
        self.id.clone()
    }

    fn parent_identifiers(&self) -> Vec<RuleId> {
        self.parents.clone()
    }

    fn metric_requests(&self) -> Vec<MetricRequest> {
        vec![
            MetricRequest::new(self.metric.clone()),
            MetricRequest::new(format!("{}.optional", self.metric)).optional(0.5),
        ]
    }

    fn apply(&self, ctx: &RuleContext<'_>) -> RuleResult<RuleOutput> {
        let local = ctx.metrics().f64(&self.metric)?;
        let ceiling = ctx.parent_weights().get("share");
        let speedup = Speedup::compose(local, ceiling, kerneldiag::Combinator::Product);
        Ok(RuleOutput::new()
            .with_finding(Finding::optimization("layer finding").with_speedup(speedup))
            .with_child_weights(Weights::new().with("share", speedup.fraction())))
    }
}

/// `depth` layers of `width` rules; every rule depends on all rules of the
/// previous layer.
fn create_layered_registry(width: usize, depth: usize) -> (RuleRegistry, MemoryMetricStore) {
    let mut registry = RuleRegistry::new();
    let mut store = MemoryMetricStore::new();
    for layer in 0..depth {
        for slot in 0..width {
            let metric = format!("layer{}__slot{}", layer, slot);
            store.insert(metric.clone(), 0.1 + (slot as f64) / (width as f64 * 2.0));
            let parents = if layer == 0 {
                Vec::new()
            } else {
                (0..width)
                    .map(|p| RuleId::new(format!("L{}S{}", layer - 1, p)))
                    .collect()
            };
            registry
                .register(Layered {
                    id: RuleId::new(format!("L{}S{}", layer, slot)),
                    parents,
                    metric,
                })
                .unwrap();
        }
    }
    (registry, store)
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");
    for depth in [4, 16, 64].iter() {
        let (registry, _) = create_layered_registry(8, *depth);
        group.throughput(Throughput::Elements(registry.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &registry, |b, registry| {
            b.iter(|| black_box(RuleScheduler::plan(registry).unwrap()));
        });
    }
    group.finish();
}

fn bench_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("pass");
    for (width, depth) in [(4, 4), (16, 4), (4, 16), (16, 16)].iter() {
        let (registry, store) = create_layered_registry(*width, *depth);
        let scheduler = RuleScheduler::new();
        group.throughput(Throughput::Elements(registry.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", width, depth)),
            &(registry, store),
            |b, (registry, store)| {
                b.iter(|| black_box(scheduler.run(registry, store).unwrap()));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_plan, bench_pass);
criterion_main!(benches);
