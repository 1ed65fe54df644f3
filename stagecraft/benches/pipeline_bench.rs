//! Benchmarks for dependency ordering and pipeline execution.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use stagecraft::pipeline::{DependencyGraph, DependencyMap, PipelineDefinition, PipelineRunner};
use stagecraft::stages::{EtlStage, LoopPredicate, StageLoop};
use stagecraft::variables::VariableSlot;

/// A chain of stages, each consuming its predecessor's output, declared in
/// reverse so ordering has real work to do.
fn chain(len: usize) -> Vec<EtlStage> {
    let mut stages: Vec<EtlStage> = (0..len)
        .map(|i| {
            let stage = EtlStage::new(format!("step_{i}")).produces(format!("v{i}"));
            let stage = if i == 0 {
                stage
            } else {
                stage.consumes(format!("v{}", i - 1))
            };
            stage.with_fn(move |vars| {
                vars.set(&format!("v{i}"), json!(i))?;
                Ok(())
            })
        })
        .collect();
    stages.reverse();
    stages
}

fn graph_benchmark(c: &mut Criterion) {
    let stages = chain(200);
    let explicit = DependencyMap::new();

    c.bench_function("graph_build_chain_200", |b| {
        b.iter(|| {
            let graph = DependencyGraph::build(black_box(&stages), &explicit, "iteration");
            black_box(graph)
        });
    });
}

fn run_benchmark(c: &mut Criterion) {
    let runner = PipelineRunner::new();

    let Ok(sequential) = PipelineDefinition::new("chain", chain(50), DependencyMap::new()) else {
        return;
    };
    c.bench_function("run_chain_50", |b| {
        b.iter(|| black_box(runner.run(&sequential)));
    });

    let body = EtlStage::new("accumulate")
        .with_slot(VariableSlot::transform("total").propagate())
        .with_fn(|vars| {
            let total: u64 = vars.get_as("total")?;
            vars.set("total", json!(total + 1))?;
            Ok(())
        });
    let seed = EtlStage::new("seed").with_slot(VariableSlot::produce("total").with_default(json!(0)));
    let looping = StageLoop::new([body], LoopPredicate::times(100)).into_stage();
    let Ok(looped) = PipelineDefinition::new("loop", vec![seed, looping], DependencyMap::new()) else {
        return;
    };
    c.bench_function("run_loop_100", |b| {
        b.iter(|| black_box(runner.run(&looped)));
    });
}

criterion_group!(benches, graph_benchmark, run_benchmark);
criterion_main!(benches);
