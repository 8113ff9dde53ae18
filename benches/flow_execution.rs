//! Performance benchmarks for the flowgraph engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use flowgraph::{
    expr, Component, ComponentRegistry, Context, EdgeConfig, FlowConfig, FlowEngine, FlowResult,
    FlowType, NodeConfig, StepConfig,
};
use serde_json::json;
use tokio::runtime::Runtime;

/// Lightweight computation component for benchmarking
#[derive(Debug)]
struct Compute {
    work_amount: u32,
}

impl Component for Compute {
    fn process(&self, ctx: &mut Context) -> FlowResult<()> {
        let mut value: i64 = ctx.get_as("value").unwrap_or(0);
        for i in 0..self.work_amount {
            value = value.wrapping_add(i as i64);
        }
        ctx.set("value", json!(value));
        Ok(())
    }
}

fn sequential_engine(steps: usize) -> FlowEngine {
    let mut registry = ComponentRegistry::new();
    let mut config = FlowConfig::new(FlowType::Sequential);
    for index in 0..steps {
        let name = format!("step_{index}");
        registry
            .register(name.clone(), Compute { work_amount: 100 })
            .unwrap();
        config = config.with_step(StepConfig::new(name));
    }
    FlowEngine::new(config, registry)
}

fn chain_graph_engine(nodes: usize) -> FlowEngine {
    let mut registry = ComponentRegistry::new();
    let mut config = FlowConfig::new(FlowType::Graph);
    for index in 0..nodes {
        let name = format!("node_{index}");
        registry
            .register(name.clone(), Compute { work_amount: 100 })
            .unwrap();
        config = config.with_node(NodeConfig::new(name.clone(), name.clone()));
        if index > 0 {
            config = config.with_edge(EdgeConfig::new(format!("node_{}", index - 1), name));
        }
    }
    FlowEngine::new(config, registry)
}

fn bench_sequential_execution(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("sequential_execution");

    for steps in [5usize, 20, 50] {
        let engine = sequential_engine(steps);
        group.bench_with_input(BenchmarkId::from_parameter(steps), &steps, |b, _| {
            b.iter(|| {
                let ctx = rt.block_on(engine.execute(None)).unwrap();
                black_box(ctx);
            });
        });
    }
    group.finish();
}

fn bench_dag_execution(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("dag_execution");

    for nodes in [5usize, 20, 50] {
        let engine = chain_graph_engine(nodes);
        group.bench_with_input(BenchmarkId::from_parameter(nodes), &nodes, |b, _| {
            b.iter(|| {
                let ctx = rt.block_on(engine.execute(None)).unwrap();
                black_box(ctx);
            });
        });
    }
    group.finish();
}

fn bench_condition_evaluation(c: &mut Criterion) {
    let mut ctx = Context::new();
    ctx.set("user", json!({"profile": {"age": 31, "tags": ["alpha", "beta"]}}));
    ctx.set("count", json!(12));

    let expressions = [
        "context.data.count > 10",
        "context.data.user.profile.age >= 18 and \"beta\" in context.data.user.profile.tags",
        "context.data.missing is None or context.data.count % 2 == 0",
    ];

    let mut group = c.benchmark_group("condition_evaluation");
    for (index, expression) in expressions.iter().enumerate() {
        group.bench_with_input(
            BenchmarkId::from_parameter(index),
            expression,
            |b, expression| {
                b.iter(|| black_box(expr::evaluate_condition(expression, &ctx).unwrap()));
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_sequential_execution,
    bench_dag_execution,
    bench_condition_evaluation
);
criterion_main!(benches);
