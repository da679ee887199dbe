use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};
use std::sync::Arc;
use stepgraph_core::{
    CheckpointConfig, CompileOptions, CompiledGraph, ConditionalEdgeResult, InMemoryCheckpointSaver,
    Reducer, Send, StateGraph, StateSchema, END, START,
};

fn linear_graph(len: usize, checkpointed: bool) -> CompiledGraph {
    let mut graph = StateGraph::new(StateSchema::new().field("count", Reducer::Sum));
    let mut previous = START.to_string();
    for i in 0..len {
        let name = format!("node_{}", i);
        graph.add_node(name.clone(), |_| Box::pin(async { Ok(json!({"count": 1})) }));
        graph.add_edge(previous, name.clone());
        previous = name;
    }
    graph.add_edge(previous, END);

    let mut options = CompileOptions::new();
    if checkpointed {
        options = options.with_checkpointer(Arc::new(InMemoryCheckpointSaver::new()));
    }
    graph.compile_with(options).unwrap()
}

fn fan_out_graph() -> CompiledGraph {
    let schema = StateSchema::new()
        .field("items", Reducer::Overwrite)
        .field("results", Reducer::Append);
    let mut graph = StateGraph::new(schema);
    graph.add_node("work", |input| {
        Box::pin(async move { Ok(json!({"results": [input["item"].clone()]})) })
    });
    graph.add_conditional_edges(
        START,
        |state: &Value| {
            let sends = state["items"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .map(|item| Send::new("work", json!({"item": item})))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            Ok(ConditionalEdgeResult::from(sends))
        },
        None,
    );
    graph.add_edge("work", END);
    graph.compile().unwrap()
}

fn linear_execution_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("linear graph");

    for len in [1usize, 10, 20] {
        let plain = linear_graph(len, false);
        group.bench_with_input(BenchmarkId::new("in memory", len), &plain, |b, app| {
            b.to_async(&runtime)
                .iter(|| async { app.invoke(black_box(json!({"count": 0}))).await.unwrap() });
        });

        let checkpointed = linear_graph(len, true);
        group.bench_with_input(BenchmarkId::new("checkpointed", len), &checkpointed, |b, app| {
            b.to_async(&runtime).iter(|| async {
                let config = CheckpointConfig::for_thread(uuid::Uuid::new_v4().to_string());
                app.invoke_with_config(Some(json!({"count": 0})), &config)
                    .await
                    .unwrap()
            });
        });
    }
    group.finish();
}

fn fan_out_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let app = fan_out_graph();
    let mut group = c.benchmark_group("map-reduce");

    for width in [10usize, 100] {
        let items: Vec<usize> = (0..width).collect();
        group.bench_with_input(BenchmarkId::from_parameter(width), &items, |b, items| {
            b.to_async(&runtime)
                .iter(|| async { app.invoke(json!({"items": items})).await.unwrap() });
        });
    }
    group.finish();
}

criterion_group!(benches, linear_execution_benchmark, fan_out_benchmark);
criterion_main!(benches);
