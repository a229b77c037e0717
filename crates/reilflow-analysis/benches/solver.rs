//! Benchmarks for the monotone solver and register tracking.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use reilflow_analysis::mono::AnalysisDirection;
use reilflow_analysis::operand_graph::OperandGraph;
use reilflow_analysis::register_tracking::{RegisterTracker, RegisterTrackingOptions};
use reilflow_core::{BlockId, EdgeType, OperandSize, ReilBlock, ReilGraph, ReilInstruction, ReilOpcode, ReilOperand};

const REGISTERS: [&str; 6] = ["eax", "ebx", "ecx", "edx", "esi", "edi"];

fn register(index: usize) -> ReilOperand {
    ReilOperand::register(OperandSize::Dword, REGISTERS[index % REGISTERS.len()])
}

/// One native instruction: `t0 = a + b; c = t0`.
fn native_block(id: usize) -> ReilBlock {
    let base = (id as u64 + 1) << 8;
    let temp = ReilOperand::register(OperandSize::Dword, "t0");
    ReilBlock::new(
        BlockId(id as u32),
        vec![
            ReilInstruction::ternary(base, ReilOpcode::Add, register(id), register(id + 1), temp.clone()),
            ReilInstruction::binary(base + 1, ReilOpcode::Str, temp, register(id + 2)),
        ],
    )
}

/// Create a chain of blocks.
fn create_linear_graph(count: usize) -> ReilGraph {
    let mut graph = ReilGraph::new();
    for i in 0..count {
        graph.add_block(native_block(i)).expect("valid block");
        if i > 0 {
            graph
                .add_edge(BlockId(i as u32 - 1), BlockId(i as u32), EdgeType::JumpUnconditional)
                .expect("valid edge");
        }
    }
    graph
}

/// Create a chain with a back edge every `stride` blocks.
fn create_looping_graph(count: usize, stride: usize) -> ReilGraph {
    let mut graph = create_linear_graph(count);
    for i in (stride..count).step_by(stride) {
        graph
            .add_edge(BlockId(i as u32), BlockId((i - stride) as u32), EdgeType::JumpUnconditionalLoop)
            .expect("valid edge");
    }
    graph
}

fn bench_tracking(c: &mut Criterion) {
    let mut group = c.benchmark_group("register_tracking");

    for size in [16, 64, 256] {
        let linear = create_linear_graph(size);
        let looping = create_looping_graph(size, 8);

        for direction in [AnalysisDirection::Down, AnalysisDirection::Up] {
            let options = RegisterTrackingOptions::new(direction);
            let start = match direction {
                AnalysisDirection::Down => 1,
                AnalysisDirection::Up => size as u64,
            };

            group.bench_with_input(
                BenchmarkId::new(format!("linear_{direction:?}"), size),
                &linear,
                |b, graph| b.iter(|| RegisterTracker::track_graph(black_box(graph), start, "eax", &options)),
            );
            group.bench_with_input(
                BenchmarkId::new(format!("looping_{direction:?}"), size),
                &looping,
                |b, graph| b.iter(|| RegisterTracker::track_graph(black_box(graph), start, "eax", &options)),
            );
        }
    }

    group.finish();
}

fn bench_operand_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("operand_graph");

    for size in [16, 64, 256] {
        let looping = create_looping_graph(size, 8);
        group.bench_with_input(BenchmarkId::new("build", size), &looping, |b, graph| {
            b.iter(|| OperandGraph::build(black_box(graph)).edges().len())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_tracking, bench_operand_graph);
criterion_main!(benches);
