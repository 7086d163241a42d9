use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dfg_jit_backend::graph::{Edge, Graph, Node, NodeKind, TypeMask};
use dfg_jit_backend::regalloc::bank::RegisterBankAllocator;
use dfg_jit_backend::regalloc::use_list::{build_use_list, RegBank};

/// A block of `n` constants chained through unary-looking builtins, each
/// consuming the previous node's output, ending in a `Return`: a long
/// single live range competing with short-lived intermediates, the shape
/// that stresses eviction selection hardest.
fn chain_block(n: usize) -> Graph {
    let mut g = Graph::new(0, false);
    let entry = g.entry_block();
    let mut prev = g.add_node(entry, Node::new(NodeKind::Constant { value: 0 }));
    for _ in 0..n {
        prev = g.add_node(
            entry,
            Node::new(NodeKind::I64SubSaturateToZero).with_inputs([Edge::new(prev, 0, TypeMask::TOP)]),
        );
    }
    g.add_node(entry, Node::new(NodeKind::Return).with_inputs([Edge::new(prev, 0, TypeMask::TOP)]));
    g
}

fn bench_use_list_builder(c: &mut Criterion) {
    let mut group = c.benchmark_group("use_list_builder");

    for size in [16usize, 64, 256] {
        let graph = chain_block(size);
        group.bench_with_input(BenchmarkId::new("chain", size), &graph, |b, graph| {
            b.iter(|| {
                let list = build_use_list(black_box(graph), graph.entry_block(), None);
                black_box(list)
            });
        });
    }

    group.finish();
}

fn bench_bank_allocator_pressure(c: &mut Criterion) {
    let mut group = c.benchmark_group("bank_allocator");

    // More live values than physical registers forces the eviction path
    // (farthest-next-use victim selection via the sorting network) on
    // nearly every load.
    group.bench_function("load_under_pressure_15_regs", |b| {
        b.iter(|| {
            let mut bank = RegisterBankAllocator::new(RegBank::Gpr, 15);
            for i in 0..64u32 {
                let value = dfg_jit_backend::graph::NodeId(i);
                bank.load_register(black_box(value), 0, 1000 - i);
            }
        });
    });

    group.bench_function("load_no_pressure_64_regs", |b| {
        b.iter(|| {
            let mut bank = RegisterBankAllocator::new(RegBank::Gpr, 64);
            for i in 0..64u32 {
                let value = dfg_jit_backend::graph::NodeId(i);
                bank.load_register(black_box(value), 0, 1000 - i);
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_use_list_builder, bench_bank_allocator_pressure);
criterion_main!(benches);
