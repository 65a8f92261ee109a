//! Node operation benchmarks: expansion, selection and updates.
//!
//! Run with: `cargo bench -p tengen-mcts`

use std::sync::atomic::AtomicUsize;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use tengen_core::PASS;
use tengen_mcts::{LeafEval, SearchConfig, UctNode, UniformEvaluator};
use tengen_minigo::MiniGoban;

fn expanded_root(board_size: usize, cfg: &SearchConfig) -> (UctNode, MiniGoban) {
    let root = UctNode::new(PASS, 1.0);
    let board = MiniGoban::new(board_size, 7.5);
    let eval = UniformEvaluator::new(board_size);
    let count = AtomicUsize::new(0);
    let mut rng = ChaCha20Rng::seed_from_u64(42);
    root.create_children(&count, &board, &eval, cfg, &mut rng, 0.0, false)
        .unwrap()
        .expect("expansion");
    (root, board)
}

fn bench_select_child(c: &mut Criterion) {
    let cfg = SearchConfig {
        exploit_symmetries: false,
        ..SearchConfig::default()
    };
    let (root, board) = expanded_root(19, &cfg);

    // Spread some visits so the selection sees a realistic mix.
    let leaf = LeafEval {
        value: 0.55,
        alpkt: 0.0,
        beta: 1.0,
        beta2: 1.0,
        is_sai: false,
    };
    for _ in 0..200 {
        let child = root
            .select_child(&board, true, None, &[], false, &cfg)
            .unwrap();
        child.update(&leaf, false);
        root.update(&leaf, false);
    }

    c.bench_function("select_child_19x19", |b| {
        b.iter(|| {
            black_box(
                root.select_child(&board, true, None, &[], false, &cfg)
                    .unwrap()
                    .mv(),
            )
        })
    });
}

fn bench_expansion(c: &mut Criterion) {
    let cfg = SearchConfig::default();
    c.bench_function("create_children_19x19", |b| {
        let board = MiniGoban::new(19, 7.5);
        let eval = UniformEvaluator::new(19);
        let count = AtomicUsize::new(0);
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        b.iter(|| {
            let root = UctNode::new(PASS, 1.0);
            root.create_children(&count, &board, &eval, &cfg, &mut rng, 0.0, false)
                .unwrap()
                .unwrap();
            black_box(root.children().len())
        })
    });
}

fn bench_update(c: &mut Criterion) {
    let node = UctNode::new(0, 0.5);
    let leaf = LeafEval {
        value: 0.5,
        alpkt: 1.0,
        beta: 0.4,
        beta2: -1.0,
        is_sai: true,
    };
    c.bench_function("update_sai_with_quantiles", |b| {
        b.iter(|| {
            node.update(&leaf, false);
            node.update_all_quantiles(leaf.alpkt, leaf.beta, leaf.beta2);
        })
    });
}

criterion_group!(benches, bench_select_child, bench_expansion, bench_update);
criterion_main!(benches);
