//! Evaluator throughput on the scalar reference backend.
//!
//! Run with: `cargo bench -p tengen-net`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use tengen_minigo::MiniGoban;
use tengen_net::synthetic::SyntheticNet;
use tengen_net::{parse_weights, CpuPipe, Ensemble, NetConfig, Network};

fn bench_forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluator_forward");

    for (board_size, channels, blocks) in [(9usize, 16usize, 2usize), (9, 32, 4)] {
        let loaded = parse_weights(
            &SyntheticNet::single(board_size, channels, blocks).render(),
            board_size,
        )
        .unwrap();
        let cfg = NetConfig::for_board(board_size).with_cache(false);
        let net = Network::with_pipe(loaded, cfg, 100, CpuPipe::new(board_size)).unwrap();
        let board = MiniGoban::new(board_size, 7.5);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("direct", format!("{channels}x{blocks}")),
            &net,
            |b, net| {
                let mut rng = ChaCha20Rng::seed_from_u64(42);
                b.iter(|| {
                    net.get_output(&board, Ensemble::Direct(0), false, false, &mut rng)
                        .unwrap()
                });
            },
        );
    }

    group.finish();
}

fn bench_cache_hit(c: &mut Criterion) {
    let loaded = parse_weights(&SyntheticNet::single(9, 16, 2).render(), 9).unwrap();
    let net = Network::with_pipe(loaded, NetConfig::for_board(9), 1000, CpuPipe::new(9)).unwrap();
    let board = MiniGoban::new(9, 7.5);
    let mut rng = ChaCha20Rng::seed_from_u64(42);
    // Warm the cache.
    net.get_output(&board, Ensemble::Direct(0), true, true, &mut rng)
        .unwrap();

    c.bench_function("evaluator_cache_hit", |b| {
        b.iter(|| {
            net.get_output(&board, Ensemble::Direct(0), true, false, &mut rng)
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_forward, bench_cache_hit);
criterion_main!(benches);
