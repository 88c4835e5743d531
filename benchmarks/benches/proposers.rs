//! Proposer throughput: one cache/perturb/restore cycle per iteration.
//!
//! Guest trees are balanced over `n` leaves `g0..g{n-1}`, each mapped to one
//! of four host species.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::SmallRng;
use rand::SeedableRng;

use paralogy_phylo::{
    newick, BiasConfig, BiasedTopologyProposer, ChangeInfos, GuestHostMap, GuestState, MprMap,
    PoolConfig, PoolResamplingProposer, Proposer, TopologyProposer, TreePool,
};

// =========================================================================
// Fixtures
// =========================================================================

const HOST: &str = "((S0:1,S1:1):1,(S2:1.5,S3:1.5):0.5):0.5;";

fn balanced_newick(names: &[String]) -> String {
    if names.len() == 1 {
        return names[0].clone();
    }
    let (l, r) = names.split_at(names.len() / 2);
    format!("({},{})", balanced_newick(l), balanced_newick(r))
}

fn leaf_names(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("g{:04}", i)).collect()
}

fn guest(n: usize) -> newick::NewickTree {
    newick::parse(&format!("{};", balanced_newick(&leaf_names(n)))).unwrap()
}

fn mpr_map(nw: &newick::NewickTree) -> MprMap {
    let host = newick::parse(HOST).unwrap();
    let gs = GuestHostMap::from_pairs(
        leaf_names(nw.tree.leaf_count())
            .into_iter()
            .enumerate()
            .map(|(i, g)| (g, format!("S{}", i % 4))),
    )
    .unwrap();
    MprMap::new(Arc::new(gs), &nw.tree, &nw.names, Arc::new(host.tree), &host.names).unwrap()
}

/// Run `proposer` from the same starting state, rejecting every proposal.
fn run_cycle(proposer: &mut dyn Proposer, state: &mut GuestState, rng: &mut SmallRng) {
    let mut changes = ChangeInfos::new();
    let outcome = proposer.cache_and_perturb(state, rng, &mut changes);
    black_box(outcome);
    proposer.restore_cache(state);
}

// =========================================================================
// Branch swapping
// =========================================================================

fn bench_branch_swap(c: &mut Criterion) {
    let mut group = c.benchmark_group("branch_swap");

    for &n in &[16, 64, 256, 1_024] {
        group.throughput(Throughput::Elements(1));
        let nw = guest(n);

        group.bench_with_input(BenchmarkId::new("unbiased", n), &n, |b, _| {
            let mut state = GuestState::new(nw.tree.clone());
            let mut proposer = TopologyProposer::new();
            let mut rng = SmallRng::seed_from_u64(42);
            b.iter(|| run_cycle(&mut proposer, &mut state, &mut rng))
        });

        group.bench_with_input(BenchmarkId::new("biased", n), &n, |b, _| {
            let mut state = GuestState::new(nw.tree.clone());
            let mut proposer =
                BiasedTopologyProposer::new(TopologyProposer::new(), mpr_map(&nw), BiasConfig::default())
                    .unwrap();
            let mut rng = SmallRng::seed_from_u64(42);
            b.iter(|| run_cycle(&mut proposer, &mut state, &mut rng))
        });
    }

    group.finish();
}

// =========================================================================
// Pool resampling
// =========================================================================

fn bench_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_resampling");

    for &n in &[16, 256] {
        let nw = guest(n);
        // Pool of perturbed variants of the guest tree.
        let mut rng = SmallRng::seed_from_u64(7);
        let mut state = GuestState::new(nw.tree.clone());
        let mut swapper = TopologyProposer::new();
        let mut samples = Vec::new();
        for _ in 0..200 {
            let mut changes = ChangeInfos::new();
            swapper.cache_and_perturb(&mut state, &mut rng, &mut changes);
            swapper.clear_cache(&mut state);
            samples.push((state.tree.clone(), None));
        }
        let pool = TreePool::from_samples(samples).unwrap();

        for (label, equal) in [("weighted", false), ("equal", true)] {
            let config = PoolConfig {
                equal_topology_chance: equal,
                sample_lengths: false,
            };
            group.bench_with_input(BenchmarkId::new(label, n), &n, |b, _| {
                let mut state = GuestState::new(nw.tree.clone());
                let mut proposer = PoolResamplingProposer::new(pool.clone(), config, &nw.tree).unwrap();
                let mut rng = SmallRng::seed_from_u64(42);
                b.iter(|| run_cycle(&mut proposer, &mut state, &mut rng))
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_branch_swap, bench_pool);
criterion_main!(benches);
