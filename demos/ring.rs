//! Grow a simulated ring one join at a time, then inspect the result.
//!
//! Run: `cargo run --example ring -- --nodes 24 --bits 12`

use chordal::{Config, Id, LatencyModel, Rpc};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Parser, Debug)]
#[command(name = "ring")]
struct Args {
    /// Number of nodes in the ring.
    #[arg(long, default_value_t = 16)]
    nodes: u32,
    /// Identifier bit width.
    #[arg(long, default_value_t = 12)]
    bits: u8,
    /// RNG seed for reproducible runs.
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let mut rpc = Rpc::new(Config {
        bits: args.bits,
        stabilize_period: 2_000,
        fix_fingers_period: 3_000,
        latency: LatencyModel::Exponential { mean: 20 },
        seed: Some(args.seed),
        ..Default::default()
    })
    .expect("valid bit width");

    let mut rng = StdRng::seed_from_u64(args.seed);
    let space = rpc.space();

    let first = space.random_id(&mut rng);
    rpc.seed(&[first.0]);
    println!("seeded ring with node {}", first);

    let mut joined = 1;
    while joined < args.nodes {
        let id = space.random_id(&mut rng);
        let rx = match rpc.join(id, first) {
            Ok(rx) => rx,
            Err(error) => {
                println!("join {} skipped: {}", id, error);
                continue;
            }
        };

        match rpc.drive(&rx) {
            Some(Ok(report)) => {
                println!(
                    "node {:>6} joined  succ {:>6}  pred {:>6}",
                    id, report.successor, report.predecessor
                );
                joined += 1;
            }
            other => println!("join {} failed: {:?}", id, other),
        }

        rpc.run_for(4_000);
    }

    // Let stabilization and finger refresh settle the whole table set.
    rpc.run_for(240_000);

    let mut ids: Vec<Id> = rpc.nodes().map(|n| n.id()).collect();
    ids.sort();

    println!("\nring order after convergence:");
    for id in &ids {
        let view = rpc.view(*id).expect("member");
        println!(
            "  {:>6}: succ {:>6}  pred {:>6}",
            id, view.successor, view.predecessor
        );
    }

    println!("\nsample lookups from {}:", first);
    for _ in 0..8 {
        let key = space.random_id(&mut rng);
        match rpc.resolve(first, key) {
            Ok(found) => println!(
                "  key {:>6} -> owner {:>6} in {} hops",
                key, found.successor, found.hops
            ),
            Err(error) => println!("  key {:>6} -> {}", key, error),
        }
    }

    println!("\nvirtual time elapsed: {} ms", rpc.now());
}
