//! Churn workload: nodes leave and crash while lookups keep flowing; prints
//! a histogram of lookup hop counts at the end.
//!
//! Run: `cargo run --example churn -- --nodes 48 --lookups 500`

use chordal::{Config, LatencyModel, Rpc};
use clap::Parser;
use histo::Histogram;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Parser, Debug)]
#[command(name = "churn")]
struct Args {
    /// Ring size before churn starts.
    #[arg(long, default_value_t = 32)]
    nodes: u32,
    /// Lookups to issue across the run.
    #[arg(long, default_value_t = 300)]
    lookups: u32,
    /// Fraction of nodes that churn out (half leave, half crash).
    #[arg(long, default_value_t = 0.25)]
    churn: f64,
    /// RNG seed for reproducible runs.
    #[arg(long, default_value_t = 7)]
    seed: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let args = Args::parse();

    let mut rpc = Rpc::new(Config {
        bits: 16,
        stabilize_period: 2_000,
        fix_fingers_period: 3_000,
        request_timeout: 200,
        latency: LatencyModel::Exponential { mean: 15 },
        seed: Some(args.seed),
        ..Default::default()
    })
    .expect("valid bit width");

    let mut rng = StdRng::seed_from_u64(args.seed);
    let space = rpc.space();

    let first = space.random_id(&mut rng);
    rpc.seed(&[first.0]);

    let mut members = vec![first];
    while members.len() < args.nodes as usize {
        let id = space.random_id(&mut rng);
        if let Ok(rx) = rpc.join(id, first) {
            if matches!(rpc.drive(&rx), Some(Ok(_))) {
                members.push(id);
            }
        }
        rpc.run_for(2_000);
    }
    rpc.run_for(120_000);

    // Churn out a slice of the ring, alternating graceful and abrupt.
    let churning = ((members.len() as f64) * args.churn) as usize;
    for k in 0..churning {
        // Never remove the first node; lookups originate there.
        let victim = members.remove(1 + rng.gen_range(0..members.len() - 1));
        if k % 2 == 0 {
            rpc.leave(victim);
        } else {
            rpc.crash(victim);
        }
        rpc.run_for(10_000);
    }
    rpc.run_for(180_000);

    let mut histogram = Histogram::with_buckets(10);
    let mut failures = 0u32;

    for _ in 0..args.lookups {
        let key = space.random_id(&mut rng);
        match rpc.resolve(first, key) {
            Ok(found) => histogram.add(u64::from(found.hops)),
            Err(_) => failures += 1,
        }
    }

    println!(
        "ring of {} after {} churn events, {} lookups ({} failed):\n",
        members.len(),
        churning,
        args.lookups,
        failures
    );
    println!("lookup hops:\n{}", histogram);
    println!("virtual time elapsed: {} ms", rpc.now());
}
