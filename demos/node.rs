//! A live ring on wall time: the engine runs on its own thread and serves
//! lookups until ctrl-c.
//!
//! Run: `cargo run --example node`

use std::thread;
use std::time::Duration;

use chordal::{Config, Id, LatencyModel, Overlay};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let overlay = Overlay::spawn(Config {
        bits: 16,
        stabilize_period: 2_000,
        fix_fingers_period: 3_000,
        request_timeout: 200,
        latency: LatencyModel::Constant(5),
        seed: Some(1),
        ..Default::default()
    })
    .expect("valid bit width");

    let ids = overlay.seed(&[100, 9_000, 21_000, 40_000, 52_000]);
    println!("ring members: {:?}", ids);

    let (stop_tx, stop_rx) = flume::bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .expect("ctrl-c handler");

    let origin = ids[0];
    let mut key = 0u64;

    loop {
        if stop_rx.try_recv().is_ok() {
            break;
        }

        key = key.wrapping_add(7_919) % 65_536;
        match overlay.find_successor(origin, Id(key)) {
            Ok(owner) => println!("key {:>6} -> owner {}", key, owner),
            Err(error) => println!("key {:>6} -> {}", key, error),
        }

        thread::sleep(Duration::from_secs(1));
    }

    println!("shutting down");
    overlay.shutdown();
}
