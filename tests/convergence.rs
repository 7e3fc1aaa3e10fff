//! Whole-ring behavior under growth and churn: after churn stops and
//! stabilization keeps running, the successor chain must become a single
//! cycle visiting every present node in ring order.

use chordal::{Config, Id, LatencyModel, Rpc};

fn sim_config(seed: u64) -> Config {
    Config {
        bits: 8,
        // Short periods so virtual-time runs converge quickly.
        stabilize_period: 2_000,
        fix_fingers_period: 3_000,
        request_timeout: 200,
        latency: LatencyModel::Exponential { mean: 20 },
        seed: Some(seed),
        ..Default::default()
    }
}

/// Present node ids, in ring order starting from the smallest.
fn members(rpc: &Rpc) -> Vec<Id> {
    let mut ids: Vec<Id> = rpc.nodes().map(|n| n.id()).collect();
    ids.sort();
    ids
}

/// Walk successor pointers from the smallest member and assert they form
/// one cycle in exactly ring order.
fn assert_ring_order(rpc: &Rpc) {
    let ids = members(rpc);
    assert!(!ids.is_empty());

    for (k, &id) in ids.iter().enumerate() {
        let view = rpc.view(id).expect("member view");
        let expected_succ = ids[(k + 1) % ids.len()];
        let expected_pred = ids[(k + ids.len() - 1) % ids.len()];

        assert_eq!(
            view.successor, expected_succ,
            "successor of {} out of order",
            id
        );
        assert_eq!(
            view.predecessor, expected_pred,
            "predecessor of {} out of order",
            id
        );
    }
}

#[test]
fn sequential_joins_converge_to_ring_order() {
    let mut rpc = Rpc::new(sim_config(101)).unwrap();
    rpc.seed(&[7]);

    for raw in [23u64, 91, 140, 200, 250, 33, 120, 180, 66, 210, 5, 150] {
        let rx = rpc.join(Id(raw), Id(7)).expect("bootstrap accepts");
        let report = rpc.drive(&rx).expect("join settles");
        report.expect("join succeeds");

        // Give the ring a little time between arrivals.
        rpc.run_for(5_000);
    }

    // No further churn: finitely many stabilization rounds must restore
    // exact ring order everywhere.
    rpc.run_for(120_000);

    assert_eq!(members(&rpc).len(), 13);
    assert_ring_order(&rpc);
}

#[test]
fn lookups_stay_correct_and_logarithmic_after_convergence() {
    let mut rpc = Rpc::new(sim_config(7)).unwrap();
    rpc.seed(&[7]);

    for raw in [20u64, 40, 60, 80, 100, 120, 140, 160, 180, 200, 220, 240] {
        let rx = rpc.join(Id(raw), Id(7)).expect("bootstrap accepts");
        rpc.drive(&rx).expect("join settles").expect("join succeeds");
        rpc.run_for(5_000);
    }
    rpc.run_for(120_000);

    let ids = members(&rpc);

    for key in [0u64, 19, 21, 77, 130, 255, 200, 95] {
        let key = Id(key);
        let found = rpc.resolve(Id(7), key).expect("lookup succeeds");

        // The owner is the first member at or after the key in ring order.
        let expected = ids
            .iter()
            .copied()
            .min_by_key(|n| rpc.space().distance(key, *n))
            .expect("ring is not empty");
        assert_eq!(found.successor, expected, "owner of {}", key);

        // Far below the hop limit on a converged ring of this size.
        assert!(found.hops <= 8, "key {} took {} hops", key, found.hops);
    }
}

#[test]
fn ring_heals_after_mixed_churn() {
    let mut rpc = Rpc::new(sim_config(29)).unwrap();
    rpc.seed(&[0, 32, 64, 96, 128, 160, 192, 224]);

    // A graceful departure, a crash, and a late join, all close together.
    assert!(rpc.leave(Id(96)));
    rpc.crash(Id(192));
    rpc.run_for(1_000);

    let rx = rpc.join(Id(80), Id(0)).expect("bootstrap accepts");
    rpc.drive(&rx).expect("join settles").expect("join succeeds");

    // Let timeouts, alerts, and stabilization settle everything.
    rpc.run_for(300_000);

    let ids = members(&rpc);
    assert_eq!(
        ids,
        vec![Id(0), Id(32), Id(64), Id(80), Id(128), Id(160), Id(224)]
    );
    assert_ring_order(&rpc);

    // Ownership reflects the survivors.
    assert_eq!(rpc.find_successor(Id(0), Id(90)).unwrap(), Id(128));
    assert_eq!(rpc.find_successor(Id(64), Id(200)).unwrap(), Id(224));
}

#[test]
fn identical_seeds_produce_identical_rings() {
    let run = |seed: u64| {
        let mut rpc = Rpc::new(sim_config(seed)).unwrap();
        rpc.seed(&[3]);

        for raw in [50u64, 100, 150, 200] {
            let rx = rpc.join(Id(raw), Id(3)).expect("bootstrap accepts");
            rpc.drive(&rx).expect("join settles").expect("join succeeds");
            rpc.run_for(3_000);
        }

        rpc.crash(Id(150));
        rpc.run_for(200_000);

        let mut views: Vec<_> = rpc
            .nodes()
            .map(|n| {
                (
                    n.id(),
                    n.table().successor(),
                    n.table().predecessor(),
                    n.table().fingers().to_vec(),
                )
            })
            .collect();
        views.sort();
        (rpc.now(), views)
    };

    assert_eq!(run(77), run(77));
}
