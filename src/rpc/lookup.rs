//! Key resolution: walking the ring toward the owner of a key.
//!
//! A lookup from node `n` for key `k` terminates immediately when `k` falls
//! in `(n, n.successor]`; otherwise it repeatedly moves to the table entry
//! most closely preceding `k`, either under the origin's control
//! (iterative) or by forwarding the request hop to hop (recursive). Each
//! hop strictly shrinks the remaining arc to the key, which bounds a
//! stabilized ring's walk at O(log N) hops; the configured hop limit
//! catches walks that stop making progress mid-churn.

use tracing::{debug, trace};

use crate::common::{Id, LookupResult, RequestSpecific, ResponseSpecific, RoutingTable};
use crate::rpc::continuation::{Chain, Deliver, Frame, Resume, ReturnValue};
use crate::rpc::{Rpc, RoutingMode};

/// Why a lookup produced no owner.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupError {
    /// The origin node is not a present ring member.
    #[error("origin node is not a present ring member")]
    UnknownOrigin,
    /// The walk exceeded the configured hop limit without converging.
    #[error("walk exceeded the configured hop limit")]
    HopLimit,
    /// Every route toward the key died under the walk.
    #[error("no live route toward the key")]
    NoRoute,
}

/// Neighbor selection behind the lookup walk.
///
/// Implementations pick the table entry most closely preceding the key;
/// returning `None` defers to the successor pointer. `live` reports whether
/// an id currently belongs to a present ring member, so stale slots are
/// skipped rather than followed.
pub trait NeighborStrategy: std::fmt::Debug + Send {
    fn closest_preceding(
        &self,
        table: &RoutingTable,
        key: Id,
        live: &dyn Fn(Id) -> bool,
    ) -> Option<Id>;
}

/// Full finger-table scan from the coarsest level down: the first live
/// finger inside `(n, key)` is the best shortcut known.
#[derive(Debug, Clone, Copy)]
pub struct FingerStrategy;

impl NeighborStrategy for FingerStrategy {
    fn closest_preceding(
        &self,
        table: &RoutingTable,
        key: Id,
        live: &dyn Fn(Id) -> bool,
    ) -> Option<Id> {
        let space = table.space();

        for i in (0..space.bits()).rev() {
            let f = table.finger(i);
            if f != table.id() && live(f) && space.between_open(table.id(), key, f) {
                return Some(f);
            }
        }

        None
    }
}

/// Successor-only routing: never consults fingers. Correct on any ring but
/// linear in ring size; useful as a baseline and for tiny rings.
#[derive(Debug, Clone, Copy)]
pub struct SuccessorStrategy;

impl NeighborStrategy for SuccessorStrategy {
    fn closest_preceding(
        &self,
        _table: &RoutingTable,
        _key: Id,
        _live: &dyn Fn(Id) -> bool,
    ) -> Option<Id> {
        None
    }
}

impl Rpc {
    // === Public Methods ===

    /// Resolve the owner of `key`, starting from `origin`'s table. The
    /// receiver yields once; a dropped receiver means the walk died with
    /// the nodes carrying it.
    pub fn lookup(&mut self, origin: Id, key: Id) -> flume::Receiver<Result<LookupResult, LookupError>> {
        let (tx, rx) = flume::bounded(1);
        self.lookup_into(origin, key, tx);
        rx
    }

    /// Like [Rpc::lookup] but delivering into a caller-provided channel.
    pub(crate) fn lookup_into(
        &mut self,
        origin: Id,
        key: Id,
        tx: flume::Sender<Result<LookupResult, LookupError>>,
    ) {
        if !self.is_present(origin) {
            let _ = tx.send(Err(LookupError::UnknownOrigin));
            return;
        }

        self.start_lookup(origin, key, Deliver::Channel(tx));
    }

    /// [Rpc::resolve] returning only the owning node.
    pub fn find_successor(&mut self, origin: Id, key: Id) -> Result<Id, LookupError> {
        self.resolve(origin, key).map(|r| r.successor)
    }

    /// [Rpc::resolve] returning the node immediately preceding the owner.
    pub fn find_predecessor(&mut self, origin: Id, key: Id) -> Result<Id, LookupError> {
        self.resolve(origin, key).map(|r| r.predecessor)
    }

    // === Crate Internals ===

    /// Begin a walk at the origin's own table.
    pub(crate) fn start_lookup(&mut self, origin: Id, key: Id, deliver: Deliver) {
        let key = self.space.id(key.0);

        let succ = match self.registry.get(&origin) {
            Some(node) => node.table.successor(),
            None => {
                self.deliver(origin, deliver, ReturnValue::Failed { target: origin });
                return;
            }
        };

        if self.space.between_right_incl(origin, succ, key) {
            let result = LookupResult {
                predecessor: origin,
                successor: succ,
                hops: 0,
            };
            self.deliver(
                origin,
                deliver,
                ReturnValue::Response(ResponseSpecific::FoundSuccessor(result)),
            );
            return;
        }

        let first = self.pick_next_hop(origin, key).unwrap_or(succ);
        self.lookup_go(origin, key, first, deliver);
    }

    /// Begin a walk at an explicit first hop, skipping the origin's own
    /// table; this is how a joining node resolves through its bootstrap.
    pub(crate) fn lookup_seeded(&mut self, origin: Id, key: Id, seed: Id, deliver: Deliver) {
        let key = self.space.id(key.0);
        self.lookup_go(origin, key, seed, deliver);
    }

    fn lookup_go(&mut self, origin: Id, key: Id, first: Id, deliver: Deliver) {
        trace!(%origin, %key, %first, "lookup starts");

        match self.config.routing {
            RoutingMode::Iterative => {
                let mut chain = Chain::new();
                chain.push(Frame {
                    resume_at: origin,
                    token: None,
                    resume: Resume::Deliver(deliver),
                });
                self.lookup_step(origin, key, first, 0, chain);
            }
            RoutingMode::Recursive => {
                self.call(
                    origin,
                    first,
                    RequestSpecific::FindSuccessor { key, hops: 1 },
                    Chain::new(),
                    Resume::Deliver(deliver),
                );
            }
        }
    }

    /// Iterative mode: ask `hop` for its closest-preceding entry.
    fn lookup_step(&mut self, at: Id, key: Id, hop: Id, hops: u16, chain: Chain) {
        if self.registry.contains_key(&hop) {
            self.call(
                at,
                hop,
                RequestSpecific::FindClosestPred { key },
                chain,
                Resume::LookupStep { key, hop, hops },
            );
            return;
        }

        // The chosen hop vanished before we could ask it: clean it out of
        // our own table and route around it.
        self.peer_failed(at, hop);
        self.reroute(at, key, hop, hops, chain);
    }

    /// Iterative mode: a hop answered (or was declared dead).
    pub(crate) fn lookup_step_reply(
        &mut self,
        at: Id,
        key: Id,
        hop: Id,
        hops: u16,
        chain: Chain,
        value: ReturnValue,
    ) {
        match value {
            ReturnValue::Response(ResponseSpecific::ClosestPred { closest, successor }) => {
                let hops = hops + 1;

                if self.space.between_right_incl(hop, successor, key) {
                    let result = LookupResult {
                        predecessor: hop,
                        successor,
                        hops,
                    };
                    self.return_to(
                        at,
                        chain,
                        ReturnValue::Response(ResponseSpecific::FoundSuccessor(result)),
                    );
                    return;
                }

                if hops >= self.config.hop_limit {
                    debug!(%at, %key, hops, "lookup ran out of hop budget");
                    self.return_to(at, chain, ReturnValue::Expired);
                    return;
                }

                let next = if closest == hop || closest == at {
                    successor
                } else {
                    closest
                };
                self.lookup_step(at, key, next, hops, chain);
            }
            ReturnValue::Failed { .. } => {
                // Failure cleanup already ran at this origin; restart from
                // whatever the repaired table still knows.
                self.reroute(at, key, hop, hops, chain);
            }
            other => {
                trace!(%at, ?other, "unexpected lookup reply dropped");
                self.abort(chain);
            }
        }
    }

    /// Pick a fresh hop from the origin's (just repaired) table.
    fn reroute(&mut self, at: Id, key: Id, dead: Id, hops: u16, chain: Chain) {
        let succ = match self.registry.get(&at) {
            Some(node) => node.table.successor(),
            None => {
                self.abort(chain);
                return;
            }
        };

        if succ == at {
            // Nothing left to ask: a lone node owns the whole ring.
            let result = LookupResult {
                predecessor: at,
                successor: at,
                hops,
            };
            self.return_to(
                at,
                chain,
                ReturnValue::Response(ResponseSpecific::FoundSuccessor(result)),
            );
            return;
        }

        let hops = hops + 1;
        if hops >= self.config.hop_limit {
            self.return_to(at, chain, ReturnValue::Expired);
            return;
        }

        let next = self.pick_next_hop(at, key).unwrap_or(succ);
        if next == dead {
            self.abort(chain);
            return;
        }

        self.lookup_step(at, key, next, hops, chain);
    }

    /// Recursive mode: answer locally or pass the chain to the next hop.
    pub(crate) fn handle_find_successor(&mut self, at: Id, key: Id, hops: u16, chain: Chain) {
        let succ = match self.registry.get(&at) {
            Some(node) => node.table.successor(),
            None => {
                self.abort(chain);
                return;
            }
        };

        if self.space.between_right_incl(at, succ, key) {
            let result = LookupResult {
                predecessor: at,
                successor: succ,
                hops,
            };
            self.return_to(
                at,
                chain,
                ReturnValue::Response(ResponseSpecific::FoundSuccessor(result)),
            );
            return;
        }

        if hops >= self.config.hop_limit {
            debug!(%at, %key, hops, "forwarded lookup ran out of hop budget; chain dropped");
            self.abort(chain);
            return;
        }

        let next = self.pick_next_hop(at, key).unwrap_or(succ);
        self.forward(
            at,
            next,
            RequestSpecific::FindSuccessor { key, hops: hops + 1 },
            chain,
        );
    }

    /// Bottom of every walk: hand the outcome to whatever started it.
    pub(crate) fn deliver(&mut self, at: Id, deliver: Deliver, value: ReturnValue) {
        let outcome = match value {
            ReturnValue::Response(ResponseSpecific::FoundSuccessor(result)) => Ok(result),
            ReturnValue::Expired => Err(LookupError::HopLimit),
            ReturnValue::Failed { .. } => Err(LookupError::NoRoute),
            ReturnValue::Response(other) => {
                trace!(%at, ?other, "unexpected terminal lookup value");
                Err(LookupError::NoRoute)
            }
        };

        match deliver {
            Deliver::Channel(tx) => {
                let _ = tx.send(outcome);
            }
            Deliver::Join(tx) => self.finish_join(at, outcome, tx),
            Deliver::Finger { level } => self.finish_fix_finger(at, level, outcome),
            Deliver::Rebootstrap => self.finish_rebootstrap(at, outcome),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::RingSpace;
    use crate::rpc::{Config, LatencyModel, NeighborSelection};

    fn config() -> Config {
        Config {
            bits: 4,
            stabilize_period: 1 << 40,
            fix_fingers_period: 1 << 40,
            latency: LatencyModel::Constant(10),
            seed: Some(1),
            ..Default::default()
        }
    }

    #[test]
    fn closest_preceding_scans_coarsest_first() {
        let space = RingSpace::new(4).unwrap();
        let mut table = RoutingTable::new(Id(0), space);
        table.set_finger(0, Id(4), false);
        table.set_finger(1, Id(4), false);
        table.set_finger(2, Id(4), false);
        table.set_finger(3, Id(8), false);

        let all_live = |_: Id| true;

        assert_eq!(
            FingerStrategy.closest_preceding(&table, Id(6), &all_live),
            Some(Id(4))
        );
        assert_eq!(
            FingerStrategy.closest_preceding(&table, Id(12), &all_live),
            Some(Id(8))
        );
        assert_eq!(
            FingerStrategy.closest_preceding(&table, Id(3), &all_live),
            None
        );

        // Dead entries are skipped in favor of finer live ones.
        let only_four = |id: Id| id == Id(4);
        assert_eq!(
            FingerStrategy.closest_preceding(&table, Id(12), &only_four),
            Some(Id(4))
        );
    }

    #[test]
    fn successor_strategy_never_shortcuts() {
        let space = RingSpace::new(4).unwrap();
        let mut table = RoutingTable::new(Id(0), space);
        table.set_finger(3, Id(8), false);

        assert_eq!(
            SuccessorStrategy.closest_preceding(&table, Id(12), &|_| true),
            None
        );
    }

    #[test]
    fn lookup_walks_fingers() {
        let mut rpc = Rpc::new(config()).unwrap();
        rpc.seed(&[0, 4, 8, 12]);

        let found = rpc.resolve(Id(0), Id(6)).unwrap();
        assert_eq!(found.successor, Id(8));
        assert_eq!(found.predecessor, Id(4));
        assert_eq!(rpc.find_predecessor(Id(0), Id(6)), Ok(Id(4)));

        let found = rpc.resolve(Id(0), Id(1)).unwrap();
        assert_eq!(found.successor, Id(4));
        assert_eq!(found.hops, 0);

        // Key identical to a member id is owned by that member.
        let found = rpc.resolve(Id(4), Id(12)).unwrap();
        assert_eq!(found.successor, Id(12));
    }

    #[test]
    fn recursive_mode_matches_iterative_answers() {
        let mut cfg = config();
        cfg.routing = crate::rpc::RoutingMode::Recursive;
        let mut rpc = Rpc::new(cfg).unwrap();
        rpc.seed(&[0, 4, 8, 12]);

        for (key, owner) in [(6u64, 8u64), (1, 4), (13, 0), (0, 0), (12, 12)] {
            let found = rpc.resolve(Id(0), Id(key)).unwrap();
            assert_eq!(found.successor, Id(owner), "key {}", key);
        }
    }

    #[test]
    fn successor_only_routing_is_linear_but_correct() {
        let mut cfg = config();
        cfg.strategy = NeighborSelection::SuccessorOnly;
        let mut rpc = Rpc::new(cfg).unwrap();
        rpc.seed(&[0, 4, 8, 12]);

        let found = rpc.resolve(Id(0), Id(13)).unwrap();
        assert_eq!(found.successor, Id(0));
        assert_eq!(found.predecessor, Id(12));
        assert_eq!(found.hops, 3);
    }

    #[test]
    fn hop_limit_cuts_stuck_walks() {
        let mut cfg = config();
        cfg.strategy = NeighborSelection::SuccessorOnly;
        cfg.hop_limit = 2;
        let mut rpc = Rpc::new(cfg).unwrap();
        rpc.seed(&[0, 4, 8, 12]);

        assert_eq!(rpc.resolve(Id(0), Id(13)), Err(LookupError::HopLimit));
    }

    #[test]
    fn unknown_origin_is_rejected() {
        let mut rpc = Rpc::new(config()).unwrap();
        rpc.seed(&[0, 8]);

        assert_eq!(rpc.resolve(Id(3), Id(5)), Err(LookupError::UnknownOrigin));
    }

    #[test]
    fn lookup_routes_around_a_dead_hop() {
        let mut rpc = Rpc::new(config()).unwrap();
        rpc.seed(&[0, 4, 8, 12]);

        // Node 4 is the natural first hop from 0 toward key 6.
        rpc.crash(Id(4));

        let found = rpc.resolve(Id(0), Id(6)).unwrap();
        assert_eq!(found.successor, Id(8));
        // The dead hop was confirmed failed and dropped along the way.
        assert!(rpc.node(Id(4)).is_none());
    }
}
