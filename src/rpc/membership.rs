//! Membership: join, periodic stabilization, finger refresh, graceful
//! leave, and failure cleanup.
//!
//! This is the state machine that keeps every routing table convergent:
//! distributed ring order may be wrong at any instant during churn, but
//! finitely many stabilization rounds after churn stops, the successor
//! chain is a single cycle again.

use tracing::{debug, trace, warn};

use crate::common::{
    AlertReason, Id, LookupResult, Node, NodeStatus, RequestSpecific, ResponseSpecific,
};
use crate::rpc::continuation::{Chain, Deliver, Resume, ReturnValue};
use crate::rpc::lookup::LookupError;
use crate::rpc::scheduler::{Action, TimerKind};
use crate::rpc::Rpc;

/// Why a join attempt did not take.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    /// The identifier already belongs to a registered node.
    #[error("identifier {0} is already taken on this ring")]
    DuplicateId(Id),
    /// The bootstrap peer is unknown or not a present ring member.
    #[error("bootstrap node {0} is unknown or not a ring member")]
    UnknownBootstrap(Id),
    /// The bootstrap never answered the join lookup; retry through another.
    #[error("bootstrap did not answer the join lookup")]
    BootstrapUnreachable,
}

/// The neighbors a completed join adopted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinReport {
    pub successor: Id,
    pub predecessor: Id,
}

impl Rpc {
    // === Public Methods ===

    /// Join a new node through a bootstrap peer.
    ///
    /// The node is registered immediately but stays absent (its table all
    /// self-pointers) until the predecessor walk through the bootstrap
    /// resolves; if the walk dies, the registration is removed again and no
    /// partial state survives, so the caller can retry through a different
    /// bootstrap.
    pub fn join(
        &mut self,
        id: Id,
        bootstrap: Id,
    ) -> Result<flume::Receiver<Result<JoinReport, JoinError>>, JoinError> {
        let (tx, rx) = flume::bounded(1);
        self.join_into(id, bootstrap, tx)?;
        Ok(rx)
    }

    /// Gracefully leave the ring: announce, migrate keys to the successor
    /// after the grace period, then disappear. Returns false for nodes that
    /// are not present members.
    pub fn leave(&mut self, id: Id) -> bool {
        let epoch = match self.registry.get_mut(&id) {
            Some(node) if node.status == NodeStatus::Present && node.reachable => {
                node.status = NodeStatus::Leaving;
                // Cancels maintenance timers; the leave completion carries
                // the new epoch.
                node.epoch += 1;
                node.epoch
            }
            _ => return false,
        };

        debug!(node = %id, "leaving the ring");
        self.schedule(self.config.leave_grace, id, Action::FinishLeave { epoch });
        true
    }

    /// Run one stabilization round at `id` right now, outside the periodic
    /// schedule. Useful for deterministic simulations and tests.
    pub fn run_stabilize(&mut self, id: Id) {
        if !self.is_present(id) {
            return;
        }

        if self.registry.get(&id).map(|n| n.isolated).unwrap_or(false) {
            self.rebootstrap(id);
        } else {
            self.stabilize_round(id);
        }
    }

    /// Re-resolve one finger at `id` right now, outside the periodic
    /// schedule.
    pub fn run_fix_fingers(&mut self, id: Id) {
        if self.is_present(id) {
            self.fix_next_finger(id);
        }
    }

    // === Join ===

    pub(crate) fn join_into(
        &mut self,
        id: Id,
        bootstrap: Id,
        tx: flume::Sender<Result<JoinReport, JoinError>>,
    ) -> Result<(), JoinError> {
        let id = self.space.id(id.0);
        let bootstrap = self.space.id(bootstrap.0);

        if self.registry.contains_key(&id) {
            return Err(JoinError::DuplicateId(id));
        }
        if !self.is_present(bootstrap) {
            return Err(JoinError::UnknownBootstrap(bootstrap));
        }

        let mut node = Node::new(id, self.space);
        node.bootstrap = Some(bootstrap);
        self.registry.insert(id, node);

        debug!(node = %id, via = %bootstrap, "joining");
        self.lookup_seeded(id, id, bootstrap, Deliver::Join(tx));
        Ok(())
    }

    pub(crate) fn finish_join(
        &mut self,
        at: Id,
        outcome: Result<LookupResult, LookupError>,
        tx: flume::Sender<Result<JoinReport, JoinError>>,
    ) {
        // A walk that resolves to the joining node itself never found the
        // ring at all.
        let outcome = outcome.and_then(|r| {
            if r.successor == at || r.predecessor == at {
                Err(LookupError::NoRoute)
            } else {
                Ok(r)
            }
        });

        let found = match outcome {
            Ok(found) => found,
            Err(_) => {
                self.destroy_node(at);
                debug!(node = %at, "join failed; no state kept");
                let _ = tx.send(Err(JoinError::BootstrapUnreachable));
                return;
            }
        };

        let (succ, pred) = match self.registry.get_mut(&at) {
            Some(node) => {
                node.table.update_predecessor(found.predecessor);
                node.table.update_successor(found.successor);
                node.status = NodeStatus::Present;
                (node.table.successor(), node.table.predecessor())
            }
            None => return,
        };

        // Keys in (pred, at] lived at the old successor until now.
        let space = self.space;
        self.storage.migrate_range(succ, at, pred, at, &space);

        self.cast(at, succ, RequestSpecific::Notify { candidate: at });
        if pred != succ {
            self.cast(at, pred, RequestSpecific::Notify { candidate: at });
        }

        self.schedule_maintenance(at);

        debug!(node = %at, successor = %succ, predecessor = %pred, "joined the ring");
        let _ = tx.send(Ok(JoinReport {
            successor: succ,
            predecessor: pred,
        }));
    }

    // === Timers ===

    pub(crate) fn schedule_maintenance(&mut self, at: Id) {
        let epoch = match self.registry.get(&at) {
            Some(node) => node.epoch,
            None => return,
        };

        let delay = self.jitter(self.config.stabilize_period);
        self.schedule(
            delay,
            at,
            Action::Timer {
                kind: TimerKind::Stabilize,
                epoch,
            },
        );

        let delay = self.jitter(self.config.fix_fingers_period);
        self.schedule(
            delay,
            at,
            Action::Timer {
                kind: TimerKind::FixFingers,
                epoch,
            },
        );
    }

    pub(crate) fn handle_timer(&mut self, at: Id, kind: TimerKind, epoch: u64) {
        let (isolated, current_epoch) = match self.registry.get(&at) {
            Some(node) if node.reachable && node.status == NodeStatus::Present => {
                (node.isolated, node.epoch)
            }
            _ => return,
        };

        if current_epoch != epoch {
            // Canceled by a leave or failure transition.
            return;
        }

        match kind {
            TimerKind::Stabilize => {
                let delay = self.jitter(self.config.stabilize_period);
                self.schedule(delay, at, Action::Timer { kind, epoch });

                if isolated {
                    self.rebootstrap(at);
                } else {
                    self.stabilize_round(at);
                }
            }
            TimerKind::FixFingers => {
                let delay = self.jitter(self.config.fix_fingers_period);
                self.schedule(delay, at, Action::Timer { kind, epoch });

                self.fix_next_finger(at);
            }
        }
    }

    // === Stabilize ===

    fn stabilize_round(&mut self, at: Id) {
        let lone = match self.registry.get(&at) {
            Some(node) => node.table.is_lone(),
            None => return,
        };

        if lone {
            return;
        }

        trace!(node = %at, "stabilize round");
        self.stabilize_level(at, 0, Chain::new());
    }

    /// Verify finger levels `level..window`, one call at a time; each level
    /// asks the node it points at for that node's predecessor, a strictly
    /// tighter candidate for the level whenever one exists.
    fn stabilize_level(&mut self, at: Id, level: u8, chain: Chain) {
        let window = self.config.stabilize_window.min(self.space.bits());
        let mut level = level;

        loop {
            if level >= window {
                self.stabilize_pred_phase(at, chain);
                return;
            }

            let target = match self.registry.get(&at) {
                Some(node) => node.table.finger(level),
                None => {
                    self.abort(chain);
                    return;
                }
            };

            if target == at {
                level += 1;
                continue;
            }

            if !self.registry.contains_key(&target) {
                // The slot points at a node that is simply gone; repair
                // locally instead of waiting for a timeout that can never
                // answer.
                self.peer_failed(at, target);
                level += 1;
                continue;
            }

            self.call(
                at,
                target,
                RequestSpecific::GetPredecessor,
                chain,
                Resume::StabilizeLevel { level },
            );
            return;
        }
    }

    pub(crate) fn stabilize_level_reply(
        &mut self,
        at: Id,
        level: u8,
        chain: Chain,
        value: ReturnValue,
    ) {
        if let ReturnValue::Response(ResponseSpecific::NodeInfo(info)) = &value {
            let candidate = info.predecessor;

            // Departing peers splice themselves out; adopt nothing from or
            // through them.
            if info.status != NodeStatus::Leaving && candidate != at && self.is_present(candidate)
            {
                let incumbent_live = match self.registry.get(&at) {
                    Some(node) => self.is_present(node.table.finger(level)),
                    None => {
                        self.abort(chain);
                        return;
                    }
                };

                if let Some(node) = self.registry.get_mut(&at) {
                    if node.table.set_finger(level, candidate, incumbent_live) {
                        trace!(node = %at, level, adopted = %candidate, "stabilize tightened finger");
                    }
                }
            }
        }

        self.stabilize_level(at, level + 1, chain);
    }

    /// Second phase: ask the predecessor who it believes follows it. A
    /// tighter answer becomes our predecessor, and both sides get notified
    /// so pointers converge from either end.
    fn stabilize_pred_phase(&mut self, at: Id, chain: Chain) {
        let pred = match self.registry.get(&at) {
            Some(node) => node.table.predecessor(),
            None => {
                self.abort(chain);
                return;
            }
        };

        if pred == at {
            self.abort(chain);
            self.finish_stabilize(at);
            return;
        }

        if !self.registry.contains_key(&pred) {
            self.peer_failed(at, pred);
            self.abort(chain);
            self.finish_stabilize(at);
            return;
        }

        self.call(
            at,
            pred,
            RequestSpecific::GetSuccessor,
            chain,
            Resume::StabilizePred,
        );
    }

    pub(crate) fn stabilize_pred_reply(&mut self, at: Id, chain: Chain, value: ReturnValue) {
        self.abort(chain);

        if let ReturnValue::Response(ResponseSpecific::NodeInfo(info)) = value {
            let candidate = info.successor;

            if info.status != NodeStatus::Leaving && candidate != at && self.is_present(candidate)
            {
                if let Some(node) = self.registry.get_mut(&at) {
                    if node.table.update_predecessor(candidate) {
                        trace!(node = %at, adopted = %candidate, "stabilize tightened predecessor");
                    }
                }
            }

            // The peer may not know about us yet.
            self.cast(at, info.id, RequestSpecific::Notify { candidate: at });
        }

        self.finish_stabilize(at);
    }

    fn finish_stabilize(&mut self, at: Id) {
        let succ = match self.registry.get(&at) {
            Some(node) => node.table.successor(),
            None => return,
        };

        if succ != at {
            self.cast(at, succ, RequestSpecific::Notify { candidate: at });
        }
    }

    // === Fix Fingers ===

    /// Re-resolve one finger level per firing, cycling through the table.
    fn fix_next_finger(&mut self, at: Id) {
        let bits = self.space.bits();
        let (level, start) = match self.registry.get_mut(&at) {
            Some(node) => {
                let level = node.next_finger;
                node.next_finger = (level + 1) % bits;
                (level, node.table.finger_start(level))
            }
            None => return,
        };

        trace!(node = %at, level, "refreshing finger");
        self.start_lookup(at, start, Deliver::Finger { level });
    }

    pub(crate) fn finish_fix_finger(
        &mut self,
        at: Id,
        level: u8,
        outcome: Result<LookupResult, LookupError>,
    ) {
        let owner = match outcome {
            Ok(found) => found.successor,
            Err(_) => return,
        };

        if owner == at || !self.is_present(owner) {
            return;
        }

        let incumbent_live = match self.registry.get(&at) {
            Some(node) => self.is_present(node.table.finger(level)),
            None => return,
        };

        if let Some(node) = self.registry.get_mut(&at) {
            if node.table.set_finger(level, owner, incumbent_live) {
                trace!(node = %at, level, adopted = %owner, "finger refreshed");
            }
        }
    }

    // === Notify / Alert ===

    /// A peer believes it may be our predecessor. Tighten the predecessor
    /// when it is, and the successor too when the sender sits between us
    /// and it; the latter is what lets notify traffic heal a node whose
    /// table collapsed.
    pub(crate) fn handle_notify(&mut self, at: Id, candidate: Id) {
        if candidate == at || !self.is_present(candidate) {
            return;
        }

        if let Some(node) = self.registry.get_mut(&at) {
            let tightened_pred = node.table.update_predecessor(candidate);
            let tightened_succ = node.table.update_successor(candidate);

            if tightened_pred || tightened_succ {
                if node.isolated && !node.table.is_lone() {
                    node.isolated = false;
                    debug!(node = %at, "healed by notify traffic");
                }
                trace!(node = %at, %candidate, "notify tightened neighbors");
            }
        }
    }

    pub(crate) fn handle_alert(&mut self, at: Id, candidate: Id, reason: AlertReason) {
        match reason {
            AlertReason::Leaving {
                successor,
                predecessor,
            } => {
                if let Some(node) = self.registry.get_mut(&at) {
                    if node.table.references(candidate) {
                        node.table.splice(candidate, successor, predecessor);
                        debug!(node = %at, departed = %candidate, "spliced around leaving neighbor");
                    }
                }
            }
            AlertReason::Failed => self.peer_failed(at, candidate),
        }
    }

    // === Leave ===

    pub(crate) fn finish_leave(&mut self, at: Id, epoch: u64) {
        let (succ, pred) = match self.registry.get(&at) {
            Some(node) if node.status == NodeStatus::Leaving && node.epoch == epoch => {
                (node.table.successor(), node.table.predecessor())
            }
            _ => return,
        };

        if succ != at {
            let space = self.space;
            self.storage.migrate_range(at, succ, pred, at, &space);
        }

        let alert = RequestSpecific::Alert {
            candidate: at,
            reason: AlertReason::Leaving {
                successor: succ,
                predecessor: pred,
            },
        };
        self.cast(at, succ, alert.clone());
        if pred != succ {
            self.cast(at, pred, alert);
        }

        self.destroy_node(at);
        debug!(node = %at, "left the ring");
    }

    // === Failure ===

    /// `observer` has confirmed `dead` unresponsive (retry exhaustion or a
    /// peer's alert): scrub the table, adopt the dead node's last-known
    /// predecessor when ours is gone, and warn the neighborhood.
    pub(crate) fn peer_failed(&mut self, observer: Id, dead: Id) {
        if observer == dead {
            return;
        }

        // Capture what the dying entry knew before removing it; a second
        // observer arriving later simply finds nothing.
        let dead_pred = self.registry.get(&dead).map(|n| n.table.predecessor());
        if dead_pred.is_some() {
            self.destroy_node(dead);
        }

        let (changed, collapsed, pred_was_dead) = match self.registry.get_mut(&observer) {
            Some(node) if node.table.references(dead) => {
                let pred_was_dead = node.table.predecessor() == dead;
                let collapsed = node.table.replace_finger(dead);
                (true, collapsed, pred_was_dead)
            }
            _ => (false, false, false),
        };

        if !changed {
            return;
        }

        if pred_was_dead {
            // Provisional: heals forward progress until stabilize finds the
            // true predecessor.
            let fallback = dead_pred.filter(|p| *p != dead).unwrap_or(observer);
            if let Some(node) = self.registry.get_mut(&observer) {
                node.table.repair_predecessor(fallback);
            }
        }

        let (succ, pred) = match self.registry.get_mut(&observer) {
            Some(node) => {
                if collapsed && node.table.predecessor() == observer && !node.isolated {
                    node.isolated = true;
                    warn!(node = %observer, "routing table collapsed to self; possible ring partition");
                }
                (node.table.successor(), node.table.predecessor())
            }
            None => return,
        };

        for peer in [succ, pred].iter().copied() {
            if peer != observer && peer != dead {
                self.cast(
                    observer,
                    peer,
                    RequestSpecific::Alert {
                        candidate: dead,
                        reason: AlertReason::Failed,
                    },
                );
            }
        }
    }

    // === Re-bootstrap ===

    /// An isolated node retries the neighbor walk through the peer it
    /// originally joined with.
    fn rebootstrap(&mut self, at: Id) {
        let bootstrap = match self.registry.get(&at).and_then(|n| n.bootstrap) {
            Some(b) if b != at && self.is_present(b) => b,
            _ => {
                trace!(node = %at, "no live bootstrap to rejoin through");
                return;
            }
        };

        debug!(node = %at, via = %bootstrap, "re-bootstrapping after isolation");
        let key = self.space.succ_offset(at, 0);
        self.lookup_seeded(at, key, bootstrap, Deliver::Rebootstrap);
    }

    pub(crate) fn finish_rebootstrap(&mut self, at: Id, outcome: Result<LookupResult, LookupError>) {
        let found = match outcome {
            Ok(found) => found,
            Err(_) => return,
        };

        let succ_ok = found.successor != at && self.is_present(found.successor);
        let pred_ok = found.predecessor != at && self.is_present(found.predecessor);

        let (succ, adopted) = match self.registry.get_mut(&at) {
            Some(node) => {
                let mut adopted = false;
                if succ_ok {
                    adopted |= node.table.update_successor(found.successor);
                }
                if pred_ok {
                    adopted |= node.table.update_predecessor(found.predecessor);
                }
                if adopted {
                    node.isolated = false;
                }
                (node.table.successor(), adopted)
            }
            None => return,
        };

        if adopted {
            debug!(node = %at, successor = %succ, "rejoined after isolation");
            self.cast(at, succ, RequestSpecific::Notify { candidate: at });
            if pred_ok && found.predecessor != succ {
                self.cast(at, found.predecessor, RequestSpecific::Notify { candidate: at });
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rpc::{Config, LatencyModel};

    fn config() -> Config {
        Config {
            bits: 4,
            stabilize_period: 1 << 40,
            fix_fingers_period: 1 << 40,
            latency: LatencyModel::Constant(10),
            seed: Some(3),
            ..Default::default()
        }
    }

    fn wait_join(
        rpc: &mut Rpc,
        rx: flume::Receiver<Result<JoinReport, JoinError>>,
    ) -> Result<JoinReport, JoinError> {
        rpc.drive(&rx).expect("join outcome")
    }

    #[test]
    fn join_between_existing_members() {
        let mut rpc = Rpc::new(config()).unwrap();
        rpc.seed(&[0, 4, 8, 12]);

        let rx = rpc.join(Id(2), Id(0)).unwrap();
        let report = wait_join(&mut rpc, rx).unwrap();

        assert_eq!(report.successor, Id(4));
        assert_eq!(report.predecessor, Id(0));

        let joined = rpc.view(Id(2)).unwrap();
        assert_eq!(joined.status, NodeStatus::Present);
        assert_eq!(joined.successor, Id(4));
        assert_eq!(joined.predecessor, Id(0));

        // One stabilization round at the old neighbors re-points the ring
        // through the newcomer.
        rpc.run_stabilize(Id(0));
        rpc.run_stabilize(Id(4));
        rpc.run_for(5_000);

        assert_eq!(rpc.view(Id(0)).unwrap().successor, Id(2));
        assert_eq!(rpc.view(Id(4)).unwrap().predecessor, Id(2));

        // And lookups respect the new ownership split.
        assert_eq!(rpc.find_successor(Id(0), Id(6)).unwrap(), Id(8));
        assert_eq!(rpc.find_successor(Id(0), Id(1)).unwrap(), Id(2));
    }

    #[test]
    fn join_migrates_owned_keys() {
        let mut rpc = Rpc::new(config()).unwrap();
        rpc.seed(&[0, 4, 8, 12]);

        // Keys (0, 2] belong to node 4 until node 2 arrives.
        rpc.storage_mut().insert(Id(4), Id(1));
        rpc.storage_mut().insert(Id(4), Id(2));
        rpc.storage_mut().insert(Id(4), Id(3));

        let rx = rpc.join(Id(2), Id(0)).unwrap();
        wait_join(&mut rpc, rx).unwrap();

        assert_eq!(rpc.storage().keys(Id(2)), vec![Id(1), Id(2)]);
        assert_eq!(rpc.storage().keys(Id(4)), vec![Id(3)]);
    }

    #[test]
    fn join_through_lone_bootstrap_forms_ring_of_two() {
        let mut rpc = Rpc::new(config()).unwrap();
        rpc.seed(&[5]);

        let rx = rpc.join(Id(9), Id(5)).unwrap();
        let report = wait_join(&mut rpc, rx).unwrap();

        assert_eq!(report.successor, Id(5));
        assert_eq!(report.predecessor, Id(5));

        rpc.run_for(1_000);

        let bootstrap = rpc.view(Id(5)).unwrap();
        assert_eq!(bootstrap.successor, Id(9));
        assert_eq!(bootstrap.predecessor, Id(9));
    }

    #[test]
    fn join_rejects_duplicates_and_unknown_bootstraps() {
        let mut rpc = Rpc::new(config()).unwrap();
        rpc.seed(&[0, 8]);

        assert_eq!(
            rpc.join(Id(8), Id(0)).err(),
            Some(JoinError::DuplicateId(Id(8)))
        );
        assert_eq!(
            rpc.join(Id(2), Id(5)).err(),
            Some(JoinError::UnknownBootstrap(Id(5)))
        );
    }

    #[test]
    fn join_through_dead_bootstrap_leaves_no_state() {
        let mut rpc = Rpc::new(config()).unwrap();
        rpc.seed(&[0]);
        rpc.crash(Id(0));

        let rx = rpc.join(Id(2), Id(0)).unwrap();
        let outcome = wait_join(&mut rpc, rx);

        assert_eq!(outcome, Err(JoinError::BootstrapUnreachable));
        assert!(rpc.node(Id(2)).is_none());
    }

    #[test]
    fn stabilize_is_idempotent_on_a_converged_ring() {
        let mut rpc = Rpc::new(config()).unwrap();
        let ids = rpc.seed(&[0, 4, 8, 12]);

        let snapshot = |rpc: &Rpc| -> Vec<_> {
            let mut tables: Vec<_> = rpc.nodes().map(|n| n.table().clone()).collect();
            tables.sort_by_key(|t| t.id());
            tables
        };

        let before = snapshot(&rpc);

        for &id in &ids {
            rpc.run_stabilize(id);
        }
        rpc.run_for(10_000);

        assert_eq!(snapshot(&rpc), before);
    }

    #[test]
    fn graceful_leave_migrates_keys_and_splices_neighbors() {
        let mut rpc = Rpc::new(config()).unwrap();
        rpc.seed(&[0, 4, 8, 12]);

        rpc.storage_mut().insert(Id(8), Id(5));
        rpc.storage_mut().insert(Id(8), Id(7));
        rpc.storage_mut().insert(Id(8), Id(8));

        assert!(rpc.leave(Id(8)));
        rpc.run_for(5_000);

        assert!(rpc.node(Id(8)).is_none());
        assert_eq!(rpc.storage().keys(Id(12)), vec![Id(5), Id(7), Id(8)]);
        assert!(rpc.storage().keys(Id(8)).is_empty());

        // The announced pointers splice the neighbors immediately.
        assert_eq!(rpc.view(Id(4)).unwrap().successor, Id(12));
        assert_eq!(rpc.view(Id(12)).unwrap().predecessor, Id(4));

        // Stabilization afterwards changes nothing further.
        rpc.run_stabilize(Id(4));
        rpc.run_for(5_000);
        assert_eq!(rpc.view(Id(4)).unwrap().successor, Id(12));
    }

    #[test]
    fn leave_rejects_non_members() {
        let mut rpc = Rpc::new(config()).unwrap();
        rpc.seed(&[0]);

        assert!(!rpc.leave(Id(9)));
    }

    #[test]
    fn failure_cleanup_replaces_fingers_after_retry_exhaustion() {
        let mut rpc = Rpc::new(config()).unwrap();
        rpc.seed(&[0, 4, 8, 12]);

        rpc.crash(Id(12));

        // Node 8's next stabilization round runs into the dead successor.
        rpc.run_stabilize(Id(8));
        rpc.run_for(60_000);

        let view = rpc.view(Id(8)).unwrap();
        assert_eq!(view.successor, Id(0));
        assert!(rpc
            .node(Id(8))
            .unwrap()
            .table()
            .fingers()
            .iter()
            .all(|f| *f == Id(0)));

        // The failure was confirmed ring-wide.
        assert!(rpc.node(Id(12)).is_none());
    }

    #[test]
    fn failed_predecessor_is_replaced_provisionally() {
        let mut rpc = Rpc::new(config()).unwrap();
        rpc.seed(&[0, 4, 8, 12]);

        rpc.crash(Id(8));

        // Node 12's predecessor exchange times out against 8, and the dead
        // node's own last-known predecessor (4) takes over provisionally.
        rpc.run_stabilize(Id(12));
        rpc.run_for(60_000);

        assert_eq!(rpc.view(Id(12)).unwrap().predecessor, Id(4));
        assert!(rpc.node(Id(8)).is_none());
    }

    #[test]
    fn losing_every_peer_flags_isolation() {
        let mut rpc = Rpc::new(config()).unwrap();
        rpc.seed(&[0, 8]);

        rpc.crash(Id(8));
        rpc.run_stabilize(Id(0));
        rpc.run_for(60_000);

        let view = rpc.view(Id(0)).unwrap();
        assert!(view.isolated);
        assert_eq!(view.successor, Id(0));
        assert_eq!(view.predecessor, Id(0));

        // A newcomer joining through the isolated node heals it.
        let rx = rpc.join(Id(5), Id(0)).unwrap();
        wait_join(&mut rpc, rx).unwrap();
        rpc.run_for(5_000);

        let view = rpc.view(Id(0)).unwrap();
        assert!(!view.isolated);
        assert_eq!(view.successor, Id(5));
        assert_eq!(view.predecessor, Id(5));
    }

    #[test]
    fn fix_fingers_fills_a_fresh_table() {
        let mut rpc = Rpc::new(config()).unwrap();
        rpc.seed(&[0, 4, 8, 12]);

        let rx = rpc.join(Id(2), Id(0)).unwrap();
        wait_join(&mut rpc, rx).unwrap();

        // A newcomer only knows its direct neighbors; one refresh per level
        // resolves the rest of the table.
        for _ in 0..4 {
            rpc.run_fix_fingers(Id(2));
            rpc.run_for(5_000);
        }

        let node = rpc.node(Id(2)).unwrap();
        // Targets 3, 4, 6, 10.
        assert_eq!(node.table().fingers(), &[Id(4), Id(4), Id(8), Id(12)]);
    }

    #[test]
    fn notify_is_rejected_from_non_members() {
        let mut rpc = Rpc::new(config()).unwrap();
        rpc.seed(&[0, 8]);

        // A candidate that is not in the registry must never be adopted.
        rpc.handle_notify(Id(0), Id(3));
        assert_eq!(rpc.view(Id(0)).unwrap().predecessor, Id(8));
    }
}
