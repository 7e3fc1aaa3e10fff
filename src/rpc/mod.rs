//! The event-driven protocol engine.
//!
//! One [Rpc] hosts any number of virtual nodes in a single thread. All
//! cross-node interaction is expressed as calls and continuation resumes
//! scheduled on a virtual clock, so the same protocol logic serves a
//! simulated ring of thousands of nodes and a live deployment where a
//! transport collaborator delivers the messages instead of the event queue.

mod config;
pub(crate) mod continuation;
mod lookup;
mod membership;
mod scheduler;

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use crate::common::{
    Id, InvalidBitWidth, LookupResult, Node, NodeInfo, NodeStatus, RequestSpecific,
    ResponseSpecific, RingSpace,
};
use crate::storage::{MemoryStore, Storage};

use continuation::{Chain, Frame, Resume, ReturnValue};
use scheduler::{Action, EventQueue, ScheduledEvent};

pub use config::{
    Backoff, Config, LatencyModel, NeighborSelection, RoutingMode, DEFAULT_BITS,
    DEFAULT_FIX_FINGERS_PERIOD, DEFAULT_REQUEST_TIMEOUT, DEFAULT_STABILIZE_PERIOD,
};
pub use lookup::{FingerStrategy, LookupError, NeighborStrategy, SuccessorStrategy};
pub use membership::{JoinError, JoinReport};

/// Read-only snapshot of one node's membership and neighbor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeView {
    pub id: Id,
    pub status: NodeStatus,
    pub successor: Id,
    pub predecessor: Id,
    pub isolated: bool,
}

/// An outstanding call awaiting its reply or its deadline.
#[derive(Debug)]
struct PendingCall {
    caller: Id,
    target: Id,
    request: RequestSpecific,
    chain: Chain,
    attempt: u8,
}

/// The protocol engine: ring registry, event queue, and virtual clock.
#[derive(Debug)]
pub struct Rpc {
    config: Config,
    space: RingSpace,
    registry: HashMap<Id, Node>,
    queue: EventQueue,
    clock: u64,
    rng: StdRng,
    pending: HashMap<u64, PendingCall>,
    next_token: u64,
    storage: Box<dyn Storage>,
    strategy: Box<dyn NeighborStrategy>,
}

impl Rpc {
    pub fn new(config: Config) -> Result<Self, InvalidBitWidth> {
        let space = RingSpace::new(config.bits)?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let strategy: Box<dyn NeighborStrategy> = match config.strategy {
            NeighborSelection::FingerTable => Box::new(FingerStrategy),
            NeighborSelection::SuccessorOnly => Box::new(SuccessorStrategy),
        };

        Ok(Rpc {
            config,
            space,
            registry: HashMap::new(),
            queue: EventQueue::new(),
            clock: 0,
            rng,
            pending: HashMap::new(),
            next_token: 0,
            storage: Box::new(MemoryStore::new()),
            strategy,
        })
    }

    // === Options ===

    /// Replace the storage collaborator.
    pub fn with_storage(mut self, storage: Box<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    /// Replace the neighbor-selection strategy with a custom implementation.
    pub fn with_strategy(mut self, strategy: Box<dyn NeighborStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    // === Getters ===

    /// Current virtual time in milliseconds.
    pub fn now(&self) -> u64 {
        self.clock
    }

    pub fn space(&self) -> RingSpace {
        self.space
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn node(&self, id: Id) -> Option<&Node> {
        self.registry.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.registry.values()
    }

    pub fn view(&self, id: Id) -> Option<NodeView> {
        self.registry.get(&id).map(|n| NodeView {
            id: n.id,
            status: n.status,
            successor: n.table.successor(),
            predecessor: n.table.predecessor(),
            isolated: n.isolated,
        })
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn storage_mut(&mut self) -> &mut dyn Storage {
        self.storage.as_mut()
    }

    // === Public Methods ===

    /// Register an already-converged ring of present nodes: exact
    /// successor, predecessor, and finger pointers, with maintenance timers
    /// armed. Returns the canonical ids, sorted.
    ///
    /// This is how the first node (or a test fixture) enters an empty
    /// engine; later arrivals go through [Rpc::join].
    pub fn seed(&mut self, raw_ids: &[u64]) -> Vec<Id> {
        let mut ids: Vec<Id> = raw_ids.iter().map(|raw| self.space.id(*raw)).collect();
        ids.sort();
        ids.dedup();

        for (k, &id) in ids.iter().enumerate() {
            let mut node = Node::new(id, self.space);
            node.status = NodeStatus::Present;

            if ids.len() > 1 {
                let pred = ids[(k + ids.len() - 1) % ids.len()];
                node.table.repair_predecessor(pred);

                for i in 0..self.space.bits() {
                    let start = self.space.succ_offset(id, i);
                    if let Some(owner) = ids
                        .iter()
                        .copied()
                        .min_by_key(|n| self.space.distance(start, *n))
                    {
                        node.table.set_finger(i, owner, false);
                    }
                }
            }

            self.registry.insert(id, node);
            self.schedule_maintenance(id);
        }

        debug!(count = ids.len(), "seeded ring");
        ids
    }

    /// Mark a node as crashed: it stays registered (peers will keep routing
    /// to it and time out) but accepts no traffic and fires no timers.
    pub fn crash(&mut self, id: Id) -> bool {
        match self.registry.get_mut(&id) {
            Some(node) => {
                node.reachable = false;
                node.epoch += 1;
                debug!(node = %id, "node crashed");
                true
            }
            None => false,
        }
    }

    /// Process the next due event. Returns false when the queue is empty.
    pub fn tick(&mut self) -> bool {
        match self.queue.pop() {
            Some(ev) => {
                if ev.fire_at > self.clock {
                    self.clock = ev.fire_at;
                }
                self.dispatch(ev);
                true
            }
            None => false,
        }
    }

    /// Advance the virtual clock by `ms`, processing every event due in the
    /// window in timestamp order.
    pub fn run_for(&mut self, ms: u64) {
        let end = self.clock.saturating_add(ms);

        while let Some(fire_at) = self.queue.next_fire_at() {
            if fire_at > end {
                break;
            }
            self.tick();
        }

        self.clock = end;
    }

    /// Tick until `rx` yields a value or its senders are all gone.
    pub fn drive<T>(&mut self, rx: &flume::Receiver<T>) -> Option<T> {
        loop {
            match rx.try_recv() {
                Ok(value) => return Some(value),
                Err(flume::TryRecvError::Disconnected) => return None,
                Err(flume::TryRecvError::Empty) => {
                    if !self.tick() {
                        return None;
                    }
                }
            }
        }
    }

    /// Start a lookup and tick the engine until it completes.
    pub fn resolve(&mut self, origin: Id, key: Id) -> Result<LookupResult, LookupError> {
        let rx = self.lookup(origin, key);
        self.drive(&rx).unwrap_or(Err(LookupError::NoRoute))
    }

    // === Crate Internals ===

    pub(crate) fn is_present(&self, id: Id) -> bool {
        matches!(self.registry.get(&id), Some(n) if n.status == NodeStatus::Present)
    }

    fn is_alive(&self, id: Id) -> bool {
        matches!(
            self.registry.get(&id),
            Some(n) if n.reachable && n.status != NodeStatus::Absent
        )
    }

    pub(crate) fn latency(&mut self) -> u64 {
        self.config.latency.sample(&mut self.rng)
    }

    /// Jittered firing delay: uniform over `[0.5, 1.5]` of the period.
    pub(crate) fn jitter(&mut self, period: u64) -> u64 {
        let lo = (period / 2).max(1);
        let hi = period.saturating_add(period / 2);
        self.rng.gen_range(lo..=hi)
    }

    pub(crate) fn schedule(&mut self, delay: u64, target: Id, action: Action) {
        let fire_at = self.clock.saturating_add(delay);
        self.queue.push(fire_at, target, action);
    }

    /// The entry of `at`'s table most closely preceding `key`, or `None` to
    /// defer to the successor.
    pub(crate) fn pick_next_hop(&self, at: Id, key: Id) -> Option<Id> {
        let node = self.registry.get(&at)?;
        let registry = &self.registry;
        let live =
            |id: Id| matches!(registry.get(&id), Some(n) if n.status == NodeStatus::Present);

        self.strategy.closest_preceding(&node.table, key, &live)
    }

    fn node_info(&self, at: Id) -> Option<NodeInfo> {
        self.registry.get(&at).map(|n| NodeInfo {
            id: at,
            status: n.status,
            successor: n.table.successor(),
            predecessor: n.table.predecessor(),
        })
    }

    /// Remove a node from the registry and drop everything it owns: pending
    /// calls it issued and its stored keys. Chains it was resuming die when
    /// their events find no node to deliver to.
    pub(crate) fn destroy_node(&mut self, id: Id) {
        if self.registry.remove(&id).is_none() {
            return;
        }

        self.pending.retain(|_, pc| pc.caller != id);
        self.storage.drop_node(id);
        trace!(node = %id, "removed from registry");
    }

    // === Continuation Engine ===

    /// Call `target`'s handler for `request` from node `at`, resuming at
    /// `at` with `resume` when the reply (or its failure) arrives.
    ///
    /// A local target is invoked synchronously. A remote target gets the
    /// chain delivered after a latency draw, while `at` keeps a pending
    /// record with the retry budget; this is the seam a live transport
    /// replaces. A target that is no longer registered aborts the whole
    /// chain silently.
    pub(crate) fn call(
        &mut self,
        at: Id,
        target: Id,
        request: RequestSpecific,
        mut chain: Chain,
        resume: Resume,
    ) {
        if !self.registry.contains_key(&target) {
            trace!(%at, to = %target, "call target vanished; chain dropped");
            self.abort(chain);
            return;
        }

        if target == at {
            chain.push(Frame {
                resume_at: at,
                token: None,
                resume,
            });
            self.dispatch_request(at, at, request, chain);
            return;
        }

        let token = self.next_token;
        self.next_token += 1;

        chain.push(Frame {
            resume_at: at,
            token: Some(token),
            resume,
        });

        self.pending.insert(
            token,
            PendingCall {
                caller: at,
                target,
                request: request.clone(),
                chain: chain.clone(),
                attempt: 0,
            },
        );

        let latency = self.latency();
        self.schedule(
            latency,
            target,
            Action::Request {
                from: at,
                request,
                chain,
            },
        );
        self.schedule(
            self.config.request_timeout,
            at,
            Action::TimeoutCheck { token },
        );
    }

    /// One-way notification: no reply, no retry, no pending record.
    pub(crate) fn cast(&mut self, at: Id, target: Id, request: RequestSpecific) {
        if target == at || !self.registry.contains_key(&target) {
            return;
        }

        let latency = self.latency();
        self.schedule(
            latency,
            target,
            Action::Request {
                from: at,
                request,
                chain: Chain::new(),
            },
        );
    }

    /// Pass a request (and the chain riding with it) on to the next hop
    /// without adding a frame; used by recursive routing.
    pub(crate) fn forward(&mut self, at: Id, target: Id, request: RequestSpecific, chain: Chain) {
        if !self.registry.contains_key(&target) {
            trace!(%at, to = %target, "forward target vanished; chain dropped");
            self.abort(chain);
            return;
        }

        if target == at {
            self.dispatch_request(at, at, request, chain);
            return;
        }

        let latency = self.latency();
        self.schedule(
            latency,
            target,
            Action::Request {
                from: at,
                request,
                chain,
            },
        );
    }

    /// Pop the chain's top frame and resume it with `value`, locally when
    /// the frame belongs to the executing node, otherwise via the queue.
    pub(crate) fn return_to(&mut self, at: Id, mut chain: Chain, value: ReturnValue) {
        let frame = match chain.pop() {
            Some(frame) => frame,
            None => return,
        };

        if frame.resume_at == at {
            if let Some(token) = frame.token {
                if self.pending.remove(&token).is_none() {
                    trace!(%at, token, "stale local resume dropped");
                    self.abort(chain);
                    return;
                }
            }
            self.dispatch_resume(frame, chain, value);
            return;
        }

        let latency = self.latency();
        let target = frame.resume_at;
        self.schedule(latency, target, Action::Resume { frame, chain, value });
    }

    /// Discard a chain. No frame below learns anything; callers that need
    /// guaranteed completion rely on their own timeout.
    pub(crate) fn abort(&mut self, chain: Chain) {
        if !chain.is_empty() {
            trace!(frames = chain.len(), "continuation chain aborted");
        }
    }

    // === Event Dispatch ===

    fn dispatch(&mut self, ev: ScheduledEvent) {
        match ev.action {
            Action::Request {
                from,
                request,
                chain,
            } => {
                if !self.is_alive(ev.target) {
                    trace!(to = %ev.target, ?request, "delivery to dead node dropped");
                    self.abort(chain);
                    return;
                }
                self.dispatch_request(ev.target, from, request, chain);
            }
            Action::Resume {
                frame,
                chain,
                value,
            } => {
                if let Some(token) = frame.token {
                    if self.pending.remove(&token).is_none() {
                        trace!(at = %frame.resume_at, token, "stale reply dropped");
                        self.abort(chain);
                        return;
                    }
                }
                if !self.is_alive(frame.resume_at) {
                    trace!(at = %frame.resume_at, "resume target gone; chain dropped");
                    self.abort(chain);
                    return;
                }
                self.dispatch_resume(frame, chain, value);
            }
            Action::Timer { kind, epoch } => self.handle_timer(ev.target, kind, epoch),
            Action::TimeoutCheck { token } => self.handle_timeout(token),
            Action::FinishLeave { epoch } => self.finish_leave(ev.target, epoch),
        }
    }

    fn dispatch_request(&mut self, at: Id, from: Id, request: RequestSpecific, chain: Chain) {
        match request {
            RequestSpecific::GetSuccessor | RequestSpecific::GetPredecessor => {
                match self.node_info(at) {
                    Some(info) => self.return_to(
                        at,
                        chain,
                        ReturnValue::Response(ResponseSpecific::NodeInfo(info)),
                    ),
                    None => self.abort(chain),
                }
            }
            RequestSpecific::FindClosestPred { key } => {
                let (closest, successor) = match self.registry.get(&at) {
                    Some(node) => {
                        let successor = node.table.successor();
                        let closest = self.pick_next_hop(at, key).unwrap_or(successor);
                        (closest, successor)
                    }
                    None => {
                        self.abort(chain);
                        return;
                    }
                };

                self.return_to(
                    at,
                    chain,
                    ReturnValue::Response(ResponseSpecific::ClosestPred { closest, successor }),
                );
            }
            RequestSpecific::FindSuccessor { key, hops } => {
                self.handle_find_successor(at, key, hops, chain)
            }
            RequestSpecific::Notify { candidate } => self.handle_notify(at, candidate),
            RequestSpecific::Alert { candidate, reason } => {
                self.handle_alert(at, candidate, reason)
            }
        }
    }

    fn dispatch_resume(&mut self, frame: Frame, chain: Chain, value: ReturnValue) {
        let at = frame.resume_at;

        match frame.resume {
            Resume::Deliver(deliver) => self.deliver(at, deliver, value),
            Resume::LookupStep { key, hop, hops } => {
                self.lookup_step_reply(at, key, hop, hops, chain, value)
            }
            Resume::StabilizeLevel { level } => {
                self.stabilize_level_reply(at, level, chain, value)
            }
            Resume::StabilizePred => self.stabilize_pred_reply(at, chain, value),
        }
    }

    /// A call's deadline fired: retry with backoff, or declare the peer
    /// failed, clean up, and resume the waiting frame with the bad news.
    fn handle_timeout(&mut self, token: u64) {
        let mut pc = match self.pending.remove(&token) {
            Some(pc) => pc,
            None => return, // answered in time
        };

        if !self.is_alive(pc.caller) {
            return;
        }

        if pc.attempt < self.config.request_retries {
            pc.attempt += 1;

            trace!(caller = %pc.caller, peer = %pc.target, attempt = pc.attempt, "retrying request");

            let latency = self.latency();
            self.schedule(
                latency,
                pc.target,
                Action::Request {
                    from: pc.caller,
                    request: pc.request.clone(),
                    chain: pc.chain.clone(),
                },
            );

            let deadline = self
                .config
                .retry_backoff
                .delay(self.config.request_timeout, pc.attempt);
            self.schedule(deadline, pc.caller, Action::TimeoutCheck { token });

            self.pending.insert(token, pc);
            return;
        }

        debug!(caller = %pc.caller, peer = %pc.target, "peer declared failed after retries");
        self.peer_failed(pc.caller, pc.target);

        let mut chain = pc.chain;
        if let Some(frame) = chain.pop() {
            self.dispatch_resume(frame, chain, ReturnValue::Failed { target: pc.target });
        }
    }
}
