//! Real-time hosting: the engine on its own thread, driven by wall time.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::common::{Id, InvalidBitWidth, LookupResult};
use crate::rpc::{Config, JoinError, JoinReport, LookupError, NodeView, Rpc};

/// How often the actor thread advances the engine clock.
const TICK_INTERVAL: Duration = Duration::from_millis(1);

/// A clonable handle to an engine running on a background thread.
///
/// The engine's virtual clock tracks wall time, so configured periods and
/// timeouts mean real milliseconds. All methods are callable from any
/// thread; results come back over channels.
#[derive(Debug)]
pub struct Overlay {
    sender: flume::Sender<ActorMessage>,
    handle: Option<JoinHandle<()>>,
}

impl Clone for Overlay {
    fn clone(&self) -> Self {
        Overlay {
            sender: self.sender.clone(),
            handle: None,
        }
    }
}

enum ActorMessage {
    Shutdown,
    Seed {
        ids: Vec<u64>,
        reply: flume::Sender<Vec<Id>>,
    },
    Join {
        id: Id,
        bootstrap: Id,
        reply: flume::Sender<Result<JoinReport, JoinError>>,
    },
    Leave {
        id: Id,
        reply: flume::Sender<bool>,
    },
    Lookup {
        origin: Id,
        key: Id,
        reply: flume::Sender<Result<LookupResult, LookupError>>,
    },
    View {
        id: Id,
        reply: flume::Sender<Option<NodeView>>,
    },
}

impl Overlay {
    /// Start an engine thread with this configuration.
    pub fn spawn(config: Config) -> Result<Self, InvalidBitWidth> {
        let rpc = Rpc::new(config)?;
        let (sender, receiver) = flume::unbounded();

        let handle = thread::spawn(move || run(rpc, receiver));

        Ok(Overlay {
            sender,
            handle: Some(handle),
        })
    }

    // === Public Methods ===

    /// Stop the engine thread and wait for it to finish.
    pub fn shutdown(self) {
        let _ = self.sender.send(ActorMessage::Shutdown);
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }

    /// Register an already-converged ring; see [Rpc::seed].
    pub fn seed(&self, ids: &[u64]) -> Vec<Id> {
        let (reply, rx) = flume::bounded(1);
        let _ = self.sender.send(ActorMessage::Seed {
            ids: ids.to_vec(),
            reply,
        });
        rx.recv().unwrap_or_default()
    }

    /// Join a node through a bootstrap peer; the receiver yields the
    /// outcome once the protocol settles.
    pub fn join(&self, id: Id, bootstrap: Id) -> flume::Receiver<Result<JoinReport, JoinError>> {
        let (reply, rx) = flume::bounded(1);
        let _ = self.sender.send(ActorMessage::Join {
            id,
            bootstrap,
            reply,
        });
        rx
    }

    /// Gracefully remove a hosted node from the ring.
    pub fn leave(&self, id: Id) -> bool {
        let (reply, rx) = flume::bounded(1);
        let _ = self.sender.send(ActorMessage::Leave { id, reply });
        rx.recv().unwrap_or(false)
    }

    /// Resolve the owner of `key` starting from `origin`.
    pub fn lookup(&self, origin: Id, key: Id) -> flume::Receiver<Result<LookupResult, LookupError>> {
        let (reply, rx) = flume::bounded(1);
        let _ = self.sender.send(ActorMessage::Lookup { origin, key, reply });
        rx
    }

    /// Blocking shorthand for [Overlay::lookup], returning the owner.
    pub fn find_successor(&self, origin: Id, key: Id) -> Result<Id, LookupError> {
        self.lookup(origin, key)
            .recv()
            .unwrap_or(Err(LookupError::NoRoute))
            .map(|found| found.successor)
    }

    /// Snapshot one node's membership and neighbor state.
    pub fn view(&self, id: Id) -> Option<NodeView> {
        let (reply, rx) = flume::bounded(1);
        let _ = self.sender.send(ActorMessage::View { id, reply });
        rx.recv().ok().flatten()
    }
}

fn run(mut rpc: Rpc, receiver: flume::Receiver<ActorMessage>) {
    let mut last = Instant::now();

    loop {
        while let Ok(message) = receiver.try_recv() {
            match message {
                ActorMessage::Shutdown => return,
                ActorMessage::Seed { ids, reply } => {
                    let _ = reply.send(rpc.seed(&ids));
                }
                ActorMessage::Join {
                    id,
                    bootstrap,
                    reply,
                } => {
                    if let Err(error) = rpc.join_into(id, bootstrap, reply.clone()) {
                        let _ = reply.send(Err(error));
                    }
                }
                ActorMessage::Leave { id, reply } => {
                    let _ = reply.send(rpc.leave(id));
                }
                ActorMessage::Lookup { origin, key, reply } => {
                    rpc.lookup_into(origin, key, reply);
                }
                ActorMessage::View { id, reply } => {
                    let _ = reply.send(rpc.view(id));
                }
            }
        }

        let elapsed = last.elapsed().as_millis() as u64;
        if elapsed > 0 {
            rpc.run_for(elapsed);
            last += Duration::from_millis(elapsed);
        }

        thread::sleep(TICK_INTERVAL);
    }
}
