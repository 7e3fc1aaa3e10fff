//! Peer-visible protocol operations and their replies.
//!
//! Wire marshalling is an external collaborator's job; everything here
//! derives serde so a transport can carry it as-is.

use serde::{Deserialize, Serialize};

use crate::common::{Id, NodeStatus};

/// Operations a node accepts from peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestSpecific {
    /// Who do you believe follows you on the ring?
    GetSuccessor,
    /// Who do you believe precedes you on the ring?
    GetPredecessor,
    /// Which entry of your table most closely precedes `key`?
    FindClosestPred { key: Id },
    /// Resolve the owner of `key`, forwarding hop to hop and replying to
    /// the original caller through the carried continuation chain.
    FindSuccessor { key: Id, hops: u16 },
    /// The sender believes it may be the receiver's predecessor.
    Notify { candidate: Id },
    /// Proactive announcement that `candidate` is leaving or has failed.
    Alert { candidate: Id, reason: AlertReason },
}

/// Why an [RequestSpecific::Alert] was sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertReason {
    /// Graceful departure, with the pointers to splice through.
    Leaving { successor: Id, predecessor: Id },
    /// Confirmed unresponsive after retry exhaustion.
    Failed,
}

/// Replies to the request operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseSpecific {
    /// Answer to `GetSuccessor` / `GetPredecessor`.
    NodeInfo(NodeInfo),
    /// Answer to `FindClosestPred`.
    ClosestPred { closest: Id, successor: Id },
    /// Terminal answer of a `FindSuccessor` walk.
    FoundSuccessor(LookupResult),
}

/// A responder's identity and neighbor pointers, with its membership status
/// as the reachability descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: Id,
    pub status: NodeStatus,
    pub successor: Id,
    pub predecessor: Id,
}

/// Outcome of a lookup walk: the owner of the key and the node immediately
/// preceding it, plus the number of hops the walk took.
///
/// Under concurrent churn the result is correct at the instant it was
/// produced but advisory thereafter; callers needing stronger guarantees
/// retry through stabilization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResult {
    pub predecessor: Id,
    pub successor: Id,
    pub hops: u16,
}
