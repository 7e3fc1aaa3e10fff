//! Registry entry for one virtual node hosted by the engine.

use serde::{Deserialize, Serialize};

use crate::common::{Id, RingSpace, RoutingTable};

/// Membership lifecycle of a node: `Absent -> Present -> Leaving -> Absent`,
/// where the failure path skips `Leaving`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Registered but not yet (or no longer) part of the ring.
    Absent,
    /// A full ring member.
    Present,
    /// Gracefully departing; still answers but should not be adopted.
    Leaving,
}

/// One virtual node: identity, membership status, and routing state.
///
/// Owned by the engine's registry and only ever mutated by the node's own
/// event handlers. Neighbors are referenced by [Id] and resolved through the
/// registry, never by direct pointers.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: Id,
    pub(crate) status: NodeStatus,
    pub(crate) table: RoutingTable,
    /// Timer generation; bumping it cancels all outstanding timers.
    pub(crate) epoch: u64,
    /// Cleared to model a crashed process that accepts no traffic.
    pub(crate) reachable: bool,
    /// Peer this node joined through, kept for re-bootstrap after isolation.
    pub(crate) bootstrap: Option<Id>,
    /// Set when failure repair collapsed the finger table to self.
    pub(crate) isolated: bool,
    /// Next finger level the periodic refresh will re-resolve.
    pub(crate) next_finger: u8,
}

impl Node {
    pub(crate) fn new(id: Id, space: RingSpace) -> Self {
        Node {
            id,
            status: NodeStatus::Absent,
            table: RoutingTable::new(id, space),
            epoch: 0,
            reachable: true,
            bootstrap: None,
            isolated: false,
            next_finger: 0,
        }
    }

    // === Getters ===

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// True if failure repair left this node pointing only at itself while
    /// other members may still exist: a possible-partition observation.
    pub fn is_isolated(&self) -> bool {
        self.isolated
    }
}
