//! One node's view of its neighbors: predecessor, successor, and finger table.

use tracing::trace;

use crate::common::{Id, RingSpace};

/// Per-node routing state: `fingers[i]` approximates the owner of
/// `id + 2^i`, the successor is `fingers[0]`, and the predecessor closes
/// the ring backwards.
///
/// Every slot starts as the node's own id, which is the correct state for a
/// ring of one. Mutations follow a monotonic-improvement policy so stale or
/// reordered replies can never regress a pointer; repair entry points
/// ([Self::replace_finger], [Self::splice]) are the only way to move a
/// pointer away from a value that is no longer trustworthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    id: Id,
    space: RingSpace,
    predecessor: Id,
    fingers: Vec<Id>,
}

impl RoutingTable {
    pub fn new(id: Id, space: RingSpace) -> Self {
        RoutingTable {
            id,
            space,
            predecessor: id,
            fingers: vec![id; space.bits() as usize],
        }
    }

    // === Getters ===

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn space(&self) -> RingSpace {
        self.space
    }

    pub fn successor(&self) -> Id {
        self.fingers[0]
    }

    pub fn predecessor(&self) -> Id {
        self.predecessor
    }

    pub fn finger(&self, i: u8) -> Id {
        self.fingers[i as usize]
    }

    pub fn fingers(&self) -> &[Id] {
        &self.fingers
    }

    /// The ideal target of finger level `i`: `id + 2^i`.
    pub fn finger_start(&self, i: u8) -> Id {
        self.space.succ_offset(self.id, i)
    }

    /// True while this node knows no peer but itself.
    pub fn is_lone(&self) -> bool {
        self.predecessor == self.id && self.fingers.iter().all(|f| *f == self.id)
    }

    /// True if any slot (finger or predecessor) points at `id`.
    pub fn references(&self, id: Id) -> bool {
        self.predecessor == id || self.fingers.contains(&id)
    }

    // === Public Methods ===

    /// Offer `candidate` for finger level `i`.
    ///
    /// Accepted only if the incumbent is not live, is still the
    /// uninitialized self-pointer, or `candidate` is strictly closer to the
    /// level's ideal target by forward circular distance. Returns whether
    /// the slot changed.
    pub fn set_finger(&mut self, i: u8, candidate: Id, incumbent_live: bool) -> bool {
        let incumbent = self.fingers[i as usize];
        let start = self.finger_start(i);

        let accept = !incumbent_live
            || incumbent == self.id
            || self.space.distance(start, candidate) < self.space.distance(start, incumbent);

        if accept && candidate != incumbent {
            self.fingers[i as usize] = candidate;
            true
        } else {
            false
        }
    }

    /// Offer `candidate` as a tighter successor. Accepted from the
    /// uninitialized state, or when `candidate` lies strictly between this
    /// node and the current successor.
    pub fn update_successor(&mut self, candidate: Id) -> bool {
        if candidate == self.id {
            return false;
        }

        if self.successor() == self.id || self.space.between_open(self.id, self.successor(), candidate) {
            self.fingers[0] = candidate;
            return true;
        }

        false
    }

    /// Offer `candidate` as a tighter predecessor; same policy as
    /// [Self::update_successor], mirrored.
    pub fn update_predecessor(&mut self, candidate: Id) -> bool {
        if candidate == self.id {
            return false;
        }

        if self.predecessor == self.id || self.space.between_open(self.predecessor, self.id, candidate) {
            self.predecessor = candidate;
            return true;
        }

        false
    }

    /// Repair-time predecessor override, bypassing the improvement policy.
    ///
    /// Used when the current predecessor is known dead or gone and a
    /// provisional replacement (possibly self) must be installed.
    pub fn repair_predecessor(&mut self, candidate: Id) {
        self.predecessor = candidate;
    }

    /// Remove every finger reference to a confirmed-dead node, replacing
    /// each slot with the next non-dead value found scanning toward
    /// coarser fingers, falling back to self.
    ///
    /// Returns true if the finger table collapsed entirely to self, which
    /// signals possible isolation from the ring and should trigger a
    /// re-bootstrap. The predecessor slot is left to the caller, which may
    /// know a provisional replacement.
    pub fn replace_finger(&mut self, dead: Id) -> bool {
        let m = self.fingers.len();

        for i in 0..m {
            if self.fingers[i] != dead {
                continue;
            }

            let mut replacement = self.id;
            for j in (i + 1)..m {
                if self.fingers[j] != dead {
                    replacement = self.fingers[j];
                    break;
                }
            }

            trace!(node = %self.id, level = i, old = %dead, new = %replacement, "replaced finger");
            self.fingers[i] = replacement;
        }

        // Losing the successor must not orphan the node while a predecessor
        // is still known; point everything backwards until stabilization
        // finds the true successor again.
        if self.successor() == self.id && self.predecessor != self.id && self.predecessor != dead {
            let pred = self.predecessor;
            for f in self.fingers.iter_mut() {
                *f = pred;
            }
        }

        self.fingers.iter().all(|f| *f == self.id)
    }

    /// Splice a gracefully leaving node out of the table, rerouting every
    /// reference through the pointers it announced.
    pub fn splice(&mut self, leaving: Id, successor: Id, predecessor: Id) {
        for f in self.fingers.iter_mut() {
            if *f == leaving {
                *f = if successor == leaving { self.id } else { successor };
            }
        }

        if self.predecessor == leaving {
            self.predecessor = if predecessor == leaving { self.id } else { predecessor };
        }
    }

    /// Back to the "ring of one" default.
    pub fn reset(&mut self) {
        self.predecessor = self.id;
        for f in self.fingers.iter_mut() {
            *f = self.id;
        }
    }
}
