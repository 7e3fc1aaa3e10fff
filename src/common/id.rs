//! Ring identifiers and the circular arithmetic every routing decision is built from.

use std::fmt::{self, Debug, Display, Formatter};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// The widest supported identifier space, in bits.
pub const MAX_BITS: u8 = 64;

/// A node or key identifier on the ring.
///
/// Values are canonical for a given [RingSpace]: always within `[0, 2^m)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id(pub u64);

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.0)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Id {
    fn from(value: u64) -> Self {
        Id(value)
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid ring bit width {0}, expected 1..={max}", max = MAX_BITS)]
pub struct InvalidBitWidth(pub u8);

/// The circular identifier space of size `2^m`.
///
/// All arithmetic wraps at `0` and `2^m - 1`; no operation produces a value
/// outside `[0, 2^m)`.
///
/// The three `between_*` predicates share one convention for coincident
/// endpoints: the open arc `(a, a)` is the whole circle minus the point `a`,
/// and each inclusive variant adds its own endpoint back (so both inclusive
/// variants hold for every `x` when `a == b`).
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingSpace {
    bits: u8,
}

impl RingSpace {
    /// Create an identifier space of `2^bits` points. `bits` must be in `1..=64`.
    pub fn new(bits: u8) -> Result<Self, InvalidBitWidth> {
        if bits == 0 || bits > MAX_BITS {
            return Err(InvalidBitWidth(bits));
        }

        Ok(RingSpace { bits })
    }

    /// The configured bit width `m`.
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Bitmask selecting the low `m` bits; doubles as the largest identifier.
    fn mask(&self) -> u64 {
        u64::MAX >> (MAX_BITS - self.bits)
    }

    /// Canonicalize a raw value into this space.
    pub fn id(&self, raw: u64) -> Id {
        Id(raw & self.mask())
    }

    /// A uniformly random identifier in this space.
    pub fn random_id<R: Rng>(&self, rng: &mut R) -> Id {
        Id(rng.gen::<u64>() & self.mask())
    }

    /// `(id + 2^i) mod 2^m`: the ideal target of finger level `i`.
    pub fn succ_offset(&self, id: Id, i: u8) -> Id {
        debug_assert!(i < self.bits);
        Id(id.0.wrapping_add(1u64 << i) & self.mask())
    }

    /// `(id - 2^i) mod 2^m`.
    pub fn pred_offset(&self, id: Id, i: u8) -> Id {
        debug_assert!(i < self.bits);
        Id(id.0.wrapping_sub(1u64 << i) & self.mask())
    }

    /// Forward (clockwise) distance from `a` to `b`: `(b - a) mod 2^m`.
    pub fn distance(&self, a: Id, b: Id) -> u64 {
        b.0.wrapping_sub(a.0) & self.mask()
    }

    /// True if `x` lies strictly inside the open circular arc from `a` to `b`.
    ///
    /// `(a, a)` is the whole circle minus the point `a`.
    pub fn between_open(&self, a: Id, b: Id, x: Id) -> bool {
        if a == b {
            return x != a;
        }

        if a.0 < b.0 {
            a.0 < x.0 && x.0 < b.0
        } else {
            x.0 > a.0 || x.0 < b.0
        }
    }

    /// Same arc as [Self::between_open] but including `a`.
    pub fn between_left_incl(&self, a: Id, b: Id, x: Id) -> bool {
        x == a || self.between_open(a, b, x)
    }

    /// Same arc as [Self::between_open] but including `b`.
    pub fn between_right_incl(&self, a: Id, b: Id, x: Id) -> bool {
        x == b || self.between_open(a, b, x)
    }
}

impl Debug for RingSpace {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "RingSpace(2^{})", self.bits)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bit_width_bounds() {
        assert!(RingSpace::new(0).is_err());
        assert!(RingSpace::new(65).is_err());
        assert!(RingSpace::new(1).is_ok());
        assert!(RingSpace::new(64).is_ok());
    }

    #[test]
    fn offsets_round_trip() {
        for bits in [4u8, 8, 24, 64] {
            let space = RingSpace::new(bits).unwrap();

            for raw in [0u64, 1, 5, 1 << (bits - 1), u64::MAX] {
                let id = space.id(raw);
                for i in 0..bits {
                    assert_eq!(space.pred_offset(space.succ_offset(id, i), i), id);
                    assert_eq!(space.succ_offset(space.pred_offset(id, i), i), id);
                }
            }
        }
    }

    #[test]
    fn offsets_wrap() {
        let space = RingSpace::new(4).unwrap();

        assert_eq!(space.succ_offset(Id(15), 0), Id(0));
        assert_eq!(space.succ_offset(Id(12), 3), Id(4));
        assert_eq!(space.pred_offset(Id(0), 0), Id(15));
        assert_eq!(space.pred_offset(Id(2), 2), Id(14));
    }

    #[test]
    fn distance_is_forward() {
        let space = RingSpace::new(4).unwrap();

        assert_eq!(space.distance(Id(3), Id(5)), 2);
        assert_eq!(space.distance(Id(5), Id(3)), 14);
        assert_eq!(space.distance(Id(9), Id(9)), 0);
        assert_eq!(space.distance(Id(15), Id(0)), 1);
    }

    #[test]
    fn between_open_plain_and_wrapped() {
        let space = RingSpace::new(4).unwrap();

        assert!(space.between_open(Id(2), Id(8), Id(5)));
        assert!(!space.between_open(Id(2), Id(8), Id(2)));
        assert!(!space.between_open(Id(2), Id(8), Id(8)));
        assert!(!space.between_open(Id(2), Id(8), Id(12)));

        // Arc wrapping through zero.
        assert!(space.between_open(Id(12), Id(2), Id(15)));
        assert!(space.between_open(Id(12), Id(2), Id(0)));
        assert!(!space.between_open(Id(12), Id(2), Id(5)));
    }

    #[test]
    fn full_circle_convention() {
        let space = RingSpace::new(4).unwrap();
        let a = Id(6);

        for raw in 0..16 {
            let x = Id(raw);
            assert_eq!(space.between_open(a, a, x), x != a);
            assert!(space.between_left_incl(a, a, x));
            assert!(space.between_right_incl(a, a, x));
        }
    }

    #[test]
    fn inclusive_endpoints() {
        let space = RingSpace::new(4).unwrap();

        assert!(space.between_left_incl(Id(2), Id(8), Id(2)));
        assert!(!space.between_left_incl(Id(2), Id(8), Id(8)));
        assert!(space.between_right_incl(Id(2), Id(8), Id(8)));
        assert!(!space.between_right_incl(Id(2), Id(8), Id(2)));
    }

    #[test]
    fn canonicalization() {
        let space = RingSpace::new(4).unwrap();

        assert_eq!(space.id(16), Id(0));
        assert_eq!(space.id(31), Id(15));
        assert_eq!(space.id(7), Id(7));
    }
}
