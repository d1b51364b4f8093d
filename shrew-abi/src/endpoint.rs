//! Endpoint identifiers.
//!
//! An endpoint names one attached process for as long as it stays
//! attached. The value packs a table slot in the low bits and a
//! generation counter above it, so a slot that is released and reused
//! produces a different endpoint value and calls against the old one
//! fail instead of reaching the new occupant.

use core::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Number of low bits holding the slot index.
pub const GENERATION_SHIFT: u32 = 15;

/// Mask extracting the slot index from an endpoint value.
pub const SLOT_MASK: i32 = (1 << GENERATION_SHIFT) - 1;

/// Kernel-assigned identity of an attached process.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromBytes, IntoBytes, Immutable,
    KnownLayout,
)]
pub struct Endpoint(i32);

/// Matches any sender in a receive filter.
pub const ANY: Endpoint = Endpoint(SLOT_MASK);

/// Names no endpoint at all.
pub const NONE: Endpoint = Endpoint(SLOT_MASK - 1);

impl Endpoint {
    /// Pack a slot index and generation into an endpoint value.
    pub const fn new(slot: usize, generation: i32) -> Self {
        Self((generation << GENERATION_SHIFT) | slot as i32)
    }

    /// The raw wire value.
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Rebuild an endpoint from its raw wire value.
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Table slot this endpoint refers to.
    pub const fn slot(self) -> usize {
        (self.0 & SLOT_MASK) as usize
    }

    /// Generation the slot had when this endpoint was handed out.
    pub const fn generation(self) -> i32 {
        self.0 >> GENERATION_SHIFT
    }

    /// Whether this is one of the reserved non-process values.
    pub const fn is_reserved(self) -> bool {
        self.0 == ANY.0 || self.0 == NONE.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == ANY {
            write!(f, "ANY")
        } else if *self == NONE {
            write!(f, "NONE")
        } else {
            write!(f, "{}:{}", self.slot(), self.generation())
        }
    }
}
