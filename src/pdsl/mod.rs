//! Pipeline description language.
//!
//! This module defines the typed declaration records that describe a
//! processor pipeline (functional units, automata, reservations, instruction
//! classes, constraints and bypasses), the regexp IR used for reservation
//! expressions, and the transformations that bring reservation expressions
//! into the canonical alternation-of-alternatives form.

pub mod description;
pub mod regexp;
pub mod transform;

use cranelift_entity::entity_impl;

/// An opaque reference to a declared functional unit.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u32);
entity_impl!(UnitId, "unit");

/// An opaque reference to a declared instruction reservation.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InsnId(u32);
entity_impl!(InsnId, "insn");

/// An opaque reference to a declared (or synthesized) automaton.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AutomatonId(u32);
entity_impl!(AutomatonId, "automaton");
