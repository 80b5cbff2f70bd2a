//! Reservation sets.
//!
//! A reservation set is a fixed-width bit string over (cycle, unit) pairs,
//! indexed by `cycle * units + unit`. States, instruction alternatives and
//! the matters-mask are all reservation sets; the automaton construction is
//! set algebra over them.
//!
//! Whether two reservation sets can be combined is more than bit
//! intersection: the constraint tables (exclusion, presence, final-presence,
//! absence, final-absence) declared for individual units are consulted
//! cycle by cycle.

use cranelift_entity::EntityRef;
use smallvec::{smallvec, SmallVec};

use crate::pdsl::description::PatternGroup;
use crate::pdsl::UnitId;

/// The dimensions of every reservation set in one generator run.
#[derive(Clone, Copy, Debug)]
pub struct ReservDim {
    /// Number of declared units.
    pub units: usize,
    /// Maximum reservation length in cycles over all instructions.
    pub cycles: usize,
}

impl ReservDim {
    fn word_count(&self) -> usize {
        (self.units * self.cycles + 63) / 64
    }

    fn bit(&self, cycle: usize, unit: UnitId) -> usize {
        debug_assert!(cycle < self.cycles && unit.index() < self.units);
        cycle * self.units + unit.index()
    }
}

/// A fixed-width bit string of unit reservations across cycles.
///
/// Comparison is lexicographic over the backing words; hashing mixes them.
/// Bits past `units * cycles` are always zero.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReservSet {
    words: SmallVec<[u64; 2]>,
}

impl ReservSet {
    pub fn new(dim: &ReservDim) -> Self {
        Self {
            words: smallvec![0; dim.word_count()],
        }
    }

    /// Mark `unit` as reserved on `cycle`.
    pub fn set(&mut self, dim: &ReservDim, cycle: usize, unit: UnitId) {
        let bit = dim.bit(cycle, unit);
        self.words[bit / 64] |= 1 << (bit % 64);
    }

    /// Is `unit` reserved on `cycle`?
    pub fn test(&self, dim: &ReservDim, cycle: usize, unit: UnitId) -> bool {
        let bit = dim.bit(cycle, unit);
        self.words[bit / 64] & (1 << (bit % 64)) != 0
    }

    pub fn union(&mut self, other: &ReservSet) {
        debug_assert_eq!(self.words.len(), other.words.len());
        for (word, other_word) in self.words.iter_mut().zip(other.words.iter()) {
            *word |= other_word;
        }
    }

    pub fn intersect(&mut self, other: &ReservSet) {
        debug_assert_eq!(self.words.len(), other.words.len());
        for (word, other_word) in self.words.iter_mut().zip(other.words.iter()) {
            *word &= other_word;
        }
    }

    /// Advance one CPU cycle: cycle 0 is discarded, every later cycle moves
    /// one step closer, the last cycle is zero-filled.
    pub fn shifted(&self, dim: &ReservDim) -> ReservSet {
        let shift = dim.units;
        let word_shift = shift / 64;
        let bit_shift = shift % 64;
        let len = self.words.len();
        let mut words: SmallVec<[u64; 2]> = smallvec![0; len];
        for i in 0..len {
            let src = i + word_shift;
            if src < len {
                let mut word = self.words[src] >> bit_shift;
                if bit_shift > 0 && src + 1 < len {
                    word |= self.words[src + 1] << (64 - bit_shift);
                }
                words[i] = word;
            }
        }
        ReservSet { words }
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&word| word == 0)
    }

    /// Plain bit intersection, without consulting the constraint tables.
    pub fn intersects(&self, other: &ReservSet) -> bool {
        debug_assert_eq!(self.words.len(), other.words.len());
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// Invoke `each` for every unit reserved on `cycle`.
    pub fn for_each_unit(&self, dim: &ReservDim, cycle: usize, mut each: impl FnMut(UnitId)) {
        for index in 0..dim.units {
            let unit = UnitId::new(index);
            if self.test(dim, cycle, unit) {
                each(unit);
            }
        }
    }
}

/// Per-unit constraint lists, resolved to unit references by the semantic
/// checker. Indexed by `UnitId`.
#[derive(Clone, Debug, Default)]
pub struct UnitConstraint {
    pub excl: Vec<UnitId>,
    pub presence: Vec<PatternGroup>,
    pub final_presence: Vec<PatternGroup>,
    pub absence: Vec<PatternGroup>,
    pub final_absence: Vec<PatternGroup>,
}

impl UnitConstraint {
    pub fn is_empty(&self) -> bool {
        self.excl.is_empty()
            && self.presence.is_empty()
            && self.final_presence.is_empty()
            && self.absence.is_empty()
            && self.final_absence.is_empty()
    }
}

/// All unit constraints of one description plus the set dimensions.
#[derive(Clone, Debug)]
pub struct ConstraintTables {
    pub dim: ReservDim,
    pub units: Vec<UnitConstraint>,
}

impl ConstraintTables {
    pub fn constraint(&self, unit: UnitId) -> &UnitConstraint {
        &self.units[unit.index()]
    }
}

/// Can reservations `a` and `b` coexist? True when they collide on a bit or
/// violate any per-unit constraint on any cycle, in either direction.
pub fn in_conflict(a: &ReservSet, b: &ReservSet, tables: &ConstraintTables) -> bool {
    if a.intersects(b) {
        return true;
    }
    for cycle in 0..tables.dim.cycles {
        if cycle_conflict(a, b, tables, cycle) || cycle_conflict(b, a, tables, cycle) {
            return true;
        }
    }
    false
}

/// Check the constraints of every unit reserved by `own` on `cycle` against
/// the reservations of `other` (and, for the final variants, the union).
fn cycle_conflict(own: &ReservSet, other: &ReservSet, tables: &ConstraintTables, cycle: usize) -> bool {
    let dim = &tables.dim;
    for index in 0..dim.units {
        let unit = UnitId::new(index);
        if !own.test(dim, cycle, unit) {
            continue;
        }
        let constraint = tables.constraint(unit);
        for &excluded in &constraint.excl {
            if other.test(dim, cycle, excluded) {
                return true;
            }
        }
        if !constraint.presence.is_empty()
            && !constraint
                .presence
                .iter()
                .any(|group| group.iter().all(|&p| other.test(dim, cycle, p)))
        {
            return true;
        }
        if !constraint.final_presence.is_empty()
            && !constraint.final_presence.iter().any(|group| {
                group
                    .iter()
                    .all(|&p| other.test(dim, cycle, p) || own.test(dim, cycle, p))
            })
        {
            return true;
        }
        for group in &constraint.absence {
            if !group.is_empty() && group.iter().all(|&p| other.test(dim, cycle, p)) {
                return true;
            }
        }
        for group in &constraint.final_absence {
            if !group.is_empty()
                && group
                    .iter()
                    .all(|&p| other.test(dim, cycle, p) || own.test(dim, cycle, p))
            {
                return true;
            }
        }
    }
    false
}
