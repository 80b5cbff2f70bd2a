//! Alt-state construction and the NFA builder.
//!
//! For every (instruction, automaton) pair, each alternative of the
//! canonical regexp becomes one deterministic alt-state: an interned state
//! whose reservation marks the automaton's units at their relative cycle
//! offsets. Instructions with identical sorted alt-state lists are chained
//! behind one head so the automaton is built once per behavior.
//!
//! The NFA builder then explores the reachable state space from the empty
//! reservation, adding one arc per compatible alternative (`ndfa`) or per
//! instruction (deterministic construction), plus the advance-cycle arc to
//! the shifted reservation. Every union is masked through the automaton's
//! matters-set: bits that can never influence a transition are erased so
//! equivalent states collapse early.

use cranelift_entity::packed_option::PackedOption;
use cranelift_entity::EntityRef;
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::check::Machine;
use crate::pdsl::{transform, AutomatonId, InsnId};
use crate::reserv::{in_conflict, ReservSet};

use super::states::{StateId, StatePool};

/// Per-instruction alt-state data within one automaton.
#[derive(Clone, Debug, Default)]
pub struct InsnAlts {
    /// Alt-states in canonical-regexp order, one per alternative.
    pub alts: Vec<StateId>,
    /// The same list sorted by state number and deduplicated; the identity
    /// key for behavioral equality.
    pub sorted: Vec<StateId>,
    /// First instruction with the same sorted list; only heads take part in
    /// automaton construction. None only on the advance-cycle entry.
    pub head: PackedOption<InsnId>,
    /// Instruction equivalence class, assigned by the classifier.
    pub class: u32,
}

/// Construction counts, reported in listings.
#[derive(Clone, Copy, Debug, Default)]
pub struct Stats {
    pub nfa_states: usize,
    pub nfa_arcs: usize,
    pub dfa_states: usize,
    pub dfa_arcs: usize,
    pub min_states: usize,
    pub min_arcs: usize,
}

/// Everything the pipeline accumulates for one automaton.
#[derive(Debug)]
pub struct AutomatonBuild {
    pub id: AutomatonId,
    pub matters: ReservSet,
    pub start: StateId,
    /// Live states in creation order; the start state comes first.
    pub states: Vec<StateId>,
    /// Indexed by `InsnId::index()`; the advance-cycle entry stays empty.
    pub insn_alts: Vec<InsnAlts>,
    /// Chain heads, excluding the advance-cycle insn, in declaration order.
    pub heads: Vec<InsnId>,
    /// Number of instruction equivalence classes.
    pub equiv_classes: u32,
    pub stats: Stats,
}

impl AutomatonBuild {
    pub fn new(machine: &Machine, id: AutomatonId) -> Self {
        Self {
            id,
            matters: matters_set(machine, id),
            start: StateId::new(0),
            states: Vec::new(),
            insn_alts: vec![InsnAlts::default(); machine.insns.len()],
            heads: Vec::new(),
            equiv_classes: 0,
            stats: Stats::default(),
        }
    }

    /// The instruction issues a non-empty reservation in this automaton, so
    /// the automaton's state can change when it issues.
    pub fn important(&self, pool: &StatePool, insn: InsnId) -> bool {
        self.insn_alts[insn.index()]
            .sorted
            .iter()
            .any(|&alt| !pool.state(alt).reserv.is_empty())
    }
}

/// The matters-set of one automaton: a (cycle, unit) bit is kept iff it can
/// still affect a future transition. Reservations of a unit below its first
/// possible occurrence cycle can no longer collide with a fresh instruction,
/// unless the unit is queryable or takes part in a constraint.
fn matters_set(machine: &Machine, automaton: AutomatonId) -> ReservSet {
    let dim = machine.dim();
    let mut matters = ReservSet::new(dim);
    for (unit, data) in machine.units.iter() {
        if data.automaton != Some(automaton) {
            continue;
        }
        let first_cycle = if data.queryable || data.in_constraint {
            Some(0)
        } else {
            data.occ.map(|(min, _)| min)
        };
        if let Some(first_cycle) = first_cycle {
            for cycle in first_cycle..dim.cycles {
                matters.set(dim, cycle, unit);
            }
        }
    }
    matters
}

/// Build the alt-state lists of every instruction and chain instructions
/// with identical sorted lists behind their head.
pub fn build_alt_states(machine: &Machine, pool: &mut StatePool, build: &mut AutomatonBuild) {
    let dim = machine.dim();
    let mut head_by_sorted: FxHashMap<Vec<StateId>, InsnId> = FxHashMap::default();

    for (insn, data) in machine.insns.iter() {
        if insn == machine.advance_cycle {
            continue;
        }
        let canonical = data
            .regexp
            .as_ref()
            .expect("instruction regexps are canonicalized by the checker");
        let mut alts = Vec::new();
        for alternative in transform::alternatives(canonical) {
            let mut reserv = ReservSet::new(dim);
            for (cycle, element) in transform::cycles(alternative).iter().enumerate() {
                transform::cycle_units(element, |unit| {
                    if machine.units[unit].automaton == Some(build.id) {
                        reserv.set(dim, cycle, unit);
                    }
                });
            }
            let (state, _) = pool.intern_atomic(build.id, reserv);
            alts.push(state);
        }
        let mut sorted = alts.clone();
        sorted.sort_unstable();
        sorted.dedup();

        let head = *head_by_sorted.entry(sorted.clone()).or_insert(insn);
        if head == insn {
            build.heads.push(insn);
        }
        build.insn_alts[insn.index()] = InsnAlts {
            alts,
            sorted,
            head: head.into(),
            class: 0,
        };
    }
}

/// Explore the reachable states from the empty reservation.
pub fn make_automaton(machine: &Machine, pool: &mut StatePool, build: &mut AutomatonBuild) {
    let dim = machine.dim();
    let ndfa = machine.options.ndfa;

    let (start, _) = pool.intern_atomic(build.id, ReservSet::new(dim));
    build.start = start;
    build.states.push(start);
    let mut stack = vec![start];
    // Interning alone cannot tell reached states apart: alt-states are
    // already interned before the walk starts.
    let mut queued: FxHashSet<StateId> = FxHashSet::default();
    queued.insert(start);

    while let Some(state) = stack.pop() {
        let state_reserv = pool.state(state).reserv.clone();

        for head_index in 0..build.heads.len() {
            let head = build.heads[head_index];
            let alts = build.insn_alts[head.index()].alts.clone();
            let mut compatible = 0u32;
            let mut first_dest = None;

            for alt in alts {
                let alt_reserv = pool.state(alt).reserv.clone();
                if in_conflict(&state_reserv, &alt_reserv, &machine.constraints) {
                    continue;
                }
                compatible += 1;
                if !ndfa && first_dest.is_some() {
                    // Deterministic construction commits to the first
                    // compatible alternative; the rest only count.
                    continue;
                }
                let mut union = state_reserv.clone();
                union.union(&alt_reserv);
                union.intersect(&build.matters);
                let (dest, _) = pool.intern_atomic(build.id, union);
                if queued.insert(dest) {
                    note_state(build, dest, &mut stack);
                }
                if ndfa {
                    pool.add_arc(state, dest, head, 1);
                } else {
                    first_dest = Some(dest);
                }
            }
            if !ndfa {
                if let Some(dest) = first_dest {
                    pool.add_arc(state, dest, head, compatible);
                }
            }
        }

        let mut shifted = state_reserv.shifted(dim);
        shifted.intersect(&build.matters);
        let (dest, _) = pool.intern_atomic(build.id, shifted);
        if queued.insert(dest) {
            note_state(build, dest, &mut stack);
        }
        pool.add_arc(state, dest, machine.advance_cycle, 1);
    }

    build.stats.nfa_states = build.states.len();
    build.stats.nfa_arcs = build
        .states
        .iter()
        .map(|&state| pool.out_degree(state))
        .sum();
}

fn note_state(build: &mut AutomatonBuild, state: StateId, stack: &mut Vec<StateId>) {
    build.states.push(state);
    stack.push(state);
    if build.states.len() % 100 == 0 {
        debug!("{}: {} states", build.id, build.states.len());
    }
}

#[cfg(test)]
mod tests {
    use super::{build_alt_states, make_automaton, AutomatonBuild};
    use crate::automata::distribute::distribute_units;
    use crate::automata::states::StatePool;
    use crate::check::check_description;
    use crate::pdsl::description::CpuDescription;
    use cranelift_entity::EntityRef;

    fn prepared(d: &CpuDescription) -> (crate::check::Machine, StatePool, AutomatonBuild) {
        let (mut machine, diags) = check_description(d);
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        distribute_units(&mut machine);
        let automaton = machine.automata.keys().next().unwrap();
        let mut pool = StatePool::new();
        let mut build = AutomatonBuild::new(&machine, automaton);
        build_alt_states(&machine, &mut pool, &mut build);
        (machine, pool, build)
    }

    #[test]
    fn identical_reservations_share_a_head() {
        let mut d = CpuDescription::new();
        d.unit("u", None)
            .insn_reservation("a", 1, "", "u")
            .insn_reservation("b", 2, "", "u")
            .insn_reservation("c", 1, "", "u, u");
        let (machine, _, build) = prepared(&d);
        // a and c are heads; b chains behind a.
        assert_eq!(build.heads.len(), 2);
        let ids: Vec<_> = machine.insns.keys().collect();
        assert_eq!(build.insn_alts[ids[1].index()].head.expand(), Some(ids[0]));
    }

    #[test]
    fn single_unit_single_insn_reaches_two_states() {
        let mut d = CpuDescription::new();
        d.unit("u", None).insn_reservation("a", 1, "", "u");
        let (machine, mut pool, mut build) = prepared(&d);
        make_automaton(&machine, &mut pool, &mut build);
        assert_eq!(build.stats.nfa_states, 2);
        // start: arcs for `a` and advance-cycle; busy: advance-cycle only.
        assert_eq!(pool.out_degree(build.states[0]), 2);
        assert_eq!(pool.out_degree(build.states[1]), 1);
    }

    #[test]
    fn alternatives_count_into_state_alts() {
        let mut d = CpuDescription::new();
        d.unit("u1", None)
            .unit("u2", None)
            .insn_reservation("a", 1, "", "u1 | u2");
        let (machine, mut pool, mut build) = prepared(&d);
        make_automaton(&machine, &mut pool, &mut build);
        let start_arcs = pool.out_arcs(build.start);
        let issue = start_arcs
            .iter()
            .map(|&arc| *pool.arc(arc))
            .find(|arc| arc.insn != machine.advance_cycle)
            .unwrap();
        // Both alternatives are compatible with the empty state.
        assert_eq!(issue.state_alts, 2);
    }

    #[test]
    fn ndfa_mode_keeps_alternative_arcs() {
        let mut d = CpuDescription::new();
        d.option("ndfa")
            .unit("u1", None)
            .unit("u2", None)
            .insn_reservation("a", 1, "", "u1 | u2");
        let (machine, mut pool, mut build) = prepared(&d);
        make_automaton(&machine, &mut pool, &mut build);
        let non_advance = pool
            .out_arcs(build.start)
            .iter()
            .filter(|&&arc| pool.arc(arc).insn != machine.advance_cycle)
            .count();
        assert_eq!(non_advance, 2);
    }

    #[test]
    fn matters_mask_erases_dead_bits() {
        // Unit `late` is only ever reserved on cycle 1, so a stale cycle-0
        // bit for it could never conflict and is masked away.
        let mut d = CpuDescription::new();
        d.unit("early", None)
            .unit("late", None)
            .insn_reservation("a", 1, "", "early, late");
        let (machine, _, build) = prepared(&d);
        let dim = machine.dim();
        let ids: Vec<_> = machine.units.keys().collect();
        assert!(build.matters.test(dim, 0, ids[0]));
        assert!(!build.matters.test(dim, 0, ids[1]));
        assert!(build.matters.test(dim, 1, ids[1]));
    }
}
