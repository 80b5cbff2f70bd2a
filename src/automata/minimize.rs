//! DFA minimization by partition refinement.
//!
//! The initial partition separates states by out-arc count and by the
//! cycle-0 observation of every queryable unit, both observable from the
//! outside. Each round then refines by the sorted set of
//! (destination class, instruction class, state alts) triples until stable.
//! Every class collapses into its first member; incoming arcs are
//! redirected and the merged members are recorded as the representative's
//! components so reservation queries stay answerable.

use cranelift_entity::EntityRef;
use rustc_hash::FxHashMap;

use crate::check::Machine;

use super::build::AutomatonBuild;
use super::states::{StateId, StatePool};

pub fn minimize(machine: &Machine, pool: &mut StatePool, build: &mut AutomatonBuild) {
    if machine.options.no_minimization || build.states.len() <= 1 {
        build.stats.min_states = build.stats.dfa_states;
        build.stats.min_arcs = build.stats.dfa_arcs;
        tag_new_cycle_states(machine, pool, build);
        return;
    }

    let n_classes = refine_partition(machine, pool, build);
    merge_classes(pool, build, n_classes);

    build.stats.min_states = build.states.len();
    build.stats.min_arcs = build
        .states
        .iter()
        .map(|&state| pool.out_degree(state))
        .sum();
    tag_new_cycle_states(machine, pool, build);
}

/// Refine until no class splits; returns the class count.
fn refine_partition(machine: &Machine, pool: &mut StatePool, build: &AutomatonBuild) -> u32 {
    let dim = machine.dim();

    // Out-arc count and queryable-unit observations discriminate at once.
    let mut initial: FxHashMap<(usize, Vec<bool>), u32> = FxHashMap::default();
    for &state in &build.states {
        let degree = pool.out_degree(state);
        let observations: Vec<bool> = machine
            .query_units
            .iter()
            .map(|&unit| pool.observable_reserv(state).test(dim, 0, unit))
            .collect();
        let fresh = initial.len() as u32;
        let class = *initial.entry((degree, observations)).or_insert(fresh);
        pool.state_mut(state).class = class;
    }
    let mut n_classes = initial.len() as u32;

    loop {
        let mut relabel: FxHashMap<(u32, Vec<(u32, u32, u32)>), u32> = FxHashMap::default();
        let mut new_classes = Vec::with_capacity(build.states.len());
        for &state in &build.states {
            let mut signature: Vec<(u32, u32, u32)> = pool
                .out_arcs(state)
                .iter()
                .map(|&arc| {
                    let data = pool.arc(arc);
                    (
                        pool.state(data.to).class,
                        build.insn_alts[data.insn.index()].class,
                        data.state_alts,
                    )
                })
                .collect();
            signature.sort_unstable();
            let key = (pool.state(state).class, signature);
            let fresh = relabel.len() as u32;
            new_classes.push(*relabel.entry(key).or_insert(fresh));
        }
        let grown = relabel.len() as u32 > n_classes;
        for (&state, &class) in build.states.iter().zip(new_classes.iter()) {
            pool.state_mut(state).class = class;
        }
        n_classes = relabel.len() as u32;
        if !grown {
            return n_classes;
        }
    }
}

/// Merge every class into its first member and redirect all arcs.
fn merge_classes(pool: &mut StatePool, build: &mut AutomatonBuild, n_classes: u32) {
    let mut representative: Vec<Option<StateId>> = vec![None; n_classes as usize];
    let mut members: Vec<Vec<StateId>> = vec![Vec::new(); n_classes as usize];
    let mut representatives = Vec::new();
    for &state in &build.states {
        let class = pool.state(state).class as usize;
        if representative[class].is_none() {
            representative[class] = Some(state);
            representatives.push(state);
        }
        members[class].push(state);
    }
    if representatives.len() == build.states.len() {
        return;
    }

    for &rep in &representatives {
        let arcs: Vec<_> = pool
            .out_arcs(rep)
            .iter()
            .map(|&arc| *pool.arc(arc))
            .collect();
        pool.remove_arcs(rep);
        for arc in arcs {
            let dest_class = pool.state(arc.to).class as usize;
            let dest = representative[dest_class].expect("arc into an empty class");
            pool.add_arc(rep, dest, arc.insn, arc.state_alts);
        }

        let class = pool.state(rep).class as usize;
        if members[class].len() > 1 {
            let mut merged = Vec::new();
            for &member in &members[class] {
                let state = pool.state(member);
                if state.is_compound() {
                    merged.extend_from_slice(&state.components);
                } else {
                    merged.push(member);
                }
            }
            merged.sort_unstable();
            merged.dedup();
            pool.state_mut(rep).components = merged;
        }
    }

    let start_class = pool.state(build.start).class as usize;
    build.start = representative[start_class].expect("start state lost its class");
    build.states = representatives;
}

/// Tag states whose every incoming arc is an advance-cycle transition, so
/// the scheduler can tell cycle-ending transitions from intra-cycle ones.
fn tag_new_cycle_states(machine: &Machine, pool: &mut StatePool, build: &AutomatonBuild) {
    let mut only_advance: FxHashMap<StateId, bool> = FxHashMap::default();
    for &state in &build.states {
        for arc in pool.out_arcs(state) {
            let data = pool.arc(arc);
            let entry = only_advance.entry(data.to).or_insert(true);
            *entry &= data.insn == machine.advance_cycle;
        }
    }
    for (&state, &advance_only) in &only_advance {
        if advance_only {
            pool.state_mut(state).new_cycle_p = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::minimize;
    use crate::automata::build::{build_alt_states, make_automaton, AutomatonBuild};
    use crate::automata::determinize::nfa_to_dfa;
    use crate::automata::distribute::distribute_units;
    use crate::automata::equiv::set_insn_equiv_classes;
    use crate::automata::states::StatePool;
    use crate::check::check_description;
    use crate::pdsl::description::CpuDescription;

    fn minimized(d: &CpuDescription) -> (crate::check::Machine, StatePool, AutomatonBuild) {
        let (mut machine, diags) = check_description(d);
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        distribute_units(&mut machine);
        let automaton = machine.automata.keys().next().unwrap();
        let mut pool = StatePool::new();
        let mut build = AutomatonBuild::new(&machine, automaton);
        build_alt_states(&machine, &mut pool, &mut build);
        make_automaton(&machine, &mut pool, &mut build);
        nfa_to_dfa(&machine, &mut pool, &mut build);
        set_insn_equiv_classes(&machine, &pool, &mut build);
        minimize(&machine, &mut pool, &mut build);
        (machine, pool, build)
    }

    #[test]
    fn converging_tails_merge() {
        // Nothing can issue from {u1@0, u3@1} or {u2@0, u3@1}, and both
        // drain to the start state on an advance cycle (the leftover u3
        // reservation is erased by the matters-mask), so the two merge.
        let mut d = CpuDescription::new();
        d.unit("u1", None)
            .unit("u2", None)
            .unit("u3", None)
            .insn_reservation("a", 1, "", "u1, u3")
            .insn_reservation("b", 1, "", "u2, u3");
        let (_, _, build) = minimized(&d);
        assert_eq!(build.stats.dfa_states, 3);
        assert_eq!(build.stats.min_states, 2);
    }

    #[test]
    fn queryable_units_block_merging() {
        // Same shape as above, but u1 is observable on cycle 0, which keeps
        // the two issue states apart.
        let mut d = CpuDescription::new();
        d.query_unit("u1", None)
            .unit("u2", None)
            .unit("u3", None)
            .insn_reservation("a", 1, "", "u1, u3")
            .insn_reservation("b", 1, "", "u2, u3");
        let (_, _, build) = minimized(&d);
        assert_eq!(build.stats.min_states, 3);
    }

    #[test]
    fn new_cycle_states_are_tagged() {
        let mut d = CpuDescription::new();
        d.unit("u", None).insn_reservation("a", 1, "", "u, u");
        let (machine, pool, build) = minimized(&d);
        // The state reached from {u@0, u@1} by an advance cycle has no other
        // incoming arcs.
        let tagged = build
            .states
            .iter()
            .filter(|&&state| pool.state(state).new_cycle_p)
            .count();
        assert!(tagged >= 1, "no new-cycle state found");
        let _ = machine;
    }

    #[test]
    fn no_minimization_option_is_honored() {
        let mut d = CpuDescription::new();
        d.option("no-minimization")
            .unit("u1", None)
            .unit("u2", None)
            .insn_reservation("a", 1, "", "u1")
            .insn_reservation("b", 1, "", "u2");
        let (_, _, build) = minimized(&d);
        assert_eq!(build.stats.min_states, build.stats.dfa_states);
    }
}
