//! Subset construction over compound states.
//!
//! After the NFA phase a state can carry several arcs with the same
//! instruction label, one per surviving alternative. Determinization groups
//! the arcs of every reachable state by instruction and replaces each group
//! by a single arc whose destination is the compound state over the group's
//! atomic destinations. Compound states inherit the union of their
//! components' out-arcs and are processed like any other state, so the
//! construction closes over newly created compounds.
//!
//! Under deterministic construction every group has exactly one arc and the
//! pass degenerates into the reachability walk that fixes the final state
//! order.

use cranelift_entity::EntityRef;
use rustc_hash::FxHashSet;

use crate::check::Machine;

use super::build::AutomatonBuild;
use super::states::{StateId, StatePool};

pub fn nfa_to_dfa(machine: &Machine, pool: &mut StatePool, build: &mut AutomatonBuild) {
    let mut reachable = Vec::new();
    let mut visited: FxHashSet<StateId> = FxHashSet::default();
    let mut stack = vec![build.start];

    while let Some(state) = stack.pop() {
        if !visited.insert(state) {
            continue;
        }
        reachable.push(state);

        // A freshly created compound state inherits its components' arcs.
        if pool.state(state).is_compound() && pool.state(state).first_arc.is_none() {
            let components = pool.state(state).components.clone();
            for component in components {
                for arc in pool.out_arcs(component) {
                    let data = *pool.arc(arc);
                    pool.add_arc(state, data.to, data.insn, data.state_alts);
                }
            }
        }

        // Group the out-arcs by instruction, in declaration order.
        let mut groups: Vec<Vec<super::states::Arc>> = vec![Vec::new(); machine.insns.len()];
        for arc in pool.out_arcs(state) {
            let data = *pool.arc(arc);
            groups[data.insn.index()].push(data);
        }

        for (insn_index, group) in groups.iter().enumerate() {
            match group.len() {
                0 => {}
                1 => stack.push(group[0].to),
                merged => {
                    let mut components = Vec::with_capacity(merged);
                    for arc in group {
                        let dest = pool.state(arc.to);
                        if dest.is_compound() {
                            components.extend_from_slice(&dest.components);
                        } else {
                            components.push(arc.to);
                        }
                    }
                    let (compound, _) = pool.intern_compound(build.id, components);
                    let insn = group[0].insn;
                    debug_assert_eq!(insn.index(), insn_index);
                    remove_insn_arcs(pool, state, insn);
                    pool.add_arc(state, compound, insn, merged as u32);
                    stack.push(compound);
                }
            }
        }
    }

    build.states = reachable;
    build.stats.dfa_states = build.states.len();
    build.stats.dfa_arcs = build
        .states
        .iter()
        .map(|&state| pool.out_degree(state))
        .sum();
}

/// Drop every arc of `state` labeled `insn`, keeping the rest.
fn remove_insn_arcs(pool: &mut StatePool, state: StateId, insn: crate::pdsl::InsnId) {
    let kept: Vec<_> = pool
        .out_arcs(state)
        .iter()
        .map(|&arc| *pool.arc(arc))
        .filter(|arc| arc.insn != insn)
        .collect();
    pool.remove_arcs(state);
    for arc in kept {
        pool.add_arc(state, arc.to, arc.insn, arc.state_alts);
    }
}

#[cfg(test)]
mod tests {
    use super::nfa_to_dfa;
    use crate::automata::build::{build_alt_states, make_automaton, AutomatonBuild};
    use crate::automata::distribute::distribute_units;
    use crate::automata::states::StatePool;
    use crate::check::check_description;
    use crate::pdsl::description::CpuDescription;

    #[test]
    fn ndfa_alternatives_merge_into_a_compound_state() {
        let mut d = CpuDescription::new();
        d.option("ndfa")
            .unit("u1", None)
            .unit("u2", None)
            .insn_reservation("a", 1, "", "u1 | u2");
        let (mut machine, diags) = check_description(&d);
        assert!(!diags.has_errors());
        distribute_units(&mut machine);
        let automaton = machine.automata.keys().next().unwrap();
        let mut pool = StatePool::new();
        let mut build = AutomatonBuild::new(&machine, automaton);
        build_alt_states(&machine, &mut pool, &mut build);
        make_automaton(&machine, &mut pool, &mut build);
        nfa_to_dfa(&machine, &mut pool, &mut build);

        let issue = pool
            .out_arcs(build.start)
            .iter()
            .map(|&arc| *pool.arc(arc))
            .find(|arc| arc.insn != machine.advance_cycle)
            .unwrap();
        assert_eq!(issue.state_alts, 2);
        let dest = pool.state(issue.to);
        assert!(dest.is_compound());
        assert_eq!(dest.components.len(), 2);
    }

    #[test]
    fn deterministic_mode_creates_no_compounds() {
        let mut d = CpuDescription::new();
        d.unit("u1", None)
            .unit("u2", None)
            .insn_reservation("a", 1, "", "u1 | u2");
        let (mut machine, _) = check_description(&d);
        distribute_units(&mut machine);
        let automaton = machine.automata.keys().next().unwrap();
        let mut pool = StatePool::new();
        let mut build = AutomatonBuild::new(&machine, automaton);
        build_alt_states(&machine, &mut pool, &mut build);
        make_automaton(&machine, &mut pool, &mut build);
        let before = build.stats.nfa_states;
        nfa_to_dfa(&machine, &mut pool, &mut build);
        assert_eq!(build.stats.dfa_states, before);
        assert!(build
            .states
            .iter()
            .all(|&state| !pool.state(state).is_compound()));
    }
}
