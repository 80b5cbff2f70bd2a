//! Instruction equivalence classification.
//!
//! Two instructions are equivalent in an automaton iff issuing either one
//! from any reachable state leads to the same destination. The classes are
//! the column space of the compressed transition tables: equivalent
//! instructions share a column through the translate vector.
//!
//! The partition starts with every participating instruction (the chain
//! heads plus the advance-cycle insn) in one class and splits classes at
//! every state whose out-arcs separate their members, iterating over the
//! whole automaton until no state splits anything.

use cranelift_entity::EntityRef;
use rustc_hash::FxHashMap;

use crate::check::Machine;
use crate::pdsl::InsnId;

use super::build::AutomatonBuild;
use super::states::{StateId, StatePool};

pub fn set_insn_equiv_classes(machine: &Machine, pool: &StatePool, build: &mut AutomatonBuild) {
    let mut participants: Vec<InsnId> = build.heads.clone();
    participants.push(machine.advance_cycle);

    let mut class: FxHashMap<InsnId, u32> =
        participants.iter().map(|&insn| (insn, 0)).collect();
    let mut n_classes = 1u32;

    loop {
        let mut changed = false;
        for &state in &build.states {
            let mut dest: FxHashMap<InsnId, StateId> = FxHashMap::default();
            for arc in pool.out_arcs(state) {
                let data = pool.arc(arc);
                dest.insert(data.insn, data.to);
            }

            // Relabel by (old class, destination from this state); the
            // partition can only refine, so a grown class count means a
            // split happened.
            let mut relabel: FxHashMap<(u32, Option<StateId>), u32> = FxHashMap::default();
            let mut next = 0u32;
            for &insn in &participants {
                let key = (class[&insn], dest.get(&insn).copied());
                let new_class = *relabel.entry(key).or_insert_with(|| {
                    let id = next;
                    next += 1;
                    id
                });
                class.insert(insn, new_class);
            }
            if next > n_classes {
                n_classes = next;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // Propagate head classes to the chained instructions and record the
    // per-insn class used as the transition-table column.
    for insn in machine.insns.keys() {
        let assigned = if insn == machine.advance_cycle {
            class[&insn]
        } else {
            let head = build.insn_alts[insn.index()]
                .head
                .expand()
                .expect("every real insn has a chain head");
            class[&head]
        };
        build.insn_alts[insn.index()].class = assigned;
    }
    build.equiv_classes = n_classes;
}

#[cfg(test)]
mod tests {
    use super::set_insn_equiv_classes;
    use crate::automata::build::{build_alt_states, make_automaton, AutomatonBuild};
    use crate::automata::determinize::nfa_to_dfa;
    use crate::automata::distribute::distribute_units;
    use crate::automata::states::StatePool;
    use crate::check::check_description;
    use crate::pdsl::description::CpuDescription;
    use cranelift_entity::EntityRef;

    fn classes_for(d: &CpuDescription) -> (crate::check::Machine, AutomatonBuild) {
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
        (machine, build)
    }

    #[test]
    fn identical_reservations_share_a_class() {
        let mut d = CpuDescription::new();
        d.unit("u", None)
            .insn_reservation("a", 1, "", "u")
            .insn_reservation("b", 3, "", "u")
            .insn_reservation("c", 1, "", "u, u");
        let (machine, build) = classes_for(&d);
        let ids: Vec<_> = machine.insns.keys().collect();
        let class_of = |i: usize| build.insn_alts[ids[i].index()].class;
        assert_eq!(class_of(0), class_of(1));
        assert_ne!(class_of(0), class_of(2));
    }

    #[test]
    fn advance_cycle_is_distinguished() {
        let mut d = CpuDescription::new();
        d.unit("u", None).insn_reservation("a", 1, "", "u");
        let (machine, build) = classes_for(&d);
        let a = machine.insns.keys().next().unwrap();
        assert_ne!(
            build.insn_alts[a.index()].class,
            build.insn_alts[machine.advance_cycle.index()].class
        );
        assert_eq!(build.equiv_classes, 2);
    }
}
