//! Distribution of units over automata.
//!
//! With declared automata every unit goes where its declaration says. With
//! none, either a single automaton is synthesized, or `split N` requests a
//! heuristic distribution that keeps the estimated state space of each
//! automaton near the nth root of the global estimate. Afterwards the
//! distribution is validated: within one instruction, every automaton that
//! appears on a cycle of one alternative must appear on the same cycle of
//! every other alternative, or that automaton's view of the instruction
//! would over-accept.

use log::debug;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::check::{AutomatonDecl, Diagnostics, Machine};
use crate::pdsl::{transform, AutomatonId, UnitId};

/// Cap on one unit's contribution to the state-space estimate, and on the
/// accumulated estimate, so the floating-point products stay bounded.
const MAX_UNIT_FACTOR: f64 = 256.0;
const MAX_ESTIMATE: f64 = 1_073_741_824.0;

/// Assign every unit to an automaton.
pub fn distribute_units(machine: &mut Machine) {
    if !machine.automata.is_empty() {
        for unit in machine.units.keys().collect::<Vec<_>>() {
            machine.units[unit].automaton = machine.units[unit].declared_automaton;
        }
        return;
    }

    let requested = machine.options.split.max(1) as usize;
    if requested == 1 {
        let automaton = synthesize(machine, 0);
        for unit in machine.units.keys().collect::<Vec<_>>() {
            machine.units[unit].automaton = Some(automaton);
        }
        return;
    }

    // Heuristic split: sort units by decreasing reservation depth, then fill
    // automata greedily up to the nth root of the global estimate.
    let mut units: Vec<UnitId> = machine.units.keys().collect();
    units.sort_by_key(|&unit| std::cmp::Reverse(unit_factor(machine, unit) as u64));

    let global: f64 = units
        .iter()
        .map(|&unit| unit_factor(machine, unit))
        .fold(1.0, |product, factor| {
            (product * factor).min(MAX_ESTIMATE)
        });
    let bound = global.powf(1.0 / requested as f64);

    let mut current = synthesize(machine, 0);
    let mut created = 1;
    let mut estimate = 1.0f64;
    let mut populated = false;
    for unit in units {
        let factor = unit_factor(machine, unit);
        if populated && created < requested && estimate * factor > bound {
            current = synthesize(machine, created);
            created += 1;
            estimate = 1.0;
        }
        estimate = (estimate * factor).min(MAX_ESTIMATE);
        populated = true;
        machine.units[unit].automaton = Some(current);
    }
    debug!("distributed {} units over {created} automata", machine.units.len());
}

fn synthesize(machine: &mut Machine, index: usize) -> AutomatonId {
    machine.automata.push(AutomatonDecl {
        name: format!("automaton_{index}"),
        declared: false,
    })
}

fn unit_factor(machine: &Machine, unit: UnitId) -> f64 {
    match machine.units[unit].occ {
        Some((_, max)) => ((max + 1) as f64).min(MAX_UNIT_FACTOR),
        None => 1.0,
    }
}

/// Validate the distribution against every instruction's alternatives.
pub fn validate_distribution(machine: &Machine, diags: &mut Diagnostics) {
    if machine.automata.len() <= 1 {
        return;
    }
    for (insn, data) in machine.insns.iter() {
        let Some(canonical) = &data.regexp else {
            continue;
        };
        let alternatives = transform::alternatives(canonical);
        if alternatives.len() <= 1 {
            continue;
        }

        // Automata present per (alternative, cycle).
        let usage: Vec<Vec<SmallVec<[AutomatonId; 2]>>> = alternatives
            .iter()
            .map(|alternative| {
                transform::cycles(alternative)
                    .iter()
                    .map(|element| {
                        let mut present: SmallVec<[AutomatonId; 2]> = SmallVec::new();
                        transform::cycle_units(element, |unit| {
                            if let Some(automaton) = machine.units[unit].automaton {
                                if !present.contains(&automaton) {
                                    present.push(automaton);
                                }
                            }
                        });
                        present
                    })
                    .collect()
            })
            .collect();

        let mut reported: FxHashSet<(AutomatonId, usize)> = FxHashSet::default();
        for (alt_index, cycles) in usage.iter().enumerate() {
            for (cycle, present) in cycles.iter().enumerate() {
                for &automaton in present {
                    let covered = usage.iter().enumerate().all(|(other_index, other)| {
                        other_index == alt_index
                            || other
                                .get(cycle)
                                .map_or(false, |automata| automata.contains(&automaton))
                    });
                    if !covered && reported.insert((automaton, cycle)) {
                        let unit = offending_unit(machine, canonical, alt_index, cycle, automaton);
                        diags.error(format!(
                            "unit `{}` of automaton `{}` is not reserved on cycle {} of every \
                             alternative of insn `{}`",
                            unit,
                            machine.automata[automaton].name,
                            cycle,
                            machine.insns[insn].name
                        ));
                    }
                }
            }
        }
    }
}

fn offending_unit(
    machine: &Machine,
    canonical: &crate::pdsl::regexp::Regexp,
    alt_index: usize,
    cycle: usize,
    automaton: AutomatonId,
) -> String {
    let alternative = &transform::alternatives(canonical)[alt_index];
    let element = &transform::cycles(alternative)[cycle];
    let mut found = None;
    transform::cycle_units(element, |unit| {
        if found.is_none() && machine.units[unit].automaton == Some(automaton) {
            found = Some(unit);
        }
    });
    found
        .map(|unit| machine.unit_name(unit).to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{distribute_units, validate_distribution};
    use crate::check::check_description;
    use crate::pdsl::description::CpuDescription;

    #[test]
    fn declared_automata_take_their_units() {
        let mut d = CpuDescription::new();
        d.automaton("pa")
            .automaton("pb")
            .unit("u1", Some("pa"))
            .unit("u2", Some("pb"))
            .insn_reservation("a", 1, "", "u1 + u2");
        let (mut machine, diags) = check_description(&d);
        assert!(!diags.has_errors());
        distribute_units(&mut machine);
        let automata: Vec<_> = machine
            .units
            .values()
            .map(|unit| unit.automaton.unwrap())
            .collect();
        assert_ne!(automata[0], automata[1]);
    }

    #[test]
    fn without_declarations_one_automaton_is_synthesized() {
        let mut d = CpuDescription::new();
        d.unit("u1", None)
            .unit("u2", None)
            .insn_reservation("a", 1, "", "u1, u2");
        let (mut machine, _) = check_description(&d);
        distribute_units(&mut machine);
        assert_eq!(machine.automata.len(), 1);
        let first = machine.units.values().next().unwrap().automaton;
        assert!(machine.units.values().all(|unit| unit.automaton == first));
    }

    #[test]
    fn split_creates_the_requested_automata() {
        let mut d = CpuDescription::new();
        d.split(2)
            .unit("u1", None)
            .unit("u2", None)
            .unit("u3", None)
            .unit("u4", None)
            .insn_reservation("a", 1, "", "u1*4")
            .insn_reservation("b", 1, "", "u2*4")
            .insn_reservation("c", 1, "", "u3 + u4");
        let (mut machine, diags) = check_description(&d);
        assert!(!diags.has_errors());
        distribute_units(&mut machine);
        assert_eq!(machine.automata.len(), 2);
    }

    #[test]
    fn uncovered_automaton_cycles_are_errors() {
        let mut d = CpuDescription::new();
        d.automaton("pa")
            .automaton("pb")
            .unit("u1", Some("pa"))
            .unit("u2", Some("pb"))
            // The second alternative reserves nothing of automaton pb.
            .insn_reservation("a", 1, "", "(u1 + u2) | u1");
        let (mut machine, mut diags) = check_description(&d);
        assert!(!diags.has_errors());
        distribute_units(&mut machine);
        validate_distribution(&machine, &mut diags);
        assert!(diags.has_errors());
        assert!(diags.errors()[0].contains("every"));
    }

    #[test]
    fn covered_alternatives_validate() {
        let mut d = CpuDescription::new();
        d.automaton("pa")
            .automaton("pb")
            .unit("u1", Some("pa"))
            .unit("u2", Some("pa"))
            .unit("v", Some("pb"))
            .insn_reservation("a", 1, "", "(u1 + v) | (u2 + v)");
        let (mut machine, mut diags) = check_description(&d);
        distribute_units(&mut machine);
        validate_distribution(&machine, &mut diags);
        assert!(!diags.has_errors(), "{:?}", diags.errors());
    }

    #[test]
    fn single_automaton_alternatives_may_differ_in_length() {
        let mut d = CpuDescription::new();
        d.unit("u", None).insn_reservation("a", 1, "", "u | (u, u)");
        let (mut machine, mut diags) = check_description(&d);
        distribute_units(&mut machine);
        validate_distribution(&machine, &mut diags);
        assert!(!diags.has_errors());
    }
}
