//! Generate the human-readable automaton description (the `v` option).
//!
//! The listing shows, per automaton: the unit roster, the instruction
//! equivalence classes, every state with its reservation or component list
//! and its outgoing arcs, and the construction counts.

use std::fmt::{Display, Error, Formatter as DisplayFormatter};

use cranelift_entity::EntityRef;

use crate::automata::states::{StateId, StatePool};
use crate::automata::Automata;
use crate::check::Machine;
use crate::error;
use crate::reserv::ReservSet;
use crate::srcgen::Formatter;

/// Helper structure for pretty-printing reservation sets.
struct DisplayReserv<'a> {
    machine: &'a Machine,
    reserv: &'a ReservSet,
}

impl Display for DisplayReserv<'_> {
    fn fmt(&self, f: &mut DisplayFormatter<'_>) -> Result<(), Error> {
        let dim = self.machine.dim();
        let mut first = true;
        for cycle in 0..dim.cycles {
            let mut units = Vec::new();
            self.reserv
                .for_each_unit(dim, cycle, |unit| units.push(unit));
            for unit in units {
                if !first {
                    write!(f, " ")?;
                }
                write!(f, "{}@{}", self.machine.unit_name(unit), cycle)?;
                first = false;
            }
        }
        if first {
            write!(f, "empty")?;
        }
        Ok(())
    }
}

/// Helper structure for pretty-printing one state.
struct DisplayState<'a> {
    machine: &'a Machine,
    pool: &'a StatePool,
    state: StateId,
}

impl Display for DisplayState<'_> {
    fn fmt(&self, f: &mut DisplayFormatter<'_>) -> Result<(), Error> {
        let state = self.pool.state(self.state);
        write!(f, "state {}", state.order_num)?;
        if state.is_compound() {
            let components: Vec<String> = state
                .components
                .iter()
                .map(|&component| self.pool.state(component).order_num.to_string())
                .collect();
            write!(f, " (components {})", components.join(", "))?;
        } else {
            write!(
                f,
                " ({})",
                DisplayReserv {
                    machine: self.machine,
                    reserv: &state.reserv,
                }
            )?;
        }
        if state.new_cycle_p {
            write!(f, " [new cycle]")?;
        }
        Ok(())
    }
}

fn emit_listing(machine: &Machine, automata: &Automata, fmt: &mut Formatter) {
    for (build, tables) in automata.builds.iter().zip(automata.tables.automata.iter()) {
        let decl = &machine.automata[build.id];
        fmtln!(fmt, "Automaton `{}`", decl.name);
        fmtln!(fmt, "==================");

        let units: Vec<&str> = machine
            .units
            .iter()
            .filter(|(_, unit)| unit.automaton == Some(build.id))
            .map(|(_, unit)| unit.name.as_str())
            .collect();
        fmtln!(fmt, "units: {}", units.join(", "));
        fmt.empty_line();

        for (insn, data) in machine.insns.iter() {
            // An insn whose reservation is empty here can never change this
            // automaton's state.
            let important = if insn == machine.advance_cycle || build.important(&automata.pool, insn)
            {
                ""
            } else {
                " (state never changes)"
            };
            fmtln!(
                fmt,
                "insn {} `{}`: class {}, latency {}{}",
                insn.index(),
                data.name,
                build.insn_alts[insn.index()].class,
                data.default_latency,
                important
            );
        }
        fmt.empty_line();

        for &state in &tables.order_to_state {
            let dead_lock = tables.dead_lock[automata.pool.state(state).order_num as usize];
            fmtln!(
                fmt,
                "{}{}",
                DisplayState {
                    machine,
                    pool: &automata.pool,
                    state,
                },
                if dead_lock { " [dead lock]" } else { "" }
            );
            let mut arcs: Vec<_> = automata
                .pool
                .out_arcs(state)
                .iter()
                .map(|&arc| *automata.pool.arc(arc))
                .collect();
            arcs.sort_by_key(|arc| arc.insn);
            for arc in arcs {
                fmtln!(
                    fmt,
                    "    `{}` -> {} (alts {})",
                    machine.insn_name(arc.insn),
                    automata.pool.state(arc.to).order_num,
                    arc.state_alts
                );
            }
        }
        fmt.empty_line();

        fmtln!(
            fmt,
            "{} NFA states, {} NFA arcs; {} DFA states, {} DFA arcs; \
             {} minimal states, {} minimal arcs; {} instruction classes",
            build.stats.nfa_states,
            build.stats.nfa_arcs,
            build.stats.dfa_states,
            build.stats.dfa_arcs,
            build.stats.min_states,
            build.stats.min_arcs,
            build.equiv_classes
        );
        fmt.empty_line();
    }
}

/// Generate the `.dfa` description file.
pub(crate) fn generate(
    machine: &Machine,
    automata: &Automata,
    filename: &str,
    out_dir: &str,
) -> Result<(), error::Error> {
    let mut fmt = Formatter::new();
    emit_listing(machine, automata, &mut fmt);
    fmt.update_file(filename, out_dir)?;
    Ok(())
}
