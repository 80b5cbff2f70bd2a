//! Automaton construction.
//!
//! The pipeline per automaton: distribute units, build alt-states, explore
//! the NFA, determinize, classify instructions, minimize, then enumerate
//! and compress into tables. The whole run shares one `StatePool`; states
//! are interned there and never freed until the pool is dropped at the end
//! of the run.

pub mod build;
pub mod determinize;
pub mod distribute;
pub mod equiv;
pub mod minimize;
pub mod states;
pub mod tables;

use std::time::Instant;

use cranelift_entity::EntityRef;
use log::info;
use rustc_hash::FxHashSet;

use crate::check::{Diagnostics, Machine};
use crate::error::Error;
use crate::pdsl::InsnId;

pub use build::AutomatonBuild;
pub use states::StatePool;
pub use tables::{CpuState, Tables};

/// The built automata: the shared state pool, the per-automaton
/// construction data and the compressed tables.
pub struct Automata {
    pub pool: StatePool,
    pub builds: Vec<AutomatonBuild>,
    pub tables: Tables,
}

/// Run the whole construction pipeline over a checked machine.
pub fn build_automata(machine: &mut Machine) -> Result<Automata, Error> {
    let mut diags = Diagnostics::default();
    distribute::distribute_units(machine);
    distribute::validate_distribution(machine, &mut diags);
    if diags.has_errors() {
        return Err(Error::with_msg(diags.errors().join("\n")));
    }

    let mut pool = StatePool::new();
    let mut builds = Vec::new();
    for automaton in machine.automata.keys().collect::<Vec<_>>() {
        let phase = Instant::now();
        let mut build = AutomatonBuild::new(machine, automaton);
        build::build_alt_states(machine, &mut pool, &mut build);
        build::make_automaton(machine, &mut pool, &mut build);
        determinize::nfa_to_dfa(machine, &mut pool, &mut build);
        equiv::set_insn_equiv_classes(machine, &pool, &mut build);
        minimize::minimize(machine, &mut pool, &mut build);
        if machine.options.time {
            info!(
                "automaton `{}`: {} NFA -> {} DFA -> {} minimal states, {} classes, {:.3?}",
                machine.automata[automaton].name,
                build.stats.nfa_states,
                build.stats.dfa_states,
                build.stats.min_states,
                build.equiv_classes,
                phase.elapsed()
            );
        }
        builds.push(build);
    }

    check_issuable(machine, &pool, &builds, &mut diags);
    if diags.has_errors() {
        return Err(Error::with_msg(diags.errors().join("\n")));
    }

    let tables = tables::build_tables(machine, &mut pool, &builds);
    Ok(Automata {
        pool,
        builds,
        tables,
    })
}

/// An instruction that labels no arc in some automaton can never be issued
/// at all; the product of the automata would block it forever.
fn check_issuable(
    machine: &Machine,
    pool: &StatePool,
    builds: &[AutomatonBuild],
    diags: &mut Diagnostics,
) {
    for build in builds {
        let mut labeled: FxHashSet<InsnId> = FxHashSet::default();
        for &state in &build.states {
            for arc in pool.out_arcs(state) {
                labeled.insert(pool.arc(arc).insn);
            }
        }
        for (insn, data) in machine.insns.iter() {
            if insn == machine.advance_cycle {
                continue;
            }
            let head = build.insn_alts[insn.index()]
                .head
                .expand()
                .expect("every real insn has a chain head");
            if !labeled.contains(&head) {
                diags.error(format!(
                    "automaton `{}`: insn `{}` will never be issued",
                    machine.automata[build.id].name, data.name
                ));
            }
        }
    }
}
