//! Generate the automaton table source file.
//!
//! The emitted file is self-contained Rust: the compressed tables as
//! statics plus the contractual query procedures (`state_transition`,
//! `min_issue_delay`, `insn_latency`, ...) over an opaque chip state with
//! one integer member per automaton. Instructions are identified by their
//! internal number, in declaration order, with the advance-cycle insn last;
//! the `InsnCodeCache` memoizes the consumer's mapping onto those numbers.

use cranelift_entity::EntityRef;

use crate::automata::tables::{AutomatonTables, MinDelayTable, TransitionTable};
use crate::automata::Automata;
use crate::check::Machine;
use crate::error;
use crate::srcgen::Formatter;

/// Smallest unsigned integer type that can hold `max`.
fn int_type(max: u64) -> &'static str {
    if max <= 0xff {
        "u8"
    } else if max <= 0xffff {
        "u16"
    } else {
        "u32"
    }
}

/// Emit a `static NAME: [TYPE; LEN] = [...];` with wrapped rows.
fn emit_vector(name: &str, ty: &str, values: &[u64], fmt: &mut Formatter) {
    fmtln!(fmt, "static {}: [{}; {}] = [", name, ty, values.len());
    fmt.indent(|fmt| {
        for chunk in values.chunks(16) {
            let row: Vec<String> = chunk.iter().map(|value| value.to_string()).collect();
            fmtln!(fmt, "{},", row.join(", "));
        }
    });
    fmtln!(fmt, "];");
}

fn bitmap(bits: &[bool]) -> Vec<u64> {
    let mut bytes = vec![0u64; (bits.len() + 7) / 8];
    for (index, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[index / 8] |= 1 << (index % 8);
        }
    }
    bytes
}

/// Element type of a table's payload, leaving room for the sentinel at the
/// type's maximum. Transition destinations are typed by the state count;
/// state-alts counts by their own maximum.
fn value_type(table: &TransitionTable) -> &'static str {
    let max = match table {
        TransitionTable::Full { entries, .. } => entries
            .iter()
            .filter(|&&entry| entry != crate::automata::tables::NO_STATE)
            .copied()
            .max()
            .unwrap_or(0),
        TransitionTable::Comb { next, .. } => next.iter().copied().max().unwrap_or(0),
    };
    int_type(max as u64 + 1)
}

/// Emit the statics of one automaton, suffixed with its index.
fn emit_automaton_tables(index: usize, tables: &AutomatonTables, fmt: &mut Formatter) {
    let state_ty = int_type(tables.n_states as u64);
    fmt.comment(format!(
        "Automaton {index}: {} states, {} instruction classes.",
        tables.n_states, tables.n_classes
    ));

    let translate: Vec<u64> = tables.translate.iter().map(|&class| class as u64).collect();
    emit_vector(
        &format!("TRANSLATE_{index}"),
        int_type(tables.n_classes as u64),
        &translate,
        fmt,
    );

    for (what, table) in [
        ("TRANSITIONS", &tables.transitions),
        ("STATE_ALTS", &tables.state_alts),
    ] {
        let entry_ty = if what == "TRANSITIONS" {
            state_ty
        } else {
            value_type(table)
        };
        match table {
            TransitionTable::Full { entries, .. } => {
                // The sentinel is folded to the element type's maximum.
                let folded: Vec<u64> = entries
                    .iter()
                    .map(|&entry| {
                        if entry == crate::automata::tables::NO_STATE {
                            sentinel(entry_ty)
                        } else {
                            entry as u64
                        }
                    })
                    .collect();
                emit_vector(&format!("{what}_{index}"), entry_ty, &folded, fmt);
            }
            TransitionTable::Comb {
                base, check, next, ..
            } => {
                let offset_ty = int_type(next.len() as u64);
                emit_vector(
                    &format!("{what}_BASE_{index}"),
                    offset_ty,
                    &base.iter().map(|&b| b as u64).collect::<Vec<_>>(),
                    fmt,
                );
                let folded_check: Vec<u64> = check
                    .iter()
                    .map(|&owner| {
                        if owner == crate::automata::tables::NO_STATE {
                            sentinel(state_ty)
                        } else {
                            owner as u64
                        }
                    })
                    .collect();
                emit_vector(&format!("{what}_CHECK_{index}"), state_ty, &folded_check, fmt);
                emit_vector(
                    &format!("{what}_NEXT_{index}"),
                    entry_ty,
                    &next.iter().map(|&entry| entry as u64).collect::<Vec<_>>(),
                    fmt,
                );
            }
        }
    }

    match &tables.min_delay {
        MinDelayTable::Packed { bits, bytes, .. } => {
            fmt.comment(format!("{bits} bits per min-issue-delay entry."));
            emit_vector(
                &format!("MIN_ISSUE_DELAY_{index}"),
                "u8",
                &bytes.iter().map(|&byte| byte as u64).collect::<Vec<_>>(),
                fmt,
            );
        }
        MinDelayTable::Wide { entries, .. } => {
            emit_vector(
                &format!("MIN_ISSUE_DELAY_{index}"),
                "u32",
                &entries.iter().map(|&entry| entry as u64).collect::<Vec<_>>(),
                fmt,
            );
        }
    }

    emit_vector(
        &format!("DEAD_LOCK_{index}"),
        "u8",
        &bitmap(&tables.dead_lock),
        fmt,
    );
    emit_vector(
        &format!("RESERVED_UNITS_{index}"),
        "u8",
        &tables
            .reserved_units
            .iter()
            .map(|&byte| byte as u64)
            .collect::<Vec<_>>(),
        fmt,
    );
    fmt.empty_line();
}

fn sentinel(ty: &str) -> u64 {
    match ty {
        "u8" => u8::MAX as u64,
        "u16" => u16::MAX as u64,
        _ => u32::MAX as u64,
    }
}

/// Emit the per-automaton lookup helpers.
fn emit_lookup_fns(index: usize, tables: &AutomatonTables, fmt: &mut Formatter) {
    let state_ty = int_type(tables.n_states as u64);
    for (what, lower, table) in [
        ("TRANSITIONS", "transition", &tables.transitions),
        ("STATE_ALTS", "state_alts", &tables.state_alts),
    ] {
        let entry_ty = if what == "TRANSITIONS" {
            state_ty
        } else {
            value_type(table)
        };
        fmtln!(
            fmt,
            "fn {}_{}(state: usize, class: usize) -> Option<{}> {{",
            lower,
            index,
            entry_ty
        );
        fmt.indent(|fmt| match table {
            TransitionTable::Full { .. } => {
                fmtln!(
                    fmt,
                    "let entry = {}_{}[state * {} + class];",
                    what,
                    index,
                    tables.n_classes
                );
                fmtln!(fmt, "(entry != {}::MAX).then_some(entry)", entry_ty);
            }
            TransitionTable::Comb { .. } => {
                fmtln!(
                    fmt,
                    "let slot = {}_BASE_{}[state] as usize + class;",
                    what,
                    index
                );
                fmtln!(
                    fmt,
                    "if slot < {}_CHECK_{}.len() && {}_CHECK_{}[slot] as usize == state {{",
                    what,
                    index,
                    what,
                    index
                );
                fmt.indent(|fmt| {
                    fmtln!(fmt, "Some({}_NEXT_{}[slot])", what, index);
                });
                fmtln!(fmt, "} else {");
                fmt.indent(|fmt| {
                    fmtln!(fmt, "None");
                });
                fmtln!(fmt, "}");
            }
        });
        fmtln!(fmt, "}");
        fmt.empty_line();
    }

    fmtln!(
        fmt,
        "fn min_issue_delay_{}(state: usize, class: usize) -> u32 {{",
        index
    );
    fmt.indent(|fmt| match &tables.min_delay {
        MinDelayTable::Packed { bits, .. } => {
            let per_byte = 8 / *bits;
            let mask = if *bits == 8 { 0xffu32 } else { (1 << bits) - 1 };
            fmtln!(fmt, "let cell = state * {} + class;", tables.n_classes);
            fmtln!(
                fmt,
                "((MIN_ISSUE_DELAY_{}[cell / {}] >> ((cell % {}) * {})) & {:#x}) as u32",
                index,
                per_byte,
                per_byte,
                bits,
                mask
            );
        }
        MinDelayTable::Wide { .. } => {
            fmtln!(
                fmt,
                "MIN_ISSUE_DELAY_{}[state * {} + class]",
                index,
                tables.n_classes
            );
        }
    });
    fmtln!(fmt, "}");
    fmt.empty_line();
}

fn emit_chip_state(automata: &Automata, fmt: &mut Formatter) {
    // Members go widest first under repr(C): no interior padding, and the
    // struct size matches what the in-memory `state_size` reports.
    let mut member_order: Vec<usize> = (0..automata.tables.automata.len()).collect();
    member_order.sort_by_key(|&index| std::cmp::Reverse(automata.tables.automata[index].width));

    fmt.doc_comment("The opaque scheduling state: one member per automaton.");
    fmtln!(fmt, "#[derive(Clone, Copy, Default, PartialEq, Eq)]");
    fmtln!(fmt, "#[repr(C)]");
    fmtln!(fmt, "pub struct ChipState {");
    fmt.indent(|fmt| {
        for index in member_order {
            let tables = &automata.tables.automata[index];
            fmtln!(
                fmt,
                "automaton_{}: {},",
                index,
                int_type(tables.n_states as u64)
            );
        }
    });
    fmtln!(fmt, "}");
    fmt.empty_line();

    fmtln!(fmt, "pub fn state_size() -> usize {");
    fmt.indent(|fmt| {
        fmtln!(fmt, "core::mem::size_of::<ChipState>()");
    });
    fmtln!(fmt, "}");
    fmt.empty_line();

    fmtln!(fmt, "pub fn state_reset(state: &mut ChipState) {");
    fmt.indent(|fmt| {
        fmtln!(fmt, "*state = ChipState::default();");
    });
    fmtln!(fmt, "}");
    fmt.empty_line();
}

/// Emit one `for every automaton` body via the callback, with the member
/// name and index in scope.
fn for_each_automaton(
    automata: &Automata,
    fmt: &mut Formatter,
    mut body: impl FnMut(usize, &AutomatonTables, &mut Formatter),
) {
    for (index, tables) in automata.tables.automata.iter().enumerate() {
        body(index, tables, fmt);
    }
}

fn emit_queries(machine: &Machine, automata: &Automata, fmt: &mut Formatter) {
    let n_insns = machine.insns.len();
    fmt.doc_comment(
        "Internal instruction numbers follow declaration order; the synthetic
         advance-cycle instruction is last.",
    );
    fmtln!(fmt, "pub const N_INSNS: usize = {};", n_insns);
    fmtln!(fmt, "pub const ADVANCE_CYCLE: usize = {};", n_insns - 1);
    fmt.empty_line();

    // state_transition
    fmtln!(
        fmt,
        "pub fn state_transition(state: &mut ChipState, insn: Option<usize>) -> i32 {"
    );
    fmt.indent(|fmt| {
        fmtln!(fmt, "let insn = insn.unwrap_or(ADVANCE_CYCLE);");
        fmtln!(fmt, "if insn == ADVANCE_CYCLE {");
        fmt.indent(|fmt| {
            for_each_automaton(automata, fmt, |index, _, fmt| {
                fmtln!(
                    fmt,
                    "state.automaton_{} = transition_{}(state.automaton_{} as usize, TRANSLATE_{}[insn] as usize).unwrap();",
                    index, index, index, index
                );
            });
            fmtln!(fmt, "return -1;");
        });
        fmtln!(fmt, "}");
        fmtln!(fmt, "let mut needed = 0u32;");
        for_each_automaton(automata, fmt, |index, _, fmt| {
            fmtln!(
                fmt,
                "let dest_{} = transition_{}(state.automaton_{} as usize, TRANSLATE_{}[insn] as usize);",
                index, index, index, index
            );
            fmtln!(fmt, "if dest_{}.is_none() {{", index);
            fmt.indent(|fmt| {
                fmtln!(
                    fmt,
                    "needed = needed.max(min_issue_delay_{}(state.automaton_{} as usize, TRANSLATE_{}[insn] as usize));",
                    index, index, index
                );
            });
            fmtln!(fmt, "}");
        });
        let all_some: Vec<String> = (0..automata.tables.automata.len())
            .map(|index| format!("dest_{index}.is_some()"))
            .collect();
        fmtln!(fmt, "if {} {{", all_some.join(" && "));
        fmt.indent(|fmt| {
            for_each_automaton(automata, fmt, |index, _, fmt| {
                fmtln!(fmt, "state.automaton_{} = dest_{}.unwrap();", index, index);
            });
            fmtln!(fmt, "return -1;");
        });
        fmtln!(fmt, "}");
        fmtln!(fmt, "needed as i32");
    });
    fmtln!(fmt, "}");
    fmt.empty_line();

    // state_alts
    fmtln!(fmt, "pub fn state_alts(state: &ChipState, insn: usize) -> u32 {");
    fmt.indent(|fmt| {
        fmtln!(fmt, "let mut alts = 0u32;");
        for_each_automaton(automata, fmt, |index, _, fmt| {
            fmtln!(
                fmt,
                "alts += state_alts_{}(state.automaton_{} as usize, TRANSLATE_{}[insn] as usize).map_or(0, |a| a as u32);",
                index, index, index
            );
        });
        fmtln!(fmt, "alts");
    });
    fmtln!(fmt, "}");
    fmt.empty_line();

    // min_issue_delay
    fmtln!(
        fmt,
        "pub fn min_issue_delay(state: &ChipState, insn: usize) -> u32 {"
    );
    fmt.indent(|fmt| {
        fmtln!(fmt, "let mut delay = 0u32;");
        for_each_automaton(automata, fmt, |index, _, fmt| {
            fmtln!(
                fmt,
                "if transition_{}(state.automaton_{} as usize, TRANSLATE_{}[insn] as usize).is_none() {{",
                index, index, index
            );
            fmt.indent(|fmt| {
                fmtln!(
                    fmt,
                    "delay = delay.max(min_issue_delay_{}(state.automaton_{} as usize, TRANSLATE_{}[insn] as usize));",
                    index, index, index
                );
            });
            fmtln!(fmt, "}");
        });
        fmtln!(fmt, "delay");
    });
    fmtln!(fmt, "}");
    fmt.empty_line();

    // min_insn_conflict_delay
    fmtln!(
        fmt,
        "pub fn min_insn_conflict_delay(insn1: usize, insn2: usize) -> u32 {"
    );
    fmt.indent(|fmt| {
        fmtln!(fmt, "let mut state = ChipState::default();");
        fmtln!(fmt, "let _ = state_transition(&mut state, Some(insn1));");
        fmtln!(fmt, "min_issue_delay(&state, insn2)");
    });
    fmtln!(fmt, "}");
    fmt.empty_line();

    // state_dead_lock_p
    fmtln!(fmt, "pub fn state_dead_lock_p(state: &ChipState) -> bool {");
    fmt.indent(|fmt| {
        let any: Vec<String> = (0..automata.tables.automata.len())
            .map(|index| {
                format!(
                    "DEAD_LOCK_{index}[state.automaton_{index} as usize / 8] \
                     & (1 << (state.automaton_{index} as usize % 8)) != 0"
                )
            })
            .collect();
        fmtln!(fmt, "{}", any.join(" || "));
    });
    fmtln!(fmt, "}");
    fmt.empty_line();

    emit_latency(machine, fmt);
    emit_unit_queries(machine, automata, fmt);
    emit_insn_code_cache(fmt);
}

fn emit_latency(machine: &Machine, fmt: &mut Formatter) {
    let max_latency = machine
        .insns
        .values()
        .map(|insn| insn.default_latency as u64)
        .max()
        .unwrap_or(0);
    let defaults: Vec<u64> = machine
        .insns
        .values()
        .map(|insn| insn.default_latency as u64)
        .collect();
    emit_vector("DEFAULT_LATENCIES", int_type(max_latency), &defaults, fmt);
    fmt.empty_line();

    fmt.doc_comment(
        "Bypass latency from `insn1` to `insn2`, defaulting to the latency
         of `insn1`. Guards are opaque names and do not take part here.",
    );
    fmtln!(fmt, "pub fn insn_latency(insn1: usize, insn2: usize) -> i32 {");
    fmt.indent(|fmt| {
        let mut any_bypass = false;
        for (insn, data) in machine.insns.iter() {
            for bypass in &data.bypasses {
                if !any_bypass {
                    fmtln!(fmt, "match (insn1, insn2) {");
                    fmt.indent_push();
                    any_bypass = true;
                }
                let guard = bypass
                    .guard
                    .as_deref()
                    .map(|name| format!(" // guard: {name}"))
                    .unwrap_or_default();
                fmtln!(
                    fmt,
                    "({}, {}) => {},{}",
                    insn.index(),
                    bypass.to.index(),
                    bypass.latency,
                    guard
                );
            }
        }
        if any_bypass {
            fmtln!(fmt, "_ => DEFAULT_LATENCIES[insn1] as i32,");
            fmt.indent_pop();
            fmtln!(fmt, "}");
        } else {
            fmtln!(fmt, "let _ = insn2;");
            fmtln!(fmt, "DEFAULT_LATENCIES[insn1] as i32");
        }
    });
    fmtln!(fmt, "}");
    fmt.empty_line();
}

fn emit_unit_queries(machine: &Machine, automata: &Automata, fmt: &mut Formatter) {
    let names: Vec<String> = machine
        .query_units
        .iter()
        .map(|&unit| format!("\"{}\"", machine.unit_name(unit)))
        .collect();
    fmt.comment("Queryable unit names, sorted; the index is the unit code.");
    fmtln!(
        fmt,
        "static QUERY_UNIT_NAMES: [&str; {}] = [{}];",
        names.len(),
        names.join(", ")
    );
    fmt.empty_line();

    fmtln!(fmt, "pub fn get_cpu_unit_code(name: &str) -> i32 {");
    fmt.indent(|fmt| {
        fmtln!(
            fmt,
            "QUERY_UNIT_NAMES.binary_search(&name).map_or(-1, |code| code as i32)"
        );
    });
    fmtln!(fmt, "}");
    fmt.empty_line();

    let query_bytes = automata.tables.query_bytes.max(1);
    fmtln!(
        fmt,
        "pub fn cpu_unit_reservation_p(state: &ChipState, code: usize) -> bool {"
    );
    fmt.indent(|fmt| {
        let any: Vec<String> = (0..automata.tables.automata.len())
            .map(|index| {
                format!(
                    "RESERVED_UNITS_{index}[state.automaton_{index} as usize * {query_bytes} \
                     + code / 8] & (1 << (code % 8)) != 0"
                )
            })
            .collect();
        if machine.query_units.is_empty() {
            fmtln!(fmt, "let _ = (state, code);");
            fmtln!(fmt, "false");
        } else {
            fmtln!(fmt, "{}", any.join(" || "));
        }
    });
    fmtln!(fmt, "}");
    fmt.empty_line();
}

fn emit_insn_code_cache(fmt: &mut Formatter) {
    fmt.doc_comment("Memoized mapping from external instruction identities to
                     internal instruction numbers.");
    fmtln!(fmt, "pub struct InsnCodeCache {");
    fmt.indent(|fmt| {
        fmtln!(fmt, "codes: Vec<Option<u32>>,");
    });
    fmtln!(fmt, "}");
    fmt.empty_line();
    fmtln!(fmt, "pub fn dfa_start(capacity: usize) -> InsnCodeCache {");
    fmt.indent(|fmt| {
        fmtln!(fmt, "InsnCodeCache { codes: vec![None; capacity] }");
    });
    fmtln!(fmt, "}");
    fmt.empty_line();
    fmtln!(fmt, "pub fn dfa_finish(cache: InsnCodeCache) {");
    fmt.indent(|fmt| {
        fmtln!(fmt, "drop(cache);");
    });
    fmtln!(fmt, "}");
    fmt.empty_line();
    fmtln!(fmt, "impl InsnCodeCache {");
    fmt.indent(|fmt| {
        fmtln!(
            fmt,
            "pub fn dfa_insn_code(&mut self, uid: usize, compute: impl FnOnce() -> u32) -> u32 {"
        );
        fmt.indent(|fmt| {
            fmtln!(fmt, "if uid >= self.codes.len() {");
            fmt.indent(|fmt| {
                fmtln!(fmt, "self.codes.resize(uid + 1, None);");
            });
            fmtln!(fmt, "}");
            fmtln!(fmt, "*self.codes[uid].get_or_insert_with(compute)");
        });
        fmtln!(fmt, "}");
        fmt.empty_line();
        fmtln!(fmt, "pub fn dfa_clean_insn_cache(&mut self) {");
        fmt.indent(|fmt| {
            fmtln!(fmt, "self.codes.fill(None);");
        });
        fmtln!(fmt, "}");
    });
    fmtln!(fmt, "}");
}

/// Generate the table file.
pub(crate) fn generate(
    machine: &Machine,
    automata: &Automata,
    filename: &str,
    out_dir: &str,
) -> Result<(), error::Error> {
    let mut fmt = Formatter::new();
    fmt.comment("Pipeline hazard recognizer tables. Generated; do not edit.");
    fmt.empty_line();
    for (index, tables) in automata.tables.automata.iter().enumerate() {
        emit_automaton_tables(index, tables, &mut fmt);
    }
    for (index, tables) in automata.tables.automata.iter().enumerate() {
        emit_lookup_fns(index, tables, &mut fmt);
    }
    emit_chip_state(automata, &mut fmt);
    emit_queries(machine, automata, &mut fmt);
    fmt.update_file(filename, out_dir)?;
    Ok(())
}
