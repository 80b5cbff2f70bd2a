//! End-to-end scenarios over the in-memory query API.

use hazard_automata::automata::{build_automata, Automata};
use hazard_automata::check::{check, Machine};
use hazard_automata::pdsl::description::CpuDescription;
use hazard_automata::pdsl::InsnId;

fn built(description: &CpuDescription) -> (Machine, Automata) {
    let mut machine = check(description).expect("description checks");
    let automata = build_automata(&mut machine).expect("automata build");
    (machine, automata)
}

fn insn(machine: &Machine, name: &str) -> InsnId {
    machine
        .insns
        .iter()
        .find(|(_, data)| data.name == name)
        .map(|(id, _)| id)
        .expect("declared instruction")
}

#[test]
fn single_unit_single_insn() {
    let mut d = CpuDescription::new();
    d.unit("u", None).insn_reservation("a", 1, "", "u");
    let (machine, automata) = built(&d);
    let tables = &automata.tables;
    let a = insn(&machine, "a");

    assert_eq!(tables.automata[0].n_states, 2);
    let mut state = tables.new_state();
    assert_eq!(tables.min_issue_delay(&state, a), 0);
    assert_eq!(tables.state_transition(&machine, &mut state, Some(a)), -1);
    assert_eq!(tables.min_issue_delay(&state, a), 1);
    // A second issue attempt fails without touching the state.
    let before = state.clone();
    assert_eq!(tables.state_transition(&machine, &mut state, Some(a)), 1);
    assert_eq!(state, before);
    // One cycle later we are back at the start state.
    assert_eq!(tables.state_transition(&machine, &mut state, None), -1);
    assert_eq!(state, tables.new_state());
    assert_eq!(tables.state_transition(&machine, &mut state, Some(a)), -1);
}

#[test]
fn two_cycle_reservation() {
    let mut d = CpuDescription::new();
    d.unit("u", None).insn_reservation("a", 1, "", "u, u");
    let (machine, automata) = built(&d);
    let tables = &automata.tables;
    let a = insn(&machine, "a");

    let mut state = tables.new_state();
    assert_eq!(tables.state_transition(&machine, &mut state, Some(a)), -1);
    // Both cycles of `u` are busy: nothing but an advance cycle helps.
    assert!(tables.state_dead_lock_p(&state));
    assert_eq!(tables.min_issue_delay(&state, a), 2);
    assert_eq!(tables.state_transition(&machine, &mut state, Some(a)), 2);

    assert_eq!(tables.state_transition(&machine, &mut state, None), -1);
    assert_eq!(tables.min_issue_delay(&state, a), 1);
    assert_eq!(tables.state_transition(&machine, &mut state, None), -1);
    assert_eq!(tables.min_issue_delay(&state, a), 0);
    assert_eq!(tables.state_transition(&machine, &mut state, Some(a)), -1);
}

#[test]
fn parallel_alternatives_count_as_state_alts() {
    let mut d = CpuDescription::new();
    d.unit("u1", None)
        .unit("u2", None)
        .insn_reservation("a", 1, "", "u1 | u2");
    let (machine, automata) = built(&d);
    let tables = &automata.tables;
    let a = insn(&machine, "a");

    let mut state = tables.new_state();
    assert_eq!(tables.state_alts(&state, a), 2);
    assert_eq!(tables.state_transition(&machine, &mut state, Some(a)), -1);
    // The committed alternative occupies one unit; the other still admits a.
    assert_eq!(tables.min_issue_delay(&state, a), 0);
}

#[test]
fn ndfa_alternatives_through_compound_states() {
    let mut d = CpuDescription::new();
    d.option("ndfa")
        .unit("u1", None)
        .unit("u2", None)
        .insn_reservation("a", 1, "", "u1 | u2");
    let (machine, automata) = built(&d);
    let tables = &automata.tables;
    let a = insn(&machine, "a");

    let mut state = tables.new_state();
    assert_eq!(tables.state_alts(&state, a), 2);
    assert_eq!(tables.state_transition(&machine, &mut state, Some(a)), -1);
}

#[test]
fn exclusion_delays_the_other_insn() {
    let mut d = CpuDescription::new();
    d.unit("u1", None)
        .unit("u2", None)
        .exclusion(&["u1"], &["u2"])
        .insn_reservation("a", 1, "", "u1")
        .insn_reservation("b", 1, "", "u2");
    let (machine, automata) = built(&d);
    let tables = &automata.tables;
    let a = insn(&machine, "a");
    let b = insn(&machine, "b");

    let mut state = tables.new_state();
    assert_eq!(tables.state_transition(&machine, &mut state, Some(a)), -1);
    let delay = tables.state_transition(&machine, &mut state, Some(b));
    assert!(delay > 0, "exclusion must delay b, got {delay}");
    assert_eq!(tables.state_transition(&machine, &mut state, None), -1);
    assert_eq!(tables.state_transition(&machine, &mut state, Some(b)), -1);
}

#[test]
fn bypass_latencies() {
    let mut d = CpuDescription::new();
    d.unit("u", None)
        .insn_reservation("a", 3, "", "u")
        .insn_reservation("b", 1, "", "u")
        .insn_reservation("c", 1, "", "u")
        .bypass(1, "a", "b");
    let (machine, automata) = built(&d);
    let tables = &automata.tables;
    let a = insn(&machine, "a");
    let b = insn(&machine, "b");
    let c = insn(&machine, "c");

    assert_eq!(tables.insn_latency(&machine, a, b), 1);
    assert_eq!(tables.insn_latency(&machine, a, c), 3);
    assert_eq!(tables.insn_latency(&machine, b, a), 1);
}

#[test]
fn identical_regexps_share_a_column() {
    let mut d = CpuDescription::new();
    d.unit("u", None)
        .insn_reservation("a", 1, "", "u")
        .insn_reservation("b", 4, "", "u");
    let (machine, automata) = built(&d);
    let tables = &automata.tables;
    let a = insn(&machine, "a");
    let b = insn(&machine, "b");

    use cranelift_entity::EntityRef;
    let translate = &tables.automata[0].translate;
    assert_eq!(translate[a.index()], translate[b.index()]);
}

#[test]
fn issue_is_immediate_iff_no_delay_is_needed() {
    let mut d = CpuDescription::new();
    d.unit("u1", None)
        .unit("u2", None)
        .insn_reservation("a", 1, "", "u1, u2")
        .insn_reservation("b", 1, "", "u2");
    let (machine, automata) = built(&d);
    let tables = &automata.tables;
    let insns: Vec<_> = ["a", "b"].iter().map(|name| insn(&machine, name)).collect();

    // Walk a handful of instruction streams and compare the two oracles in
    // every visited state.
    let streams: &[&[Option<usize>]] = &[
        &[Some(0), None, Some(1), None],
        &[Some(1), Some(0), None, None],
        &[None, Some(0), Some(0), None, Some(1)],
    ];
    for stream in streams {
        let mut state = tables.new_state();
        for step in *stream {
            for &probe in &insns {
                let immediate = {
                    let mut copy = state.clone();
                    tables.state_transition(&machine, &mut copy, Some(probe)) == -1
                };
                assert_eq!(
                    tables.min_issue_delay(&state, probe) == 0,
                    immediate,
                    "oracles disagree for {probe} in {state:?}"
                );
            }
            let insn = step.map(|index| insns[index]);
            let _ = tables.state_transition(&machine, &mut state, insn);
        }
    }
}

#[test]
fn queryable_unit_reservations() {
    let mut d = CpuDescription::new();
    d.query_unit("mul", None)
        .unit("alu", None)
        .insn_reservation("m", 2, "", "mul, mul")
        .insn_reservation("add", 1, "", "alu");
    let (machine, automata) = built(&d);
    let tables = &automata.tables;
    let m = insn(&machine, "m");

    let code = tables.get_cpu_unit_code(&machine, "mul").unwrap();
    assert_eq!(tables.get_cpu_unit_code(&machine, "alu"), None);
    assert_eq!(tables.get_cpu_unit_code(&machine, "fpu"), None);

    let mut state = tables.new_state();
    assert!(!tables.cpu_unit_reservation_p(&state, code));
    assert_eq!(tables.state_transition(&machine, &mut state, Some(m)), -1);
    assert!(tables.cpu_unit_reservation_p(&state, code));
    // Still reserved on the second cycle of the reservation.
    assert_eq!(tables.state_transition(&machine, &mut state, None), -1);
    assert!(tables.cpu_unit_reservation_p(&state, code));
    assert_eq!(tables.state_transition(&machine, &mut state, None), -1);
    assert!(!tables.cpu_unit_reservation_p(&state, code));
}

#[test]
fn min_insn_conflict_delay_from_reset() {
    let mut d = CpuDescription::new();
    d.unit("u", None)
        .insn_reservation("a", 1, "", "u, u, u")
        .insn_reservation("b", 1, "", "u");
    let (machine, automata) = built(&d);
    let tables = &automata.tables;
    let a = insn(&machine, "a");
    let b = insn(&machine, "b");

    assert_eq!(tables.min_insn_conflict_delay(&machine, a, b), 3);
    assert_eq!(tables.min_insn_conflict_delay(&machine, b, b), 1);
}

#[test]
fn declared_automata_form_a_product() {
    let mut d = CpuDescription::new();
    d.automaton("ints")
        .automaton("floats")
        .unit("alu", Some("ints"))
        .unit("fpu", Some("floats"))
        .insn_reservation("add", 1, "", "alu")
        .insn_reservation("fadd", 2, "", "fpu")
        .insn_reservation("pair", 1, "", "alu + fpu");
    let (machine, automata) = built(&d);
    let tables = &automata.tables;
    assert_eq!(tables.automata.len(), 2);
    let add = insn(&machine, "add");
    let fadd = insn(&machine, "fadd");
    let pair = insn(&machine, "pair");

    let mut state = tables.new_state();
    assert_eq!(tables.state_transition(&machine, &mut state, Some(add)), -1);
    // The float automaton is independent of the int one.
    assert_eq!(tables.state_transition(&machine, &mut state, Some(fadd)), -1);
    // Both automata are now busy, so the paired insn needs a cycle.
    assert_eq!(tables.state_transition(&machine, &mut state, Some(pair)), 1);
    assert_eq!(tables.state_transition(&machine, &mut state, None), -1);
    assert_eq!(tables.state_transition(&machine, &mut state, Some(pair)), -1);
}

#[test]
fn state_size_matches_automata_widths() {
    let mut d = CpuDescription::new();
    d.unit("u", None).insn_reservation("a", 1, "", "u");
    let (_, automata) = built(&d);
    assert_eq!(automata.tables.state_size(), 1);
}

#[test]
fn state_size_includes_member_padding() {
    // A 255-cycle reservation drains through 256 distinct states, forcing a
    // two-byte member; the second automaton fits in one byte, and the chip
    // struct rounds up to its widest member's alignment.
    let mut d = CpuDescription::new();
    d.automaton("wide")
        .automaton("narrow")
        .unit("u", Some("wide"))
        .unit("v", Some("narrow"))
        .insn_reservation("a", 1, "", "u*255")
        .insn_reservation("b", 1, "", "v");
    let (_, automata) = built(&d);
    assert_eq!(automata.tables.automata[0].n_states, 256);
    assert_eq!(automata.tables.automata[0].width, 2);
    assert_eq!(automata.tables.automata[1].width, 1);
    assert_eq!(automata.tables.state_size(), 4);
}

#[test]
fn generate_writes_the_table_sources() {
    let mut d = CpuDescription::new();
    d.option("v")
        .query_unit("u1", None)
        .unit("u2", None)
        .insn_reservation("a", 2, "", "(u1, u2) | (u2, u1)")
        .insn_reservation("b", 1, "", "u2")
        .bypass(1, "a", "b");

    let out_dir = std::env::temp_dir().join(format!("hazard-automata-{}", std::process::id()));
    std::fs::create_dir_all(&out_dir).unwrap();
    let out = out_dir.to_str().unwrap();
    hazard_automata::generate(&d, out).expect("generation succeeds");

    let tables = std::fs::read_to_string(out_dir.join("insn_automata.rs")).unwrap();
    assert!(tables.contains("pub fn state_transition"));
    assert!(tables.contains("pub fn min_issue_delay"));
    assert!(tables.contains("pub fn insn_latency"));
    assert!(tables.contains("QUERY_UNIT_NAMES"));
    let listing = std::fs::read_to_string(out_dir.join("insn_automata.dfa")).unwrap();
    assert!(listing.contains("Automaton"));
    assert!(listing.contains("state 0"));
    std::fs::remove_dir_all(&out_dir).unwrap();
}

#[test]
fn errors_suppress_generation() {
    let mut d = CpuDescription::new();
    d.unit("u", None).insn_reservation("a", -1, "", "u");
    let out = std::env::temp_dir();
    let result = hazard_automata::generate(&d, out.to_str().unwrap());
    assert!(result.is_err());
    assert!(result.err().unwrap().to_string().contains("negative latency"));
}
