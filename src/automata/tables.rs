//! State enumeration, table compression and the query API.
//!
//! Per automaton, the minimal DFA is flattened into two logically
//! state × class tables (transition destinations and state-alts counts),
//! each materialized either as a full row-major vector or as the classic
//! base/check/next comb vector when that saves enough space. Alongside them
//! sit the min-issue-delay table (packed down to 1, 2, 4 or 8 bits per
//! entry), the dead-lock vector and the queryable-unit reservation bitmap.
//!
//! The same tables back the in-memory query operations used by the test
//! suite; the generated source file is a rendering of this model.

use cranelift_entity::EntityRef;
use log::debug;

use crate::check::Machine;
use crate::pdsl::InsnId;

use super::build::AutomatonBuild;
use super::states::{StateId, StatePool};

/// Sentinel for "no transition" in full vectors and unowned comb slots.
pub const NO_STATE: u32 = u32::MAX;

/// A state × class lookup table.
#[derive(Debug)]
pub enum TransitionTable {
    Full {
        n_classes: u32,
        entries: Vec<u32>,
    },
    Comb {
        n_classes: u32,
        base: Vec<u32>,
        check: Vec<u32>,
        next: Vec<u32>,
    },
}

impl TransitionTable {
    pub fn get(&self, state: u32, class: u32) -> Option<u32> {
        match self {
            TransitionTable::Full { n_classes, entries } => {
                let entry = entries[(state * n_classes + class) as usize];
                (entry != NO_STATE).then_some(entry)
            }
            TransitionTable::Comb {
                base, check, next, ..
            } => {
                let index = base[state as usize] as usize + class as usize;
                if index < check.len() && check[index] == state {
                    Some(next[index])
                } else {
                    None
                }
            }
        }
    }

    pub fn is_comb(&self) -> bool {
        matches!(self, TransitionTable::Comb { .. })
    }
}

/// Choose between the full and the comb encoding for `rows`, each row
/// `n_classes` wide with `NO_STATE` holes. The comb encoding wins when the
/// full vector is more than 2.5 times as long.
fn compress(rows: &[Vec<u32>], n_classes: u32) -> TransitionTable {
    let full_len = rows.len() * n_classes as usize;

    // Greedy row placement: densest rows first, each at the lowest offset
    // where its filled columns hit no already-owned slot.
    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by_key(|&row| {
        std::cmp::Reverse(rows[row].iter().filter(|&&entry| entry != NO_STATE).count())
    });

    let mut base = vec![0u32; rows.len()];
    let mut check: Vec<u32> = Vec::new();
    let mut next: Vec<u32> = Vec::new();
    for &row in &order {
        let filled: Vec<usize> = (0..n_classes as usize)
            .filter(|&class| rows[row][class] != NO_STATE)
            .collect();
        if filled.is_empty() {
            continue;
        }
        let mut offset = 0;
        'place: loop {
            for &class in &filled {
                let slot = offset + class;
                if slot < check.len() && check[slot] != NO_STATE {
                    offset += 1;
                    continue 'place;
                }
            }
            break;
        }
        let end = offset + filled.last().unwrap() + 1;
        if check.len() < end {
            check.resize(end, NO_STATE);
            next.resize(end, 0);
        }
        for &class in &filled {
            check[offset + class] = row as u32;
            next[offset + class] = rows[row][class];
        }
        base[row] = offset as u32;
    }

    if 2 * full_len > 5 * next.len() {
        TransitionTable::Comb {
            n_classes,
            base,
            check,
            next,
        }
    } else {
        TransitionTable::Full {
            n_classes,
            entries: rows.iter().flatten().copied().collect(),
        }
    }
}

/// The min-issue-delay table, packed by the width of its largest entry.
#[derive(Debug)]
pub enum MinDelayTable {
    Packed {
        bits: u32,
        n_classes: u32,
        bytes: Vec<u8>,
    },
    Wide {
        n_classes: u32,
        entries: Vec<u32>,
    },
}

impl MinDelayTable {
    fn pack(entries: Vec<u32>, n_classes: u32) -> MinDelayTable {
        let max = entries.iter().copied().max().unwrap_or(0);
        let bits = match max {
            0..=1 => 1,
            2..=3 => 2,
            4..=15 => 4,
            16..=255 => 8,
            _ => {
                return MinDelayTable::Wide { n_classes, entries };
            }
        };
        let per_byte = 8 / bits as usize;
        let mut bytes = vec![0u8; (entries.len() + per_byte - 1) / per_byte];
        for (cell, &entry) in entries.iter().enumerate() {
            bytes[cell / per_byte] |= (entry as u8) << ((cell % per_byte) * bits as usize);
        }
        MinDelayTable::Packed {
            bits,
            n_classes,
            bytes,
        }
    }

    pub fn get(&self, state: u32, class: u32) -> u32 {
        match self {
            MinDelayTable::Packed {
                bits,
                n_classes,
                bytes,
            } => {
                let cell = (state * n_classes + class) as usize;
                let per_byte = 8 / *bits as usize;
                let shift = (cell % per_byte) * *bits as usize;
                let mask = if *bits == 8 { 0xff } else { (1u8 << bits) - 1 };
                ((bytes[cell / per_byte] >> shift) & mask) as u32
            }
            MinDelayTable::Wide { n_classes, entries } => {
                entries[(state * n_classes + class) as usize]
            }
        }
    }
}

/// The compressed tables of one automaton.
#[derive(Debug)]
pub struct AutomatonTables {
    pub n_states: u32,
    pub n_classes: u32,
    /// Byte width of the state member in the generated chip struct.
    pub width: u8,
    pub transitions: TransitionTable,
    pub state_alts: TransitionTable,
    pub min_delay: MinDelayTable,
    pub dead_lock: Vec<bool>,
    /// Queryable-unit bitmap, `query_bytes` bytes per state.
    pub reserved_units: Vec<u8>,
    /// Instruction index to equivalence class.
    pub translate: Vec<u32>,
    /// Enumeration order back to the interned states, for listings.
    pub order_to_state: Vec<StateId>,
}

/// The complete generated model over all automata.
#[derive(Debug)]
pub struct Tables {
    pub automata: Vec<AutomatonTables>,
    pub query_bytes: usize,
}

/// A CPU state: one enumerated state number per automaton.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuState {
    pub parts: Vec<u32>,
}

/// Enumerate every automaton's states and materialize its tables.
pub fn build_tables(machine: &Machine, pool: &mut StatePool, builds: &[AutomatonBuild]) -> Tables {
    let query_bytes = (machine.query_units.len() + 7) / 8;
    let mut automata = Vec::with_capacity(builds.len());
    for build in builds {
        automata.push(build_automaton_tables(machine, pool, build, query_bytes));
    }
    Tables {
        automata,
        query_bytes,
    }
}

fn build_automaton_tables(
    machine: &Machine,
    pool: &mut StatePool,
    build: &AutomatonBuild,
    query_bytes: usize,
) -> AutomatonTables {
    let dim = machine.dim();
    let n_states = build.states.len();
    let n_classes = build.equiv_classes;

    for (order, &state) in build.states.iter().enumerate() {
        pool.state_mut(state).order_num = order as u32;
    }

    let translate: Vec<u32> = machine
        .insns
        .keys()
        .map(|insn| build.insn_alts[insn.index()].class)
        .collect();

    let mut transition_rows = vec![vec![NO_STATE; n_classes as usize]; n_states];
    let mut alts_rows = vec![vec![NO_STATE; n_classes as usize]; n_states];
    for &state in &build.states {
        let from = pool.state(state).order_num as usize;
        for arc in pool.out_arcs(state) {
            let data = pool.arc(arc);
            let class = translate[data.insn.index()] as usize;
            transition_rows[from][class] = pool.state(data.to).order_num;
            alts_rows[from][class] = data.state_alts;
        }
    }

    let min_delay = MinDelayTable::pack(
        compute_min_delay(machine, pool, build, &transition_rows),
        n_classes,
    );

    let dead_lock: Vec<bool> = build
        .states
        .iter()
        .map(|&state| {
            let arcs = pool.out_arcs(state);
            arcs.len() == 1 && pool.arc(arcs[0]).insn == machine.advance_cycle
        })
        .collect();

    let mut reserved_units = vec![0u8; n_states * query_bytes];
    for &state in &build.states {
        let order = pool.state(state).order_num as usize;
        for (code, &unit) in machine.query_units.iter().enumerate() {
            if pool.observable_reserv(state).test(dim, 0, unit) {
                reserved_units[order * query_bytes + code / 8] |= 1 << (code % 8);
            }
        }
    }

    AutomatonTables {
        n_states: n_states as u32,
        n_classes,
        width: state_width(n_states as u32),
        transitions: compress(&transition_rows, n_classes),
        state_alts: compress(&alts_rows, n_classes),
        min_delay,
        dead_lock,
        reserved_units,
        translate,
        order_to_state: build.states.clone(),
    }
}

/// Shortest weighted path to a state that can issue each class: advance
/// cycles weigh 1, issuing any other instruction weighs 0. Relaxed to a
/// fixed point over the final arc set.
fn compute_min_delay(
    machine: &Machine,
    pool: &StatePool,
    build: &AutomatonBuild,
    transition_rows: &[Vec<u32>],
) -> Vec<u32> {
    let n_classes = build.equiv_classes as usize;
    let mut delay = vec![u32::MAX; build.states.len() * n_classes];

    for (from, row) in transition_rows.iter().enumerate() {
        for (class, &dest) in row.iter().enumerate() {
            if dest != NO_STATE {
                delay[from * n_classes + class] = 0;
            }
        }
    }

    loop {
        let mut changed = false;
        for &state in &build.states {
            let from = pool.state(state).order_num as usize;
            for arc in pool.out_arcs(state) {
                let data = pool.arc(arc);
                let weight = if data.insn == machine.advance_cycle { 1 } else { 0 };
                let to = pool.state(data.to).order_num as usize;
                for class in 0..n_classes {
                    let reachable = delay[to * n_classes + class];
                    if reachable == u32::MAX {
                        continue;
                    }
                    let candidate = reachable + weight;
                    if candidate < delay[from * n_classes + class] {
                        delay[from * n_classes + class] = candidate;
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }

    let unresolved = delay.iter().filter(|&&entry| entry == u32::MAX).count();
    if unresolved > 0 {
        debug!(
            "{}: {unresolved} min-issue-delay entries are unreachable",
            build.id
        );
        for entry in &mut delay {
            if *entry == u32::MAX {
                *entry = 0;
            }
        }
    }
    delay
}

fn state_width(n_states: u32) -> u8 {
    if n_states <= 0xff {
        1
    } else if n_states <= 0xffff {
        2
    } else {
        4
    }
}

impl Tables {
    pub fn new_state(&self) -> CpuState {
        CpuState {
            parts: vec![0; self.automata.len()],
        }
    }

    /// Byte size of the opaque chip state emitted into generated code. The
    /// chip struct lays its members out widest first, so the only padding is
    /// the tail rounding up to the widest member's alignment.
    pub fn state_size(&self) -> usize {
        let mut size = 0;
        let mut align = 1;
        for tables in &self.automata {
            size += tables.width as usize;
            align = align.max(tables.width as usize);
        }
        (size + align - 1) / align * align
    }

    /// Return every automaton to its start state.
    pub fn state_reset(&self, state: &mut CpuState) {
        for part in &mut state.parts {
            *part = 0;
        }
    }

    /// Advance the cycle (`insn` is `None`) or try to issue `insn`.
    /// Returns -1 on success with the state updated; otherwise the minimum
    /// number of advance cycles needed before issue becomes possible, with
    /// the state untouched.
    pub fn state_transition(
        &self,
        machine: &Machine,
        state: &mut CpuState,
        insn: Option<InsnId>,
    ) -> i32 {
        let insn = insn.unwrap_or(machine.advance_cycle);
        if insn == machine.advance_cycle {
            for (part, tables) in state.parts.iter_mut().zip(self.automata.iter()) {
                let class = tables.translate[insn.index()];
                *part = tables
                    .transitions
                    .get(*part, class)
                    .expect("internal error: advance-cycle transitions are total");
            }
            return -1;
        }

        let mut needed = 0u32;
        let mut possible = true;
        for (part, tables) in state.parts.iter().zip(self.automata.iter()) {
            let class = tables.translate[insn.index()];
            if tables.transitions.get(*part, class).is_none() {
                possible = false;
                needed = needed.max(tables.min_delay.get(*part, class));
            }
        }
        if !possible {
            return needed as i32;
        }
        for (part, tables) in state.parts.iter_mut().zip(self.automata.iter()) {
            let class = tables.translate[insn.index()];
            *part = tables.transitions.get(*part, class).unwrap();
        }
        -1
    }

    /// Sum across automata of the alternative reservations available for
    /// `insn` in `state`.
    pub fn state_alts(&self, state: &CpuState, insn: InsnId) -> u32 {
        state
            .parts
            .iter()
            .zip(self.automata.iter())
            .map(|(&part, tables)| {
                let class = tables.translate[insn.index()];
                tables.state_alts.get(part, class).unwrap_or(0)
            })
            .sum()
    }

    /// Minimum number of advance cycles before `insn` can issue from
    /// `state`.
    pub fn min_issue_delay(&self, state: &CpuState, insn: InsnId) -> u32 {
        state
            .parts
            .iter()
            .zip(self.automata.iter())
            .map(|(&part, tables)| {
                let class = tables.translate[insn.index()];
                if tables.transitions.get(part, class).is_some() {
                    0
                } else {
                    tables.min_delay.get(part, class)
                }
            })
            .max()
            .unwrap_or(0)
    }

    /// Delay needed between issuing `first` and `second` starting from a
    /// fresh state.
    pub fn min_insn_conflict_delay(
        &self,
        machine: &Machine,
        first: InsnId,
        second: InsnId,
    ) -> u32 {
        let mut temp = self.new_state();
        let _ = self.state_transition(machine, &mut temp, Some(first));
        self.min_issue_delay(&temp, second)
    }

    /// True iff some automaton can only advance the cycle from here.
    pub fn state_dead_lock_p(&self, state: &CpuState) -> bool {
        state
            .parts
            .iter()
            .zip(self.automata.iter())
            .any(|(&part, tables)| tables.dead_lock[part as usize])
    }

    /// Bypass latency from `from` to `to`, falling back to the default
    /// latency of `from`. Bypass guards are opaque and do not participate.
    pub fn insn_latency(&self, machine: &Machine, from: InsnId, to: InsnId) -> i32 {
        machine.insns[from]
            .bypasses
            .iter()
            .find(|bypass| bypass.to == to)
            .map(|bypass| bypass.latency)
            .unwrap_or(machine.insns[from].default_latency)
    }

    /// Is the queryable unit with `code` reserved on cycle 0 of `state`?
    pub fn cpu_unit_reservation_p(&self, state: &CpuState, code: u32) -> bool {
        let byte = (code / 8) as usize;
        let bit = 1u8 << (code % 8);
        state
            .parts
            .iter()
            .zip(self.automata.iter())
            .any(|(&part, tables)| {
                tables.reserved_units[part as usize * self.query_bytes + byte] & bit != 0
            })
    }

    /// Binary search the sorted queryable-unit names.
    pub fn get_cpu_unit_code(&self, machine: &Machine, name: &str) -> Option<u32> {
        machine
            .query_units
            .binary_search_by(|&unit| machine.unit_name(unit).cmp(name))
            .ok()
            .map(|index| index as u32)
    }
}

/// Memoized mapping from an external instruction identity to the internal
/// instruction number.
#[derive(Debug)]
pub struct InsnCodeCache {
    codes: Vec<Option<u32>>,
}

/// Allocate the instruction-code cache for `capacity` external identities.
pub fn dfa_start(capacity: usize) -> InsnCodeCache {
    InsnCodeCache {
        codes: vec![None; capacity],
    }
}

/// Release the instruction-code cache.
pub fn dfa_finish(cache: InsnCodeCache) {
    drop(cache);
}

impl InsnCodeCache {
    /// Look up (or compute and remember) the internal code of `uid`.
    pub fn dfa_insn_code(&mut self, uid: usize, compute: impl FnOnce() -> u32) -> u32 {
        if uid >= self.codes.len() {
            self.codes.resize(uid + 1, None);
        }
        *self.codes[uid].get_or_insert_with(compute)
    }

    /// Invalidate every memoized code.
    pub fn dfa_clean_insn_cache(&mut self) {
        self.codes.fill(None);
    }
}

#[cfg(test)]
mod tests {
    use super::{compress, MinDelayTable, TransitionTable, NO_STATE};

    #[test]
    fn comb_lookup_honors_check_ownership() {
        // Two sparse rows that overlap when overlaid naively.
        let rows = vec![
            vec![7, NO_STATE, NO_STATE, NO_STATE, NO_STATE, NO_STATE, NO_STATE, NO_STATE],
            vec![NO_STATE, 9, NO_STATE, NO_STATE, NO_STATE, NO_STATE, NO_STATE, NO_STATE],
            vec![NO_STATE; 8],
        ];
        let table = compress(&rows, 8);
        assert!(table.is_comb(), "sparse rows should pick the comb encoding");
        assert_eq!(table.get(0, 0), Some(7));
        assert_eq!(table.get(1, 1), Some(9));
        assert_eq!(table.get(0, 1), None);
        assert_eq!(table.get(1, 0), None);
        assert_eq!(table.get(2, 0), None);
    }

    #[test]
    fn dense_rows_stay_full() {
        let rows = vec![vec![1, 2], vec![3, 4]];
        let table = compress(&rows, 2);
        assert!(!table.is_comb());
        assert_eq!(table.get(1, 0), Some(3));
    }

    #[test]
    fn min_delay_packing_round_trips() {
        for (entries, expect_bits) in [
            (vec![0, 1, 1, 0, 1], 1u32),
            (vec![0, 3, 2, 1, 3], 2),
            (vec![0, 15, 7, 1], 4),
            (vec![0, 200, 7, 1], 8),
        ] {
            let table = MinDelayTable::pack(entries.clone(), entries.len() as u32);
            match &table {
                MinDelayTable::Packed { bits, .. } => assert_eq!(*bits, expect_bits),
                MinDelayTable::Wide { .. } => panic!("unexpected wide table"),
            }
            for (class, &entry) in entries.iter().enumerate() {
                assert_eq!(table.get(0, class as u32), entry);
            }
        }

        let wide = MinDelayTable::pack(vec![0, 300], 2);
        assert!(matches!(wide, MinDelayTable::Wide { .. }));
        assert_eq!(wide.get(0, 1), 300);
    }
}
