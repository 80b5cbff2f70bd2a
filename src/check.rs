//! Semantic checking of pipeline descriptions.
//!
//! The checker turns the raw declaration records into a resolved `Machine`:
//! interned units, instructions and automata, canonicalized reservation
//! regexps, symmetric constraint tables, unit cycle extents and resolved
//! bypasses. User errors accumulate in a `Diagnostics` value so one run
//! reports as many problems as possible; generation is suppressed whenever
//! at least one error was raised.

use cranelift_entity::{EntityRef, PrimaryMap};
use log::warn;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::Error;
use crate::pdsl::description::{CpuDescription, Decl, Options, PatternGroup};
use crate::pdsl::regexp::{self, Regexp};
use crate::pdsl::transform;
use crate::pdsl::{AutomatonId, InsnId, UnitId};
use crate::reserv::{ConstraintTables, ReservDim, UnitConstraint};

/// The name of the synthetic instruction representing the passage of one
/// CPU cycle. It is always present and always last.
pub const ADVANCE_CYCLE_NAME: &str = "$advance_cycle";

/// Accumulated user diagnostics for one run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Diagnostics {
    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn warning(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        warn!("{msg}");
        self.warnings.push(msg);
    }

    /// Report an error, downgraded to a warning in permissive mode.
    pub fn error_or_warning(&mut self, permissive: bool, msg: impl Into<String>) {
        if permissive {
            self.warning(msg);
        } else {
            self.error(msg);
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn render_errors(&self) -> String {
        self.errors.join("\n")
    }
}

/// A resolved functional unit.
#[derive(Debug)]
pub struct Unit {
    pub name: String,
    /// The automaton named in the declaration, if any.
    pub declared_automaton: Option<AutomatonId>,
    /// The automaton the unit ended up in after distribution.
    pub automaton: Option<AutomatonId>,
    pub queryable: bool,
    /// Dense code of a queryable unit, by sorted unit name.
    pub query_code: Option<u32>,
    /// Minimum and maximum cycle on which any instruction reserves the unit.
    pub occ: Option<(usize, usize)>,
    /// The unit appears in an exclusion, presence or absence constraint.
    pub in_constraint: bool,
    pub used: bool,
}

/// A resolved bypass edge, attached to the out-instruction.
#[derive(Clone, Debug)]
pub struct Bypass {
    pub to: InsnId,
    pub latency: i32,
    pub guard: Option<String>,
}

/// A resolved instruction reservation.
#[derive(Debug)]
pub struct Insn {
    pub name: String,
    pub default_latency: i32,
    pub cond: String,
    /// The reservation source string, kept for listings.
    pub source: String,
    /// The canonicalized regexp; `None` only for the advance-cycle insn.
    pub regexp: Option<Regexp>,
    pub bypasses: Vec<Bypass>,
}

/// A declared or synthesized automaton.
#[derive(Debug)]
pub struct AutomatonDecl {
    pub name: String,
    pub declared: bool,
}

/// The resolved description: what the automaton construction consumes.
#[derive(Debug)]
pub struct Machine {
    pub units: PrimaryMap<UnitId, Unit>,
    pub insns: PrimaryMap<InsnId, Insn>,
    pub automata: PrimaryMap<AutomatonId, AutomatonDecl>,
    pub advance_cycle: InsnId,
    pub constraints: ConstraintTables,
    /// Queryable units sorted by name; the index is the unit's query code.
    pub query_units: Vec<UnitId>,
    pub options: Options,
}

impl Machine {
    pub fn dim(&self) -> &ReservDim {
        &self.constraints.dim
    }

    pub fn unit_name(&self, unit: UnitId) -> &str {
        &self.units[unit].name
    }

    pub fn insn_name(&self, insn: InsnId) -> &str {
        &self.insns[insn].name
    }
}

/// Check `description`, failing on any accumulated user error.
pub fn check(description: &CpuDescription) -> Result<Machine, Error> {
    let (machine, diags) = check_description(description);
    if diags.has_errors() {
        Err(Error::with_msg(diags.render_errors()))
    } else {
        Ok(machine)
    }
}

/// Check `description` and return the (possibly partially resolved) machine
/// together with every diagnostic raised. The machine is only meaningful
/// when no errors were reported.
pub fn check_description(description: &CpuDescription) -> (Machine, Diagnostics) {
    let mut diags = Diagnostics::default();
    let options = resolve_options(description, &mut diags);

    let mut interner = Interner::intern(description, options, &mut diags);
    interner.resolve_automaton_names(&mut diags);
    interner.resolve_regexps(&mut diags);
    interner.normalize_constraints(&mut diags);
    interner.audit_usage(&mut diags);
    let dim = interner.compute_extents();
    interner.resolve_bypasses(&mut diags);
    let machine = interner.finish(dim, options);
    (machine, diags)
}

fn resolve_options(description: &CpuDescription, diags: &mut Diagnostics) -> Options {
    let mut options = Options::default();
    for decl in &description.decls {
        if let Decl::Option { name, value } = decl {
            match name.as_str() {
                "ndfa" => options.ndfa = true,
                "no-minimization" => options.no_minimization = true,
                "w" => options.permissive = true,
                "v" => options.verbose = true,
                "time" => options.time = true,
                "split" => match value {
                    Some(n) => options.split = *n,
                    None => diags.error("option `split` requires an automata count"),
                },
                other => diags.error(format!("unknown automata option `{other}`")),
            }
        }
    }
    options
}

/// Either side of the shared unit/reservation name space.
#[derive(Copy, Clone)]
enum UnitOrReserv {
    Unit(UnitId),
    Reserv(usize),
}

enum ResolveState {
    Unresolved,
    InProgress,
    Resolved(Regexp),
}

struct ReservDecl {
    name: String,
    parsed: Option<Regexp>,
    state: ResolveState,
    used: bool,
}

struct Interner<'a> {
    description: &'a CpuDescription,
    options: Options,
    units: PrimaryMap<UnitId, Unit>,
    unit_automaton_names: Vec<Option<String>>,
    insns: PrimaryMap<InsnId, Insn>,
    insn_raw: Vec<Option<Regexp>>,
    automata: PrimaryMap<AutomatonId, AutomatonDecl>,
    reservs: Vec<ReservDecl>,
    unit_or_reserv: FxHashMap<String, UnitOrReserv>,
    insn_by_name: FxHashMap<String, InsnId>,
    automaton_by_name: FxHashMap<String, AutomatonId>,
    constraints: Vec<UnitConstraint>,
    max_cycles: usize,
}

impl<'a> Interner<'a> {
    /// Pass 1: enter every declaration into its name space, parsing the
    /// reservation strings along the way.
    fn intern(
        description: &'a CpuDescription,
        options: Options,
        diags: &mut Diagnostics,
    ) -> Interner<'a> {
        let mut interner = Interner {
            description,
            options,
            units: PrimaryMap::new(),
            unit_automaton_names: Vec::new(),
            insns: PrimaryMap::new(),
            insn_raw: Vec::new(),
            automata: PrimaryMap::new(),
            reservs: Vec::new(),
            unit_or_reserv: FxHashMap::default(),
            insn_by_name: FxHashMap::default(),
            automaton_by_name: FxHashMap::default(),
            constraints: Vec::new(),
            max_cycles: 1,
        };

        for decl in &description.decls {
            match decl {
                Decl::Automaton { name } => {
                    if interner.automaton_by_name.contains_key(name) {
                        diags.error_or_warning(
                            options.permissive,
                            format!("repeated declaration of automaton `{name}`"),
                        );
                        continue;
                    }
                    let id = interner.automata.push(AutomatonDecl {
                        name: name.clone(),
                        declared: true,
                    });
                    interner.automaton_by_name.insert(name.clone(), id);
                }
                Decl::Unit {
                    name,
                    automaton,
                    queryable,
                } => {
                    if interner.unit_or_reserv.contains_key(name) {
                        diags.error(format!("repeated declaration of unit `{name}`"));
                        continue;
                    }
                    let id = interner.units.push(Unit {
                        name: name.clone(),
                        declared_automaton: None,
                        automaton: None,
                        queryable: *queryable,
                        query_code: None,
                        occ: None,
                        in_constraint: false,
                        used: false,
                    });
                    interner.unit_automaton_names.push(automaton.clone());
                    interner
                        .unit_or_reserv
                        .insert(name.clone(), UnitOrReserv::Unit(id));
                }
                Decl::Reservation { name, regexp: src } => {
                    if interner.unit_or_reserv.contains_key(name) {
                        diags.error(format!("repeated declaration of reservation `{name}`"));
                        continue;
                    }
                    let parsed = match regexp::parse(src) {
                        Ok(parsed) => Some(parsed),
                        Err(msg) => {
                            diags.error(format!("in reservation `{name}`: {msg}"));
                            None
                        }
                    };
                    let index = interner.reservs.len();
                    interner.reservs.push(ReservDecl {
                        name: name.clone(),
                        parsed,
                        state: ResolveState::Unresolved,
                        used: false,
                    });
                    interner
                        .unit_or_reserv
                        .insert(name.clone(), UnitOrReserv::Reserv(index));
                }
                Decl::InsnReservation {
                    name,
                    default_latency,
                    cond,
                    regexp: src,
                } => {
                    if interner.insn_by_name.contains_key(name) {
                        diags.error(format!(
                            "repeated definition of instruction reservation `{name}`"
                        ));
                        continue;
                    }
                    if *default_latency < 0 {
                        diags.error(format!("negative latency of insn reservation `{name}`"));
                    }
                    let parsed = match regexp::parse(src) {
                        Ok(parsed) => Some(parsed),
                        Err(msg) => {
                            diags.error(format!("in insn reservation `{name}`: {msg}"));
                            None
                        }
                    };
                    let id = interner.insns.push(Insn {
                        name: name.clone(),
                        default_latency: (*default_latency).max(0),
                        cond: cond.clone(),
                        source: src.clone(),
                        regexp: None,
                        bypasses: Vec::new(),
                    });
                    interner.insn_raw.push(parsed);
                    interner.insn_by_name.insert(name.clone(), id);
                }
                Decl::Bypass { .. }
                | Decl::Exclusion { .. }
                | Decl::Presence { .. }
                | Decl::Absence { .. }
                | Decl::Option { .. } => {}
            }
        }

        interner
            .constraints
            .resize_with(interner.units.len(), UnitConstraint::default);
        interner
    }

    /// Pass 2a: attach declared automata to units.
    fn resolve_automaton_names(&mut self, diags: &mut Diagnostics) {
        let any_declared = !self.automata.is_empty();
        for index in 0..self.units.len() {
            let unit = UnitId::new(index);
            match self.unit_automaton_names[index].clone() {
                Some(name) => match self.automaton_by_name.get(&name) {
                    Some(&id) => self.units[unit].declared_automaton = Some(id),
                    None => diags.error(format!(
                        "automaton `{}` of unit `{}` is not declared",
                        name, self.units[unit].name
                    )),
                },
                None => {
                    if any_declared {
                        diags.error(format!(
                            "unit `{}` declared without automaton when one is defined",
                            self.units[unit].name
                        ));
                    }
                }
            }
        }
    }

    /// Passes 2b and 3: resolve every name used in a regexp, inlining
    /// reservation references and rejecting recursive ones, then
    /// canonicalize the instruction regexps.
    fn resolve_regexps(&mut self, diags: &mut Diagnostics) {
        for insn in self.insns.keys().collect::<Vec<_>>() {
            let raw = self.insn_raw[insn.index()].take();
            let name = self.insns[insn].name.clone();
            let resolved = match raw {
                Some(raw) => self.resolve(&raw, &name, diags),
                None => Regexp::Nothing,
            };
            self.insns[insn].regexp = Some(transform::canonicalize(resolved));
        }
    }

    fn resolve(&mut self, regexp: &Regexp, context: &str, diags: &mut Diagnostics) -> Regexp {
        match regexp {
            Regexp::Name(name) => match self.unit_or_reserv.get(name).copied() {
                Some(UnitOrReserv::Unit(unit)) => {
                    self.units[unit].used = true;
                    Regexp::Unit(unit)
                }
                Some(UnitOrReserv::Reserv(index)) => self.resolve_reserv(index, diags),
                None => {
                    diags.error(format!(
                        "undeclared unit or reservation `{name}` in `{context}`"
                    ));
                    Regexp::Nothing
                }
            },
            Regexp::Unit(_) | Regexp::Nothing => regexp.clone(),
            Regexp::Sequence(children) => {
                Regexp::Sequence(self.resolve_children(children, context, diags))
            }
            Regexp::Repeat(child, count) => {
                Regexp::Repeat(Box::new(self.resolve(child, context, diags)), *count)
            }
            Regexp::AllOf(children) => {
                Regexp::AllOf(self.resolve_children(children, context, diags))
            }
            Regexp::OneOf(children) => {
                Regexp::OneOf(self.resolve_children(children, context, diags))
            }
        }
    }

    fn resolve_children(
        &mut self,
        children: &[Regexp],
        context: &str,
        diags: &mut Diagnostics,
    ) -> Vec<Regexp> {
        children
            .iter()
            .map(|child| self.resolve(child, context, diags))
            .collect()
    }

    /// Inline one reservation reference, detecting recursion through the
    /// in-progress marker of the depth-first walk.
    fn resolve_reserv(&mut self, index: usize, diags: &mut Diagnostics) -> Regexp {
        self.reservs[index].used = true;
        if let ResolveState::InProgress = self.reservs[index].state {
            diags.error(format!(
                "cycle in definition of reservation `{}`",
                self.reservs[index].name
            ));
            return Regexp::Nothing;
        }
        if let ResolveState::Resolved(resolved) = &self.reservs[index].state {
            return resolved.clone();
        }
        self.reservs[index].state = ResolveState::InProgress;
        let name = self.reservs[index].name.clone();
        let parsed = self.reservs[index].parsed.clone().unwrap_or(Regexp::Nothing);
        let resolved = self.resolve(&parsed, &name, diags);
        self.reservs[index].state = ResolveState::Resolved(resolved.clone());
        resolved
    }

    /// Pass 4: make exclusion sets symmetric and attach presence/absence
    /// patterns to every unit on the left-hand side.
    fn normalize_constraints(&mut self, diags: &mut Diagnostics) {
        let permissive = self.options.permissive;
        let description = self.description;
        for decl in &description.decls {
            match decl {
                Decl::Exclusion { names_a, names_b } => {
                    let side_a = self.constraint_units(names_a, "exclusion set", diags);
                    let side_b = self.constraint_units(names_b, "exclusion set", diags);
                    for &a in &side_a {
                        for &b in &side_b {
                            if a == b {
                                diags.error(format!(
                                    "unit `{}` excludes itself",
                                    self.units[a].name
                                ));
                                continue;
                            }
                            let automaton_a = self.units[a].declared_automaton;
                            let automaton_b = self.units[b].declared_automaton;
                            if let (Some(automaton_a), Some(automaton_b)) =
                                (automaton_a, automaton_b)
                            {
                                if automaton_a != automaton_b {
                                    diags.error(format!(
                                        "units `{}` and `{}` in exclusion set belong to different automata",
                                        self.units[a].name, self.units[b].name
                                    ));
                                    continue;
                                }
                            }
                            add_exclusion(&mut self.constraints, a, b);
                            add_exclusion(&mut self.constraints, b, a);
                        }
                    }
                }
                Decl::Presence {
                    names,
                    patterns,
                    final_p,
                } => {
                    let lhs = self.constraint_units(names, "presence set", diags);
                    let groups = self.constraint_patterns(patterns, "presence set", diags);
                    for &unit in &lhs {
                        let list = if *final_p {
                            &mut self.constraints[unit.index()].final_presence
                        } else {
                            &mut self.constraints[unit.index()].presence
                        };
                        list.extend(groups.iter().cloned());
                    }
                }
                Decl::Absence {
                    names,
                    patterns,
                    final_p,
                } => {
                    let lhs = self.constraint_units(names, "absence set", diags);
                    let groups = self.constraint_patterns(patterns, "absence set", diags);
                    for &unit in &lhs {
                        if groups.iter().any(|group| group.contains(&unit)) {
                            diags.error(format!(
                                "unit `{}` requires own absence",
                                self.units[unit].name
                            ));
                            continue;
                        }
                        let list = if *final_p {
                            &mut self.constraints[unit.index()].final_absence
                        } else {
                            &mut self.constraints[unit.index()].absence
                        };
                        list.extend(groups.iter().cloned());
                    }
                }
                _ => {}
            }
        }

        // Cross-checks between the accumulated constraint lists.
        for unit in self.units.keys() {
            let constraint = &self.constraints[unit.index()];
            let presence_units: Vec<UnitId> = constraint
                .presence
                .iter()
                .chain(constraint.final_presence.iter())
                .flat_map(|group| group.iter().copied())
                .collect();
            for &required in &presence_units {
                if constraint.excl.contains(&required) {
                    diags.error_or_warning(
                        permissive,
                        format!(
                            "unit `{}` excludes and requires presence of `{}`",
                            self.units[unit].name, self.units[required].name
                        ),
                    );
                }
                let absent = constraint
                    .absence
                    .iter()
                    .chain(constraint.final_absence.iter())
                    .any(|group| group.contains(&required));
                if absent {
                    diags.error_or_warning(
                        permissive,
                        format!(
                            "unit `{}` requires absence and presence of `{}`",
                            self.units[unit].name, self.units[required].name
                        ),
                    );
                }
            }
        }
    }

    /// Resolve one side of a constraint declaration to units.
    fn constraint_units(
        &mut self,
        names: &[String],
        what: &str,
        diags: &mut Diagnostics,
    ) -> Vec<UnitId> {
        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            match self.unit_or_reserv.get(name).copied() {
                Some(UnitOrReserv::Unit(unit)) => {
                    self.units[unit].in_constraint = true;
                    self.units[unit].used = true;
                    resolved.push(unit);
                }
                Some(UnitOrReserv::Reserv(_)) => {
                    diags.error(format!("`{name}` in {what} is not a unit"));
                }
                None => {
                    diags.error(format!("undeclared unit `{name}` in {what}"));
                }
            }
        }
        resolved
    }

    fn constraint_patterns(
        &mut self,
        patterns: &[Vec<String>],
        what: &str,
        diags: &mut Diagnostics,
    ) -> Vec<PatternGroup> {
        patterns
            .iter()
            .map(|group| {
                let mut resolved = PatternGroup::new();
                for name in group {
                    match self.unit_or_reserv.get(name).copied() {
                        Some(UnitOrReserv::Unit(unit)) => {
                            self.units[unit].in_constraint = true;
                            self.units[unit].used = true;
                            resolved.push(unit);
                        }
                        Some(UnitOrReserv::Reserv(_)) => {
                            diags.error(format!("`{name}` in {what} pattern is not a unit"));
                        }
                        None => {
                            diags.error(format!("undeclared unit `{name}` in {what} pattern"));
                        }
                    }
                }
                resolved
            })
            .collect()
    }

    /// Pass 5: declared but never referenced declarations.
    fn audit_usage(&mut self, diags: &mut Diagnostics) {
        for unit in self.units.values() {
            if !unit.used {
                diags.warning(format!("unit `{}` is not used", unit.name));
            }
        }
        for reserv in &self.reservs {
            if !reserv.used {
                diags.warning(format!("reservation `{}` is not used", reserv.name));
            }
        }
        for (automaton, decl) in self.automata.iter() {
            let assigned = self
                .units
                .values()
                .any(|unit| unit.declared_automaton == Some(automaton));
            if !assigned {
                diags.warning(format!("automaton `{}` is not used", decl.name));
            }
        }
    }

    /// Pass 6: per-unit min/max occurrence cycles and the global maximum
    /// reservation length.
    fn compute_extents(&mut self) -> ReservDim {
        for insn in self.insns.values() {
            let Some(canonical) = &insn.regexp else {
                continue;
            };
            for alternative in transform::alternatives(canonical) {
                let elements = transform::cycles(alternative);
                self.max_cycles = self.max_cycles.max(elements.len());
                for (cycle, element) in elements.iter().enumerate() {
                    let mut reserved: SmallVec<[UnitId; 8]> = SmallVec::new();
                    transform::cycle_units(element, |unit| reserved.push(unit));
                    for unit in reserved {
                        let occ = &mut self.units[unit].occ;
                        *occ = match *occ {
                            None => Some((cycle, cycle)),
                            Some((min, max)) => Some((min.min(cycle), max.max(cycle))),
                        };
                    }
                }
            }
        }
        ReservDim {
            units: self.units.len(),
            cycles: self.max_cycles,
        }
    }

    /// Pass 7: link bypasses by instruction name.
    fn resolve_bypasses(&mut self, diags: &mut Diagnostics) {
        let description = self.description;
        for decl in &description.decls {
            let Decl::Bypass {
                latency,
                out_insn,
                in_insn,
                guard,
            } = decl
            else {
                continue;
            };
            if *latency < 0 {
                diags.error(format!(
                    "negative latency of bypass `{out_insn}` -> `{in_insn}`"
                ));
                continue;
            }
            let out = match self.insn_by_name.get(out_insn) {
                Some(&out) => out,
                None => {
                    diags.error(format!("bypass references unknown insn `{out_insn}`"));
                    continue;
                }
            };
            let to = match self.insn_by_name.get(in_insn) {
                Some(&to) => to,
                None => {
                    diags.error(format!("bypass references unknown insn `{in_insn}`"));
                    continue;
                }
            };
            if let Some(existing) = self.insns[out].bypasses.iter().find(|b| b.to == to) {
                if existing.latency == *latency {
                    diags.warning(format!(
                        "the same bypass `{out_insn}` -> `{in_insn}` is already defined"
                    ));
                } else {
                    diags.error(format!(
                        "bypass `{out_insn}` -> `{in_insn}` is already defined with another latency"
                    ));
                }
                continue;
            }
            self.insns[out].bypasses.push(Bypass {
                to,
                latency: *latency,
                guard: guard.clone(),
            });
        }
    }

    /// Pass 8: append the advance-cycle insn, assign query codes, seal.
    fn finish(mut self, dim: ReservDim, options: Options) -> Machine {
        let advance_cycle = self.insns.push(Insn {
            name: ADVANCE_CYCLE_NAME.to_string(),
            default_latency: 0,
            cond: String::new(),
            source: String::new(),
            regexp: None,
            bypasses: Vec::new(),
        });

        let mut query_units: Vec<UnitId> = self
            .units
            .iter()
            .filter(|(_, unit)| unit.queryable)
            .map(|(id, _)| id)
            .collect();
        query_units.sort_by(|&a, &b| self.units[a].name.cmp(&self.units[b].name));
        for (code, &unit) in query_units.iter().enumerate() {
            self.units[unit].query_code = Some(code as u32);
        }

        Machine {
            units: self.units,
            insns: self.insns,
            automata: self.automata,
            advance_cycle,
            constraints: ConstraintTables {
                dim,
                units: self.constraints,
            },
            query_units,
            options,
        }
    }
}

fn add_exclusion(constraints: &mut [UnitConstraint], from: UnitId, to: UnitId) {
    let excl = &mut constraints[from.index()].excl;
    if !excl.contains(&to) {
        excl.push(to);
    }
}

#[cfg(test)]
mod tests {
    use super::{check, check_description, ADVANCE_CYCLE_NAME};
    use crate::pdsl::description::CpuDescription;

    #[test]
    fn minimal_description_checks() {
        let mut d = CpuDescription::new();
        d.unit("u", None).insn_reservation("a", 1, "", "u");
        let machine = check(&d).expect("clean description");
        assert_eq!(machine.units.len(), 1);
        // The advance-cycle insn is appended last.
        assert_eq!(machine.insns.len(), 2);
        assert_eq!(machine.insn_name(machine.advance_cycle), ADVANCE_CYCLE_NAME);
        assert_eq!(machine.dim().cycles, 1);
    }

    #[test]
    fn duplicate_declarations_are_errors() {
        let mut d = CpuDescription::new();
        d.unit("u", None)
            .unit("u", None)
            .insn_reservation("a", 1, "", "u");
        let (_, diags) = check_description(&d);
        assert!(diags.has_errors());
        assert!(diags.errors()[0].contains("repeated declaration of unit"));
    }

    #[test]
    fn undeclared_names_are_reported() {
        let mut d = CpuDescription::new();
        d.unit("u", None).insn_reservation("a", 1, "", "u, v");
        let (_, diags) = check_description(&d);
        assert!(diags.has_errors());
        assert!(diags.errors()[0].contains("undeclared unit or reservation `v`"));
    }

    #[test]
    fn recursive_reservations_are_rejected() {
        let mut d = CpuDescription::new();
        d.unit("u", None)
            .reservation("r1", "u, r2")
            .reservation("r2", "r1")
            .insn_reservation("a", 1, "", "r1");
        let (_, diags) = check_description(&d);
        assert!(diags.has_errors());
        assert!(diags
            .errors()
            .iter()
            .any(|e| e.contains("cycle in definition of reservation")));
    }

    #[test]
    fn reservation_references_inline() {
        let mut d = CpuDescription::new();
        d.unit("u1", None)
            .unit("u2", None)
            .reservation("both", "u1 + u2")
            .insn_reservation("a", 1, "", "both, u1");
        let machine = check(&d).expect("clean description");
        assert_eq!(machine.dim().cycles, 2);
        let u1 = machine.units.keys().next().unwrap();
        assert_eq!(machine.units[u1].occ, Some((0, 1)));
    }

    #[test]
    fn self_exclusion_is_an_error() {
        let mut d = CpuDescription::new();
        d.unit("u", None)
            .unit("v", None)
            .exclusion(&["u"], &["u", "v"])
            .insn_reservation("a", 1, "", "u");
        let (_, diags) = check_description(&d);
        assert!(diags
            .errors()
            .iter()
            .any(|e| e.contains("excludes itself")));
    }

    #[test]
    fn unit_without_automaton_when_one_defined() {
        let mut d = CpuDescription::new();
        d.automaton("pipe")
            .unit("u", Some("pipe"))
            .unit("v", None)
            .insn_reservation("a", 1, "", "u + v");
        let (_, diags) = check_description(&d);
        assert!(diags
            .errors()
            .iter()
            .any(|e| e.contains("without automaton")));
    }

    #[test]
    fn duplicate_bypasses() {
        let mut d = CpuDescription::new();
        d.unit("u", None)
            .insn_reservation("a", 3, "", "u")
            .insn_reservation("b", 1, "", "u")
            .bypass(1, "a", "b")
            .bypass(1, "a", "b");
        let (machine, diags) = check_description(&d);
        assert!(!diags.has_errors());
        assert_eq!(diags.warnings().len(), 1);
        let a = machine.insns.keys().next().unwrap();
        assert_eq!(machine.insns[a].bypasses.len(), 1);

        let mut d = CpuDescription::new();
        d.unit("u", None)
            .insn_reservation("a", 3, "", "u")
            .insn_reservation("b", 1, "", "u")
            .bypass(1, "a", "b")
            .bypass(2, "a", "b");
        let (_, diags) = check_description(&d);
        assert!(diags.has_errors());
    }

    #[test]
    fn unused_declarations_warn() {
        let mut d = CpuDescription::new();
        d.unit("u", None)
            .unit("idle", None)
            .insn_reservation("a", 1, "", "u");
        let (_, diags) = check_description(&d);
        assert!(!diags.has_errors());
        assert!(diags.warnings().iter().any(|w| w.contains("`idle`")));
    }

    #[test]
    fn query_codes_follow_sorted_names() {
        let mut d = CpuDescription::new();
        d.query_unit("zeta", None)
            .query_unit("alpha", None)
            .insn_reservation("a", 1, "", "zeta + alpha");
        let machine = check(&d).expect("clean description");
        assert_eq!(machine.query_units.len(), 2);
        let first = machine.query_units[0];
        assert_eq!(machine.unit_name(first), "alpha");
        assert_eq!(machine.units[first].query_code, Some(0));
    }
}
