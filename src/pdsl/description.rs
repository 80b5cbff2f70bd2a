//! Typed declaration records for a processor pipeline description.
//!
//! The parser of the textual description format is an external collaborator;
//! it hands the generator a `CpuDescription`, which is no more than the
//! sequence of declarations in source order plus the accumulated options.
//! The builder methods below are that collaborator's API.

use smallvec::SmallVec;

/// One declaration record, in source order.
#[derive(Clone, Debug)]
pub enum Decl {
    /// `define_automaton`: a named automaton to which units can be assigned.
    Automaton { name: String },
    /// `define_cpu_unit` / `define_query_cpu_unit`.
    Unit {
        name: String,
        automaton: Option<String>,
        queryable: bool,
    },
    /// `define_reservation`: a named, reusable reservation expression.
    Reservation { name: String, regexp: String },
    /// `define_insn_reservation`.
    InsnReservation {
        name: String,
        default_latency: i32,
        cond: String,
        regexp: String,
    },
    /// `define_bypass`.
    Bypass {
        latency: i32,
        out_insn: String,
        in_insn: String,
        guard: Option<String>,
    },
    /// `exclusion_set`: units of `names_a` and `names_b` may never be
    /// reserved on the same cycle.
    Exclusion {
        names_a: Vec<String>,
        names_b: Vec<String>,
    },
    /// `presence_set` / `final_presence_set`: each unit in `names` may only
    /// be reserved if one of `patterns` (a group of units that must all be
    /// present) is satisfied on the same cycle.
    Presence {
        names: Vec<String>,
        patterns: Vec<Vec<String>>,
        final_p: bool,
    },
    /// `absence_set` / `final_absence_set`: each unit in `names` may only be
    /// reserved if no pattern group is fully present on the same cycle.
    Absence {
        names: Vec<String>,
        patterns: Vec<Vec<String>>,
        final_p: bool,
    },
    /// `automata_option`: a flag by name, checked during semantic analysis.
    Option { name: String, value: Option<u32> },
}

/// Generator options, resolved from `Decl::Option` records.
#[derive(Clone, Copy, Debug, Default)]
pub struct Options {
    /// Preserve nondeterminism by emitting alternative arcs.
    pub ndfa: bool,
    /// Skip the DFA minimization phase.
    pub no_minimization: bool,
    /// Downgrade selected errors to warnings.
    pub permissive: bool,
    /// Additionally emit a human-readable `.dfa` description file.
    pub verbose: bool,
    /// Report phase timings.
    pub time: bool,
    /// Request this many independent automata through the heuristic
    /// distribution; 0 means one automaton per declared automaton.
    pub split: u32,
}

/// A whole pipeline description: declarations in source order.
#[derive(Clone, Debug, Default)]
pub struct CpuDescription {
    pub decls: Vec<Decl>,
}

impl CpuDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an automaton.
    pub fn automaton(&mut self, name: &str) -> &mut Self {
        self.decls.push(Decl::Automaton { name: name.into() });
        self
    }

    /// Declare a functional unit, optionally owned by a named automaton.
    pub fn unit(&mut self, name: &str, automaton: Option<&str>) -> &mut Self {
        self.decls.push(Decl::Unit {
            name: name.into(),
            automaton: automaton.map(String::from),
            queryable: false,
        });
        self
    }

    /// Declare a unit whose cycle-0 reservation is queryable at schedule time.
    pub fn query_unit(&mut self, name: &str, automaton: Option<&str>) -> &mut Self {
        self.decls.push(Decl::Unit {
            name: name.into(),
            automaton: automaton.map(String::from),
            queryable: true,
        });
        self
    }

    /// Declare a named reservation expression.
    pub fn reservation(&mut self, name: &str, regexp: &str) -> &mut Self {
        self.decls.push(Decl::Reservation {
            name: name.into(),
            regexp: regexp.into(),
        });
        self
    }

    /// Declare an instruction reservation.
    pub fn insn_reservation(
        &mut self,
        name: &str,
        default_latency: i32,
        cond: &str,
        regexp: &str,
    ) -> &mut Self {
        self.decls.push(Decl::InsnReservation {
            name: name.into(),
            default_latency,
            cond: cond.into(),
            regexp: regexp.into(),
        });
        self
    }

    /// Declare a bypass between two instruction reservations.
    pub fn bypass(&mut self, latency: i32, out_insn: &str, in_insn: &str) -> &mut Self {
        self.decls.push(Decl::Bypass {
            latency,
            out_insn: out_insn.into(),
            in_insn: in_insn.into(),
            guard: None,
        });
        self
    }

    /// Declare a bypass guarded by an opaque predicate name.
    pub fn guarded_bypass(
        &mut self,
        latency: i32,
        out_insn: &str,
        in_insn: &str,
        guard: &str,
    ) -> &mut Self {
        self.decls.push(Decl::Bypass {
            latency,
            out_insn: out_insn.into(),
            in_insn: in_insn.into(),
            guard: Some(guard.into()),
        });
        self
    }

    /// Declare an exclusion set between two groups of units.
    pub fn exclusion(&mut self, names_a: &[&str], names_b: &[&str]) -> &mut Self {
        self.decls.push(Decl::Exclusion {
            names_a: names_a.iter().map(|s| s.to_string()).collect(),
            names_b: names_b.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    /// Declare a presence set. Each pattern is a group of units that must all
    /// be reserved on the same cycle for the pattern to be satisfied.
    pub fn presence(&mut self, names: &[&str], patterns: &[&[&str]], final_p: bool) -> &mut Self {
        self.decls.push(Decl::Presence {
            names: names.iter().map(|s| s.to_string()).collect(),
            patterns: collect_patterns(patterns),
            final_p,
        });
        self
    }

    /// Declare an absence set.
    pub fn absence(&mut self, names: &[&str], patterns: &[&[&str]], final_p: bool) -> &mut Self {
        self.decls.push(Decl::Absence {
            names: names.iter().map(|s| s.to_string()).collect(),
            patterns: collect_patterns(patterns),
            final_p,
        });
        self
    }

    /// Record a named option ("ndfa", "no-minimization", "w", "v", "time").
    pub fn option(&mut self, name: &str) -> &mut Self {
        self.decls.push(Decl::Option {
            name: name.into(),
            value: None,
        });
        self
    }

    /// Request `n` independent automata through the heuristic distribution.
    pub fn split(&mut self, n: u32) -> &mut Self {
        self.decls.push(Decl::Option {
            name: "split".into(),
            value: Some(n),
        });
        self
    }
}

fn collect_patterns(patterns: &[&[&str]]) -> Vec<Vec<String>> {
    patterns
        .iter()
        .map(|group| group.iter().map(|s| s.to_string()).collect())
        .collect()
}

/// A single AND-group of units inside a presence or absence pattern.
pub type PatternGroup = SmallVec<[crate::pdsl::UnitId; 4]>;
