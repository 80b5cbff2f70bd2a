//! Canonicalization of reservation expressions.
//!
//! The automaton builder wants every instruction reservation as a top-level
//! alternation whose alternatives are plain sequences of cycles, each cycle
//! reserving a fixed set of units. Three transformations, applied bottom-up
//! to a fixed point, bring any regexp into that form:
//!
//! 1. unroll: `R*n` becomes `R, R, ..., R` (n copies);
//! 2. flatten: nested sequences, alternations and parallel compositions of
//!    the same kind are merged, singletons collapse;
//! 3. distribute: alternation is lifted to the top and parallel composition
//!    of sequences becomes a sequence of per-cycle parallel compositions,
//!    padded with `nothing`.

use crate::pdsl::regexp::Regexp;
use crate::pdsl::UnitId;

/// Bring `regexp` into canonical alternation-of-alternatives form: the root
/// is `OneOf`, every alternative is a `Sequence`, and every sequence element
/// is a unit, `nothing`, or an `AllOf` of units.
pub fn canonicalize(regexp: Regexp) -> Regexp {
    let mut current = unroll(regexp);
    loop {
        let (flattened, flatten_changed) = flatten(current);
        let (distributed, distribute_changed) = distribute(flattened);
        current = distributed;
        if !flatten_changed && !distribute_changed {
            break;
        }
    }
    let canonical = normalize(current);
    assert_canonical(&canonical);
    canonical
}

/// Walk a canonical regexp's alternatives.
pub fn alternatives(regexp: &Regexp) -> &[Regexp] {
    match regexp {
        Regexp::OneOf(alternatives) => alternatives,
        _ => panic!("internal error: canonical regexp root is not an alternation"),
    }
}

/// Walk a canonical alternative's cycles.
pub fn cycles(alternative: &Regexp) -> &[Regexp] {
    match alternative {
        Regexp::Sequence(elements) => elements,
        _ => panic!("internal error: canonical alternative is not a sequence"),
    }
}

/// Invoke `each` for every unit reserved by one canonical cycle element.
pub fn cycle_units(element: &Regexp, mut each: impl FnMut(UnitId)) {
    match element {
        Regexp::Unit(unit) => each(*unit),
        Regexp::Nothing => {}
        Regexp::AllOf(children) => {
            for child in children {
                match child {
                    Regexp::Unit(unit) => each(*unit),
                    Regexp::Nothing => {}
                    _ => panic!("internal error: non-unit inside canonical parallel composition"),
                }
            }
        }
        _ => panic!("internal error: non-canonical cycle element {element}"),
    }
}

/// T1: replace every repetition by that many copies of its child.
fn unroll(regexp: Regexp) -> Regexp {
    match regexp {
        Regexp::Repeat(child, count) => {
            debug_assert!(count > 1, "repetition counts are validated at parse time");
            let child = unroll(*child);
            Regexp::Sequence((0..count).map(|_| child.clone()).collect())
        }
        Regexp::Sequence(elements) => Regexp::Sequence(map_unroll(elements)),
        Regexp::AllOf(children) => Regexp::AllOf(map_unroll(children)),
        Regexp::OneOf(children) => Regexp::OneOf(map_unroll(children)),
        leaf => leaf,
    }
}

fn map_unroll(children: Vec<Regexp>) -> Vec<Regexp> {
    children.into_iter().map(unroll).collect()
}

/// T2: merge nested nodes of the same kind and collapse singletons. Inside a
/// parallel composition, `nothing` reserves no unit and is dropped.
fn flatten(regexp: Regexp) -> (Regexp, bool) {
    match regexp {
        Regexp::Sequence(elements) => {
            let (mut flat, mut changed) = flatten_children(elements);
            let mut merged = Vec::with_capacity(flat.len());
            for element in flat.drain(..) {
                if let Regexp::Sequence(inner) = element {
                    merged.extend(inner);
                    changed = true;
                } else {
                    merged.push(element);
                }
            }
            collapse(Regexp::Sequence, merged, changed)
        }
        Regexp::AllOf(children) => {
            let (mut flat, mut changed) = flatten_children(children);
            let mut merged = Vec::with_capacity(flat.len());
            for child in flat.drain(..) {
                match child {
                    Regexp::AllOf(inner) => {
                        merged.extend(inner);
                        changed = true;
                    }
                    Regexp::Nothing => changed = true,
                    other => merged.push(other),
                }
            }
            if merged.is_empty() {
                return (Regexp::Nothing, true);
            }
            collapse(Regexp::AllOf, merged, changed)
        }
        Regexp::OneOf(children) => {
            let (mut flat, mut changed) = flatten_children(children);
            let mut merged = Vec::with_capacity(flat.len());
            for child in flat.drain(..) {
                if let Regexp::OneOf(inner) = child {
                    merged.extend(inner);
                    changed = true;
                } else {
                    merged.push(child);
                }
            }
            collapse(Regexp::OneOf, merged, changed)
        }
        leaf => (leaf, false),
    }
}

fn flatten_children(children: Vec<Regexp>) -> (Vec<Regexp>, bool) {
    let mut changed = false;
    let flat = children
        .into_iter()
        .map(|child| {
            let (child, child_changed) = flatten(child);
            changed |= child_changed;
            child
        })
        .collect();
    (flat, changed)
}

fn collapse(
    make: impl FnOnce(Vec<Regexp>) -> Regexp,
    mut children: Vec<Regexp>,
    changed: bool,
) -> (Regexp, bool) {
    if children.len() == 1 {
        (children.pop().unwrap(), true)
    } else {
        (make(children), changed)
    }
}

/// T3: lift alternation to the top and turn parallel composition of
/// sequences into a sequence of per-cycle parallel compositions.
fn distribute(regexp: Regexp) -> (Regexp, bool) {
    match regexp {
        Regexp::Sequence(elements) => {
            let (elements, changed) = distribute_children(elements);
            if let Some(i) = position_of_oneof(&elements) {
                return (lift_oneof(Regexp::Sequence, elements, i), true);
            }
            (Regexp::Sequence(elements), changed)
        }
        Regexp::AllOf(children) => {
            let (children, changed) = distribute_children(children);
            if let Some(i) = position_of_oneof(&children) {
                return (lift_oneof(Regexp::AllOf, children, i), true);
            }
            if children.iter().any(|c| matches!(c, Regexp::Sequence(_))) {
                return (compose_parallel(children), true);
            }
            (Regexp::AllOf(children), changed)
        }
        Regexp::OneOf(children) => {
            let (children, changed) = distribute_children(children);
            (Regexp::OneOf(children), changed)
        }
        leaf => (leaf, false),
    }
}

fn distribute_children(children: Vec<Regexp>) -> (Vec<Regexp>, bool) {
    let mut changed = false;
    let distributed = children
        .into_iter()
        .map(|child| {
            let (child, child_changed) = distribute(child);
            changed |= child_changed;
            child
        })
        .collect();
    (distributed, changed)
}

fn position_of_oneof(children: &[Regexp]) -> Option<usize> {
    children
        .iter()
        .position(|c| matches!(c, Regexp::OneOf(_)))
}

/// Replace the `OneOf` child at `i` by each of its alternatives in turn,
/// producing one copy of the surrounding node per alternative.
fn lift_oneof(make: impl Fn(Vec<Regexp>) -> Regexp, children: Vec<Regexp>, i: usize) -> Regexp {
    let alternatives = match &children[i] {
        Regexp::OneOf(alternatives) => alternatives.clone(),
        _ => unreachable!(),
    };
    Regexp::OneOf(
        alternatives
            .into_iter()
            .map(|alternative| {
                let mut copy = children.clone();
                copy[i] = alternative;
                make(copy)
            })
            .collect(),
    )
}

/// The parallel-composition rule: `(a, b) + (c, d, e) + u` becomes
/// `(a + c + u), (b + d), e` with `nothing` padding shorter operands.
fn compose_parallel(children: Vec<Regexp>) -> Regexp {
    let width = children
        .iter()
        .map(|child| match child {
            Regexp::Sequence(elements) => elements.len(),
            _ => 1,
        })
        .max()
        .unwrap_or(0);
    let mut rows: Vec<Vec<Regexp>> = (0..width).map(|_| Vec::new()).collect();
    for child in children {
        match child {
            Regexp::Sequence(elements) => {
                for (cycle, element) in elements.into_iter().enumerate() {
                    rows[cycle].push(element);
                }
            }
            other => rows[0].push(other),
        }
    }
    Regexp::Sequence(
        rows.into_iter()
            .map(|row| {
                if row.is_empty() {
                    Regexp::Nothing
                } else {
                    Regexp::AllOf(row)
                }
            })
            .collect(),
    )
}

/// Wrap the transformed regexp so that the root is `OneOf` and every
/// alternative is a `Sequence`, even for single-unit reservations.
fn normalize(regexp: Regexp) -> Regexp {
    let alternatives = match regexp {
        Regexp::OneOf(alternatives) => alternatives,
        other => vec![other],
    };
    Regexp::OneOf(
        alternatives
            .into_iter()
            .map(|alternative| match alternative {
                seq @ Regexp::Sequence(_) => seq,
                other => Regexp::Sequence(vec![other]),
            })
            .collect(),
    )
}

/// Abort on a regexp that is not in canonical form. Leaves may be resolved
/// units or still-unresolved names so that the transformation can be
/// exercised on either.
fn assert_canonical(regexp: &Regexp) {
    for alternative in alternatives(regexp) {
        for element in cycles(alternative) {
            match element {
                Regexp::Unit(_) | Regexp::Name(_) | Regexp::Nothing => {}
                Regexp::AllOf(children) => {
                    for child in children {
                        match child {
                            Regexp::Unit(_) | Regexp::Name(_) | Regexp::Nothing => {}
                            _ => panic!(
                                "internal error: regexp not canonical after transformation: {child}"
                            ),
                        }
                    }
                }
                _ => panic!("internal error: regexp not canonical after transformation: {element}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::canonicalize;
    use crate::pdsl::regexp::{parse, Regexp};

    fn canon(src: &str) -> Regexp {
        canonicalize(parse(src).unwrap())
    }

    #[test]
    fn single_unit_becomes_one_alternative() {
        assert_eq!(canon("u"), canon("(u)"));
        assert_eq!(
            canon("u").to_string(),
            canonicalize(parse("u").unwrap()).to_string()
        );
    }

    #[test]
    fn repeats_unroll() {
        assert_eq!(canon("u*3"), canon("u, u, u"));
        assert_eq!(canon("(a, b)*2"), canon("a, b, a, b"));
    }

    #[test]
    fn alternation_lifts_out_of_sequences() {
        assert_eq!(canon("(a | b), c"), canon("(a, c) | (b, c)"));
        assert_eq!(canon("a + (b | c)"), canon("(a + b) | (a + c)"));
    }

    #[test]
    fn parallel_composition_aligns_cycles() {
        // (a, b) + (c, d, e) reserves a+c, then b+d, then e alone.
        assert_eq!(canon("(a, b) + (c, d, e)"), canon("(a + c), (b + d), e"));
        // A lone unit composed with a sequence lands on the first cycle.
        assert_eq!(canon("u + (a, b)"), canon("(u + a), b"));
    }

    #[test]
    fn transformation_is_idempotent() {
        for src in [
            "u",
            "u*2",
            "a | b | c",
            "(a | b), (c | d)",
            "(a, b) + (c | d)",
            "nothing, a + b",
        ] {
            let once = canon(src);
            let twice = canonicalize(once.clone());
            assert_eq!(once, twice, "canonicalizing {src} twice diverged");
        }
    }

    #[test]
    fn nothing_occupies_a_cycle() {
        assert_eq!(canon("nothing, u"), canon("(nothing, u)"));
        let r = canon("nothing, u");
        let alts = super::alternatives(&r);
        assert_eq!(alts.len(), 1);
        assert_eq!(super::cycles(&alts[0]).len(), 2);
    }
}
