//! Time rules attached to tier constraints.
//!
//! Pure functions over millisecond intervals; the document supplies the
//! parent bounds and chain positions.

use tierline_types::{Constraint, Millis};

/// Clamp a requested interval into the parent's bounds.
///
/// Returns `None` when the request lies entirely outside the parent (the
/// caller ignores such an edit) or is empty after clamping.
pub fn clamp_to_parent(begin: Millis, end: Millis, parent: (Millis, Millis)) -> Option<(Millis, Millis)> {
    let (pb, pe) = parent;
    if end <= pb || begin >= pe {
        return None;
    }
    let clamped = (begin.max(pb), end.min(pe));
    (clamped.0 < clamped.1).then_some(clamped)
}

/// Extent of the reference child at `index` of `count` chained siblings.
///
/// Symbolic association mirrors the parent. Symbolic subdivision gives each
/// child an equal share of the parent's duration; the last child always ends
/// exactly at the parent's end so rounding never leaves a gap.
pub fn derived_interval(constraint: Constraint, parent: (Millis, Millis), index: usize, count: usize) -> (Millis, Millis) {
    let (pb, pe) = parent;
    match constraint {
        Constraint::SymbolicSubdivision if count > 1 => {
            let count = count as i64;
            let index = (index as i64).min(count - 1);
            let duration = pe - pb;
            let begin = pb + duration * index / count;
            let end = if index == count - 1 {
                pe
            } else {
                pb + duration * (index + 1) / count
            };
            (begin, end)
        }
        _ => (pb, pe),
    }
}

/// Extent from the bounds of all parents, for references on a tier without a
/// usable rule. `None` without parents.
pub fn union_of(parents: impl IntoIterator<Item = (Millis, Millis)>) -> Option<(Millis, Millis)> {
    parents.into_iter().fold(None, |acc, (b, e)| match acc {
        None => Some((b, e)),
        Some((lo, hi)) => Some((lo.min(b), hi.max(e))),
    })
}
