//! Pure evaluation of permission queries against a granted set.
//!
//! Evaluation is total: it performs no I/O, never panics, and its recursion
//! is bounded by the structure of the input query. Grants may carry
//! wildcards; query leaves are matched literally against them.
//!
//! # Wildcard Semantics
//!
//! | Grant | Matches | Does not match |
//! |-------|---------|----------------|
//! | `a.b` | `a.b` | `a`, `a.b.c` |
//! | `a.*` | `a.b` | `a`, `a.b.c` |
//! | `a.**` | `a.b`, `a.b.c` | `a` |
//!
//! `*` consumes exactly one dotted segment; `**` consumes one or more.

use crate::query::{Evaluation, PermissionQuery};

/// Evaluates `query` against the granted set.
///
/// Returns whether the query is satisfied plus the identifiers that failed
/// to match (deduplicated, first-seen order).
///
/// # Examples
///
/// ```
/// use keygrid_rbac::{PermissionQuery, evaluate};
///
/// let query = PermissionQuery::leaf("docs.read.invoice");
/// let result = evaluate(&query, &["docs.read.*"]);
/// assert!(result.valid);
/// ```
pub fn evaluate<G: AsRef<str>>(query: &PermissionQuery, granted: &[G]) -> Evaluation {
    match query {
        PermissionQuery::Leaf(wanted) => {
            if granted.iter().any(|grant| grant_matches(grant.as_ref(), wanted)) {
                Evaluation::satisfied()
            } else {
                Evaluation { valid: false, missing: vec![wanted.clone()] }
            }
        },
        PermissionQuery::And(children) => {
            let mut valid = true;
            let mut missing = Vec::new();
            for child in children {
                let result = evaluate(child, granted);
                valid &= result.valid;
                merge_missing(&mut missing, result.missing);
            }
            // An empty And is vacuously true.
            Evaluation { valid, missing }
        },
        PermissionQuery::Or(children) => {
            let mut missing = Vec::new();
            for child in children {
                let result = evaluate(child, granted);
                if result.valid {
                    return Evaluation::satisfied();
                }
                merge_missing(&mut missing, result.missing);
            }
            // An empty Or is false with nothing to report.
            Evaluation { valid: false, missing }
        },
    }
}

/// Appends `incoming` identifiers not already present.
fn merge_missing(missing: &mut Vec<String>, incoming: Vec<String>) {
    for identifier in incoming {
        if !missing.contains(&identifier) {
            missing.push(identifier);
        }
    }
}

/// Returns `true` when `grant` covers the literal identifier `wanted`.
///
/// Exact matches always succeed. On the grant side, `*` matches exactly one
/// dotted segment and `**` matches one or more.
#[must_use]
pub fn grant_matches(grant: &str, wanted: &str) -> bool {
    if grant == wanted {
        return true;
    }
    let grant_segments: Vec<&str> = grant.split('.').collect();
    let wanted_segments: Vec<&str> = wanted.split('.').collect();
    match_segments(&grant_segments, &wanted_segments)
}

fn match_segments(grant: &[&str], wanted: &[&str]) -> bool {
    match grant.split_first() {
        None => wanted.is_empty(),
        Some((&"**", rest)) => {
            // One or more segments; try every non-empty prefix length.
            (1..=wanted.len()).any(|consumed| match_segments(rest, &wanted[consumed..]))
        },
        Some((segment, rest)) => match wanted.split_first() {
            Some((head, tail)) if *segment == "*" || segment == head => {
                match_segments(rest, tail)
            },
            _ => false,
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn exact_grant_matches() {
        assert!(grant_matches("docs.read", "docs.read"));
        assert!(!grant_matches("docs.read", "docs.write"));
        assert!(!grant_matches("docs.read", "docs"));
    }

    #[test]
    fn single_star_matches_one_segment() {
        assert!(grant_matches("a.*", "a.b"));
        assert!(!grant_matches("a.*", "a.b.c"));
        assert!(!grant_matches("a.*", "a"));
    }

    #[test]
    fn double_star_matches_one_or_more_segments() {
        assert!(grant_matches("a.**", "a.b"));
        assert!(grant_matches("a.**", "a.b.c"));
        assert!(!grant_matches("a.**", "a"));
    }

    #[test]
    fn wildcards_compose() {
        assert!(grant_matches("a.*.c", "a.b.c"));
        assert!(!grant_matches("a.*.c", "a.b.d"));
        assert!(grant_matches("a.**.d", "a.b.c.d"));
        assert!(!grant_matches("a.**.d", "a.d"));
        assert!(grant_matches("**", "anything.at.all"));
    }

    #[test]
    fn leaf_reports_missing_identifier() {
        let query = PermissionQuery::leaf("docs.write");
        let result = evaluate(&query, &["docs.read"]);
        assert!(!result.valid);
        assert_eq!(result.missing, vec!["docs.write"]);
    }

    #[test]
    fn and_requires_all_children() {
        let query = PermissionQuery::And(vec![
            PermissionQuery::leaf("docs.read.invoice"),
            PermissionQuery::leaf("billing.read"),
        ]);
        let granted = ["docs.read.*", "billing.read"];
        assert!(evaluate(&query, &granted).valid);

        let partial = ["docs.read.*"];
        let result = evaluate(&query, &partial);
        assert!(!result.valid);
        assert_eq!(result.missing, vec!["billing.read"]);
    }

    #[test]
    fn or_succeeds_on_any_child() {
        let query = PermissionQuery::Or(vec![
            PermissionQuery::leaf("docs.admin"),
            PermissionQuery::leaf("docs.read"),
        ]);
        let result = evaluate(&query, &["docs.read"]);
        assert!(result.valid);
        assert!(result.missing.is_empty());
    }

    #[test]
    fn or_collects_all_missing_when_none_match() {
        let query = PermissionQuery::Or(vec![
            PermissionQuery::leaf("docs.admin"),
            PermissionQuery::leaf("docs.write"),
        ]);
        let result = evaluate::<&str>(&query, &[]);
        assert!(!result.valid);
        assert_eq!(result.missing, vec!["docs.admin", "docs.write"]);
    }

    #[test]
    fn empty_and_is_vacuously_true() {
        let result = evaluate::<&str>(&PermissionQuery::And(Vec::new()), &[]);
        assert!(result.valid);
        assert!(result.missing.is_empty());
    }

    #[test]
    fn empty_or_is_false_with_empty_missing() {
        let result = evaluate::<&str>(&PermissionQuery::Or(Vec::new()), &[]);
        assert!(!result.valid);
        assert!(result.missing.is_empty());
    }

    #[test]
    fn missing_identifiers_are_deduplicated() {
        let query = PermissionQuery::And(vec![
            PermissionQuery::leaf("docs.write"),
            PermissionQuery::Or(vec![PermissionQuery::leaf("docs.write")]),
        ]);
        let result = evaluate::<&str>(&query, &[]);
        assert_eq!(result.missing, vec!["docs.write"]);
    }

    #[test]
    fn query_side_wildcards_are_literal() {
        // Queries are expected to be literal; a stray query wildcard only
        // matches a grant carrying the identical literal segment.
        let query = PermissionQuery::leaf("docs.*");
        assert!(!evaluate(&query, &["docs.read"]).valid);
        assert!(evaluate(&query, &["docs.*"]).valid);
    }
}
