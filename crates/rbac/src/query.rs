//! Permission query trees and evaluation results.

/// A boolean expression over permission identifiers.
///
/// Leaves name a single permission; `And`/`Or` combine children. Wildcards
/// (`*`, `**`) appear on the *grant* side only — query leaves are literal
/// identifiers.
///
/// # Edge Cases
///
/// - the empty `And` is vacuously true
/// - the empty `Or` is false
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionQuery {
    /// True iff every child is true.
    And(Vec<PermissionQuery>),
    /// True iff at least one child is true.
    Or(Vec<PermissionQuery>),
    /// True iff some grant matches this identifier.
    Leaf(String),
}

impl PermissionQuery {
    /// Builds a leaf from an identifier.
    #[must_use]
    pub fn leaf(identifier: impl Into<String>) -> Self {
        Self::Leaf(identifier.into())
    }

    /// The always-true query (the empty `And`).
    #[must_use]
    pub fn always_true() -> Self {
        Self::And(Vec::new())
    }
}

impl std::fmt::Display for PermissionQuery {
    /// Renders the query in the textual grammar accepted by
    /// [`parse`](crate::parse::parse). Child groups are parenthesized, so
    /// the output always re-parses to an equivalent query.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn write_children(
            f: &mut std::fmt::Formatter<'_>,
            children: &[PermissionQuery],
            joiner: &str,
        ) -> std::fmt::Result {
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, " {joiner} ")?;
                }
                match child {
                    PermissionQuery::Leaf(_) => write!(f, "{child}")?,
                    _ => write!(f, "({child})")?,
                }
            }
            Ok(())
        }

        match self {
            Self::Leaf(identifier) => write!(f, "{identifier}"),
            Self::And(children) => write_children(f, children, "and"),
            Self::Or(children) => write_children(f, children, "or"),
        }
    }
}

/// Result of evaluating a [`PermissionQuery`] against a granted set.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Evaluation {
    /// Whether the query is satisfied.
    pub valid: bool,
    /// The identifiers that failed to match, deduplicated in first-seen
    /// order. Empty when `valid` is true, and also for the empty `Or`.
    pub missing: Vec<String>,
}

impl Evaluation {
    /// A satisfied evaluation.
    #[must_use]
    pub fn satisfied() -> Self {
        Self { valid: true, missing: Vec::new() }
    }
}
