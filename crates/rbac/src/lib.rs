//! # Keygrid RBAC
//!
//! Pure permission-query evaluation for the keygrid authorization engine.
//!
//! This crate provides:
//! - **Query trees**: [`PermissionQuery`] with `And`/`Or`/`Leaf` variants
//! - **Parsing**: the compact infix textual form (`a and (b or c)`)
//! - **Evaluation**: matching against a key's granted set, with wildcard
//!   grants (`*` one segment, `**` one or more)
//!
//! Everything here is pure and total: no I/O, no panics, recursion bounded
//! by the input. The permission service in `keygrid-authz` supplies the
//! granted sets and caching.
//!
//! ## Example
//!
//! ```
//! use keygrid_rbac::{evaluate, parse};
//!
//! let query = parse("docs.read.invoice and billing.read").unwrap();
//! let granted = ["docs.read.*", "billing.read"];
//!
//! let result = evaluate(&query, &granted);
//! assert!(result.valid);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Pure evaluation and wildcard matching.
pub mod eval;
/// Textual grammar parsing.
pub mod parse;
/// Query trees and evaluation results.
pub mod query;

// Re-export key types for convenience
pub use eval::{evaluate, grant_matches};
pub use parse::{ParseError, parse};
pub use query::{Evaluation, PermissionQuery};
