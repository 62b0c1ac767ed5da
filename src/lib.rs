// Production-quality lints
#![warn(
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
// Deny truly dangerous patterns
#![deny(clippy::mem_forget)]
// Allow common patterns in library code
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! # ontoverify — ontology-driven text verification
//!
//! Verifies free-form text (e.g. LLM output) against declarative
//! logical constraints. An **ontology** declares a set of typed
//! variables, a set of extractors that populate them from raw text, and
//! a set of constraints — formula trees over those variables — that the
//! text must satisfy. Verification discharges each constraint through
//! an SMT solver rather than evaluating it as a boolean expression, so
//! a constraint is proven for *all* values consistent with what was
//! extracted, not just the ones literally observed.
//!
//! ## Core Concept
//!
//! ontoverify treats the **ontology** as the source of truth. An
//! ontology defines:
//!
//! - **Variables** — typed facts a piece of text may or may not state
//! - **Extractors** — how to recover each variable's value from text
//! - **Constraints** — logical formulas those variables must satisfy
//!
//! From an ontology and a text, this crate can:
//!
//! - **Extract** a typed environment from the text
//! - **Compile** each constraint's formula tree into an SMT AST
//! - **Verify** the text against every constraint, producing a report
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ontoverify::{registry::Registry, verify};
//!
//! let (registry, _issues) = Registry::load("ontologies")?;
//! let ontology = registry.get("refund-policy").expect("known ontology");
//!
//! let report = verify::verify(&ontology, "You may request a refund within 14 days.");
//! if report.verified {
//!     println!("verified, {} warnings", report.warnings.len());
//! } else {
//!     for violation in &report.violations {
//!         println!("violated: {}", violation.constraint_id);
//!     }
//! }
//! ```
//!
//! ## Ontology Format
//!
//! Ontologies are JSON documents:
//!
//! ```json
//! {
//!   "name": "refund-policy",
//!   "variables": [{ "name": "refund_days", "sort": "int" }],
//!   "extractors": [
//!     { "kind": "int", "variable": "refund_days", "pattern": "(\\d+)[- ]day" }
//!   ],
//!   "constraints": [
//!     {
//!       "id": "within-30-days",
//!       "variables": [],
//!       "formula": { "<=": ["refund_days", 30] }
//!     }
//!   ]
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! raw text ──► extract::extract ──► typed environment
//!                                          │
//! ontology doc ─► registry::Registry ──────┤
//!                          │                ▼
//!                          └─► formula::compile ──► compiled formula
//!                                                          │
//!                                                          ▼
//!                                                   verify::verify ──► Report
//! ```
//!
//! ## Scope
//!
//! This crate is a pure function of `(text, ontology) -> report`. It has
//! no HTTP surface, no CORS layer, no health-check endpoint, and does
//! not install a `tracing` subscriber — an external binary owns all of
//! that, the same separation the teacher codebase draws between its
//! library and its CLI.

pub mod config;
pub mod error;
pub mod extract;
pub mod formula;
pub mod ontology;
pub mod registry;
pub mod value;
pub mod verify;

pub use config::CoreConfig;
pub use error::{Error, Result};
pub use extract::extract;
pub use formula::{compile, CompileError, CompiledFormula};
pub use ontology::{ComputedExpr, Constraint, ExtractorSpec, Formula, ListItemType, Ontology, VariableDecl};
pub use registry::{LoadIssue, OntologySummary, Registry};
pub use value::{CoercedValue, Environment, Sort, Value, Warning};
pub use verify::{
    verify, CancelToken, IndeterminateReason, OntologyMeta, ProofMeta, Report, Verifier, VerifierConfig, Violation,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A minimal, dependency-free status check the external binary can
/// expose over HTTP (spec.md §6 `health()`).
pub fn health() -> HealthStatus {
    HealthStatus {
        status: "ok",
        version: VERSION,
        solver_backend: verify::SOLVER_BACKEND,
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub solver_backend: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_reports_ok() {
        assert_eq!(health().status, "ok");
    }
}
