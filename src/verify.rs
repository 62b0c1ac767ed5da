//! The SMT Verifier — checks extracted text against an ontology's
//! constraints and assembles a [`Report`] (spec.md §4.3).
//!
//! Grounded on the teacher's `Verifier`/`VerifierConfig`/`VerificationResult`
//! shape (a config-bearing driver producing a serializable result object)
//! and on the SMT-verification reference's per-condition algorithm:
//! assert the negation of the formula under pinned variable equalities,
//! check, and classify `Unsat`/`Sat`/`Unknown`.

use crate::formula::{self, CompileError};
use crate::ontology::{Constraint, Ontology};
use crate::value::{CoercedValue, Environment, Sort, Value};
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info_span, warn};
use uuid::Uuid;
use z3::ast::{Ast, Bool, Int, Real};
use z3::{Config, Context, SatResult, Solver};

/// Identifies the SMT backend in [`ProofMeta::version`]. z3's crate
/// does not expose a stable version-string accessor across releases, so
/// this names the backend rather than a runtime-queried build string.
pub const SOLVER_BACKEND: &str = "z3";

/// Why a constraint could not be given a definite verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndeterminateReason {
    Timeout,
    SolverUnknown,
    CompileError,
}

/// A constraint that the extracted environment violates, or could not
/// be evaluated against. Carries both the message an author wrote for
/// this constraint and the formula that produced the violation, in both
/// its human-readable and structural (JSON) forms, per spec.md §3's
/// "Violation" entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub constraint_id: String,
    /// The constraint's own `error_message`, falling back to its
    /// `description` when no dedicated message was authored.
    pub error_message: Option<String>,
    /// The constraint's human-readable formula rendering, when authored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readable: Option<String>,
    /// The constraint's formula tree, verbatim, for machine consumers.
    pub formula: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indeterminate: Option<IndeterminateReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// A counterexample binding, when the solver found one.
    #[serde(skip_serializing_if = "std::collections::HashMap::is_empty", default)]
    pub counterexample: std::collections::HashMap<String, String>,
}

/// Ontology identification carried on a [`Report`] (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OntologyMeta {
    pub name: String,
    pub version: Option<String>,
    pub constraints_checked: usize,
}

/// Identifies the SMT backend and method used to discharge constraints
/// (spec.md §6 `proof{method,version}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofMeta {
    pub method: &'static str,
    pub version: &'static str,
}

/// The verification report returned by [`verify`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub verification_id: String,
    pub ontology: OntologyMeta,
    pub verified: bool,
    pub violations: Vec<Violation>,
    pub parsed_data: std::collections::HashMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
    pub proof: ProofMeta,
    pub execution_time_ms: u64,
    pub timestamp: String,
}

/// Verifier configuration. Mirrors the teacher's `VerifierConfig` shape:
/// a small struct of behavioral toggles with sensible defaults.
#[derive(Debug, Clone, Copy)]
pub struct VerifierConfig {
    pub solver_timeout_ms: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            solver_timeout_ms: 5_000,
        }
    }
}

/// A cooperative cancellation signal shared between a caller (typically
/// the external HTTP collaborator reacting to a dropped connection) and
/// an in-flight [`Verifier::verify_cancellable`] call. Cloning shares the
/// same underlying flag; `cancel()` from any clone is visible to all.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(std::sync::Arc<std::sync::atomic::AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

pub struct Verifier {
    config: VerifierConfig,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(VerifierConfig::default())
    }
}

impl Verifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    /// Verify `text` against `ontology`: extract, then discharge every
    /// constraint through a fresh solver context (spec.md §5 — contexts
    /// are never shared across requests or constraints).
    pub fn verify(&self, ontology: &Ontology, text: &str) -> Report {
        self.verify_cancellable(ontology, text, &CancelToken::new())
    }

    /// As [`Verifier::verify`], but checked against `cancel` at every
    /// constraint boundary (spec.md §5, "Request-level cancellation MUST
    /// abort at the next constraint boundary"). A caller holding the
    /// other end of the token can request early termination from another
    /// thread; constraints not yet reached are left out of the report
    /// rather than force-included as violations.
    pub fn verify_cancellable(&self, ontology: &Ontology, text: &str, cancel: &CancelToken) -> Report {
        let span = info_span!("verify", ontology = %ontology.name);
        let _enter = span.enter();
        let started = Instant::now();

        let mut env = crate::extract::extract(ontology, text);
        let mut violations = Vec::new();
        let mut checked = 0usize;

        for constraint in &ontology.constraints {
            if cancel.is_cancelled() {
                warn!(ontology = %ontology.name, checked, total = ontology.constraints.len(), "verification cancelled");
                break;
            }
            if let Some(violation) = self.check_constraint(ontology, constraint, &mut env) {
                violations.push(violation);
            }
            checked += 1;
        }

        let parsed_data = env
            .values
            .iter()
            .map(|(k, v)| (k.clone(), value_to_json(v)))
            .collect();

        Report {
            verification_id: Uuid::new_v4().to_string(),
            ontology: OntologyMeta {
                name: ontology.name.clone(),
                version: ontology.version.clone(),
                constraints_checked: checked,
            },
            verified: violations.is_empty(),
            violations,
            parsed_data,
            warnings: env.warnings.iter().map(|w| format!("{}: {}", w.variable, w.reason)).collect(),
            proof: ProofMeta {
                method: "smt",
                version: SOLVER_BACKEND,
            },
            execution_time_ms: started.elapsed().as_millis() as u64,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn check_constraint(
        &self,
        ontology: &Ontology,
        constraint: &Constraint,
        env: &mut Environment,
    ) -> Option<Violation> {
        let declarations = formula::merge_declarations(&ontology.variables, &constraint.variables);

        let timeout = Duration::from_millis(self.config.solver_timeout_ms);
        let result = run_with_timeout(timeout, {
            let formula = constraint.formula.clone();
            let declarations = declarations.clone();
            let resolved: Vec<(String, Sort, CoercedValue)> = declarations
                .iter()
                .map(|(name, sort)| (name.clone(), *sort, env.resolve(name, *sort)))
                .collect();
            move || discharge(&formula, &declarations, &resolved)
        });

        let base = |indeterminate: Option<IndeterminateReason>,
                    reason: Option<String>,
                    counterexample: std::collections::HashMap<String, String>| Violation {
            constraint_id: constraint.id.clone(),
            error_message: constraint
                .error_message
                .clone()
                .or_else(|| constraint.description.clone()),
            readable: constraint.readable.clone(),
            formula: serde_json::to_value(&constraint.formula).unwrap_or(serde_json::Value::Null),
            citation: constraint.citation.clone(),
            indeterminate,
            reason,
            counterexample,
        };

        match result {
            Ok(DischargeOutcome::Unsat) => None,
            Ok(DischargeOutcome::Sat(model)) => {
                Some(base(None, Some("counterexample found".to_string()), model))
            }
            Ok(DischargeOutcome::Unknown) => {
                warn!(constraint_id = %constraint.id, "solver returned unknown");
                Some(base(
                    Some(IndeterminateReason::SolverUnknown),
                    Some("solver returned unknown".to_string()),
                    Default::default(),
                ))
            }
            Ok(DischargeOutcome::CompileError(err)) => Some(base(
                Some(IndeterminateReason::CompileError),
                Some(err.to_string()),
                Default::default(),
            )),
            Err(TimedOut) => {
                warn!(constraint_id = %constraint.id, "solver timed out");
                Some(base(
                    Some(IndeterminateReason::Timeout),
                    Some("timeout".to_string()),
                    Default::default(),
                ))
            }
        }
    }
}

/// Convenience entry point mirroring the teacher's free function
/// `verify(spec, code)` alongside the `Verifier` struct.
pub fn verify(ontology: &Ontology, text: &str) -> Report {
    Verifier::default().verify(ontology, text)
}

enum DischargeOutcome {
    Unsat,
    Sat(std::collections::HashMap<String, String>),
    Unknown,
    CompileError(CompileError),
}

struct TimedOut;

/// z3's C API exposes a cooperative solver timeout, not an
/// async-cancellable one; running the check on a dedicated thread and
/// joining with a deadline gives callers a hard wall-clock bound
/// regardless of what the solver does internally (SPEC_FULL.md §4.3
/// Supplemental).
fn run_with_timeout<F, T>(timeout: Duration, f: F) -> Result<T, TimedOut>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(timeout).map_err(|_| TimedOut)
}

/// Builds a z3 `Real` for an arbitrary `f64` without z3's `Real::from_real`
/// i32-numerator overflow (money-sized values like a $1.5m loan amount
/// overflow i32 once scaled by 1e6). Scaling through `Int::from_i64`
/// first keeps the conversion exact to six decimal digits at any
/// magnitude the extractors produce.
fn real_const<'ctx>(context: &'ctx Context, value: f64) -> Real<'ctx> {
    let scaled = (value * 1_000_000.0).round() as i64;
    let numerator = Int::to_real(&Int::from_i64(context, scaled));
    let denominator = Int::to_real(&Int::from_i64(context, 1_000_000));
    numerator / denominator
}

fn discharge(
    formula: &crate::ontology::Formula,
    declarations: &std::collections::HashMap<String, Sort>,
    resolved: &[(String, Sort, CoercedValue)],
) -> DischargeOutcome {
    let config = Config::new();
    let context = Context::new(&config);

    let compiled = match formula::compile(&context, formula, declarations) {
        Ok(c) => c,
        Err(err) => return DischargeOutcome::CompileError(err),
    };

    let solver = Solver::new(&context);

    for (name, sort, value) in resolved {
        if !compiled.free_vars.contains(name) {
            continue;
        }
        match (sort, value) {
            (Sort::Bool, CoercedValue::Bool(b)) => {
                solver.assert(&Bool::new_const(&context, name.as_str())._eq(&Bool::from_bool(&context, *b)));
            }
            (Sort::Int, CoercedValue::Int(i)) => {
                solver.assert(&Int::new_const(&context, name.as_str())._eq(&Int::from_i64(&context, *i)));
            }
            (Sort::Real, CoercedValue::Real(r)) => {
                solver.assert(&Real::new_const(&context, name.as_str())._eq(&real_const(&context, *r)));
            }
            _ => {}
        }
    }

    solver.assert(&compiled.ast.not());

    match solver.check() {
        SatResult::Unsat => DischargeOutcome::Unsat,
        SatResult::Unknown => DischargeOutcome::Unknown,
        SatResult::Sat => {
            let model = solver.get_model().map(|m| extract_model(&context, &m, &resolved.iter().map(|(n, s, _)| (n.clone(), *s)).collect::<Vec<_>>())).unwrap_or_default();
            DischargeOutcome::Sat(model)
        }
    }
}

fn extract_model(
    context: &Context,
    model: &z3::Model,
    declarations: &[(String, Sort)],
) -> std::collections::HashMap<String, String> {
    let mut assignments = std::collections::HashMap::new();
    for (name, sort) in declarations {
        let rendered = match sort {
            Sort::Bool => {
                let c = Bool::new_const(context, name.as_str());
                model.eval(&c, true).map(|v| v.to_string())
            }
            Sort::Int => {
                let c = Int::new_const(context, name.as_str());
                model.eval(&c, true).map(|v| v.to_string())
            }
            Sort::Real => {
                let c = Real::new_const(context, name.as_str());
                model.eval(&c, true).map(|v| v.to_string())
            }
        };
        if let Some(rendered) = rendered {
            assignments.insert(name.clone(), rendered);
        }
    }
    assignments
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Real(r) => serde_json::Number::from_f64(*r)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) | Value::EnumLabel(s) => serde_json::Value::String(s.clone()),
        Value::Date(d) => serde_json::Value::String(d.to_string()),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Null => serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{ExtractorSpec, Formula, VariableDecl};

    fn simple_ontology() -> Ontology {
        Ontology {
            name: "refund-policy".into(),
            version: Some("1".into()),
            variables: vec![VariableDecl {
                name: "refund_days".into(),
                sort: Sort::Int,
                description: None,
            }],
            extractors: vec![ExtractorSpec::Int {
                variable: "refund_days".into(),
                pattern: r"(\d+)[- ]day".into(),
            }],
            constraints: vec![Constraint {
                id: "within-30-days".into(),
                category: None,
                description: Some("refund window must not exceed 30 days".into()),
                readable: None,
                error_message: None,
                citation: None,
                variables: vec![],
                formula: Formula::Le {
                    lhs: Box::new(Formula::Var { name: "refund_days".into() }),
                    rhs: Box::new(Formula::IntLit { value: 30 }),
                },
            }],
            ..Default::default()
        }
    }

    #[test]
    fn passes_when_within_bound() {
        let ontology = simple_ontology();
        let report = verify(&ontology, "You may request a 14-day refund.");
        assert!(report.verified);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn flags_violation_with_counterexample() {
        let ontology = simple_ontology();
        let report = verify(&ontology, "You may request a 45-day refund.");
        assert!(!report.verified);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].constraint_id, "within-30-days");
    }

    #[test]
    fn missing_extraction_still_produces_a_verdict_and_warning() {
        let ontology = simple_ontology();
        let report = verify(&ontology, "No refund window is mentioned at all.");
        assert!(report.verified);
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn cancelling_before_verification_starts_checks_no_constraints() {
        let ontology = simple_ontology();
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = Verifier::default().verify_cancellable(&ontology, "a 45-day refund.", &cancel);
        assert_eq!(report.ontology.constraints_checked, 0);
        assert!(report.violations.is_empty());
        assert!(report.verified);
    }
}
