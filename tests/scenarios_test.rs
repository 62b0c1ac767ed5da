//! End-to-end scenarios from spec.md §8 ("Concrete end-to-end scenarios").
//! Each builds an [`Ontology`] in memory and checks the verifier's report
//! against the literal expectation in the scenario table.

use ontoverify::{Constraint, ExtractorSpec, Formula, Ontology, Sort, VariableDecl};
use pretty_assertions::assert_eq;

fn var(name: &str, sort: Sort) -> VariableDecl {
    VariableDecl {
        name: name.into(),
        sort,
        description: None,
    }
}

fn constraint(id: &str, formula: Formula) -> Constraint {
    Constraint {
        id: id.into(),
        category: None,
        description: None,
        readable: None,
        error_message: None,
        citation: None,
        variables: vec![],
        formula,
    }
}

fn le(name: &str, bound: i64) -> Formula {
    Formula::Le {
        lhs: Box::new(Formula::Var { name: name.into() }),
        rhs: Box::new(Formula::IntLit { value: bound }),
    }
}

fn ge(name: &str, bound: i64) -> Formula {
    Formula::Ge {
        lhs: Box::new(Formula::Var { name: name.into() }),
        rhs: Box::new(Formula::IntLit { value: bound }),
    }
}

/// S1/S2: `{"<=":["dti",43]}` with a float extractor for `dti`.
fn dti_ontology() -> Ontology {
    Ontology {
        name: "dti-policy".into(),
        variables: vec![var("dti", Sort::Real)],
        extractors: vec![ExtractorSpec::Float {
            variable: "dti".into(),
            pattern: r"DTI:\s*(\d+(?:\.\d+)?)%?".into(),
        }],
        constraints: vec![constraint(
            "MAX_DTI",
            Formula::Le {
                lhs: Box::new(Formula::Var { name: "dti".into() }),
                rhs: Box::new(Formula::IntLit { value: 43 }),
            },
        )],
        ..Default::default()
    }
}

#[test]
fn s1_dti_within_bound_verifies() {
    let ontology = dti_ontology();
    let report = ontoverify::verify(&ontology, "DTI: 35%");
    assert!(report.verified);
    assert!(report.violations.is_empty());
    assert_eq!(
        report.parsed_data.get("dti"),
        Some(&serde_json::json!(35.0))
    );
}

#[test]
fn s2_dti_over_bound_violates() {
    let ontology = dti_ontology();
    let report = ontoverify::verify(&ontology, "DTI: 48%");
    assert!(!report.verified);
    assert_eq!(report.violations[0].constraint_id, "MAX_DTI");
}

#[test]
fn s3_or_clause_lets_compensating_factors_cover_a_high_dti() {
    let ontology = Ontology {
        name: "dti-or-factors".into(),
        variables: vec![var("dti", Sort::Real), var("compensating_factors", Sort::Int)],
        extractors: vec![
            ExtractorSpec::Float {
                variable: "dti".into(),
                pattern: r"DTI\s*(\d+(?:\.\d+)?)%?".into(),
            },
            ExtractorSpec::Int {
                variable: "compensating_factors".into(),
                pattern: r"(\d+)\s*compensating factors".into(),
            },
        ],
        constraints: vec![constraint(
            "DTI_OR_FACTORS",
            Formula::Or {
                args: vec![le("dti", 43), ge("compensating_factors", 2)],
            },
        )],
        ..Default::default()
    };

    let report = ontoverify::verify(&ontology, "DTI 50%, 3 compensating factors.");
    assert!(report.verified);
}

fn denial_ontology() -> Ontology {
    Ontology {
        name: "denial-reason".into(),
        variables: vec![var("is_denial", Sort::Bool), var("has_specific_reason", Sort::Bool)],
        extractors: vec![
            ExtractorSpec::Boolean {
                variable: "is_denial".into(),
                keywords: vec!["denied".into()],
                negation_words: vec![],
                check_negation: false,
            },
            ExtractorSpec::Boolean {
                variable: "has_specific_reason".into(),
                keywords: vec![
                    "insufficient credit history".into(),
                    "credit history".into(),
                ],
                negation_words: vec![],
                check_negation: false,
            },
        ],
        constraints: vec![constraint(
            "DENIAL_REASON_REQUIRED",
            Formula::Implies {
                lhs: Box::new(Formula::Eq {
                    lhs: Box::new(Formula::Var { name: "is_denial".into() }),
                    rhs: Box::new(Formula::BoolLit { value: true }),
                }),
                rhs: Box::new(Formula::Eq {
                    lhs: Box::new(Formula::Var { name: "has_specific_reason".into() }),
                    rhs: Box::new(Formula::BoolLit { value: true }),
                }),
            },
        )],
        ..Default::default()
    }
}

#[test]
fn s4_denial_with_reason_verifies() {
    let ontology = denial_ontology();
    let report = ontoverify::verify(
        &ontology,
        "Application denied due to insufficient credit history.",
    );
    assert!(report.verified);
}

#[test]
fn s5_denial_without_reason_violates() {
    let ontology = denial_ontology();
    let report = ontoverify::verify(&ontology, "Application denied.");
    assert!(!report.verified);
    assert_eq!(report.violations[0].constraint_id, "DENIAL_REASON_REQUIRED");
}

#[test]
fn s6_money_extractor_parses_suffix_and_flags_overage() {
    let ontology = Ontology {
        name: "loan-cap".into(),
        variables: vec![var("loan_amount", Sort::Real)],
        extractors: vec![ExtractorSpec::Money {
            variable: "loan_amount".into(),
            pattern: r"\$([0-9.]+[kKmMbB]?)".into(),
        }],
        constraints: vec![constraint("LOAN_CAP", le("loan_amount", 100_000))],
        ..Default::default()
    };

    let report = ontoverify::verify(&ontology, "Approved for $1.5m.");
    assert!(!report.verified);
    assert_eq!(
        report.parsed_data.get("loan_amount"),
        Some(&serde_json::json!(1_500_000.0))
    );
}

#[test]
fn literal_true_constraint_always_verifies() {
    let ontology = Ontology {
        name: "literal-true".into(),
        constraints: vec![constraint("ALWAYS_TRUE", Formula::BoolLit { value: true })],
        ..Default::default()
    };
    let report = ontoverify::verify(&ontology, "anything at all");
    assert!(report.verified);
}

#[test]
fn literal_false_constraint_always_produces_one_violation() {
    let ontology = Ontology {
        name: "literal-false".into(),
        constraints: vec![constraint("ALWAYS_FALSE", Formula::BoolLit { value: false })],
        ..Default::default()
    };
    let report = ontoverify::verify(&ontology, "anything at all");
    assert!(!report.verified);
    assert_eq!(report.violations.len(), 1);
}

#[test]
fn verified_flag_always_matches_empty_violations() {
    let verified_ontology = dti_ontology();
    let ok = ontoverify::verify(&verified_ontology, "DTI: 10%");
    assert_eq!(ok.verified, ok.violations.is_empty());

    let failing = ontoverify::verify(&verified_ontology, "DTI: 90%");
    assert_eq!(failing.verified, failing.violations.is_empty());
}

#[test]
fn undeclared_variable_yields_compile_error_violation_without_aborting_other_constraints() {
    let ontology = Ontology {
        name: "partial-failure".into(),
        variables: vec![var("x", Sort::Int)],
        constraints: vec![
            constraint("GOOD", Formula::Ge {
                lhs: Box::new(Formula::Var { name: "x".into() }),
                rhs: Box::new(Formula::IntLit { value: 0 }),
            }),
            constraint("BROKEN", Formula::Var { name: "ghost".into() }),
        ],
        ..Default::default()
    };

    let report = ontoverify::verify(&ontology, "x is never mentioned");
    assert!(!report.verified);
    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].constraint_id, "BROKEN");
    assert_eq!(
        report.violations[0].indeterminate,
        Some(ontoverify::IndeterminateReason::CompileError)
    );
}

#[test]
fn missing_extraction_is_recorded_as_a_warning_and_evaluated_against_the_default() {
    let ontology = dti_ontology();
    let report = ontoverify::verify(&ontology, "no dti mentioned in this text");
    assert!(report.verified);
    assert!(report
        .warnings
        .iter()
        .any(|w| w.starts_with("dti:")));
}
