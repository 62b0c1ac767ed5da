//! Table-driven Extraction Engine cases (spec.md §4.1 worked examples),
//! in the teacher's `#[rstest]` / `#[case]` style
//! (`tests/completeness_comprehensive_test.rs`).

use ontoverify::{extract, ExtractorSpec, Ontology, Value};
use rstest::rstest;

fn ontology_with(extractor: ExtractorSpec) -> Ontology {
    Ontology {
        name: "case".into(),
        extractors: vec![extractor],
        ..Default::default()
    }
}

#[rstest]
#[case("$1.5m", 1_500_000.0)]
#[case("$500k", 500_000.0)]
#[case("$2,400", 2_400.0)]
#[case("$2.1b", 2_100_000_000.0)]
#[case("$75,000.50", 75_000.50)]
fn money_extractor_parses_suffixes_and_separators(#[case] text: &str, #[case] expected: f64) {
    let ontology = ontology_with(ExtractorSpec::Money {
        variable: "amount".into(),
        pattern: r"\$[\d,.]+\s*(?:k|m|b)?".into(),
    });
    let env = extract(&ontology, text);
    match env.get("amount") {
        Some(Value::Real(actual)) => assert!(
            (actual - expected).abs() < 1e-6,
            "expected {expected}, got {actual}"
        ),
        other => panic!("expected a real value, got {other:?}"),
    }
}

#[rstest]
#[case("DTI: 43%", 43.0)]
#[case("DTI: 35.5%", 35.5)]
#[case("DTI 0%", 0.0)]
fn percentage_extractor_strips_the_percent_sign(#[case] text: &str, #[case] expected: f64) {
    let ontology = ontology_with(ExtractorSpec::Percentage {
        variable: "dti".into(),
        pattern: r"DTI:?\s*(\d+(?:\.\d+)?)%".into(),
    });
    let env = extract(&ontology, text);
    match env.get("dti") {
        Some(Value::Real(actual)) => assert!((actual - expected).abs() < 1e-6),
        other => panic!("expected a real value, got {other:?}"),
    }
}

#[rstest]
#[case("The loan was approved.", true)]
#[case("The loan was denied.", false)]
#[case("No decision has been made.", false)]
fn boolean_extractor_matches_keywords(#[case] text: &str, #[case] expected: bool) {
    let ontology = ontology_with(ExtractorSpec::Boolean {
        variable: "approved".into(),
        keywords: vec!["approved".into()],
        negation_words: vec![],
        check_negation: false,
    });
    let env = extract(&ontology, text);
    match env.get("approved") {
        Some(Value::Bool(actual)) => assert_eq!(*actual, expected),
        None => assert!(!expected, "extractor should have matched"),
        other => panic!("expected a bool value, got {other:?}"),
    }
}

#[rstest]
#[case("approved, not denied", true)]
#[case("approved, but later denied", false)]
fn boolean_extractor_honors_negation_words(#[case] text: &str, #[case] expected: bool) {
    let ontology = ontology_with(ExtractorSpec::Boolean {
        variable: "approved".into(),
        keywords: vec!["approved".into()],
        negation_words: vec!["denied".into()],
        check_negation: true,
    });
    let env = extract(&ontology, text);
    match env.get("approved") {
        Some(Value::Bool(actual)) => assert_eq!(*actual, expected),
        other => panic!("expected a bool value, got {other:?}"),
    }
}

#[rstest]
#[case("tier: gold", "gold")]
#[case("tier: silver", "silver")]
#[case("no tier mentioned", "standard")]
fn enum_extractor_first_match_wins_with_default_fallback(#[case] text: &str, #[case] expected: &str) {
    let mut choices = indexmap::IndexMap::new();
    choices.insert("gold".to_string(), vec!["gold".to_string()]);
    choices.insert("silver".to_string(), vec!["silver".to_string()]);
    let ontology = ontology_with(ExtractorSpec::Enum {
        variable: "tier".into(),
        choices,
        default: Some("standard".into()),
    });
    let env = extract(&ontology, text);
    match env.get("tier") {
        Some(Value::EnumLabel(actual)) => assert_eq!(actual, expected),
        other => panic!("expected an enum label, got {other:?}"),
    }
}
