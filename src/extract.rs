//! The Extraction Engine — turns raw text into a typed [`Environment`],
//! one [`ExtractorSpec`] at a time (spec.md §4.1).
//!
//! Structurally grounded on the teacher's `Extractor`/`ExtractedSpec`
//! pattern (a config-driven walk producing a result object plus
//! accumulated warnings), generalized from "extract rules from a code
//! AST" to "extract typed values from free-form text". All pattern
//! matching is case-insensitive, per spec.md §4.1's closing sentence.

use crate::ontology::{ComputedExpr, ExtractorSpec, ListItemType, Ontology};
use crate::value::{Environment, Value};
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use tracing::{debug, trace};

/// Run every extractor declared on `ontology` against `text`, in
/// declaration order, then resolve `computed` extractors to a
/// fixed point (spec.md §4.1: "a computed extractor may reference
/// any extractor value produced earlier in the pass").
pub fn extract(ontology: &Ontology, text: &str) -> Environment {
    let mut env = Environment::new();
    let lower = text.to_lowercase();

    let mut computed = Vec::new();
    for extractor in &ontology.extractors {
        if let ExtractorSpec::Computed { .. } = extractor {
            computed.push(extractor);
            continue;
        }
        run_extractor(extractor, text, &lower, &mut env);
    }

    resolve_computed(&computed, &mut env);

    debug!(
        extractor_count = ontology.extractors.len(),
        warning_count = env.warnings.len(),
        "extraction complete"
    );
    env
}

fn run_extractor(extractor: &ExtractorSpec, text: &str, lower: &str, env: &mut Environment) {
    let name = extractor.variable();
    match extractor {
        ExtractorSpec::Int { pattern, .. } => match extract_int(text, pattern, name, env) {
            Some(n) => env.insert(name, Value::Int(n)),
            None => {
                env.warn(name, "no match for int extractor");
                env.insert(name, Value::Int(0));
            }
        },
        ExtractorSpec::Float { pattern, .. } => match extract_number(text, pattern, name, env) {
            Some(n) => env.insert(name, Value::Real(n)),
            None => {
                env.warn(name, "no match for float extractor");
                env.insert(name, Value::Real(0.0));
            }
        },
        ExtractorSpec::Money { pattern, .. } => match extract_money(text, pattern, name, env) {
            Some(n) => env.insert(name, Value::Real(n)),
            None => {
                env.warn(name, "no match for money extractor");
                env.insert(name, Value::Real(0.0));
            }
        },
        ExtractorSpec::Percentage { pattern, .. } => match extract_number(text, pattern, name, env) {
            Some(n) => env.insert(name, Value::Real(n)),
            None => {
                env.warn(name, "no match for percentage extractor");
                env.insert(name, Value::Real(0.0));
            }
        },
        ExtractorSpec::Boolean {
            keywords,
            negation_words,
            check_negation,
            ..
        } => {
            let value = extract_boolean(lower, keywords, negation_words, *check_negation);
            env.insert(name, Value::Bool(value));
        }
        ExtractorSpec::String { pattern, .. } => match extract_string(text, pattern) {
            Some(s) => env.insert(name, Value::String(s)),
            None => {
                env.warn(name, "no match for string extractor");
                env.insert(name, Value::String(String::new()));
            }
        },
        ExtractorSpec::Date { pattern, .. } => match extract_date(text, pattern, name, env) {
            Some(v) => env.insert(name, v),
            None => {
                env.warn(name, "no match for date extractor");
                env.insert(name, Value::Null);
            }
        },
        ExtractorSpec::Datetime { pattern, .. } => match extract_datetime(text, pattern, name, env) {
            Some(v) => env.insert(name, v),
            None => {
                env.warn(name, "no match for datetime extractor");
                env.insert(name, Value::Null);
            }
        },
        ExtractorSpec::List { pattern, item_type, .. } => {
            let items = extract_list(text, pattern, *item_type, name, env);
            env.insert(name, Value::List(items));
        }
        ExtractorSpec::Enum { choices, default, .. } => match extract_enum(lower, choices) {
            Some(label) => env.insert(name, Value::EnumLabel(label)),
            None => match default {
                Some(label) => env.insert(name, Value::EnumLabel(label.clone())),
                None => {
                    env.warn(name, "no choice matched and no default configured");
                    env.insert(name, Value::Null);
                }
            },
        },
        ExtractorSpec::Computed { .. } => unreachable!("computed extractors are resolved separately"),
    }

    trace!(variable = name, kind = extractor_kind(extractor), "extractor run");
}

fn extractor_kind(extractor: &ExtractorSpec) -> &'static str {
    match extractor {
        ExtractorSpec::Int { .. } => "int",
        ExtractorSpec::Float { .. } => "float",
        ExtractorSpec::Money { .. } => "money",
        ExtractorSpec::Percentage { .. } => "percentage",
        ExtractorSpec::Boolean { .. } => "boolean",
        ExtractorSpec::String { .. } => "string",
        ExtractorSpec::Date { .. } => "date",
        ExtractorSpec::Datetime { .. } => "datetime",
        ExtractorSpec::List { .. } => "list",
        ExtractorSpec::Enum { .. } => "enum",
        ExtractorSpec::Computed { .. } => "computed",
    }
}

/// Compiles a pattern case-insensitively (spec.md §4.1: "All pattern
/// matches are performed case-insensitively").
fn compiled(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(pattern).case_insensitive(true).build().ok()
}

fn extract_number(text: &str, pattern: &str, name: &str, env: &mut Environment) -> Option<f64> {
    let re = compiled(pattern)?;
    let caps = re.captures(text)?;
    let captured = caps.get(1).or_else(|| caps.get(0))?;
    let raw = captured.as_str().trim().trim_end_matches('%').replace(',', "");
    let n: f64 = raw.parse().ok()?;
    Some(saturate(n, name, env))
}

/// `int` extraction parses the comma-stripped group directly as base-10
/// `i64`, per spec.md §4.1 — never routing through `f64`, which loses
/// precision above 2^53 and would silently corrupt a declared-`int`
/// value before it ever reaches the solver.
fn extract_int(text: &str, pattern: &str, name: &str, env: &mut Environment) -> Option<i64> {
    let re = compiled(pattern)?;
    let caps = re.captures(text)?;
    let captured = caps.get(1).or_else(|| caps.get(0))?;
    let raw = captured.as_str().trim().replace(',', "");
    let n: i128 = raw.parse().ok()?;
    Some(saturate_int(n, name, env))
}

/// Saturates to `f64::MAX`/`-f64::MAX` and records an `extraction_warning`
/// on overflow, per the Open Question resolved in SPEC_FULL.md §4.1.
fn saturate(n: f64, name: &str, env: &mut Environment) -> f64 {
    if n.is_infinite() {
        env.warn(name, "numeric value overflowed and was saturated");
        if n.is_sign_negative() {
            -f64::MAX
        } else {
            f64::MAX
        }
    } else {
        n
    }
}

/// Saturates to `i64::MAX`/`i64::MIN` and records an `extraction_warning`
/// on overflow. Parsing into `i128` first (rather than `i64` directly)
/// lets this detect and warn on an out-of-range literal instead of
/// silently failing the parse and falling through to the extractor's
/// miss-default.
fn saturate_int(n: i128, name: &str, env: &mut Environment) -> i64 {
    if n > i64::MAX as i128 {
        env.warn(name, "integer value overflowed and was saturated");
        i64::MAX
    } else if n < i64::MIN as i128 {
        env.warn(name, "integer value overflowed and was saturated");
        i64::MIN
    } else {
        n as i64
    }
}

const MONEY_SUFFIXES: &[(char, f64)] = &[
    ('k', 1_000.0),
    ('m', 1_000_000.0),
    ('b', 1_000_000_000.0),
];

fn money_suffix(c: char) -> Option<f64> {
    MONEY_SUFFIXES
        .iter()
        .find(|(suffix, _)| *suffix == c.to_ascii_lowercase())
        .map(|(_, mult)| *mult)
}

fn extract_money(text: &str, pattern: &str, name: &str, env: &mut Environment) -> Option<f64> {
    let re = compiled(pattern)?;
    let caps = re.captures(text)?;
    let whole = caps.get(0)?;
    let group = caps.get(1).unwrap_or(whole);
    let cleaned = group.as_str().trim().trim_start_matches('$').replace(',', "");

    let (number_part, multiplier) = match cleaned.chars().last().and_then(money_suffix) {
        Some(mult) => {
            let last_len = cleaned.chars().last().expect("checked above").len_utf8();
            (cleaned[..cleaned.len() - last_len].to_string(), mult)
        }
        // spec.md §4.1 phrases the suffix as "immediately after the
        // match" — an author's capture group may end before the suffix
        // letter (e.g. `\$(\d+)` against "$500k"), so fall back to the
        // character right after the whole match.
        None => match text[whole.end()..].chars().next().and_then(money_suffix) {
            Some(mult) => (cleaned.clone(), mult),
            None => (cleaned.clone(), 1.0),
        },
    };

    let base: f64 = number_part.trim().parse().ok()?;
    Some(saturate(base * multiplier, name, env))
}

fn extract_string(text: &str, pattern: &str) -> Option<String> {
    let re = compiled(pattern)?;
    let caps = re.captures(text)?;
    Some(caps.get(1).or_else(|| caps.get(0))?.as_str().to_string())
}

/// spec.md §4.1: true iff any keyword occurs; if `check_negation` and any
/// negation phrase matches, the result is forced false regardless.
fn extract_boolean(lower: &str, keywords: &[String], negation_words: &[String], check_negation: bool) -> bool {
    let matched = keywords.iter().any(|kw| lower.contains(&kw.to_lowercase()));
    if check_negation && negation_words.iter().any(|w| lower.contains(&w.to_lowercase())) {
        return false;
    }
    matched
}

/// Formats tried in order against the matched substring, per spec.md
/// §4.1's `date` row: ISO, slash-separated ISO, US, dash-separated US,
/// long English month-day-year, day-month-year.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%b %d, %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%d-%B-%Y",
];

fn extract_date(text: &str, pattern: &str, name: &str, env: &mut Environment) -> Option<Value> {
    let re = compiled(pattern)?;
    let caps = re.captures(text)?;
    let raw = caps.get(1).or_else(|| caps.get(0))?.as_str();
    match parse_date(raw) {
        Some(v) => Some(v),
        None => {
            env.warn(name, format!("matched text '{raw}' is not a valid date"));
            None
        }
    }
}

fn parse_date(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    for fmt in DATE_FORMATS {
        if let Ok(d) = chrono::NaiveDate::parse_from_str(raw, fmt) {
            return Some(Value::Date(d));
        }
    }
    None
}

/// `datetime` formats: date plus a time-of-day component (spec.md §4.1,
/// `datetime` row). [`crate::value::Value`] has no separate datetime
/// sort, so the date component is kept and the time discarded once
/// parsing has confirmed the full timestamp is well-formed.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

fn extract_datetime(text: &str, pattern: &str, name: &str, env: &mut Environment) -> Option<Value> {
    let re = compiled(pattern)?;
    let caps = re.captures(text)?;
    let raw = caps.get(1).or_else(|| caps.get(0))?.as_str();
    match parse_datetime(raw) {
        Some(v) => Some(v),
        None => {
            env.warn(name, format!("matched text '{raw}' is not a valid datetime"));
            None
        }
    }
}

fn parse_datetime(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Value::Date(dt.date()));
        }
    }
    parse_date(raw)
}

/// spec.md §4.1 `list` row: every non-overlapping match of `pattern`,
/// each capture-group-1 coerced to `item_type`.
fn extract_list(text: &str, pattern: &str, item_type: ListItemType, name: &str, env: &mut Environment) -> Vec<Value> {
    let Some(re) = compiled(pattern) else {
        env.warn(name, "list pattern failed to compile");
        return Vec::new();
    };

    let mut items = Vec::new();
    for caps in re.captures_iter(text) {
        let Some(group) = caps.get(1).or_else(|| caps.get(0)) else {
            continue;
        };
        let raw = group.as_str().trim();
        let coerced = match item_type {
            ListItemType::Int => raw.replace(',', "").parse::<i64>().ok().map(Value::Int),
            ListItemType::Float => raw.replace(',', "").parse::<f64>().ok().map(Value::Real),
            ListItemType::String => Some(Value::String(raw.to_string())),
        };
        match coerced {
            Some(v) => items.push(v),
            None => env.warn(name, format!("list item '{raw}' could not be coerced to {item_type:?}")),
        }
    }
    items
}

/// First label (in declaration order) whose keyword list matches.
fn extract_enum(lower: &str, choices: &indexmap::IndexMap<String, Vec<String>>) -> Option<String> {
    choices
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| lower.contains(&kw.to_lowercase())))
        .map(|(label, _)| label.clone())
}

/// The result of evaluating a [`ComputedExpr`]: the mini-language mixes
/// numeric and boolean operators, so intermediate results carry a tag
/// rather than always collapsing to `f64`.
#[derive(Debug, Clone, Copy)]
enum ComputedValue {
    Num(f64),
    Bool(bool),
}

impl ComputedValue {
    fn as_f64(&self) -> f64 {
        match self {
            ComputedValue::Num(n) => *n,
            ComputedValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    fn as_bool(&self) -> bool {
        match self {
            ComputedValue::Num(n) => *n != 0.0,
            ComputedValue::Bool(b) => *b,
        }
    }
}

/// Resolve `computed` extractors to a fixed point. Cycles are rejected
/// at load time ([`crate::ontology::Ontology::validate`]), so this always
/// terminates in at most `computed.len()` passes; any variable still
/// unresolved after that many passes has a dependency that was never
/// extracted or computed, and is left out with a warning.
fn resolve_computed(computed: &[&ExtractorSpec], env: &mut Environment) {
    let mut remaining: Vec<&ExtractorSpec> = computed.to_vec();
    let max_passes = computed.len() + 1;

    for _ in 0..max_passes {
        if remaining.is_empty() {
            break;
        }
        let mut next_round = Vec::new();
        for extractor in remaining {
            let ExtractorSpec::Computed { variable, expression } = extractor else {
                continue;
            };
            let mut deps = HashSet::new();
            expression.dependencies(&mut deps);
            if deps.iter().all(|d| env.get(d).is_some()) {
                match eval_computed(expression, env) {
                    Some(ComputedValue::Bool(b)) => env.insert(variable.clone(), Value::Bool(b)),
                    Some(ComputedValue::Num(n)) => env.insert(variable.clone(), Value::Real(n)),
                    None => env.warn(variable, "computed expression referenced an incompatible value"),
                }
            } else {
                next_round.push(extractor);
            }
        }
        if next_round.len() == remaining.len() {
            for extractor in &next_round {
                if let ExtractorSpec::Computed { variable, .. } = extractor {
                    env.warn(variable, "unresolved dependency in computed expression");
                }
            }
            break;
        }
        remaining = next_round;
    }
}

fn is_present(expr: &ComputedExpr, env: &Environment) -> bool {
    match expr {
        ComputedExpr::Ref { variable } => matches!(env.get(variable), Some(v) if !matches!(v, Value::Null)),
        _ => eval_computed(expr, env).is_some(),
    }
}

fn ref_to_num(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Real(r) => Some(*r),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn eval_computed(expr: &ComputedExpr, env: &Environment) -> Option<ComputedValue> {
    match expr {
        ComputedExpr::Ref { variable } => match env.get(variable)? {
            Value::Bool(b) => Some(ComputedValue::Bool(*b)),
            other => ref_to_num(other).map(ComputedValue::Num),
        },
        ComputedExpr::NumberLit { value } => Some(ComputedValue::Num(*value)),
        ComputedExpr::BoolLit { value } => Some(ComputedValue::Bool(*value)),

        ComputedExpr::Add { args } | ComputedExpr::Sum { args } => {
            let mut total = 0.0;
            for a in args {
                total += eval_computed(a, env)?.as_f64();
            }
            Some(ComputedValue::Num(total))
        }
        ComputedExpr::Mul { args } => {
            let mut product = 1.0;
            for a in args {
                product *= eval_computed(a, env)?.as_f64();
            }
            Some(ComputedValue::Num(product))
        }
        ComputedExpr::Sub { lhs, rhs } => {
            Some(ComputedValue::Num(eval_computed(lhs, env)?.as_f64() - eval_computed(rhs, env)?.as_f64()))
        }
        ComputedExpr::Div { lhs, rhs } => {
            let denom = eval_computed(rhs, env)?.as_f64();
            if denom == 0.0 {
                None
            } else {
                Some(ComputedValue::Num(eval_computed(lhs, env)?.as_f64() / denom))
            }
        }

        ComputedExpr::Gt { lhs, rhs } => {
            Some(ComputedValue::Bool(eval_computed(lhs, env)?.as_f64() > eval_computed(rhs, env)?.as_f64()))
        }
        ComputedExpr::Gte { lhs, rhs } => {
            Some(ComputedValue::Bool(eval_computed(lhs, env)?.as_f64() >= eval_computed(rhs, env)?.as_f64()))
        }
        ComputedExpr::Lt { lhs, rhs } => {
            Some(ComputedValue::Bool(eval_computed(lhs, env)?.as_f64() < eval_computed(rhs, env)?.as_f64()))
        }
        ComputedExpr::Lte { lhs, rhs } => {
            Some(ComputedValue::Bool(eval_computed(lhs, env)?.as_f64() <= eval_computed(rhs, env)?.as_f64()))
        }

        ComputedExpr::Not { arg } => Some(ComputedValue::Bool(!eval_computed(arg, env)?.as_bool())),
        ComputedExpr::And { args } => {
            let mut result = true;
            for a in args {
                result &= eval_computed(a, env)?.as_bool();
            }
            Some(ComputedValue::Bool(result))
        }
        ComputedExpr::Or { args } => {
            let mut result = false;
            for a in args {
                result |= eval_computed(a, env)?.as_bool();
            }
            Some(ComputedValue::Bool(result))
        }
        ComputedExpr::If { cond, then, else_ } => {
            if eval_computed(cond, env)?.as_bool() {
                eval_computed(then, env)
            } else {
                eval_computed(else_, env)
            }
        }

        ComputedExpr::CountTrue { args } => {
            let mut count = 0;
            for a in args {
                if eval_computed(a, env)?.as_bool() {
                    count += 1;
                }
            }
            Some(ComputedValue::Num(count as f64))
        }
        ComputedExpr::CountFields { args } => {
            let count = args.iter().filter(|a| is_present(a, env)).count();
            Some(ComputedValue::Num(count as f64))
        }
        ComputedExpr::Any { args } => {
            let mut result = false;
            for a in args {
                result |= eval_computed(a, env)?.as_bool();
            }
            Some(ComputedValue::Bool(result))
        }
        ComputedExpr::All { args } => {
            let mut result = true;
            for a in args {
                result &= eval_computed(a, env)?.as_bool();
            }
            Some(ComputedValue::Bool(result))
        }
    }
}
