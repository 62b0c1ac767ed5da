//! Ontology document types — the declarative data model loaded from disk.
//!
//! An `Ontology` bundles variable declarations, constraints (formula
//! trees over those declarations) and extractor specs. Shape and
//! `#[serde(default, skip_serializing_if)]` idioms mirror
//! `imacs::spec::Spec`/`Variable`/`Rule`, generalized from a decision
//! table to a logical-constraint bundle.

use crate::error::{Error, Result};
use crate::value::Sort;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::de::Error as DeError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{HashMap, HashSet};

/// A complete ontology document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[schemars(title = "Ontology", description = "Declarative logical constraint bundle")]
pub struct Ontology {
    /// Unique identifier, also the registry lookup key.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Declared variables available to constraint formulas and extractors.
    #[serde(default)]
    pub variables: Vec<VariableDecl>,

    /// Extractors that populate the environment from raw text.
    #[serde(default)]
    pub extractors: Vec<ExtractorSpec>,

    /// Constraints a verified text must satisfy.
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

/// A declared variable and its solver sort.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VariableDecl {
    pub name: String,
    pub sort: Sort,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A named logical constraint: a formula tree plus the declarations,
/// error message and citation it carries (spec.md §3, "Constraint").
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Constraint {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Human-readable rendering of the formula, surfaced on violations
    /// alongside the structural form (spec.md §3, "Violation").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readable: Option<String>,
    /// Message returned on a violation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Source citation carried through to a violation record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
    /// Variable declarations scoped to this constraint. A name declared
    /// here shadows an ontology-level declaration of the same name only
    /// if sorts agree; conflicting re-declarations are rejected by the
    /// loader (spec.md §3 invariant on duplicate-name conflicting sorts).
    #[serde(default)]
    pub variables: Vec<VariableDecl>,
    #[schemars(with = "serde_json::Value")]
    pub formula: Formula,
}

/// A formula tree node. Mirrors the operator families in spec.md §4.2:
/// logical, comparison, arithmetic, literal, variable reference, `ite`.
///
/// The wire format is operator-keyed, not the tagged-struct shape you'd
/// get from a derived `Deserialize` — `{"<=": ["dti", 43]}`, not
/// `{"op": "le", "lhs": ..., "rhs": ...}` — because that is the shape
/// spec.md's worked scenarios (S1-S6) and algebraic laws use literally.
/// Operands may be a bare JSON string (a variable reference), a bare
/// bool/number (a literal), the explicit `{"const": v}` alternative, or
/// a nested operator object. [`Formula`] therefore carries its own
/// [`Serialize`]/[`Deserialize`] impls below instead of deriving them.
#[derive(Debug, Clone, PartialEq)]
pub enum Formula {
    And { args: Vec<Formula> },
    Or { args: Vec<Formula> },
    Not { arg: Box<Formula> },
    Implies { lhs: Box<Formula>, rhs: Box<Formula> },
    Ite { cond: Box<Formula>, then: Box<Formula>, else_: Box<Formula> },

    Eq { lhs: Box<Formula>, rhs: Box<Formula> },
    Ne { lhs: Box<Formula>, rhs: Box<Formula> },
    Lt { lhs: Box<Formula>, rhs: Box<Formula> },
    Le { lhs: Box<Formula>, rhs: Box<Formula> },
    Gt { lhs: Box<Formula>, rhs: Box<Formula> },
    Ge { lhs: Box<Formula>, rhs: Box<Formula> },

    Add { args: Vec<Formula> },
    Sub { lhs: Box<Formula>, rhs: Box<Formula> },
    Mul { args: Vec<Formula> },
    Div { lhs: Box<Formula>, rhs: Box<Formula> },
    Min { args: Vec<Formula> },
    Max { args: Vec<Formula> },

    BoolLit { value: bool },
    IntLit { value: i64 },
    RealLit { value: f64 },
    Var { name: String },
}

impl Serialize for Formula {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Formula::BoolLit { value } => serializer.serialize_bool(*value),
            Formula::IntLit { value } => serializer.serialize_i64(*value),
            Formula::RealLit { value } => serializer.serialize_f64(*value),
            Formula::Var { name } => serializer.serialize_str(name),
            _ => {
                let mut map = serializer.serialize_map(Some(1))?;
                match self {
                    Formula::And { args } => map.serialize_entry("and", args)?,
                    Formula::Or { args } => map.serialize_entry("or", args)?,
                    Formula::Not { arg } => map.serialize_entry("not", arg)?,
                    Formula::Implies { lhs, rhs } => {
                        map.serialize_entry("implies", &[lhs.as_ref(), rhs.as_ref()])?
                    }
                    Formula::Ite { cond, then, else_ } => {
                        map.serialize_entry("ite", &[cond.as_ref(), then.as_ref(), else_.as_ref()])?
                    }
                    Formula::Eq { lhs, rhs } => map.serialize_entry("==", &[lhs.as_ref(), rhs.as_ref()])?,
                    Formula::Ne { lhs, rhs } => map.serialize_entry("!=", &[lhs.as_ref(), rhs.as_ref()])?,
                    Formula::Lt { lhs, rhs } => map.serialize_entry("<", &[lhs.as_ref(), rhs.as_ref()])?,
                    Formula::Le { lhs, rhs } => map.serialize_entry("<=", &[lhs.as_ref(), rhs.as_ref()])?,
                    Formula::Gt { lhs, rhs } => map.serialize_entry(">", &[lhs.as_ref(), rhs.as_ref()])?,
                    Formula::Ge { lhs, rhs } => map.serialize_entry(">=", &[lhs.as_ref(), rhs.as_ref()])?,
                    Formula::Add { args } => map.serialize_entry("+", args)?,
                    Formula::Sub { lhs, rhs } => map.serialize_entry("-", &[lhs.as_ref(), rhs.as_ref()])?,
                    Formula::Mul { args } => map.serialize_entry("*", args)?,
                    Formula::Div { lhs, rhs } => map.serialize_entry("/", &[lhs.as_ref(), rhs.as_ref()])?,
                    Formula::Min { args } => map.serialize_entry("min", args)?,
                    Formula::Max { args } => map.serialize_entry("max", args)?,
                    Formula::BoolLit { .. }
                    | Formula::IntLit { .. }
                    | Formula::RealLit { .. }
                    | Formula::Var { .. } => unreachable!("handled above"),
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Formula {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        formula_from_json(&value).map_err(D::Error::custom)
    }
}

/// Parse one formula node from its JSON representation. Used both by
/// [`Formula`]'s `Deserialize` impl (top-level) and recursively for
/// nested operands.
fn formula_from_json(value: &serde_json::Value) -> std::result::Result<Formula, String> {
    match value {
        serde_json::Value::Bool(b) => Ok(Formula::BoolLit { value: *b }),
        serde_json::Value::Number(n) => Ok(number_literal(n)),
        serde_json::Value::String(s) => Ok(Formula::Var { name: s.clone() }),
        serde_json::Value::Object(map) => {
            if map.len() != 1 {
                return Err(format!(
                    "formula object must have exactly one operator key, got {}",
                    map.len()
                ));
            }
            let (op, operand) = map.iter().next().expect("len checked above");
            parse_operator(op, operand)
        }
        other => Err(format!("unsupported formula node: {other}")),
    }
}

fn number_literal(n: &serde_json::Number) -> Formula {
    if let Some(i) = n.as_i64() {
        Formula::IntLit { value: i }
    } else if let Some(u) = n.as_u64() {
        if u <= i64::MAX as u64 {
            Formula::IntLit { value: u as i64 }
        } else {
            Formula::RealLit { value: u as f64 }
        }
    } else {
        Formula::RealLit {
            value: n.as_f64().unwrap_or(0.0),
        }
    }
}

fn parse_operator(op: &str, operand: &serde_json::Value) -> std::result::Result<Formula, String> {
    let args_arr = || -> std::result::Result<Vec<Formula>, String> {
        operand
            .as_array()
            .ok_or_else(|| format!("'{op}' expects an array of operands"))?
            .iter()
            .map(formula_from_json)
            .collect()
    };
    let binary = |build: fn(Box<Formula>, Box<Formula>) -> Formula| -> std::result::Result<Formula, String> {
        let items = operand
            .as_array()
            .ok_or_else(|| format!("'{op}' expects an array of operands"))?;
        if items.len() != 2 {
            return Err(format!("'{op}' expects exactly 2 operands, got {}", items.len()));
        }
        Ok(build(
            Box::new(formula_from_json(&items[0])?),
            Box::new(formula_from_json(&items[1])?),
        ))
    };

    match op {
        "const" => match operand {
            serde_json::Value::Bool(b) => Ok(Formula::BoolLit { value: *b }),
            serde_json::Value::Number(n) => Ok(number_literal(n)),
            other => Err(format!("'const' expects a boolean or numeric literal, got {other}")),
        },
        "var" => match operand {
            serde_json::Value::String(s) => Ok(Formula::Var { name: s.clone() }),
            other => Err(format!("'var' expects a string operand, got {other}")),
        },
        "and" => Ok(Formula::And { args: args_arr()? }),
        "or" => Ok(Formula::Or { args: args_arr()? }),
        "not" => Ok(Formula::Not {
            arg: Box::new(formula_from_json(operand)?),
        }),
        "implies" => binary(|lhs, rhs| Formula::Implies { lhs, rhs }),
        "ite" | "if" => {
            let items = operand
                .as_array()
                .ok_or_else(|| format!("'{op}' expects an array of operands"))?;
            if items.len() != 3 {
                return Err(format!("'{op}' expects exactly 3 operands, got {}", items.len()));
            }
            Ok(Formula::Ite {
                cond: Box::new(formula_from_json(&items[0])?),
                then: Box::new(formula_from_json(&items[1])?),
                else_: Box::new(formula_from_json(&items[2])?),
            })
        }
        "==" => binary(|lhs, rhs| Formula::Eq { lhs, rhs }),
        "!=" => binary(|lhs, rhs| Formula::Ne { lhs, rhs }),
        "<" => binary(|lhs, rhs| Formula::Lt { lhs, rhs }),
        "<=" => binary(|lhs, rhs| Formula::Le { lhs, rhs }),
        ">" => binary(|lhs, rhs| Formula::Gt { lhs, rhs }),
        ">=" => binary(|lhs, rhs| Formula::Ge { lhs, rhs }),
        "+" => Ok(Formula::Add { args: args_arr()? }),
        "-" => binary(|lhs, rhs| Formula::Sub { lhs, rhs }),
        "*" => Ok(Formula::Mul { args: args_arr()? }),
        "/" => binary(|lhs, rhs| Formula::Div { lhs, rhs }),
        "min" => Ok(Formula::Min { args: args_arr()? }),
        "max" => Ok(Formula::Max { args: args_arr()? }),
        other => Err(format!("unknown formula operator '{other}'")),
    }
}

/// One case per extractor kind, per the "explicit capability set" design
/// note in spec.md §9 (a tagged variant, not a dynamic plugin registry).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractorSpec {
    Int { variable: String, pattern: String },
    Float { variable: String, pattern: String },
    Money { variable: String, pattern: String },
    Percentage { variable: String, pattern: String },
    Boolean {
        variable: String,
        /// Case-insensitive substrings whose presence sets the value true.
        keywords: Vec<String>,
        /// Phrases that, when `check_negation` is set and matched, force
        /// the result to false regardless of `keywords`.
        #[serde(default)]
        negation_words: Vec<String>,
        #[serde(default)]
        check_negation: bool,
    },
    String { variable: String, pattern: String },
    Date { variable: String, pattern: String },
    Datetime { variable: String, pattern: String },
    List {
        variable: String,
        pattern: String,
        item_type: ListItemType,
    },
    Enum {
        variable: String,
        /// Label -> keywords that match it (case-insensitive), in
        /// declaration order — the first label whose keywords match
        /// wins (spec.md §4.1).
        choices: IndexMap<String, Vec<String>>,
        #[serde(default)]
        default: Option<String>,
    },
    /// A derived variable computed from other extracted/computed
    /// variables via a small mini-language, kept deliberately distinct
    /// from the Formula Compiler's language (spec.md §9 Open Question,
    /// resolved: separate languages, not unified — the value domains
    /// differ).
    Computed {
        variable: String,
        expression: ComputedExpr,
    },
}

/// The coercion target for each matched item of a `list` extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ListItemType {
    Int,
    Float,
    String,
}

impl ExtractorSpec {
    pub fn variable(&self) -> &str {
        match self {
            ExtractorSpec::Int { variable, .. }
            | ExtractorSpec::Float { variable, .. }
            | ExtractorSpec::Money { variable, .. }
            | ExtractorSpec::Percentage { variable, .. }
            | ExtractorSpec::Boolean { variable, .. }
            | ExtractorSpec::String { variable, .. }
            | ExtractorSpec::Date { variable, .. }
            | ExtractorSpec::Datetime { variable, .. }
            | ExtractorSpec::List { variable, .. }
            | ExtractorSpec::Enum { variable, .. }
            | ExtractorSpec::Computed { variable, .. } => variable,
        }
    }
}

/// The mini-language for `computed` extractors (spec.md §4.1): deterministic
/// functions over values already extracted in this pass, evaluated to a
/// fixed point. Deliberately not the Formula Compiler's language — this
/// one operates over arbitrary [`crate::value::Value`]s, not just the
/// three solver sorts.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ComputedExpr {
    Ref { variable: String },
    NumberLit { value: f64 },
    BoolLit { value: bool },

    Add { args: Vec<ComputedExpr> },
    Sum { args: Vec<ComputedExpr> },
    Sub { lhs: Box<ComputedExpr>, rhs: Box<ComputedExpr> },
    Mul { args: Vec<ComputedExpr> },
    Div { lhs: Box<ComputedExpr>, rhs: Box<ComputedExpr> },

    Gt { lhs: Box<ComputedExpr>, rhs: Box<ComputedExpr> },
    Gte { lhs: Box<ComputedExpr>, rhs: Box<ComputedExpr> },
    Lt { lhs: Box<ComputedExpr>, rhs: Box<ComputedExpr> },
    Lte { lhs: Box<ComputedExpr>, rhs: Box<ComputedExpr> },

    Not { arg: Box<ComputedExpr> },
    And { args: Vec<ComputedExpr> },
    Or { args: Vec<ComputedExpr> },
    If {
        cond: Box<ComputedExpr>,
        then: Box<ComputedExpr>,
        #[serde(rename = "else")]
        else_: Box<ComputedExpr>,
    },

    CountTrue { args: Vec<ComputedExpr> },
    CountFields { args: Vec<ComputedExpr> },
    Any { args: Vec<ComputedExpr> },
    All { args: Vec<ComputedExpr> },
}

impl ComputedExpr {
    /// Variables this expression reads, for dependency-graph construction.
    pub fn dependencies(&self, out: &mut HashSet<String>) {
        match self {
            ComputedExpr::Ref { variable } => {
                out.insert(variable.clone());
            }
            ComputedExpr::NumberLit { .. } | ComputedExpr::BoolLit { .. } => {}
            ComputedExpr::Add { args }
            | ComputedExpr::Sum { args }
            | ComputedExpr::Mul { args }
            | ComputedExpr::And { args }
            | ComputedExpr::Or { args }
            | ComputedExpr::CountTrue { args }
            | ComputedExpr::CountFields { args }
            | ComputedExpr::Any { args }
            | ComputedExpr::All { args } => {
                for arg in args {
                    arg.dependencies(out);
                }
            }
            ComputedExpr::Sub { lhs, rhs }
            | ComputedExpr::Div { lhs, rhs }
            | ComputedExpr::Gt { lhs, rhs }
            | ComputedExpr::Gte { lhs, rhs }
            | ComputedExpr::Lt { lhs, rhs }
            | ComputedExpr::Lte { lhs, rhs } => {
                lhs.dependencies(out);
                rhs.dependencies(out);
            }
            ComputedExpr::Not { arg } => arg.dependencies(out),
            ComputedExpr::If { cond, then, else_ } => {
                cond.dependencies(out);
                then.dependencies(out);
                else_.dependencies(out);
            }
        }
    }
}

impl Ontology {
    pub fn from_json(data: &str) -> Result<Self> {
        let ontology: Ontology = serde_json::from_str(data)?;
        ontology.validate()?;
        Ok(ontology)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Structural validation performed at load time (spec.md §4.4):
    /// constraint id uniqueness, extractor name uniqueness, duplicate
    /// variable declarations with conflicting sorts, acyclicity of
    /// `computed` extractor dependencies, and a dry-run compile of every
    /// constraint's formula (well-formedness + declared-variable check,
    /// without binding to any environment).
    pub fn validate(&self) -> Result<()> {
        let mut seen_constraints = HashSet::new();
        for constraint in &self.constraints {
            if !seen_constraints.insert(constraint.id.as_str()) {
                return Err(Error::LoadError {
                    name: self.name.clone(),
                    reason: format!("duplicate constraint id '{}'", constraint.id),
                });
            }
        }

        let mut seen_extractors = HashSet::new();
        for extractor in &self.extractors {
            if !seen_extractors.insert(extractor.variable()) {
                return Err(Error::LoadError {
                    name: self.name.clone(),
                    reason: format!(
                        "duplicate extractor output variable '{}'",
                        extractor.variable()
                    ),
                });
            }
        }

        self.check_declaration_conflicts()?;
        self.check_computed_acyclic()?;
        self.check_formulas_compile()?;
        Ok(())
    }

    fn check_declaration_conflicts(&self) -> Result<()> {
        let mut sorts: HashMap<&str, Sort> = HashMap::new();
        for decl in &self.variables {
            if let Some(existing) = sorts.insert(&decl.name, decl.sort) {
                if existing != decl.sort {
                    return Err(Error::LoadError {
                        name: self.name.clone(),
                        reason: format!(
                            "variable '{}' redeclared with conflicting sorts ({} vs {})",
                            decl.name, existing, decl.sort
                        ),
                    });
                }
            }
        }
        for constraint in &self.constraints {
            let mut local = sorts.clone();
            for decl in &constraint.variables {
                if let Some(existing) = local.insert(&decl.name, decl.sort) {
                    if existing != decl.sort {
                        return Err(Error::LoadError {
                            name: self.name.clone(),
                            reason: format!(
                                "constraint '{}': variable '{}' redeclared with conflicting sorts ({} vs {})",
                                constraint.id, decl.name, existing, decl.sort
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn check_computed_acyclic(&self) -> Result<()> {
        let mut deps: HashMap<&str, HashSet<String>> = HashMap::new();
        for extractor in &self.extractors {
            if let ExtractorSpec::Computed { variable, expression } = extractor {
                let mut d = HashSet::new();
                expression.dependencies(&mut d);
                deps.insert(variable, d);
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: HashMap<&str, Mark> = HashMap::new();

        fn visit<'a>(
            name: &'a str,
            deps: &'a HashMap<&'a str, HashSet<String>>,
            marks: &mut HashMap<&'a str, Mark>,
            ontology_name: &str,
        ) -> Result<()> {
            match marks.get(name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(Error::LoadError {
                        name: ontology_name.to_string(),
                        reason: format!("cycle detected among computed extractors at '{name}'"),
                    })
                }
                None => {}
            }
            marks.insert(name, Mark::Visiting);
            if let Some(children) = deps.get(name) {
                for child in children {
                    if deps.contains_key(child.as_str()) {
                        visit(child, deps, marks, ontology_name)?;
                    }
                }
            }
            marks.insert(name, Mark::Done);
            Ok(())
        }

        for name in deps.keys().copied() {
            visit(name, &deps, &mut marks, &self.name)?;
        }
        Ok(())
    }

    /// Dry-run compile every constraint's formula against its merged
    /// declarations, without binding to any environment (spec.md §4.4).
    /// This is the load-time enforcement of "every name referenced in a
    /// constraint's formula must appear exactly once in that constraint's
    /// variable declarations" and of the Formula Compiler's own
    /// well-formedness rules (arity, sort compatibility, `ite` branch
    /// agreement).
    fn check_formulas_compile(&self) -> Result<()> {
        let config = z3::Config::new();
        let context = z3::Context::new(&config);
        for constraint in &self.constraints {
            let declarations = crate::formula::merge_declarations(&self.variables, &constraint.variables);
            if let Err(err) = crate::formula::compile(&context, &constraint.formula, &declarations) {
                return Err(Error::LoadError {
                    name: self.name.clone(),
                    reason: format!("constraint '{}' failed to compile: {}", constraint.id, err),
                });
            }
        }
        Ok(())
    }

    pub fn variable_decl(&self, name: &str) -> Option<&VariableDecl> {
        self.variables.iter().find(|v| v.name == name)
    }
}
