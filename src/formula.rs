//! The Formula Compiler — translates an ontology [`Formula`] tree into a
//! z3 boolean-sort AST, checking arity and sort well-formedness as it
//! goes (spec.md §4.2). Grounded on the `formula_to_z3` recursive
//! converter pattern from the SMT-verification reference (dynamic
//! dispatch over `ast::Dynamic`, `as_int`/`as_real` sort probing,
//! `Bool::and`/`Bool::or` for n-ary connectives) but reworked as a
//! tagged-variant exhaustive match per spec.md §9's design note, with
//! well-formedness errors collected instead of panicking.

use crate::ontology::{Formula, VariableDecl};
use crate::value::Sort;
use std::collections::{HashMap, HashSet};
use z3::ast::{self, Ast, Bool, Int, Real};
use z3::Context;

/// A well-formedness failure. Never a hard `Err` from [`crate::verify`] —
/// the caller attributes this to the offending constraint as a
/// `compile_error` entry in the report.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("undeclared variable '{0}'")]
    UndeclaredVariable(String),
    #[error("'{op}' expects {expected} sort, got {actual} for '{context}'")]
    SortMismatch {
        op: String,
        expected: String,
        actual: String,
        context: String,
    },
    #[error("'{op}' requires at least one argument")]
    EmptyArgs { op: String },
    #[error("'ite' branches have mismatched sorts: then={then} else={else_}")]
    IteBranchMismatch { then: String, else_: String },
}

type CResult<T> = std::result::Result<T, CompileError>;

/// A compiled formula: the z3 boolean AST plus the set of free variable
/// names it actually references (used by the verifier to decide which
/// pinned-equality constraints to assert).
pub struct CompiledFormula<'ctx> {
    pub ast: Bool<'ctx>,
    pub free_vars: HashSet<String>,
}

/// Dynamic, sort-tagged intermediate value produced while walking the
/// tree — distinct from [`z3::ast::Dynamic`] in that we track *our*
/// declared sort alongside the concrete z3 AST, so sort errors can name
/// the ontology sort rather than z3's internal sort name.
enum Typed<'ctx> {
    Bool(Bool<'ctx>),
    Int(Int<'ctx>),
    Real(Real<'ctx>),
}

impl<'ctx> Typed<'ctx> {
    fn sort_name(&self) -> &'static str {
        match self {
            Typed::Bool(_) => "bool",
            Typed::Int(_) => "int",
            Typed::Real(_) => "real",
        }
    }

    fn as_bool(&self, context: &str) -> CResult<&Bool<'ctx>> {
        match self {
            Typed::Bool(b) => Ok(b),
            other => Err(CompileError::SortMismatch {
                op: context.to_string(),
                expected: "bool".into(),
                actual: other.sort_name().into(),
                context: context.to_string(),
            }),
        }
    }

    /// Promote to real if needed so mixed int/real arithmetic and
    /// comparisons type-check, per spec.md §4.2 ("mixed-sort arithmetic
    /// promotes to real").
    fn as_real(&self, ctx: &'ctx Context) -> Option<Real<'ctx>> {
        match self {
            Typed::Real(r) => Some(r.clone()),
            Typed::Int(i) => Some(ast::Int::to_real(i)),
            Typed::Bool(_) => None,
            #[allow(unreachable_patterns)]
            _ => None,
        }
        .map(|r| {
            let _ = ctx;
            r
        })
    }

    fn as_int(&self) -> Option<Int<'ctx>> {
        match self {
            Typed::Int(i) => Some(i.clone()),
            _ => None,
        }
    }
}

/// Compile a formula tree against the variable declarations visible to
/// its owning constraint (ontology-level declarations merged with
/// constraint-level ones, constraint-level taking precedence).
pub fn compile<'ctx>(
    context: &'ctx Context,
    formula: &Formula,
    declarations: &HashMap<String, Sort>,
) -> CResult<CompiledFormula<'ctx>> {
    let mut consts: HashMap<String, Typed<'ctx>> = HashMap::new();
    let mut free_vars = HashSet::new();
    let typed = compile_node(context, formula, declarations, &mut consts, &mut free_vars)?;
    let ast = typed.as_bool("formula root")?.clone();
    Ok(CompiledFormula { ast, free_vars })
}

fn declare<'ctx>(
    context: &'ctx Context,
    name: &str,
    sort: Sort,
    consts: &mut HashMap<String, Typed<'ctx>>,
) -> Typed<'ctx> {
    if let Some(existing) = consts.get(name) {
        return clone_typed(existing);
    }
    let typed = match sort {
        Sort::Bool => Typed::Bool(Bool::new_const(context, name)),
        Sort::Int => Typed::Int(Int::new_const(context, name)),
        Sort::Real => Typed::Real(Real::new_const(context, name)),
    };
    consts.insert(name.to_string(), clone_typed(&typed));
    typed
}

fn clone_typed<'ctx>(t: &Typed<'ctx>) -> Typed<'ctx> {
    match t {
        Typed::Bool(b) => Typed::Bool(b.clone()),
        Typed::Int(i) => Typed::Int(i.clone()),
        Typed::Real(r) => Typed::Real(r.clone()),
    }
}

fn compile_node<'ctx>(
    context: &'ctx Context,
    formula: &Formula,
    declarations: &HashMap<String, Sort>,
    consts: &mut HashMap<String, Typed<'ctx>>,
    free_vars: &mut HashSet<String>,
) -> CResult<Typed<'ctx>> {
    match formula {
        Formula::BoolLit { value } => Ok(Typed::Bool(Bool::from_bool(context, *value))),
        Formula::IntLit { value } => Ok(Typed::Int(Int::from_i64(context, *value))),
        Formula::RealLit { value } => Ok(Typed::Real(real_from_f64(context, *value))),

        Formula::Var { name } => {
            let sort = declarations
                .get(name)
                .copied()
                .ok_or_else(|| CompileError::UndeclaredVariable(name.clone()))?;
            free_vars.insert(name.clone());
            Ok(declare(context, name, sort, consts))
        }

        Formula::Not { arg } => {
            let inner = compile_node(context, arg, declarations, consts, free_vars)?;
            Ok(Typed::Bool(inner.as_bool("not")?.not()))
        }

        Formula::And { args } => {
            let parts = compile_bool_list(context, args, declarations, consts, free_vars, "and")?;
            if parts.is_empty() {
                return Err(CompileError::EmptyArgs { op: "and".into() });
            }
            let refs: Vec<&Bool> = parts.iter().collect();
            Ok(Typed::Bool(Bool::and(context, &refs)))
        }

        Formula::Or { args } => {
            let parts = compile_bool_list(context, args, declarations, consts, free_vars, "or")?;
            if parts.is_empty() {
                return Err(CompileError::EmptyArgs { op: "or".into() });
            }
            let refs: Vec<&Bool> = parts.iter().collect();
            Ok(Typed::Bool(Bool::or(context, &refs)))
        }

        Formula::Implies { lhs, rhs } => {
            let l = compile_node(context, lhs, declarations, consts, free_vars)?;
            let r = compile_node(context, rhs, declarations, consts, free_vars)?;
            Ok(Typed::Bool(l.as_bool("implies.lhs")?.implies(r.as_bool("implies.rhs")?)))
        }

        Formula::Ite { cond, then, else_ } => {
            let c = compile_node(context, cond, declarations, consts, free_vars)?;
            let t = compile_node(context, then, declarations, consts, free_vars)?;
            let e = compile_node(context, else_, declarations, consts, free_vars)?;
            let cond_bool = c.as_bool("ite.cond")?;
            // spec.md §4.2: "ite branches of equal sort" is a dedicated
            // well-formedness rule, distinct from arithmetic's "mixed-sort
            // promotes to Real" — an Int/Real pairing here is a compile
            // error, not an implicit promotion.
            match (&t, &e) {
                (Typed::Bool(tb), Typed::Bool(eb)) => Ok(Typed::Bool(cond_bool.ite(tb, eb))),
                (Typed::Int(ti), Typed::Int(ei)) => Ok(Typed::Int(cond_bool.ite(ti, ei))),
                (Typed::Real(tr), Typed::Real(er)) => Ok(Typed::Real(cond_bool.ite(tr, er))),
                _ => Err(CompileError::IteBranchMismatch {
                    then: t.sort_name().into(),
                    else_: e.sort_name().into(),
                }),
            }
        }

        Formula::Eq { lhs, rhs } => compile_equality(context, lhs, rhs, declarations, consts, free_vars, "eq", false),
        Formula::Ne { lhs, rhs } => compile_equality(context, lhs, rhs, declarations, consts, free_vars, "ne", true),
        Formula::Lt { lhs, rhs } => compile_comparison(context, lhs, rhs, declarations, consts, free_vars, "lt", |a, b| a.lt(b), |a, b| a.lt(b)),
        Formula::Le { lhs, rhs } => compile_comparison(context, lhs, rhs, declarations, consts, free_vars, "le", |a, b| a.le(b), |a, b| a.le(b)),
        Formula::Gt { lhs, rhs } => compile_comparison(context, lhs, rhs, declarations, consts, free_vars, "gt", |a, b| a.gt(b), |a, b| a.gt(b)),
        Formula::Ge { lhs, rhs } => compile_comparison(context, lhs, rhs, declarations, consts, free_vars, "ge", |a, b| a.ge(b), |a, b| a.ge(b)),

        Formula::Add { args } => {
            compile_arith_list(context, args, declarations, consts, free_vars, "add")
        }
        Formula::Mul { args } => {
            compile_mul_list(context, args, declarations, consts, free_vars, "mul")
        }
        Formula::Min { args } => {
            compile_minmax_list(context, args, declarations, consts, free_vars, "min", true)
        }
        Formula::Max { args } => {
            compile_minmax_list(context, args, declarations, consts, free_vars, "max", false)
        }
        Formula::Sub { lhs, rhs } => compile_arith_pair(context, lhs, rhs, declarations, consts, free_vars, "sub", |a, b| a - b, |a, b| a - b),
        Formula::Div { lhs, rhs } => {
            let l = compile_node(context, lhs, declarations, consts, free_vars)?;
            let r = compile_node(context, rhs, declarations, consts, free_vars)?;
            match (&l, &r) {
                (Typed::Int(li), Typed::Int(ri)) => Ok(Typed::Int(li.div(ri))),
                _ => {
                    let lr = l.as_real(context).ok_or_else(|| sort_err("div", "numeric", l.sort_name()))?;
                    let rr = r.as_real(context).ok_or_else(|| sort_err("div", "numeric", r.sort_name()))?;
                    Ok(Typed::Real(lr / rr))
                }
            }
        }
    }
}

fn sort_err(op: &str, expected: &str, actual: &str) -> CompileError {
    CompileError::SortMismatch {
        op: op.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
        context: op.to_string(),
    }
}

fn real_from_f64<'ctx>(context: &'ctx Context, value: f64) -> Real<'ctx> {
    // z3's `Real::from_real` only takes i32 numerator/denominator, which
    // overflows for money-sized literals (e.g. a $1.5m loan cap scaled by
    // 1e6). Building the scaled numerator as an `Int` (i64-native) and
    // converting to `Real` keeps six decimal digits of precision without
    // that overflow.
    let scaled = (value * 1_000_000.0).round() as i64;
    let numerator = ast::Int::to_real(&Int::from_i64(context, scaled));
    let denominator = ast::Int::to_real(&Int::from_i64(context, 1_000_000));
    numerator / denominator
}

#[allow(clippy::too_many_arguments)]
fn compile_comparison<'ctx>(
    context: &'ctx Context,
    lhs: &Formula,
    rhs: &Formula,
    declarations: &HashMap<String, Sort>,
    consts: &mut HashMap<String, Typed<'ctx>>,
    free_vars: &mut HashSet<String>,
    op: &str,
    int_cmp: impl Fn(&Int<'ctx>, &Int<'ctx>) -> Bool<'ctx>,
    real_cmp: impl Fn(&Real<'ctx>, &Real<'ctx>) -> Bool<'ctx>,
) -> CResult<Typed<'ctx>> {
    let l = compile_node(context, lhs, declarations, consts, free_vars)?;
    let r = compile_node(context, rhs, declarations, consts, free_vars)?;
    if let (Some(li), Some(ri)) = (l.as_int(), r.as_int()) {
        return Ok(Typed::Bool(int_cmp(&li, &ri)));
    }
    let lr = l.as_real(context).ok_or_else(|| sort_err(op, "numeric", l.sort_name()))?;
    let rr = r.as_real(context).ok_or_else(|| sort_err(op, "numeric", r.sort_name()))?;
    Ok(Typed::Bool(real_cmp(&lr, &rr)))
}

/// `==`/`!=`, which unlike the ordering comparisons also accept a pair of
/// Boolean operands directly (spec.md §4.2: "Boolean `==` / `!=` are
/// allowed") rather than routing through `as_int`/`as_real`, which has no
/// coercion from `Bool` and would otherwise reject every boolean equality
/// check as a sort mismatch.
fn compile_equality<'ctx>(
    context: &'ctx Context,
    lhs: &Formula,
    rhs: &Formula,
    declarations: &HashMap<String, Sort>,
    consts: &mut HashMap<String, Typed<'ctx>>,
    free_vars: &mut HashSet<String>,
    op: &str,
    negate: bool,
) -> CResult<Typed<'ctx>> {
    let l = compile_node(context, lhs, declarations, consts, free_vars)?;
    let r = compile_node(context, rhs, declarations, consts, free_vars)?;
    let eq = match (&l, &r) {
        (Typed::Bool(a), Typed::Bool(b)) => a._eq(b),
        _ => match (l.as_int(), r.as_int()) {
            (Some(li), Some(ri)) => li._eq(&ri),
            _ => {
                let lr = l.as_real(context).ok_or_else(|| sort_err(op, "numeric or bool", l.sort_name()))?;
                let rr = r.as_real(context).ok_or_else(|| sort_err(op, "numeric or bool", r.sort_name()))?;
                lr._eq(&rr)
            }
        },
    };
    Ok(Typed::Bool(if negate { eq.not() } else { eq }))
}

fn compile_bool_list<'ctx>(
    context: &'ctx Context,
    args: &[Formula],
    declarations: &HashMap<String, Sort>,
    consts: &mut HashMap<String, Typed<'ctx>>,
    free_vars: &mut HashSet<String>,
    op: &str,
) -> CResult<Vec<Bool<'ctx>>> {
    args.iter()
        .map(|f| {
            let t = compile_node(context, f, declarations, consts, free_vars)?;
            Ok(t.as_bool(op)?.clone())
        })
        .collect()
}

fn compile_arith_list<'ctx>(
    context: &'ctx Context,
    args: &[Formula],
    declarations: &HashMap<String, Sort>,
    consts: &mut HashMap<String, Typed<'ctx>>,
    free_vars: &mut HashSet<String>,
    op: &str,
) -> CResult<Typed<'ctx>> {
    if args.is_empty() {
        return Err(CompileError::EmptyArgs { op: op.to_string() });
    }
    let mut acc = compile_node(context, &args[0], declarations, consts, free_vars)?;
    for rest in &args[1..] {
        let next = compile_node(context, rest, declarations, consts, free_vars)?;
        acc = match (&acc, &next) {
            (Typed::Int(a), Typed::Int(b)) => Typed::Int(a + b),
            _ => {
                let ar = acc.as_real(context).ok_or_else(|| sort_err(op, "numeric", acc.sort_name()))?;
                let br = next.as_real(context).ok_or_else(|| sort_err(op, "numeric", next.sort_name()))?;
                Typed::Real(ar + br)
            }
        };
    }
    Ok(acc)
}

fn compile_mul_list<'ctx>(
    context: &'ctx Context,
    args: &[Formula],
    declarations: &HashMap<String, Sort>,
    consts: &mut HashMap<String, Typed<'ctx>>,
    free_vars: &mut HashSet<String>,
    op: &str,
) -> CResult<Typed<'ctx>> {
    if args.is_empty() {
        return Err(CompileError::EmptyArgs { op: op.to_string() });
    }
    let mut acc = compile_node(context, &args[0], declarations, consts, free_vars)?;
    for rest in &args[1..] {
        let next = compile_node(context, rest, declarations, consts, free_vars)?;
        acc = match (&acc, &next) {
            (Typed::Int(a), Typed::Int(b)) => Typed::Int(a * b),
            _ => {
                let ar = acc.as_real(context).ok_or_else(|| sort_err(op, "numeric", acc.sort_name()))?;
                let br = next.as_real(context).ok_or_else(|| sort_err(op, "numeric", next.sort_name()))?;
                Typed::Real(ar * br)
            }
        };
    }
    Ok(acc)
}

/// `min`/`max` are not primitive z3 operators; each pairwise reduction is
/// `ite(a <op> b, a, b)` folded left to right, per spec.md §4.2's
/// inclusion of `min`/`max` in the arithmetic operator family.
#[allow(clippy::too_many_arguments)]
fn compile_minmax_list<'ctx>(
    context: &'ctx Context,
    args: &[Formula],
    declarations: &HashMap<String, Sort>,
    consts: &mut HashMap<String, Typed<'ctx>>,
    free_vars: &mut HashSet<String>,
    op: &str,
    want_min: bool,
) -> CResult<Typed<'ctx>> {
    if args.is_empty() {
        return Err(CompileError::EmptyArgs { op: op.to_string() });
    }
    let mut acc = compile_node(context, &args[0], declarations, consts, free_vars)?;
    for rest in &args[1..] {
        let next = compile_node(context, rest, declarations, consts, free_vars)?;
        acc = match (&acc, &next) {
            (Typed::Int(a), Typed::Int(b)) => {
                let cmp = if want_min { a.le(b) } else { a.ge(b) };
                Typed::Int(cmp.ite(a, b))
            }
            _ => {
                let ar = acc.as_real(context).ok_or_else(|| sort_err(op, "numeric", acc.sort_name()))?;
                let br = next.as_real(context).ok_or_else(|| sort_err(op, "numeric", next.sort_name()))?;
                let cmp = if want_min { ar.le(&br) } else { ar.ge(&br) };
                Typed::Real(cmp.ite(&ar, &br))
            }
        };
    }
    Ok(acc)
}

#[allow(clippy::too_many_arguments)]
fn compile_arith_pair<'ctx>(
    context: &'ctx Context,
    lhs: &Formula,
    rhs: &Formula,
    declarations: &HashMap<String, Sort>,
    consts: &mut HashMap<String, Typed<'ctx>>,
    free_vars: &mut HashSet<String>,
    op: &str,
    int_op: impl Fn(&Int<'ctx>, &Int<'ctx>) -> Int<'ctx>,
    real_op: impl Fn(&Real<'ctx>, &Real<'ctx>) -> Real<'ctx>,
) -> CResult<Typed<'ctx>> {
    let l = compile_node(context, lhs, declarations, consts, free_vars)?;
    let r = compile_node(context, rhs, declarations, consts, free_vars)?;
    if let (Some(li), Some(ri)) = (l.as_int(), r.as_int()) {
        return Ok(Typed::Int(int_op(&li, &ri)));
    }
    let lr = l.as_real(context).ok_or_else(|| sort_err(op, "numeric", l.sort_name()))?;
    let rr = r.as_real(context).ok_or_else(|| sort_err(op, "numeric", r.sort_name()))?;
    Ok(Typed::Real(real_op(&lr, &rr)))
}

/// Merge ontology-level and constraint-level declarations, constraint
/// declarations taking precedence for shadowing (both must already have
/// agreed on sort — the loader rejects conflicts before this runs).
pub fn merge_declarations(
    ontology_vars: &[VariableDecl],
    constraint_vars: &[VariableDecl],
) -> HashMap<String, Sort> {
    let mut map = HashMap::new();
    for decl in ontology_vars {
        map.insert(decl.name.clone(), decl.sort);
    }
    for decl in constraint_vars {
        map.insert(decl.name.clone(), decl.sort);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use z3::Config;

    fn decls(pairs: &[(&str, Sort)]) -> HashMap<String, Sort> {
        pairs.iter().map(|(n, s)| (n.to_string(), *s)).collect()
    }

    #[test]
    fn compiles_implication_over_gt() {
        let config = Config::new();
        let context = Context::new(&config);
        let formula = Formula::Implies {
            lhs: Box::new(Formula::Gt {
                lhs: Box::new(Formula::Var { name: "x".into() }),
                rhs: Box::new(Formula::IntLit { value: 0 }),
            }),
            rhs: Box::new(Formula::Gt {
                lhs: Box::new(Formula::Add {
                    args: vec![
                        Formula::Var { name: "x".into() },
                        Formula::IntLit { value: 1 },
                    ],
                }),
                rhs: Box::new(Formula::IntLit { value: 0 }),
            }),
        };
        let declarations = decls(&[("x", Sort::Int)]);
        let compiled = compile(&context, &formula, &declarations).expect("compiles");
        assert!(compiled.free_vars.contains("x"));
    }

    #[test]
    fn rejects_undeclared_variable() {
        let config = Config::new();
        let context = Context::new(&config);
        let formula = Formula::Var { name: "missing".into() };
        let declarations = decls(&[]);
        let err = compile(&context, &formula, &declarations).unwrap_err();
        assert!(matches!(err, CompileError::UndeclaredVariable(_)));
    }

    #[test]
    fn rejects_empty_and() {
        let config = Config::new();
        let context = Context::new(&config);
        let formula = Formula::And { args: vec![] };
        let declarations = decls(&[]);
        let err = compile(&context, &formula, &declarations).unwrap_err();
        assert!(matches!(err, CompileError::EmptyArgs { .. }));
    }

    #[test]
    fn compiles_min_over_mixed_sorts() {
        let config = Config::new();
        let context = Context::new(&config);
        let formula = Formula::Le {
            lhs: Box::new(Formula::Min {
                args: vec![
                    Formula::Var { name: "x".into() },
                    Formula::RealLit { value: 2.5 },
                ],
            }),
            rhs: Box::new(Formula::RealLit { value: 10.0 }),
        };
        let declarations = decls(&[("x", Sort::Int)]);
        let compiled = compile(&context, &formula, &declarations).expect("compiles");
        assert!(compiled.free_vars.contains("x"));
    }

    #[test]
    fn mixed_sort_comparison_promotes_to_real() {
        let config = Config::new();
        let context = Context::new(&config);
        let formula = Formula::Gt {
            lhs: Box::new(Formula::Var { name: "price".into() }),
            rhs: Box::new(Formula::IntLit { value: 10 }),
        };
        let declarations = decls(&[("price", Sort::Real)]);
        let compiled = compile(&context, &formula, &declarations).expect("compiles");
        assert!(compiled.free_vars.contains("price"));
    }

    #[test]
    fn boolean_equality_compiles_without_routing_through_numeric_sorts() {
        let config = Config::new();
        let context = Context::new(&config);
        let formula = Formula::Eq {
            lhs: Box::new(Formula::Var { name: "is_denial".into() }),
            rhs: Box::new(Formula::BoolLit { value: true }),
        };
        let declarations = decls(&[("is_denial", Sort::Bool)]);
        compile(&context, &formula, &declarations).expect("bool == bool compiles");
    }

    #[test]
    fn boolean_inequality_compiles() {
        let config = Config::new();
        let context = Context::new(&config);
        let formula = Formula::Ne {
            lhs: Box::new(Formula::Var { name: "flag".into() }),
            rhs: Box::new(Formula::BoolLit { value: false }),
        };
        let declarations = decls(&[("flag", Sort::Bool)]);
        compile(&context, &formula, &declarations).expect("bool != bool compiles");
    }

    #[test]
    fn ite_rejects_mismatched_int_and_real_branches() {
        let config = Config::new();
        let context = Context::new(&config);
        let formula = Formula::Ite {
            cond: Box::new(Formula::BoolLit { value: true }),
            then: Box::new(Formula::IntLit { value: 1 }),
            else_: Box::new(Formula::RealLit { value: 1.0 }),
        };
        let declarations = decls(&[]);
        let err = compile(&context, &formula, &declarations).unwrap_err();
        assert!(matches!(err, CompileError::IteBranchMismatch { .. }));
    }

    #[test]
    fn ite_accepts_matching_real_branches() {
        let config = Config::new();
        let context = Context::new(&config);
        let formula = Formula::Ite {
            cond: Box::new(Formula::BoolLit { value: true }),
            then: Box::new(Formula::RealLit { value: 1.5 }),
            else_: Box::new(Formula::RealLit { value: 2.5 }),
        };
        let declarations = decls(&[]);
        compile(&context, &formula, &declarations).expect("matching real branches compile");
    }
}
