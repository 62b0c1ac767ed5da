//! Property-based tests for the Formula Compiler's algebraic laws
//! (spec.md §8, Round-trip / algebraic laws 6-8).

use ontoverify::{Formula, Sort};
use proptest::prelude::*;
use std::collections::HashMap;
use z3::ast::Ast;
use z3::{Config, Context, SatResult, Solver};

/// Two formulas are equivalent when `a <=> b` is valid, i.e. its
/// negation is unsatisfiable, under the shared declarations.
fn equivalent(a: &Formula, b: &Formula, declarations: &HashMap<String, Sort>) -> bool {
    let config = Config::new();
    let context = Context::new(&config);
    let ca = ontoverify::compile(&context, a, declarations).expect("a compiles");
    let cb = ontoverify::compile(&context, b, declarations).expect("b compiles");
    let solver = Solver::new(&context);
    solver.assert(&ca.ast.iff(&cb.ast).not());
    matches!(solver.check(), SatResult::Unsat)
}

fn bool_decls() -> HashMap<String, Sort> {
    [("a".to_string(), Sort::Bool), ("b".to_string(), Sort::Bool)]
        .into_iter()
        .collect()
}

fn var(name: &str) -> Formula {
    Formula::Var { name: name.into() }
}

proptest! {
    /// Law 6: `and([phi]) ≡ or([phi]) ≡ phi` for any single-element formula.
    #[test]
    fn and_or_of_one_is_identity(value in any::<bool>()) {
        let phi = Formula::BoolLit { value };
        let declarations = HashMap::new();

        let anded = Formula::And { args: vec![phi.clone()] };
        let ored = Formula::Or { args: vec![phi.clone()] };

        prop_assert!(equivalent(&anded, &phi, &declarations));
        prop_assert!(equivalent(&ored, &phi, &declarations));
    }

    /// Law 7: `implies(a, b) ≡ or(not(a), b)`.
    #[test]
    fn implies_is_or_not_lhs_rhs(_seed in 0..4u8) {
        let declarations = bool_decls();
        let implies = Formula::Implies {
            lhs: Box::new(var("a")),
            rhs: Box::new(var("b")),
        };
        let desugared = Formula::Or {
            args: vec![Formula::Not { arg: Box::new(var("a")) }, var("b")],
        };
        prop_assert!(equivalent(&implies, &desugared, &declarations));
    }

    /// Law 8: `ite(true, x, y) ≡ x`; `ite(false, x, y) ≡ y`, for boolean
    /// branches (the `ite` branches z3 lets us directly iff-compare).
    #[test]
    fn ite_on_a_literal_condition_picks_the_matching_branch(x in any::<bool>(), y in any::<bool>()) {
        let declarations = HashMap::new();
        let then = Formula::BoolLit { value: x };
        let else_ = Formula::BoolLit { value: y };

        let ite_true = Formula::Ite {
            cond: Box::new(Formula::BoolLit { value: true }),
            then: Box::new(then.clone()),
            else_: Box::new(else_.clone()),
        };
        let ite_false = Formula::Ite {
            cond: Box::new(Formula::BoolLit { value: false }),
            then: Box::new(then.clone()),
            else_: Box::new(else_.clone()),
        };

        prop_assert!(equivalent(&ite_true, &then, &declarations));
        prop_assert!(equivalent(&ite_false, &else_, &declarations));
    }
}
