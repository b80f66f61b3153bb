//! Standardized expression → minimized DNF.
//!
//! Expressions that are already an OR of AND-ed literals once negations are
//! pushed down (`in`, `ids`, `not and`, plain conjunctions) are read off
//! directly. Everything else goes through a truth table: every leaf
//! occurrence is a column, the table is enumerated and handed to
//! [`minimize`]. That costs `2^n` in the number of leaves, so the column count
//! is capped by [`CanonicalLimits::max_conditions`] (never above
//! [`MAX_CONDITIONS_CEILING`]).

use core_types::config::{EngineSection, MAX_CONDITIONS_CEILING};

use crate::error::DslError;
use crate::expr::{Dnf, Expr, Literal, Predicate};
use crate::minimize::{MAX_VARIABLES, minimize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalLimits {
    /// Leaf occurrences allowed on the truth-table path.
    pub max_conditions: usize,
    /// Maximum AND-clauses in a result, `0` for no limit.
    pub max_min_terms: usize,
}

impl Default for CanonicalLimits {
    fn default() -> Self {
        Self::from(&EngineSection::default())
    }
}

impl From<&EngineSection> for CanonicalLimits {
    fn from(section: &EngineSection) -> Self {
        Self {
            max_conditions: section.max_conditions,
            max_min_terms: section.max_min_terms,
        }
    }
}

impl CanonicalLimits {
    fn table_width(&self) -> usize {
        self.max_conditions.min(MAX_CONDITIONS_CEILING).min(MAX_VARIABLES)
    }
}

pub fn canonicalize(expr: &Expr, limits: &CanonicalLimits) -> Result<Dnf, DslError> {
    let dnf = match flat_clauses(expr) {
        Some(dnf) => dnf,
        None => {
            let mut leaves = Vec::new();
            let node = Node::compile(expr, &mut leaves);
            if leaves.len() > limits.table_width() {
                return Err(DslError::TooComplex(format!(
                    "{} conditions exceed the limit of {} for non-flat filters",
                    leaves.len(),
                    limits.table_width()
                )));
            }
            from_truth_table(&node, &leaves)?
        }
    };

    if limits.max_min_terms > 0 && dnf.clauses().len() > limits.max_min_terms {
        return Err(DslError::TooComplex(format!(
            "{} AND-clauses exceed the limit of {}",
            dnf.clauses().len(),
            limits.max_min_terms
        )));
    }
    Ok(dnf)
}

/// Expression tree with leaves replaced by their column index.
enum Node {
    Const(bool),
    Var(u32),
    Not(Box<Node>),
    And(Vec<Node>),
    Or(Vec<Node>),
}

impl Node {
    fn compile<'e>(expr: &'e Expr, leaves: &mut Vec<&'e Predicate>) -> Self {
        match expr {
            Expr::Everything => Self::Const(true),
            Expr::Leaf(p) => {
                leaves.push(p);
                Self::Var((leaves.len() - 1) as u32)
            }
            Expr::Not(inner) => Self::Not(Box::new(Self::compile(inner, leaves))),
            Expr::And(items) => Self::And(items.iter().map(|e| Self::compile(e, leaves)).collect()),
            Expr::Or(items) => Self::Or(items.iter().map(|e| Self::compile(e, leaves)).collect()),
        }
    }

    fn eval(&self, row: u32) -> bool {
        match self {
            Self::Const(b) => *b,
            Self::Var(i) => row >> i & 1 == 1,
            Self::Not(inner) => !inner.eval(row),
            Self::And(items) => items.iter().all(|n| n.eval(row)),
            Self::Or(items) => items.iter().any(|n| n.eval(row)),
        }
    }
}

fn from_truth_table(node: &Node, leaves: &[&Predicate]) -> Result<Dnf, DslError> {
    let vars = leaves.len();
    let minterms: Vec<u32> = (0..1u32 << vars).filter(|&row| node.eval(row)).collect();
    let terms = minimize(vars, &minterms)?;

    let clauses = terms
        .into_iter()
        .map(|term| {
            (0..vars)
                .filter(|&i| term.mask >> i & 1 == 0)
                .map(|i| Literal::new(leaves[i].clone(), term.bits >> i & 1 == 0))
                .collect()
        })
        .collect();
    Ok(Dnf::from_clauses(clauses))
}

/// Negation normal form with constants.
enum Nnf<'e> {
    True,
    False,
    Lit(&'e Predicate, bool),
    And(Vec<Nnf<'e>>),
    Or(Vec<Nnf<'e>>),
}

fn nnf(expr: &Expr, negated: bool) -> Nnf<'_> {
    match expr {
        Expr::Everything if negated => Nnf::False,
        Expr::Everything => Nnf::True,
        Expr::Leaf(p) => Nnf::Lit(p, negated),
        Expr::Not(inner) => nnf(inner, !negated),
        Expr::And(items) => group(items, negated, !negated),
        Expr::Or(items) => group(items, negated, negated),
    }
}

/// Builds a flattened group; `conjunction` tells which operator the group
/// ends up with after pushing the negation through.
fn group(items: &[Expr], negated: bool, conjunction: bool) -> Nnf<'_> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match (nnf(item, negated), conjunction) {
            (Nnf::True, true) | (Nnf::False, false) => {}
            (Nnf::False, true) => return Nnf::False,
            (Nnf::True, false) => return Nnf::True,
            (Nnf::And(inner), true) | (Nnf::Or(inner), false) => out.extend(inner),
            (other, _) => out.push(other),
        }
    }
    match (out.len(), conjunction) {
        (0, true) => Nnf::True,
        (0, false) => Nnf::False,
        (1, _) => out.pop().unwrap_or(Nnf::True),
        (_, true) => Nnf::And(out),
        (_, false) => Nnf::Or(out),
    }
}

/// `None` unless the expression is a disjunction of literal conjunctions.
/// Each occurrence would get its own truth-table column, so minimizing such
/// an expression could not merge anything beyond what [`Dnf::from_clauses`]
/// already drops.
fn flat_clauses(expr: &Expr) -> Option<Dnf> {
    fn clause(node: Nnf<'_>) -> Option<Vec<Literal>> {
        match node {
            Nnf::Lit(p, negated) => Some(vec![Literal::new(p.clone(), negated)]),
            Nnf::And(items) => items
                .into_iter()
                .map(|n| match n {
                    Nnf::Lit(p, negated) => Some(Literal::new(p.clone(), negated)),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    match nnf(expr, false) {
        Nnf::True => Some(Dnf::everything()),
        Nnf::False => Some(Dnf::nothing()),
        Nnf::Or(items) => items
            .into_iter()
            .map(clause)
            .collect::<Option<Vec<_>>>()
            .map(Dnf::from_clauses),
        other => clause(other).map(|c| Dnf::from_clauses(vec![c])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::FlatDocument;
    use crate::standardize::standardize;
    use proptest::prelude::*;
    use serde_json::{Value, json};

    fn canon(raw: Value) -> Dnf {
        canonicalize(&standardize(&raw).unwrap(), &CanonicalLimits::default()).unwrap()
    }

    #[test]
    fn in_and_or_of_equals_agree() {
        let a = canon(json!({"in": {"a": ["x", "y"]}}));
        let b = canon(json!({"or": [{"equals": {"a": "x"}}, {"equals": {"a": "y"}}]}));
        assert_eq!(a, b);
        assert_eq!(a.clauses().len(), 2);
    }

    #[test]
    fn tautology_becomes_everything() {
        let dnf = canon(json!({"or": [{"exists": "a"}, {}]}));
        assert!(dnf.is_everything());
        let dnf = canon(json!({"or": [
            {"and": [{"exists": "a"}, {"exists": "b"}]},
            {"and": [{"exists": "a"}, {"missing": "b"}]}
        ]}));
        // `b` and `!b` sit in separate clauses and are not merged
        assert_eq!(dnf.clauses().len(), 2);
        assert!(canon(json!({})).is_everything());
    }

    #[test]
    fn contradiction_becomes_nothing() {
        let dnf = canon(json!({"and": [{"exists": "a"}, {"missing": "a"}]}));
        assert!(dnf.is_nothing());
        assert!(canon(json!({"not": {}})).is_nothing());
    }

    #[test]
    fn repeated_leaf_is_merged() {
        let dnf = canon(json!({"and": [{"exists": "a"}, {"exists": "a"}]}));
        assert_eq!(dnf.clauses().len(), 1);
        assert_eq!(dnf.clauses()[0].len(), 1);
    }

    #[test]
    fn de_morgan_is_applied() {
        let dnf = canon(json!({"not": {"and": [{"exists": "a"}, {"exists": "b"}]}}));
        assert_eq!(dnf.clauses().len(), 2);
        assert!(dnf.clauses().iter().all(|c| c.len() == 1 && c[0].negated));
    }

    #[test]
    fn everything_inside_and_is_neutral() {
        let dnf = canon(json!({"and": [{}, {"exists": "a"}]}));
        assert_eq!(dnf, canon(json!({"exists": "a"})));
    }

    #[test]
    fn long_flat_lists_bypass_the_truth_table() {
        let values: Vec<String> = (0..100).map(|i| format!("v{i}")).collect();
        let dnf = canon(json!({"in": {"a": values}}));
        assert_eq!(dnf.clauses().len(), 100);
        let dnf = canon(json!({"not": {"in": {"a": values}}}));
        assert_eq!(dnf.clauses().len(), 1);
        assert_eq!(dnf.clauses()[0].len(), 100);
    }

    #[test]
    fn flat_filters_at_the_table_width_skip_enumeration() {
        let values: Vec<String> = (0..12).map(|i| format!("v{i}")).collect();
        let any_of = standardize(&json!({"in": {"a": values}})).unwrap();
        let leaves: Vec<Value> = (0..12).map(|i| json!({"exists": format!("f{i}")})).collect();
        let none_of = standardize(&json!({"not": {"and": leaves}})).unwrap();

        for (expr, clauses) in [(&any_of, 12), (&none_of, 12)] {
            let direct = flat_clauses(expr).expect("flat expression");
            assert_eq!(direct.clauses().len(), clauses);
            assert_eq!(canonicalize(expr, &CanonicalLimits::default()).unwrap(), direct);
        }

        // the column cap only binds nested filters
        let tight = CanonicalLimits {
            max_conditions: 1,
            max_min_terms: 0,
        };
        assert_eq!(canonicalize(&any_of, &tight).unwrap().clauses().len(), 12);
    }

    #[test]
    fn flat_and_enumerated_results_agree() {
        let raw = json!({"or": [
            {"and": [{"exists": "a"}, {"equals": {"b": 1}}]},
            {"exists": "a"},
            {"not": {"or": [{"exists": "c"}, {"range": {"d": {"gt": 1}}}]}}
        ]});
        let expr = standardize(&raw).unwrap();
        let mut leaves = Vec::new();
        let node = Node::compile(&expr, &mut leaves);
        let enumerated = from_truth_table(&node, &leaves).unwrap();
        let direct = flat_clauses(&expr).expect("flat expression");
        assert_eq!(direct.clauses().len(), 3);
        assert_eq!(enumerated.clauses().len(), 3);
        for clause in direct.clauses() {
            assert!(enumerated.clauses().iter().any(|c| {
                c.len() == clause.len() && c.iter().all(|l| clause.contains(l))
            }));
        }
    }

    #[test]
    fn complex_filters_over_the_limit_are_refused() {
        let ors: Vec<Value> = (0..8)
            .map(|i| json!({"or": [{"exists": format!("a{i}")}, {"exists": format!("b{i}")}]}))
            .collect();
        let expr = standardize(&json!({"and": ors})).unwrap();
        let err = canonicalize(&expr, &CanonicalLimits::default()).unwrap_err();
        assert!(matches!(err, DslError::TooComplex(_)));
    }

    #[test]
    fn clause_limit_is_enforced() {
        let expr = standardize(&json!({"in": {"a": ["1", "2", "3"]}})).unwrap();
        let limits = CanonicalLimits {
            max_conditions: 12,
            max_min_terms: 2,
        };
        assert!(matches!(canonicalize(&expr, &limits), Err(DslError::TooComplex(_))));
    }

    fn arb_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            (0..3usize, 0..3i64).prop_map(|(f, v)| json!({"equals": {format!("f{f}"): v}})),
            (0..3usize).prop_map(|f| json!({"exists": format!("f{f}")})),
            (0..3usize, 0..3i64).prop_map(|(f, v)| json!({"range": {format!("f{f}"): {"gte": v}}})),
        ]
    }

    fn arb_filter() -> impl Strategy<Value = Value> {
        arb_leaf().prop_recursive(3, 8, 3, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 1..3).prop_map(|v| json!({"and": v})),
                prop::collection::vec(inner.clone(), 1..3).prop_map(|v| json!({"or": v})),
                inner.prop_map(|f| json!({"not": f})),
            ]
        })
    }

    fn arb_doc() -> impl Strategy<Value = Value> {
        prop::collection::vec(prop::option::of(0..3i64), 3).prop_map(|vals| {
            let mut map = serde_json::Map::new();
            for (i, v) in vals.into_iter().enumerate() {
                if let Some(v) = v {
                    map.insert(format!("f{i}"), json!(v));
                }
            }
            Value::Object(map)
        })
    }

    proptest! {
        #[test]
        fn dnf_is_equivalent_to_expression(raw in arb_filter(), doc in arb_doc()) {
            let expr = standardize(&raw).unwrap();
            let dnf = canonicalize(&expr, &CanonicalLimits::default()).unwrap();
            let flat = FlatDocument::new(&doc, None);
            prop_assert_eq!(dnf.evaluate(&flat), expr.evaluate(&flat));
        }
    }
}
