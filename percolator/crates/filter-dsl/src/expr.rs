//! Standardized filter model: predicates, boolean trees and the canonical DNF.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::FlatDocument;
use crate::geo::{GeoShape, point_from_document};

/// Scalar operand of `equals` conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Scalar {
    Bool(bool),
    Number(f64),
    String(String),
}

impl Scalar {
    /// Builds a scalar from JSON; objects, arrays and null are not scalars.
    pub fn from_json(value: &Value) -> Option<Self> {
        ScalarRef::from_json(value).map(ScalarRef::into_owned)
    }

    pub fn as_ref(&self) -> ScalarRef<'_> {
        match self {
            Self::Bool(b) => ScalarRef::Bool(*b),
            Self::Number(n) => ScalarRef::Number(*n),
            Self::String(s) => ScalarRef::String(s),
        }
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref() == other.as_ref()
    }
}

impl Eq for Scalar {}

impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scalar {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_ref().cmp(&other.as_ref())
    }
}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_ref().hash(state);
    }
}

/// Borrowed scalar, used to probe operand stores without allocating.
///
/// Total order: booleans, then numbers, then strings. `-0.0` and `0.0` are
/// the same number.
#[derive(Debug, Clone, Copy)]
pub enum ScalarRef<'a> {
    Bool(bool),
    Number(f64),
    String(&'a str),
}

impl<'a> ScalarRef<'a> {
    pub fn from_json(value: &'a Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Self::Number),
            Value::String(s) => Some(Self::String(s)),
            _ => None,
        }
    }

    pub fn into_owned(self) -> Scalar {
        match self {
            Self::Bool(b) => Scalar::Bool(b),
            Self::Number(n) => Scalar::Number(normalize_zero(n)),
            Self::String(s) => Scalar::String(s.to_owned()),
        }
    }

    const fn rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Number(_) => 1,
            Self::String(_) => 2,
        }
    }
}

/// Canonical bit pattern of a number: one zero, finite values only reach here.
pub fn number_bits(n: f64) -> u64 {
    normalize_zero(n).to_bits()
}

fn normalize_zero(n: f64) -> f64 {
    if n == 0.0 { 0.0 } else { n }
}

impl PartialEq for ScalarRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScalarRef<'_> {}

impl PartialOrd for ScalarRef<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScalarRef<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Number(a), Self::Number(b)) => normalize_zero(*a).total_cmp(&normalize_zero(*b)),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for ScalarRef<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Bool(b) => b.hash(state),
            Self::Number(n) => number_bits(*n).hash(state),
            Self::String(s) => s.hash(state),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeBound {
    pub value: f64,
    pub inclusive: bool,
}

/// Numeric interval; a missing side is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub low: Option<RangeBound>,
    pub high: Option<RangeBound>,
}

impl NumericRange {
    pub fn contains(&self, v: f64) -> bool {
        let above = match self.low {
            None => true,
            Some(b) if b.inclusive => v >= b.value,
            Some(b) => v > b.value,
        };
        let below = match self.high {
            None => true,
            Some(b) if b.inclusive => v <= b.value,
            Some(b) => v < b.value,
        };
        above && below
    }

    /// True when no number can satisfy the range.
    pub fn is_empty(&self) -> bool {
        match (self.low, self.high) {
            (Some(lo), Some(hi)) => {
                lo.value > hi.value || (lo.value == hi.value && !(lo.inclusive && hi.inclusive))
            }
            _ => false,
        }
    }
}

/// Regular expression source plus the flags that change its behaviour.
///
/// Flags are normalized (sorted, deduplicated, no-op flags dropped) so that
/// `"ig"` and `"i"` produce the same condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegexSpec {
    pub pattern: String,
    pub flags: String,
}

impl RegexSpec {
    /// Accepted flags: `i` (case-insensitive), `m` (multi-line), `s` (dot
    /// matches new lines); `g`, `u` and `y` are accepted and ignored.
    pub fn new(pattern: impl Into<String>, flags: &str) -> Result<Self, String> {
        let mut kept: Vec<char> = Vec::with_capacity(3);
        for flag in flags.chars() {
            match flag {
                'i' | 'm' | 's' => {
                    if !kept.contains(&flag) {
                        kept.push(flag);
                    }
                }
                'g' | 'u' | 'y' => {}
                other => return Err(format!("unsupported regular expression flag '{other}'")),
            }
        }
        kept.sort_unstable();
        let spec = Self {
            pattern: pattern.into(),
            flags: kept.into_iter().collect(),
        };
        spec.compile().map_err(|e| format!("cannot compile regular expression: {e}"))?;
        Ok(spec)
    }

    pub fn compile(&self) -> Result<Regex, regex::Error> {
        RegexBuilder::new(&self.pattern)
            .case_insensitive(self.flags.contains('i'))
            .multi_line(self.flags.contains('m'))
            .dot_matches_new_line(self.flags.contains('s'))
            .build()
    }
}

/// One primitive test against a document field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Equals { field: String, value: Scalar },
    Exists { field: String },
    Range { field: String, range: NumericRange },
    Regexp { field: String, regex: RegexSpec },
    Geo { field: String, shape: GeoShape },
}

impl Predicate {
    pub fn field(&self) -> &str {
        match self {
            Self::Equals { field, .. }
            | Self::Exists { field }
            | Self::Range { field, .. }
            | Self::Regexp { field, .. }
            | Self::Geo { field, .. } => field,
        }
    }

    /// Reference semantics. Compiles regular expressions on every call, so it
    /// belongs in tests and tooling, not in the matching hot path.
    pub fn evaluate(&self, doc: &FlatDocument<'_>) -> bool {
        let Some(value) = doc.get(self.field()) else {
            return false;
        };
        match self {
            Self::Equals { value: expected, .. } => {
                ScalarRef::from_json(value).is_some_and(|v| v == expected.as_ref())
            }
            Self::Exists { .. } => true,
            Self::Range { range, .. } => value.as_f64().is_some_and(|v| range.contains(v)),
            Self::Regexp { regex, .. } => match (value.as_str(), regex.compile()) {
                (Some(s), Ok(re)) => re.is_match(s),
                _ => false,
            },
            Self::Geo { shape, .. } => point_from_document(value).is_some_and(|p| shape.contains(p)),
        }
    }
}

/// DSL keyword of a stored condition, negation folded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Keyword {
    Everything,
    Nothing,
    Equals,
    NotEquals,
    Exists,
    NotExists,
    Range,
    NotRange,
    Regexp,
    NotRegexp,
    Geospatial,
    NotGeospatial,
}

impl Keyword {
    /// Order in which the matcher walks operand stores.
    pub const MATCH_ORDER: [Self; 11] = [
        Self::Everything,
        Self::Equals,
        Self::Exists,
        Self::NotExists,
        Self::Range,
        Self::NotRange,
        Self::NotEquals,
        Self::Regexp,
        Self::NotRegexp,
        Self::Geospatial,
        Self::NotGeospatial,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Everything => "everything",
            Self::Nothing => "nothing",
            Self::Equals => "equals",
            Self::NotEquals => "notequals",
            Self::Exists => "exists",
            Self::NotExists => "notexists",
            Self::Range => "range",
            Self::NotRange => "notrange",
            Self::Regexp => "regexp",
            Self::NotRegexp => "notregexp",
            Self::Geospatial => "geospatial",
            Self::NotGeospatial => "notgeospatial",
        }
    }
}

impl core::fmt::Display for Keyword {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A predicate, possibly negated: one cell of an AND-clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Literal {
    pub predicate: Predicate,
    pub negated: bool,
}

impl Literal {
    pub const fn new(predicate: Predicate, negated: bool) -> Self {
        Self { predicate, negated }
    }

    pub const fn keyword(&self) -> Keyword {
        match (&self.predicate, self.negated) {
            (Predicate::Equals { .. }, false) => Keyword::Equals,
            (Predicate::Equals { .. }, true) => Keyword::NotEquals,
            (Predicate::Exists { .. }, false) => Keyword::Exists,
            (Predicate::Exists { .. }, true) => Keyword::NotExists,
            (Predicate::Range { .. }, false) => Keyword::Range,
            (Predicate::Range { .. }, true) => Keyword::NotRange,
            (Predicate::Regexp { .. }, false) => Keyword::Regexp,
            (Predicate::Regexp { .. }, true) => Keyword::NotRegexp,
            (Predicate::Geo { .. }, false) => Keyword::Geospatial,
            (Predicate::Geo { .. }, true) => Keyword::NotGeospatial,
        }
    }

    pub fn negate(&self) -> Self {
        Self::new(self.predicate.clone(), !self.negated)
    }

    pub fn evaluate(&self, doc: &FlatDocument<'_>) -> bool {
        self.predicate.evaluate(doc) != self.negated
    }
}

/// Standardized boolean expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// The empty filter: every document matches.
    Everything,
    Leaf(Predicate),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    /// Negates, removing a double negation instead of stacking one.
    pub fn negate(self) -> Self {
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }

    pub fn evaluate(&self, doc: &FlatDocument<'_>) -> bool {
        match self {
            Self::Everything => true,
            Self::Leaf(p) => p.evaluate(doc),
            Self::Not(inner) => !inner.evaluate(doc),
            Self::And(items) => items.iter().all(|e| e.evaluate(doc)),
            Self::Or(items) => items.iter().any(|e| e.evaluate(doc)),
        }
    }
}

/// Disjunctive normal form: an OR of AND-clauses.
///
/// No clause never matches; a clause without literals always matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dnf {
    clauses: Vec<Vec<Literal>>,
}

impl Dnf {
    pub fn everything() -> Self {
        Self {
            clauses: vec![Vec::new()],
        }
    }

    pub const fn nothing() -> Self {
        Self {
            clauses: Vec::new(),
        }
    }

    /// Builds a DNF from clauses, normalizing them: duplicate literals are
    /// merged, self-contradicting clauses dropped, duplicate clauses removed,
    /// and any empty clause absorbs the others.
    pub fn from_clauses(clauses: Vec<Vec<Literal>>) -> Self {
        let mut out: Vec<Vec<Literal>> = Vec::with_capacity(clauses.len());
        'clauses: for clause in clauses {
            let mut lits: Vec<Literal> = Vec::with_capacity(clause.len());
            for lit in clause {
                if lits
                    .iter()
                    .any(|l| l.predicate == lit.predicate && l.negated != lit.negated)
                {
                    continue 'clauses;
                }
                if !lits.contains(&lit) {
                    lits.push(lit);
                }
            }
            if lits.is_empty() {
                return Self::everything();
            }
            if !out.iter().any(|c| same_clause(c, &lits)) {
                out.push(lits);
            }
        }
        Self { clauses: out }
    }

    pub fn clauses(&self) -> &[Vec<Literal>] {
        &self.clauses
    }

    pub fn is_everything(&self) -> bool {
        self.clauses.len() == 1 && self.clauses[0].is_empty()
    }

    pub fn is_nothing(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn evaluate(&self, doc: &FlatDocument<'_>) -> bool {
        self.clauses
            .iter()
            .any(|clause| clause.iter().all(|lit| lit.evaluate(doc)))
    }
}

fn same_clause(a: &[Literal], b: &[Literal]) -> bool {
    a.len() == b.len() && a.iter().all(|l| b.contains(l))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn equals(field: &str, value: &str) -> Predicate {
        Predicate::Equals {
            field: field.into(),
            value: Scalar::String(value.into()),
        }
    }

    #[test]
    fn scalar_numbers_ignore_representation() {
        assert_eq!(Scalar::Number(1.0), Scalar::from_json(&json!(1)).unwrap());
        assert_eq!(Scalar::Number(0.0), Scalar::Number(-0.0));
        assert!(Scalar::Bool(true) < Scalar::Number(-5.0));
        assert!(Scalar::Number(1e9) < Scalar::String(String::new()));
        assert!(Scalar::from_json(&json!(null)).is_none());
        assert!(Scalar::from_json(&json!([1])).is_none());
    }

    #[test]
    fn range_bounds_respect_inclusivity() {
        let r = NumericRange {
            low: Some(RangeBound {
                value: 18.0,
                inclusive: true,
            }),
            high: Some(RangeBound {
                value: 65.0,
                inclusive: false,
            }),
        };
        assert!(r.contains(18.0));
        assert!(r.contains(64.9));
        assert!(!r.contains(65.0));
        assert!(!r.contains(17.0));
        assert!(!r.is_empty());
    }

    #[test]
    fn degenerate_ranges_are_empty() {
        let point = |lo_inc, hi_inc| NumericRange {
            low: Some(RangeBound {
                value: 3.0,
                inclusive: lo_inc,
            }),
            high: Some(RangeBound {
                value: 3.0,
                inclusive: hi_inc,
            }),
        };
        assert!(!point(true, true).is_empty());
        assert!(point(true, false).is_empty());
        assert!(point(false, true).is_empty());
    }

    #[test]
    fn regex_flags_are_normalized() {
        let a = RegexSpec::new("^A", "gi").unwrap();
        let b = RegexSpec::new("^A", "i").unwrap();
        assert_eq!(a, b);
        assert!(a.compile().unwrap().is_match("alice"));
        assert!(RegexSpec::new("^A", "q").is_err());
        assert!(RegexSpec::new("(", "").is_err());
    }

    #[test]
    fn literal_keywords_fold_negation() {
        let lit = Literal::new(equals("a", "b"), true);
        assert_eq!(lit.keyword(), Keyword::NotEquals);
        assert_eq!(lit.keyword().as_str(), "notequals");
        assert_eq!(lit.negate().keyword(), Keyword::Equals);
    }

    #[test]
    fn dnf_normalization_drops_contradictions_and_duplicates() {
        let a = Literal::new(equals("a", "x"), false);
        let not_a = a.negate();
        let b = Literal::new(equals("b", "y"), false);
        let dnf = Dnf::from_clauses(vec![
            vec![a.clone(), not_a],
            vec![b.clone(), a.clone(), b.clone()],
            vec![a.clone(), b.clone()],
        ]);
        assert_eq!(dnf.clauses().len(), 1);
        assert_eq!(dnf.clauses()[0], vec![b, a]);
    }

    #[test]
    fn dnf_empty_clause_absorbs_everything() {
        let a = Literal::new(equals("a", "x"), false);
        let dnf = Dnf::from_clauses(vec![vec![a], vec![]]);
        assert!(dnf.is_everything());
        assert!(Dnf::from_clauses(vec![]).is_nothing());
    }

    #[test]
    fn missing_field_fails_positive_and_passes_negated() {
        let doc = json!({"other": 1});
        let flat = FlatDocument::new(&doc, None);
        let lit = Literal::new(equals("a", "x"), false);
        assert!(!lit.evaluate(&flat));
        assert!(lit.negate().evaluate(&flat));
    }
}
