//! Two-level logic minimization (Quine–McCluskey).
//!
//! Input is the ON-set of a boolean function over at most [`MAX_VARIABLES`]
//! variables, output a small sum of products covering exactly that ON-set.
//! Variable `i` is bit `i` of a row index.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::DslError;

/// Upper bound on truth-table width. `2^20` rows is the most the converter
/// will ever enumerate.
pub const MAX_VARIABLES: usize = 20;

/// A product term. Bits set in `mask` are don't-care; the other bits of
/// `bits` give the required value of each variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Implicant {
    pub bits: u32,
    pub mask: u32,
}

impl Implicant {
    pub const fn covers(&self, minterm: u32) -> bool {
        minterm & !self.mask == self.bits
    }

    /// Number of asserted variables.
    pub const fn literals(&self, vars: usize) -> u32 {
        vars as u32 - self.mask.count_ones()
    }
}

/// Minimize the function whose ON-set is `minterms`.
///
/// An empty ON-set yields no term; a full ON-set yields the single term with
/// every variable don't-care.
pub fn minimize(vars: usize, minterms: &[u32]) -> Result<Vec<Implicant>, DslError> {
    if vars > MAX_VARIABLES {
        return Err(DslError::Internal(format!(
            "{vars} variables exceed the minimizer limit of {MAX_VARIABLES}"
        )));
    }
    let rows = 1u64 << vars;
    let on: BTreeSet<u32> = minterms.iter().copied().collect();
    if let Some(bad) = on.iter().find(|&&m| u64::from(m) >= rows) {
        return Err(DslError::Internal(format!(
            "minterm {bad} is out of range for {vars} variables"
        )));
    }
    if on.is_empty() {
        return Ok(Vec::new());
    }
    if on.len() as u64 == rows {
        return Ok(vec![Implicant {
            bits: 0,
            mask: (rows - 1) as u32,
        }]);
    }

    let primes = prime_implicants(vars, &on);
    Ok(cover(vars, &on, primes))
}

/// Iteratively merge implicants differing in one cared-for bit. Whatever
/// never merges is prime.
fn prime_implicants(vars: usize, on: &BTreeSet<u32>) -> Vec<Implicant> {
    let mut primes = BTreeSet::new();
    let mut current: BTreeSet<Implicant> = on.iter().map(|&bits| Implicant { bits, mask: 0 }).collect();

    while !current.is_empty() {
        let mut merged_away: BTreeSet<Implicant> = BTreeSet::new();
        let mut next: BTreeSet<Implicant> = BTreeSet::new();
        for imp in &current {
            for var in 0..vars {
                let bit = 1u32 << var;
                // merge upward only, each pair is visited once
                if imp.mask & bit != 0 || imp.bits & bit != 0 {
                    continue;
                }
                let partner = Implicant {
                    bits: imp.bits | bit,
                    mask: imp.mask,
                };
                if current.contains(&partner) {
                    merged_away.insert(*imp);
                    merged_away.insert(partner);
                    next.insert(Implicant {
                        bits: imp.bits,
                        mask: imp.mask | bit,
                    });
                }
            }
        }
        primes.extend(current.difference(&merged_away).copied());
        current = next;
    }
    primes.into_iter().collect()
}

/// Essential primes first, then a greedy pass: the prime covering the most
/// remaining rows wins, ties go to the one with fewer literals, then to the
/// lowest implicant.
fn cover(vars: usize, on: &BTreeSet<u32>, primes: Vec<Implicant>) -> Vec<Implicant> {
    let mut chosen: BTreeSet<Implicant> = BTreeSet::new();
    let mut coverers: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for &m in on {
        let list = primes
            .iter()
            .enumerate()
            .filter(|(_, p)| p.covers(m))
            .map(|(i, _)| i)
            .collect();
        coverers.insert(m, list);
    }

    for list in coverers.values() {
        if let [only] = list.as_slice() {
            chosen.insert(primes[*only]);
        }
    }
    let mut remaining: BTreeSet<u32> = on
        .iter()
        .copied()
        .filter(|&m| !chosen.iter().any(|p| p.covers(m)))
        .collect();

    while !remaining.is_empty() {
        let best = primes
            .iter()
            .filter(|p| !chosen.contains(p))
            .map(|p| {
                let gain = remaining.iter().filter(|&&m| p.covers(m)).count();
                (gain, std::cmp::Reverse(p.literals(vars)), std::cmp::Reverse(*p))
            })
            .max();
        let Some((gain, _, std::cmp::Reverse(best))) = best else {
            break;
        };
        if gain == 0 {
            break;
        }
        remaining.retain(|&m| !best.covers(m));
        chosen.insert(best);
    }

    chosen.into_iter().collect()
}
