//! Expectation values of operator products and the cumulant expansion.
//!
//! An [`AvgExpr`] is a scalar polynomial: a sum of terms, each a [`Monomial`]
//! coefficient times a product of [`Average`]s. [`cumulant_expand`] rewrites
//! the average of a high-degree operator product into such a polynomial over
//! lower-degree averages by deleting all joint cumulants above the chosen
//! order.

use std::{ cmp::Ordering, fmt };
use indexmap::IndexMap;
use num_complex::Complex64 as C64;
use crate::{
    error::Result,
    operator::{ Monomial, OpProduct, OpSum, Parameter },
};

/// The expectation value of a canonical operator product.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Average(OpProduct);

impl Average {
    pub fn new(prod: OpProduct) -> Self { Self(prod) }

    pub fn product(&self) -> &OpProduct { &self.0 }

    pub fn degree(&self) -> usize { self.0.degree() }

    /// `<X>* = <X^dag>`.
    pub fn adjoint(&self) -> Self { Self(self.0.adjoint()) }

    pub fn is_self_adjoint(&self) -> bool { self.0.is_self_adjoint() }

    pub fn acts_on(&self) -> Vec<usize> { self.0.acts_on() }

    /// Largest component index this average touches; identity averages have
    /// none.
    fn max_comp(&self) -> Option<usize> {
        self.0.acts_on().into_iter().max()
    }
}

impl PartialOrd for Average {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Average {
    fn cmp(&self, other: &Self) -> Ordering {
        self.max_comp().cmp(&other.max_comp())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl fmt::Display for Average {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

/// One term of an [`AvgExpr`]: a coefficient times a (sorted) product of
/// averages.
#[derive(Clone, Debug, PartialEq)]
pub struct Term {
    pub coeff: Monomial,
    pub avgs: Vec<Average>,
}

impl Term {
    pub fn new(coeff: Monomial, mut avgs: Vec<Average>) -> Self {
        avgs.sort();
        Self { coeff, avgs }
    }

    pub fn constant(coeff: Monomial) -> Self {
        Self { coeff, avgs: Vec::new() }
    }

    /// Total operator degree across all average factors.
    pub fn degree(&self) -> usize {
        self.avgs.iter().map(|a| a.degree()).sum()
    }

    fn mul(mut self, rhs: Term) -> Term {
        self.coeff = self.coeff * rhs.coeff;
        self.avgs.extend(rhs.avgs);
        self.avgs.sort();
        self
    }
}

/// A normalized sum of [`Term`]s.
///
/// Terms with equal average content and parameter content are merged, zero
/// terms dropped, and the remainder sorted by average content (largest
/// component index first key, then structurally), so equal expressions
/// compare equal and print identically.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct AvgExpr {
    terms: Vec<Term>,
}

impl AvgExpr {
    pub fn zero() -> Self { Self::default() }

    pub fn is_zero(&self) -> bool { self.terms.is_empty() }

    pub fn terms(&self) -> &[Term] { &self.terms }

    pub fn from_terms(terms: Vec<Term>) -> Self {
        Self { terms }.normalized()
    }

    fn normalized(self) -> Self {
        let mut acc: IndexMap<(Vec<Average>, Vec<(Parameter, i32)>), Monomial>
            = IndexMap::new();
        for term in self.terms.into_iter() {
            let Term { coeff, mut avgs } = term;
            avgs.sort();
            let key = (avgs, coeff.pows_key());
            match acc.get_mut(&key) {
                Some(m) => { *m = m.clone().add_c(coeff.c()); }
                None => { acc.insert(key, coeff); }
            }
        }
        let mut terms: Vec<Term> = acc.into_iter()
            .filter(|(_, coeff)| !coeff.is_zero())
            .map(|((avgs, _), coeff)| Term { coeff, avgs })
            .collect();
        terms.sort_by(|l, r| {
            l.avgs.cmp(&r.avgs)
                .then_with(|| l.coeff.pows_key().cmp(&r.coeff.pows_key()))
        });
        Self { terms }
    }

    pub fn add(mut self, rhs: AvgExpr) -> AvgExpr {
        self.terms.extend(rhs.terms);
        self.normalized()
    }

    pub fn scale(mut self, z: C64) -> AvgExpr {
        for term in self.terms.iter_mut() {
            term.coeff = term.coeff.clone().scale(z);
        }
        self.normalized()
    }

    pub fn mul_coeff(mut self, m: &Monomial) -> AvgExpr {
        for term in self.terms.iter_mut() {
            term.coeff = term.coeff.clone() * m.clone();
        }
        self.normalized()
    }

    /// Product of two scalar expressions.
    pub fn mul(&self, rhs: &AvgExpr) -> AvgExpr {
        let terms: Vec<Term> = self.terms.iter()
            .flat_map(|l| {
                rhs.terms.iter().map(move |r| l.clone().mul(r.clone()))
            })
            .collect();
        Self { terms }.normalized()
    }

    /// Complex conjugate: conjugate coefficients, adjoint averages.
    pub fn conj(&self) -> AvgExpr {
        let terms: Vec<Term> = self.terms.iter()
            .map(|t| {
                Term::new(
                    t.coeff.clone().conj(),
                    t.avgs.iter().map(|a| a.adjoint()).collect(),
                )
            })
            .collect();
        Self { terms }.normalized()
    }

    /// Every distinct average appearing in the expression, in term order.
    pub fn averages(&self) -> Vec<&Average> {
        let mut seen: Vec<&Average> = Vec::new();
        for term in self.terms.iter() {
            for avg in term.avgs.iter() {
                if !seen.contains(&avg) { seen.push(avg); }
            }
        }
        seen
    }

    /// Rewrite every average through `f`, renormalizing afterward.
    pub fn map_averages<F>(&self, mut f: F) -> AvgExpr
    where F: FnMut(&Average) -> Average
    {
        let terms: Vec<Term> = self.terms.iter()
            .map(|t| {
                Term::new(
                    t.coeff.clone(),
                    t.avgs.iter().map(&mut f).collect(),
                )
            })
            .collect();
        Self { terms }.normalized()
    }

    /// Drop every term containing an average matching `reject`.
    pub fn zero_averages<F>(&self, mut reject: F) -> AvgExpr
    where F: FnMut(&Average) -> bool
    {
        let terms: Vec<Term> = self.terms.iter()
            .filter(|t| !t.avgs.iter().any(&mut reject))
            .cloned()
            .collect();
        Self { terms }.normalized()
    }

    /// Evaluate numerically, resolving averages through `lookup`.
    pub fn eval<F>(
        &self,
        params: &IndexMap<Parameter, C64>,
        mut lookup: F,
    ) -> Result<C64>
    where F: FnMut(&Average) -> Result<C64>
    {
        let mut acc = C64::from(0.0);
        for term in self.terms.iter() {
            let mut z = term.coeff.eval(params)?;
            for avg in term.avgs.iter() {
                z *= lookup(avg)?;
            }
            acc += z;
        }
        Ok(acc)
    }
}

impl fmt::Display for AvgExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() { return write!(f, "0"); }
        let n = self.terms.len();
        for (k, term) in self.terms.iter().enumerate() {
            write!(f, "({})", term.coeff)?;
            for avg in term.avgs.iter() {
                write!(f, " {}", avg)?;
            }
            if k < n - 1 { write!(f, " + ")?; }
        }
        Ok(())
    }
}

/* Cumulant expansion **/

/// All partitions of `{0, .., n - 1}` as block index assignments, in
/// restricted-growth order.
fn set_partitions(n: usize) -> Vec<Vec<usize>> {
    fn go(n: usize, assign: &mut Vec<usize>, nblocks: usize, out: &mut Vec<Vec<usize>>) {
        if assign.len() == n {
            out.push(assign.clone());
            return;
        }
        for b in 0..=nblocks {
            assign.push(b);
            go(n, assign, nblocks.max(b + 1), out);
            assign.pop();
        }
    }
    let mut out = Vec::new();
    go(n, &mut Vec::new(), 0, &mut out);
    out
}

/// Expand the average of `prod` into a polynomial over averages of degree at
/// most `order`.
///
/// Degree at most `order` is the identity. Otherwise the expansion deletes
/// all joint cumulants of degree above `order`, which reads
///
/// ```text
/// <x1 .. xn> = -sum_{partitions into p >= 2 blocks} (-1)^(p-1) (p-1)!
///              prod_blocks <block>
/// ```
///
/// applied recursively until every factor is within the order. Blocks keep
/// the canonical atom ordering, so factor products are themselves canonical.
pub fn cumulant_expand(prod: &OpProduct, order: usize) -> AvgExpr {
    let n = prod.degree();
    if n <= order.max(1) {
        return AvgExpr::from_terms(
            vec![Term::new(Monomial::one(), vec![Average::new(prod.clone())])]
        );
    }
    let atoms = prod.atoms();
    let mut acc = AvgExpr::zero();
    for assign in set_partitions(n).into_iter() {
        let p = assign.iter().copied().max().map(|b| b + 1).unwrap_or(0);
        if p < 2 { continue; }
        let mut blocks: Vec<Vec<crate::operator::OpAtom>> = vec![Vec::new(); p];
        for (k, b) in assign.iter().enumerate() {
            blocks[*b].push(atoms[k].clone());
        }
        // -(-1)^(p-1) (p-1)!
        let sign = if p % 2 == 0 { 1.0 } else { -1.0 };
        let fac: f64 = (1..p).map(|k| k as f64).product();
        let mut partial = AvgExpr::from_terms(
            vec![Term::constant(Monomial::from(sign * fac))]
        );
        for block in blocks.into_iter() {
            let block = OpProduct::from_atoms(block);
            partial = partial.mul(&cumulant_expand(&block, order));
        }
        acc = acc.add(partial);
    }
    acc
}

/// Expand every term of an operator sum, producing a scalar expression.
///
/// Identity products contribute pure-constant terms.
pub fn average_of(sum: &OpSum, order: usize) -> AvgExpr {
    let mut acc = AvgExpr::zero();
    for (coeff, prod) in sum.terms().iter() {
        let expr = if prod.is_identity() {
            AvgExpr::from_terms(vec![Term::constant(Monomial::one())])
        } else {
            cumulant_expand(prod, order)
        };
        acc = acc.add(expr.mul_coeff(coeff));
    }
    acc
}
