//! Symbolic operator expressions over a [`ProductSpace`].
//!
//! Operators are held in a closed normal form: an [`OpSum`] is a list of
//! terms, each a [`Monomial`] coefficient times a canonical [`OpProduct`].
//! A canonical product is a slot-sorted vector of [`OpAtom`]s with, per Fock
//! slot, all creation atoms before all annihilation atoms, and per discrete
//! slot at most one transition atom, never the ground projector (which is
//! rewritten against the completeness relation on the spot). All algebra --
//! multiplication, adjoints, scalar arithmetic -- lands back in this form,
//! so structural equality of products is semantic equality.

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt,
};
use indexmap::IndexMap;
use itertools::Itertools;
use num_complex::Complex64 as C64;
use num_traits::{ One, Zero };
use crate::{
    error::{ Error, Result },
    hilbert::ProductSpace,
};

/* Scalars **/

/// A named symbolic scalar, assumed real.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Parameter(String);

impl Parameter {
    pub fn new(name: &str) -> Self { Self(name.to_string()) }

    pub fn name(&self) -> &str { &self.0 }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A complex constant times a product of integer powers of [`Parameter`]s.
///
/// Sums of monomials are never folded into one value; expressions carrying
/// polynomial coefficients keep one monomial per term.
#[derive(Clone, Debug, PartialEq)]
pub struct Monomial {
    c: C64,
    pows: BTreeMap<Parameter, i32>,
}

impl Monomial {
    pub fn one() -> Self { Self { c: C64::one(), pows: BTreeMap::new() } }

    pub fn param(p: Parameter) -> Self {
        Self { c: C64::one(), pows: [(p, 1)].into_iter().collect() }
    }

    pub fn c(&self) -> C64 { self.c }

    pub fn is_zero(&self) -> bool { self.c.is_zero() }

    /// Iterate over `(parameter, power)` pairs in parameter order.
    pub fn pows(&self) -> impl Iterator<Item = (&Parameter, i32)> {
        self.pows.iter().map(|(p, k)| (p, *k))
    }

    /// Key identifying the parameter content, independent of the constant.
    pub(crate) fn pows_key(&self) -> Vec<(Parameter, i32)> {
        self.pows.iter().map(|(p, k)| (p.clone(), *k)).collect()
    }

    pub fn scale(mut self, z: C64) -> Self {
        self.c *= z;
        self
    }

    pub fn mul_param(mut self, p: &Parameter) -> Self {
        *self.pows.entry(p.clone()).or_insert(0) += 1;
        self.pows.retain(|_, k| *k != 0);
        self
    }

    /// Complex conjugate; parameters are real, so only the constant flips.
    pub fn conj(mut self) -> Self {
        self.c = self.c.conj();
        self
    }

    /// Evaluate against a parameter table.
    pub fn eval(&self, params: &IndexMap<Parameter, C64>) -> Result<C64> {
        let mut z = self.c;
        for (p, k) in self.pows.iter() {
            let v = params.get(p)
                .ok_or_else(|| Error::UnknownParameter { name: p.name().to_string() })?;
            z *= v.powi(*k);
        }
        Ok(z)
    }
}

impl From<C64> for Monomial {
    fn from(z: C64) -> Self { Self { c: z, pows: BTreeMap::new() } }
}

impl From<f64> for Monomial {
    fn from(x: f64) -> Self { Self::from(C64::from(x)) }
}

impl From<Parameter> for Monomial {
    fn from(p: Parameter) -> Self { Self::param(p) }
}

// The operator traits are implemented with qualified paths so that none of
// them is in scope here: `OpSum` has an inherent three-argument `mul`, which
// an imported `Mul` would shadow for by-value receivers.
impl std::ops::Mul for Monomial {
    type Output = Monomial;

    fn mul(mut self, rhs: Monomial) -> Monomial {
        self.c *= rhs.c;
        for (p, k) in rhs.pows.into_iter() {
            *self.pows.entry(p).or_insert(0) += k;
        }
        self.pows.retain(|_, k| *k != 0);
        self
    }
}

impl std::ops::Neg for Monomial {
    type Output = Monomial;

    fn neg(mut self) -> Monomial {
        self.c = -self.c;
        self
    }
}

impl fmt::Display for Monomial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.c)?;
        for (p, k) in self.pows.iter() {
            if *k == 1 {
                write!(f, " {}", p)?;
            } else {
                write!(f, " {}^{}", p, k)?;
            }
        }
        Ok(())
    }
}

/* Atoms and products **/

/// The slot an atom acts on: a component index, plus a cluster member label.
///
/// `member` is `None` for non-cluster components and for the generic
/// (uninstantiated) member of a cluster.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Aon {
    pub comp: usize,
    pub member: Option<usize>,
}

impl Aon {
    pub fn new(comp: usize) -> Self { Self { comp, member: None } }

    pub fn member(comp: usize, member: usize) -> Self {
        Self { comp, member: Some(member) }
    }
}

impl fmt::Display for Aon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.member {
            Some(m) => write!(f, "{}.{}", self.comp, m),
            None => write!(f, "{}", self.comp),
        }
    }
}

/// A single elementary operator factor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OpAtom {
    /// Bosonic creation operator on a mode slot.
    Create(Aon),
    /// Bosonic annihilation operator on a mode slot.
    Destroy(Aon),
    /// `|i><j|` on a discrete slot, with level indices `i`, `j`.
    Transition(Aon, usize, usize),
}

impl OpAtom {
    pub fn aon(&self) -> Aon {
        match self {
            Self::Create(aon) => *aon,
            Self::Destroy(aon) => *aon,
            Self::Transition(aon, _, _) => *aon,
        }
    }

    /// Rank within a slot; creators sort before annihilators.
    fn kind_rank(&self) -> u8 {
        match self {
            Self::Create(_) => 0,
            Self::Destroy(_) => 1,
            Self::Transition(..) => 2,
        }
    }

    pub fn adjoint(&self) -> Self {
        match self {
            Self::Create(aon) => Self::Destroy(*aon),
            Self::Destroy(aon) => Self::Create(*aon),
            Self::Transition(aon, i, j) => Self::Transition(*aon, *j, *i),
        }
    }

    /// Replace the slot, keeping the operator content.
    pub(crate) fn with_aon(&self, aon: Aon) -> Self {
        match self {
            Self::Create(_) => Self::Create(aon),
            Self::Destroy(_) => Self::Destroy(aon),
            Self::Transition(_, i, j) => Self::Transition(aon, *i, *j),
        }
    }
}

impl PartialOrd for OpAtom {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpAtom {
    fn cmp(&self, other: &Self) -> Ordering {
        self.aon().cmp(&other.aon())
            .then(self.kind_rank().cmp(&other.kind_rank()))
            .then_with(|| {
                match (self, other) {
                    (
                        Self::Transition(_, i, j),
                        Self::Transition(_, k, l),
                    ) => (i, j).cmp(&(k, l)),
                    _ => Ordering::Equal,
                }
            })
    }
}

impl fmt::Display for OpAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create(aon) => write!(f, "a+[{}]", aon),
            Self::Destroy(aon) => write!(f, "a[{}]", aon),
            Self::Transition(aon, i, j) => write!(f, "s[{}]({},{})", aon, i, j),
        }
    }
}

/// A canonically ordered product of [`OpAtom`]s; the empty product is the
/// identity.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct OpProduct {
    atoms: Vec<OpAtom>,
}

impl OpProduct {
    pub fn identity() -> Self { Self::default() }

    /// Build from atoms already known to satisfy the canonical invariants,
    /// up to sorting.
    pub(crate) fn from_atoms(mut atoms: Vec<OpAtom>) -> Self {
        atoms.sort();
        Self { atoms }
    }

    pub fn is_identity(&self) -> bool { self.atoms.is_empty() }

    pub fn atoms(&self) -> &[OpAtom] { &self.atoms }

    /// Number of elementary factors.
    pub fn degree(&self) -> usize { self.atoms.len() }

    /// Component indices this product acts on, deduplicated and ascending.
    pub fn acts_on(&self) -> Vec<usize> {
        self.atoms.iter().map(|a| a.aon().comp).dedup().collect()
    }

    /// Distinct slots this product acts on, ascending.
    pub fn slots(&self) -> Vec<Aon> {
        self.atoms.iter().map(|a| a.aon()).dedup().collect()
    }

    /// Hermitian adjoint.
    ///
    /// Reversal and per-atom adjoint re-sorts to the same canonical form:
    /// slots commute and, within a Fock slot, the adjoint of a normal-ordered
    /// string is again normal-ordered.
    pub fn adjoint(&self) -> Self {
        Self::from_atoms(self.atoms.iter().map(|a| a.adjoint()).collect())
    }

    pub fn is_self_adjoint(&self) -> bool { *self == self.adjoint() }
}

impl fmt::Display for OpProduct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.atoms.is_empty() { return write!(f, "1"); }
        let n = self.atoms.len();
        for (k, atom) in self.atoms.iter().enumerate() {
            atom.fmt(f)?;
            if k < n - 1 { write!(f, " ")?; }
        }
        Ok(())
    }
}

/* Sums and normal-ordering **/

/// A normalized sum of monomial-weighted canonical products.
///
/// Terms with equal product and equal parameter content are merged; zero
/// terms are dropped. Term order follows first insertion, so identical
/// sequences of operations yield identical term lists.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct OpSum {
    terms: Vec<(Monomial, OpProduct)>,
}

impl OpSum {
    pub fn zero() -> Self { Self::default() }

    pub fn identity() -> Self {
        Self { terms: vec![(Monomial::one(), OpProduct::identity())] }
    }

    pub(crate) fn term(coeff: Monomial, prod: OpProduct) -> Self {
        Self { terms: vec![(coeff, prod)] }.normalized()
    }

    pub(crate) fn from_terms(terms: Vec<(Monomial, OpProduct)>) -> Self {
        Self { terms }.normalized()
    }

    pub fn is_zero(&self) -> bool { self.terms.is_empty() }

    pub fn terms(&self) -> &[(Monomial, OpProduct)] { &self.terms }

    pub fn into_terms(self) -> Vec<(Monomial, OpProduct)> { self.terms }

    fn normalized(self) -> Self {
        let mut acc: IndexMap<(OpProduct, Vec<(Parameter, i32)>), Monomial>
            = IndexMap::new();
        for (coeff, prod) in self.terms.into_iter() {
            let key = (prod, coeff.pows_key());
            match acc.get_mut(&key) {
                Some(m) => { *m = m.clone().add_c(coeff.c()); }
                None => { acc.insert(key, coeff); }
            }
        }
        let terms: Vec<(Monomial, OpProduct)> = acc.into_iter()
            .filter(|(_, coeff)| !coeff.is_zero())
            .map(|((prod, _), coeff)| (coeff, prod))
            .collect();
        Self { terms }
    }

    pub fn adjoint(&self) -> Self {
        Self {
            terms: self.terms.iter()
                .map(|(coeff, prod)| (coeff.clone().conj(), prod.adjoint()))
                .collect(),
        }.normalized()
    }

    /// Multiply on the right, normal-ordering the result over `space`.
    pub fn mul(&self, rhs: &Self, space: &ProductSpace) -> Self {
        let mut terms: Vec<(Monomial, OpProduct)> = Vec::new();
        for (cl, pl) in self.terms.iter() {
            for (cr, pr) in rhs.terms.iter() {
                let prod = mul_products(pl, pr, space);
                for (c, p) in prod.terms.into_iter() {
                    terms.push((cl.clone() * cr.clone() * c, p));
                }
            }
        }
        Self { terms }.normalized()
    }
}

impl Monomial {
    pub(crate) fn add_c(mut self, z: C64) -> Self {
        self.c += z;
        self
    }
}

impl From<Monomial> for OpSum {
    fn from(m: Monomial) -> Self { Self::term(m, OpProduct::identity()) }
}

impl From<OpProduct> for OpSum {
    fn from(p: OpProduct) -> Self { Self::term(Monomial::one(), p) }
}

impl std::ops::Add for OpSum {
    type Output = OpSum;

    fn add(mut self, rhs: OpSum) -> OpSum {
        self.terms.extend(rhs.terms);
        self.normalized()
    }
}

impl std::ops::Sub for OpSum {
    type Output = OpSum;

    fn sub(self, rhs: OpSum) -> OpSum { self + (-rhs) }
}

impl std::ops::Neg for OpSum {
    type Output = OpSum;

    fn neg(mut self) -> OpSum {
        for (coeff, _) in self.terms.iter_mut() {
            *coeff = -coeff.clone();
        }
        self
    }
}

impl std::ops::Mul<Monomial> for OpSum {
    type Output = OpSum;

    fn mul(mut self, rhs: Monomial) -> OpSum {
        for (coeff, _) in self.terms.iter_mut() {
            *coeff = coeff.clone() * rhs.clone();
        }
        self.normalized()
    }
}

impl std::ops::Mul<C64> for OpSum {
    type Output = OpSum;

    fn mul(mut self, rhs: C64) -> OpSum {
        for (coeff, _) in self.terms.iter_mut() {
            *coeff = coeff.clone().scale(rhs);
        }
        self.normalized()
    }
}

fn binomial(n: u32, k: u32) -> f64 {
    if k > n { return 0.0; }
    let mut b: f64 = 1.0;
    for j in 0..k {
        b *= f64::from(n - j) / f64::from(j + 1);
    }
    b
}

fn factorial(k: u32) -> f64 {
    (1..=k).map(f64::from).product()
}

// a^n a+^p = sum_k k! C(n,k) C(p,k) a+^(p-k) a^(n-k)
fn fock_slot_mul(m1: u32, n1: u32, m2: u32, n2: u32) -> Vec<(f64, u32, u32)>
{
    let kmax = n1.min(m2);
    (0..=kmax)
        .map(|k| {
            let c = factorial(k) * binomial(n1, k) * binomial(m2, k);
            (c, m1 + m2 - k, n1 + n2 - k)
        })
        .collect()
}

// Per-slot product terms: coefficient and an optional surviving transition.
fn trans_slot_mul(
    t1: Option<(usize, usize)>,
    t2: Option<(usize, usize)>,
    ground: usize,
    num_levels: usize,
) -> Vec<(f64, Option<(usize, usize)>)>
{
    let t = match (t1, t2) {
        (None, None) => { return vec![(1.0, None)]; }
        (Some(t), None) | (None, Some(t)) => t,
        (Some((i, j)), Some((k, l))) => {
            if j != k { return Vec::new(); }
            (i, l)
        }
    };
    if t.0 == ground && t.1 == ground {
        // |g><g| = 1 - sum_{e != g} |e><e|
        let mut terms = vec![(1.0, None)];
        terms.extend(
            (0..num_levels)
                .filter(|e| *e != ground)
                .map(|e| (-1.0, Some((e, e))))
        );
        terms
    } else {
        vec![(1.0, Some(t))]
    }
}

/// Normal-ordered product of two canonical products.
fn mul_products(lhs: &OpProduct, rhs: &OpProduct, space: &ProductSpace)
    -> OpSum
{
    if lhs.is_identity() { return rhs.clone().into(); }
    if rhs.is_identity() { return lhs.clone().into(); }
    // per-slot term lists, in ascending slot order
    let slots: Vec<Aon> = lhs.slots().into_iter()
        .merge(rhs.slots())
        .dedup()
        .collect();
    let mut slot_terms: Vec<Vec<(f64, Vec<OpAtom>)>> = Vec::new();
    // factors on a slot the space cannot resolve pass through unsimplified,
    // left factors first, so nothing is dropped before the boundary checks
    // see them
    let passthrough = |aon: Aon| -> Vec<(f64, Vec<OpAtom>)> {
        let atoms: Vec<OpAtom> = lhs.atoms().iter()
            .chain(rhs.atoms().iter())
            .filter(|a| a.aon() == aon)
            .cloned()
            .collect();
        vec![(1.0, atoms)]
    };
    for aon in slots.into_iter() {
        let comp = match space.get(aon.comp) {
            Ok(c) => c,
            Err(_) => {
                slot_terms.push(passthrough(aon));
                continue;
            }
        };
        if comp.is_fock_like() {
            let count = |p: &OpProduct| -> (u32, u32) {
                let m = p.atoms().iter()
                    .filter(|a| matches!(a, OpAtom::Create(x) if *x == aon))
                    .count() as u32;
                let n = p.atoms().iter()
                    .filter(|a| matches!(a, OpAtom::Destroy(x) if *x == aon))
                    .count() as u32;
                (m, n)
            };
            let (m1, n1) = count(lhs);
            let (m2, n2) = count(rhs);
            let terms = fock_slot_mul(m1, n1, m2, n2).into_iter()
                .map(|(c, m, n)| {
                    let mut atoms: Vec<OpAtom> = Vec::new();
                    atoms.extend((0..m).map(|_| OpAtom::Create(aon)));
                    atoms.extend((0..n).map(|_| OpAtom::Destroy(aon)));
                    (c, atoms)
                })
                .collect();
            slot_terms.push(terms);
        } else {
            let find = |p: &OpProduct| -> Option<(usize, usize)> {
                p.atoms().iter()
                    .find_map(|a| match a {
                        OpAtom::Transition(x, i, j) if *x == aon
                            => Some((*i, *j)),
                        _ => None,
                    })
            };
            let nlevel = match comp.nlevel() {
                Some(s) => s,
                None => {
                    slot_terms.push(passthrough(aon));
                    continue;
                }
            };
            let terms = trans_slot_mul(
                find(lhs),
                find(rhs),
                nlevel.ground_state(),
                nlevel.num_levels(),
            );
            if terms.is_empty() { return OpSum::zero(); }
            let terms = terms.into_iter()
                .map(|(c, t)| {
                    let atoms = t.into_iter()
                        .map(|(i, j)| OpAtom::Transition(aon, i, j))
                        .collect();
                    (c, atoms)
                })
                .collect();
            slot_terms.push(terms);
        }
    }
    let terms: Vec<(Monomial, OpProduct)> = slot_terms.into_iter()
        .multi_cartesian_product()
        .map(|combo| {
            let mut c = 1.0;
            let mut atoms: Vec<OpAtom> = Vec::new();
            for (ck, ak) in combo.into_iter() {
                c *= ck;
                atoms.extend(ak);
            }
            (Monomial::from(c), OpProduct::from_atoms(atoms))
        })
        .collect();
    OpSum { terms }.normalized()
}

/* Operator constructors **/

impl ProductSpace {
    fn fock_aon(&self, comp: usize) -> Result<Aon> {
        let c = self.get(comp)?;
        if c.is_fock_like() {
            Ok(Aon::new(comp))
        } else {
            Err(Error::WrongComponentKind { index: comp, kind: "ladder" })
        }
    }

    fn trans_aon(&self, comp: usize, member: Option<usize>, i: &str, j: &str)
        -> Result<(Aon, usize, usize)>
    {
        let c = self.get(comp)?;
        if member.is_some() && !c.is_cluster() {
            return Err(Error::WrongComponentKind {
                index: comp,
                kind: "member-indexed",
            });
        }
        let nlevel = c.nlevel()
            .ok_or(Error::WrongComponentKind { index: comp, kind: "transition" })?;
        let lookup = |level: &str| -> Result<usize> {
            nlevel.level_index(level)
                .ok_or_else(|| Error::UnknownLevel {
                    level: level.to_string(),
                    component: nlevel.name().to_string(),
                })
        };
        Ok((Aon { comp, member }, lookup(i)?, lookup(j)?))
    }

    /// Bosonic annihilation operator on component `comp`.
    pub fn destroy(&self, comp: usize) -> Result<OpSum> {
        let aon = self.fock_aon(comp)?;
        Ok(OpProduct::from_atoms(vec![OpAtom::Destroy(aon)]).into())
    }

    /// Bosonic creation operator on component `comp`.
    pub fn create(&self, comp: usize) -> Result<OpSum> {
        let aon = self.fock_aon(comp)?;
        Ok(OpProduct::from_atoms(vec![OpAtom::Create(aon)]).into())
    }

    /// `|i><j|` on component `comp`, by level names.
    ///
    /// On a cluster this is the generic-member transition, expanded over
    /// members during equation derivation.
    pub fn transition(&self, comp: usize, i: &str, j: &str) -> Result<OpSum> {
        self.make_transition(comp, None, i, j)
    }

    /// `|i><j|` on a specific member of cluster component `comp`.
    pub fn member_transition(
        &self,
        comp: usize,
        member: usize,
        i: &str,
        j: &str,
    ) -> Result<OpSum>
    {
        self.make_transition(comp, Some(member), i, j)
    }

    /// Projector onto a named level of component `comp`.
    ///
    /// The ground-level projector is returned in its eliminated form
    /// `1 - sum_e |e><e|`.
    pub fn projector(&self, comp: usize, level: &str) -> Result<OpSum> {
        self.make_transition(comp, None, level, level)
    }

    fn make_transition(
        &self,
        comp: usize,
        member: Option<usize>,
        i: &str,
        j: &str,
    ) -> Result<OpSum>
    {
        let (aon, i, j) = self.trans_aon(comp, member, i, j)?;
        let nlevel = self.get(comp)?.nlevel()
            .ok_or(Error::WrongComponentKind { index: comp, kind: "transition" })?;
        let terms: Vec<(Monomial, OpProduct)>
            = trans_slot_mul(
                Some((i, j)),
                None,
                nlevel.ground_state(),
                nlevel.num_levels(),
            )
            .into_iter()
            .map(|(c, t)| {
                let atoms = t.into_iter()
                    .map(|(k, l)| OpAtom::Transition(aon, k, l))
                    .collect();
                (Monomial::from(c), OpProduct::from_atoms(atoms))
            })
            .collect();
        Ok(OpSum { terms }.normalized())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hilbert::{ FockSpace, NLevelSpace };

    fn space() -> ProductSpace {
        let mut space = ProductSpace::new();
        space.push(FockSpace::new("cavity"));
        space.push(NLevelSpace::new("atom", ["g", "e"]));
        space
    }

    fn coeff_of(sum: &OpSum, prod: &OpProduct) -> C64 {
        sum.terms().iter()
            .filter(|(_, p)| p == prod)
            .map(|(c, _)| c.c())
            .sum()
    }

    #[test]
    fn boson_commutator() {
        let space = space();
        let a = space.destroy(0).unwrap();
        let ad = space.create(0).unwrap();
        // a a+ = a+ a + 1
        let lhs = a.mul(&ad, &space);
        let n = OpProduct::from_atoms(vec![
            OpAtom::Create(Aon::new(0)),
            OpAtom::Destroy(Aon::new(0)),
        ]);
        assert_eq!(lhs.terms().len(), 2);
        assert_eq!(coeff_of(&lhs, &n), C64::from(1.0));
        assert_eq!(coeff_of(&lhs, &OpProduct::identity()), C64::from(1.0));
    }

    #[test]
    fn higher_fock_reordering() {
        let space = space();
        let a = space.destroy(0).unwrap();
        let ad = space.create(0).unwrap();
        let a2 = a.mul(&a, &space);
        let ad2 = ad.mul(&ad, &space);
        // a^2 a+^2 = a+^2 a^2 + 4 a+ a + 2
        let lhs = a2.mul(&ad2, &space);
        let aon = Aon::new(0);
        let n = OpProduct::from_atoms(vec![
            OpAtom::Create(aon), OpAtom::Destroy(aon),
        ]);
        let n2 = OpProduct::from_atoms(vec![
            OpAtom::Create(aon), OpAtom::Create(aon),
            OpAtom::Destroy(aon), OpAtom::Destroy(aon),
        ]);
        assert_eq!(coeff_of(&lhs, &n2), C64::from(1.0));
        assert_eq!(coeff_of(&lhs, &n), C64::from(4.0));
        assert_eq!(coeff_of(&lhs, &OpProduct::identity()), C64::from(2.0));
    }

    #[test]
    fn transition_composition() {
        let space = space();
        let sm = space.transition(1, "g", "e").unwrap();
        let sp = space.transition(1, "e", "g").unwrap();
        // s- s+ = |g><g| = 1 - |e><e|
        let lhs = sm.mul(&sp, &space);
        let ee = OpProduct::from_atoms(vec![
            OpAtom::Transition(Aon::new(1), 1, 1),
        ]);
        assert_eq!(lhs.terms().len(), 2);
        assert_eq!(coeff_of(&lhs, &OpProduct::identity()), C64::from(1.0));
        assert_eq!(coeff_of(&lhs, &ee), C64::from(-1.0));
        // s+ s+ = 0
        assert!(sp.mul(&sp, &space).is_zero());
        // s+ s- = |e><e|
        let ne = sp.mul(&sm, &space);
        assert_eq!(ne.terms().len(), 1);
        assert_eq!(coeff_of(&ne, &ee), C64::from(1.0));
    }

    #[test]
    fn ground_projector_eliminated() {
        let space = space();
        let pg = space.projector(1, "g").unwrap();
        assert_eq!(pg.terms().len(), 2);
        assert_eq!(coeff_of(&pg, &OpProduct::identity()), C64::from(1.0));
        let pe = space.projector(1, "e").unwrap();
        assert_eq!(pe.terms().len(), 1);
    }

    #[test]
    fn adjoint_is_involutive() {
        let space = space();
        let a = space.destroy(0).unwrap();
        let sp = space.transition(1, "e", "g").unwrap();
        let x = a.mul(&sp, &space) + space.create(0).unwrap() * C64::i();
        let xdd = x.adjoint().adjoint();
        assert_eq!(x, xdd);
    }

    #[test]
    fn constructor_validation() {
        let space = space();
        assert!(matches!(
            space.destroy(1),
            Err(Error::WrongComponentKind { .. }),
        ));
        assert!(matches!(
            space.transition(0, "g", "e"),
            Err(Error::WrongComponentKind { .. }),
        ));
        assert!(matches!(
            space.transition(1, "g", "x"),
            Err(Error::UnknownLevel { .. }),
        ));
        assert!(matches!(
            space.destroy(5),
            Err(Error::UndeclaredComponent { .. }),
        ));
        assert!(matches!(
            space.member_transition(1, 1, "g", "e"),
            Err(Error::WrongComponentKind { .. }),
        ));
    }

    #[test]
    fn unresolved_slot_factors_survive_products() {
        let space = space();
        let stray = Aon::new(7);
        let x: OpSum = OpProduct::from_atoms(vec![OpAtom::Destroy(stray)]).into();
        let y = x.mul(&x, &space);
        assert_eq!(y.terms().len(), 1);
        assert_eq!(y.terms()[0].1.degree(), 2);
        // mixed with a resolvable slot, the stray factors still come along
        let a = space.destroy(0).unwrap();
        let z = a.mul(&x, &space);
        assert_eq!(z.terms().len(), 1);
        assert_eq!(z.terms()[0].1.degree(), 2);
    }

    #[test]
    fn sums_merge_like_terms() {
        let space = space();
        let a = space.destroy(0).unwrap();
        let x = a.clone() + a.clone() * C64::from(2.0) - a.clone() * C64::from(3.0);
        assert!(x.is_zero());
        let g = Monomial::param(Parameter::new("g"));
        let y = a.clone() * g.clone() + a * g;
        assert_eq!(y.terms().len(), 1);
        assert_eq!(y.terms()[0].0.c(), C64::from(2.0));
    }
}
