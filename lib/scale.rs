//! Canonical relabeling of cluster member indices.
//!
//! Every average over a permutation-symmetric cluster is equal to the same
//! average with its member labels permuted. [`substitute_redundants`] picks
//! one representative per equivalence class: per cluster, the per-member
//! factor groups are sorted by [`lt_reference_order`] and renumbered `1..=k`.
//! Equation derivation canonicalizes every average it produces, so each
//! class contributes exactly one state variable.

use std::{ cmp::Ordering, collections::BTreeMap };
use indexmap::IndexMap;
use itertools::Itertools;
use rustc_hash::FxHashMap;
use crate::{
    average::AvgExpr,
    hilbert::ProductSpace,
    operator::{ Aon, Monomial, OpAtom, OpProduct, OpSum },
};

fn atom_key(atom: &OpAtom) -> (u8, usize, usize) {
    match atom {
        OpAtom::Create(_) => (0, 0, 0),
        OpAtom::Destroy(_) => (1, 0, 0),
        OpAtom::Transition(_, i, j) => (2, *i, *j),
    }
}

/// Strict total order on per-member factor groups, comparing operator
/// content only (slots are ignored).
///
/// Atoms compare by kind (creation, annihilation, transition) and then by
/// level pair; groups compare lexicographically, shorter-as-prefix first.
pub fn lt_reference_order(a: &[OpAtom], b: &[OpAtom]) -> Ordering {
    let ka: Vec<(u8, usize, usize)> = a.iter().map(atom_key).collect();
    let kb: Vec<(u8, usize, usize)> = b.iter().map(atom_key).collect();
    ka.cmp(&kb)
}

/// Relabel cluster member indices in `prod` to the canonical representative
/// of its permutation class.
///
/// Per cluster component, the factor groups of the used members are sorted
/// by [`lt_reference_order`] (ties broken by the old label, so the map is
/// deterministic) and renumbered `1..=k`. Idempotent, and invariant under
/// any permutation of the input labels. Non-cluster slots and generic
/// (unlabeled) cluster factors pass through untouched.
pub fn substitute_redundants(prod: &OpProduct, space: &ProductSpace)
    -> OpProduct
{
    let mut relabel: FxHashMap<Aon, Aon> = FxHashMap::default();
    for (idx, comp) in space.iter() {
        if !comp.is_cluster() { continue; }
        let mut groups: IndexMap<usize, Vec<OpAtom>> = IndexMap::new();
        for atom in prod.atoms().iter() {
            let aon = atom.aon();
            if aon.comp == idx {
                if let Some(m) = aon.member {
                    groups.entry(m).or_default().push(atom.clone());
                }
            }
        }
        let mut members: Vec<(usize, Vec<OpAtom>)> = groups.into_iter().collect();
        members.sort_by(|(ml, gl), (mr, gr)| {
            lt_reference_order(gl, gr).then(ml.cmp(mr))
        });
        for (rank, (old, _)) in members.into_iter().enumerate() {
            relabel.insert(
                Aon::member(idx, old),
                Aon::member(idx, rank + 1),
            );
        }
    }
    if relabel.is_empty() { return prod.clone(); }
    let atoms = prod.atoms().iter()
        .map(|atom| {
            match relabel.get(&atom.aon()) {
                Some(aon) => atom.with_aon(*aon),
                None => atom.clone(),
            }
        })
        .collect();
    OpProduct::from_atoms(atoms)
}

/// Apply [`substitute_redundants`] to every average in an expression.
pub fn canonicalize(expr: &AvgExpr, space: &ProductSpace) -> AvgExpr {
    expr.map_averages(|avg| {
        crate::average::Average::new(
            substitute_redundants(avg.product(), space)
        )
    })
}

/* Member instantiation **/

/// Distinct member labels of each cluster component used by `prod`,
/// ascending per component.
pub fn used_members(prod: &OpProduct, space: &ProductSpace)
    -> BTreeMap<usize, Vec<usize>>
{
    let mut used: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for atom in prod.atoms().iter() {
        let aon = atom.aon();
        if let Some(m) = aon.member {
            if space.get(aon.comp).map(|c| c.is_cluster()).unwrap_or(false) {
                let members = used.entry(aon.comp).or_default();
                if !members.contains(&m) { members.push(m); }
            }
        }
    }
    for members in used.values_mut() { members.sort(); }
    used
}

// Instantiation targets for one generic cluster slot, given the members the
// derivation target already uses: each used member with unit weight, plus a
// fresh member carrying the symbolic remainder N - k (kept as two monomial
// entries).
fn member_options(space: &ProductSpace, comp: usize, used: &[usize])
    -> Vec<(Monomial, usize)>
{
    let size = space.get(comp).ok()
        .and_then(|c| c.as_cluster())
        .map(|c| c.size().clone());
    let size = match size {
        Some(s) => s,
        None => { return vec![(Monomial::one(), 1)]; }
    };
    let k = used.len();
    let fresh = used.iter().copied().max().map(|m| m + 1).unwrap_or(1);
    let mut options: Vec<(Monomial, usize)> = used.iter()
        .map(|m| (Monomial::one(), *m))
        .collect();
    options.push((Monomial::param(size), fresh));
    if k > 0 {
        options.push((Monomial::from(-(k as f64)), fresh));
    }
    options
}

fn generic_comps(prod: &OpProduct, space: &ProductSpace) -> Vec<usize> {
    prod.atoms().iter()
        .map(|a| a.aon())
        .filter(|aon| {
            aon.member.is_none()
                && space.get(aon.comp)
                    .map(|c| c.is_cluster())
                    .unwrap_or(false)
        })
        .map(|aon| aon.comp)
        .dedup()
        .collect()
}

fn assign_members(prod: &OpProduct, assign: &FxHashMap<usize, usize>)
    -> OpProduct
{
    let atoms = prod.atoms().iter()
        .map(|atom| {
            let aon = atom.aon();
            match (aon.member, assign.get(&aon.comp)) {
                (None, Some(m)) => atom.with_aon(Aon::member(aon.comp, *m)),
                _ => atom.clone(),
            }
        })
        .collect();
    OpProduct::from_atoms(atoms)
}

/// Expand the generic cluster slots of a Hamiltonian, term by term, over the
/// members used by the derivation target.
///
/// Each term acting on the generic member of a cluster stands for a sum over
/// all `N` members; relative to a target using `k` distinct members, that
/// sum collapses to one copy per used member plus a fresh-member copy
/// weighted `N - k`. Terms without generic slots pass through.
pub fn instantiate_terms(
    sum: &OpSum,
    space: &ProductSpace,
    used: &BTreeMap<usize, Vec<usize>>,
) -> OpSum
{
    let empty: Vec<usize> = Vec::new();
    let mut terms: Vec<(Monomial, OpProduct)> = Vec::new();
    for (coeff, prod) in sum.terms().iter() {
        let comps = generic_comps(prod, space);
        if comps.is_empty() {
            terms.push((coeff.clone(), prod.clone()));
            continue;
        }
        let options: Vec<Vec<(Monomial, usize)>> = comps.iter()
            .map(|c| {
                member_options(space, *c, used.get(c).unwrap_or(&empty))
            })
            .collect();
        for combo in options.into_iter().multi_cartesian_product() {
            let mut weight = coeff.clone();
            let mut assign: FxHashMap<usize, usize> = FxHashMap::default();
            for (c, (w, m)) in comps.iter().zip(combo.into_iter()) {
                weight = weight * w;
                assign.insert(*c, m);
            }
            terms.push((weight, assign_members(prod, &assign)));
        }
    }
    OpSum::from_terms(terms)
}

/// Expand the generic cluster slots of a jump operator over the members used
/// by the derivation target.
///
/// Unlike a Hamiltonian, a generic jump stands for one dissipator per
/// member, so the member assignment is shared across the whole operator and
/// the weight multiplies the dissipator once. Returns `(weight, operator)`
/// pairs; an operator with no generic slots comes back as a single
/// unit-weight entry.
pub fn instantiate_jump(
    sum: &OpSum,
    space: &ProductSpace,
    used: &BTreeMap<usize, Vec<usize>>,
) -> Vec<(Monomial, OpSum)>
{
    let empty: Vec<usize> = Vec::new();
    let comps: Vec<usize> = sum.terms().iter()
        .flat_map(|(_, prod)| generic_comps(prod, space))
        .sorted()
        .dedup()
        .collect();
    if comps.is_empty() {
        return vec![(Monomial::one(), sum.clone())];
    }
    let options: Vec<Vec<(Monomial, usize)>> = comps.iter()
        .map(|c| member_options(space, *c, used.get(c).unwrap_or(&empty)))
        .collect();
    options.into_iter()
        .multi_cartesian_product()
        .map(|combo| {
            let mut weight = Monomial::one();
            let mut assign: FxHashMap<usize, usize> = FxHashMap::default();
            for (c, (w, m)) in comps.iter().zip(combo.into_iter()) {
                weight = weight * w;
                assign.insert(*c, m);
            }
            let inst = OpSum::from_terms(
                sum.terms().iter()
                    .map(|(coeff, prod)| {
                        (coeff.clone(), assign_members(prod, &assign))
                    })
                    .collect()
            );
            (weight, inst)
        })
        .collect()
}
