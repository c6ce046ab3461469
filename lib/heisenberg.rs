//! Heisenberg equations of motion for operator averages under Lindblad
//! dynamics, and the closure engine that completes them into a solvable
//! system.
//!
//! For a seed operator `s`, the equation of motion is
//!
//! ```text
//! d<s>/dt = i <[H, s]> + sum_m r_m <Jm+ s Jm - (Jm+ Jm s + s Jm+ Jm) / 2>
//! ```
//!
//! normal-ordered, cumulant-expanded at the set's order, and canonicalized
//! over cluster members. [`EquationSet::complete`] then walks the right-hand
//! sides for averages without an equation and derives them in discovery
//! order until the system is closed.

use indexmap::IndexMap;
use num_complex::Complex64 as C64;
use rustc_hash::FxHashSet;
use crate::{
    average::{ average_of, Average, AvgExpr },
    error::{ Error, Result },
    hilbert::ProductSpace,
    operator::{ Aon, Monomial, OpAtom, OpProduct, OpSum },
    scale,
};

/// A set of closed (or closing) equations of motion.
///
/// Keys are the canonical left-hand averages, in derivation order; of an
/// adjoint pair `{X, X+}` only the first-encountered member is kept, the
/// other being recoverable by conjugation. The generating model (space,
/// Hamiltonian, jumps, rates, order) is retained so the set can be extended.
#[derive(Clone, Debug)]
pub struct EquationSet {
    pub(crate) eqns: IndexMap<Average, AvgExpr>,
    pub(crate) space: ProductSpace,
    pub(crate) hamiltonian: OpSum,
    pub(crate) jumps: Vec<OpSum>,
    pub(crate) rates: Vec<Monomial>,
    pub(crate) order: usize,
}

/// Options for [`EquationSet::complete`].
#[derive(Clone, Copy)]
pub struct CompleteOpts<'a> {
    /// Keep a discovered average only if this returns `true`; rejected
    /// averages are zeroed in the final system.
    pub filter: Option<&'a dyn Fn(&Average) -> bool>,
    /// Reference component: discovered degree-1 averages acting only on
    /// this component are treated as known constants of the enclosing
    /// problem and zeroed rather than derived.
    pub reference: Option<usize>,
    /// Iteration cap; exceeded means [`Error::ClosureDiverged`].
    pub max_iter: usize,
}

impl Default for CompleteOpts<'_> {
    fn default() -> Self {
        Self { filter: None, reference: None, max_iter: 1000 }
    }
}

/// Derive the equations of motion for `seeds` under Hamiltonian `h` and
/// jump operators `jumps` with decay rates `rates`.
///
/// Every non-identity product in a seed sum becomes one left-hand side; a
/// generic cluster slot in a seed stands for one representative member. The
/// returned set is generally not closed; see [`EquationSet::complete`].
pub fn heisenberg(
    seeds: &[OpSum],
    h: &OpSum,
    jumps: &[OpSum],
    rates: &[Monomial],
    space: &ProductSpace,
    order: usize,
) -> Result<EquationSet>
{
    if jumps.len() != rates.len() {
        return Err(Error::RateMismatch {
            jumps: jumps.len(),
            rates: rates.len(),
        });
    }
    for (index, comp) in space.iter() {
        if let Some(cluster) = comp.as_cluster() {
            if cluster.order() < order {
                return Err(Error::ClusterOrder {
                    index,
                    tracked: cluster.order(),
                    order,
                });
            }
        }
    }
    let mut support: FxHashSet<usize> = FxHashSet::default();
    let model_prods = h.terms().iter()
        .map(|(_, p)| p)
        .chain(jumps.iter().flat_map(|j| j.terms().iter().map(|(_, p)| p)));
    for prod in model_prods {
        for comp in prod.acts_on() {
            space.get(comp)?;
            support.insert(comp);
        }
    }
    let mut set = EquationSet {
        eqns: IndexMap::new(),
        space: space.clone(),
        hamiltonian: h.clone(),
        jumps: jumps.to_vec(),
        rates: rates.to_vec(),
        order,
    };
    for seed in seeds.iter() {
        for (_, prod) in seed.terms().iter() {
            if prod.is_identity() { continue; }
            if let Some(outside)
                = prod.acts_on().into_iter().find(|c| !support.contains(c))
            {
                return Err(Error::UnsupportedSeed { index: outside });
            }
            // a generic cluster slot would otherwise survive as its own
            // slot while the instantiated dynamics name members explicitly
            let atoms: Vec<OpAtom> = prod.atoms().iter()
                .map(|atom| {
                    let aon = atom.aon();
                    let generic = aon.member.is_none()
                        && space.get(aon.comp)
                            .map(|c| c.is_cluster())
                            .unwrap_or(false);
                    if generic {
                        atom.with_aon(Aon::member(aon.comp, 1))
                    } else {
                        atom.clone()
                    }
                })
                .collect();
            let lhs = Average::new(scale::substitute_redundants(
                &OpProduct::from_atoms(atoms),
                space,
            ));
            set.push_equation(&lhs);
        }
    }
    Ok(set)
}

impl EquationSet {
    pub fn len(&self) -> usize { self.eqns.len() }

    pub fn is_empty(&self) -> bool { self.eqns.is_empty() }

    pub fn order(&self) -> usize { self.order }

    pub fn space(&self) -> &ProductSpace { &self.space }

    /// Iterate over `(lhs, rhs)` pairs in derivation order.
    pub fn iter(&self) -> impl Iterator<Item = (&Average, &AvgExpr)> {
        self.eqns.iter()
    }

    pub fn lhs(&self) -> impl Iterator<Item = &Average> {
        self.eqns.keys()
    }

    pub fn get(&self, avg: &Average) -> Option<&AvgExpr> {
        self.eqns.get(avg)
    }

    /// `true` if `avg` or its adjoint has an equation.
    pub fn contains(&self, avg: &Average) -> bool {
        self.eqns.contains_key(avg) || self.eqns.contains_key(&avg.adjoint())
    }

    /// Derive and append the equation for `lhs` if neither it nor its
    /// adjoint is present.
    fn push_equation(&mut self, lhs: &Average) {
        if self.contains(lhs) { return; }
        let rhs = self.derive_rhs(lhs.product());
        self.eqns.insert(lhs.clone(), rhs);
    }

    /// The full Lindblad right-hand side for `d<target>/dt`.
    pub(crate) fn derive_rhs(&self, target: &OpProduct) -> AvgExpr {
        let space = &self.space;
        let s: OpSum = target.clone().into();
        let used = scale::used_members(target, space);
        let h = scale::instantiate_terms(&self.hamiltonian, space, &used);
        let mut rhs = (h.mul(&s, space) - s.mul(&h, space)) * C64::i();
        for (jump, rate) in self.jumps.iter().zip(self.rates.iter()) {
            for (weight, j) in
                scale::instantiate_jump(jump, space, &used).into_iter()
            {
                let jd = j.adjoint();
                let jdj = jd.mul(&j, space);
                let diss = jd.mul(&s, space).mul(&j, space)
                    - (jdj.mul(&s, space) + s.mul(&jdj, space))
                        * C64::from(0.5);
                rhs = rhs + diss * (weight * rate.clone());
            }
        }
        let expr = average_of(&rhs, self.order);
        scale::canonicalize(&expr, space)
    }

    /// Close the system: repeatedly collect right-hand-side averages with no
    /// equation, in discovery order, and derive equations for them.
    ///
    /// Discovered averages rejected by the filter or by the reference rule
    /// get no equation; after the fixed point is reached, every term
    /// containing a rejected average is replaced by zero. Averages are
    /// identified up to adjoints throughout.
    pub fn complete(&mut self, opts: CompleteOpts<'_>) -> Result<()> {
        let mut rejected: FxHashSet<Average> = FxHashSet::default();
        let mut closed = false;
        for _ in 0..opts.max_iter {
            let missing = self.missing(&mut rejected, &opts);
            if missing.is_empty() {
                closed = true;
                break;
            }
            for avg in missing.into_iter() {
                self.push_equation(&avg);
            }
        }
        if !(closed || self.missing(&mut rejected, &opts).is_empty()) {
            return Err(Error::ClosureDiverged { iterations: opts.max_iter });
        }
        if !rejected.is_empty() {
            for rhs in self.eqns.values_mut() {
                *rhs = rhs.zero_averages(|a| {
                    rejected.contains(a) || rejected.contains(&a.adjoint())
                });
            }
        }
        Ok(())
    }

    /// Averages appearing on right-hand sides with no equation, in
    /// discovery order; classifies rejections as a side effect.
    fn missing(
        &self,
        rejected: &mut FxHashSet<Average>,
        opts: &CompleteOpts<'_>,
    ) -> Vec<Average>
    {
        let mut missing: Vec<Average> = Vec::new();
        for rhs in self.eqns.values() {
            for avg in rhs.averages().into_iter() {
                if self.contains(avg)
                    || rejected.contains(avg)
                    || rejected.contains(&avg.adjoint())
                    || missing.iter().any(|m| {
                        m == avg || *m == avg.adjoint()
                    })
                { continue; }
                let ref_dropped = opts.reference
                    .map(|rc| avg.degree() == 1 && avg.acts_on() == [rc])
                    .unwrap_or(false);
                if ref_dropped
                    || opts.filter.map(|f| !f(avg)).unwrap_or(false)
                {
                    rejected.insert(avg.clone());
                } else {
                    missing.push(avg.clone());
                }
            }
        }
        missing
    }
}

/// `true` if the average is invariant under the global U(1) rotation
/// `a -> a e^{-i phi}`, `|i><j| -> |i><j| e^{i(i - j) phi}` counting level
/// indices up the ladder.
///
/// Useful as a closure filter for rotating-frame models, where only
/// phase-invariant averages are nonzero in steady state.
pub fn phase_invariant(avg: &Average) -> bool {
    let weight: i64 = avg.product().atoms().iter()
        .map(|atom| match atom {
            OpAtom::Create(_) => 1,
            OpAtom::Destroy(_) => -1,
            OpAtom::Transition(_, i, j)
                => (*i as i64 - *j as i64).signum(),
        })
        .sum();
    weight == 0
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        hilbert::{ ClusterSpace, FockSpace, NLevelSpace },
        operator::Parameter,
    };

    struct Laser {
        space: ProductSpace,
        h: OpSum,
        jumps: Vec<OpSum>,
        rates: Vec<Monomial>,
    }

    // cavity mode + one cluster of two-level atoms:
    // H = D sum_j ee_j + g sum_j (a+ s_j^ge + a s_j^eg),
    // jumps a (kappa), s_j^ge (gamma), s_j^eg (nu)
    fn laser(cluster_sizes: &[&str]) -> Laser {
        let mut space = ProductSpace::new();
        let cav = space.push(FockSpace::new("cavity"));
        let clusters: Vec<usize> = cluster_sizes.iter()
            .map(|n| {
                space.push(ClusterSpace::new(
                    NLevelSpace::new("atom", ["g", "e"]).into(),
                    Parameter::new(n),
                    2,
                ))
            })
            .collect();
        let delta = Monomial::param(Parameter::new("D"));
        let g = Monomial::param(Parameter::new("g"));
        let mut h = OpSum::zero();
        let mut jumps = vec![space.destroy(cav).unwrap()];
        let mut rates = vec![Monomial::param(Parameter::new("kappa"))];
        for c in clusters.into_iter() {
            let sm = space.transition(c, "g", "e").unwrap();
            let sp = space.transition(c, "e", "g").unwrap();
            let ee = space.projector(c, "e").unwrap();
            h = h + ee * delta.clone()
                + space.create(cav).unwrap().mul(&sm, &space) * g.clone()
                + space.destroy(cav).unwrap().mul(&sp, &space) * g.clone();
            jumps.push(sm);
            jumps.push(sp);
            rates.push(Monomial::param(Parameter::new("gamma")));
            rates.push(Monomial::param(Parameter::new("nu")));
        }
        Laser { space, h, jumps, rates }
    }

    fn photon_number(space: &ProductSpace) -> OpSum {
        space.create(0).unwrap().mul(&space.destroy(0).unwrap(), space)
    }

    fn assert_closed(set: &EquationSet) {
        for (_, rhs) in set.iter() {
            for avg in rhs.averages().into_iter() {
                assert!(set.contains(avg), "unclosed average {}", avg);
            }
        }
    }

    #[test]
    fn laser_filtered_closure() {
        let Laser { space, h, jumps, rates } = laser(&["N"]);
        let seeds = vec![photon_number(&space)];
        let mut set = heisenberg(&seeds, &h, &jumps, &rates, &space, 2)
            .unwrap();
        set.complete(CompleteOpts {
            filter: Some(&phase_invariant),
            ..Default::default()
        }).unwrap();
        // <a+ a>, <ee_1>, <a+ s_1^ge> (or adjoint), <s_1^ge s_2^eg>
        assert_eq!(set.len(), 4);
        assert_closed(&set);
        assert!(set.lhs().all(phase_invariant));
    }

    #[test]
    fn two_clusters_close_to_eight() {
        let Laser { space, h, jumps, rates } = laser(&["N1", "N2"]);
        let seeds = vec![photon_number(&space)];
        let mut set = heisenberg(&seeds, &h, &jumps, &rates, &space, 2)
            .unwrap();
        set.complete(CompleteOpts {
            filter: Some(&phase_invariant),
            ..Default::default()
        }).unwrap();
        // per cluster: ee, a+ s^ge, pair; plus photon number and the
        // cross-cluster pair
        assert_eq!(set.len(), 8);
        assert_closed(&set);
    }

    fn single_atom() -> Laser {
        let mut space = ProductSpace::new();
        let cav = space.push(FockSpace::new("cavity"));
        let atom = space.push(NLevelSpace::new("atom", ["g", "e"]));
        let g = Monomial::param(Parameter::new("g"));
        let delta = Monomial::param(Parameter::new("D"));
        let sm = space.transition(atom, "g", "e").unwrap();
        let sp = space.transition(atom, "e", "g").unwrap();
        let h = space.projector(atom, "e").unwrap() * delta
            + space.create(cav).unwrap().mul(&sm, &space) * g.clone()
            + space.destroy(cav).unwrap().mul(&sp, &space) * g;
        let jumps = vec![space.destroy(cav).unwrap(), sm, sp];
        let rates = vec![
            Monomial::param(Parameter::new("kappa")),
            Monomial::param(Parameter::new("gamma")),
            Monomial::param(Parameter::new("nu")),
        ];
        Laser { space, h, jumps, rates }
    }

    #[test]
    fn unfiltered_single_atom_closure() {
        let Laser { space, h, jumps, rates } = single_atom();
        let seeds = vec![space.destroy(0).unwrap()];
        let mut set = heisenberg(&seeds, &h, &jumps, &rates, &space, 2)
            .unwrap();
        set.complete(CompleteOpts::default()).unwrap();
        assert_eq!(set.len(), 8);
        assert_closed(&set);
    }

    #[test]
    fn reference_rule_drops_cavity_amplitudes() {
        let Laser { space, h, jumps, rates } = single_atom();
        let seeds = vec![photon_number(&space)];
        let mut set = heisenberg(&seeds, &h, &jumps, &rates, &space, 2)
            .unwrap();
        set.complete(CompleteOpts {
            reference: Some(0),
            ..Default::default()
        }).unwrap();
        assert_eq!(set.len(), 7);
        assert_closed(&set);
        // no bare cavity amplitude survives
        assert!(
            set.lhs().all(|avg| {
                !(avg.degree() == 1 && avg.acts_on() == [0])
            })
        );
    }

    #[test]
    fn closure_cap() {
        let Laser { space, h, jumps, rates } = single_atom();
        let seeds = vec![space.destroy(0).unwrap()];
        let mut set = heisenberg(&seeds, &h, &jumps, &rates, &space, 2)
            .unwrap();
        let res = set.complete(CompleteOpts {
            max_iter: 1,
            ..Default::default()
        });
        assert!(matches!(res, Err(Error::ClosureDiverged { iterations: 1 })));
    }

    #[test]
    fn generic_seed_names_one_member() {
        let Laser { space, h, jumps, rates } = laser(&["N"]);
        let generic = vec![space.transition(1, "e", "e").unwrap()];
        let labeled = vec![space.member_transition(1, 1, "e", "e").unwrap()];
        let mut a = heisenberg(&generic, &h, &jumps, &rates, &space, 2)
            .unwrap();
        let mut b = heisenberg(&labeled, &h, &jumps, &rates, &space, 2)
            .unwrap();
        let opts = CompleteOpts {
            filter: Some(&phase_invariant),
            ..Default::default()
        };
        a.complete(opts).unwrap();
        b.complete(opts).unwrap();
        assert_eq!(a.len(), b.len());
        for ((la, ra), (lb, rb)) in a.iter().zip(b.iter()) {
            assert_eq!(la, lb);
            assert_eq!(ra, rb);
        }
    }

    #[test]
    fn cluster_member_budget_is_enforced() {
        let mut space = ProductSpace::new();
        let cav = space.push(FockSpace::new("cavity"));
        let atoms = space.push(ClusterSpace::new(
            NLevelSpace::new("atom", ["g", "e"]).into(),
            Parameter::new("N"),
            1,
        ));
        let g = Monomial::param(Parameter::new("g"));
        let sm = space.transition(atoms, "g", "e").unwrap();
        let sp = space.transition(atoms, "e", "g").unwrap();
        let h = space.create(cav).unwrap().mul(&sm, &space) * g.clone()
            + space.destroy(cav).unwrap().mul(&sp, &space) * g;
        let jumps = vec![space.destroy(cav).unwrap()];
        let rates = vec![Monomial::param(Parameter::new("kappa"))];
        let res = heisenberg(
            &[photon_number(&space)], &h, &jumps, &rates, &space, 2,
        );
        assert!(matches!(
            res,
            Err(Error::ClusterOrder { index: 1, tracked: 1, order: 2 }),
        ));
    }

    #[test]
    fn undeclared_component_in_model_is_an_error() {
        let Laser { space, h, jumps, rates } = single_atom();
        let stray: OpSum
            = OpProduct::from_atoms(vec![OpAtom::Destroy(Aon::new(9))]).into();
        let res = heisenberg(
            &[space.destroy(0).unwrap()],
            &(h + stray),
            &jumps,
            &rates,
            &space,
            2,
        );
        assert!(matches!(
            res,
            Err(Error::UndeclaredComponent { index: 9, .. }),
        ));
    }

    #[test]
    fn rate_mismatch() {
        let Laser { space, h, jumps, .. } = single_atom();
        let seeds = vec![space.destroy(0).unwrap()];
        let res = heisenberg(
            &seeds, &h, &jumps,
            &[Monomial::param(Parameter::new("kappa"))],
            &space, 2,
        );
        assert!(matches!(res, Err(Error::RateMismatch { jumps: 3, rates: 1 })));
    }

    #[test]
    fn unsupported_seed() {
        let Laser { mut space, h, jumps, rates } = single_atom();
        let other = space.push(FockSpace::new("idler"));
        let seeds = vec![space.destroy(other).unwrap()];
        let res = heisenberg(&seeds, &h, &jumps, &rates, &space, 2);
        assert!(matches!(res, Err(Error::UnsupportedSeed { index }) if index == other));
    }

    #[test]
    fn adjoint_pairs_collapse_to_one_lhs() {
        let Laser { space, h, jumps, rates } = single_atom();
        let seeds = vec![
            space.destroy(0).unwrap(),
            space.create(0).unwrap(),
        ];
        let set = heisenberg(&seeds, &h, &jumps, &rates, &space, 2).unwrap();
        assert_eq!(set.len(), 1);
    }
}
