//! Two-time correlation functions `g(tau) = <A(t + tau) B(t)>` and the
//! stationary spectra they Fourier-transform into.
//!
//! The second operator is frozen at the earlier time by embedding a mirror
//! copy of the components it touches into the product space; the mirrored
//! factor then rides along as a spectator while the usual Heisenberg
//! machinery evolves the first operator in `tau`. Every equation of the
//! resulting system is linear in the mirror-carrying averages, with
//! coefficients built from ordinary (base) averages frozen at their
//! steady-state values, so the spectrum reduces to one complex linear solve
//! per frequency.

use indexmap::IndexMap;
use ndarray::{ Array1, Array2 };
use ndarray_linalg::Solve;
use num_complex::Complex64 as C64;
use crate::{
    average::{ average_of, Average, AvgExpr, Term },
    error::{ Error, Result },
    heisenberg::EquationSet,
    operator::{ Aon, OpProduct, OpSum, Parameter },
    scale,
};

/// Options for [`CorrelationFunction::new`].
#[derive(Clone, Copy)]
pub struct CorrelationOpts<'a> {
    /// Treat the base system as stationary: degree-1 averages living purely
    /// on the mirror copy are constants of the `tau` evolution and get no
    /// equation.
    pub steady_state: bool,
    /// Name suffix for the mirrored components.
    pub add_subscript: &'a str,
    /// Closure iteration cap for the `tau` system.
    pub max_iter: usize,
}

impl Default for CorrelationOpts<'_> {
    fn default() -> Self {
        Self { steady_state: true, add_subscript: "_0", max_iter: 1000 }
    }
}

/// The closed `tau`-evolution system for `<op1(t + tau) op2(t)>`.
pub struct CorrelationFunction {
    pub(crate) set: EquationSet,
    base_len: usize,
    mirror_of: IndexMap<usize, usize>,
    constants: Vec<Average>,
    pub(crate) seed: AvgExpr,
    inits: Vec<AvgExpr>,
}

impl CorrelationFunction {
    /// Derive the `tau` equations for `<op1(t + tau) op2(t)>` on top of a
    /// derived base system.
    ///
    /// Requires the base cumulant order to be at least 2: at first order
    /// every two-time average factorizes and the correlation carries no
    /// information beyond the base averages.
    pub fn new(
        op1: &OpSum,
        op2: &OpSum,
        base: &EquationSet,
        opts: CorrelationOpts<'_>,
    ) -> Result<Self>
    {
        let order = base.order();
        if order < 2 {
            return Err(Error::CorrelationOrder { order });
        }
        let base_len = base.space().len();
        for comp in op1.terms().iter().flat_map(|(_, p)| p.acts_on()) {
            base.space().get(comp)?;
        }
        let mut space = base.space().clone();
        let mut mirror_of: IndexMap<usize, usize> = IndexMap::new();
        let touched: Vec<usize> = op2.terms().iter()
            .flat_map(|(_, p)| p.acts_on())
            .fold(Vec::new(), |mut acc, c| {
                if !acc.contains(&c) { acc.push(c); }
                acc
            });
        for comp in touched.into_iter() {
            let copy = space.get(comp)?.add_subscript(opts.add_subscript);
            let idx = space.push(copy);
            mirror_of.insert(idx, comp);
        }
        let op2m = remap(op2, &|c| {
            mirror_of.iter()
                .find(|(_, orig)| **orig == c)
                .map(|(m, _)| *m)
                .unwrap_or(c)
        });
        let mut set = EquationSet {
            eqns: IndexMap::new(),
            space: space.clone(),
            hamiltonian: base.hamiltonian.clone(),
            jumps: base.jumps.clone(),
            rates: base.rates.clone(),
            order,
        };
        let seed = scale::canonicalize(
            &average_of(&op1.mul(&op2m, &space), order),
            &space,
        );
        let mut constants: Vec<Average> = Vec::new();
        let mut closed = false;
        for _ in 0..opts.max_iter {
            let missing
                = tau_missing(&seed, &set, base_len, &constants, &opts);
            if missing.is_empty() {
                closed = true;
                break;
            }
            for avg in missing.into_iter() {
                match classify(&avg, base_len, &opts) {
                    TauClass::Derive => {
                        let rhs = set.derive_rhs(avg.product());
                        set.eqns.insert(avg, rhs);
                    }
                    TauClass::Constant => { constants.push(avg); }
                    TauClass::Base => {}
                }
            }
        }
        if !closed {
            return Err(Error::ClosureDiverged { iterations: opts.max_iter });
        }
        let inits: Vec<AvgExpr> = set.eqns.keys()
            .map(|avg| {
                init_expr(avg.product(), base_len, &mirror_of, base, order)
            })
            .collect();
        Ok(Self { set, base_len, mirror_of, constants, seed, inits })
    }

    /// Number of `tau` variables.
    pub fn len(&self) -> usize { self.set.eqns.len() }

    pub fn is_empty(&self) -> bool { self.set.eqns.is_empty() }

    /// The `tau` variables, in derivation order.
    pub fn variables(&self) -> impl Iterator<Item = &Average> {
        self.set.eqns.keys()
    }

    /// Equations of motion in `tau` for each variable.
    pub fn equations(&self) -> impl Iterator<Item = (&Average, &AvgExpr)> {
        self.set.eqns.iter()
    }

    /// Initial (`tau = 0`) values of the variables: the mirror factor is
    /// mapped back onto the original components, the product re-ordered and
    /// cumulant-expanded at the base order, and the result evaluated against
    /// the base state through `lookup`.
    pub fn initial_values<F>(
        &self,
        params: &IndexMap<Parameter, C64>,
        mut lookup: F,
    ) -> Result<Array1<C64>>
    where F: FnMut(&Average) -> Result<C64>
    {
        self.inits.iter()
            .map(|expr| expr.eval(params, &mut lookup))
            .collect()
    }
}

enum TauClass {
    /// Ordinary average on the original components; a frozen known.
    Base,
    /// Pure-mirror stationary constant.
    Constant,
    /// Mirror-carrying average needing a `tau` equation.
    Derive,
}

fn classify(avg: &Average, base_len: usize, opts: &CorrelationOpts<'_>)
    -> TauClass
{
    let acts = avg.acts_on();
    if acts.iter().all(|c| *c < base_len) {
        TauClass::Base
    } else if opts.steady_state
        && avg.degree() == 1
        && acts.iter().all(|c| *c >= base_len)
    {
        TauClass::Constant
    } else {
        TauClass::Derive
    }
}

// Averages discovered in the seed or on any rhs that still need
// classification, in discovery order; no adjoint collapsing, since the
// linear extraction wants every mirror average as its own variable.
fn tau_missing(
    seed: &AvgExpr,
    set: &EquationSet,
    base_len: usize,
    constants: &[Average],
    opts: &CorrelationOpts<'_>,
) -> Vec<Average>
{
    let mut missing: Vec<Average> = Vec::new();
    let exprs = std::iter::once(seed).chain(set.eqns.values());
    for expr in exprs {
        for avg in expr.averages().into_iter() {
            if set.eqns.contains_key(avg)
                || constants.contains(avg)
                || missing.contains(avg)
            { continue; }
            match classify(avg, base_len, opts) {
                TauClass::Base => {}
                _ => { missing.push(avg.clone()); }
            }
        }
    }
    missing
}

fn remap(op: &OpSum, f: &dyn Fn(usize) -> usize) -> OpSum {
    OpSum::from_terms(
        op.terms().iter()
            .map(|(coeff, prod)| {
                let atoms = prod.atoms().iter()
                    .map(|atom| {
                        let aon = atom.aon();
                        atom.with_aon(Aon {
                            comp: f(aon.comp),
                            member: aon.member,
                        })
                    })
                    .collect();
                (coeff.clone(), OpProduct::from_atoms(atoms))
            })
            .collect()
    )
}

// <X M'>(tau = 0) as a base-space expression: X stays left, the mirror
// factor folds back onto the original components on the right.
fn init_expr(
    prod: &OpProduct,
    base_len: usize,
    mirror_of: &IndexMap<usize, usize>,
    base: &EquationSet,
    order: usize,
) -> AvgExpr
{
    let base_atoms: Vec<_> = prod.atoms().iter()
        .filter(|a| a.aon().comp < base_len)
        .cloned()
        .collect();
    let mirror_atoms: Vec<_> = prod.atoms().iter()
        .filter(|a| a.aon().comp >= base_len)
        .map(|a| {
            let aon = a.aon();
            let comp = mirror_of.get(&aon.comp).copied().unwrap_or(aon.comp);
            a.with_aon(Aon { comp, member: aon.member })
        })
        .collect();
    let folded = OpSum::from(OpProduct::from_atoms(base_atoms))
        .mul(
            &OpSum::from(OpProduct::from_atoms(mirror_atoms)),
            base.space(),
        );
    scale::canonicalize(&average_of(&folded, order), base.space())
}

/// The stationary spectrum of a [`CorrelationFunction`]:
/// `S(w) = 2 Re integral_0^inf dtau e^{-i w tau} g(tau)`, with the
/// delta-peaked coherent part omitted.
///
/// The `tau` system `dc/dtau = M c + v` (base averages frozen) gives
/// `S(w) = 2 Re sum_k s_k x_k` with `(i w I - M) x = c(0) + v / (i w)`,
/// where `s` are the weights of the seed average in the variables.
pub struct Spectrum {
    m: Vec<Vec<AvgExpr>>,
    v: Vec<AvgExpr>,
    c0: Vec<AvgExpr>,
    seed_rows: Vec<(usize, AvgExpr)>,
}

impl Spectrum {
    /// Extract the frozen linear system from a correlation function.
    ///
    /// Fails with [`Error::NonlinearCorrelation`] if any term carries more
    /// (or fewer) than one mirror-side factor.
    pub fn new(corr: &CorrelationFunction) -> Result<Self> {
        let vars: IndexMap<&Average, usize> = corr.set.eqns.keys()
            .enumerate()
            .map(|(k, avg)| (avg, k))
            .collect();
        let n = vars.len();
        let mut m: Vec<Vec<Vec<Term>>> = vec![vec![Vec::new(); n]; n];
        let mut v: Vec<Vec<Term>> = vec![Vec::new(); n];
        for (i, rhs) in corr.set.eqns.values().enumerate() {
            for term in rhs.terms().iter() {
                let (j, coeff) = corr.linear_term(term, &vars)?;
                match j {
                    Some(j) => { m[i][j].push(coeff); }
                    None => { v[i].push(coeff); }
                }
            }
        }
        let mut seed_rows: Vec<(usize, AvgExpr)> = Vec::new();
        for term in corr.seed.terms().iter() {
            let (base, mirror) = split_avgs(term, corr.base_len);
            // pure-base and constant-mirror parts are delta contributions
            if mirror.len() != 1 { continue; }
            match vars.get(&mirror[0]) {
                Some(k) => {
                    seed_rows.push((
                        *k,
                        AvgExpr::from_terms(
                            vec![Term::new(term.coeff.clone(), base)]
                        ),
                    ));
                }
                None => {}
            }
        }
        let collect = |rows: Vec<Vec<Term>>| -> Vec<AvgExpr> {
            rows.into_iter().map(AvgExpr::from_terms).collect()
        };
        Ok(Self {
            m: m.into_iter().map(collect).collect(),
            v: collect(v),
            c0: corr.inits.clone(),
            seed_rows,
        })
    }

    /// Evaluate the spectrum at angular frequency `omega`, resolving base
    /// averages through `lookup`.
    pub fn eval<F>(
        &self,
        omega: f64,
        params: &IndexMap<Parameter, C64>,
        mut lookup: F,
    ) -> Result<f64>
    where F: FnMut(&Average) -> Result<C64>
    {
        let n = self.c0.len();
        let iw = C64::i() * omega;
        let mut a: Array2<C64> = Array2::zeros((n, n));
        for (i, row) in self.m.iter().enumerate() {
            for (j, expr) in row.iter().enumerate() {
                a[(i, j)] = -expr.eval(params, &mut lookup)?;
            }
            a[(i, i)] += iw;
        }
        let mut b: Array1<C64> = Array1::zeros(n);
        for (i, (c0, v)) in self.c0.iter().zip(self.v.iter()).enumerate() {
            b[i] = c0.eval(params, &mut lookup)?;
            if !v.is_zero() {
                let drive = v.eval(params, &mut lookup)?;
                if omega == 0.0 {
                    // the 1 / (i w) drive term is singular here
                    if drive.norm() > 0.0 {
                        return Err(Error::ZeroFrequencyDrive);
                    }
                } else {
                    b[i] += drive / iw;
                }
            }
        }
        let x = a.solve_into(b)?;
        let mut g = C64::from(0.0);
        for (k, weight) in self.seed_rows.iter() {
            g += weight.eval(params, &mut lookup)? * x[*k];
        }
        Ok(2.0 * g.re)
    }
}

impl CorrelationFunction {
    // Resolve one rhs term into (variable index, frozen coefficient); a
    // constant mirror factor folds back to base and lands in the drive
    // vector (index None).
    fn linear_term(
        &self,
        term: &Term,
        vars: &IndexMap<&Average, usize>,
    ) -> Result<(Option<usize>, Term)>
    {
        let (mut base, mirror) = split_avgs(term, self.base_len);
        if mirror.len() != 1 {
            return Err(Error::NonlinearCorrelation);
        }
        let mv = &mirror[0];
        if let Some(j) = vars.get(mv) {
            Ok((Some(*j), Term::new(term.coeff.clone(), base)))
        } else if self.constants.contains(mv) {
            let folded = mv.product().atoms().iter()
                .map(|a| {
                    let aon = a.aon();
                    let comp = self.mirror_of.get(&aon.comp)
                        .copied()
                        .unwrap_or(aon.comp);
                    a.with_aon(Aon { comp, member: aon.member })
                })
                .collect();
            base.push(Average::new(OpProduct::from_atoms(folded)));
            Ok((None, Term::new(term.coeff.clone(), base)))
        } else {
            Err(Error::MissingAverage { average: mv.to_string() })
        }
    }
}

fn split_avgs(term: &Term, base_len: usize) -> (Vec<Average>, Vec<Average>) {
    let mut base: Vec<Average> = Vec::new();
    let mut mirror: Vec<Average> = Vec::new();
    for avg in term.avgs.iter() {
        if avg.acts_on().into_iter().any(|c| c >= base_len) {
            mirror.push(avg.clone());
        } else {
            base.push(avg.clone());
        }
    }
    (base, mirror)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        heisenberg::{ heisenberg, CompleteOpts },
        hilbert::{ FockSpace, ProductSpace },
        operator::Monomial,
    };

    // cavity with detuning D, loss kappa, and incoherent drive kappa_in:
    // n_ss = kappa_in / (kappa - kappa_in), linewidth G = kappa - kappa_in,
    // S(w) = n_ss G / ((w - D)^2 + G^2/4)
    fn thermal_cavity() -> (ProductSpace, EquationSet) {
        let mut space = ProductSpace::new();
        let cav = space.push(FockSpace::new("cavity"));
        let h = space.create(cav).unwrap()
            .mul(&space.destroy(cav).unwrap(), &space)
            * Monomial::param(Parameter::new("D"));
        let jumps = vec![
            space.destroy(cav).unwrap(),
            space.create(cav).unwrap(),
        ];
        let rates = vec![
            Monomial::param(Parameter::new("kappa")),
            Monomial::param(Parameter::new("kappa_in")),
        ];
        let seeds = vec![
            space.create(cav).unwrap()
                .mul(&space.destroy(cav).unwrap(), &space),
        ];
        let mut set = heisenberg(&seeds, &h, &jumps, &rates, &space, 2)
            .unwrap();
        set.complete(CompleteOpts::default()).unwrap();
        (space, set)
    }

    fn params() -> IndexMap<Parameter, C64> {
        [
            ("D", 0.5),
            ("kappa", 2.0),
            ("kappa_in", 1.0),
        ].into_iter()
            .map(|(name, x)| (Parameter::new(name), C64::from(x)))
            .collect()
    }

    // steady state of the base system: <a+ a> = n_ss, everything else zero
    fn base_lookup(n_ss: f64)
        -> impl FnMut(&Average) -> crate::Result<C64>
    {
        move |avg: &Average| {
            if avg.degree() == 2 && avg.is_self_adjoint() {
                Ok(C64::from(n_ss))
            } else {
                Ok(C64::from(0.0))
            }
        }
    }

    #[test]
    fn tau_system_is_one_dimensional() {
        let (space, set) = thermal_cavity();
        let corr = CorrelationFunction::new(
            &space.create(0).unwrap(),
            &space.destroy(0).unwrap(),
            &set,
            CorrelationOpts::default(),
        ).unwrap();
        assert_eq!(corr.len(), 1);
        let var = corr.variables().next().unwrap();
        assert_eq!(var.degree(), 2);
        assert_eq!(var.acts_on(), vec![0, 1]);
    }

    #[test]
    fn initial_value_is_steady_photon_number() {
        let (space, set) = thermal_cavity();
        let corr = CorrelationFunction::new(
            &space.create(0).unwrap(),
            &space.destroy(0).unwrap(),
            &set,
            CorrelationOpts::default(),
        ).unwrap();
        let c0 = corr.initial_values(&params(), base_lookup(1.0)).unwrap();
        assert_eq!(c0.len(), 1);
        assert!((c0[0] - C64::from(1.0)).norm() < 1.0e-12);
    }

    #[test]
    fn lorentzian_spectrum() {
        let (space, set) = thermal_cavity();
        let corr = CorrelationFunction::new(
            &space.create(0).unwrap(),
            &space.destroy(0).unwrap(),
            &set,
            CorrelationOpts::default(),
        ).unwrap();
        let spec = Spectrum::new(&corr).unwrap();
        let ps = params();
        // n_ss = 1, G = 1: S(D) = 4, S(D +- 1/2) = 2
        let s_peak = spec.eval(0.5, &ps, base_lookup(1.0)).unwrap();
        assert!((s_peak - 4.0).abs() < 1.0e-9, "S(0.5) = {}", s_peak);
        let s_left = spec.eval(0.0, &ps, base_lookup(1.0)).unwrap();
        let s_right = spec.eval(1.0, &ps, base_lookup(1.0)).unwrap();
        assert!((s_left - 2.0).abs() < 1.0e-9);
        assert!((s_right - 2.0).abs() < 1.0e-9);
    }

    #[test]
    fn coherent_drive_blocks_zero_frequency() {
        let mut space = ProductSpace::new();
        let cav = space.push(FockSpace::new("cavity"));
        let a = space.destroy(cav).unwrap();
        let ad = space.create(cav).unwrap();
        let h = ad.mul(&a, &space) * Monomial::param(Parameter::new("D"))
            + (a.clone() + ad.clone()) * Monomial::param(Parameter::new("W"));
        let jumps = vec![a.clone()];
        let rates = vec![Monomial::param(Parameter::new("kappa"))];
        let mut set = heisenberg(&[a.clone()], &h, &jumps, &rates, &space, 2)
            .unwrap();
        set.complete(CompleteOpts::default()).unwrap();
        let corr = CorrelationFunction::new(
            &ad, &a, &set, CorrelationOpts::default(),
        ).unwrap();
        let spec = Spectrum::new(&corr).unwrap();
        let ps: IndexMap<Parameter, C64> = [
            ("D", 0.5),
            ("W", 1.0),
            ("kappa", 2.0),
        ].into_iter()
            .map(|(name, x)| (Parameter::new(name), C64::from(x)))
            .collect();
        fn amp(avg: &Average) -> crate::Result<C64> {
            let z = if avg.degree() == 1 { 0.4 } else { 1.0 };
            Ok(C64::from(z))
        }
        // the d<a+ a'>/dtau equation carries the constant i W <a'>, so the
        // drive vector is nonzero and the transform diverges at w = 0
        let res = spec.eval(0.0, &ps, amp);
        assert!(matches!(res, Err(Error::ZeroFrequencyDrive)));
        let s = spec.eval(0.25, &ps, amp).unwrap();
        assert!(s.is_finite());
    }

    #[test]
    fn first_order_base_is_rejected() {
        let mut space = ProductSpace::new();
        let cav = space.push(FockSpace::new("cavity"));
        let jumps = vec![space.destroy(cav).unwrap()];
        let rates = vec![Monomial::param(Parameter::new("kappa"))];
        let seeds = vec![space.destroy(cav).unwrap()];
        let mut set = heisenberg(
            &seeds, &OpSum::zero(), &jumps, &rates, &space, 1,
        ).unwrap();
        set.complete(CompleteOpts::default()).unwrap();
        let res = CorrelationFunction::new(
            &space.create(cav).unwrap(),
            &space.destroy(cav).unwrap(),
            &set,
            CorrelationOpts::default(),
        );
        assert!(matches!(res, Err(Error::CorrelationOrder { order: 1 })));
    }
}
