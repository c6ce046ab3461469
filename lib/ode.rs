//! Numeric realization of a closed [`EquationSet`].
//!
//! [`OdeSystem::build`] assigns every left-hand average a 0-based state
//! index (in the set's recorded order) and every declared parameter a
//! parameter index, then compiles each right-hand side into a flat list of
//! [`CompiledTerm`] instructions: a complex constant, parameter powers, and
//! state factors with a conjugation flag for averages stored as their
//! adjoint. The result is a pure function `du = f(u, p, t)` plus a
//! fixed-step RK4 driver.

use indexmap::IndexMap;
use ndarray::{ s, Array1, Array2 };
use num_complex::Complex64 as C64;
use crate::{
    average::{ average_of, Average },
    error::{ Error, Result },
    heisenberg::EquationSet,
    hilbert::ProductSpace,
    operator::{ OpSum, Parameter },
    scale,
};

/// One additive term of a compiled right-hand side:
/// `c * prod_k p[pows_k.0]^pows_k.1 * prod_j (u[factors_j.0] or conj)`.
#[derive(Clone, Debug)]
pub struct CompiledTerm {
    c: C64,
    pows: Vec<(usize, i32)>,
    factors: Vec<(usize, bool)>,
}

impl CompiledTerm {
    fn eval(&self, u: &Array1<C64>, p: &Array1<C64>) -> C64 {
        let mut z = self.c;
        for (k, pow) in self.pows.iter() {
            z *= p[*k].powi(*pow);
        }
        for (j, conj) in self.factors.iter() {
            z *= if *conj { u[*j].conj() } else { u[*j] };
        }
        z
    }
}

/// A compiled, closed equation set.
#[derive(Clone, Debug)]
pub struct OdeSystem {
    vars: IndexMap<Average, usize>,
    params: IndexMap<Parameter, usize>,
    rhs: Vec<Vec<CompiledTerm>>,
    space: ProductSpace,
    order: usize,
}

impl OdeSystem {
    /// Compile `set`, indexing state variables in the set's recorded order
    /// and parameters in declaration order.
    ///
    /// Fails with [`Error::UnknownParameter`] if the equations mention a
    /// parameter absent from `params`, and with [`Error::MissingAverage`]
    /// if a right-hand side references an average that is not a state
    /// variable up to adjoints (i.e. the set is not closed).
    pub fn build(set: &EquationSet, params: &[Parameter]) -> Result<Self> {
        let vars: IndexMap<Average, usize> = set.lhs()
            .cloned()
            .enumerate()
            .map(|(k, avg)| (avg, k))
            .collect();
        let pidx: IndexMap<Parameter, usize> = params.iter()
            .cloned()
            .enumerate()
            .map(|(k, p)| (p, k))
            .collect();
        let mut rhs: Vec<Vec<CompiledTerm>> = Vec::with_capacity(vars.len());
        for (_, expr) in set.iter() {
            let mut terms: Vec<CompiledTerm> = Vec::new();
            for term in expr.terms().iter() {
                let mut pows: Vec<(usize, i32)> = Vec::new();
                for (p, pow) in term.coeff.pows() {
                    let k = *pidx.get(p)
                        .ok_or_else(|| Error::UnknownParameter {
                            name: p.name().to_string(),
                        })?;
                    pows.push((k, pow));
                }
                let mut factors: Vec<(usize, bool)> = Vec::new();
                for avg in term.avgs.iter() {
                    factors.push(resolve(&vars, avg)?);
                }
                terms.push(CompiledTerm { c: term.coeff.c(), pows, factors });
            }
            rhs.push(terms);
        }
        Ok(Self {
            vars,
            params: pidx,
            rhs,
            space: set.space().clone(),
            order: set.order(),
        })
    }

    /// Number of state variables.
    pub fn len(&self) -> usize { self.vars.len() }

    pub fn is_empty(&self) -> bool { self.vars.is_empty() }

    /// State variables in index order.
    pub fn variables(&self) -> impl Iterator<Item = &Average> {
        self.vars.keys()
    }

    /// State index of an average, with a flag set if it is stored as its
    /// adjoint and must be conjugated on read.
    pub fn var_index(&self, avg: &Average) -> Result<(usize, bool)> {
        resolve(&self.vars, avg)
    }

    /// All-zeros state (vacuum / ground for the usual normal-ordered
    /// variables).
    pub fn zero_state(&self) -> Array1<C64> {
        Array1::zeros(self.vars.len())
    }

    /// State assembled by evaluating `f` on each variable in index order.
    pub fn initial_state<F>(&self, mut f: F) -> Array1<C64>
    where F: FnMut(&Average) -> C64
    {
        self.vars.keys().map(&mut f).collect()
    }

    /// Flatten named parameter values into the compiled parameter order.
    pub fn param_vector(&self, values: &IndexMap<Parameter, C64>)
        -> Result<Array1<C64>>
    {
        self.params.keys()
            .map(|p| {
                values.get(p).copied()
                    .ok_or_else(|| Error::UnknownParameter {
                        name: p.name().to_string(),
                    })
            })
            .collect()
    }

    /// Evaluate the right-hand side into `du`.
    pub fn rhs_inplace(
        &self,
        du: &mut Array1<C64>,
        u: &Array1<C64>,
        p: &Array1<C64>,
        _t: f64,
    ) {
        for (k, terms) in self.rhs.iter().enumerate() {
            du[k] = terms.iter().map(|term| term.eval(u, p)).sum();
        }
    }

    /// Allocating variant of [`rhs_inplace`][Self::rhs_inplace].
    pub fn rhs(&self, u: &Array1<C64>, p: &Array1<C64>, t: f64)
        -> Array1<C64>
    {
        let mut du = self.zero_state();
        self.rhs_inplace(&mut du, u, p, t);
        du
    }

    /// Integrate with fixed-step RK4 over the time grid `t`, one step per
    /// grid interval.
    ///
    /// Returns the trajectory as a `t.len() x len()` array whose `k`-th row
    /// is the state at `t[k]`; the first row is `u0`.
    pub fn integrate(
        &self,
        u0: &Array1<C64>,
        p: &Array1<C64>,
        t: &[f64],
    ) -> Array2<C64>
    {
        let n = self.len();
        let mut traj: Array2<C64> = Array2::zeros((t.len(), n));
        if t.is_empty() { return traj; }
        let mut u = u0.clone();
        traj.slice_mut(s![0, ..]).assign(&u);
        for (k, win) in t.windows(2).enumerate() {
            let dt = win[1] - win[0];
            let k1 = self.rhs(&u, p, win[0]);
            let k2 = self.rhs(&(&u + &(&k1 * C64::from(dt / 2.0))), p, win[0] + dt / 2.0);
            let k3 = self.rhs(&(&u + &(&k2 * C64::from(dt / 2.0))), p, win[0] + dt / 2.0);
            let k4 = self.rhs(&(&u + &(&k3 * C64::from(dt))), p, win[1]);
            u = &u + &((k1 + k2 * C64::from(2.0) + k3 * C64::from(2.0) + k4)
                * C64::from(dt / 6.0));
            traj.slice_mut(s![k + 1, ..]).assign(&u);
        }
        traj
    }

    /// Recover the expectation value of an arbitrary operator from a
    /// trajectory, row by row.
    ///
    /// The operator is averaged, cumulant-expanded at the system's order,
    /// canonicalized, and evaluated against the state variables; averages
    /// stored as adjoints resolve by conjugation.
    pub fn get_solution(
        &self,
        op: &OpSum,
        traj: &Array2<C64>,
        p: &Array1<C64>,
    ) -> Result<Array1<C64>>
    {
        let expr = scale::canonicalize(
            &average_of(op, self.order),
            &self.space,
        );
        let compiled: Vec<CompiledTerm> = expr.terms().iter()
            .map(|term| {
                let pows = term.coeff.pows()
                    .map(|(par, pow)| {
                        self.params.get(par).copied()
                            .map(|k| (k, pow))
                            .ok_or_else(|| Error::UnknownParameter {
                                name: par.name().to_string(),
                            })
                    })
                    .collect::<Result<Vec<(usize, i32)>>>()?;
                let factors = term.avgs.iter()
                    .map(|avg| resolve(&self.vars, avg))
                    .collect::<Result<Vec<(usize, bool)>>>()?;
                Ok(CompiledTerm { c: term.coeff.c(), pows, factors })
            })
            .collect::<Result<Vec<CompiledTerm>>>()?;
        let out: Array1<C64> = traj.outer_iter()
            .map(|row| {
                let u = row.to_owned();
                compiled.iter().map(|term| term.eval(&u, p)).sum()
            })
            .collect();
        Ok(out)
    }
}

fn resolve(vars: &IndexMap<Average, usize>, avg: &Average)
    -> Result<(usize, bool)>
{
    if let Some(k) = vars.get(avg) {
        Ok((*k, false))
    } else if let Some(k) = vars.get(&avg.adjoint()) {
        Ok((*k, true))
    } else {
        Err(Error::MissingAverage { average: avg.to_string() })
    }
}
