//! Symbolic derivation of cumulant-expanded equations of motion for operator
//! expectation values under Lindblad master-equation dynamics.
//!
//! The pipeline runs strictly downward: declare a [`hilbert::ProductSpace`],
//! build Hamiltonian and jump operators over it ([`operator`]), derive
//! Heisenberg equations for a set of seed operators and close the system with
//! a cumulant expansion of a chosen order ([`heisenberg`]), optionally
//! collapsing permutation-symmetric clusters of identical subsystems
//! ([`scale`]), then compile the closed equation set into a numeric
//! right-hand-side function for time integration ([`ode`]) or a two-time
//! correlation function and stationary spectrum ([`correlation`]).

pub mod error;
pub mod hilbert;
pub mod operator;
pub mod average;
pub mod scale;
pub mod heisenberg;
pub mod ode;
pub mod correlation;

pub use error::{ Error, Result };
