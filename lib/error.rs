//! Crate-wide error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Jump-operator and decay-rate lists have different lengths.
    #[error("expected one decay rate per jump operator: {jumps} jumps, {rates} rates")]
    RateMismatch { jumps: usize, rates: usize },

    /// An operator references a component index outside the product space.
    #[error("component index {index} is not declared in a space of {len} components")]
    UndeclaredComponent { index: usize, len: usize },

    /// A component was used with the wrong kind of operator.
    #[error("component {index} does not support {kind} operators")]
    WrongComponentKind { index: usize, kind: &'static str },

    /// A transition referenced a level name absent from its component.
    #[error("level `{level}` is not declared on component `{component}`")]
    UnknownLevel { level: String, component: String },

    /// A cluster tracks fewer distinct members than the requested cumulant
    /// order can put in one average.
    #[error("cluster component {index} tracks {tracked} distinct members, \
        fewer than the expansion order {order}")]
    ClusterOrder { index: usize, tracked: usize, order: usize },

    /// A seed operator acts on a component untouched by the Hamiltonian and
    /// jump operators.
    #[error("seed operator acts on component {index}, which appears in neither \
        the Hamiltonian nor the jump operators")]
    UnsupportedSeed { index: usize },

    /// The closure loop failed to reach a fixed point within the iteration
    /// cap; the expansion order is too low for the coupling structure and no
    /// filter was supplied to bound it.
    #[error("equation set failed to close after {iterations} iterations; \
        raise the order or supply a filter")]
    ClosureDiverged { iterations: usize },

    /// A requested average (and its adjoint) is not a state variable.
    #[error("average `{average}` is not present in the equation set, \
        nor is its adjoint")]
    MissingAverage { average: String },

    /// A parameter appearing in the equations was not declared for indexing.
    #[error("parameter `{name}` was not declared in the parameter list")]
    UnknownParameter { name: String },

    /// Correlation systems require a cumulant order of at least 2.
    #[error("correlation functions require order > 1, got {order}")]
    CorrelationOrder { order: usize },

    /// A correlation right-hand side produced a term with more than one
    /// factor involving the mirrored operator.
    #[error("correlation system is not linear in the mirrored operator")]
    NonlinearCorrelation,

    /// A spectrum with a nonvanishing steady-state drive was evaluated at
    /// zero frequency, where its `1/(i w)` drive term is singular.
    #[error("spectrum has a nonzero steady-state drive and cannot be \
        evaluated at zero frequency")]
    ZeroFrequencyDrive,

    /// A frequency-domain solve failed.
    #[error("linear solve error: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
}

pub type Result<T> = std::result::Result<T, Error>;
