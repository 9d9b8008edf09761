use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Two coefficient matrices disagree on a shared dimension symbol.
    #[error("inconsistent sizes for {symbol}: {existing} vs {conflicting}")]
    DimensionConflict {
        symbol: &'static str,
        existing: usize,
        conflicting: usize,
    },

    /// More linear equations than branch, state and nonlinear variables.
    #[error("{nl} linear equations for only {variables} branch, state and nonlinear variables")]
    ExtraLinearEquations { nl: usize, variables: usize },

    /// A pin table entry addresses a branch the element does not have.
    #[error("pin {pin} refers to branch {branch}, but the element has {nb} branches")]
    PinOutOfRange {
        pin: String,
        branch: usize,
        nb: usize,
    },

    /// Error indicating that a requested pin name does not exist.
    #[error("unknown pin: {0}")]
    UnknownPin(String),

    /// Error indicating that an element is not part of the circuit.
    #[error("element is not part of this circuit")]
    UnknownElement,

    /// A `q`/`J`/`res` reference indexed with the wrong number of indices.
    #[error("{name} takes {expected} indices, found {found}")]
    IndexArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    /// A `q`/`J`/`res` reference used as a bare variable.
    #[error("{0} cannot appear without indices in a nonlinear equation")]
    UnindexedReference(String),

    /// A branch whose ends land in more than two nets.
    #[error("branch {branch} appears in more than two nets")]
    BranchInTooManyNets { branch: usize },

    /// A branch whose net contributions do not cancel.
    #[error("branch {branch} ends do not cancel: contributions sum to {sum}")]
    UnbalancedBranch { branch: usize, sum: i32 },

    /// An incidence entry outside {-1, 0, +1}.
    #[error("incidence entry at net {net}, branch {branch} is {value}, expected +1 or -1")]
    NonUnitIncidence {
        net: usize,
        branch: usize,
        value: i32,
    },
}
