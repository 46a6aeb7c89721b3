use thiserror::Error;

/// Errors a single backend can raise while translating or evaluating an
/// expression. These are recoverable: the façade catches them and falls
/// through to the next backend in precedence order.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("operation {0} is not supported by this backend")]
    UnsupportedOp(&'static str),
    #[error("operand has the wrong kind for this backend")]
    WrongKind,
    #[error("encountered a symbolic leaf with no model to substitute it")]
    SymbolicLeaf,
    #[error("unable to determine the size of this value")]
    UnknownSize,
    #[error("concrete division by zero")]
    DivisionByZero,
}

#[derive(Debug, Error)]
pub enum ChimeError {
    #[error("no backend could handle the expression")]
    Backend(#[from] BackendError),
    #[error("structurally invalid operation: {0}")]
    Operation(String),
    #[error("z3 error: {0}")]
    Smt(String),
    #[error("constraints are unsat")]
    Unsat,
    #[error("solver query timed out")]
    SolverTimeout,
    #[error("expression variables span more than one constraint group")]
    MixedVariables,
    #[error("unknown declaration kind {0} during abstraction")]
    UnknownDecl(u32),
}

impl ChimeError {
    pub(crate) fn op(msg: impl Into<String>) -> Self {
        ChimeError::Operation(msg.into())
    }
}
