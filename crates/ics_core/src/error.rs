use thiserror::Error;

/// Failures raised by the initial-condition solver.
///
/// Routines return `anyhow::Result`; these variants sit at the root of the
/// error chain so callers can `downcast_ref::<IcError>()` and decide whether
/// to loosen tolerances, supply a better guess, or fix more variables.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IcError {
    #[error("solution method `{0}` is unavailable for IC computation")]
    UnsupportedMethod(String),

    #[error("unsupported homotopy type `{0}`")]
    UnsupportedHomotopy(String),

    #[error("unsupported continuation driver `{0}`")]
    UnsupportedDriver(String),

    #[error("unsupported direct solver `{0}`")]
    UnsupportedSolver(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error(
        "Newton's method did not converge in {iterations} iterations \
         (last step norm = {step_norm:e}, residual norm = {residual_norm:e})"
    )]
    NewtonDidNotConverge {
        iterations: usize,
        step_norm: f64,
        residual_norm: f64,
    },

    #[error(
        "homotopy did not converge to phi = 1; the iteration reached phi = {phi} \
         with ds = {ds} and num_steps = {num_steps}. \
         Consider increasing `num_steps` and/or decreasing `ds`"
    )]
    ContinuationIncomplete { phi: f64, ds: f64, num_steps: usize },

    #[error(
        "numerical solution of ICs with root finding failed after {iterations} \
         iterations with final residual norm = {residual_norm:e}"
    )]
    DirectSolverFailed { residual_norm: f64, iterations: usize },

    #[error("singular Jacobian in {0}")]
    SingularJacobian(&'static str),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("symbol `{0}` is neither an input nor substituted")]
    UnboundSymbol(String),

    #[error("no guess supplied for free variable `{0}`")]
    MissingGuess(String),

    #[error("parse error: {0}")]
    Parse(String),
}
