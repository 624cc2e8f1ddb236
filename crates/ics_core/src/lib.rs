/// The `ics_core` crate computes consistent initial conditions for
/// differential-algebraic equation systems `f(t, x, x_dot, y) = 0` at t = 0.
///
/// Key components:
/// - **Symbolic layer**: `SymbolicBackend` (atoms, substitution, compilation) and the
///   bundled `ExprEngine` built on a bytecode VM that runs over `f64` and `Dual`.
/// - **Classification**: splitting unknowns into states, derivatives and algebraic variables.
/// - **System builder**: the numeric residual over the unknowns left free by `ics`/`knowns`.
/// - **Solvers**: Newton-Raphson, homotopy continuation (predictor-corrector and
///   pseudo-arclength), and a direct Levenberg-Marquardt backend.
/// - **Diagnostics**: condition numbers and impact ordering for choosing which values to fix.
pub mod autodiff;
pub mod classify;
pub mod config;
pub mod continuation;
pub mod diagnostics;
pub mod direct;
pub mod equation_engine;
pub mod error;
pub mod homotopy;
pub mod ics;
pub mod newton;
pub mod rename;
pub mod symbolic;
pub mod system;
pub mod traits;

pub use autodiff::{Dual, FiniteDifferenceJacobian, ForwardJacobian, JacobianProvider};
pub use classify::{extract_vars, is_known, process_equations, ClassifiedSystem};
pub use config::IcConfig;
pub use continuation::{
    homotopy_roots, predictor_corrector, pseudo_arclength, ContinuationDriver, HomotopyPath,
    HomotopySettings,
};
pub use diagnostics::{
    check_solvability_with_added_ics, compute_condition_number, condition_number,
    order_vars_by_impact, rank_candidate_sets,
};
pub use direct::{direct_roots, levenberg_marquardt, DirectReport, DirectSettings, DirectSolver};
pub use error::IcError;
pub use homotopy::{Homotopy, HomotopyKind};
pub use ics::{
    compute_consistent_initial_conditions, compute_consistent_initial_conditions_with,
    solve_initial_conditions, ConsistentIcs,
};
pub use newton::{newton_raphson, solve_root, NewtonSettings};
pub use rename::RenameMap;
pub use symbolic::{ExprEngine, Replacement, Substitution, Symbol, SymbolicBackend, Values};
pub use system::{make_system_of_ics, IcResidual, IcSystem};
pub use traits::{Dimensions, Scalar, VectorFunction};
