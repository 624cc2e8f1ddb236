use anyhow::Result;
use nalgebra::{DMatrix, DVector};

/// Core interface implemented by any system that can be continued in its
/// scalar parameter.
///
/// States are augmented vectors `[φ, x...]`.
pub trait ContinuationProblem {
    /// Number of state variables (excluding the continuation parameter).
    fn dimension(&self) -> usize;

    /// Evaluate the residual H(aug_state) and write into `out`.
    fn residual(&mut self, aug_state: &DVector<f64>, out: &mut DVector<f64>) -> Result<()>;

    /// Compute the extended Jacobian (derivative of H w.r.t. [φ, x]).
    fn extended_jacobian(&mut self, aug_state: &DVector<f64>) -> Result<DMatrix<f64>>;
}
