use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can flow through compiled residuals.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {
    /// Lifts a plain constant into the scalar type.
    fn lift(value: f64) -> Self {
        Self::from_f64(value).unwrap_or_else(Self::nan)
    }
}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Shape of a vector-valued function `R^n -> R^k`.
pub trait Dimensions {
    /// Length of the input vector (n).
    fn input_dim(&self) -> usize;

    /// Length of the output vector (k).
    fn output_dim(&self) -> usize;
}

/// A vector-valued numeric function evaluated over a scalar type.
///
/// Implementing this for both `f64` and `Dual` makes the function
/// differentiable by forward-mode AD.
pub trait VectorFunction<T: Scalar>: Dimensions {
    /// x: input vector of length `input_dim()`
    /// out: buffer of length `output_dim()` receiving f(x)
    fn apply(&self, x: &[T], out: &mut [T]);
}

impl<'a, D: Dimensions + ?Sized> Dimensions for &'a D {
    fn input_dim(&self) -> usize {
        (**self).input_dim()
    }

    fn output_dim(&self) -> usize {
        (**self).output_dim()
    }
}

impl<'a, T: Scalar, F: VectorFunction<T> + ?Sized> VectorFunction<T> for &'a F {
    fn apply(&self, x: &[T], out: &mut [T]) {
        (**self).apply(x, out)
    }
}
