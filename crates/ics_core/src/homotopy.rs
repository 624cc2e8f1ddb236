//! Homotopies `h(x, φ)` joining an easy start problem at φ = 0 to the
//! target `f(x) = 0` at φ = 1.

use crate::autodiff::{Dual, JacobianProvider};
use crate::continuation::problem::ContinuationProblem;
use crate::error::IcError;
use crate::newton::evaluate;
use crate::traits::{Dimensions, Scalar, VectorFunction};
use anyhow::Result;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HomotopyKind {
    /// `φ f(x) + (1 - φ)(x - x₀)`
    FixedPoint,
    /// `φ f(x) + (1 - φ)(f(x) - f(x₀))`, i.e. `f(x) - (1 - φ) f(x₀)`
    #[default]
    Newton,
    /// `φ f(x) + (1 - φ) J_f(x₀)(x - x₀)`
    Affine,
}

impl HomotopyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HomotopyKind::FixedPoint => "fixed_point",
            HomotopyKind::Newton => "newton",
            HomotopyKind::Affine => "affine",
        }
    }
}

impl fmt::Display for HomotopyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HomotopyKind {
    type Err = IcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed_point" => Ok(HomotopyKind::FixedPoint),
            "newton" => Ok(HomotopyKind::Newton),
            "affine" => Ok(HomotopyKind::Affine),
            other => Err(IcError::UnsupportedHomotopy(other.to_string())),
        }
    }
}

/// A homotopy over the target `f`, anchored at `x0`.
///
/// As a [`VectorFunction`] it maps the augmented vector `[φ, x...]` to
/// `h(x, φ)`, the same layout the continuation drivers use, so one Jacobian
/// evaluation yields `[∂h/∂φ | ∂h/∂x]`.
pub struct Homotopy<'a, F: ?Sized, P> {
    target: &'a F,
    provider: &'a P,
    kind: HomotopyKind,
    x0: DVector<f64>,
    f_x0: DVector<f64>,
    jac_x0: DMatrix<f64>,
}

impl<'a, F, P> Homotopy<'a, F, P>
where
    F: VectorFunction<f64> + VectorFunction<Dual> + ?Sized,
    P: JacobianProvider,
{
    pub fn new(target: &'a F, provider: &'a P, x0: &DVector<f64>, kind: HomotopyKind) -> Result<Self> {
        let n = target.input_dim();
        let k = target.output_dim();
        if k != n {
            return Err(IcError::DimensionMismatch {
                expected: n,
                got: k,
            }
            .into());
        }

        let f_x0 = evaluate(target, x0)?;
        let jac_x0 = match kind {
            HomotopyKind::Affine => provider.jacobian(target, x0.as_slice())?,
            _ => DMatrix::zeros(0, 0),
        };

        Ok(Self {
            target,
            provider,
            kind,
            x0: x0.clone(),
            f_x0,
            jac_x0,
        })
    }

    pub fn kind(&self) -> HomotopyKind {
        self.kind
    }

    pub fn x0(&self) -> &DVector<f64> {
        &self.x0
    }

    /// `h(x, φ)`.
    pub fn value(&self, x: &DVector<f64>, phi: f64) -> Result<DVector<f64>> {
        evaluate(self, &augment(phi, x))
    }

    /// `∂h/∂x` at `(x, φ)`, an n × n matrix.
    pub fn jac_x(&self, x: &DVector<f64>, phi: f64) -> Result<DMatrix<f64>> {
        let j_ext = self.provider.jacobian(self, augment(phi, x).as_slice())?;
        Ok(j_ext.columns(1, x.len()).into_owned())
    }

    /// `∂h/∂φ` at `(x, φ)`.
    pub fn jac_phi(&self, x: &DVector<f64>, phi: f64) -> Result<DVector<f64>> {
        let j_ext = self.provider.jacobian(self, augment(phi, x).as_slice())?;
        Ok(j_ext.column(0).into_owned())
    }
}

impl<'a, F: ?Sized, P> Homotopy<'a, F, P> {
    fn eval<T: Scalar>(&self, phi: T, x: &[T], out: &mut [T])
    where
        F: VectorFunction<T>,
    {
        self.target.apply(x, out);
        if phi == T::one() {
            return;
        }

        let one_minus = T::one() - phi;
        match self.kind {
            HomotopyKind::FixedPoint => {
                for i in 0..out.len() {
                    out[i] = phi * out[i] + one_minus * (x[i] - T::lift(self.x0[i]));
                }
            }
            HomotopyKind::Newton => {
                for i in 0..out.len() {
                    out[i] = phi * out[i] + one_minus * (out[i] - T::lift(self.f_x0[i]));
                }
            }
            HomotopyKind::Affine => {
                for i in 0..out.len() {
                    let mut g = T::zero();
                    for j in 0..x.len() {
                        g = g + T::lift(self.jac_x0[(i, j)]) * (x[j] - T::lift(self.x0[j]));
                    }
                    out[i] = phi * out[i] + one_minus * g;
                }
            }
        }
    }
}

impl<'a, F: Dimensions + ?Sized, P> Dimensions for Homotopy<'a, F, P> {
    fn input_dim(&self) -> usize {
        self.target.input_dim() + 1
    }

    fn output_dim(&self) -> usize {
        self.target.output_dim()
    }
}

impl<'a, T: Scalar, F: VectorFunction<T> + ?Sized, P> VectorFunction<T> for Homotopy<'a, F, P> {
    fn apply(&self, aug: &[T], out: &mut [T]) {
        self.eval(aug[0], &aug[1..], out);
    }
}

impl<'a, F, P> ContinuationProblem for Homotopy<'a, F, P>
where
    F: VectorFunction<f64> + VectorFunction<Dual> + ?Sized,
    P: JacobianProvider,
{
    fn dimension(&self) -> usize {
        self.target.input_dim()
    }

    fn residual(&mut self, aug_state: &DVector<f64>, out: &mut DVector<f64>) -> Result<()> {
        *out = evaluate(&*self, aug_state)?;
        Ok(())
    }

    fn extended_jacobian(&mut self, aug_state: &DVector<f64>) -> Result<DMatrix<f64>> {
        self.provider.jacobian(&*self, aug_state.as_slice())
    }
}

/// `[φ, x...]`
pub fn augment(phi: f64, x: &DVector<f64>) -> DVector<f64> {
    let mut aug = DVector::zeros(x.len() + 1);
    aug[0] = phi;
    aug.rows_mut(1, x.len()).copy_from(x);
    aug
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::ForwardJacobian;
    use approx::assert_relative_eq;

    struct Cubic;

    impl Dimensions for Cubic {
        fn input_dim(&self) -> usize {
            2
        }
        fn output_dim(&self) -> usize {
            2
        }
    }

    impl<T: Scalar> VectorFunction<T> for Cubic {
        fn apply(&self, x: &[T], out: &mut [T]) {
            out[0] = x[0] * x[0] * x[0] + x[1] - T::lift(2.0);
            out[1] = x[0] * x[1] - T::lift(1.0);
        }
    }

    struct Wide;

    impl Dimensions for Wide {
        fn input_dim(&self) -> usize {
            2
        }
        fn output_dim(&self) -> usize {
            1
        }
    }

    impl<T: Scalar> VectorFunction<T> for Wide {
        fn apply(&self, x: &[T], out: &mut [T]) {
            out[0] = x[0] + x[1];
        }
    }

    const KINDS: [HomotopyKind; 3] = [
        HomotopyKind::FixedPoint,
        HomotopyKind::Newton,
        HomotopyKind::Affine,
    ];

    #[test]
    fn boundary_conditions_hold_for_every_kind() {
        let x0 = DVector::from_vec(vec![0.3, -1.2]);
        let x = DVector::from_vec(vec![1.7, 0.4]);
        let f_x = evaluate(&Cubic, &x).unwrap();

        for kind in KINDS {
            let h = Homotopy::new(&Cubic, &ForwardJacobian, &x0, kind).unwrap();
            assert_eq!(h.value(&x, 1.0).unwrap(), f_x, "{kind}");
            assert_relative_eq!(h.value(&x0, 0.0).unwrap().norm(), 0.0, epsilon = 1e-14);
        }
    }

    #[test]
    fn newton_homotopy_is_shifted_target() {
        let x0 = DVector::from_vec(vec![1.0, 1.0]);
        let x = DVector::from_vec(vec![2.0, -1.0]);
        let h = Homotopy::new(&Cubic, &ForwardJacobian, &x0, HomotopyKind::Newton).unwrap();
        let f_x = evaluate(&Cubic, &x).unwrap();
        let f_x0 = evaluate(&Cubic, &x0).unwrap();
        let expected = &f_x - &f_x0 * 0.75;
        assert_relative_eq!(h.value(&x, 0.25).unwrap(), expected, epsilon = 1e-14);
    }

    #[test]
    fn split_jacobians_match_extended() {
        let x0 = DVector::from_vec(vec![0.5, 0.5]);
        let x = DVector::from_vec(vec![1.1, 0.9]);
        for kind in KINDS {
            let mut h = Homotopy::new(&Cubic, &ForwardJacobian, &x0, kind).unwrap();
            let j_ext = h.extended_jacobian(&augment(0.4, &x)).unwrap();
            assert_eq!(j_ext.shape(), (2, 3));
            assert_relative_eq!(j_ext.column(0).into_owned(), h.jac_phi(&x, 0.4).unwrap());
            assert_relative_eq!(
                j_ext.columns(1, 2).into_owned(),
                h.jac_x(&x, 0.4).unwrap()
            );
        }
    }

    #[test]
    fn fixed_point_start_jacobian_is_identity() {
        let x0 = DVector::from_vec(vec![0.5, 2.0]);
        let h = Homotopy::new(&Cubic, &ForwardJacobian, &x0, HomotopyKind::FixedPoint).unwrap();
        assert_relative_eq!(
            h.jac_x(&x0, 0.0).unwrap(),
            DMatrix::identity(2, 2),
            epsilon = 1e-14
        );
    }

    #[test]
    fn rejects_non_square_targets() {
        let x0 = DVector::from_vec(vec![0.0, 0.0]);
        let err = Homotopy::new(&Wide, &ForwardJacobian, &x0, HomotopyKind::Newton)
            .err()
            .unwrap();
        assert_eq!(
            err.downcast_ref::<IcError>(),
            Some(&IcError::DimensionMismatch {
                expected: 2,
                got: 1
            })
        );
    }

    #[test]
    fn parses_kind_names() {
        assert_eq!("affine".parse::<HomotopyKind>(), Ok(HomotopyKind::Affine));
        assert_eq!(
            "bogus".parse::<HomotopyKind>(),
            Err(IcError::UnsupportedHomotopy("bogus".into()))
        );
        assert_eq!(HomotopyKind::default(), HomotopyKind::Newton);
    }
}
