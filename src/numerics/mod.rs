pub mod bessel;
pub mod linalg;
pub mod quadrature;
pub mod spline;

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

/// Dense complex matrix used for modal quantities.
pub type CMatrix = DMatrix<Complex64>;
/// Dense complex column vector.
pub type CVector = DVector<Complex64>;
/// Dense real matrix.
pub type RMatrix = DMatrix<f64>;
/// Dense real column vector.
pub type RVector = DVector<f64>;
