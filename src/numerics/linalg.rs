use nalgebra::linalg::Schur;
use num_complex::Complex64;

use super::{CMatrix, CVector, RMatrix, RVector};

/// Solve the generalized symmetric eigenproblem `K x = lambda M x` with `M`
/// symmetric positive definite. Returns the eigenvalues in ascending order
/// and the matching eigenvectors as columns, M-orthonormal.
pub fn generalized_symmetric_eigen(k: &RMatrix, m: &RMatrix) -> Option<(RVector, RMatrix)> {
    let chol = m.clone().cholesky()?;
    let l = chol.l();

    // reduce to the standard symmetric problem A = L^-1 K L^-T
    let b = l.solve_lower_triangular(k)?;
    let a = l.solve_lower_triangular(&b.transpose())?.transpose();
    // symmetrize against round-off before the eigensolve
    let a = (&a + a.transpose()) * 0.5;

    let eig = a.symmetric_eigen();
    let n = eig.eigenvalues.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| eig.eigenvalues[i].total_cmp(&eig.eigenvalues[j]));

    let mut values = RVector::zeros(n);
    let mut y = RMatrix::zeros(n, n);
    for (dst, &src) in order.iter().enumerate() {
        values[dst] = eig.eigenvalues[src];
        y.set_column(dst, &eig.eigenvectors.column(src));
    }

    // back transform: x = L^-T y
    let x = l.transpose().solve_upper_triangular(&y)?;
    Some((values, x))
}

// Padé order 13 coefficients of the scaling and squaring scheme.
const PADE13: [f64; 14] = [
    64764752532480000.,
    32382376266240000.,
    7771770303897600.,
    1187353796428800.,
    129060195264000.,
    10559470521600.,
    670442572800.,
    33522128640.,
    1323241920.,
    40840800.,
    960960.,
    16380.,
    182.,
    1.,
];
const PADE13_THETA: f64 = 5.371920351148152;

fn one_norm(a: &CMatrix) -> f64 {
    (0..a.ncols())
        .map(|j| a.column(j).iter().map(|v| v.norm()).sum::<f64>())
        .fold(0., f64::max)
}

/// Matrix exponential by Padé order 13 scaling and squaring.
pub fn expm(a: &CMatrix) -> CMatrix {
    let n = a.nrows();
    let norm = one_norm(a);
    let s = if norm > PADE13_THETA {
        (norm / PADE13_THETA).log2().ceil() as i32
    } else {
        0
    };
    let scaled = a * Complex64::new(0.5f64.powi(s), 0.);

    let c = |x: f64| Complex64::new(x, 0.);
    let identity = CMatrix::identity(n, n);
    let a2 = &scaled * &scaled;
    let a4 = &a2 * &a2;
    let a6 = &a2 * &a4;

    let u = &scaled
        * (&a6 * (&a6 * c(PADE13[13]) + &a4 * c(PADE13[11]) + &a2 * c(PADE13[9]))
            + &a6 * c(PADE13[7])
            + &a4 * c(PADE13[5])
            + &a2 * c(PADE13[3])
            + &identity * c(PADE13[1]));
    let v = &a6 * (&a6 * c(PADE13[12]) + &a4 * c(PADE13[10]) + &a2 * c(PADE13[8]))
        + &a6 * c(PADE13[6])
        + &a4 * c(PADE13[4])
        + &a2 * c(PADE13[2])
        + &identity * c(PADE13[0]);

    let num = &v + &u;
    let den = &v - &u;
    let mut result = den
        .lu()
        .solve(&num)
        .unwrap_or_else(|| CMatrix::identity(n, n));

    for _ in 0..s {
        result = &result * &result;
    }
    result
}

/// Eigendecomposition of a general complex matrix through its Schur form:
/// the triangular factor yields the eigenvalues on its diagonal and the
/// eigenvectors by back-substitution.
pub fn complex_eigen(a: &CMatrix) -> Option<(CVector, CMatrix)> {
    let n = a.nrows();
    let schur = Schur::try_new(a.clone(), 1e-12, 0)?;
    let (q, t) = schur.unpack();

    let values = CVector::from_iterator(n, (0..n).map(|i| t[(i, i)]));

    let scale = one_norm(&t).max(1.);
    let mut vectors = CMatrix::zeros(n, n);
    for i in 0..n {
        let lambda = values[i];
        let mut y = CVector::zeros(n);
        y[i] = Complex64::ONE;
        for j in (0..i).rev() {
            let mut sum = Complex64::ZERO;
            for kk in j + 1..=i {
                sum += t[(j, kk)] * y[kk];
            }
            let mut denom = t[(j, j)] - lambda;
            if denom.norm() < 1e-14 * scale {
                denom = Complex64::new(1e-14 * scale, 0.);
            }
            y[j] = -sum / denom;
        }
        let v = &q * y;
        let norm = v.norm();
        vectors.set_column(i, &(v / Complex64::new(norm, 0.)));
    }
    Some((values, vectors))
}

/// Inverse through LU with full pivoting behaviour close to the reference
/// implementation; `None` when the matrix is singular.
pub fn try_inverse(a: &CMatrix) -> Option<CMatrix> {
    a.clone().try_inverse()
}
