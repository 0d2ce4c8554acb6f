use num_complex::Complex64;

/// Barycentric coordinates of the 3 point triangle quadrature rule.
pub const TRI_GAUSS_COORDS: [[f64; 2]; 3] = [[1. / 6., 1. / 6.], [2. / 3., 1. / 6.], [1. / 6., 2. / 3.]];
/// Common weight of the triangle quadrature points.
pub const TRI_GAUSS_WEIGHT: f64 = 1. / 3.;

// Gauss-Legendre 15 point rule on [-1, 1]: positive abscissae and weights.
const GAUSS15_NODES: [f64; 8] = [
    0.,
    0.2011940939974345,
    0.3941513470775634,
    0.5709721726085388,
    0.7244177313601700,
    0.8482065834104272,
    0.9372733924007059,
    0.9879925180204854,
];
const GAUSS15_WEIGHTS: [f64; 8] = [
    0.2025782419255613,
    0.1984314853271116,
    0.1861610000155622,
    0.1662692058169939,
    0.1395706779261543,
    0.1071592204671719,
    0.0703660474881081,
    0.0307532419961173,
];

/// Integrate a complex valued function over `[a, b]` with the 15 point
/// Gauss-Legendre rule.
pub fn gauss15<F: FnMut(f64) -> Complex64>(mut f: F, a: f64, b: f64) -> Complex64 {
    let center = 0.5 * (a + b);
    let half = 0.5 * (b - a);
    let mut sum = GAUSS15_WEIGHTS[0] * f(center);
    for i in 1..8 {
        let dx = half * GAUSS15_NODES[i];
        sum += GAUSS15_WEIGHTS[i] * (f(center + dx) + f(center - dx));
    }
    sum * half
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrates_polynomials_exactly() {
        // exact up to degree 29
        let val = gauss15(|x| Complex64::new(x.powi(7) + 2. * x * x, 0.), 0., 2.);
        assert!((val.re - (256. / 8. + 16. / 3.)).abs() < 1e-11);
    }

    #[test]
    fn integrates_complex_exponential() {
        // int_0^1 e^{ix} dx = sin(1) + i(1 - cos(1))
        let val = gauss15(|x| Complex64::new(0., x).exp(), 0., 1.);
        assert!((val.re - 1f64.sin()).abs() < 1e-13);
        assert!((val.im - (1. - 1f64.cos())).abs() < 1e-13);
    }

    #[test]
    fn triangle_rule_weights_sum_to_one() {
        let sum: f64 = TRI_GAUSS_COORDS.iter().map(|_| TRI_GAUSS_WEIGHT).sum();
        assert!((sum - 1.).abs() < 1e-15);
    }
}
