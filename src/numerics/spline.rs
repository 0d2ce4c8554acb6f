use nalgebra::{DMatrix, DVector};

/// Natural cubic spline through a set of samples, evaluated as
/// `a + b dx + c dx^2 + d dx^3` on each interval with `c_0 = c_{n-1} = 0`.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    xs: Vec<f64>,
    a: Vec<f64>,
    b: Vec<f64>,
    c: Vec<f64>,
    d: Vec<f64>,
}

impl CubicSpline {
    /// Fit a natural cubic spline. Requires at least two samples with
    /// strictly increasing abscissae.
    pub fn natural(xs: &[f64], ys: &[f64]) -> Self {
        assert_eq!(xs.len(), ys.len());
        assert!(xs.len() >= 2);
        let n = xs.len();
        let h: Vec<f64> = (0..n - 1).map(|i| xs[i + 1] - xs[i]).collect();

        // second-derivative coefficients from the tridiagonal system
        let mut c = vec![0.; n];
        if n > 2 {
            let m = n - 2;
            let mut mat = DMatrix::<f64>::zeros(m, m);
            let mut rhs = DVector::<f64>::zeros(m);
            for f in 0..m {
                if f > 0 {
                    mat[(f, f - 1)] = h[f];
                }
                mat[(f, f)] = 2. * (h[f] + h[f + 1]);
                if f + 1 < m {
                    mat[(f, f + 1)] = h[f + 1];
                }
                rhs[f] = 3. * (ys[f + 2] - ys[f + 1]) / h[f + 1] - 3. * (ys[f + 1] - ys[f]) / h[f];
            }
            let sol = mat.qr().solve(&rhs).expect("tridiagonal spline system");
            for f in 0..m {
                c[f + 1] = sol[f];
            }
        }

        let mut b = Vec::with_capacity(n - 1);
        let mut d = Vec::with_capacity(n - 1);
        for f in 0..n - 1 {
            b.push((ys[f + 1] - ys[f]) / h[f] - h[f] * (c[f + 1] + 2. * c[f]) / 3.);
            d.push((c[f + 1] - c[f]) / 3. / h[f]);
        }

        Self {
            xs: xs.to_vec(),
            a: ys.to_vec(),
            b,
            c,
            d,
        }
    }

    /// Evaluate the spline; outside the sample range the first or last
    /// cubic is extrapolated.
    pub fn eval(&self, x: f64) -> f64 {
        let mut idx = self.xs.len() - 2;
        while idx > 0 && self.xs[idx] > x {
            idx -= 1;
        }
        let dx = x - self.xs[idx];
        self.a[idx] + self.b[idx] * dx + self.c[idx] * dx * dx + self.d[idx] * dx * dx * dx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_samples_exactly() {
        let xs = [0., 1., 2.5, 4., 6.];
        let ys = [1., -2., 0.5, 3., -1.];
        let spline = CubicSpline::natural(&xs, &ys);
        for (x, y) in xs.iter().zip(&ys) {
            assert!((spline.eval(*x) - y).abs() < 1e-12);
        }
    }

    #[test]
    fn two_samples_give_a_line() {
        let spline = CubicSpline::natural(&[0., 2.], &[1., 5.]);
        assert!((spline.eval(1.) - 3.).abs() < 1e-12);
        assert!((spline.eval(0.5) - 2.).abs() < 1e-12);
    }

    #[test]
    fn natural_boundary_conditions() {
        let xs: Vec<f64> = (0..8).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| (x * 0.8).sin()).collect();
        let spline = CubicSpline::natural(&xs, &ys);
        assert_eq!(spline.c[0], 0.);
        assert_eq!(spline.c[xs.len() - 1], 0.);
    }

    #[test]
    fn smooth_function_is_well_approximated() {
        let xs: Vec<f64> = (0..16).map(|i| i as f64 / 3.).collect();
        let ys: Vec<f64> = xs.iter().map(|x| x.cos()).collect();
        let spline = CubicSpline::natural(&xs, &ys);
        for i in 0..45 {
            let x = 0.3 + i as f64 * 0.1;
            assert!((spline.eval(x) - x.cos()).abs() < 5e-3, "x={x}");
        }
    }
}
