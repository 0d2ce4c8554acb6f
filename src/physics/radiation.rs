use glam::DVec2;
use num_complex::Complex64;

use crate::error::ModalError;
use crate::numerics::bessel::{bessel_j, bessel_j_prime_zeros};
use crate::numerics::quadrature::gauss15;
use crate::numerics::{linalg, CMatrix, CVector, RMatrix};
use crate::params::SimulationParameters;

/// Average value of the complex PML stretch.
const PML_STRETCH: Complex64 = Complex64::new(14.142135623730951, 14.142135623730951); // 20 e^{i pi/4}

/// Analytic modal basis of the radiation cross-section: Bessel modes of a
/// disk closed by a perfectly matched layer.
#[derive(Debug, Clone)]
pub struct RadiationBasis {
    pub radius: f64,
    pub pml_thickness: f64,
    /// Zero of J'_|order| attached to each mode.
    pub zeros: Vec<f64>,
    /// Azimuthal order; the sign discriminates the degenerate cos/sin pair.
    pub orders: Vec<i32>,
    pub degenerate: Vec<bool>,
    pub norms: Vec<f64>,
    pub eig_val: CVector,
    pub eig_vec: CMatrix,
    pub inv_eig_vec: CMatrix,
}

/// List the Bessel modes: every zero of J'_n whose cut-on frequency lies
/// below the cap, plus one extra azimuthal order for safety. Zeros of
/// non-axisymmetric orders yield a degenerate cos/sin pair.
fn bessel_mode_table(
    radius: f64,
    params: &SimulationParameters,
) -> (Vec<f64>, Vec<i32>, Vec<bool>, Vec<f64>) {
    let cap_alpha = 2. * std::f64::consts::PI * params.max_cut_on_freq * radius / params.snd_speed;

    let mut entries: Vec<(f64, i32)> = Vec::new();
    let mut order: i32 = 0;
    loop {
        let mut count = 8;
        let mut zeros = bessel_j_prime_zeros(order, count);
        while *zeros.last().unwrap() <= cap_alpha {
            count *= 2;
            zeros = bessel_j_prime_zeros(order, count);
        }
        let below: Vec<f64> = zeros.into_iter().filter(|&z| z <= cap_alpha).collect();
        if below.is_empty() {
            // one extra order beyond the cap
            entries.push((bessel_j_prime_zeros(order, 1)[0], order));
            break;
        }
        entries.extend(below.into_iter().map(|z| (z, order)));
        order += 1;
    }
    entries.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut zeros = Vec::new();
    let mut orders = Vec::new();
    let mut degenerate = Vec::new();
    let mut norms = Vec::new();
    let sqrt_pi = std::f64::consts::PI.sqrt();
    for (zero, v) in entries {
        if v == 0 {
            zeros.push(zero);
            orders.push(0);
            degenerate.push(false);
            norms.push(1. / (radius * sqrt_pi * bessel_j(0, zero)));
        } else {
            let norm = (2. / (std::f64::consts::PI * (1. - (v as f64 / zero).powi(2)))).sqrt()
                / radius
                / bessel_j(v, zero);
            zeros.push(zero);
            orders.push(v);
            degenerate.push(false);
            norms.push(norm);
            // degenerate sine mode of the pair, encoded by the negated order
            zeros.push(zero);
            orders.push(-v);
            degenerate.push(true);
            norms.push(norm);
        }
    }
    (zeros, orders, degenerate, norms)
}

/// Build the radiation basis: the Bessel mode table, the dense PML
/// matrices and their eigendecomposition used for closed form propagation.
pub fn compute_radiation_basis(
    radius: f64,
    pml_thickness: f64,
    params: &SimulationParameters,
    section: usize,
) -> Result<RadiationBasis, ModalError> {
    let (zeros, orders, degenerate, norms) = bessel_mode_table(radius, params);
    let mn = zeros.len();

    let inner = radius - pml_thickness;

    // complex stretch functions of the PML region
    let alpha = |r: f64| -> Complex64 {
        if r >= inner {
            Complex64::ONE + 2. * (PML_STRETCH - Complex64::ONE) * (r - inner) / pml_thickness
        } else {
            Complex64::ONE
        }
    };
    let beta = |r: f64| -> Complex64 {
        if r >= inner {
            Complex64::ONE + (PML_STRETCH - Complex64::ONE) * (r - inner).powi(2) / r / pml_thickness
        } else {
            Complex64::ONE
        }
    };

    let mut c_pml = CMatrix::zeros(mn, mn);
    let mut d_pml = CMatrix::zeros(mn, mn);

    for m in 0..mn {
        for n in 0..mn {
            if orders[m] != orders[n] {
                continue;
            }
            let (zm, zn) = (zeros[m], zeros[n]);
            let (om, on) = (orders[m], orders[n]);

            let q1 = gauss15(
                |r| {
                    (alpha(r) * beta(r) - 1.)
                        * bessel_j(om, r * zm / radius)
                        * bessel_j(on, r * zn / radius)
                        * r
                },
                inner,
                radius,
            );
            c_pml[(m, n)] = Complex64::new((m == n) as usize as f64, 0.)
                + norms[m]
                    * norms[n]
                    * (1. + (om == 0) as usize as f64)
                    * std::f64::consts::PI
                    * q1;

            let q21 = gauss15(
                |r| {
                    (beta(r) / alpha(r) - 1.)
                        * (0.25
                            * (bessel_j(om - 1, r * zm / radius) - bessel_j(om + 1, r * zm / radius))
                            * (bessel_j(on - 1, r * zn / radius)
                                - bessel_j(on + 1, r * zn / radius))
                            * r)
                },
                inner,
                radius,
            );
            let q22 = gauss15(
                |r| {
                    (alpha(r) / beta(r) - 1.)
                        * bessel_j(om, r * zm / radius)
                        * bessel_j(on, r * zn / radius)
                        / r
                },
                inner,
                radius,
            );
            d_pml[(m, n)] = Complex64::new((m == n) as usize as f64 * (zm / radius).powi(2), 0.)
                + norms[m]
                    * norms[n]
                    * (1. + (om == 0) as usize as f64)
                    * std::f64::consts::PI
                    * (zm * zn * q21 / radius / radius + (om as f64).powi(2) * q22);
        }
    }

    let mat = c_pml
        .clone()
        .lu()
        .solve(&d_pml)
        .ok_or(ModalError::EigenSolveFailed { section })?;
    let (eig_val, eig_vec) =
        linalg::complex_eigen(&mat).ok_or(ModalError::EigenSolveFailed { section })?;
    let inv_eig_vec = eig_vec
        .clone()
        .try_inverse()
        .ok_or(ModalError::EigenSolveFailed { section })?;

    Ok(RadiationBasis {
        radius,
        pml_thickness,
        zeros,
        orders,
        degenerate,
        norms,
        eig_val,
        eig_vec,
        inv_eig_vec,
    })
}

impl RadiationBasis {
    pub fn num_modes(&self) -> usize {
        self.zeros.len()
    }

    /// Amplitude of every mode at the given points of the section plane,
    /// NaN outside the PML disk.
    pub fn evaluate(&self, pts: &[DVec2]) -> RMatrix {
        let mn = self.num_modes();
        let mut out = RMatrix::zeros(pts.len(), mn);
        for (p, pt) in pts.iter().enumerate() {
            let r = pt.length();
            if r > self.radius {
                for m in 0..mn {
                    out[(p, m)] = f64::NAN;
                }
                continue;
            }
            let t = pt.y.atan2(pt.x);
            for m in 0..mn {
                let radial = self.norms[m] * bessel_j(self.orders[m], r * self.zeros[m] / self.radius);
                out[(p, m)] = if self.degenerate[m] {
                    radial * (self.orders[m] as f64 * t).sin()
                } else {
                    radial * (self.orders[m] as f64 * t).cos()
                };
            }
        }
        out
    }

    /// Characteristic impedance of the radiation section.
    pub fn characteristic_impedance(&self, freq: f64, params: &SimulationParameters) -> CMatrix {
        let k2 = params.wavenumber(freq).powi(2);
        let mn = self.num_modes();
        let diag = CVector::from_iterator(
            mn,
            self.eig_val
                .iter()
                .map(|&l| 1. / (Complex64::I * (k2 - l)).sqrt()),
        );
        &self.eig_vec * CMatrix::from_diagonal(&diag) * &self.inv_eig_vec
    }

    /// Characteristic admittance of the radiation section.
    pub fn characteristic_admittance(&self, freq: f64, params: &SimulationParameters) -> CMatrix {
        let k2 = params.wavenumber(freq).powi(2);
        let mn = self.num_modes();
        let diag = CVector::from_iterator(
            mn,
            self.eig_val.iter().map(|&l| (Complex64::new(k2, 0.) + l).sqrt()),
        );
        &self.inv_eig_vec * CMatrix::from_diagonal(&diag) * &self.eig_vec
    }

    /// Propagate modal pressure amplitudes to a distance from the exit.
    pub fn propagate_pressure(
        &self,
        pressure: &CMatrix,
        distance: f64,
        freq: f64,
        params: &SimulationParameters,
    ) -> CMatrix {
        let k2 = params.wavenumber(freq).powi(2);
        let mn = self.num_modes();
        let diag = CVector::from_iterator(
            mn,
            self.eig_val
                .iter()
                .map(|&l| (distance * Complex64::I * (k2 - l)).exp()),
        );
        &self.eig_vec * CMatrix::from_diagonal(&diag) * &self.inv_eig_vec * pressure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_params() -> SimulationParameters {
        let mut params = SimulationParameters::default();
        params.max_cut_on_freq = 10000.;
        params
    }

    #[test]
    fn mode_table_starts_with_plane_mode() {
        let params = small_params();
        let (zeros, orders, degenerate, norms) = bessel_mode_table(2., &params);
        assert_eq!(zeros[0], 0.);
        assert_eq!(orders[0], 0);
        assert!(!degenerate[0]);
        // uniform mode normalized over the disk area
        assert!((norms[0] - 1. / (2. * std::f64::consts::PI.sqrt())).abs() < 1e-12);
    }

    #[test]
    fn degenerate_pairs_share_zero_and_norm() {
        let params = small_params();
        let (zeros, orders, degenerate, norms) = bessel_mode_table(2., &params);
        let idx = orders.iter().position(|&o| o == 1).unwrap();
        assert_eq!(orders[idx + 1], -1);
        assert!(degenerate[idx + 1] && !degenerate[idx]);
        assert_eq!(zeros[idx], zeros[idx + 1]);
        assert_eq!(norms[idx], norms[idx + 1]);
    }

    #[test]
    fn zeros_are_sorted_ascending() {
        let params = small_params();
        let (zeros, _, _, _) = bessel_mode_table(3., &params);
        for i in 1..zeros.len() {
            assert!(zeros[i] >= zeros[i - 1]);
        }
    }

    #[test]
    fn basis_matrices_are_consistent() {
        let mut params = small_params();
        params.max_cut_on_freq = 4000.;
        let basis = compute_radiation_basis(2., 1., &params, 0).unwrap();
        let mn = basis.num_modes();
        assert_eq!(basis.eig_val.len(), mn);
        // V V^-1 = I
        let prod = &basis.eig_vec * &basis.inv_eig_vec;
        assert!((prod - CMatrix::identity(mn, mn)).norm() < 1e-9);
    }

    #[test]
    fn characteristic_matrices_are_inverse_of_each_other_for_plane_mode() {
        // with a single uniform mode Zc Yc should be close to identity in
        // the far propagating regime
        let mut params = small_params();
        params.max_cut_on_freq = 2000.;
        let basis = compute_radiation_basis(1., 0.5, &params, 0).unwrap();
        let freq = 8000.;
        let zc = basis.characteristic_impedance(freq, &params);
        let yc = basis.characteristic_admittance(freq, &params);
        // the plane mode entry of Zc should approach 1/k for k^2 >> |lambda|
        let k = params.wavenumber(freq);
        assert!((zc[(0, 0)] * Complex64::new(k, 0.)).norm() > 0.3);
        assert!(zc[(0, 0)].norm() > 0. && yc[(0, 0)].norm() > 0.);
    }

    #[test]
    fn evaluate_is_nan_outside_disk() {
        let params = small_params();
        let basis = compute_radiation_basis(1., 0.5, &params, 0).unwrap();
        let vals = basis.evaluate(&[DVec2::new(2., 0.), DVec2::new(0.2, 0.1)]);
        assert!(vals[(0, 0)].is_nan());
        assert!(vals[(1, 0)].is_finite());
    }
}
