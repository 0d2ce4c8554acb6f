use num_complex::Complex64;

use crate::numerics::CVector;
use crate::params::{
    SimulationParameters, WALL_MASS_CGS, WALL_RESISTANCE_CGS, WALL_STIFFNESS_CGS,
};

/// Lumped wall admittance of a section for the resistive wall model, zero
/// when wall losses are disabled.
pub fn wall_admittance(
    params: &SimulationParameters,
    freq: f64,
    perimeter: f64,
    length: f64,
) -> Complex64 {
    if !params.wall_losses || length <= 0. {
        return Complex64::ZERO;
    }
    let omega = 2. * std::f64::consts::PI * freq;
    let wall_impedance = Complex64::new(
        WALL_RESISTANCE_CGS,
        omega * WALL_MASS_CGS - WALL_STIFFNESS_CGS / omega,
    ) / (perimeter * length);
    params.percentage_losses * params.volumic_mass * params.snd_speed / wall_impedance
}

/// Boundary specific admittance of every mode: the frequency dependent
/// viscothermal model, or the constant wall admittance fallback.
pub fn boundary_specific_admittance(
    params: &SimulationParameters,
    freq: f64,
    eigen_freqs: &[f64],
) -> CVector {
    let num_modes = eigen_freqs.len();
    if params.visco_thermal_losses {
        let k = params.wavenumber(freq);
        CVector::from_iterator(
            num_modes,
            eigen_freqs.iter().map(|fm| {
                let km = 2. * std::f64::consts::PI * fm / params.snd_speed;
                params.percentage_losses
                    * (((1. - km * km / (k * k)) * params.viscous_bnd_spec_adm
                        + params.thermal_bnd_spec_adm)
                        * freq.sqrt())
            }),
        )
    } else if params.constant_wall_imped {
        CVector::from_element(num_modes, params.percentage_losses * params.wall_admit)
    } else {
        CVector::zeros(num_modes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_admittance_vanishes_without_losses() {
        let mut params = SimulationParameters::default();
        params.wall_losses = false;
        assert_eq!(wall_admittance(&params, 500., 6., 1.), Complex64::ZERO);
    }

    #[test]
    fn viscothermal_admittance_scales_with_sqrt_freq() {
        let params = SimulationParameters::default();
        let eigen_freqs = [0.];
        let a1 = boundary_specific_admittance(&params, 100., &eigen_freqs);
        let a4 = boundary_specific_admittance(&params, 400., &eigen_freqs);
        assert!((a4[0].norm() / a1[0].norm() - 2.).abs() < 1e-12);
    }

    #[test]
    fn constant_wall_fallback() {
        let mut params = SimulationParameters::default();
        params.visco_thermal_losses = false;
        params.constant_wall_imped = true;
        params.set_boundary_specific_admittance();
        let adm = boundary_specific_admittance(&params, 1000., &[0., 2000.]);
        assert_eq!(adm[0], params.wall_admit);
        assert_eq!(adm[1], params.wall_admit);
    }
}
