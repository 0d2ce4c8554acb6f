use glam::DVec2;
use num_complex::Complex64;

use crate::error::ConfigError;

// Physical constants in CGS units.
pub const STATIC_PRESSURE_CGS: f64 = 1.01325e6; // dyn/cm^2
pub const GAS_CONSTANT_CGS: f64 = 8.3144598e7; // erg/(K.mol)
pub const MOLECULAR_MASS_CGS: f64 = 28.97; // g/mol
pub const ADIABATIC_CONSTANT: f64 = 1.4;
pub const KELVIN_SHIFT: f64 = 273.15;
pub const AIR_VISCOSITY_CGS: f64 = 1.86e-4; // g/(cm.s)
pub const HEAT_CONDUCTION_CGS: f64 = 5.5e-5; // cal/(cm.s.K)
pub const SPECIFIC_HEAT_CGS: f64 = 0.24; // cal/(g.K)

// Wall mechanical parameters per unit area for the resistive wall model.
pub const WALL_RESISTANCE_CGS: f64 = 1600.; // dyn.s/cm^3
pub const WALL_MASS_CGS: f64 = 1.5; // g/cm^2
pub const WALL_STIFFNESS_CGS: f64 = 3.0e5; // dyn/cm^3

/// Geometric tolerance below which lengths and angles are treated as zero.
pub const MIN_DISTANCE: f64 = 1e-6;
/// Pointwise distance below which two polygons are considered identical.
pub const MIN_DISTANCE_SIMILAR_POLYGONS: f64 = 1e-4;
/// Smallest cross-section area considered open (cm^2).
pub const MINIMAL_AREA: f64 = 0.15;

pub const SAMPLING_RATE: f64 = 44100.;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationMethod {
    Magnus,
    StraightTubes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalQuantity {
    Impedance,
    Admittance,
    Pressure,
    Velocity,
}

/// Radial dilation profile along a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaProfile {
    Linear,
    Gaussian,
    Elephant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadiationIntegration {
    Discrete,
    Gauss,
}

/// How the scaling factors between two adjacent contours are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContourInterpolation {
    Area,
    BoundingBox,
    FromFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlottisBoundary {
    HardWall,
    InfiniteWaveguide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouthBoundary {
    Radiation,
    Admittance1,
    ZeroPressure,
    InfiniteWaveguide,
    HardWall,
}

/// Complete configuration of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationParameters {
    pub temperature: f64,
    pub volumic_mass: f64,
    pub snd_speed: f64,
    pub mesh_density: f64,
    pub num_integration_step: usize,
    pub order_magnus_scheme: usize,
    pub max_cut_on_freq: f64,
    pub viscous_bnd_spec_adm: Complex64,
    pub thermal_bnd_spec_adm: Complex64,
    pub prop_method: PropagationMethod,
    pub percentage_losses: f64,
    pub visco_thermal_losses: bool,
    pub wall_losses: bool,
    pub constant_wall_imped: bool,
    pub wall_admit: Complex64,
    pub curved: bool,
    pub varying_area: bool,
    pub junction_losses: bool,
    pub cont_interp_meth: ContourInterpolation,
    pub glottis_boundary_cond: GlottisBoundary,
    pub mouth_boundary_cond: MouthBoundary,
    pub rad_imped_precomputed: bool,
    pub rad_imped_grid_density: f64,
    pub integration_method_radiation: RadiationIntegration,

    // transfer function computation
    pub max_computed_freq: f64,
    pub spectrum_lgth_exponent: u32,
    /// Reception points in the exit frame (axial, lateral, vertical).
    pub tf_points: Vec<[f64; 3]>,

    // acoustic field computation
    pub freq_field: f64,
    pub field_physical_quantity: PhysicalQuantity,
    pub field_resolution: usize,
    pub compute_radiated_field: bool,

    /// Index of the section carrying the downstream noise source.
    pub idx_sec_noise_source: usize,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        let temperature = 31.4266; // gives c = 350 m/s
        let mut params = Self {
            temperature,
            volumic_mass: 0.,
            snd_speed: 0.,
            mesh_density: 5.,
            num_integration_step: 3,
            order_magnus_scheme: 2,
            max_cut_on_freq: 20000.,
            viscous_bnd_spec_adm: Complex64::ZERO,
            thermal_bnd_spec_adm: Complex64::ZERO,
            prop_method: PropagationMethod::Magnus,
            percentage_losses: 1.,
            visco_thermal_losses: true,
            wall_losses: true,
            constant_wall_imped: false,
            wall_admit: Complex64::new(0.005, 0.),
            curved: true,
            varying_area: true,
            junction_losses: false,
            cont_interp_meth: ContourInterpolation::Area,
            glottis_boundary_cond: GlottisBoundary::InfiniteWaveguide,
            mouth_boundary_cond: MouthBoundary::Radiation,
            rad_imped_precomputed: false,
            rad_imped_grid_density: 15.,
            integration_method_radiation: RadiationIntegration::Gauss,
            max_computed_freq: 10000.,
            spectrum_lgth_exponent: 10,
            tf_points: vec![[3., 0., 0.]],
            freq_field: 5000.,
            field_physical_quantity: PhysicalQuantity::Pressure,
            field_resolution: 30,
            compute_radiated_field: false,
            idx_sec_noise_source: 25,
        };
        params.set_temperature(temperature);
        params.set_boundary_specific_admittance();
        params
    }
}

impl SimulationParameters {
    /// Update the air density and sound speed from the temperature through
    /// the ideal gas relation.
    pub fn set_temperature(&mut self, temperature: f64) {
        self.temperature = temperature;
        self.volumic_mass = STATIC_PRESSURE_CGS * MOLECULAR_MASS_CGS
            / (GAS_CONSTANT_CGS * (temperature + KELVIN_SHIFT));
        self.snd_speed = (ADIABATIC_CONSTANT * STATIC_PRESSURE_CGS / self.volumic_mass).sqrt();
    }

    /// Set the viscous and thermal boundary specific admittances depending
    /// on whether frequency dependent losses are taken into account.
    pub fn set_boundary_specific_admittance(&mut self) {
        if self.visco_thermal_losses {
            // characteristic viscous and thermal boundary layer lengths
            let lv = AIR_VISCOSITY_CGS / self.volumic_mass / self.snd_speed;
            let lt = HEAT_CONDUCTION_CGS * MOLECULAR_MASS_CGS
                / self.volumic_mass
                / self.snd_speed
                / SPECIFIC_HEAT_CGS;

            self.viscous_bnd_spec_adm =
                Complex64::new(1., 1.) * (std::f64::consts::PI * lv / self.snd_speed).sqrt();
            self.thermal_bnd_spec_adm = Complex64::new(1., 1.)
                * (std::f64::consts::PI * lt / self.snd_speed).sqrt()
                * (ADIABATIC_CONSTANT - 1.);
        } else {
            self.viscous_bnd_spec_adm = Complex64::ZERO;
            self.thermal_bnd_spec_adm = Complex64::new(0.005, 0.);
        }
    }

    /// Wavenumber at a given frequency.
    pub fn wavenumber(&self, freq: f64) -> f64 {
        2. * std::f64::consts::PI * freq / self.snd_speed
    }

    /// Frequency step of the transfer function sweep.
    pub fn freq_step(&self) -> f64 {
        SAMPLING_RATE / 2. / (1u64 << (self.spectrum_lgth_exponent - 1)) as f64
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.mesh_density > 0.) {
            return Err(ConfigError::InvalidMeshDensity(self.mesh_density));
        }
        if self.order_magnus_scheme != 2 && self.order_magnus_scheme != 4 {
            return Err(ConfigError::InvalidMagnusOrder(self.order_magnus_scheme));
        }
        if self.num_integration_step < 2 {
            return Err(ConfigError::TooFewIntegrationSteps(
                self.num_integration_step,
            ));
        }
        Ok(())
    }
}

/// One sample of the waveguide centerline.
#[derive(Debug, Clone, Copy)]
pub struct CenterlineSample {
    pub point: DVec2,
    /// Outward unit normal of the cross-section plane.
    pub normal: DVec2,
    pub scale_in: f64,
    pub scale_out: f64,
}

impl CenterlineSample {
    pub fn new(point: DVec2, normal: DVec2) -> Self {
        Self {
            point,
            normal: normal.normalize(),
            scale_in: 1.,
            scale_out: 1.,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sound_speed_matches_ideal_gas() {
        let params = SimulationParameters::default();
        // default temperature is chosen to give 350 m/s
        assert!((params.snd_speed - 35000.).abs() < 50.);
        assert!((params.volumic_mass - 1.16e-3).abs() < 5e-5);
    }

    #[test]
    fn boundary_admittance_depends_on_loss_flag() {
        let mut params = SimulationParameters::default();
        assert!(params.viscous_bnd_spec_adm.norm() > 0.);
        params.visco_thermal_losses = false;
        params.set_boundary_specific_admittance();
        assert_eq!(params.viscous_bnd_spec_adm, Complex64::ZERO);
        assert!((params.thermal_bnd_spec_adm.re - 0.005).abs() < 1e-12);
    }

    #[test]
    fn invalid_magnus_order_is_rejected() {
        let mut params = SimulationParameters::default();
        params.order_magnus_scheme = 3;
        assert!(params.validate().is_err());
    }
}
