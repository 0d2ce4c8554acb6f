use glam::{DVec2, DVec3};
use num_complex::Complex64;

use crate::discretization::builder::build_sections;
use crate::discretization::mesher::triangulate_contour;
use crate::error::{PropagationError, Result, SimulationError};
use crate::geometry::{intake, Slice};
use crate::numerics::linalg::try_inverse;
use crate::numerics::spline::CubicSpline;
use crate::numerics::{CMatrix, CVector, RMatrix};
use crate::params::{
    GlottisBoundary, MouthBoundary, PhysicalQuantity, PropagationMethod, RadiationIntegration,
    SimulationParameters, MIN_DISTANCE, SAMPLING_RATE,
};
use crate::physics::junction::compute_junction_matrices;
use crate::physics::modal::compute_modes;
use crate::physics::radiation::compute_radiation_basis;
use crate::section::Section;

/// Which stored transfer quantity an interpolation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TfKind {
    Glottal,
    Noise,
    InputImpedance,
}

/// Transfer functions accumulated over a frequency sweep.
#[derive(Debug, Clone, Default)]
pub struct TransferFunctions {
    pub freqs: Vec<f64>,
    /// One row per frequency, one column per reception point.
    pub glottal: Vec<Vec<Complex64>>,
    pub noise: Vec<Vec<Complex64>>,
    /// Plane mode input impedance at each frequency.
    pub plane_mode_input_impedance: Vec<Complex64>,
}

/// Cubic spline model of the radiation impedance and admittance over a
/// frequency grid, fitted separately on the real and imaginary part of
/// every matrix entry.
struct RadiationSplines {
    num_modes: usize,
    z_re: Vec<CubicSpline>,
    z_im: Vec<CubicSpline>,
    y_re: Vec<CubicSpline>,
    y_im: Vec<CubicSpline>,
}

impl RadiationSplines {
    fn impedance(&self, freq: f64) -> CMatrix {
        let mn = self.num_modes;
        CMatrix::from_fn(mn, mn, |m, n| {
            Complex64::new(
                self.z_re[m * mn + n].eval(freq),
                self.z_im[m * mn + n].eval(freq),
            )
        })
    }

    fn admittance(&self, freq: f64) -> CMatrix {
        let mn = self.num_modes;
        CMatrix::from_fn(mn, mn, |m, n| {
            Complex64::new(
                self.y_re[m * mn + n].eval(freq),
                self.y_im[m * mn + n].eval(freq),
            )
        })
    }
}

/// Driver of the whole wave problem: owns the section graph, runs the
/// precompute pipeline, propagates at single frequencies and accumulates
/// transfer functions.
pub struct Simulation {
    pub params: SimulationParameters,
    pub sections: Vec<Section>,
    pub tf: TransferFunctions,
    /// Print progress of the long precompute and sweep loops.
    pub logging: bool,
    needs_recompute: bool,
    rad_splines: Option<RadiationSplines>,
    last_freq_computed: Option<f64>,
}

impl Simulation {
    pub fn new(params: SimulationParameters) -> Self {
        Self {
            params,
            sections: Vec::new(),
            tf: TransferFunctions::default(),
            logging: false,
            needs_recompute: true,
            rad_splines: None,
            last_freq_computed: None,
        }
    }

    /// Load a geometry from the CSV interchange format and build the
    /// section graph. `simplify` reduces dense imported contours with the
    /// squared-distance polyline simplification.
    pub fn load_csv_geometry(
        &mut self,
        path: impl AsRef<std::path::Path>,
        simplify: bool,
    ) -> Result<()> {
        let slices = intake::import_csv(path, simplify)?;
        self.load_slices(slices)
    }

    /// Build the section graph from a slice sequence.
    pub fn load_slices(&mut self, slices: Vec<Slice>) -> Result<()> {
        self.params.validate().map_err(SimulationError::Config)?;
        self.sections = build_sections(slices, &self.params)?;
        self.needs_recompute = true;
        self.rad_splines = None;
        self.tf = TransferFunctions::default();
        Ok(())
    }

    pub fn num_sections(&self) -> usize {
        self.sections.len()
    }

    /// Index of the last FEM section, where the outlet boundary applies.
    fn last_fem_section(&self) -> usize {
        self.sections
            .iter()
            .rposition(|s| !s.is_radiation())
            .unwrap_or(0)
    }

    /// Index of the noise source section, clamped into the FEM range.
    fn noise_source_section(&self) -> usize {
        self.params
            .idx_sec_noise_source
            .min(self.last_fem_section().saturating_sub(1))
    }

    // **********************************************************************
    // precompute pipeline

    /// Mesh every section, compute its modes, the junction matrices and,
    /// when the mouth radiates through the precomputed model, the
    /// radiation impedance splines. Runs once per geometry change.
    pub fn precompute(&mut self) -> Result<()> {
        if !self.needs_recompute {
            return Ok(());
        }
        self.params.validate().map_err(SimulationError::Config)?;

        for idx in 0..self.sections.len() {
            let params = self.params.clone();
            let section = &mut self.sections[idx];
            match section.fem_mut() {
                Some(fem) => {
                    fem.mesh = triangulate_contour(&fem.contour, fem.spacing, idx)?;
                    fem.basis = Some(compute_modes(&fem.mesh, &params, 0, idx)?);
                }
                None => {
                    if let crate::section::SectionKind::Radiation(rad) = &mut section.kind {
                        rad.basis = Some(compute_radiation_basis(
                            rad.radius,
                            rad.pml_thickness,
                            &params,
                            idx,
                        )?);
                    }
                }
            }
            if self.logging {
                println!(
                    "section {idx} ({}): {} modes",
                    self.sections[idx].kind_tag(),
                    self.sections[idx].num_modes()
                );
            }
        }

        for idx in 0..self.sections.len() {
            compute_junction_matrices(&mut self.sections, idx, &self.params)?;
        }
        if self.logging {
            println!("junction matrices computed");
        }

        if self.params.mouth_boundary_cond == MouthBoundary::Radiation
            && self.params.rad_imped_precomputed
        {
            self.precompute_radiation_splines(16)?;
        }

        self.needs_recompute = false;
        Ok(())
    }

    // **********************************************************************
    // radiation impedance

    /// Radiation impedance of the outlet aperture at one frequency, from
    /// the multimodal Rayleigh integral over a Cartesian grid with one
    /// radial polar sub-grid per point.
    pub fn radiation_impedance(&self, freq: f64, grid_density: f64) -> Result<CMatrix> {
        let idx = self.last_fem_section();
        let section = &self.sections[idx];
        let mn = section.num_modes();
        let scaling = section.scale_out();
        let contour = &section
            .fem()
            .expect("outlet section must be a FEM section")
            .contour;

        let spacing = section.area.sqrt() / grid_density;
        let (min, max) = contour.bbox();
        let nx = ((max.x - min.x) / spacing).ceil() as usize;
        let ny = ((max.y - min.y) / spacing).ceil() as usize;
        let mut cart_grid = Vec::new();
        for i in 0..nx {
            for j in 0..ny {
                let pt = DVec2::new(min.x + i as f64 * spacing, min.y + j as f64 * spacing);
                if contour.contains(pt) {
                    cart_grid.push(pt);
                }
            }
        }
        let int_cart = section.interpolate_modes(&cart_grid);

        let mut imped = CMatrix::zeros(mn, mn);
        let k = self.params.wavenumber(freq);

        for (c, &center) in cart_grid.iter().enumerate() {
            // estimate the ratio directions / points from a coarse sweep
            let mut num_directions = 50usize;
            let mut nb_pts = 0usize;
            let mut angle_spacing = 2. * std::f64::consts::PI / num_directions as f64;
            for i in 0..num_directions {
                let direction = i as f64 * angle_spacing - std::f64::consts::PI;
                let mut cnt = 0usize;
                loop {
                    let r = (0.5 + cnt as f64) * spacing;
                    let pt = center + r * DVec2::from_angle(direction);
                    if !contour.contains(pt) {
                        break;
                    }
                    nb_pts += 1;
                    cnt += 1;
                }
            }
            if nb_pts == 0 {
                continue;
            }
            num_directions = (cart_grid.len() * num_directions / nb_pts).max(4);

            // polar sub-grid centered on the Cartesian point
            let mut pol_grid = Vec::new();
            let mut radius = Vec::new();
            angle_spacing = 2. * std::f64::consts::PI / num_directions as f64;
            for i in 0..num_directions {
                let direction = i as f64 * angle_spacing - std::f64::consts::PI;
                let mut cnt = 0usize;
                loop {
                    let r = (0.5 + cnt as f64) * spacing;
                    let pt = center + r * DVec2::from_angle(direction);
                    if !contour.contains(pt) {
                        break;
                    }
                    pol_grid.push(pt);
                    radius.push(r);
                    cnt += 1;
                }
            }
            if pol_grid.is_empty() {
                continue;
            }
            let int_pol = section.interpolate_modes(&pol_grid);

            let mut integral = CMatrix::zeros(mn, mn);
            let mut sum_h = 0.;
            for (p, &r) in radius.iter().enumerate() {
                sum_h += r;
                let phase = (-Complex64::I * k * scaling * r).exp();
                for m in 0..mn {
                    for n in 0..mn {
                        integral[(m, n)] += int_pol[(p, m)] * int_cart[(c, n)] * phase;
                    }
                }
            }
            imped -= integral
                / Complex64::new(
                    sum_h * 2. * std::f64::consts::PI * cart_grid.len() as f64 * scaling,
                    0.,
                );
        }

        Ok(imped * Complex64::new(section.area.powi(2), 0.))
    }

    /// Sample the radiation impedance over a frequency grid up to Nyquist
    /// and fit the interpolation splines.
    pub fn precompute_radiation_splines(&mut self, nb_rad_freqs: usize) -> Result<()> {
        let idx = self.last_fem_section();
        let mn = self.sections[idx].num_modes();
        let freq_step = SAMPLING_RATE / 2. / (nb_rad_freqs - 1) as f64;

        let mut freqs = Vec::with_capacity(nb_rad_freqs);
        let mut z_samples: Vec<CMatrix> = Vec::with_capacity(nb_rad_freqs);
        let mut y_samples: Vec<CMatrix> = Vec::with_capacity(nb_rad_freqs);
        for i in 0..nb_rad_freqs {
            let freq = (i as f64 * freq_step).max(500.);
            freqs.push(freq);
            let z = self.radiation_impedance(freq, 15.)?;
            let y = try_inverse(&z).ok_or(PropagationError::SingularMatrix {
                section: idx,
                freq,
                quantity: "radiation impedance",
            })?;
            z_samples.push(z);
            y_samples.push(y);
            if self.logging {
                println!("radiation impedance {}/{nb_rad_freqs} at {freq} Hz", i + 1);
            }
        }

        let mut z_re = Vec::with_capacity(mn * mn);
        let mut z_im = Vec::with_capacity(mn * mn);
        let mut y_re = Vec::with_capacity(mn * mn);
        let mut y_im = Vec::with_capacity(mn * mn);
        for m in 0..mn {
            for n in 0..mn {
                let take = |samples: &[CMatrix], f: fn(&Complex64) -> f64| -> Vec<f64> {
                    samples.iter().map(|s| f(&s[(m, n)])).collect()
                };
                z_re.push(CubicSpline::natural(&freqs, &take(&z_samples, |v| v.re)));
                z_im.push(CubicSpline::natural(&freqs, &take(&z_samples, |v| v.im)));
                y_re.push(CubicSpline::natural(&freqs, &take(&y_samples, |v| v.re)));
                y_im.push(CubicSpline::natural(&freqs, &take(&y_samples, |v| v.im)));
            }
        }

        self.rad_splines = Some(RadiationSplines {
            num_modes: mn,
            z_re,
            z_im,
            y_re,
            y_im,
        });
        Ok(())
    }

    /// Radiation impedance and admittance at the outlet, interpolated from
    /// the splines when precomputed, directly integrated otherwise.
    pub fn radiation_impedance_admittance(&self, freq: f64) -> Result<(CMatrix, CMatrix)> {
        if let Some(splines) = &self.rad_splines {
            return Ok((splines.impedance(freq), splines.admittance(freq)));
        }
        let z = self.radiation_impedance(freq, self.params.rad_imped_grid_density)?;
        let y = try_inverse(&z).ok_or(PropagationError::SingularMatrix {
            section: self.last_fem_section(),
            freq,
            quantity: "radiation impedance",
        })?;
        Ok((z, y))
    }

    /// Outlet boundary matrices for the configured mouth condition.
    fn outlet_boundary(&self, freq: f64) -> Result<(CMatrix, CMatrix)> {
        let idx = self.last_fem_section();
        let section = &self.sections[idx];
        let mn = section.num_modes();
        match self.params.mouth_boundary_cond {
            MouthBoundary::Radiation => self.radiation_impedance_admittance(freq),
            MouthBoundary::Admittance1 => {
                let adm = CMatrix::from_diagonal(&CVector::from_element(
                    mn,
                    Complex64::new(section.scale_out().powi(2), 0.),
                ));
                let imp = try_inverse(&adm).ok_or(PropagationError::SingularMatrix {
                    section: idx,
                    freq,
                    quantity: "boundary admittance",
                })?;
                Ok((imp, adm))
            }
            MouthBoundary::ZeroPressure => {
                let adm =
                    CMatrix::from_diagonal(&CVector::from_element(mn, Complex64::new(1e10, 0.)));
                let imp =
                    CMatrix::from_diagonal(&CVector::from_element(mn, Complex64::new(1e-10, 0.)));
                Ok((imp, adm))
            }
            MouthBoundary::HardWall => {
                let imp =
                    CMatrix::from_diagonal(&CVector::from_element(mn, Complex64::new(1e5, 0.)));
                let adm =
                    CMatrix::from_diagonal(&CVector::from_element(mn, Complex64::new(1e-5, 0.)));
                Ok((imp, adm))
            }
            MouthBoundary::InfiniteWaveguide => Ok((
                section.characteristic_impedance(freq, &self.params),
                section.characteristic_admittance(freq, &self.params),
            )),
        }
    }

    /// Glottis boundary matrices used by the noise source re-solve.
    fn glottis_boundary(&self, freq: f64) -> (CMatrix, CMatrix) {
        let mn = self.sections[0].num_modes();
        match self.params.glottis_boundary_cond {
            GlottisBoundary::HardWall => (
                CMatrix::from_diagonal(&CVector::from_element(mn, Complex64::new(1e5, 0.))),
                CMatrix::from_diagonal(&CVector::from_element(mn, Complex64::new(1e-5, 0.))),
            ),
            GlottisBoundary::InfiniteWaveguide => (
                self.sections[0].characteristic_impedance(freq, &self.params),
                self.sections[0].characteristic_admittance(freq, &self.params),
            ),
        }
    }

    // **********************************************************************
    // propagation

    /// Propagate the impedance and admittance from `start` to `end`,
    /// applying the junction updates between every pair of sections.
    pub fn propagate_imped_admit(
        &mut self,
        start_imped: CMatrix,
        start_admit: CMatrix,
        freq: f64,
        start: usize,
        end: usize,
    ) -> Result<()> {
        let direction: i64 = if start > end { -1 } else { 1 };
        let num_sec = self.sections.len();
        let wall_interface_admit = Complex64::I * 2. * std::f64::consts::PI * freq
            * self.params.thermal_bnd_spec_adm
            / self.params.snd_speed;

        // first section
        self.sections[start].clear_impedance();
        self.sections[start].clear_admittance();
        self.sections[start].set_z_dir(direction as i8);
        self.sections[start].set_y_dir(direction as i8);
        match self.params.prop_method {
            PropagationMethod::Magnus => {
                let params = self.params.clone();
                self.sections[start].propagate_magnus(
                    start_admit,
                    &params,
                    freq,
                    direction as f64,
                    PhysicalQuantity::Admittance,
                    start,
                )?;
                self.invert_admittance_samples(start, freq)?;
            }
            PropagationMethod::StraightTubes => {
                let params = self.params.clone();
                let next_idx = (start as i64 + direction).clamp(0, num_sec as i64 - 1) as usize;
                let next_area = self.sections[next_idx].area;
                self.sections[start].propagate_imped_admit_straight(
                    start_imped,
                    start_admit,
                    freq,
                    &params,
                    100.,
                    next_area,
                    start,
                )?;
            }
        }

        let mut i = start as i64 + direction;
        while i != end as i64 + direction {
            let idx = i as usize;
            let prev_idx = (i - direction) as usize;

            self.sections[idx].clear_impedance();
            self.sections[idx].clear_admittance();
            self.sections[idx].set_z_dir(direction as i8);
            self.sections[idx].set_y_dir(direction as i8);

            let (prev_imped, prev_admit) =
                self.junction_imped_admit(idx, prev_idx, direction, freq, wall_interface_admit)?;

            match self.params.prop_method {
                PropagationMethod::Magnus => {
                    let params = self.params.clone();
                    self.sections[idx].propagate_magnus(
                        prev_admit,
                        &params,
                        freq,
                        direction as f64,
                        PhysicalQuantity::Admittance,
                        idx,
                    )?;
                    self.invert_admittance_samples(idx, freq)?;
                }
                PropagationMethod::StraightTubes => {
                    let params = self.params.clone();
                    let prev_area = self.sections[prev_idx].area;
                    let next_idx = (i + direction).clamp(0, num_sec as i64 - 1) as usize;
                    let next_area = self.sections[next_idx].area;
                    self.sections[idx].propagate_imped_admit_straight(
                        prev_imped,
                        prev_admit,
                        freq,
                        &params,
                        prev_area,
                        next_area,
                        idx,
                    )?;
                }
            }
            i += direction;
        }
        Ok(())
    }

    /// Impedance and admittance entering section `idx` from `prev_idx`
    /// through the junction update, classifying the transition as an
    /// expansion or a contraction of `area * scale^2`.
    fn junction_imped_admit(
        &self,
        idx: usize,
        prev_idx: usize,
        direction: i64,
        freq: f64,
        wall_interface_admit: Complex64,
    ) -> Result<(CMatrix, CMatrix)> {
        let section = &self.sections[idx];
        let prev = &self.sections[prev_idx];
        let n_i = section.num_modes();
        let n_ps = prev.num_modes();
        let junction_losses = self.params.junction_losses;

        let complexify = |m: &RMatrix| m.map(|v| Complex64::new(v, 0.));

        let singular = |quantity: &'static str| {
            SimulationError::Propagation(PropagationError::SingularMatrix {
                section: idx,
                freq,
                quantity,
            })
        };

        match self.params.prop_method {
            PropagationMethod::Magnus => {
                if direction == -1 {
                    // F goes from idx toward its graph next, prev_idx
                    let f = complexify(&section.matrix_f[0]);
                    let contraction = section.area * section.scale_out().powi(2)
                        > prev.area * prev.scale_in().powi(2);
                    if contraction {
                        let sigma2 = section.scale_out().powi(2) / prev.scale_in().powi(2);
                        let mut adm = &f * prev.yin() * f.transpose() * Complex64::new(sigma2, 0.);
                        if junction_losses {
                            let g = CMatrix::identity(n_i, n_i) - &f * f.transpose();
                            adm -= g * wall_interface_admit;
                        }
                        let imp = try_inverse(&adm).ok_or_else(|| singular("admittance"))?;
                        Ok((imp, adm))
                    } else {
                        let sigma2 = prev.scale_in().powi(2) / section.scale_out().powi(2);
                        let z_prev = prev.zin();
                        let imp = if junction_losses {
                            let g = CMatrix::identity(n_ps, n_ps) - f.transpose() * &f;
                            let den = (CMatrix::identity(n_ps, n_ps)
                                - g * &z_prev * wall_interface_admit)
                                .try_inverse()
                                .ok_or_else(|| singular("impedance"))?;
                            &f * &z_prev * den * f.transpose() * Complex64::new(sigma2, 0.)
                        } else {
                            &f * &z_prev * f.transpose() * Complex64::new(sigma2, 0.)
                        };
                        let adm = try_inverse(&imp).ok_or_else(|| singular("impedance"))?;
                        Ok((imp, adm))
                    }
                } else {
                    // F goes from prev_idx toward idx
                    let f = complexify(&prev.matrix_f[0]);
                    let contraction = section.area * section.scale_in().powi(2)
                        > prev.area * prev.scale_out().powi(2);
                    if contraction {
                        let sigma2 = section.scale_in().powi(2) / prev.scale_out().powi(2);
                        let mut adm =
                            f.transpose() * prev.yout() * &f * Complex64::new(sigma2, 0.);
                        if junction_losses {
                            let g = CMatrix::identity(n_i, n_i) - f.transpose() * &f;
                            adm += g * wall_interface_admit;
                        }
                        let imp = try_inverse(&adm).ok_or_else(|| singular("admittance"))?;
                        Ok((imp, adm))
                    } else {
                        let sigma2 = prev.scale_out().powi(2) / section.scale_in().powi(2);
                        let z_prev = prev.zout();
                        let imp = if junction_losses {
                            let g = CMatrix::identity(n_ps, n_ps) - &f * f.transpose();
                            let den = (CMatrix::identity(n_ps, n_ps)
                                + g * &z_prev * wall_interface_admit)
                                .try_inverse()
                                .ok_or_else(|| singular("impedance"))?;
                            f.transpose() * &z_prev * den * &f * Complex64::new(sigma2, 0.)
                        } else {
                            f.transpose() * &z_prev * &f * Complex64::new(sigma2, 0.)
                        };
                        let adm = try_inverse(&imp).ok_or_else(|| singular("impedance"))?;
                        Ok((imp, adm))
                    }
                }
            }
            PropagationMethod::StraightTubes => {
                let area_ratio = prev.area.max(section.area) / prev.area.min(section.area);
                let f = if direction == -1 {
                    complexify(&section.matrix_f[0])
                } else {
                    complexify(&prev.matrix_f[0])
                };
                let contraction = section.area > prev.area;
                if direction == -1 {
                    if contraction {
                        let adm = &f * prev.yin() * f.transpose() * Complex64::new(area_ratio, 0.);
                        let imp = try_inverse(&adm).ok_or_else(|| singular("admittance"))?;
                        Ok((imp, adm))
                    } else {
                        let imp = &f * prev.zin() * f.transpose() * Complex64::new(area_ratio, 0.);
                        let adm = try_inverse(&imp).ok_or_else(|| singular("impedance"))?;
                        Ok((imp, adm))
                    }
                } else if contraction {
                    let adm = f.transpose() * prev.yout() * &f * Complex64::new(area_ratio, 0.);
                    let imp = try_inverse(&adm).ok_or_else(|| singular("admittance"))?;
                    Ok((imp, adm))
                } else {
                    let imp = f.transpose() * prev.zout() * &f * Complex64::new(area_ratio, 0.);
                    let adm = try_inverse(&imp).ok_or_else(|| singular("impedance"))?;
                    Ok((imp, adm))
                }
            }
        }
    }

    fn invert_admittance_samples(&mut self, idx: usize, freq: f64) -> Result<()> {
        let mut inverted = Vec::with_capacity(self.sections[idx].admittance.len());
        for y in &self.sections[idx].admittance {
            inverted.push(try_inverse(y).ok_or(PropagationError::SingularMatrix {
                section: idx,
                freq,
                quantity: "admittance",
            })?);
        }
        self.sections[idx].impedance = inverted;
        Ok(())
    }

    /// Propagate the axial velocity and the acoustic pressure from `start`
    /// to `end`; the impedance/admittance pass must have run first.
    pub fn propagate_velocity_press(
        &mut self,
        start_velocity: CMatrix,
        start_pressure: CMatrix,
        freq: f64,
        start: usize,
        end: usize,
    ) -> Result<()> {
        let direction: i64 = if start > end { -1 } else { 1 };
        let wall_interface_admit = Complex64::I * 2. * std::f64::consts::PI * freq
            * self.params.thermal_bnd_spec_adm
            / self.params.snd_speed;

        let mut prev_velo = start_velocity;
        let mut prev_press = start_pressure;

        let mut i = start as i64;
        while i != end as i64 {
            let idx = i as usize;
            let next_idx = (i + direction) as usize;

            self.propagate_pv_in_section(idx, prev_velo, prev_press, freq, direction)?;

            let (velo, press) = self.junction_velocity_press(
                idx,
                next_idx,
                direction,
                freq,
                wall_interface_admit,
            )?;
            prev_velo = velo;
            prev_press = press;
            i += direction;
        }

        self.propagate_pv_in_section(end, prev_velo, prev_press, freq, direction)?;
        Ok(())
    }

    /// Propagate pressure and velocity inside one section and rebuild the
    /// velocity samples from the stored admittance.
    fn propagate_pv_in_section(
        &mut self,
        idx: usize,
        velocity: CMatrix,
        pressure: CMatrix,
        freq: f64,
        direction: i64,
    ) -> Result<()> {
        self.sections[idx].clear_velocity();
        self.sections[idx].clear_pressure();
        self.sections[idx].set_q_dir(direction as i8);
        self.sections[idx].set_p_dir(direction as i8);

        match self.params.prop_method {
            PropagationMethod::Magnus => {
                let params = self.params.clone();
                self.sections[idx].propagate_magnus(
                    pressure,
                    &params,
                    freq,
                    direction as f64,
                    PhysicalQuantity::Pressure,
                    idx,
                )?;
                // velocity samples from the admittance of the backward pass
                let num_x = self.sections[idx].admittance.len();
                let mut velocity_samples = Vec::with_capacity(num_x);
                for pt in 0..num_x {
                    let q = &self.sections[idx].admittance[num_x - 1 - pt]
                        * &self.sections[idx].pressure[pt];
                    velocity_samples.push(q);
                }
                self.sections[idx].velocity = velocity_samples;
                Ok(())
            }
            PropagationMethod::StraightTubes => {
                let params = self.params.clone();
                let next_idx = ((idx as i64 + direction)
                    .clamp(0, self.sections.len() as i64 - 1)) as usize;
                let next_area = self.sections[next_idx].area;
                self.sections[idx].propagate_pressure_velocity_straight(
                    velocity,
                    pressure,
                    freq,
                    &params,
                    next_area,
                    idx,
                )?;
                Ok(())
            }
        }
    }

    /// Velocity and pressure entering the next section through a junction.
    fn junction_velocity_press(
        &self,
        idx: usize,
        next_idx: usize,
        direction: i64,
        freq: f64,
        wall_interface_admit: Complex64,
    ) -> Result<(CMatrix, CMatrix)> {
        let section = &self.sections[idx];
        let next = &self.sections[next_idx];
        let n_ns = next.num_modes();
        let junction_losses = self.params.junction_losses;

        let complexify = |m: &RMatrix| m.map(|v| Complex64::new(v, 0.));

        let singular = |quantity: &'static str| {
            SimulationError::Propagation(PropagationError::SingularMatrix {
                section: next_idx,
                freq,
                quantity,
            })
        };

        match self.params.prop_method {
            PropagationMethod::Magnus => {
                if direction == -1 {
                    let f = complexify(&next.matrix_f[0]);
                    let contraction = section.area * section.scale_in().powi(2)
                        > next.area * next.scale_out().powi(2);
                    if contraction {
                        let press = &f * section.pin()
                            * Complex64::new(section.scale_in() / next.scale_out(), 0.);
                        let velo = next.yout() * &press;
                        Ok((velo, press))
                    } else {
                        let velo = if junction_losses {
                            let g = CMatrix::identity(n_ns, n_ns) - &f * f.transpose();
                            let den = (CMatrix::identity(n_ns, n_ns)
                                + g * next.zin() * wall_interface_admit)
                                .try_inverse()
                                .ok_or_else(|| singular("velocity"))?;
                            den * &f
                                * section.qin()
                                * Complex64::new(next.scale_out() / section.scale_in(), 0.)
                        } else {
                            &f * section.qin()
                                * Complex64::new(next.scale_out() / section.scale_in(), 0.)
                        };
                        let press = next.zout() * &velo;
                        Ok((velo, press))
                    }
                } else {
                    let f = complexify(&section.matrix_f[0]);
                    let contraction = section.area * section.scale_out().powi(2)
                        > next.area * next.scale_in().powi(2);
                    if contraction {
                        let press = f.transpose()
                            * section.pout()
                            * Complex64::new(section.scale_out() / next.scale_in(), 0.);
                        let velo = next.yin() * &press;
                        Ok((velo, press))
                    } else {
                        let velo = if junction_losses {
                            let g = CMatrix::identity(n_ns, n_ns) - f.transpose() * &f;
                            let den = (CMatrix::identity(n_ns, n_ns)
                                - g * next.zin() * wall_interface_admit)
                                .try_inverse()
                                .ok_or_else(|| singular("velocity"))?;
                            den * f.transpose()
                                * section.qout()
                                * Complex64::new(next.scale_in() / section.scale_out(), 0.)
                        } else {
                            f.transpose()
                                * section.qout()
                                * Complex64::new(next.scale_in() / section.scale_out(), 0.)
                        };
                        let press = next.zin() * &velo;
                        Ok((velo, press))
                    }
                }
            }
            PropagationMethod::StraightTubes => {
                let area_ratio = (next.area.max(section.area) / next.area.min(section.area)).sqrt();
                let f = if direction == -1 {
                    complexify(&next.matrix_f[0])
                } else {
                    complexify(&section.matrix_f[0])
                };
                let expansion = next.area > section.area;
                if direction == -1 {
                    if expansion {
                        let velo = &f * section.qin() * Complex64::new(area_ratio, 0.);
                        let press = next.zout() * &velo;
                        Ok((velo, press))
                    } else {
                        let press = &f * section.pin() * Complex64::new(area_ratio, 0.);
                        let velo = next.yout() * &press;
                        Ok((velo, press))
                    }
                } else if expansion {
                    let velo = f.transpose() * section.qout() * Complex64::new(area_ratio, 0.);
                    let press = next.zin() * &velo;
                    Ok((velo, press))
                } else {
                    let press = f.transpose() * section.pout() * Complex64::new(area_ratio, 0.);
                    let velo = next.yin() * &press;
                    Ok((velo, press))
                }
            }
        }
    }

    /// Propagate the impedance or admittance through a branched part of
    /// the graph: a worklist visits every segment group once all of its
    /// predecessors in the chosen direction have been solved, concatenating
    /// the mode matching matrices and assembling the upstream quantity as a
    /// block diagonal matrix.
    pub fn propagate_imped_admit_branch(
        &mut self,
        q0: Vec<CMatrix>,
        freq: f64,
        start_sections: &[usize],
        end_sections: &[usize],
        direction: i64,
    ) -> Result<()> {
        let mut seg_to_prop: Vec<Vec<usize>> = start_sections.iter().map(|&s| vec![s]).collect();

        let mut ns = 0;
        while ns < seg_to_prop.len() {
            if ns < start_sections.len() {
                let seg = seg_to_prop[ns][0];
                let params = self.params.clone();
                let quant = if self.sections[seg].compute_impedance {
                    PhysicalQuantity::Impedance
                } else {
                    PhysicalQuantity::Admittance
                };
                self.sections[seg].propagate_magnus(
                    q0[ns].clone(),
                    &params,
                    freq,
                    direction as f64,
                    quant,
                    seg,
                )?;
            } else {
                let group = seg_to_prop[ns].clone();
                let first = group[0];
                let prev_segs: Vec<usize> = if direction > 0 {
                    self.sections[first].prev.clone()
                } else {
                    self.sections[first].next.clone()
                };

                let singular = |section: usize| {
                    SimulationError::Propagation(PropagationError::SingularMatrix {
                        section,
                        freq,
                        quantity: "branch quantity",
                    })
                };

                if self.sections[first].area < self.sections[prev_segs[0]].area {
                    // the previous segment is larger: only one segment can
                    // feed the whole group, distribute its impedance
                    let f_parts: Vec<RMatrix> = if direction > 0 {
                        self.sections[prev_segs[0]].matrix_f.clone()
                    } else {
                        group
                            .iter()
                            .map(|&s| self.sections[s].matrix_f[0].transpose())
                            .collect()
                    };
                    let rows = f_parts[0].nrows();
                    let cols: usize = f_parts.iter().map(|f| f.ncols()).sum();
                    let mut f = RMatrix::zeros(rows, cols);
                    let mut col = 0;
                    for part in &f_parts {
                        f.view_mut((0, col), (rows, part.ncols())).copy_from(part);
                        col += part.ncols();
                    }
                    let f = f.map(|v| Complex64::new(v, 0.));

                    let q_out = if self.sections[prev_segs[0]].compute_impedance {
                        self.sections[prev_segs[0]].zin()
                    } else {
                        try_inverse(&self.sections[prev_segs[0]].yin())
                            .ok_or_else(|| singular(prev_segs[0]))?
                    };
                    let q_ini = f.transpose() * q_out * &f;

                    let mut offset = 0;
                    for &seg in &group {
                        let mn = self.sections[seg].num_modes();
                        let block = q_ini.view((offset, offset), (mn, mn)).into_owned();
                        let params = self.params.clone();
                        self.sections[seg].propagate_magnus(
                            block,
                            &params,
                            freq,
                            direction as f64,
                            PhysicalQuantity::Impedance,
                            seg,
                        )?;
                        self.sections[seg].compute_impedance = true;
                        offset += mn;
                    }
                } else {
                    // the previous segments are smaller: merge them
                    let f_parts: Vec<RMatrix> = if direction > 0 {
                        prev_segs
                            .iter()
                            .map(|&s| self.sections[s].matrix_f[0].transpose())
                            .collect()
                    } else {
                        self.sections[first].matrix_f.clone()
                    };
                    let rows = f_parts[0].nrows();
                    let cols: usize = f_parts.iter().map(|f| f.ncols()).sum();
                    let mut f = RMatrix::zeros(rows, cols);
                    let mut col = 0;
                    for part in &f_parts {
                        f.view_mut((0, col), (rows, part.ncols())).copy_from(part);
                        col += part.ncols();
                    }
                    let f = f.map(|v| Complex64::new(v, 0.));

                    let mut q_out = CMatrix::zeros(cols, cols);
                    let mut offset = 0;
                    for &seg in &prev_segs {
                        let mn = self.sections[seg].num_modes();
                        let block = if self.sections[seg].compute_impedance {
                            try_inverse(&self.sections[seg].zin()).ok_or_else(|| singular(seg))?
                        } else {
                            self.sections[seg].yin()
                        };
                        q_out.view_mut((offset, offset), (mn, mn)).copy_from(&block);
                        offset += mn;
                    }

                    let q_ini = &f * q_out * f.transpose();
                    let params = self.params.clone();
                    self.sections[first].propagate_magnus(
                        q_ini,
                        &params,
                        freq,
                        direction as f64,
                        PhysicalQuantity::Admittance,
                        first,
                    )?;
                    self.sections[first].compute_impedance = false;
                }
            }

            // append the connected segment groups whose predecessors have
            // all been propagated
            let current = seg_to_prop[ns].clone();
            for &seg in &current {
                if end_sections.contains(&seg) {
                    continue;
                }
                let next_segs: Vec<usize> = if direction > 0 {
                    self.sections[seg].next.clone()
                } else {
                    self.sections[seg].prev.clone()
                };
                if next_segs.is_empty() {
                    continue;
                }
                let in_list = seg_to_prop[ns..]
                    .iter()
                    .any(|g| g[0] == next_segs[0]);
                if in_list {
                    continue;
                }

                let add = if next_segs.len() > 1 {
                    true
                } else {
                    let preds: Vec<usize> = if direction > 0 {
                        self.sections[next_segs[0]].prev.clone()
                    } else {
                        self.sections[next_segs[0]].next.clone()
                    };
                    preds.iter().all(|p| {
                        seg_to_prop[..=ns].iter().any(|g| g.contains(p))
                    })
                };
                if add {
                    seg_to_prop.push(next_segs);
                }
            }
            ns += 1;
        }
        Ok(())
    }

    // **********************************************************************
    // single frequency solve

    /// Solve the full wave problem at one frequency: outlet boundary,
    /// backward impedance/admittance pass, source injection and forward
    /// pressure/velocity pass.
    pub fn solve_wave_problem(&mut self, freq: f64) -> Result<()> {
        self.precompute()?;
        let freq = freq.max(0.1);
        let last_fem = self.last_fem_section();

        let (rad_imped, rad_admit) = self.outlet_boundary(freq)?;
        self.propagate_imped_admit(rad_imped, rad_admit, freq, last_fem, 0)?;

        // constant input velocity source q = -j w rho v
        let mn = self.sections[0].num_modes();
        let mut input_velocity = CMatrix::zeros(mn, 1);
        input_velocity[(0, 0)] = -Complex64::I
            * 2.
            * std::f64::consts::PI
            * freq
            * self.params.volumic_mass
            * self.sections[0].scale_in().powi(3)
            * self.sections[0].area;
        let input_pressure = self.sections[0].zin() * &input_velocity;

        self.propagate_velocity_press(input_velocity, input_pressure, freq, 0, last_fem)?;
        self.last_freq_computed = Some(freq);
        Ok(())
    }

    /// Re-solve with a unit pressure injection at the outlet face of the
    /// noise source section and propagate downstream.
    pub fn solve_wave_problem_noise_src(&mut self, freq: f64) -> Result<()> {
        let freq = freq.max(0.1);
        let last_fem = self.last_fem_section();
        let idx_noise = self.noise_source_section();
        if idx_noise >= last_fem {
            return Ok(());
        }

        let f = self.sections[idx_noise].matrix_f[0]
            .map(|v| Complex64::new(v, 0.));

        let mn_noise = self.sections[idx_noise].num_modes();
        let mut input_pressure_noise = CMatrix::zeros(mn_noise, 1);
        input_pressure_noise[(0, 0)] = Complex64::ONE;

        let next = idx_noise + 1;
        let expansion = self.sections[next].area * self.sections[next].scale_in().powi(2)
            > self.sections[idx_noise].area * self.sections[idx_noise].scale_out().powi(2);

        // upstream input impedance or admittance seen from the source
        let upstream = if expansion {
            self.sections[idx_noise].zout()
        } else {
            self.sections[idx_noise].yout()
        };

        // propagate the glottis boundary up to the noise source location
        let (glottis_imped, glottis_admit) = self.glottis_boundary(freq);
        self.propagate_imped_admit(glottis_imped, glottis_admit, freq, 0, idx_noise)?;

        let singular = |section: usize| {
            SimulationError::Propagation(PropagationError::SingularMatrix {
                section,
                freq,
                quantity: "noise source",
            })
        };

        let freq_c = Complex64::new(freq, 0.);
        let (prev_velo, prev_press);
        if expansion {
            let sys = (&upstream + self.sections[idx_noise].zout()) * freq_c;
            let sol = sys
                .qr()
                .solve(&input_pressure_noise)
                .ok_or_else(|| singular(idx_noise))?;
            prev_velo = f.transpose() * sol;
            prev_press = self.sections[next].zin() * &prev_velo * freq_c;
        } else {
            let y_out = self.sections[idx_noise].yout();
            let sys = &upstream + &y_out;
            let rhs = -(&y_out * &input_pressure_noise);
            let sol = sys.qr().solve(&rhs).ok_or_else(|| singular(idx_noise))?;
            prev_press = f.transpose() * sol;
            prev_velo = self.sections[next].yin() * &prev_press;
        }

        self.propagate_velocity_press(
            prev_velo,
            prev_press,
            freq,
            next.min(last_fem),
            last_fem,
        )?;
        Ok(())
    }

    // **********************************************************************
    // transfer functions

    /// Sweep the frequency grid and accumulate the glottal and noise
    /// source transfer functions at the configured reception points. A
    /// propagation failure at one frequency yields NaN entries and the
    /// sweep continues.
    pub fn compute_transfer_function(&mut self) -> Result<()> {
        self.precompute()?;

        // most reception points lie outside the tract
        let saved_radiated = self.params.compute_radiated_field;
        self.params.compute_radiated_field = true;

        let freq_step = self.params.freq_step();
        let num_freq_computed =
            (self.params.max_computed_freq / freq_step).ceil() as usize;
        let num_points = self.params.tf_points.len();

        // the reception points are given in the exit frame
        let tf_points: Vec<DVec3> = self
            .params
            .tf_points
            .iter()
            .map(|p| self.exit_to_geo(DVec3::new(p[0], p[1], p[2])))
            .collect();

        self.tf = TransferFunctions::default();
        self.tf.freqs.reserve(num_freq_computed);

        let nan_row = vec![Complex64::new(f64::NAN, f64::NAN); num_points];

        for i in 0..num_freq_computed {
            let freq = (i as f64 * freq_step).max(0.1);
            if self.logging {
                println!(
                    "frequency {}/{} f = {freq} Hz",
                    i + 1,
                    num_freq_computed
                );
            }
            self.tf.freqs.push(freq);

            match self.solve_wave_problem(freq) {
                Ok(()) => {
                    let field: Vec<Complex64> = tf_points
                        .iter()
                        .map(|&pt| self.acoustic_field_at(pt, freq))
                        .collect();
                    self.tf.glottal.push(field);
                    self.tf
                        .plane_mode_input_impedance
                        .push(self.sections[0].zin()[(0, 0)]);
                }
                Err(SimulationError::Propagation(_)) => {
                    self.tf.glottal.push(nan_row.clone());
                    self.tf
                        .plane_mode_input_impedance
                        .push(Complex64::new(f64::NAN, f64::NAN));
                }
                Err(e) => {
                    self.params.compute_radiated_field = saved_radiated;
                    return Err(e);
                }
            }

            match self.solve_wave_problem_noise_src(freq) {
                Ok(()) => {
                    let field: Vec<Complex64> = tf_points
                        .iter()
                        .map(|&pt| self.acoustic_field_at(pt, freq))
                        .collect();
                    self.tf.noise.push(field);
                }
                Err(SimulationError::Propagation(_)) => {
                    self.tf.noise.push(nan_row.clone());
                }
                Err(e) => {
                    self.params.compute_radiated_field = saved_radiated;
                    return Err(e);
                }
            }
        }
        self.params.compute_radiated_field = saved_radiated;
        Ok(())
    }

    /// Interpolate a stored transfer function at an arbitrary frequency by
    /// linear interpolation of the log magnitude.
    pub fn interpolate_transfer_function(&self, freq: f64, idx_pt: usize) -> Complex64 {
        self.interpolate_tf_kind(freq, idx_pt, TfKind::Glottal)
    }

    /// Same interpolation for the noise source transfer function or the
    /// plane mode input impedance.
    pub fn interpolate_tf_kind(&self, freq: f64, idx_pt: usize, kind: TfKind) -> Complex64 {
        let freqs = &self.tf.freqs;
        let sample = |i: usize, idx_pt: usize| -> Option<Complex64> {
            match kind {
                TfKind::Glottal => self
                    .tf
                    .glottal
                    .get(i)
                    .and_then(|row| row.get(idx_pt))
                    .copied(),
                TfKind::Noise => self.tf.noise.get(i).and_then(|row| row.get(idx_pt)).copied(),
                TfKind::InputImpedance => self.tf.plane_mode_input_impedance.get(i).copied(),
            }
        };

        if freqs.is_empty() || sample(0, 0).is_none() {
            return Complex64::new(f64::NAN, f64::NAN);
        }
        if freq < freqs[0] || freq > *freqs.last().unwrap() {
            return Complex64::new(f64::NAN, f64::NAN);
        }
        let freq_step = self.params.freq_step();
        let i0 = ((freq / freq_step) as usize).min(freqs.len() - 1);
        let i1 = (i0 + 1).min(freqs.len() - 1);

        let (t0, t1) = match (sample(i0, idx_pt), sample(i1, idx_pt)) {
            (Some(a), Some(b)) => (a.norm().log10(), b.norm().log10()),
            _ => return Complex64::new(f64::NAN, f64::NAN),
        };
        let value = 10f64.powf(t0 + (t1 - t0) * (freq - i0 as f64 * freq_step) / freq_step);
        Complex64::new(value, 0.)
    }

    // **********************************************************************
    // acoustic field

    /// Move a reception point from the exit frame (origin at the outlet,
    /// axis along the exit normal) to the geometry frame.
    pub fn exit_to_geo(&self, pt: DVec3) -> DVec3 {
        let section = &self.sections[self.last_fem_section()];
        let end_normal = section.normal_out();
        let end_ctl = section.ctr_out();

        let mut p = DVec2::new(pt.x, pt.z);
        let two_pi = 2. * std::f64::consts::PI;
        let mut angle = (end_normal.y.atan2(end_normal.x) - std::f64::consts::FRAC_PI_2
            + two_pi)
            % two_pi;

        let flip = if section.arc_angle.abs() > MIN_DISTANCE {
            (section.curv_radius * section.arc_angle).is_sign_negative()
        } else {
            let ctl_vec = section.ctr_in - end_ctl;
            let angle_ctl = (ctl_vec.y.atan2(ctl_vec.x) - end_normal.y.atan2(end_normal.x)
                + two_pi)
                % two_pi;
            let pt_vec = end_ctl - p;
            let angle_pt = (pt_vec.y.atan2(pt_vec.x) - end_normal.y.atan2(end_normal.x)
                + two_pi)
                % two_pi;
            !((angle_ctl - std::f64::consts::PI) * angle_pt).is_sign_negative()
        };

        if flip {
            angle -= std::f64::consts::PI;
            p = DVec2::from_angle(angle).rotate(DVec2::new(p.x, -p.y));
        } else {
            p = DVec2::from_angle(angle).rotate(p);
        }

        DVec3::new(p.x + end_ctl.x, pt.y, p.y + end_ctl.y)
    }

    /// Acoustic field at a Cartesian point of the geometry frame, for the
    /// frequency of the last solve.
    pub fn acoustic_field(&self, query: DVec3) -> Complex64 {
        let freq = self.last_freq_computed.unwrap_or(self.params.freq_field);
        self.acoustic_field_at(query, freq)
    }

    fn acoustic_field_at(&self, query: DVec3, freq: f64) -> Complex64 {
        let last = &self.sections[self.last_fem_section()];
        let end_normal = last.normal_out();
        let end_ctl = last.ctr_out();
        let vec = DVec2::new(query.x, query.z) - end_ctl;

        // signed position of the point relative to the outlet plane
        let beyond = if last.arc_angle.abs() <= MIN_DISTANCE {
            let axial = DVec2::from_angle(-std::f64::consts::FRAC_PI_2).rotate(end_normal);
            vec.dot(axial) > 0.
        } else {
            let two_pi = 2. * std::f64::consts::PI;
            let angle = if (last.curv_radius * last.arc_angle).is_sign_negative() {
                std::f64::consts::PI
                    - ((vec.y.atan2(vec.x) - end_normal.y.atan2(end_normal.x) + two_pi) % two_pi)
            } else {
                ((vec.y.atan2(vec.x) - end_normal.y.atan2(end_normal.x) + two_pi) % two_pi)
                    - std::f64::consts::PI
            };
            angle > 0.
        };

        if !beyond {
            for section in &self.sections {
                if let Some(local) = section.cartesian_to_local(query, false) {
                    return section.interior_field(
                        local,
                        &self.params,
                        self.params.field_physical_quantity,
                    );
                }
            }
            Complex64::new(f64::NAN, f64::NAN)
        } else if self.params.compute_radiated_field {
            let rad_pt = DVec3::new(vec.x, query.y, vec.y);
            match self.rayleigh_sommerfeld(&[rad_pt], freq) {
                Ok(press) => press[0],
                Err(_) => Complex64::new(f64::NAN, f64::NAN),
            }
        } else {
            Complex64::new(f64::NAN, f64::NAN)
        }
    }

    /// Find the section containing a sagittal plane point.
    pub fn find_section_containing_point(&self, query: DVec2) -> Option<usize> {
        self.sections.iter().position(|s| {
            s.cartesian_to_local(DVec3::new(query.x, 0., query.y), true)
                .is_some()
        })
    }

    /// Sample the acoustic field on a regular sagittal plane grid; NaN
    /// outside the waveguide.
    pub fn acoustic_field_grid(
        &self,
        bbox_min: DVec2,
        bbox_max: DVec2,
    ) -> (Vec<f64>, Vec<f64>, Vec<Vec<Complex64>>) {
        let resolution = self.params.field_resolution as f64;
        let lx = bbox_max.x - bbox_min.x;
        let ly = bbox_max.y - bbox_min.y;
        let nx = (lx * resolution).round().max(2.) as usize;
        let ny = (ly * resolution).round().max(2.) as usize;

        let xs: Vec<f64> = (0..nx)
            .map(|i| bbox_min.x + lx * i as f64 / (nx - 1) as f64)
            .collect();
        let ys: Vec<f64> = (0..ny)
            .map(|j| bbox_min.y + ly * j as f64 / (ny - 1) as f64)
            .collect();

        let mut field = vec![vec![Complex64::new(f64::NAN, f64::NAN); nx]; ny];
        for (j, &y) in ys.iter().enumerate() {
            for (i, &x) in xs.iter().enumerate() {
                field[j][i] = self.acoustic_field(DVec3::new(x, 0., y));
            }
        }
        (xs, ys, field)
    }

    /// Far field pressure by the Rayleigh-Sommerfeld integral over the
    /// outlet aperture, with either a discrete Cartesian grid or Gauss
    /// quadrature on the aperture mesh.
    pub fn rayleigh_sommerfeld(&self, points: &[DVec3], freq: f64) -> Result<CVector> {
        let idx = self.last_fem_section();
        let section = &self.sections[idx];
        let mn = section.num_modes();
        let k = self.params.wavenumber(freq);
        let scaling = section.scale_out();
        let vm = section.qout();

        let mut rad_press = CVector::zeros(points.len());

        match self.params.integration_method_radiation {
            RadiationIntegration::Discrete => {
                let contour = &section
                    .fem()
                    .expect("outlet section must be a FEM section")
                    .contour;
                let grid_density = 15.;
                let spacing = section.area.sqrt() / grid_density;
                let ds = spacing * spacing;
                let (min, max) = contour.bbox();
                let nx = ((max.x - min.x) / spacing).ceil() as usize;
                let ny = ((max.y - min.y) / spacing).ceil() as usize;
                let mut grid = Vec::new();
                for i in 0..nx {
                    for j in 0..ny {
                        let pt =
                            DVec2::new(min.x + i as f64 * spacing, min.y + j as f64 * spacing);
                        if contour.contains(pt) {
                            grid.push(pt);
                        }
                    }
                }
                let modes = section.interpolate_modes(&grid);

                for (c, g) in grid.iter().enumerate() {
                    for m in 0..mn {
                        for (p, pt) in points.iter().enumerate() {
                            let r = (DVec3::new(0., g.x, g.y) - *pt).length();
                            rad_press[p] -= vm[(m, 0)]
                                * modes[(c, m)]
                                * (-Complex64::I * k * scaling * r).exp()
                                * ds
                                / scaling
                                / r;
                        }
                    }
                }
            }
            RadiationIntegration::Gauss => {
                let fem = section
                    .fem()
                    .expect("outlet section must be a FEM section");
                let (gauss_pts, area_faces) = fem.mesh.gauss_points();
                let modes = section.interpolate_modes(&gauss_pts);

                // the integration points live in the scaled exit plane
                let scaled: Vec<DVec3> = points.iter().map(|p| *p / scaling).collect();

                for (face, &area) in area_faces.iter().enumerate() {
                    for m in 0..mn {
                        for (p, pt) in scaled.iter().enumerate() {
                            for g in 0..3 {
                                let gauss = gauss_pts[face * 3 + g];
                                let r = (DVec3::new(0., gauss.x, gauss.y) - *pt).length();
                                rad_press[p] -= area
                                    * crate::numerics::quadrature::TRI_GAUSS_WEIGHT
                                    * vm[(m, 0)]
                                    * modes[(face * 3 + g, m)]
                                    * (-Complex64::I * k * scaling * r).exp()
                                    / scaling
                                    / r;
                            }
                        }
                    }
                }
            }
        }

        Ok(rad_press / Complex64::new(2. * std::f64::consts::PI, 0.))
    }
}
