use glam::{DVec2, DVec3};
use num_complex::Complex64;

use crate::error::PropagationError;
use crate::geometry::centerline::{exit_normal, exit_point};
use crate::geometry::Contour;
use crate::numerics::linalg::expm;
use crate::numerics::{CMatrix, RMatrix};
use crate::params::{
    AreaProfile, PhysicalQuantity, PropagationMethod, SimulationParameters, MIN_DISTANCE,
};
use crate::physics::losses;
use crate::physics::modal::ModalBasis;
use crate::physics::radiation::RadiationBasis;
use crate::{discretization::TriMesh, physics::losses::wall_admittance};

/// Finite element cross-section data.
#[derive(Debug, Clone)]
pub struct FemSection {
    pub contour: Contour,
    pub spacing: f64,
    pub perimeter: f64,
    /// Zero length section inserted at a junction between two contours
    /// which do not strictly contain one another.
    pub junction: bool,
    pub area_profile: AreaProfile,
    pub mesh: TriMesh,
    pub basis: Option<ModalBasis>,
}

/// Open end cross-section with its analytic Bessel/PML basis.
#[derive(Debug, Clone)]
pub struct RadiationSection {
    pub radius: f64,
    pub pml_thickness: f64,
    pub basis: Option<RadiationBasis>,
}

#[derive(Debug, Clone)]
pub enum SectionKind {
    Fem(FemSection),
    Radiation(RadiationSection),
}

/// One section of the waveguide: geometry, modal data and the per
/// frequency propagation state sampled at the integration nodes.
#[derive(Debug, Clone)]
pub struct Section {
    pub ctr_in: DVec2,
    pub normal_in: DVec2,
    /// Distance between the entry and exit centerline points; the axial
    /// length of a curved section is `|arc_angle * curv_radius|`.
    pub chord_length: f64,
    pub curv_radius: f64,
    pub arc_angle: f64,
    pub scale: [f64; 2],
    pub area: f64,
    pub prev: Vec<usize>,
    pub next: Vec<usize>,
    /// Propagation direction of Z, Y, Q and P.
    dir: [i8; 4],
    /// Whether the impedance (rather than the admittance) was propagated
    /// in this section during the backward pass.
    pub compute_impedance: bool,
    pub impedance: Vec<CMatrix>,
    pub admittance: Vec<CMatrix>,
    pub pressure: Vec<CMatrix>,
    pub velocity: Vec<CMatrix>,
    /// Mode matching matrices toward each section of `next`.
    pub matrix_f: Vec<RMatrix>,
    pub kind: SectionKind,
}

impl Section {
    pub fn new_fem(
        contour: Contour,
        ctr_in: DVec2,
        normal_in: DVec2,
        length: f64,
        scale: [f64; 2],
        mesh_density: f64,
    ) -> Self {
        let area = contour.area();
        let spacing = area.sqrt() / mesh_density;
        let perimeter = contour.perimeter();
        Self {
            ctr_in,
            normal_in,
            chord_length: length,
            curv_radius: 0.,
            arc_angle: 0.,
            scale,
            area,
            prev: Vec::new(),
            next: Vec::new(),
            dir: [-1, -1, 1, 1],
            compute_impedance: false,
            impedance: Vec::new(),
            admittance: Vec::new(),
            pressure: Vec::new(),
            velocity: Vec::new(),
            matrix_f: Vec::new(),
            kind: SectionKind::Fem(FemSection {
                contour,
                spacing,
                perimeter,
                junction: false,
                area_profile: AreaProfile::Linear,
                mesh: TriMesh::default(),
                basis: None,
            }),
        }
    }

    pub fn new_radiation(ctr_in: DVec2, normal_in: DVec2, radius: f64, pml_thickness: f64) -> Self {
        Self {
            ctr_in,
            normal_in,
            chord_length: 0.,
            curv_radius: 0.,
            arc_angle: 0.,
            scale: [1., 1.],
            area: std::f64::consts::PI * radius * radius,
            prev: Vec::new(),
            next: Vec::new(),
            dir: [-1, -1, 1, 1],
            compute_impedance: false,
            impedance: Vec::new(),
            admittance: Vec::new(),
            pressure: Vec::new(),
            velocity: Vec::new(),
            matrix_f: Vec::new(),
            kind: SectionKind::Radiation(RadiationSection {
                radius,
                pml_thickness,
                basis: None,
            }),
        }
    }

    // **********************************************************************
    // accessors

    pub fn is_radiation(&self) -> bool {
        matches!(self.kind, SectionKind::Radiation(_))
    }

    pub fn is_junction(&self) -> bool {
        matches!(&self.kind, SectionKind::Fem(fem) if fem.junction)
    }

    pub fn kind_tag(&self) -> &'static str {
        match &self.kind {
            SectionKind::Radiation(_) => "radiation",
            SectionKind::Fem(fem) if fem.junction => "junction",
            _ if self.arc_angle.abs() < MIN_DISTANCE => "fem-straight",
            _ => "fem-curved",
        }
    }

    pub fn fem(&self) -> Option<&FemSection> {
        match &self.kind {
            SectionKind::Fem(fem) => Some(fem),
            SectionKind::Radiation(_) => None,
        }
    }

    pub fn fem_mut(&mut self) -> Option<&mut FemSection> {
        match &mut self.kind {
            SectionKind::Fem(fem) => Some(fem),
            SectionKind::Radiation(_) => None,
        }
    }

    pub fn num_modes(&self) -> usize {
        match &self.kind {
            SectionKind::Fem(fem) => fem.basis.as_ref().map_or(0, |b| b.num_modes()),
            SectionKind::Radiation(rad) => rad.basis.as_ref().map_or(0, |b| b.num_modes()),
        }
    }

    pub fn eigen_freqs(&self) -> &[f64] {
        match &self.kind {
            SectionKind::Fem(fem) => match &fem.basis {
                Some(basis) => &basis.eigen_freqs,
                None => &[],
            },
            SectionKind::Radiation(_) => &[],
        }
    }

    /// Axial length; curved sections follow the circle arc.
    pub fn length(&self) -> f64 {
        if self.arc_angle.abs() < MIN_DISTANCE {
            self.chord_length
        } else {
            self.arc_angle.abs() * self.curv_radius.abs()
        }
    }

    pub fn curvature(&self, curved: bool) -> f64 {
        if curved && self.curv_radius != 0. {
            1. / self.curv_radius
        } else {
            0.
        }
    }

    pub fn ctr_out(&self) -> DVec2 {
        exit_point(
            self.ctr_in,
            self.normal_in,
            self.arc_angle,
            self.curv_radius,
            self.length(),
        )
    }

    pub fn normal_out(&self) -> DVec2 {
        exit_normal(self.normal_in, self.arc_angle, self.length())
    }

    pub fn scale_in(&self) -> f64 {
        self.scale[0]
    }

    pub fn scale_out(&self) -> f64 {
        self.scale[1]
    }

    pub fn spacing(&self) -> f64 {
        match &self.kind {
            SectionKind::Fem(fem) => fem.spacing,
            SectionKind::Radiation(rad) => rad.radius,
        }
    }

    pub fn z_dir(&self) -> i8 {
        self.dir[0]
    }
    pub fn y_dir(&self) -> i8 {
        self.dir[1]
    }
    pub fn q_dir(&self) -> i8 {
        self.dir[2]
    }
    pub fn p_dir(&self) -> i8 {
        self.dir[3]
    }
    pub fn set_z_dir(&mut self, dir: i8) {
        self.dir[0] = dir;
    }
    pub fn set_y_dir(&mut self, dir: i8) {
        self.dir[1] = dir;
    }
    pub fn set_q_dir(&mut self, dir: i8) {
        self.dir[2] = dir;
    }
    pub fn set_p_dir(&mut self, dir: i8) {
        self.dir[3] = dir;
    }

    pub fn zin(&self) -> CMatrix {
        if self.z_dir() == 1 {
            self.impedance[0].clone()
        } else {
            self.impedance[self.impedance.len() - 1].clone()
        }
    }

    pub fn zout(&self) -> CMatrix {
        if self.z_dir() == 1 {
            self.impedance[self.impedance.len() - 1].clone()
        } else {
            self.impedance[0].clone()
        }
    }

    pub fn yin(&self) -> CMatrix {
        if self.y_dir() == 1 {
            self.admittance[0].clone()
        } else {
            self.admittance[self.admittance.len() - 1].clone()
        }
    }

    pub fn yout(&self) -> CMatrix {
        if self.y_dir() == 1 {
            self.admittance[self.admittance.len() - 1].clone()
        } else {
            self.admittance[0].clone()
        }
    }

    pub fn qin(&self) -> CMatrix {
        if self.q_dir() == 1 {
            self.velocity[0].clone()
        } else {
            self.velocity[self.velocity.len() - 1].clone()
        }
    }

    pub fn qout(&self) -> CMatrix {
        if self.velocity.is_empty() {
            &self.yout() * self.pout()
        } else if self.q_dir() == 1 {
            self.velocity[self.velocity.len() - 1].clone()
        } else {
            self.velocity[0].clone()
        }
    }

    pub fn pin(&self) -> CMatrix {
        if self.p_dir() == 1 {
            self.pressure[0].clone()
        } else {
            self.pressure[self.pressure.len() - 1].clone()
        }
    }

    pub fn pout(&self) -> CMatrix {
        if self.p_dir() == 1 {
            self.pressure[self.pressure.len() - 1].clone()
        } else {
            self.pressure[0].clone()
        }
    }

    pub fn clear_impedance(&mut self) {
        self.impedance.clear();
    }
    pub fn clear_admittance(&mut self) {
        self.admittance.clear();
    }
    pub fn clear_pressure(&mut self) {
        self.pressure.clear();
    }
    pub fn clear_velocity(&mut self) {
        self.velocity.clear();
    }

    // **********************************************************************
    // area variation profile

    pub fn scaling(&self, tau: f64) -> f64 {
        let profile = match &self.kind {
            SectionKind::Fem(fem) => fem.area_profile,
            SectionKind::Radiation(_) => AreaProfile::Linear,
        };
        match profile {
            AreaProfile::Linear => (self.scale[1] - self.scale[0]) * tau + self.scale[0],
            AreaProfile::Gaussian => {
                1. + 0.75 * (-(0.3 * (tau - 0.5)).powi(2) / 2. / 0.04f64.powi(2)).exp()
            }
            AreaProfile::Elephant => 0.25 * (1. + 9. * tau.powi(2) - 6. * tau.powi(3)),
        }
    }

    pub fn scaling_derivative(&self, tau: f64) -> f64 {
        let al = if self.arc_angle.abs() < MIN_DISTANCE {
            self.chord_length
        } else {
            self.arc_angle.abs() * self.curv_radius.abs()
        };
        let profile = match &self.kind {
            SectionKind::Fem(fem) => fem.area_profile,
            SectionKind::Radiation(_) => AreaProfile::Linear,
        };
        match profile {
            AreaProfile::Linear => (self.scale[1] - self.scale[0]) / al,
            AreaProfile::Gaussian => {
                -0.75 * 0.09 * (tau - 0.5) * (-(0.3 * (tau - 0.5)).powi(2) / 2. / 0.04f64.powi(2)).exp()
                    / 0.04f64.powi(2)
                    / 30.
            }
            AreaProfile::Elephant => 9. * tau * (1. - tau) / 16.95 / 2.,
        }
    }

    // **********************************************************************
    // characteristic impedance and admittance

    pub fn characteristic_impedance(&self, freq: f64, params: &SimulationParameters) -> CMatrix {
        match &self.kind {
            SectionKind::Radiation(rad) => rad
                .basis
                .as_ref()
                .map(|b| b.characteristic_impedance(freq, params))
                .unwrap_or_else(|| CMatrix::zeros(0, 0)),
            SectionKind::Fem(_) => {
                let mn = self.num_modes();
                let k = params.wavenumber(freq);
                let mut out = CMatrix::zeros(mn, mn);
                for (i, fm) in self.eigen_freqs().iter().enumerate() {
                    let km2 = (2. * std::f64::consts::PI * fm / params.snd_speed).powi(2);
                    out[(i, i)] = match params.prop_method {
                        PropagationMethod::Magnus => {
                            1. / Complex64::new(km2 - k * k, 0.).sqrt()
                        }
                        PropagationMethod::StraightTubes => {
                            params.volumic_mass * 2. * std::f64::consts::PI * freq
                                / Complex64::new(k * k - km2, 0.).sqrt()
                                / self.area
                        }
                    };
                }
                out
            }
        }
    }

    pub fn characteristic_admittance(&self, freq: f64, params: &SimulationParameters) -> CMatrix {
        match &self.kind {
            SectionKind::Radiation(rad) => rad
                .basis
                .as_ref()
                .map(|b| b.characteristic_admittance(freq, params))
                .unwrap_or_else(|| CMatrix::zeros(0, 0)),
            SectionKind::Fem(_) => {
                let mn = self.num_modes();
                let k = params.wavenumber(freq);
                let mut out = CMatrix::zeros(mn, mn);
                for (i, fm) in self.eigen_freqs().iter().enumerate() {
                    let km2 = (2. * std::f64::consts::PI * fm / params.snd_speed).powi(2);
                    out[(i, i)] = match params.prop_method {
                        PropagationMethod::Magnus => Complex64::new(km2 - k * k, 0.).sqrt(),
                        PropagationMethod::StraightTubes => {
                            Complex64::new(k * k - km2, 0.).sqrt() * self.area
                                / (params.volumic_mass * 2. * std::f64::consts::PI * freq)
                        }
                    };
                }
                out
            }
        }
    }

    // **********************************************************************
    // propagation

    /// Propagate impedance, admittance, pressure or velocity through the
    /// section with the Magnus-Moebius scheme of order 2 or 4.
    pub fn propagate_magnus(
        &mut self,
        q0: CMatrix,
        params: &SimulationParameters,
        freq: f64,
        direction: f64,
        quant: PhysicalQuantity,
        section: usize,
    ) -> Result<(), PropagationError> {
        let num_x = params.num_integration_step;
        let mn = self.num_modes();
        let al = self.length();
        let curv = self.curvature(params.curved);
        let k = params.wavenumber(freq);

        if al == 0. {
            match quant {
                PhysicalQuantity::Impedance => {
                    self.impedance.clear();
                    self.impedance.push(q0);
                }
                PhysicalQuantity::Admittance => {
                    self.admittance.clear();
                    self.admittance.push(q0);
                }
                PhysicalQuantity::Pressure => {
                    self.pressure.clear();
                    self.pressure.push(q0);
                }
                PhysicalQuantity::Velocity => {
                    self.velocity.clear();
                    self.velocity.push(q0);
                }
            }
            return Ok(());
        }

        let dx = match quant {
            PhysicalQuantity::Impedance | PhysicalQuantity::Admittance => {
                -al / (num_x - 1) as f64
            }
            PhysicalQuantity::Pressure | PhysicalQuantity::Velocity => al / (num_x - 1) as f64,
        };
        match quant {
            PhysicalQuantity::Impedance => {
                self.impedance.clear();
                self.impedance.reserve(num_x);
                self.impedance.push(q0);
            }
            PhysicalQuantity::Admittance => {
                self.admittance.clear();
                self.admittance.reserve(num_x);
                self.admittance.push(q0);
            }
            PhysicalQuantity::Pressure => {
                self.pressure.clear();
                self.pressure.reserve(num_x);
                self.pressure.push(q0);
            }
            PhysicalQuantity::Velocity => {
                self.velocity.clear();
                self.velocity.reserve(num_x);
                self.velocity.push(q0);
            }
        }

        // lossy boundary term of the axial coefficient matrix
        let (kr2, c_mat, d_mat, e_mat, eigen_freqs) = match &self.kind {
            SectionKind::Fem(fem) => {
                let basis = fem.basis.as_ref().expect("modes must be computed");
                let wall_adm = wall_admittance(params, freq, fem.perimeter, self.chord_length);
                let bnd_adm =
                    losses::boundary_specific_admittance(params, freq, &basis.eigen_freqs);
                let complexify = |m: &RMatrix| m.map(|v| Complex64::new(v, 0.));
                (
                    basis.kr2_effective(&bnd_adm, wall_adm),
                    complexify(&basis.c),
                    complexify(&basis.d),
                    complexify(&basis.e),
                    basis.eigen_freqs.clone(),
                )
            }
            SectionKind::Radiation(_) => {
                // the radiation section is never traversed by the Magnus
                // integrator, its state is set from the closed form
                return Ok(());
            }
        };

        let identity = CMatrix::identity(mn, mn);
        let build_a = |l: f64, dl: f64| -> CMatrix {
            let mut k2 = CMatrix::zeros(mn, mn);
            for (j, fm) in eigen_freqs.iter().enumerate() {
                k2[(j, j)] = Complex64::new(
                    (2. * std::f64::consts::PI * fm / params.snd_speed).powi(2) - (k * l).powi(2),
                    0.,
                );
            }
            k2 += &kr2 * Complex64::new(0., k * l);

            let mut a = CMatrix::zeros(2 * mn, 2 * mn);
            a.view_mut((0, 0), (mn, mn))
                .copy_from(&(&e_mat * Complex64::new(dl / l, 0.)));
            a.view_mut((0, mn), (mn, mn)).copy_from(
                &((&identity - &c_mat * Complex64::new(curv * l, 0.))
                    * Complex64::new(1. / (l * l), 0.)),
            );
            a.view_mut((mn, 0), (mn, mn)).copy_from(
                &(&k2
                    + (&c_mat * Complex64::new((k * l).powi(2), 0.) - &d_mat)
                        * Complex64::new(curv * l, 0.)),
            );
            a.view_mut((mn, mn), (mn, mn))
                .copy_from(&(e_mat.transpose() * Complex64::new(-dl / l, 0.)));
            a
        };

        let sqrt3 = 3f64.sqrt();
        for i in 0..num_x - 1 {
            let omega = match params.order_magnus_scheme {
                2 => {
                    let tau = if direction < 0. {
                        ((num_x - i) as f64 - 1.5) / (num_x - 1) as f64
                    } else {
                        (i as f64 + 0.5) / (num_x - 1) as f64
                    };
                    let l0 = self.scaling(tau);
                    let dl0 = -f64::from(self.y_dir()) * self.scaling_derivative(tau);
                    expm(&(build_a(l0, dl0) * Complex64::new(dx, 0.)))
                }
                _ => {
                    // order 4: two Gauss nodes and the commutator correction
                    let tau0 = if dx < 0. {
                        ((num_x - i) as f64 - 1.5 + sqrt3 / 6.) / (num_x - 1) as f64
                    } else {
                        (i as f64 + 0.5 - sqrt3 / 6.) / (num_x - 1) as f64
                    };
                    let a0 = build_a(self.scaling(tau0), self.scaling_derivative(tau0));
                    let tau1 = if dx < 0. {
                        ((num_x - i) as f64 - 1.5 - sqrt3 / 6.) / (num_x - 1) as f64
                    } else {
                        (i as f64 + 0.5 + sqrt3 / 6.) / (num_x - 1) as f64
                    };
                    let a1 = build_a(self.scaling(tau1), self.scaling_derivative(tau1));
                    let arg = (&a0 + &a1) * Complex64::new(0.5 * dx, 0.)
                        + (&a1 * &a0 - &a0 * &a1) * Complex64::new(sqrt3 * dx * dx / 12., 0.);
                    expm(&arg)
                }
            };

            let o11 = omega.view((0, 0), (mn, mn)).into_owned();
            let o12 = omega.view((0, mn), (mn, mn)).into_owned();
            let o21 = omega.view((mn, 0), (mn, mn)).into_owned();
            let o22 = omega.view((mn, mn), (mn, mn)).into_owned();

            match quant {
                PhysicalQuantity::Impedance => {
                    let z = self.impedance.last().unwrap();
                    let den = (&o21 * z + &o22).try_inverse().ok_or(
                        PropagationError::SingularMatrix {
                            section,
                            freq,
                            quantity: "impedance",
                        },
                    )?;
                    let next = (&o11 * z + &o12) * den;
                    self.impedance.push(next);
                }
                PhysicalQuantity::Admittance => {
                    let y = self.admittance.last().unwrap();
                    let den = (&o11 + &o12 * y).try_inverse().ok_or(
                        PropagationError::SingularMatrix {
                            section,
                            freq,
                            quantity: "admittance",
                        },
                    )?;
                    let next = (&o21 + &o22 * y) * den;
                    self.admittance.push(next);
                }
                PhysicalQuantity::Pressure => {
                    let y_mid = &self.admittance[num_x - 1 - i];
                    let next = (&o11 + &o12 * y_mid) * self.pressure.last().unwrap();
                    self.pressure.push(next);
                }
                PhysicalQuantity::Velocity => {
                    let z_mid = &self.impedance[num_x - 1 - i];
                    let next = (&o21 * z_mid + &o22) * self.velocity.last().unwrap();
                    self.velocity.push(next);
                }
            }
        }
        Ok(())
    }

    /// Closed form propagation of impedance and admittance through a
    /// straight tube, composing the cascade with the previous and next
    /// areas to select the contraction/expansion branches.
    pub fn propagate_imped_admit_straight(
        &mut self,
        z0: CMatrix,
        y0: CMatrix,
        freq: f64,
        params: &SimulationParameters,
        prev_area: f64,
        next_area: f64,
        section: usize,
    ) -> Result<(), PropagationError> {
        if self.is_radiation() {
            self.impedance.push(z0);
            self.admittance.push(y0);
            return Ok(());
        }

        let mn = self.num_modes();
        let length = self.length();

        if length == 0. {
            self.admittance.push(y0);
            self.impedance.push(z0);
            return Ok(());
        }

        self.admittance.push(y0);
        self.impedance.push(z0);

        let k = params.wavenumber(freq);
        let mut i_d2 = CMatrix::zeros(mn, mn);
        let mut i_d3 = CMatrix::zeros(mn, mn);
        for (i, fm) in self.eigen_freqs().iter().enumerate() {
            let kn = Complex64::new(
                k * k - (2. * std::f64::consts::PI * fm / params.snd_speed).powi(2),
                0.,
            )
            .sqrt();
            i_d2[(i, i)] = 1. / (Complex64::I * (kn * length).sin());
            i_d3[(i, i)] = 1. / (Complex64::I * (kn * length).tan());
        }
        let yc = self.characteristic_admittance(freq, params);
        let zc = yc
            .clone()
            .try_inverse()
            .ok_or(PropagationError::SingularMatrix {
                section,
                freq,
                quantity: "characteristic admittance",
            })?;

        let singular = |quantity: &'static str| PropagationError::SingularMatrix {
            section,
            freq,
            quantity,
        };
        let identity = CMatrix::identity(mn, mn);

        if self.area > prev_area {
            if next_area > self.area {
                // contraction on both ends
                let den = (self.admittance.last().unwrap() + &i_d3 * &yc)
                    .try_inverse()
                    .ok_or_else(|| singular("admittance"))?;
                let y = &i_d3 * &yc - &i_d2 * &yc * den * &i_d2 * &yc;
                let z = y.clone().try_inverse().ok_or_else(|| singular("admittance"))?;
                self.admittance.push(y);
                self.impedance.push(z);
            } else {
                // contraction then expansion
                let y_end = self.admittance.last().unwrap().clone();
                let den = (&identity + &i_d3 * &zc * &y_end)
                    .try_inverse()
                    .ok_or_else(|| singular("impedance"))?;
                let z = &i_d3 * &zc - &i_d2 * &zc * &y_end * den * &i_d2 * &zc;
                let y = z.clone().try_inverse().ok_or_else(|| singular("impedance"))?;
                self.impedance.push(z);
                self.admittance.push(y);
            }
        } else if next_area > self.area {
            // expansion then contraction
            let z_end = self.impedance.last().unwrap().clone();
            let den = (&identity + &i_d3 * &yc * &z_end)
                .try_inverse()
                .ok_or_else(|| singular("admittance"))?;
            let y = &i_d3 * &yc - &i_d2 * &yc * &z_end * den * &i_d2 * &yc;
            let z = y.clone().try_inverse().ok_or_else(|| singular("admittance"))?;
            self.admittance.push(y);
            self.impedance.push(z);
        } else {
            // expansion on both ends
            let den = (self.impedance.last().unwrap() + &i_d3 * &zc)
                .try_inverse()
                .ok_or_else(|| singular("impedance"))?;
            let z = &i_d3 * &zc - &i_d2 * &zc * den * &i_d2 * &zc;
            let y = z.clone().try_inverse().ok_or_else(|| singular("impedance"))?;
            self.impedance.push(z);
            self.admittance.push(y);
        }
        Ok(())
    }

    /// Closed form propagation of pressure and velocity through a straight
    /// tube.
    pub fn propagate_pressure_velocity_straight(
        &mut self,
        v0: CMatrix,
        p0: CMatrix,
        freq: f64,
        params: &SimulationParameters,
        next_area: f64,
        section: usize,
    ) -> Result<(), PropagationError> {
        if self.is_radiation() {
            self.velocity.push(v0);
            self.pressure.push(p0);
            return Ok(());
        }

        let mn = self.num_modes();
        let length = self.length();

        self.velocity.push(v0);
        self.pressure.push(p0);
        if length == 0. {
            return Ok(());
        }

        let k = params.wavenumber(freq);
        let mut d1 = CMatrix::zeros(mn, mn);
        let mut d2 = CMatrix::zeros(mn, mn);
        for (i, fm) in self.eigen_freqs().iter().enumerate() {
            let kn = Complex64::new(
                k * k - (2. * std::f64::consts::PI * fm / params.snd_speed).powi(2),
                0.,
            )
            .sqrt();
            d1[(i, i)] = (kn * length).cos();
            d2[(i, i)] = Complex64::I * (kn * length).sin();
        }
        let yc = self.characteristic_admittance(freq, params);

        let singular = |quantity: &'static str| PropagationError::SingularMatrix {
            section,
            freq,
            quantity,
        };

        if next_area > self.area {
            // expansion: advance the velocity first
            let sys = &d2 * &yc * &self.impedance[0] + &d1;
            let v = sys
                .qr()
                .solve(self.velocity.last().unwrap())
                .ok_or_else(|| singular("velocity"))?;
            let p = &self.impedance[0] * &v;
            self.velocity.push(v);
            self.pressure.push(p);
        } else {
            // contraction: advance the pressure first
            let yc_inv = yc.try_inverse().ok_or_else(|| singular("pressure"))?;
            let sys = &d1 + &d2 * yc_inv * &self.admittance[0];
            let p = sys
                .qr()
                .solve(self.pressure.last().unwrap())
                .ok_or_else(|| singular("pressure"))?;
            let v = &self.admittance[0] * &p;
            self.pressure.push(p);
            self.velocity.push(v);
        }
        Ok(())
    }

    // **********************************************************************
    // mode interpolation

    /// Amplitude of every mode at the given points of the section plane.
    /// Points slightly outside the contour are pulled back on its boundary;
    /// points well outside yield NaN rows.
    pub fn interpolate_modes(&self, pts: &[DVec2]) -> RMatrix {
        match &self.kind {
            SectionKind::Radiation(rad) => match &rad.basis {
                Some(basis) => basis.evaluate(pts),
                None => RMatrix::zeros(pts.len(), 0),
            },
            SectionKind::Fem(fem) => {
                let basis = match &fem.basis {
                    Some(basis) => basis,
                    None => return RMatrix::zeros(pts.len(), 0),
                };
                let adjusted: Vec<DVec2> = pts
                    .iter()
                    .map(|&p| {
                        if fem.contour.contains(p) {
                            p
                        } else {
                            fem.contour.pull_inside(p, fem.spacing)
                        }
                    })
                    .collect();
                let mut out = fem.mesh.interpolate(&basis.modes, &adjusted);
                for (i, p) in adjusted.iter().enumerate() {
                    if !fem.contour.contains(*p) && fem.contour.distance(*p) > fem.spacing {
                        for m in 0..out.ncols() {
                            out[(i, m)] = f64::NAN;
                        }
                    }
                }
                out
            }
        }
    }

    pub fn interpolate_modes_scaled(&self, pts: &[DVec2], scaling: f64) -> RMatrix {
        let scaled: Vec<DVec2> = pts.iter().map(|&p| p * scaling).collect();
        self.interpolate_modes(&scaled)
    }

    pub fn interpolate_modes_scaled_shifted(
        &self,
        pts: &[DVec2],
        scaling: f64,
        translation: DVec2,
    ) -> RMatrix {
        let moved: Vec<DVec2> = pts.iter().map(|&p| (p + translation) * scaling).collect();
        self.interpolate_modes(&moved)
    }

    // **********************************************************************
    // acoustic field

    /// Inverse map from a Cartesian point `(x, lateral, vertical)` to the
    /// section local coordinates `(axial, y, z)`, `None` when the point is
    /// outside the section.
    pub fn cartesian_to_local(&self, pt: DVec3, use_bbox: bool) -> Option<DVec3> {
        let length = self.length();
        if length <= 0. {
            return None;
        }
        let ctl = self.ctr_in;
        let sagittal = DVec2::new(pt.x, pt.z);

        let (x, y, z);
        if self.arc_angle.abs() < MIN_DISTANCE {
            let axial = DVec2::from_angle(-std::f64::consts::FRAC_PI_2).rotate(self.normal_in);
            let d = sagittal - ctl;
            x = d.dot(axial);
            let sc = self.scaling(x / length);
            y = pt.y / sc;
            z = d.dot(self.normal_in) / sc;
        } else {
            let radius = self.curv_radius.abs();
            let center = ctl + self.curv_radius * self.normal_in;
            let pt_c = sagittal - center;
            let ctl_c = ctl - center;
            let two_pi = 2. * std::f64::consts::PI;
            let reversed = self.curv_radius.is_sign_negative()
                != (self.curv_radius * self.arc_angle).is_sign_negative();
            x = if reversed {
                radius * ((ctl_c.y.atan2(ctl_c.x) - pt_c.y.atan2(pt_c.x) + two_pi) % two_pi)
            } else {
                radius * ((pt_c.y.atan2(pt_c.x) - ctl_c.y.atan2(ctl_c.x) + two_pi) % two_pi)
            };
            let sc = self.scaling(x / length);
            y = pt.y / sc;
            z = if self.curv_radius < 0. {
                (pt_c.length() - radius) / sc
            } else {
                -(pt_c.length() - radius) / sc
            };
        }

        if !(0. ..=length).contains(&x) {
            return None;
        }
        match &self.kind {
            SectionKind::Fem(fem) => {
                if use_bbox {
                    let (min, max) = fem.contour.bbox();
                    if y < min.x || y > max.x || z < min.y || z > max.y {
                        return None;
                    }
                } else if !fem.contour.contains(DVec2::new(y, z)) {
                    return None;
                }
            }
            SectionKind::Radiation(_) => return None,
        }
        Some(DVec3::new(x, y, z))
    }

    /// Pressure, velocity, impedance or admittance at a point given in the
    /// section local coordinates, combining the interpolated modes with a
    /// linear blend of the stored axial samples.
    pub fn interior_field(
        &self,
        local: DVec3,
        params: &SimulationParameters,
        quant: PhysicalQuantity,
    ) -> Complex64 {
        let al = self.length();
        let num_x = params.num_integration_step;
        let dx = al / (num_x - 1) as f64;

        let x_dx = local.x / dx;
        let mut idx = [
            (x_dx.floor() as usize).min(num_x - 2),
            (x_dx.ceil() as usize).min(num_x - 1),
        ];
        let x0 = idx[0] as f64 * dx;
        let pts = [DVec2::new(local.y, local.z)];

        let reverse = |idx: &mut [usize; 2], n_pt: usize| {
            idx[0] = n_pt - idx[0];
            idx[1] = n_pt - idx[1];
        };

        let blend = |samples: &[CMatrix], idx: [usize; 2]| -> CMatrix {
            (&samples[idx[1]] - &samples[idx[0]]) * Complex64::new((local.x - x0) / dx, 0.)
                + &samples[idx[0]]
        };

        match quant {
            PhysicalQuantity::Pressure => {
                if self.p_dir() == -1 {
                    reverse(&mut idx, self.pressure.len() - 1);
                }
                let q = blend(&self.pressure, idx);
                let modes = self.interpolate_modes(&pts).map(|v| Complex64::new(v, 0.));
                (modes * q)[(0, 0)]
            }
            PhysicalQuantity::Velocity => {
                if self.q_dir() == -1 {
                    reverse(&mut idx, self.velocity.len() - 1);
                }
                let q = blend(&self.velocity, idx);
                let modes = self.interpolate_modes(&pts).map(|v| Complex64::new(v, 0.));
                (modes * q)[(0, 0)]
            }
            PhysicalQuantity::Impedance => {
                if self.z_dir() == -1 {
                    reverse(&mut idx, self.impedance.len() - 1);
                }
                let q = blend(&self.impedance, idx);
                self.project_matrix_quantity(&q, &pts)
            }
            PhysicalQuantity::Admittance => {
                if self.y_dir() == -1 {
                    reverse(&mut idx, self.admittance.len() - 1);
                }
                let q = blend(&self.admittance, idx).transpose();
                self.project_matrix_quantity(&q, &pts)
            }
        }
    }

    /// Scalar value of a matrix quantity at a point: the interpolated mode
    /// row on one side and its pseudo-inverse on the other.
    fn project_matrix_quantity(&self, q: &CMatrix, pts: &[DVec2]) -> Complex64 {
        let modes = self.interpolate_modes(pts);
        let pinv = match modes.clone().svd(true, true).pseudo_inverse(1e-12) {
            Ok(p) => p,
            Err(_) => return Complex64::new(f64::NAN, f64::NAN),
        };
        let modes_c = modes.map(|v| Complex64::new(v, 0.));
        let pinv_c = pinv.map(|v| Complex64::new(v, 0.));
        (modes_c * q * pinv_c)[(0, 0)]
    }

    /// Modal pressure amplitudes radiated at a distance beyond the exit of
    /// the radiation section.
    pub fn radiate_pressure(
        &self,
        distance: f64,
        freq: f64,
        params: &SimulationParameters,
    ) -> Option<CMatrix> {
        match &self.kind {
            SectionKind::Radiation(rad) => {
                let basis = rad.basis.as_ref()?;
                if self.pressure.is_empty() {
                    return None;
                }
                Some(basis.propagate_pressure(&self.pressure[0], distance, freq, params))
            }
            SectionKind::Fem(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::mesher::triangulate_contour;
    use crate::physics::modal::compute_modes;

    fn circle_contour(radius: f64, n: usize) -> Contour {
        let pts = (0..n)
            .map(|i| {
                let t = 2. * std::f64::consts::PI * i as f64 / n as f64;
                DVec2::new(radius * t.cos(), radius * t.sin())
            })
            .collect();
        Contour::with_uniform_tag(pts, 2).unwrap()
    }

    fn fem_section(radius: f64, length: f64, num_modes: usize) -> Section {
        let params = SimulationParameters::default();
        let contour = circle_contour(radius, 32);
        let mut section = Section::new_fem(
            contour,
            DVec2::ZERO,
            DVec2::new(0., 1.),
            length,
            [1., 1.],
            5.,
        );
        let fem = section.fem_mut().unwrap();
        fem.mesh = triangulate_contour(&fem.contour, fem.spacing, 0).unwrap();
        fem.basis = Some(compute_modes(&fem.mesh, &params, num_modes, 0).unwrap());
        section
    }

    #[test]
    fn linear_scaling_profile() {
        let mut section = fem_section(1., 2., 1);
        section.scale = [0.5, 1.5];
        assert!((section.scaling(0.) - 0.5).abs() < 1e-12);
        assert!((section.scaling(1.) - 1.5).abs() < 1e-12);
        assert!((section.scaling_derivative(0.3) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn characteristic_matrices_are_diagonal_and_reciprocal() {
        let section = fem_section(1., 2., 3);
        let params = SimulationParameters::default();
        let freq = 800.;
        let zc = section.characteristic_impedance(freq, &params);
        let yc = section.characteristic_admittance(freq, &params);
        for i in 0..3 {
            for j in 0..3 {
                if i != j {
                    assert_eq!(zc[(i, j)], Complex64::ZERO);
                } else {
                    assert!((zc[(i, i)] * yc[(i, i)] - Complex64::ONE).norm() < 1e-10);
                }
            }
        }
    }

    #[test]
    fn plane_mode_characteristic_impedance_is_propagating() {
        let section = fem_section(1., 2., 1);
        let params = SimulationParameters::default();
        let freq = 500.;
        let k = params.wavenumber(freq);
        let zc = section.characteristic_impedance(freq, &params);
        // for the plane mode, Zc = 1/sqrt(-k^2) = i/k up to sign
        assert!((zc[(0, 0)].norm() - 1. / k).abs() < 1e-9 / k);
        assert!(zc[(0, 0)].re.abs() < 1e-12);
    }

    #[test]
    fn zero_length_propagation_copies_input() {
        let mut section = fem_section(1., 0., 2);
        let params = SimulationParameters::default();
        let y0 = CMatrix::identity(2, 2);
        section
            .propagate_magnus(y0.clone(), &params, 100., -1., PhysicalQuantity::Admittance, 0)
            .unwrap();
        assert_eq!(section.admittance.len(), 1);
        assert_eq!(section.admittance[0], y0);
    }

    #[test]
    fn magnus_propagation_samples_all_nodes() {
        let mut section = fem_section(1., 5., 2);
        let params = SimulationParameters::default();
        let y0 = section.characteristic_admittance(500., &params);
        section
            .propagate_magnus(y0, &params, 500., -1., PhysicalQuantity::Admittance, 0)
            .unwrap();
        assert_eq!(section.admittance.len(), params.num_integration_step);
        for y in &section.admittance {
            assert!(y.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn matched_admittance_is_invariant_in_lossless_straight_tube() {
        // a tube closed on its characteristic admittance keeps it unchanged
        let mut section = fem_section(1., 4., 1);
        let mut params = SimulationParameters::default();
        params.visco_thermal_losses = false;
        params.wall_losses = false;
        params.set_boundary_specific_admittance();
        params.percentage_losses = 0.;
        let freq = 700.;
        let y0 = section.characteristic_admittance(freq, &params);
        section
            .propagate_magnus(y0.clone(), &params, freq, -1., PhysicalQuantity::Admittance, 0)
            .unwrap();
        let y_end = section.admittance.last().unwrap();
        assert!((y_end - &y0).norm() < 1e-8 * y0.norm());
    }

    #[test]
    fn straight_section_local_coordinates() {
        let section = fem_section(1., 3., 1);
        // the section runs from (0,0) along +x with upward normal
        let local = section
            .cartesian_to_local(DVec3::new(1.5, 0.2, 0.3), false)
            .unwrap();
        assert!((local.x - 1.5).abs() < 1e-12);
        assert!((local.y - 0.2).abs() < 1e-12);
        assert!((local.z - 0.3).abs() < 1e-12);
        assert!(section
            .cartesian_to_local(DVec3::new(4., 0., 0.), false)
            .is_none());
        assert!(section
            .cartesian_to_local(DVec3::new(1.5, 0., 2.), false)
            .is_none());
    }

    #[test]
    fn directions_default_to_backward_z_forward_p() {
        let section = fem_section(1., 1., 1);
        assert_eq!(section.z_dir(), -1);
        assert_eq!(section.y_dir(), -1);
        assert_eq!(section.q_dir(), 1);
        assert_eq!(section.p_dir(), 1);
    }
}
