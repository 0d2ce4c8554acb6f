use crate::discretization::TriMesh;
use crate::error::ModalError;
use crate::geometry::SurfaceTag;
use crate::numerics::linalg::generalized_symmetric_eigen;
use crate::numerics::quadrature::{TRI_GAUSS_COORDS, TRI_GAUSS_WEIGHT};
use crate::numerics::RMatrix;
use crate::params::SimulationParameters;

/// Transverse modal basis of a cross-section together with the projected
/// multimodal matrices.
#[derive(Debug, Clone)]
pub struct ModalBasis {
    /// Cut-on frequencies, ascending, the first one is exactly 0.
    pub eigen_freqs: Vec<f64>,
    /// Nodal values of the modes, one column per mode.
    pub modes: RMatrix,
    pub max_amplitude: Vec<f64>,
    pub min_amplitude: Vec<f64>,
    /// Projected matrices in the modal basis.
    pub c: RMatrix,
    pub d: RMatrix,
    pub e: RMatrix,
    /// Distinct surface classes found on the boundary, in order of first
    /// appearance, with the matching boundary matrices.
    pub surf_tags: Vec<SurfaceTag>,
    pub kr2: Vec<RMatrix>,
    pub dr: Vec<RMatrix>,
}

impl ModalBasis {
    pub fn num_modes(&self) -> usize {
        self.eigen_freqs.len()
    }

    /// Sum of the boundary matrices weighted by a per-mode specific
    /// admittance plus a lumped wall admittance, used as the lossy part of
    /// the axial coefficient matrix.
    pub fn kr2_effective(
        &self,
        bnd_spec_adm: &crate::numerics::CVector,
        wall_admittance: num_complex::Complex64,
    ) -> crate::numerics::CMatrix {
        let mn = self.num_modes();
        let mut kr2_eff = crate::numerics::CMatrix::zeros(mn, mn);
        let diag = crate::numerics::CMatrix::from_diagonal(bnd_spec_adm);
        for kr2 in &self.kr2 {
            let kr2_c = kr2.map(|v| num_complex::Complex64::new(v, 0.));
            kr2_eff += &kr2_c * &diag + &kr2_c * wall_admittance;
        }
        kr2_eff
    }
}

/// Assemble the P1 finite element matrices on the mesh, solve the
/// generalized eigenproblem `K phi = lambda M phi` and project the
/// multimodal matrices into the selected modal basis.
///
/// `num_modes == 0` selects every mode whose cut-on frequency is below the
/// configured cap, otherwise exactly `num_modes` modes are kept.
pub fn compute_modes(
    mesh: &TriMesh,
    params: &SimulationParameters,
    num_modes: usize,
    section: usize,
) -> Result<ModalBasis, ModalError> {
    let num_vert = mesh.num_vertices();

    let mut mass = RMatrix::zeros(num_vert, num_vert);
    let mut mass_y = RMatrix::zeros(num_vert, num_vert);
    let mut stiffness = RMatrix::zeros(num_vert, num_vert);
    let mut stiffness_y = RMatrix::zeros(num_vert, num_vert);
    let mut b = RMatrix::zeros(num_vert, num_vert);

    // reference P1 shape functions at the quadrature points
    let mut s = [[0.; 3]; 3];
    for (q, coord) in TRI_GAUSS_COORDS.iter().enumerate() {
        s[q][0] = 1. - coord[0] - coord[1];
        s[q][1] = coord[0];
        s[q][2] = coord[1];
    }
    let ds_dr = [-1., 1., 0.];
    let ds_ds = [-1., 0., 1.];

    for tri in &mesh.triangles {
        let p: [glam::DVec2; 3] = [
            mesh.vertices[tri[0]],
            mesh.vertices[tri[1]],
            mesh.vertices[tri[2]],
        ];
        let face_area = 0.5 * ((p[1] - p[0]).perp_dot(p[2] - p[0])).abs();

        // Jacobian of the isoparametric mapping
        let mut j = [[0.; 2]; 2];
        for v in 0..3 {
            j[0][0] += p[v].x * ds_dr[v];
            j[0][1] += p[v].y * ds_dr[v];
            j[1][0] += p[v].x * ds_ds[v];
            j[1][1] += p[v].y * ds_ds[v];
        }
        let det_j = j[0][0] * j[1][1] - j[0][1] * j[1][0];
        let quad_weight_det_j = TRI_GAUSS_WEIGHT * det_j / 2.;

        let mut ds_dx = [0.; 3];
        let mut ds_dy = [0.; 3];
        for v in 0..3 {
            ds_dx[v] = (j[1][1] * ds_dr[v] - j[0][1] * ds_ds[v]) / det_j;
            ds_dy[v] = (j[0][0] * ds_ds[v] - j[1][0] * ds_dr[v]) / det_j;
        }

        // coordinates of the quadrature points
        let mut xq = [0.; 3];
        let mut yq = [0.; 3];
        for q in 0..3 {
            for v in 0..3 {
                xq[q] += p[v].x * s[q][v];
                yq[q] += p[v].y * s[q][v];
            }
        }

        for jj in 0..3 {
            for kk in 0..3 {
                let m = tri[jj];
                let n = tri[kk];

                mass[(m, n)] += (1. + (jj == kk) as usize as f64) * face_area / 12.;

                for q in 0..3 {
                    mass_y[(m, n)] += yq[q] * s[q][jj] * s[q][kk] * quad_weight_det_j;
                    stiffness_y[(m, n)] += yq[q]
                        * (ds_dx[jj] * ds_dx[kk] + ds_dy[jj] * ds_dy[kk])
                        * quad_weight_det_j;
                    b[(m, n)] += (xq[q] * s[q][jj] * ds_dx[kk] + yq[q] * s[q][jj] * ds_dy[kk])
                        * quad_weight_det_j;
                }

                stiffness[(m, n)] += ((p[(jj + 1) % 3].y - p[(jj + 2) % 3].y)
                    * (p[(kk + 1) % 3].y - p[(kk + 2) % 3].y)
                    + (p[(jj + 2) % 3].x - p[(jj + 1) % 3].x)
                        * (p[(kk + 2) % 3].x - p[(kk + 1) % 3].x))
                    / face_area
                    / 4.;
            }
        }
    }

    // boundary mass matrices per surface class
    let mut surf_tags: Vec<SurfaceTag> = Vec::new();
    let mut r: Vec<RMatrix> = Vec::new();
    let mut r_y: Vec<RMatrix> = Vec::new();
    for seg in &mesh.boundary {
        let idx = match surf_tags.iter().position(|&t| t == seg.tag) {
            Some(idx) => idx,
            None => {
                surf_tags.push(seg.tag);
                r.push(RMatrix::zeros(num_vert, num_vert));
                r_y.push(RMatrix::zeros(num_vert, num_vert));
                surf_tags.len() - 1
            }
        };

        let [va, vb] = seg.vertices;
        let seg_length = (mesh.vertices[va] - mesh.vertices[vb]).length();
        let y = [mesh.vertices[va].y, mesh.vertices[vb].y];
        let verts = [va, vb];
        for jj in 0..2 {
            for kk in 0..2 {
                let m = verts[jj];
                let n = verts[kk];
                r[idx][(m, n)] += (1. + (jj == kk) as usize as f64) * seg_length / 6.;
                r_y[idx][(m, n)] += if jj == kk {
                    // L (3 y_j + y_other) / 12
                    seg_length * (3. * y[jj] + y[1 - jj]) / 12.
                } else {
                    seg_length * (y[jj] + y[kk]) / 12.
                };
            }
        }
    }

    // solve the generalized symmetric eigenproblem
    let (eigenvalues, eigenvectors) = generalized_symmetric_eigen(&stiffness, &mass)
        .ok_or(ModalError::MassNotPositiveDefinite { section })?;

    let mode_count = if num_modes == 0 {
        let max_wavenumber =
            (2. * std::f64::consts::PI * params.max_cut_on_freq / params.snd_speed).powi(2);
        let count = eigenvalues.iter().take_while(|&&l| l < max_wavenumber).count();
        if count == 0 {
            return Err(ModalError::NoMode { section });
        }
        count
    } else {
        num_modes.min(num_vert)
    };

    let mut eigen_freqs: Vec<f64> = (0..mode_count)
        .map(|i| eigenvalues[i].max(0.).sqrt() * params.snd_speed / (2. * std::f64::consts::PI))
        .collect();
    // the first mode is uniform, its cut-on frequency cannot be anything
    // but zero
    eigen_freqs[0] = 0.;

    let mut modes = RMatrix::zeros(num_vert, mode_count);
    for m in 0..mode_count {
        modes.set_column(m, &eigenvectors.column(m));
    }

    // set the sign of the modes from the first vertex of the first mode
    let sign_first_mode = if modes[(0, 0)] > 0. { 1. } else { -1. };
    modes *= sign_first_mode;

    let mut max_amplitude = Vec::with_capacity(mode_count);
    let mut min_amplitude = Vec::with_capacity(mode_count);
    for m in 0..mode_count {
        max_amplitude.push(modes.column(m).max());
        min_amplitude.push(modes.column(m).min());
    }

    // project the multimodal matrices into the modal basis
    let project = |mat: &RMatrix| -> RMatrix { modes.transpose() * mat * &modes };
    let c = project(&mass_y);
    let d = project(&stiffness_y);
    let e = project(&b);
    let kr2: Vec<RMatrix> = r.iter().map(&project).collect();
    let dr: Vec<RMatrix> = r_y.iter().map(&project).collect();

    Ok(ModalBasis {
        eigen_freqs,
        modes,
        max_amplitude,
        min_amplitude,
        c,
        d,
        e,
        surf_tags,
        kr2,
        dr,
    })
}

/// Keep only the modes listed in `modes_idx`, restricting the projected
/// matrices accordingly.
pub fn select_modes(basis: &mut ModalBasis, modes_idx: &[usize]) {
    let num_vert = basis.modes.nrows();
    let mode_count = modes_idx.len();

    let mut modes = RMatrix::zeros(num_vert, mode_count);
    let mut eigen_freqs = Vec::with_capacity(mode_count);
    for (dst, &src) in modes_idx.iter().enumerate() {
        modes.set_column(dst, &basis.modes.column(src));
        eigen_freqs.push(basis.eigen_freqs[src]);
    }

    let restrict = |mat: &RMatrix| -> RMatrix {
        let mut out = RMatrix::zeros(mode_count, mode_count);
        for (mi, &si) in modes_idx.iter().enumerate() {
            for (mj, &sj) in modes_idx.iter().enumerate() {
                out[(mi, mj)] = mat[(si, sj)];
            }
        }
        out
    };

    basis.c = restrict(&basis.c);
    basis.d = restrict(&basis.d);
    basis.e = restrict(&basis.e);
    basis.kr2 = basis.kr2.iter().map(&restrict).collect();
    basis.dr = basis.dr.iter().map(&restrict).collect();
    basis.max_amplitude = modes_idx.iter().map(|&i| basis.max_amplitude[i]).collect();
    basis.min_amplitude = modes_idx.iter().map(|&i| basis.min_amplitude[i]).collect();
    basis.eigen_freqs = eigen_freqs;
    basis.modes = modes;
}

/// Assemble only the mass matrix, used by tests to check the
/// M-orthonormality of the modes.
pub fn assemble_mass(mesh: &TriMesh) -> RMatrix {
    let num_vert = mesh.num_vertices();
    let mut mass = RMatrix::zeros(num_vert, num_vert);
    for (t, tri) in mesh.triangles.iter().enumerate() {
        let face_area = mesh.triangle_area(t);
        for jj in 0..3 {
            for kk in 0..3 {
                mass[(tri[jj], tri[kk])] += (1. + (jj == kk) as usize as f64) * face_area / 12.;
            }
        }
    }
    mass
}
