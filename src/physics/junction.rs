use geo::BooleanOps;
use glam::DVec2;

use crate::discretization::mesher::refine_contour;
use crate::error::{JunctionError, SimulationError};
use crate::geometry::Contour;
use crate::numerics::quadrature::TRI_GAUSS_WEIGHT;
use crate::numerics::RMatrix;
use crate::params::{SimulationParameters, MIN_DISTANCE_SIMILAR_POLYGONS};
use crate::section::Section;

/// Compute the mode matching matrices between a section and every section
/// it connects to, by Galerkin integration of the mode products over the
/// meshed intersection of the two scaled contours.
///
/// Contours which are pointwise identical short-circuit to an identity
/// matching, even when the scalings on the two sides differ; this
/// approximation reproduces the reference transfer functions.
pub fn compute_junction_matrices(
    sections: &mut [Section],
    idx: usize,
    _params: &SimulationParameters,
) -> Result<(), SimulationError> {
    if sections[idx].next.is_empty() {
        return Ok(());
    }

    let num_modes = sections[idx].num_modes();
    let scale_out = sections[idx].scale_out();

    // the centerline at the end of the segment can differ from the one at
    // the beginning of the next segment; only the normal component of the
    // mismatch is kept
    let first_next = sections[idx].next[0];
    let ctl_shift = DVec2::new(
        0.,
        (sections[idx].ctr_out() - sections[first_next].ctr_in).dot(sections[idx].normal_out()),
    );

    let no_intersection = |b: usize| {
        SimulationError::Junction(JunctionError::NoIntersection { a: idx, b })
    };

    let contour: Option<Contour> = sections[idx]
        .fem()
        .map(|fem| fem.contour.scaled(scale_out).translated(ctl_shift));

    let mut matrix_f = Vec::with_capacity(sections[idx].next.len());

    for ns in 0..sections[idx].next.len() {
        let next_idx = sections[idx].next[ns];
        let num_modes_next = sections[next_idx].num_modes();
        let scale_in = sections[next_idx].scale_in();

        let mut f = RMatrix::zeros(num_modes, num_modes_next);

        // choose the integration support
        let components: Vec<Contour> = if sections[next_idx].is_radiation()
            || sections[idx].is_junction()
        {
            vec![contour.clone().ok_or_else(|| no_intersection(next_idx))?]
        } else {
            let next_contour = sections[next_idx]
                .fem()
                .map(|fem| fem.contour.scaled(scale_in))
                .ok_or_else(|| no_intersection(next_idx))?;
            if sections[next_idx].is_junction() {
                vec![next_contour]
            } else {
                let contour = contour.as_ref().ok_or_else(|| no_intersection(next_idx))?;
                if contour.similar(&next_contour, MIN_DISTANCE_SIMILAR_POLYGONS) {
                    // identity junction
                    for m in 0..num_modes.min(num_modes_next) {
                        f[(m, m)] = 1.;
                    }
                    matrix_f.push(f);
                    continue;
                }
                let inter = contour.to_geo().intersection(&next_contour.to_geo());
                let mut components = Vec::new();
                for poly in inter.iter() {
                    if let Ok(c) = Contour::from_geo(poly, 0) {
                        components.push(c);
                    }
                }
                if components.is_empty() {
                    return Err(no_intersection(next_idx));
                }
                components
            }
        };

        let spacing = (scale_out * sections[idx].spacing()).min(sections[next_idx].spacing());

        for component in &components {
            // mesh the intersection surface and generate the Gauss points
            let cdt = refine_contour(component, spacing, idx)?;
            let (pts, area_faces) = cdt.gauss_points();

            // interpolate the modes of both sides at the Gauss points
            let interp_prev =
                sections[idx].interpolate_modes_scaled_shifted(&pts, 1. / scale_out, -ctl_shift);
            let interp_next = sections[next_idx].interpolate_modes_scaled(&pts, 1. / scale_in);

            // Galerkin integration of the mode products
            for (face, &area) in area_faces.iter().enumerate() {
                if area == 0. {
                    continue;
                }
                for m in 0..num_modes {
                    for n in 0..num_modes_next {
                        for g in 0..3 {
                            f[(m, n)] += area
                                * interp_prev[(face * 3 + g, m)]
                                * interp_next[(face * 3 + g, n)]
                                * TRI_GAUSS_WEIGHT
                                / scale_out
                                / scale_in;
                        }
                    }
                }
            }
        }
        matrix_f.push(f);
    }

    sections[idx].matrix_f = matrix_f;
    Ok(())
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

    fn meshed_section(radius: f64, num_modes: usize) -> Section {
        let params = SimulationParameters::default();
        let contour = circle_contour(radius, 32);
        let mut section =
            Section::new_fem(contour, DVec2::ZERO, DVec2::new(0., 1.), 2., [1., 1.], 6.);
        let fem = section.fem_mut().unwrap();
        fem.mesh = triangulate_contour(&fem.contour, fem.spacing, 0).unwrap();
        fem.basis = Some(compute_modes(&fem.mesh, &params, num_modes, 0).unwrap());
        section
    }

    #[test]
    fn identical_contours_give_identity() {
        let params = SimulationParameters::default();
        let mut sections = vec![meshed_section(1., 3), meshed_section(1., 3)];
        sections[0].next = vec![1];
        sections[1].ctr_in = DVec2::new(2., 0.);
        sections[1].prev = vec![0];
        compute_junction_matrices(&mut sections, 0, &params).unwrap();
        let f = &sections[0].matrix_f[0];
        for m in 0..3 {
            for n in 0..3 {
                let expected = if m == n { 1. } else { 0. };
                assert!(
                    (f[(m, n)] - expected).abs() < 1e-6,
                    "F({m},{n}) = {}",
                    f[(m, n)]
                );
            }
        }
    }

    #[test]
    fn area_step_plane_mode_entry() {
        // the plane mode overlap of nested uniform sections is
        // sqrt(A_small / A_large)
        let params = SimulationParameters::default();
        let mut sections = vec![meshed_section(1., 2), meshed_section(2., 2)];
        sections[0].next = vec![1];
        sections[1].ctr_in = DVec2::new(2., 0.);
        sections[1].prev = vec![0];
        compute_junction_matrices(&mut sections, 0, &params).unwrap();
        let f = &sections[0].matrix_f[0];
        let expected = (sections[0].area / sections[1].area).sqrt();
        assert!(
            (f[(0, 0)] - expected).abs() < 1e-6,
            "F(0,0) = {} expected {expected}",
            f[(0, 0)]
        );
    }

    #[test]
    fn matrix_has_mode_counts_shape() {
        let params = SimulationParameters::default();
        let mut sections = vec![meshed_section(1., 2), meshed_section(1.5, 4)];
        sections[0].next = vec![1];
        sections[1].prev = vec![0];
        compute_junction_matrices(&mut sections, 0, &params).unwrap();
        let f = &sections[0].matrix_f[0];
        assert_eq!(f.nrows(), 2);
        assert_eq!(f.ncols(), 4);
    }
}
