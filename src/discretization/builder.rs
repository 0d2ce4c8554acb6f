use geo::{BooleanOps, Intersects};
use glam::DVec2;

use crate::error::{GeometryError, SimulationError};
use crate::geometry::centerline::{curvature_angle_shift, exit_point, ArcParameters};
use crate::geometry::{Contour, Slice};
use crate::params::{
    ContourInterpolation, SimulationParameters, MINIMAL_AREA, MIN_DISTANCE,
    MIN_DISTANCE_SIMILAR_POLYGONS,
};
use crate::section::Section;

fn rotate(v: DVec2, angle: f64) -> DVec2 {
    DVec2::from_angle(angle).rotate(v)
}

/// Scaling factor between two slices: ratio of square root areas, or the
/// most restrictive axis ratio of the bounding boxes, always backed off to
/// 99.9 % to avoid edge contact.
#[allow(clippy::too_many_arguments)]
fn scaling_factor(
    params: &SimulationParameters,
    tot_areas: &[f64],
    bboxes: &[[f64; 4]],
    centerline: &[DVec2],
    normals: &[DVec2],
    idx1: usize,
    idx2: usize,
    prev_arc: &ArcParameters,
    length: f64,
) -> f64 {
    let scaling_area =
        (tot_areas[idx2].max(MINIMAL_AREA) / tot_areas[idx1].max(MINIMAL_AREA)).sqrt();

    if tot_areas[idx1] < MINIMAL_AREA
        || tot_areas[idx2] < MINIMAL_AREA
        || params.cont_interp_meth == ContourInterpolation::Area
    {
        0.999 * scaling_area
    } else {
        let pt_out = exit_point(
            centerline[idx1],
            normals[idx1],
            prev_arc.angle,
            prev_arc.radius,
            length,
        );
        let shift = -(centerline[idx2] - pt_out).dot(normals[idx2]);

        let (bb1, bb2) = (bboxes[idx1], bboxes[idx2]);
        let mean_x = bb1[0].abs() + bb1[1].abs() + bb2[0].abs() + bb2[1].abs();
        let mean_y = bb1[2].abs() + bb1[3].abs() + bb2[2].abs() + (bb2[3] + 2. * shift).abs();

        let scaling = if mean_x > mean_y {
            (bb2[0] / bb1[0]).min(bb2[1] / bb1[1])
        } else {
            ((bb2[2] + shift) / bb1[2]).min((bb2[3] + shift) / bb1[3])
        };
        0.999 * scaling_area.min(scaling)
    }
}

/// Build the ordered section graph from the slice sequence: one FEM
/// section per slice, zero length junction sections wherever two
/// successive contours do not strictly contain one another, and a
/// radiation section closing the outlet.
pub fn build_sections(
    slices: Vec<Slice>,
    params: &SimulationParameters,
) -> Result<Vec<Section>, SimulationError> {
    let nb_cont = slices.len();
    if nb_cont < 2 {
        return Err(GeometryError::InsufficientGeometry(nb_cont).into());
    }

    let mut contours: Vec<Contour> = Vec::with_capacity(nb_cont);
    let mut centerline: Vec<DVec2> = Vec::with_capacity(nb_cont + 1);
    let mut normals: Vec<DVec2> = Vec::with_capacity(nb_cont + 1);
    let mut file_scalings: Vec<[f64; 2]> = Vec::with_capacity(nb_cont);
    for slice in slices {
        contours.push(slice.contour);
        centerline.push(slice.sample.point);
        normals.push(slice.sample.normal);
        file_scalings.push([slice.sample.scale_in, slice.sample.scale_out]);
    }

    // per slice totals, recentering the contours vertically for curved
    // geometries so that the centerline crosses them in their middle
    let mut tot_areas = Vec::with_capacity(nb_cont);
    let mut bboxes: Vec<[f64; 4]> = Vec::with_capacity(nb_cont);
    for i in 0..nb_cont {
        tot_areas.push(contours[i].area());
        let (min, max) = contours[i].bbox();
        let mut bbox = [min.x, max.x, min.y, max.y];

        if params.curved {
            let shift_y = -(bbox[2] + bbox[3]) / 2.;
            contours[i] = contours[i].translated(DVec2::new(0., shift_y));
            centerline[i] -= shift_y * normals[i];
            bbox[2] += shift_y;
            bbox[3] += shift_y;
        }
        bboxes.push(bbox);
    }

    // for straight geometries flatten the centerline onto the x axis with
    // uniform upward normals, preserving the segment lengths
    if !params.curved {
        let mut lengths = Vec::with_capacity(nb_cont - 1);
        for i in 1..nb_cont {
            lengths.push((centerline[i] - centerline[i - 1]).length());
        }
        centerline[0] = DVec2::ZERO;
        normals[0] = DVec2::new(0., 1.);
        let mut run = 0.;
        for i in 1..nb_cont {
            run += lengths[i - 1];
            centerline[i] = DVec2::new(run, 0.);
            normals[i] = DVec2::new(0., 1.);
        }
    }

    // insert a synthetic penultimate centerline sample midway along the
    // curvature implied by the two last ones
    centerline.push(*centerline.last().unwrap());
    normals.push(*normals.last().unwrap());
    let last_ctl = centerline.len() - 1;
    {
        let arc = curvature_angle_shift(
            centerline[last_ctl - 2],
            centerline[last_ctl],
            normals[last_ctl - 2],
            normals[last_ctl],
        );
        let mut pt = centerline[last_ctl];
        let nvec = normals[last_ctl];
        if arc.angle.abs() > MIN_DISTANCE {
            let angle = arc.angle / 4.;
            let sign_r = if arc.radius < 0. { -1. } else { 1. };
            let shift = -2. * arc.radius.abs() * (sign_r * angle.abs()).sin();
            if arc.radius.is_sign_negative() != (arc.radius * angle).is_sign_negative() {
                pt += shift
                    * rotate(
                        nvec,
                        std::f64::consts::FRAC_PI_2 - sign_r * angle.abs(),
                    );
            } else {
                pt += shift
                    * rotate(
                        nvec,
                        sign_r * angle.abs() - std::f64::consts::FRAC_PI_2,
                    );
            }
            centerline[last_ctl - 1] = pt;
            normals[last_ctl - 1] = rotate(nvec, -2. * angle);
        } else {
            centerline[last_ctl - 1] =
                centerline[last_ctl] + (centerline[last_ctl - 2] - centerline[last_ctl]) / 2.;
        }
    }

    // **********************************************************************
    // create the cross-sections

    let mut sections: Vec<Section> = Vec::with_capacity(2 * nb_cont);
    let mut prev_sections: Vec<usize> = Vec::new();
    let mut sec_idx = 0usize;

    let mut prev_arc = curvature_angle_shift(centerline[0], centerline[1], normals[0], normals[1]);
    let mut arc;

    let mut prev_scaling = [1., 1.];
    let mut scaling = [1., 1.];
    if params.varying_area {
        match params.cont_interp_meth {
            ContourInterpolation::Area | ContourInterpolation::BoundingBox => {
                let length = (centerline[1] - centerline[0]).length();
                prev_scaling = [
                    1.,
                    scaling_factor(
                        params, &tot_areas, &bboxes, &centerline, &normals, 0, 1, &prev_arc,
                        length,
                    ),
                ];
            }
            ContourInterpolation::FromFile => {
                prev_scaling = file_scalings[0];
            }
        }
    }

    for i in 1..nb_cont {
        let length = (centerline[i] - centerline[i - 1]).length();

        // scaling factors of the pair starting at slice i
        if params.varying_area {
            match params.cont_interp_meth {
                ContourInterpolation::Area | ContourInterpolation::BoundingBox => {
                    if i < nb_cont - 1 {
                        scaling = [
                            1.,
                            scaling_factor(
                                params, &tot_areas, &bboxes, &centerline, &normals, i, i + 1,
                                &prev_arc, length,
                            ),
                        ];
                    } else {
                        scaling = [
                            scaling_factor(
                                params, &tot_areas, &bboxes, &centerline, &normals, i - 1, i,
                                &prev_arc, length,
                            ),
                            1.,
                        ];
                    }
                }
                ContourInterpolation::FromFile => {
                    scaling = file_scalings[i];
                }
            }
        }

        // create the section of slice i - 1
        let mut section = Section::new_fem(
            contours[i - 1].clone(),
            centerline[i - 1],
            normals[i - 1],
            length,
            prev_scaling,
            params.mesh_density,
        );
        section.prev = prev_sections.clone();
        section.curv_radius = prev_arc.radius;
        section.arc_angle = prev_arc.angle;
        sections.push(section);
        let created = sec_idx;
        sec_idx += 1;

        arc = curvature_angle_shift(
            centerline[i],
            centerline[i + 1],
            normals[i],
            normals[i + 1],
        );

        // nearly closed slices duplicate the previous contour scaled by the
        // previous exit scaling, with the centerline point pulled back onto
        // the exit of the previous section
        if tot_areas[i] <= MINIMAL_AREA {
            scaling = [1., 1.];
            let pt_out = exit_point(
                centerline[i - 1],
                normals[i - 1],
                prev_arc.angle,
                prev_arc.radius,
                length,
            );
            centerline[i] = pt_out;
            contours[i] = contours[i - 1].scaled(prev_scaling[1]);
            let (min, max) = contours[i].bbox();
            bboxes[i] = [min.x, max.x, min.y, max.y];
        }

        // **********************************************************
        // insert intermediate zero length sections where the scaled
        // contours do not strictly contain one another

        let mut tmp_prev: Vec<usize> = Vec::new();
        let mut int_contours: Vec<Contour> = Vec::new();
        let mut prev_sec_int: Vec<usize> = Vec::new();

        let cont = contours[i].scaled(scaling[0]);
        let ctl_shift = sections[created].ctr_out() - centerline[i];
        let shift_vec = DVec2::new(0., ctl_shift.dot(sections[created].normal_out()));
        let prev_cont = contours[i - 1].scaled(prev_scaling[1]).translated(shift_vec);

        if cont.similar(&prev_cont, MIN_DISTANCE_SIMILAR_POLYGONS) {
            tmp_prev.push(created);
        } else {
            let mut side_prev = cont.contains(prev_cont.points()[0]);
            let mut crossed = false;
            for &p in prev_cont.points() {
                let side = cont.contains(p);
                if side != side_prev {
                    let inter = prev_cont.to_geo().intersection(&cont.to_geo());
                    for poly in inter.iter() {
                        if let Ok(component) = Contour::from_geo(poly, 0) {
                            prev_sec_int.push(created);
                            tmp_prev.push(sec_idx + int_contours.len());
                            int_contours.push(component);
                        }
                    }
                    crossed = true;
                    break;
                }
                side_prev = side;
            }
            if !crossed && contours[i].to_geo().intersects(&contours[i - 1].to_geo()) {
                tmp_prev.push(created);
            }
        }

        // connect the sections of the previous slice to the next slice
        let next_sec_idx = sec_idx + int_contours.len();
        for &p in &tmp_prev {
            if p < sec_idx {
                sections[p].next.push(next_sec_idx);
            }
        }

        // create the junction sections
        for (c, component) in int_contours.into_iter().enumerate() {
            let mut junction = Section::new_fem(
                component,
                centerline[i],
                normals[i],
                0.,
                [1., 1.],
                params.mesh_density,
            );
            if let Some(fem) = junction.fem_mut() {
                fem.junction = true;
            }
            junction.prev = vec![prev_sec_int[c]];
            junction.next = vec![next_sec_idx];
            sections[prev_sec_int[c]].next.push(sec_idx);
            sections.push(junction);
            sec_idx += 1;
        }

        prev_sections = tmp_prev;
        prev_scaling = scaling;
        prev_arc = arc;
    }

    // ********************************
    // create the last cross-section

    let length = (centerline[last_ctl] - centerline[last_ctl - 1]).length();
    let mut section = Section::new_fem(
        contours[nb_cont - 1].clone(),
        centerline[last_ctl - 1],
        normals[last_ctl - 1],
        length,
        prev_scaling,
        params.mesh_density,
    );
    section.prev = prev_sections;
    section.curv_radius = prev_arc.radius;
    section.arc_angle = prev_arc.angle;
    sections.push(section);
    let last_fem = sec_idx;

    // **********************************************************
    // radiation cross-section closing the outlet

    let pml_thickness = contours[nb_cont - 1].max_extent();
    let radius = 2.1 * pml_thickness;
    let mut radiation = Section::new_radiation(
        centerline[last_ctl],
        normals[last_ctl],
        radius,
        pml_thickness,
    );
    radiation.prev = vec![last_fem];
    sections[last_fem].next.push(last_fem + 1);
    sections.push(radiation);

    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Slice;
    use crate::params::CenterlineSample;

    fn circle(radius: f64, n: usize) -> Contour {
        let pts = (0..n)
            .map(|i| {
                let t = 2. * std::f64::consts::PI * i as f64 / n as f64;
                DVec2::new(radius * t.cos(), radius * t.sin())
            })
            .collect();
        Contour::with_uniform_tag(pts, 2).unwrap()
    }

    fn straight_slices(radii: &[f64], spacing: f64) -> Vec<Slice> {
        radii
            .iter()
            .enumerate()
            .map(|(i, &r)| Slice {
                contour: circle(r, 24),
                sample: CenterlineSample::new(
                    DVec2::new(i as f64 * spacing, 0.),
                    DVec2::new(0., 1.),
                ),
            })
            .collect()
    }

    fn straight_params() -> SimulationParameters {
        let mut params = SimulationParameters::default();
        params.curved = false;
        params
    }

    #[test]
    fn two_slices_give_two_fem_sections_and_radiation() {
        let params = straight_params();
        let sections = build_sections(straight_slices(&[1., 1.], 5.), &params).unwrap();
        assert_eq!(sections.len(), 3);
        assert!(sections[2].is_radiation());
        assert_eq!(sections[0].next, vec![1]);
        assert_eq!(sections[1].prev, vec![0]);
        assert_eq!(sections[1].next, vec![2]);
        assert_eq!(sections[2].prev, vec![1]);
        assert!(sections[2].next.is_empty());
    }

    #[test]
    fn too_few_slices_fail() {
        let params = straight_params();
        let res = build_sections(straight_slices(&[1.], 5.), &params);
        assert!(matches!(
            res,
            Err(SimulationError::Geometry(
                GeometryError::InsufficientGeometry(1)
            ))
        ));
    }

    #[test]
    fn nested_contours_do_not_create_junctions() {
        let params = straight_params();
        let sections = build_sections(straight_slices(&[1., 2., 1.], 4.), &params).unwrap();
        // 3 fem sections + radiation, no zero length junction
        assert_eq!(sections.len(), 4);
        assert!(sections.iter().all(|s| !s.is_junction()));
    }

    #[test]
    fn straddling_contours_insert_a_junction() {
        let params = straight_params();
        // two overlapping but not nested squares
        let mut slices = straight_slices(&[1., 1.], 4.);
        let square = |cx: f64| {
            Contour::with_uniform_tag(
                vec![
                    DVec2::new(cx - 1., -1.),
                    DVec2::new(cx + 1., -1.),
                    DVec2::new(cx + 1., 1.),
                    DVec2::new(cx - 1., 1.),
                ],
                0,
            )
            .unwrap()
        };
        slices[0].contour = square(0.);
        slices[1].contour = square(0.8);
        let sections = build_sections(slices, &params).unwrap();
        let junctions: Vec<&Section> = sections.iter().filter(|s| s.is_junction()).collect();
        assert_eq!(junctions.len(), 1);
        assert_eq!(junctions[0].length(), 0.);
        // junction wired between the two fem sections
        assert_eq!(junctions[0].prev, vec![0]);
        assert_eq!(sections[0].next, vec![1]);
        let j_next = junctions[0].next[0];
        assert!(!sections[j_next].is_junction());
        assert_eq!(sections[j_next].prev, vec![1]);
    }

    #[test]
    fn lengths_are_preserved_when_flattened() {
        let params = straight_params();
        let sections = build_sections(straight_slices(&[1., 1., 1.], 3.), &params).unwrap();
        // the last physical segment is split in half by the synthetic
        // penultimate centerline sample
        assert!((sections[0].length() - 3.).abs() < 1e-12);
        assert!((sections[1].length() - 1.5).abs() < 1e-12);
        assert!((sections[2].length() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn area_scaling_policy_uses_sqrt_area_ratio() {
        let params = straight_params();
        let sections = build_sections(straight_slices(&[1., 2.], 4.), &params).unwrap();
        let expected = 0.999 * (sections[1].area / sections[0].area).sqrt();
        assert!((sections[0].scale_out() - expected).abs() < 1e-6);
        assert!((sections[0].scale_in() - 1.).abs() < 1e-12);
    }

    #[test]
    fn radiation_radius_covers_last_contour() {
        let params = straight_params();
        let sections = build_sections(straight_slices(&[1., 1.5], 4.), &params).unwrap();
        let rad = sections.last().unwrap();
        match &rad.kind {
            crate::section::SectionKind::Radiation(r) => {
                assert!((r.radius - 2.1 * 1.5).abs() < 1e-9);
                assert!((r.pml_thickness - 1.5).abs() < 1e-9);
            }
            _ => panic!("last section must be the radiation one"),
        }
    }

    #[test]
    fn junction_neighbors_are_not_junctions() {
        let params = straight_params();
        let mut slices = straight_slices(&[1., 1., 1.], 4.);
        let square = |cx: f64| {
            Contour::with_uniform_tag(
                vec![
                    DVec2::new(cx - 1., -1.),
                    DVec2::new(cx + 1., -1.),
                    DVec2::new(cx + 1., 1.),
                    DVec2::new(cx - 1., 1.),
                ],
                0,
            )
            .unwrap()
        };
        slices[0].contour = square(0.);
        slices[1].contour = square(0.7);
        slices[2].contour = square(1.4);
        let sections = build_sections(slices, &params).unwrap();
        for s in sections.iter().filter(|s| s.is_junction()) {
            for &p in &s.prev {
                assert!(!sections[p].is_junction());
            }
            for &n in &s.next {
                assert!(!sections[n].is_junction());
            }
        }
    }
}
