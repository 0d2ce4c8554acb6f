use std::path::Path;

use glam::DVec2;

use crate::error::GeometryError;
use crate::geometry::{surface, Contour, Slice, SurfaceTag};
use crate::params::CenterlineSample;

/// Sampling layout of the profile based intake.
#[derive(Debug, Clone, Copy)]
pub struct ProfileLayout {
    /// Horizontal distance between two profile samples.
    pub sample_length: f64,
    /// Sentinel marking a sample as not part of any contour.
    pub invalid: f64,
}

impl ProfileLayout {
    fn x(&self, idx: usize, num_samples: usize) -> f64 {
        idx as f64 * self.sample_length - (num_samples as f64 - 1.) * self.sample_length / 2.
    }
}

/// Minimum gap enforced between coincident upper and lower samples inside a
/// contour by [`create_unique_contour`].
const MINIMAL_PROFILE_GAP: f64 = 0.05;

/// Walk one closed ring over the sample window `[start, end]`: upper profile
/// left to right, then lower profile right to left. Intermediate vertices
/// are inserted whenever two consecutive samples are further apart than
/// twice the sample length. Surface labeling follows the surface of the
/// entered sample, except that teeth surfaces toggle a side flag instead.
fn build_ring(
    layout: ProfileLayout,
    up: &[f64],
    lo: &[f64],
    up_surf: &[SurfaceTag],
    lo_surf: &[SurfaceTag],
    start: usize,
    end: usize,
) -> (Vec<DVec2>, Vec<SurfaceTag>) {
    let n = up.len();
    let dx = layout.sample_length;
    let mut pts: Vec<DVec2> = Vec::with_capacity(3 * (end - start + 1));
    let mut tags: Vec<SurfaceTag> = Vec::with_capacity(3 * (end - start + 1));

    let mut to_new_surf = false;
    let mut to_new_surf_teeth = true;

    // number of subdivisions needed between two consecutive vertices
    let n_interm = |d: f64| (d / dx / 2.).floor() as usize + 1;

    let update_flags = |from: SurfaceTag, to: SurfaceTag,
                            to_new_surf: &mut bool,
                            to_new_surf_teeth: &mut bool| {
        if from != to {
            *to_new_surf = !*to_new_surf;
            if surface::is_tooth(from) {
                *to_new_surf = *to_new_surf_teeth;
            } else if surface::is_tooth(to) {
                *to_new_surf_teeth = !*to_new_surf_teeth;
                *to_new_surf = *to_new_surf_teeth;
            }
        }
    };

    // upper rim, left to right
    for p in start..=end {
        pts.push(DVec2::new(layout.x(p, n), up[p]));
        tags.push(up_surf[p]);

        if p + 1 < n && p < end && up[p + 1] != layout.invalid {
            let dist = ((up[p] - up[p + 1]).powi(2) + dx * dx).sqrt();
            let next_tag = up_surf[(p + 1).min(n - 1)];
            update_flags(up_surf[p], next_tag, &mut to_new_surf, &mut to_new_surf_teeth);

            let count = n_interm(dist);
            if count > 1 {
                let next_pt = DVec2::new(layout.x(p + 1, n), up[p + 1]);
                for k in 1..count {
                    let alpha = 1. / (count - k + 1) as f64;
                    let insert = alpha * next_pt + (1. - alpha) * *pts.last().unwrap();
                    pts.push(insert);
                    tags.push(if to_new_surf { next_tag } else { *tags.last().unwrap() });
                }
            }
        }
    }

    to_new_surf = true;

    // lower rim, right to left; the first and last samples already belong
    // to the upper rim
    let mut advance = |next_pt: DVec2, next_tag: SurfaceTag,
                       pts: &mut Vec<DVec2>,
                       tags: &mut Vec<SurfaceTag>,
                       push_endpoint: bool| {
        let dist = ((next_pt.y - pts.last().unwrap().y).powi(2) + dx * dx).sqrt();
        update_flags(
            *tags.last().unwrap(),
            next_tag,
            &mut to_new_surf,
            &mut to_new_surf_teeth,
        );
        let count = n_interm(dist);
        if count > 1 {
            for k in 1..count {
                let alpha = 1. / (count - k + 1) as f64;
                let insert = alpha * next_pt + (1. - alpha) * *pts.last().unwrap();
                pts.push(insert);
                tags.push(if to_new_surf { next_tag } else { *tags.last().unwrap() });
            }
        }
        if push_endpoint {
            pts.push(next_pt);
            tags.push(next_tag);
        }
    };

    for p in (start + 1..end).rev() {
        advance(
            DVec2::new(layout.x(p, n), lo[p]),
            lo_surf[p],
            &mut pts,
            &mut tags,
            true,
        );
    }

    // closing interval back to the first vertex, endpoint not duplicated
    advance(
        DVec2::new(layout.x(start, n), lo[start]),
        lo_surf[start],
        &mut pts,
        &mut tags,
        false,
    );

    (pts, tags)
}

/// Scan the profiles for closed rings. A ring ends at sample `i` when the
/// profiles meet there and at the next sample while being open at `i - 1`.
fn collect_rings(
    layout: ProfileLayout,
    up: &mut [f64],
    lo: &mut [f64],
    up_surf: &[SurfaceTag],
    lo_surf: &[SurfaceTag],
) -> Result<Vec<Contour>, GeometryError> {
    let n = up.len();
    let mut contours = Vec::new();
    let mut window_start = 0usize;

    for i in 1..n {
        let next = (i + 1).min(n - 1);
        if up[i - 1] != lo[i - 1] && up[i] == lo[i] && up[next] == lo[next] {
            if let Some(s) = (window_start..=i).find(|&p| up[p] != layout.invalid) {
                let (pts, tags) = build_ring(layout, up, lo, up_surf, lo_surf, s, i);
                contours.push(Contour::new(pts, tags)?);
            }
            window_start = i + 1;
        }
    }

    if contours.is_empty() {
        return Err(GeometryError::EmptyContour);
    }
    Ok(contours)
}

/// Create the closed contours of one profile slice. Several disjoint rings
/// may be produced when the profiles meet in the middle of the slice.
pub fn create_contour(
    layout: ProfileLayout,
    up: &mut [f64],
    lo: &mut [f64],
    up_surf: &[SurfaceTag],
    lo_surf: &[SurfaceTag],
) -> Result<Vec<Contour>, GeometryError> {
    let n = up.len();

    // identify the samples between two contours as invalid samples
    for i in 1..n - 1 {
        if up[i - 1] == lo[i - 1] && up[i + 1] == lo[i + 1] {
            up[i] = layout.invalid;
            lo[i] = layout.invalid;
        }
    }

    collect_rings(layout, up, lo, up_surf, lo_surf)
}

/// Create a single closed contour of one profile slice. Samples outside the
/// outermost open interval are scrubbed to the sentinel and coincident
/// samples inside the interval are split apart by the minimal gap, so that
/// exactly one ring is produced.
pub fn create_unique_contour(
    layout: ProfileLayout,
    up: &mut [f64],
    lo: &mut [f64],
    up_surf: &[SurfaceTag],
    lo_surf: &[SurfaceTag],
) -> Result<Contour, GeometryError> {
    let n = up.len();

    // identify the beginning and the end of the contour
    let mut idx_start = None;
    let mut idx_stop = 0usize;
    for i in 1..n - 1 {
        let invalid_prev = up[i - 1] == lo[i - 1];
        let invalid = up[i] == lo[i];
        if invalid_prev && !invalid && idx_start.is_none() {
            idx_start = Some(i - 1);
        }
        if !invalid_prev && invalid {
            idx_stop = i;
        }
    }
    let idx_start = idx_start.ok_or(GeometryError::EmptyContour)?;

    for i in 0..idx_start {
        up[i] = layout.invalid;
        lo[i] = layout.invalid;
    }
    for i in idx_stop + 1..n - 1 {
        up[i] = layout.invalid;
        lo[i] = layout.invalid;
    }

    // add spacing to identical samples inside the contour
    for i in idx_start + 1..idx_stop {
        if (up[i] - lo[i]).abs() < MINIMAL_PROFILE_GAP {
            up[i] += MINIMAL_PROFILE_GAP / 2.;
            lo[i] -= MINIMAL_PROFILE_GAP / 2.;
        }
    }

    let mut rings = collect_rings(layout, up, lo, up_surf, lo_surf)?;
    Ok(rings.swap_remove(0))
}

/// Parse the CSV geometry interchange format: pairs of `;`-separated rows
/// per slice, `c.x; n.x; scale_in; p1.x; ...` then the matching y row.
pub fn parse_csv(content: &str, simplify: bool) -> Result<Vec<Slice>, GeometryError> {
    let mut slices = Vec::new();
    let mut lines = content.lines();

    let parse_field = |field: Option<&str>, what: &str| -> Result<f64, GeometryError> {
        let field =
            field.ok_or_else(|| GeometryError::ImportFailed(format!("missing {what}")))?;
        field.trim_end_matches('\r').trim().parse::<f64>().map_err(|_| {
            GeometryError::ImportFailed(format!("cannot convert \"{field}\" to a number"))
        })
    };

    while let Some(line_x) = lines.next() {
        let line_y = lines
            .next()
            .ok_or_else(|| GeometryError::ImportFailed("missing y row".into()))?;
        let mut fields_x = line_x.split(';');
        let mut fields_y = line_y.split(';');

        let ctr = DVec2::new(
            parse_field(fields_x.next(), "centerline point")?,
            parse_field(fields_y.next(), "centerline point")?,
        );
        let normal = DVec2::new(
            parse_field(fields_x.next(), "normal")?,
            parse_field(fields_y.next(), "normal")?,
        );
        let scale_in = parse_field(fields_x.next(), "scaling factor")?;
        let scale_out = parse_field(fields_y.next(), "scaling factor")?;

        let mut points = Vec::new();
        while let Some(fx) = fields_x.next() {
            if fx.trim_end_matches('\r').trim().is_empty() {
                break;
            }
            let x = parse_field(Some(fx), "contour point")?;
            let y = parse_field(fields_y.next(), "contour point")?;
            points.push(DVec2::new(x, y));
        }

        if points.len() < 3 {
            return Err(GeometryError::ImportFailed(format!(
                "contour {} has fewer than 3 points",
                slices.len()
            )));
        }

        // drop the last point when it repeats the first one
        if points.len() > 1 && (points[0] - *points.last().unwrap()).length() == 0. {
            points.pop();
        }

        let mut contour = Contour::with_uniform_tag(points, 0)
            .map_err(|e| GeometryError::ImportFailed(e.to_string()))?;
        if simplify && contour.len() > 10 {
            contour.simplify(0.5, f64::INFINITY);
        }

        let mut sample = CenterlineSample::new(ctr, normal);
        sample.scale_in = scale_in;
        sample.scale_out = scale_out;

        slices.push(Slice { contour, sample });
    }

    if slices.len() < 2 {
        return Err(GeometryError::ImportFailed(
            "at least two slices are required".into(),
        ));
    }
    Ok(slices)
}

/// Read and parse a CSV geometry file.
pub fn import_csv(path: impl AsRef<Path>, simplify: bool) -> Result<Vec<Slice>, GeometryError> {
    let content = std::fs::read_to_string(path.as_ref())
        .map_err(|e| GeometryError::ImportFailed(format!("{}: {e}", path.as_ref().display())))?;
    parse_csv(&content, simplify)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: ProfileLayout = ProfileLayout {
        sample_length: 0.5,
        invalid: -1e6,
    };

    fn open_profiles(n: usize) -> (Vec<f64>, Vec<f64>) {
        // a lens-shaped contour open between samples 2 and n-3
        let mut up = vec![0.; n];
        let mut lo = vec![0.; n];
        for i in 2..n - 2 {
            up[i] = 1.;
            lo[i] = -1.;
        }
        up[1] = 0.;
        lo[1] = 0.;
        (up, lo)
    }

    #[test]
    fn unique_contour_from_simple_profiles() {
        let n = 12;
        let (mut up, mut lo) = open_profiles(n);
        let up_surf = vec![surface::UPPER_COVER; n];
        let lo_surf = vec![surface::TONGUE; n];
        let c = create_unique_contour(LAYOUT, &mut up, &mut lo, &up_surf, &lo_surf).unwrap();
        assert!(c.len() >= 3);
        assert!(c.area() > 0.);
        // both surface classes must appear on the ring
        assert!(c.tags().contains(&surface::UPPER_COVER));
        assert!(c.tags().contains(&surface::TONGUE));
    }

    #[test]
    fn closed_profiles_give_empty_contour_error() {
        let n = 8;
        let mut up = vec![0.; n];
        let mut lo = vec![0.; n];
        let surf = vec![0; n];
        let res = create_unique_contour(LAYOUT, &mut up, &mut lo, &surf, &surf);
        assert!(matches!(res, Err(GeometryError::EmptyContour)));
    }

    #[test]
    fn minimal_gap_is_enforced() {
        let n = 12;
        let (mut up, mut lo) = open_profiles(n);
        // pinch the middle of the contour almost closed
        up[5] = 0.01;
        lo[5] = 0.;
        let surf = vec![0; n];
        let c = create_unique_contour(LAYOUT, &mut up, &mut lo, &surf, &surf).unwrap();
        // the pinch must have been split apart instead of closing the ring
        assert!(c.area() > 0.);
        assert!((up[5] - lo[5]) >= MINIMAL_PROFILE_GAP - 1e-12);
    }

    #[test]
    fn csv_parse_extracts_slices() {
        let content = "\
0;0;1;-1;1;1;-1;\n\
0;1;1;-1;-1;1;1;\n\
2;0;1;-1.5;1.5;1.5;-1.5;\n\
0;1;1;-1.5;-1.5;1.5;1.5;\n";
        let slices = parse_csv(content, false).unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].contour.len(), 4);
        assert!((slices[0].contour.area() - 4.).abs() < 1e-12);
        assert!((slices[1].sample.point.x - 2.).abs() < 1e-12);
        assert!((slices[1].sample.normal.length() - 1.).abs() < 1e-12);
    }

    #[test]
    fn csv_parse_rejects_bad_number() {
        let content = "0;0;1;-1;1;x;-1;\n0;1;1;-1;-1;1;1;\n";
        assert!(matches!(
            parse_csv(content, false),
            Err(GeometryError::ImportFailed(_))
        ));
    }

    #[test]
    fn csv_parse_drops_repeated_last_point() {
        let content = "\
0;0;1;-1;1;1;-1;-1;\n\
0;1;1;-1;-1;1;1;-1;\n\
2;0;1;-1;1;1;-1;\n\
0;1;1;-1;-1;1;1;\n";
        let slices = parse_csv(content, false).unwrap();
        assert_eq!(slices[0].contour.len(), 4);
    }

    #[test]
    fn csv_parse_requires_two_slices() {
        let content = "0;0;1;-1;1;1;-1;\n0;1;1;-1;-1;1;1;\n";
        assert!(parse_csv(content, false).is_err());
    }
}
