use glam::DVec2;

use crate::params::MIN_DISTANCE;

/// Curvature parameters of the circle arc joining two centerline samples.
#[derive(Debug, Clone, Copy)]
pub struct ArcParameters {
    /// Signed radius of the arc passing through the first point.
    pub radius: f64,
    /// Signed angle between the two section planes.
    pub angle: f64,
    /// Distance to shift the second point along its normal so that it lies
    /// on the same arc as the first one.
    pub shift: f64,
}

fn rotate(v: DVec2, angle: f64) -> DVec2 {
    DVec2::from_angle(angle).rotate(v)
}

/// Compute the radius, angle and shift of the circle arc joining two
/// centerline samples, from the intersection point of their normals.
pub fn curvature_angle_shift(p1: DVec2, p2: DVec2, n1: DVec2, n2: DVec2) -> ArcParameters {
    let denom = n2.x * n1.y - n2.y * n1.x;

    // radius of the arc passing through p1, centered on the normal
    // intersection, and the one passing through p2
    let r1 = ((p2.y - p1.y) * n2.x - (p2.x - p1.x) * n2.y) / denom;
    let r2 = ((p2.y - p1.y) * n1.x - (p2.x - p1.x) * n1.y) / denom;

    let two_pi = 2. * std::f64::consts::PI;
    let a1 = (n1.y.atan2(n1.x) + two_pi) % two_pi;
    let a2 = (n2.y.atan2(n2.x) + two_pi) % two_pi;

    let mut angle = a2 - a1;
    if two_pi - angle.abs() < angle.abs() {
        angle = if angle < 0. {
            two_pi - angle.abs()
        } else {
            angle.abs() - two_pi
        };
    }

    ArcParameters {
        radius: r1,
        angle,
        shift: r1 - r2,
    }
}

/// Exit centerline point of a section given its entry point, entry normal,
/// arc angle, curvature radius and length.
pub fn exit_point(
    ctr_in: DVec2,
    normal_in: DVec2,
    arc_angle: f64,
    curv_radius: f64,
    length: f64,
) -> DVec2 {
    if length <= 0. {
        return ctr_in;
    }
    if arc_angle.abs() < MIN_DISTANCE {
        return ctr_in + length * rotate(normal_in, -std::f64::consts::FRAC_PI_2);
    }
    let theta = arc_angle.abs() / 2.;
    let opposite_signs = curv_radius.is_sign_negative() != (curv_radius * arc_angle).is_sign_negative();
    if opposite_signs {
        ctr_in
            + (-2. * curv_radius * theta.sin())
                * rotate(-normal_in, std::f64::consts::FRAC_PI_2 - theta)
    } else {
        ctr_in
            + (2. * curv_radius * theta.sin())
                * rotate(normal_in, theta - std::f64::consts::FRAC_PI_2)
    }
}

/// Exit normal of a section: the entry normal rotated by the arc angle.
pub fn exit_normal(normal_in: DVec2, arc_angle: f64, length: f64) -> DVec2 {
    if length <= 0. || arc_angle.abs() < MIN_DISTANCE {
        normal_in
    } else {
        rotate(normal_in, arc_angle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parallel_normals_give_straight_segment() {
        let arc = curvature_angle_shift(
            DVec2::new(0., 0.),
            DVec2::new(1., 0.),
            DVec2::new(0., 1.),
            DVec2::new(0., 1.),
        );
        assert!(arc.angle.abs() < 1e-12);
    }

    #[test]
    fn quarter_circle_arc() {
        // two sections on a circle of radius 2 centered at the origin,
        // normals pointing outward
        let p1 = DVec2::new(2., 0.);
        let p2 = DVec2::new(0., 2.);
        let n1 = DVec2::new(1., 0.);
        let n2 = DVec2::new(0., 1.);
        let arc = curvature_angle_shift(p1, p2, n1, n2);
        assert!((arc.radius.abs() - 2.).abs() < 1e-12);
        assert!((arc.angle.abs() - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!(arc.shift.abs() < 1e-12);
    }

    #[test]
    fn straight_exit_point_moves_along_axis() {
        let out = exit_point(DVec2::ZERO, DVec2::new(0., 1.), 0., 0., 3.);
        assert!((out - DVec2::new(3., 0.)).length() < 1e-12);
        let n = exit_normal(DVec2::new(0., 1.), 0., 3.);
        assert!((n - DVec2::new(0., 1.)).length() < 1e-12);
    }

    #[test]
    fn curved_exit_point_stays_on_arc() {
        let p1 = DVec2::new(2., 0.);
        let n1 = DVec2::new(1., 0.);
        let p2 = DVec2::new(0., 2.);
        let n2 = DVec2::new(0., 1.);
        let arc = curvature_angle_shift(p1, p2, n1, n2);
        let length = arc.radius.abs() * arc.angle.abs();
        let out = exit_point(p1, n1, arc.angle, arc.radius, length);
        assert!((out - p2).length() < 1e-9);
        let n_out = exit_normal(n1, arc.angle, length);
        assert!((n_out - n2).length() < 1e-9);
    }
}
