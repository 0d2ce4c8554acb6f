use glam::DVec2;

use crate::error::GeometryError;
use crate::params::MIN_DISTANCE_SIMILAR_POLYGONS;

/// Integer class of a boundary surface.
pub type SurfaceTag = i32;

/// Anatomical surface classes of the tract walls.
pub mod surface {
    use super::SurfaceTag;

    pub const UPPER_TEETH: SurfaceTag = 0;
    pub const LOWER_TEETH: SurfaceTag = 1;
    pub const TONGUE: SurfaceTag = 2;
    pub const UPPER_COVER: SurfaceTag = 3;
    pub const LOWER_COVER: SurfaceTag = 4;
    pub const UPPER_LIP: SurfaceTag = 5;
    pub const LOWER_LIP: SurfaceTag = 6;
    pub const UVULA: SurfaceTag = 7;
    pub const EPIGLOTTIS: SurfaceTag = 8;
    pub const RADIATION: SurfaceTag = 9;

    pub fn is_tooth(tag: SurfaceTag) -> bool {
        tag == UPPER_TEETH || tag == LOWER_TEETH
    }
}

/// A simple closed polygon bounding a cross-section, stored
/// counter-clockwise, with one surface tag per vertex.
#[derive(Debug, Clone)]
pub struct Contour {
    points: Vec<DVec2>,
    tags: Vec<SurfaceTag>,
}

impl Contour {
    /// Build a contour from raw vertices, removing duplicated consecutive
    /// points and fixing the orientation so that the area is positive.
    pub fn new(points: Vec<DVec2>, tags: Vec<SurfaceTag>) -> Result<Self, GeometryError> {
        assert_eq!(points.len(), tags.len());
        let mut contour = Self { points, tags };
        contour.remove_duplicated_points(MIN_DISTANCE_SIMILAR_POLYGONS);
        if contour.points.len() < 3 {
            return Err(GeometryError::EmptyContour);
        }
        if contour.signed_area().abs() == 0. {
            return Err(GeometryError::DegenerateContour);
        }
        if contour.signed_area() < 0. {
            contour.points.reverse();
            contour.tags.reverse();
        }
        Ok(contour)
    }

    /// Contour with all tags set to the same surface class.
    pub fn with_uniform_tag(points: Vec<DVec2>, tag: SurfaceTag) -> Result<Self, GeometryError> {
        let tags = vec![tag; points.len()];
        Self::new(points, tags)
    }

    pub fn points(&self) -> &[DVec2] {
        &self.points
    }

    pub fn tags(&self) -> &[SurfaceTag] {
        &self.tags
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn remove_duplicated_points(&mut self, tolerance: f64) {
        let mut i = 0;
        while self.points.len() > 1 && i < self.points.len() {
            let next = (i + 1) % self.points.len();
            let d = self.points[i] - self.points[next];
            if d.x.abs().max(d.y.abs()) < tolerance {
                self.points.remove(next);
                self.tags.remove(next);
            } else {
                i += 1;
            }
        }
    }

    fn signed_area(&self) -> f64 {
        let n = self.points.len();
        let mut sum = 0.;
        for i in 0..n {
            let p = self.points[i];
            let q = self.points[(i + 1) % n];
            sum += p.x * q.y - q.x * p.y;
        }
        sum / 2.
    }

    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    pub fn perimeter(&self) -> f64 {
        let n = self.points.len();
        (0..n)
            .map(|i| (self.points[(i + 1) % n] - self.points[i]).length())
            .sum()
    }

    /// Axis aligned bounding box `(min, max)`.
    pub fn bbox(&self) -> (DVec2, DVec2) {
        let mut min = DVec2::splat(f64::INFINITY);
        let mut max = DVec2::splat(f64::NEG_INFINITY);
        for p in &self.points {
            min = min.min(*p);
            max = max.max(*p);
        }
        (min, max)
    }

    /// Largest distance from the origin to a corner of the bounding box.
    pub fn max_extent(&self) -> f64 {
        let (min, max) = self.bbox();
        min.x.abs().max(min.y.abs()).max(max.x).max(max.y)
    }

    /// Point in polygon test by crossing number, boundary excluded.
    pub fn contains(&self, pt: DVec2) -> bool {
        let n = self.points.len();
        let mut inside = false;
        for i in 0..n {
            let a = self.points[i];
            let b = self.points[(i + 1) % n];
            if (a.y > pt.y) != (b.y > pt.y) {
                let x_cross = a.x + (pt.y - a.y) / (b.y - a.y) * (b.x - a.x);
                if pt.x < x_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }

    /// Signed distance between a point and the contour, negative inside.
    pub fn distance(&self, pt: DVec2) -> f64 {
        let n = self.points.len();
        let mut dist = f64::INFINITY;
        for i in 0..n {
            let a = self.points[i];
            let b = self.points[(i + 1) % n];
            let edge = b - a;
            let t = ((pt - a).dot(edge) / edge.length_squared()).clamp(0., 1.);
            dist = dist.min((a + t * edge - pt).length());
        }
        if self.contains(pt) {
            -dist
        } else {
            dist
        }
    }

    /// Bring a point lying slightly outside back inside the contour by
    /// following the distance gradient.
    pub fn pull_inside(&self, pt: DVec2, spacing: f64) -> DVec2 {
        let eps = 1e-3 * spacing;
        let d = self.distance(pt);
        let grad = DVec2::new(
            (self.distance(pt + DVec2::new(eps, 0.)) - d) / eps,
            (self.distance(pt + DVec2::new(0., eps)) - d) / eps,
        );
        pt - (d + crate::params::MIN_DISTANCE) * grad
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            points: self.points.iter().map(|p| *p * factor).collect(),
            tags: self.tags.clone(),
        }
    }

    pub fn translated(&self, shift: DVec2) -> Self {
        Self {
            points: self.points.iter().map(|p| *p + shift).collect(),
            tags: self.tags.clone(),
        }
    }

    /// Check whether two contours are pointwise identical within `min_dist`.
    pub fn similar(&self, other: &Self, min_dist: f64) -> bool {
        self.points.len() == other.points.len()
            && self
                .points
                .iter()
                .zip(&other.points)
                .all(|(p, q)| (p.x - q.x).abs() <= min_dist && (p.y - q.y).abs() <= min_dist)
    }

    /// Check whether every vertex of `other` lies strictly inside `self`.
    pub fn strictly_contains(&self, other: &Self) -> bool {
        other.points.iter().all(|p| self.contains(*p))
    }

    /// Reduce the vertex count by repeatedly removing the vertex whose
    /// removal deviates least from the original shape, until the count has
    /// dropped below `stop_ratio` of the initial one. Vertices costing more
    /// than `max_sq_cost` are never removed.
    pub fn simplify(&mut self, stop_ratio: f64, max_sq_cost: f64) {
        let target = ((self.points.len() as f64) * stop_ratio).ceil() as usize;
        while self.points.len() > target.max(3) {
            let n = self.points.len();
            let mut best = (f64::INFINITY, 0);
            for i in 0..n {
                let prev = self.points[(i + n - 1) % n];
                let next = self.points[(i + 1) % n];
                let edge = next - prev;
                let t = ((self.points[i] - prev).dot(edge) / edge.length_squared()).clamp(0., 1.);
                let cost = (prev + t * edge - self.points[i]).length_squared();
                if cost < best.0 {
                    best = (cost, i);
                }
            }
            if best.0 > max_sq_cost {
                break;
            }
            self.points.remove(best.1);
            self.tags.remove(best.1);
        }
    }

    /// Conversion to a `geo` polygon for boolean operations.
    pub fn to_geo(&self) -> geo::Polygon<f64> {
        let coords: Vec<(f64, f64)> = self.points.iter().map(|p| (p.x, p.y)).collect();
        geo::Polygon::new(geo::LineString::from(coords), vec![])
    }

    /// Conversion back from a `geo` polygon exterior, dropping the closing
    /// point and assigning a uniform surface tag.
    pub fn from_geo(poly: &geo::Polygon<f64>, tag: SurfaceTag) -> Result<Self, GeometryError> {
        let mut points: Vec<DVec2> = poly
            .exterior()
            .coords()
            .map(|c| DVec2::new(c.x, c.y))
            .collect();
        if points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        Self::with_uniform_tag(points, tag)
    }
}
