use glam::DVec2;

use crate::geometry::SurfaceTag;
use crate::numerics::quadrature::TRI_GAUSS_COORDS;
use crate::numerics::RMatrix;

/// One segment of the mesh boundary, tagged with the surface class of the
/// nearest original contour vertex.
#[derive(Debug, Clone, Copy)]
pub struct BoundarySegment {
    pub vertices: [usize; 2],
    pub tag: SurfaceTag,
}

/// Triangulated cross-section.
#[derive(Debug, Clone, Default)]
pub struct TriMesh {
    pub vertices: Vec<DVec2>,
    pub triangles: Vec<[usize; 3]>,
    pub boundary: Vec<BoundarySegment>,
}

impl TriMesh {
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_triangles(&self) -> usize {
        self.triangles.len()
    }

    pub fn triangle_area(&self, idx: usize) -> f64 {
        let [a, b, c] = self.triangles[idx];
        let (p, q, r) = (self.vertices[a], self.vertices[b], self.vertices[c]);
        0.5 * ((q - p).perp_dot(r - p)).abs()
    }

    pub fn total_area(&self) -> f64 {
        (0..self.triangles.len()).map(|t| self.triangle_area(t)).sum()
    }

    /// Gauss integration points (3 per triangle) and the triangle areas.
    pub fn gauss_points(&self) -> (Vec<DVec2>, Vec<f64>) {
        let mut pts = Vec::with_capacity(3 * self.triangles.len());
        let mut areas = Vec::with_capacity(self.triangles.len());
        for (t, tri) in self.triangles.iter().enumerate() {
            areas.push(self.triangle_area(t));
            let [a, b, c] = *tri;
            for coord in TRI_GAUSS_COORDS {
                let l0 = 1. - coord[0] - coord[1];
                pts.push(
                    l0 * self.vertices[a] + coord[0] * self.vertices[b] + coord[1] * self.vertices[c],
                );
            }
        }
        (pts, areas)
    }

    fn barycentric(&self, tri: usize, pt: DVec2) -> [f64; 3] {
        let [a, b, c] = self.triangles[tri];
        let (p, q, r) = (self.vertices[a], self.vertices[b], self.vertices[c]);
        let den = (q - p).perp_dot(r - p);
        let l1 = (q - pt).perp_dot(r - pt) / den;
        let l2 = (r - pt).perp_dot(p - pt) / den;
        [l1, l2, 1. - l1 - l2]
    }

    /// Interpolate nodal fields (one column per field, one row per vertex)
    /// at arbitrary points. Each point uses the triangle it falls in; a
    /// point slightly outside the mesh uses the closest triangle with its
    /// barycentric weights clamped.
    pub fn interpolate(&self, fields: &RMatrix, pts: &[DVec2]) -> RMatrix {
        let num_fields = fields.ncols();
        let mut out = RMatrix::zeros(pts.len(), num_fields);

        for (row, &pt) in pts.iter().enumerate() {
            let mut best_tri = 0;
            let mut best_coords = [f64::NEG_INFINITY; 3];
            let mut best_min = f64::NEG_INFINITY;
            for t in 0..self.triangles.len() {
                let coords = self.barycentric(t, pt);
                let min = coords[0].min(coords[1]).min(coords[2]);
                if min > best_min {
                    best_min = min;
                    best_tri = t;
                    best_coords = coords;
                }
                if min >= 0. {
                    break;
                }
            }

            let mut w = best_coords.map(|l| l.max(0.));
            let sum: f64 = w.iter().sum();
            for l in &mut w {
                *l /= sum;
            }
            let tri = self.triangles[best_tri];
            for m in 0..num_fields {
                out[(row, m)] = (0..3).map(|v| w[v] * fields[(tri[v], m)]).sum();
            }
        }
        out
    }

    /// Relax interior vertices toward the centroid of their neighbors,
    /// keeping every incident triangle positively oriented. Boundary
    /// vertices never move.
    pub fn smooth(&mut self, iterations: usize) {
        let n = self.vertices.len();
        let mut is_boundary = vec![false; n];
        for seg in &self.boundary {
            is_boundary[seg.vertices[0]] = true;
            is_boundary[seg.vertices[1]] = true;
        }

        let mut neighbors: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut incident: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (t, tri) in self.triangles.iter().enumerate() {
            for i in 0..3 {
                let v = tri[i];
                incident[v].push(t);
                for j in 0..3 {
                    if i != j && !neighbors[v].contains(&tri[j]) {
                        neighbors[v].push(tri[j]);
                    }
                }
            }
        }

        for _ in 0..iterations {
            for v in 0..n {
                if is_boundary[v] || neighbors[v].is_empty() {
                    continue;
                }
                let mut centroid = DVec2::ZERO;
                for &nb in &neighbors[v] {
                    centroid += self.vertices[nb];
                }
                centroid /= neighbors[v].len() as f64;

                let old = self.vertices[v];
                self.vertices[v] = centroid;
                let valid = incident[v].iter().all(|&t| {
                    let [a, b, c] = self.triangles[t];
                    let (p, q, r) = (self.vertices[a], self.vertices[b], self.vertices[c]);
                    (q - p).perp_dot(r - p) > 1e-14
                });
                if !valid {
                    self.vertices[v] = old;
                }
            }
        }
    }
}
