use glam::DVec2;
use spade::{ConstrainedDelaunayTriangulation, Point2, RefinementParameters, Triangulation};

use crate::discretization::mesh::{BoundarySegment, TriMesh};
use crate::error::MeshError;
use crate::geometry::Contour;

type Cdt = ConstrainedDelaunayTriangulation<Point2<f64>>;

/// Mesh a contour with a constrained Delaunay triangulation refined to the
/// target edge length `spacing`, strip the faces outside the domain and
/// relax the interior vertices.
pub fn triangulate_contour(
    contour: &Contour,
    spacing: f64,
    section: usize,
) -> Result<TriMesh, MeshError> {
    let mut mesh = refine_contour(contour, spacing, section)?;
    mesh.smooth(10);
    Ok(mesh)
}

/// Same triangulation without the smoothing pass, used for junction
/// integration meshes.
pub fn refine_contour(
    contour: &Contour,
    spacing: f64,
    section: usize,
) -> Result<TriMesh, MeshError> {
    let mut cdt = Cdt::new();

    let mut handles = Vec::with_capacity(contour.len());
    for p in contour.points() {
        let handle = cdt.insert(Point2::new(p.x, p.y)).map_err(|e| {
            MeshError::TriangulationFailed {
                section,
                reason: format!("{e:?}"),
            }
        })?;
        handles.push(handle);
    }
    for i in 0..handles.len() {
        let next = (i + 1) % handles.len();
        if handles[i] != handles[next] {
            cdt.add_constraint(handles[i], handles[next]);
        }
    }

    // equilateral triangle of edge `spacing`
    let max_area = 3f64.sqrt() / 4. * spacing * spacing;
    let params = RefinementParameters::<f64>::new()
        .exclude_outer_faces(true)
        .with_max_allowed_area(max_area);
    cdt.refine(params);

    if cdt.num_vertices() < 3 {
        return Err(MeshError::TooFewVertices { section });
    }

    let mut vertices = vec![DVec2::ZERO; cdt.num_vertices()];
    for v in cdt.vertices() {
        let pos = v.position();
        vertices[v.fix().index()] = DVec2::new(pos.x, pos.y);
    }

    // keep only the faces whose centroid lies inside the contour
    let mut triangles = Vec::with_capacity(cdt.num_inner_faces());
    for face in cdt.inner_faces() {
        let vs = face.vertices();
        let idx = [
            vs[0].fix().index(),
            vs[1].fix().index(),
            vs[2].fix().index(),
        ];
        let centroid = (vertices[idx[0]] + vertices[idx[1]] + vertices[idx[2]]) / 3.;
        if contour.contains(centroid) {
            triangles.push(idx);
        }
    }

    if triangles.is_empty() {
        return Err(MeshError::TriangulationFailed {
            section,
            reason: "no face inside the contour".into(),
        });
    }

    // the constraint edges form the mesh boundary; each one inherits the
    // surface tag of the closest original contour vertex
    let mut boundary = Vec::new();
    for edge in cdt.undirected_edges() {
        if cdt.is_constraint_edge(edge.fix()) {
            let evs = edge.vertices();
            let a = evs[0].fix().index();
            let b = evs[1].fix().index();
            let mid = 0.5 * (vertices[a] + vertices[b]);
            let tag_idx = contour
                .points()
                .iter()
                .enumerate()
                .min_by(|(_, p), (_, q)| {
                    (**p - mid).length_squared().total_cmp(&(**q - mid).length_squared())
                })
                .map(|(i, _)| i)
                .unwrap_or(0);
            boundary.push(BoundarySegment {
                vertices: [a, b],
                tag: contour.tags()[tag_idx],
            });
        }
    }

    Ok(TriMesh {
        vertices,
        triangles,
        boundary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circle(radius: f64, n: usize) -> Contour {
        let pts = (0..n)
            .map(|i| {
                let t = 2. * std::f64::consts::PI * i as f64 / n as f64;
                DVec2::new(radius * t.cos(), radius * t.sin())
            })
            .collect();
        Contour::with_uniform_tag(pts, 2).unwrap()
    }

    #[test]
    fn mesh_area_matches_polygon_area() {
        let contour = circle(1., 32);
        let spacing = contour.area().sqrt() / 5.;
        let mesh = triangulate_contour(&contour, spacing, 0).unwrap();
        assert!(mesh.num_vertices() >= 3);
        assert!((mesh.total_area() - contour.area()).abs() < 1e-6 * contour.area().max(1.));
    }

    #[test]
    fn all_triangle_areas_positive() {
        let contour = circle(0.8, 24);
        let mesh = triangulate_contour(&contour, 0.2, 0).unwrap();
        for t in 0..mesh.num_triangles() {
            assert!(mesh.triangle_area(t) > 0.);
        }
    }

    #[test]
    fn refinement_respects_size_criterion() {
        let contour = circle(1., 32);
        let coarse = triangulate_contour(&contour, 0.8, 0).unwrap();
        let fine = triangulate_contour(&contour, 0.2, 0).unwrap();
        assert!(fine.num_vertices() > coarse.num_vertices());
        let max_area = 3f64.sqrt() / 4. * 0.2 * 0.2;
        for t in 0..fine.num_triangles() {
            assert!(fine.triangle_area(t) <= 2. * max_area);
        }
    }

    #[test]
    fn boundary_edges_form_closed_cycle() {
        let contour = circle(1., 16);
        let mesh = triangulate_contour(&contour, 0.3, 0).unwrap();
        // every boundary vertex appears in exactly two boundary segments
        let mut counts = vec![0usize; mesh.num_vertices()];
        for seg in &mesh.boundary {
            counts[seg.vertices[0]] += 1;
            counts[seg.vertices[1]] += 1;
        }
        for &c in counts.iter().filter(|&&c| c > 0) {
            assert_eq!(c, 2);
        }
        assert!(!mesh.boundary.is_empty());
    }

    #[test]
    fn boundary_tags_are_inherited() {
        let contour = circle(1., 16);
        let mesh = triangulate_contour(&contour, 0.3, 0).unwrap();
        for seg in &mesh.boundary {
            assert_eq!(seg.tag, 2);
        }
    }
}
