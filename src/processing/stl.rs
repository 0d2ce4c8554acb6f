use std::io::{self, Write};
use std::path::Path;

use glam::DVec3;

use crate::section::Section;

fn face_normal(v0: DVec3, v1: DVec3, v2: DVec3) -> DVec3 {
    let n = (v1 - v0).cross(v2 - v0);
    let len = n.length();
    if len > 0. {
        n / len
    } else {
        n
    }
}

fn write_triangle(out: &mut Vec<u8>, v: [DVec3; 3]) {
    let n = face_normal(v[0], v[1], v[2]);
    for val in [n.x, n.y, n.z] {
        out.extend_from_slice(&(val as f32).to_le_bytes());
    }
    for vertex in v {
        for val in [vertex.x, vertex.y, vertex.z] {
            out.extend_from_slice(&(val as f32).to_le_bytes());
        }
    }
    // attribute byte count
    out.extend_from_slice(&0u16.to_le_bytes());
}

/// Write a binary STL file: 80 byte header, little endian triangle count,
/// then per triangle the normal, three vertices and a null attribute.
/// Quads are split into two triangles with recomputed normals.
pub fn write_stl<P: AsRef<Path>>(
    path: P,
    triangles: &[[DVec3; 3]],
    quads: &[[DVec3; 4]],
) -> io::Result<()> {
    let mut file = std::fs::File::create(path)?;

    let mut header = [0u8; 80];
    let name = b"mmwg-rs geometry export";
    header[..name.len()].copy_from_slice(name);
    file.write_all(&header)?;

    let count = (triangles.len() + 2 * quads.len()) as u32;
    file.write_all(&count.to_le_bytes())?;

    let mut body = Vec::with_capacity(50 * count as usize);
    for tri in triangles {
        write_triangle(&mut body, *tri);
    }
    for quad in quads {
        write_triangle(&mut body, [quad[0], quad[1], quad[2]]);
        write_triangle(&mut body, [quad[0], quad[2], quad[3]]);
    }
    file.write_all(&body)
}

/// Export the tube surface of the section graph: each section contributes
/// a ring of quads between its scaled entry and exit contours, placed in
/// 3-D by the local section frames.
pub fn export_tube_surface<P: AsRef<Path>>(path: P, sections: &[Section]) -> io::Result<()> {
    let mut quads = Vec::new();

    for section in sections {
        let fem = match section.fem() {
            Some(fem) if !fem.junction && section.length() > 0. => fem,
            _ => continue,
        };

        let place = |pt_2d: glam::DVec2, at_exit: bool| -> DVec3 {
            let (ctr, normal, scale) = if at_exit {
                (section.ctr_out(), section.normal_out(), section.scale_out())
            } else {
                (section.ctr_in, section.normal_in, section.scale_in())
            };
            let plane = ctr + scale * pt_2d.y * normal;
            DVec3::new(plane.x, scale * pt_2d.x, plane.y)
        };

        let pts = fem.contour.points();
        let n = pts.len();
        for i in 0..n {
            let a = pts[i];
            let b = pts[(i + 1) % n];
            quads.push([
                place(a, false),
                place(b, false),
                place(b, true),
                place(a, true),
            ]);
        }
    }

    write_stl(path, &[], &quads)
}
