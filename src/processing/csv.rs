use std::io::{self, Write};
use std::path::Path;

use crate::section::Section;

/// Export the section geometry in the CSV interchange format: per non
/// junction section two `;`-separated rows holding the x then y components
/// of the centerline point, the normal, the scaling factors and the scaled
/// contour vertices. The last section exports its exit frame so that a
/// re-import closes the tube at the same place.
pub fn export_geometry<P: AsRef<Path>>(path: P, sections: &[Section]) -> io::Result<()> {
    let mut file = std::fs::File::create(path)?;

    let exported: Vec<&Section> = sections
        .iter()
        .filter(|s| !s.is_junction() && !s.is_radiation())
        .collect();
    let last = exported.len().saturating_sub(1);

    for (rank, section) in exported.iter().enumerate() {
        let fem = match section.fem() {
            Some(fem) => fem,
            None => continue,
        };

        let (pt, normal) = if rank == last {
            (section.ctr_out(), section.normal_out())
        } else {
            (section.ctr_in, section.normal_in)
        };

        let mut row_x = String::new();
        let mut row_y = String::new();
        row_x.push_str(&format!("{};", pt.x));
        row_y.push_str(&format!("{};", pt.y));
        row_x.push_str(&format!("{};", normal.x));
        row_y.push_str(&format!("{};", normal.y));
        row_x.push_str(&format!("{};", section.scale_in()));
        row_y.push_str(&format!("{};", section.scale_out()));

        for p in fem.contour.points() {
            row_x.push_str(&format!("{};", section.scale_in() * p.x));
            row_y.push_str(&format!("{};", section.scale_in() * p.y));
        }

        writeln!(file, "{row_x}")?;
        writeln!(file, "{row_y}")?;
    }
    Ok(())
}
