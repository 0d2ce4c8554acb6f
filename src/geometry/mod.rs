pub mod centerline;
pub mod contour;
pub mod intake;

pub use contour::{surface, Contour, SurfaceTag};

use crate::params::CenterlineSample;

/// One cross-section sample of the waveguide: its contour in the local
/// section plane and the centerline sample it is attached to.
#[derive(Debug, Clone)]
pub struct Slice {
    pub contour: Contour,
    pub sample: CenterlineSample,
}
