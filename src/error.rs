use thiserror::Error;

/// Errors raised while turning raw geometry into contours and sections.
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("contour has fewer than 3 vertices")]
    EmptyContour,
    #[error("geometry import failed: {0}")]
    ImportFailed(String),
    #[error("at least two slices are required, got {0}")]
    InsufficientGeometry(usize),
    #[error("contour is degenerate (zero area)")]
    DegenerateContour,
}

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("triangulation failed for section {section}: {reason}")]
    TriangulationFailed { section: usize, reason: String },
    #[error("mesh of section {section} has fewer than 3 vertices")]
    TooFewVertices { section: usize },
    #[error("inconsistent triangle orientation in section {section}")]
    InconsistentOrientation { section: usize },
}

#[derive(Debug, Error)]
pub enum ModalError {
    #[error("mass matrix of section {section} is not positive definite")]
    MassNotPositiveDefinite { section: usize },
    #[error("eigensolver did not converge for section {section}")]
    EigenSolveFailed { section: usize },
    #[error("section {section} has no propagating mode below the cut-on cap")]
    NoMode { section: usize },
}

#[derive(Debug, Error)]
pub enum JunctionError {
    #[error("contours of sections {a} and {b} do not intersect")]
    NoIntersection { a: usize, b: usize },
    #[error("boolean operation failed between sections {a} and {b}")]
    BooleanFailed { a: usize, b: usize },
}

#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("singular matrix while propagating {quantity} in section {section} at {freq} Hz")]
    SingularMatrix {
        section: usize,
        freq: f64,
        quantity: &'static str,
    },
    #[error("matrix exponential failed in section {section} at {freq} Hz")]
    ExponentialFailed { section: usize, freq: f64 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("mesh density must be positive, got {0}")]
    InvalidMeshDensity(f64),
    #[error("Magnus scheme order must be 2 or 4, got {0}")]
    InvalidMagnusOrder(usize),
    #[error("at least 2 integration steps are required, got {0}")]
    TooFewIntegrationSteps(usize),
    #[error("PML thickness {thickness} must be smaller than the radius {radius}")]
    InvalidPml { thickness: f64, radius: f64 },
}

/// Top level error type of the simulator.
///
/// Geometry, mesh, modal and junction errors are fatal for the current
/// geometry: the driver keeps the partial state and refuses further
/// frequency work until reconfigured. Propagation errors only poison the
/// frequency at which they occurred.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Mesh(#[from] MeshError),
    #[error(transparent)]
    Modal(#[from] ModalError),
    #[error(transparent)]
    Junction(#[from] JunctionError),
    #[error(transparent)]
    Propagation(#[from] PropagationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, SimulationError>;
