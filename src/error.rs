use thiserror::Error;

use crate::cell::CellHandle;
use crate::surface::SurfaceHandle;

/// Top-level error type for the mcgeom kernel.
#[derive(Debug, Error)]
pub enum McgeomError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Track(#[from] TrackError),
}

/// Fatal errors raised while the geometry model is being built.
///
/// Geometry integrity is all-or-nothing: any of these aborts the build,
/// because every later stage assumes full referential integrity.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("boundary references unregistered surface {0}")]
    DanglingSurfaceReference(SurfaceHandle),

    #[error("renumber mapping is not a bijection over live handles: {0}")]
    CollidingMapping(String),

    #[error("model is frozen: {0}")]
    ModelFrozen(&'static str),

    #[error("region text malformed at byte {offset}: {message}")]
    MalformedRegion { offset: usize, message: String },
}

/// Per-query errors raised against a frozen model.
///
/// These are recoverable by the caller: the volume sampler counts them
/// and continues, while validation tooling treats any occurrence as a
/// hard failure of the model.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("point ({0}, {1}, {2}) lies in no cell")]
    NotFound(f64, f64, f64),

    #[error("no exit surface found leaving cell {cell} from ({x}, {y}, {z})")]
    LostParticle {
        cell: CellHandle,
        x: f64,
        y: f64,
        z: f64,
    },

    #[error("no intercept: {0}")]
    NoIntercept(String),

    #[error("adjacency index built at generation {built}, model is at {current}")]
    StaleAdjacency { built: u64, current: u64 },

    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Convenience type alias for results using [`McgeomError`].
pub type Result<T> = std::result::Result<T, McgeomError>;
