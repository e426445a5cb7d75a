pub mod cell;
pub mod error;
pub mod math;
pub mod model;
pub mod region;
pub mod sample;
pub mod surface;
pub mod track;
pub mod window;

pub use error::{McgeomError, Result};
pub use model::GeometryModel;
