use crate::cell::CellHandle;
use crate::error::{Result, TrackError};
use crate::math::Point3;
use crate::model::GeometryModel;

/// Finds the cell containing `point`.
///
/// `hint` is tried first: consecutive queries are spatially coherent,
/// so the previous answer usually still holds. Otherwise every live
/// cell's boundary is evaluated in handle order.
///
/// # Errors
///
/// Returns [`TrackError::NotFound`] when the point lies in no cell.
/// That is a model-completeness defect and is always surfaced, never
/// treated as "outside world = void".
pub fn find_cell(
    model: &GeometryModel,
    point: &Point3,
    hint: Option<CellHandle>,
) -> Result<CellHandle> {
    if let Some(candidate) = hint {
        if model.cells().contains(candidate) && model.cell_contains(candidate, point)? {
            return Ok(candidate);
        }
    }
    for (handle, cell) in model.cells().iter() {
        if cell.boundary().evaluate(model.surfaces(), point)? {
            return Ok(handle);
        }
    }
    Err(TrackError::NotFound(point.x, point.y, point.z).into())
}
