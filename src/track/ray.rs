use crate::cell::CellHandle;
use crate::error::{Result, TrackError};
use crate::math::{Point3, Vector3};
use crate::model::GeometryModel;
use crate::surface::{SurfaceHandle, SurfaceKind};

use super::adjacency::AdjacencyIndex;
use super::locate::find_cell;

/// A surface crossing: which surface the ray leaves a cell through and
/// at what distance along the unit direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossing {
    pub surface: SurfaceHandle,
    pub distance: f64,
}

/// One cell's worth of a traversed ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub cell: CellHandle,
    pub length: f64,
}

/// Finds the nearest surface through which a ray leaves `cell`.
///
/// Every surface referenced by the cell's boundary is intersected; only
/// roots at positive distance whose crossing actually flips the
/// boundary evaluation are kept, which rejects tangential grazes.
/// `exclude` names the surface just entered through and is removed from
/// the exit candidates: a plane cannot be crossed a second time, so it
/// is skipped outright. A curved surface can be left again through its
/// far side, so only its near-entry roots, where floating-point jitter
/// would report the entry point again, are suppressed.
///
/// # Errors
///
/// Returns [`TrackError::LostParticle`] when no valid exit root exists,
/// and [`TrackError::NoIntercept`] for a zero-length direction.
pub fn track_out_cell(
    model: &GeometryModel,
    cell: CellHandle,
    origin: &Point3,
    dir: &Vector3,
    exclude: Option<SurfaceHandle>,
) -> Result<Crossing> {
    let dir = unit_direction(dir)?;
    let tol = model.tolerance();
    let data = model.cell(cell).ok_or_else(|| {
        TrackError::NoIntercept(format!("cell {cell} is not live"))
    })?;

    let mut nearest: Option<Crossing> = None;
    for &surface in data.surfaces() {
        let Some(surf) = model.surfaces().get(surface) else {
            return Err(crate::error::BuildError::DanglingSurfaceReference(surface).into());
        };
        let guard = if Some(surface) == exclude {
            if matches!(surf.kind(), SurfaceKind::Plane { .. }) {
                continue;
            }
            100.0 * tol
        } else {
            tol
        };
        for root in surf.kind().ray_roots(origin, &dir, tol) {
            if root <= guard {
                continue;
            }
            if let Some(best) = nearest {
                if root >= best.distance {
                    continue;
                }
            }
            // The crossing must actually leave the cell; a root that
            // grazes the surface without flipping the boundary is not
            // an exit.
            let probe = origin + dir * (root + 2.0 * tol);
            if !data.boundary().evaluate(model.surfaces(), &probe)? {
                nearest = Some(Crossing {
                    surface,
                    distance: root,
                });
            }
        }
    }

    nearest.ok_or_else(|| {
        TrackError::LostParticle {
            cell,
            x: origin.x,
            y: origin.y,
            z: origin.z,
        }
        .into()
    })
}

/// Starts a lazy traversal of the model along a ray.
///
/// The returned iterator yields one [`Segment`] per cell crossed, in
/// order, and is a pure function of its inputs: re-running with the
/// same arguments reproduces identical segments. It terminates at the
/// model's outer boundary (entry into a cell without importance), at
/// `max_length` (final segment clipped), or by yielding the error as
/// its last item when a step is lost.
///
/// # Errors
///
/// Returns [`TrackError::NoIntercept`] for a zero-length direction.
pub fn traverse<'a>(
    model: &'a GeometryModel,
    adjacency: Option<&'a AdjacencyIndex>,
    origin: Point3,
    dir: &Vector3,
    max_length: f64,
) -> Result<Traverse<'a>> {
    let dir = unit_direction(dir)?;
    Ok(Traverse {
        model,
        adjacency,
        position: origin,
        dir,
        remaining: max_length,
        state: State::Start,
        pending_error: None,
    })
}

fn unit_direction(dir: &Vector3) -> Result<Vector3> {
    let len = dir.norm();
    if !len.is_finite() || len < f64::EPSILON {
        return Err(TrackError::NoIntercept("zero-length direction".into()).into());
    }
    Ok(dir / len)
}

#[derive(Debug, Clone, Copy)]
enum State {
    Start,
    InCell {
        cell: CellHandle,
        entered: Option<SurfaceHandle>,
    },
    Done,
}

/// Lazy ray traversal; see [`traverse`].
#[derive(Debug)]
pub struct Traverse<'a> {
    model: &'a GeometryModel,
    adjacency: Option<&'a AdjacencyIndex>,
    position: Point3,
    dir: Vector3,
    remaining: f64,
    state: State,
    /// Set when a crossing leads into no cell: the segment up to the
    /// gap is yielded first, this error last.
    pending_error: Option<crate::error::McgeomError>,
}

impl Traverse<'_> {
    /// Locates the cell just past a crossing, preferring adjacency
    /// candidates over a full scan.
    fn cell_past_crossing(
        &self,
        from: CellHandle,
        surface: SurfaceHandle,
        probe: &Point3,
    ) -> Result<CellHandle> {
        if let Some(index) = self.adjacency {
            for &candidate in index.neighbours(self.model, surface, from)? {
                if self.model.cell_contains(candidate, probe)? {
                    return Ok(candidate);
                }
            }
        }
        find_cell(self.model, probe, None)
    }

    fn finish(&mut self, item: Option<Result<Segment>>) -> Option<Result<Segment>> {
        self.state = State::Done;
        item
    }
}

impl Iterator for Traverse<'_> {
    type Item = Result<Segment>;

    fn next(&mut self) -> Option<Self::Item> {
        let tol = self.model.tolerance();
        loop {
            match self.state {
                State::Done => {
                    return self.pending_error.take().map(Err);
                }
                State::Start => {
                    let cell = match find_cell(self.model, &self.position, None) {
                        Ok(cell) => cell,
                        Err(err) => return self.finish(Some(Err(err))),
                    };
                    match self.model.cell(cell) {
                        Some(data) if data.importance() => {
                            self.state = State::InCell {
                                cell,
                                entered: None,
                            };
                        }
                        // Rays are terminated on entry into a
                        // zero-importance cell; starting in one tracks
                        // nothing.
                        _ => return self.finish(None),
                    }
                }
                State::InCell { cell, entered } => {
                    if self.remaining <= tol {
                        return self.finish(None);
                    }
                    let crossing = match track_out_cell(
                        self.model,
                        cell,
                        &self.position,
                        &self.dir,
                        entered,
                    ) {
                        Ok(crossing) => crossing,
                        Err(err) => return self.finish(Some(Err(err))),
                    };

                    if crossing.distance >= self.remaining {
                        let length = self.remaining;
                        self.remaining = 0.0;
                        return self.finish(Some(Ok(Segment { cell, length })));
                    }

                    let length = crossing.distance;
                    self.position += self.dir * length;
                    self.remaining -= length;
                    let probe = self.position + self.dir * (2.0 * tol);

                    let segment = Segment { cell, length };
                    match self.cell_past_crossing(cell, crossing.surface, &probe) {
                        Ok(next) => {
                            let continues = self
                                .model
                                .cell(next)
                                .is_some_and(crate::cell::Cell::importance);
                            if continues {
                                self.state = State::InCell {
                                    cell: next,
                                    entered: Some(crossing.surface),
                                };
                                return Some(Ok(segment));
                            }
                            return self.finish(Some(Ok(segment)));
                        }
                        // A crossing into no cell at all is a model gap;
                        // report the partial result's end and stop.
                        Err(err) => {
                            self.state = State::Done;
                            // The segment up to the gap is still valid;
                            // the caller sees it before the error.
                            self.pending_error = Some(err);
                            return Some(Ok(segment));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cell::CellSpec;
    use crate::math::BoundingBox;
    use crate::region::RegionExpr;
    use crate::surface::SurfaceKind;
    use approx::assert_relative_eq;

    fn p(x: f64, y: f64, z: f64) -> Point3 {
        Point3::new(x, y, z)
    }

    fn v(x: f64, y: f64, z: f64) -> Vector3 {
        Vector3::new(x, y, z)
    }

    /// Two 5x10x10 boxes split at x = 0, wrapped in a zero-importance
    /// graveyard sphere.
    fn split_model() -> (GeometryModel, CellHandle, CellHandle) {
        let mut model = GeometryModel::new();
        let left = model
            .axis_box(&BoundingBox::new(p(-5.0, -5.0, -5.0), p(0.0, 5.0, 5.0)))
            .unwrap();
        let right = model
            .axis_box(&BoundingBox::new(p(0.0, -5.0, -5.0), p(5.0, 5.0, 5.0)))
            .unwrap();
        let world = model
            .register_surface(SurfaceKind::sphere(Point3::origin(), 50.0).unwrap())
            .unwrap();
        let graveyard = RegionExpr::negative(world)
            .intersect(left.complement())
            .intersect(right.complement());
        let a = model.create_cell(CellSpec::void(left)).unwrap();
        let b = model.create_cell(CellSpec::void(right)).unwrap();
        model
            .create_cell(CellSpec::void(graveyard).without_importance())
            .unwrap();
        model.freeze();
        (model, a, b)
    }

    #[test]
    fn exit_through_nearest_flipping_surface() {
        let (model, a, _) = split_model();
        let crossing =
            track_out_cell(&model, a, &p(-2.0, 0.0, 0.0), &v(1.0, 0.0, 0.0), None).unwrap();
        assert_relative_eq!(crossing.distance, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn entry_surface_is_excluded() {
        let (model, a, b) = split_model();
        // Cross from the left box into the right one; the shared face
        // just entered through must not be re-detected when tracking on.
        let shared = track_out_cell(&model, a, &p(-2.0, 0.0, 0.0), &v(1.0, 0.0, 0.0), None)
            .unwrap()
            .surface;
        let onward =
            track_out_cell(&model, b, &p(0.0, 0.0, 0.0), &v(1.0, 0.0, 0.0), Some(shared)).unwrap();
        assert_ne!(onward.surface, shared);
        assert_relative_eq!(onward.distance, 5.0, epsilon = 1e-9);
        // Heading back through the excluded face leaves no valid exit.
        assert!(
            track_out_cell(&model, b, &p(0.0, 0.0, 0.0), &v(-1.0, 0.0, 0.0), Some(shared)).is_err()
        );
    }

    #[test]
    fn curved_entry_surface_still_exits_far_side() {
        // A cell bounded by a sphere alone: having entered through the
        // sphere, the only way out is the far side of the same surface.
        let mut model = GeometryModel::new();
        let sphere = model
            .register_surface(SurfaceKind::sphere(Point3::origin(), 2.0).unwrap())
            .unwrap();
        let cell = model
            .create_cell(CellSpec::void(RegionExpr::negative(sphere)))
            .unwrap();
        model.freeze();
        let crossing =
            track_out_cell(&model, cell, &p(-2.0, 0.0, 0.0), &v(1.0, 0.0, 0.0), Some(sphere))
                .unwrap();
        assert_eq!(crossing.surface, sphere);
        assert_relative_eq!(crossing.distance, 4.0, epsilon = 1e-9);
    }

    #[test]
    fn lost_particle_when_no_exit() {
        let (model, a, _) = split_model();
        // Excluding the only surface the ray can flip leaves no exit.
        let first = track_out_cell(&model, a, &p(-2.0, 0.0, 0.0), &v(1.0, 0.0, 0.0), None).unwrap();
        assert!(matches!(
            track_out_cell(
                &model,
                a,
                &p(-2.0, 0.0, 0.0),
                &v(1.0, 0.0, 0.0),
                Some(first.surface)
            ),
            Err(_)
        ));
    }

    #[test]
    fn traverse_two_cells_split_by_plane() {
        let (model, a, b) = split_model();
        let segments: Vec<Segment> = traverse(&model, None, p(-5.0, 0.0, 0.0), &v(1.0, 0.0, 0.0), 10.0)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].cell, a);
        assert_eq!(segments[1].cell, b);
        assert_relative_eq!(segments[0].length, 5.0, epsilon = 1e-9);
        assert_relative_eq!(segments[1].length, 5.0, epsilon = 1e-9);
    }

    #[test]
    fn traverse_is_a_pure_function_of_inputs() {
        let (model, _, _) = split_model();
        let run = || -> Vec<Segment> {
            traverse(&model, None, p(-5.0, 0.2, -0.3), &v(1.0, 0.0, 0.0), 30.0)
                .unwrap()
                .collect::<Result<Vec<_>>>()
                .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn traverse_terminates_in_graveyard() {
        let (model, _, _) = split_model();
        // Long max length: the ray crosses both boxes, enters the
        // graveyard and stops there without an error.
        let segments: Vec<Segment> = traverse(&model, None, p(-5.0, 0.0, 0.0), &v(1.0, 0.0, 0.0), 1000.0)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn traverse_clips_at_max_length() {
        let (model, a, _) = split_model();
        let segments: Vec<Segment> = traverse(&model, None, p(-5.0, 0.0, 0.0), &v(1.0, 0.0, 0.0), 3.0)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].cell, a);
        assert_relative_eq!(segments[0].length, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn traverse_uses_adjacency_index() {
        let (model, a, b) = split_model();
        let index = AdjacencyIndex::build(&model);
        let segments: Vec<Segment> =
            traverse(&model, Some(&index), p(-5.0, 0.0, 0.0), &v(1.0, 0.0, 0.0), 10.0)
                .unwrap()
                .collect::<Result<Vec<_>>>()
                .unwrap();
        assert_eq!(segments[0].cell, a);
        assert_eq!(segments[1].cell, b);
    }

    #[test]
    fn traverse_surfaces_model_gap() {
        // Two boxes with a gap between them and no graveyard: the ray
        // reports the first segment, then the gap as an error.
        let mut model = GeometryModel::new();
        let left = model
            .axis_box(&BoundingBox::new(p(-5.0, -5.0, -5.0), p(0.0, 5.0, 5.0)))
            .unwrap();
        let a = model.create_cell(CellSpec::void(left)).unwrap();
        model.freeze();
        let mut items: Vec<Result<Segment>> =
            traverse(&model, None, p(-2.0, 0.0, 0.0), &v(1.0, 0.0, 0.0), 100.0)
                .unwrap()
                .collect();
        assert_eq!(items.len(), 2);
        let first = items.remove(0).unwrap();
        assert_eq!(first.cell, a);
        assert_relative_eq!(first.length, 2.0, epsilon = 1e-9);
        assert!(items.remove(0).is_err());
    }

    #[test]
    fn zero_direction_rejected() {
        let (model, _, _) = split_model();
        assert!(traverse(&model, None, p(0.0, 0.0, 0.0), &v(0.0, 0.0, 0.0), 1.0).is_err());
    }
}
