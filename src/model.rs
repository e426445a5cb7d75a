use rustc_hash::FxHashMap;

use crate::cell::{Cell, CellHandle, CellRegistry, CellSpec};
use crate::error::Result;
use crate::math::{BoundingBox, Point3, RigidTransform};
use crate::region::RegionExpr;
use crate::surface::{SurfaceHandle, SurfaceKind, SurfaceRegistry};

/// The geometry context: owns the surface and cell registries.
///
/// Replaces any notion of process-wide singletons; builders receive a
/// `&mut GeometryModel`, queries a `&GeometryModel`. Lifecycle:
/// build (mutable) -> [`freeze`](Self::freeze) -> query/export
/// (read-only, except the one-shot renumber and global transform).
#[derive(Debug, Default)]
pub struct GeometryModel {
    surfaces: SurfaceRegistry,
    cells: CellRegistry,
}

impl GeometryModel {
    /// Creates an empty model with the default tolerance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            surfaces: SurfaceRegistry::new(),
            cells: CellRegistry::new(),
        }
    }

    /// Creates an empty model with an explicit classification tolerance.
    #[must_use]
    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            surfaces: SurfaceRegistry::with_tolerance(tolerance),
            cells: CellRegistry::new(),
        }
    }

    /// The surface registry.
    #[must_use]
    pub fn surfaces(&self) -> &SurfaceRegistry {
        &self.surfaces
    }

    /// Mutable access to the surface registry, for builders.
    pub fn surfaces_mut(&mut self) -> &mut SurfaceRegistry {
        &mut self.surfaces
    }

    /// The cell registry.
    #[must_use]
    pub fn cells(&self) -> &CellRegistry {
        &self.cells
    }

    /// Mutable access to the cell registry, for builders.
    pub fn cells_mut(&mut self) -> &mut CellRegistry {
        &mut self.cells
    }

    /// Registers a surface. See [`SurfaceRegistry::register`].
    ///
    /// # Errors
    ///
    /// Propagates registration failures.
    pub fn register_surface(&mut self, kind: SurfaceKind) -> Result<SurfaceHandle> {
        self.surfaces.register(kind)
    }

    /// Registers a cell. See [`CellRegistry::create_cell`].
    ///
    /// # Errors
    ///
    /// Propagates registration failures.
    pub fn create_cell(&mut self, spec: CellSpec) -> Result<CellHandle> {
        self.cells.create_cell(&self.surfaces, spec)
    }

    /// Looks up a cell by handle.
    #[must_use]
    pub fn cell(&self, handle: CellHandle) -> Option<&Cell> {
        self.cells.get(handle)
    }

    /// Registers the six planes of an axis-aligned box and returns the
    /// region inside it.
    ///
    /// A staple of facility builds: shields, moderator vessels and test
    /// fixtures are all plane-bounded boxes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::BuildError::DegenerateGeometry`] for
    /// non-finite or zero-extent corners.
    pub fn axis_box(&mut self, bounds: &BoundingBox) -> Result<RegionExpr> {
        let mut region = RegionExpr::Always;
        for axis in 0..3 {
            let low = self.surfaces.register(SurfaceKind::axis_plane(axis, bounds.min[axis])?)?;
            let high = self
                .surfaces
                .register(SurfaceKind::axis_plane(axis, bounds.max[axis])?)?;
            region = region
                .intersect(RegionExpr::positive(low))
                .intersect(RegionExpr::negative(high));
        }
        Ok(region)
    }

    /// Freezes both registries; the model becomes read-only.
    pub fn freeze(&mut self) {
        self.surfaces.freeze();
        self.cells.freeze();
    }

    /// Whether the model has been frozen.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.surfaces.is_frozen() && self.cells.is_frozen()
    }

    /// One-shot whole-model rigid transform.
    /// See [`SurfaceRegistry::apply_global_transform`].
    ///
    /// # Errors
    ///
    /// Propagates ordering violations.
    pub fn apply_global_transform(&mut self, tf: &RigidTransform) -> Result<()> {
        self.surfaces.apply_global_transform(tf)
    }

    /// One-shot bulk cell renumbering.
    /// See [`CellRegistry::renumber_all`].
    ///
    /// # Errors
    ///
    /// Propagates mapping failures.
    pub fn renumber_all(&mut self, mapping: &FxHashMap<CellHandle, CellHandle>) -> Result<()> {
        self.cells.renumber_all(mapping)
    }

    /// Combined generation counter checked by the adjacency index and
    /// other caches built over the frozen model.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.surfaces.generation() + self.cells.generation()
    }

    /// Classification tolerance in force.
    #[must_use]
    pub fn tolerance(&self) -> f64 {
        self.surfaces.tolerance()
    }

    /// Evaluates a cell's boundary at `point`.
    ///
    /// # Errors
    ///
    /// Returns a dangling reference for an unknown cell handle, or
    /// propagates literal evaluation failures.
    pub fn cell_contains(&self, handle: CellHandle, point: &Point3) -> Result<bool> {
        let cell = self.cells.get(handle).ok_or_else(|| {
            crate::error::BuildError::CollidingMapping(format!("cell {handle} is not live"))
        })?;
        cell.boundary().evaluate(&self.surfaces, point)
    }
}
