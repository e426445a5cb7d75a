use std::cell::Cell as StdCell;

use crate::error::{BuildError, Result};
use crate::math::{Point3, RigidTransform, DEFAULT_TOLERANCE};

use super::{Side, Surface, SurfaceHandle, SurfaceKind};

/// Canonical store of half-space primitives.
///
/// Surfaces are owned exclusively by the registry; everything else
/// references them by [`SurfaceHandle`]. Handles count up from 1 and are
/// never reused. The lifecycle is build -> freeze -> query: once frozen,
/// or once any side query has been answered, the geometry may no longer
/// change except through the one-shot
/// [`apply_global_transform`](Self::apply_global_transform).
#[derive(Debug)]
pub struct SurfaceRegistry {
    surfaces: Vec<Surface>,
    tolerance: f64,
    frozen: bool,
    transformed: bool,
    queried: StdCell<bool>,
    generation: u64,
}

impl Default for SurfaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceRegistry {
    /// Creates a registry with the default classification tolerance.
    #[must_use]
    pub fn new() -> Self {
        Self::with_tolerance(DEFAULT_TOLERANCE)
    }

    /// Creates a registry with an explicit classification tolerance.
    ///
    /// A single tolerance is shared by every primitive kind, matching
    /// the behaviour of established transport geometry codes.
    #[must_use]
    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            surfaces: Vec::new(),
            tolerance,
            frozen: false,
            transformed: false,
            queried: StdCell::new(false),
            generation: 0,
        }
    }

    /// The classification tolerance in force.
    #[must_use]
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Number of registered surfaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    /// Generation counter, bumped by any post-build mutation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Registers a surface, deduplicating against existing surfaces of
    /// the same kind within the registry tolerance.
    ///
    /// Independently authored components that describe the same physical
    /// plane or cylinder collapse to one handle.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::ModelFrozen`] after [`freeze`](Self::freeze),
    /// or [`BuildError::DegenerateGeometry`] when the handle space is
    /// exhausted.
    pub fn register(&mut self, kind: SurfaceKind) -> Result<SurfaceHandle> {
        if self.frozen {
            return Err(BuildError::ModelFrozen("register after freeze").into());
        }
        let kind = kind.canonical();
        for (index, existing) in self.surfaces.iter().enumerate() {
            if existing.kind().coincident(&kind, self.tolerance) {
                return handle_at(index).ok_or_else(handle_space_exhausted);
            }
        }
        let handle = handle_at(self.surfaces.len()).ok_or_else(handle_space_exhausted)?;
        self.surfaces.push(Surface::new(kind, self.tolerance));
        Ok(handle)
    }

    /// Looks up a surface by handle.
    #[must_use]
    pub fn get(&self, handle: SurfaceHandle) -> Option<&Surface> {
        let index = handle.0.checked_sub(1)? as usize;
        self.surfaces.get(index)
    }

    /// Whether `handle` names a registered surface.
    #[must_use]
    pub fn contains(&self, handle: SurfaceHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Classifies `point` against the surface named by `handle`.
    ///
    /// Answering a side query pins the coordinate frame: a global
    /// transform afterwards is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::DanglingSurfaceReference`] for an unknown
    /// handle.
    pub fn side(&self, handle: SurfaceHandle, point: &Point3) -> Result<Side> {
        let surface = self
            .get(handle)
            .ok_or(BuildError::DanglingSurfaceReference(handle))?;
        self.queried.set(true);
        Ok(surface.side(point))
    }

    /// Marks the registry read-only. Idempotent.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Whether the registry has been frozen.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Applies a whole-model rigid transform to every surface.
    ///
    /// Runs exactly once, for global coordinate alignment before export.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::ModelFrozen`] if called a second time, or
    /// after any side query has already been answered against the
    /// un-transformed frame.
    pub fn apply_global_transform(&mut self, tf: &RigidTransform) -> Result<()> {
        if self.transformed {
            return Err(BuildError::ModelFrozen("global transform already applied").into());
        }
        if self.queried.get() {
            return Err(BuildError::ModelFrozen("queried before global transform").into());
        }
        for surface in &mut self.surfaces {
            let moved = surface.kind().transformed(tf);
            surface.set_kind(moved);
        }
        self.transformed = true;
        self.generation += 1;
        Ok(())
    }

    /// Iterates surfaces in handle order.
    pub fn iter(&self) -> impl Iterator<Item = (SurfaceHandle, &Surface)> {
        self.surfaces
            .iter()
            .enumerate()
            .filter_map(|(index, surface)| handle_at(index).map(|handle| (handle, surface)))
    }

    /// Renders every surface, one deck line each, in handle order.
    #[must_use]
    pub fn render_all(&self) -> String {
        let mut out = String::new();
        for (handle, surface) in self.iter() {
            out.push_str(&surface.render(handle));
            out.push('\n');
        }
        out
    }
}

// Handles count up from 1; 0 is never issued. `None` past the u32
// range, at which point registration refuses to alias handles.
fn handle_at(index: usize) -> Option<SurfaceHandle> {
    u32::try_from(index + 1).ok().map(SurfaceHandle)
}

fn handle_space_exhausted() -> crate::error::McgeomError {
    BuildError::DegenerateGeometry("surface handle space exhausted".into()).into()
}
