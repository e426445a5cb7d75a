mod component;

pub use component::Component;

use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::error::{BuildError, Result};
use crate::region::RegionExpr;
use crate::surface::{SurfaceHandle, SurfaceRegistry};

/// Opaque numeric handle to a registry-owned cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellHandle(pub u32);

impl fmt::Display for CellHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Specification of a cell prior to registration.
#[derive(Debug, Clone)]
pub struct CellSpec {
    pub material: u32,
    pub density: f64,
    pub temperature: f64,
    pub importance: bool,
    pub boundary: RegionExpr,
    pub description: Option<String>,
}

impl CellSpec {
    /// A cell of `material` (0 = void) at `density`, bounded by `boundary`.
    #[must_use]
    pub fn new(material: u32, density: f64, boundary: RegionExpr) -> Self {
        Self {
            material,
            density,
            temperature: 300.0,
            importance: true,
            boundary,
            description: None,
        }
    }

    /// A void cell: material 0, zero density.
    #[must_use]
    pub fn void(boundary: RegionExpr) -> Self {
        Self::new(0, 0.0, boundary)
    }

    /// Sets the temperature in kelvin.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Marks the cell as a terminal region: tracked rays entering it are
    /// considered absorbed by the transport layer.
    #[must_use]
    pub fn without_importance(mut self) -> Self {
        self.importance = false;
        self
    }

    /// Sets the human-readable description used in volume reports.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A named region: material plus boundary expression.
///
/// The flat surface list is cached from the boundary for fast ray
/// intersection and refreshed whenever the boundary changes.
#[derive(Debug, Clone)]
pub struct Cell {
    material: u32,
    density: f64,
    temperature: f64,
    importance: bool,
    boundary: RegionExpr,
    surface_cache: SmallVec<[SurfaceHandle; 8]>,
    description: Option<String>,
}

impl Cell {
    fn from_spec(spec: CellSpec) -> Self {
        let surface_cache = spec.boundary.surfaces();
        Self {
            material: spec.material,
            density: spec.density,
            temperature: spec.temperature,
            importance: spec.importance,
            boundary: spec.boundary,
            surface_cache,
            description: spec.description,
        }
    }

    /// Material id, 0 for void.
    #[must_use]
    pub fn material(&self) -> u32 {
        self.material
    }

    /// Density in the deck's unit convention.
    #[must_use]
    pub fn density(&self) -> f64 {
        self.density
    }

    /// Temperature in kelvin.
    #[must_use]
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Whether tracked rays continue through this cell.
    #[must_use]
    pub fn importance(&self) -> bool {
        self.importance
    }

    /// The boundary expression.
    #[must_use]
    pub fn boundary(&self) -> &RegionExpr {
        &self.boundary
    }

    /// Cached flat list of surfaces referenced by the boundary.
    #[must_use]
    pub fn surfaces(&self) -> &[SurfaceHandle] {
        &self.surface_cache
    }

    /// Description for volume reports, empty when unset.
    #[must_use]
    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }

    fn set_boundary(&mut self, boundary: RegionExpr) {
        self.surface_cache = boundary.surfaces();
        self.boundary = boundary;
    }

    /// Renders the cell as one deck line:
    /// `<handle> <material> <density> <boundary-text>`.
    #[must_use]
    pub fn render(&self, handle: CellHandle) -> String {
        format!(
            "{handle} {} {} {}",
            self.material,
            self.density,
            self.boundary.render()
        )
    }
}

/// Store of all cells in a model.
///
/// Handles are assigned from a monotonically increasing counter,
/// optionally partitioned into reserved numeric blocks per subsystem so
/// independently built components never collide. Cells are created in a
/// single sequential build pass and may be bulk-renumbered exactly once
/// near its end.
#[derive(Debug)]
pub struct CellRegistry {
    cells: BTreeMap<CellHandle, Cell>,
    next: u32,
    reserved: Vec<(u32, u32)>,
    frozen: bool,
    renumbered: bool,
    generation: u64,
}

impl Default for CellRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CellRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cells: BTreeMap::new(),
            next: 1,
            reserved: Vec::new(),
            frozen: false,
            renumbered: false,
            generation: 0,
        }
    }

    /// Number of live cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the registry holds no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Generation counter, bumped by any boundary or handle mutation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reserves the handle block `[start, start + len)` for a subsystem.
    ///
    /// The default counter skips reserved blocks; cells are placed in a
    /// block with [`create_cell_in_block`](Self::create_cell_in_block).
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::CollidingMapping`] if the block overlaps an
    /// existing reservation or an already-issued handle.
    pub fn reserve_block(&mut self, start: u32, len: u32) -> Result<()> {
        if start == 0 || len == 0 {
            return Err(
                BuildError::CollidingMapping(format!("empty block {start}+{len}")).into(),
            );
        }
        let end = start.saturating_add(len);
        for &(s, l) in &self.reserved {
            if start < s.saturating_add(l) && s < end {
                return Err(BuildError::CollidingMapping(format!(
                    "block {start}+{len} overlaps {s}+{l}"
                ))
                .into());
            }
        }
        if self.cells.keys().any(|h| h.0 >= start && h.0 < end) {
            return Err(BuildError::CollidingMapping(format!(
                "block {start}+{len} overlaps issued handles"
            ))
            .into());
        }
        self.reserved.push((start, len));
        Ok(())
    }

    fn in_reserved(&self, value: u32) -> bool {
        self.reserved
            .iter()
            .any(|&(s, l)| value >= s && value < s.saturating_add(l))
    }

    /// Registers a cell, assigning the next free handle outside every
    /// reserved block.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::DanglingSurfaceReference`] if the boundary
    /// cites a surface missing from `surfaces` (fatal: later stages
    /// assume full referential integrity), or
    /// [`BuildError::ModelFrozen`] after [`freeze`](Self::freeze).
    pub fn create_cell(
        &mut self,
        surfaces: &SurfaceRegistry,
        spec: CellSpec,
    ) -> Result<CellHandle> {
        if self.frozen {
            return Err(BuildError::ModelFrozen("create_cell after freeze").into());
        }
        spec.boundary.check_references(surfaces)?;
        while self.in_reserved(self.next) || self.cells.contains_key(&CellHandle(self.next)) {
            self.next += 1;
        }
        let handle = CellHandle(self.next);
        self.next += 1;
        self.cells.insert(handle, Cell::from_spec(spec));
        Ok(handle)
    }

    /// Registers a cell inside a previously reserved block.
    ///
    /// # Errors
    ///
    /// As [`create_cell`](Self::create_cell); additionally returns
    /// [`BuildError::CollidingMapping`] if `block_start` names no
    /// reservation or the block is full.
    pub fn create_cell_in_block(
        &mut self,
        surfaces: &SurfaceRegistry,
        block_start: u32,
        spec: CellSpec,
    ) -> Result<CellHandle> {
        if self.frozen {
            return Err(BuildError::ModelFrozen("create_cell after freeze").into());
        }
        spec.boundary.check_references(surfaces)?;
        let &(start, len) = self
            .reserved
            .iter()
            .find(|&&(s, _)| s == block_start)
            .ok_or_else(|| {
                BuildError::CollidingMapping(format!("no reserved block at {block_start}"))
            })?;
        let handle = (start..start.saturating_add(len))
            .map(CellHandle)
            .find(|h| !self.cells.contains_key(h))
            .ok_or_else(|| BuildError::CollidingMapping(format!("block {start}+{len} is full")))?;
        self.cells.insert(handle, Cell::from_spec(spec));
        Ok(handle)
    }

    /// Looks up a cell by handle.
    #[must_use]
    pub fn get(&self, handle: CellHandle) -> Option<&Cell> {
        self.cells.get(&handle)
    }

    /// Whether `handle` names a live cell.
    #[must_use]
    pub fn contains(&self, handle: CellHandle) -> bool {
        self.cells.contains_key(&handle)
    }

    /// Iterates cells in handle order.
    pub fn iter(&self) -> impl Iterator<Item = (CellHandle, &Cell)> {
        self.cells.iter().map(|(&h, c)| (h, c))
    }

    /// Rewrites `container`'s boundary to carve out `exclude`:
    /// the new boundary is the old one intersected with `exclude`.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::ModelFrozen`] after freeze,
    /// [`BuildError::DanglingSurfaceReference`] if `exclude` cites an
    /// unknown surface, or [`BuildError::CollidingMapping`] if
    /// `container` is not live.
    pub fn insert_component(
        &mut self,
        surfaces: &SurfaceRegistry,
        container: CellHandle,
        exclude: &RegionExpr,
    ) -> Result<()> {
        if self.frozen {
            return Err(BuildError::ModelFrozen("insert_component after freeze").into());
        }
        exclude.check_references(surfaces)?;
        let cell = self.cells.get_mut(&container).ok_or_else(|| {
            BuildError::CollidingMapping(format!("container cell {container} is not live"))
        })?;
        let carved = cell.boundary.clone().intersect(exclude.clone());
        cell.set_boundary(carved);
        self.generation += 1;
        Ok(())
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

    /// Bulk-renumbers cells, all-or-nothing.
    ///
    /// `mapping` sends old handles to new handles; live handles absent
    /// from the mapping keep their number. During the build pass this
    /// may run freely; once the registry is frozen it is the single
    /// permitted mutation and runs exactly once. Every cross-reference
    /// held outside the registry (adjacency index, cached lookups) is
    /// invalidated through the generation counter and must be rebuilt.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::CollidingMapping`], with the whole
    /// operation rejected and the registry untouched, if a key is not
    /// live, two handles map to the same target, or a target collides
    /// with an unmapped live handle. Returns [`BuildError::ModelFrozen`]
    /// on a second post-freeze invocation.
    pub fn renumber_all(&mut self, mapping: &FxHashMap<CellHandle, CellHandle>) -> Result<()> {
        if self.renumbered {
            return Err(BuildError::ModelFrozen("renumber_all already applied").into());
        }
        let mut targets: FxHashSet<CellHandle> = FxHashSet::default();
        for (&old, &new) in mapping {
            if !self.cells.contains_key(&old) {
                return Err(
                    BuildError::CollidingMapping(format!("handle {old} is not live")).into(),
                );
            }
            if new.0 == 0 {
                return Err(BuildError::CollidingMapping("handle 0 is never issued".into()).into());
            }
            if !targets.insert(new) {
                return Err(
                    BuildError::CollidingMapping(format!("two cells map to {new}")).into(),
                );
            }
        }
        for &live in self.cells.keys() {
            if !mapping.contains_key(&live) && targets.contains(&live) {
                return Err(BuildError::CollidingMapping(format!(
                    "target {live} collides with an unmapped live handle"
                ))
                .into());
            }
        }

        let old_cells = std::mem::take(&mut self.cells);
        for (old, cell) in old_cells {
            let new = mapping.get(&old).copied().unwrap_or(old);
            self.cells.insert(new, cell);
        }
        if self.frozen {
            self.renumbered = true;
        }
        self.generation += 1;
        Ok(())
    }

    /// Renders every cell, one deck line each, in handle order.
    #[must_use]
    pub fn render_all(&self) -> String {
        let mut out = String::new();
        for (handle, cell) in self.iter() {
            out.push_str(&cell.render(handle));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::region::RegionExpr;
    use crate::surface::SurfaceKind;

    fn slab_registry() -> (SurfaceRegistry, RegionExpr) {
        let mut reg = SurfaceRegistry::new();
        let a = reg.register(SurfaceKind::axis_plane(0, -1.0).unwrap()).unwrap();
        let b = reg.register(SurfaceKind::axis_plane(0, 1.0).unwrap()).unwrap();
        let slab = RegionExpr::positive(a).intersect(RegionExpr::negative(b));
        (reg, slab)
    }

    #[test]
    fn handles_are_sequential_from_one() {
        let (reg, slab) = slab_registry();
        let mut cells = CellRegistry::new();
        let c1 = cells.create_cell(&reg, CellSpec::void(slab.clone())).unwrap();
        let c2 = cells.create_cell(&reg, CellSpec::new(5, 2.7, slab)).unwrap();
        assert_eq!(c1, CellHandle(1));
        assert_eq!(c2, CellHandle(2));
    }

    #[test]
    fn dangling_boundary_is_fatal() {
        let (reg, _) = slab_registry();
        let mut cells = CellRegistry::new();
        let bad = RegionExpr::positive(SurfaceHandle(99));
        assert!(cells.create_cell(&reg, CellSpec::void(bad)).is_err());
        assert!(cells.is_empty());
    }

    #[test]
    fn reserved_blocks_are_skipped_by_default_counter() {
        let (reg, slab) = slab_registry();
        let mut cells = CellRegistry::new();
        cells.reserve_block(1, 10).unwrap();
        let free = cells.create_cell(&reg, CellSpec::void(slab.clone())).unwrap();
        assert_eq!(free, CellHandle(11));
        let blocked = cells
            .create_cell_in_block(&reg, 1, CellSpec::void(slab))
            .unwrap();
        assert_eq!(blocked, CellHandle(1));
    }

    #[test]
    fn overlapping_block_rejected() {
        let mut cells = CellRegistry::new();
        cells.reserve_block(100, 50).unwrap();
        assert!(cells.reserve_block(120, 10).is_err());
        assert!(cells.reserve_block(0, 5).is_err());
    }

    #[test]
    fn insert_component_carves_container() {
        let (mut reg, slab) = slab_registry();
        let hole = reg
            .register(SurfaceKind::sphere(crate::math::Point3::origin(), 0.5).unwrap())
            .unwrap();
        let mut cells = CellRegistry::new();
        let container = cells.create_cell(&reg, CellSpec::void(slab)).unwrap();
        let before = cells.generation();
        cells
            .insert_component(&reg, container, &RegionExpr::positive(hole))
            .unwrap();
        assert!(cells.generation() > before);
        let cell = cells.get(container).unwrap();
        assert!(cell.surfaces().contains(&hole));
        assert!(!cell
            .boundary()
            .evaluate(&reg, &crate::math::Point3::origin())
            .unwrap());
    }

    #[test]
    fn renumber_is_all_or_nothing() {
        let (reg, slab) = slab_registry();
        let mut cells = CellRegistry::new();
        let c1 = cells.create_cell(&reg, CellSpec::void(slab.clone())).unwrap();
        let c2 = cells.create_cell(&reg, CellSpec::void(slab)).unwrap();

        // Two cells mapped to the same target: rejected, nothing moves.
        let mut bad = FxHashMap::default();
        bad.insert(c1, CellHandle(50));
        bad.insert(c2, CellHandle(50));
        assert!(cells.renumber_all(&bad).is_err());
        assert!(cells.contains(c1) && cells.contains(c2));

        // Target collides with an unmapped live handle.
        let mut bad = FxHashMap::default();
        bad.insert(c1, c2);
        assert!(cells.renumber_all(&bad).is_err());

        let mut good = FxHashMap::default();
        good.insert(c1, CellHandle(100));
        good.insert(c2, CellHandle(200));
        cells.renumber_all(&good).unwrap();
        assert!(cells.contains(CellHandle(100)));
        assert!(cells.contains(CellHandle(200)));
        assert!(!cells.contains(c1));
    }

    #[test]
    fn renumber_runs_at_most_once_after_freeze() {
        let (reg, slab) = slab_registry();
        let mut cells = CellRegistry::new();
        let c1 = cells.create_cell(&reg, CellSpec::void(slab)).unwrap();
        cells.freeze();
        let mut mapping = FxHashMap::default();
        mapping.insert(c1, CellHandle(9));
        cells.renumber_all(&mapping).unwrap();
        assert!(cells.renumber_all(&mapping).is_err());
    }

    #[test]
    fn renumber_then_inverse_restores_deck_text() {
        let (reg, slab) = slab_registry();
        let mut cells = CellRegistry::new();
        let c1 = cells.create_cell(&reg, CellSpec::new(3, 1.0, slab.clone())).unwrap();
        let c2 = cells
            .create_cell(&reg, CellSpec::new(8, 0.9, slab.complement()))
            .unwrap();
        let original = cells.render_all();

        let mut fwd = FxHashMap::default();
        fwd.insert(c1, CellHandle(77));
        fwd.insert(c2, CellHandle(33));
        cells.renumber_all(&fwd).unwrap();
        assert_ne!(cells.render_all(), original);

        let mut back = FxHashMap::default();
        back.insert(CellHandle(77), c1);
        back.insert(CellHandle(33), c2);
        cells.renumber_all(&back).unwrap();
        assert_eq!(cells.render_all(), original);
    }

    #[test]
    fn create_after_freeze_fails() {
        let (reg, slab) = slab_registry();
        let mut cells = CellRegistry::new();
        cells.freeze();
        assert!(cells.create_cell(&reg, CellSpec::void(slab)).is_err());
    }

    #[test]
    fn render_line_layout() {
        let (reg, slab) = slab_registry();
        let mut cells = CellRegistry::new();
        let c = cells
            .create_cell(&reg, CellSpec::new(4, 7.86, slab))
            .unwrap();
        assert_eq!(cells.get(c).unwrap().render(c), "1 4 7.86 1 -2");
    }
}
