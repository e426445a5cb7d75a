use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::cell::CellHandle;
use crate::error::{Result, TrackError};
use crate::model::GeometryModel;
use crate::surface::SurfaceHandle;

/// Surface-to-neighbouring-cell lookup, built once the geometry is
/// frozen.
///
/// For a ray leaving cell `c` through surface `s`, the candidates are
/// the other cells whose boundary also references `s`, which avoids a
/// linear scan over every cell at each crossing. The index records the
/// model generation it was built against and refuses lookups once the
/// model has moved on; it is rebuilt, never incrementally patched.
#[derive(Debug)]
pub struct AdjacencyIndex {
    neighbours: FxHashMap<(SurfaceHandle, CellHandle), SmallVec<[CellHandle; 2]>>,
    generation: u64,
}

impl AdjacencyIndex {
    /// Builds the index over the model's live cells.
    #[must_use]
    pub fn build(model: &GeometryModel) -> Self {
        let mut by_surface: FxHashMap<SurfaceHandle, SmallVec<[CellHandle; 4]>> =
            FxHashMap::default();
        for (cell, data) in model.cells().iter() {
            for &surface in data.surfaces() {
                by_surface.entry(surface).or_default().push(cell);
            }
        }

        let mut neighbours: FxHashMap<(SurfaceHandle, CellHandle), SmallVec<[CellHandle; 2]>> =
            FxHashMap::default();
        for (&surface, sharers) in &by_surface {
            for &from in sharers {
                let others: SmallVec<[CellHandle; 2]> =
                    sharers.iter().copied().filter(|&c| c != from).collect();
                if !others.is_empty() {
                    neighbours.insert((surface, from), others);
                }
            }
        }

        Self {
            neighbours,
            generation: model.generation(),
        }
    }

    /// Generation of the model this index was built against.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Candidate cells on the far side of `surface` when leaving `from`.
    ///
    /// An empty slice is a valid answer: the far side may lie outside
    /// the model, or in a cell that does not reference `surface`.
    ///
    /// # Errors
    ///
    /// Returns [`TrackError::StaleAdjacency`] if the model has mutated
    /// since the index was built.
    pub fn neighbours(
        &self,
        model: &GeometryModel,
        surface: SurfaceHandle,
        from: CellHandle,
    ) -> Result<&[CellHandle]> {
        let current = model.generation();
        if current != self.generation {
            return Err(TrackError::StaleAdjacency {
                built: self.generation,
                current,
            }
            .into());
        }
        Ok(self
            .neighbours
            .get(&(surface, from))
            .map_or(&[][..], SmallVec::as_slice))
    }
}
