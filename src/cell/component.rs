use crate::error::Result;
use crate::region::RegionExpr;
use crate::surface::SurfaceRegistry;

use super::{CellHandle, CellRegistry};

/// A higher-level geometric object: one or more owned cells, an outer
/// envelope expression, and the list of container cells it must be
/// carved out of.
///
/// Insertion is idempotent: applying the insert step drains the list,
/// so re-running it is a no-op, never an error.
#[derive(Debug, Clone)]
pub struct Component {
    name: String,
    cells: Vec<CellHandle>,
    outer: RegionExpr,
    insert_into: Vec<CellHandle>,
}

impl Component {
    /// Creates a component with the given outer envelope.
    #[must_use]
    pub fn new(name: impl Into<String>, outer: RegionExpr) -> Self {
        Self {
            name: name.into(),
            cells: Vec::new(),
            outer,
            insert_into: Vec::new(),
        }
    }

    /// The component's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The outer envelope expression.
    #[must_use]
    pub fn outer(&self) -> &RegionExpr {
        &self.outer
    }

    /// Cells owned by this component.
    #[must_use]
    pub fn cells(&self) -> &[CellHandle] {
        &self.cells
    }

    /// Records a cell as owned by this component.
    pub fn add_cell(&mut self, cell: CellHandle) {
        self.cells.push(cell);
    }

    /// Queues `container` to have this component carved out of it.
    pub fn add_insert(&mut self, container: CellHandle) {
        if !self.insert_into.contains(&container) {
            self.insert_into.push(container);
        }
    }

    /// Containers still waiting for the insert step.
    #[must_use]
    pub fn pending_inserts(&self) -> &[CellHandle] {
        &self.insert_into
    }

    /// The expression other builders intersect into a container cell to
    /// carve this component out: the complement of the outer envelope.
    #[must_use]
    pub fn exclude_expr(&self) -> RegionExpr {
        self.outer.complement().simplify()
    }

    /// Deck text of [`exclude_expr`](Self::exclude_expr), consumed
    /// verbatim by [`CellRegistry::insert_component`] callers.
    #[must_use]
    pub fn exclude_text(&self) -> String {
        self.exclude_expr().render()
    }

    /// Carves this component out of every queued container, draining
    /// the queue. Returns the number of containers rewritten.
    ///
    /// # Errors
    ///
    /// Build-time failures from
    /// [`CellRegistry::insert_component`]; the queue entry for a failed
    /// container is retained so the build aborts without losing track
    /// of pending work.
    pub fn apply_inserts(
        &mut self,
        surfaces: &SurfaceRegistry,
        cells: &mut CellRegistry,
    ) -> Result<usize> {
        let exclude = self.exclude_expr();
        let mut applied = 0;
        while let Some(&container) = self.insert_into.first() {
            cells.insert_component(surfaces, container, &exclude)?;
            self.insert_into.remove(0);
            applied += 1;
        }
        Ok(applied)
    }
}
