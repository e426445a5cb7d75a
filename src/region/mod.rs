mod parse;

pub use parse::parse;

use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::Result;
use crate::math::Point3;
use crate::surface::{Side, SurfaceHandle, SurfaceRegistry};

/// Orientation of a surface reference inside a boundary expression.
///
/// A positive literal is satisfied where the implicit function is
/// non-negative, a negative literal where it is non-positive. The two
/// half-spaces are closed: a point within tolerance of the surface
/// satisfies both orientations, which is what keeps a point exactly on
/// a shared boundary from belonging to neither adjoining region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sense {
    Positive,
    Negative,
}

impl Sense {
    /// The opposite orientation.
    #[must_use]
    pub fn flipped(self) -> Self {
        match self {
            Self::Positive => Self::Negative,
            Self::Negative => Self::Positive,
        }
    }
}

/// A surface handle with an orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignedSurface {
    pub surface: SurfaceHandle,
    pub sense: Sense,
}

impl SignedSurface {
    /// A reference to the positive side of `surface`.
    #[must_use]
    pub fn positive(surface: SurfaceHandle) -> Self {
        Self {
            surface,
            sense: Sense::Positive,
        }
    }

    /// A reference to the negative side of `surface`.
    #[must_use]
    pub fn negative(surface: SurfaceHandle) -> Self {
        Self {
            surface,
            sense: Sense::Negative,
        }
    }

    /// The same surface with the opposite orientation.
    #[must_use]
    pub fn flipped(self) -> Self {
        Self {
            surface: self.surface,
            sense: self.sense.flipped(),
        }
    }

    fn satisfied_by(self, side: Side) -> bool {
        match (side, self.sense) {
            // The tolerance band belongs to both closed half-spaces.
            (Side::On, _) => true,
            (Side::Positive, Sense::Positive) | (Side::Negative, Sense::Negative) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SignedSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sense {
            Sense::Positive => write!(f, "{}", self.surface),
            Sense::Negative => write!(f, "-{}", self.surface),
        }
    }
}

/// Boolean rule tree over signed surface handles.
///
/// Trees are read-only after construction; subtrees are shared through
/// `Rc`, so cloning is cheap.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionExpr {
    Literal(SignedSurface),
    And(Rc<RegionExpr>, Rc<RegionExpr>),
    Or(Rc<RegionExpr>, Rc<RegionExpr>),
    Not(Rc<RegionExpr>),
    /// The whole of space.
    Always,
    /// The empty region.
    Never,
}

impl RegionExpr {
    /// A single positive-sense literal.
    #[must_use]
    pub fn positive(surface: SurfaceHandle) -> Self {
        Self::Literal(SignedSurface::positive(surface))
    }

    /// A single negative-sense literal.
    #[must_use]
    pub fn negative(surface: SurfaceHandle) -> Self {
        Self::Literal(SignedSurface::negative(surface))
    }

    /// Intersection, with `Always`/`Never` absorbed.
    #[must_use]
    pub fn intersect(self, other: Self) -> Self {
        match (self, other) {
            (Self::Never, _) | (_, Self::Never) => Self::Never,
            (Self::Always, x) | (x, Self::Always) => x,
            (a, b) => Self::And(Rc::new(a), Rc::new(b)),
        }
    }

    /// Union, with `Always`/`Never` absorbed.
    #[must_use]
    pub fn unite(self, other: Self) -> Self {
        match (self, other) {
            (Self::Always, _) | (_, Self::Always) => Self::Always,
            (Self::Never, x) | (x, Self::Never) => x,
            (a, b) => Self::Or(Rc::new(a), Rc::new(b)),
        }
    }

    /// De Morgan negation, pushed down to the literals.
    ///
    /// Used to build the outer-exclude expression inserted into a
    /// container's boundary when a component is placed inside it.
    #[must_use]
    pub fn complement(&self) -> Self {
        match self {
            Self::Literal(lit) => Self::Literal(lit.flipped()),
            Self::And(l, r) => Self::Or(Rc::new(l.complement()), Rc::new(r.complement())),
            Self::Or(l, r) => Self::And(Rc::new(l.complement()), Rc::new(r.complement())),
            Self::Not(x) => (**x).clone(),
            Self::Always => Self::Never,
            Self::Never => Self::Always,
        }
    }

    /// Evaluates the expression at `point`, short-circuiting `And`/`Or`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::BuildError::DanglingSurfaceReference`] if
    /// a literal names a surface missing from `registry`.
    pub fn evaluate(&self, registry: &SurfaceRegistry, point: &Point3) -> Result<bool> {
        match self {
            Self::Literal(lit) => {
                let side = registry.side(lit.surface, point)?;
                Ok(lit.satisfied_by(side))
            }
            Self::And(l, r) => Ok(l.evaluate(registry, point)? && r.evaluate(registry, point)?),
            Self::Or(l, r) => Ok(l.evaluate(registry, point)? || r.evaluate(registry, point)?),
            Self::Not(x) => Ok(!x.evaluate(registry, point)?),
            Self::Always => Ok(true),
            Self::Never => Ok(false),
        }
    }

    /// Structural simplification.
    ///
    /// Collapses double negation, absorbs `Always`/`Never`, and removes
    /// literals made redundant by a sibling literal on the same surface
    /// within one `And`/`Or` chain: a duplicate collapses, an opposed
    /// pair makes the chain `Never` (intersection) or `Always` (union).
    /// No general satisfiability reasoning is attempted.
    #[must_use]
    pub fn simplify(&self) -> Self {
        match self {
            Self::Not(x) => match x.simplify() {
                Self::Not(inner) => (*inner).clone(),
                Self::Always => Self::Never,
                Self::Never => Self::Always,
                other => Self::Not(Rc::new(other)),
            },
            Self::And(..) => simplify_chain(self, true),
            Self::Or(..) => simplify_chain(self, false),
            other => other.clone(),
        }
    }

    /// Flat, deduplicated list of every surface handle in the tree.
    ///
    /// Cached per cell for fast ray intersection.
    #[must_use]
    pub fn surfaces(&self) -> SmallVec<[SurfaceHandle; 8]> {
        let mut out = SmallVec::new();
        self.collect_surfaces(&mut out);
        out
    }

    fn collect_surfaces(&self, out: &mut SmallVec<[SurfaceHandle; 8]>) {
        match self {
            Self::Literal(lit) => {
                if !out.contains(&lit.surface) {
                    out.push(lit.surface);
                }
            }
            Self::And(l, r) | Self::Or(l, r) => {
                l.collect_surfaces(out);
                r.collect_surfaces(out);
            }
            Self::Not(x) => x.collect_surfaces(out),
            Self::Always | Self::Never => {}
        }
    }

    /// Checks that every literal names a surface present in `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::BuildError::DanglingSurfaceReference`]
    /// naming the first missing handle.
    pub fn check_references(&self, registry: &SurfaceRegistry) -> Result<()> {
        for handle in self.surfaces() {
            if !registry.contains(handle) {
                return Err(crate::error::BuildError::DanglingSurfaceReference(handle).into());
            }
        }
        Ok(())
    }

    /// Renders the expression in deck syntax.
    ///
    /// Space-separated signed handles, juxtaposition for intersection,
    /// `:` for union, `#(...)` for complement. `parse` round-trips this
    /// output byte-for-byte.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, Precedence::Or);
        out
    }

    fn render_into(&self, out: &mut String, parent: Precedence) {
        match self {
            Self::Literal(lit) => {
                use std::fmt::Write;
                let _ = write!(out, "{lit}");
            }
            Self::And(l, r) => {
                let wrap = parent > Precedence::And;
                if wrap {
                    out.push('(');
                }
                l.render_into(out, Precedence::And);
                out.push(' ');
                r.render_into(out, Precedence::And);
                if wrap {
                    out.push(')');
                }
            }
            Self::Or(l, r) => {
                let wrap = parent > Precedence::Or;
                if wrap {
                    out.push('(');
                }
                l.render_into(out, Precedence::Or);
                out.push_str(" : ");
                r.render_into(out, Precedence::Or);
                if wrap {
                    out.push(')');
                }
            }
            Self::Not(x) => {
                out.push_str("#(");
                x.render_into(out, Precedence::Or);
                out.push(')');
            }
            Self::Always => out.push('T'),
            Self::Never => out.push('F'),
        }
    }
}

/// Binding strength used when rendering: `And` binds tighter than `Or`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Or,
    And,
}

/// Simplifies one `And` (`conjunction = true`) or `Or` chain.
fn simplify_chain(expr: &RegionExpr, conjunction: bool) -> RegionExpr {
    let mut literals: Vec<SignedSurface> = Vec::new();
    let mut others: Vec<RegionExpr> = Vec::new();
    if !flatten_chain(expr, conjunction, &mut literals, &mut others) {
        // An opposed same-surface pair collapses the whole chain.
        return if conjunction {
            RegionExpr::Never
        } else {
            RegionExpr::Always
        };
    }

    let unit = if conjunction {
        RegionExpr::Always
    } else {
        RegionExpr::Never
    };

    let mut result = unit;
    for lit in literals {
        let node = RegionExpr::Literal(lit);
        result = if conjunction {
            result.intersect(node)
        } else {
            result.unite(node)
        };
    }
    for other in others {
        result = if conjunction {
            result.intersect(other)
        } else {
            result.unite(other)
        };
    }
    result
}

/// Flattens a same-operator chain, simplifying children as it goes.
///
/// Returns `false` when an opposed same-surface literal pair is found.
fn flatten_chain(
    expr: &RegionExpr,
    conjunction: bool,
    literals: &mut Vec<SignedSurface>,
    others: &mut Vec<RegionExpr>,
) -> bool {
    let (left, right) = match (expr, conjunction) {
        (RegionExpr::And(l, r), true) | (RegionExpr::Or(l, r), false) => (&**l, &**r),
        _ => {
            match expr.simplify() {
                RegionExpr::Literal(lit) => {
                    if literals.contains(&lit) {
                        // Duplicate literal in the same chain is redundant.
                        return true;
                    }
                    if literals.contains(&lit.flipped()) {
                        return false;
                    }
                    literals.push(lit);
                }
                RegionExpr::Always => {
                    if !conjunction {
                        others.push(RegionExpr::Always);
                    }
                }
                RegionExpr::Never => {
                    if conjunction {
                        others.push(RegionExpr::Never);
                    }
                }
                other => others.push(other),
            }
            return true;
        }
    };
    flatten_chain(left, conjunction, literals, others)
        && flatten_chain(right, conjunction, literals, others)
}
