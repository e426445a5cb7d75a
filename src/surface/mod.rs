mod registry;

pub use registry::SurfaceRegistry;

use std::fmt;

use crate::error::{BuildError, Result};
use crate::math::{real_quadratic_roots, Matrix3, Point3, RigidTransform, Vector3};

/// Opaque numeric handle to a registry-owned surface.
///
/// The magnitude is the registry key; orientation at use sites is
/// carried separately by [`crate::region::SignedSurface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceHandle(pub u32);

impl fmt::Display for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of a surface a point lies on.
///
/// `On` is returned, never silently rounded to one side, whenever the
/// implicit-function value is within the classification tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Positive,
    Negative,
    On,
}

/// A half-space primitive, the leaf of all region geometry.
///
/// Every kind divides space by the sign of an implicit function:
/// positive on one side, negative on the other. Planes are positive on
/// the normal side; spheres and cylinders are positive outside.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceKind {
    /// `normal . p - offset = 0`, with a unit normal.
    Plane { normal: Vector3, offset: f64 },
    /// Infinite circular cylinder around the line `point + t * axis`,
    /// with a unit axis.
    Cylinder {
        point: Point3,
        axis: Vector3,
        radius: f64,
    },
    Sphere { center: Point3, radius: f64 },
    /// General second-order surface
    /// `A x^2 + B y^2 + C z^2 + D xy + E yz + F zx + G x + H y + J z + K = 0`,
    /// covering cones and other quadratics the named kinds cannot express.
    Quadric { coeffs: [f64; 10] },
}

impl SurfaceKind {
    /// Builds a plane from an unnormalized normal and a point on it.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::DegenerateGeometry`] if the normal is
    /// zero-length or non-finite.
    pub fn plane(normal: Vector3, through: Point3) -> Result<Self> {
        let len = normal.norm();
        if !len.is_finite() || len < f64::EPSILON {
            return Err(BuildError::DegenerateGeometry("plane normal is zero-length".into()).into());
        }
        let normal = normal / len;
        Ok(Self::Plane {
            normal,
            offset: normal.dot(&through.coords),
        })
    }

    /// Builds an axis-aligned plane `p[axis] = value` with `axis` being
    /// 0, 1 or 2 for x, y, z.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::DegenerateGeometry`] if `value` is non-finite
    /// or `axis` is out of range.
    pub fn axis_plane(axis: usize, value: f64) -> Result<Self> {
        if !value.is_finite() || axis > 2 {
            return Err(
                BuildError::DegenerateGeometry(format!("axis plane {axis} at {value}")).into(),
            );
        }
        let mut normal = Vector3::zeros();
        normal[axis] = 1.0;
        Ok(Self::Plane {
            normal,
            offset: value,
        })
    }

    /// Builds an infinite cylinder around `point + t * axis`.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::DegenerateGeometry`] if the axis is
    /// zero-length or the radius is not strictly positive.
    pub fn cylinder(point: Point3, axis: Vector3, radius: f64) -> Result<Self> {
        let len = axis.norm();
        if !len.is_finite() || len < f64::EPSILON {
            return Err(
                BuildError::DegenerateGeometry("cylinder axis is zero-length".into()).into(),
            );
        }
        if !radius.is_finite() || radius <= 0.0 {
            return Err(
                BuildError::DegenerateGeometry(format!("cylinder radius {radius}")).into(),
            );
        }
        Ok(Self::Cylinder {
            point,
            axis: axis / len,
            radius,
        })
    }

    /// Builds a sphere.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::DegenerateGeometry`] if the radius is not
    /// strictly positive or the center is non-finite.
    pub fn sphere(center: Point3, radius: f64) -> Result<Self> {
        if !center.coords.iter().all(|c| c.is_finite()) || !radius.is_finite() || radius <= 0.0 {
            return Err(BuildError::DegenerateGeometry(format!("sphere radius {radius}")).into());
        }
        Ok(Self::Sphere { center, radius })
    }

    /// Builds a general quadric from its ten coefficients.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::DegenerateGeometry`] if any coefficient is
    /// non-finite or every second- and first-order coefficient is zero.
    pub fn quadric(coeffs: [f64; 10]) -> Result<Self> {
        if !coeffs.iter().all(|c| c.is_finite()) {
            return Err(BuildError::DegenerateGeometry("quadric coefficient".into()).into());
        }
        if coeffs[..9].iter().all(|c| c.abs() < f64::EPSILON) {
            return Err(BuildError::DegenerateGeometry("quadric has no variation".into()).into());
        }
        Ok(Self::Quadric { coeffs })
    }

    /// Evaluates the implicit function at `point`.
    ///
    /// Plane, sphere and cylinder values are signed distances, so a
    /// single tolerance band is meaningful across kinds; the quadric
    /// value is the raw polynomial.
    #[must_use]
    pub fn implicit(&self, point: &Point3) -> f64 {
        match self {
            Self::Plane { normal, offset } => normal.dot(&point.coords) - offset,
            Self::Cylinder {
                point: base,
                axis,
                radius,
            } => {
                let w = point - base;
                let radial = w - axis * w.dot(axis);
                radial.norm() - radius
            }
            Self::Sphere { center, radius } => (point - center).norm() - radius,
            Self::Quadric { coeffs } => {
                let (q, l, k) = quadric_form(coeffs);
                (q * point.coords).dot(&point.coords) + l.dot(&point.coords) + k
            }
        }
    }

    /// Gradient of the implicit function at `point`.
    ///
    /// Points towards the positive side; not normalized.
    #[must_use]
    pub fn gradient(&self, point: &Point3) -> Vector3 {
        match self {
            Self::Plane { normal, .. } => *normal,
            Self::Cylinder {
                point: base, axis, ..
            } => {
                let w = point - base;
                let radial = w - axis * w.dot(axis);
                let len = radial.norm();
                if len < f64::EPSILON {
                    Vector3::zeros()
                } else {
                    radial / len
                }
            }
            Self::Sphere { center, .. } => {
                let w = point - center;
                let len = w.norm();
                if len < f64::EPSILON {
                    Vector3::zeros()
                } else {
                    w / len
                }
            }
            Self::Quadric { coeffs } => {
                let (q, l, _) = quadric_form(coeffs);
                2.0 * (q * point.coords) + l
            }
        }
    }

    /// Real roots `t` of `implicit(origin + t * dir) = 0`, ascending.
    ///
    /// Roots at any sign of `t` are returned; callers filter for the
    /// forward half-line.
    #[must_use]
    pub fn ray_roots(&self, origin: &Point3, dir: &Vector3, tol: f64) -> Vec<f64> {
        match self {
            Self::Plane { normal, offset } => {
                let denom = normal.dot(dir);
                if denom.abs() < tol {
                    Vec::new()
                } else {
                    vec![(offset - normal.dot(&origin.coords)) / denom]
                }
            }
            Self::Cylinder {
                point: base,
                axis,
                radius,
            } => {
                let w = origin - base;
                let wp = w - axis * w.dot(axis);
                let dp = dir - axis * dir.dot(axis);
                real_quadratic_roots(
                    dp.dot(&dp),
                    2.0 * wp.dot(&dp),
                    wp.dot(&wp) - radius * radius,
                    tol,
                )
            }
            Self::Sphere { center, radius } => {
                let w = origin - center;
                real_quadratic_roots(
                    dir.dot(dir),
                    2.0 * w.dot(dir),
                    w.dot(&w) - radius * radius,
                    tol,
                )
            }
            Self::Quadric { coeffs } => {
                let (q, l, k) = quadric_form(coeffs);
                let o = origin.coords;
                let a2 = (q * dir).dot(dir);
                let a1 = 2.0 * (q * o).dot(dir) + l.dot(dir);
                let a0 = (q * o).dot(&o) + l.dot(&o) + k;
                real_quadratic_roots(a2, a1, a0, tol)
            }
        }
    }

    /// Applies a rigid transform to the surface, returning the moved kind.
    #[must_use]
    pub fn transformed(&self, tf: &RigidTransform) -> Self {
        match self {
            Self::Plane { normal, offset } => {
                let normal = tf.apply_vector(normal);
                // A point on the old plane, moved, stays on the new one.
                let offset = offset + normal.dot(&tf.translation);
                Self::Plane { normal, offset }
            }
            Self::Cylinder {
                point,
                axis,
                radius,
            } => Self::Cylinder {
                point: tf.apply_point(point),
                axis: tf.apply_vector(axis),
                radius: *radius,
            },
            Self::Sphere { center, radius } => Self::Sphere {
                center: tf.apply_point(center),
                radius: *radius,
            },
            Self::Quadric { coeffs } => {
                let (q, l, k) = quadric_form(coeffs);
                let r = *tf.rotation.matrix();
                let m = r * q * r.transpose();
                let rl = r * l;
                let t = tf.translation;
                let l2 = rl - 2.0 * (m * t);
                let k2 = (m * t).dot(&t) - rl.dot(&t) + k;
                Self::Quadric {
                    coeffs: [
                        m[(0, 0)],
                        m[(1, 1)],
                        m[(2, 2)],
                        2.0 * m[(0, 1)],
                        2.0 * m[(1, 2)],
                        2.0 * m[(0, 2)],
                        l2.x,
                        l2.y,
                        l2.z,
                        k2,
                    ],
                }
            }
        }
    }

    /// Whether two kinds describe the same physical surface within `tol`.
    ///
    /// Plane comparison accounts for the two equivalent orientations of
    /// the same geometric plane only after canonicalization at
    /// registration; here parameters are compared directly.
    #[must_use]
    pub fn coincident(&self, other: &Self, tol: f64) -> bool {
        match (self, other) {
            (
                Self::Plane { normal, offset },
                Self::Plane {
                    normal: n2,
                    offset: o2,
                },
            ) => (normal - n2).norm() < tol && (offset - o2).abs() < tol,
            (
                Self::Cylinder {
                    point,
                    axis,
                    radius,
                },
                Self::Cylinder {
                    point: p2,
                    axis: a2,
                    radius: r2,
                },
            ) => {
                // Base points may differ along the axis; compare the
                // perpendicular offset of one base from the other line.
                let axes_align = axis.cross(a2).norm() < tol;
                let w = p2 - point;
                let radial = w - axis * w.dot(axis);
                axes_align && radial.norm() < tol && (radius - r2).abs() < tol
            }
            (
                Self::Sphere { center, radius },
                Self::Sphere {
                    center: c2,
                    radius: r2,
                },
            ) => (center - c2).norm() < tol && (radius - r2).abs() < tol,
            (Self::Quadric { coeffs }, Self::Quadric { coeffs: c2 }) => coeffs
                .iter()
                .zip(c2.iter())
                .all(|(a, b)| (a - b).abs() < tol),
            _ => false,
        }
    }

    /// Canonicalizes the parameterization so that equal physical
    /// surfaces compare equal.
    ///
    /// Plane normals with a negative leading nonzero component are
    /// flipped together with the offset; cylinder axes likewise.
    #[must_use]
    pub fn canonical(self) -> Self {
        match self {
            Self::Plane { normal, offset } => {
                if leading_negative(&normal) {
                    Self::Plane {
                        normal: -normal,
                        offset: -offset,
                    }
                } else {
                    Self::Plane { normal, offset }
                }
            }
            Self::Cylinder {
                point,
                axis,
                radius,
            } => {
                let axis = if leading_negative(&axis) { -axis } else { axis };
                Self::Cylinder {
                    point,
                    axis,
                    radius,
                }
            }
            other => other,
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Self::Plane { .. } => "p",
            Self::Cylinder { .. } => "c",
            Self::Sphere { .. } => "s",
            Self::Quadric { .. } => "gq",
        }
    }
}

fn leading_negative(v: &Vector3) -> bool {
    for c in v.iter() {
        if c.abs() > f64::EPSILON {
            return *c < 0.0;
        }
    }
    false
}

/// Splits the ten quadric coefficients into the symmetric quadratic
/// matrix, the linear part and the constant.
fn quadric_form(coeffs: &[f64; 10]) -> (Matrix3, Vector3, f64) {
    let [a, b, c, d, e, f, g, h, j, k] = *coeffs;
    let q = Matrix3::new(
        a,
        d / 2.0,
        f / 2.0,
        d / 2.0,
        b,
        e / 2.0,
        f / 2.0,
        e / 2.0,
        c,
    );
    (q, Vector3::new(g, h, j), k)
}

/// A registered surface: the primitive plus the classification
/// tolerance in force when it was registered.
#[derive(Debug, Clone)]
pub struct Surface {
    kind: SurfaceKind,
    tolerance: f64,
}

impl Surface {
    pub(crate) fn new(kind: SurfaceKind, tolerance: f64) -> Self {
        Self { kind, tolerance }
    }

    /// The geometric primitive.
    #[must_use]
    pub fn kind(&self) -> &SurfaceKind {
        &self.kind
    }

    /// The classification tolerance for this surface.
    #[must_use]
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub(crate) fn set_kind(&mut self, kind: SurfaceKind) {
        self.kind = kind;
    }

    /// Classifies `point` against the surface.
    #[must_use]
    pub fn side(&self, point: &Point3) -> Side {
        let value = self.kind.implicit(point);
        if value.abs() < self.tolerance {
            Side::On
        } else if value > 0.0 {
            Side::Positive
        } else {
            Side::Negative
        }
    }

    /// Renders the surface as one deck line: `<handle> <tag> <params…>`.
    #[must_use]
    pub fn render(&self, handle: SurfaceHandle) -> String {
        match &self.kind {
            SurfaceKind::Plane { normal, offset } => {
                format!("{handle} p {} {} {} {offset}", normal.x, normal.y, normal.z)
            }
            SurfaceKind::Cylinder {
                point,
                axis,
                radius,
            } => format!(
                "{handle} c {} {} {} {} {} {} {radius}",
                point.x, point.y, point.z, axis.x, axis.y, axis.z
            ),
            SurfaceKind::Sphere { center, radius } => {
                format!("{handle} s {} {} {} {radius}", center.x, center.y, center.z)
            }
            SurfaceKind::Quadric { coeffs } => {
                let mut line = format!("{handle} {}", self.kind.tag());
                for c in coeffs {
                    line.push(' ');
                    line.push_str(&c.to_string());
                }
                line
            }
        }
    }
}
