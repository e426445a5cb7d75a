/// 3D point type.
pub type Point3 = nalgebra::Point3<f64>;

/// 3D vector type.
pub type Vector3 = nalgebra::Vector3<f64>;

/// 3x3 matrix type.
pub type Matrix3 = nalgebra::Matrix3<f64>;

/// Rotation type used by the whole-model rigid transform.
pub type Rotation3 = nalgebra::Rotation3<f64>;

/// Default classification tolerance for surface side tests.
///
/// Points whose implicit-function value is within this band of zero are
/// classified as on the surface, never silently rounded to one side.
/// A single constant is shared by every primitive kind; see
/// [`crate::surface::SurfaceRegistry::with_tolerance`] to override it
/// per model.
pub const DEFAULT_TOLERANCE: f64 = 1e-8;

/// A rigid transform: rotation followed by translation.
///
/// Applied exactly once, to every surface of a model, for global
/// coordinate alignment before export.
#[derive(Debug, Clone, Copy)]
pub struct RigidTransform {
    pub rotation: Rotation3,
    pub translation: Vector3,
}

impl RigidTransform {
    /// Creates a transform from a rotation and a translation.
    #[must_use]
    pub fn new(rotation: Rotation3, translation: Vector3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// The identity transform.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            rotation: Rotation3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// A pure translation.
    #[must_use]
    pub fn translation(offset: Vector3) -> Self {
        Self {
            rotation: Rotation3::identity(),
            translation: offset,
        }
    }

    /// Applies the transform to a point.
    #[must_use]
    pub fn apply_point(&self, point: &Point3) -> Point3 {
        self.rotation * point + self.translation
    }

    /// Applies the rotation part to a direction vector.
    #[must_use]
    pub fn apply_vector(&self, vector: &Vector3) -> Vector3 {
        self.rotation * vector
    }
}

/// An axis-aligned box, used as a sampling bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Point3,
    pub max: Point3,
}

impl BoundingBox {
    /// Creates a box from two corners, swapping coordinates as needed.
    #[must_use]
    pub fn new(a: Point3, b: Point3) -> Self {
        Self {
            min: Point3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Point3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// Edge lengths along x, y, z.
    #[must_use]
    pub fn extent(&self) -> Vector3 {
        self.max - self.min
    }

    /// Volume of the box.
    #[must_use]
    pub fn volume(&self) -> f64 {
        let e = self.extent();
        e.x * e.y * e.z
    }

    /// The box grown by `fraction` of its extent on every side.
    #[must_use]
    pub fn inflated(&self, fraction: f64) -> Self {
        let pad = self.extent() * (fraction / 2.0);
        Self {
            min: self.min - pad,
            max: self.max + pad,
        }
    }

    /// Whether `point` lies inside or on the box.
    #[must_use]
    pub fn contains(&self, point: &Point3) -> bool {
        (0..3).all(|i| point[i] >= self.min[i] && point[i] <= self.max[i])
    }
}

/// Solves `a*t^2 + b*t + c = 0`, returning real roots in ascending order.
///
/// Falls back to the linear case when `|a|` is below `tol`. An empty
/// vector means no real root.
#[must_use]
pub fn real_quadratic_roots(a: f64, b: f64, c: f64, tol: f64) -> Vec<f64> {
    if a.abs() < tol {
        if b.abs() < tol {
            return Vec::new();
        }
        return vec![-c / b];
    }

    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return Vec::new();
    }

    // Numerically stable form: compute the larger-magnitude root first,
    // derive the other from the product c/a.
    let sqrt_disc = disc.sqrt();
    let q = -0.5 * (b + b.signum() * sqrt_disc);
    if q.abs() < tol {
        let t = q / a;
        return vec![t, t];
    }
    let mut roots = [q / a, c / q];
    if roots[0] > roots[1] {
        roots.swap(0, 1);
    }
    vec![roots[0], roots[1]]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn quadratic_two_roots() {
        // (t - 1)(t - 3) = t^2 - 4t + 3
        let roots = real_quadratic_roots(1.0, -4.0, 3.0, 1e-12);
        assert_eq!(roots.len(), 2);
        assert_relative_eq!(roots[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(roots[1], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn quadratic_no_real_root() {
        let roots = real_quadratic_roots(1.0, 0.0, 1.0, 1e-12);
        assert!(roots.is_empty());
    }

    #[test]
    fn quadratic_degenerates_to_linear() {
        let roots = real_quadratic_roots(0.0, 2.0, -8.0, 1e-12);
        assert_eq!(roots, vec![4.0]);
    }

    #[test]
    fn rigid_transform_rotates_then_translates() {
        let rot = Rotation3::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2);
        let tf = RigidTransform::new(rot, Vector3::new(10.0, 0.0, 0.0));
        let moved = tf.apply_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(moved.x, 10.0, epsilon = 1e-12);
        assert_relative_eq!(moved.y, 1.0, epsilon = 1e-12);
    }
}
