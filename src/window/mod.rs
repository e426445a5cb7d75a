use crate::error::{Result, TrackError};
use crate::math::{Matrix3, Point3, Vector3};
use crate::model::GeometryModel;
use crate::surface::{SurfaceHandle, SurfaceKind};

/// Computes a window corner: the unique intersection of the face
/// surface with two adjacent edge-bounding surfaces.
///
/// Three planes are solved directly; any curved surface in the triple
/// is handled by Newton iteration from `hint`, converging to the root
/// nearest it.
///
/// # Errors
///
/// Returns [`TrackError::NoIntercept`] when the surfaces are parallel
/// or the iteration finds no real intersection near `hint`.
pub fn calc_vertex(
    model: &GeometryModel,
    face: SurfaceHandle,
    edge_a: SurfaceHandle,
    edge_b: SurfaceHandle,
    hint: &Point3,
) -> Result<Point3> {
    let kinds: Vec<&SurfaceKind> = [face, edge_a, edge_b]
        .iter()
        .map(|&h| {
            model
                .surfaces()
                .get(h)
                .map(crate::surface::Surface::kind)
                .ok_or_else(|| crate::error::BuildError::DanglingSurfaceReference(h).into())
        })
        .collect::<Result<_>>()?;

    let planes: Vec<(Vector3, f64)> = kinds
        .iter()
        .filter_map(|kind| match kind {
            SurfaceKind::Plane { normal, offset } => Some((*normal, *offset)),
            _ => None,
        })
        .collect();

    if planes.len() == 3 {
        let rows = Matrix3::from_rows(&[
            planes[0].0.transpose(),
            planes[1].0.transpose(),
            planes[2].0.transpose(),
        ]);
        let rhs = Vector3::new(planes[0].1, planes[1].1, planes[2].1);
        let inverse = rows
            .try_inverse()
            .ok_or_else(|| TrackError::NoIntercept("parallel face/edge planes".into()))?;
        return Ok(Point3::from(inverse * rhs));
    }

    newton_intersect(&kinds, hint, model.tolerance())
}

/// Newton iteration on the three implicit functions simultaneously.
fn newton_intersect(kinds: &[&SurfaceKind], hint: &Point3, tol: f64) -> Result<Point3> {
    let mut point = *hint;
    for _ in 0..50 {
        let values = Vector3::new(
            kinds[0].implicit(&point),
            kinds[1].implicit(&point),
            kinds[2].implicit(&point),
        );
        if values.norm() < tol {
            return Ok(point);
        }
        let jacobian = Matrix3::from_rows(&[
            kinds[0].gradient(&point).transpose(),
            kinds[1].gradient(&point).transpose(),
            kinds[2].gradient(&point).transpose(),
        ]);
        let inverse = jacobian
            .try_inverse()
            .ok_or_else(|| TrackError::NoIntercept("degenerate surface triple".into()))?;
        point -= inverse * values;
    }
    Err(TrackError::NoIntercept(format!("no intersection near {hint}")).into())
}

/// Re-orders four corner points so consecutive entries are
/// edge-adjacent.
///
/// Vertex 0 keeps its place; its farthest-distance partner becomes the
/// diagonal (index 2), so downstream area and normal computation sees a
/// consistent winding regardless of input order.
#[must_use]
pub fn order_window(points: [Point3; 4]) -> [Point3; 4] {
    let mut rest = [(1_usize, points[1]), (2, points[2]), (3, points[3])];
    rest.sort_by(|a, b| {
        let da = (a.1 - points[0]).norm_squared();
        let db = (b.1 - points[0]).norm_squared();
        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
    });
    // Farthest point is the diagonal partner; the two nearer points are
    // the edge-adjacent neighbours.
    [points[0], rest[0].1, rest[2].1, rest[1].1]
}

/// Nearest intersection of a ray's carrier line with a single surface,
/// used to project an aim point onto a window plane.
///
/// All real roots are considered; the intersection point closest to
/// `hint` wins.
///
/// # Errors
///
/// Returns [`TrackError::NoIntercept`] when the line misses the
/// surface entirely.
pub fn line_surf_point(
    model: &GeometryModel,
    origin: &Point3,
    dir: &Vector3,
    surface: SurfaceHandle,
    hint: &Point3,
) -> Result<Point3> {
    let surf = model
        .surfaces()
        .get(surface)
        .ok_or(crate::error::BuildError::DanglingSurfaceReference(surface))?;
    let len = dir.norm();
    if !len.is_finite() || len < f64::EPSILON {
        return Err(TrackError::NoIntercept("zero-length direction".into()).into());
    }
    let dir = dir / len;

    let roots = surf.kind().ray_roots(origin, &dir, model.tolerance());
    roots
        .iter()
        .map(|&t| origin + dir * t)
        .min_by(|a, b| {
            let da = (a - hint).norm_squared();
            let db = (b - hint).norm_squared();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .ok_or_else(|| TrackError::NoIntercept(format!("line misses surface {surface}")).into())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn p(x: f64, y: f64, z: f64) -> Point3 {
        Point3::new(x, y, z)
    }

    fn v(x: f64, y: f64, z: f64) -> Vector3 {
        Vector3::new(x, y, z)
    }

    #[test]
    fn three_plane_corner() {
        let mut model = GeometryModel::new();
        let face = model
            .register_surface(SurfaceKind::axis_plane(2, 0.0).unwrap())
            .unwrap();
        let edge_a = model
            .register_surface(SurfaceKind::axis_plane(0, 3.0).unwrap())
            .unwrap();
        let edge_b = model
            .register_surface(SurfaceKind::axis_plane(1, -2.0).unwrap())
            .unwrap();
        let corner = calc_vertex(&model, face, edge_a, edge_b, &Point3::origin()).unwrap();
        assert_relative_eq!(corner.x, 3.0, epsilon = 1e-10);
        assert_relative_eq!(corner.y, -2.0, epsilon = 1e-10);
        assert_relative_eq!(corner.z, 0.0, epsilon = 1e-10);
    }

    #[test]
    fn parallel_planes_have_no_corner() {
        let mut model = GeometryModel::new();
        let face = model
            .register_surface(SurfaceKind::axis_plane(2, 0.0).unwrap())
            .unwrap();
        let edge_a = model
            .register_surface(SurfaceKind::axis_plane(0, 3.0).unwrap())
            .unwrap();
        let edge_b = model
            .register_surface(SurfaceKind::axis_plane(0, 5.0).unwrap())
            .unwrap();
        assert!(calc_vertex(&model, face, edge_a, edge_b, &Point3::origin()).is_err());
    }

    #[test]
    fn curved_edge_corner_converges_near_hint() {
        let mut model = GeometryModel::new();
        let face = model
            .register_surface(SurfaceKind::axis_plane(2, 0.0).unwrap())
            .unwrap();
        let edge_a = model
            .register_surface(SurfaceKind::axis_plane(0, 3.0).unwrap())
            .unwrap();
        let edge_b = model
            .register_surface(SurfaceKind::sphere(Point3::origin(), 5.0).unwrap())
            .unwrap();
        // The plane pair x = 3, z = 0 meets the sphere at (3, +-4, 0);
        // the hint selects the upper corner.
        let corner = calc_vertex(&model, face, edge_a, edge_b, &p(3.0, 3.5, 0.2)).unwrap();
        assert_relative_eq!(corner.x, 3.0, epsilon = 1e-6);
        assert_relative_eq!(corner.y, 4.0, epsilon = 1e-6);
        assert_relative_eq!(corner.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn window_corners_ordered_edge_adjacent() {
        // A 4 x 2 rectangle in the z = 1 plane, corners deliberately
        // supplied with the diagonal second.
        let corners = [
            p(0.0, 0.0, 1.0),
            p(4.0, 2.0, 1.0),
            p(4.0, 0.0, 1.0),
            p(0.0, 2.0, 1.0),
        ];
        let ordered = order_window(corners);
        let sides: Vec<f64> = (0..4)
            .map(|i| (ordered[(i + 1) % 4] - ordered[i]).norm())
            .collect();
        for side in &sides {
            assert!(
                (side - 4.0).abs() < 1e-10 || (side - 2.0).abs() < 1e-10,
                "side length {side}"
            );
        }
        let diagonal = (ordered[2] - ordered[0]).norm();
        assert_relative_eq!(diagonal, 20.0_f64.sqrt(), epsilon = 1e-10);
    }

    #[test]
    fn aim_point_projected_onto_window_plane() {
        let mut model = GeometryModel::new();
        let plane = model
            .register_surface(SurfaceKind::axis_plane(0, 6.0).unwrap())
            .unwrap();
        let hit = line_surf_point(
            &model,
            &p(0.0, 1.0, 1.0),
            &v(1.0, 0.0, 0.0),
            plane,
            &p(6.0, 0.0, 0.0),
        )
        .unwrap();
        assert_relative_eq!(hit.x, 6.0, epsilon = 1e-10);
        assert_relative_eq!(hit.y, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn nearest_of_two_sphere_roots_wins() {
        let mut model = GeometryModel::new();
        let sphere = model
            .register_surface(SurfaceKind::sphere(Point3::origin(), 2.0).unwrap())
            .unwrap();
        let near = line_surf_point(
            &model,
            &p(-10.0, 0.0, 0.0),
            &v(1.0, 0.0, 0.0),
            sphere,
            &p(3.0, 0.0, 0.0),
        )
        .unwrap();
        // Roots at x = -2 and x = 2; the hint picks the far crossing.
        assert_relative_eq!(near.x, 2.0, epsilon = 1e-10);
    }

    #[test]
    fn missing_intersection_reported() {
        let mut model = GeometryModel::new();
        let sphere = model
            .register_surface(SurfaceKind::sphere(Point3::origin(), 2.0).unwrap())
            .unwrap();
        assert!(line_surf_point(
            &model,
            &p(-10.0, 5.0, 0.0),
            &v(1.0, 0.0, 0.0),
            sphere,
            &Point3::origin(),
        )
        .is_err());
    }
}
