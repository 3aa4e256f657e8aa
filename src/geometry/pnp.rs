//! PnP (Perspective-n-Point) pose estimation with RANSAC.
//!
//! The minimal solver is a 6-point DLT; candidate poses are scored by pixel
//! reprojection error. Used for the stereo verification stage, where the
//! candidate node supplies 3-D points and the query supplies 2-D points.

use nalgebra::{DMatrix, Matrix3, Matrix3x4, Point2, Vector3};
use rand::Rng;

use crate::error::{Error, Result};
use crate::features::CameraModel;
use crate::geometry::SE3;

use super::fundamental::sample_unique_indices;

const SAMPLE_SIZE: usize = 6;
const MAX_ITERATIONS: usize = 100;
/// Stop sampling once a pose explains this many correspondences.
const EARLY_EXIT_INLIERS: usize = 40;

/// Result of PnP solving.
#[derive(Debug, Clone)]
pub struct PnPResult {
    /// Pose of the observing camera: `p_cam = R * p_world + t`.
    pub pose: SE3,
    /// Indices of inlier correspondences.
    pub inliers: Vec<usize>,
}

/// Solve PnP with RANSAC given 3-D/2-D correspondences and pinhole
/// intrinsics (no distortion).
pub fn solve_pnp_ransac(
    points3d: &[Vector3<f64>],
    points2d: &[Point2<f64>],
    camera: &CameraModel,
    max_reproj_err: f64,
    rng: &mut impl Rng,
) -> Result<PnPResult> {
    let n = points3d.len();
    if n != points2d.len() || n < SAMPLE_SIZE {
        return Err(Error::DegenerateGeometry(format!(
            "PnP needs at least {SAMPLE_SIZE} paired points, got {n}"
        )));
    }

    let mut best_pose: Option<SE3> = None;
    let mut best_inliers: Vec<usize> = Vec::new();
    let mut best_error = f64::INFINITY;

    for _ in 0..MAX_ITERATIONS {
        let idx = sample_unique_indices(rng, n, SAMPLE_SIZE);
        let sample_obj: Vec<_> = idx.iter().map(|&i| points3d[i]).collect();
        let sample_img: Vec<_> = idx.iter().map(|&i| points2d[i]).collect();

        let pose = match solve_pnp_dlt(&sample_obj, &sample_img, camera) {
            Ok(pose) => pose,
            Err(_) => continue,
        };

        let (inliers, mean_err) = find_inliers(&pose, points3d, points2d, camera, max_reproj_err);
        if inliers.len() > best_inliers.len()
            || (inliers.len() == best_inliers.len() && mean_err < best_error)
        {
            best_pose = Some(pose);
            best_inliers = inliers;
            best_error = mean_err;
            if best_inliers.len() >= EARLY_EXIT_INLIERS {
                break;
            }
        }
    }

    let mut pose = best_pose
        .ok_or_else(|| Error::DegenerateGeometry("RANSAC failed to estimate a PnP pose".into()))?;

    // Refit on the consensus set; keep the refinement only if it does not
    // lose inliers.
    if best_inliers.len() >= SAMPLE_SIZE {
        let in_obj: Vec<_> = best_inliers.iter().map(|&i| points3d[i]).collect();
        let in_img: Vec<_> = best_inliers.iter().map(|&i| points2d[i]).collect();
        if let Ok(refined) = solve_pnp_dlt(&in_obj, &in_img, camera) {
            let (inliers, _) = find_inliers(&refined, points3d, points2d, camera, max_reproj_err);
            if inliers.len() >= best_inliers.len() {
                pose = refined;
                best_inliers = inliers;
            }
        }
    }

    Ok(PnPResult {
        pose,
        inliers: best_inliers,
    })
}

/// Direct Linear Transform on normalized image coordinates.
///
/// The projective factor is stripped by orthogonalizing the rotation block
/// via SVD; the sign ambiguity of the homogeneous solution is resolved with
/// the determinant of the recovered rotation.
pub fn solve_pnp_dlt(
    points3d: &[Vector3<f64>],
    points2d: &[Point2<f64>],
    camera: &CameraModel,
) -> Result<SE3> {
    let n = points3d.len();
    if n != points2d.len() || n < SAMPLE_SIZE {
        return Err(Error::DegenerateGeometry(format!(
            "solve_pnp_dlt needs at least {SAMPLE_SIZE} paired points, got {n}"
        )));
    }

    let mut a = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (obj, pix)) in points3d.iter().zip(points2d.iter()).enumerate() {
        let ray = camera.unproject(pix);
        let (xn, yn) = (ray.x, ray.y);
        let (xw, yw, zw) = (obj.x, obj.y, obj.z);

        let r0 = 2 * i;
        let r1 = r0 + 1;

        a[(r0, 0)] = xw;
        a[(r0, 1)] = yw;
        a[(r0, 2)] = zw;
        a[(r0, 3)] = 1.0;
        a[(r0, 8)] = -xn * xw;
        a[(r0, 9)] = -xn * yw;
        a[(r0, 10)] = -xn * zw;
        a[(r0, 11)] = -xn;

        a[(r1, 4)] = xw;
        a[(r1, 5)] = yw;
        a[(r1, 6)] = zw;
        a[(r1, 7)] = 1.0;
        a[(r1, 8)] = -yn * xw;
        a[(r1, 9)] = -yn * yw;
        a[(r1, 10)] = -yn * zw;
        a[(r1, 11)] = -yn;
    }

    let svd = a.svd(false, true);
    let vt = svd
        .v_t
        .ok_or_else(|| Error::DegenerateGeometry("SVD failed in solve_pnp_dlt".into()))?;
    let p = vt.row(vt.nrows() - 1);

    let mut pmat = Matrix3x4::<f64>::zeros();
    for r in 0..3 {
        for c in 0..4 {
            pmat[(r, c)] = p[r * 4 + c];
        }
    }

    let m = pmat.fixed_view::<3, 3>(0, 0).into_owned();
    let mut t = Vector3::new(pmat[(0, 3)], pmat[(1, 3)], pmat[(2, 3)]);

    let svd_m = m.svd(true, true);
    let u = svd_m
        .u
        .ok_or_else(|| Error::DegenerateGeometry("SVD U missing in solve_pnp_dlt".into()))?;
    let vt_m = svd_m
        .v_t
        .ok_or_else(|| Error::DegenerateGeometry("SVD V^T missing in solve_pnp_dlt".into()))?;

    let mut r: Matrix3<f64> = u * vt_m;
    let scale =
        (svd_m.singular_values[0] + svd_m.singular_values[1] + svd_m.singular_values[2]) / 3.0;
    if scale.abs() < 1e-12 {
        return Err(Error::DegenerateGeometry(
            "solve_pnp_dlt scale collapsed".into(),
        ));
    }
    t /= scale;

    if r.determinant() < 0.0 {
        r = -r;
        t = -t;
    }

    Ok(SE3::from_rt(r, t))
}

/// Pixel reprojection error of one correspondence under `pose`. Points at or
/// behind the camera plane score infinity.
pub fn reprojection_error(
    pose: &SE3,
    camera: &CameraModel,
    point3d: &Vector3<f64>,
    point2d: &Point2<f64>,
) -> f64 {
    let p_cam = pose.transform_point(point3d);
    match camera.project(&p_cam) {
        Some(projected) => {
            ((projected.x - point2d.x).powi(2) + (projected.y - point2d.y).powi(2)).sqrt()
        }
        None => f64::INFINITY,
    }
}

fn find_inliers(
    pose: &SE3,
    points3d: &[Vector3<f64>],
    points2d: &[Point2<f64>],
    camera: &CameraModel,
    max_reproj_err: f64,
) -> (Vec<usize>, f64) {
    let mut inliers = Vec::new();
    let mut sum_err = 0.0;
    for (i, (p3, p2)) in points3d.iter().zip(points2d.iter()).enumerate() {
        let err = reprojection_error(pose, camera, p3, p2);
        if err <= max_reproj_err {
            inliers.push(i);
            sum_err += err;
        }
    }
    let mean_err = if inliers.is_empty() {
        f64::INFINITY
    } else {
        sum_err / inliers.len() as f64
    };
    (inliers, mean_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn test_camera() -> CameraModel {
        CameraModel::new(500.0, 500.0, 320.0, 240.0)
    }

    /// Random world points plus their projections under a known pose.
    fn synthetic_scene(
        rng: &mut StdRng,
        pose: &SE3,
        n: usize,
    ) -> (Vec<Vector3<f64>>, Vec<Point2<f64>>) {
        let camera = test_camera();
        let mut obj = Vec::with_capacity(n);
        let mut img = Vec::with_capacity(n);
        while obj.len() < n {
            let p = Vector3::new(
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-1.5..1.5),
                rng.gen_range(3.0..8.0),
            );
            let p_cam = pose.transform_point(&p);
            if let Some(px) = camera.project(&p_cam) {
                obj.push(p);
                img.push(px);
            }
        }
        (obj, img)
    }

    #[test]
    fn dlt_recovers_known_pose() {
        let mut rng = StdRng::seed_from_u64(21);
        let pose = SE3::from_rotvec(Vector3::new(0.05, -0.1, 0.02), Vector3::new(0.4, -0.1, 0.3));
        let (obj, img) = synthetic_scene(&mut rng, &pose, 30);

        let estimated = solve_pnp_dlt(&obj, &img, &test_camera()).unwrap();
        assert_relative_eq!(estimated.translation, pose.translation, epsilon = 1e-6);
        let delta = estimated.rotation.inverse() * pose.rotation;
        assert!(delta.angle() < 1e-6);
    }

    #[test]
    fn ransac_survives_outliers() {
        let mut rng = StdRng::seed_from_u64(5);
        let pose = SE3::from_rotvec(Vector3::new(0.0, 0.2, 0.0), Vector3::new(1.0, 0.0, 0.5));
        let (mut obj, mut img) = synthetic_scene(&mut rng, &pose, 50);

        for _ in 0..12 {
            obj.push(Vector3::new(
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-2.0..2.0),
                rng.gen_range(3.0..8.0),
            ));
            img.push(Point2::new(
                rng.gen_range(0.0..640.0),
                rng.gen_range(0.0..480.0),
            ));
        }

        let result = solve_pnp_ransac(&obj, &img, &test_camera(), 2.0, &mut rng).unwrap();
        assert!(result.inliers.len() >= 48, "only {}", result.inliers.len());
        assert_relative_eq!(result.pose.translation, pose.translation, epsilon = 1e-3);
    }

    #[test]
    fn too_few_points_is_degenerate() {
        let mut rng = StdRng::seed_from_u64(1);
        let obj = vec![Vector3::new(0.0, 0.0, 5.0); 4];
        let img = vec![Point2::new(320.0, 240.0); 4];
        assert!(matches!(
            solve_pnp_ransac(&obj, &img, &test_camera(), 2.0, &mut rng),
            Err(Error::DegenerateGeometry(_))
        ));
    }

    #[test]
    fn reprojection_error_is_zero_for_exact_projection() {
        let camera = test_camera();
        let pose = SE3::identity();
        let p3 = Vector3::new(0.5, -0.3, 4.0);
        let p2 = camera.project(&p3).unwrap();
        assert_relative_eq!(reprojection_error(&pose, &camera, &p3, &p2), 0.0);
    }

    #[test]
    fn points_behind_camera_never_inliers() {
        let camera = test_camera();
        let pose = SE3::identity();
        let p3 = Vector3::new(0.0, 0.0, -4.0);
        assert!(reprojection_error(&pose, &camera, &p3, &Point2::new(320.0, 240.0)).is_infinite());
    }
}
