//! Pinhole camera intrinsics (no distortion).

use nalgebra::{Matrix3, Point2, Vector3};

/// Intrinsic camera model used for stereo verification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraModel {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Build from a 3x3 intrinsic matrix `[fx 0 cx; 0 fy cy; 0 0 1]`.
    pub fn from_matrix(k: &Matrix3<f64>) -> Self {
        Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
        }
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    pub fn inverse_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            1.0 / self.fx,
            0.0,
            -self.cx / self.fx,
            0.0,
            1.0 / self.fy,
            -self.cy / self.fy,
            0.0,
            0.0,
            1.0,
        )
    }

    /// Project a camera-frame point to pixels. Returns `None` for points at
    /// or behind the camera plane.
    pub fn project(&self, p: &Vector3<f64>) -> Option<Point2<f64>> {
        if p.z <= 1e-12 {
            return None;
        }
        Some(Point2::new(
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        ))
    }

    /// Back-project a pixel to a normalized image-plane ray (z = 1).
    pub fn unproject(&self, p: &Point2<f64>) -> Vector3<f64> {
        Vector3::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn matrix_round_trip() {
        let cam = CameraModel::new(458.0, 457.0, 367.2, 248.4);
        let rebuilt = CameraModel::from_matrix(&cam.matrix());
        assert_eq!(cam, rebuilt);
    }

    #[test]
    fn inverse_matrix_inverts() {
        let cam = CameraModel::new(458.0, 457.0, 367.2, 248.4);
        let eye = cam.matrix() * cam.inverse_matrix();
        assert_relative_eq!(eye, Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn project_unproject_round_trip() {
        let cam = CameraModel::new(500.0, 500.0, 320.0, 240.0);
        let p = Vector3::new(0.3, -0.2, 2.5);
        let px = cam.project(&p).unwrap();
        let ray = cam.unproject(&px);
        assert_relative_eq!(ray * p.z, p, epsilon = 1e-12);
    }

    #[test]
    fn project_rejects_points_behind_camera() {
        let cam = CameraModel::new(500.0, 500.0, 320.0, 240.0);
        assert!(cam.project(&Vector3::new(0.0, 0.0, -1.0)).is_none());
        assert!(cam.project(&Vector3::new(0.0, 0.0, 0.0)).is_none());
    }
}
