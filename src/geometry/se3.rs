//! SE3: 6-DOF rigid transformation (rotation + translation).

use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};

/// Rigid transformation, applied to points as `p' = R * p + t`.
#[derive(Debug, Clone, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    /// Identity transformation.
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Construct from a rotation matrix and translation vector.
    pub fn from_rt(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rot3 = Rotation3::from_matrix_unchecked(rotation);
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot3),
            translation,
        }
    }

    /// Construct from an axis-angle (Rodrigues) rotation vector and a
    /// translation vector.
    pub fn from_rotvec(rotvec: Vector3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::from_scaled_axis(rotvec),
            translation,
        }
    }

    pub fn inverse(&self) -> Self {
        let inv_rot = self.rotation.inverse();
        Self {
            rotation: inv_rot,
            translation: -(inv_rot * self.translation),
        }
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Composition: `(a * b).transform_point(p) == a.transform_point(&b.transform_point(p))`.
    pub fn compose(&self, other: &SE3) -> SE3 {
        SE3 {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Rotation angle in radians.
    pub fn angle(&self) -> f64 {
        self.rotation.angle()
    }

    /// Homogeneous 4x4 matrix `[R | t; 0 | 1]`.
    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(self.rotation.to_rotation_matrix().matrix());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_leaves_points_unchanged() {
        let p = Vector3::new(1.0, -2.0, 3.0);
        assert_relative_eq!(SE3::identity().transform_point(&p), p);
    }

    #[test]
    fn inverse_undoes_transform() {
        let t = SE3::from_rotvec(Vector3::new(0.1, -0.2, 0.3), Vector3::new(1.0, 2.0, 3.0));
        let p = Vector3::new(0.5, 0.7, -1.1);
        let back = t.inverse().transform_point(&t.transform_point(&p));
        assert_relative_eq!(back, p, epsilon = 1e-12);
    }

    #[test]
    fn compose_matches_sequential_application() {
        let a = SE3::from_rotvec(Vector3::new(0.0, 0.4, 0.0), Vector3::new(-1.0, 0.0, 2.0));
        let b = SE3::from_rotvec(Vector3::new(0.2, 0.0, -0.1), Vector3::new(0.3, 0.3, 0.3));
        let p = Vector3::new(1.0, 1.0, 1.0);
        assert_relative_eq!(
            a.compose(&b).transform_point(&p),
            a.transform_point(&b.transform_point(&p)),
            epsilon = 1e-12
        );
    }

    #[test]
    fn rotvec_round_trips_through_matrix() {
        let rotvec = Vector3::new(0.3, -0.5, 0.2);
        let t = SE3::from_rotvec(rotvec, Vector3::zeros());
        let rebuilt = SE3::from_rt(
            t.rotation.to_rotation_matrix().into_inner(),
            Vector3::zeros(),
        );
        assert_relative_eq!(
            rebuilt.rotation.scaled_axis(),
            rotvec,
            epsilon = 1e-12
        );
    }
}
