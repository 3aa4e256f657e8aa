//! Node-level feature data and the extractor contract.
//!
//! Keypoint and descriptor extraction is external to this crate: the engine
//! consumes whatever a [`FeatureExtractor`] produces and never looks at pixel
//! data itself.

pub mod camera;

pub use camera::CameraModel;

use nalgebra::{DMatrix, Point2, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Features of one image (or rectified stereo pair).
///
/// `descriptors` has one row per keypoint; the row count must equal
/// `keypoints.len()`. `points3d` is empty for mono nodes and holds one point
/// per keypoint (in the left camera frame) for stereo nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSet {
    pub keypoints: Vec<Point2<f64>>,
    pub descriptors: DMatrix<f64>,
    pub points3d: Vec<Vector3<f64>>,
}

impl FeatureSet {
    /// A mono feature set (no 3-D points).
    pub fn mono(keypoints: Vec<Point2<f64>>, descriptors: DMatrix<f64>) -> Self {
        Self {
            keypoints,
            descriptors,
            points3d: Vec::new(),
        }
    }

    /// A stereo feature set with one 3-D point per keypoint.
    pub fn stereo(
        keypoints: Vec<Point2<f64>>,
        descriptors: DMatrix<f64>,
        points3d: Vec<Vector3<f64>>,
    ) -> Self {
        Self {
            keypoints,
            descriptors,
            points3d,
        }
    }

    /// Number of keypoints.
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Descriptor dimensionality D (columns of the descriptor matrix).
    pub fn descriptor_dim(&self) -> usize {
        self.descriptors.ncols()
    }

    pub fn is_stereo(&self) -> bool {
        !self.points3d.is_empty()
    }

    /// Check the internal shape invariants: one descriptor row per keypoint,
    /// and `points3d` either empty or one entry per keypoint.
    pub fn check_consistent(&self) -> Result<()> {
        if self.descriptors.nrows() != self.keypoints.len() {
            return Err(Error::Extraction(format!(
                "{} keypoints but {} descriptor rows",
                self.keypoints.len(),
                self.descriptors.nrows()
            )));
        }
        if !self.points3d.is_empty() && self.points3d.len() != self.keypoints.len() {
            return Err(Error::Extraction(format!(
                "{} keypoints but {} 3-D points",
                self.keypoints.len(),
                self.points3d.len()
            )));
        }
        Ok(())
    }

    /// Keep only the first `max` keypoints (and their descriptors and 3-D
    /// points). No-op when `max` is zero or not smaller than the current size.
    pub fn truncate(&mut self, max: usize) {
        if max == 0 || max >= self.keypoints.len() {
            return;
        }
        self.keypoints.truncate(max);
        self.descriptors = self.descriptors.rows(0, max).into_owned();
        if !self.points3d.is_empty() {
            self.points3d.truncate(max);
        }
    }
}

/// Contract for the external keypoint/descriptor extractor.
///
/// Descriptor dimensionality must be fixed for the lifetime of an extractor
/// instance; the engine locks it in with the first non-empty node and rejects
/// later mismatches.
pub trait FeatureExtractor {
    /// Whatever the extractor consumes: an image buffer, a file path, a
    /// pre-decoded frame. The engine never inspects it.
    type Image;

    /// Extract keypoints and descriptors from a single image. The returned
    /// set must have `points3d` empty.
    fn extract_mono(&mut self, image: &Self::Image) -> Result<FeatureSet>;

    /// Extract keypoints, descriptors and triangulated 3-D points (left
    /// camera frame, one per keypoint) from a rectified stereo pair.
    fn extract_stereo(&mut self, left: &Self::Image, right: &Self::Image) -> Result<FeatureSet>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_with(k: usize, d: usize) -> FeatureSet {
        FeatureSet::mono(
            (0..k).map(|i| Point2::new(i as f64, i as f64)).collect(),
            DMatrix::from_element(k, d, 1.0),
        )
    }

    #[test]
    fn consistency_accepts_matching_shapes() {
        assert!(set_with(10, 4).check_consistent().is_ok());
    }

    #[test]
    fn consistency_rejects_row_mismatch() {
        let mut set = set_with(10, 4);
        set.keypoints.pop();
        assert!(set.check_consistent().is_err());
    }

    #[test]
    fn consistency_rejects_partial_points3d() {
        let mut set = set_with(10, 4);
        set.points3d = vec![Vector3::zeros(); 7];
        assert!(set.check_consistent().is_err());
    }

    #[test]
    fn truncate_keeps_prefix() {
        let mut set = set_with(10, 4);
        set.points3d = vec![Vector3::zeros(); 10];
        set.truncate(6);
        assert_eq!(set.len(), 6);
        assert_eq!(set.descriptors.nrows(), 6);
        assert_eq!(set.points3d.len(), 6);
        assert!(set.check_consistent().is_ok());
    }

    #[test]
    fn truncate_zero_is_unlimited() {
        let mut set = set_with(10, 4);
        set.truncate(0);
        assert_eq!(set.len(), 10);
    }
}
