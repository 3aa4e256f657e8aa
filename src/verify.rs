//! Geometric verification of loop-closure candidates.
//!
//! A candidate survives three gates: enough cross-checked descriptor
//! matches, a non-degenerate geometric model, and enough model inliers.
//! Mono nodes are checked with a fundamental-matrix fit (no metric transform
//! is recoverable, so the reported transform is identity); stereo nodes are
//! checked with PnP against the candidate's 3-D points, which also yields
//! the candidate-to-query rigid transform.

use nalgebra::{Point2, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::config::Params;
use crate::error::{Error, Result};
use crate::features::{CameraModel, FeatureSet};
use crate::geometry::{find_fundamental_ransac, solve_pnp_ransac, SE3};
use crate::matching::cross_check_ratio_match;
use crate::store::FeatureStore;

/// A fundamental matrix whose absolute entries sum below this is treated as
/// degenerate.
const MIN_FUNDAMENTAL_NORM: f64 = 1e-3;

/// Outcome of verifying one candidate.
#[derive(Debug, Clone)]
pub struct Verification {
    /// True when the candidate passed every gate.
    pub ok: bool,
    /// Cross-checked descriptor matches.
    pub matches: usize,
    /// Geometric inliers (zero when matching already failed).
    pub inliers: usize,
    /// Candidate-to-query transform; identity for mono verification.
    pub transform: SE3,
    /// Stored name of the candidate node.
    pub name: String,
}

impl Verification {
    fn rejected(matches: usize, inliers: usize, name: String) -> Self {
        Self {
            ok: false,
            matches,
            inliers,
            transform: SE3::identity(),
            name,
        }
    }
}

/// Verifies query/candidate pairs against the configured thresholds.
pub struct Verifier {
    desc_thresh: f64,
    epipolar_thresh: f64,
    max_reproj_err: f64,
    min_matches: usize,
    min_inliers: usize,
    camera: Option<CameraModel>,
    rng: StdRng,
}

impl Verifier {
    pub fn new(params: &Params, camera: Option<CameraModel>) -> Self {
        Self {
            desc_thresh: params.desc_thresh,
            epipolar_thresh: params.epipolar_thresh,
            max_reproj_err: params.max_reproj_err,
            min_matches: params.min_matches,
            min_inliers: params.min_inliers,
            camera,
            // RANSAC sampling shares the hash seed so whole runs replay.
            rng: StdRng::seed_from_u64(params.hash_seed ^ 0x5eed_1d),
        }
    }

    /// Install or replace the intrinsics used for stereo verification.
    pub fn set_camera(&mut self, camera: CameraModel) {
        self.camera = Some(camera);
    }

    /// Verify the query node against a stored candidate.
    ///
    /// `NotFound` (candidate never stored) surfaces to the caller; geometric
    /// failures are folded into `ok = false`.
    pub fn verify(
        &mut self,
        query: &FeatureSet,
        store: &FeatureStore,
        candidate_index: usize,
    ) -> Result<Verification> {
        let candidate = store.get(candidate_index)?;

        let matches =
            cross_check_ratio_match(&query.descriptors, &candidate.features.descriptors, self.desc_thresh);
        debug!(
            candidate = candidate_index,
            matches = matches.len(),
            "descriptor matching"
        );
        if matches.len() < self.min_matches {
            return Ok(Verification::rejected(matches.len(), 0, candidate.name));
        }

        let outcome = if candidate.features.is_stereo() {
            self.verify_stereo(query, &candidate.features, &matches)
        } else {
            self.verify_mono(query, &candidate.features, &matches)
        };

        match outcome {
            Ok((inliers, transform)) => {
                let ok = inliers >= self.min_inliers;
                Ok(Verification {
                    ok,
                    matches: matches.len(),
                    inliers,
                    transform: if ok { transform } else { SE3::identity() },
                    name: candidate.name,
                })
            }
            // A model that cannot be estimated is a failed verification, not
            // an error of the search.
            Err(Error::DegenerateGeometry(reason)) => {
                debug!(candidate = candidate_index, %reason, "degenerate geometry");
                Ok(Verification::rejected(matches.len(), 0, candidate.name))
            }
            Err(other) => Err(other),
        }
    }

    /// Epipolar check: fundamental-matrix RANSAC over the matched keypoints.
    fn verify_mono(
        &mut self,
        query: &FeatureSet,
        candidate: &FeatureSet,
        matches: &[crate::matching::DescriptorMatch],
    ) -> Result<(usize, SE3)> {
        let query_pts: Vec<Point2<f64>> =
            matches.iter().map(|m| query.keypoints[m.query_idx]).collect();
        let cand_pts: Vec<Point2<f64>> = matches
            .iter()
            .map(|m| candidate.keypoints[m.train_idx])
            .collect();

        let result =
            find_fundamental_ransac(&query_pts, &cand_pts, self.epipolar_thresh, &mut self.rng)?;

        let abs_sum: f64 = result.matrix.iter().map(|v| v.abs()).sum();
        if abs_sum < MIN_FUNDAMENTAL_NORM {
            return Err(Error::DegenerateGeometry(
                "fundamental matrix is near zero".into(),
            ));
        }

        Ok((result.num_inliers, SE3::identity()))
    }

    /// PnP check: candidate 3-D points against query 2-D points. The
    /// recovered pose is the candidate-to-query transform.
    fn verify_stereo(
        &mut self,
        query: &FeatureSet,
        candidate: &FeatureSet,
        matches: &[crate::matching::DescriptorMatch],
    ) -> Result<(usize, SE3)> {
        let camera = self.camera.ok_or_else(|| {
            Error::Config("stereo verification requires a camera model".into())
        })?;

        let object: Vec<Vector3<f64>> = matches
            .iter()
            .map(|m| candidate.points3d[m.train_idx])
            .collect();
        let image: Vec<Point2<f64>> =
            matches.iter().map(|m| query.keypoints[m.query_idx]).collect();

        let result =
            solve_pnp_ransac(&object, &image, &camera, self.max_reproj_err, &mut self.rng)?;
        Ok((result.inliers.len(), result.pose))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;
    use rand::Rng;

    fn params() -> Params {
        Params {
            min_matches: 10,
            min_inliers: 8,
            ..Default::default()
        }
    }

    fn store_in(tmp: &tempfile::TempDir) -> FeatureStore {
        FeatureStore::create(tmp.path()).unwrap()
    }

    /// Distinctive descriptors: strongly separated rows so matching is
    /// unambiguous.
    fn landmark_descriptors(rng: &mut StdRng, n: usize, d: usize) -> DMatrix<f64> {
        DMatrix::from_fn(n, d, |_, _| rng.gen_range(-10.0..10.0))
    }

    fn mono_scene(rng: &mut StdRng, n: usize) -> FeatureSet {
        let descriptors = landmark_descriptors(rng, n, 16);
        let keypoints = (0..n)
            .map(|_| Point2::new(rng.gen_range(0.0..640.0), rng.gen_range(0.0..480.0)))
            .collect();
        FeatureSet::mono(keypoints, descriptors)
    }

    #[test]
    fn identical_mono_nodes_verify() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(&tmp);
        let mut rng = StdRng::seed_from_u64(61);

        let node = mono_scene(&mut rng, 40);
        store.put(0, "revisited", &node).unwrap();

        let mut verifier = Verifier::new(&params(), None);
        let v = verifier.verify(&node, &store, 0).unwrap();
        assert!(v.ok);
        assert_eq!(v.matches, 40);
        assert!(v.inliers >= 8);
        assert_eq!(v.name, "revisited");
        assert_eq!(v.transform, SE3::identity());
    }

    #[test]
    fn unrelated_mono_nodes_fail_on_matches() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(&tmp);
        let mut rng = StdRng::seed_from_u64(62);

        let a = mono_scene(&mut rng, 40);
        let b = mono_scene(&mut rng, 40);
        store.put(0, "other", &b).unwrap();

        let mut verifier = Verifier::new(&params(), None);
        let v = verifier.verify(&a, &store, 0).unwrap();
        assert!(!v.ok);
    }

    #[test]
    fn missing_candidate_surfaces_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(&tmp);
        let mut rng = StdRng::seed_from_u64(63);
        let node = mono_scene(&mut rng, 20);

        let mut verifier = Verifier::new(&params(), None);
        assert!(matches!(
            verifier.verify(&node, &store, 4),
            Err(Error::NotFound(4))
        ));
    }

    #[test]
    fn stereo_pair_recovers_relative_pose() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(&tmp);
        let mut rng = StdRng::seed_from_u64(64);

        let camera = CameraModel::new(500.0, 500.0, 320.0, 240.0);
        let descriptors = landmark_descriptors(&mut rng, 60, 16);

        // Candidate view: landmarks in its own camera frame.
        let mut landmarks = Vec::new();
        while landmarks.len() < 60 {
            let p = Vector3::new(
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-1.5..1.5),
                rng.gen_range(3.0..9.0),
            );
            if camera.project(&p).is_some() {
                landmarks.push(p);
            }
        }
        let cand_kp: Vec<Point2<f64>> =
            landmarks.iter().map(|p| camera.project(p).unwrap()).collect();
        let candidate = FeatureSet::stereo(cand_kp, descriptors.clone(), landmarks.clone());
        store.put(0, "stereo_candidate", &candidate).unwrap();

        // Query view: the same landmarks seen from a displaced camera.
        let t_true = SE3::from_rotvec(Vector3::new(0.0, 0.05, 0.0), Vector3::new(0.3, 0.0, -0.2));
        let query_kp: Vec<Point2<f64>> = landmarks
            .iter()
            .map(|p| camera.project(&t_true.transform_point(p)).unwrap())
            .collect();
        let query_points3d: Vec<Vector3<f64>> =
            landmarks.iter().map(|p| t_true.transform_point(p)).collect();
        let query = FeatureSet::stereo(query_kp, descriptors, query_points3d);

        let mut verifier = Verifier::new(&params(), Some(camera));
        let v = verifier.verify(&query, &store, 0).unwrap();
        assert!(v.ok);
        assert!(v.inliers >= 50);

        let t_err = (v.transform.translation - t_true.translation).norm();
        assert!(t_err < 0.01, "translation error {t_err}");
        let r_err = (v.transform.rotation.inverse() * t_true.rotation).angle();
        assert!(r_err < 0.01, "rotation error {r_err}");
    }

    #[test]
    fn stereo_without_camera_model_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(&tmp);
        let mut rng = StdRng::seed_from_u64(65);

        let mut node = mono_scene(&mut rng, 30);
        node.points3d = vec![Vector3::new(0.0, 0.0, 5.0); 30];
        store.put(0, "stereo", &node).unwrap();

        let mut verifier = Verifier::new(&params(), None);
        assert!(matches!(
            verifier.verify(&node, &store, 0),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn too_few_matches_skip_geometry() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(&tmp);
        let mut rng = StdRng::seed_from_u64(66);

        let node = mono_scene(&mut rng, 5);
        store.put(0, "tiny", &node).unwrap();

        let mut verifier = Verifier::new(&params(), None);
        let v = verifier.verify(&node, &store, 0).unwrap();
        assert!(!v.ok);
        assert_eq!(v.inliers, 0);
    }
}
