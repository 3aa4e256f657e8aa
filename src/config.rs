//! Engine parameters.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Tunable parameters for the loop-closure engine.
///
/// All thresholds are validated once at `init()`; a `Params` value itself can
/// hold anything so it can be built up incrementally.
#[derive(Debug, Clone)]
pub struct Params {
    /// Base path under which the per-run scratch store is created.
    pub work_dir: PathBuf,

    /// Number of random projections. This is also the hash length.
    pub num_proj: usize,

    /// Seed for the projection-basis RNG. Fixing it makes hashes
    /// bit-reproducible across runs.
    pub hash_seed: u64,

    /// Cap on the number of descriptors kept per node (0 = unlimited).
    pub max_desc: usize,

    /// Lowe's ratio-test threshold for cross-checked descriptor matching.
    pub desc_thresh: f64,

    /// RANSAC inlier distance (Sampson, pixels) for the fundamental-matrix
    /// fit in mono verification.
    pub epipolar_thresh: f64,

    /// RANSAC reprojection threshold (pixels) for stereo PnP verification.
    pub max_reproj_err: f64,

    /// Minimum temporal gap, in node indices, between the query and a legal
    /// candidate. A candidate `c` is legal for query `q` only if
    /// `q - c > min_neighbour`.
    pub min_neighbour: usize,

    /// Maximum number of top-ranked hash candidates to geometrically verify.
    pub n_candidates: usize,

    /// Minimum cross-check descriptor matches required to proceed to the
    /// geometric stage.
    pub min_matches: usize,

    /// Minimum geometric inliers required to accept a closure.
    pub min_inliers: usize,

    /// Require an additional successful verification against an immediate
    /// temporal neighbour of the accepted candidate.
    pub validate: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir(),
            num_proj: 3,
            hash_seed: 0,
            max_desc: 0,
            desc_thresh: 0.8,
            epipolar_thresh: 2.0,
            max_reproj_err: 3.0,
            min_neighbour: 10,
            n_candidates: 5,
            min_matches: 20,
            min_inliers: 12,
            validate: false,
        }
    }
}

impl Params {
    /// Check every threshold is in range. Called by the engine at `init()`.
    pub fn validate(&self) -> Result<()> {
        if self.num_proj == 0 {
            return Err(Error::Config("num_proj must be positive".into()));
        }
        if !(self.desc_thresh > 0.0 && self.desc_thresh <= 1.0) {
            return Err(Error::Config(format!(
                "desc_thresh must be in (0, 1], got {}",
                self.desc_thresh
            )));
        }
        if !(self.epipolar_thresh > 0.0) {
            return Err(Error::Config(format!(
                "epipolar_thresh must be positive, got {}",
                self.epipolar_thresh
            )));
        }
        if !(self.max_reproj_err > 0.0) {
            return Err(Error::Config(format!(
                "max_reproj_err must be positive, got {}",
                self.max_reproj_err
            )));
        }
        if self.n_candidates == 0 {
            return Err(Error::Config("n_candidates must be positive".into()));
        }
        if self.min_matches == 0 {
            return Err(Error::Config("min_matches must be positive".into()));
        }
        if self.min_inliers == 0 {
            return Err(Error::Config("min_inliers must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_are_valid() {
        assert!(Params::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_projections() {
        let params = Params {
            num_proj: 0,
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_out_of_range_ratio() {
        for bad in [0.0, -0.5, 1.5] {
            let params = Params {
                desc_thresh: bad,
                ..Default::default()
            };
            assert!(params.validate().is_err(), "desc_thresh {bad} accepted");
        }
    }

    #[test]
    fn rejects_nonpositive_thresholds() {
        let params = Params {
            epipolar_thresh: 0.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = Params {
            max_reproj_err: -1.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }
}
