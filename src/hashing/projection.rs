//! The random-projection basis and per-node hash computation.

use std::cmp::Ordering;

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::error::{Error, Result};

/// Fixed set of random unit projection vectors, locked to the descriptor
/// dimensionality and keypoint count of the first hashed node.
#[derive(Debug, Clone)]
pub struct ProjectionHasher {
    /// One unit-norm row per projection, shape (P, D).
    basis: DMatrix<f64>,
    /// Reference prefix length K0: the row count of the initializing matrix.
    prefix_len: usize,
}

impl ProjectionHasher {
    /// Build the basis from the first non-empty descriptor matrix.
    ///
    /// Each basis row is drawn i.i.d. from a standard normal distribution and
    /// normalized to unit length. The same `seed` always yields the same
    /// basis, making hashes bit-reproducible.
    pub fn new(first_descriptors: &DMatrix<f64>, num_proj: usize, seed: u64) -> Result<Self> {
        if num_proj == 0 {
            return Err(Error::Config("num_proj must be positive".into()));
        }
        if first_descriptors.nrows() == 0 || first_descriptors.ncols() == 0 {
            return Err(Error::Config(
                "projection basis needs a non-empty descriptor matrix".into(),
            ));
        }

        let dim = first_descriptors.ncols();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut basis = DMatrix::<f64>::zeros(num_proj, dim);
        for j in 0..num_proj {
            for k in 0..dim {
                basis[(j, k)] = rng.sample(StandardNormal);
            }
            let norm = basis.row(j).norm();
            if norm > 0.0 {
                basis.row_mut(j).unscale_mut(norm);
            }
        }

        Ok(Self {
            basis,
            prefix_len: first_descriptors.nrows(),
        })
    }

    /// Descriptor dimensionality D the basis is locked to.
    pub fn descriptor_dim(&self) -> usize {
        self.basis.ncols()
    }

    /// Hash length P.
    pub fn num_proj(&self) -> usize {
        self.basis.nrows()
    }

    /// Reference prefix length K0.
    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    /// Hash a descriptor matrix of shape (K, D) to a vector of length P.
    ///
    /// Per basis row: project all K descriptors, sort the projections
    /// descending, and sum the first min(K, K0) of them. Nodes with fewer
    /// rows than K0 simply contribute a shorter prefix.
    pub fn hash(&self, descriptors: &DMatrix<f64>) -> Result<Vec<f64>> {
        if descriptors.ncols() != self.basis.ncols() {
            return Err(Error::DimensionMismatch {
                expected: self.basis.ncols(),
                actual: descriptors.ncols(),
            });
        }

        // (P, D) x (D, K) -> one row of projections per basis vector.
        let projected = &self.basis * descriptors.transpose();
        let prefix = self.prefix_len.min(descriptors.nrows());

        let mut hash = Vec::with_capacity(self.basis.nrows());
        let mut scalars = Vec::with_capacity(descriptors.nrows());
        for j in 0..projected.nrows() {
            scalars.clear();
            scalars.extend(projected.row(j).iter().copied());
            scalars.sort_unstable_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
            hash.push(scalars[..prefix].iter().sum());
        }
        Ok(hash)
    }
}
