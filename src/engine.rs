//! The loop-closure engine: ingest nodes, hash them, rank candidates,
//! geometrically verify the best ones.
//!
//! The engine is single-threaded and synchronous; `set_node` and
//! `get_loop_closure` are meant to be called in alternation for each new
//! frame. It exclusively owns the scratch store and the hash history, both
//! scoped to the interval between `init()` and `finalize()`.

use nalgebra::Matrix3;
use tracing::{debug, info, warn};

use crate::config::Params;
use crate::error::{Error, Result};
use crate::features::{CameraModel, FeatureExtractor, FeatureSet};
use crate::geometry::SE3;
use crate::hashing::{HashIndex, ProjectionHasher};
use crate::store::FeatureStore;
use crate::verify::Verifier;

/// Lifecycle of the engine, driven by the hash history length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No hashable node ingested yet; the projection basis does not exist.
    Uninitialized,
    /// Basis exists but the history is not yet longer than `min_neighbour`.
    Warming,
    /// Closures can be reported.
    Active,
}

/// An accepted loop closure.
#[derive(Debug, Clone)]
pub struct LoopClosure {
    /// Index of the prior node the current one revisits.
    pub index: usize,
    /// Caller-supplied name of that node.
    pub name: String,
    /// Candidate-to-query rigid transform. Identity for mono closures: no
    /// metric scale is recoverable from a fundamental matrix.
    pub transform: SE3,
}

/// The most recently ingested node, kept in memory so verification does not
/// re-read it from the store.
struct CurrentNode {
    index: usize,
    features: FeatureSet,
    /// Guards against appending the same node twice when
    /// `get_loop_closure` is called repeatedly.
    hashed: bool,
}

/// Loop-closure detector over a stream of mono or stereo frames.
///
/// Generic over the external [`FeatureExtractor`]; the engine never touches
/// pixel data itself.
pub struct LoopClosureEngine<E: FeatureExtractor> {
    params: Params,
    extractor: E,
    camera: Option<CameraModel>,
    store: Option<FeatureStore>,
    hasher: Option<ProjectionHasher>,
    hash_index: HashIndex,
    verifier: Option<Verifier>,
    current: Option<CurrentNode>,
    next_index: usize,
}

impl<E: FeatureExtractor> LoopClosureEngine<E> {
    pub fn new(extractor: E) -> Self {
        Self {
            params: Params::default(),
            extractor,
            camera: None,
            store: None,
            hasher: None,
            hash_index: HashIndex::new(),
            verifier: None,
            current: None,
            next_index: 0,
        }
    }

    /// Replace the parameter set. Takes effect at the next `init()`.
    pub fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Supply the 3x3 intrinsic matrix. Required once before the first
    /// stereo `set_node`; unused for mono streams.
    pub fn set_camera_model(&mut self, k: &Matrix3<f64>) {
        let camera = CameraModel::from_matrix(k);
        self.camera = Some(camera);
        if let Some(verifier) = self.verifier.as_mut() {
            verifier.set_camera(camera);
        }
    }

    /// Validate parameters and set up a fresh scratch store. Discards any
    /// state from a previous run.
    pub fn init(&mut self) -> Result<()> {
        self.params.validate()?;
        if let Some(store) = self.store.take() {
            store.remove()?;
        }
        self.store = Some(FeatureStore::create(&self.params.work_dir)?);
        self.hash_index.clear();
        self.hasher = None;
        self.current = None;
        self.next_index = 0;
        self.verifier = Some(Verifier::new(&self.params, self.camera));
        info!(work_dir = %self.params.work_dir.display(), "loop-closure engine initialized");
        Ok(())
    }

    /// Tear down: drop all run state and remove the scratch store.
    pub fn finalize(&mut self) -> Result<()> {
        self.hash_index.clear();
        self.hasher = None;
        self.verifier = None;
        self.current = None;
        self.next_index = 0;
        if let Some(store) = self.store.take() {
            store.remove()?;
        }
        info!("loop-closure engine finalized");
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.store.is_none() {
            return Err(Error::Config("init() must be called first".into()));
        }
        Ok(())
    }

    /// Extract features from a mono frame and persist them as the next node.
    /// Returns the assigned node index.
    pub fn set_node(&mut self, image: &E::Image, name: &str) -> Result<usize> {
        self.ensure_initialized()?;
        let features = self.extractor.extract_mono(image)?;
        self.ingest(features, name)
    }

    /// Stereo variant: extract from a rectified pair. The camera model must
    /// have been supplied beforehand.
    pub fn set_node_stereo(
        &mut self,
        left: &E::Image,
        right: &E::Image,
        name: &str,
    ) -> Result<usize> {
        self.ensure_initialized()?;
        if self.camera.is_none() {
            return Err(Error::Config(
                "set_camera_model must be called before stereo ingestion".into(),
            ));
        }
        let features = self.extractor.extract_stereo(left, right)?;
        if !features.is_empty() && !features.is_stereo() {
            return Err(Error::Extraction(
                "stereo extractor returned no 3-D points".into(),
            ));
        }
        self.ingest(features, name)
    }

    fn ingest(&mut self, mut features: FeatureSet, name: &str) -> Result<usize> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| Error::Config("init() must be called before set_node".into()))?;

        features.check_consistent()?;
        if let Some(hasher) = self.hasher.as_ref() {
            if !features.is_empty() && features.descriptor_dim() != hasher.descriptor_dim() {
                return Err(Error::DimensionMismatch {
                    expected: hasher.descriptor_dim(),
                    actual: features.descriptor_dim(),
                });
            }
        }
        features.truncate(self.params.max_desc);

        let index = self.next_index;
        store.put(index, name, &features)?;
        self.next_index += 1;
        debug!(index, name, keypoints = features.len(), "node ingested");

        self.current = Some(CurrentNode {
            index,
            features,
            hashed: false,
        });
        Ok(index)
    }

    /// Search the history for a loop closure of the most recently ingested
    /// node. Returns `None` while warming up and when no candidate passes
    /// verification.
    pub fn get_loop_closure(&mut self) -> Result<Option<LoopClosure>> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| Error::Config("init() must be called before get_loop_closure".into()))?;
        let current = self
            .current
            .as_mut()
            .ok_or_else(|| Error::Config("no node has been ingested".into()))?;

        // Nodes without descriptors never enter the hash history.
        if current.features.is_empty() {
            debug!(index = current.index, "node has no descriptors, skipping");
            return Ok(None);
        }

        let hasher = match self.hasher.as_ref() {
            Some(hasher) => hasher,
            None => {
                // First hashable node bootstraps the basis; it has no
                // history to close against.
                let hasher = ProjectionHasher::new(
                    &current.features.descriptors,
                    self.params.num_proj,
                    self.params.hash_seed,
                )?;
                let hash = hasher.hash(&current.features.descriptors)?;
                self.hash_index.append(current.index, hash);
                current.hashed = true;
                info!(
                    dim = hasher.descriptor_dim(),
                    prefix = hasher.prefix_len(),
                    "projection basis initialized"
                );
                self.hasher = Some(hasher);
                return Ok(None);
            }
        };

        let query_hash = hasher.hash(&current.features.descriptors)?;
        if !current.hashed {
            self.hash_index.append(current.index, query_hash.clone());
            current.hashed = true;
        }

        if self.hash_index.len() <= self.params.min_neighbour {
            debug!(size = self.hash_index.len(), "history too short, warming up");
            return Ok(None);
        }

        let query_index = current.index;
        let candidates =
            self.hash_index
                .rank_candidates(query_index, &query_hash, self.params.min_neighbour);
        debug!(
            query = query_index,
            candidates = candidates.len(),
            "hash candidates ranked"
        );

        let verifier = self
            .verifier
            .as_mut()
            .ok_or_else(|| Error::Config("engine not initialized".into()))?;

        for (rank, &(candidate_index, distance)) in candidates
            .iter()
            .take(self.params.n_candidates)
            .enumerate()
        {
            let verification =
                match verifier.verify(&current.features, store, candidate_index) {
                    Ok(v) => v,
                    // A candidate that was never stored is skipped; anything
                    // else fails the call.
                    Err(Error::NotFound(idx)) => {
                        warn!(candidate = idx, "candidate missing from store, skipping");
                        continue;
                    }
                    Err(err) => return Err(err),
                };

            if !verification.ok {
                debug!(
                    candidate = candidate_index,
                    rank,
                    matches = verification.matches,
                    inliers = verification.inliers,
                    "candidate rejected"
                );
                continue;
            }

            // A true revisit should also match a temporal neighbour of the
            // candidate; spurious matches rarely do.
            if self.params.validate {
                let mut neighbour_ok = false;
                for neighbour in [candidate_index.checked_sub(1), Some(candidate_index + 1)]
                    .into_iter()
                    .flatten()
                {
                    match verifier.verify(&current.features, store, neighbour) {
                        Ok(v) if v.ok => {
                            neighbour_ok = true;
                            break;
                        }
                        Ok(_) => {}
                        // A neighbour outside the stored range is simply not
                        // supporting evidence.
                        Err(Error::NotFound(_)) => {}
                        Err(err) => return Err(err),
                    }
                }
                if !neighbour_ok {
                    debug!(candidate = candidate_index, "neighbour validation failed");
                    continue;
                }
            }

            info!(
                query = query_index,
                candidate = candidate_index,
                distance,
                matches = verification.matches,
                inliers = verification.inliers,
                "loop closure accepted"
            );
            return Ok(Some(LoopClosure {
                index: candidate_index,
                name: verification.name,
                transform: verification.transform,
            }));
        }

        Ok(None)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        if self.store.is_none() || self.hasher.is_none() {
            EngineState::Uninitialized
        } else if self.hash_index.len() <= self.params.min_neighbour {
            EngineState::Warming
        } else {
            EngineState::Active
        }
    }

    /// Number of nodes ingested since `init()`.
    pub fn num_nodes(&self) -> usize {
        self.next_index
    }
}
