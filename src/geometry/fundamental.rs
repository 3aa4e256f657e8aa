//! Fundamental-matrix estimation with RANSAC.
//!
//! The minimal solver is the normalized 8-point algorithm (Hartley
//! normalization, rank-2 enforcement); inliers are scored with the Sampson
//! distance. Used for the epipolar check in mono verification.

use nalgebra::{DMatrix, Matrix3, Point2, Vector3};
use rand::Rng;

use crate::error::{Error, Result};

const SAMPLE_SIZE: usize = 8;
const MAX_ITERATIONS: usize = 1000;
const CONFIDENCE: f64 = 0.999;

/// Result of a robust fundamental-matrix fit.
#[derive(Debug, Clone)]
pub struct FundamentalResult {
    pub matrix: Matrix3<f64>,
    /// Inlier mask per correspondence.
    pub inliers: Vec<bool>,
    pub num_inliers: usize,
}

/// Estimate the fundamental matrix between two point sets with RANSAC.
///
/// `inlier_thresh` is the Sampson distance (pixels) below which a
/// correspondence counts as an inlier. The iteration count adapts to the
/// observed inlier ratio, capped at 1000.
pub fn find_fundamental_ransac(
    pts1: &[Point2<f64>],
    pts2: &[Point2<f64>],
    inlier_thresh: f64,
    rng: &mut impl Rng,
) -> Result<FundamentalResult> {
    let n = pts1.len();
    if n != pts2.len() || n < SAMPLE_SIZE {
        return Err(Error::DegenerateGeometry(format!(
            "fundamental fit needs at least {SAMPLE_SIZE} paired points, got {n}"
        )));
    }

    let thresh_sq = inlier_thresh * inlier_thresh;
    let mut best: Option<FundamentalResult> = None;
    let mut best_count = 0usize;
    let mut max_iter = MAX_ITERATIONS;

    let mut iteration = 0;
    while iteration < max_iter {
        iteration += 1;

        let idx = sample_unique_indices(rng, n, SAMPLE_SIZE);
        let sample1: Vec<_> = idx.iter().map(|&i| pts1[i]).collect();
        let sample2: Vec<_> = idx.iter().map(|&i| pts2[i]).collect();

        let f = match eight_point(&sample1, &sample2) {
            Ok(f) => f,
            Err(_) => continue,
        };

        let (inliers, count) = score_inliers(&f, pts1, pts2, thresh_sq);
        if count > best_count {
            best_count = count;
            best = Some(FundamentalResult {
                matrix: f,
                inliers,
                num_inliers: count,
            });

            let inlier_ratio = count as f64 / n as f64;
            let updated = adaptive_iterations(inlier_ratio, CONFIDENCE, SAMPLE_SIZE);
            max_iter = max_iter.min(iteration.saturating_add(updated));
        }
    }

    let mut result = best.ok_or_else(|| {
        Error::DegenerateGeometry("RANSAC failed to estimate a fundamental matrix".into())
    })?;

    // Refit on the consensus set; keep the refinement only if it does not
    // lose inliers.
    if result.num_inliers >= SAMPLE_SIZE {
        let in1: Vec<_> = mask_select(pts1, &result.inliers);
        let in2: Vec<_> = mask_select(pts2, &result.inliers);
        if let Ok(refined) = eight_point(&in1, &in2) {
            let (inliers, count) = score_inliers(&refined, pts1, pts2, thresh_sq);
            if count >= result.num_inliers {
                result = FundamentalResult {
                    matrix: refined,
                    inliers,
                    num_inliers: count,
                };
            }
        }
    }

    Ok(result)
}

/// Squared Sampson distance of a correspondence against `f`.
pub fn sampson_error_sq(f: &Matrix3<f64>, p1: &Point2<f64>, p2: &Point2<f64>) -> f64 {
    let x1 = Vector3::new(p1.x, p1.y, 1.0);
    let x2 = Vector3::new(p2.x, p2.y, 1.0);
    let fx1 = f * x1;
    let ftx2 = f.transpose() * x2;
    let x2tfx1 = x2.dot(&fx1);
    let denom = fx1[0] * fx1[0] + fx1[1] * fx1[1] + ftx2[0] * ftx2[0] + ftx2[1] * ftx2[1];
    if denom <= 1e-18 {
        f64::INFINITY
    } else {
        (x2tfx1 * x2tfx1) / denom
    }
}

/// Normalized 8-point estimate. Points are Hartley-normalized, the linear
/// system solved by SVD, the rank-2 constraint enforced, and the result
/// expressed back in pixel units.
pub fn eight_point(pts1: &[Point2<f64>], pts2: &[Point2<f64>]) -> Result<Matrix3<f64>> {
    let n = pts1.len();
    if n != pts2.len() || n < SAMPLE_SIZE {
        return Err(Error::DegenerateGeometry(format!(
            "eight_point needs at least {SAMPLE_SIZE} paired points, got {n}"
        )));
    }

    let (n1, t1) = normalize_points(pts1)?;
    let (n2, t2) = normalize_points(pts2)?;

    let mut a = DMatrix::<f64>::zeros(n, 9);
    for i in 0..n {
        let (x1, y1) = (n1[i].x, n1[i].y);
        let (x2, y2) = (n2[i].x, n2[i].y);
        a[(i, 0)] = x2 * x1;
        a[(i, 1)] = x2 * y1;
        a[(i, 2)] = x2;
        a[(i, 3)] = y2 * x1;
        a[(i, 4)] = y2 * y1;
        a[(i, 5)] = y2;
        a[(i, 6)] = x1;
        a[(i, 7)] = y1;
        a[(i, 8)] = 1.0;
    }

    let svd = a.svd(false, true);
    let vt = svd
        .v_t
        .ok_or_else(|| Error::DegenerateGeometry("SVD failed in eight_point".into()))?;
    let fvec = vt.row(vt.nrows() - 1);
    let f0 = Matrix3::new(
        fvec[0], fvec[1], fvec[2], fvec[3], fvec[4], fvec[5], fvec[6], fvec[7], fvec[8],
    );

    let f_rank2 = enforce_rank2(&f0)?;
    Ok(t2.transpose() * f_rank2 * t1)
}

fn score_inliers(
    f: &Matrix3<f64>,
    pts1: &[Point2<f64>],
    pts2: &[Point2<f64>],
    thresh_sq: f64,
) -> (Vec<bool>, usize) {
    let mut mask = vec![false; pts1.len()];
    let mut count = 0;
    for (i, (p1, p2)) in pts1.iter().zip(pts2.iter()).enumerate() {
        if sampson_error_sq(f, p1, p2) <= thresh_sq {
            mask[i] = true;
            count += 1;
        }
    }
    (mask, count)
}

/// Hartley normalization: translate to the centroid and scale so the mean
/// distance from the origin is sqrt(2).
fn normalize_points(pts: &[Point2<f64>]) -> Result<(Vec<Point2<f64>>, Matrix3<f64>)> {
    let n = pts.len() as f64;
    let mx = pts.iter().map(|p| p.x).sum::<f64>() / n;
    let my = pts.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - mx).powi(2) + (p.y - my).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist <= 1e-12 {
        return Err(Error::DegenerateGeometry(
            "all points coincide in normalize_points".into(),
        ));
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Matrix3::new(s, 0.0, -s * mx, 0.0, s, -s * my, 0.0, 0.0, 1.0);
    let normalized = pts
        .iter()
        .map(|p| {
            let v = t * Vector3::new(p.x, p.y, 1.0);
            Point2::new(v[0], v[1])
        })
        .collect();
    Ok((normalized, t))
}

/// Set the smallest singular value to zero.
fn enforce_rank2(m: &Matrix3<f64>) -> Result<Matrix3<f64>> {
    let svd = m.svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| Error::DegenerateGeometry("SVD U missing in enforce_rank2".into()))?;
    let vt = svd
        .v_t
        .ok_or_else(|| Error::DegenerateGeometry("SVD V^T missing in enforce_rank2".into()))?;
    let sigma = Matrix3::new(
        svd.singular_values[0],
        0.0,
        0.0,
        0.0,
        svd.singular_values[1],
        0.0,
        0.0,
        0.0,
        0.0,
    );
    Ok(u * sigma * vt)
}

fn mask_select<T: Copy>(items: &[T], mask: &[bool]) -> Vec<T> {
    items
        .iter()
        .zip(mask.iter())
        .filter_map(|(item, &keep)| keep.then_some(*item))
        .collect()
}

pub(crate) fn sample_unique_indices(rng: &mut impl Rng, n: usize, k: usize) -> Vec<usize> {
    let mut out = Vec::with_capacity(k);
    while out.len() < k {
        let idx = rng.gen_range(0..n);
        if !out.contains(&idx) {
            out.push(idx);
        }
    }
    out
}

/// Number of RANSAC iterations needed to hit `probability` given the
/// observed inlier ratio: `k = log(1 - p) / log(1 - w^n)`.
pub(crate) fn adaptive_iterations(inlier_ratio: f64, probability: f64, sample_size: usize) -> usize {
    if inlier_ratio <= 0.0 {
        return usize::MAX;
    }
    if inlier_ratio >= 1.0 {
        return 1;
    }
    let w_n = inlier_ratio.powi(sample_size as i32);
    let log_denom = (1.0 - w_n).ln();
    if log_denom.abs() < 1e-10 {
        return 1;
    }
    let k = (1.0 - probability).ln() / log_denom;
    (k.ceil() as usize).max(1)
}
