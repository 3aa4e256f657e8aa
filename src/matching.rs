//! Cross-checked descriptor matching with Lowe's ratio test.
//!
//! A pair survives only when each side's nearest neighbour is the other row
//! and the ratio test passes in both directions. Distances are L2 over
//! descriptor rows.

use nalgebra::DMatrix;

/// One accepted correspondence between a query row and a train row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: f64,
}

/// Squared L2 distance between row `i` of `a` and row `j` of `b`.
fn row_distance_sq(a: &DMatrix<f64>, i: usize, b: &DMatrix<f64>, j: usize) -> f64 {
    let mut sum = 0.0;
    for c in 0..a.ncols() {
        let d = a[(i, c)] - b[(j, c)];
        sum += d * d;
    }
    sum
}

/// Nearest neighbour of `row` in `other`, with the second-nearest distance
/// for the ratio test. `None` when `other` has fewer than two rows.
fn two_nearest(
    descriptors: &DMatrix<f64>,
    row: usize,
    other: &DMatrix<f64>,
) -> Option<(usize, f64, f64)> {
    if other.nrows() < 2 {
        return None;
    }

    let mut best_idx = 0usize;
    let mut best_sq = f64::INFINITY;
    let mut second_sq = f64::INFINITY;

    for j in 0..other.nrows() {
        let dist_sq = row_distance_sq(descriptors, row, other, j);
        if dist_sq < best_sq {
            second_sq = best_sq;
            best_sq = dist_sq;
            best_idx = j;
        } else if dist_sq < second_sq {
            second_sq = dist_sq;
        }
    }

    Some((best_idx, best_sq, second_sq))
}

/// Ratio test on squared distances: `d1 < ratio * d2` iff
/// `d1^2 < ratio^2 * d2^2` for non-negative distances.
fn passes_ratio(best_sq: f64, second_sq: f64, ratio: f64) -> bool {
    best_sq < ratio * ratio * second_sq
}

/// Mutual nearest-neighbour matching under the ratio test.
///
/// Both matrices must share the same column count; either side having fewer
/// than two rows yields no matches (the ratio test needs a second
/// neighbour).
pub fn cross_check_ratio_match(
    query: &DMatrix<f64>,
    train: &DMatrix<f64>,
    ratio: f64,
) -> Vec<DescriptorMatch> {
    debug_assert_eq!(query.ncols(), train.ncols());

    // Forward pass: best train row per query row, ratio-tested.
    let forward: Vec<Option<(usize, f64)>> = (0..query.nrows())
        .map(|i| {
            two_nearest(query, i, train).and_then(|(j, best_sq, second_sq)| {
                passes_ratio(best_sq, second_sq, ratio).then_some((j, best_sq))
            })
        })
        .collect();

    // Backward pass: best query row per train row, ratio-tested.
    let backward: Vec<Option<usize>> = (0..train.nrows())
        .map(|j| {
            two_nearest(train, j, query).and_then(|(i, best_sq, second_sq)| {
                passes_ratio(best_sq, second_sq, ratio).then_some(i)
            })
        })
        .collect();

    let mut matches = Vec::new();
    for (i, fwd) in forward.iter().enumerate() {
        if let Some((j, best_sq)) = fwd {
            if backward[*j] == Some(i) {
                matches.push(DescriptorMatch {
                    query_idx: i,
                    train_idx: *j,
                    distance: best_sq.sqrt(),
                });
            }
        }
    }
    matches
}
